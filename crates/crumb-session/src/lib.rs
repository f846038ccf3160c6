//! Encrypted cookie-backed sessions with a bounded in-memory cache.
//!
//! The client holds the whole session in an encrypted token; the server keeps
//! an optional cache of live session objects so overlapping requests for the
//! same session share one instance. The token is the durable copy, and any
//! cache entry can be rebuilt from it.
//!
//! This crate provides:
//! - Token framing with AEAD encryption (AES-GCM or ChaCha20-Poly1305)
//! - A closed attribute value type with a JSON-based codec
//! - A concurrent session cache with expiry sweeps, capacity eviction and
//!   inline or background purging
//! - A per-request coordinator that decides when to send a new token
//!
//! # Example
//!
//! ```rust,ignore
//! use crumb_session::{CookieHeaders, SessionConfig, SessionCoordinator};
//!
//! let config = SessionConfig::default()
//!     .with_max_in_memory_sessions(10_000)
//!     .with_inactivity_timeout_seconds(1800);
//! let sessions = SessionCoordinator::new(config)?;
//!
//! let mut cookies = CookieHeaders::from_cookie_header(request_cookie_header);
//! sessions.handle(&mut cookies, |session| {
//!     session.session().set("user", "ada")
//! })?;
//! for header in cookies.set_cookie_headers() {
//!     response.append_header("Set-Cookie", header);
//! }
//! ```

mod cache;
mod clock;
mod config;
mod coordinator;
mod error;
mod events;
mod path_filter;
mod purge;
mod record;
mod transport;
mod value;

pub mod codec;
pub mod token;

pub use cache::{CacheSettings, CacheStats, PurgeMode, SessionCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    DEFAULT_COOKIE_NAME, DEFAULT_COOKIE_SIZE_WARNING_BYTES, DEFAULT_ENCRYPTION_ALGORITHM,
    DEFAULT_INACTIVITY_TIMEOUT_SECONDS, DEFAULT_MAX_IN_MEMORY_SESSIONS,
    DEFAULT_MIN_SECONDS_BETWEEN_PURGES, DEFAULT_SESSION_TIMEOUT_MINUTES, ENCRYPTION_KEY_ENV,
    SessionConfig,
};
pub use coordinator::{RequestSession, SessionCoordinator};
pub use error::{Result, SessionError};
pub use events::{CipherDirection, ErrorSink, SessionEvent, TracingErrorSink};
pub use path_filter::PathFilter;
pub use purge::PurgeReport;
pub use record::{
    CREATED_AT_KEY, ControlData, INACTIVITY_TIMEOUT_KEY, LAST_ACCESSED_AT_KEY, SESSION_ID_KEY,
    SessionRecord,
};
pub use token::{CipherAlgorithm, TokenCipher, TokenSegments};
pub use transport::{CookieHeaders, OutgoingToken, TokenTransport};
pub use value::{AttributeMap, AttributeValue};
