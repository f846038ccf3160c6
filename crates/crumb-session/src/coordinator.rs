//! Per-request session handling.
//!
//! A request reads the session token, hands a lazily resolved session to the
//! downstream handler, and afterwards decides whether the client needs a new
//! token, a removal, or nothing at all.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::cache::{CacheSettings, SessionCache};
use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{CipherDirection, ErrorSink, SessionEvent, TracingErrorSink};
use crate::path_filter::PathFilter;
use crate::record::{ControlData, SessionRecord};
use crate::token::{self, TokenCipher, TokenSegments};
use crate::transport::{OutgoingToken, TokenTransport};

/// Owns the cipher, the cache and the reporting sink for one application.
pub struct SessionCoordinator {
    config: SessionConfig,
    cipher: TokenCipher,
    cache: SessionCache,
    sink: Arc<dyn ErrorSink>,
    path_filter: PathFilter,
}

impl SessionCoordinator {
    /// Build a coordinator on the wall clock that logs events via `tracing`.
    ///
    /// Fails if the configuration is invalid or the cipher cannot be set up
    /// for the configured algorithm and key.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::from_parts(config, Arc::new(SystemClock), Arc::new(TracingErrorSink))
    }

    /// Build a coordinator with an explicit time source and event sink.
    pub fn from_parts(
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        config.validate()?;
        let key = config.resolve_encryption_key()?;
        let cipher = TokenCipher::new(&config.encryption_algorithm, &key)?;
        probe(&cipher)?;

        let path_filter = PathFilter::new(&config.only_paths, &config.except_paths)?;
        let cache = SessionCache::with_clock(CacheSettings::from_config(&config), clock);

        debug!(
            algorithm = %cipher.algorithm(),
            cookie = %config.cookie_name,
            caching = config.caching_enabled(),
            "Session coordinator ready"
        );

        Ok(Self {
            config,
            cipher,
            cache,
            sink,
            path_filter,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn cipher(&self) -> &TokenCipher {
        &self.cipher
    }

    pub fn path_filter(&self) -> &PathFilter {
        &self.path_filter
    }

    /// Run `downstream` with session access, then write the token decision
    /// to `transport`.
    pub fn handle<T, R>(
        &self,
        transport: &mut T,
        downstream: impl FnOnce(&mut RequestSession<'_>) -> R,
    ) -> R
    where
        T: TokenTransport + ?Sized,
    {
        self.cache.maintain();

        let incoming = transport.read_incoming_token(&self.config.cookie_name);
        let mut session = RequestSession::new(self, incoming);
        let output = downstream(&mut session);
        self.finish(session, transport);
        output
    }

    /// Like [`handle`](Self::handle), but requests whose path the filter
    /// rejects go straight to `downstream` with no session and no token
    /// handling.
    pub fn filter<T, R>(
        &self,
        context_path: &str,
        request_path: &str,
        transport: &mut T,
        downstream: impl FnOnce(Option<&mut RequestSession<'_>>) -> R,
    ) -> R
    where
        T: TokenTransport + ?Sized,
    {
        if !self.path_filter.should_wrap(context_path, request_path) {
            trace!(path = %request_path, "Request path not wrapped");
            return downstream(None);
        }
        self.handle(transport, |session| downstream(Some(session)))
    }

    /// Decode a token into a standalone record, without touching the cache.
    pub fn decode_token(&self, token: &str) -> Result<SessionRecord> {
        let segments = token::decode(token, &self.cipher)?;
        let control = codec::decode(&segments.control)?;
        let attributes = codec::decode(&segments.data)?;
        SessionRecord::rehydrate(&control, attributes)
    }

    /// Encode a record's current state as a token.
    pub fn encode_token(&self, record: &SessionRecord) -> Result<String> {
        token::encode(&record.encode_segments()?, &self.cipher)
    }

    /// Stop the background purge thread, if one is running.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    fn now(&self) -> DateTime<Utc> {
        self.cache.clock().now()
    }

    fn create_session(&self) -> Arc<SessionRecord> {
        let record = Arc::new(SessionRecord::new(
            self.now(),
            self.config.inactivity_timeout_seconds,
        ));
        debug!(session_id = %record.id(), "Created session");
        self.cache.insert_if_absent(record)
    }

    /// Resolve the session an incoming token refers to. Every failure is
    /// reported and treated as "no session".
    fn lookup(&self, token: &str) -> Option<Arc<SessionRecord>> {
        let segments = match token::decode(token, &self.cipher) {
            Ok(segments) => segments,
            Err(error) => {
                self.report_token_failure(&error);
                return None;
            }
        };

        let control = match codec::decode(&segments.control)
            .and_then(|map| ControlData::from_map(&map))
        {
            Ok(control) => control,
            Err(error) => {
                self.sink
                    .report(&SessionEvent::TokenDecodeFailed { error: &error });
                return None;
            }
        };

        let id = control.session_id.clone();
        let TokenSegments { data, .. } = segments;
        let record = self.cache.resolve(
            &id,
            || match codec::decode(&data) {
                Ok(attributes) => Some(SessionRecord::from_control(control, attributes)),
                Err(error) => {
                    self.sink.report(&SessionEvent::AttributeDecodeFailed {
                        session_id: &id,
                        error: &error,
                    });
                    None
                }
            },
            false,
        )?;

        if record.has_expired(self.now(), self.config.session_timeout_minutes) {
            debug!(session_id = %id, "Session expired");
            self.cache.remove(&id);
            return None;
        }

        trace!(session_id = %id, "Resolved session from token");
        Some(record)
    }

    fn report_token_failure(&self, error: &SessionError) {
        let event = match error {
            SessionError::Decoding(_) => SessionEvent::TokenDecodeFailed { error },
            SessionError::Decryption { .. } => SessionEvent::TokenDecryptFailed { error },
            _ => SessionEvent::CipherFailed {
                error,
                direction: CipherDirection::Decrypting,
            },
        };
        self.sink.report(&event);
    }

    fn finish<T>(&self, mut session: RequestSession<'_>, transport: &mut T)
    where
        T: TokenTransport + ?Sized,
    {
        let Some(record) = session.record.take() else {
            // No live session. With inactivity expiry the client's token still
            // needs a fresh access time on every visit.
            if !session.creation_requested
                && session.incoming.is_some()
                && self.config.inactivity_enabled()
            {
                match session.resolve().filter(|r| !r.is_invalidated()) {
                    Some(record) => self.write_session_token(&record, transport),
                    None => self.remove_session_token(transport),
                }
            }
            return;
        };

        if record.is_invalidated() {
            debug!(session_id = %record.id(), "Session invalidated");
            self.cache.remove(record.id());
            self.remove_session_token(transport);
        } else if record.is_new() || record.is_changed() || self.config.inactivity_enabled() {
            self.write_session_token(&record, transport);
        }
    }

    fn write_session_token<T>(&self, record: &SessionRecord, transport: &mut T)
    where
        T: TokenTransport + ?Sized,
    {
        record.touch(self.now());

        let value = match self.encode_token(record) {
            Ok(value) => value,
            Err(error) => {
                self.sink.report(&SessionEvent::CipherFailed {
                    error: &error,
                    direction: CipherDirection::Encrypting,
                });
                return;
            }
        };

        if value.len() >= self.config.cookie_size_warning_bytes {
            self.sink.report(&SessionEvent::TokenSizeWarning {
                session_id: record.id(),
                size_bytes: value.len(),
            });
        }

        trace!(session_id = %record.id(), size = value.len(), "Writing session token");
        transport.write_outgoing_token(
            OutgoingToken::new(&self.config.cookie_name, value)
                .with_domain(self.config.cookie_domain.clone()),
        );
        record.mark_clean();
    }

    fn remove_session_token<T>(&self, transport: &mut T)
    where
        T: TokenTransport + ?Sized,
    {
        transport.remove_outgoing_token(
            &self.config.cookie_name,
            self.config.cookie_domain.as_deref(),
        );
    }
}

impl fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .field("cipher", &self.cipher)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Round-trip a dummy token so a bad algorithm or key fails at startup
/// instead of on the first request.
fn probe(cipher: &TokenCipher) -> Result<()> {
    let segments = TokenSegments::new("A", "B");
    let decoded = token::encode(&segments, cipher)
        .and_then(|token| token::decode(&token, cipher))
        .map_err(|e| {
            SessionError::SecurityConfig(format!(
                "{} failed its startup check: {}",
                cipher.algorithm(),
                e
            ))
        })?;

    if decoded != segments {
        return Err(SessionError::SecurityConfig(format!(
            "{} did not round-trip its startup check",
            cipher.algorithm()
        )));
    }
    Ok(())
}

/// Session access for one request.
///
/// The incoming token is only decoded when downstream first asks for the
/// session.
pub struct RequestSession<'a> {
    coordinator: &'a SessionCoordinator,
    incoming: Option<String>,
    resolved: bool,
    record: Option<Arc<SessionRecord>>,
    creation_requested: bool,
}

impl<'a> RequestSession<'a> {
    fn new(coordinator: &'a SessionCoordinator, incoming: Option<String>) -> Self {
        Self {
            coordinator,
            incoming,
            resolved: false,
            record: None,
            creation_requested: false,
        }
    }

    /// Whether the request carried a session token at all.
    pub fn has_incoming_token(&self) -> bool {
        self.incoming.is_some()
    }

    /// The session the request's token refers to, if it is valid, live and
    /// not invalidated.
    pub fn existing_session(&mut self) -> Option<Arc<SessionRecord>> {
        self.resolve().filter(|record| !record.is_invalidated())
    }

    /// The request's session, creating one if there is no usable session.
    ///
    /// Asking again after the session was invalidated yields a new session.
    pub fn session(&mut self) -> Arc<SessionRecord> {
        self.creation_requested = true;
        if let Some(record) = self.existing_session() {
            return record;
        }

        if let Some(stale) = self.record.take() {
            self.coordinator.cache.remove(stale.id());
        }
        let record = self.coordinator.create_session();
        self.record = Some(record.clone());
        record
    }

    fn resolve(&mut self) -> Option<Arc<SessionRecord>> {
        if !self.resolved {
            self.resolved = true;
            self.record = self
                .incoming
                .as_deref()
                .and_then(|token| self.coordinator.lookup(token));
        }
        self.record.clone()
    }
}

impl fmt::Debug for RequestSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSession")
            .field("has_incoming_token", &self.incoming.is_some())
            .field("session_id", &self.record.as_ref().map(|r| r.id().to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::transport::CookieHeaders;
    use crate::value::{AttributeMap, AttributeValue};
    use base64::{Engine, engine::general_purpose::STANDARD};
    use chrono::TimeDelta;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl ErrorSink for RecordingSink {
        fn report(&self, event: &SessionEvent<'_>) {
            let name = match event {
                SessionEvent::TokenSizeWarning { .. } => "size",
                SessionEvent::TokenDecodeFailed { .. } => "decode",
                SessionEvent::TokenDecryptFailed { .. } => "decrypt",
                SessionEvent::CipherFailed { .. } => "cipher",
                SessionEvent::AttributeDecodeFailed { .. } => "attributes",
            };
            self.events.lock().push(name.to_string());
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new().with_encryption_key(&[7u8; 16])
    }

    fn coordinator(
        config: SessionConfig,
    ) -> (SessionCoordinator, Arc<ManualClock>, Arc<RecordingSink>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        ));
        let sink = Arc::new(RecordingSink::default());
        let coordinator =
            SessionCoordinator::from_parts(config, clock.clone(), sink.clone()).unwrap();
        (coordinator, clock, sink)
    }

    fn token_from(headers: &CookieHeaders) -> String {
        headers.outgoing_token("app.session").unwrap().value.clone()
    }

    #[test]
    fn test_rejects_bad_key() {
        let config = SessionConfig::new().with_encryption_key(&[1u8; 10]);
        let result = SessionCoordinator::from_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(TracingErrorSink),
        );
        assert!(matches!(result, Err(SessionError::SecurityConfig(_))));
    }

    #[test]
    fn test_rejects_bad_pattern() {
        let config = config().with_except_paths(vec!["(".to_string()]);
        let result = SessionCoordinator::from_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(TracingErrorSink),
        );
        assert!(matches!(result, Err(SessionError::InvalidPattern(_))));
    }

    #[test]
    fn test_no_token_no_session_writes_nothing() {
        let (coordinator, _clock, _sink) = coordinator(config());
        let mut headers = CookieHeaders::new();

        let seen =
            coordinator.handle(&mut headers, |session| session.existing_session().is_none());

        assert!(seen);
        assert!(headers.outgoing().is_empty());
    }

    #[test]
    fn test_new_session_round_trip() {
        let (coordinator, _clock, sink) = coordinator(config());
        let mut first = CookieHeaders::new();

        let id = coordinator.handle(&mut first, |session| {
            let record = session.session();
            record.set("user", "ada").unwrap();
            record.id().to_string()
        });

        let mut second = CookieHeaders::from_cookie_header(&format!(
            "app.session={}",
            token_from(&first)
        ));
        let user = coordinator.handle(&mut second, |session| {
            let record = session.existing_session().unwrap();
            assert_eq!(record.id(), id);
            record.get("user").unwrap()
        });

        assert_eq!(user, Some("ada".into()));
        // Unchanged session with inactivity expiry off: no new token.
        assert!(second.outgoing().is_empty());
        assert!(sink.events.lock().is_empty());
    }

    #[test]
    fn test_decode_token() {
        let (coordinator, _clock, _sink) = coordinator(config());
        let record = SessionRecord::new(coordinator.now(), 60);
        record.set("cart", 3i64).unwrap();

        let token = coordinator.encode_token(&record).unwrap();
        let decoded = coordinator.decode_token(&token).unwrap();

        assert_eq!(decoded.control_data(), record.control_data());
        assert_eq!(decoded.get("cart").unwrap(), Some(3i64.into()));
    }

    #[test]
    fn test_garbage_token_reports_and_continues() {
        let (coordinator, _clock, sink) = coordinator(config());
        let mut headers = CookieHeaders::from_cookie_header("app.session=!!!not-base64!!!");

        let was_new = coordinator.handle(&mut headers, |session| session.session().is_new());

        assert!(was_new);
        assert!(headers.outgoing_token("app.session").is_some());
        assert_eq!(*sink.events.lock(), vec!["decode"]);
    }

    #[test]
    fn test_unreadable_attributes_report_and_skip() {
        let (coordinator, _clock, sink) = coordinator(config().with_max_in_memory_sessions(10));
        let record = SessionRecord::new(coordinator.now(), -1);
        let segments = TokenSegments::new(
            codec::encode(&record.control_data().to_map()).unwrap(),
            STANDARD.encode(b"[1]"),
        );
        let sealed = token::encode(&segments, coordinator.cipher()).unwrap();
        let mut headers = CookieHeaders::from_cookie_header(&format!("app.session={}", sealed));

        let found = coordinator.handle(&mut headers, |session| session.existing_session());

        assert!(found.is_none());
        assert!(coordinator.cache().is_empty());
        assert!(headers.outgoing().is_empty());
        assert_eq!(*sink.events.lock(), vec!["attributes"]);
    }

    #[test]
    fn test_unencodable_session_reports_cipher_failure() {
        let (coordinator, _clock, sink) = coordinator(config().with_max_in_memory_sessions(10));
        let record = SessionRecord::new(coordinator.now(), -1);
        let token = coordinator.encode_token(&record).unwrap();

        let mut broken = AttributeMap::new();
        broken.insert("ratio".to_string(), AttributeValue::Float(f64::NAN));
        let cached = Arc::new(SessionRecord::from_control(record.control_data(), broken));
        coordinator.cache().insert_if_absent(cached);

        let mut headers = CookieHeaders::from_cookie_header(&format!("app.session={}", token));
        coordinator.handle(&mut headers, |session| {
            session.existing_session().unwrap().set("user", "ada").unwrap();
        });

        assert!(headers.outgoing().is_empty());
        assert_eq!(*sink.events.lock(), vec!["cipher"]);
    }

    #[test]
    fn test_filtered_path_skips_session() {
        let (coordinator, _clock, _sink) =
            coordinator(config().with_except_paths(vec!["/static/.*".to_string()]));
        let mut headers = CookieHeaders::new();

        let wrapped = coordinator.filter("", "/static/app.js", &mut headers, |session| {
            session.is_some()
        });
        assert!(!wrapped);

        let wrapped = coordinator.filter("", "/home", &mut headers, |session| {
            session.unwrap().session();
            true
        });
        assert!(wrapped);
        assert_eq!(headers.outgoing().len(), 1);
    }

    #[test]
    fn test_session_after_invalidate_is_fresh() {
        let (coordinator, _clock, _sink) = coordinator(config().with_max_in_memory_sessions(10));
        let mut headers = CookieHeaders::new();

        let (old_id, new_id) = coordinator.handle(&mut headers, |session| {
            let old = session.session();
            old.invalidate();
            assert!(session.existing_session().is_none());
            let fresh = session.session();
            (old.id().to_string(), fresh.id().to_string())
        });

        assert_ne!(old_id, new_id);
        assert!(!coordinator.cache().contains(&old_id));
        assert!(coordinator.cache().contains(&new_id));
        let written = coordinator.decode_token(&token_from(&headers)).unwrap();
        assert_eq!(written.id(), new_id);
    }

    #[test]
    fn test_expired_token_ignored() {
        let (coordinator, clock, _sink) = coordinator(config().with_max_in_memory_sessions(10));
        let mut first = CookieHeaders::new();
        let old_id = coordinator.handle(&mut first, |session| session.session().id().to_string());

        clock.advance(TimeDelta::minutes(31));
        let mut second =
            CookieHeaders::from_cookie_header(&format!("app.session={}", token_from(&first)));
        let found = coordinator.handle(&mut second, |session| session.existing_session());

        assert!(found.is_none());
        assert!(!coordinator.cache().contains(&old_id));
    }
}
