//! Non-fatal session events and where they are reported.
//!
//! Nothing reported here aborts a request: a bad incoming token just means
//! the request runs without a session, and an oversized token is still sent.

use std::fmt;

use tracing::{error, warn};

use crate::error::SessionError;

/// Which way the cipher was being used when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    Encrypting,
    Decrypting,
}

impl fmt::Display for CipherDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CipherDirection::Encrypting => write!(f, "encrypting"),
            CipherDirection::Decrypting => write!(f, "decrypting"),
        }
    }
}

/// Something worth reporting that happened while handling a session token.
#[derive(Debug)]
pub enum SessionEvent<'a> {
    /// An outgoing token reached the configured size warning threshold.
    TokenSizeWarning { session_id: &'a str, size_bytes: usize },

    /// An incoming token decrypted but its structure was malformed.
    TokenDecodeFailed { error: &'a SessionError },

    /// An incoming token could not be decrypted.
    TokenDecryptFailed { error: &'a SessionError },

    /// The cipher itself failed.
    CipherFailed {
        error: &'a SessionError,
        direction: CipherDirection,
    },

    /// The attribute segment of an incoming token could not be deserialized.
    AttributeDecodeFailed {
        session_id: &'a str,
        error: &'a SessionError,
    },
}

/// Receiver for [`SessionEvent`]s.
pub trait ErrorSink: Send + Sync {
    fn report(&self, event: &SessionEvent<'_>);
}

/// Default sink: logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, event: &SessionEvent<'_>) {
        match event {
            SessionEvent::TokenSizeWarning {
                session_id,
                size_bytes,
            } => warn!(
                session_id = %session_id,
                size_bytes = size_bytes,
                "Session token is large and may be dropped by the browser"
            ),
            SessionEvent::TokenDecodeFailed { error } => {
                warn!(error = %error, "Received session token that could not be decoded")
            }
            SessionEvent::TokenDecryptFailed { error } => {
                warn!(error = %error, "Received session token that could not be decrypted")
            }
            SessionEvent::CipherFailed { error, direction } => {
                error!(error = %error, direction = %direction, "Session cipher failure")
            }
            SessionEvent::AttributeDecodeFailed { session_id, error } => error!(
                session_id = %session_id,
                error = %error,
                "Session attributes could not be deserialized"
            ),
        }
    }
}
