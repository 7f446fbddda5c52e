//! Error types for beacon configuration sessions

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{SessionState, SessionTrigger};

/// Result type for GATT link operations
pub type LinkResult<T> = Result<T, LinkError>;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for attribute encoding and decoding
pub type CodecResult<T> = Result<T, CodecError>;

/// ATT "unlikely error", used when the stack gives no better code
pub const ATT_UNLIKELY_ERROR: u8 = 0x0e;

/// Errors raised by the radio link
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("GATT operation failed (code {code:#04x}): {message}")]
    Gatt { code: u8, message: String },

    #[error("Not connected")]
    NotConnected,
}

impl LinkError {
    /// Numeric failure code reported to observers
    pub fn code(&self) -> u8 {
        match self {
            LinkError::Gatt { code, .. } => *code,
            _ => ATT_UNLIKELY_ERROR,
        }
    }
}

/// Errors raised while encoding or decoding characteristic payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Value {value} out of range {min}..={max}")]
    ValueOutOfRange { value: i64, min: i64, max: i64 },

    #[error("Unsupported transmit power: {0} dBm")]
    UnsupportedTxPower(i64),

    #[error("Unknown transmit power code: {0}")]
    UnknownTxPowerCode(u8),

    #[error("Text too long: {len} bytes, at most {max} allowed")]
    TooLong { len: usize, max: usize },
}

/// Errors related to session operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is already connecting or connected")]
    AlreadyConnecting,

    #[error("Session is not ready")]
    NotReady,

    #[error("Password verification required")]
    PasswordRequired,

    #[error("Password rejected by device")]
    PasswordRejected,

    #[error("Password verification already in progress")]
    VerificationInProgress,

    #[error("Invalid transition {trigger:?} in state {from:?}")]
    InvalidTransition {
        from: SessionState,
        trigger: SessionTrigger,
    },

    #[error("Session closed")]
    SessionClosed,

    #[error("Operation timed out")]
    Timeout,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Link failure: {0}")]
    LinkFailure(#[from] LinkError),
}

impl SessionError {
    /// Classification published with `OperationFailed` events
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::AlreadyConnecting => ErrorKind::AlreadyConnecting,
            SessionError::NotReady => ErrorKind::NotReady,
            SessionError::PasswordRequired => ErrorKind::PasswordRequired,
            SessionError::PasswordRejected => ErrorKind::PasswordRejected,
            SessionError::VerificationInProgress => ErrorKind::VerificationInProgress,
            SessionError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            SessionError::SessionClosed => ErrorKind::SessionClosed,
            SessionError::Timeout => ErrorKind::Timeout,
            SessionError::Codec(CodecError::InvalidFormat(_)) => ErrorKind::InvalidFormat,
            SessionError::Codec(_) => ErrorKind::ValueOutOfRange,
            SessionError::LinkFailure(e) => ErrorKind::LinkFailure { code: e.code() },
        }
    }

    /// Whether the error means the radio link can no longer be trusted
    pub fn is_link_level(&self) -> bool {
        matches!(self, SessionError::LinkFailure(_) | SessionError::Timeout)
    }
}

/// Serializable error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    AlreadyConnecting,
    NotReady,
    PasswordRequired,
    PasswordRejected,
    VerificationInProgress,
    InvalidTransition,
    InvalidFormat,
    ValueOutOfRange,
    SessionClosed,
    LinkFailure { code: u8 },
    Timeout,
}

/// Errors raised while building the runtime configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid layout file: {0}")]
    Layout(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            SessionError::from(CodecError::InvalidFormat("x".into())).kind(),
            ErrorKind::InvalidFormat
        );
        assert_eq!(
            SessionError::from(CodecError::UnknownTxPowerCode(5)).kind(),
            ErrorKind::ValueOutOfRange
        );
        assert_eq!(
            SessionError::from(LinkError::Gatt {
                code: 0x03,
                message: "write not permitted".into()
            })
            .kind(),
            ErrorKind::LinkFailure { code: 0x03 }
        );
        assert_eq!(
            SessionError::from(LinkError::NotConnected).kind(),
            ErrorKind::LinkFailure {
                code: ATT_UNLIKELY_ERROR
            }
        );
    }

    #[test]
    fn test_link_level_errors() {
        assert!(SessionError::Timeout.is_link_level());
        assert!(SessionError::LinkFailure(LinkError::NotConnected).is_link_level());
        assert!(!SessionError::PasswordRequired.is_link_level());
        assert!(!SessionError::from(CodecError::UnknownTxPowerCode(9)).is_link_level());
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::LinkFailure { code: 8 }).unwrap();
        assert_eq!(json, r#"{"kind":"link_failure","code":8}"#);
        let json = serde_json::to_string(&ErrorKind::SessionClosed).unwrap();
        assert_eq!(json, r#"{"kind":"session_closed"}"#);
    }
}
