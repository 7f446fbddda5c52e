//! Session event types (session-to-observer notifications)

use serde::Serialize;

use crate::core::{
    error::ErrorKind,
    types::{BeaconField, DeviceAddress, FieldValue, SessionState},
};

/// Why a session ended up disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Caller asked for the disconnect
    Requested,
    /// Link setup or a GATT operation failed
    LinkFailure { code: u8 },
    /// Connect, discovery or an operation did not finish in time
    Timeout,
}

/// Kind of operation reported in `OperationFailed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpKind {
    Connect,
    Read { field: BeaconField },
    Write { field: BeaconField },
    SubmitPassword,
}

/// Events published by a beacon session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Intermediate state transition
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Services discovered, session ready for reads and writes
    Connected { address: DeviceAddress },

    /// Session reached the disconnected state
    Disconnected(DisconnectReason),

    /// A characteristic read completed and decoded
    AttributeAvailable { value: FieldValue },

    PasswordAccepted,

    PasswordRejected,

    OperationFailed { op: OpKind, error: ErrorKind },
}

impl SessionEvent {
    pub fn operation_failed(op: OpKind, error: ErrorKind) -> Self {
        SessionEvent::OperationFailed { op, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_changed_event() {
        let event = SessionEvent::StateChanged {
            from: SessionState::Connecting,
            to: SessionState::Connected,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"state_changed""#));
        assert!(json.contains(r#""from":"connecting""#));
        assert!(json.contains(r#""to":"connected""#));
    }

    #[test]
    fn test_disconnected_event() {
        let event = SessionEvent::Disconnected(DisconnectReason::LinkFailure { code: 0x0e });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"disconnected""#));
        assert!(json.contains(r#""reason":"link_failure""#));
        assert!(json.contains(r#""code":14"#));
    }

    #[test]
    fn test_attribute_available_event() {
        let event = SessionEvent::AttributeAvailable {
            value: FieldValue::Major(1234),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"attribute_available""#));
        assert!(json.contains(r#""field":"major""#));
        assert!(json.contains(r#""value":1234"#));
    }

    #[test]
    fn test_operation_failed_event() {
        let event = SessionEvent::operation_failed(
            OpKind::Write {
                field: BeaconField::Name,
            },
            ErrorKind::PasswordRequired,
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"operation_failed""#));
        assert!(json.contains(r#""op":"write""#));
        assert!(json.contains(r#""field":"name""#));
        assert!(json.contains(r#""kind":"password_required""#));
    }

    #[test]
    fn test_connected_event() {
        let event = SessionEvent::Connected {
            address: DeviceAddress::new([0xc8, 0xfd, 0x19, 0x3a, 0x00, 0x7f]),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(
            json,
            r#"{"event":"connected","address":"C8:FD:19:3A:00:7F"}"#
        );
    }
}
