//! Password gate holding protected writes until the device accepts the password

use std::collections::VecDeque;

use crate::core::{
    error::{SessionError, SessionResult},
    queue::PendingWrite,
    types::{GateState, PasswordOutcome},
};

/// What to do with a write submitted to the gate
#[derive(Debug)]
pub enum Admission {
    /// Gate open, enqueue the write now
    Proceed(PendingWrite),
    /// Verification pending, the write was parked
    Parked,
    /// No verification in sight, the write is refused
    Refused(PendingWrite),
}

/// Password verification gate
///
/// Writes to protected fields only reach the command queue once the
/// device has accepted the password. Writes submitted while a verification
/// is pending are parked and released in submission order.
#[derive(Debug)]
pub struct PasswordGate {
    state: GateState,
    parked: VecDeque<PendingWrite>,
}

impl PasswordGate {
    pub fn new() -> Self {
        Self {
            state: GateState::Unverified,
            parked: VecDeque::new(),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_accepted(&self) -> bool {
        self.state == GateState::Accepted
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// Start a verification round trip
    ///
    /// Rejected is not terminal; the password may be resubmitted.
    pub fn begin_verification(&mut self) -> SessionResult<()> {
        match self.state {
            GateState::Pending => Err(SessionError::VerificationInProgress),
            GateState::Unverified | GateState::Rejected | GateState::Accepted => {
                self.state = GateState::Pending;
                Ok(())
            }
        }
    }

    /// Whether a write would proceed or be parked rather than refused
    pub fn admits(&self, protected: bool) -> bool {
        !protected || matches!(self.state, GateState::Accepted | GateState::Pending)
    }

    /// Route a write to a field; unprotected writes always proceed
    pub fn admit(&mut self, write: PendingWrite, protected: bool) -> Admission {
        if !protected {
            return Admission::Proceed(write);
        }
        match self.state {
            GateState::Accepted => Admission::Proceed(write),
            GateState::Pending => {
                self.parked.push_back(write);
                Admission::Parked
            }
            GateState::Unverified | GateState::Rejected => Admission::Refused(write),
        }
    }

    /// Apply the device's verdict
    ///
    /// Returns the parked writes: to be enqueued in order when accepted,
    /// to be discarded when rejected.
    pub fn resolve(&mut self, outcome: PasswordOutcome) -> Vec<PendingWrite> {
        self.state = match outcome {
            PasswordOutcome::Accepted => GateState::Accepted,
            PasswordOutcome::Rejected => GateState::Rejected,
        };
        self.parked.drain(..).collect()
    }

    /// Verification failed without a verdict; back to unverified
    pub fn abort(&mut self) -> Vec<PendingWrite> {
        self.state = GateState::Unverified;
        self.parked.drain(..).collect()
    }
}

impl Default for PasswordGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BeaconField, FieldValue};
    use tokio::sync::oneshot;

    fn write(major: u16) -> PendingWrite {
        let (tx, _rx) = oneshot::channel();
        PendingWrite::new(FieldValue::Major(major), major.to_be_bytes().to_vec(), tx)
    }

    #[test]
    fn test_gate_refuses_protected_write_when_unverified() {
        let mut gate = PasswordGate::new();
        assert!(!gate.admits(true));
        assert!(gate.admits(false));
        assert!(matches!(gate.admit(write(1), true), Admission::Refused(_)));
        assert!(matches!(gate.admit(write(1), false), Admission::Proceed(_)));

        gate.begin_verification().unwrap();
        assert!(gate.admits(true));
    }

    #[test]
    fn test_gate_parks_while_pending_and_releases_in_order() {
        let mut gate = PasswordGate::new();
        gate.begin_verification().unwrap();
        assert_eq!(gate.state(), GateState::Pending);

        assert!(matches!(gate.admit(write(1), true), Admission::Parked));
        assert!(matches!(gate.admit(write(2), true), Admission::Parked));
        assert_eq!(gate.parked_len(), 2);

        let released = gate.resolve(PasswordOutcome::Accepted);
        let order: Vec<FieldValue> = released.into_iter().map(|w| w.value).collect();
        assert_eq!(order, vec![FieldValue::Major(1), FieldValue::Major(2)]);
        assert!(gate.is_accepted());
        assert!(matches!(gate.admit(write(3), true), Admission::Proceed(_)));
    }

    #[test]
    fn test_gate_rejection_is_not_terminal() {
        let mut gate = PasswordGate::new();
        gate.begin_verification().unwrap();
        gate.admit(write(1), true);

        let discarded = gate.resolve(PasswordOutcome::Rejected);
        assert_eq!(discarded.len(), 1);
        assert_eq!(gate.state(), GateState::Rejected);
        assert_eq!(gate.parked_len(), 0);

        // Retry allowed
        gate.begin_verification().unwrap();
        gate.resolve(PasswordOutcome::Accepted);
        assert!(gate.is_accepted());
    }

    #[test]
    fn test_gate_rejects_concurrent_verification() {
        let mut gate = PasswordGate::new();
        gate.begin_verification().unwrap();
        assert_eq!(
            gate.begin_verification(),
            Err(SessionError::VerificationInProgress)
        );
    }

    #[test]
    fn test_gate_abort() {
        let mut gate = PasswordGate::new();
        gate.begin_verification().unwrap();
        gate.admit(write(9), true);

        let aborted = gate.abort();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].field, BeaconField::Major);
        assert_eq!(gate.state(), GateState::Unverified);
    }
}
