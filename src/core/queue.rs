//! Command queue serializing GATT operations on one link

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::{
    core::{
        error::{SessionError, SessionResult},
        types::{BeaconField, FieldValue, PasswordOutcome},
    },
    protocol::OpKind,
};

/// Reply channel back to the originator of a command
pub type Responder<T> = oneshot::Sender<SessionResult<T>>;

/// A configuration write waiting to reach the device
#[derive(Debug)]
pub struct PendingWrite {
    pub field: BeaconField,
    pub value: FieldValue,
    pub raw: Vec<u8>,
    pub responder: Responder<()>,
}

impl PendingWrite {
    pub fn new(value: FieldValue, raw: Vec<u8>, responder: Responder<()>) -> Self {
        Self {
            field: value.field(),
            value,
            raw,
            responder,
        }
    }
}

/// One GATT operation
#[derive(Debug)]
pub enum Command {
    /// Read a field; background reads carry no responder
    Read {
        field: BeaconField,
        responder: Option<Responder<FieldValue>>,
    },
    Write(PendingWrite),
    VerifyPassword {
        secret: Vec<u8>,
        responder: Responder<PasswordOutcome>,
    },
}

impl Command {
    pub fn op(&self) -> OpKind {
        match self {
            Command::Read { field, .. } => OpKind::Read { field: *field },
            Command::Write(write) => OpKind::Write { field: write.field },
            Command::VerifyPassword { .. } => OpKind::SubmitPassword,
        }
    }

    /// Notify the originator that the command failed
    pub fn fail(self, error: SessionError) {
        match self {
            Command::Read { responder, .. } => {
                if let Some(responder) = responder {
                    let _ = responder.send(Err(error));
                }
            }
            Command::Write(write) => {
                let _ = write.responder.send(Err(error));
            }
            Command::VerifyPassword { responder, .. } => {
                let _ = responder.send(Err(error));
            }
        }
    }
}

/// Sending half of the per-connection FIFO
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<Command>,
}

/// Receiving half, owned by the session worker
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<Command>,
}

/// Create a connected queue pair
pub fn command_queue() -> (CommandQueue, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandQueue { tx }, CommandReceiver { rx })
}

impl CommandQueue {
    /// Append a command; a closed queue fails it with `SessionClosed`
    pub fn enqueue(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.tx.send(command) {
            debug!(op = ?command.op(), "Queue closed, rejecting command");
            command.fail(SessionError::SessionClosed);
        }
    }
}

impl CommandReceiver {
    /// Next command in submission order
    pub async fn next(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Close the queue and fail everything still waiting with `SessionClosed`
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut failed = 0;
        while let Ok(command) = self.rx.try_recv() {
            command.fail(SessionError::SessionClosed);
            failed += 1;
        }
        failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(field: BeaconField) -> (Command, oneshot::Receiver<SessionResult<FieldValue>>) {
        let (tx, rx) = oneshot::channel();
        (
            Command::Read {
                field,
                responder: Some(tx),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut receiver) = command_queue();
        queue.enqueue(read(BeaconField::Uuid).0);
        queue.enqueue(read(BeaconField::Major).0);
        queue.enqueue(read(BeaconField::Name).0);

        let mut order = vec![];
        for _ in 0..3 {
            match receiver.next().await {
                Some(Command::Read { field, .. }) => order.push(field),
                other => panic!("unexpected command: {:?}", other),
            }
        }
        assert_eq!(
            order,
            vec![BeaconField::Uuid, BeaconField::Major, BeaconField::Name]
        );
    }

    #[tokio::test]
    async fn test_close_fails_waiting_commands() {
        let (queue, mut receiver) = command_queue();
        let (first, first_rx) = read(BeaconField::Minor);
        let (second, second_rx) = read(BeaconField::Period);
        queue.enqueue(first);
        queue.enqueue(second);

        assert_eq!(receiver.close(), 2);
        assert_eq!(first_rx.await.unwrap(), Err(SessionError::SessionClosed));
        assert_eq!(second_rx.await.unwrap(), Err(SessionError::SessionClosed));
    }

    #[tokio::test]
    async fn test_enqueue_after_close_notifies_originator() {
        let (queue, mut receiver) = command_queue();
        receiver.close();

        let (command, rx) = read(BeaconField::TxPower);
        queue.enqueue(command);
        assert_eq!(rx.await.unwrap(), Err(SessionError::SessionClosed));
    }

    #[test]
    fn test_command_op_kind() {
        let (tx, _rx) = oneshot::channel();
        let write = Command::Write(PendingWrite::new(FieldValue::Major(1), vec![0, 1], tx));
        assert_eq!(
            write.op(),
            OpKind::Write {
                field: BeaconField::Major
            }
        );
    }
}
