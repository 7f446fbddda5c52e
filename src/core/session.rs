//! GATT session: connection state machine, operation worker and session handle

use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{RwLock, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::GattLink,
    config::GattLayout,
    core::{
        codec::{AttributeCodec, CodecSettings},
        error::{ATT_UNLIKELY_ERROR, LinkError, LinkResult, SessionError, SessionResult},
        events::{EventBus, EventStream},
        gate::{Admission, PasswordGate},
        queue::{Command, CommandQueue, CommandReceiver, PendingWrite, command_queue},
        types::{
            BeaconAttributes, BeaconChanges, BeaconField, DeviceAddress, DeviceHandle, FieldValue,
            GateState, PasswordOutcome, SessionId, SessionState, SessionTrigger,
        },
    },
    protocol::{DisconnectReason, OpKind, SessionEvent},
};

/// Session timing and behaviour
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub layout: GattLayout,
    pub codec: CodecSettings,
    pub connect_timeout: Duration,
    pub discovery_timeout: Duration,
    /// Bound on every single read or write
    pub operation_timeout: Duration,
    /// How long to wait for the device's password verdict
    pub password_timeout: Duration,
    /// Read every field once the session is ready
    pub read_on_connect: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            layout: GattLayout::default(),
            codec: CodecSettings::default(),
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(5),
            password_timeout: Duration::from_secs(5),
            read_on_connect: true,
        }
    }
}

/// A single state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
}

/// Transition table of the session state machine
///
/// Total over every (state, trigger) pair. Ready is only reachable from
/// DiscoveringServices, and Disconnected only through Disconnecting.
pub fn next_state(from: SessionState, trigger: SessionTrigger) -> SessionResult<SessionState> {
    use SessionState::*;
    use SessionTrigger::*;

    match (from, trigger) {
        (Disconnected, Connect) => Ok(Connecting),
        (_, Connect) => Err(SessionError::AlreadyConnecting),
        (Connecting, LinkEstablished) => Ok(Connected),
        (Connected, DiscoveryStarted) => Ok(DiscoveringServices),
        (DiscoveringServices, DiscoveryComplete) => Ok(Ready),
        (Connecting | Connected | DiscoveringServices | Ready, Disconnect) => Ok(Disconnecting),
        (Disconnecting, LinkClosed) => Ok(Disconnected),
        (from, trigger) => Err(SessionError::InvalidTransition { from, trigger }),
    }
}

/// State plus the device handle of the current attempt
#[derive(Debug)]
struct SessionStateMachine {
    state: SessionState,
    handle: Option<DeviceHandle>,
}

impl SessionStateMachine {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            handle: None,
        }
    }

    fn start(&mut self, address: DeviceAddress) -> SessionResult<(DeviceHandle, Transition)> {
        let to = next_state(self.state, SessionTrigger::Connect)?;
        let handle = DeviceHandle::new(address);
        let transition = Transition {
            from: self.state,
            to,
        };
        self.state = to;
        self.handle = Some(handle);
        Ok((handle, transition))
    }

    /// Apply a trigger on behalf of attempt `id`; stale attempts are refused
    fn advance(&mut self, id: SessionId, trigger: SessionTrigger) -> SessionResult<Transition> {
        if !self.is_current(id) {
            return Err(SessionError::SessionClosed);
        }
        let to = next_state(self.state, trigger)?;
        let transition = Transition {
            from: self.state,
            to,
        };
        self.state = to;
        Ok(transition)
    }

    fn is_current(&self, id: SessionId) -> bool {
        self.handle.is_some_and(|handle| handle.id == id)
    }

    fn device(&self) -> Option<DeviceHandle> {
        match self.state {
            SessionState::Disconnected => None,
            _ => self.handle,
        }
    }
}

#[derive(Debug)]
struct SessionCore {
    machine: SessionStateMachine,
    gate: PasswordGate,
    attributes: BeaconAttributes,
    queue: Option<CommandQueue>,
    shutdown: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
    /// Resolves once the running `connect` stops touching the link
    attempt: Option<oneshot::Receiver<()>>,
}

/// A teardown that has entered Disconnecting and still has to finish
struct Teardown {
    handle: DeviceHandle,
    reason: DisconnectReason,
    worker: Option<JoinHandle<()>>,
    attempt: Option<oneshot::Receiver<()>>,
}

struct Shared<L> {
    link: L,
    settings: SessionSettings,
    codec: AttributeCodec,
    bus: EventBus,
    state_tx: watch::Sender<SessionState>,
    core: RwLock<SessionCore>,
}

impl<L: GattLink> Shared<L> {
    /// Publish the one event a transition produces; called with the core lock held
    fn announce(&self, transition: Transition, handle: &DeviceHandle, reason: Option<DisconnectReason>) {
        self.state_tx.send_replace(transition.to);
        info!(
            from = ?transition.from,
            to = ?transition.to,
            device = %handle.address,
            "Session state changed"
        );

        let event = match transition.to {
            SessionState::Ready => SessionEvent::Connected {
                address: handle.address,
            },
            SessionState::Disconnected => {
                SessionEvent::Disconnected(reason.unwrap_or(DisconnectReason::Requested))
            }
            _ => SessionEvent::StateChanged {
                from: transition.from,
                to: transition.to,
            },
        };
        self.bus.publish(event);
    }

    /// Publish the failure and hand it back to the caller
    fn reject<T>(&self, op: OpKind, error: SessionError) -> SessionResult<T> {
        warn!(?op, %error, "Operation rejected");
        self.bus
            .publish(SessionEvent::operation_failed(op, error.kind()));
        Err(error)
    }

    async fn advance(&self, handle: &DeviceHandle, trigger: SessionTrigger) -> SessionResult<()> {
        let mut core = self.core.write().await;
        let transition = core
            .machine
            .advance(handle.id, trigger)
            .map_err(|_| SessionError::SessionClosed)?;
        self.announce(transition, handle, None);
        Ok(())
    }

    /// Enter Disconnecting and stop accepting work
    ///
    /// Returns `None` if attempt `id` is no longer current or a teardown
    /// is already under way.
    async fn begin_teardown(
        &self,
        id: Option<SessionId>,
        reason: DisconnectReason,
    ) -> Option<Teardown> {
        let mut core = self.core.write().await;
        let handle = core.machine.handle?;
        if id.is_some_and(|id| id != handle.id) {
            return None;
        }
        let transition = core
            .machine
            .advance(handle.id, SessionTrigger::Disconnect)
            .ok()?;
        self.announce(transition, &handle, None);

        core.queue = None;
        if let Some(shutdown) = core.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for write in core.gate.abort() {
            let _ = write.responder.send(Err(SessionError::SessionClosed));
        }

        Some(Teardown {
            handle,
            reason,
            worker: core.worker.take(),
            attempt: core.attempt.take(),
        })
    }

    /// Longest a connection attempt can keep the link busy
    fn attempt_limit(&self) -> Duration {
        let settings = &self.settings;
        settings.connect_timeout + settings.discovery_timeout + settings.operation_timeout
    }

    /// Wait for the radio operation in flight, release the link and reach Disconnected
    async fn finish_teardown(&self, teardown: Teardown) {
        if let Some(attempt) = teardown.attempt {
            if tokio::time::timeout(self.attempt_limit(), attempt).await.is_err() {
                warn!("Connection attempt still running after its time limit");
            }
        }
        if let Some(worker) = teardown.worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Session worker ended abnormally");
            }
        }

        if let Err(e) = self.link.disconnect().await {
            warn!(error = %e, "Link disconnect failed");
        }

        let mut core = self.core.write().await;
        match core
            .machine
            .advance(teardown.handle.id, SessionTrigger::LinkClosed)
        {
            Ok(transition) => self.announce(transition, &teardown.handle, Some(teardown.reason)),
            Err(e) => warn!(error = %e, "Unexpected state at end of teardown"),
        }
        core.gate = PasswordGate::new();
    }

    async fn store_attribute(&self, value: FieldValue) {
        let mut core = self.core.write().await;
        core.attributes.apply(value.clone());
        self.bus.publish(SessionEvent::AttributeAvailable { value });
    }

    /// Settle the password gate once the device answered (or failed to)
    async fn resolve_gate(&self, result: &SessionResult<PasswordOutcome>) {
        let mut core = self.core.write().await;
        match result {
            Ok(PasswordOutcome::Accepted) => {
                let released = core.gate.resolve(PasswordOutcome::Accepted);
                info!(released = released.len(), "Password accepted");
                self.bus.publish(SessionEvent::PasswordAccepted);
                match core.queue.clone() {
                    Some(queue) => released
                        .into_iter()
                        .for_each(|write| queue.enqueue(Command::Write(write))),
                    None => released.into_iter().for_each(|write| {
                        let _ = write.responder.send(Err(SessionError::SessionClosed));
                    }),
                }
            }
            Ok(PasswordOutcome::Rejected) => {
                let discarded = core.gate.resolve(PasswordOutcome::Rejected);
                warn!(discarded = discarded.len(), "Password rejected");
                self.bus.publish(SessionEvent::PasswordRejected);
                for write in discarded {
                    self.bus.publish(SessionEvent::operation_failed(
                        OpKind::Write { field: write.field },
                        SessionError::PasswordRejected.kind(),
                    ));
                    let _ = write.responder.send(Err(SessionError::PasswordRejected));
                }
            }
            // Teardown resets the gate
            Err(SessionError::SessionClosed) => {}
            Err(error) => {
                for write in core.gate.abort() {
                    self.bus.publish(SessionEvent::operation_failed(
                        OpKind::Write { field: write.field },
                        error.kind(),
                    ));
                    let _ = write.responder.send(Err(error.clone()));
                }
            }
        }
    }
}

fn ready_queue(core: &SessionCore) -> SessionResult<CommandQueue> {
    match (core.machine.state, &core.queue) {
        (SessionState::Ready, Some(queue)) => Ok(queue.clone()),
        _ => Err(SessionError::NotReady),
    }
}

fn disconnect_reason(error: &SessionError) -> DisconnectReason {
    match error {
        SessionError::Timeout => DisconnectReason::Timeout,
        SessionError::LinkFailure(e) => DisconnectReason::LinkFailure { code: e.code() },
        _ => DisconnectReason::LinkFailure {
            code: ATT_UNLIKELY_ERROR,
        },
    }
}

fn link_loss<T>(result: &SessionResult<T>) -> Option<DisconnectReason> {
    match result {
        Err(error) if error.is_link_level() => Some(disconnect_reason(error)),
        _ => None,
    }
}

async fn timed<T>(limit: Duration, operation: impl Future<Output = LinkResult<T>>) -> SessionResult<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SessionError::Timeout),
    }
}

enum WorkerExit {
    Shutdown,
    LinkLost(DisconnectReason),
}

/// Drains the command queue, one GATT operation at a time
struct Worker<L> {
    shared: Arc<Shared<L>>,
    id: SessionId,
    receiver: CommandReceiver,
    notifications: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown: watch::Receiver<bool>,
}

impl<L: GattLink> Worker<L> {
    async fn run(mut self) {
        debug!(session = %self.id, "Session worker started");

        let exit = loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break WorkerExit::Shutdown,
                notification = self.notifications.recv() => match notification {
                    Some(raw) => {
                        debug!(payload = %hex::encode(&raw), "Ignoring unsolicited password result");
                        continue;
                    }
                    None => break WorkerExit::LinkLost(DisconnectReason::LinkFailure {
                        code: LinkError::NotConnected.code(),
                    }),
                },
                command = self.receiver.next() => match command {
                    Some(command) => command,
                    None => break WorkerExit::Shutdown,
                },
            };

            if let Some(reason) = self.execute(command).await {
                break WorkerExit::LinkLost(reason);
            }
        };

        let failed = self.receiver.close();
        if failed > 0 {
            debug!(failed, "Failed queued commands on shutdown");
        }

        if let WorkerExit::LinkLost(reason) = exit {
            warn!(session = %self.id, ?reason, "Link lost");
            if let Some(mut teardown) = self.shared.begin_teardown(Some(self.id), reason).await {
                // This task; dropping the handle detaches it
                teardown.worker = None;
                self.shared.finish_teardown(teardown).await;
            }
        }

        debug!(session = %self.id, "Session worker stopped");
    }

    fn closing(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Protected writes only go out while the gate is Accepted
    async fn write_allowed(&self, field: BeaconField) -> bool {
        !self.shared.settings.layout.is_protected(field)
            || self.shared.core.read().await.gate.is_accepted()
    }

    /// Run one command; returns a reason if the link must be torn down
    async fn execute(&mut self, command: Command) -> Option<DisconnectReason> {
        let op = command.op();
        match command {
            Command::Read { field, responder } => {
                let result = self.read(field).await;
                let result = self.settle(op, result);
                if let Ok(value) = &result {
                    self.shared.store_attribute(value.clone()).await;
                }
                let reason = link_loss(&result);
                if let Some(responder) = responder {
                    let _ = responder.send(result);
                }
                reason
            }
            Command::Write(write) => {
                if !self.write_allowed(write.field).await {
                    debug!(field = %write.field, "Password resubmitted since the write was queued");
                    let result = self.settle(op, Err(SessionError::PasswordRequired));
                    let _ = write.responder.send(result);
                    return None;
                }
                let characteristic = self.shared.settings.layout.characteristic(write.field);
                debug!(field = %write.field, payload = %hex::encode(&write.raw), "Writing characteristic");
                let result = timed(
                    self.shared.settings.operation_timeout,
                    self.shared.link.write(characteristic, &write.raw),
                )
                .await;
                let result = self.settle(op, result);
                if result.is_ok() {
                    info!(field = %write.field, value = %write.value, "Field written");
                }
                let reason = link_loss(&result);
                let _ = write.responder.send(result);
                reason
            }
            Command::VerifyPassword { secret, responder } => {
                let result = self.verify(&secret).await;
                let result = self.settle(op, result);
                self.shared.resolve_gate(&result).await;
                let reason = link_loss(&result);
                let _ = responder.send(result);
                reason
            }
        }
    }

    /// Replace the result with `SessionClosed` if a disconnect came in meanwhile
    fn settle<T>(&self, op: OpKind, result: SessionResult<T>) -> SessionResult<T> {
        if self.closing() {
            return Err(SessionError::SessionClosed);
        }
        if let Err(error) = &result {
            warn!(?op, %error, "Operation failed");
            self.shared
                .bus
                .publish(SessionEvent::operation_failed(op, error.kind()));
        }
        result
    }

    async fn read(&self, field: BeaconField) -> SessionResult<FieldValue> {
        let characteristic = self.shared.settings.layout.characteristic(field);
        let raw = timed(
            self.shared.settings.operation_timeout,
            self.shared.link.read(characteristic),
        )
        .await?;
        debug!(%field, payload = %hex::encode(&raw), "Characteristic read");
        Ok(self.shared.codec.decode(field, &raw)?)
    }

    async fn verify(&mut self, secret: &[u8]) -> SessionResult<PasswordOutcome> {
        // Answers to earlier submissions
        while self.notifications.try_recv().is_ok() {}

        let settings = &self.shared.settings;
        debug!("Submitting password");
        timed(
            settings.operation_timeout,
            self.shared.link.write(settings.layout.password, secret),
        )
        .await?;

        match tokio::time::timeout(settings.password_timeout, self.notifications.recv()).await {
            Ok(Some(raw)) => {
                debug!(payload = %hex::encode(&raw), "Password result received");
                Ok(self.shared.codec.decode_password_result(&raw)?)
            }
            Ok(None) => Err(LinkError::NotConnected.into()),
            Err(_) => Err(SessionError::Timeout),
        }
    }
}

/// Handle to one beacon configuration session
///
/// Clones share the same session. All GATT traffic of the session runs
/// through a single worker, so at most one operation is in flight.
pub struct BeaconSession<L: GattLink> {
    shared: Arc<Shared<L>>,
}

impl<L: GattLink> Clone for BeaconSession<L> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<L: GattLink> BeaconSession<L> {
    pub fn new(link: L, settings: SessionSettings) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                link,
                codec: AttributeCodec::new(settings.codec.clone()),
                settings,
                bus: EventBus::new(),
                state_tx,
                core: RwLock::new(SessionCore {
                    machine: SessionStateMachine::new(),
                    gate: PasswordGate::new(),
                    attributes: BeaconAttributes::default(),
                    queue: None,
                    shutdown: None,
                    worker: None,
                    attempt: None,
                }),
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> EventStream {
        self.shared.bus.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.shared.core.read().await.machine.state
    }

    /// Peripheral of the current connection, if any
    pub async fn device(&self) -> Option<DeviceHandle> {
        self.shared.core.read().await.machine.device()
    }

    /// Attributes read during the current connection
    pub async fn attributes(&self) -> BeaconAttributes {
        self.shared.core.read().await.attributes.clone()
    }

    pub async fn gate_state(&self) -> GateState {
        self.shared.core.read().await.gate.state()
    }

    /// Wait until the session reaches `target`
    pub async fn wait_for_state(&self, target: SessionState) {
        let mut state_rx = self.shared.state_tx.subscribe();
        let _ = state_rx.wait_for(|state| *state == target).await;
    }

    /// Connect to a beacon and discover its configuration service
    ///
    /// Resolves once the session is Ready. On failure the session is back
    /// in Disconnected when this returns.
    pub async fn connect(&self, address: DeviceAddress) -> SessionResult<()> {
        let (handle, attempt) = {
            let mut core = self.shared.core.write().await;
            let (handle, transition) = match core.machine.start(address) {
                Ok(started) => started,
                Err(error) => return self.shared.reject(OpKind::Connect, error),
            };
            let (attempt_tx, attempt_rx) = oneshot::channel();
            core.attributes = BeaconAttributes::default();
            core.gate = PasswordGate::new();
            core.attempt = Some(attempt_rx);
            self.shared.announce(transition, &handle, None);
            (handle, attempt_tx)
        };
        info!(device = %address, session = %handle.id, "Connecting to beacon");

        let result = self.establish(handle).await;
        // A teardown waiting on this attempt may now release the link
        drop(attempt);

        match result {
            Ok(()) => {
                info!(device = %address, "Session ready");
                Ok(())
            }
            Err(error) => {
                warn!(device = %address, %error, "Connection attempt failed");
                self.abandon(handle, &error).await;
                Err(error)
            }
        }
    }

    async fn establish(&self, handle: DeviceHandle) -> SessionResult<()> {
        let shared = &self.shared;
        let settings = &shared.settings;

        timed(settings.connect_timeout, shared.link.connect(&handle.address)).await?;
        shared.advance(&handle, SessionTrigger::LinkEstablished).await?;
        shared.advance(&handle, SessionTrigger::DiscoveryStarted).await?;

        timed(settings.discovery_timeout, shared.link.discover(&settings.layout)).await?;
        let notifications = timed(
            settings.operation_timeout,
            shared.link.subscribe(settings.layout.password_result),
        )
        .await?;

        let (queue, receiver) = command_queue();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut core = shared.core.write().await;
        let transition = core
            .machine
            .advance(handle.id, SessionTrigger::DiscoveryComplete)
            .map_err(|_| SessionError::SessionClosed)?;
        core.attempt = None;

        let worker = Worker {
            shared: Arc::clone(shared),
            id: handle.id,
            receiver,
            notifications,
            shutdown: shutdown_rx,
        };
        core.worker = Some(tokio::spawn(worker.run()));
        core.shutdown = Some(shutdown_tx);
        shared.announce(transition, &handle, None);

        if settings.read_on_connect {
            for field in BeaconField::ALL {
                queue.enqueue(Command::Read {
                    field,
                    responder: None,
                });
            }
        }
        core.queue = Some(queue);
        Ok(())
    }

    /// Clean up after a failed connection attempt
    ///
    /// Does nothing if `disconnect` got there first; that teardown releases the link.
    async fn abandon(&self, handle: DeviceHandle, error: &SessionError) {
        if let Some(teardown) = self
            .shared
            .begin_teardown(Some(handle.id), disconnect_reason(error))
            .await
        {
            self.shared.finish_teardown(teardown).await;
        }
    }

    /// Tear the session down; succeeds if already disconnected
    ///
    /// The radio operation in flight, if any, is allowed to finish first
    /// (a pending connect or discovery included); its caller and every queued
    /// or parked operation observe `SessionClosed`.
    pub async fn disconnect(&self) -> SessionResult<()> {
        match self
            .shared
            .begin_teardown(None, DisconnectReason::Requested)
            .await
        {
            Some(teardown) => {
                info!(device = %teardown.handle.address, "Disconnecting");
                self.shared.finish_teardown(teardown).await;
            }
            None => self.wait_for_state(SessionState::Disconnected).await,
        }
        Ok(())
    }

    /// Read one field from the device
    pub async fn read_field(&self, field: BeaconField) -> SessionResult<FieldValue> {
        let reply = {
            let core = self.shared.core.read().await;
            let queue = match ready_queue(&core) {
                Ok(queue) => queue,
                Err(error) => return self.shared.reject(OpKind::Read { field }, error),
            };
            let (tx, rx) = oneshot::channel();
            queue.enqueue(Command::Read {
                field,
                responder: Some(tx),
            });
            rx
        };
        reply.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    /// Validate, encode and write one field
    pub async fn write_field(&self, field: BeaconField, text: &str) -> SessionResult<()> {
        let reply = self.start_write(field, text).await?;
        reply.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    async fn start_write(
        &self,
        field: BeaconField,
        text: &str,
    ) -> SessionResult<oneshot::Receiver<SessionResult<()>>> {
        let op = OpKind::Write { field };
        let mut core = self.shared.core.write().await;
        let queue = match ready_queue(&core) {
            Ok(queue) => queue,
            Err(error) => return self.shared.reject(op, error),
        };
        let (value, raw) = match self.shared.codec.encode_text(field, text) {
            Ok(encoded) => encoded,
            Err(error) => return self.shared.reject(op, error.into()),
        };
        self.admit_write(&mut core, &queue, value, raw)
    }

    /// Hand an encoded write to the gate; called with the core lock held
    fn admit_write(
        &self,
        core: &mut SessionCore,
        queue: &CommandQueue,
        value: FieldValue,
        raw: Vec<u8>,
    ) -> SessionResult<oneshot::Receiver<SessionResult<()>>> {
        let field = value.field();
        let (tx, rx) = oneshot::channel();
        let protected = self.shared.settings.layout.is_protected(field);
        match core.gate.admit(PendingWrite::new(value, raw, tx), protected) {
            Admission::Proceed(write) => queue.enqueue(Command::Write(write)),
            Admission::Parked => debug!(%field, "Write parked until the password is verified"),
            Admission::Refused(_) => {
                return self
                    .shared
                    .reject(OpKind::Write { field }, SessionError::PasswordRequired);
            }
        }
        Ok(rx)
    }

    /// Submit the device password and wait for its verdict
    pub async fn submit_password(&self, secret: &str) -> SessionResult<PasswordOutcome> {
        let op = OpKind::SubmitPassword;
        let reply = {
            let mut core = self.shared.core.write().await;
            let queue = match ready_queue(&core) {
                Ok(queue) => queue,
                Err(error) => return self.shared.reject(op, error),
            };
            let secret = match self.shared.codec.encode_password(secret) {
                Ok(secret) => secret,
                Err(error) => return self.shared.reject(op, error.into()),
            };
            if let Err(error) = core.gate.begin_verification() {
                return self.shared.reject(op, error);
            }

            let (tx, rx) = oneshot::channel();
            queue.enqueue(Command::VerifyPassword {
                secret,
                responder: tx,
            });
            rx
        };
        reply.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    /// Write a batch of edits in field order
    ///
    /// Every edit is validated, and checked against the session state and
    /// the password gate, before anything is enqueued. Fields whose value
    /// already matches the device are skipped. Returns the fields written.
    pub async fn apply(&self, changes: &BeaconChanges) -> SessionResult<Vec<BeaconField>> {
        let shared = &self.shared;
        let pending = {
            let mut core = shared.core.write().await;

            let mut planned = Vec::new();
            for (field, text) in changes.entries() {
                let (value, raw) = match shared.codec.encode_text(field, text) {
                    Ok(encoded) => encoded,
                    Err(error) => return shared.reject(OpKind::Write { field }, error.into()),
                };
                if core.attributes.get(field).as_ref() == Some(&value) {
                    debug!(%field, %value, "Value unchanged, skipping");
                    continue;
                }
                planned.push((value, raw));
            }
            let Some((first, _)) = planned.first() else {
                return Ok(vec![]);
            };

            let queue = match ready_queue(&core) {
                Ok(queue) => queue,
                Err(error) => return shared.reject(OpKind::Write { field: first.field() }, error),
            };
            if let Some((value, _)) = planned.iter().find(|(value, _)| {
                !core
                    .gate
                    .admits(shared.settings.layout.is_protected(value.field()))
            }) {
                let op = OpKind::Write {
                    field: value.field(),
                };
                return shared.reject(op, SessionError::PasswordRequired);
            }

            let mut pending = Vec::with_capacity(planned.len());
            for (value, raw) in planned {
                let field = value.field();
                pending.push((field, self.admit_write(&mut core, &queue, value, raw)?));
            }
            pending
        };

        let mut written = Vec::with_capacity(pending.len());
        for (field, reply) in pending {
            reply.await.unwrap_or(Err(SessionError::SessionClosed))?;
            written.push(field);
        }
        info!(?written, "Changes applied");
        Ok(written)
    }
}
