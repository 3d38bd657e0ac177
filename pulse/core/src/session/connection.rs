//! Connection Session Actor
//!
//! Owns a [`SessionMachine`] and serializes everything that can change it:
//! caller commands, open results, link events and timers all arrive in one
//! `select!` loop, so a close racing a reconnect timer is simply two
//! ordered inputs.
//!
//! Opens run in a spawned task tagged with an attempt number; a result for
//! an attempt the machine no longer waits for is discarded, and
//! `disconnect()` aborts the task outright.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::classify::ClassifiedError;
use crate::recovery::{RecoveryManager, RecoveryResult};
use crate::sample::Sample;
use crate::streaming::StreamBuffer;
use crate::transport::{
    Connector, TransportError, TransportEvent, TransportLink, ABNORMAL_CLOSE, NORMAL_CLOSE,
};

use super::config::SessionConfig;
use super::machine::{
    Action, ConnectionStatus, SessionDiagnostics, SessionMachine, SessionSnapshot,
};

/// Commands queued ahead of the actor
const COMMAND_CAPACITY: usize = 32;

/// Something consumers of a session care about
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Status changed
    Status(ConnectionStatus),
    /// Valid samples, already in the buffer
    Data(Vec<Sample>),
    /// A classified failure and what recovery made of it
    Failure {
        /// The failure
        error: ClassifiedError,
        /// Outcome of the recovery attempt
        recovery: RecoveryResult,
    },
}

enum Command {
    Connect(oneshot::Sender<()>),
    Disconnect(oneshot::Sender<()>),
    Network(bool, oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

struct OpenOutcome {
    attempt: u64,
    result: Result<TransportLink, TransportError>,
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

/// Handle to a running connection session
///
/// Cheap to share behind an `Arc`. Dropping the last handle stops the
/// actor after a final disconnect.
pub struct ConnectionSession {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSession {
    /// Start a session actor
    ///
    /// Valid samples go straight into `buffer`; every failure is run
    /// through `recovery`. Both are also reported on the returned event
    /// channel.
    pub fn spawn(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        buffer: Arc<StreamBuffer>,
        recovery: Arc<RecoveryManager>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let machine = SessionMachine::new(config, now());
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = mpsc::channel(4);

        tracing::debug!(connector = connector.name(), "Starting session");
        let actor = SessionActor {
            machine,
            connector,
            buffer,
            recovery,
            commands: command_rx,
            open_tx,
            open_rx,
            pending_open: None,
            link: None,
            events: event_tx,
            snapshot: snapshot_tx,
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                commands: command_tx,
                snapshot: snapshot_rx,
                task: Mutex::new(Some(task)),
            },
            event_rx,
        )
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(command(tx)).await.is_err() {
            tracing::debug!("Session actor has stopped");
            return;
        }
        let _ = rx.await;
    }

    /// Start connecting; no-op while connecting or connected
    ///
    /// Returns once the command has been applied, not once the link is up.
    pub async fn connect(&self) {
        self.request(Command::Connect).await;
    }

    /// Cancel every timer and pending open, close the link
    pub async fn disconnect(&self) {
        self.request(Command::Disconnect).await;
    }

    /// Signal host network availability
    pub async fn set_network_online(&self, online: bool) {
        self.request(|tx| Command::Network(online, tx)).await;
    }

    /// Latest state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.snapshot.borrow().status
    }

    /// Armed session timers
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.snapshot.borrow().pending_timers
    }

    /// Diagnostics as of now
    #[must_use]
    pub fn diagnostics(&self) -> SessionDiagnostics {
        self.snapshot.borrow().diagnostics(now())
    }

    /// Receiver that observes every published snapshot
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Disconnect and stop the actor
    pub async fn shutdown(&self) {
        self.request(Command::Shutdown).await;
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

struct SessionActor {
    machine: SessionMachine,
    connector: Arc<dyn Connector>,
    buffer: Arc<StreamBuffer>,
    recovery: Arc<RecoveryManager>,
    commands: mpsc::Receiver<Command>,
    open_tx: mpsc::Sender<OpenOutcome>,
    open_rx: mpsc::Receiver<OpenOutcome>,
    pending_open: Option<JoinHandle<()>>,
    link: Option<TransportLink>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn next_link_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            code: ABNORMAL_CLOSE,
            reason: "transport dropped".to_string(),
        }),
        None => std::future::pending().await,
    }
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let deadline = self.machine.next_deadline();
            let mut ack = None;
            let mut stop = false;

            tokio::select! {
                command = self.commands.recv() => {
                    let now = now();
                    let actions = match command {
                        Some(Command::Connect(tx)) => {
                            ack = Some(tx);
                            self.machine.connect(now)
                        }
                        Some(Command::Disconnect(tx)) => {
                            ack = Some(tx);
                            self.machine.disconnect(now)
                        }
                        Some(Command::Network(online, tx)) => {
                            ack = Some(tx);
                            self.machine.set_network_online(online, now)
                        }
                        Some(Command::Shutdown(tx)) => {
                            ack = Some(tx);
                            stop = true;
                            self.machine.disconnect(now)
                        }
                        None => {
                            stop = true;
                            self.machine.disconnect(now)
                        }
                    };
                    self.apply(actions);
                }
                Some(outcome) = self.open_rx.recv() => self.on_open_outcome(outcome),
                event = next_link_event(&mut self.link) => self.on_link_event(event),
                () = sleep_until(deadline) => {
                    let actions = self.machine.poll_timers(now());
                    self.apply(actions);
                }
            }

            self.snapshot.send_replace(self.machine.snapshot());
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
            if stop {
                break;
            }
        }
        self.abort_open();
        tracing::debug!(status = %self.machine.status(), "Session actor stopped");
    }

    fn on_open_outcome(&mut self, outcome: OpenOutcome) {
        if !self.machine.is_pending_attempt(outcome.attempt) {
            tracing::debug!(attempt = outcome.attempt, "Discarding stale open result");
            if let Ok(link) = outcome.result {
                link.close(NORMAL_CLOSE, "stale connection attempt");
            }
            return;
        }
        self.pending_open = None;

        let now = now();
        let actions = match outcome.result {
            Ok(link) => {
                self.link = Some(link);
                self.machine.open_succeeded(now)
            }
            Err(e) => self.machine.open_failed(&e, now),
        };
        self.apply(actions);
    }

    fn on_link_event(&mut self, event: TransportEvent) {
        let now = now();
        let actions = match event {
            TransportEvent::Message(text) => self.machine.link_message(&text, now),
            TransportEvent::Error(reason) => self.machine.link_error(&reason, now),
            TransportEvent::Closed { code, reason } => {
                let actions = self.machine.link_closed(code, &reason, now);
                // A closed link yields nothing further
                self.link = None;
                actions
            }
        };
        self.apply(actions);
    }

    fn abort_open(&mut self) {
        if let Some(task) = self.pending_open.take() {
            task.abort();
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receiver just means nobody is listening
        let _ = self.events.send(event);
    }

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Open { attempt, url } => {
                    self.abort_open();
                    let connector = Arc::clone(&self.connector);
                    let results = self.open_tx.clone();
                    self.pending_open = Some(tokio::spawn(async move {
                        let result = connector.open(&url).await;
                        let _ = results.send(OpenOutcome { attempt, result }).await;
                    }));
                }
                Action::AbortOpen => self.abort_open(),
                Action::Close { code, reason } => {
                    if let Some(link) = self.link.take() {
                        link.close(code, &reason);
                    }
                }
                Action::Send(text) => {
                    if let Some(link) = &self.link {
                        if let Err(e) = link.send(text) {
                            tracing::warn!(error = %e, "Failed to write to link");
                        }
                    }
                }
                Action::Status(status) => self.emit(SessionEvent::Status(status)),
                Action::Deliver(samples) => {
                    self.buffer.add_batch(&samples);
                    self.emit(SessionEvent::Data(samples));
                }
                Action::Rejected(count) => self.buffer.record_rejected(count),
                Action::Failure(error) => {
                    let recovery = self.recovery.attempt_recovery(&error, None);
                    self.emit(SessionEvent::Failure { error, recovery });
                }
            }
        }
    }
}
