use crate::capability::{CredentialHook, Filesystem, RepositoryClient};
use crate::config::SyncConfig;
use crate::document::Document;
use crate::operations::{failed_outcome, OperationRunner};
use crate::state::{Operation, Outcome, Rejected, SyncContext, SyncEvent, SyncState, Transitions};
use crate::view::DocumentView;
use crate::{Result, SyncError};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Answer to [`SyncMachine::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Accepted,
    Rejected(Rejected),
}

impl Dispatch {
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncHealth {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub operations_started: u64,
    pub stale_completions_discarded: u64,
}

/// One published state-machine snapshot. Readers never see anything in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSnapshot {
    pub revision: u64,
    pub state: SyncState,
    pub context: SyncContext,
    pub health: SyncHealth,
}

#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub revision: u64,
    pub from: SyncState,
    pub to: SyncState,
    pub at: SystemTime,
}

/// Handle to a running sync state machine.
///
/// All transitions happen on one spawned task; handles only send events and
/// read published snapshots. Dropping the last handle cancels any in-flight
/// operation and its result is discarded.
#[derive(Clone)]
pub struct SyncMachine {
    inner: Arc<SyncMachineInner>,
}

struct SyncMachineInner {
    command_tx: mpsc::Sender<MachineCommand>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    update_tx: broadcast::Sender<SyncUpdate>,
    view: Mutex<DocumentView>,
    shutdown: CancellationToken,
}

enum MachineCommand {
    Dispatch {
        event: SyncEvent,
        reply: oneshot::Sender<Dispatch>,
    },
}

pub struct SyncMachineBuilder {
    fs: Arc<dyn Filesystem>,
    client: Arc<dyn RepositoryClient>,
    config: SyncConfig,
    credentials: Option<Arc<dyn CredentialHook>>,
}

impl SyncMachineBuilder {
    #[must_use]
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn credentials(mut self, hook: Arc<dyn CredentialHook>) -> Self {
        self.credentials = Some(hook);
        self
    }

    /// Spawn the machine onto the current Tokio runtime. Detection starts immediately.
    pub fn start(self) -> SyncMachine {
        let runner = OperationRunner::new(
            self.fs,
            self.client,
            self.credentials,
            Arc::new(self.config),
        );
        let (transitions, first) = Transitions::new();
        let initial = SyncSnapshot {
            revision: 0,
            state: transitions.state(),
            context: transitions.context().clone(),
            health: SyncHealth::default(),
        };

        let (command_tx, command_rx) = mpsc::channel(16);
        let (snapshot_tx, _) = watch::channel(initial);
        let (update_tx, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        let driver = Driver {
            runner,
            transitions,
            snapshot_tx: snapshot_tx.clone(),
            update_tx: update_tx.clone(),
            shutdown: shutdown.clone(),
            health: SyncHealth::default(),
            revision: 0,
            ticket: 0,
            in_flight: None,
        };
        spawn_sync_loop(driver, first, command_rx);

        SyncMachine {
            inner: Arc::new(SyncMachineInner {
                command_tx,
                snapshot_tx,
                update_tx,
                view: Mutex::new(DocumentView::new()),
                shutdown,
            }),
        }
    }
}

impl SyncMachine {
    pub fn builder(
        fs: Arc<dyn Filesystem>,
        client: Arc<dyn RepositoryClient>,
    ) -> SyncMachineBuilder {
        SyncMachineBuilder {
            fs,
            client,
            config: SyncConfig::default(),
            credentials: None,
        }
    }

    pub fn start(
        fs: Arc<dyn Filesystem>,
        client: Arc<dyn RepositoryClient>,
        config: SyncConfig,
    ) -> Self {
        Self::builder(fs, client).config(config).start()
    }

    /// Submit an event. Events invalid for the current state are rejected
    /// without touching the context.
    pub async fn dispatch(&self, event: SyncEvent) -> Result<Dispatch> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(MachineCommand::Dispatch { event, reply })
            .await
            .map_err(|_| SyncError::Other("sync machine has stopped".to_string()))?;
        rx.await
            .map_err(|_| SyncError::Other("sync machine dropped the event".to_string()))
    }

    #[must_use]
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn current_state(&self) -> SyncState {
        self.inner.snapshot_tx.borrow().state
    }

    #[must_use]
    pub fn current_context(&self) -> SyncContext {
        self.inner.snapshot_tx.borrow().context.clone()
    }

    /// Derived view over the current documents; stable across unchanged snapshots.
    #[must_use]
    pub fn documents(&self) -> Arc<[Document]> {
        let context = self.current_context();
        let mut view = self
            .inner
            .view
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        view.documents(&context)
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<SyncUpdate> {
        self.inner.update_tx.subscribe()
    }

    /// Wait until no operation is in flight (`empty`, `idle`, or `error`).
    pub async fn wait_until_settled(&self) -> Result<SyncSnapshot> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|snapshot| snapshot.state.is_settled())
            .await
            .map_err(|_| SyncError::Other("sync machine has stopped".to_string()))?;
        Ok(snapshot.clone())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.inner.shutdown.is_cancelled()
    }

    /// Stop the machine. Any in-flight operation is cancelled and its result discarded.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for SyncMachine {
    fn drop(&mut self) {
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.shutdown.cancel();
        }
    }
}

struct Completion {
    ticket: u64,
    outcome: Outcome,
}

struct InFlight {
    ticket: u64,
    name: &'static str,
    started: Instant,
    cancel: CancellationToken,
}

struct Driver {
    runner: OperationRunner,
    transitions: Transitions,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    update_tx: broadcast::Sender<SyncUpdate>,
    shutdown: CancellationToken,
    health: SyncHealth,
    revision: u64,
    ticket: u64,
    in_flight: Option<InFlight>,
}

fn spawn_sync_loop(
    mut driver: Driver,
    first: Operation,
    mut command_rx: mpsc::Receiver<MachineCommand>,
) {
    tokio::spawn(async move {
        let (done_tx, mut done_rx) = mpsc::channel::<Completion>(4);
        driver.begin(first, &done_tx);
        driver.publish(SyncState::Initializing);

        loop {
            tokio::select! {
                biased;

                () = driver.shutdown.cancelled() => break,
                Some(done) = done_rx.recv() => driver.finish(done, &done_tx),
                cmd = command_rx.recv() => match cmd {
                    Some(MachineCommand::Dispatch { event, reply }) => {
                        let answer = driver.dispatch(event, &done_tx);
                        let _ = reply.send(answer);
                    }
                    None => break,
                },
            }
        }

        drop(command_rx);
        driver.shutdown.cancel();
        if let Some(op) = &driver.in_flight {
            info!("Shutting down; abandoning in-flight {}", op.name);
            // A cancelled operation still reports back; record it as discarded.
            if let Some(done) = done_rx.recv().await {
                driver.finish(done, &done_tx);
            }
        }
    });
}

impl Driver {
    fn dispatch(&mut self, event: SyncEvent, done_tx: &mpsc::Sender<Completion>) -> Dispatch {
        let from = self.transitions.state();
        match self.transitions.dispatch(event) {
            Ok(op) => {
                self.begin(op, done_tx);
                self.publish(from);
                Dispatch::Accepted
            }
            Err(rejected) => {
                warn!("Rejected event: {rejected}");
                Dispatch::Rejected(rejected)
            }
        }
    }

    fn begin(&mut self, op: Operation, done_tx: &mpsc::Sender<Completion>) {
        self.ticket += 1;
        let ticket = self.ticket;
        let name = op.name();
        let cancel = self.shutdown.child_token();

        self.health.operations_started += 1;
        self.health.in_flight = Some(name.to_string());
        self.in_flight = Some(InFlight {
            ticket,
            name,
            started: Instant::now(),
            cancel: cancel.clone(),
        });

        let runner = self.runner.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            let task_op = op.clone();
            let task_cancel = cancel.clone();
            let handle =
                tokio::spawn(async move { runner.run(task_op, &task_cancel).await });
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => failed_outcome(
                    &op,
                    SyncError::Other(format!("{} task failed: {err}", op.name())),
                ),
            };
            let _ = done_tx.send(Completion { ticket, outcome }).await;
        });
    }

    fn finish(&mut self, done: Completion, done_tx: &mpsc::Sender<Completion>) {
        let current = self
            .in_flight
            .as_ref()
            .is_some_and(|op| op.ticket == done.ticket && !op.cancel.is_cancelled());
        if !current {
            log::debug!("Discarding stale completion #{}", done.ticket);
            if self.in_flight.as_ref().is_some_and(|op| op.ticket == done.ticket) {
                self.in_flight = None;
                self.health.in_flight = None;
            }
            self.health.stale_completions_discarded += 1;
            let state = self.transitions.state();
            self.publish(state);
            return;
        }
        let Some(InFlight { name, started, .. }) = self.in_flight.take() else {
            return;
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.health.in_flight = None;
        self.health.last_duration_ms = Some(duration_ms);

        match (&done.outcome, outcome_error(&done.outcome)) {
            (_, Some(err)) => {
                error!("Sync {name} failed after {duration_ms}ms: {err}");
                self.health.consecutive_failures += 1;
            }
            (Outcome::Detected(Err(_)), None) => {}
            (_, None) => {
                self.health.last_success_unix_ms = Some(unix_now_ms());
                self.health.consecutive_failures = 0;
            }
        }

        let from = self.transitions.state();
        if let Some(op) = self.transitions.complete(done.outcome) {
            self.begin(op, done_tx);
        }
        self.publish(from);
    }

    fn publish(&mut self, from: SyncState) {
        self.revision += 1;
        let to = self.transitions.state();
        if from != to {
            info!("Sync state {from} -> {to}");
        }
        let snapshot = SyncSnapshot {
            revision: self.revision,
            state: to,
            context: self.transitions.context().clone(),
            health: self.health.clone(),
        };
        self.snapshot_tx.send_replace(snapshot);
        let _ = self.update_tx.send(SyncUpdate {
            revision: self.revision,
            from,
            to,
            at: SystemTime::now(),
        });
    }
}

/// Failures that count against health. A failed detection only means there is
/// nothing cloned yet.
fn outcome_error(outcome: &Outcome) -> Option<&SyncError> {
    match outcome {
        Outcome::Detected(_) => None,
        Outcome::Cloned(result) | Outcome::Pulled(result) => result.as_ref().err(),
        Outcome::Listed(result) => result.as_ref().err(),
    }
}

fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
