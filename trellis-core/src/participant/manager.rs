//! Participant lifecycle management.
//!
//! The lifecycle of a participant runs on its own task, which registers the participant's state
//! model factories, connects, then processes messages until it is asked to stop. The owner of
//! the task interacts with it only through `sync_start` and `sync_stop`, each of which waits on
//! a one-shot gate fired by the task.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::prelude::*;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::{LifecycleError, LifecycleResult};
use crate::models::StateModelDefId;
use crate::participant::connection::ParticipantConnection;
use crate::participant::engine::StateModelFactory;

const METRIC_LIFECYCLE_STARTS: &str = "trellis_participant_lifecycle_starts";
const METRIC_LIFECYCLE_STOPS: &str = "trellis_participant_lifecycle_stops";
const METRIC_LIFECYCLE_FAULTS: &str = "trellis_participant_lifecycle_faults";

/// The default interval at which pending messages are processed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Different states which a participant lifecycle may be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// The lifecycle task has not been started.
    Idle,
    /// The lifecycle task is registering its factories and connecting.
    Starting,
    /// The participant holds a live session and is processing messages.
    Connected,
    /// A stop has been requested and the task is shutting down.
    StopRequested,
    /// The participant has disconnected. This state is terminal.
    Disconnected,
}

/// Configuration of a participant lifecycle.
#[derive(Clone, Debug)]
pub struct ParticipantManagerConfig {
    /// The interval at which pending messages are processed while connected.
    pub poll_interval: Duration,
}

impl Default for ParticipantManagerConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL }
    }
}

/// The owner's handle to a participant lifecycle task.
///
/// A manager runs at most one lifecycle. Once stopped, a new manager must be created to
/// connect again.
pub struct ParticipantManager {
    config: ParticipantManagerConfig,
    /// The connection, until it is handed to the lifecycle task.
    connection: Option<ParticipantConnection>,
    /// Factories to register on the lifecycle task before connecting.
    factories: Vec<(StateModelDefId, Arc<dyn StateModelFactory>)>,

    state_tx: Option<watch::Sender<LifecycleState>>,
    state_rx: watch::Receiver<LifecycleState>,
    /// Gate used to request the lifecycle task to stop.
    stop_tx: Option<oneshot::Sender<()>>,
    /// Gate fired by the lifecycle task once it has disconnected.
    stopped_rx: Option<oneshot::Receiver<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ParticipantManager {
    /// Create a new manager for the given connection.
    pub fn new(connection: ParticipantConnection, config: ParticipantManagerConfig) -> Self {
        metrics::register_counter!(METRIC_LIFECYCLE_STARTS, metrics::Unit::Count, "participant lifecycles started");
        metrics::register_counter!(METRIC_LIFECYCLE_STOPS, metrics::Unit::Count, "participant lifecycles which reached the disconnected state");
        metrics::register_counter!(METRIC_LIFECYCLE_FAULTS, metrics::Unit::Count, "participant lifecycles which terminated due to a fault");
        let (state_tx, state_rx) = watch::channel(LifecycleState::Idle);
        Self {
            config,
            connection: Some(connection),
            factories: Vec::new(),
            state_tx: Some(state_tx),
            state_rx,
            stop_tx: None,
            stopped_rx: None,
            handle: None,
        }
    }

    /// Add a state model factory to be registered by the lifecycle task before it connects.
    ///
    /// Duplicate names are rejected by the engine during startup, which then fails.
    pub fn register_state_model_factory(&mut self, name: StateModelDefId, factory: Arc<dyn StateModelFactory>) -> LifecycleResult<()> {
        if self.connection.is_none() {
            return Err(LifecycleError::RegistrationAfterConnect(name.to_string()));
        }
        self.factories.push((name, factory));
        Ok(())
    }

    /// The current state of the lifecycle.
    pub fn state(&self) -> LifecycleState {
        *self.state_rx.borrow()
    }

    /// A receiver of the lifecycle's state changes.
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.state_rx.clone()
    }

    /// Start the lifecycle task, waiting until it has either connected or failed.
    ///
    /// Calling this more than once has no effect beyond returning the current state.
    pub async fn sync_start(&mut self) -> LifecycleState {
        let (connection, state_tx) = match (self.connection.take(), self.state_tx.take()) {
            (Some(connection), Some(state_tx)) => (connection, state_tx),
            _ => return self.state(),
        };
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let (stopped_tx, stopped_rx) = oneshot::channel();
        self.stop_tx = Some(stop_tx);
        self.stopped_rx = Some(stopped_rx);

        metrics::increment_counter!(METRIC_LIFECYCLE_STARTS);
        let task = LifecycleTask {
            connection: Arc::new(Mutex::new(connection)),
            factories: std::mem::take(&mut self.factories),
            poll_interval: self.config.poll_interval,
            state_tx,
            ready: Some(ready_tx),
            stop: stop_rx,
            stopped: Some(stopped_tx),
        };
        self.handle = Some(task.spawn());

        if ready_rx.await.is_err() {
            tracing::warn!("participant lifecycle task dropped its ready gate without firing it");
        }
        self.state()
    }

    /// Stop the lifecycle task, waiting until it has disconnected.
    ///
    /// Returns immediately if the lifecycle was never started or has already been stopped.
    pub async fn sync_stop(&mut self) -> LifecycleState {
        let stopped_rx = match self.stopped_rx.take() {
            Some(stopped_rx) => stopped_rx,
            None => return self.state(),
        };
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have exited on its own.
            let _ = stop_tx.send(());
        }
        if stopped_rx.await.is_err() {
            tracing::warn!("participant lifecycle task dropped its stopped gate without firing it");
        }
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                tracing::error!(error = ?err, "error joining participant lifecycle task");
            }
        }
        self.state()
    }
}

/// The task running a participant lifecycle.
struct LifecycleTask {
    /// The connection, shared with the blocking tasks which perform its store operations.
    connection: Arc<Mutex<ParticipantConnection>>,
    factories: Vec<(StateModelDefId, Arc<dyn StateModelFactory>)>,
    poll_interval: Duration,
    state_tx: watch::Sender<LifecycleState>,
    ready: Option<oneshot::Sender<()>>,
    stop: oneshot::Receiver<()>,
    stopped: Option<oneshot::Sender<()>>,
}

impl LifecycleTask {
    fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!("participant lifecycle task started");
        let res = AssertUnwindSafe(self.run_connected()).catch_unwind().await;
        match res {
            Ok(Ok(())) => (),
            Ok(Err(err)) => {
                metrics::increment_counter!(METRIC_LIFECYCLE_FAULTS);
                tracing::error!(error = ?err, "participant lifecycle terminated with error");
            }
            Err(_) => {
                metrics::increment_counter!(METRIC_LIFECYCLE_FAULTS);
                tracing::error!("participant lifecycle panicked");
            }
        }
        self.finish().await;
        tracing::debug!("participant lifecycle task stopped");
    }

    /// Register, connect, then process messages until a stop is requested.
    async fn run_connected(&mut self) -> LifecycleResult<()> {
        self.set_state(LifecycleState::Starting);
        let factories = std::mem::take(&mut self.factories);
        self.with_connection(move |conn| {
            for (name, factory) in factories {
                conn.register_state_model_factory(name, factory)?;
            }
            conn.connect().map(|_| ())
        })
        .await?;
        self.set_state(LifecycleState::Connected);
        self.fire_ready();

        let mut poll = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                res = &mut self.stop => {
                    match res {
                        Ok(()) => tracing::debug!("stop requested"),
                        Err(_) => tracing::info!("participant manager dropped, treating as stop request"),
                    }
                    self.set_state(LifecycleState::StopRequested);
                    return Ok(());
                }
                _ = poll.tick() => {
                    let processed = self.with_connection(|conn| conn.process_messages()).await?;
                    if processed > 0 {
                        tracing::debug!(processed, "processed participant messages");
                    }
                }
            }
        }
    }

    /// Release all gates and disconnect. Runs exactly once, whatever ended the lifecycle.
    async fn finish(&mut self) {
        if let Err(err) = self.with_connection(|conn| conn.disconnect()).await {
            tracing::error!(error = ?err, "error disconnecting participant");
        }
        self.set_state(LifecycleState::Disconnected);
        metrics::increment_counter!(METRIC_LIFECYCLE_STOPS);
        self.fire_ready();
        if let Some(stopped) = self.stopped.take() {
            let _ = stopped.send(());
        }
    }

    /// Run the given closure against the connection on the blocking pool.
    async fn with_connection<F, T>(&self, f: F) -> LifecycleResult<T>
    where
        F: FnOnce(&mut ParticipantConnection) -> LifecycleResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = self.connection.clone();
        let res = tokio::task::spawn_blocking(move || {
            let mut conn = lock(&connection);
            f(&mut *conn)
        })
        .await;
        match res {
            Ok(res) => res,
            Err(err) => Err(LifecycleError::Task(err.to_string())),
        }
    }

    fn fire_ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }
    }

    fn set_state(&self, state: LifecycleState) {
        tracing::debug!(?state, "participant lifecycle state changed");
        let _ = self.state_tx.send(state);
    }
}

/// Lock the connection, recovering it from a handler which panicked while holding the lock.
fn lock(connection: &Mutex<ParticipantConnection>) -> MutexGuard<'_, ParticipantConnection> {
    connection.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
