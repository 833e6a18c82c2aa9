use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::stream::StreamExt;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SignalStream;
use tokio_stream::StreamMap;
use trellis_core::models::{ClusterConfig, StateModelDefinition};
use trellis_core::{ClusterAccessor, LifecycleState, ParticipantConnection, ParticipantManager, ParticipantManagerConfig, SledStore, StoreHandle};

use crate::config::Config;
use crate::handlers::LoggingStateModelFactory;

/// The application object of a participant process.
pub struct App {
    /// The application's runtime config.
    config: Arc<Config>,
    /// The application's store.
    db: Arc<SledStore>,
    /// The participant's lifecycle manager.
    pub(crate) manager: ParticipantManager,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>) -> Result<Self> {
        // Initialize this node's storage.
        let path = config.storage_data_path.clone();
        let db = tokio::task::spawn_blocking(move || SledStore::open(path))
            .await
            .context("error joining store open task")?
            .context("error opening store")?;
        let db = Arc::new(db);
        let store: StoreHandle = db.clone();

        if config.bootstrap_cluster {
            let (store, config) = (store.clone(), config.clone());
            tokio::task::spawn_blocking(move || bootstrap_cluster(&config, store))
                .await
                .context("error joining cluster bootstrap task")??;
        }

        let conn = ParticipantConnection::new(config.cluster_id(), config.participant_id(), store, config.host.as_str(), config.port)
            .auto_join(config.auto_join);
        let mut manager = ParticipantManager::new(conn, ParticipantManagerConfig { poll_interval: config.poll_interval() });
        for def in builtin_state_models() {
            manager
                .register_state_model_factory(def.id.clone(), Arc::new(LoggingStateModelFactory::new(def.id)))
                .context("error registering state model factory")?;
        }

        Ok(Self { config, db, manager })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        let state = self.manager.sync_start().await;
        if state != LifecycleState::Connected {
            self.manager.sync_stop().await;
            bail!("participant {} failed to connect to cluster {}", self.config.participant_id(), self.config.cluster_id);
        }
        tracing::info!(participant = %self.config.participant_id(), cluster = %self.config.cluster_id, "participant connected");

        let mut lifecycle = self.manager.watch_state();
        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    break;
                }
                res = lifecycle.changed() => {
                    if res.is_err() || *lifecycle.borrow() == LifecycleState::Disconnected {
                        tracing::error!("participant lifecycle ended unexpectedly");
                        break;
                    }
                }
            }
        }

        // Begin shutdown routine.
        tracing::debug!("participant is shutting down");
        let state = self.manager.sync_stop().await;
        tracing::debug!(?state, "participant lifecycle stopped");
        let db = self.db.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || db.flush()).await.context("error joining store flush task").and_then(|res| res.context("error flushing store")) {
            tracing::error!(error = ?err, "error flushing store during shutdown");
        }

        tracing::debug!("participant shutdown complete");
        Ok(())
    }
}

/// The state models this participant can host.
fn builtin_state_models() -> Vec<StateModelDefinition> {
    vec![StateModelDefinition::master_slave(), StateModelDefinition::leader_standby(), StateModelDefinition::online_offline()]
}

/// Create the configured cluster with the builtin state models, if it is not yet set up.
pub(crate) fn bootstrap_cluster(config: &Config, store: StoreHandle) -> Result<()> {
    let accessor = ClusterAccessor::new(config.cluster_id(), store);
    if accessor.is_cluster_structure_valid() {
        tracing::debug!(cluster = %config.cluster_id, "cluster already set up, skipping bootstrap");
        return Ok(());
    }
    let cluster = builtin_state_models()
        .into_iter()
        .fold(ClusterConfig::new(config.cluster_id()), |cluster, def| cluster.with_state_model(def))
        .auto_join_allowed(config.auto_join);
    accessor.create_cluster(&cluster).context("error bootstrapping cluster")?;
    tracing::info!(cluster = %config.cluster_id, "cluster bootstrapped");
    Ok(())
}
