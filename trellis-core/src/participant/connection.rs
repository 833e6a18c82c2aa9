//! The coordination client of a single participant.

use std::sync::Arc;

use crate::accessor::{ClusterScope, ParticipantAccessor};
use crate::error::{LifecycleError, LifecycleResult};
use crate::models::participant::MSG_TYPE_STATE_TRANSITION;
use crate::models::state_model::STATE_ERROR;
use crate::models::{
    ClusterConfiguration, ClusterId, CurrentState, LiveInstance, Message, MessageId, ParticipantConfig, ParticipantId, SessionId, StateModelDefId, StoreModel,
};
use crate::participant::engine::{StateMachineEngine, StateModelFactory};
use crate::source::{read_model, DataSource};
use crate::store::{Durability, StoreHandle};

/// A participant's session with its cluster.
///
/// A connection owns the participant's state machine engine. Connecting creates an ephemeral
/// live instance record owned by a fresh session; disconnecting expires that session.
pub struct ParticipantConnection {
    scope: ClusterScope,
    participants: ParticipantAccessor,
    id: ParticipantId,
    host: String,
    port: u16,
    /// Add the participant to the cluster on connect when it is not yet set up.
    auto_join: bool,
    engine: StateMachineEngine,
    session: Option<SessionId>,
}

impl ParticipantConnection {
    pub fn new(cluster_id: ClusterId, id: ParticipantId, store: StoreHandle, host: impl Into<String>, port: u16) -> Self {
        let scope = ClusterScope::new(cluster_id, store);
        let participants = ParticipantAccessor::new(scope.clone());
        Self { scope, participants, id, host: host.into(), port, auto_join: false, engine: StateMachineEngine::new(), session: None }
    }

    /// Enable or disable auto-join for this connection.
    pub fn auto_join(mut self, auto_join: bool) -> Self {
        self.auto_join = auto_join;
        self
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.scope.cluster_id
    }

    /// The live session of this connection, if connected.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Register a state model factory with this connection's engine.
    pub fn register_state_model_factory(&mut self, name: StateModelDefId, factory: Arc<dyn StateModelFactory>) -> LifecycleResult<()> {
        self.engine.register_state_model_factory(name, factory)
    }

    /// Establish a live session for this participant.
    ///
    /// Connecting an already connected participant returns its current session.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id, participant = %self.id))]
    pub fn connect(&mut self) -> LifecycleResult<SessionId> {
        if let Some(session) = self.session.as_ref() {
            return Ok(session.clone());
        }
        if !self.scope.is_structure_valid()? {
            return Err(LifecycleError::ConnectionRefused(format!("cluster {} is not set up", self.scope.cluster_id)));
        }
        let config_exists = self.scope.exists(&self.scope.paths.participant_config(&self.id))?;
        if !config_exists || !self.participants.is_participant_structure_valid(&self.id)? {
            self.join_cluster(config_exists)?;
        }

        let session = SessionId::generate();
        let live = LiveInstance::new(self.id.as_str(), session.clone(), self.host.as_str());
        let created = self.scope.store.create(&self.scope.paths.live_instance(&self.id), Some(live.to_record()), Durability::Ephemeral(session.clone()))?;
        if !created {
            return Err(LifecycleError::AlreadyLive(self.id.clone()));
        }
        self.engine.seal();
        self.session = Some(session.clone());
        tracing::info!(%session, "participant connected");
        Ok(session)
    }

    /// Add this participant to the cluster, if both this connection and the cluster allow it.
    fn join_cluster(&self, config_exists: bool) -> LifecycleResult<()> {
        if !self.auto_join {
            return Err(LifecycleError::ConnectionRefused(format!("participant {} is not set up and auto join is disabled", self.id)));
        }
        let conf: Option<ClusterConfiguration> = read_model(self.scope.store.as_ref(), &self.scope.paths.cluster_config())?;
        if !conf.map(|conf| conf.auto_join_allowed).unwrap_or(false) {
            return Err(LifecycleError::ConnectionRefused(format!("cluster {} does not allow participants to auto join", self.scope.cluster_id)));
        }
        if config_exists {
            tracing::info!("repairing participant structure");
            self.participants.init_participant_structure(&self.id)?;
        } else {
            tracing::info!("auto joining cluster");
            self.participants.add_participant(&ParticipantConfig::new(self.id.clone(), self.host.as_str(), self.port))?;
        }
        Ok(())
    }

    /// Process the pending messages of this participant's live session.
    ///
    /// Messages addressed to other sessions are discarded. Returns the number of messages removed
    /// from the queue.
    #[tracing::instrument(level = "trace", skip(self), fields(cluster = %self.scope.cluster_id, participant = %self.id))]
    pub fn process_messages(&mut self) -> LifecycleResult<usize> {
        let session = self.session.clone().ok_or(LifecycleError::NotConnected)?;
        let (messages, defs) = {
            let source = self.scope.source();
            let messages = source.messages(&self.id)?;
            if messages.is_empty() {
                return Ok(0);
            }
            (messages, source.state_model_defs()?)
        };

        let mut processed: Vec<MessageId> = Vec::with_capacity(messages.len());
        for (msg_id, msg) in messages {
            if msg.tgt_session != session {
                tracing::warn!(message = %msg_id, target = %msg.tgt_session, %session, "discarding message addressed to another session");
                processed.push(msg_id);
                continue;
            }
            if msg.msg_type != MSG_TYPE_STATE_TRANSITION {
                tracing::warn!(message = %msg_id, msg_type = %msg.msg_type, "discarding message of unsupported type");
                processed.push(msg_id);
                continue;
            }
            let new_state = match defs.get(&msg.state_model_def_id) {
                Some(def) => {
                    let current = self.current_state(&msg, &session)?.unwrap_or_else(|| def.initial_state.clone());
                    self.engine.execute(def, &msg, &current).new_state().map(String::from)
                }
                None => {
                    tracing::error!(message = %msg_id, state_model = %msg.state_model_def_id, "state model definition does not exist");
                    Some(STATE_ERROR.to_string())
                }
            };
            if let Some(state) = new_state {
                self.write_state(&msg, &session, state)?;
            }
            processed.push(msg_id);
        }
        self.participants.delete_messages(&self.id, &processed)?;
        Ok(processed.len())
    }

    /// The current state of the replica targeted by the given message.
    fn current_state(&self, msg: &Message, session: &SessionId) -> LifecycleResult<Option<String>> {
        let path = self.scope.paths.current_state(&self.id, session, &msg.resource_id);
        let state: Option<CurrentState> = read_model(self.scope.store.as_ref(), &path)?;
        Ok(state.and_then(|mut state| state.partition_states.remove(&msg.partition_id)))
    }

    fn write_state(&self, msg: &Message, session: &SessionId, state: String) -> LifecycleResult<()> {
        let path = self.scope.paths.current_state(&self.id, session, &msg.resource_id);
        self.scope.store.update(&path, &|record| {
            let mut current = record
                .and_then(|record| CurrentState::from_record(&record))
                .unwrap_or_else(|| CurrentState::new(msg.resource_id.clone(), session.clone(), msg.state_model_def_id.clone()));
            current.partition_states.insert(msg.partition_id.clone(), state.clone());
            Some(current.to_record())
        })?;
        tracing::debug!(resource = %msg.resource_id, partition = %msg.partition_id, %state, "replica state updated");
        Ok(())
    }

    /// Tear down the live session of this participant, if any.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id, participant = %self.id))]
    pub fn disconnect(&mut self) -> LifecycleResult<()> {
        let session = match self.session.take() {
            Some(session) => session,
            None => return Ok(()),
        };
        let removed = match self.scope.store.expire_session(&session) {
            Ok(removed) => removed,
            Err(err) => {
                self.session = Some(session);
                return Err(err.into());
            }
        };
        self.engine.reset();
        tracing::info!(%session, removed, "participant disconnected");
        Ok(())
    }
}
