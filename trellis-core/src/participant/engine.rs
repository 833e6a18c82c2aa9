//! The state machine engine driving a participant's replicas.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{LifecycleError, LifecycleResult};
use crate::models::state_model::STATE_ERROR;
use crate::models::{Message, MessageId, PartitionId, ResourceId, StateModelDefId, StateModelDefinition};

const METRIC_TRANSITIONS: &str = "trellis_participant_transitions";

/// The details of a single replica state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionContext {
    pub message_id: MessageId,
    pub resource_id: ResourceId,
    pub partition_id: PartitionId,
    pub from_state: String,
    pub to_state: String,
}

/// The handler of the transitions of a single partition replica.
pub trait StateModel: Send {
    /// Perform the given transition. An error puts the replica into the `ERROR` state.
    fn on_transition(&mut self, ctx: &TransitionContext) -> anyhow::Result<()>;

    /// Reset this replica when its session ends.
    fn reset(&mut self) {}
}

/// A factory of per-partition state model handlers for one state model definition.
pub trait StateModelFactory: Send + Sync {
    fn create_state_model(&self, resource: &ResourceId, partition: &PartitionId) -> Box<dyn StateModel>;
}

/// The result of executing a transition message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The replica is now in the given state.
    Applied(String),
    /// The replica is now in the `ERROR` state.
    Errored,
    /// The message does not match the replica's current state and was discarded.
    Stale { current: String },
}

impl TransitionOutcome {
    /// The state the replica is in after the transition, if it changed.
    pub fn new_state(&self) -> Option<&str> {
        match self {
            Self::Applied(state) => Some(state.as_str()),
            Self::Errored => Some(STATE_ERROR),
            Self::Stale { .. } => None,
        }
    }
}

/// Routes transition messages to the state model handlers registered for their definition.
#[derive(Default)]
pub struct StateMachineEngine {
    factories: HashMap<StateModelDefId, Arc<dyn StateModelFactory>>,
    models: HashMap<(ResourceId, PartitionId), Box<dyn StateModel>>,
    sealed: bool,
}

impl StateMachineEngine {
    pub fn new() -> Self {
        metrics::register_counter!(METRIC_TRANSITIONS, metrics::Unit::Count, "replica state transitions executed by this participant");
        Self::default()
    }

    /// Register the factory of the given state model definition.
    ///
    /// Factories must be registered before the engine is sealed by a connection, since messages
    /// may arrive as soon as the connection is established.
    pub fn register_state_model_factory(&mut self, name: StateModelDefId, factory: Arc<dyn StateModelFactory>) -> LifecycleResult<()> {
        if self.sealed {
            return Err(LifecycleError::RegistrationAfterConnect(name.to_string()));
        }
        if self.factories.contains_key(&name) {
            return Err(LifecycleError::DuplicateFactory(name.to_string()));
        }
        tracing::debug!(state_model = %name, "registered state model factory");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn has_factory(&self, name: &StateModelDefId) -> bool {
        self.factories.contains_key(name)
    }

    /// Seal this engine against further registration.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Execute the transition requested by the given message against the replica's current state.
    #[tracing::instrument(level = "debug", skip(self, def, msg), fields(resource = %msg.resource_id, partition = %msg.partition_id))]
    pub fn execute(&mut self, def: &StateModelDefinition, msg: &Message, current: &str) -> TransitionOutcome {
        if msg.from_state != current {
            tracing::warn!(current, from = %msg.from_state, to = %msg.to_state, "message does not match current state, discarding");
            return TransitionOutcome::Stale { current: current.to_string() };
        }
        if !def.is_legal_transition(&msg.from_state, &msg.to_state) {
            tracing::error!(from = %msg.from_state, to = %msg.to_state, state_model = %def.id, "transition is not declared by state model");
            return TransitionOutcome::Errored;
        }
        let factory = match self.factories.get(&def.id) {
            Some(factory) => factory,
            None => {
                tracing::error!(state_model = %def.id, "no state model factory registered");
                return TransitionOutcome::Errored;
            }
        };
        let key = (msg.resource_id.clone(), msg.partition_id.clone());
        let model = self.models.entry(key).or_insert_with(|| factory.create_state_model(&msg.resource_id, &msg.partition_id));
        let ctx = TransitionContext {
            message_id: msg.id.clone(),
            resource_id: msg.resource_id.clone(),
            partition_id: msg.partition_id.clone(),
            from_state: msg.from_state.clone(),
            to_state: msg.to_state.clone(),
        };
        metrics::increment_counter!(METRIC_TRANSITIONS);
        match model.on_transition(&ctx) {
            Ok(()) => TransitionOutcome::Applied(msg.to_state.clone()),
            Err(err) => {
                tracing::error!(error = ?err, from = %msg.from_state, to = %msg.to_state, "error during state transition");
                TransitionOutcome::Errored
            }
        }
    }

    /// Reset every replica handler, dropping them.
    pub(crate) fn reset(&mut self) {
        for (_, mut model) in self.models.drain() {
            model.reset();
        }
    }
}
