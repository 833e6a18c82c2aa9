//! State model handlers of the participant process.

use anyhow::Result;
use trellis_core::models::{PartitionId, ResourceId, StateModelDefId};
use trellis_core::participant::{StateModel, StateModelFactory, TransitionContext};

/// A factory of handlers which log each transition and accept it.
pub struct LoggingStateModelFactory {
    state_model: StateModelDefId,
}

impl LoggingStateModelFactory {
    pub fn new(state_model: StateModelDefId) -> Self {
        Self { state_model }
    }
}

impl StateModelFactory for LoggingStateModelFactory {
    fn create_state_model(&self, resource: &ResourceId, partition: &PartitionId) -> Box<dyn StateModel> {
        tracing::debug!(state_model = %self.state_model, %resource, %partition, "creating state model handler");
        Box::new(LoggingStateModel { state_model: self.state_model.clone() })
    }
}

struct LoggingStateModel {
    state_model: StateModelDefId,
}

impl StateModel for LoggingStateModel {
    fn on_transition(&mut self, ctx: &TransitionContext) -> Result<()> {
        tracing::info!(
            state_model = %self.state_model,
            resource = %ctx.resource_id,
            partition = %ctx.partition_id,
            from = %ctx.from_state,
            to = %ctx.to_state,
            "replica transitioned",
        );
        Ok(())
    }

    fn reset(&mut self) {
        tracing::debug!(state_model = %self.state_model, "resetting state model handler");
    }
}
