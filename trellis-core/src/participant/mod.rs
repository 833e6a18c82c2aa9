//! Participant connection and lifecycle.

mod connection;
mod engine;
mod manager;

pub use connection::ParticipantConnection;
pub use engine::{StateMachineEngine, StateModel, StateModelFactory, TransitionContext, TransitionOutcome};
pub use manager::{LifecycleState, ParticipantManager, ParticipantManagerConfig, DEFAULT_POLL_INTERVAL};

#[cfg(test)]
mod connection_test;
#[cfg(test)]
mod engine_test;
#[cfg(test)]
mod manager_test;
