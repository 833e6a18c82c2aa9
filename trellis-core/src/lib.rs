//! Trellis cluster accessors and participant lifecycle runtime.

pub mod accessor;
pub mod cache;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod models;
pub mod participant;
pub mod source;
pub mod store;

pub use accessor::ClusterAccessor;
pub use error::{AccessError, AccessResult, FailureReason, LifecycleError, LifecycleResult};
pub use participant::{LifecycleState, ParticipantConnection, ParticipantManager, ParticipantManagerConfig};
pub use store::{HierarchicalStore, SledStore, StoreHandle};
