//! Cluster data models.

pub mod cluster;
pub mod constraint;
pub mod controller;
pub mod ids;
pub mod participant;
pub mod record;
pub mod resource;
pub mod state_model;

pub use cluster::{Cluster, ClusterConfig, ClusterConfigDelta, ClusterConfiguration};
pub use constraint::{ClusterConstraints, ConstraintItem, ConstraintType};
pub use controller::{Controller, ControllerContext, PauseSignal};
pub use ids::*;
pub use participant::{CurrentState, LiveInstance, Message, Participant, ParticipantConfig};
pub use record::{Record, StoreModel, UserConfig};
pub use resource::{
    ExternalView, IdealState, ProvisionerConfig, RebalanceMode, RebalancerConfig, Resource, ResourceAssignment, ResourceConfig, ResourceConfiguration,
    ResourceType,
};
pub use state_model::StateModelDefinition;
