use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tempfile::TempDir;

use crate::accessor::ClusterAccessor;
use crate::models::{
    ClusterConfig, ClusterId, PartitionId, RebalanceMode, RebalancerConfig, ResourceConfig, ResourceId, StateModelDefId, StateModelDefinition,
};
use crate::participant::{StateModel, StateModelFactory, TransitionContext};
use crate::store::{SledStore, StoreHandle};

/// Open a sled store in a new temporary directory.
///
/// The directory is removed when the returned `TempDir` is dropped, so keep it alive.
pub fn sled_store() -> Result<(StoreHandle, TempDir)> {
    let tmpdir = tempfile::tempdir_in("/tmp").context("error creating tmp dir in /tmp")?;
    let store = SledStore::open(tmpdir.path()).context("error opening sled store")?;
    Ok((Arc::new(store), tmpdir))
}

/// A cluster config with the `MasterSlave` definition and no other entities.
pub fn cluster_config(id: &str) -> ClusterConfig {
    ClusterConfig::new(ClusterId::new(id)).with_state_model(StateModelDefinition::master_slave())
}

/// A semi-auto resource config following `MasterSlave`.
pub fn resource_config(id: &str, partitions: u32) -> ResourceConfig {
    ResourceConfig::new(RebalancerConfig::new(ResourceId::new(id), RebalanceMode::SemiAuto, StateModelDefId::new("MasterSlave"), partitions, 2))
}

/// Open a store and create a cluster with the `MasterSlave` definition in it.
pub fn cluster(id: &str) -> Result<(ClusterAccessor, StoreHandle, TempDir)> {
    let (store, tmpdir) = sled_store()?;
    let accessor = ClusterAccessor::new(ClusterId::new(id), store.clone());
    accessor.create_cluster(&cluster_config(id)).context("error creating test cluster")?;
    Ok((accessor, store, tmpdir))
}

/// A state model factory whose handlers record every transition they perform.
///
/// Transitions into `fail_on` fail.
#[derive(Clone, Default)]
pub struct RecordingFactory {
    pub transitions: Arc<Mutex<Vec<TransitionContext>>>,
    pub fail_on: Option<String>,
}

impl RecordingFactory {
    pub fn failing_on(state: &str) -> Self {
        Self { fail_on: Some(state.into()), ..Default::default() }
    }

    /// The `(partition, from, to)` of each recorded transition, in order.
    pub fn recorded(&self) -> Vec<(String, String, String)> {
        let transitions = self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        transitions.iter().map(|ctx| (ctx.partition_id.to_string(), ctx.from_state.clone(), ctx.to_state.clone())).collect()
    }
}

impl StateModelFactory for RecordingFactory {
    fn create_state_model(&self, _: &ResourceId, _: &PartitionId) -> Box<dyn StateModel> {
        Box::new(self.clone())
    }
}

impl StateModel for RecordingFactory {
    fn on_transition(&mut self, ctx: &TransitionContext) -> Result<()> {
        self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(ctx.clone());
        if self.fail_on.as_deref() == Some(ctx.to_state.as_str()) {
            anyhow::bail!("transition into {} refused", ctx.to_state);
        }
        Ok(())
    }
}

/// A state model factory whose handlers panic on every transition.
#[derive(Clone, Default)]
pub struct PanickingFactory;

impl StateModelFactory for PanickingFactory {
    fn create_state_model(&self, _: &ResourceId, _: &PartitionId) -> Box<dyn StateModel> {
        Box::new(PanickingFactory)
    }
}

impl StateModel for PanickingFactory {
    fn on_transition(&mut self, ctx: &TransitionContext) -> Result<()> {
        panic!("handler crashed on transition {} -> {}", ctx.from_state, ctx.to_state);
    }
}
