//! The cluster data cache.

use std::collections::BTreeMap;

use crate::models::{
    ClusterConfiguration, ClusterConstraints, ConstraintType, ContextId, ControllerContext, CurrentState, ExternalView, IdealState, LiveInstance,
    Message, MessageId, ParticipantConfig, ParticipantId, RebalanceMode, RebalancerConfig, ResourceAssignment, ResourceConfiguration,
    ResourceId, SessionId, StateModelDefId, StateModelDefinition,
};
use crate::source::{read_children, read_model, DataSource};
use crate::store::{HierarchicalStore, PathBuilder, StoreResult};

const METRIC_CACHE_REFRESHES: &str = "trellis_cache_refreshes";

/// A point-in-time snapshot of every entity collection of one cluster.
///
/// A cache is single owner state. `refresh` replaces the whole snapshot, or leaves the prior one
/// untouched if any read fails.
#[derive(Debug)]
pub struct ClusterDataCache {
    paths: PathBuilder,
    data: CacheData,
}

#[derive(Debug, Default)]
struct CacheData {
    refreshed: bool,
    ideal_states: BTreeMap<ResourceId, IdealState>,
    resource_configs: BTreeMap<ResourceId, ResourceConfiguration>,
    external_views: BTreeMap<ResourceId, ExternalView>,
    resource_assignments: BTreeMap<ResourceId, ResourceAssignment>,
    participant_configs: BTreeMap<ParticipantId, ParticipantConfig>,
    live_instances: BTreeMap<ParticipantId, LiveInstance>,
    messages: BTreeMap<ParticipantId, BTreeMap<MessageId, Message>>,
    current_states: BTreeMap<ParticipantId, (SessionId, BTreeMap<ResourceId, CurrentState>)>,
    constraints: BTreeMap<ConstraintType, ClusterConstraints>,
    state_model_defs: BTreeMap<StateModelDefId, StateModelDefinition>,
    controller_contexts: BTreeMap<ContextId, ControllerContext>,
    leader: Option<LiveInstance>,
    paused: bool,
    cluster_config: Option<ClusterConfiguration>,
    extra_reads_required: bool,
}

impl ClusterDataCache {
    /// Create a new empty cache for the cluster of the given paths.
    pub fn new(paths: PathBuilder) -> Self {
        metrics::register_counter!(METRIC_CACHE_REFRESHES, metrics::Unit::Count, "full refreshes of the cluster data cache");
        Self { paths, data: CacheData::default() }
    }

    /// Re-read every cached collection from the given store.
    #[tracing::instrument(level = "debug", skip(self, store), fields(cluster = %self.paths.cluster()))]
    pub fn refresh(&mut self, store: &dyn HierarchicalStore) -> StoreResult<()> {
        let paths = &self.paths;
        let mut data = CacheData {
            refreshed: true,
            ideal_states: read_children(store, &paths.ideal_states())?,
            resource_configs: read_children(store, &paths.resource_configs())?,
            participant_configs: read_children(store, &paths.participant_configs())?,
            live_instances: read_children(store, &paths.live_instances())?,
            state_model_defs: read_children(store, &paths.state_model_defs())?,
            controller_contexts: read_children(store, &paths.controller_contexts())?,
            leader: read_model(store, &paths.leader())?,
            paused: store.exists(&[paths.pause()])?.first().copied().unwrap_or(false),
            cluster_config: read_model(store, &paths.cluster_config())?,
            ..Default::default()
        };
        data.constraints = read_children::<String, ClusterConstraints>(store, &paths.constraints())?
            .into_values()
            .map(|constraints| (constraints.constraint_type, constraints))
            .collect();
        for (id, live) in data.live_instances.iter() {
            data.messages.insert(id.clone(), read_children(store, &paths.messages(id))?);
            let states = read_children(store, &paths.current_states(id, &live.session_id))?;
            data.current_states.insert(id.clone(), (live.session_id.clone(), states));
        }

        data.extra_reads_required = requires_extra_reads(&data.ideal_states, &data.resource_configs);
        if data.extra_reads_required {
            data.external_views = read_children(store, &paths.external_views())?;
            data.resource_assignments = read_children(store, &paths.resource_assignments())?;
        }

        self.data = data;
        metrics::increment_counter!(METRIC_CACHE_REFRESHES);
        Ok(())
    }

    /// Check if this cache has been refreshed at least once.
    pub fn is_refreshed(&self) -> bool {
        self.data.refreshed
    }

    /// Check if the last refresh found resources placed by a user defined rebalancer.
    ///
    /// When set, external views and resource assignments were read, and rebalancers are
    /// expected to persist the assignments they compute.
    pub fn assignment_write_policy(&self) -> bool {
        self.data.extra_reads_required
    }

    pub fn constraints(&self) -> &BTreeMap<ConstraintType, ClusterConstraints> {
        &self.data.constraints
    }

    pub fn leader(&self) -> Option<&LiveInstance> {
        self.data.leader.as_ref()
    }

    /// Check if the cluster's pause node existed, whatever it holds.
    pub fn is_paused(&self) -> bool {
        self.data.paused
    }

    pub fn cluster_config(&self) -> Option<&ClusterConfiguration> {
        self.data.cluster_config.as_ref()
    }
}

/// Check if the given resources need their external views and assignments read.
///
/// This is the case when any resource is placed by a user defined rebalancer, which can only
/// be reasoned about through what it last assigned.
pub fn requires_extra_reads(ideal_states: &BTreeMap<ResourceId, IdealState>, resource_configs: &BTreeMap<ResourceId, ResourceConfiguration>) -> bool {
    let user_defined_ideal_state = ideal_states.values().any(|ideal| {
        ideal.mode() == RebalanceMode::UserDefined
            || ideal.rebalancer.rebalancer_class.as_deref().map(|class| !RebalancerConfig::is_builtin_rebalancer(class)).unwrap_or(false)
    });
    user_defined_ideal_state || resource_configs.values().any(ResourceConfiguration::has_rebalancer_config)
}

impl DataSource for ClusterDataCache {
    fn is_snapshot(&self) -> bool {
        true
    }

    fn ideal_states(&self) -> StoreResult<BTreeMap<ResourceId, IdealState>> {
        Ok(self.data.ideal_states.clone())
    }

    fn resource_configs(&self) -> StoreResult<BTreeMap<ResourceId, ResourceConfiguration>> {
        Ok(self.data.resource_configs.clone())
    }

    fn external_views(&self) -> StoreResult<BTreeMap<ResourceId, ExternalView>> {
        Ok(self.data.external_views.clone())
    }

    fn resource_assignments(&self) -> StoreResult<BTreeMap<ResourceId, ResourceAssignment>> {
        Ok(self.data.resource_assignments.clone())
    }

    fn participant_configs(&self) -> StoreResult<BTreeMap<ParticipantId, ParticipantConfig>> {
        Ok(self.data.participant_configs.clone())
    }

    fn live_instances(&self) -> StoreResult<BTreeMap<ParticipantId, LiveInstance>> {
        Ok(self.data.live_instances.clone())
    }

    fn messages(&self, participant: &ParticipantId) -> StoreResult<BTreeMap<MessageId, Message>> {
        Ok(self.data.messages.get(participant).cloned().unwrap_or_default())
    }

    fn current_states(&self, participant: &ParticipantId, session: &SessionId) -> StoreResult<BTreeMap<ResourceId, CurrentState>> {
        Ok(self
            .data
            .current_states
            .get(participant)
            .filter(|(cached_session, _)| cached_session == session)
            .map(|(_, states)| states.clone())
            .unwrap_or_default())
    }

    fn state_model_defs(&self) -> StoreResult<BTreeMap<StateModelDefId, StateModelDefinition>> {
        Ok(self.data.state_model_defs.clone())
    }

    fn controller_contexts(&self) -> StoreResult<BTreeMap<ContextId, ControllerContext>> {
        Ok(self.data.controller_contexts.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixtures;
    use crate::models::{ClusterId, Record, ResourceType, StoreModel};
    use crate::store::Durability;

    #[test]
    fn refresh_skips_extra_reads_for_builtin_rebalancers() -> anyhow::Result<()> {
        let (accessor, store, _tmpdir) = fixtures::cluster("c0")?;
        accessor.add_resource(&fixtures::resource_config("db", 3))?;
        let paths = PathBuilder::new(&ClusterId::new("c0"));
        store.set(&paths.external_view(&ResourceId::new("db")), Record::new("db"))?;

        let mut cache = ClusterDataCache::new(paths);
        assert!(!cache.is_refreshed(), "expected a new cache to be unrefreshed");
        cache.refresh(store.as_ref())?;

        assert!(cache.is_refreshed(), "expected cache to be refreshed");
        assert!(!cache.assignment_write_policy(), "expected no extra reads for a builtin rebalancer");
        assert_eq!(cache.ideal_states()?.len(), 1, "expected one cached ideal state");
        assert!(cache.external_views()?.is_empty(), "expected external views to be skipped");
        Ok(())
    }

    #[test]
    fn refresh_reads_external_views_for_opaque_rebalancers() -> anyhow::Result<()> {
        let (_accessor, store, _tmpdir) = fixtures::cluster("c0")?;
        let paths = PathBuilder::new(&ClusterId::new("c0"));
        let mut rebalancer = fixtures::resource_config("db", 2).rebalancer_config.ok_or_else(|| anyhow::anyhow!("expected rebalancer"))?;
        rebalancer.mode = RebalanceMode::UserDefined;
        let configuration = ResourceConfiguration {
            id: ResourceId::new("db"),
            resource_type: ResourceType::Data,
            user_config: Record::new("db"),
            rebalancer_config: Some(rebalancer),
            provisioner_config: None,
        };
        store.create(&paths.resource_config(&ResourceId::new("db")), Some(configuration.to_record()), Durability::Persistent)?;
        store.set(&paths.external_view(&ResourceId::new("db")), Record::new("db"))?;

        let mut cache = ClusterDataCache::new(paths);
        cache.refresh(store.as_ref())?;

        assert!(cache.assignment_write_policy(), "expected extra reads for an opaque rebalancer config");
        assert_eq!(cache.external_views()?.len(), 1, "expected external view to be cached");
        Ok(())
    }

    #[test]
    fn cached_current_states_are_scoped_to_live_session() -> anyhow::Result<()> {
        let (_accessor, store, _tmpdir) = fixtures::cluster("c0")?;
        let paths = PathBuilder::new(&ClusterId::new("c0"));
        let (participant, live, stale) = (ParticipantId::new("p0"), SessionId::new("s-live"), SessionId::new("s-stale"));
        store.create(
            &paths.live_instance(&participant),
            Some(LiveInstance::new("p0", live.clone(), "localhost").to_record()),
            Durability::Ephemeral(live.clone()),
        )?;
        let state = CurrentState::new(ResourceId::new("db"), live.clone(), StateModelDefId::new("MasterSlave"));
        store.set(&paths.current_state(&participant, &live, &ResourceId::new("db")), state.to_record())?;

        let mut cache = ClusterDataCache::new(paths);
        cache.refresh(store.as_ref())?;

        assert_eq!(cache.current_states(&participant, &live)?.len(), 1, "expected live session state to be cached");
        assert!(cache.current_states(&participant, &stale)?.is_empty(), "expected stale session to yield nothing");
        Ok(())
    }
}
