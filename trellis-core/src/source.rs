//! Cluster data sources.
//!
//! Entity reads are written once against `DataSource`, and served either straight from the
//! store or from a `ClusterDataCache` snapshot.

use std::collections::BTreeMap;

use crate::models::{
    ContextId, ControllerContext, CurrentState, ExternalView, IdealState, LiveInstance, Message, MessageId, ParticipantConfig, ParticipantId,
    ResourceAssignment, ResourceConfiguration, ResourceId, SessionId, StateModelDefId, StateModelDefinition, StoreModel,
};
use crate::store::{HierarchicalStore, PathBuilder, StoreResult};

/// A source of cluster entity collections.
pub trait DataSource {
    /// Check if this source serves a point-in-time snapshot rather than live store reads.
    fn is_snapshot(&self) -> bool;
    fn ideal_states(&self) -> StoreResult<BTreeMap<ResourceId, IdealState>>;
    fn resource_configs(&self) -> StoreResult<BTreeMap<ResourceId, ResourceConfiguration>>;
    fn external_views(&self) -> StoreResult<BTreeMap<ResourceId, ExternalView>>;
    fn resource_assignments(&self) -> StoreResult<BTreeMap<ResourceId, ResourceAssignment>>;
    fn participant_configs(&self) -> StoreResult<BTreeMap<ParticipantId, ParticipantConfig>>;
    fn live_instances(&self) -> StoreResult<BTreeMap<ParticipantId, LiveInstance>>;
    /// The pending messages of the given participant.
    fn messages(&self, participant: &ParticipantId) -> StoreResult<BTreeMap<MessageId, Message>>;
    /// The current states written by the given session of the given participant.
    fn current_states(&self, participant: &ParticipantId, session: &SessionId) -> StoreResult<BTreeMap<ResourceId, CurrentState>>;
    fn state_model_defs(&self) -> StoreResult<BTreeMap<StateModelDefId, StateModelDefinition>>;
    fn controller_contexts(&self) -> StoreResult<BTreeMap<ContextId, ControllerContext>>;
}

/// Read and decode every child record of the given path.
///
/// Records which fail to decode are logged and skipped.
pub(crate) fn read_children<K, M>(store: &dyn HierarchicalStore, path: &str) -> StoreResult<BTreeMap<K, M>>
where
    K: From<String> + Ord,
    M: StoreModel,
{
    let mut out = BTreeMap::new();
    for (name, record) in store.get_child_values(path)? {
        match M::from_record(&record) {
            Some(model) => {
                out.insert(K::from(name), model);
            }
            None => tracing::warn!(path, child = %name, "skipping malformed record"),
        }
    }
    Ok(out)
}

/// Read and decode a single record.
pub(crate) fn read_model<M: StoreModel>(store: &dyn HierarchicalStore, path: &str) -> StoreResult<Option<M>> {
    Ok(store.get(path)?.and_then(|record| {
        let model = M::from_record(&record);
        if model.is_none() {
            tracing::warn!(path, "skipping malformed record");
        }
        model
    }))
}

/// A data source reading straight from the store.
pub struct StoreSource<'a> {
    store: &'a dyn HierarchicalStore,
    paths: &'a PathBuilder,
}

impl<'a> StoreSource<'a> {
    pub fn new(store: &'a dyn HierarchicalStore, paths: &'a PathBuilder) -> Self {
        Self { store, paths }
    }
}

impl<'a> DataSource for StoreSource<'a> {
    fn is_snapshot(&self) -> bool {
        false
    }

    fn ideal_states(&self) -> StoreResult<BTreeMap<ResourceId, IdealState>> {
        read_children(self.store, &self.paths.ideal_states())
    }

    fn resource_configs(&self) -> StoreResult<BTreeMap<ResourceId, ResourceConfiguration>> {
        read_children(self.store, &self.paths.resource_configs())
    }

    fn external_views(&self) -> StoreResult<BTreeMap<ResourceId, ExternalView>> {
        read_children(self.store, &self.paths.external_views())
    }

    fn resource_assignments(&self) -> StoreResult<BTreeMap<ResourceId, ResourceAssignment>> {
        read_children(self.store, &self.paths.resource_assignments())
    }

    fn participant_configs(&self) -> StoreResult<BTreeMap<ParticipantId, ParticipantConfig>> {
        read_children(self.store, &self.paths.participant_configs())
    }

    fn live_instances(&self) -> StoreResult<BTreeMap<ParticipantId, LiveInstance>> {
        read_children(self.store, &self.paths.live_instances())
    }

    fn messages(&self, participant: &ParticipantId) -> StoreResult<BTreeMap<MessageId, Message>> {
        read_children(self.store, &self.paths.messages(participant))
    }

    fn current_states(&self, participant: &ParticipantId, session: &SessionId) -> StoreResult<BTreeMap<ResourceId, CurrentState>> {
        read_children(self.store, &self.paths.current_states(participant, session))
    }

    fn state_model_defs(&self) -> StoreResult<BTreeMap<StateModelDefId, StateModelDefinition>> {
        read_children(self.store, &self.paths.state_model_defs())
    }

    fn controller_contexts(&self) -> StoreResult<BTreeMap<ContextId, ControllerContext>> {
        read_children(self.store, &self.paths.controller_contexts())
    }
}
