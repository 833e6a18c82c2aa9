//! Cluster models.

use std::collections::BTreeMap;

use crate::models::constraint::{ClusterConstraints, ConstraintItem, ConstraintType};
use crate::models::controller::{Controller, ControllerContext};
use crate::models::ids::{ClusterId, ConstraintId, ContextId, ControllerId, ParticipantId, ResourceId, StateModelDefId};
use crate::models::participant::{Participant, ParticipantConfig};
use crate::models::record::{Record, StoreModel, UserConfig};
use crate::models::resource::{Resource, ResourceConfig, NS_USER_CONFIG};
use crate::models::state_model::StateModelDefinition;

const FIELD_AUTO_JOIN: &str = "allowParticipantAutoJoin";

//////////////////////////////////////////////////////////////////////////////
// ClusterConfig /////////////////////////////////////////////////////////////

/// The full configuration of a cluster, as given to `create_cluster`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub id: ClusterId,
    pub resources: BTreeMap<ResourceId, ResourceConfig>,
    pub participants: BTreeMap<ParticipantId, ParticipantConfig>,
    pub constraints: BTreeMap<ConstraintType, ClusterConstraints>,
    pub state_models: BTreeMap<StateModelDefId, StateModelDefinition>,
    pub user_config: UserConfig,
    pub paused: bool,
    pub auto_join_allowed: bool,
}

impl ClusterConfig {
    /// Create an empty config for the given cluster.
    pub fn new(id: ClusterId) -> Self {
        let user_config = Record::new(id.as_str());
        Self {
            id,
            resources: Default::default(),
            participants: Default::default(),
            constraints: Default::default(),
            state_models: Default::default(),
            user_config,
            paused: false,
            auto_join_allowed: false,
        }
    }

    pub fn with_state_model(mut self, def: StateModelDefinition) -> Self {
        self.state_models.insert(def.id.clone(), def);
        self
    }

    pub fn with_resource(mut self, config: ResourceConfig) -> Self {
        self.resources.insert(config.id.clone(), config);
        self
    }

    pub fn with_participant(mut self, config: ParticipantConfig) -> Self {
        self.participants.insert(config.id.clone(), config);
        self
    }

    pub fn with_constraint(mut self, constraint_type: ConstraintType, id: ConstraintId, item: ConstraintItem) -> Self {
        self.constraints.entry(constraint_type).or_insert_with(|| ClusterConstraints::new(constraint_type)).add_item(id, item);
        self
    }

    pub fn with_user_config(mut self, user_config: UserConfig) -> Self {
        self.user_config = user_config;
        self
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }

    pub fn auto_join_allowed(mut self, allowed: bool) -> Self {
        self.auto_join_allowed = allowed;
        self
    }
}

//////////////////////////////////////////////////////////////////////////////
// ClusterConfigDelta ////////////////////////////////////////////////////////

/// A change to the basic cluster-level fields of a cluster config.
///
/// Resources and participants are never changed through a delta.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterConfigDelta {
    pub user_config: Option<UserConfig>,
    pub auto_join_allowed: Option<bool>,
    pub added_constraints: Vec<(ConstraintType, ConstraintId, ConstraintItem)>,
    pub removed_constraints: Vec<(ConstraintType, ConstraintId)>,
}

impl ClusterConfigDelta {
    pub fn set_user_config(mut self, user_config: UserConfig) -> Self {
        self.user_config = Some(user_config);
        self
    }

    pub fn set_auto_join_allowed(mut self, allowed: bool) -> Self {
        self.auto_join_allowed = Some(allowed);
        self
    }

    pub fn add_constraint(mut self, constraint_type: ConstraintType, id: ConstraintId, item: ConstraintItem) -> Self {
        self.added_constraints.push((constraint_type, id, item));
        self
    }

    pub fn remove_constraint(mut self, constraint_type: ConstraintType, id: ConstraintId) -> Self {
        self.removed_constraints.push((constraint_type, id));
        self
    }

    /// Apply this delta to the given config, producing a new config.
    ///
    /// Removals are applied after additions.
    pub fn merge_into(&self, orig: &ClusterConfig) -> ClusterConfig {
        let mut config = orig.clone();
        if let Some(user_config) = self.user_config.as_ref() {
            config.user_config = user_config.clone();
        }
        if let Some(allowed) = self.auto_join_allowed {
            config.auto_join_allowed = allowed;
        }
        for (constraint_type, id, item) in self.added_constraints.iter() {
            config
                .constraints
                .entry(*constraint_type)
                .or_insert_with(|| ClusterConstraints::new(*constraint_type))
                .add_item(id.clone(), item.clone());
        }
        for (constraint_type, id) in self.removed_constraints.iter() {
            if let Some(constraints) = config.constraints.get_mut(constraint_type) {
                constraints.remove_item(id);
            }
        }
        config
    }
}

//////////////////////////////////////////////////////////////////////////////
// ClusterConfiguration //////////////////////////////////////////////////////

/// The cluster-level configuration node as persisted in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfiguration {
    pub id: ClusterId,
    pub auto_join_allowed: bool,
    pub user_config: UserConfig,
}

impl StoreModel for ClusterConfiguration {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: ClusterId::new(record.id.as_str()),
            auto_join_allowed: record.bool_or(FIELD_AUTO_JOIN, false),
            user_config: record.namespaced(NS_USER_CONFIG, record.id.as_str()),
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_AUTO_JOIN, self.auto_join_allowed.to_string());
        record.add_namespaced(NS_USER_CONFIG, &self.user_config);
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// Cluster ///////////////////////////////////////////////////////////////////

/// An immutable point-in-time snapshot of a full cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,
    pub resources: BTreeMap<ResourceId, Resource>,
    pub participants: BTreeMap<ParticipantId, Participant>,
    /// Holds a single entry for the leader, if one is present.
    pub controllers: BTreeMap<ControllerId, Controller>,
    pub leader_id: Option<ControllerId>,
    pub constraints: BTreeMap<ConstraintType, ClusterConstraints>,
    pub state_models: BTreeMap<StateModelDefId, StateModelDefinition>,
    pub contexts: BTreeMap<ContextId, ControllerContext>,
    pub user_config: UserConfig,
    pub paused: bool,
    pub auto_join_allowed: bool,
}

impl Cluster {
    /// Rebuild the configuration this snapshot corresponds to.
    pub fn config(&self) -> ClusterConfig {
        ClusterConfig {
            id: self.id.clone(),
            resources: self.resources.iter().map(|(id, res)| (id.clone(), res.config.clone())).collect(),
            participants: self.participants.iter().map(|(id, p)| (id.clone(), p.config.clone())).collect(),
            constraints: self.constraints.clone(),
            state_models: self.state_models.clone(),
            user_config: self.user_config.clone(),
            paused: self.paused,
            auto_join_allowed: self.auto_join_allowed,
        }
    }

    /// The leader controller, if any.
    pub fn leader(&self) -> Option<&Controller> {
        self.leader_id.as_ref().and_then(|id| self.controllers.get(id))
    }

    /// The participants which currently have a live session.
    pub fn live_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values().filter(|p| p.is_alive())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn delta_merges_only_basic_fields() {
        let orig = ClusterConfig::new(ClusterId::new("c0"))
            .with_state_model(StateModelDefinition::online_offline())
            .with_constraint(ConstraintType::StateConstraint, ConstraintId::new("a"), ConstraintItem::new("1"))
            .with_constraint(ConstraintType::StateConstraint, ConstraintId::new("b"), ConstraintItem::new("2"));
        let mut user_config = Record::new("c0");
        user_config.set_simple("k", "v");

        let delta = ClusterConfigDelta::default()
            .set_user_config(user_config.clone())
            .set_auto_join_allowed(true)
            .add_constraint(ConstraintType::MessageConstraint, ConstraintId::new("m"), ConstraintItem::new("3"))
            .remove_constraint(ConstraintType::StateConstraint, ConstraintId::new("a"));
        let out = delta.merge_into(&orig);

        assert_eq!(out.user_config, user_config, "expected user config to be replaced");
        assert!(out.auto_join_allowed, "expected auto join to be enabled");
        assert_eq!(out.state_models, orig.state_models, "expected state models to be untouched by a delta");
        let state = out.constraints.get(&ConstraintType::StateConstraint).map(|c| c.items.len());
        assert_eq!(state, Some(1), "expected one remaining state constraint item");
        assert!(out.constraints.contains_key(&ConstraintType::MessageConstraint), "expected message constraint record to be added");
    }
}
