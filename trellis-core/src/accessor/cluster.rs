use std::collections::BTreeMap;

use super::{ensure_valid_id, ClusterScope, ParticipantAccessor, ResourceAccessor};
use crate::cache::ClusterDataCache;
use crate::error::{AccessError, AccessResult};
use crate::models::{
    Cluster, ClusterConfig, ClusterConfigDelta, ClusterConfiguration, ClusterConstraints, ClusterId, ConstraintId, ConstraintItem, ConstraintType,
    ContextId, Controller, ControllerContext, LiveInstance, Participant, ParticipantConfig, ParticipantId, PauseSignal, Record, Resource,
    ResourceConfig, ResourceId, StateModelDefId, StateModelDefinition, StoreModel, UserConfig,
};
use crate::source::{read_model, DataSource};
use crate::store::{Durability, StoreHandle};

/// The top-level accessor of one cluster.
///
/// Composes the entity accessors and a `ClusterDataCache`. Operations which refresh the cache
/// take `&mut self`; an accessor must not be shared across concurrent callers without external
/// synchronization.
pub struct ClusterAccessor {
    scope: ClusterScope,
    resources: ResourceAccessor,
    participants: ParticipantAccessor,
    cache: ClusterDataCache,
}

impl ClusterAccessor {
    /// Create a new accessor of the given cluster.
    pub fn new(cluster_id: ClusterId, store: StoreHandle) -> Self {
        let scope = ClusterScope::new(cluster_id, store);
        let cache = ClusterDataCache::new(scope.paths.clone());
        Self { resources: ResourceAccessor::new(scope.clone()), participants: ParticipantAccessor::new(scope.clone()), cache, scope }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.scope.cluster_id
    }

    /// The accessor of this cluster's resources.
    pub fn resource_accessor(&self) -> &ResourceAccessor {
        &self.resources
    }

    /// The accessor of this cluster's participants.
    pub fn participant_accessor(&self) -> &ParticipantAccessor {
        &self.participants
    }

    ////////////////////////////////////////////////////////////////////////////
    // Cluster ////////////////////////////////////////////////////////////////

    /// Create the cluster along with every entity of the given config.
    ///
    /// Fails if a cluster with a valid structure already exists. Otherwise any stale partial
    /// structure is cleared and rebuilt, then state model definitions, resources, participants,
    /// constraints and finally the cluster-level config are written, in that order.
    #[tracing::instrument(level = "debug", skip(self, config), fields(cluster = %self.scope.cluster_id))]
    pub fn create_cluster(&self, config: &ClusterConfig) -> AccessResult<()> {
        self.scope.observe("create_cluster", self.create_inner(config))
    }

    fn create_inner(&self, config: &ClusterConfig) -> AccessResult<()> {
        ensure_valid_id("cluster", self.scope.cluster_id.as_str())?;
        if config.id != self.scope.cluster_id {
            return Err(AccessError::InvariantViolated(format!("config of cluster {} given to accessor of cluster {}", config.id, self.scope.cluster_id)));
        }
        let (store, paths) = (&self.scope.store, &self.scope.paths);
        if self.scope.exists(&paths.cluster_config())? && self.scope.is_structure_valid()? {
            return Err(AccessError::AlreadyExists(format!("cluster already exists under {}", paths.cluster())));
        }

        self.clear_cluster_structure()?;
        self.init_cluster_structure()?;
        for def in config.state_models.values() {
            self.add_state_model_inner(def)?;
        }
        for resource in config.resources.values() {
            self.resources.add_inner(resource)?;
        }
        for participant in config.participants.values() {
            self.participants.add_inner(participant)?;
        }
        for constraints in config.constraints.values() {
            store.set(&paths.constraint(constraints.constraint_type), constraints.to_record())?;
        }
        let configuration = ClusterConfiguration {
            id: self.scope.cluster_id.clone(),
            auto_join_allowed: config.auto_join_allowed,
            user_config: config.user_config.clone(),
        };
        store.set(&paths.cluster_config(), configuration.to_record())?;
        if config.paused {
            self.pause_inner()?;
        }
        tracing::info!(
            resources = config.resources.len(),
            participants = config.participants.len(),
            state_models = config.state_models.len(),
            "cluster created"
        );
        Ok(())
    }

    /// Apply the given delta to the cluster's basic config: user config, auto-join and constraints.
    ///
    /// Returns the resulting config.
    #[tracing::instrument(level = "debug", skip(self, delta), fields(cluster = %self.scope.cluster_id))]
    pub fn update_cluster(&mut self, delta: &ClusterConfigDelta) -> AccessResult<ClusterConfig> {
        let res = self.update_inner(delta);
        self.scope.observe("update_cluster", res)
    }

    fn update_inner(&mut self, delta: &ClusterConfigDelta) -> AccessResult<ClusterConfig> {
        let cluster = self.read_cluster_inner()?;
        let config = delta.merge_into(&cluster.config());
        self.set_basic_cluster_config(&config)?;
        Ok(config)
    }

    /// Persist the cluster-level fields of the given config, never its resources or participants.
    fn set_basic_cluster_config(&self, config: &ClusterConfig) -> AccessResult<()> {
        let (store, paths) = (&self.scope.store, &self.scope.paths);
        let configuration =
            ClusterConfiguration { id: config.id.clone(), auto_join_allowed: config.auto_join_allowed, user_config: config.user_config.clone() };
        store.set(&paths.cluster_config(), configuration.to_record())?;
        for constraints in config.constraints.values() {
            store.set(&paths.constraint(constraints.constraint_type), constraints.to_record())?;
        }
        Ok(())
    }

    /// Drop the cluster and its entire subtree.
    ///
    /// Fails while any participant is live or a leader is present.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn drop_cluster(&self) -> AccessResult<()> {
        self.scope.observe("drop_cluster", self.drop_inner())
    }

    fn drop_inner(&self) -> AccessResult<()> {
        let (store, paths) = (&self.scope.store, &self.scope.paths);
        let live = store.list_children(&paths.live_instances())?;
        if !live.is_empty() {
            return Err(AccessError::InvariantViolated(format!(
                "can not drop cluster {} while participants are live: {:?}",
                self.scope.cluster_id, live
            )));
        }
        if self.scope.exists(&paths.leader())? {
            return Err(AccessError::InvariantViolated(format!("can not drop cluster {} while a leader is present", self.scope.cluster_id)));
        }
        if !store.remove(paths.cluster())? {
            return Err(AccessError::NotFound(format!("cluster {} does not exist", self.scope.cluster_id)));
        }
        tracing::info!("cluster dropped");
        Ok(())
    }

    /// Read a full snapshot of the cluster.
    ///
    /// Refreshes the cache, then assembles the snapshot from it. Fails if the cluster's
    /// structure is not valid.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn read_cluster(&mut self) -> AccessResult<Cluster> {
        let res = self.read_cluster_inner();
        self.scope.observe("read_cluster", res)
    }

    fn read_cluster_inner(&mut self) -> AccessResult<Cluster> {
        self.scope.ensure_structure()?;
        self.cache.refresh(self.scope.store.as_ref())?;
        let cache = &self.cache;

        let leader = cache.leader().cloned().map(Controller::leader);
        let leader_id = leader.as_ref().map(|leader| leader.id.clone());
        let controllers = leader.into_iter().map(|leader| (leader.id.clone(), leader)).collect();
        let (user_config, auto_join_allowed) = match cache.cluster_config() {
            Some(conf) => (conf.user_config.clone(), conf.auto_join_allowed),
            None => (Record::new(self.scope.cluster_id.as_str()), false),
        };
        Ok(Cluster {
            id: self.scope.cluster_id.clone(),
            resources: self.resources.read_resources(cache)?,
            participants: self.participants.read_participants(cache)?,
            controllers,
            leader_id,
            constraints: cache.constraints().clone(),
            state_models: cache.state_model_defs()?,
            contexts: cache.controller_contexts()?,
            user_config,
            paused: cache.is_paused(),
            auto_join_allowed,
        })
    }

    /// Check if every required path of the cluster exists.
    pub fn is_cluster_structure_valid(&self) -> bool {
        match self.scope.is_structure_valid() {
            Ok(valid) => valid,
            Err(err) => {
                tracing::error!(cluster = %self.scope.cluster_id, error = ?err, "error checking cluster structure");
                false
            }
        }
    }

    /// Create every required path of the cluster which does not yet exist.
    pub fn init_cluster_structure(&self) -> AccessResult<()> {
        for path in self.scope.paths.required_cluster_paths() {
            self.scope.store.create(&path, None, Durability::Persistent)?;
        }
        Ok(())
    }

    /// Remove every required path of the cluster.
    pub fn clear_cluster_structure(&self) -> AccessResult<()> {
        self.scope.store.remove_all(&self.scope.paths.required_cluster_paths())?;
        Ok(())
    }

    /// Check the cluster's structure for an uncached read, logging when it is not valid.
    fn structure_valid_for_read(&self, op: &'static str) -> AccessResult<bool> {
        let valid = self.scope.is_structure_valid()?;
        if !valid {
            tracing::error!(cluster = %self.scope.cluster_id, op, "cluster is not set up, returning an empty read");
        }
        Ok(valid)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Pause //////////////////////////////////////////////////////////////////

    /// Pause the cluster by creating its pause signal.
    ///
    /// Returns the result of the store write, `false` if the cluster is already paused.
    pub fn pause_cluster(&self) -> AccessResult<bool> {
        self.scope.observe("pause_cluster", self.pause_inner())
    }

    fn pause_inner(&self) -> AccessResult<bool> {
        let created = self.scope.store.create(&self.scope.paths.pause(), Some(PauseSignal::default().to_record()), Durability::Persistent)?;
        Ok(created)
    }

    /// Resume the cluster by removing its pause signal.
    ///
    /// Returns the result of the store removal, `false` if the cluster was not paused.
    pub fn resume_cluster(&self) -> AccessResult<bool> {
        let res = self.scope.store.remove(&self.scope.paths.pause());
        self.scope.observe("resume_cluster", res.map_err(AccessError::from))
    }

    ////////////////////////////////////////////////////////////////////////////
    // Resources & Participants ///////////////////////////////////////////////

    pub fn add_resource(&self, config: &ResourceConfig) -> AccessResult<()> {
        self.resources.add_resource(config)
    }

    pub fn drop_resource(&self, id: &ResourceId) -> AccessResult<()> {
        self.resources.drop_resource(id)
    }

    pub fn read_resource(&self, id: &ResourceId) -> AccessResult<Option<Resource>> {
        self.resources.read_resource(id)
    }

    /// Read every resource straight from the store, empty if the cluster is not set up.
    pub fn read_resources(&self) -> AccessResult<BTreeMap<ResourceId, Resource>> {
        if !self.structure_valid_for_read("read_resources")? {
            return Ok(Default::default());
        }
        let res = self.resources.read_resources(&self.scope.source());
        self.scope.observe("read_resources", res)
    }

    pub fn add_participant(&self, config: &ParticipantConfig) -> AccessResult<()> {
        self.participants.add_participant(config)
    }

    pub fn drop_participant(&self, id: &ParticipantId) -> AccessResult<()> {
        self.participants.drop_participant(id)
    }

    pub fn read_participant(&self, id: &ParticipantId) -> AccessResult<Option<Participant>> {
        self.participants.read_participant(id)
    }

    /// Read every participant straight from the store, empty if the cluster is not set up.
    pub fn read_participants(&self) -> AccessResult<BTreeMap<ParticipantId, Participant>> {
        if !self.structure_valid_for_read("read_participants")? {
            return Ok(Default::default());
        }
        let res = self.participants.read_participants(&self.scope.source());
        self.scope.observe("read_participants", res)
    }

    ////////////////////////////////////////////////////////////////////////////
    // State Models ///////////////////////////////////////////////////////////

    /// Add a state model definition, failing if one already exists under its ID.
    #[tracing::instrument(level = "debug", skip(self, def), fields(cluster = %self.scope.cluster_id, state_model = %def.id))]
    pub fn add_state_model_definition(&self, def: &StateModelDefinition) -> AccessResult<()> {
        self.scope.observe("add_state_model_definition", self.add_state_model_inner(def))
    }

    fn add_state_model_inner(&self, def: &StateModelDefinition) -> AccessResult<()> {
        ensure_valid_id("state model", def.id.as_str())?;
        def.validate().map_err(|err| AccessError::InvariantViolated(format!("state model {}: {}", def.id, err)))?;
        self.scope.ensure_structure()?;
        if !self.scope.store.create(&self.scope.paths.state_model_def(&def.id), Some(def.to_record()), Durability::Persistent)? {
            return Err(AccessError::AlreadyExists(format!("state model {} already exists", def.id)));
        }
        Ok(())
    }

    /// Drop a state model definition, failing if it does not exist.
    pub fn drop_state_model_definition(&self, id: &StateModelDefId) -> AccessResult<()> {
        let res = match self.scope.store.remove(&self.scope.paths.state_model_def(id)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AccessError::NotFound(format!("state model {} does not exist", id))),
            Err(err) => Err(err.into()),
        };
        self.scope.observe("drop_state_model_definition", res)
    }

    /// Read every state model definition straight from the store, empty if the cluster is not set up.
    pub fn read_state_model_definitions(&self) -> AccessResult<BTreeMap<StateModelDefId, StateModelDefinition>> {
        if !self.structure_valid_for_read("read_state_model_definitions")? {
            return Ok(Default::default());
        }
        let res = self.scope.source().state_model_defs().map_err(AccessError::from);
        self.scope.observe("read_state_model_definitions", res)
    }

    ////////////////////////////////////////////////////////////////////////////
    // Constraints ////////////////////////////////////////////////////////////

    /// Read the constraints of the given type.
    pub fn read_constraints(&self, constraint_type: ConstraintType) -> AccessResult<Option<ClusterConstraints>> {
        let res = read_model(self.scope.store.as_ref(), &self.scope.paths.constraint(constraint_type)).map_err(AccessError::from);
        self.scope.observe("read_constraints", res)
    }

    /// Insert or replace a single constraint item, creating the constraint record when absent.
    #[tracing::instrument(level = "debug", skip(self, item), fields(cluster = %self.scope.cluster_id))]
    pub fn add_constraint(&self, constraint_type: ConstraintType, id: &ConstraintId, item: &ConstraintItem) -> AccessResult<()> {
        self.scope.observe("add_constraint", self.add_constraint_inner(constraint_type, id, item))
    }

    fn add_constraint_inner(&self, constraint_type: ConstraintType, id: &ConstraintId, item: &ConstraintItem) -> AccessResult<()> {
        ensure_valid_id("constraint", id.as_str())?;
        self.scope.ensure_structure()?;
        self.scope.store.update(&self.scope.paths.constraint(constraint_type), &|record| {
            let mut constraints = record.and_then(|rec| ClusterConstraints::from_record(&rec)).unwrap_or_else(|| ClusterConstraints::new(constraint_type));
            constraints.add_item(id.clone(), item.clone());
            Some(constraints.to_record())
        })?;
        Ok(())
    }

    /// Remove a single constraint item, failing if the record or the item does not exist.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn remove_constraint(&self, constraint_type: ConstraintType, id: &ConstraintId) -> AccessResult<()> {
        self.scope.observe("remove_constraint", self.remove_constraint_inner(constraint_type, id))
    }

    fn remove_constraint_inner(&self, constraint_type: ConstraintType, id: &ConstraintId) -> AccessResult<()> {
        self.scope.ensure_structure()?;
        let path = self.scope.paths.constraint(constraint_type);
        if !self.scope.exists(&path)? {
            return Err(AccessError::NotFound(format!("no {} constraints exist", constraint_type)));
        }
        let removed = self.scope.store.update(&path, &|record| {
            let mut constraints = ClusterConstraints::from_record(&record?)?;
            constraints.remove_item(id)?;
            Some(constraints.to_record())
        })?;
        if !removed {
            return Err(AccessError::NotFound(format!("constraint {} of type {} does not exist", id, constraint_type)));
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // User Config ////////////////////////////////////////////////////////////

    /// Read the cluster-level user config, if the cluster config exists.
    pub fn read_user_config(&self) -> AccessResult<Option<UserConfig>> {
        let res = read_model::<ClusterConfiguration>(self.scope.store.as_ref(), &self.scope.paths.cluster_config())
            .map(|conf| conf.map(|conf| conf.user_config))
            .map_err(AccessError::from);
        self.scope.observe("read_user_config", res)
    }

    /// Replace the cluster-level user config.
    pub fn set_user_config(&mut self, user_config: UserConfig) -> AccessResult<()> {
        self.update_cluster(&ClusterConfigDelta::default().set_user_config(user_config)).map(|_| ())
    }

    /// Replace the cluster-level user config with an empty one.
    pub fn drop_user_config(&mut self) -> AccessResult<()> {
        let empty = Record::new(self.scope.cluster_id.as_str());
        self.set_user_config(empty)
    }

    /// Merge the given keys into the cluster-level user config.
    #[tracing::instrument(level = "debug", skip(self, user_config), fields(cluster = %self.scope.cluster_id))]
    pub fn update_user_config(&self, user_config: &UserConfig) -> AccessResult<()> {
        self.scope.observe("update_user_config", self.update_user_config_inner(user_config))
    }

    fn update_user_config_inner(&self, user_config: &UserConfig) -> AccessResult<()> {
        self.scope.ensure_structure()?;
        let cluster_id = &self.scope.cluster_id;
        self.scope.store.update(&self.scope.paths.cluster_config(), &|record| {
            let mut conf = record.and_then(|rec| ClusterConfiguration::from_record(&rec)).unwrap_or_else(|| ClusterConfiguration {
                id: cluster_id.clone(),
                auto_join_allowed: false,
                user_config: Record::new(cluster_id.as_str()),
            });
            conf.user_config.merge(user_config);
            Some(conf.to_record())
        })?;
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////////////
    // Controllers ////////////////////////////////////////////////////////////

    /// Read the leader controller, if one is present.
    pub fn read_leader(&self) -> AccessResult<Option<Controller>> {
        let res = read_model::<LiveInstance>(self.scope.store.as_ref(), &self.scope.paths.leader())
            .map(|leader| leader.map(Controller::leader))
            .map_err(AccessError::from);
        self.scope.observe("read_leader", res)
    }

    /// Persist a controller context, replacing any prior context under the same ID.
    pub fn add_controller_context(&self, context: &ControllerContext) -> AccessResult<()> {
        self.scope.observe("add_controller_context", self.add_context_inner(context))
    }

    fn add_context_inner(&self, context: &ControllerContext) -> AccessResult<()> {
        ensure_valid_id("controller context", context.id.as_str())?;
        self.scope.ensure_structure()?;
        self.scope.store.set(&self.scope.paths.controller_context(&context.id), context.to_record())?;
        Ok(())
    }

    /// Drop a controller context, failing if it does not exist.
    pub fn drop_controller_context(&self, id: &ContextId) -> AccessResult<()> {
        let res = match self.scope.store.remove(&self.scope.paths.controller_context(id)) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AccessError::NotFound(format!("controller context {} does not exist", id))),
            Err(err) => Err(err.into()),
        };
        self.scope.observe("drop_controller_context", res)
    }

    /// Read every controller context straight from the store, empty if the cluster is not set up.
    pub fn read_controller_contexts(&self) -> AccessResult<BTreeMap<ContextId, ControllerContext>> {
        if !self.structure_valid_for_read("read_controller_contexts")? {
            return Ok(Default::default());
        }
        let res = self.scope.source().controller_contexts().map_err(AccessError::from);
        self.scope.observe("read_controller_contexts", res)
    }
}
