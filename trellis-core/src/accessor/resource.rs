use std::collections::{BTreeMap, BTreeSet};

use super::{ensure_valid_id, ClusterScope};
use crate::error::{AccessError, AccessResult};
use crate::models::{
    ExternalView, IdealState, Record, Resource, ResourceAssignment, ResourceConfig, ResourceConfiguration, ResourceId, ResourceType, StoreModel,
};
use crate::source::{read_model, DataSource};
use crate::store::Durability;

/// Reads and mutates the resources of a cluster.
#[derive(Clone)]
pub struct ResourceAccessor {
    scope: ClusterScope,
}

impl ResourceAccessor {
    pub fn new(scope: ClusterScope) -> Self {
        Self { scope }
    }

    /// Add a resource to the cluster.
    ///
    /// The resource's state model definition must already exist. The resource's ideal state is
    /// derived from its rebalancer config when possible, otherwise the rebalancer config is
    /// stored opaquely in the resource's configuration node.
    #[tracing::instrument(level = "debug", skip(self, config), fields(cluster = %self.scope.cluster_id, resource = %config.id))]
    pub fn add_resource(&self, config: &ResourceConfig) -> AccessResult<()> {
        self.scope.observe("add_resource", self.add_inner(config))
    }

    pub(crate) fn add_inner(&self, config: &ResourceConfig) -> AccessResult<()> {
        let (store, paths) = (&self.scope.store, &self.scope.paths);
        ensure_valid_id("resource", config.id.as_str())?;
        let rebalancer = config
            .rebalancer_config
            .as_ref()
            .ok_or_else(|| AccessError::InvariantViolated(format!("resource {} has no rebalancer config", config.id)))?;
        self.scope.ensure_structure()?;
        if !self.scope.exists(&paths.state_model_def(&rebalancer.state_model_def_id))? {
            return Err(AccessError::InvariantViolated(format!(
                "state model {} of resource {} does not exist",
                rebalancer.state_model_def_id, config.id
            )));
        }
        let (ideal_path, config_path) = (paths.ideal_state(&config.id), paths.resource_config(&config.id));
        if self.scope.exists(&ideal_path)? || self.scope.exists(&config_path)? {
            return Err(AccessError::AlreadyExists(format!("resource {} already exists", config.id)));
        }

        let ideal_state = rebalancer.to_ideal_state(config.bucket_size, config.batch_message_mode);
        if let Some(ideal_state) = ideal_state.as_ref() {
            if !store.create(&ideal_path, Some(ideal_state.to_record()), Durability::Persistent)? {
                return Err(AccessError::AlreadyExists(format!("ideal state of resource {} already exists", config.id)));
            }
        }
        let configuration = ResourceConfiguration {
            id: config.id.clone(),
            resource_type: config.resource_type,
            user_config: config.user_config.clone().unwrap_or_else(|| Record::new(config.id.as_str())),
            rebalancer_config: match ideal_state {
                Some(_) => None,
                None => Some(rebalancer.clone()),
            },
            provisioner_config: config.provisioner_config.clone(),
        };
        if !store.create(&config_path, Some(configuration.to_record()), Durability::Persistent)? {
            return Err(AccessError::AlreadyExists(format!("configuration of resource {} already exists", config.id)));
        }
        tracing::debug!("resource added");
        Ok(())
    }

    /// Drop a resource from the cluster, removing its ideal state and configuration.
    ///
    /// Fails with `NotFound` if the resource has no ideal state, unless its configuration holds
    /// the opaque rebalancer config of a user defined rebalancer. Such resources never get an
    /// ideal state and are dropped through their configuration alone.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn drop_resource(&self, id: &ResourceId) -> AccessResult<()> {
        self.scope.observe("drop_resource", self.drop_inner(id))
    }

    fn drop_inner(&self, id: &ResourceId) -> AccessResult<()> {
        let (store, paths) = (&self.scope.store, &self.scope.paths);
        let ideal_path = paths.ideal_state(id);
        let config_path = paths.resource_config(id);
        let has_ideal = self.scope.exists(&ideal_path)?;
        // Resources placed by a user defined rebalancer have only a configuration node.
        let has_opaque_config = !has_ideal
            && read_model::<ResourceConfiguration>(store.as_ref(), &config_path)?
                .map(|conf| conf.has_rebalancer_config())
                .unwrap_or(false);
        if !has_ideal && !has_opaque_config {
            return Err(AccessError::NotFound(format!("resource {} has no ideal state", id)));
        }
        store.remove_all(&[ideal_path, config_path])?;
        tracing::debug!("resource dropped");
        Ok(())
    }

    /// Read a single resource straight from the store.
    pub fn read_resource(&self, id: &ResourceId) -> AccessResult<Option<Resource>> {
        self.scope.observe("read_resource", self.read_inner(id))
    }

    fn read_inner(&self, id: &ResourceId) -> AccessResult<Option<Resource>> {
        let (store, paths) = (self.scope.store.as_ref(), &self.scope.paths);
        self.scope.ensure_structure()?;
        let ideal_state: Option<IdealState> = read_model(store, &paths.ideal_state(id))?;
        let configuration: Option<ResourceConfiguration> = read_model(store, &paths.resource_config(id))?;
        if ideal_state.is_none() && configuration.is_none() {
            return Ok(None);
        }
        let external_view = read_model(store, &paths.external_view(id))?;
        let assignment = read_model(store, &paths.resource_assignment(id))?;
        Ok(Some(build_resource(id.clone(), ideal_state, configuration, external_view, assignment)))
    }

    /// Read every resource from the given source.
    ///
    /// External views and assignments are only present when the source provides them; a
    /// snapshot source skips them unless a user defined rebalancer requires them.
    pub fn read_resources(&self, source: &dyn DataSource) -> AccessResult<BTreeMap<ResourceId, Resource>> {
        let mut ideal_states = source.ideal_states()?;
        let mut configurations = source.resource_configs()?;
        let mut external_views = source.external_views()?;
        let mut assignments = source.resource_assignments()?;
        let ids: BTreeSet<ResourceId> = ideal_states.keys().chain(configurations.keys()).cloned().collect();
        let resources = ids
            .into_iter()
            .map(|id| {
                let resource = build_resource(
                    id.clone(),
                    ideal_states.remove(&id),
                    configurations.remove(&id),
                    external_views.remove(&id),
                    assignments.remove(&id),
                );
                (id, resource)
            })
            .collect();
        Ok(resources)
    }
}

/// Assemble a resource snapshot, re-deriving its rebalancer config from whichever record holds it.
fn build_resource(
    id: ResourceId, ideal_state: Option<IdealState>, configuration: Option<ResourceConfiguration>, external_view: Option<ExternalView>,
    assignment: Option<ResourceAssignment>,
) -> Resource {
    let rebalancer_config = ideal_state
        .as_ref()
        .map(|ideal| ideal.rebalancer.clone())
        .or_else(|| configuration.as_ref().and_then(|conf| conf.rebalancer_config.clone()));
    let (resource_type, user_config, provisioner_config) = match configuration {
        Some(conf) => (conf.resource_type, Some(conf.user_config), conf.provisioner_config),
        None => (ResourceType::Data, None, None),
    };
    let config = ResourceConfig {
        id,
        resource_type,
        rebalancer_config,
        user_config,
        provisioner_config,
        bucket_size: ideal_state.as_ref().map(|ideal| ideal.bucket_size).unwrap_or(0),
        batch_message_mode: ideal_state.as_ref().map(|ideal| ideal.batch_message_mode).unwrap_or(false),
    };
    Resource { config, ideal_state, external_view, assignment }
}
