use std::collections::BTreeMap;

use super::{ensure_valid_id, ClusterScope};
use crate::error::{AccessError, AccessResult};
use crate::models::{LiveInstance, Message, MessageId, Participant, ParticipantConfig, ParticipantId, StoreModel};
use crate::source::{read_model, DataSource};
use crate::store::Durability;

/// Reads and mutates the participants of a cluster.
#[derive(Clone)]
pub struct ParticipantAccessor {
    scope: ClusterScope,
}

impl ParticipantAccessor {
    pub fn new(scope: ClusterScope) -> Self {
        Self { scope }
    }

    /// Check if every required path of the given participant exists.
    pub fn is_participant_structure_valid(&self, id: &ParticipantId) -> AccessResult<bool> {
        let exists = self.scope.store.exists(&self.scope.paths.required_participant_paths(id))?;
        Ok(exists.into_iter().all(|exists| exists))
    }

    /// Create every required path of the given participant which does not yet exist.
    pub fn init_participant_structure(&self, id: &ParticipantId) -> AccessResult<()> {
        for path in self.scope.paths.required_participant_paths(id) {
            self.scope.store.create(&path, None, Durability::Persistent)?;
        }
        Ok(())
    }

    /// Remove the whole instance subtree of the given participant.
    pub fn clear_participant_structure(&self, id: &ParticipantId) -> AccessResult<()> {
        self.scope.store.remove(&self.scope.paths.instance(id))?;
        Ok(())
    }

    /// Add a participant to the cluster.
    ///
    /// Any stale instance subtree of the participant is cleared and rebuilt.
    #[tracing::instrument(level = "debug", skip(self, config), fields(cluster = %self.scope.cluster_id, participant = %config.id))]
    pub fn add_participant(&self, config: &ParticipantConfig) -> AccessResult<()> {
        self.scope.observe("add_participant", self.add_inner(config))
    }

    pub(crate) fn add_inner(&self, config: &ParticipantConfig) -> AccessResult<()> {
        ensure_valid_id("participant", config.id.as_str())?;
        self.scope.ensure_structure()?;
        let config_path = self.scope.paths.participant_config(&config.id);
        if self.scope.exists(&config_path)? && self.is_participant_structure_valid(&config.id)? {
            return Err(AccessError::AlreadyExists(format!("participant {} already exists", config.id)));
        }
        self.clear_participant_structure(&config.id)?;
        self.init_participant_structure(&config.id)?;
        self.scope.store.set(&config_path, config.to_record())?;
        tracing::debug!("participant added");
        Ok(())
    }

    /// Drop a participant from the cluster, removing its config and instance subtree.
    ///
    /// A live participant can not be dropped.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn drop_participant(&self, id: &ParticipantId) -> AccessResult<()> {
        self.scope.observe("drop_participant", self.drop_inner(id))
    }

    fn drop_inner(&self, id: &ParticipantId) -> AccessResult<()> {
        let paths = &self.scope.paths;
        let (config_path, instance_path) = (paths.participant_config(id), paths.instance(id));
        if !self.scope.exists(&config_path)? {
            return Err(AccessError::NotFound(format!("config for participant {} does not exist", id)));
        }
        if !self.scope.exists(&instance_path)? {
            return Err(AccessError::NotFound(format!("participant {} does not exist", id)));
        }
        if self.scope.exists(&paths.live_instance(id))? {
            return Err(AccessError::InvariantViolated(format!("participant {} is still alive, can not drop", id)));
        }
        self.scope.store.remove_all(&[config_path, instance_path])?;
        tracing::debug!("participant dropped");
        Ok(())
    }

    /// Enable or disable a participant.
    #[tracing::instrument(level = "debug", skip(self), fields(cluster = %self.scope.cluster_id))]
    pub fn enable_participant(&self, id: &ParticipantId, enabled: bool) -> AccessResult<()> {
        self.scope.observe("enable_participant", self.enable_inner(id, enabled))
    }

    fn enable_inner(&self, id: &ParticipantId, enabled: bool) -> AccessResult<()> {
        let written = self.scope.store.update(&self.scope.paths.participant_config(id), &|record| {
            let mut config = ParticipantConfig::from_record(&record?)?;
            config.enabled = enabled;
            Some(config.to_record())
        })?;
        if !written {
            return Err(AccessError::NotFound(format!("config for participant {} does not exist", id)));
        }
        Ok(())
    }

    /// Insert messages into the queue of the given participant.
    ///
    /// Messages are only consumed by the participant session they are addressed to.
    #[tracing::instrument(level = "debug", skip(self, messages), fields(cluster = %self.scope.cluster_id))]
    pub fn insert_messages(&self, id: &ParticipantId, messages: &[Message]) -> AccessResult<()> {
        self.scope.observe("insert_messages", self.insert_inner(id, messages))
    }

    fn insert_inner(&self, id: &ParticipantId, messages: &[Message]) -> AccessResult<()> {
        if !self.is_participant_structure_valid(id)? {
            return Err(AccessError::InvalidStructure(format!("participant {} is not set up", id)));
        }
        for msg in messages {
            self.scope.store.set(&self.scope.paths.message(id, &msg.id), msg.to_record())?;
        }
        Ok(())
    }

    /// Remove messages from the queue of the given participant.
    pub fn delete_messages(&self, id: &ParticipantId, message_ids: &[MessageId]) -> AccessResult<()> {
        let paths: Vec<String> = message_ids.iter().map(|msg| self.scope.paths.message(id, msg)).collect();
        let res = self.scope.store.remove_all(&paths).map(|_| ()).map_err(AccessError::from);
        self.scope.observe("delete_messages", res)
    }

    /// Read a single participant straight from the store.
    pub fn read_participant(&self, id: &ParticipantId) -> AccessResult<Option<Participant>> {
        self.scope.observe("read_participant", self.read_inner(id))
    }

    fn read_inner(&self, id: &ParticipantId) -> AccessResult<Option<Participant>> {
        let store = self.scope.store.as_ref();
        let config: ParticipantConfig = match read_model(store, &self.scope.paths.participant_config(id))? {
            Some(config) => config,
            None => return Ok(None),
        };
        let live_instance: Option<LiveInstance> = read_model(store, &self.scope.paths.live_instance(id))?;
        Ok(Some(build_participant(&self.scope.source(), config, live_instance)?))
    }

    /// Read every participant from the given source.
    ///
    /// Messages and current states are only read for live participants, and current states only
    /// for their live session.
    pub fn read_participants(&self, source: &dyn DataSource) -> AccessResult<BTreeMap<ParticipantId, Participant>> {
        let mut live_instances = source.live_instances()?;
        let mut participants = BTreeMap::new();
        for (id, config) in source.participant_configs()? {
            let participant = build_participant(source, config, live_instances.remove(&id))?;
            participants.insert(id, participant);
        }
        Ok(participants)
    }
}

fn build_participant(source: &dyn DataSource, config: ParticipantConfig, live_instance: Option<LiveInstance>) -> AccessResult<Participant> {
    let (messages, current_states) = match live_instance.as_ref() {
        Some(live) => (source.messages(&config.id)?, source.current_states(&config.id, &live.session_id)?),
        None => Default::default(),
    };
    Ok(Participant { config, live_instance, messages, current_states })
}
