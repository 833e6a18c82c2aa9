//! Participant models.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::ids::{MessageId, ParticipantId, PartitionId, ResourceId, SessionId, StateModelDefId};
use crate::models::record::{Record, StoreModel, UserConfig};
use crate::models::resource::NS_USER_CONFIG;

const FIELD_HOST: &str = "HELIX_HOST";
const FIELD_PORT: &str = "HELIX_PORT";
const FIELD_ENABLED: &str = "HELIX_ENABLED";
const FIELD_TAGS: &str = "TAG_LIST";
const FIELD_DISABLED_PARTITIONS: &str = "HELIX_DISABLED_PARTITION";
const FIELD_SESSION_ID: &str = "SESSION_ID";
const FIELD_LIVE_SINCE: &str = "LIVE_SINCE";
const FIELD_MSG_TYPE: &str = "MSG_TYPE";
const FIELD_SRC: &str = "SRC_NAME";
const FIELD_TGT: &str = "TGT_NAME";
const FIELD_TGT_SESSION: &str = "TGT_SESSION_ID";
const FIELD_RESOURCE: &str = "RESOURCE_NAME";
const FIELD_PARTITION: &str = "PARTITION_NAME";
const FIELD_FROM_STATE: &str = "FROM_STATE";
const FIELD_TO_STATE: &str = "TO_STATE";
const FIELD_STATE_MODEL_DEF: &str = "STATE_MODEL_DEF";
const FIELD_CREATE_TS: &str = "CREATE_TIMESTAMP";
const FIELD_CURRENT_STATE: &str = "CURRENT_STATE";

/// The message type of a replica state transition request.
pub const MSG_TYPE_STATE_TRANSITION: &str = "STATE_TRANSITION";

/// Build a participant ID out of a host and port, the conventional form used by auto-join.
pub fn participant_id_from_host_port(host: &str, port: u16) -> ParticipantId {
    ParticipantId::new(format!("{}_{}", host, port))
}

//////////////////////////////////////////////////////////////////////////////
// ParticipantConfig /////////////////////////////////////////////////////////

/// The static configuration of a participant, persisted as its instance config.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantConfig {
    pub id: ParticipantId,
    pub host_name: String,
    pub port: u16,
    /// A disabled participant is never assigned replicas.
    pub enabled: bool,
    pub tags: BTreeSet<String>,
    /// Partitions which may not be placed on this participant.
    pub disabled_partitions: BTreeSet<PartitionId>,
    pub user_config: UserConfig,
}

impl ParticipantConfig {
    /// Create a new enabled participant config.
    pub fn new(id: ParticipantId, host_name: impl Into<String>, port: u16) -> Self {
        let user_config = Record::new(id.as_str());
        Self { id, host_name: host_name.into(), port, enabled: true, tags: Default::default(), disabled_partitions: Default::default(), user_config }
    }
}

impl StoreModel for ParticipantConfig {
    fn from_record(record: &Record) -> Option<Self> {
        let id = ParticipantId::new(record.id.as_str());
        Some(Self {
            host_name: record.simple(FIELD_HOST)?.to_string(),
            port: record.parsed(FIELD_PORT)?,
            enabled: record.bool_or(FIELD_ENABLED, true),
            tags: record.list(FIELD_TAGS).iter().cloned().collect(),
            disabled_partitions: record.list(FIELD_DISABLED_PARTITIONS).iter().map(|p| PartitionId::new(p.as_str())).collect(),
            user_config: record.namespaced(NS_USER_CONFIG, id.as_str()),
            id,
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_HOST, self.host_name.as_str());
        record.set_simple(FIELD_PORT, self.port.to_string());
        record.set_simple(FIELD_ENABLED, self.enabled.to_string());
        record.list_fields.insert(FIELD_TAGS.into(), self.tags.iter().cloned().collect());
        record
            .list_fields
            .insert(FIELD_DISABLED_PARTITIONS.into(), self.disabled_partitions.iter().map(|p| p.to_string()).collect());
        record.add_namespaced(NS_USER_CONFIG, &self.user_config);
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// LiveInstance //////////////////////////////////////////////////////////////

/// The ephemeral record whose presence means a participant or controller is connected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveInstance {
    /// The ID of the participant or controller which owns this record.
    pub id: String,
    pub session_id: SessionId,
    pub host: String,
    /// Unix timestamp of when the owning session was established.
    pub live_since: i64,
}

impl LiveInstance {
    /// Create a new live instance record stamped with the current time.
    pub fn new(id: impl Into<String>, session_id: SessionId, host: impl Into<String>) -> Self {
        Self { id: id.into(), session_id, host: host.into(), live_since: time::OffsetDateTime::now_utc().unix_timestamp() }
    }
}

impl StoreModel for LiveInstance {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: record.id.clone(),
            session_id: SessionId::new(record.simple(FIELD_SESSION_ID)?),
            host: record.simple(FIELD_HOST).unwrap_or_default().to_string(),
            live_since: record.parsed(FIELD_LIVE_SINCE).unwrap_or(0),
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_SESSION_ID, self.session_id.as_str());
        record.set_simple(FIELD_HOST, self.host.as_str());
        record.set_simple(FIELD_LIVE_SINCE, self.live_since.to_string());
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// Message ///////////////////////////////////////////////////////////////////

/// A transition request addressed to one session of a participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub msg_type: String,
    pub src: String,
    pub tgt: ParticipantId,
    /// Messages addressed to any other session of the target are stale and ignored.
    pub tgt_session: SessionId,
    pub resource_id: ResourceId,
    pub partition_id: PartitionId,
    pub from_state: String,
    pub to_state: String,
    pub state_model_def_id: StateModelDefId,
    pub create_ts: i64,
}

impl Message {
    /// Create a new state transition message.
    #[allow(clippy::too_many_arguments)]
    pub fn state_transition(
        src: impl Into<String>, tgt: ParticipantId, tgt_session: SessionId, resource_id: ResourceId, partition_id: PartitionId,
        state_model_def_id: StateModelDefId, from_state: impl Into<String>, to_state: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            msg_type: MSG_TYPE_STATE_TRANSITION.into(),
            src: src.into(),
            tgt,
            tgt_session,
            resource_id,
            partition_id,
            from_state: from_state.into(),
            to_state: to_state.into(),
            state_model_def_id,
            create_ts: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }
}

impl StoreModel for Message {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            id: MessageId::new(record.id.as_str()),
            msg_type: record.simple(FIELD_MSG_TYPE)?.to_string(),
            src: record.simple(FIELD_SRC).unwrap_or_default().to_string(),
            tgt: ParticipantId::new(record.simple(FIELD_TGT)?),
            tgt_session: SessionId::new(record.simple(FIELD_TGT_SESSION)?),
            resource_id: ResourceId::new(record.simple(FIELD_RESOURCE)?),
            partition_id: PartitionId::new(record.simple(FIELD_PARTITION)?),
            from_state: record.simple(FIELD_FROM_STATE)?.to_string(),
            to_state: record.simple(FIELD_TO_STATE)?.to_string(),
            state_model_def_id: StateModelDefId::new(record.simple(FIELD_STATE_MODEL_DEF)?),
            create_ts: record.parsed(FIELD_CREATE_TS).unwrap_or(0),
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_MSG_TYPE, self.msg_type.as_str());
        record.set_simple(FIELD_SRC, self.src.as_str());
        record.set_simple(FIELD_TGT, self.tgt.as_str());
        record.set_simple(FIELD_TGT_SESSION, self.tgt_session.as_str());
        record.set_simple(FIELD_RESOURCE, self.resource_id.as_str());
        record.set_simple(FIELD_PARTITION, self.partition_id.as_str());
        record.set_simple(FIELD_FROM_STATE, self.from_state.as_str());
        record.set_simple(FIELD_TO_STATE, self.to_state.as_str());
        record.set_simple(FIELD_STATE_MODEL_DEF, self.state_model_def_id.as_str());
        record.set_simple(FIELD_CREATE_TS, self.create_ts.to_string());
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// CurrentState //////////////////////////////////////////////////////////////

/// The states of the replicas of one resource hosted by one participant session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrentState {
    pub resource_id: ResourceId,
    pub session_id: SessionId,
    pub state_model_def_id: StateModelDefId,
    pub partition_states: BTreeMap<PartitionId, String>,
}

impl CurrentState {
    pub fn new(resource_id: ResourceId, session_id: SessionId, state_model_def_id: StateModelDefId) -> Self {
        Self { resource_id, session_id, state_model_def_id, partition_states: Default::default() }
    }
}

impl StoreModel for CurrentState {
    fn from_record(record: &Record) -> Option<Self> {
        let partition_states = record
            .map_fields
            .iter()
            .filter_map(|(partition, map)| map.get(FIELD_CURRENT_STATE).map(|state| (PartitionId::new(partition.as_str()), state.clone())))
            .collect();
        Some(Self {
            resource_id: ResourceId::new(record.id.as_str()),
            session_id: SessionId::new(record.simple(FIELD_SESSION_ID)?),
            state_model_def_id: StateModelDefId::new(record.simple(FIELD_STATE_MODEL_DEF)?),
            partition_states,
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.resource_id.as_str());
        record.set_simple(FIELD_SESSION_ID, self.session_id.as_str());
        record.set_simple(FIELD_STATE_MODEL_DEF, self.state_model_def_id.as_str());
        for (partition, state) in self.partition_states.iter() {
            record.map_fields.entry(partition.to_string()).or_default().insert(FIELD_CURRENT_STATE.into(), state.clone());
        }
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// Participant ///////////////////////////////////////////////////////////////

/// A point-in-time view of a participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub config: ParticipantConfig,
    /// Present only while the participant is connected.
    pub live_instance: Option<LiveInstance>,
    /// Pending messages, keyed by message ID.
    pub messages: BTreeMap<MessageId, Message>,
    /// Current states of the live session, keyed by resource.
    pub current_states: BTreeMap<ResourceId, CurrentState>,
}

impl Participant {
    pub fn id(&self) -> &ParticipantId {
        &self.config.id
    }

    /// Check if this participant has a live session.
    pub fn is_alive(&self) -> bool {
        self.live_instance.is_some()
    }

    /// The live session of this participant, if connected.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.live_instance.as_ref().map(|live| &live.session_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn participant_config_record_carries_user_config_in_namespace() -> anyhow::Result<()> {
        let mut config = ParticipantConfig::new(ParticipantId::new("p0"), "localhost", 12000);
        config.tags.insert("ssd".into());
        config.disabled_partitions.insert(PartitionId::new("db_1"));
        config.user_config.set_simple("rack", "r1");

        let record = config.to_record();
        assert_eq!(record.simple("rack"), None, "expected user config to live under its namespace only");

        let out = ParticipantConfig::from_record(&record).ok_or_else(|| anyhow::anyhow!("expected decode"))?;
        assert_eq!(out, config, "expected participant config to survive record translation");
        Ok(())
    }

    #[test]
    fn current_state_record_stores_states_per_partition() -> anyhow::Result<()> {
        let mut state = CurrentState::new(ResourceId::new("db"), SessionId::new("s0"), StateModelDefId::new("OnlineOffline"));
        state.partition_states.insert(PartitionId::new("db_0"), "ONLINE".into());

        let record = state.to_record();
        let inner = record.map("db_0").and_then(|m| m.get(FIELD_CURRENT_STATE)).cloned();
        assert_eq!(inner.as_deref(), Some("ONLINE"), "expected partition state in map field");
        let out = CurrentState::from_record(&record).ok_or_else(|| anyhow::anyhow!("expected decode"))?;
        assert_eq!(out, state, "expected current state to survive record translation");
        Ok(())
    }

    #[test]
    fn message_without_target_session_is_malformed() {
        let msg = Message::state_transition(
            "controller",
            ParticipantId::new("p0"),
            SessionId::new("s0"),
            ResourceId::new("db"),
            PartitionId::new("db_0"),
            StateModelDefId::new("OnlineOffline"),
            "OFFLINE",
            "ONLINE",
        );
        let mut record = msg.to_record();
        record.simple_fields.remove(FIELD_TGT_SESSION);
        assert!(Message::from_record(&record).is_none(), "expected message without target session to be rejected");
    }
}
