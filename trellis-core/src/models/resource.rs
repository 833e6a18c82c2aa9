//! Resource models.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::ids::{ParticipantId, PartitionId, ResourceId, StateModelDefId};
use crate::models::record::{Record, StoreModel, UserConfig};

/// The namespace under which user config is stored in configuration records.
pub const NS_USER_CONFIG: &str = "UserConfig";
/// The namespace under which opaque rebalancer config is stored in resource configuration.
pub const NS_REBALANCER_CONFIG: &str = "RebalancerConfig";
/// The namespace under which provisioner config is stored in resource configuration.
pub const NS_PROVISIONER_CONFIG: &str = "ProvisionerConfig";

/// Rebalancer classes which ship with the system and are expressible as an ideal state.
pub const BUILTIN_REBALANCERS: &[&str] = &["trellis.FullAutoRebalancer", "trellis.SemiAutoRebalancer", "trellis.CustomizedRebalancer"];

const FIELD_REBALANCE_MODE: &str = "REBALANCE_MODE";
const FIELD_STATE_MODEL_DEF_REF: &str = "STATE_MODEL_DEF_REF";
const FIELD_NUM_PARTITIONS: &str = "NUM_PARTITIONS";
const FIELD_REPLICAS: &str = "REPLICAS";
const FIELD_REBALANCER_CLASS: &str = "REBALANCER_CLASS_NAME";
const FIELD_BUCKET_SIZE: &str = "BUCKET_SIZE";
const FIELD_BATCH_MESSAGE_MODE: &str = "BATCH_MESSAGE_MODE";
const FIELD_GROUP_TAG: &str = "INSTANCE_GROUP_TAG";
const FIELD_MAX_PER_PARTICIPANT: &str = "MAX_PARTITIONS_PER_INSTANCE";
const FIELD_TYPE: &str = "TYPE";
const FIELD_PROVISIONER_CLASS: &str = "PROVISIONER_CLASS_NAME";
const FIELD_PARTITIONS: &str = "PARTITIONS";
const FIELD_PREFERENCE_PREFIX: &str = "PREFERENCE_LIST.";
const FIELD_MAPPING_PREFIX: &str = "PREFERENCE_MAP.";

/// A map of partition to participant to state.
pub type PartitionStateMap = BTreeMap<PartitionId, BTreeMap<ParticipantId, String>>;

//////////////////////////////////////////////////////////////////////////////
// RebalanceMode /////////////////////////////////////////////////////////////

/// The placement mode of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RebalanceMode {
    /// Placement and state are fully computed by the controller.
    FullAuto,
    /// Placement is given by preference lists, states are computed.
    SemiAuto,
    /// Placement and state are given explicitly.
    Customized,
    /// Placement is computed by a user supplied rebalancer.
    UserDefined,
}

impl fmt::Display for RebalanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FullAuto => "FULL_AUTO",
            Self::SemiAuto => "SEMI_AUTO",
            Self::Customized => "CUSTOMIZED",
            Self::UserDefined => "USER_DEFINED",
        })
    }
}

impl FromStr for RebalanceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FULL_AUTO" => Ok(Self::FullAuto),
            "SEMI_AUTO" => Ok(Self::SemiAuto),
            "CUSTOMIZED" => Ok(Self::Customized),
            "USER_DEFINED" => Ok(Self::UserDefined),
            _ => Err(format!("unknown rebalance mode `{}`", s)),
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// RebalancerConfig //////////////////////////////////////////////////////////

/// The placement policy of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebalancerConfig {
    /// The resource this config places.
    pub resource_id: ResourceId,
    /// The placement mode.
    pub mode: RebalanceMode,
    /// The state model definition which replicas of this resource follow.
    pub state_model_def_id: StateModelDefId,
    /// The partitions of the resource.
    pub partitions: Vec<PartitionId>,
    /// The number of replicas per partition, a count or `ANY_LIVEINSTANCE`.
    pub replicas: String,
    /// A custom rebalancer class, if any.
    pub rebalancer_class: Option<String>,
    /// Only place replicas on participants carrying this tag.
    pub participant_group_tag: Option<String>,
    /// The maximum number of partitions placed on one participant.
    pub max_partitions_per_participant: Option<u32>,
    /// Per-partition ordered participant preference, for semi-auto placement.
    pub preference_lists: BTreeMap<PartitionId, Vec<ParticipantId>>,
    /// Per-partition explicit participant states, for customized placement.
    pub preference_maps: PartitionStateMap,
}

impl RebalancerConfig {
    /// Create a new config with `num_partitions` canonically named partitions.
    pub fn new(resource_id: ResourceId, mode: RebalanceMode, state_model_def_id: StateModelDefId, num_partitions: u32, replicas: u32) -> Self {
        let partitions = (0..num_partitions).map(|offset| PartitionId::for_resource(&resource_id, offset)).collect();
        Self {
            resource_id,
            mode,
            state_model_def_id,
            partitions,
            replicas: replicas.to_string(),
            rebalancer_class: None,
            participant_group_tag: None,
            max_partitions_per_participant: None,
            preference_lists: Default::default(),
            preference_maps: Default::default(),
        }
    }

    /// Check if the given rebalancer class ships with the system.
    pub fn is_builtin_rebalancer(class: &str) -> bool {
        BUILTIN_REBALANCERS.contains(&class)
    }

    /// Check if this config describes a user defined rebalancer, either by mode or by class.
    pub fn is_user_defined(&self) -> bool {
        self.mode == RebalanceMode::UserDefined || self.rebalancer_class.as_deref().map(|class| !Self::is_builtin_rebalancer(class)).unwrap_or(false)
    }

    /// Build an ideal state from this config, if this config is expressible as one.
    pub fn to_ideal_state(&self, bucket_size: u32, batch_message_mode: bool) -> Option<IdealState> {
        if self.is_user_defined() {
            return None;
        }
        Some(IdealState { rebalancer: self.clone(), bucket_size, batch_message_mode })
    }

    /// Write the placement fields of this config into the given record.
    fn write_fields(&self, record: &mut Record) {
        record.set_simple(FIELD_REBALANCE_MODE, self.mode.to_string());
        record.set_simple(FIELD_STATE_MODEL_DEF_REF, self.state_model_def_id.as_str());
        record.set_simple(FIELD_NUM_PARTITIONS, self.partitions.len().to_string());
        record.set_simple(FIELD_REPLICAS, self.replicas.as_str());
        if let Some(class) = self.rebalancer_class.as_ref() {
            record.set_simple(FIELD_REBALANCER_CLASS, class.as_str());
        }
        if let Some(tag) = self.participant_group_tag.as_ref() {
            record.set_simple(FIELD_GROUP_TAG, tag.as_str());
        }
        if let Some(max) = self.max_partitions_per_participant {
            record.set_simple(FIELD_MAX_PER_PARTICIPANT, max.to_string());
        }
    }

    /// Read the placement fields of a config out of the given record.
    fn read_fields(resource_id: ResourceId, record: &Record) -> Option<Self> {
        Some(Self {
            resource_id,
            mode: record.parsed(FIELD_REBALANCE_MODE)?,
            state_model_def_id: StateModelDefId::new(record.simple(FIELD_STATE_MODEL_DEF_REF)?),
            partitions: vec![],
            replicas: record.simple(FIELD_REPLICAS).unwrap_or("0").to_string(),
            rebalancer_class: record.simple(FIELD_REBALANCER_CLASS).map(String::from),
            participant_group_tag: record.simple(FIELD_GROUP_TAG).map(String::from),
            max_partitions_per_participant: record.parsed(FIELD_MAX_PER_PARTICIPANT),
            preference_lists: Default::default(),
            preference_maps: Default::default(),
        })
    }

    /// Encode this config as an opaque record, for storage inside a resource configuration.
    pub fn to_opaque_record(&self) -> Record {
        let mut record = Record::new(self.resource_id.as_str());
        self.write_fields(&mut record);
        record.list_fields.insert(FIELD_PARTITIONS.into(), self.partitions.iter().map(|p| p.to_string()).collect());
        for (partition, list) in self.preference_lists.iter() {
            record.list_fields.insert(format!("{}{}", FIELD_PREFERENCE_PREFIX, partition), list.iter().map(|p| p.to_string()).collect());
        }
        for (partition, map) in self.preference_maps.iter() {
            record.map_fields.insert(format!("{}{}", FIELD_MAPPING_PREFIX, partition), map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
        }
        record
    }

    /// Decode a config from an opaque record.
    pub fn from_opaque_record(resource_id: ResourceId, record: &Record) -> Option<Self> {
        let mut config = Self::read_fields(resource_id, record)?;
        config.partitions = record.list(FIELD_PARTITIONS).iter().map(|p| PartitionId::new(p.as_str())).collect();
        for (key, list) in record.list_fields.iter() {
            if let Some(partition) = key.strip_prefix(FIELD_PREFERENCE_PREFIX) {
                config.preference_lists.insert(PartitionId::new(partition), list.iter().map(|p| ParticipantId::new(p.as_str())).collect());
            }
        }
        for (key, map) in record.map_fields.iter() {
            if let Some(partition) = key.strip_prefix(FIELD_MAPPING_PREFIX) {
                config
                    .preference_maps
                    .insert(PartitionId::new(partition), map.iter().map(|(k, v)| (ParticipantId::new(k.as_str()), v.clone())).collect());
            }
        }
        Some(config)
    }
}

//////////////////////////////////////////////////////////////////////////////
// IdealState ////////////////////////////////////////////////////////////////

/// The target placement record of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdealState {
    /// The placement policy this ideal state encodes.
    pub rebalancer: RebalancerConfig,
    /// The number of partitions stored per bucket node.
    pub bucket_size: u32,
    /// Whether transition messages to one participant are batched.
    pub batch_message_mode: bool,
}

impl IdealState {
    /// The ID of the resource of this ideal state.
    pub fn resource_id(&self) -> &ResourceId {
        &self.rebalancer.resource_id
    }

    /// The placement mode of this ideal state.
    pub fn mode(&self) -> RebalanceMode {
        self.rebalancer.mode
    }
}

impl StoreModel for IdealState {
    fn from_record(record: &Record) -> Option<Self> {
        let mut rebalancer = RebalancerConfig::read_fields(ResourceId::new(record.id.as_str()), record)?;
        // Every partition has a list field, even when its preference list is empty.
        for (partition, list) in record.list_fields.iter() {
            let partition = PartitionId::new(partition.as_str());
            if !list.is_empty() {
                rebalancer.preference_lists.insert(partition.clone(), list.iter().map(|p| ParticipantId::new(p.as_str())).collect());
            }
            rebalancer.partitions.push(partition);
        }
        for (partition, map) in record.map_fields.iter() {
            let partition = PartitionId::new(partition.as_str());
            if !rebalancer.partitions.contains(&partition) {
                rebalancer.partitions.push(partition.clone());
            }
            rebalancer.preference_maps.insert(partition, map.iter().map(|(k, v)| (ParticipantId::new(k.as_str()), v.clone())).collect());
        }
        Some(Self {
            rebalancer,
            bucket_size: record.parsed(FIELD_BUCKET_SIZE).unwrap_or(0),
            batch_message_mode: record.bool_or(FIELD_BATCH_MESSAGE_MODE, false),
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.resource_id().as_str());
        self.rebalancer.write_fields(&mut record);
        record.set_simple(FIELD_BUCKET_SIZE, self.bucket_size.to_string());
        record.set_simple(FIELD_BATCH_MESSAGE_MODE, self.batch_message_mode.to_string());
        for partition in self.rebalancer.partitions.iter() {
            let list = self.rebalancer.preference_lists.get(partition).map(|list| list.iter().map(|p| p.to_string()).collect()).unwrap_or_default();
            record.list_fields.insert(partition.to_string(), list);
        }
        for (partition, map) in self.rebalancer.preference_maps.iter() {
            record.map_fields.insert(partition.to_string(), map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
        }
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// ExternalView & ResourceAssignment /////////////////////////////////////////

/// The externally observed state of every replica of a resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExternalView {
    pub resource_id: ResourceId,
    pub states: PartitionStateMap,
}

/// The assignment most recently computed for a resource by its rebalancer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResourceAssignment {
    pub resource_id: ResourceId,
    pub replicas: PartitionStateMap,
}

fn state_map_from_record(record: &Record) -> PartitionStateMap {
    record
        .map_fields
        .iter()
        .map(|(partition, map)| (PartitionId::new(partition.as_str()), map.iter().map(|(k, v)| (ParticipantId::new(k.as_str()), v.clone())).collect()))
        .collect()
}

fn state_map_to_record(id: &ResourceId, states: &PartitionStateMap) -> Record {
    let mut record = Record::new(id.as_str());
    for (partition, map) in states.iter() {
        record.map_fields.insert(partition.to_string(), map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect());
    }
    record
}

impl StoreModel for ExternalView {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self { resource_id: ResourceId::new(record.id.as_str()), states: state_map_from_record(record) })
    }

    fn to_record(&self) -> Record {
        state_map_to_record(&self.resource_id, &self.states)
    }
}

impl StoreModel for ResourceAssignment {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self { resource_id: ResourceId::new(record.id.as_str()), replicas: state_map_from_record(record) })
    }

    fn to_record(&self) -> Record {
        state_map_to_record(&self.resource_id, &self.replicas)
    }
}

//////////////////////////////////////////////////////////////////////////////
// ResourceConfig ////////////////////////////////////////////////////////////

/// The kind of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    Data,
    Service,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Data => "DATA",
            Self::Service => "SERVICE",
        })
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DATA" => Ok(Self::Data),
            "SERVICE" => Ok(Self::Service),
            _ => Err(format!("unknown resource type `{}`", s)),
        }
    }
}

/// Configuration of the provisioner which sizes the containers of a service resource.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// The provisioner implementation.
    pub class_name: String,
    /// Provisioner specific properties.
    pub properties: BTreeMap<String, String>,
}

impl ProvisionerConfig {
    fn to_record(&self) -> Record {
        let mut record = Record::new(NS_PROVISIONER_CONFIG);
        record.simple_fields = self.properties.clone();
        record.set_simple(FIELD_PROVISIONER_CLASS, self.class_name.as_str());
        record
    }

    fn from_record(record: &Record) -> Option<Self> {
        let mut properties = record.simple_fields.clone();
        let class_name = properties.remove(FIELD_PROVISIONER_CLASS)?;
        Some(Self { class_name, properties })
    }
}

/// The full configuration of a resource, as given by an administrator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceConfig {
    pub id: ResourceId,
    pub resource_type: ResourceType,
    /// The placement policy; a resource without one can not be added to a cluster.
    pub rebalancer_config: Option<RebalancerConfig>,
    pub user_config: Option<UserConfig>,
    pub provisioner_config: Option<ProvisionerConfig>,
    pub bucket_size: u32,
    pub batch_message_mode: bool,
}

impl ResourceConfig {
    /// Create a new data resource with the given placement policy.
    pub fn new(rebalancer_config: RebalancerConfig) -> Self {
        Self {
            id: rebalancer_config.resource_id.clone(),
            resource_type: ResourceType::Data,
            rebalancer_config: Some(rebalancer_config),
            user_config: None,
            provisioner_config: None,
            bucket_size: 0,
            batch_message_mode: false,
        }
    }
}

/// The configuration node of a resource as persisted in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceConfiguration {
    pub id: ResourceId,
    pub resource_type: ResourceType,
    pub user_config: UserConfig,
    /// The opaque rebalancer config, only present when it is not expressible as an ideal state.
    pub rebalancer_config: Option<RebalancerConfig>,
    pub provisioner_config: Option<ProvisionerConfig>,
}

impl ResourceConfiguration {
    /// Check if this configuration carries an opaque rebalancer config.
    pub fn has_rebalancer_config(&self) -> bool {
        self.rebalancer_config.is_some()
    }
}

impl StoreModel for ResourceConfiguration {
    fn from_record(record: &Record) -> Option<Self> {
        let id = ResourceId::new(record.id.as_str());
        let rebalancer_config = match record.has_namespace(NS_REBALANCER_CONFIG) {
            true => RebalancerConfig::from_opaque_record(id.clone(), &record.namespaced(NS_REBALANCER_CONFIG, id.as_str())),
            false => None,
        };
        let provisioner_config = match record.has_namespace(NS_PROVISIONER_CONFIG) {
            true => ProvisionerConfig::from_record(&record.namespaced(NS_PROVISIONER_CONFIG, NS_PROVISIONER_CONFIG)),
            false => None,
        };
        Some(Self {
            resource_type: record.parsed(FIELD_TYPE).unwrap_or(ResourceType::Data),
            user_config: record.namespaced(NS_USER_CONFIG, id.as_str()),
            rebalancer_config,
            provisioner_config,
            id,
        })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_TYPE, self.resource_type.to_string());
        record.add_namespaced(NS_USER_CONFIG, &self.user_config);
        if let Some(config) = self.rebalancer_config.as_ref() {
            record.add_namespaced(NS_REBALANCER_CONFIG, &config.to_opaque_record());
        }
        if let Some(config) = self.provisioner_config.as_ref() {
            record.add_namespaced(NS_PROVISIONER_CONFIG, &config.to_record());
        }
        record
    }
}

//////////////////////////////////////////////////////////////////////////////
// Resource //////////////////////////////////////////////////////////////////

/// A point-in-time view of a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resource {
    /// The configuration of this resource, with the rebalancer config re-derived from storage.
    pub config: ResourceConfig,
    pub ideal_state: Option<IdealState>,
    pub external_view: Option<ExternalView>,
    pub assignment: Option<ResourceAssignment>,
}

impl Resource {
    pub fn id(&self) -> &ResourceId {
        &self.config.id
    }

    /// The placement policy of this resource, if one could be derived from storage.
    pub fn rebalancer_config(&self) -> Option<&RebalancerConfig> {
        self.config.rebalancer_config.as_ref()
    }
}
