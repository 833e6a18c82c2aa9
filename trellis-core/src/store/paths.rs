use crate::models::{ClusterId, ConstraintType, ContextId, MessageId, ParticipantId, ResourceId, SessionId, StateModelDefId};

const CONFIGS: &str = "CONFIGS";
const CONFIGS_CLUSTER: &str = "CLUSTER";
const CONFIGS_PARTICIPANT: &str = "PARTICIPANT";
const CONFIGS_RESOURCE: &str = "RESOURCE";
const CONFIGS_CONSTRAINT: &str = "CONSTRAINT";
const IDEAL_STATES: &str = "IDEALSTATES";
const EXTERNAL_VIEW: &str = "EXTERNALVIEW";
const RESOURCE_ASSIGNMENTS: &str = "RESOURCEASSIGNMENTS";
const LIVE_INSTANCES: &str = "LIVEINSTANCES";
const INSTANCES: &str = "INSTANCES";
const STATE_MODEL_DEFS: &str = "STATEMODELDEFS";
const CONTROLLER: &str = "CONTROLLER";
const CONTROLLER_SUBTREES: [&str; 5] = ["ERRORS", "HISTORY", "MESSAGES", "STATUSUPDATES", "CONTEXT"];
const CONTROLLER_CONTEXT: &str = "CONTEXT";
const LEADER: &str = "LEADER";
const PAUSE: &str = "PAUSE";
const PROPERTY_STORE: &str = "PROPERTYSTORE";
const CURRENT_STATES: &str = "CURRENTSTATES";
const MESSAGES: &str = "MESSAGES";
const PARTICIPANT_SUBTREES: [&str; 5] = [CURRENT_STATES, "ERRORS", "HEALTHREPORT", MESSAGES, "STATUSUPDATES"];

/// Builds the store paths of one cluster's subtree.
#[derive(Clone, Debug)]
pub struct PathBuilder {
    root: String,
}

impl PathBuilder {
    pub fn new(cluster: &ClusterId) -> Self {
        Self { root: format!("/{}", cluster) }
    }

    /// The root of the cluster's subtree.
    pub fn cluster(&self) -> &str {
        &self.root
    }

    fn join(&self, segments: &[&str]) -> String {
        let mut path = self.root.clone();
        for seg in segments {
            path.push('/');
            path.push_str(seg);
        }
        path
    }

    /// Every path which must exist for the cluster's structure to be valid.
    pub fn required_cluster_paths(&self) -> Vec<String> {
        let mut paths = vec![
            self.join(&[CONFIGS, CONFIGS_CLUSTER]),
            self.join(&[CONFIGS, CONFIGS_PARTICIPANT]),
            self.join(&[CONFIGS, CONFIGS_RESOURCE]),
            self.join(&[CONFIGS, CONFIGS_CONSTRAINT]),
            self.ideal_states(),
            self.external_views(),
            self.resource_assignments(),
            self.live_instances(),
            self.instances(),
            self.state_model_defs(),
            self.join(&[CONTROLLER]),
        ];
        paths.extend(CONTROLLER_SUBTREES.iter().map(|sub| self.join(&[CONTROLLER, sub])));
        paths.push(self.join(&[PROPERTY_STORE]));
        paths
    }

    /// Every path which must exist for a participant's structure to be valid.
    pub fn required_participant_paths(&self, participant: &ParticipantId) -> Vec<String> {
        PARTICIPANT_SUBTREES.iter().map(|sub| self.join(&[INSTANCES, participant.as_str(), sub])).collect()
    }

    pub fn cluster_config(&self) -> String {
        self.join(&[CONFIGS, CONFIGS_CLUSTER, self.root.trim_start_matches('/')])
    }

    pub fn participant_configs(&self) -> String {
        self.join(&[CONFIGS, CONFIGS_PARTICIPANT])
    }

    pub fn participant_config(&self, id: &ParticipantId) -> String {
        self.join(&[CONFIGS, CONFIGS_PARTICIPANT, id.as_str()])
    }

    pub fn resource_configs(&self) -> String {
        self.join(&[CONFIGS, CONFIGS_RESOURCE])
    }

    pub fn resource_config(&self, id: &ResourceId) -> String {
        self.join(&[CONFIGS, CONFIGS_RESOURCE, id.as_str()])
    }

    pub fn constraints(&self) -> String {
        self.join(&[CONFIGS, CONFIGS_CONSTRAINT])
    }

    pub fn constraint(&self, constraint_type: ConstraintType) -> String {
        self.join(&[CONFIGS, CONFIGS_CONSTRAINT, &constraint_type.to_string()])
    }

    pub fn ideal_states(&self) -> String {
        self.join(&[IDEAL_STATES])
    }

    pub fn ideal_state(&self, id: &ResourceId) -> String {
        self.join(&[IDEAL_STATES, id.as_str()])
    }

    pub fn external_views(&self) -> String {
        self.join(&[EXTERNAL_VIEW])
    }

    pub fn external_view(&self, id: &ResourceId) -> String {
        self.join(&[EXTERNAL_VIEW, id.as_str()])
    }

    pub fn resource_assignments(&self) -> String {
        self.join(&[RESOURCE_ASSIGNMENTS])
    }

    pub fn resource_assignment(&self, id: &ResourceId) -> String {
        self.join(&[RESOURCE_ASSIGNMENTS, id.as_str()])
    }

    pub fn live_instances(&self) -> String {
        self.join(&[LIVE_INSTANCES])
    }

    pub fn live_instance(&self, id: &ParticipantId) -> String {
        self.join(&[LIVE_INSTANCES, id.as_str()])
    }

    pub fn instances(&self) -> String {
        self.join(&[INSTANCES])
    }

    pub fn instance(&self, id: &ParticipantId) -> String {
        self.join(&[INSTANCES, id.as_str()])
    }

    pub fn messages(&self, id: &ParticipantId) -> String {
        self.join(&[INSTANCES, id.as_str(), MESSAGES])
    }

    pub fn message(&self, id: &ParticipantId, msg: &MessageId) -> String {
        self.join(&[INSTANCES, id.as_str(), MESSAGES, msg.as_str()])
    }

    pub fn current_states(&self, id: &ParticipantId, session: &SessionId) -> String {
        self.join(&[INSTANCES, id.as_str(), CURRENT_STATES, session.as_str()])
    }

    pub fn current_state(&self, id: &ParticipantId, session: &SessionId, resource: &ResourceId) -> String {
        self.join(&[INSTANCES, id.as_str(), CURRENT_STATES, session.as_str(), resource.as_str()])
    }

    pub fn state_model_defs(&self) -> String {
        self.join(&[STATE_MODEL_DEFS])
    }

    pub fn state_model_def(&self, id: &StateModelDefId) -> String {
        self.join(&[STATE_MODEL_DEFS, id.as_str()])
    }

    pub fn leader(&self) -> String {
        self.join(&[CONTROLLER, LEADER])
    }

    pub fn pause(&self) -> String {
        self.join(&[CONTROLLER, PAUSE])
    }

    pub fn controller_contexts(&self) -> String {
        self.join(&[CONTROLLER, CONTROLLER_CONTEXT])
    }

    pub fn controller_context(&self, id: &ContextId) -> String {
        self.join(&[CONTROLLER, CONTROLLER_CONTEXT, id.as_str()])
    }
}
