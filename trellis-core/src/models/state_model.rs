//! State model definitions.

use std::collections::{BTreeMap, HashSet};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;

use crate::models::ids::StateModelDefId;
use crate::models::record::{Record, StoreModel};

/// The state every replica falls into when a transition handler fails.
pub const STATE_ERROR: &str = "ERROR";
/// The terminal state of a replica which has been removed.
pub const STATE_DROPPED: &str = "DROPPED";

/// Upper bound meaning "as many replicas as the resource declares".
pub const BOUND_REPLICAS: &str = "R";
/// Upper bound meaning "every live participant".
pub const BOUND_ALL: &str = "N";

const FIELD_INITIAL_STATE: &str = "INITIAL_STATE";
const FIELD_STATE_PRIORITY_LIST: &str = "STATE_PRIORITY_LIST";
const FIELD_TRANSITION_PRIORITY_LIST: &str = "STATE_TRANSITION_PRIORITYLIST";
const FIELD_META_SUFFIX: &str = ".meta";
const FIELD_COUNT: &str = "count";

/// A named template of the legal states and transitions of a partition replica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateModelDefinition {
    /// The ID of this definition, also the name its handler factory is registered under.
    pub id: StateModelDefId,
    /// The state every replica starts in.
    pub initial_state: String,
    /// All legal states, in priority order.
    pub states: Vec<String>,
    /// All legal transitions as `(from, to)` pairs, in priority order.
    pub transitions: Vec<(String, String)>,
    /// Upper bounds on the number of replicas per state, a count, `R` or `N`.
    pub upper_bounds: BTreeMap<String, String>,
}

impl StateModelDefinition {
    /// Check if the given transition is declared by this definition.
    ///
    /// Any state may always transition into `ERROR` and out of `ERROR` to the initial state.
    pub fn is_legal_transition(&self, from: &str, to: &str) -> bool {
        if to == STATE_ERROR || (from == STATE_ERROR && to == self.initial_state) {
            return true;
        }
        self.transitions.iter().any(|(f, t)| f == from && t == to)
    }

    /// Statically validate this definition.
    ///
    /// The initial state and every transition endpoint must be declared, and every declared
    /// state must be reachable from the initial state.
    pub fn validate(&self) -> Result<(), String> {
        let declared: HashSet<&str> = self.states.iter().map(String::as_str).collect();
        if !declared.contains(self.initial_state.as_str()) {
            return Err(format!("initial state `{}` is not a declared state", self.initial_state));
        }
        let mut graph = DiGraphMap::<&str, ()>::new();
        for state in self.states.iter() {
            graph.add_node(state.as_str());
        }
        for (from, to) in self.transitions.iter() {
            if !declared.contains(from.as_str()) || !declared.contains(to.as_str()) {
                return Err(format!("transition {}-{} references an undeclared state", from, to));
            }
            graph.add_edge(from.as_str(), to.as_str(), ());
        }
        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, self.initial_state.as_str());
        while let Some(node) = dfs.next(&graph) {
            reachable.insert(node);
        }
        match self.states.iter().find(|state| !reachable.contains(state.as_str())) {
            Some(state) => Err(format!("state `{}` is not reachable from initial state `{}`", state, self.initial_state)),
            None => Ok(()),
        }
    }

    /// The builtin `MasterSlave` definition.
    pub fn master_slave() -> Self {
        Self::builtin(
            "MasterSlave",
            "OFFLINE",
            &["MASTER", "SLAVE", "OFFLINE", STATE_DROPPED],
            &[("MASTER", "SLAVE"), ("SLAVE", "MASTER"), ("OFFLINE", "SLAVE"), ("SLAVE", "OFFLINE"), ("OFFLINE", STATE_DROPPED)],
            &[("MASTER", "1"), ("SLAVE", BOUND_REPLICAS)],
        )
    }

    /// The builtin `LeaderStandby` definition.
    pub fn leader_standby() -> Self {
        Self::builtin(
            "LeaderStandby",
            "OFFLINE",
            &["LEADER", "STANDBY", "OFFLINE", STATE_DROPPED],
            &[("LEADER", "STANDBY"), ("STANDBY", "LEADER"), ("OFFLINE", "STANDBY"), ("STANDBY", "OFFLINE"), ("OFFLINE", STATE_DROPPED)],
            &[("LEADER", "1"), ("STANDBY", BOUND_REPLICAS)],
        )
    }

    /// The builtin `OnlineOffline` definition.
    pub fn online_offline() -> Self {
        Self::builtin(
            "OnlineOffline",
            "OFFLINE",
            &["ONLINE", "OFFLINE", STATE_DROPPED],
            &[("ONLINE", "OFFLINE"), ("OFFLINE", "ONLINE"), ("OFFLINE", STATE_DROPPED)],
            &[("ONLINE", BOUND_REPLICAS)],
        )
    }

    fn builtin(id: &str, initial: &str, states: &[&str], transitions: &[(&str, &str)], bounds: &[(&str, &str)]) -> Self {
        Self {
            id: StateModelDefId::new(id),
            initial_state: initial.into(),
            states: states.iter().map(|s| s.to_string()).collect(),
            transitions: transitions.iter().map(|(f, t)| (f.to_string(), t.to_string())).collect(),
            upper_bounds: bounds.iter().map(|(s, b)| (s.to_string(), b.to_string())).collect(),
        }
    }
}

impl StoreModel for StateModelDefinition {
    fn from_record(record: &Record) -> Option<Self> {
        let initial_state = record.simple(FIELD_INITIAL_STATE)?.to_string();
        let transitions = record
            .list(FIELD_TRANSITION_PRIORITY_LIST)
            .iter()
            .filter_map(|val| val.split_once('-').map(|(f, t)| (f.to_string(), t.to_string())))
            .collect();
        let states = record.list(FIELD_STATE_PRIORITY_LIST).to_vec();
        let upper_bounds = states
            .iter()
            .filter_map(|state| {
                let meta = record.map(&format!("{}{}", state, FIELD_META_SUFFIX))?;
                meta.get(FIELD_COUNT).map(|count| (state.clone(), count.clone()))
            })
            .collect();
        Some(Self { id: StateModelDefId::new(record.id.as_str()), initial_state, states, transitions, upper_bounds })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.id.as_str());
        record.set_simple(FIELD_INITIAL_STATE, self.initial_state.as_str());
        record.list_fields.insert(FIELD_STATE_PRIORITY_LIST.into(), self.states.clone());
        record
            .list_fields
            .insert(FIELD_TRANSITION_PRIORITY_LIST.into(), self.transitions.iter().map(|(f, t)| format!("{}-{}", f, t)).collect());
        for (state, bound) in self.upper_bounds.iter() {
            let meta = record.map_fields.entry(format!("{}{}", state, FIELD_META_SUFFIX)).or_default();
            meta.insert(FIELD_COUNT.into(), bound.clone());
        }
        record
    }
}
