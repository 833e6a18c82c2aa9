//! Controller models.

use crate::models::ids::{ContextId, ControllerId};
use crate::models::participant::LiveInstance;
use crate::models::record::{Record, StoreModel};

const FIELD_REASON: &str = "REASON";

/// A controller instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Controller {
    pub id: ControllerId,
    /// The live record backing this controller.
    pub live_instance: LiveInstance,
    pub is_leader: bool,
}

impl Controller {
    /// Build the leader controller out of the cluster's leader record.
    pub fn leader(live_instance: LiveInstance) -> Self {
        Self { id: ControllerId::new(live_instance.id.as_str()), live_instance, is_leader: true }
    }
}

/// Opaque data persisted by a controller, round-tripped without interpretation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerContext {
    pub id: ContextId,
    pub payload: Record,
}

impl StoreModel for ControllerContext {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self { id: ContextId::new(record.id.as_str()), payload: record.clone() })
    }

    fn to_record(&self) -> Record {
        let mut record = self.payload.clone();
        record.id = self.id.to_string();
        record
    }
}

/// The cluster-wide pause marker. Its presence in the store is what pauses a cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PauseSignal {
    pub reason: Option<String>,
}

impl StoreModel for PauseSignal {
    fn from_record(record: &Record) -> Option<Self> {
        Some(Self { reason: record.simple(FIELD_REASON).map(String::from) })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new("PAUSE");
        if let Some(reason) = self.reason.as_ref() {
            record.set_simple(FIELD_REASON, reason.as_str());
        }
        record
    }
}
