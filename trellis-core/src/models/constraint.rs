//! Cluster constraint models.
//!
//! Constraints are evaluated by the controller; this layer only stores them. Each constraint
//! type is one record, and each item is one map field of that record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::models::ids::ConstraintId;
use crate::models::record::{Record, StoreModel};

/// The attribute key under which an item's constraint value is stored.
const ATTR_CONSTRAINT_VALUE: &str = "CONSTRAINT_VALUE";

/// The kind of a constraint record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintType {
    /// Bounds on replica states.
    StateConstraint,
    /// Bounds on in-flight messages.
    MessageConstraint,
}

impl ConstraintType {
    /// All constraint types.
    pub const ALL: [ConstraintType; 2] = [ConstraintType::StateConstraint, ConstraintType::MessageConstraint];
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StateConstraint => "STATE_CONSTRAINT",
            Self::MessageConstraint => "MESSAGE_CONSTRAINT",
        })
    }
}

impl FromStr for ConstraintType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STATE_CONSTRAINT" => Ok(Self::StateConstraint),
            "MESSAGE_CONSTRAINT" => Ok(Self::MessageConstraint),
            _ => Err(format!("unknown constraint type `{}`", s)),
        }
    }
}

/// A single constraint rule: a set of attributes which select what it applies to, plus a value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConstraintItem {
    pub attributes: BTreeMap<String, String>,
    pub value: String,
}

impl ConstraintItem {
    pub fn new(value: impl Into<String>) -> Self {
        Self { attributes: Default::default(), value: value.into() }
    }

    /// Add a selecting attribute to this item.
    pub fn with_attribute(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), val.into());
        self
    }
}

/// All constraint items of one type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConstraints {
    pub constraint_type: ConstraintType,
    pub items: BTreeMap<ConstraintId, ConstraintItem>,
}

impl ClusterConstraints {
    pub fn new(constraint_type: ConstraintType) -> Self {
        Self { constraint_type, items: Default::default() }
    }

    /// Insert or replace the given item.
    pub fn add_item(&mut self, id: ConstraintId, item: ConstraintItem) {
        self.items.insert(id, item);
    }

    /// Remove the given item, returning it if it was present.
    pub fn remove_item(&mut self, id: &ConstraintId) -> Option<ConstraintItem> {
        self.items.remove(id)
    }

    pub fn item(&self, id: &ConstraintId) -> Option<&ConstraintItem> {
        self.items.get(id)
    }
}

impl StoreModel for ClusterConstraints {
    fn from_record(record: &Record) -> Option<Self> {
        let constraint_type = record.id.parse().ok()?;
        let items = record
            .map_fields
            .iter()
            .map(|(id, map)| {
                let mut attributes = map.clone();
                let value = attributes.remove(ATTR_CONSTRAINT_VALUE).unwrap_or_default();
                (ConstraintId::new(id.as_str()), ConstraintItem { attributes, value })
            })
            .collect();
        Some(Self { constraint_type, items })
    }

    fn to_record(&self) -> Record {
        let mut record = Record::new(self.constraint_type.to_string());
        for (id, item) in self.items.iter() {
            let mut map = item.attributes.clone();
            map.insert(ATTR_CONSTRAINT_VALUE.into(), item.value.clone());
            record.map_fields.insert(id.to_string(), map);
        }
        record
    }
}
