//! The generic record persisted at every store node.
//!
//! Every typed entity in the cluster model is translated to and from a `Record`. A record is a
//! bag of simple fields, list fields and map fields. Several independent configuration
//! namespaces may share one record by prefixing their keys, see `add_namespaced`.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The separator placed between a namespace and a field key.
pub const NAMESPACE_SEPARATOR: char = '!';

/// A generic store record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The ID of this record, usually the final segment of its store path.
    pub id: String,
    /// Simple string fields.
    #[serde(default, rename = "simpleFields")]
    pub simple_fields: BTreeMap<String, String>,
    /// List fields.
    #[serde(default, rename = "listFields")]
    pub list_fields: BTreeMap<String, Vec<String>>,
    /// Map fields.
    #[serde(default, rename = "mapFields")]
    pub map_fields: BTreeMap<String, BTreeMap<String, String>>,
}

/// User supplied key/value configuration, round-tripped without interpretation.
pub type UserConfig = Record;

impl Record {
    /// Create a new empty record with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    /// Check if this record has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.simple_fields.is_empty() && self.list_fields.is_empty() && self.map_fields.is_empty()
    }

    /// Get a simple field.
    pub fn simple(&self, key: &str) -> Option<&str> {
        self.simple_fields.get(key).map(String::as_str)
    }

    /// Set a simple field.
    pub fn set_simple(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.simple_fields.insert(key.into(), val.into());
    }

    /// Get a simple field parsed as the given type.
    pub fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.simple(key).and_then(|val| val.parse().ok())
    }

    /// Get a simple field as a bool, falling back to the given default.
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.parsed(key).unwrap_or(default)
    }

    /// Get a list field, empty if absent.
    pub fn list(&self, key: &str) -> &[String] {
        self.list_fields.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Get a map field.
    pub fn map(&self, key: &str) -> Option<&BTreeMap<String, String>> {
        self.map_fields.get(key)
    }

    /// Merge the given record into this one, with the given record winning on key conflicts.
    ///
    /// Map fields are merged key by key rather than replaced.
    pub fn merge(&mut self, other: &Record) {
        for (key, val) in other.simple_fields.iter() {
            self.simple_fields.insert(key.clone(), val.clone());
        }
        for (key, val) in other.list_fields.iter() {
            self.list_fields.insert(key.clone(), val.clone());
        }
        for (key, val) in other.map_fields.iter() {
            let target = self.map_fields.entry(key.clone()).or_default();
            for (inner_key, inner_val) in val.iter() {
                target.insert(inner_key.clone(), inner_val.clone());
            }
        }
    }

    /// Add all fields of the given record to this record under the given namespace.
    pub fn add_namespaced(&mut self, namespace: &str, source: &Record) {
        let key = |k: &String| format!("{}{}{}", namespace, NAMESPACE_SEPARATOR, k);
        for (k, v) in source.simple_fields.iter() {
            self.simple_fields.insert(key(k), v.clone());
        }
        for (k, v) in source.list_fields.iter() {
            self.list_fields.insert(key(k), v.clone());
        }
        for (k, v) in source.map_fields.iter() {
            self.map_fields.insert(key(k), v.clone());
        }
    }

    /// Extract all fields stored under the given namespace as a new record.
    pub fn namespaced(&self, namespace: &str, id: impl Into<String>) -> Record {
        let prefix = format!("{}{}", namespace, NAMESPACE_SEPARATOR);
        let strip = |k: &String| k.strip_prefix(prefix.as_str()).map(String::from);
        let mut out = Record::new(id);
        out.simple_fields = self.simple_fields.iter().filter_map(|(k, v)| strip(k).map(|k| (k, v.clone()))).collect();
        out.list_fields = self.list_fields.iter().filter_map(|(k, v)| strip(k).map(|k| (k, v.clone()))).collect();
        out.map_fields = self.map_fields.iter().filter_map(|(k, v)| strip(k).map(|k| (k, v.clone()))).collect();
        out
    }

    /// Check if any field is stored under the given namespace.
    pub fn has_namespace(&self, namespace: &str) -> bool {
        let prefix = format!("{}{}", namespace, NAMESPACE_SEPARATOR);
        self.simple_fields.keys().any(|k| k.starts_with(&prefix))
            || self.list_fields.keys().any(|k| k.starts_with(&prefix))
            || self.map_fields.keys().any(|k| k.starts_with(&prefix))
    }
}

/// A typed model which is persisted in the store as a `Record`.
pub trait StoreModel: Sized {
    /// Translate a raw record into this model, returning `None` if the record is malformed.
    fn from_record(record: &Record) -> Option<Self>;

    /// Translate this model into a raw record.
    fn to_record(&self) -> Record;
}
