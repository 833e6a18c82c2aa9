//! The hierarchical store abstraction.
//!
//! The store is a tree of nodes addressed by `/`-separated paths. Every node may hold a
//! `Record` and is either persistent or owned by a session. Session owned nodes disappear when
//! their session expires.

mod paths;
mod sled_store;

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::models::{Record, SessionId};

pub use self::paths::PathBuilder;
pub use self::sled_store::SledStore;

/// A shared handle to a hierarchical store.
pub type StoreHandle = Arc<dyn HierarchicalStore>;

/// A result type where the error is a `StoreError`.
pub type StoreResult<T> = ::std::result::Result<T, StoreError>;

/// A function which computes the new value of a node from its current value.
///
/// Returning `None` leaves the node untouched.
pub type Mutator<'a> = &'a dyn Fn(Option<Record>) -> Option<Record>;

/// Error variants of store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying database returned an error.
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    /// A node's stored value could not be encoded or decoded.
    #[error("error encoding or decoding node {path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The given path is malformed.
    #[error("invalid store path `{0}`, paths must be absolute and may not contain empty segments")]
    InvalidPath(String),
    /// The parent of the given path is session owned, and may not have children.
    #[error("the parent of {0} is an ephemeral node and may not have children")]
    EphemeralParent(String),
}

/// The lifetime of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Durability {
    /// The node survives process and session end.
    Persistent,
    /// The node is removed when the owning session expires.
    Ephemeral(SessionId),
}

/// Metadata of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeStat {
    /// Incremented on every write to the node, starting at 0 on creation.
    pub version: u64,
    /// The owning session of an ephemeral node.
    pub ephemeral_owner: Option<SessionId>,
}

/// The operations of a hierarchical, versioned key/value store.
///
/// Parents of a created or written node are created as empty persistent nodes when absent.
/// All removals are recursive.
pub trait HierarchicalStore: Send + Sync {
    /// Check for the existence of each of the given paths.
    fn exists(&self, paths: &[String]) -> StoreResult<Vec<bool>>;

    /// Create a node, returning `false` if it already exists.
    fn create(&self, path: &str, value: Option<Record>, durability: Durability) -> StoreResult<bool>;

    /// Get the record of a node, if the node exists and holds one.
    fn get(&self, path: &str) -> StoreResult<Option<Record>>;

    /// Write the record of a node, creating the node when absent.
    fn set(&self, path: &str, value: Record) -> StoreResult<bool>;

    /// Atomically apply the given mutator to a node, creating it when absent.
    ///
    /// Returns `false` if the mutator declined to write.
    fn update(&self, path: &str, mutator: Mutator<'_>) -> StoreResult<bool>;

    /// Remove a node and its whole subtree, returning `false` if it did not exist.
    fn remove(&self, path: &str) -> StoreResult<bool>;

    /// Remove each of the given nodes and their subtrees.
    fn remove_all(&self, paths: &[String]) -> StoreResult<Vec<bool>> {
        paths.iter().map(|path| self.remove(path)).collect()
    }

    /// List the names of the direct children of a node.
    fn list_children(&self, path: &str) -> StoreResult<Vec<String>>;

    /// Get the records of the direct children of a node, keyed by child name.
    ///
    /// Children which hold no record are omitted.
    fn get_child_values(&self, path: &str) -> StoreResult<BTreeMap<String, Record>>;

    /// Get the metadata of a node.
    fn stat(&self, path: &str) -> StoreResult<Option<NodeStat>>;

    /// Remove every node owned by the given session, returning the number removed.
    fn expire_session(&self, session: &SessionId) -> StoreResult<usize>;
}

/// Validate the given path.
pub(crate) fn validate_path(path: &str) -> StoreResult<()> {
    let valid = path.len() > 1 && path.starts_with('/') && path[1..].split('/').all(|seg| !seg.is_empty());
    if !valid {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// The parent path of the given path, `None` for top-level nodes.
pub(crate) fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

#[cfg(test)]
mod sled_store_test;
