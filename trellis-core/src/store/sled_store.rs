//! A hierarchical store backed by an embedded sled database.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Config as SledConfig, Db, IVec, Tree};

use super::{parent_path, validate_path, Durability, HierarchicalStore, Mutator, NodeStat, StoreError, StoreResult};
use crate::models::{Record, SessionId};

/// The DB tree holding all store nodes.
const TREE_NODES: &str = "nodes";
/// The key prefix of store nodes, followed by the node's path.
const PREFIX_NODE: &[u8; 1] = b"n";
/// The key prefix of the ephemeral owner index, followed by `<session>\0<path>`.
const PREFIX_EPHEMERAL: &[u8; 1] = b"e";

/// The value stored for every node.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct StoredNode {
    #[serde(default)]
    record: Option<Record>,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    ephemeral_owner: Option<SessionId>,
}

/// A hierarchical store backed by sled.
///
/// Nodes and the ephemeral owner index share one tree, so that recursive removals are applied
/// as a single batch.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open the store at the given path.
    ///
    /// A sled database is held by at most one process, so every ephemeral node found on open
    /// belongs to a session which ended without expiring; those sessions are expired here.
    ///
    /// This call blocks; async callers should wrap it in `spawn_blocking`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = SledConfig::new().path(path.as_ref()).mode(sled::Mode::HighThroughput).open()?;
        let tree = db.open_tree(TREE_NODES)?;
        let store = Self { db, tree };
        let expired = store.expire_orphaned_sessions()?;
        tracing::debug!(path = ?path.as_ref(), expired, "opened sled store");
        Ok(store)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Expire every session which still owns ephemeral nodes, returning the number of nodes removed.
    fn expire_orphaned_sessions(&self) -> StoreResult<usize> {
        let mut sessions = BTreeSet::new();
        for key_res in self.tree.scan_prefix(PREFIX_EPHEMERAL).keys() {
            let key = key_res?;
            let rest = &key[PREFIX_EPHEMERAL.len()..];
            let end = rest.iter().position(|byte| *byte == 0).unwrap_or(rest.len());
            sessions.insert(SessionId::from(String::from_utf8_lossy(&rest[..end]).into_owned()));
        }
        let mut count = 0;
        for session in sessions {
            tracing::warn!(%session, "expiring session left over from a previous process");
            count += self.expire_session(&session)?;
        }
        Ok(count)
    }

    fn node_key(path: &str) -> IVec {
        IVec::from(PREFIX_NODE.iter().copied().chain(path.bytes()).collect::<Vec<u8>>())
    }

    fn children_prefix(path: &str) -> IVec {
        IVec::from(PREFIX_NODE.iter().copied().chain(path.bytes()).chain(std::iter::once(b'/')).collect::<Vec<u8>>())
    }

    fn ephemeral_key(session: &SessionId, path: &str) -> IVec {
        IVec::from(
            PREFIX_EPHEMERAL
                .iter()
                .copied()
                .chain(session.as_str().bytes())
                .chain(std::iter::once(0u8))
                .chain(path.bytes())
                .collect::<Vec<u8>>(),
        )
    }

    fn ephemeral_prefix(session: &SessionId) -> IVec {
        IVec::from(PREFIX_EPHEMERAL.iter().copied().chain(session.as_str().bytes()).chain(std::iter::once(0u8)).collect::<Vec<u8>>())
    }

    fn path_of_key(key: &[u8]) -> String {
        String::from_utf8_lossy(&key[PREFIX_NODE.len()..]).into_owned()
    }

    fn encode(path: &str, node: &StoredNode) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(node).map_err(|source| StoreError::Codec { path: path.into(), source })
    }

    fn decode(path: &str, bytes: &[u8]) -> StoreResult<StoredNode> {
        serde_json::from_slice(bytes).map_err(|source| StoreError::Codec { path: path.into(), source })
    }

    fn read_node(&self, path: &str) -> StoreResult<Option<StoredNode>> {
        match self.tree.get(Self::node_key(path))? {
            Some(bytes) => Ok(Some(Self::decode(path, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Ensure every ancestor of the given path exists, creating absent ones as persistent nodes.
    fn ensure_parents(&self, path: &str) -> StoreResult<()> {
        let mut ancestors = vec![];
        let mut current = parent_path(path);
        while let Some(parent) = current {
            ancestors.push(parent);
            current = parent_path(parent);
        }
        for (idx, ancestor) in ancestors.iter().rev().enumerate() {
            match self.read_node(ancestor)? {
                Some(node) if node.ephemeral_owner.is_some() => return Err(StoreError::EphemeralParent(path.into())),
                Some(_) => continue,
                None => {
                    let bytes = Self::encode(ancestor, &StoredNode::default())?;
                    // A concurrent creator may win the race, which is fine.
                    let _ = self.tree.compare_and_swap(Self::node_key(ancestor), None as Option<&[u8]>, Some(bytes))?;
                    tracing::trace!(path = ancestor, depth = idx, "created parent node");
                }
            }
        }
        Ok(())
    }

    /// Collect the keys of a node and its whole subtree into the given batch.
    fn collect_subtree(&self, path: &str, batch: &mut sled::Batch) -> StoreResult<usize> {
        let mut count = 0;
        let mut remove = |key: IVec, node_path: &str, bytes: &[u8]| -> StoreResult<()> {
            let node = Self::decode(node_path, bytes)?;
            if let Some(owner) = node.ephemeral_owner.as_ref() {
                batch.remove(Self::ephemeral_key(owner, node_path));
            }
            batch.remove(key);
            count += 1;
            Ok(())
        };
        if let Some(bytes) = self.tree.get(Self::node_key(path))? {
            remove(Self::node_key(path), path, &bytes)?;
        }
        for kv_res in self.tree.scan_prefix(Self::children_prefix(path)) {
            let (key, bytes) = kv_res?;
            let node_path = Self::path_of_key(&key);
            remove(key, &node_path, &bytes)?;
        }
        Ok(count)
    }
}

impl HierarchicalStore for SledStore {
    fn exists(&self, paths: &[String]) -> StoreResult<Vec<bool>> {
        paths
            .iter()
            .map(|path| -> StoreResult<bool> {
                validate_path(path)?;
                Ok(self.tree.contains_key(Self::node_key(path))?)
            })
            .collect()
    }

    #[tracing::instrument(level = "trace", skip(self, value))]
    fn create(&self, path: &str, value: Option<Record>, durability: Durability) -> StoreResult<bool> {
        validate_path(path)?;
        self.ensure_parents(path)?;
        let ephemeral_owner = match durability {
            Durability::Persistent => None,
            Durability::Ephemeral(session) => Some(session),
        };
        let node = StoredNode { record: value, version: 0, ephemeral_owner: ephemeral_owner.clone() };
        let bytes = Self::encode(path, &node)?;
        let res = self.tree.compare_and_swap(Self::node_key(path), None as Option<&[u8]>, Some(bytes))?;
        if res.is_err() {
            return Ok(false);
        }
        if let Some(owner) = ephemeral_owner {
            self.tree.insert(Self::ephemeral_key(&owner, path), path.as_bytes())?;
        }
        Ok(true)
    }

    fn get(&self, path: &str) -> StoreResult<Option<Record>> {
        validate_path(path)?;
        Ok(self.read_node(path)?.and_then(|node| node.record))
    }

    fn set(&self, path: &str, value: Record) -> StoreResult<bool> {
        let value = &value;
        self.update(path, &|_| Some(value.clone()))
    }

    #[tracing::instrument(level = "trace", skip(self, mutator))]
    fn update(&self, path: &str, mutator: Mutator<'_>) -> StoreResult<bool> {
        validate_path(path)?;
        self.ensure_parents(path)?;
        let key = Self::node_key(path);
        loop {
            let current = self.tree.get(&key)?;
            let node = match current.as_ref() {
                Some(bytes) => Some(Self::decode(path, bytes)?),
                None => None,
            };
            let (record, version, ephemeral_owner) = match node {
                Some(node) => (node.record, node.version + 1, node.ephemeral_owner),
                None => (None, 0, None),
            };
            let record = match mutator(record) {
                Some(record) => record,
                None => return Ok(false),
            };
            let bytes = Self::encode(path, &StoredNode { record: Some(record), version, ephemeral_owner })?;
            match self.tree.compare_and_swap(&key, current, Some(bytes))? {
                Ok(()) => return Ok(true),
                Err(_) => {
                    tracing::trace!(path, "concurrent write detected during update, retrying");
                    continue;
                }
            }
        }
    }

    #[tracing::instrument(level = "trace", skip(self))]
    fn remove(&self, path: &str) -> StoreResult<bool> {
        validate_path(path)?;
        if !self.tree.contains_key(Self::node_key(path))? {
            return Ok(false);
        }
        let mut batch = sled::Batch::default();
        let count = self.collect_subtree(path, &mut batch)?;
        self.tree.apply_batch(batch)?;
        tracing::trace!(path, count, "removed subtree");
        Ok(true)
    }

    fn list_children(&self, path: &str) -> StoreResult<Vec<String>> {
        validate_path(path)?;
        let prefix = Self::children_prefix(path);
        let mut children = vec![];
        for key_res in self.tree.scan_prefix(&prefix).keys() {
            let key = key_res?;
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if !name.contains('/') {
                children.push(name);
            }
        }
        Ok(children)
    }

    fn get_child_values(&self, path: &str) -> StoreResult<BTreeMap<String, Record>> {
        validate_path(path)?;
        let prefix = Self::children_prefix(path);
        let mut values = BTreeMap::new();
        for kv_res in self.tree.scan_prefix(&prefix) {
            let (key, bytes) = kv_res?;
            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if name.contains('/') {
                continue;
            }
            if let Some(record) = Self::decode(&Self::path_of_key(&key), &bytes)?.record {
                values.insert(name, record);
            }
        }
        Ok(values)
    }

    fn stat(&self, path: &str) -> StoreResult<Option<NodeStat>> {
        validate_path(path)?;
        Ok(self.read_node(path)?.map(|node| NodeStat { version: node.version, ephemeral_owner: node.ephemeral_owner }))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn expire_session(&self, session: &SessionId) -> StoreResult<usize> {
        let mut batch = sled::Batch::default();
        let mut count = 0;
        for kv_res in self.tree.scan_prefix(Self::ephemeral_prefix(session)) {
            let (key, path_bytes) = kv_res?;
            let path = String::from_utf8_lossy(&path_bytes).into_owned();
            count += self.collect_subtree(&path, &mut batch)?;
            batch.remove(key);
        }
        self.tree.apply_batch(batch)?;
        tracing::debug!(count, "expired session nodes");
        Ok(count)
    }
}
