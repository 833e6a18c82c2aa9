//! Cluster accessors.
//!
//! Accessors translate between raw store nodes and typed cluster entities, and enforce the
//! invariants of the cluster model at the point of mutation. Writes spanning several store
//! paths are not atomic; the existence checks of the next operation guard against partial
//! state.

mod cluster;
mod participant;
mod resource;

use crate::error::{AccessError, AccessResult};
use crate::models::{is_valid_id, ClusterId, ERR_INVALID_ID};
use crate::source::StoreSource;
use crate::store::{PathBuilder, StoreHandle};

pub use cluster::ClusterAccessor;
pub use participant::ParticipantAccessor;
pub use resource::ResourceAccessor;

const METRIC_ACCESS_FAILURES: &str = "trellis_accessor_failures";

/// The cluster an accessor operates on, along with its store and path layout.
#[derive(Clone)]
pub struct ClusterScope {
    pub(crate) cluster_id: ClusterId,
    pub(crate) store: StoreHandle,
    pub(crate) paths: PathBuilder,
}

impl ClusterScope {
    pub fn new(cluster_id: ClusterId, store: StoreHandle) -> Self {
        metrics::register_counter!(METRIC_ACCESS_FAILURES, metrics::Unit::Count, "failed cluster accessor operations");
        let paths = PathBuilder::new(&cluster_id);
        Self { cluster_id, store, paths }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn paths(&self) -> &PathBuilder {
        &self.paths
    }

    /// A data source reading straight from the store.
    pub fn source(&self) -> StoreSource<'_> {
        StoreSource::new(self.store.as_ref(), &self.paths)
    }

    /// Check if every required path of the cluster exists, in one batched call.
    pub fn is_structure_valid(&self) -> AccessResult<bool> {
        let exists = self.store.exists(&self.paths.required_cluster_paths())?;
        Ok(exists.into_iter().all(|exists| exists))
    }

    /// Fail with `InvalidStructure` unless the cluster's structure is valid.
    pub fn ensure_structure(&self) -> AccessResult<()> {
        if !self.is_structure_valid()? {
            return Err(AccessError::InvalidStructure(format!("cluster {} is not set up", self.cluster_id)));
        }
        Ok(())
    }

    /// Check if a single path exists.
    pub(crate) fn exists(&self, path: &str) -> AccessResult<bool> {
        let exists = self.store.exists(&[path.to_string()])?;
        Ok(exists.first().copied().unwrap_or(false))
    }

    /// Log and count the failure of the given operation, if it failed.
    pub(crate) fn observe<T>(&self, op: &'static str, res: AccessResult<T>) -> AccessResult<T> {
        if let Err(err) = &res {
            let reason = err.reason();
            match err {
                AccessError::Store(_) => tracing::error!(cluster = %self.cluster_id, op, %reason, error = ?err, "store error during accessor operation"),
                _ => tracing::error!(cluster = %self.cluster_id, op, %reason, error = %err, "accessor operation rejected"),
            }
            metrics::increment_counter!(METRIC_ACCESS_FAILURES, "op" => op, "reason" => reason.as_str());
        }
        res
    }
}

/// Fail with `InvariantViolated` unless the given identifier is a valid path segment.
pub(crate) fn ensure_valid_id(kind: &str, id: &str) -> AccessResult<()> {
    if !is_valid_id(id) {
        return Err(AccessError::InvariantViolated(format!("{} id `{}`: {}", kind, id, ERR_INVALID_ID)));
    }
    Ok(())
}

#[cfg(test)]
mod resource_test;
