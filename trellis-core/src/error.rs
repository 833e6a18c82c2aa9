//! Trellis error abstractions.

use std::fmt;

use thiserror::Error;

use crate::models::ParticipantId;
use crate::store::StoreError;

/// A result type where the error is an `AccessError`.
pub type AccessResult<T> = ::std::result::Result<T, AccessError>;

/// A result type where the error is a `LifecycleError`.
pub type LifecycleResult<T> = ::std::result::Result<T, LifecycleError>;

/// Error variants of cluster accessor operations.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The required structure of the cluster or of a participant is missing.
    #[error("structure is not valid: {0}")]
    InvalidStructure(String),
    /// The entity to be added already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// The entity to be read or removed does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation would violate an invariant of the cluster model.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The reason an accessor operation failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    InvariantViolated,
    NotFound,
    AlreadyExists,
    StoreError,
}

impl FailureReason {
    /// The label value used for this reason in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvariantViolated => "invariant_violated",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::StoreError => "store_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AccessError {
    /// The reason of this failure.
    pub fn reason(&self) -> FailureReason {
        match self {
            Self::InvalidStructure(_) | Self::InvariantViolated(_) => FailureReason::InvariantViolated,
            Self::AlreadyExists(_) => FailureReason::AlreadyExists,
            Self::NotFound(_) => FailureReason::NotFound,
            Self::Store(_) => FailureReason::StoreError,
        }
    }
}

/// Error variants of the participant connection and its lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A state model factory is already registered under the given name.
    #[error("a state model factory is already registered for {0}")]
    DuplicateFactory(String),
    /// State model factories may not be registered once the engine has been connected.
    #[error("can not register state model factory for {0} after connecting")]
    RegistrationAfterConnect(String),
    /// Another session of the participant is already live.
    #[error("participant {0} already has a live session")]
    AlreadyLive(ParticipantId),
    /// The connection was refused by the cluster.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    /// The operation requires a connected session.
    #[error("participant is not connected")]
    NotConnected,
    /// A blocking task of the lifecycle failed to complete.
    #[error("lifecycle task failed: {0}")]
    Task(String),
    /// An accessor operation failed.
    #[error(transparent)]
    Access(#[from] AccessError),
    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
