//! Typed identifiers.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    /// Regular expression used to validate identifiers which become store path segments.
    static ref RE_ID: Regex = Regex::new(r"^[-_.a-zA-Z0-9]{1,255}$").expect("failed to compile RE_ID regex");
}

/// The error message used when an identifier fails validation.
pub const ERR_INVALID_ID: &str = "invalid identifier, must match the pattern `^[-_.a-zA-Z0-9]{1,255}$`";

/// Check if the given value is usable as an identifier.
///
/// Identifiers are used verbatim as store path segments, so they may not contain `/`.
pub fn is_valid_id(val: &str) -> bool {
    RE_ID.is_match(val)
}

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from the given value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The string form of this identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Check if this identifier is usable as a store path segment.
            pub fn is_valid(&self) -> bool {
                is_valid_id(&self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(val: &str) -> Self {
                Self(val.to_string())
            }
        }

        impl From<String> for $name {
            fn from(val: String) -> Self {
                Self(val)
            }
        }
    };
}

typed_id!(
    /// The identity of a cluster, and the root segment of its store subtree.
    ClusterId
);
typed_id!(
    /// The identity of a resource.
    ResourceId
);
typed_id!(
    /// The identity of a partition of a resource.
    PartitionId
);
typed_id!(
    /// The identity of a participant, unique within a cluster.
    ParticipantId
);
typed_id!(
    /// The identity of a controller instance.
    ControllerId
);
typed_id!(
    /// The identity of a state model definition.
    StateModelDefId
);
typed_id!(
    /// The identity of a constraint item within a constraint record.
    ConstraintId
);
typed_id!(
    /// The identity of a persisted controller context.
    ContextId
);
typed_id!(
    /// The identity of a message sent to a participant.
    MessageId
);
typed_id!(
    /// A participant's connection epoch.
    SessionId
);

impl SessionId {
    /// Generate a new random session ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl MessageId {
    /// Generate a new random message ID.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl PartitionId {
    /// Build the canonical partition ID for the given resource and partition offset.
    pub fn for_resource(resource: &ResourceId, offset: u32) -> Self {
        Self(format!("{}_{}", resource, offset))
    }
}
