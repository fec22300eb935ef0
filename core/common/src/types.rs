//! Identifier types used throughout tasksync.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            ///
            /// # Errors
            /// - Returns error if id is empty or only whitespace
            pub fn new(id: impl Into<String>) -> crate::Result<Self> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(crate::Error::InvalidInput(format!(
                        "{} cannot be empty",
                        $label
                    )));
                }
                Ok(Self(id))
            }

            /// Get the inner string value.
            pub fn as_str(&self) -> &str {
                &self.0
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
    };
}

string_id!(
    /// Identifier of the principal owning a set of tasks.
    OwnerId,
    "OwnerId"
);

string_id!(
    /// Identifier assigned by the local store at creation. Never reused.
    LocalId,
    "LocalId"
);

string_id!(
    /// Identifier assigned by the remote store once a create succeeds.
    RemoteId,
    "RemoteId"
);

impl LocalId {
    /// Generate a fresh local identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_id_creation() {
        let id = OwnerId::new("user-1").unwrap();
        assert_eq!(id.as_str(), "user-1");
        assert_eq!(id.to_string(), "user-1");
    }

    #[test]
    fn test_empty_ids_fail() {
        assert!(OwnerId::new("").is_err());
        assert!(RemoteId::new("   ").is_err());
    }

    #[test]
    fn test_generated_local_ids_are_unique() {
        assert_ne!(LocalId::generate(), LocalId::generate());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = RemoteId::new("doc-42").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"doc-42\"");
    }
}
