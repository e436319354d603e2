//! Error types for the tillsync engine.

use crate::{CollectionName, Operation, SeqNo};
use thiserror::Error;

/// All possible errors from the tillsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown collection: {0}")]
    UnknownCollection(CollectionName),

    /// An update or delete whose record carries none of the collection's
    /// key candidates. `fields` lists the fields that were present.
    #[error("missing identity for {operation} on '{collection}' (fields: [{fields}])")]
    MissingIdentity {
        collection: CollectionName,
        operation: Operation,
        fields: String,
    },

    #[error("invalid natural key '{0}': keys must be non-empty path segments other than '.' and '..'")]
    InvalidKey(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("queue item not found: {0}")]
    ItemNotFound(SeqNo),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::UnknownCollection("orders".into());
        assert_eq!(err.to_string(), "unknown collection: orders");

        let err = Error::MissingIdentity {
            collection: "users".into(),
            operation: Operation::Update,
            fields: "name, role".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing identity for update on 'users' (fields: [name, role])"
        );

        let err = Error::InvalidKey("a/b".into());
        assert_eq!(
            err.to_string(),
            "invalid natural key 'a/b': keys must be non-empty path segments other than '.' and '..'"
        );
    }
}
