//! Remote addressing.

use crate::{CollectionName, SyncSchema};
use std::fmt;

/// `"<namespace>/<collection>"`, the remote root of one collection.
///
/// This is a pure function of the collection name; per-user partitioning
/// would be introduced here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionPath {
    namespace: String,
    collection: CollectionName,
}

impl CollectionPath {
    pub fn new(namespace: impl Into<String>, collection: impl Into<CollectionName>) -> Self {
        Self {
            namespace: namespace.into(),
            collection: collection.into(),
        }
    }

    /// Path of a collection under the schema's namespace.
    pub fn of(schema: &SyncSchema, collection: &str) -> Self {
        Self::new(schema.namespace.clone(), collection)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Path of one record: `"<namespace>/<collection>/<key>"`.
    pub fn record(&self, key: &str) -> String {
        format!("{}/{}/{}", self.namespace, self.collection, key)
    }

    /// Split a `"<namespace>/<collection>"` path.
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments = path.trim_matches('/').split('/');
        let namespace = segments.next().filter(|s| !s.is_empty())?;
        let collection = segments.next().filter(|s| !s.is_empty())?;
        if segments.next().is_some() {
            return None;
        }
        Some(Self::new(namespace, collection))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.collection)
    }
}
