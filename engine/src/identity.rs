//! Natural key resolution.
//!
//! A record is addressed remotely by the first populated field of its
//! collection's candidate list. Resolution is pure; when no candidate is
//! populated a create asks the caller to synthesize a key, which the caller
//! must do exactly once and write back onto the record.

use crate::{
    error::Result, record::ID_FIELD, Error, NaturalKey, QueueItem, Record, SyncSchema,
};

/// Outcome of resolving a queue item's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Key taken from the record's own fields
    Derived(NaturalKey),
    /// No candidate populated; a fresh remote key must be generated
    Synthesize,
}

/// Resolves natural keys from a [`SyncSchema`]'s candidate table.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver<'a> {
    schema: &'a SyncSchema,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(schema: &'a SyncSchema) -> Self {
        Self { schema }
    }

    /// Key candidates of a collection, highest priority first.
    pub fn key_fields(&self, collection: &str) -> Result<&'a [String]> {
        Ok(&self.schema.collection(collection)?.key_fields)
    }

    /// Derive a record's key from its fields, if any candidate is populated.
    pub fn derive(&self, collection: &str, record: &Record) -> Result<Option<NaturalKey>> {
        for field in self.key_fields(collection)? {
            if let Some(key) = record.text(field) {
                return validate_key(key).map(Some);
            }
        }
        Ok(None)
    }

    /// Resolve the key a queue item must be delivered under.
    ///
    /// Creates without a derivable key return [`Resolution::Synthesize`];
    /// updates and deletes fail with [`Error::MissingIdentity`], since a fresh
    /// key would silently fork the remote record.
    pub fn resolve(&self, item: &QueueItem) -> Result<Resolution> {
        match self.derive(&item.collection, &item.payload)? {
            Some(key) => Ok(Resolution::Derived(key)),
            None if item.operation.may_synthesize_key() => Ok(Resolution::Synthesize),
            None => Err(Error::MissingIdentity {
                collection: item.collection.clone(),
                operation: item.operation,
                fields: item.payload.field_names(),
            }),
        }
    }
}

/// Check that a key can be used as a single path segment.
pub fn validate_key(key: NaturalKey) -> Result<NaturalKey> {
    if key.is_empty() || key.contains('/') || key == "." || key == ".." {
        return Err(Error::InvalidKey(key));
    }
    Ok(key)
}

/// Write a synthesized key back onto a record so later resolution derives it.
pub fn assign_key(record: &mut Record, key: &str) {
    record.set(ID_FIELD, key);
}
