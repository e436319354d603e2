//! Collection catalog: key candidates and dedup rules.
//!
//! Everything collection-specific is declared here as data. Adding a
//! collection means adding a [`CollectionSpec`], not touching resolver code.

use crate::{error::Result, CollectionName, Error};
use serde::{Deserialize, Serialize};

/// Collections known to the point-of-sale application.
pub const KNOWN_COLLECTIONS: [&str; 9] = [
    "sales",
    "inventory",
    "customers",
    "suppliers",
    "grn",
    "jobNotes",
    "warranty",
    "users",
    "cashFlow",
];

/// How a field value is normalized before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalizer {
    /// Trimmed text
    Exact,
    /// Trimmed, lowercased text
    Email,
    /// Digits only
    Phone,
}

impl Normalizer {
    /// Normalize a value, returning `None` when nothing meaningful is left.
    pub fn apply(&self, raw: &str) -> Option<String> {
        let normalized = match self {
            Normalizer::Exact => raw.trim().to_string(),
            Normalizer::Email => raw.trim().to_lowercase(),
            Normalizer::Phone => raw.chars().filter(char::is_ascii_digit).collect(),
        };
        (!normalized.is_empty()).then_some(normalized)
    }
}

/// One component of a dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPart {
    pub field: String,
    pub normalizer: Normalizer,
}

impl KeyPart {
    pub fn new(field: impl Into<String>, normalizer: Normalizer) -> Self {
        Self {
            field: field.into(),
            normalizer,
        }
    }
}

/// A composite identity: records agreeing on every part are duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupRule {
    pub parts: Vec<KeyPart>,
}

impl DedupRule {
    /// Rule over a single field.
    pub fn single(field: impl Into<String>, normalizer: Normalizer) -> Self {
        Self {
            parts: vec![KeyPart::new(field, normalizer)],
        }
    }

    /// Rule over several fields at once.
    pub fn composite(parts: Vec<KeyPart>) -> Self {
        Self { parts }
    }
}

/// Sync description of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    /// Collection name
    pub name: CollectionName,
    /// Natural key candidates, highest priority first
    pub key_fields: Vec<String>,
    /// Duplicate rules applied after a load
    #[serde(default)]
    pub dedup_rules: Vec<DedupRule>,
}

impl CollectionSpec {
    /// Create a collection keyed by the given candidates.
    pub fn new<S: Into<String>>(
        name: impl Into<CollectionName>,
        key_fields: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            dedup_rules: Vec::new(),
        }
    }

    /// Builder-style method to add a dedup rule.
    pub fn with_dedup(mut self, rule: DedupRule) -> Self {
        self.dedup_rules.push(rule);
        self
    }
}

/// Catalog of synchronized collections under one remote namespace.
///
/// Collections keep their declaration order, which is the order downloads
/// run in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSchema {
    /// Remote namespace every collection path is rooted at
    pub namespace: String,
    /// Collections in declaration order
    pub collections: Vec<CollectionSpec>,
}

impl SyncSchema {
    /// Create an empty schema.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            collections: Vec::new(),
        }
    }

    /// Add a collection, replacing any previous spec with the same name.
    pub fn add_collection(&mut self, spec: CollectionSpec) -> &mut Self {
        match self.collections.iter_mut().find(|c| c.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.collections.push(spec),
        }
        self
    }

    /// Builder-style method to add a collection.
    pub fn with_collection(mut self, spec: CollectionSpec) -> Self {
        self.add_collection(spec);
        self
    }

    /// Get a collection spec by name.
    pub fn get_collection(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Get a collection spec, failing for unknown names.
    pub fn collection(&self, name: &str) -> Result<&CollectionSpec> {
        self.get_collection(name)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    /// Names of all collections, in declaration order.
    pub fn collection_names(&self) -> Vec<CollectionName> {
        self.collections.iter().map(|c| c.name.clone()).collect()
    }

    /// The point-of-sale catalog.
    pub fn point_of_sale(namespace: impl Into<String>) -> Self {
        use Normalizer::{Email, Exact, Phone};

        Self::new(namespace)
            .with_collection(
                CollectionSpec::new("sales", ["invoiceNumber", "code", "id"])
                    .with_dedup(DedupRule::single("invoiceNumber", Exact)),
            )
            .with_collection(
                CollectionSpec::new("inventory", ["code", "id"])
                    .with_dedup(DedupRule::single("code", Exact)),
            )
            .with_collection(
                CollectionSpec::new("customers", ["customerId", "code", "id"])
                    .with_dedup(DedupRule::single("phone", Phone))
                    .with_dedup(DedupRule::single("email", Email)),
            )
            .with_collection(
                CollectionSpec::new("suppliers", ["supplierId", "code", "id"])
                    .with_dedup(DedupRule::single("phone", Phone))
                    .with_dedup(DedupRule::single("email", Email)),
            )
            .with_collection(CollectionSpec::new("grn", ["grnNumber", "code", "id"]))
            .with_collection(CollectionSpec::new(
                "jobNotes",
                ["jobNoteNumber", "code", "id"],
            ))
            .with_collection(CollectionSpec::new(
                "warranty",
                ["warrantyNumber", "code", "id"],
            ))
            .with_collection(
                CollectionSpec::new("users", ["email", "firebaseUid", "userId", "id"])
                    .with_dedup(DedupRule::single("email", Email))
                    .with_dedup(DedupRule::single("firebaseUid", Exact)),
            )
            .with_collection(CollectionSpec::new(
                "cashFlow",
                ["transactionId", "code", "id"],
            ))
    }
}
