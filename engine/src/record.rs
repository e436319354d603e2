//! Record types for business entities.

use crate::{error::Result, Error, LocalId, NaturalKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field map of a record, in JSON form.
pub type Fields = serde_json::Map<String, Value>;

/// Local store identifier, never sent to the remote.
pub const LOCAL_ID_FIELD: &str = "localId";
/// Remote key of a record materialized from the remote.
pub const FIREBASE_ID_FIELD: &str = "firebaseId";
/// Whether the last local write reached the remote.
pub const SYNCED_FIELD: &str = "synced";
/// Field that receives the natural key on every remote write.
pub const ID_FIELD: &str = "id";
/// Remote write timestamp (RFC 3339).
pub const LAST_SYNCED_AT_FIELD: &str = "lastSyncedAt";
/// Actor that performed the remote write.
pub const SYNCED_BY_FIELD: &str = "syncedBy";

const BOOKKEEPING: [&str; 3] = [LOCAL_ID_FIELD, FIREBASE_ID_FIELD, SYNCED_FIELD];

/// One business entity (sale, product, user, ...).
///
/// Bookkeeping lives in typed fields; everything else is in `fields`. When
/// serialized the record is a single flat JSON object, which is the shape the
/// local store persists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identifier assigned by the local store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    /// Remote key, set only on downloaded or listener records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firebase_id: Option<NaturalKey>,
    /// Whether the record's last known write has reached the remote
    #[serde(default)]
    pub synced: bool,
    /// Business fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    /// Create an unsynced record from business fields.
    ///
    /// Bookkeeping keys present in `fields` are dropped; they are owned by the
    /// local store and the sync engine, not by callers.
    pub fn new(mut fields: Fields) -> Self {
        for name in BOOKKEEPING {
            fields.remove(name);
        }
        Self {
            local_id: None,
            firebase_id: None,
            synced: false,
            fields,
        }
    }

    /// Parse a flat JSON object, keeping any bookkeeping it carries.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidRecord("record must be a JSON object".into()));
        }
        serde_json::from_value(value).map_err(|e| Error::InvalidRecord(e.to_string()))
    }

    /// Flatten back into a single JSON object.
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        if let Some(local_id) = self.local_id {
            object.insert(LOCAL_ID_FIELD.into(), Value::from(local_id));
        }
        if let Some(firebase_id) = &self.firebase_id {
            object.insert(FIREBASE_ID_FIELD.into(), Value::from(firebase_id.clone()));
        }
        object.insert(SYNCED_FIELD.into(), Value::Bool(self.synced));
        Value::Object(object)
    }

    /// Builder-style method to attach the local store identifier.
    pub fn with_local_id(mut self, local_id: LocalId) -> Self {
        self.local_id = Some(local_id);
        self
    }

    /// Get a business field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set a business field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Render a field as key text.
    ///
    /// Strings are trimmed and must be non-empty; integers and floats render
    /// in decimal. Anything else (null, bool, arrays, objects) has no text.
    pub fn text(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Sorted business field names, for diagnostics.
    pub fn field_names(&self) -> String {
        let mut names: Vec<&str> = self.fields.keys().map(String::as_str).collect();
        names.sort_unstable();
        names.join(", ")
    }

    /// Check if the record still waits for a remote write.
    pub fn is_pending(&self) -> bool {
        !self.synced
    }

    /// Compare business fields only, ignoring bookkeeping and sync metadata.
    pub fn same_content(&self, other: &Record) -> bool {
        let strip = |fields: &Fields| {
            let mut fields = fields.clone();
            fields.remove(LAST_SYNCED_AT_FIELD);
            fields.remove(SYNCED_BY_FIELD);
            fields
        };
        strip(&self.fields) == strip(&other.fields)
    }
}
