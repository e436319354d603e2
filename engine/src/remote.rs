//! Shapes exchanged with the remote store.
//!
//! Outbound, a record becomes a remote payload: business fields only, keyed
//! by its natural key and stamped with sync metadata. Inbound, a collection
//! snapshot (an object keyed by natural key) becomes local-shaped records.

use crate::record::{ID_FIELD, LAST_SYNCED_AT_FIELD, SYNCED_BY_FIELD};
use crate::Record;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Actor recorded for unattended writes.
pub const SYSTEM_ACTOR: &str = "system";

/// Build the payload written at `<collection path>/<key>`.
///
/// Local bookkeeping (`localId`, `firebaseId`, `synced`) is never included.
/// `id` is set to the key so the stored document always names itself.
pub fn remote_payload(record: &Record, key: &str, actor: &str, synced_at: DateTime<Utc>) -> Value {
    let mut object = record.fields.clone();
    object.insert(ID_FIELD.into(), Value::from(key));
    object.insert(
        LAST_SYNCED_AT_FIELD.into(),
        Value::from(synced_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    object.insert(SYNCED_BY_FIELD.into(), Value::from(actor));
    Value::Object(object)
}

/// Turn one remote child into a synced local record.
///
/// Only objects are records; scalars and nulls under a collection are skipped.
pub fn materialize_entry(key: &str, value: &Value) -> Option<Record> {
    let Value::Object(fields) = value else {
        return None;
    };
    let mut record = Record::new(fields.clone());
    record.firebase_id = Some(key.to_string());
    record.synced = true;
    Some(record)
}

/// Flatten a collection snapshot into records.
///
/// An absent snapshot is an empty collection. Arrays are accepted as well,
/// since tree stores may hand back densely numbered children as one; their
/// indices become the keys.
pub fn materialize(snapshot: Option<&Value>) -> Vec<Record> {
    match snapshot {
        Some(Value::Object(children)) => children
            .iter()
            .filter_map(|(key, value)| materialize_entry(key, value))
            .collect(),
        Some(Value::Array(children)) => children
            .iter()
            .enumerate()
            .filter_map(|(index, value)| materialize_entry(&index.to_string(), value))
            .collect(),
        _ => Vec::new(),
    }
}
