//! Planning how a downloaded collection replaces the local one.
//!
//! The remote copy is the truth for everything the device has already synced.
//! Records still waiting in the queue are the truth for themselves: a pending
//! local record is never overwritten, and a record with a pending delete is
//! never brought back.

use crate::{error::Result, IdentityResolver, LocalId, NaturalKey, Record};
use std::collections::{HashMap, HashSet};

/// Local store changes that bring a collection in line with a download.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Synced local records to delete (stale or superseded)
    pub remove: Vec<LocalId>,
    /// Downloaded records to create locally
    pub insert: Vec<Record>,
    /// Downloaded keys held back by pending local work
    pub skipped: Vec<NaturalKey>,
    /// Synced local records already identical to the remote
    pub unchanged: usize,
}

impl MergePlan {
    /// Check if applying the plan would touch the local store.
    pub fn is_noop(&self) -> bool {
        self.remove.is_empty() && self.insert.is_empty()
    }
}

/// Plan the merge of `downloaded` into the `local` records of a collection.
///
/// `pending_deletes` holds keys with a delete still queued.
pub fn plan_merge(
    resolver: &IdentityResolver<'_>,
    collection: &str,
    local: &[Record],
    downloaded: Vec<Record>,
    pending_deletes: &HashSet<NaturalKey>,
) -> Result<MergePlan> {
    resolver.key_fields(collection)?;
    let mut plan = MergePlan::default();

    let mut protected: HashSet<NaturalKey> = pending_deletes.clone();
    let mut synced_by_key: HashMap<NaturalKey, &Record> = HashMap::new();
    let mut stale: Vec<LocalId> = Vec::new();

    for record in local {
        // A local key that fails validation never reached the remote.
        let key = match &record.firebase_id {
            Some(key) => Some(key.clone()),
            None => resolver.derive(collection, record).ok().flatten(),
        };

        if record.is_pending() {
            protected.extend(key);
            continue;
        }

        match (key, record.local_id) {
            (Some(key), Some(_)) if !synced_by_key.contains_key(&key) => {
                synced_by_key.insert(key, record);
            }
            (_, Some(local_id)) => stale.push(local_id),
            (_, None) => {}
        }
    }

    for remote in downloaded {
        let Some(key) = remote.firebase_id.clone() else {
            continue;
        };

        if protected.contains(&key) {
            plan.skipped.push(key);
            continue;
        }

        match synced_by_key.remove(&key) {
            Some(existing) if existing.same_content(&remote) => plan.unchanged += 1,
            Some(existing) => {
                plan.remove.extend(existing.local_id);
                plan.insert.push(remote);
            }
            None => plan.insert.push(remote),
        }
    }

    // Whatever synced record the remote no longer has was deleted elsewhere.
    plan.remove
        .extend(synced_by_key.into_values().filter_map(|r| r.local_id));
    plan.remove.extend(stale);
    plan.remove.sort_unstable();

    Ok(plan)
}
