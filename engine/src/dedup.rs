//! Duplicate reconciliation.
//!
//! After a collection is loaded, records describing the same real-world
//! entity (same normalized phone, same email, ...) are collapsed. The first
//! record in input order wins; later ones sharing any rule key are reported as
//! removed. This module only classifies; deleting the losers is up to the
//! caller.

use crate::{error::Result, DedupRule, Record, SyncSchema};
use std::collections::HashSet;

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileOutcome {
    /// Records kept, in input order
    pub unique: Vec<Record>,
    /// Records classified as duplicates, in input order
    pub removed: Vec<Record>,
}

/// Classifies records by a collection's dedup rules.
#[derive(Debug, Clone, Copy)]
pub struct DuplicateReconciler<'a> {
    rules: &'a [DedupRule],
}

impl<'a> DuplicateReconciler<'a> {
    pub fn new(rules: &'a [DedupRule]) -> Self {
        Self { rules }
    }

    /// Reconciler for one collection of a schema.
    pub fn for_collection(schema: &'a SyncSchema, collection: &str) -> Result<Self> {
        Ok(Self::new(&schema.collection(collection)?.dedup_rules))
    }

    /// Check if there is anything to reconcile.
    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Split records into survivors and duplicates.
    pub fn reconcile(&self, records: Vec<Record>) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();
        let mut seen: HashSet<(usize, Vec<String>)> = HashSet::new();

        for record in records {
            let keys = self.keys_of(&record);
            if keys.iter().any(|key| seen.contains(key)) {
                outcome.removed.push(record);
            } else {
                seen.extend(keys);
                outcome.unique.push(record);
            }
        }

        outcome
    }

    /// Composite keys of a record, one per rule it fully populates.
    fn keys_of(&self, record: &Record) -> Vec<(usize, Vec<String>)> {
        self.rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| {
                let parts = rule
                    .parts
                    .iter()
                    .map(|part| {
                        record
                            .text(&part.field)
                            .and_then(|raw| part.normalizer.apply(&raw))
                    })
                    .collect::<Option<Vec<_>>>()?;
                (!parts.is_empty()).then_some((index, parts))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyPart, Normalizer};
    use serde_json::{json, Value};

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .map(|v| Record::from_value(v).unwrap())
            .collect()
    }

    fn names(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.text("name").unwrap()).collect()
    }

    #[test]
    fn phone_duplicates_first_wins() {
        let rules = [DedupRule::single("phone", Normalizer::Phone)];
        let reconciler = DuplicateReconciler::new(&rules);

        let outcome = reconciler.reconcile(records(vec![
            json!({"phone": "071", "name": "A"}),
            json!({"phone": "071", "name": "B"}),
        ]));

        assert_eq!(names(&outcome.unique), ["A"]);
        assert_eq!(names(&outcome.removed), ["B"]);
    }

    #[test]
    fn any_rule_match_is_a_duplicate() {
        let schema = SyncSchema::point_of_sale("pos");
        let reconciler = DuplicateReconciler::for_collection(&schema, "customers").unwrap();

        let outcome = reconciler.reconcile(records(vec![
            json!({"name": "A", "phone": "+94 71 000 1111", "email": "a@shop.lk"}),
            json!({"name": "B", "phone": "0777", "email": " A@Shop.LK "}),
            json!({"name": "C", "phone": "94710001111"}),
            json!({"name": "D", "phone": "0888", "email": "d@shop.lk"}),
        ]));

        assert_eq!(names(&outcome.unique), ["A", "D"]);
        assert_eq!(names(&outcome.removed), ["B", "C"]);
    }

    #[test]
    fn removed_records_do_not_claim_keys() {
        let rules = [
            DedupRule::single("phone", Normalizer::Phone),
            DedupRule::single("email", Normalizer::Email),
        ];
        let reconciler = DuplicateReconciler::new(&rules);

        // B loses on phone; its email must not knock out C.
        let outcome = reconciler.reconcile(records(vec![
            json!({"name": "A", "phone": "071"}),
            json!({"name": "B", "phone": "071", "email": "b@x.com"}),
            json!({"name": "C", "email": "b@x.com"}),
        ]));

        assert_eq!(names(&outcome.unique), ["A", "C"]);
    }

    #[test]
    fn records_without_keys_are_kept() {
        let rules = [DedupRule::single("phone", Normalizer::Phone)];
        let reconciler = DuplicateReconciler::new(&rules);

        let outcome = reconciler.reconcile(records(vec![
            json!({"name": "A"}),
            json!({"name": "B", "phone": ""}),
            json!({"name": "C", "phone": "n/a"}),
        ]));

        assert_eq!(outcome.unique.len(), 3);
        assert!(outcome.removed.is_empty());
    }

    #[test]
    fn composite_rule_needs_every_part() {
        let rules = [DedupRule::composite(vec![
            KeyPart::new("name", Normalizer::Email),
            KeyPart::new("branch", Normalizer::Exact),
        ])];
        let reconciler = DuplicateReconciler::new(&rules);

        let outcome = reconciler.reconcile(records(vec![
            json!({"name": "Till", "branch": "Kandy"}),
            json!({"name": "till", "branch": "Galle"}),
            json!({"name": "TILL", "branch": "Kandy"}),
            json!({"name": "till"}),
        ]));

        assert_eq!(outcome.unique.len(), 3);
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.removed[0].text("name").as_deref(), Some("TILL"));
    }

    #[test]
    fn collections_without_rules_are_untouched() {
        let schema = SyncSchema::point_of_sale("pos");
        let reconciler = DuplicateReconciler::for_collection(&schema, "grn").unwrap();
        assert!(!reconciler.has_rules());

        let input = records(vec![json!({"name": "A"}), json!({"name": "A"})]);
        let outcome = reconciler.reconcile(input.clone());
        assert_eq!(outcome.unique, input);
    }
}
