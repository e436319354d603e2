//! Performance benchmarks for tillsync-engine

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tillsync_engine::{
    materialize, plan_merge, remote_payload, DuplicateReconciler, IdentityResolver, Record,
    SyncSchema, SYSTEM_ACTOR,
};

fn customers(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::from_value(json!({
                "customerId": format!("C-{}", i),
                "name": format!("Customer {}", i),
                "phone": format!("+94 71 {:07}", i % (count / 2).max(1)),
                "email": format!("c{}@shop.lk", i)
            }))
            .unwrap()
        })
        .collect()
}

fn snapshot(count: usize) -> Value {
    let mut children = Map::new();
    for i in 0..count {
        children.insert(
            format!("ITEM-{}", i),
            json!({"code": format!("ITEM-{}", i), "name": "Widget", "qty": i}),
        );
    }
    Value::Object(children)
}

fn bench_identity(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    let schema = SyncSchema::point_of_sale("pos");
    let resolver = IdentityResolver::new(&schema);

    let user = Record::from_value(json!({"name": "A", "userId": "u-1", "id": "x"})).unwrap();
    group.bench_function("derive_fallback", |b| {
        b.iter(|| resolver.derive(black_box("users"), black_box(&user)))
    });

    let product =
        Record::from_value(json!({"name": "Widget", "code": "ITEM-001", "qty": 5})).unwrap();
    group.bench_function("remote_payload", |b| {
        let now = Utc::now();
        b.iter(|| remote_payload(black_box(&product), "ITEM-001", SYSTEM_ACTOR, now))
    });

    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup");
    let schema = SyncSchema::point_of_sale("pos");

    for size in [100, 1000, 10000] {
        let records = customers(size);
        group.bench_with_input(BenchmarkId::new("customers", size), &records, |b, records| {
            let reconciler = DuplicateReconciler::for_collection(&schema, "customers").unwrap();
            b.iter(|| reconciler.reconcile(black_box(records.clone())))
        });
    }

    group.finish();
}

fn bench_download_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("download_merge");
    let schema = SyncSchema::point_of_sale("pos");
    let resolver = IdentityResolver::new(&schema);

    for size in [100, 1000, 10000] {
        let remote = snapshot(size);
        let local: Vec<Record> = materialize(Some(&remote))
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.with_local_id(i as u64 + 1))
            .collect();

        group.bench_with_input(BenchmarkId::new("materialize", size), &remote, |b, remote| {
            b.iter(|| materialize(black_box(Some(remote))))
        });

        group.bench_with_input(BenchmarkId::new("plan_unchanged", size), &remote, |b, remote| {
            let pending = HashSet::new();
            b.iter(|| {
                plan_merge(
                    &resolver,
                    "inventory",
                    black_box(&local),
                    materialize(Some(remote)),
                    &pending,
                )
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_identity, bench_dedup, bench_download_merge);
criterion_main!(benches);
