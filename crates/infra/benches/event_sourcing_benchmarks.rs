use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value as JsonValue, json};
use tokio::runtime::Runtime;

use warehouse_core::EntityKey;
use warehouse_events::{EventEnvelope, InMemoryEventBus};
use warehouse_infra::event_store::{EventLog, InMemoryEventLog};
use warehouse_infra::projections::{InventoryFrontendView, ViewProjector};
use warehouse_infra::snapshot_store::InMemorySnapshotStore;
use warehouse_infra::{CommandDispatcher, RuntimeConfig};
use warehouse_inventory::{
    GetProductDetails, InventoryCommand, Product, ReceiveProduct, UpdateStock,
};

type Dispatcher = CommandDispatcher<
    InMemoryEventLog,
    InMemorySnapshotStore,
    InMemoryEventBus<EventEnvelope<JsonValue>>,
>;

fn key() -> EntityKey {
    EntityKey::new("p1").unwrap()
}

fn update(delta: i64) -> InventoryCommand {
    InventoryCommand::UpdateStock(UpdateStock {
        id: "p1".to_string(),
        stock_delta: delta,
    })
}

fn details() -> InventoryCommand {
    InventoryCommand::GetProductDetails(GetProductDetails {
        id: "p1".to_string(),
    })
}

/// Dispatcher holding one product with `history` events in its stream.
fn setup_with_history(rt: &Runtime, history: u64, snapshot_every: u64) -> Dispatcher {
    let dispatcher = CommandDispatcher::new(
        InMemoryEventLog::new(),
        InMemorySnapshotStore::new(),
        InMemoryEventBus::new(),
        RuntimeConfig::default().with_snapshot_every(snapshot_every),
    )
    .unwrap();

    rt.block_on(async {
        let product = Product {
            id: "p1".to_string(),
            name: "Yoga Mat".to_string(),
            stock: 5,
            ..Product::default()
        };
        dispatcher
            .dispatch::<Product>(
                &key(),
                InventoryCommand::ReceiveProduct(ReceiveProduct { product }),
            )
            .await
            .unwrap();
        for _ in 1..history {
            dispatcher.dispatch::<Product>(&key(), update(1)).await.unwrap();
        }
    });
    dispatcher
}

fn bench_dispatch_latency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch_latency");
    group.sample_size(50);

    for history in [100u64, 1_000] {
        // `u64::MAX` never reaches the snapshot threshold.
        for (label, snapshot_every) in [("no_snapshots", u64::MAX), ("snapshot_every_100", 100)] {
            let dispatcher = setup_with_history(&rt, history, snapshot_every);

            group.bench_with_input(
                BenchmarkId::new(format!("get_product_details/{label}"), history),
                &history,
                |b, _| {
                    b.iter(|| {
                        rt.block_on(dispatcher.dispatch::<Product>(&key(), black_box(details())))
                            .unwrap()
                    });
                },
            );

            group.bench_with_input(
                BenchmarkId::new(format!("update_stock/{label}"), history),
                &history,
                |b, _| {
                    b.iter(|| {
                        rt.block_on(dispatcher.dispatch::<Product>(&key(), black_box(update(1))))
                            .unwrap()
                    });
                },
            );
        }
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for history in [10u64, 100, 1_000] {
        let dispatcher = setup_with_history(&rt, history, 100);
        let projector = ViewProjector::in_memory(InventoryFrontendView);

        group.throughput(Throughput::Elements(history));
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_log", history),
            &history,
            |b, _| {
                b.iter(|| rt.block_on(projector.rebuild(&key(), dispatcher.log())).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_projector_apply(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("projector_apply");
    group.throughput(Throughput::Elements(1));

    let dispatcher = setup_with_history(&rt, 2, 100);
    let envelopes: Vec<_> = rt
        .block_on(dispatcher.log().read_since(&key(), None))
        .unwrap()
        .iter()
        .map(|stored| stored.to_envelope())
        .collect();

    // Steady state: every delivery after the first pass is a duplicate.
    group.bench_function("duplicate_delivery", |b| {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        for envelope in &envelopes {
            projector.apply_envelope(envelope).unwrap();
        }
        b.iter(|| projector.apply_envelope(black_box(&envelopes[1])).unwrap());
    });

    group.bench_function("fresh_delivery", |b| {
        let projector = ViewProjector::in_memory(InventoryFrontendView);
        projector.apply_envelope(&envelopes[0]).unwrap();
        let mut seq = 1;
        b.iter(|| {
            seq += 1;
            projector
                .apply_raw(&key(), seq, "StockChanged", black_box(json!({"stockDelta": 1})))
                .unwrap()
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_latency,
    bench_projection_rebuild_speed,
    bench_projector_apply
);
criterion_main!(benches);
