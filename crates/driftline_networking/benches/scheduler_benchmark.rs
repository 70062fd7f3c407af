//! # Interest Scheduler Benchmark
//!
//! One scheduler tick over a dense field of ships for a growing number of
//! viewers. A tick has to fit comfortably inside the 200 ms scheduler period.
//!
//! Run with: `cargo bench --package driftline_networking`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use driftline_core::{EntityId, EntityKind, EntityRecord, EntityRegistry, SpatialIndex};
use driftline_networking::{InterestScheduler, SyncConfig};
use driftline_shared::{BodyState, ConnectionId, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SHIP_COUNT: usize = 2_000;
const FIELD_RADIUS: f32 = 30_000.0;

struct Field {
    registry: EntityRegistry,
    index: SpatialIndex,
    ships: Vec<EntityId>,
}

fn field(config: &SyncConfig) -> Field {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut registry = EntityRegistry::with_capacity(SHIP_COUNT);
    let mut index = SpatialIndex::new(config.spatial.cell_size);
    let mut ships = Vec::with_capacity(SHIP_COUNT);
    for i in 0..SHIP_COUNT {
        let position = Vec3::new(
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
        );
        let body = BodyState {
            velocity: Vec3::new(rng.gen_range(-200.0..200.0), 0.0, rng.gen_range(-200.0..200.0)),
            ..BodyState::at(position)
        };
        let kind = if i % 10 == 0 { EntityKind::PlayerShip } else { EntityKind::AiShip };
        let id = registry.spawn(EntityRecord::new(kind, body, 10.0));
        index.insert(id, position);
        ships.push(id);
    }
    Field { registry, index, ships }
}

fn bench_scheduler_tick(c: &mut Criterion) {
    let config = SyncConfig::default();
    let mut group = c.benchmark_group("scheduler_tick");

    for viewers in [1usize, 16, 64] {
        let mut field = field(&config);
        let mut scheduler = InterestScheduler::new(&config);
        for (i, ship) in field.ships.iter().step_by(10).take(viewers).enumerate() {
            let _ = scheduler.connect(ConnectionId(i as u32 + 1), Some(*ship), 0.0);
        }
        group.bench_with_input(BenchmarkId::from_parameter(viewers), &viewers, |b, _| {
            b.iter(|| black_box(scheduler.tick(&mut field.index, &field.registry)));
        });
    }
    group.finish();
}

fn bench_due_links(c: &mut Criterion) {
    let config = SyncConfig::default();
    let mut field = field(&config);
    let mut scheduler = InterestScheduler::new(&config);
    for (i, ship) in field.ships.iter().step_by(10).take(64).enumerate() {
        let _ = scheduler.connect(ConnectionId(i as u32 + 1), Some(*ship), 0.0);
    }
    scheduler.tick(&mut field.index, &field.registry);

    let mut due = Vec::new();
    c.bench_function("due_links_64_viewers", |b| {
        b.iter(|| {
            due.clear();
            scheduler.due_links(black_box(1.0 / 30.0), &mut due);
            due.len()
        });
    });
}

criterion_group!(benches, bench_scheduler_tick, bench_due_links);
criterion_main!(benches);
