//! # Spatial Index Benchmark
//!
//! Sphere queries and bulk refiling over a scattered ship field.
//!
//! Run with: `cargo bench --package driftline_core`

// Benchmarks don't need docs
#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use driftline_core::{EntityId, EntityKind, EntityRecord, EntityRegistry, SpatialIndex};
use driftline_shared::{BodyState, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const FIELD_RADIUS: f32 = 50_000.0;
const CELL_SIZE: f32 = 1_000.0;

fn populate(count: usize) -> (EntityRegistry, SpatialIndex, Vec<EntityId>) {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut registry = EntityRegistry::with_capacity(count);
    let mut index = SpatialIndex::new(CELL_SIZE);
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let position = Vec3::new(
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
            rng.gen_range(-FIELD_RADIUS..FIELD_RADIUS),
        );
        let id = registry.spawn(EntityRecord::new(EntityKind::AiShip, BodyState::at(position), 8.0));
        index.insert(id, position);
        ids.push(id);
    }
    (registry, index, ids)
}

fn bench_query_sphere(c: &mut Criterion) {
    let (registry, mut index, _) = populate(20_000);
    let mut group = c.benchmark_group("query_sphere");
    for radius in [2_000.0f32, 10_000.0, 40_000.0] {
        group.bench_with_input(BenchmarkId::from_parameter(radius as u32), &radius, |b, &radius| {
            b.iter(|| black_box(index.query_sphere(Vec3::ZERO, radius, &registry)).len());
        });
    }
    group.finish();
}

fn bench_refile_after_motion(c: &mut Criterion) {
    let (mut registry, mut index, ids) = populate(20_000);
    let step = Vec3::new(150.0, -40.0, 90.0);
    c.bench_function("refile_20k_moved", |b| {
        b.iter(|| {
            for id in &ids {
                if let Some(record) = registry.get_mut(*id) {
                    record.body.position += step;
                    index.update_position(*id, record.body.position);
                }
            }
        });
    });
}

criterion_group!(benches, bench_query_sphere, bench_refile_after_motion);
criterion_main!(benches);
