use criterion::*;
use std::hint::black_box;

use bevy_ecs::entity::Entity;
use rts_sim::spatial::UnitHash;
use rts_sim::{BuildingKind, Faction, ResourceType, SimWorld};

const AGENTS: usize = 10_000;

/// Deterministic scatter over the map, roughly uniform.
fn scatter(i: usize, extent: f32) -> (f32, f32) {
    let f = i as f32;
    let x = (f * 37.17).sin() * extent;
    let y = (f * 91.31).cos() * extent;
    (x, y)
}

fn populated_world(agents: usize) -> SimWorld {
    let mut sim = SimWorld::new().unwrap();
    sim.spawn_building(BuildingKind::Headquarters, (30, 30)).unwrap();
    sim.spawn_building(BuildingKind::Storehouse, (40, 30)).unwrap();
    for cell in 0..8 {
        sim.spawn_building(BuildingKind::Tower, (28 + cell * 2, 26)).unwrap();
    }
    for i in 0..64 {
        let (x, y) = scatter(i, 200.0);
        sim.spawn_resource_node(ResourceType::ALL[i % 4], x, y, 2_000, 4);
    }
    for i in 0..agents {
        let (x, y) = scatter(i + 1_000, 240.0);
        if i % 4 == 0 {
            sim.spawn_worker(x, y);
        } else {
            sim.spawn_enemy(x, y);
        }
    }
    sim
}

fn spatial_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spatial");

    let entries: Vec<(Entity, f32, f32, Faction)> = (0..AGENTS)
        .map(|i| {
            let (x, y) = scatter(i, 250.0);
            (Entity::from_raw(i as u32), x, y, Faction::Enemy)
        })
        .collect();

    group.bench_function("build_10k", |b| {
        let mut hash = UnitHash::new(10.0);
        b.iter(|| {
            hash.build(entries.iter().copied());
            black_box(hash.len());
        });
    });

    let mut hash = UnitHash::new(10.0);
    hash.build(entries.iter().copied());

    group.bench_function("query_r20_1k", |b| {
        b.iter(|| {
            let mut total = 0usize;
            for i in 0..1_000 {
                let (x, y) = scatter(i + 50_000, 240.0);
                total += hash.query_neighbors(x, y, 20.0).len();
            }
            black_box(total)
        });
    });

    group.finish();
}

fn tick_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(20);

    group.bench_function("full_tick_10k", |b| {
        b.iter_batched(
            || populated_world(AGENTS),
            |mut sim| {
                for _ in 0..5 {
                    let _ = black_box(sim.tick());
                }
                sim
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spatial_benchmark, tick_benchmark);
criterion_main!(benches);
