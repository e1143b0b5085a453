use std::sync::Arc;

use core_sim::{ArchetypeTable, AutopilotAction, GridPos, SimulationConfig, World};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

/// A floor-covered grid with a handful of wandering NPCs and scattered props.
fn populated_world(size: u32) -> World {
    let mut config = (*SimulationConfig::builtin()).clone();
    config.grid_size_x = size;
    config.grid_size_y = size;
    let mut world = World::new(Arc::new(config), ArchetypeTable::builtin());
    let positions: Vec<GridPos> = world.grid().positions().collect();
    for pos in &positions {
        world.spawn_at("floor", *pos);
    }
    let side = size as i32;
    for step in 0..side {
        world.spawn_at("apple", GridPos::new(step, (step * 7) % side));
        world.spawn_at("supply_box", GridPos::new((step * 3) % side, step));
    }
    for index in 0..(side / 4).max(1) {
        if let Some(npc) = world.spawn_at("player", GridPos::new(index * 2 % side, side / 2)) {
            world.queue_autopilot(npc, AutopilotAction::Wander { steps: 1_000 }, 0);
        }
    }
    world
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");

    for size in [8u32, 16, 32, 48] {
        group.bench_with_input(BenchmarkId::new("grid", size), &size, |b, &size| {
            b.iter_batched(
                || populated_world(size),
                |mut world| {
                    world.tick().expect("tick");
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let world = populated_world(32);
    c.bench_function("capture_snapshot/32", |b| b.iter(|| world.capture_snapshot()));
}

criterion_group!(tick_benches, bench_tick, bench_snapshot);
criterion_main!(tick_benches);
