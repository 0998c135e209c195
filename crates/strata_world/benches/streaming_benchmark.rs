//! Benchmark for world publication and queries.
//!
//! TARGET: publishing a chunk (with neighbour seam rebuilds) and answering
//! collision queries stay far below a frame
//!
//! Run with: cargo bench --package strata_world --bench streaming_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_procedural::{Chunk, ChunkCoord, ChunkId, NoiseField, TerrainGenerator, WorldSeed};
use strata_world::World;

fn generated(radius: i32) -> Vec<Chunk> {
    let gen = TerrainGenerator::new(NoiseField::new(WorldSeed::new(42), 255.0, 0.5));
    let mut chunks = Vec::new();
    for x in -radius..=radius {
        for z in -radius..=radius {
            chunks.push(gen.generate(ChunkCoord::new(x, z)));
        }
    }
    chunks
}

fn benchmark_publish(c: &mut Criterion) {
    let chunks = generated(2);

    let mut group = c.benchmark_group("world_publish");
    group.sample_size(20);
    group.bench_function("publish_5x5_window", |b| {
        b.iter(|| {
            let world = World::new();
            for chunk in &chunks {
                world.publish(ChunkId(0), chunk.clone());
            }
            black_box(world.instance_count())
        });
    });
    group.finish();
}

fn benchmark_queries(c: &mut Criterion) {
    let world = World::new();
    for chunk in generated(1) {
        world.publish(ChunkId(0), chunk);
    }

    c.bench_function("is_occupied", |b| {
        let mut x = -16.0;
        b.iter(|| {
            x = if x > 32.0 { -16.0 } else { x + 0.37 };
            black_box(world.is_occupied(x, 60.5, x * 0.5, 0.3))
        });
    });

    c.bench_function("find_nearest_voxels", |b| {
        b.iter(|| black_box(world.find_nearest_voxels(7.5, 61.2, -3.4)));
    });

    c.bench_function("render_snapshot", |b| {
        b.iter(|| black_box(world.render_snapshot()));
    });
}

criterion_group!(benches, benchmark_publish, benchmark_queries);
criterion_main!(benches);
