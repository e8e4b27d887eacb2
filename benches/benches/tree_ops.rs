// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use orthant_benches::{Rng, gen_grid_points, gen_random_boxes, gen_random_points3};
use orthant_tree::{BoxN, Octree, QuadtreeBox, TreeSetup};

fn bench_point_build_and_range(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_build_and_range");
    for &n in &[64usize, 128] {
        let points = gen_grid_points(n);
        let extent = n as f64;
        let setup = || TreeSetup {
            bounding_box: Some(BoxN::new([0.0, 0.0], [extent, extent])),
            ..TreeSetup::default()
        };
        group.throughput(Throughput::Elements((n * n) as u64));

        group.bench_function(format!("build_n{}", n), |b| {
            b.iter_batched(
                || setup(),
                |s| black_box(orthant_tree::Quadtree::build(&points, s)),
                BatchSize::SmallInput,
            )
        });

        let tree = orthant_tree::Quadtree::build(&points, setup());
        let query = BoxN::new([extent * 0.25, extent * 0.25], [extent * 0.75, extent * 0.75]);
        group.bench_function(format!("range_n{}", n), |b| {
            b.iter(|| black_box(tree.range_search(&query, &points)).len())
        });
    }
    group.finish();
}

fn bench_knn(c: &mut Criterion) {
    let mut group = c.benchmark_group("knn");
    let points = gen_random_points3(50_000, 100.0);
    let tree = Octree::build(&points, TreeSetup::default());

    let mut rng = Rng::new(42);
    group.bench_function("knn10_50k", |b| {
        b.iter(|| {
            let q = [
                rng.next_f64() * 100.0,
                rng.next_f64() * 100.0,
                rng.next_f64() * 100.0,
            ];
            black_box(tree.nearest_neighbors(&q, 10, &points)).len()
        })
    });
    group.finish();
}

fn bench_collision(c: &mut Criterion) {
    let mut group = c.benchmark_group("collision");
    for &count in &[1_000usize, 5_000] {
        let boxes = gen_random_boxes(count, 100.0, 1.5);
        let tree = QuadtreeBox::build(
            &boxes,
            TreeSetup {
                bounding_box: Some(BoxN::new([0.0, 0.0], [100.0, 100.0])),
                ..TreeSetup::default()
            },
        );
        group.throughput(Throughput::Elements(count as u64));
        group.bench_function(format!("self_n{}", count), |b| {
            b.iter(|| black_box(tree.collision_detection(&boxes, None)).len())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_point_build_and_range, bench_knn, bench_collision);
criterion_main!(benches);
