// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![cfg(feature = "compare_rstar")]

use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use orthant_benches::gen_random_boxes;
use orthant_tree::{BoxN, QuadtreeBox, TreeSetup};

use rstar::primitives::Rectangle;
use rstar::{AABB, RTree};

fn to_rstar_rects(v: &[BoxN<f64, 2>]) -> Vec<Rectangle<[f64; 2]>> {
    v.iter()
        .map(|r| Rectangle::from_corners([r.min[0], r.min[1]], [r.max[0], r.max[1]]))
        .collect()
}

fn bench_rtree_external_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("rtree_external_compare");
    for &count in &[4_096usize, 16_384] {
        let boxes = gen_random_boxes(count, 1_000.0, 8.0);
        let query = BoxN::new([100.0, 100.0], [500.0, 500.0]);
        group.throughput(Throughput::Elements(count as u64));

        group.bench_function(format!("orthant_build_query_n{}", count), |b| {
            b.iter_batched(
                || TreeSetup {
                    bounding_box: Some(BoxN::new([0.0, 0.0], [1_000.0, 1_000.0])),
                    ..TreeSetup::default()
                },
                |setup| {
                    let tree = QuadtreeBox::build(&boxes, setup);
                    let hits = tree.range_search(&query, &boxes);
                    black_box(hits.len());
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("rstar_build_query_n{}", count), |b| {
            b.iter_batched(
                || to_rstar_rects(&boxes),
                |rectangles| {
                    let tree = RTree::bulk_load(rectangles);
                    let aabb = AABB::from_corners(
                        [query.min[0], query.min[1]],
                        [query.max[0], query.max[1]],
                    );
                    let hits: usize = tree.locate_in_envelope_intersecting(&aabb).count();
                    black_box(hits);
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rtree_external_compare);
criterion_main!(benches);
