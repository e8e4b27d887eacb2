// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! k-nearest-neighbor search over a point cloud.
//!
//! Run:
//! - `cargo run -p orthant_demos --example nearest_neighbors`

use orthant_tree::{BoxN, Octree, TreeSetup};

fn main() {
    // A deterministic cloud of 10 000 points.
    let mut state = 0x9E37_79B9_7F4A_7C15u64;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    let points: Vec<[f64; 3]> = (0..10_000)
        .map(|_| [next() * 100.0, next() * 100.0, next() * 100.0])
        .collect();

    let tree = Octree::build(
        &points,
        TreeSetup {
            bounding_box: Some(BoxN::new([0.0; 3], [100.0; 3])),
            ..TreeSetup::default()
        },
    );

    let query = [50.0, 50.0, 50.0];
    let nearest = tree.nearest_neighbors(&query, 5, &points);
    println!("five nearest to {query:?}:");
    for (id, distance) in &nearest {
        println!("  #{id} at distance {distance:.3}");
    }

    // Distances come back ascending.
    assert!(nearest.windows(2).all(|w| w[0].1 <= w[1].1));

    // A bounded search only reports points inside the ceiling.
    let close = tree.nearest_neighbors_within(&query, 100, 5.0, &points);
    println!("{} points within distance 5", close.len());
    assert!(close.iter().all(|(_, d)| *d < 5.0));
}
