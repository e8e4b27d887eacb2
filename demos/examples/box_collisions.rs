// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Broad-phase collision detection on a box tree.
//!
//! Run:
//! - `cargo run -p orthant_demos --example box_collisions`

use orthant_tree::{BoxN, QuadtreeBox, TreeSetup};

fn main() {
    let boxes = vec![
        BoxN::new([0.0, 0.0], [1.0, 1.0]),
        BoxN::new([0.5, 0.5], [1.5, 1.5]),
        BoxN::new([2.0, 2.0], [3.0, 3.0]),
        BoxN::new([2.5, 2.5], [2.8, 2.8]),
    ];

    let tree = QuadtreeBox::build(
        &boxes,
        TreeSetup {
            bounding_box: Some(BoxN::new([0.0, 0.0], [4.0, 4.0])),
            max_elements_per_node: 2,
            ..TreeSetup::default()
        },
    );

    let pairs = tree.collision_detection(&boxes, None);
    println!("overlapping pairs: {pairs:?}");
    assert_eq!(pairs, vec![(0, 1), (2, 3)]);

    // The same query with a caller filter that keeps only pairs
    // involving box 0.
    let keep_zero = |a: usize, b: usize| a == 0 || b == 0;
    let filtered = tree.collision_detection(&boxes, Some(&keep_zero));
    println!("pairs touching box 0: {filtered:?}");
    assert_eq!(filtered, vec![(0, 1)]);

    // A ray across the scene reports hits nearest-first.
    let hits = tree.ray_intersected_all(&[0.0, 0.75], &[1.0, 0.0], &boxes, 0.0, None);
    println!("ray hits: {hits:?}");
    assert_eq!(hits, vec![0, 1]);
}
