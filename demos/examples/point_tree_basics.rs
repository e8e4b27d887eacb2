// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Point tree basics.
//!
//! Build an octree over a handful of points, run a range search, then
//! edit the tree incrementally.
//!
//! Run:
//! - `cargo run -p orthant_demos --example point_tree_basics`

use orthant_tree::{BoxN, Octree, TreeSetup};

fn main() {
    let mut points = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ];

    let mut tree = Octree::build(
        &points,
        TreeSetup {
            max_depth: Some(3),
            bounding_box: Some(BoxN::new([0.0; 3], [1.0; 3])),
            max_elements_per_node: 2,
            parallel: false,
        },
    );
    println!("built {} nodes over {} points", tree.node_count(), points.len());

    // Who sits in the upper corner octant?
    let found = tree.range_search(&BoxN::new([0.4; 3], [1.0; 3]), &points);
    println!("range [0.4, 1]^3 -> {found:?}");
    assert_eq!(found, vec![4]);

    // Add a point near the center and find it again.
    points.push([0.45, 0.55, 0.5]);
    assert!(tree.insert_with_rebalancing(5, &points[5], &points));
    let found = tree.range_search(&BoxN::new([0.4; 3], [0.6; 3]), &points);
    println!("after insert -> {found:?}");
    assert_eq!(found, vec![5]);

    // And remove it again.
    assert!(tree.erase(5, &[0.45, 0.55, 0.5], false));
    println!("after erase: {} ids stored", tree.collect_all_ids().len());
}
