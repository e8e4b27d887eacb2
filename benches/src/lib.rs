// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared data generators for the Orthant benchmarks.

use orthant_tree::BoxN;

/// Deterministic xorshift generator so runs are comparable.
#[derive(Clone)]
pub struct Rng(u64);

impl Rng {
    /// Seeded generator.
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    /// Next raw value.
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        let v = self.next_u64() >> 11;
        (v as f64) / ((1u64 << 53) as f64)
    }
}

/// `n * n` points on a jittered grid inside `[0, n)^2`.
pub fn gen_grid_points(n: usize) -> Vec<[f64; 2]> {
    let mut rng = Rng::new(0xCAFE_F00D_DEAD_BEEF);
    let mut out = Vec::with_capacity(n * n);
    for y in 0..n {
        for x in 0..n {
            out.push([
                x as f64 + 0.1 + rng.next_f64() * 0.8,
                y as f64 + 0.1 + rng.next_f64() * 0.8,
            ]);
        }
    }
    out
}

/// `count` random points inside `[0, extent)^3`.
pub fn gen_random_points3(count: usize, extent: f64) -> Vec<[f64; 3]> {
    let mut rng = Rng::new(0x0123_4567_89AB_CDEF);
    (0..count)
        .map(|_| {
            [
                rng.next_f64() * extent,
                rng.next_f64() * extent,
                rng.next_f64() * extent,
            ]
        })
        .collect()
}

/// `count` random small boxes inside `[0, extent)^2`.
pub fn gen_random_boxes(count: usize, extent: f64, max_side: f64) -> Vec<BoxN<f64, 2>> {
    let mut rng = Rng::new(0x2545_F491_4F6C_DD1D);
    (0..count)
        .map(|_| {
            let x = rng.next_f64() * (extent - max_side);
            let y = rng.next_f64() * (extent - max_side);
            let w = rng.next_f64() * max_side + 1e-3;
            let h = rng.next_f64() * max_side + 1e-3;
            BoxN::new([x, y], [x + w, y + h])
        })
        .collect()
}
