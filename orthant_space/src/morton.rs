// Copyright 2025 the Orthant Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Location codes and bit interleaving.
//!
//! A location code is a Morton (Z-order) interleave of `DIM` grid
//! coordinates at the tree's maximum resolution. Codes up to 64 bits keep
//! the tree *linear* (hashable integer keys); wider codes switch the node
//! store to an ordered map (see [`crate::wide`]).

use core::fmt::Debug;
use core::hash::Hash;
use core::ops::{BitAnd, BitOr, BitXor, Shl, Shr};

/// Depth of a node below the root.
pub type Depth = u8;

/// One unsigned grid coordinate at the tree's maximum resolution.
pub type GridId = u32;

/// Index of a child segment within its parent, `0..2^DIM`.
///
/// `DIM` is capped at 63, so a child id always fits one machine word even
/// for bitset-backed location codes.
pub type ChildId = u64;

/// A Morton location code.
///
/// Implementations provide the bit plumbing that [`crate::SpaceIndex`]
/// builds its key algebra on: interleaving grid coordinates, shifting whole
/// child segments, and extracting `DIM`-bit chunks. `LINEAR` distinguishes
/// integer codes (hash-map node stores) from bitset codes (ordered stores);
/// the ordering required of every implementation compares codes from the
/// most significant bit down, so both store kinds agree on key order.
pub trait MortonCode:
    Copy
    + Eq
    + Ord
    + Hash
    + Debug
    + Default
    + Send
    + Sync
    + Shl<u32, Output = Self>
    + Shr<u32, Output = Self>
    + BitOr<Output = Self>
    + BitAnd<Output = Self>
    + BitXor<Output = Self>
{
    /// Total number of bits in the code.
    const BITS: u32;

    /// Whether the code is a plain integer (hashable node keys).
    const LINEAR: bool;

    /// The all-zero code. Also the reserved "none" node key.
    const ZERO: Self;

    /// The code with only the lowest bit set. Also the root node key.
    const ONE: Self;

    /// Widen a single grid coordinate.
    fn from_grid(g: GridId) -> Self;

    /// Widen a child-segment id.
    fn from_child(c: ChildId) -> Self;

    /// Truncate to the low 64 bits. Callers mask to `DIM` bits first.
    fn to_child(self) -> ChildId;

    /// `1 +` the position of the highest set bit; `0` for the zero code.
    fn bit_width(self) -> u32;

    /// Test bit `i`.
    fn bit(self, i: u32) -> bool;

    /// Set bit `i`.
    fn set_bit(&mut self, i: u32);

    /// Whether no bit is set.
    #[inline]
    fn is_zero(self) -> bool {
        self == Self::ZERO
    }

    /// Interleave `DIM` grid coordinates into one code, dimension 0 in the
    /// lowest bit of every `DIM`-bit chunk.
    fn interleave<const DIM: usize>(grid: [GridId; DIM]) -> Self;

    /// Inverse of [`interleave`](MortonCode::interleave).
    fn deinterleave<const DIM: usize>(self) -> [GridId; DIM];
}

/// Bit-loop interleave used for dimensions without a dedicated sequence.
#[inline]
pub(crate) fn interleave_generic<L: MortonCode, const DIM: usize>(grid: [GridId; DIM]) -> L {
    let mut msb = 0 as GridId;
    for g in grid {
        msb |= g;
    }

    let mut code = L::ZERO;
    let mut level = 0u32;
    while msb != 0 {
        for (dim, g) in grid.iter().enumerate() {
            if g & (1 << level) != 0 {
                code.set_bit(level * DIM as u32 + dim as u32);
            }
        }
        msb >>= 1;
        level += 1;
    }
    code
}

/// Bit-loop de-interleave used for dimensions without a dedicated sequence.
#[inline]
pub(crate) fn deinterleave_generic<L: MortonCode, const DIM: usize>(code: L) -> [GridId; DIM] {
    let mut grid = [0 as GridId; DIM];
    let mut rest = code;
    let mut level = 0u32;
    while !rest.is_zero() {
        for (dim, g) in grid.iter_mut().enumerate() {
            if rest.bit(dim as u32) {
                *g |= 1 << level;
            }
        }
        if DIM as u32 >= L::BITS {
            break;
        }
        rest = rest >> DIM as u32;
        level += 1;
    }
    grid
}

// Magic-mask spreading sequences. The comments give the bit layout after
// each step; the sequences are load-bearing for Morton interchange and must
// not be reordered.

/// Spread the low 16 bits of `g`, one empty bit between each.
#[inline]
const fn part_1by1_u32(g: GridId) -> u32 {
    // n = ----------------fedcba9876543210
    // n = --------fedcba98--------76543210  (1)
    // n = ----fedc----ba98----7654----3210  (2)
    // n = --fe--dc--ba--98--76--54--32--10  (3)
    // n = -f-e-d-c-b-a-9-8-7-6-5-4-3-2-1-0  (4)
    let mut n = g;
    n = (n ^ (n << 8)) & 0x00ff_00ff;
    n = (n ^ (n << 4)) & 0x0f0f_0f0f;
    n = (n ^ (n << 2)) & 0x3333_3333;
    n = (n ^ (n << 1)) & 0x5555_5555;
    n
}

/// Spread the low 32 bits of `g`, one empty bit between each.
#[inline]
const fn part_1by1_u64(g: GridId) -> u64 {
    let mut n = g as u64;
    n = (n ^ (n << 16)) & 0x0000_ffff_0000_ffff;
    n = (n ^ (n << 8)) & 0x00ff_00ff_00ff_00ff;
    n = (n ^ (n << 4)) & 0x0f0f_0f0f_0f0f_0f0f;
    n = (n ^ (n << 2)) & 0x3333_3333_3333_3333;
    n = (n ^ (n << 1)) & 0x5555_5555_5555_5555;
    n
}

/// Spread the low 10 bits of `g`, two empty bits between each.
#[inline]
const fn part_1by2_u32(g: GridId) -> u32 {
    // n = ----------------------9876543210
    // n = ------98----------------76543210  (1)
    // n = ------98--------7654--------3210  (2)
    // n = ------98----76----54----32----10  (3)
    // n = ----9--8--7--6--5--4--3--2--1--0  (4)
    let mut n = g;
    n = (n ^ (n << 16)) & 0xff00_00ff;
    n = (n ^ (n << 8)) & 0x0300_f00f;
    n = (n ^ (n << 4)) & 0x030c_30c3;
    n = (n ^ (n << 2)) & 0x0924_9249;
    n
}

/// Spread the low 21 bits of `g`, two empty bits between each.
#[inline]
const fn part_1by2_u64(g: GridId) -> u64 {
    let mut n = g as u64;
    n = (n ^ (n << 32)) & 0xffff_0000_0000_ffff;
    n = (n ^ (n << 16)) & 0x00ff_0000_ff00_00ff;
    n = (n ^ (n << 8)) & 0xf00f_00f0_0f00_f00f;
    n = (n ^ (n << 4)) & 0x30c3_0c30_c30c_30c3;
    n = (n ^ (n << 2)) & 0x9249_2492_4924_9249;
    n
}

/// Deposit pattern for one dimension: a set bit every `DIM` positions,
/// covering the `(BITS - 1) / DIM` full chunks below the sentinel.
#[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
const fn deposit_pattern_u64(dim: u32) -> u64 {
    let max_depth = 63 / dim;
    let mut pattern = 0u64;
    let mut level = 0;
    while level < max_depth {
        pattern |= 1 << (level * dim);
        level += 1;
    }
    pattern
}

#[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
const fn deposit_pattern_u32(dim: u32) -> u32 {
    let max_depth = 31 / dim;
    let mut pattern = 0u32;
    let mut level = 0;
    while level < max_depth {
        pattern |= 1 << (level * dim);
        level += 1;
    }
    pattern
}

impl MortonCode for u32 {
    const BITS: u32 = 32;
    const LINEAR: bool = true;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline]
    fn from_grid(g: GridId) -> Self {
        g
    }

    #[inline]
    fn from_child(c: ChildId) -> Self {
        c as u32
    }

    #[inline]
    fn to_child(self) -> ChildId {
        self as ChildId
    }

    #[inline]
    fn bit_width(self) -> u32 {
        Self::BITS - self.leading_zeros()
    }

    #[inline]
    fn bit(self, i: u32) -> bool {
        (self >> i) & 1 != 0
    }

    #[inline]
    fn set_bit(&mut self, i: u32) {
        *self |= 1 << i;
    }

    #[inline]
    fn interleave<const DIM: usize>(grid: [GridId; DIM]) -> Self {
        match DIM {
            1 => grid[0],
            2 => {
                #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
                // SAFETY: gated on the bmi2 target feature.
                unsafe {
                    core::arch::x86_64::_pdep_u32(grid[1], 0xaaaa_aaaa)
                        | core::arch::x86_64::_pdep_u32(grid[0], 0x5555_5555)
                }
                #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
                {
                    (part_1by1_u32(grid[1]) << 1) | part_1by1_u32(grid[0])
                }
            }
            3 => {
                #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
                // SAFETY: gated on the bmi2 target feature.
                unsafe {
                    core::arch::x86_64::_pdep_u32(grid[2], deposit_pattern_u32(3) << 2)
                        | core::arch::x86_64::_pdep_u32(grid[1], deposit_pattern_u32(3) << 1)
                        | core::arch::x86_64::_pdep_u32(grid[0], deposit_pattern_u32(3))
                }
                #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
                {
                    (part_1by2_u32(grid[2]) << 2)
                        | (part_1by2_u32(grid[1]) << 1)
                        | part_1by2_u32(grid[0])
                }
            }
            _ => interleave_generic(grid),
        }
    }

    #[inline]
    fn deinterleave<const DIM: usize>(self) -> [GridId; DIM] {
        if DIM == 1 {
            let mut grid = [0; DIM];
            grid[0] = self;
            return grid;
        }
        #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
        {
            let mut grid = [0 as GridId; DIM];
            for (dim, g) in grid.iter_mut().enumerate() {
                // SAFETY: gated on the bmi2 target feature.
                *g = unsafe {
                    core::arch::x86_64::_pext_u32(
                        self,
                        deposit_pattern_u32(DIM as u32) << dim as u32,
                    )
                };
            }
            grid
        }
        #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
        {
            deinterleave_generic(self)
        }
    }
}

impl MortonCode for u64 {
    const BITS: u32 = 64;
    const LINEAR: bool = true;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline]
    fn from_grid(g: GridId) -> Self {
        g as u64
    }

    #[inline]
    fn from_child(c: ChildId) -> Self {
        c
    }

    #[inline]
    fn to_child(self) -> ChildId {
        self
    }

    #[inline]
    fn bit_width(self) -> u32 {
        Self::BITS - self.leading_zeros()
    }

    #[inline]
    fn bit(self, i: u32) -> bool {
        (self >> i) & 1 != 0
    }

    #[inline]
    fn set_bit(&mut self, i: u32) {
        *self |= 1 << i;
    }

    #[inline]
    fn interleave<const DIM: usize>(grid: [GridId; DIM]) -> Self {
        match DIM {
            1 => grid[0] as u64,
            2 => (part_1by1_u64(grid[1]) << 1) | part_1by1_u64(grid[0]),
            3 => {
                (part_1by2_u64(grid[2]) << 2)
                    | (part_1by2_u64(grid[1]) << 1)
                    | part_1by2_u64(grid[0])
            }
            _ => {
                #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
                {
                    let mut code = 0u64;
                    for (dim, g) in grid.iter().enumerate() {
                        // SAFETY: gated on the bmi2 target feature.
                        code |= unsafe {
                            core::arch::x86_64::_pdep_u64(
                                *g as u64,
                                deposit_pattern_u64(DIM as u32) << dim as u32,
                            )
                        };
                    }
                    code
                }
                #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
                {
                    interleave_generic(grid)
                }
            }
        }
    }

    #[inline]
    fn deinterleave<const DIM: usize>(self) -> [GridId; DIM] {
        if DIM == 1 {
            let mut grid = [0; DIM];
            grid[0] = self as GridId;
            return grid;
        }
        #[cfg(all(target_arch = "x86_64", target_feature = "bmi2"))]
        {
            let mut grid = [0 as GridId; DIM];
            for (dim, g) in grid.iter_mut().enumerate() {
                // SAFETY: gated on the bmi2 target feature.
                *g = unsafe {
                    core::arch::x86_64::_pext_u64(
                        self,
                        deposit_pattern_u64(DIM as u32) << dim as u32,
                    )
                } as GridId;
            }
            grid
        }
        #[cfg(not(all(target_arch = "x86_64", target_feature = "bmi2")))]
        {
            deinterleave_generic(self)
        }
    }
}

impl MortonCode for u128 {
    const BITS: u32 = 128;
    const LINEAR: bool = true;
    const ZERO: Self = 0;
    const ONE: Self = 1;

    #[inline]
    fn from_grid(g: GridId) -> Self {
        g as u128
    }

    #[inline]
    fn from_child(c: ChildId) -> Self {
        c as u128
    }

    #[inline]
    fn to_child(self) -> ChildId {
        self as ChildId
    }

    #[inline]
    fn bit_width(self) -> u32 {
        Self::BITS - self.leading_zeros()
    }

    #[inline]
    fn bit(self, i: u32) -> bool {
        (self >> i) & 1 != 0
    }

    #[inline]
    fn set_bit(&mut self, i: u32) {
        *self |= 1 << i;
    }

    #[inline]
    fn interleave<const DIM: usize>(grid: [GridId; DIM]) -> Self {
        interleave_generic(grid)
    }

    #[inline]
    fn deinterleave<const DIM: usize>(self) -> [GridId; DIM] {
        deinterleave_generic(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_1by1_matches_bit_loop() {
        for g in [0u32, 1, 2, 3, 0x55, 0xff, 0x7fff, 0xffff] {
            let spread = part_1by1_u32(g);
            let mut expected = 0u32;
            for i in 0..16 {
                if g & (1 << i) != 0 {
                    expected |= 1 << (2 * i);
                }
            }
            assert_eq!(spread, expected, "g={g:#x}");
            assert_eq!(part_1by1_u64(g), expected as u64);
        }
    }

    #[test]
    fn part_1by2_matches_bit_loop() {
        for g in [0u32, 1, 2, 3, 0x55, 0xff, 0x3ff] {
            let spread = part_1by2_u32(g);
            let mut expected = 0u32;
            for i in 0..10 {
                if g & (1 << i) != 0 {
                    expected |= 1 << (3 * i);
                }
            }
            assert_eq!(spread, expected, "g={g:#x}");
            assert_eq!(part_1by2_u64(g), expected as u64);
        }
    }

    #[test]
    fn interleave_2d_known_values() {
        assert_eq!(u32::interleave([0, 0]), 0);
        assert_eq!(u32::interleave([1, 0]), 0b01);
        assert_eq!(u32::interleave([0, 1]), 0b10);
        assert_eq!(u32::interleave([1, 1]), 0b11);
        assert_eq!(u32::interleave([3, 5]), 0b100111);
        assert_eq!(u64::interleave([3, 5]), 0b100111);
    }

    #[test]
    fn interleave_3d_known_values() {
        assert_eq!(u32::interleave([1, 0, 0]), 0b001);
        assert_eq!(u32::interleave([0, 1, 0]), 0b010);
        assert_eq!(u32::interleave([0, 0, 1]), 0b100);
        assert_eq!(u32::interleave([7, 7, 7]), 0b111_111_111);
        assert_eq!(u64::interleave([7, 7, 7]), 0b111_111_111);
    }

    #[test]
    fn interleave_round_trip() {
        for x in 0..8u32 {
            for y in 0..8u32 {
                let code = u32::interleave([x, y]);
                assert_eq!(code.deinterleave::<2>(), [x, y]);
                for z in 0..8u32 {
                    let code = u64::interleave([x, y, z]);
                    assert_eq!(code.deinterleave::<3>(), [x, y, z]);
                }
            }
        }
    }

    #[test]
    fn interleave_round_trip_high_dim() {
        let grid = [1u32, 2, 3, 4, 5];
        let code = u64::interleave(grid);
        assert_eq!(code.deinterleave::<5>(), grid);

        let code = u128::interleave(grid);
        assert_eq!(code.deinterleave::<5>(), grid);
    }

    #[test]
    fn dedicated_sequences_agree_with_generic() {
        for x in [0u32, 1, 9, 100, 1023] {
            for y in [0u32, 2, 57, 511] {
                assert_eq!(
                    u32::interleave([x, y]),
                    interleave_generic::<u32, 2>([x, y])
                );
                let z = x ^ y;
                assert_eq!(
                    u32::interleave([x & 0x3ff, y & 0x3ff, z & 0x3ff]),
                    interleave_generic::<u32, 3>([x & 0x3ff, y & 0x3ff, z & 0x3ff])
                );
                assert_eq!(
                    u64::interleave([x, y, z]),
                    interleave_generic::<u64, 3>([x, y, z])
                );
            }
        }
    }
}
