//! Perceptual hash (pHash).
//!
//! # Algorithm
//!
//! 1. Resample the luma plane to 32×32.
//! 2. Apply a separable, unnormalised DCT-II (rows, then columns).
//! 3. Keep the top-left 8×8 block of low frequencies, row-major.
//! 4. Take the median of the 63 AC coefficients (the DC term only carries
//!    overall brightness and is left out) and set each of the 64 bits when its
//!    coefficient is at least that median.
//!
//! The DC coefficient still occupies the most significant bit and goes through
//! the same comparison. For any non-negative image it is the largest
//! coefficient, so bit 63 is set for practically every input and adds nothing
//! to a distance. It is kept so the block maps onto a full 64-bit value and
//! stored hashes stay comparable.
//!
//! At [`Precision::Low`] the grid is 16×16 and the block 4×4, with the median
//! taken over its 15 AC terms.
//!
//! # Numeric stability
//!
//! The transform runs entirely in `i64`. The cosine basis is a fixed-point table
//! (scale 2^15) built from the hard-coded quarter wave `cos(jπ/64)`, `j = 0..=32`,
//! so no floating-point or libm call can change a bit between targets. The
//! 16-point basis uses every other entry of the same table. With an odd number
//! of AC values the median is the single middle element, and a coefficient
//! equal to it sets its bit.

use super::grid::PixelGrid;
use super::{pack_bits, Precision};

/// Side of the pHash working grid.
pub const PHASH_GRID_SIZE: u32 = 32;

/// Side of the hashed low-frequency window.
pub const PHASH_WINDOW: usize = 8;

/// The DCT grid is this many times the side of the hashed window.
pub const OVERSAMPLE: u32 = 4;

const N: usize = PHASH_GRID_SIZE as usize;

/// `round(cos(j * π / 64) * 2^15)` for `j = 0..=32`.
const QUARTER_COS: [i64; 33] = [
    32768, 32729, 32610, 32413, 32138, 31786, 31357, 30853, 30274, 29622, 28899, 28106, 27246,
    26320, 25330, 24279, 23170, 22006, 20788, 19520, 18205, 16846, 15447, 14010, 12540, 11039,
    9512, 7962, 6393, 4808, 3212, 1608, 0,
];

/// Fixed-point DCT-II basis `cos(π (2n + 1) k / 2·side)`, `side` dividing 32.
#[inline]
fn basis(k: usize, n: usize, side: usize) -> i64 {
    // the angle is m * π / 64 with m taken over one full period
    let m = ((2 * n + 1) * k * (N / side)) % (4 * N);
    match m {
        0..=32 => QUARTER_COS[m],
        33..=64 => -QUARTER_COS[64 - m],
        65..=96 => -QUARTER_COS[m - 64],
        _ => QUARTER_COS[128 - m],
    }
}

/// Full 32×32 DCT-II of a grid in fixed point, row-major by `(u, v)`.
///
/// Coefficient `(u, v)` is at index `u * 32 + v`, where `u` is the vertical
/// and `v` the horizontal frequency.
pub fn dct_2d(grid: &PixelGrid) -> Vec<i64> {
    let grid = grid.normalized(PHASH_GRID_SIZE, PHASH_GRID_SIZE);
    transform(grid.pixels(), N, N, N)
}

/// Separable DCT of a `side×side` grid restricted to the first `rows`
/// vertical and `cols` horizontal frequencies.
fn transform(pixels: &[u8], side: usize, rows: usize, cols: usize) -> Vec<i64> {
    // Row pass: horizontal frequencies of each pixel row
    let mut row_pass = vec![0i64; side * cols];
    for (y, row) in pixels.chunks_exact(side).enumerate() {
        for v in 0..cols {
            row_pass[y * cols + v] = row
                .iter()
                .enumerate()
                .map(|(x, &p)| i64::from(p) * basis(v, x, side))
                .sum();
        }
    }

    // Column pass
    let mut coefficients = vec![0i64; rows * cols];
    for u in 0..rows {
        for v in 0..cols {
            coefficients[u * cols + v] = (0..side)
                .map(|y| basis(u, y, side) * row_pass[y * cols + v])
                .sum();
        }
    }
    coefficients
}

/// The 64 coefficients of the hashed window, row-major, DC first.
pub fn low_frequencies(grid: &PixelGrid) -> Vec<i64> {
    low_frequencies_at(grid, Precision::Medium)
}

/// The `N×N` hashed window at `precision`, row-major, DC first.
pub fn low_frequencies_at(grid: &PixelGrid, precision: Precision) -> Vec<i64> {
    let window = precision.hash_size() as usize;
    let side = precision.hash_size() * OVERSAMPLE;
    let grid = grid.normalized(side, side);
    transform(grid.pixels(), side as usize, window, window)
}

/// Calculate the pHash of a grid.
pub fn perceptual_hash(grid: &PixelGrid) -> u64 {
    perceptual_hash_at(grid, Precision::Medium)
}

/// pHash at `precision`.
pub fn perceptual_hash_at(grid: &PixelGrid, precision: Precision) -> u64 {
    let window = low_frequencies_at(grid, precision);

    let mut ac = window[1..].to_vec();
    ac.sort_unstable();
    let median = ac[ac.len() / 2];

    pack_bits(window.iter().map(|&c| c >= median))
}
