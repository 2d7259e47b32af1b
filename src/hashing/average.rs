//! Average hash (aHash).

use super::grid::PixelGrid;
use super::{pack_bits, Precision};

/// Calculate the aHash of a grid.
///
/// The grid is resampled to 8×8 first if needed. Each bit is set when the
/// pixel is at least the integer mean (`floor(sum / 64)`), so a pixel equal to
/// the mean always counts as bright.
pub fn average_hash(grid: &PixelGrid) -> u64 {
    average_hash_at(grid, Precision::Medium)
}

/// aHash over an `N×N` grid, `N` from `precision`.
pub fn average_hash_at(grid: &PixelGrid, precision: Precision) -> u64 {
    let n = precision.hash_size();
    let grid = grid.normalized(n, n);
    average_bits(grid.pixels())
}

/// Mean-threshold bits of up to 64 samples, first sample in the highest used bit.
fn average_bits(pixels: &[u8]) -> u64 {
    if pixels.is_empty() {
        return 0;
    }

    let total: u64 = pixels.iter().map(|&p| u64::from(p)).sum();
    let mean = total / pixels.len() as u64;

    pack_bits(pixels.iter().map(|&p| u64::from(p) >= mean))
}
