//! Difference hash (dHash).
//!
//! Compares horizontally adjacent pixels of a 9×8 grid, giving 8 bits per row.
//! Only the sign of each gradient is kept, so uniform brightness or contrast
//! changes leave the hash untouched.

use super::grid::PixelGrid;
use super::{pack_bits, Precision};

/// Calculate the dHash of a grid.
///
/// The grid is resampled to 9×8 first if needed. A bit is set when the left
/// pixel is strictly darker than its right neighbour.
pub fn difference_hash(grid: &PixelGrid) -> u64 {
    difference_hash_at(grid, Precision::Medium)
}

/// dHash over an `(N+1)×N` grid, `N` from `precision`.
pub fn difference_hash_at(grid: &PixelGrid, precision: Precision) -> u64 {
    let n = precision.hash_size();
    let grid = grid.normalized(n + 1, n);
    pack_bits(
        grid.rows()
            .flat_map(|row| row.windows(2).map(|pair| pair[0] < pair[1])),
    )
}
