//! Perceptual image hashing.
//!
//! This module turns a decoded image into three 64-bit fingerprints that stay
//! stable when an image is resized, re-encoded, or slightly edited:
//!
//! * [`average`]: aHash, every pixel of an 8×8 grid compared with the mean
//! * [`difference`]: dHash, horizontal gradients of a 9×8 grid
//! * [`perceptual`]: pHash, low frequencies of a 32×32 DCT compared with their median
//!
//! # Architecture
//!
//! * [`loader`]: decodes a file into a full-resolution luma plane (the only I/O)
//! * [`grid`]: fixed luma weighting and resampling to each algorithm's working size
//!
//! The hash functions themselves are pure: the same [`PixelGrid`] always yields
//! the same bits on every platform. Bits are packed row-major, most significant
//! bit first, so the first pixel of the grid lands in the highest used bit.
//!
//! [`Precision`] picks the hash side. At [`Precision::Low`] every algorithm
//! works on a 4-wide grid and yields 16 bits in the low end of the value; the
//! upper 48 bits stay zero.
//!
//! # Example
//!
//! ```no_run
//! use pihash::hashing::{HashKind, ImageLoader, StandardLoader};
//! use std::path::Path;
//!
//! let luma = StandardLoader::new().load(Path::new("photo.jpg")).unwrap();
//! let phash = HashKind::Phash.hash_luma(&luma);
//! println!("{phash:#018x}");
//! ```

pub mod average;
pub mod difference;
pub mod grid;
pub mod loader;
pub mod perceptual;

use image::GrayImage;
use serde::{Deserialize, Serialize};

pub use average::{average_hash, average_hash_at};
pub use difference::{difference_hash, difference_hash_at};
pub use grid::PixelGrid;
pub use loader::{DecodeError, ImageLoader, StandardLoader};
pub use perceptual::{perceptual_hash, perceptual_hash_at};

/// Side of the hashed grid, and so the number of bits per hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 4×4 bits per hash
    Low,
    /// 8×8 bits per hash
    #[default]
    Medium,
}

impl Precision {
    /// Every precision, smallest first.
    pub const ALL: [Precision; 2] = [Precision::Low, Precision::Medium];

    /// Side `N` of the hash; each hash has `N²` bits.
    pub fn hash_size(&self) -> u32 {
        match self {
            Self::Low => 4,
            Self::Medium => 8,
        }
    }

    /// Number of meaningful bits in a hash.
    pub fn bits(&self) -> u32 {
        self.hash_size() * self.hash_size()
    }

    /// Lowercase name, also stored in the cache.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
        }
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            other => Err(format!("unknown precision '{other}' (expected low or medium)")),
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three supported perceptual hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashKind {
    /// aHash (Average Hash) - Mean-based, fast but less resilient.
    Ahash,
    /// dHash (Difference Hash) - Gradient-based, robust to brightness shifts.
    Dhash,
    /// pHash (Perceptual Hash) - DCT-based, most resilient to transformations.
    Phash,
}

impl HashKind {
    /// Every algorithm, in the order they appear in a [`HashTriple`].
    pub const ALL: [HashKind; 3] = [HashKind::Ahash, HashKind::Dhash, HashKind::Phash];

    /// Working resolution `(width, height)` the algorithm hashes at 8×8.
    pub fn grid_size(&self) -> (u32, u32) {
        self.grid_size_at(Precision::Medium)
    }

    /// Working resolution `(width, height)` at `precision`.
    pub fn grid_size_at(&self, precision: Precision) -> (u32, u32) {
        let n = precision.hash_size();
        match self {
            Self::Ahash => (n, n),
            Self::Dhash => (n + 1, n),
            Self::Phash => (n * perceptual::OVERSAMPLE, n * perceptual::OVERSAMPLE),
        }
    }

    /// Get the default similarity threshold (Hamming distance) for this algorithm.
    pub fn default_threshold(&self) -> u32 {
        match self {
            Self::Ahash => 5,
            Self::Dhash => 5,
            Self::Phash => 10,
        }
    }

    /// Threshold scaled to the number of bits at `precision`, rounded up.
    pub fn threshold_at(&self, precision: Precision) -> u32 {
        (self.default_threshold() * precision.bits()).div_ceil(64)
    }

    /// Hash a grid that is already at (or will be resampled to) the working size.
    pub fn compute(&self, grid: &PixelGrid) -> u64 {
        self.compute_at(grid, Precision::Medium)
    }

    pub fn compute_at(&self, grid: &PixelGrid, precision: Precision) -> u64 {
        match self {
            Self::Ahash => average_hash_at(grid, precision),
            Self::Dhash => difference_hash_at(grid, precision),
            Self::Phash => perceptual_hash_at(grid, precision),
        }
    }

    /// Resample a full-resolution luma plane to the working size and hash it.
    pub fn hash_luma(&self, luma: &GrayImage) -> u64 {
        self.hash_luma_at(luma, Precision::Medium)
    }

    /// Like [`HashKind::hash_luma`] at `precision`.
    pub fn hash_luma_at(&self, luma: &GrayImage, precision: Precision) -> u64 {
        let (width, height) = self.grid_size_at(precision);
        self.compute_at(&PixelGrid::resample(luma, width, height), precision)
    }

    /// Lowercase name, also used as the cache column name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ahash => "ahash",
            Self::Dhash => "dhash",
            Self::Phash => "phash",
        }
    }
}

impl std::fmt::Display for HashKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ahash => write!(f, "aHash"),
            Self::Dhash => write!(f, "dHash"),
            Self::Phash => write!(f, "pHash"),
        }
    }
}

/// All three fingerprints of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct HashTriple {
    pub ahash: u64,
    pub dhash: u64,
    pub phash: u64,
}

impl HashTriple {
    /// Get the value for one algorithm.
    pub fn get(&self, kind: HashKind) -> u64 {
        match kind {
            HashKind::Ahash => self.ahash,
            HashKind::Dhash => self.dhash,
            HashKind::Phash => self.phash,
        }
    }

    /// Hamming distance to `other` for one algorithm.
    pub fn distance(&self, other: &HashTriple, kind: HashKind) -> u32 {
        hamming_distance(self.get(kind), other.get(kind))
    }

    /// Whether every algorithm in `kinds` is within its threshold.
    ///
    /// `threshold` overrides [`HashKind::default_threshold`] for all kinds.
    /// An empty `kinds` slice is never similar.
    pub fn is_similar(&self, other: &HashTriple, kinds: &[HashKind], threshold: Option<u32>) -> bool {
        !kinds.is_empty()
            && kinds.iter().all(|kind| {
                self.distance(other, *kind) <= threshold.unwrap_or_else(|| kind.default_threshold())
            })
    }
}

/// Count of differing bits between two fingerprints.
#[inline]
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Pack bits MSB-first: the first bit yielded ends up in the highest used position.
pub(crate) fn pack_bits<I>(bits: I) -> u64
where
    I: IntoIterator<Item = bool>,
{
    bits.into_iter()
        .fold(0u64, |hash, bit| (hash << 1) | u64::from(bit))
}
