//! Command-line interface definitions for pihash.
//!
//! # Example
//!
//! ```bash
//! # Print all three hashes of one image
//! pihash photo.jpg
//!
//! # Only the pHash, as JSON
//! pihash -p --format json photo.jpg
//!
//! # List which of the other images look like photo.jpg
//! pihash photo.jpg holiday/*.jpg
//!
//! # Use the per-user cache instead of ./.hash_cache
//! pihash --user-cache photo.jpg
//! ```

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::cache::KeyStrategy;
use crate::hashing::{HashKind, Precision};

/// Perceptual image hashing.
///
/// Calculates the perceptual hashes of an image, or compares it to a set of
/// other images and lists the similar ones. Results are cached on disk.
#[derive(Debug, Parser)]
#[command(name = "pihash")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Image to hash, or the reference image when comparing
    #[arg(value_name = "PATH", required_unless_present = "print_config")]
    pub path: Option<PathBuf>,

    /// Images to compare against PATH
    #[arg(value_name = "COMPARISON")]
    pub comparisons: Vec<PathBuf>,

    /// Use the average hash (aHash)
    #[arg(short = 'a', long)]
    pub ahash: bool,

    /// Use the difference hash (dHash)
    #[arg(short = 'd', long)]
    pub dhash: bool,

    /// Use the perceptual hash (pHash)
    #[arg(short = 'p', long)]
    pub phash: bool,

    /// Maximum Hamming distance for two images to count as similar
    ///
    /// Defaults per algorithm: aHash 5, dHash 5, pHash 10, scaled down to
    /// 2, 2 and 3 at low precision.
    #[arg(short, long, value_name = "BITS", value_parser = clap::value_parser!(u32).range(0..=64))]
    pub threshold: Option<u32>,

    /// Cache directory (default: ./.hash_cache)
    #[arg(long, value_name = "DIR", conflicts_with = "user_cache")]
    pub cache: Option<PathBuf>,

    /// Use the per-user cache directory
    #[arg(long)]
    pub user_cache: bool,

    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// How images are identified in the cache
    #[arg(long, value_enum)]
    pub key_strategy: Option<KeyStrategyArg>,

    /// Hash size
    #[arg(long, value_enum)]
    pub precision: Option<PrecisionArg>,

    /// Empty the cache before hashing
    #[arg(long)]
    pub clear_cache: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Report errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

impl Cli {
    /// Selected algorithms. None selected means all of them.
    pub fn kinds(&self) -> Vec<HashKind> {
        let selected: Vec<HashKind> = [
            (self.ahash, HashKind::Ahash),
            (self.dhash, HashKind::Dhash),
            (self.phash, HashKind::Phash),
        ]
        .into_iter()
        .filter_map(|(on, kind)| on.then_some(kind))
        .collect();

        if selected.is_empty() {
            HashKind::ALL.to_vec()
        } else {
            selected
        }
    }
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON for scripting
    Json,
}

/// Cache key strategy as a CLI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyStrategyArg {
    /// Canonical path, validated by size and mtime
    Path,
    /// SHA-256 of the file contents
    Content,
}

impl From<KeyStrategyArg> for KeyStrategy {
    fn from(arg: KeyStrategyArg) -> Self {
        match arg {
            KeyStrategyArg::Path => KeyStrategy::Path,
            KeyStrategyArg::Content => KeyStrategy::Content,
        }
    }
}

/// Hash size as a CLI value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrecisionArg {
    /// 4×4 grids, 16-bit hashes
    Low,
    /// 8×8 grids, 64-bit hashes
    Medium,
}

impl From<PrecisionArg> for Precision {
    fn from(arg: PrecisionArg) -> Self {
        match arg {
            PrecisionArg::Low => Precision::Low,
            PrecisionArg::Medium => Precision::Medium,
        }
    }
}
