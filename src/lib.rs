//! pihash - Perceptual Image Hashing
//!
//! Computes 64-bit perceptual fingerprints (aHash, dHash, pHash) of raster
//! images so that visually similar images can be found after resizing,
//! re-encoding or small edits. Results are memoised in a persistent SQLite
//! cache, and the whole engine is exported through a C ABI ([`ffi`]).
//!
//! # Example
//!
//! ```no_run
//! use pihash::{HashConfig, HashContext};
//! use std::path::Path;
//!
//! let ctx = HashContext::create(HashConfig::default())?;
//! let a = ctx.hashes(Path::new("large.jpg"))?;
//! let b = ctx.hashes(Path::new("small.jpg"))?;
//! println!("pHash distance: {}", pihash::hamming_distance(a.phash, b.phash));
//! ctx.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod ffi;
pub mod hashing;
pub mod logging;

pub use app::run_app;
pub use config::HashConfig;
pub use context::{ContextStats, HashContext};
pub use error::{HashError, InitError};
pub use hashing::{hamming_distance, HashKind, HashTriple, Precision};
