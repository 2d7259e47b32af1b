//! Cache entry definitions.
//!
//! An [`ImageIdentity`] is what a request is keyed by; a [`CacheEntry`] is what
//! the database holds for that key.

use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::hashing::{HashKind, HashTriple, Precision};

/// Prefix of keys produced by [`KeyStrategy::Content`].
pub const CONTENT_KEY_PREFIX: &str = "sha256:";

/// How an image path is turned into a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Canonical path. Entries are validated against the file's size and mtime.
    #[default]
    Path,
    /// SHA-256 of the file bytes. A changed file is a different key, so no
    /// metadata validation is needed, and renamed copies share one entry.
    Content,
}

impl std::str::FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "path" => Ok(Self::Path),
            "content" => Ok(Self::Content),
            other => Err(format!("unknown key strategy '{other}' (expected path or content)")),
        }
    }
}

impl std::fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path => write!(f, "path"),
            Self::Content => write!(f, "content"),
        }
    }
}

/// File metadata stored next to the hashes for staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceMeta {
    /// File size in bytes
    pub size: u64,
    /// Modification time, whole seconds since the Unix epoch
    pub mtime_secs: i64,
    /// Sub-second part of the modification time
    pub mtime_nanos: u32,
}

impl SourceMeta {
    /// Read size and mtime of a file.
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        Ok(Self::from_parts(metadata.len(), metadata.modified()?))
    }

    pub fn from_parts(size: u64, modified: SystemTime) -> Self {
        let (mtime_secs, mtime_nanos) = match modified.duration_since(UNIX_EPOCH) {
            Ok(d) => (i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos()),
            // Pre-epoch timestamps
            Err(e) => {
                let d = e.duration();
                (-i64::try_from(d.as_secs()).unwrap_or(i64::MAX), d.subsec_nanos())
            }
        };
        Self {
            size,
            mtime_secs,
            mtime_nanos,
        }
    }
}

/// The cache key of one image plus the metadata it was resolved with.
///
/// Hashes of different [`Precision`]s are stored side by side under the same
/// key; the precision is part of the row's primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageIdentity {
    key: String,
    meta: SourceMeta,
    strategy: KeyStrategy,
    precision: Precision,
    path: PathBuf,
}

impl ImageIdentity {
    /// Resolve the identity of the file at `path`.
    ///
    /// The path is canonicalised first, so `./a.png` and `/abs/a.png` share a
    /// key. With [`KeyStrategy::Content`] the whole file is read and digested.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be canonicalised, stat'ed or read.
    pub fn resolve(path: &Path, strategy: KeyStrategy) -> io::Result<Self> {
        let canonical = path.canonicalize()?;
        let meta = SourceMeta::of(&canonical)?;
        let key = match strategy {
            KeyStrategy::Path => canonical.to_string_lossy().into_owned(),
            KeyStrategy::Content => content_key(&canonical)?,
        };
        Ok(Self {
            key,
            meta,
            strategy,
            precision: Precision::default(),
            path: canonical,
        })
    }

    /// The same identity for hashes computed at `precision`.
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Build an identity from parts, mainly for tests and tools.
    pub fn from_parts(key: impl Into<String>, meta: SourceMeta, strategy: KeyStrategy) -> Self {
        let key = key.into();
        Self {
            path: PathBuf::from(&key),
            key,
            meta,
            strategy,
            precision: Precision::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn meta(&self) -> SourceMeta {
        self.meta
    }

    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Canonical path the identity was resolved from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable bucket in `0..buckets` for lock striping and reader selection.
    pub fn shard(&self, buckets: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        self.key.hash(&mut hasher);
        (hasher.finish() % buckets.max(1) as u64) as usize
    }
}

/// `sha256:<hex>` of the file contents.
fn content_key(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{CONTENT_KEY_PREFIX}{:x}", hasher.finalize()))
}

/// Hashes known for one key. A single-algorithm request fills only its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachedHashes {
    pub ahash: Option<u64>,
    pub dhash: Option<u64>,
    pub phash: Option<u64>,
}

impl CachedHashes {
    pub fn get(&self, kind: HashKind) -> Option<u64> {
        match kind {
            HashKind::Ahash => self.ahash,
            HashKind::Dhash => self.dhash,
            HashKind::Phash => self.phash,
        }
    }

    pub fn set(&mut self, kind: HashKind, value: u64) {
        match kind {
            HashKind::Ahash => self.ahash = Some(value),
            HashKind::Dhash => self.dhash = Some(value),
            HashKind::Phash => self.phash = Some(value),
        }
    }

    /// Only `kind` is known.
    pub fn single(kind: HashKind, value: u64) -> Self {
        let mut hashes = Self::default();
        hashes.set(kind, value);
        hashes
    }

    /// All three values, if every slot is filled.
    pub fn complete(&self) -> Option<HashTriple> {
        Some(HashTriple {
            ahash: self.ahash?,
            dhash: self.dhash?,
            phash: self.phash?,
        })
    }

    /// Algorithms whose slot is empty.
    pub fn missing(&self) -> Vec<HashKind> {
        HashKind::ALL
            .into_iter()
            .filter(|kind| self.get(*kind).is_none())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ahash.is_none() && self.dhash.is_none() && self.phash.is_none()
    }
}

impl From<HashTriple> for CachedHashes {
    fn from(triple: HashTriple) -> Self {
        Self {
            ahash: Some(triple.ahash),
            dhash: Some(triple.dhash),
            phash: Some(triple.phash),
        }
    }
}

/// One row of the hash cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Identity key (canonical path or content digest)
    pub key: String,
    /// Hash size the stored values were computed at
    pub precision: Precision,
    /// Source metadata at the time the hashes were computed
    pub meta: SourceMeta,
    /// Stored hash values
    pub hashes: CachedHashes,
    /// Last write, seconds since the Unix epoch
    pub updated_at: i64,
}

impl CacheEntry {
    /// Whether this entry may answer a request for `identity`.
    ///
    /// Path-keyed entries must match the file's current size and mtime.
    /// Content-keyed entries are valid whenever the key matches.
    pub fn is_fresh_for(&self, identity: &ImageIdentity) -> bool {
        if self.key != identity.key || self.precision != identity.precision {
            return false;
        }
        match identity.strategy {
            KeyStrategy::Path => self.meta == identity.meta,
            KeyStrategy::Content => true,
        }
    }

    /// Whether the key was produced by [`KeyStrategy::Content`].
    pub fn is_content_keyed(&self) -> bool {
        self.key.starts_with(CONTENT_KEY_PREFIX)
    }
}
