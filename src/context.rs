//! The hash context: one open cache plus the settings every request shares.
//!
//! A request resolves the image identity, takes that identity's lock stripe,
//! consults the cache, decodes and hashes on a miss, stores the result and
//! releases the stripe. Holding the stripe from lookup to store means two
//! threads asking for the same image compute it once; images in other stripes
//! proceed in parallel. No lock is held past the return of a call.
//!
//! Cache trouble never fails a request. A failed lookup is treated as a miss
//! and a failed store still returns the computed value; both are logged and
//! counted in [`ContextStats`].
//!
//! The key and the pixels come from two reads of the file. After decoding, the
//! identity is resolved again and the result is only stored if it is
//! unchanged, so a file rewritten mid-request never leaves its new hashes
//! under the old key.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::cache::{CacheError, CachedHashes, HashCache, ImageIdentity};
use crate::config::HashConfig;
use crate::error::{HashError, InitError};
use crate::hashing::{DecodeError, HashKind, HashTriple, ImageLoader, StandardLoader};

/// Snapshot of a context's request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ContextStats {
    /// Requests answered entirely from the cache
    pub hits: u64,
    /// Requests that needed at least one computation
    pub misses: u64,
    /// Images decoded
    pub decodes: u64,
    /// Lookups that failed and were treated as misses
    pub cache_read_failures: u64,
    /// Stores that failed; the computed value was still returned
    pub cache_write_failures: u64,
    /// Results not stored because the file changed while it was hashed
    pub changed_during_hash: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    decodes: AtomicU64,
    cache_read_failures: AtomicU64,
    cache_write_failures: AtomicU64,
    changed_during_hash: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ContextStats {
        ContextStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            cache_read_failures: self.cache_read_failures.load(Ordering::Relaxed),
            cache_write_failures: self.cache_write_failures.load(Ordering::Relaxed),
            changed_during_hash: self.changed_during_hash.load(Ordering::Relaxed),
        }
    }
}

/// An open hash cache plus configuration, shared by every request.
///
/// `HashContext` is `Send + Sync`; share it by reference or in an `Arc`.
/// It is deliberately not `Clone`: there is exactly one owner, and
/// [`HashContext::close`] (or drop) releases the cache.
pub struct HashContext {
    config: HashConfig,
    cache: HashCache,
    loader: Arc<dyn ImageLoader>,
    stripes: Box<[Mutex<()>]>,
    counters: Counters,
}

impl std::fmt::Debug for HashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

impl HashContext {
    /// Open (or create) the cache described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] if the configuration is invalid or the cache
    /// location cannot be created or opened. No half-initialised context is
    /// ever returned.
    pub fn create(config: HashConfig) -> Result<Self, InitError> {
        Self::with_loader(config, Arc::new(StandardLoader::new()))
    }

    /// Like [`HashContext::create`] with a custom image loader.
    pub fn with_loader(config: HashConfig, loader: Arc<dyn ImageLoader>) -> Result<Self, InitError> {
        config.validate()?;

        std::fs::create_dir_all(&config.cache_dir).map_err(|source| InitError::CacheDirectory {
            path: config.cache_dir.clone(),
            source,
        })?;

        let path = config.cache_path();
        let options = config.cache_options();
        let cache = if config.recover_corrupt_cache {
            HashCache::open_or_recover(&path, options)
        } else {
            HashCache::with_options(&path, options)
        }
        .map_err(|source| InitError::CacheOpen {
            path: path.clone(),
            source,
        })?;

        let stripes = (0..config.lock_stripes).map(|_| Mutex::new(())).collect();

        log::debug!(
            "Hash context ready (cache {}, keys by {}, {} precision)",
            path.display(),
            config.key_strategy,
            config.precision
        );

        Ok(Self {
            config,
            cache,
            loader,
            stripes,
            counters: Counters::default(),
        })
    }

    /// aHash of the image at `path`.
    pub fn ahash(&self, path: &Path) -> Result<u64, HashError> {
        self.hash(HashKind::Ahash, path)
    }

    /// dHash of the image at `path`.
    pub fn dhash(&self, path: &Path) -> Result<u64, HashError> {
        self.hash(HashKind::Dhash, path)
    }

    /// pHash of the image at `path`.
    pub fn phash(&self, path: &Path) -> Result<u64, HashError> {
        self.hash(HashKind::Phash, path)
    }

    /// One hash of the image at `path`.
    pub fn hash(&self, kind: HashKind, path: &Path) -> Result<u64, HashError> {
        let hashes = self.hash_kinds(path, &[kind])?;
        // every requested slot is filled
        Ok(hashes.get(kind).unwrap_or_default())
    }

    /// All three hashes of the image at `path`, from a single decode.
    pub fn hashes(&self, path: &Path) -> Result<HashTriple, HashError> {
        let hashes = self.hash_kinds(path, &HashKind::ALL)?;
        Ok(HashTriple {
            ahash: hashes.ahash.unwrap_or_default(),
            dhash: hashes.dhash.unwrap_or_default(),
            phash: hashes.phash.unwrap_or_default(),
        })
    }

    /// Counters since the context was created.
    pub fn stats(&self) -> ContextStats {
        self.counters.snapshot()
    }

    /// The configuration this context was created with.
    pub fn config(&self) -> &HashConfig {
        &self.config
    }

    /// The underlying cache.
    pub fn cache(&self) -> &HashCache {
        &self.cache
    }

    /// Remove every cached entry.
    pub fn clear_cache(&self) -> Result<usize, CacheError> {
        self.cache.clear()
    }

    /// Flush and close the cache, consuming the context.
    pub fn close(self) -> Result<(), CacheError> {
        let stats = self.stats();
        log::debug!(
            "Closing hash context: {} hits, {} misses, {} decodes",
            stats.hits,
            stats.misses,
            stats.decodes
        );
        self.cache.close()
    }

    /// The hashes in `kinds` for the image at `path`, from at most one decode.
    ///
    /// Every slot named in `kinds` is filled; other slots carry whatever the
    /// cache already held.
    pub fn hash_kinds(&self, path: &Path, kinds: &[HashKind]) -> Result<CachedHashes, HashError> {
        if path.as_os_str().is_empty() {
            return Err(HashError::InvalidArgument("empty image path".into()));
        }

        let identity = self.resolve(path)?;

        let _stripe = self.stripes[identity.shard(self.stripes.len())]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut hashes = match self.cache.lookup(&identity) {
            Ok(Some(hashes)) => hashes,
            Ok(None) => CachedHashes::default(),
            Err(e) => {
                log::warn!("Failed to query cache for {}: {}", path.display(), e);
                Counters::bump(&self.counters.cache_read_failures);
                CachedHashes::default()
            }
        };

        let missing: Vec<HashKind> = kinds
            .iter()
            .copied()
            .filter(|kind| hashes.get(*kind).is_none())
            .collect();

        if missing.is_empty() {
            log::trace!("Cache hit: {}", path.display());
            Counters::bump(&self.counters.hits);
            return Ok(hashes);
        }

        log::trace!("Cache miss: {}", path.display());
        Counters::bump(&self.counters.misses);

        let luma = self.loader.load(path)?;
        Counters::bump(&self.counters.decodes);

        for kind in missing {
            let value = kind.hash_luma_at(&luma, self.config.precision);
            log::debug!("{} {}: {:016x}", kind, path.display(), value);
            hashes.set(kind, value);
        }

        match self.resolve(path) {
            Ok(current) if current == identity => {
                if let Err(e) = self.cache.store(&identity, &hashes) {
                    log::warn!("Failed to update cache for {}: {}", path.display(), e);
                    Counters::bump(&self.counters.cache_write_failures);
                }
            }
            _ => {
                log::debug!("{} changed while hashing; not caching", path.display());
                Counters::bump(&self.counters.changed_during_hash);
            }
        }

        Ok(hashes)
    }

    fn resolve(&self, path: &Path) -> Result<ImageIdentity, DecodeError> {
        ImageIdentity::resolve(path, self.config.key_strategy)
            .map(|identity| identity.with_precision(self.config.precision))
            .map_err(|e| DecodeError::from_io(path, e))
    }
}
