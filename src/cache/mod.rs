//! Persistent hash cache.
//!
//! Computing a perceptual hash means decoding and resampling the whole image,
//! so results are memoised on disk and reused across process restarts.
//!
//! # Architecture
//!
//! The caching system is split into two main components:
//!
//! * [`database`]: SQLite persistence, schema management, and CRUD operations.
//! * [`entry`]: identities, the stored row model, and freshness rules.
//!
//! # Cache Invalidation
//!
//! With [`KeyStrategy::Path`] entries are keyed by canonical path and validated
//! against the file's size and modification time; any difference is a miss
//! and the next store overwrites the row. With [`KeyStrategy::Content`] the key
//! is a SHA-256 of the file bytes, so a changed file simply maps to a new key.
//!
//! Entries are never evicted for space. Use [`HashCache::clear`] or
//! [`HashCache::prune_missing`] to shrink the file.

pub mod database;
pub mod entry;

pub use database::{CacheError, CacheOptions, CacheResult, HashCache, SCHEMA_VERSION};
pub use entry::{CacheEntry, CachedHashes, ImageIdentity, KeyStrategy, SourceMeta};
