//! SQLite-backed perceptual hash cache.
//!
//! # Concurrency
//!
//! Writes go through a single writer connection; reads use a small pool of
//! read-only connections picked by the identity's shard, so lookups for
//! distinct images do not queue behind each other or behind a write. The
//! database runs in WAL mode, where a reader always sees the last committed
//! row and never a partially written one.
//!
//! # Durability
//!
//! Every store is one `INSERT … ON CONFLICT DO UPDATE` statement and therefore
//! its own transaction. A process killed mid-store leaves either the old row or
//! the new one.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row};

use super::entry::{CacheEntry, CachedHashes, ImageIdentity, SourceMeta};
use crate::hashing::{HashTriple, Precision};

/// Current on-disk schema, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 2;

/// Errors that can occur while using the hash cache.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// SQLite reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A filesystem operation around the database file failed.
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was written by a newer version of this library.
    #[error("Cache schema version {found} is newer than supported version {expected}")]
    SchemaMismatch { found: i32, expected: i32 },
}

impl CacheError {
    /// Whether the file is not a usable SQLite database at all.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(e.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
        )
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Connection settings for [`HashCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Number of read-only connections. Zero routes reads through the writer.
    pub reader_connections: usize,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            reader_connections: 4,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Persistent cache mapping image identities to perceptual hashes.
pub struct HashCache {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
}

impl std::fmt::Debug for HashCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashCache")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish()
    }
}

const SELECT_ENTRY: &str = "SELECT image_key, precision, file_size, mtime_secs, mtime_nanos, \
     ahash, dhash, phash, updated_at \
     FROM perceptual_hashes WHERE image_key = ?1 AND precision = ?2";

// Same metadata: keep stored columns the new write does not provide.
// Different metadata: the source changed, so stale columns are cleared.
const UPSERT_ENTRY: &str = "INSERT INTO perceptual_hashes \
     (image_key, precision, file_size, mtime_secs, mtime_nanos, ahash, dhash, phash, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
     ON CONFLICT(image_key, precision) DO UPDATE SET \
       ahash = CASE WHEN file_size = excluded.file_size AND mtime_secs = excluded.mtime_secs \
                     AND mtime_nanos = excluded.mtime_nanos \
                    THEN COALESCE(excluded.ahash, ahash) ELSE excluded.ahash END, \
       dhash = CASE WHEN file_size = excluded.file_size AND mtime_secs = excluded.mtime_secs \
                     AND mtime_nanos = excluded.mtime_nanos \
                    THEN COALESCE(excluded.dhash, dhash) ELSE excluded.dhash END, \
       phash = CASE WHEN file_size = excluded.file_size AND mtime_secs = excluded.mtime_secs \
                     AND mtime_nanos = excluded.mtime_nanos \
                    THEN COALESCE(excluded.phash, phash) ELSE excluded.phash END, \
       file_size = excluded.file_size, \
       mtime_secs = excluded.mtime_secs, \
       mtime_nanos = excluded.mtime_nanos, \
       updated_at = excluded.updated_at";

impl HashCache {
    /// Opens or creates a hash cache at the specified path with default options.
    pub fn new(path: &Path) -> CacheResult<Self> {
        Self::with_options(path, CacheOptions::default())
    }

    /// Opens or creates a hash cache at `path`.
    ///
    /// Missing parent directories are created. A fresh file starts empty.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created, the file is not a database,
    /// or the schema is newer than [`SCHEMA_VERSION`].
    pub fn with_options(path: &Path, options: CacheOptions) -> CacheResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let writer = Connection::open(path)?;
        writer.busy_timeout(options.busy_timeout)?;
        writer.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        writer.pragma_update(None, "synchronous", "NORMAL")?;
        init_schema(&writer)?;

        let readers = (0..options.reader_connections)
            .map(|_| open_reader(path, options.busy_timeout).map(Mutex::new))
            .collect::<CacheResult<Vec<_>>>()?;

        log::debug!(
            "Opened hash cache at {} ({} readers)",
            path.display(),
            readers.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            readers,
        })
    }

    /// Like [`HashCache::with_options`], but a file that is not a SQLite
    /// database is moved aside to `<name>.corrupt` and a fresh cache is created.
    pub fn open_or_recover(path: &Path, options: CacheOptions) -> CacheResult<Self> {
        match Self::with_options(path, options) {
            Err(e) if e.is_corruption() => {
                let aside = sibling(path, ".corrupt");
                log::warn!(
                    "Hash cache {} is unreadable ({}); moving it to {}",
                    path.display(),
                    e,
                    aside.display()
                );
                fs::rename(path, &aside).map_err(|source| CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                for suffix in ["-wal", "-shm"] {
                    let leftover = sibling(path, suffix);
                    if let Err(e) = fs::remove_file(&leftover) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            return Err(CacheError::Io {
                                path: leftover,
                                source: e,
                            });
                        }
                    }
                }
                Self::with_options(path, options)
            }
            other => other,
        }
    }

    /// Location of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored hashes for `identity`, if the entry is still fresh.
    ///
    /// A path-keyed entry whose size or mtime differs from the identity is
    /// reported as a miss; the next store overwrites it.
    pub fn lookup(&self, identity: &ImageIdentity) -> CacheResult<Option<CachedHashes>> {
        let conn = self.reader(identity);
        let entry = query_entry(&conn, identity.key(), identity.precision())?;
        Ok(entry
            .filter(|entry| entry.is_fresh_for(identity))
            .map(|entry| entry.hashes))
    }

    /// All three hashes for `identity`, if fresh and complete.
    pub fn lookup_triple(&self, identity: &ImageIdentity) -> CacheResult<Option<HashTriple>> {
        Ok(self.lookup(identity)?.and_then(|hashes| hashes.complete()))
    }

    /// Store hashes for `identity`.
    ///
    /// Empty slots in `hashes` keep any value already stored for the same file
    /// version. If the file changed, the whole row is replaced.
    pub fn store(&self, identity: &ImageIdentity, hashes: &CachedHashes) -> CacheResult<()> {
        let meta = identity.meta();
        let conn = self.writer();
        let mut stmt = conn.prepare_cached(UPSERT_ENTRY)?;
        stmt.execute(params![
            identity.key(),
            identity.precision().as_str(),
            to_sql_size(meta.size),
            meta.mtime_secs,
            meta.mtime_nanos,
            hashes.ahash.map(to_sql_hash),
            hashes.dhash.map(to_sql_hash),
            hashes.phash.map(to_sql_hash),
            unix_now(),
        ])?;
        Ok(())
    }

    /// Store all three hashes for `identity`.
    pub fn store_triple(&self, identity: &ImageIdentity, triple: HashTriple) -> CacheResult<()> {
        self.store(identity, &CachedHashes::from(triple))
    }

    /// Raw entry for a key at `precision`, without a freshness check.
    pub fn get_entry(&self, key: &str, precision: Precision) -> CacheResult<Option<CacheEntry>> {
        query_entry(&self.writer(), key, precision)
    }

    /// Remove one key at every precision. Returns whether a row was deleted.
    pub fn remove(&self, key: &str) -> CacheResult<bool> {
        let deleted = self
            .writer()
            .execute("DELETE FROM perceptual_hashes WHERE image_key = ?1", [key])?;
        Ok(deleted > 0)
    }

    /// Remove every entry. Returns the number of rows deleted.
    pub fn clear(&self) -> CacheResult<usize> {
        let deleted = self.writer().execute("DELETE FROM perceptual_hashes", [])?;
        log::info!("Cleared {} cached entries", deleted);
        Ok(deleted)
    }

    /// Number of stored entries.
    pub fn len(&self) -> CacheResult<usize> {
        let count: i64 =
            self.writer()
                .query_row("SELECT COUNT(*) FROM perceptual_hashes", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop path-keyed entries whose file no longer exists.
    ///
    /// Content-keyed entries are kept: they are not tied to a location.
    pub fn prune_missing(&self) -> CacheResult<usize> {
        let conn = self.writer();
        let keys: Vec<String> = {
            let mut stmt = conn.prepare("SELECT DISTINCT image_key FROM perceptual_hashes")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let mut removed = 0;
        for key in keys {
            if key.starts_with(super::entry::CONTENT_KEY_PREFIX) || Path::new(&key).exists() {
                continue;
            }
            removed += conn.execute("DELETE FROM perceptual_hashes WHERE image_key = ?1", [&key])?;
        }
        if removed > 0 {
            log::info!("Pruned {} cache entries for missing files", removed);
        }
        Ok(removed)
    }

    /// Checkpoint the write-ahead log and close every connection.
    ///
    /// Dropping the cache also releases it; `close` additionally reports errors.
    pub fn close(self) -> CacheResult<()> {
        let Self {
            path,
            writer,
            readers,
        } = self;

        for reader in readers {
            let conn = reader.into_inner().unwrap_or_else(PoisonError::into_inner);
            conn.close().map_err(|(_, e)| e)?;
        }

        let writer = writer.into_inner().unwrap_or_else(PoisonError::into_inner);
        writer.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        writer.close().map_err(|(_, e)| e)?;
        log::debug!("Closed hash cache at {}", path.display());
        Ok(())
    }

    fn writer(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another thread panicked mid-call; the
        // connection itself is still consistent.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reader(&self, identity: &ImageIdentity) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.writer();
        }
        self.readers[identity.shard(self.readers.len())]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_reader(path: &Path, busy_timeout: Duration) -> CacheResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> CacheResult<()> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(CacheError::SchemaMismatch {
            found: version,
            expected: SCHEMA_VERSION,
        });
    }
    if version != 0 && version < SCHEMA_VERSION {
        // Older layout: the cache is disposable, so rebuild rather than migrate
        log::info!(
            "Rebuilding hash cache (schema {} -> {})",
            version,
            SCHEMA_VERSION
        );
        conn.execute_batch("DROP TABLE IF EXISTS perceptual_hashes;")?;
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS perceptual_hashes (
            image_key   TEXT NOT NULL,
            precision   TEXT NOT NULL,
            file_size   INTEGER NOT NULL,
            mtime_secs  INTEGER NOT NULL,
            mtime_nanos INTEGER NOT NULL,
            ahash       INTEGER,
            dhash       INTEGER,
            phash       INTEGER,
            updated_at  INTEGER NOT NULL,
            PRIMARY KEY (image_key, precision)
        );",
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn query_entry(
    conn: &Connection,
    key: &str,
    precision: Precision,
) -> CacheResult<Option<CacheEntry>> {
    let mut stmt = conn.prepare_cached(SELECT_ENTRY)?;
    Ok(stmt
        .query_row(params![key, precision.as_str()], entry_from_row)
        .optional()?)
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    let hash = |idx: usize| -> rusqlite::Result<Option<u64>> {
        Ok(row.get::<_, Option<i64>>(idx)?.map(from_sql_hash))
    };
    let precision = row
        .get::<_, String>(1)?
        .parse::<Precision>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    Ok(CacheEntry {
        key: row.get(0)?,
        precision,
        meta: SourceMeta {
            size: u64::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
            mtime_secs: row.get(3)?,
            mtime_nanos: row.get(4)?,
        },
        hashes: CachedHashes {
            ahash: hash(5)?,
            dhash: hash(6)?,
            phash: hash(7)?,
        },
        updated_at: row.get(8)?,
    })
}

// SQLite integers are signed; hashes are stored as their bit pattern.
fn to_sql_hash(hash: u64) -> i64 {
    hash as i64
}

fn from_sql_hash(value: i64) -> u64 {
    value as u64
}

fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// `path` with `suffix` appended to its file name.
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
