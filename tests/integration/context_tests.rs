use filetime::{set_file_mtime, FileTime};
use image::{GrayImage, Luma};
use pihash::cache::KeyStrategy;
use pihash::hashing::{DecodeError, ImageLoader, StandardLoader};
use pihash::{HashConfig, HashContext, HashError, HashKind, HashTriple, Precision};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// Decodes with the standard loader and counts how often it was asked to.
#[derive(Default)]
struct CountingLoader {
    calls: AtomicUsize,
}

impl CountingLoader {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImageLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        StandardLoader::new().load(path)
    }
}

/// Replaces the file's bytes once, just before decoding it.
struct RewritingLoader {
    target: PathBuf,
    replacement: Vec<u8>,
    done: AtomicBool,
}

impl ImageLoader for RewritingLoader {
    fn load(&self, path: &Path) -> Result<GrayImage, DecodeError> {
        if path == self.target && !self.done.swap(true, Ordering::SeqCst) {
            fs::write(path, &self.replacement).unwrap();
        }
        StandardLoader::new().load(path)
    }
}

fn fresh_hashes(path: &Path) -> HashTriple {
    let luma = StandardLoader::new().load(path).unwrap();
    HashTriple {
        ahash: HashKind::Ahash.hash_luma(&luma),
        dhash: HashKind::Dhash.hash_luma(&luma),
        phash: HashKind::Phash.hash_luma(&luma),
    }
}

fn write_png(path: &Path, seed: u32) {
    let img = GrayImage::from_fn(64, 48, |x, y| Luma([((x * seed + y * 3) % 256) as u8]));
    img.save(path).unwrap();
}

fn context(dir: &TempDir, strategy: KeyStrategy) -> (HashContext, Arc<CountingLoader>) {
    let mut config = HashConfig::with_cache_dir(dir.path().join(".hash_cache"));
    config.key_strategy = strategy;
    let loader = Arc::new(CountingLoader::default());
    let ctx = HashContext::with_loader(config, loader.clone()).unwrap();
    (ctx, loader)
}

#[test]
fn test_cached_values_match_fresh_computation() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_png(&image, 5);

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    let first = ctx.hashes(&image).unwrap();
    let second = ctx.hashes(&image).unwrap();
    assert_eq!(first, second);
    assert_eq!(loader.calls(), 1);

    let luma = StandardLoader::new().load(&image).unwrap();
    for kind in HashKind::ALL {
        assert_eq!(first.get(kind), kind.hash_luma(&luma));
    }
}

#[test]
fn test_cache_is_shared_across_contexts() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_png(&image, 7);

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    let expected = ctx.hashes(&image).unwrap();
    assert_eq!(loader.calls(), 1);
    ctx.close().unwrap();

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    assert_eq!(ctx.hashes(&image).unwrap(), expected);
    assert_eq!(ctx.phash(&image).unwrap(), expected.phash);
    assert_eq!(loader.calls(), 0);
    assert_eq!(ctx.stats().hits, 2);
}

#[test]
fn test_modified_image_is_recomputed() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_png(&image, 5);
    set_file_mtime(&image, FileTime::from_unix_time(1_500_000_000, 0)).unwrap();

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    let before = ctx.ahash(&image).unwrap();

    // A mirrored image in place of the original
    let img = GrayImage::from_fn(64, 48, |x, y| Luma([(((63 - x) * 5 + y * 3) % 256) as u8]));
    img.save(&image).unwrap();
    set_file_mtime(&image, FileTime::from_unix_time(1_500_000_500, 0)).unwrap();

    let after = ctx.ahash(&image).unwrap();
    assert_eq!(loader.calls(), 2);
    assert_ne!(before, after);

    let luma = StandardLoader::new().load(&image).unwrap();
    assert_eq!(after, HashKind::Ahash.hash_luma(&luma));
    assert_eq!(ctx.cache().len().unwrap(), 1);
}

#[test]
fn test_content_strategy_shares_entries_between_copies() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("original.png");
    let copy = dir.path().join("copy.png");
    write_png(&original, 9);
    fs::copy(&original, &copy).unwrap();

    let (ctx, loader) = context(&dir, KeyStrategy::Content);
    let a = ctx.hashes(&original).unwrap();
    let b = ctx.hashes(&copy).unwrap();
    assert_eq!(a, b);
    assert_eq!(loader.calls(), 1);

    // Renaming does not lose the entry either
    let moved = dir.path().join("moved.png");
    fs::rename(&original, &moved).unwrap();
    assert_eq!(ctx.hashes(&moved).unwrap(), a);
    assert_eq!(loader.calls(), 1);
}

#[test]
fn test_path_strategy_keys_copies_separately() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("original.png");
    let copy = dir.path().join("copy.png");
    write_png(&original, 9);
    fs::copy(&original, &copy).unwrap();

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    assert_eq!(ctx.hashes(&original).unwrap(), ctx.hashes(&copy).unwrap());
    assert_eq!(loader.calls(), 2);
    assert_eq!(ctx.cache().len().unwrap(), 2);
}

#[test]
fn test_decode_failures_are_reported_and_not_cached() {
    let dir = tempdir().unwrap();
    let broken = dir.path().join("broken.png");
    fs::write(&broken, b"\x89PNG\r\n\x1a\nthis is not really a png").unwrap();
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, b"plain text").unwrap();
    let good = dir.path().join("good.png");
    write_png(&good, 3);

    let (ctx, loader) = context(&dir, KeyStrategy::Path);

    let err = ctx.phash(&broken).unwrap_err();
    assert!(matches!(err, HashError::Decode(DecodeError::Corrupt { .. })), "{err:?}");
    assert_eq!(err.code(), pihash::error::code::CORRUPT);

    let err = ctx.phash(&notes).unwrap_err();
    assert_eq!(err.code(), pihash::error::code::UNSUPPORTED);

    let err = ctx.phash(&dir.path().join("missing.png")).unwrap_err();
    assert_eq!(err.code(), pihash::error::code::NOT_FOUND);

    // Failures leave the context usable and nothing behind in the cache
    assert!(ctx.phash(&good).is_ok());
    assert_eq!(ctx.cache().len().unwrap(), 1);

    // A failed image is retried on every request
    assert!(ctx.phash(&broken).is_err());
    assert_eq!(loader.calls(), 4);
}

#[test]
fn test_single_kind_requests_fill_the_entry_incrementally() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_png(&image, 11);

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    let ahash = ctx.ahash(&image).unwrap();
    let dhash = ctx.dhash(&image).unwrap();
    assert_eq!(loader.calls(), 2);

    let triple = ctx.hashes(&image).unwrap();
    assert_eq!((triple.ahash, triple.dhash), (ahash, dhash));
    assert_eq!(loader.calls(), 3);

    let stats = ctx.stats();
    assert_eq!(stats.decodes, 3);
    assert_eq!(stats.cache_read_failures, 0);
    assert_eq!(stats.cache_write_failures, 0);
}

#[test]
fn test_relative_paths_resolve_to_the_same_entry() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("album");
    fs::create_dir_all(&nested).unwrap();
    let image = nested.join("photo.png");
    write_png(&image, 13);
    let dotted: PathBuf = nested.join("..").join("album").join("photo.png");

    let (ctx, loader) = context(&dir, KeyStrategy::Path);
    assert_eq!(ctx.dhash(&image).unwrap(), ctx.dhash(&dotted).unwrap());
    assert_eq!(loader.calls(), 1);
}

#[test]
fn test_file_rewritten_while_hashing_is_not_cached() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("a.png");
    let copy = dir.path().join("copy.png");
    let other = dir.path().join("other.png");
    write_png(&image, 9);
    fs::copy(&image, &copy).unwrap();
    GrayImage::from_fn(64, 48, |x, _| Luma([if x < 32 { 20 } else { 230 }]))
        .save(&other)
        .unwrap();

    let mut config = HashConfig::with_cache_dir(dir.path().join(".hash_cache"));
    config.key_strategy = KeyStrategy::Content;
    let loader = Arc::new(RewritingLoader {
        target: image.clone(),
        replacement: fs::read(&other).unwrap(),
        done: AtomicBool::new(false),
    });
    let ctx = HashContext::with_loader(config, loader).unwrap();

    // The caller gets what was decoded, but nothing is stored under the old digest
    assert_eq!(ctx.hashes(&image).unwrap(), fresh_hashes(&other));
    assert_eq!(ctx.stats().changed_during_hash, 1);
    assert_eq!(ctx.cache().len().unwrap(), 0);
    ctx.close().unwrap();

    let (ctx, loader) = context(&dir, KeyStrategy::Content);
    assert_eq!(ctx.hashes(&copy).unwrap(), fresh_hashes(&copy));
    assert_eq!(loader.calls(), 1);
    assert_eq!(ctx.stats().changed_during_hash, 0);
}

#[test]
fn test_precisions_are_cached_separately() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_png(&image, 17);

    let (medium, _) = context(&dir, KeyStrategy::Path);
    let full = medium.hashes(&image).unwrap();
    medium.close().unwrap();

    let mut config = HashConfig::with_cache_dir(dir.path().join(".hash_cache"));
    config.precision = Precision::Low;
    let loader = Arc::new(CountingLoader::default());
    let low = HashContext::with_loader(config, loader.clone()).unwrap();

    let small = low.hashes(&image).unwrap();
    assert_eq!(loader.calls(), 1);
    let luma = StandardLoader::new().load(&image).unwrap();
    for kind in HashKind::ALL {
        assert_eq!(small.get(kind), kind.hash_luma_at(&luma, Precision::Low));
        assert_eq!(small.get(kind) >> 16, 0, "{kind} uses only 16 bits");
    }
    assert_eq!(low.cache().len().unwrap(), 2);
    low.close().unwrap();

    let (medium, loader) = context(&dir, KeyStrategy::Path);
    assert_eq!(medium.hashes(&image).unwrap(), full);
    assert_eq!(loader.calls(), 0);
}
