use filetime::{set_file_mtime, FileTime};
use pihash::cache::{CacheOptions, CachedHashes, HashCache, ImageIdentity, KeyStrategy};
use pihash::hashing::Precision;
use pihash::HashTriple;
use std::fs;
use std::sync::Arc;
use tempfile::tempdir;

const TRIPLE: HashTriple = HashTriple {
    ahash: 0xF0F0_F0F0_0F0F_0F0F,
    dhash: 0x8000_0000_0000_0001,
    phash: u64::MAX,
};

#[test]
fn test_entries_survive_reopen() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("a.png");
    fs::write(&image, b"image bytes").unwrap();
    let cache_path = dir.path().join("cache").join("hashes.db");

    let identity = ImageIdentity::resolve(&image, KeyStrategy::Path).unwrap();
    {
        let cache = HashCache::new(&cache_path).unwrap();
        cache.store_triple(&identity, TRIPLE).unwrap();
        cache.close().unwrap();
    }

    let cache = HashCache::new(&cache_path).unwrap();
    assert_eq!(cache.lookup_triple(&identity).unwrap(), Some(TRIPLE));
    assert_eq!(cache.len().unwrap(), 1);
}

#[test]
fn test_relative_and_absolute_paths_share_an_entry() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("a.png");
    fs::write(&image, b"image bytes").unwrap();
    let cache = HashCache::new(&dir.path().join("hashes.db")).unwrap();

    let direct = ImageIdentity::resolve(&image, KeyStrategy::Path).unwrap();
    let dotted = ImageIdentity::resolve(&dir.path().join(".").join("a.png"), KeyStrategy::Path)
        .unwrap();
    assert_eq!(direct.key(), dotted.key());

    cache.store_triple(&direct, TRIPLE).unwrap();
    assert_eq!(cache.lookup_triple(&dotted).unwrap(), Some(TRIPLE));
}

#[test]
fn test_modified_file_is_a_miss() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("a.png");
    fs::write(&image, b"image bytes").unwrap();
    set_file_mtime(&image, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let cache = HashCache::new(&dir.path().join("hashes.db")).unwrap();
    let before = ImageIdentity::resolve(&image, KeyStrategy::Path).unwrap();
    cache.store_triple(&before, TRIPLE).unwrap();

    // Same size, new mtime
    fs::write(&image, b"IMAGE BYTES").unwrap();
    set_file_mtime(&image, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
    let after = ImageIdentity::resolve(&image, KeyStrategy::Path).unwrap();

    assert_eq!(before.key(), after.key());
    assert_eq!(cache.lookup(&after).unwrap(), None);

    // The stale row is still there until it is overwritten
    let entry = cache.get_entry(after.key(), Precision::Medium).unwrap().unwrap();
    assert_eq!(entry.meta, before.meta());
    cache
        .store(&after, &CachedHashes::single(pihash::HashKind::Dhash, 7))
        .unwrap();
    let stored = cache.lookup(&after).unwrap().unwrap();
    assert_eq!(stored.dhash, Some(7));
    assert_eq!(stored.ahash, None);
    assert_eq!(stored.phash, None);
}

#[test]
fn test_content_keys_follow_the_bytes() {
    let dir = tempdir().unwrap();
    let original = dir.path().join("original.png");
    let copy = dir.path().join("renamed copy.png");
    fs::write(&original, b"same pixels").unwrap();
    fs::copy(&original, &copy).unwrap();
    set_file_mtime(&copy, FileTime::from_unix_time(1_000_000_000, 0)).unwrap();

    let cache = HashCache::new(&dir.path().join("hashes.db")).unwrap();
    let first = ImageIdentity::resolve(&original, KeyStrategy::Content).unwrap();
    cache.store_triple(&first, TRIPLE).unwrap();

    let second = ImageIdentity::resolve(&copy, KeyStrategy::Content).unwrap();
    assert_eq!(first.key(), second.key());
    assert!(first.key().starts_with("sha256:"));
    assert_eq!(cache.lookup_triple(&second).unwrap(), Some(TRIPLE));

    fs::write(&copy, b"other pixels").unwrap();
    let changed = ImageIdentity::resolve(&copy, KeyStrategy::Content).unwrap();
    assert_ne!(changed.key(), first.key());
    assert_eq!(cache.lookup(&changed).unwrap(), None);
}

#[test]
fn test_prune_missing_keeps_content_entries() {
    let dir = tempdir().unwrap();
    let kept = dir.path().join("kept.png");
    let gone = dir.path().join("gone.png");
    fs::write(&kept, b"kept").unwrap();
    fs::write(&gone, b"gone").unwrap();

    let cache = HashCache::new(&dir.path().join("hashes.db")).unwrap();
    for path in [&kept, &gone] {
        let identity = ImageIdentity::resolve(path, KeyStrategy::Path).unwrap();
        cache.store_triple(&identity, TRIPLE).unwrap();
    }
    let by_content = ImageIdentity::resolve(&gone, KeyStrategy::Content).unwrap();
    cache.store_triple(&by_content, TRIPLE).unwrap();
    assert_eq!(cache.len().unwrap(), 3);

    fs::remove_file(&gone).unwrap();
    assert_eq!(cache.prune_missing().unwrap(), 1);
    assert_eq!(cache.len().unwrap(), 2);
    assert!(cache.get_entry(by_content.key(), Precision::Medium).unwrap().is_some());
}

#[test]
fn test_readers_see_committed_writes_from_other_threads() {
    let dir = tempdir().unwrap();
    let options = CacheOptions {
        reader_connections: 2,
        ..CacheOptions::default()
    };
    let cache = Arc::new(HashCache::with_options(&dir.path().join("hashes.db"), options).unwrap());

    let mut identities = Vec::new();
    for i in 0..16u64 {
        let path = dir.path().join(format!("img{i}.png"));
        fs::write(&path, i.to_le_bytes()).unwrap();
        identities.push(ImageIdentity::resolve(&path, KeyStrategy::Path).unwrap());
    }

    let handles: Vec<_> = identities
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, identity)| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let value = i as u64;
                cache
                    .store(&identity, &CachedHashes::single(pihash::HashKind::Ahash, value))
                    .unwrap();
                assert_eq!(
                    cache.lookup(&identity).unwrap().and_then(|h| h.ahash),
                    Some(value)
                );
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len().unwrap(), 16);
    for (i, identity) in identities.iter().enumerate() {
        assert_eq!(cache.lookup(identity).unwrap().unwrap().ahash, Some(i as u64));
    }
}
