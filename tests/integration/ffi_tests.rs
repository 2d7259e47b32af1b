use image::{GrayImage, Luma};
use pihash::error::code;
use pihash::ffi::{
    ext_free, ext_free_phashes, ext_get_ahash, ext_get_dhash, ext_get_phash, ext_get_phashes,
    ext_hamming_distance, ext_init, ext_last_error, PerceptualHashes,
};
use pihash::hashing::{ImageLoader, StandardLoader};
use pihash::HashKind;
use std::ffi::{c_void, CString};
use std::path::Path;
use std::ptr;
use tempfile::tempdir;

fn c_path(path: &Path) -> CString {
    CString::new(path.to_str().unwrap()).unwrap()
}

fn write_image(path: &Path) {
    GrayImage::from_fn(48, 48, |x, y| Luma([((x * x + y * 5) % 256) as u8]))
        .save(path)
        .unwrap();
}

fn init(dir: &Path) -> *mut c_void {
    let cache_dir = c_path(&dir.join(".hash_cache"));
    let ctx = unsafe { ext_init(cache_dir.as_ptr()) };
    assert!(!ctx.is_null(), "ext_init failed with {}", ext_last_error());
    ctx
}

#[test]
fn test_init_hash_free_cycle() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_image(&image);
    let luma = StandardLoader::new().load(&image).unwrap();
    let path = c_path(&image);

    for _ in 0..3 {
        let ctx = init(dir.path());
        unsafe {
            assert_eq!(ext_get_ahash(ctx, path.as_ptr()), HashKind::Ahash.hash_luma(&luma));
            assert_eq!(ext_last_error(), code::OK);
            assert_eq!(ext_get_dhash(ctx, path.as_ptr()), HashKind::Dhash.hash_luma(&luma));
            assert_eq!(ext_get_phash(ctx, path.as_ptr()), HashKind::Phash.hash_luma(&luma));
            ext_free(ctx);
        }
    }
    assert!(dir.path().join(".hash_cache").join("hashes.db").exists());
}

#[test]
fn test_get_phashes_matches_individual_getters() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_image(&image);
    let path = c_path(&image);
    let ctx = init(dir.path());

    unsafe {
        let hashes = ext_get_phashes(ctx, path.as_ptr());
        assert!(!hashes.is_null());
        let expected = PerceptualHashes {
            ahash: ext_get_ahash(ctx, path.as_ptr()),
            dhash: ext_get_dhash(ctx, path.as_ptr()),
            phash: ext_get_phash(ctx, path.as_ptr()),
        };
        assert_eq!(*hashes, expected);
        assert_eq!(ext_hamming_distance((*hashes).phash, expected.phash), 0);
        ext_free_phashes(hashes);
        ext_free(ctx);
    }
}

#[test]
fn test_phashes_can_be_freed_on_another_thread() {
    let dir = tempdir().unwrap();
    let image = dir.path().join("photo.png");
    write_image(&image);
    let path = c_path(&image);
    let ctx = init(dir.path());

    // Raw pointers are not Send; pass the address
    let address = unsafe { ext_get_phashes(ctx, path.as_ptr()) } as usize;
    assert_ne!(address, 0);
    std::thread::spawn(move || unsafe { ext_free_phashes(address as *mut PerceptualHashes) })
        .join()
        .unwrap();
    unsafe { ext_free(ctx) };
}

#[test]
fn test_errors_are_reported_through_last_error() {
    let dir = tempdir().unwrap();
    let ctx = init(dir.path());

    let missing = c_path(&dir.path().join("missing.png"));
    let broken_path = dir.path().join("broken.png");
    std::fs::write(&broken_path, b"this is not png data at all").unwrap();
    let broken = c_path(&broken_path);
    let text_path = dir.path().join("notes.txt");
    std::fs::write(&text_path, b"plain text").unwrap();
    let text = c_path(&text_path);
    let good_path = dir.path().join("good.png");
    write_image(&good_path);
    let good = c_path(&good_path);

    unsafe {
        assert_eq!(ext_get_ahash(ctx, missing.as_ptr()), 0);
        assert_eq!(ext_last_error(), code::NOT_FOUND);

        assert!(ext_get_phashes(ctx, broken.as_ptr()).is_null());
        assert_eq!(ext_last_error(), code::CORRUPT);

        assert_eq!(ext_get_dhash(ctx, text.as_ptr()), 0);
        assert_eq!(ext_last_error(), code::UNSUPPORTED);

        assert_eq!(ext_get_phash(ctx, ptr::null()), 0);
        assert_eq!(ext_last_error(), code::INVALID_ARGUMENT);

        // Success clears the previous code
        ext_get_phash(ctx, good.as_ptr());
        assert_eq!(ext_last_error(), code::OK);

        ext_free(ctx);
    }
}

#[test]
fn test_last_error_is_per_thread() {
    let dir = tempdir().unwrap();
    let ctx = init(dir.path());
    let missing = c_path(&dir.path().join("missing.png"));

    unsafe { ext_get_ahash(ctx, missing.as_ptr()) };
    assert_eq!(ext_last_error(), code::NOT_FOUND);

    let other = std::thread::spawn(|| ext_last_error()).join().unwrap();
    assert_eq!(other, code::OK);
    assert_eq!(ext_last_error(), code::NOT_FOUND);

    unsafe { ext_free(ctx) };
}

#[test]
fn test_init_failure_returns_null() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let cache_dir = c_path(&blocker.join("cache"));

    let ctx = unsafe { ext_init(cache_dir.as_ptr()) };
    assert!(ctx.is_null());
    assert_eq!(ext_last_error(), code::INIT);
}
