//! C ABI.
//!
//! # Ownership
//!
//! * `ext_init` returns an owned context handle. Release it exactly once with
//!   `ext_free`; the handle is invalid afterwards.
//! * `ext_get_phashes` returns an owned `PerceptualHashes`. Release it exactly
//!   once with `ext_free_phashes`, from any thread.
//! * Passing NULL to either release function does nothing. Passing a dangling
//!   or foreign pointer is undefined behaviour and is not detected.
//!
//! # Errors
//!
//! Hash getters return `0` (or NULL for `ext_get_phashes`) on failure and set a
//! thread-local code readable with `ext_last_error`. Every call that succeeds
//! resets the code to `0`. Codes are listed in [`crate::error::code`].
//!
//! A context may be used from several threads at once; see [`HashContext`].

use std::cell::Cell;
use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::config::HashConfig;
use crate::context::HashContext;
use crate::error::{code, HashError};
use crate::hashing::{hamming_distance, HashKind, HashTriple};
use crate::logging::init_library_logging;

/// All three hashes of one image, as handed to C callers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PerceptualHashes {
    pub ahash: u64,
    pub dhash: u64,
    pub phash: u64,
}

impl From<HashTriple> for PerceptualHashes {
    fn from(triple: HashTriple) -> Self {
        Self {
            ahash: triple.ahash,
            dhash: triple.dhash,
            phash: triple.phash,
        }
    }
}

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(code::OK) };
}

fn set_last_error(value: i32) {
    LAST_ERROR.with(|cell| cell.set(value));
}

/// Error code of the last call made on this thread, `0` if it succeeded.
#[no_mangle]
pub extern "C" fn ext_last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Number of differing bits between two hashes.
#[no_mangle]
pub extern "C" fn ext_hamming_distance(a: u64, b: u64) -> u32 {
    hamming_distance(a, b)
}

/// Create a context whose cache lives in `cache_dir`.
///
/// NULL or an empty string uses the configured default (`./.hash_cache` unless
/// overridden by `PIHASH_*` variables or the user config file).
/// Returns NULL if the cache cannot be created or opened.
///
/// # Safety
///
/// `cache_dir` must be NULL or point to a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ext_init(cache_dir: *const c_char) -> *mut c_void {
    init_library_logging();

    let cache_dir = if cache_dir.is_null() {
        None
    } else {
        // SAFETY: non-null and NUL-terminated per the contract above
        let bytes = unsafe { CStr::from_ptr(cache_dir) }.to_bytes();
        if bytes.is_empty() {
            None
        } else {
            match path_from_bytes(bytes) {
                Some(path) => Some(path),
                None => {
                    set_last_error(code::INVALID_ARGUMENT);
                    return ptr::null_mut();
                }
            }
        }
    };

    guarded(ptr::null_mut(), || {
        let mut config = HashConfig::load(None)?;
        if let Some(dir) = cache_dir {
            config.cache_dir = dir;
        }
        let ctx = HashContext::create(config)?;
        Ok(Box::into_raw(Box::new(ctx)).cast::<c_void>())
    })
}

/// Close the cache and release a context.
///
/// # Safety
///
/// `ctx` must be NULL or a handle returned by `ext_init` that has not been
/// freed. It must not be in use by another thread.
#[no_mangle]
pub unsafe extern "C" fn ext_free(ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: ownership comes back from ext_init exactly once
    let ctx = unsafe { Box::from_raw(ctx.cast::<HashContext>()) };
    guarded((), move || {
        if let Err(e) = ctx.close() {
            log::warn!("Failed to close hash cache cleanly: {}", e);
        }
        Ok(())
    });
}

/// aHash of the image at `path`, `0` on failure.
///
/// # Safety
///
/// `ctx` must be a live handle from `ext_init`; `path` must be NULL or a
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ext_get_ahash(ctx: *mut c_void, path: *const c_char) -> u64 {
    unsafe { get_one(ctx, path, HashKind::Ahash) }
}

/// dHash of the image at `path`, `0` on failure.
///
/// # Safety
///
/// Same as [`ext_get_ahash`].
#[no_mangle]
pub unsafe extern "C" fn ext_get_dhash(ctx: *mut c_void, path: *const c_char) -> u64 {
    unsafe { get_one(ctx, path, HashKind::Dhash) }
}

/// pHash of the image at `path`, `0` on failure.
///
/// # Safety
///
/// Same as [`ext_get_ahash`].
#[no_mangle]
pub unsafe extern "C" fn ext_get_phash(ctx: *mut c_void, path: *const c_char) -> u64 {
    unsafe { get_one(ctx, path, HashKind::Phash) }
}

/// All three hashes from one decode, or NULL on failure.
///
/// The result must be released with `ext_free_phashes`.
///
/// # Safety
///
/// Same as [`ext_get_ahash`].
#[no_mangle]
pub unsafe extern "C" fn ext_get_phashes(
    ctx: *mut c_void,
    path: *const c_char,
) -> *mut PerceptualHashes {
    unsafe {
        with_request(ctx, path, ptr::null_mut(), |ctx, path| {
            let hashes = PerceptualHashes::from(ctx.hashes(path)?);
            Ok(Box::into_raw(Box::new(hashes)))
        })
    }
}

/// Release a result of `ext_get_phashes`.
///
/// # Safety
///
/// `hashes` must be NULL or a pointer returned by `ext_get_phashes` that has
/// not been freed.
#[no_mangle]
pub unsafe extern "C" fn ext_free_phashes(hashes: *mut PerceptualHashes) {
    if hashes.is_null() {
        return;
    }
    // SAFETY: ownership comes back from ext_get_phashes exactly once
    drop(unsafe { Box::from_raw(hashes) });
}

unsafe fn get_one(ctx: *mut c_void, path: *const c_char, kind: HashKind) -> u64 {
    unsafe { with_request(ctx, path, 0, |ctx, path| ctx.hash(kind, path)) }
}

/// Validate the raw arguments and run `f` behind the panic guard.
unsafe fn with_request<T, F>(ctx: *mut c_void, path: *const c_char, failed: T, f: F) -> T
where
    F: FnOnce(&HashContext, &Path) -> Result<T, HashError>,
{
    if ctx.is_null() {
        return reject(failed, HashError::ContractViolation("hash requested with a NULL context"));
    }
    if path.is_null() {
        return reject(failed, HashError::InvalidArgument("NULL image path".into()));
    }

    // SAFETY: a live handle from ext_init per the caller's contract; only
    // shared access is needed
    let ctx = unsafe { &*ctx.cast::<HashContext>() };
    // SAFETY: non-null and NUL-terminated per the caller's contract
    let bytes = unsafe { CStr::from_ptr(path) }.to_bytes();
    let Some(path) = path_from_bytes(bytes) else {
        return reject(failed, HashError::InvalidArgument("image path is not valid UTF-8".into()));
    };

    guarded(failed, || f(ctx, &path))
}

/// Record `err` as the thread's last error and hand back the failure value.
fn reject<T>(failed: T, err: HashError) -> T {
    match err {
        HashError::ContractViolation(_) => log::error!("{}", err),
        _ => log::debug!("pihash call rejected: {}", err),
    }
    set_last_error(err.code());
    failed
}

/// Run `f`, record its outcome in the thread-local error code, and keep
/// panics from crossing the C boundary.
fn guarded<T, F>(failed: T, f: F) -> T
where
    F: FnOnce() -> Result<T, HashError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => {
            set_last_error(code::OK);
            value
        }
        Ok(Err(e)) => {
            log::debug!("pihash call failed: {}", e);
            set_last_error(e.code());
            failed
        }
        Err(_) => {
            log::error!("Panic inside pihash call");
            set_last_error(code::INTERNAL);
            failed
        }
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(std::ffi::OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> Option<PathBuf> {
    std::str::from_utf8(bytes).ok().map(PathBuf::from)
}
