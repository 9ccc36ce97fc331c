//! C ABI over [`BatchLoader`] for training loops living in another runtime.
//!
//! Loaders and batches are opaque pointers. Every batch taken must be given
//! back with `nnue_batch_release` and a loader is freed by
//! `nnue_loader_shutdown`. The array pointers of a batch stay valid until the
//! batch is released.

use super::{BatchGuard, BatchLoader, IndexLayout, LoaderConfig, LoaderError, NextBatch};
use crate::feature_set::build_feature_set;
use std::ffi::{c_char, CStr, CString};
use std::ptr;

pub struct NnueLoader {
    loader: BatchLoader,
    last_error: Option<CString>,
}

impl NnueLoader {
    fn set_error(&mut self, err: &LoaderError) {
        log::error!("{}", err);
        self.last_error = CString::new(err.to_string()).ok();
    }
}

/// Opens a loader, returns null on failure (the cause is logged).
/// `seed` is only used when `has_seed` is true, otherwise permutations
/// come from OS entropy.
///
/// # Safety
/// `path` and `feature_set` must be valid NUL terminated strings.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn nnue_loader_open(
    path: *const c_char,
    feature_set: *const c_char,
    batch_size: usize,
    threads: usize,
    prefetch: usize,
    shuffle: bool,
    seed: u64,
    has_seed: bool,
    padded: bool,
) -> *mut NnueLoader {
    if path.is_null() || feature_set.is_null() {
        log::error!("nnue_loader_open: null argument");
        return ptr::null_mut();
    }
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    let feature_set = CStr::from_ptr(feature_set).to_string_lossy();

    let scheme = match build_feature_set(&feature_set) {
        Ok(scheme) => scheme,
        Err(err) => {
            log::error!("{}", err);
            return ptr::null_mut();
        }
    };

    let mut config = LoaderConfig::new(path, scheme, batch_size)
        .threads(threads)
        .prefetch(prefetch)
        .shuffle(shuffle)
        .layout(if padded {
            IndexLayout::Padded
        } else {
            IndexLayout::Pairs
        });
    if has_seed {
        config = config.seed(seed);
    }

    match BatchLoader::open(config) {
        Ok(loader) => Box::into_raw(Box::new(NnueLoader {
            loader,
            last_error: None,
        })),
        Err(err) => {
            log::error!("{}", err);
            ptr::null_mut()
        }
    }
}

/// Waits for the next batch. Returns 1 and stores the batch in `out`, 0 at
/// the end of the epoch, -1 on error (see `nnue_loader_last_error`).
///
/// # Safety
/// `loader` must come from `nnue_loader_open`, `out` must be writable.
#[no_mangle]
pub unsafe extern "C" fn nnue_loader_take(
    loader: *mut NnueLoader,
    out: *mut *mut BatchGuard,
) -> i32 {
    let Some(loader) = loader.as_mut() else {
        return -1;
    };
    if out.is_null() {
        return -1;
    }

    match loader.loader.take_next_batch() {
        Ok(NextBatch::Batch(batch)) => {
            *out = Box::into_raw(Box::new(batch));
            1
        }
        Ok(NextBatch::EndOfEpoch) => 0,
        Err(err) => {
            loader.set_error(&err);
            -1
        }
    }
}

/// Returns 0 on success, -1 on error.
///
/// # Safety
/// `loader` must come from `nnue_loader_open`.
#[no_mangle]
pub unsafe extern "C" fn nnue_loader_begin_epoch(loader: *mut NnueLoader, reshuffle: bool) -> i32 {
    let Some(loader) = loader.as_mut() else {
        return -1;
    };
    match loader.loader.begin_epoch(reshuffle) {
        Ok(()) => 0,
        Err(err) => {
            loader.set_error(&err);
            -1
        }
    }
}

/// Message of the last failed call on this loader, null if there was none.
/// Valid until the next call on the loader.
///
/// # Safety
/// `loader` must come from `nnue_loader_open`.
#[no_mangle]
pub unsafe extern "C" fn nnue_loader_last_error(loader: *const NnueLoader) -> *const c_char {
    match loader.as_ref().and_then(|loader| loader.last_error.as_ref()) {
        Some(message) => message.as_ptr(),
        None => ptr::null(),
    }
}

/// Stops the workers and frees the loader.
///
/// # Safety
/// `loader` must come from `nnue_loader_open` and is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn nnue_loader_shutdown(loader: *mut NnueLoader) {
    if loader.is_null() {
        return;
    }
    let mut loader = Box::from_raw(loader);
    if let Err(err) = loader.loader.shutdown() {
        log::error!("{}", err);
    }
}

/// # Safety
/// `batch` must come from `nnue_loader_take` and is invalid afterwards.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_release(batch: *mut BatchGuard) {
    if !batch.is_null() {
        drop(Box::from_raw(batch));
    }
}

/// # Safety
/// `batch` must come from `nnue_loader_take` and not be released yet.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_size(batch: *const BatchGuard) -> usize {
    batch.as_ref().map_or(0, |batch| batch.size())
}

/// # Safety
/// `batch` must come from `nnue_loader_take` and not be released yet.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_max_active(batch: *const BatchGuard) -> usize {
    batch.as_ref().map_or(0, |batch| batch.max_active())
}

unsafe fn export<T>(slice: Option<&[T]>, len: *mut usize) -> *const T {
    let slice = slice.unwrap_or(&[]);
    if !len.is_null() {
        *len = slice.len();
    }
    slice.as_ptr()
}

/// # Safety
/// `batch` must come from `nnue_loader_take` and not be released yet,
/// `len` must be writable or null.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_stm_indices(batch: *const BatchGuard, len: *mut usize) -> *const i64 {
    export(batch.as_ref().map(|batch| batch.stm_indices()), len)
}

/// # Safety
/// See `nnue_batch_stm_indices`.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_nstm_indices(batch: *const BatchGuard, len: *mut usize) -> *const i64 {
    export(batch.as_ref().map(|batch| batch.nstm_indices()), len)
}

/// # Safety
/// See `nnue_batch_stm_indices`.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_values(batch: *const BatchGuard, len: *mut usize) -> *const f32 {
    export(batch.as_ref().map(|batch| batch.values()), len)
}

/// # Safety
/// See `nnue_batch_stm_indices`.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_cp(batch: *const BatchGuard, len: *mut usize) -> *const f32 {
    export(batch.as_ref().map(|batch| batch.cp()), len)
}

/// # Safety
/// See `nnue_batch_stm_indices`.
#[no_mangle]
pub unsafe extern "C" fn nnue_batch_wdl(batch: *const BatchGuard, len: *mut usize) -> *const f32 {
    export(batch.as_ref().map(|batch| batch.wdl()), len)
}
