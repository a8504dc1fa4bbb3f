//! C ABI over [`SentencePieceProcessor`](crate::SentencePieceProcessor).
//!
//! Every entry point is `spp_*` and declared in `include/spp.h`. Fallible calls
//! return a [`StatusCode`] ordinal, or one of the negative binding codes
//! ([`SPP_NULL_POINTER`], [`SPP_INVALID_HANDLE`], [`SPP_PANIC`]) when the
//! caller broke the calling contract. Buffer results are written to
//! `(*out, *out_len)` and released with [`spp_buffer_free`].

mod buffer;
mod registry;

use crate::{
    error::SentencePieceError,
    status::{Status, StatusCode},
    PieceId, SentencePieceProcessor,
};
use log::error;
use registry::{clear_last_error, last_error, lookup, register, set_last_error, unregister};
use std::{
    any::Any,
    ffi::{c_char, c_int, CStr, CString},
    panic::{catch_unwind, AssertUnwindSafe},
    path::PathBuf,
    ptr::null_mut,
    slice,
    sync::{LazyLock, PoisonError},
};

pub use buffer::spp_buffer_free;
pub use registry::SppProcessor;

/// A required pointer argument was `NULL`.
pub const SPP_NULL_POINTER: c_int = -1;
/// The handle was never created or was already freed.
pub const SPP_INVALID_HANDLE: c_int = -2;
/// The call panicked; the processor is left as it was before the call.
pub const SPP_PANIC: c_int = -3;

/// 调用方违反调用约定
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum BindingError {
    #[error("{0} pointer is null")]
    NullPointer(&'static str),
    #[error("handle is not a live processor")]
    InvalidHandle,
}

impl BindingError {
    fn code(self) -> c_int {
        match self {
            Self::NullPointer(_) => SPP_NULL_POINTER,
            Self::InvalidHandle => SPP_INVALID_HANDLE,
        }
    }
}

enum Failure {
    Binding(BindingError),
    Processor(SentencePieceError),
}

impl From<BindingError> for Failure {
    fn from(e: BindingError) -> Self {
        Self::Binding(e)
    }
}

impl From<SentencePieceError> for Failure {
    fn from(e: SentencePieceError) -> Self {
        Self::Processor(e)
    }
}

impl From<Status> for Failure {
    fn from(e: Status) -> Self {
        Self::Processor(e.into())
    }
}

fn status_code(e: &SentencePieceError) -> c_int {
    match e {
        SentencePieceError::FilenameContainsNul(_) => StatusCode::InvalidArgument.raw(),
        e => e.status_code().unwrap_or(StatusCode::Internal).raw(),
    }
}

/// 阻止 panic 跨越 C 边界
fn guard<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = panic_message(&*payload);
        error!("panic in C entry point: {message}");
        set_last_error(format!("panic: {message}"));
        on_panic
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown"
    }
}

/// 返回状态码的调用。成功时清除本线程的错误信息。
fn status_call(f: impl FnOnce() -> Result<(), Failure>) -> c_int {
    guard(SPP_PANIC, || match f() {
        Ok(()) => {
            clear_last_error();
            StatusCode::Ok.raw()
        }
        Err(Failure::Binding(e)) => {
            set_last_error(e);
            e.code()
        }
        Err(Failure::Processor(e)) => {
            set_last_error(&e);
            status_code(&e)
        }
    })
}

/// 输出缓冲区的调用。处理器报错时输出空缓冲区，违反调用约定时输出空指针。
///
/// # Safety
///
/// `out` 和 `out_len` 为空或可写。
unsafe fn buffer_call(
    out: *mut *mut u8,
    out_len: *mut usize,
    f: impl FnOnce() -> Result<Vec<u8>, Failure>,
) -> c_int {
    buffer::clear(out, out_len);
    if out.is_null() || out_len.is_null() {
        let e = BindingError::NullPointer("output");
        set_last_error(e);
        return e.code();
    }
    status_call(|| match f() {
        Ok(bytes) => {
            buffer::give(bytes, out, out_len);
            Ok(())
        }
        Err(Failure::Processor(e)) => {
            buffer::give(Vec::new(), out, out_len);
            Err(Failure::Processor(e))
        }
        Err(e) => Err(e),
    })
}

/// 查询类调用，失败时返回 `fallback`
fn query<T: Copy>(fallback: T, f: impl FnOnce() -> Result<T, BindingError>) -> T {
    guard(fallback, || {
        f().unwrap_or_else(|e| {
            set_last_error(e);
            fallback
        })
    })
}

fn with_read<T>(
    handle: *const SppProcessor,
    f: impl FnOnce(&SentencePieceProcessor) -> T,
) -> Result<T, BindingError> {
    let shared = lookup(handle)?;
    let spp = shared.read().unwrap_or_else(PoisonError::into_inner);
    Ok(f(&spp))
}

fn with_write<T>(
    handle: *const SppProcessor,
    f: impl FnOnce(&mut SentencePieceProcessor) -> T,
) -> Result<T, BindingError> {
    let shared = lookup(handle)?;
    let mut spp = shared.write().unwrap_or_else(PoisonError::into_inner);
    Ok(f(&mut spp))
}

/// # Safety
///
/// `len` 非零时 `ptr` 指向 `len` 个有效元素。
unsafe fn input<'a, T>(ptr: *const T, len: usize, what: &'static str) -> Result<&'a [T], BindingError> {
    match (ptr.is_null(), len) {
        (_, 0) => Ok(&[]),
        (true, _) => Err(BindingError::NullPointer(what)),
        (false, _) => Ok(slice::from_raw_parts(ptr, len)),
    }
}

/// # Safety
///
/// `ptr` 为空或指向 nul 结尾的字符串。
unsafe fn c_str<'a>(ptr: *const c_char, what: &'static str) -> Result<&'a CStr, BindingError> {
    if ptr.is_null() {
        Err(BindingError::NullPointer(what))
    } else {
        Ok(CStr::from_ptr(ptr))
    }
}

#[cfg(unix)]
fn c_path(path: &CStr) -> PathBuf {
    use std::{ffi::OsStr, os::unix::ffi::OsStrExt};
    OsStr::from_bytes(path.to_bytes()).into()
}

#[cfg(not(unix))]
fn c_path(path: &CStr) -> PathBuf {
    path.to_string_lossy().into_owned().into()
}

fn out_of_range(id: PieceId) -> Status {
    Status::new(
        StatusCode::OutOfRange,
        format!("piece id {id} is out of range."),
    )
}

/// Creates a processor with no model loaded. Never returns `NULL` unless the
/// allocation panicked.
#[no_mangle]
pub extern "C" fn spp_new() -> *mut SppProcessor {
    guard(null_mut(), || register(SentencePieceProcessor::new()))
}

/// Destroys a processor. Freeing the same handle twice yields `SPP_INVALID_HANDLE`.
///
/// # Safety
///
/// `handle` must come from [`spp_new`] or be `NULL`.
#[no_mangle]
pub unsafe extern "C" fn spp_free(handle: *mut SppProcessor) -> c_int {
    status_call(|| Ok(unregister(handle)?))
}

/// Loads the model file at `path` (a nul terminated byte string).
///
/// # Safety
///
/// `path` must be `NULL` or a nul terminated string.
#[no_mangle]
pub unsafe extern "C" fn spp_load(handle: *mut SppProcessor, path: *const c_char) -> c_int {
    status_call(|| {
        let path = c_path(c_str(path, "path")?);
        Ok(with_write(handle, |spp| spp.load(path))??)
    })
}

/// Loads a serialized `ModelProto`.
///
/// # Safety
///
/// `data` must point to `len` readable bytes unless `len` is 0.
#[no_mangle]
pub unsafe extern "C" fn spp_from_serialized_proto(
    handle: *mut SppProcessor,
    data: *const u8,
    len: usize,
) -> c_int {
    status_call(|| {
        let data = input(data, len, "data")?;
        Ok(with_write(handle, |spp| spp.load_from_serialized_proto(data))??)
    })
}

/// Copies out the bytes the current model was loaded from.
///
/// # Safety
///
/// `out` and `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn spp_to_serialized_proto(
    handle: *const SppProcessor,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        Ok(with_read(handle, |spp| spp.serialized_model_proto().map(<[u8]>::to_vec))??)
    })
}

/// Encodes `text` into a serialized `SentencePieceText`.
///
/// # Safety
///
/// `text` must point to `len` readable bytes unless `len` is 0; `out` and
/// `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn spp_encode_as_serialized_proto(
    handle: *const SppProcessor,
    text: *const u8,
    len: usize,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let text = input(text, len, "text")?;
        Ok(with_read(handle, |spp| spp.encode_as_serialized_proto(text))??)
    })
}

/// Samples a segmentation of `text`; see
/// [`SentencePieceProcessor::sample_encode`](crate::SentencePieceProcessor::sample_encode).
///
/// # Safety
///
/// As [`spp_encode_as_serialized_proto`].
#[no_mangle]
pub unsafe extern "C" fn spp_sample_encode_as_serialized_proto(
    handle: *const SppProcessor,
    text: *const u8,
    len: usize,
    nbest: i32,
    alpha: f32,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let text = input(text, len, "text")?;
        Ok(with_read(handle, |spp| spp.sample_encode_as_serialized_proto(text, nbest, alpha))??)
    })
}

/// Encodes `text` into a serialized `NBestSentencePieceText`.
///
/// # Safety
///
/// As [`spp_encode_as_serialized_proto`].
#[no_mangle]
pub unsafe extern "C" fn spp_nbest_encode_as_serialized_proto(
    handle: *const SppProcessor,
    text: *const u8,
    len: usize,
    nbest: i32,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let text = input(text, len, "text")?;
        Ok(with_read(handle, |spp| spp.nbest_encode_as_serialized_proto(text, nbest))??)
    })
}

/// Decodes piece ids into UTF-8 text.
///
/// # Safety
///
/// `ids` must point to `count` ids unless `count` is 0; `out` and `out_len`
/// must be writable.
#[no_mangle]
pub unsafe extern "C" fn spp_decode_piece_ids(
    handle: *const SppProcessor,
    ids: *const PieceId,
    count: usize,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let ids = input(ids, count, "ids")?;
        let text = with_read(handle, |spp| -> crate::Result<String> {
            if spp.is_loaded() {
                if let Some(&id) = ids.iter().find(|&&id| id < 0) {
                    return Err(out_of_range(id).into());
                }
            }
            let ids = ids.iter().map(|&id| id as u32).collect::<Vec<_>>();
            spp.decode_piece_ids(&ids)
        })??;
        Ok(text.into_bytes())
    })
}

/// Decodes piece strings into UTF-8 text. Pieces that are not valid UTF-8 are
/// decoded lossily.
///
/// # Safety
///
/// `pieces` must point to `count` nul terminated strings unless `count` is 0;
/// `out` and `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn spp_decode_pieces(
    handle: *const SppProcessor,
    pieces: *const *const c_char,
    count: usize,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let pieces = input(pieces, count, "pieces")?
            .iter()
            .map(|&p| c_str(p, "piece").map(CStr::to_string_lossy))
            .collect::<Result<Vec<_>, _>>()?;
        let text = with_read(handle, |spp| spp.decode_pieces(&pieces))??;
        Ok(text.into_bytes())
    })
}

/// Id of `piece`: the unknown id when absent from the vocabulary, `-1` when no
/// model is loaded.
///
/// # Safety
///
/// `piece` must be `NULL` or a nul terminated string.
#[no_mangle]
pub unsafe extern "C" fn spp_piece_to_id(handle: *const SppProcessor, piece: *const c_char) -> PieceId {
    query(-1, || {
        let piece = c_str(piece, "piece")?.to_string_lossy();
        with_read(handle, |spp| spp.piece_to_id(&piece).map_or(-1, |id| id as PieceId))
    })
}

/// Copies out the piece string of `id`.
///
/// # Safety
///
/// `out` and `out_len` must be writable.
#[no_mangle]
pub unsafe extern "C" fn spp_id_to_piece(
    handle: *const SppProcessor,
    id: PieceId,
    out: *mut *mut u8,
    out_len: *mut usize,
) -> c_int {
    buffer_call(out, out_len, || {
        let piece = with_read(handle, |spp| -> crate::Result<Vec<u8>> {
            if spp.is_loaded() && id < 0 {
                return Err(out_of_range(id).into());
            }
            Ok(spp.id_to_piece(id as u32)?.as_bytes().to_vec())
        })??;
        Ok(piece)
    })
}

/// Vocabulary size, 0 when no model is loaded.
#[no_mangle]
pub extern "C" fn spp_piece_size(handle: *const SppProcessor) -> i32 {
    query(0, || with_read(handle, |spp| spp.len() as i32))
}

fn special_id(handle: *const SppProcessor, f: fn(&SentencePieceProcessor) -> Option<u32>) -> PieceId {
    query(-1, || with_read(handle, |spp| f(spp).map_or(-1, |id| id as PieceId)))
}

#[no_mangle]
pub extern "C" fn spp_bos_id(handle: *const SppProcessor) -> PieceId {
    special_id(handle, SentencePieceProcessor::bos_id)
}

#[no_mangle]
pub extern "C" fn spp_eos_id(handle: *const SppProcessor) -> PieceId {
    special_id(handle, SentencePieceProcessor::eos_id)
}

#[no_mangle]
pub extern "C" fn spp_pad_id(handle: *const SppProcessor) -> PieceId {
    special_id(handle, SentencePieceProcessor::pad_id)
}

#[no_mangle]
pub extern "C" fn spp_unk_id(handle: *const SppProcessor) -> PieceId {
    special_id(handle, SentencePieceProcessor::unk_id)
}

fn predicate(handle: *const SppProcessor, id: PieceId, f: fn(&SentencePieceProcessor, u32) -> bool) -> bool {
    query(false, || {
        with_read(handle, |spp| u32::try_from(id).is_ok_and(|id| f(spp, id)))
    })
}

/// Whether `id` is the unknown piece; `false` for ids out of range.
#[no_mangle]
pub extern "C" fn spp_is_unknown(handle: *const SppProcessor, id: PieceId) -> bool {
    predicate(handle, id, SentencePieceProcessor::is_unknown)
}

#[no_mangle]
pub extern "C" fn spp_is_control(handle: *const SppProcessor, id: PieceId) -> bool {
    predicate(handle, id, SentencePieceProcessor::is_control)
}

#[no_mangle]
pub extern "C" fn spp_is_unused(handle: *const SppProcessor, id: PieceId) -> bool {
    predicate(handle, id, SentencePieceProcessor::is_unused)
}

#[no_mangle]
pub extern "C" fn spp_is_byte(handle: *const SppProcessor, id: PieceId) -> bool {
    predicate(handle, id, SentencePieceProcessor::is_byte)
}

/// Score of `id`, 0 for ids out of range.
#[no_mangle]
pub extern "C" fn spp_get_score(handle: *const SppProcessor, id: PieceId) -> f32 {
    query(0., || {
        with_read(handle, |spp| u32::try_from(id).map_or(0., |id| spp.score(id)))
    })
}

/// # Safety
///
/// `options` must be `NULL` or a nul terminated string.
unsafe fn set_options(
    handle: *mut SppProcessor,
    options: *const c_char,
    f: fn(&mut SentencePieceProcessor, &str) -> crate::Result<()>,
) -> c_int {
    status_call(|| {
        let options = c_str(options, "options")?
            .to_str()
            .map_err(|_| Status::invalid_argument("options must be UTF-8."))?;
        Ok(with_write(handle, |spp| f(spp, options))??)
    })
}

/// Sets encode post-processing from a `"bos:eos:reverse"` list.
///
/// # Safety
///
/// `options` must be `NULL` or a nul terminated string.
#[no_mangle]
pub unsafe extern "C" fn spp_set_encode_extra_options(
    handle: *mut SppProcessor,
    options: *const c_char,
) -> c_int {
    set_options(handle, options, SentencePieceProcessor::set_encode_extra_options)
}

/// Sets decode pre-processing; only `"reverse"` is accepted.
///
/// # Safety
///
/// `options` must be `NULL` or a nul terminated string.
#[no_mangle]
pub unsafe extern "C" fn spp_set_decode_extra_options(
    handle: *mut SppProcessor,
    options: *const c_char,
) -> c_int {
    set_options(handle, options, SentencePieceProcessor::set_decode_extra_options)
}

#[no_mangle]
pub extern "C" fn spp_set_random_seed(handle: *mut SppProcessor, seed: u64) -> c_int {
    status_call(|| Ok(with_write(handle, |spp| spp.set_random_seed(seed))?))
}

static STATUS_NAMES: LazyLock<Box<[CString]>> = LazyLock::new(|| {
    (0..=16)
        .filter_map(StatusCode::from_raw)
        .map(|code| CString::new(code.name()).unwrap_or_default())
        .collect()
});

/// Static name of a status or binding code, e.g. `"NOT_FOUND"` or `"INVALID_HANDLE"`.
#[no_mangle]
pub extern "C" fn spp_status_name(code: c_int) -> *const c_char {
    let name: &CStr = match code {
        SPP_NULL_POINTER => c"NULL_POINTER",
        SPP_INVALID_HANDLE => c"INVALID_HANDLE",
        SPP_PANIC => c"PANIC",
        code => match STATUS_NAMES.get(code as usize) {
            Some(name) if code >= 0 => name.as_c_str(),
            _ => c"UNKNOWN_STATUS",
        },
    };
    name.as_ptr()
}

/// Message of the last failed call on this thread, `NULL` when the last
/// status call succeeded. Valid until the next `spp_*` call on the same thread.
#[no_mangle]
pub extern "C" fn spp_last_error_message() -> *const c_char {
    last_error()
}

/// Installs `env_logger` as the `log` backend, filtered by `RUST_LOG`
/// (default `warn`). Returns `ALREADY_EXISTS` when a logger is already set.
#[no_mangle]
pub extern "C" fn spp_init_logging() -> c_int {
    use env_logger::{Builder, Env};
    guard(SPP_PANIC, || {
        match Builder::from_env(Env::default().default_filter_or("warn")).try_init() {
            Ok(()) => StatusCode::Ok.raw(),
            Err(_) => StatusCode::AlreadyExists.raw(),
        }
    })
}
