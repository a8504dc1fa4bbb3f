//! 交给调用方的字节缓冲区。
//!
//! 每个缓冲区是一个独立的 `Box<[u8]>`，调用方必须以原样的指针和长度调用
//! `spp_buffer_free` 归还。空缓冲区的指针非空但不可解引用。

use std::ptr::{null_mut, slice_from_raw_parts_mut};

/// 把 `bytes` 的所有权移交给调用方
///
/// # Safety
///
/// `out` 和 `out_len` 必须可写。
pub(super) unsafe fn give(bytes: Vec<u8>, out: *mut *mut u8, out_len: *mut usize) {
    let bytes = bytes.into_boxed_slice();
    let len = bytes.len();
    *out = Box::into_raw(bytes).cast::<u8>();
    *out_len = len;
}

/// 绑定层错误时把输出置空，对空指针调用 `spp_buffer_free` 是无操作
///
/// # Safety
///
/// `out` 和 `out_len` 为空或可写。
pub(super) unsafe fn clear(out: *mut *mut u8, out_len: *mut usize) {
    if !out.is_null() {
        *out = null_mut();
    }
    if !out_len.is_null() {
        *out_len = 0;
    }
}

/// Releases a buffer returned by any `spp_*` call. `NULL` is ignored.
///
/// # Safety
///
/// `data` and `len` must be exactly what an `spp_*` call wrote, and each buffer
/// may be released only once.
#[no_mangle]
pub unsafe extern "C" fn spp_buffer_free(data: *mut u8, len: usize) {
    if data.is_null() {
        return;
    }
    drop(Box::from_raw(slice_from_raw_parts_mut(data, len)));
}
