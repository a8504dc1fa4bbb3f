//! 存活句柄的登记表和线程局部的错误信息。
//!
//! 句柄是单调递增的序号，不是地址，也从不被解引用。登记表以序号为键保存处理器的共享引用，
//! 序号不会被复用，释放后的句柄永远查不到，得到 `InvalidHandle`。

use super::BindingError;
use crate::SentencePieceProcessor;
use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::{c_char, CString},
    ptr::null,
    sync::{
        atomic::{AtomicUsize, Ordering::Relaxed},
        Arc, LazyLock, Mutex, MutexGuard, PoisonError, RwLock,
    },
};

pub(super) type Shared = Arc<RwLock<SentencePieceProcessor>>;

/// Opaque processor handle, never dereferenced.
#[repr(C)]
pub struct SppProcessor {
    _private: [u8; 0],
}

/// 下一个句柄的序号，0 留给空指针
static NEXT: AtomicUsize = AtomicUsize::new(1);
static LIVE: LazyLock<Mutex<HashMap<usize, Shared>>> = LazyLock::new(Default::default);

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(super) fn register(spp: SentencePieceProcessor) -> *mut SppProcessor {
    let id = NEXT.fetch_add(1, Relaxed);
    live().insert(id, Arc::new(RwLock::new(spp)));
    id as *mut SppProcessor
}

pub(super) fn lookup(handle: *const SppProcessor) -> Result<Shared, BindingError> {
    if handle.is_null() {
        return Err(BindingError::NullPointer("processor"));
    }
    live()
        .get(&(handle as usize))
        .cloned()
        .ok_or(BindingError::InvalidHandle)
}

/// 从登记表移除句柄。其他线程上进行中的调用持有共享引用，处理器在它们结束后才析构。
pub(super) fn unregister(handle: *mut SppProcessor) -> Result<(), BindingError> {
    if handle.is_null() {
        return Err(BindingError::NullPointer("processor"));
    }
    live()
        .remove(&(handle as usize))
        .map(drop)
        .ok_or(BindingError::InvalidHandle)
}

#[inline]
fn live() -> MutexGuard<'static, HashMap<usize, Shared>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn set_last_error(message: impl ToString) {
    // 消息中的 nul 无法传给 C，替换掉
    let message = message.to_string().replace('\0', "\\0");
    let message = CString::new(message).ok();
    LAST_ERROR.with(|e| *e.borrow_mut() = message);
}

pub(super) fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// 指针在同一线程下一次设置错误信息之前有效
pub(super) fn last_error() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ref().map_or(null(), |s| s.as_ptr()))
}
