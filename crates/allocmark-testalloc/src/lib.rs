//! Minimal allocator image for the instance loader tests.
//!
//! Exports the five entry points under the `testalloc_` prefix over the C
//! heap, plus `testalloc_live`, the number of blocks this image handed out
//! and has not yet taken back. Every staged copy is a separate image with its
//! own counter.
//!
//! The prefix keeps these symbols clear of any `mi_*` allocator linked into
//! the same process.

use std::ffi::c_void;
use std::sync::atomic::{AtomicIsize, Ordering};

/// Symbol prefix of the exported entry points.
pub const SYMBOL_PREFIX: &str = "testalloc_";

static LIVE: AtomicIsize = AtomicIsize::new(0);

fn track(ptr: *mut c_void) -> *mut c_void {
    if !ptr.is_null() {
        LIVE.fetch_add(1, Ordering::Relaxed);
    }
    ptr
}

/// # Safety
///
/// Same contract as `malloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testalloc_malloc(size: usize) -> *mut c_void {
    track(unsafe { libc::malloc(size) })
}

/// # Safety
///
/// Same contract as `calloc`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testalloc_calloc(count: usize, size: usize) -> *mut c_void {
    track(unsafe { libc::calloc(count, size) })
}

/// # Safety
///
/// `ptr` is null or came from `testalloc_malloc`/`testalloc_calloc` of this
/// image.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testalloc_free(ptr: *mut c_void) {
    if !ptr.is_null() {
        LIVE.fetch_sub(1, Ordering::Relaxed);
    }
    unsafe { libc::free(ptr) }
}

/// # Safety
///
/// `alignment` is a power of two multiple of the pointer size.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testalloc_malloc_aligned(size: usize, alignment: usize) -> *mut c_void {
    let mut out = std::ptr::null_mut();
    if unsafe { libc::posix_memalign(&mut out, alignment, size) } != 0 {
        return std::ptr::null_mut();
    }
    track(out)
}

/// # Safety
///
/// `ptr` is null or came from `testalloc_malloc_aligned` of this image.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn testalloc_free_aligned(ptr: *mut c_void, _alignment: usize) {
    unsafe { testalloc_free(ptr) }
}

/// Blocks handed out by this image and not yet released.
#[unsafe(no_mangle)]
pub extern "C" fn testalloc_live() -> isize {
    LIVE.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_count_follows_allocations() {
        let before = testalloc_live();
        let a = unsafe { testalloc_malloc(16) };
        let b = unsafe { testalloc_malloc_aligned(128, 64) };
        assert_eq!(b as usize % 64, 0);
        assert_eq!(testalloc_live(), before + 2);
        unsafe {
            testalloc_free(a);
            testalloc_free_aligned(b, 64);
        }
        assert_eq!(testalloc_live(), before);
    }
}
