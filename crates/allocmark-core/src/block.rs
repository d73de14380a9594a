//! Raw allocations bound to their matching release call.
//!
//! A [`RawBlock`] is created from the pointer an allocation primitive returned
//! and carries the [`Release`] that frees it. The release runs from `Drop`, so
//! it happens exactly once on every path, unwinding included, and an
//! aligned allocation can only ever reach the aligned free it was built with.
//! Diagnostic builds count every adoption and release.

use std::ptr::NonNull;

use crate::barrier::{BufferView, Contents};
use crate::error::AllocError;

/// Release half of an allocate/release pair.
pub(crate) trait Release {
    /// # Safety
    ///
    /// `ptr` must come from the allocation call this releaser was paired with
    /// and must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>);
}

pub(crate) struct RawBlock<R: Release> {
    ptr: NonNull<u8>,
    len: usize,
    contents: Contents,
    release: R,
}

impl<R: Release> RawBlock<R> {
    /// Takes ownership of `ptr`; a null pointer is reported as out-of-memory.
    ///
    /// # Safety
    ///
    /// `ptr` is null or a live allocation of at least `len` bytes that
    /// `release` frees. `contents` must describe the allocation accurately.
    #[inline]
    pub(crate) unsafe fn adopt(
        ptr: *mut u8,
        len: usize,
        contents: Contents,
        release: R,
        strategy: &str,
    ) -> Result<Self, AllocError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return Err(AllocError::oom(strategy, len));
        };
        #[cfg(any(test, feature = "diagnostics"))]
        crate::diagnostics::note_adopted();
        Ok(Self {
            ptr,
            len,
            contents,
            release,
        })
    }

    #[inline]
    pub(crate) fn view(&mut self) -> BufferView<'_> {
        // SAFETY: the block owns `len` bytes at `ptr` until drop, and the
        // returned view mutably borrows the block.
        unsafe { BufferView::from_raw(self.ptr, self.len, self.contents) }
    }
}

impl<R: Release> Drop for RawBlock<R> {
    #[inline]
    fn drop(&mut self) {
        // SAFETY: `ptr` was produced by the paired allocation call and is
        // released exactly once, here.
        unsafe { self.release.release(self.ptr) };
        #[cfg(any(test, feature = "diagnostics"))]
        crate::diagnostics::note_released();
    }
}
