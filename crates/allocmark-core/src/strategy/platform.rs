//! Rust platform allocators.
//!
//! `system_*` call [`std::alloc::System`] directly (the OS-backed allocator);
//! `global_*` go through whatever `#[global_allocator]` the process
//! registered. Both take the layout again on release, so an aligned
//! allocation is freed with the alignment it was made with.

use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr::NonNull;

use crate::ALIGNMENT;
use crate::barrier::{Contents, use_buffer};
use crate::block::{RawBlock, Release};
use crate::error::AllocError;

pub(crate) struct SystemDealloc(Layout);

impl Release for SystemDealloc {
    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: `ptr` came from `System` with this layout.
        unsafe { System.dealloc(ptr.as_ptr(), self.0) }
    }
}

pub(crate) struct GlobalDealloc(Layout);

impl Release for GlobalDealloc {
    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: `ptr` came from the global allocator with this layout.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), self.0) }
    }
}

/// Zero-size layouts are undefined for `GlobalAlloc`, so they are refused.
fn byte_layout(size: usize, align: usize, strategy: &str) -> Result<Layout, AllocError> {
    if size == 0 {
        return Err(AllocError::ZeroSize {
            strategy: strategy.to_owned(),
        });
    }
    Layout::from_size_align(size, align).map_err(|_| AllocError::InvalidLayout {
        strategy: strategy.to_owned(),
        size,
        align,
    })
}

/// `System.alloc` / `System.dealloc`.
pub fn system_alloc(size: usize) -> Result<(), AllocError> {
    let layout = byte_layout(size, 1, "system_alloc")?;
    // SAFETY: non-zero layout.
    let ptr = unsafe { System.alloc(layout) };
    // SAFETY: released through `System` with the same layout.
    let mut block = unsafe {
        RawBlock::adopt(
            ptr,
            size,
            Contents::Uninitialized,
            SystemDealloc(layout),
            "system_alloc",
        )?
    };
    use_buffer(block.view());
    Ok(())
}

/// `System.alloc` / `System.dealloc` with a 64-byte layout.
pub fn system_aligned(size: usize) -> Result<(), AllocError> {
    let layout = byte_layout(size, ALIGNMENT, "system_aligned")?;
    // SAFETY: non-zero layout.
    let ptr = unsafe { System.alloc(layout) };
    // SAFETY: released through `System` with the same layout.
    let mut block = unsafe {
        RawBlock::adopt(
            ptr,
            size,
            Contents::Uninitialized,
            SystemDealloc(layout),
            "system_aligned",
        )?
    };
    use_buffer(block.view());
    Ok(())
}

/// `std::alloc::alloc` / `std::alloc::dealloc`.
pub fn global_alloc(size: usize) -> Result<(), AllocError> {
    let layout = byte_layout(size, 1, "global_alloc")?;
    // SAFETY: non-zero layout.
    let ptr = unsafe { std::alloc::alloc(layout) };
    // SAFETY: released through the global allocator with the same layout.
    let mut block = unsafe {
        RawBlock::adopt(
            ptr,
            size,
            Contents::Uninitialized,
            GlobalDealloc(layout),
            "global_alloc",
        )?
    };
    use_buffer(block.view());
    Ok(())
}

/// `std::alloc::alloc_zeroed` / `std::alloc::dealloc`.
pub fn global_zeroed(size: usize) -> Result<(), AllocError> {
    let layout = byte_layout(size, 1, "global_zeroed")?;
    // SAFETY: non-zero layout.
    let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
    // SAFETY: zeroed memory is initialized; same-layout release.
    let mut block = unsafe {
        RawBlock::adopt(
            ptr,
            size,
            Contents::Initialized,
            GlobalDealloc(layout),
            "global_zeroed",
        )?
    };
    use_buffer(block.view());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_refused_before_allocating() {
        assert_eq!(
            system_alloc(0),
            Err(AllocError::ZeroSize {
                strategy: "system_alloc".into()
            })
        );
        assert!(matches!(global_zeroed(0), Err(AllocError::ZeroSize { .. })));
    }

    #[test]
    fn overflowing_layout_is_invalid() {
        assert!(matches!(
            byte_layout(usize::MAX - 8, ALIGNMENT, "t"),
            Err(AllocError::InvalidLayout { .. })
        ));
    }
}
