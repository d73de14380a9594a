//! C heap via `libc`: `malloc`, `calloc`, `posix_memalign`, `free`.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use crate::ALIGNMENT;
use crate::barrier::{Contents, use_buffer};
use crate::block::{RawBlock, Release};
use crate::error::AllocError;

/// Releases through `libc::free`; pairs with all three C allocation calls.
pub(crate) struct LibcFree;

impl Release for LibcFree {
    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees `ptr` came from the C heap.
        unsafe { libc::free(ptr.as_ptr().cast()) }
    }
}

/// `malloc` / `free`.
pub fn libc_malloc(size: usize) -> Result<(), AllocError> {
    // SAFETY: `malloc` returns null or `size` bytes owned by the caller.
    let ptr = unsafe { libc::malloc(size) }.cast::<u8>();
    // SAFETY: the block is released with `free`, its allocator's pair.
    let mut block =
        unsafe { RawBlock::adopt(ptr, size, Contents::Uninitialized, LibcFree, "libc_malloc")? };
    use_buffer(block.view());
    Ok(())
}

/// `calloc(size, 1)` / `free`.
pub fn libc_calloc(size: usize) -> Result<(), AllocError> {
    // SAFETY: `calloc` returns null or `size` zeroed bytes owned by the caller.
    let ptr = unsafe { libc::calloc(size, 1) }.cast::<u8>();
    // SAFETY: zeroed memory is initialized; released with `free`.
    let mut block =
        unsafe { RawBlock::adopt(ptr, size, Contents::Initialized, LibcFree, "libc_calloc")? };
    use_buffer(block.view());
    Ok(())
}

/// `posix_memalign(64)` / `free`.
pub fn libc_aligned(size: usize) -> Result<(), AllocError> {
    let ptr = posix_memalign(size, ALIGNMENT);
    // SAFETY: `posix_memalign` memory is released with `free`.
    let mut block =
        unsafe { RawBlock::adopt(ptr, size, Contents::Uninitialized, LibcFree, "libc_aligned")? };
    use_buffer(block.view());
    Ok(())
}

/// Null on failure, like the other C allocation calls.
fn posix_memalign(size: usize, align: usize) -> *mut u8 {
    let mut out: *mut c_void = ptr::null_mut();
    // SAFETY: `align` is a power of two and a multiple of `size_of::<*mut c_void>()`.
    let rc = unsafe { libc::posix_memalign(&mut out, align, size) };
    if rc == 0 {
        out.cast()
    } else {
        ptr::null_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_memalign_honours_alignment() {
        for size in crate::SIZES {
            let ptr = posix_memalign(size, ALIGNMENT);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % ALIGNMENT, 0);
            unsafe { libc::free(ptr.cast()) };
        }
    }

    #[test]
    fn posix_memalign_rejects_bad_alignment() {
        assert!(posix_memalign(64, 3).is_null());
    }
}
