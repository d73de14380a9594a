//! Use-barrier.
//!
//! Every strategy hands its buffer to [`use_buffer`] before releasing it. The
//! call is never inlined and the view is routed through
//! [`std::hint::black_box`], so the optimizer has to assume the memory escapes
//! and cannot elide the allocation. The barrier itself reads and writes
//! nothing.
//!
//! [`BufferView`] borrows the buffer it describes, which makes it impossible
//! to release the memory before the barrier has seen it.

use std::hint::black_box;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

/// Whether the bytes behind a view may be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contents {
    Initialized,
    Uninitialized,
}

/// Pointer + length view over a strategy-owned buffer.
#[derive(Debug)]
pub struct BufferView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    contents: Contents,
    _buffer: PhantomData<&'a mut [u8]>,
}

impl<'a> BufferView<'a> {
    /// View over initialized bytes.
    #[inline]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            ptr: NonNull::from(&mut *buffer).cast(),
            len: buffer.len(),
            contents: Contents::Initialized,
            _buffer: PhantomData,
        }
    }

    /// View over memory that has not been written yet.
    #[inline]
    pub fn uninit(buffer: &'a mut [MaybeUninit<u8>]) -> Self {
        Self {
            ptr: NonNull::from(&mut *buffer).cast(),
            len: buffer.len(),
            contents: Contents::Uninitialized,
            _buffer: PhantomData,
        }
    }

    /// View over a raw allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`, no
    /// other reference may access the region during `'a`, and when `contents`
    /// is [`Contents::Initialized`] every byte must be initialized.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize, contents: Contents) -> Self {
        Self {
            ptr,
            len,
            contents,
            _buffer: PhantomData,
        }
    }

    /// Start address of the buffer.
    #[must_use]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn contents(&self) -> Contents {
        self.contents
    }

    /// Largest power of two dividing the start address.
    #[must_use]
    pub fn alignment(&self) -> usize {
        1usize << self.addr().trailing_zeros().min(usize::BITS - 1)
    }

    /// The buffer contents, or `None` while they are uninitialized.
    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        match self.contents {
            // SAFETY: construction guarantees `len` readable, initialized bytes.
            Contents::Initialized => {
                Some(unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
            }
            Contents::Uninitialized => None,
        }
    }

    /// Writes `byte` over the whole buffer. Touches every byte, so it doubles
    /// as an addressability check for uninitialized memory.
    pub fn fill(&mut self, byte: u8) {
        // SAFETY: the view holds exclusive access to `len` writable bytes.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), byte, self.len) };
        self.contents = Contents::Initialized;
    }
}

/// Opacity boundary. Keeps the allocation observable without touching it.
#[inline(never)]
pub fn use_buffer(view: BufferView<'_>) {
    #[cfg(any(test, feature = "diagnostics"))]
    let view = crate::diagnostics::observe(view);
    black_box(view);
}

/// Whether a bench binary started with `args` would time an instrumented
/// barrier. `cargo bench` passes `--bench`; test-mode runs of bench targets
/// do not.
#[must_use]
pub fn times_instrumented_barrier<S: AsRef<str>>(instrumented: bool, args: &[S]) -> bool {
    instrumented && args.iter().any(|a| a.as_ref() == "--bench")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialized_view_exposes_bytes() {
        let mut buf = [1u8, 2, 3];
        let view = BufferView::new(&mut buf);
        assert_eq!(view.len(), 3);
        assert_eq!(view.bytes(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn uninit_view_hides_bytes_until_filled() {
        let mut buf = [MaybeUninit::<u8>::uninit(); 8];
        let mut view = BufferView::uninit(&mut buf);
        assert_eq!(view.contents(), Contents::Uninitialized);
        assert!(view.bytes().is_none());
        view.fill(0x5A);
        assert_eq!(view.bytes(), Some(&[0x5Au8; 8][..]));
    }

    #[test]
    fn alignment_reports_address_power_of_two() {
        #[repr(align(64))]
        struct Aligned([u8; 128]);
        let mut block = Aligned([0; 128]);
        assert!(BufferView::new(&mut block.0).alignment() >= 64);
        assert_eq!(BufferView::new(&mut block.0[1..]).alignment(), 1);
    }

    #[test]
    fn timed_runs_of_instrumented_builds_are_detected() {
        assert!(times_instrumented_barrier(true, &["strategies", "--bench"]));
        assert!(!times_instrumented_barrier(false, &["strategies", "--bench"]));
        assert!(!times_instrumented_barrier(true, &["strategies"]));
        assert!(crate::INSTRUMENTED);
    }

    #[test]
    fn barrier_accepts_empty_view() {
        use_buffer(BufferView::new(&mut []));
    }
}
