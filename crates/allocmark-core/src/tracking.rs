//! Allocation accounting through a counting `#[global_allocator]`.
//!
//! Counters are per thread, so a test or bench measures only its own
//! allocations even when the test runner uses several threads. Nothing is
//! counted unless a binary registers [`CountingAllocator`]:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOC: allocmark_core::CountingAllocator = allocmark_core::CountingAllocator::system();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Counter snapshot for the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub reallocations: u64,
    pub bytes_allocated: u64,
    pub bytes_freed: u64,
}

impl AllocStats {
    /// Activity between `earlier` and `self`.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        Self {
            allocations: self.allocations.wrapping_sub(earlier.allocations),
            deallocations: self.deallocations.wrapping_sub(earlier.deallocations),
            reallocations: self.reallocations.wrapping_sub(earlier.reallocations),
            bytes_allocated: self.bytes_allocated.wrapping_sub(earlier.bytes_allocated),
            bytes_freed: self.bytes_freed.wrapping_sub(earlier.bytes_freed),
        }
    }

    /// Every allocation was freed and every byte returned.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.allocations == self.deallocations && self.bytes_allocated == self.bytes_freed
    }
}

thread_local! {
    static STATS: Cell<AllocStats> = const {
        Cell::new(AllocStats {
            allocations: 0,
            deallocations: 0,
            reallocations: 0,
            bytes_allocated: 0,
            bytes_freed: 0,
        })
    };
}

static ACTIVE: AtomicBool = AtomicBool::new(false);

#[inline]
fn update(f: impl FnOnce(&mut AllocStats)) {
    // Thread-local storage may already be torn down while the thread exits.
    let _ = STATS.try_with(|cell| {
        let mut stats = cell.get();
        f(&mut stats);
        cell.set(stats);
    });
}

/// Counting wrapper around another global allocator (the system allocator by
/// default).
#[derive(Debug, Default)]
pub struct CountingAllocator<A = System> {
    inner: A,
}

impl CountingAllocator<System> {
    #[must_use]
    pub const fn system() -> Self {
        Self { inner: System }
    }
}

impl<A> CountingAllocator<A> {
    #[must_use]
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

// SAFETY: every call is forwarded unchanged to `inner`; bookkeeping touches
// only a `Copy` thread-local and never allocates.
unsafe impl<A: GlobalAlloc> GlobalAlloc for CountingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded with the caller's layout.
        let ptr = unsafe { self.inner.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        // SAFETY: forwarded with the caller's layout.
        let ptr = unsafe { self.inner.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: forwarded; `ptr` came from `inner` with `layout`.
        unsafe { self.inner.dealloc(ptr, layout) };
        update(|s| {
            s.deallocations += 1;
            s.bytes_freed += layout.size() as u64;
        });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded; `ptr` came from `inner` with `layout`.
        let new = unsafe { self.inner.realloc(ptr, layout, new_size) };
        if !new.is_null() {
            update(|s| {
                s.reallocations += 1;
                s.bytes_freed += layout.size() as u64;
                s.bytes_allocated += new_size as u64;
            });
        }
        new
    }
}

#[inline]
fn record_alloc(size: usize) {
    if !ACTIVE.load(Ordering::Relaxed) {
        ACTIVE.store(true, Ordering::Relaxed);
    }
    update(|s| {
        s.allocations += 1;
        s.bytes_allocated += size as u64;
    });
}

/// Counters of the calling thread since it started.
#[must_use]
pub fn thread_stats() -> AllocStats {
    STATS.try_with(Cell::get).unwrap_or_default()
}

/// Whether a [`CountingAllocator`] has served any allocation in this
/// process. False means the counters are meaningless.
#[must_use]
pub fn is_active() -> bool {
    ACTIVE.load(Ordering::Relaxed)
}

/// Runs `f` and returns what it allocated and freed on this thread.
pub fn measure<R>(f: impl FnOnce() -> R) -> (R, AllocStats) {
    let before = thread_stats();
    let out = f();
    (out, thread_stats().since(&before))
}
