//! Strategies calling into a loaded [`AllocatorInstance`].
//!
//! Allocation and release both go through the dispatch table of the same
//! instance; an `Arc` keeps the image mapped while any strategy can still
//! call it.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::ALIGNMENT;
use crate::barrier::{Contents, use_buffer};
use crate::block::{RawBlock, Release};
use crate::error::AllocError;
use crate::instance::{AllocatorInstance, EntryPoints};
use crate::strategy::{AllocStrategy, Family, StrategyProfile, Zeroing};

/// Which allocation entry point to exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceCall {
    /// `malloc(size)` / `free`.
    Malloc,
    /// `calloc(size, 1)` / `free`.
    Calloc,
    /// `malloc_aligned(size, 64)` / `free_aligned(ptr, 64)`.
    Aligned,
}

impl InstanceCall {
    pub const ALL: [Self; 3] = [Self::Malloc, Self::Calloc, Self::Aligned];

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Calloc => "calloc",
            Self::Aligned => "aligned",
        }
    }

    #[must_use]
    pub const fn profile(self) -> StrategyProfile {
        match self {
            Self::Malloc => StrategyProfile::new(Family::ThirdParty, Zeroing::Uninitialized, None),
            Self::Calloc => StrategyProfile::new(Family::ThirdParty, Zeroing::Zeroed, None),
            Self::Aligned => {
                StrategyProfile::new(Family::ThirdParty, Zeroing::Uninitialized, Some(ALIGNMENT))
            }
        }
    }
}

struct InstanceFree<'a>(&'a EntryPoints);

impl Release for InstanceFree<'_> {
    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: `ptr` came from this instance's malloc/calloc.
        unsafe { (self.0.free)(ptr.as_ptr().cast()) }
    }
}

struct InstanceFreeAligned<'a> {
    entry: &'a EntryPoints,
    alignment: usize,
}

impl Release for InstanceFreeAligned<'_> {
    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>) {
        // SAFETY: `ptr` came from this instance's malloc_aligned with `alignment`.
        unsafe { (self.entry.free_aligned)(ptr.as_ptr().cast(), self.alignment) }
    }
}

/// `<label>_<call>` against one instance.
#[derive(Debug)]
pub struct InstanceStrategy {
    name: String,
    instance: Arc<AllocatorInstance>,
    call: InstanceCall,
}

impl InstanceStrategy {
    #[must_use]
    pub fn new(instance: Arc<AllocatorInstance>, call: InstanceCall) -> Self {
        Self {
            name: format!("{}_{}", instance.label(), call.suffix()),
            instance,
            call,
        }
    }

    #[must_use]
    pub fn instance(&self) -> &AllocatorInstance {
        &self.instance
    }
}

impl AllocStrategy for InstanceStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn profile(&self) -> StrategyProfile {
        self.call.profile()
    }

    fn run(&self, size: usize) -> Result<(), AllocError> {
        let entry = self.instance.entry_points();
        match self.call {
            InstanceCall::Malloc => {
                // SAFETY: instance `malloc` returns null or `size` owned bytes.
                let ptr = unsafe { (entry.malloc)(size) }.cast::<u8>();
                // SAFETY: released with the same instance's `free`.
                let mut block = unsafe {
                    RawBlock::adopt(
                        ptr,
                        size,
                        Contents::Uninitialized,
                        InstanceFree(entry),
                        &self.name,
                    )?
                };
                use_buffer(block.view());
            }
            InstanceCall::Calloc => {
                // SAFETY: instance `calloc` returns null or `size` zeroed bytes.
                let ptr = unsafe { (entry.calloc)(size, 1) }.cast::<u8>();
                // SAFETY: zeroed, released with the same instance's `free`.
                let mut block = unsafe {
                    RawBlock::adopt(
                        ptr,
                        size,
                        Contents::Initialized,
                        InstanceFree(entry),
                        &self.name,
                    )?
                };
                use_buffer(block.view());
            }
            InstanceCall::Aligned => {
                // SAFETY: instance `malloc_aligned` returns null or `size`
                // bytes aligned to `ALIGNMENT`.
                let ptr = unsafe { (entry.malloc_aligned)(size, ALIGNMENT) }.cast::<u8>();
                // SAFETY: released with the same instance's `free_aligned`
                // and the same alignment.
                let mut block = unsafe {
                    RawBlock::adopt(
                        ptr,
                        size,
                        Contents::Uninitialized,
                        InstanceFreeAligned {
                            entry,
                            alignment: ALIGNMENT,
                        },
                        &self.name,
                    )?
                };
                use_buffer(block.view());
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fake::{COUNTERS, instance};
    use super::*;
    use crate::diagnostics;
    use crate::error::LoadError;
    use crate::instance::InstanceSet;

    #[test]
    fn names_combine_label_and_call() {
        let shared = Arc::new(instance::<0>("mimalloc1"));
        let names: Vec<_> = InstanceCall::ALL
            .iter()
            .map(|&call| InstanceStrategy::new(Arc::clone(&shared), call).name().to_owned())
            .collect();
        assert_eq!(names, ["mimalloc1_malloc", "mimalloc1_calloc", "mimalloc1_aligned"]);
    }

    #[test]
    fn release_goes_to_the_allocating_instance() {
        let set = InstanceSet::from_instances([
            instance::<1>("one"),
            instance::<2>("two"),
            instance::<3>("three"),
        ])
        .expect("distinct tables");

        let second =
            InstanceStrategy::new(Arc::clone(set.get(1).expect("two")), InstanceCall::Malloc);
        for _ in 0..10 {
            second.run(512).expect("malloc");
        }
        assert_eq!(COUNTERS[2].allocs.load(Ordering::Relaxed), 10);
        assert_eq!(COUNTERS[2].frees.load(Ordering::Relaxed), 10);
        assert_eq!(COUNTERS[1].allocs.load(Ordering::Relaxed), 0);
        assert_eq!(COUNTERS[3].frees.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn aligned_release_passes_the_same_alignment() {
        let strategy = InstanceStrategy::new(Arc::new(instance::<4>("al")), InstanceCall::Aligned);
        let (guard, tally) = diagnostics::record(false);
        strategy.run(1024).expect("aligned");
        drop(guard);

        assert!(tally.get().min_alignment >= ALIGNMENT);
        assert_eq!(tally.get().min_len, 1024);
        assert_eq!(COUNTERS[4].aligned_allocs.load(Ordering::Relaxed), 1);
        assert_eq!(COUNTERS[4].aligned_frees.load(Ordering::Relaxed), 1);
        assert_eq!(COUNTERS[4].frees.load(Ordering::Relaxed), 0);
        assert_eq!(
            COUNTERS[4].last_free_alignment.load(Ordering::Relaxed),
            ALIGNMENT
        );
    }

    #[test]
    fn calloc_buffers_are_zeroed() {
        let strategy = InstanceStrategy::new(Arc::new(instance::<5>("z")), InstanceCall::Calloc);
        let (guard, tally) = diagnostics::record(true);
        for size in crate::SIZES {
            strategy.run(size).expect("calloc");
        }
        drop(guard);
        assert!(tally.get().all_zeroed());
        assert_eq!(tally.get().calls, crate::SIZES.len());
    }

    #[test]
    fn same_image_twice_is_refused() {
        let err = InstanceSet::from_instances([
            instance::<6>("a"),
            instance::<7>("b"),
            instance::<6>("c"),
        ])
        .expect_err("duplicate table");
        match err {
            LoadError::SharedInstance { first, second } => {
                assert_eq!((first.as_str(), second.as_str()), ("a", "c"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
