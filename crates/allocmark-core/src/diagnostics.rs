//! Diagnostic probe behind the use-barrier.
//!
//! Compiled only with the `diagnostics` feature (and in this crate's unit
//! tests). Verification tooling installs a thread-local probe that sees every
//! [`BufferView`] passing through [`use_buffer`](crate::barrier::use_buffer).
//! Timed benches refuse to run when the feature is compiled in, so the
//! barrier they measure stays a pure `black_box`.
//!
//! The same builds count raw blocks as they are adopted and released
//! ([`raw_blocks`]), which covers the C heap, `System` and loaded instances
//! that a counting global allocator never sees.
//!
//! A probe must not invoke strategies itself.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::barrier::BufferView;

type Probe = Box<dyn FnMut(&mut BufferView<'_>)>;

thread_local! {
    static PROBE: RefCell<Option<Probe>> = const { RefCell::new(None) };
    static RAW_BLOCKS: Cell<RawBlockStats> = const {
        Cell::new(RawBlockStats { adopted: 0, released: 0 })
    };
}

/// Raw allocations adopted and released on the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlockStats {
    pub adopted: u64,
    pub released: u64,
}

impl RawBlockStats {
    /// Difference from an earlier snapshot.
    #[must_use]
    pub fn since(self, earlier: Self) -> Self {
        Self {
            adopted: self.adopted.wrapping_sub(earlier.adopted),
            released: self.released.wrapping_sub(earlier.released),
        }
    }

    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.adopted == self.released
    }
}

/// Snapshot of the current thread's raw-block counters.
#[must_use]
pub fn raw_blocks() -> RawBlockStats {
    RAW_BLOCKS.try_with(Cell::get).unwrap_or_default()
}

pub(crate) fn note_adopted() {
    let _ = RAW_BLOCKS.try_with(|c| {
        let mut stats = c.get();
        stats.adopted += 1;
        c.set(stats);
    });
}

pub(crate) fn note_released() {
    let _ = RAW_BLOCKS.try_with(|c| {
        let mut stats = c.get();
        stats.released += 1;
        c.set(stats);
    });
}

/// Uninstalls the probe (restoring the previous one) on drop.
pub struct ProbeGuard {
    previous: Option<Probe>,
    _thread_bound: PhantomData<*const ()>,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        PROBE.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// Installs `probe` for the current thread.
pub fn install(probe: impl FnMut(&mut BufferView<'_>) + 'static) -> ProbeGuard {
    let previous = PROBE.with(|slot| slot.borrow_mut().replace(Box::new(probe)));
    ProbeGuard {
        previous,
        _thread_bound: PhantomData,
    }
}

pub(crate) fn observe(mut view: BufferView<'_>) -> BufferView<'_> {
    PROBE.with(|slot| {
        if let Some(probe) = slot.borrow_mut().as_mut() {
            probe(&mut view);
        }
    });
    view
}

/// Byte pattern written by [`record`] after inspecting a view.
pub const CANARY: u8 = 0xA5;

/// Aggregate of everything a recording probe saw. `Copy` so that recording
/// never allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Barrier invocations.
    pub calls: usize,
    pub min_len: usize,
    pub max_len: usize,
    /// Smallest address alignment observed.
    pub min_alignment: usize,
    /// Views whose contents were initialized but not all zero.
    pub nonzero: usize,
    /// Views whose initialized contents contained the canary.
    pub canary_hits: usize,
    /// Views handed over without initialized contents.
    pub uninitialized: usize,
    /// Last observed start address.
    pub last_addr: usize,
}

impl Default for Tally {
    fn default() -> Self {
        Self {
            calls: 0,
            min_len: usize::MAX,
            max_len: 0,
            min_alignment: usize::MAX,
            nonzero: 0,
            canary_hits: 0,
            uninitialized: 0,
            last_addr: 0,
        }
    }
}

impl Tally {
    fn absorb(&mut self, view: &BufferView<'_>) {
        self.calls += 1;
        self.min_len = self.min_len.min(view.len());
        self.max_len = self.max_len.max(view.len());
        self.min_alignment = self.min_alignment.min(view.alignment());
        self.last_addr = view.addr();
        match view.bytes() {
            Some(bytes) => {
                if bytes.iter().any(|&b| b != 0) {
                    self.nonzero += 1;
                }
                if bytes.contains(&CANARY) {
                    self.canary_hits += 1;
                }
            }
            None => self.uninitialized += 1,
        }
    }

    /// True when every view was initialized and all-zero on entry.
    #[must_use]
    pub fn all_zeroed(&self) -> bool {
        self.calls > 0 && self.nonzero == 0 && self.uninitialized == 0
    }
}

/// Installs a probe that tallies every view, then (when `canary` is set)
/// overwrites the whole buffer with [`CANARY`].
pub fn record(canary: bool) -> (ProbeGuard, Rc<Cell<Tally>>) {
    let tally = Rc::new(Cell::new(Tally::default()));
    let sink = Rc::clone(&tally);
    let guard = install(move |view| {
        let mut current = sink.get();
        current.absorb(view);
        sink.set(current);
        if canary {
            view.fill(CANARY);
        }
    });
    (guard, tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::use_buffer;

    #[test]
    fn recording_probe_sees_barrier_calls() {
        let (guard, tally) = record(false);
        let mut buf = [0u8; 32];
        use_buffer(BufferView::new(&mut buf));
        use_buffer(BufferView::new(&mut buf[..8]));
        drop(guard);
        let seen = tally.get();
        assert_eq!(seen.calls, 2);
        assert_eq!(seen.min_len, 8);
        assert_eq!(seen.max_len, 32);
        assert!(seen.all_zeroed());
    }

    #[test]
    fn canary_probe_overwrites_buffer() {
        let (guard, tally) = record(true);
        let mut buf = [0u8; 16];
        use_buffer(BufferView::new(&mut buf));
        drop(guard);
        assert_eq!(buf, [CANARY; 16]);
        assert_eq!(tally.get().canary_hits, 0);
    }

    #[test]
    fn raw_block_delta_is_relative_to_snapshot() {
        let before = raw_blocks();
        note_adopted();
        note_adopted();
        note_released();
        let delta = raw_blocks().since(before);
        assert_eq!(
            delta,
            RawBlockStats {
                adopted: 2,
                released: 1
            }
        );
        assert!(!delta.is_balanced());
        note_released();
        assert!(raw_blocks().since(before).is_balanced());
    }

    #[test]
    fn guard_restores_previous_probe() {
        let (_outer, outer_tally) = record(false);
        {
            let (_inner, inner_tally) = record(false);
            use_buffer(BufferView::new(&mut [0u8; 4]));
            assert_eq!(inner_tally.get().calls, 1);
        }
        use_buffer(BufferView::new(&mut [0u8; 4]));
        assert_eq!(outer_tally.get().calls, 1);
    }
}
