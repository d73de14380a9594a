//! Shared size-class buffer pool.
//!
//! Power-of-two buckets from 16 B to 1 MiB, each a mutex-guarded LIFO stack
//! of boxed slices. [`BufferPool::rent`] hands out an RAII [`Rented`] guard;
//! dropping it (or calling [`Rented::give_back`]) pushes the very same buffer
//! back onto its bucket. While rented, a buffer is off the stack and invisible
//! to other renters.
//!
//! Returned buffers are not cleared.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, const_mutex};

/// Smallest bucket: 16 bytes.
const MIN_CLASS_SHIFT: u32 = 4;
/// Largest bucket: 1 MiB.
const MAX_CLASS_SHIFT: u32 = 20;
const NUM_CLASSES: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

/// Buffers retained per bucket; returns beyond this are dropped.
pub const MAX_RETAINED_PER_CLASS: usize = 32;

/// Largest request served from a bucket.
pub const MAX_POOLED_SIZE: usize = 1 << MAX_CLASS_SHIFT;

static SHARED: BufferPool = BufferPool::new();

pub struct BufferPool {
    buckets: [Mutex<Vec<Box<[u8]>>>; NUM_CLASSES],
    outstanding: AtomicUsize,
}

impl BufferPool {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buckets: [const { const_mutex(Vec::new()) }; NUM_CLASSES],
            outstanding: AtomicUsize::new(0),
        }
    }

    /// The process-wide pool used by the `pool_rent_return` strategy.
    #[must_use]
    pub fn shared() -> &'static Self {
        &SHARED
    }

    fn class_index(size: usize) -> Option<usize> {
        if size > MAX_POOLED_SIZE {
            return None;
        }
        let rounded = size.max(1 << MIN_CLASS_SHIFT).next_power_of_two();
        Some((rounded.trailing_zeros() - MIN_CLASS_SHIFT) as usize)
    }

    /// Length of the buffer a rent of `size` bytes yields.
    #[must_use]
    pub fn class_size(size: usize) -> usize {
        match Self::class_index(size) {
            Some(class) => 1 << (class as u32 + MIN_CLASS_SHIFT),
            None => size,
        }
    }

    /// Rents a buffer of at least `size` bytes.
    pub fn rent(&self, size: usize) -> Rented<'_> {
        let class = Self::class_index(size);
        let buffer = match class {
            Some(index) => self.buckets[index]
                .lock()
                .pop()
                .unwrap_or_else(|| fresh(Self::class_size(size))),
            None => fresh(size),
        };
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        Rented {
            pool: self,
            buffer: Some(buffer),
            class,
        }
    }

    fn restore(&self, buffer: Box<[u8]>, class: Option<usize>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        let Some(index) = class else {
            return;
        };
        let mut bucket = self.buckets[index].lock();
        if bucket.len() < MAX_RETAINED_PER_CLASS {
            bucket.push(buffer);
        }
    }

    /// Buffers currently parked in the bucket serving `size`.
    #[must_use]
    pub fn available(&self, size: usize) -> usize {
        Self::class_index(size).map_or(0, |index| self.buckets[index].lock().len())
    }

    /// Buffers rented and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Drops every parked buffer.
    pub fn trim(&self) {
        for bucket in &self.buckets {
            bucket.lock().clear();
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

fn fresh(len: usize) -> Box<[u8]> {
    vec![0u8; len].into_boxed_slice()
}

/// A rented buffer. Goes back to its pool on drop.
pub struct Rented<'a> {
    pool: &'a BufferPool,
    buffer: Option<Box<[u8]>>,
    class: Option<usize>,
}

impl Rented<'_> {
    /// Returns the buffer to the pool it was rented from.
    pub fn give_back(self) {
        drop(self);
    }
}

impl Deref for Rented<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or_default()
    }
}

impl DerefMut for Rented<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buffer.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for Rented<'_> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.restore(buffer, self.class);
        }
    }
}
