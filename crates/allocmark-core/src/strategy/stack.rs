//! Stack-frame buffers.
//!
//! Rust has no dynamically sized stack allocation, so each request is served
//! by the smallest compile-time frame class that holds it. Every class gets
//! its own `#[inline(never)]` frame; the buffer lives exactly as long as that
//! frame.

use std::mem::MaybeUninit;

use crate::barrier::{BufferView, use_buffer};
use crate::error::AllocError;

/// Frame sizes, one monomorphized frame each.
pub const STACK_CLASSES: [usize; 6] = crate::SIZES;

fn class_of(size: usize, strategy: &str) -> Result<usize, AllocError> {
    STACK_CLASSES
        .iter()
        .position(|&class| size <= class)
        .ok_or_else(|| AllocError::StackLimit {
            strategy: strategy.to_owned(),
            size,
            max: STACK_CLASSES[STACK_CLASSES.len() - 1],
        })
}

/// Zero-initialized frame buffer.
pub fn stack_zeroed(size: usize) -> Result<(), AllocError> {
    match class_of(size, "stack_zeroed")? {
        0 => zeroed_frame::<4>(size),
        1 => zeroed_frame::<16>(size),
        2 => zeroed_frame::<512>(size),
        3 => zeroed_frame::<1024>(size),
        4 => zeroed_frame::<4096>(size),
        _ => zeroed_frame::<65536>(size),
    }
    Ok(())
}

/// Frame buffer that skips zeroing the local.
pub fn stack_uninit(size: usize) -> Result<(), AllocError> {
    match class_of(size, "stack_uninit")? {
        0 => uninit_frame::<4>(size),
        1 => uninit_frame::<16>(size),
        2 => uninit_frame::<512>(size),
        3 => uninit_frame::<1024>(size),
        4 => uninit_frame::<4096>(size),
        _ => uninit_frame::<65536>(size),
    }
    Ok(())
}

#[inline(never)]
fn zeroed_frame<const N: usize>(size: usize) {
    let mut frame = [0u8; N];
    use_buffer(BufferView::new(&mut frame[..size]));
}

#[inline(never)]
fn uninit_frame<const N: usize>(size: usize) {
    let mut frame = [const { MaybeUninit::<u8>::uninit() }; N];
    use_buffer(BufferView::uninit(&mut frame[..size]));
}
