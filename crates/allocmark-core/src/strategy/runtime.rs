//! Runtime-managed buffers: released implicitly when they go out of scope.
//!
//! There is no explicit release call, so each buffer is handed to the barrier
//! while still borrowed; the drop that frees it can only happen afterwards.

use std::mem::MaybeUninit;

use crate::barrier::{BufferView, use_buffer};
use crate::error::AllocError;

/// `vec![0; size]`.
pub fn vec_zeroed(size: usize) -> Result<(), AllocError> {
    let mut buffer = vec![0u8; size];
    use_buffer(BufferView::new(&mut buffer));
    Ok(())
}

/// `Box<[u8]>` via `new_zeroed_slice`.
pub fn boxed_zeroed(size: usize) -> Result<(), AllocError> {
    let buffer = Box::<[u8]>::new_zeroed_slice(size);
    // SAFETY: all-zero bytes are valid `u8`s.
    let mut buffer = unsafe { buffer.assume_init() };
    use_buffer(BufferView::new(&mut buffer));
    Ok(())
}

/// Reserved but unwritten `Vec` capacity. Reports allocation failure instead
/// of aborting.
pub fn vec_uninit(size: usize) -> Result<(), AllocError> {
    let mut buffer: Vec<u8> = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| AllocError::oom("vec_uninit", size))?;
    use_buffer(BufferView::uninit(&mut buffer.spare_capacity_mut()[..size]));
    Ok(())
}

/// `Box<[MaybeUninit<u8>]>` via `new_uninit_slice`.
pub fn boxed_uninit(size: usize) -> Result<(), AllocError> {
    let mut buffer: Box<[MaybeUninit<u8>]> = Box::new_uninit_slice(size);
    use_buffer(BufferView::uninit(&mut buffer));
    Ok(())
}
