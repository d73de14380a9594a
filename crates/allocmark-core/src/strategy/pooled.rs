//! Rent/return against the shared [`BufferPool`].

use crate::barrier::{BufferView, use_buffer};
use crate::error::AllocError;
use crate::pool::BufferPool;

/// Rents at least `size` bytes, shows the first `size` to the barrier and
/// returns the same buffer.
pub fn pool_rent_return(size: usize) -> Result<(), AllocError> {
    let mut rented = BufferPool::shared().rent(size);
    use_buffer(BufferView::new(&mut rented[..size]));
    rented.give_back();
    Ok(())
}
