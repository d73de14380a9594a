//! mimalloc linked into the process.
//!
//! The statically linked copy is the control for the loaded instances: same
//! allocator, same five entry points, but bound at link time instead of
//! through `dlopen`. Its strategies are built in and need no configuration.

use std::sync::{Arc, OnceLock};

use libmimalloc_sys as mi;

use crate::instance::{AllocatorInstance, EntryPoints};

/// Label of the linked instance; its strategies are `mimalloc_linked_<call>`.
pub const LINKED_LABEL: &str = "mimalloc_linked";

/// Dispatch table over the linked mimalloc.
#[must_use]
pub fn entry_points() -> EntryPoints {
    EntryPoints {
        malloc: mi::mi_malloc,
        calloc: mi::mi_calloc,
        free: mi::mi_free,
        malloc_aligned: mi::mi_malloc_aligned,
        free_aligned: mi::mi_free_aligned,
    }
}

/// Process-wide handle on the linked instance.
pub fn instance() -> Arc<AllocatorInstance> {
    static LINKED: OnceLock<Arc<AllocatorInstance>> = OnceLock::new();
    Arc::clone(LINKED.get_or_init(|| {
        // SAFETY: all five functions belong to the one linked mimalloc heap.
        Arc::new(unsafe { AllocatorInstance::from_entry_points(LINKED_LABEL, entry_points()) })
    }))
}
