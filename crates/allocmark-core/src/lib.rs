//! # allocmark-core
//!
//! Allocation strategies under measurement and the contract they share.
//!
//! Every strategy allocates exactly the requested number of bytes, hands them
//! to the [`use_buffer`] barrier and releases them with the call paired to
//! the one that allocated them. The [`StrategyRegistry`] enumerates the
//! strategies in a fixed order; drivers iterate its [`cases`] over [`SIZES`].
//!
//! [`cases`]: StrategyRegistry::cases

#[cfg(not(unix))]
compile_error!("allocmark-core needs a Unix dynamic loader and posix_memalign");

pub mod barrier;
mod block;
pub mod config;
#[cfg(any(test, feature = "diagnostics"))]
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod linked;
pub mod pool;
pub mod registry;
pub mod strategy;
pub mod tracking;

pub use barrier::{BufferView, Contents, times_instrumented_barrier, use_buffer};
pub use config::InstanceConfig;
pub use error::{AllocError, ConfigError, LoadError};
pub use instance::{AllocatorInstance, EntryPointNames, EntryPoints, InstanceSet};
pub use pool::BufferPool;
pub use registry::{Case, StrategyRegistry};
pub use strategy::{Accounting, AllocStrategy, Family, StrategyProfile, Zeroing};
pub use tracking::{AllocStats, CountingAllocator};

/// Buffer sizes, in bytes, every strategy is measured at.
pub const SIZES: [usize; 6] = [4, 16, 512, 1024, 4096, 65536];

/// Alignment requested by the aligned strategies.
pub const ALIGNMENT: usize = 64;

/// True when the diagnostic probe hook and raw-block counters are compiled
/// in. Cargo unifies features across a workspace build, so this can be set
/// even for a crate that never asked for `diagnostics`.
pub const INSTRUMENTED: bool = cfg!(any(test, feature = "diagnostics"));
