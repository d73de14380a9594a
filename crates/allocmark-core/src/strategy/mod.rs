//! Allocation strategies.
//!
//! A strategy is a named unit of work `(size) -> Result<(), AllocError>`:
//! one allocation of exactly `size` bytes, one pass through the use-barrier,
//! one matching release. Strategies keep no state between invocations other
//! than the process-wide resource they allocate from (the shared pool or a
//! loaded allocator instance), and they never log.

pub mod native;
pub mod platform;
pub mod pooled;
pub mod runtime;
pub mod stack;
pub mod third_party;

use serde::{Deserialize, Serialize};

use crate::error::AllocError;

/// Allocation mechanism family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Family {
    RuntimeArray,
    RuntimeArrayUninit,
    Pool,
    Stack,
    NativeHeap,
    NativeHeapZeroed,
    NativeHeapAligned,
    PlatformTaskMemory,
    PlatformGlobalMemory,
    ThirdParty,
}

impl Family {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuntimeArray => "runtime-array",
            Self::RuntimeArrayUninit => "runtime-array-uninit",
            Self::Pool => "pool",
            Self::Stack => "stack",
            Self::NativeHeap => "native-heap",
            Self::NativeHeapZeroed => "native-heap-zeroed",
            Self::NativeHeapAligned => "native-heap-aligned",
            Self::PlatformTaskMemory => "platform-task-memory",
            Self::PlatformGlobalMemory => "platform-global-memory",
            Self::ThirdParty => "third-party",
        }
    }

    /// Counter that sees the family's allocations.
    #[must_use]
    pub const fn accounting(self) -> Accounting {
        match self {
            Self::RuntimeArray | Self::RuntimeArrayUninit => Accounting::GlobalAllocator,
            Self::Pool => Accounting::Pool,
            Self::Stack => Accounting::Frame,
            Self::NativeHeap
            | Self::NativeHeapZeroed
            | Self::NativeHeapAligned
            | Self::PlatformTaskMemory
            | Self::PlatformGlobalMemory
            | Self::ThirdParty => Accounting::RawBlock,
        }
    }
}

/// Where allocate/release balance of a family can be observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accounting {
    /// Rust global allocator; visible only to a registered counting allocator.
    GlobalAllocator,
    /// Shared pool counters.
    Pool,
    /// No heap traffic; the buffer lives in a stack frame.
    Frame,
    /// One raw block per cycle, counted at adoption and release in
    /// diagnostic builds.
    RawBlock,
}

/// What a freshly allocated buffer is guaranteed to contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zeroing {
    Zeroed,
    Uninitialized,
    /// May hold data from a previous user (pooled buffers).
    Unspecified,
}

/// Static description of a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub family: Family,
    pub zeroing: Zeroing,
    /// Requested alignment; `None` means the mechanism's default.
    pub alignment: Option<usize>,
}

impl StrategyProfile {
    #[must_use]
    pub const fn new(family: Family, zeroing: Zeroing, alignment: Option<usize>) -> Self {
        Self {
            family,
            zeroing,
            alignment,
        }
    }

    /// Alignment the start address must satisfy (1 when unconstrained).
    #[must_use]
    pub fn required_alignment(&self) -> usize {
        self.alignment.unwrap_or(1)
    }
}

/// Uniform entry point over every allocation back-end.
pub trait AllocStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn profile(&self) -> StrategyProfile;

    /// One allocate / use / release cycle of `size` bytes.
    fn run(&self, size: usize) -> Result<(), AllocError>;
}

/// Strategy backed by a plain function with no captured state.
#[derive(Clone, Copy)]
pub struct Builtin {
    name: &'static str,
    profile: StrategyProfile,
    run: fn(usize) -> Result<(), AllocError>,
}

impl Builtin {
    pub(crate) const fn new(
        name: &'static str,
        profile: StrategyProfile,
        run: fn(usize) -> Result<(), AllocError>,
    ) -> Self {
        Self { name, profile, run }
    }
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl AllocStrategy for Builtin {
    fn name(&self) -> &str {
        self.name
    }

    fn profile(&self) -> StrategyProfile {
        self.profile
    }

    #[inline]
    fn run(&self, size: usize) -> Result<(), AllocError> {
        (self.run)(size)
    }
}
