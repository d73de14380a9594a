//! Explicit, ordered list of the strategies under measurement.

use std::sync::Arc;

use crate::config::InstanceConfig;
use crate::error::{AllocError, LoadError};
use crate::instance::{AllocatorInstance, InstanceSet};
use crate::linked;
use crate::strategy::third_party::{InstanceCall, InstanceStrategy};
use crate::strategy::{
    AllocStrategy, Builtin, Family, StrategyProfile, Zeroing, native, platform, pooled, runtime,
    stack,
};
use crate::{ALIGNMENT, SIZES};

const fn profile(family: Family, zeroing: Zeroing) -> StrategyProfile {
    StrategyProfile::new(family, zeroing, None)
}

const fn aligned(family: Family) -> StrategyProfile {
    StrategyProfile::new(family, Zeroing::Uninitialized, Some(ALIGNMENT))
}

/// Registration order is reporting order.
const BUILTIN: [Builtin; 14] = [
    Builtin::new(
        "vec_zeroed",
        profile(Family::RuntimeArray, Zeroing::Zeroed),
        runtime::vec_zeroed,
    ),
    Builtin::new(
        "boxed_zeroed",
        profile(Family::RuntimeArray, Zeroing::Zeroed),
        runtime::boxed_zeroed,
    ),
    Builtin::new(
        "vec_uninit",
        profile(Family::RuntimeArrayUninit, Zeroing::Uninitialized),
        runtime::vec_uninit,
    ),
    Builtin::new(
        "boxed_uninit",
        profile(Family::RuntimeArrayUninit, Zeroing::Uninitialized),
        runtime::boxed_uninit,
    ),
    Builtin::new(
        "pool_rent_return",
        profile(Family::Pool, Zeroing::Unspecified),
        pooled::pool_rent_return,
    ),
    Builtin::new(
        "stack_zeroed",
        profile(Family::Stack, Zeroing::Zeroed),
        stack::stack_zeroed,
    ),
    Builtin::new(
        "stack_uninit",
        profile(Family::Stack, Zeroing::Uninitialized),
        stack::stack_uninit,
    ),
    Builtin::new(
        "libc_malloc",
        profile(Family::NativeHeap, Zeroing::Uninitialized),
        native::libc_malloc,
    ),
    Builtin::new(
        "libc_calloc",
        profile(Family::NativeHeapZeroed, Zeroing::Zeroed),
        native::libc_calloc,
    ),
    Builtin::new(
        "libc_aligned",
        aligned(Family::NativeHeapAligned),
        native::libc_aligned,
    ),
    Builtin::new(
        "system_alloc",
        profile(Family::PlatformTaskMemory, Zeroing::Uninitialized),
        platform::system_alloc,
    ),
    Builtin::new(
        "system_aligned",
        aligned(Family::PlatformTaskMemory),
        platform::system_aligned,
    ),
    Builtin::new(
        "global_alloc",
        profile(Family::PlatformGlobalMemory, Zeroing::Uninitialized),
        platform::global_alloc,
    ),
    Builtin::new(
        "global_zeroed",
        profile(Family::PlatformGlobalMemory, Zeroing::Zeroed),
        platform::global_zeroed,
    ),
];

/// One (strategy, size) pair of the measurement matrix.
#[derive(Clone, Copy)]
pub struct Case<'a> {
    pub strategy: &'a dyn AllocStrategy,
    pub size: usize,
}

impl Case<'_> {
    pub fn run(&self) -> Result<(), AllocError> {
        self.strategy.run(self.size)
    }
}

impl std::fmt::Debug for Case<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Case")
            .field("strategy", &self.strategy.name())
            .field("size", &self.size)
            .finish()
    }
}

pub struct StrategyRegistry {
    entries: Vec<Box<dyn AllocStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl StrategyRegistry {
    /// Every strategy that needs no loaded library: the fixed list, then the
    /// linked mimalloc.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self {
            entries: BUILTIN
                .iter()
                .map(|b| Box::new(*b) as Box<dyn AllocStrategy>)
                .collect(),
        };
        registry.push_instance(&linked::instance());
        registry
    }

    /// Built-ins followed by `malloc`, `calloc` and `aligned` for each
    /// instance, in instance order.
    #[must_use]
    pub fn with_instances(instances: &InstanceSet) -> Self {
        let mut registry = Self::builtin();
        for instance in instances.iter() {
            registry.push_instance(instance);
        }
        registry
    }

    fn push_instance(&mut self, instance: &Arc<AllocatorInstance>) {
        for call in InstanceCall::ALL {
            self.entries
                .push(Box::new(InstanceStrategy::new(Arc::clone(instance), call)));
        }
    }

    /// Loads the configured instances, if any. Without configuration only the
    /// built-ins are declared.
    pub fn load(config: Option<&InstanceConfig>) -> Result<Self, LoadError> {
        match config {
            Some(config) => Ok(Self::with_instances(&InstanceSet::load(config)?)),
            None => Ok(Self::builtin()),
        }
    }

    /// [`load`](Self::load) with [`InstanceConfig::from_env`].
    pub fn from_env() -> Result<Self, LoadError> {
        let config = InstanceConfig::from_env()?;
        Self::load(config.as_ref())
    }

    /// Keeps the strategies whose names satisfy `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.entries.retain(|s| keep(s.name()));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn AllocStrategy> {
        self.entries.iter().map(|s| s.as_ref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|s| s.name())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn AllocStrategy> {
        self.iter().find(|s| s.name() == name)
    }

    pub fn run(&self, name: &str, size: usize) -> Result<(), AllocError> {
        self.get(name)
            .ok_or_else(|| AllocError::UnknownStrategy(name.to_owned()))?
            .run(size)
    }

    /// Strategy-major cross product with [`SIZES`].
    pub fn cases(&self) -> impl Iterator<Item = Case<'_>> {
        self.iter()
            .flat_map(|strategy| SIZES.into_iter().map(move |size| Case { strategy, size }))
    }
}
