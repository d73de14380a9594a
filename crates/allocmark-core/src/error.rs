//! Error types for strategy execution, allocator loading and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single allocate / use / release cycle.
///
/// Always fatal for the iteration that produced it. Strategies never retry
/// and never substitute a smaller or null buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("{strategy}: allocation of {size} bytes failed")]
    OutOfMemory { strategy: String, size: usize },
    #[error("{strategy}: zero-byte request has no defined layout")]
    ZeroSize { strategy: String },
    #[error("{strategy}: invalid layout (size {size}, align {align})")]
    InvalidLayout {
        strategy: String,
        size: usize,
        align: usize,
    },
    #[error("{strategy}: {size} bytes exceeds the largest stack frame class ({max})")]
    StackLimit {
        strategy: String,
        size: usize,
        max: usize,
    },
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
}

impl AllocError {
    pub(crate) fn oom(strategy: &str, size: usize) -> Self {
        Self::OutOfMemory {
            strategy: strategy.to_owned(),
            size,
        }
    }
}

/// Allocator-instance resolution failure. Startup-fatal.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load allocator library '{path}': {reason}")]
    Open { path: PathBuf, reason: String },
    #[error("symbol '{symbol}' not found in '{path}': {reason}")]
    MissingSymbol {
        path: PathBuf,
        symbol: String,
        reason: String,
    },
    #[error("instances '{first}' and '{second}' resolve to the same allocator image")]
    SharedInstance { first: String, second: String },
    #[error("library path contains an interior NUL byte: {0}")]
    InvalidPath(PathBuf),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Invalid instance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("expected {expected} allocator libraries, found {found}")]
    InstanceCount { expected: usize, found: usize },
    #[error("{var} is set but empty")]
    EmptyValue { var: &'static str },
}
