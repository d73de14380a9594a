//! Third-party instance configuration.
//!
//! Read from the environment:
//! - `ALLOCMARK_INSTANCE_LIBS`: the three library paths, in platform
//!   path-list syntax (`:`-separated on Unix).
//! - `ALLOCMARK_INSTANCE_DIR`: alternatively, a directory holding
//!   `lib<stem>1.so`, `lib<stem>2.so`, `lib<stem>3.so` (platform naming).
//! - `ALLOCMARK_INSTANCE_STEM`: library stem, default `mimalloc`. Also used to
//!   label the instances (`mimalloc1` ...).
//! - `ALLOCMARK_SYMBOL_PREFIX`: entry point prefix, default `mi_`.
//!
//! When neither the library list nor the directory is set, no third-party
//! instances are declared.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::instance::{EntryPointNames, INSTANCE_COUNT};

pub const INSTANCE_LIBS_ENV: &str = "ALLOCMARK_INSTANCE_LIBS";
pub const INSTANCE_DIR_ENV: &str = "ALLOCMARK_INSTANCE_DIR";
pub const INSTANCE_STEM_ENV: &str = "ALLOCMARK_INSTANCE_STEM";
pub const SYMBOL_PREFIX_ENV: &str = "ALLOCMARK_SYMBOL_PREFIX";

pub const DEFAULT_STEM: &str = "mimalloc";
pub const DEFAULT_SYMBOL_PREFIX: &str = "mi_";

/// Platform file name of instance `index` (1-based), e.g. `libmimalloc2.so`.
#[must_use]
pub fn library_file_name(stem: &str, index: usize) -> String {
    format!(
        "{}{stem}{index}{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_SUFFIX
    )
}

/// Where to load the three allocator instances from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    pub libraries: [PathBuf; INSTANCE_COUNT],
    pub labels: [String; INSTANCE_COUNT],
    pub symbols: EntryPointNames,
}

impl InstanceConfig {
    /// Exactly three paths; instances are labelled `<stem>1..3`.
    pub fn from_paths(paths: Vec<PathBuf>, stem: &str) -> Result<Self, ConfigError> {
        let found = paths.len();
        let libraries: [PathBuf; INSTANCE_COUNT] =
            paths.try_into().map_err(|_| ConfigError::InstanceCount {
                expected: INSTANCE_COUNT,
                found,
            })?;
        Ok(Self {
            libraries,
            labels: labels(stem),
            symbols: EntryPointNames::default(),
        })
    }

    /// `dir/lib<stem>{1,2,3}.so` (platform naming).
    #[must_use]
    pub fn from_dir(dir: &Path, stem: &str) -> Self {
        Self {
            libraries: std::array::from_fn(|i| dir.join(library_file_name(stem, i + 1))),
            labels: labels(stem),
            symbols: EntryPointNames::default(),
        }
    }

    #[must_use]
    pub fn with_symbol_prefix(mut self, prefix: &str) -> Self {
        self.symbols = EntryPointNames::with_prefix(prefix);
        self
    }

    /// Reads the process environment.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<OsString>,
    ) -> Result<Option<Self>, ConfigError> {
        let stem = non_empty(&lookup, INSTANCE_STEM_ENV)?
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_STEM.to_owned());

        let config = if let Some(list) = non_empty(&lookup, INSTANCE_LIBS_ENV)? {
            Self::from_paths(std::env::split_paths(&list).collect(), &stem)?
        } else if let Some(dir) = non_empty(&lookup, INSTANCE_DIR_ENV)? {
            Self::from_dir(Path::new(&dir), &stem)
        } else {
            return Ok(None);
        };

        let prefix = lookup(SYMBOL_PREFIX_ENV)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_SYMBOL_PREFIX.to_owned());
        Ok(Some(config.with_symbol_prefix(&prefix)))
    }
}

fn labels(stem: &str) -> [String; INSTANCE_COUNT] {
    std::array::from_fn(|i| format!("{stem}{}", i + 1))
}

fn non_empty(
    lookup: &impl Fn(&str) -> Option<OsString>,
    var: &'static str,
) -> Result<Option<OsString>, ConfigError> {
    match lookup(var) {
        Some(value) if value.is_empty() => Err(ConfigError::EmptyValue { var }),
        other => Ok(other),
    }
}
