use allocmark_core::{AllocError, ConfigError, LoadError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("no strategy matches '{0}'")]
    NoMatchingStrategy(String),
    #[error("{failed} of {total} cases failed verification")]
    VerificationFailed { failed: usize, total: usize },
}
