//! Preparation error types.

use std::path::PathBuf;

use thiserror::Error;

/// Global preparation failures. Any of these aborts before host work
/// starts; per-host trouble is the engine's business, not preparation's.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("distribution root {0} has no base/ directory")]
    NoBaseDir(PathBuf),

    #[error("no base manifest (base*.txt) under {0}")]
    ManifestMissing(PathBuf),

    #[error("expected exactly one base manifest under {dir}, found {count}")]
    ManifestAmbiguous { dir: PathBuf, count: usize },

    #[error("i/o error reading distribution: {0}")]
    Io(#[from] std::io::Error),
}

pub type PrepareResult<T> = Result<T, PrepareError>;
