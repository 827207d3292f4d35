//! Rollout engine error types.

use thiserror::Error;

/// Errors surfaced by orchestrator commands.
///
/// Per-host rollout failures are not errors — they land in the host state
/// machine as `Failure` and travel through the event stream.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("a rollout run is active")]
    RunActive,
}

pub type RolloutResult<T> = Result<T, RolloutError>;
