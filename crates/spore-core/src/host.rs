//! Per-host state machine.
//!
//! A `HostRecord` tracks one host through a rollout run. The authoritative
//! field is `state`; `conf_state` and `post_state` mirror the outcome of
//! the configuration and post-install phases for display correlation and
//! carry no scheduling semantics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rollout state of a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    /// Not participating in the current run.
    Idle,
    /// Selected for the run, waiting for a base transfer slot.
    Queued,
    /// Serving its verified base copy to another host.
    BaseSrc,
    /// Receiving the base payload.
    BaseDst,
    /// Holds a verified base copy.
    BaseOk,
    /// No configuration overlay to push for this host.
    ConfSkip,
    /// Configuration overlay push in progress.
    ConfRunning,
    /// Configuration overlay installed.
    ConfOk,
    /// Configuration overlay push failed.
    ConfFail,
    /// Run completed without a post-install script.
    PostSkip,
    /// Post-install script executing.
    PostRunning,
    /// Post-install script succeeded.
    PostOk,
    /// Post-install script failed.
    PostFail,
    /// All phases done.
    Success,
    /// Some phase failed; the host can be re-enqueued.
    Failure,
}

impl HostState {
    /// True while the base phase has not settled for this host.
    pub fn base_in_progress(self) -> bool {
        matches!(self, HostState::Queued | HostState::BaseSrc | HostState::BaseDst)
    }

    /// States from which an explicit user enqueue is allowed.
    pub fn enqueueable(self) -> bool {
        matches!(self, HostState::Idle | HostState::Success | HostState::Failure)
    }

    /// Terminal run outcomes.
    pub fn terminal(self) -> bool {
        matches!(self, HostState::Success | HostState::Failure)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostState::Idle => "idle",
            HostState::Queued => "queued",
            HostState::BaseSrc => "serving base",
            HostState::BaseDst => "copying base",
            HostState::BaseOk => "base installed",
            HostState::ConfSkip => "conf skipped",
            HostState::ConfRunning => "copying conf",
            HostState::ConfOk => "conf installed",
            HostState::ConfFail => "conf failed",
            HostState::PostSkip => "post skipped",
            HostState::PostRunning => "running post-install",
            HostState::PostOk => "post-install done",
            HostState::PostFail => "post-install failed",
            HostState::Success => "success",
            HostState::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Timer value meaning "never started as a copy destination".
pub const TIMER_UNSET: i64 = -1;

/// State and timers for one host in a configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Normalized (lowercased) hostname, unique within a configuration.
    pub hostname: String,
    /// Participates in the current/next run.
    pub checked: bool,
    /// Authoritative rollout state.
    pub state: HostState,
    /// Display mirror of the configuration phase outcome.
    pub conf_state: HostState,
    /// Display mirror of the post-install phase outcome.
    pub post_state: HostState,
    /// Elapsed seconds of the base copy targeting this host;
    /// [`TIMER_UNSET`] until one starts.
    pub base_timer: i64,
}

impl HostRecord {
    /// Create a record for `hostname`, checked by default.
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.trim().to_lowercase(),
            checked: true,
            state: HostState::Idle,
            conf_state: HostState::Idle,
            post_state: HostState::Idle,
            base_timer: TIMER_UNSET,
        }
    }

    /// Return every transient field to its idle default.
    ///
    /// `checked` is preserved: the user's participation choice survives
    /// cancellation and re-preparation. Idempotent.
    pub fn reset(&mut self) {
        self.state = HostState::Idle;
        self.conf_state = HostState::Idle;
        self.post_state = HostState::Idle;
        self.base_timer = TIMER_UNSET;
    }
}
