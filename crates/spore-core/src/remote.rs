//! Contracts for remote operations.
//!
//! The engine drives hosts exclusively through these traits; concrete
//! mechanics (ssh, rsync, checksum tools) live behind them. Every
//! long-running operation returns an [`OpHandle`] so the caller can track
//! the driving process for cancellation and block on its exit status.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host name an [`OpHandle`] reports when its driving process runs on the
/// orchestrator's own machine rather than a fleet host.
pub const LOCAL_HOST: &str = "localhost";

/// Errors from remote-operation plumbing.
///
/// A remote command that ran and exited non-zero is *not* an error — that
/// outcome travels through [`OpStatus`]. These are the cases where the
/// operation could not be driven at all.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote operation i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Exit status of a finished remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpStatus {
    code: i32,
}

impl OpStatus {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn success(self) -> bool {
        self.code == 0
    }

    pub fn code(self) -> i32 {
        self.code
    }
}

impl From<std::process::ExitStatus> for OpStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        // Signal-terminated processes report no code; treat as failure.
        Self::new(status.code().unwrap_or(-1))
    }
}

type WaitFuture = Pin<Box<dyn Future<Output = RemoteResult<OpStatus>> + Send>>;

/// Handle to an in-flight remote operation.
///
/// Exposes the pid of the driving process and the host that pid lives on,
/// so a cancellation controller can force-terminate it, plus a one-shot
/// blocking wait for the exit status.
pub struct OpHandle {
    host: String,
    pid: u32,
    wait: WaitFuture,
}

impl OpHandle {
    pub fn new<F>(host: impl Into<String>, pid: u32, wait: F) -> Self
    where
        F: Future<Output = RemoteResult<OpStatus>> + Send + 'static,
    {
        Self {
            host: host.into(),
            pid,
            wait: Box::pin(wait),
        }
    }

    /// Handle whose wait resolves immediately; for in-memory fakes.
    pub fn ready(host: impl Into<String>, pid: u32, status: OpStatus) -> Self {
        Self::new(host, pid, async move { Ok(status) })
    }

    /// Host the driving process runs on.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Pid of the driving process.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the operation finishes.
    pub async fn wait(self) -> RemoteResult<OpStatus> {
        self.wait.await
    }
}

impl fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpHandle")
            .field("host", &self.host)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Remote transfer, execution, and termination primitives.
#[async_trait]
pub trait RemoteOps: Send + Sync {
    /// Copy a local tree to `dst` on `host`. With `clean`, the destination
    /// is made an exact mirror of the source.
    async fn copy_to_remote(
        &self,
        src: &Path,
        host: &str,
        dst: &Path,
        clean: bool,
    ) -> RemoteResult<OpHandle>;

    /// Copy a tree from one remote host to another.
    async fn sync_between(
        &self,
        src_host: &str,
        src: &Path,
        dst_host: &str,
        dst: &Path,
    ) -> RemoteResult<OpHandle>;

    /// Run a shell command on `host`.
    async fn exec(&self, host: &str, command: &str) -> RemoteResult<OpHandle>;

    /// Remove `path` on `host` and recreate it empty.
    async fn recreate_empty(&self, host: &str, path: &Path) -> RemoteResult<OpHandle>;

    /// Terminate every process on `host` whose executable lives under
    /// `path`. Best-effort; callers treat failures as non-fatal.
    async fn kill_processes_under(&self, host: &str, path: &Path) -> RemoteResult<OpHandle>;

    /// Force-terminate the process tree rooted at `pid` on `host`.
    async fn kill_tree(&self, host: &str, pid: u32) -> RemoteResult<()>;

    /// Force-terminate locally-owned driver processes in one sweep.
    async fn kill_all_local(&self, pids: &[u32]) -> RemoteResult<()>;
}

/// Outcome of a checksum verification run on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    /// Exit code of the verification tool.
    pub exit_code: i32,
    /// Files whose checksum did not match the manifest.
    pub mismatched: Vec<String>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.exit_code == 0 && self.mismatched.is_empty()
    }
}

/// Verifies an installed base payload against its manifest.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Check `install_path` on `host` against `manifest_file` (a file name
    /// inside the install path).
    async fn verify(
        &self,
        host: &str,
        install_path: &Path,
        manifest_file: &str,
    ) -> RemoteResult<VerifyReport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ready_handle_resolves_immediately() {
        let handle = OpHandle::ready("web-01", 4711, OpStatus::new(0));
        assert_eq!(handle.host(), "web-01");
        assert_eq!(handle.pid(), 4711);
        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }

    #[test]
    fn op_status_codes() {
        assert!(OpStatus::new(0).success());
        assert!(!OpStatus::new(1).success());
        assert_eq!(OpStatus::new(23).code(), 23);
    }

    #[test]
    fn verify_report_passes_only_clean_zero_exit() {
        let clean = VerifyReport {
            exit_code: 0,
            mismatched: vec![],
        };
        assert!(clean.passed());

        let bad_exit = VerifyReport {
            exit_code: 1,
            mismatched: vec![],
        };
        assert!(!bad_exit.passed());

        let mismatch = VerifyReport {
            exit_code: 0,
            mismatched: vec!["bin/app".to_string()],
        };
        assert!(!mismatch.passed());
    }
}
