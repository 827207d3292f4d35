//! spore-remote — shell-backed implementations of the remote contracts.
//!
//! Drives hosts with stock OS tools: `rsync` over ssh for transfers,
//! `ssh` for execution and cleanup, `md5sum -c` for payload verification.
//! Driver processes are spawned in their own process group so a
//! cancellation sweep can take down the whole tree.
//!
//! The engine never sees any of this — it holds `Arc<dyn RemoteOps>` /
//! `Arc<dyn Verifier>` from `spore-core`.

pub mod shell;
pub mod verify;

pub use shell::{ShellRemoteOps, SshConfig};
pub use verify::Md5Verifier;
