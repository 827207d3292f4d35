//! spore-core — domain types and collaborator contracts.
//!
//! Everything the rollout engine reasons about lives here:
//!
//! - **`host`** — the per-host state machine (`HostState`, `HostRecord`)
//! - **`config`** — `Configuration` (a named rollout target set) and
//!   `Distribution` (the prepared payload metadata)
//! - **`remote`** — the `RemoteOps` and `Verifier` contracts the engine
//!   drives remote hosts through, plus `OpHandle`/`OpStatus`
//! - **`event`** — the `FleetEvent` stream consumed by UIs
//!
//! This crate performs no I/O; concrete remote mechanics live in
//! `spore-remote` and the engine itself in `spore-rollout`.

pub mod config;
pub mod event;
pub mod host;
pub mod remote;

pub use config::{Configuration, Distribution};
pub use event::FleetEvent;
pub use host::{HostRecord, HostState};
pub use remote::{
    LOCAL_HOST, OpHandle, OpStatus, RemoteError, RemoteOps, RemoteResult, Verifier, VerifyReport,
};
