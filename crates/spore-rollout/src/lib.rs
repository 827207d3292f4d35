//! spore-rollout — the rollout orchestration engine.
//!
//! Drives a fleet through three barrier-separated phases:
//!
//! 1. **Base** — the shared payload cascades through the fleet: the first
//!    host is seeded from local staging, then every finished host serves
//!    further destinations picked uniformly at random, so concurrent
//!    sources grow 1 → 2 → 4 → … without topology knowledge.
//! 2. **Conf** — once no host is mid-base-copy, per-host configuration
//!    overlays are pushed in one sequential batch.
//! 3. **Post** — once configuration settles and the configuration ships a
//!    post-install script, it runs on each configured host.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── dispatch task (single consumer of the wake channel — serialized)
//!   │     └── decision pass: claim pairs, enforce barriers, spawn runners
//!   ├── FleetState (one mutex: host records + run latches)
//!   ├── CancellationController (stop flag, run epoch, pid registry)
//!   └── phase runners (spawned tasks; all blocking lives here)
//! ```
//!
//! Commands (`enqueue`, `start_all`, `stop`, …) come in through the
//! [`Orchestrator`] handle; every state change goes out as a
//! [`spore_core::FleetEvent`].

pub mod cancel;
pub mod error;
pub mod orchestrator;

mod fleet;
mod runner;

pub use cancel::CancellationController;
pub use error::{RolloutError, RolloutResult};
pub use orchestrator::Orchestrator;
