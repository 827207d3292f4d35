//! Shared fleet state and pure scheduling decisions.
//!
//! `FleetState` lives behind the orchestrator's single mutex; nothing in
//! here blocks or performs I/O. The free functions are the decision rules
//! the dispatcher applies under that lock.

use std::time::Instant;

use spore_core::{HostRecord, HostState};

/// Mutable rollout state: the working host records plus run latches.
#[derive(Debug)]
pub(crate) struct FleetState {
    /// Working copies of the configuration's hosts, hostname-ordered.
    pub hosts: Vec<HostRecord>,
    /// A run is in progress (between run-started and run-finished).
    pub run_active: bool,
    /// A batched configuration push is in flight.
    pub conf_running: bool,
    /// A batched post-install pass is in flight.
    pub post_running: bool,
    /// When the current run started.
    pub started_at: Option<Instant>,
}

impl FleetState {
    pub fn new(hosts: Vec<HostRecord>) -> Self {
        Self {
            hosts,
            run_active: false,
            conf_running: false,
            post_running: false,
            started_at: None,
        }
    }

    pub fn host_mut(&mut self, hostname: &str) -> Option<&mut HostRecord> {
        let needle = hostname.to_lowercase();
        self.hosts.iter_mut().find(|h| h.hostname == needle)
    }

    /// Checked hosts currently in `state`.
    pub fn checked_in(&self, state: HostState) -> impl Iterator<Item = &HostRecord> {
        self.hosts
            .iter()
            .filter(move |h| h.checked && h.state == state)
    }

    pub fn any_checked_in(&self, state: HostState) -> bool {
        self.checked_in(state).next().is_some()
    }

    /// Any checked host still mid-base-phase.
    pub fn base_pending(&self) -> bool {
        self.hosts
            .iter()
            .any(|h| h.checked && h.state.base_in_progress())
    }

    /// Reset every host to idle defaults (checked preserved) and drop all
    /// run latches. Returns snapshots of the reset hosts for event
    /// emission.
    pub fn reset_all(&mut self) -> Vec<HostRecord> {
        self.run_active = false;
        self.conf_running = false;
        self.post_running = false;
        self.started_at = None;
        self.hosts
            .iter_mut()
            .map(|h| {
                h.reset();
                h.clone()
            })
            .collect()
    }
}

/// Bootstrap destination: the local host if it is queued and checked,
/// otherwise the first queued checked host.
pub(crate) fn pick_bootstrap(hosts: &[HostRecord], local_hostname: &str) -> Option<usize> {
    let is_queued = |h: &HostRecord| h.checked && h.state == HostState::Queued;
    hosts
        .iter()
        .enumerate()
        .find(|(_, h)| is_queued(h) && h.hostname == local_hostname)
        .or_else(|| hosts.iter().enumerate().find(|(_, h)| is_queued(h)))
        .map(|(i, _)| i)
}

/// Per-host terminal success for this run's shape.
pub(crate) fn completion_state(has_post_script: bool) -> HostState {
    if has_post_script {
        HostState::PostOk
    } else {
        HostState::ConfOk
    }
}

/// True once every checked host has either failed, already collapsed to
/// `Success`, sat out the run idle, or reached `done`.
pub(crate) fn completion_ready(hosts: &[HostRecord], done: HostState) -> bool {
    hosts.iter().filter(|h| h.checked).all(|h| {
        matches!(
            h.state,
            HostState::Idle | HostState::Success | HostState::Failure
        ) || h.state == done
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, state: HostState, checked: bool) -> HostRecord {
        let mut h = HostRecord::new(name);
        h.state = state;
        h.checked = checked;
        h
    }

    #[test]
    fn bootstrap_prefers_local_host() {
        let hosts = vec![
            host("a", HostState::Queued, true),
            host("b", HostState::Queued, true),
            host("c", HostState::Queued, true),
        ];
        assert_eq!(pick_bootstrap(&hosts, "b"), Some(1));
    }

    #[test]
    fn bootstrap_falls_back_to_first_queued() {
        let hosts = vec![
            host("a", HostState::Idle, true),
            host("b", HostState::Queued, true),
        ];
        assert_eq!(pick_bootstrap(&hosts, "elsewhere"), Some(1));
    }

    #[test]
    fn bootstrap_ignores_unchecked_and_unqueued() {
        let hosts = vec![
            host("a", HostState::Queued, false),
            host("b", HostState::Failure, true),
        ];
        assert_eq!(pick_bootstrap(&hosts, "a"), None);
    }

    #[test]
    fn completion_shape_depends_on_post_script() {
        assert_eq!(completion_state(true), HostState::PostOk);
        assert_eq!(completion_state(false), HostState::ConfOk);
    }

    #[test]
    fn completion_waits_for_stragglers() {
        let mut hosts = vec![
            host("a", HostState::ConfOk, true),
            host("b", HostState::ConfRunning, true),
        ];
        assert!(!completion_ready(&hosts, HostState::ConfOk));

        hosts[1].state = HostState::Failure;
        assert!(completion_ready(&hosts, HostState::ConfOk));
    }

    #[test]
    fn completion_skips_idle_and_unchecked() {
        let hosts = vec![
            host("a", HostState::ConfOk, true),
            host("b", HostState::Idle, true),
            host("c", HostState::BaseDst, false),
        ];
        assert!(completion_ready(&hosts, HostState::ConfOk));
    }

    #[test]
    fn reset_all_clears_latches_and_hosts() {
        let mut fleet = FleetState::new(vec![host("a", HostState::BaseDst, true)]);
        fleet.run_active = true;
        fleet.conf_running = true;
        fleet.started_at = Some(Instant::now());

        let snapshots = fleet.reset_all();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].state, HostState::Idle);
        assert!(!fleet.run_active);
        assert!(!fleet.conf_running);
        assert!(fleet.started_at.is_none());
        assert!(fleet.hosts[0].checked, "checked survives reset");
    }
}
