//! Cancellation bookkeeping: stop flag, run epoch, in-flight pid registry.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks outstanding remote driver processes and mediates stop requests.
///
/// Phase runners capture the run epoch when spawned and consult
/// [`cancelled`](Self::cancelled) after every blocking wait. The epoch is
/// bumped at the *end* of a stop, so a runner whose wait outlives the
/// fleet reset still sees a stale epoch and abandons without mutating the
/// next run's state.
#[derive(Debug, Default)]
pub struct CancellationController {
    stopping: AtomicBool,
    epoch: AtomicU64,
    tracked: Mutex<HashSet<(String, u32)>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current run epoch; runners capture this at spawn.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// A stop is in progress; the dispatcher refuses to schedule.
    pub fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// True once work captured at `epoch` must abandon: either a stop is
    /// in progress or the epoch has already moved on.
    pub fn cancelled(&self, epoch: u64) -> bool {
        self.stopping() || self.epoch() != epoch
    }

    /// Register an in-flight driver process. Pid 0 (unknown) is ignored.
    pub fn track(&self, host: &str, pid: u32) {
        if pid == 0 {
            return;
        }
        self.tracked
            .lock()
            .unwrap()
            .insert((host.to_string(), pid));
    }

    /// Remove a finished driver process.
    pub fn untrack(&self, host: &str, pid: u32) {
        self.tracked
            .lock()
            .unwrap()
            .remove(&(host.to_string(), pid));
    }

    /// Number of tracked in-flight processes.
    pub fn outstanding(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }

    /// Raise the stop flag and drain the registry for termination.
    pub(crate) fn begin_stop(&self) -> Vec<(String, u32)> {
        self.stopping.store(true, Ordering::SeqCst);
        self.tracked.lock().unwrap().drain().collect()
    }

    /// Advance the epoch and drop the stop flag; the system is ready for
    /// the next run.
    pub(crate) fn finish_stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_and_untracks() {
        let cancel = CancellationController::new();
        cancel.track("localhost", 100);
        cancel.track("web-01", 200);
        cancel.track("localhost", 0); // unknown pid, not tracked
        assert_eq!(cancel.outstanding(), 2);

        cancel.untrack("localhost", 100);
        assert_eq!(cancel.outstanding(), 1);
    }

    #[test]
    fn stop_drains_registry_and_bumps_epoch() {
        let cancel = CancellationController::new();
        let epoch = cancel.epoch();
        cancel.track("localhost", 100);
        cancel.track("web-01", 200);

        let victims = cancel.begin_stop();
        assert_eq!(victims.len(), 2);
        assert_eq!(cancel.outstanding(), 0);
        assert!(cancel.stopping());
        assert!(cancel.cancelled(epoch));

        cancel.finish_stop();
        assert!(!cancel.stopping());
        // The old epoch stays cancelled forever; the new one is live.
        assert!(cancel.cancelled(epoch));
        assert!(!cancel.cancelled(cancel.epoch()));
    }

    #[test]
    fn fresh_epoch_is_live() {
        let cancel = CancellationController::new();
        assert!(!cancel.cancelled(cancel.epoch()));
    }
}
