//! Orchestrator — the serialized rollout dispatch loop.
//!
//! One background task consumes wake triggers (host enqueued, phase
//! runner finished) and performs a single non-blocking decision pass per
//! trigger. All shared state sits behind one mutex; source/destination
//! claims happen under it, so two passes can never assign the same
//! destination twice.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use spore_core::remote::LOCAL_HOST;
use spore_core::{
    Configuration, Distribution, FleetEvent, HostRecord, HostState, RemoteOps, Verifier,
};

use crate::cancel::CancellationController;
use crate::error::{RolloutError, RolloutResult};
use crate::fleet::{FleetState, completion_ready, completion_state, pick_bootstrap};
use crate::runner::{run_base, run_conf, run_post};

/// State shared between the orchestrator handle, the dispatch task, and
/// every spawned phase runner.
pub(crate) struct Inner {
    pub distribution: Distribution,
    pub configuration: Configuration,
    pub remote: Arc<dyn RemoteOps>,
    pub verifier: Arc<dyn Verifier>,
    /// Verify checksums after each base copy.
    pub verify: AtomicBool,
    /// Lowercased name of the machine the orchestrator runs on; preferred
    /// as the bootstrap destination.
    pub local_hostname: String,
    pub fleet: Mutex<FleetState>,
    pub cancel: CancellationController,
    wake_tx: mpsc::UnboundedSender<()>,
    events: mpsc::UnboundedSender<FleetEvent>,
}

impl Inner {
    /// Request another dispatch pass.
    pub fn wake(&self) {
        let _ = self.wake_tx.send(());
    }

    pub fn emit(&self, event: FleetEvent) {
        let _ = self.events.send(event);
    }

    pub fn emit_host(&self, host: &HostRecord) {
        self.emit(FleetEvent::HostChanged {
            hostname: host.hostname.clone(),
            state: host.state,
            timer: host.base_timer,
        });
    }

    /// Run `f` under the fleet lock unless work captured at `epoch` has
    /// been cancelled (checked again under the lock, so a runner racing a
    /// stop can never slip a mutation in).
    pub fn with_fleet<R>(&self, epoch: u64, f: impl FnOnce(&mut FleetState) -> R) -> Option<R> {
        if self.cancel.cancelled(epoch) {
            return None;
        }
        let mut fleet = self.fleet.lock().unwrap();
        if self.cancel.cancelled(epoch) {
            return None;
        }
        Some(f(&mut fleet))
    }
}

/// The rollout engine's public handle.
///
/// Construction spawns the dispatch task; commands mutate host state and
/// wake it. Every state change is mirrored onto the event stream returned
/// by [`Orchestrator::new`].
pub struct Orchestrator {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    dispatch_task: JoinHandle<()>,
}

impl Orchestrator {
    /// Build an orchestrator for one prepared configuration and start its
    /// dispatch task. Returns the engine handle plus the event stream.
    pub fn new(
        distribution: Distribution,
        configuration: Configuration,
        remote: Arc<dyn RemoteOps>,
        verifier: Arc<dyn Verifier>,
        local_hostname: &str,
    ) -> (Self, mpsc::UnboundedReceiver<FleetEvent>) {
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let hosts = configuration.hosts.clone();

        let inner = Arc::new(Inner {
            distribution,
            configuration,
            remote,
            verifier,
            verify: AtomicBool::new(true),
            local_hostname: local_hostname.trim().to_lowercase(),
            fleet: Mutex::new(FleetState::new(hosts)),
            cancel: CancellationController::new(),
            wake_tx,
            events: event_tx,
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let dispatch_inner = inner.clone();
        let dispatch_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    wake = wake_rx.recv() => match wake {
                        Some(()) => dispatch(&dispatch_inner),
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("dispatch task stopped");
        });

        (
            Self {
                inner,
                shutdown_tx,
                dispatch_task,
            },
            event_rx,
        )
    }

    /// Queue one host for the current/next run.
    ///
    /// Allowed from `Idle`, `Success`, and `Failure`; anything else is a
    /// logged no-op.
    pub fn enqueue(&self, hostname: &str) -> RolloutResult<()> {
        let snapshot = {
            let mut fleet = self.inner.fleet.lock().unwrap();
            let host = fleet
                .host_mut(hostname)
                .ok_or_else(|| RolloutError::UnknownHost(hostname.to_string()))?;
            if host.state.enqueueable() {
                host.state = HostState::Queued;
                Some(host.clone())
            } else {
                debug!(host = %host.hostname, state = %host.state, "enqueue ignored");
                None
            }
        };
        if let Some(host) = snapshot {
            info!(host = %host.hostname, "host enqueued");
            self.inner.emit_host(&host);
            self.inner.wake();
        }
        Ok(())
    }

    /// Remove a queued host. Refused while a run is active.
    pub fn dequeue(&self, hostname: &str) -> RolloutResult<()> {
        let snapshot = {
            let mut fleet = self.inner.fleet.lock().unwrap();
            if fleet.run_active {
                return Err(RolloutError::RunActive);
            }
            let host = fleet
                .host_mut(hostname)
                .ok_or_else(|| RolloutError::UnknownHost(hostname.to_string()))?;
            if host.state == HostState::Queued {
                host.state = HostState::Idle;
                Some(host.clone())
            } else {
                None
            }
        };
        if let Some(host) = snapshot {
            info!(host = %host.hostname, "host dequeued");
            self.inner.emit_host(&host);
        }
        Ok(())
    }

    /// Include or exclude a host from scheduler decisions.
    pub fn set_checked(&self, hostname: &str, checked: bool) -> RolloutResult<()> {
        let snapshot = {
            let mut fleet = self.inner.fleet.lock().unwrap();
            let host = fleet
                .host_mut(hostname)
                .ok_or_else(|| RolloutError::UnknownHost(hostname.to_string()))?;
            host.checked = checked;
            host.clone()
        };
        self.inner.emit_host(&snapshot);
        Ok(())
    }

    /// Queue every checked host that is idle or terminal.
    pub fn start_all(&self) {
        let snapshots: Vec<HostRecord> = {
            let mut fleet = self.inner.fleet.lock().unwrap();
            fleet
                .hosts
                .iter_mut()
                .filter(|h| h.checked && h.state.enqueueable())
                .map(|h| {
                    h.state = HostState::Queued;
                    h.clone()
                })
                .collect()
        };
        if !snapshots.is_empty() {
            info!(hosts = snapshots.len(), "fleet start requested");
            for host in &snapshots {
                self.inner.emit_host(host);
            }
            self.inner.wake();
        }
    }

    /// Enable or disable checksum verification after base copies.
    pub fn set_verify(&self, verify: bool) {
        self.inner.verify.store(verify, Ordering::SeqCst);
    }

    /// Cancel the run: terminate every in-flight remote process, reset
    /// every host to idle defaults, and return the engine to ready.
    pub async fn stop(&self) {
        let victims = self.inner.cancel.begin_stop();
        if !victims.is_empty() {
            info!(processes = victims.len(), "terminating in-flight operations");
        }

        let local: Vec<u32> = victims
            .iter()
            .filter(|(host, _)| host == LOCAL_HOST)
            .map(|&(_, pid)| pid)
            .collect();
        if !local.is_empty() {
            if let Err(e) = self.inner.remote.kill_all_local(&local).await {
                warn!(error = %e, "local kill sweep failed");
            }
        }
        for (host, pid) in victims.iter().filter(|(host, _)| host != LOCAL_HOST) {
            if let Err(e) = self.inner.remote.kill_tree(host, *pid).await {
                warn!(%host, pid, error = %e, "remote kill failed");
            }
        }

        let (snapshots, was_active, elapsed) = {
            let mut fleet = self.inner.fleet.lock().unwrap();
            let was_active = fleet.run_active;
            let elapsed = fleet
                .started_at
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0);
            (fleet.reset_all(), was_active, elapsed)
        };
        for host in &snapshots {
            self.inner.emit_host(host);
        }
        if was_active {
            self.inner.emit(FleetEvent::RunFinished {
                cancelled: true,
                elapsed_secs: elapsed,
            });
        }

        self.inner.cancel.finish_stop();
        info!("rollout stopped, fleet reset");
    }

    /// Snapshot of every host record.
    pub fn hosts(&self) -> Vec<HostRecord> {
        self.inner.fleet.lock().unwrap().hosts.clone()
    }

    pub fn run_active(&self) -> bool {
        self.inner.fleet.lock().unwrap().run_active
    }

    /// Remote driver processes currently tracked for cancellation.
    pub fn outstanding_ops(&self) -> usize {
        self.inner.cancel.outstanding()
    }

    /// Stop the dispatch task. Does not cancel in-flight runners; call
    /// [`stop`](Self::stop) first for a full unwind.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.dispatch_task.await;
    }
}

/// One scheduler decision pass. Never blocks; launches zero or more phase
/// runners and returns.
fn dispatch(inner: &Arc<Inner>) {
    if inner.cancel.stopping() {
        return;
    }
    let epoch = inner.cancel.epoch();

    let mut base_launches: Vec<(Option<String>, String)> = Vec::new();
    let mut snapshots: Vec<HostRecord> = Vec::new();
    let mut launch_conf = false;
    let mut launch_post = false;
    let mut run_started = false;
    let mut run_finished: Option<u64> = None;

    {
        let mut fleet = inner.fleet.lock().unwrap();

        if !fleet.run_active {
            if fleet.any_checked_in(HostState::Queued) {
                fleet.run_active = true;
                fleet.started_at = Some(Instant::now());
                run_started = true;
            } else {
                return;
            }
        }

        // Base pass: every verified holder claims one queued destination,
        // picked uniformly at random. Claims commit under this lock.
        let sources: Vec<usize> = fleet
            .hosts
            .iter()
            .enumerate()
            .filter(|(_, h)| h.checked && h.state == HostState::BaseOk)
            .map(|(i, _)| i)
            .collect();
        let mut rng = rand::thread_rng();
        for si in sources {
            let queued: Vec<usize> = fleet
                .hosts
                .iter()
                .enumerate()
                .filter(|(_, h)| h.checked && h.state == HostState::Queued)
                .map(|(i, _)| i)
                .collect();
            let Some(&di) = queued.choose(&mut rng) else {
                break;
            };
            fleet.hosts[si].state = HostState::BaseSrc;
            fleet.hosts[di].state = HostState::BaseDst;
            snapshots.push(fleet.hosts[si].clone());
            snapshots.push(fleet.hosts[di].clone());
            base_launches.push((
                Some(fleet.hosts[si].hostname.clone()),
                fleet.hosts[di].hostname.clone(),
            ));
        }

        // Bootstrap: nobody holds a copy and nothing is in flight — seed
        // the fan-out tree from the local staging directory.
        let any_base_presence = fleet.hosts.iter().any(|h| {
            h.checked
                && matches!(
                    h.state,
                    HostState::BaseOk | HostState::BaseSrc | HostState::BaseDst
                )
        });
        if base_launches.is_empty() && !any_base_presence {
            if let Some(di) = pick_bootstrap(&fleet.hosts, &inner.local_hostname) {
                fleet.hosts[di].state = HostState::BaseDst;
                snapshots.push(fleet.hosts[di].clone());
                base_launches.push((None, fleet.hosts[di].hostname.clone()));
            }
        }

        if base_launches.is_empty() && !fleet.base_pending() {
            if fleet.any_checked_in(HostState::BaseOk) {
                // Conf pass, one batch at a time.
                if !fleet.conf_running {
                    fleet.conf_running = true;
                    launch_conf = true;
                }
            } else if inner.configuration.post_script.is_some()
                && fleet.any_checked_in(HostState::ConfOk)
            {
                if !fleet.post_running {
                    fleet.post_running = true;
                    launch_post = true;
                }
            } else if !fleet.conf_running && !fleet.post_running {
                // Completion pass: collapse finished hosts to Success and
                // end the run.
                let done = completion_state(inner.configuration.post_script.is_some());
                if completion_ready(&fleet.hosts, done) {
                    let stamp_post_skip = inner.configuration.post_script.is_none();
                    for host in fleet
                        .hosts
                        .iter_mut()
                        .filter(|h| h.checked && h.state == done)
                    {
                        host.state = HostState::Success;
                        if stamp_post_skip {
                            host.post_state = HostState::PostSkip;
                        }
                        snapshots.push(host.clone());
                    }
                    run_finished = Some(
                        fleet
                            .started_at
                            .take()
                            .map(|t| t.elapsed().as_secs())
                            .unwrap_or(0),
                    );
                    fleet.run_active = false;
                }
            }
        }
    }

    if run_started {
        info!("rollout run started");
        inner.emit(FleetEvent::RunStarted);
    }
    for host in &snapshots {
        inner.emit_host(host);
    }
    for (source, dest) in base_launches {
        info!(
            source = source.as_deref().unwrap_or("<staging>"),
            %dest,
            "base copy scheduled"
        );
        tokio::spawn(run_base(inner.clone(), epoch, source, dest));
    }
    if launch_conf {
        tokio::spawn(run_conf(inner.clone(), epoch));
    }
    if launch_post {
        tokio::spawn(run_post(inner.clone(), epoch));
    }
    if let Some(elapsed_secs) = run_finished {
        info!(elapsed_secs, "rollout run finished");
        inner.emit(FleetEvent::RunFinished {
            cancelled: false,
            elapsed_secs,
        });
    }
}
