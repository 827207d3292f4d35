//! Phase runners — one task per base copy, one batch per conf/post pass.
//!
//! Runners own all blocking: they wait on remote operation handles,
//! tracking each driving process with the cancellation controller for the
//! duration of the wait. After *every* wait they consult the controller
//! and abandon without touching state if the run was stopped — the fleet
//! reset belongs to `stop()` alone.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use spore_core::remote::{OpHandle, OpStatus, RemoteResult};
use spore_core::{HostRecord, HostState};

use crate::orchestrator::Inner;

/// Apply `f` to one host under the fleet lock and emit the change.
/// Returns false when cancelled or the host is gone.
fn update_host(
    inner: &Inner,
    epoch: u64,
    hostname: &str,
    f: impl FnOnce(&mut HostRecord),
) -> bool {
    let snapshot = inner.with_fleet(epoch, |fleet| {
        fleet.host_mut(hostname).map(|host| {
            f(host);
            host.clone()
        })
    });
    match snapshot {
        Some(Some(host)) => {
            inner.emit_host(&host);
            true
        }
        _ => false,
    }
}

/// Track the handle, wait it out, untrack, then apply the cancellation
/// check. `None` means "abandon, mutate nothing"; spawn and wait plumbing
/// failures degrade to a failed status so phase logic sees one shape.
async fn run_tracked(
    inner: &Inner,
    epoch: u64,
    op: RemoteResult<OpHandle>,
) -> Option<OpStatus> {
    let handle = match op {
        Ok(handle) => handle,
        Err(e) => {
            warn!(error = %e, "remote operation could not start");
            return if inner.cancel.cancelled(epoch) {
                None
            } else {
                Some(OpStatus::new(-1))
            };
        }
    };

    let host = handle.host().to_string();
    let pid = handle.pid();
    inner.cancel.track(&host, pid);
    let outcome = handle.wait().await;
    inner.cancel.untrack(&host, pid);

    if inner.cancel.cancelled(epoch) {
        debug!(%host, pid, "operation finished after stop, abandoning");
        return None;
    }
    match outcome {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(error = %e, "remote operation wait failed");
            Some(OpStatus::new(-1))
        }
    }
}

/// Commit a base-copy outcome: destination to `dest_state`, peer source
/// (if any) back to `BaseOk` — its own copy stays valid either way. Wakes
/// the dispatcher.
fn settle_base(
    inner: &Inner,
    epoch: u64,
    source: Option<&str>,
    dest: &str,
    dest_state: HostState,
) {
    let snapshots = inner.with_fleet(epoch, |fleet| {
        let mut snapshots = Vec::with_capacity(2);
        if let Some(host) = fleet.host_mut(dest) {
            host.state = dest_state;
            snapshots.push(host.clone());
        }
        if let Some(source) = source {
            if let Some(host) = fleet.host_mut(source) {
                host.state = HostState::BaseOk;
                snapshots.push(host.clone());
            }
        }
        snapshots
    });
    if let Some(snapshots) = snapshots {
        for host in &snapshots {
            inner.emit_host(host);
        }
        inner.wake();
    }
}

/// Tick `base_timer` once per second while the destination stays in
/// `BaseDst`. Purely observational; the emitted events feed UIs.
fn spawn_base_ticker(inner: Arc<Inner>, epoch: u64, hostname: String) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let snapshot = inner.with_fleet(epoch, |fleet| match fleet.host_mut(&hostname) {
                Some(host) if host.state == HostState::BaseDst => {
                    host.base_timer += 1;
                    Some(host.clone())
                }
                _ => None,
            });
            match snapshot {
                Some(Some(host)) => inner.emit_host(&host),
                _ => break,
            }
        }
    });
}

/// Base phase for one destination: pre-copy cleanup, empty the install
/// dir, transfer from the peer source (or local staging), verify.
pub(crate) async fn run_base(
    inner: Arc<Inner>,
    epoch: u64,
    source: Option<String>,
    dest: String,
) {
    let install = inner.configuration.destination_path.clone();
    info!(
        source = source.as_deref().unwrap_or("<staging>"),
        %dest,
        "base copy starting"
    );

    if !update_host(&inner, epoch, &dest, |h| h.base_timer = 0) {
        return;
    }
    spawn_base_ticker(inner.clone(), epoch, dest.clone());

    // Anything still running out of the install path would hold locks
    // against the wipe below; failure to clean up is not fatal.
    let cleanup = inner.remote.kill_processes_under(&dest, &install).await;
    match run_tracked(&inner, epoch, cleanup).await {
        Some(status) if !status.success() => {
            warn!(host = %dest, code = status.code(), "pre-copy process cleanup failed, continuing");
        }
        Some(_) => {}
        None => return,
    }

    let recreate = inner.remote.recreate_empty(&dest, &install).await;
    match run_tracked(&inner, epoch, recreate).await {
        Some(status) if status.success() => {}
        Some(status) => {
            error!(host = %dest, code = status.code(), path = %install.display(), "could not empty install path");
            return settle_base(&inner, epoch, source.as_deref(), &dest, HostState::Failure);
        }
        None => return,
    }

    let transfer = match &source {
        Some(src_host) => {
            inner
                .remote
                .sync_between(src_host, &install, &dest, &install)
                .await
        }
        None => {
            inner
                .remote
                .copy_to_remote(&inner.configuration.source_path, &dest, &install, true)
                .await
        }
    };
    match run_tracked(&inner, epoch, transfer).await {
        Some(status) if status.success() => {}
        Some(status) => {
            error!(host = %dest, code = status.code(), "base transfer failed");
            return settle_base(&inner, epoch, source.as_deref(), &dest, HostState::Failure);
        }
        None => return,
    }

    if inner.verify.load(Ordering::SeqCst) {
        let manifest = inner.distribution.manifest_file_name();
        match inner.verifier.verify(&dest, &install, &manifest).await {
            Ok(report) if report.passed() => {}
            Ok(report) => {
                for file in &report.mismatched {
                    error!(host = %dest, %file, "checksum mismatch");
                }
                if report.mismatched.is_empty() {
                    error!(host = %dest, code = report.exit_code, "verification failed");
                }
                return settle_base(&inner, epoch, source.as_deref(), &dest, HostState::Failure);
            }
            Err(e) => {
                error!(host = %dest, error = %e, "verification could not run");
                return settle_base(&inner, epoch, source.as_deref(), &dest, HostState::Failure);
            }
        }
        if inner.cancel.cancelled(epoch) {
            return;
        }
    }

    info!(host = %dest, "base installed");
    settle_base(&inner, epoch, source.as_deref(), &dest, HostState::BaseOk);
}

/// Clear a batch latch and wake the dispatcher.
fn finish_batch(inner: &Inner, epoch: u64, clear: impl FnOnce(&mut crate::fleet::FleetState)) {
    if inner.with_fleet(epoch, clear).is_some() {
        inner.wake();
    }
}

/// Configuration phase: push `common/` (optional) then the host overlay
/// onto every host holding a verified base copy, sequentially.
///
/// Overlays are small and share the `common` subtree, so one batch avoids
/// contention; host failures are isolated, the batch continues.
pub(crate) async fn run_conf(inner: Arc<Inner>, epoch: u64) {
    let targets: Vec<String> = match inner.with_fleet(epoch, |fleet| {
        fleet
            .checked_in(HostState::BaseOk)
            .map(|h| h.hostname.clone())
            .collect()
    }) {
        Some(targets) => targets,
        None => return,
    };

    let install = inner.configuration.destination_path.clone();
    let common = inner.configuration.common_dir();
    let push_common = common.is_dir();
    info!(hosts = targets.len(), common = push_common, "configuration phase starting");

    'hosts: for hostname in targets {
        if inner.cancel.cancelled(epoch) {
            return;
        }
        if !update_host(&inner, epoch, &hostname, |h| h.state = HostState::ConfRunning) {
            return;
        }

        if push_common {
            let op = inner
                .remote
                .copy_to_remote(&common, &hostname, &install, false)
                .await;
            match run_tracked(&inner, epoch, op).await {
                Some(status) if status.success() => {}
                Some(status) => {
                    error!(host = %hostname, code = status.code(), "common overlay push failed");
                    update_host(&inner, epoch, &hostname, |h| {
                        h.state = HostState::Failure;
                        h.conf_state = HostState::ConfFail;
                    });
                    continue 'hosts;
                }
                None => return,
            }
        }

        let host_dir = inner.configuration.host_dir(&hostname);
        if !host_dir.is_dir() {
            debug!(host = %hostname, "no host overlay, nothing to push");
            update_host(&inner, epoch, &hostname, |h| {
                h.state = HostState::ConfOk;
                h.conf_state = HostState::ConfSkip;
            });
            continue;
        }

        let op = inner
            .remote
            .copy_to_remote(&host_dir, &hostname, &install, false)
            .await;
        match run_tracked(&inner, epoch, op).await {
            Some(status) if status.success() => {
                update_host(&inner, epoch, &hostname, |h| {
                    h.state = HostState::ConfOk;
                    h.conf_state = HostState::ConfOk;
                });
            }
            Some(status) => {
                error!(host = %hostname, code = status.code(), "host overlay push failed");
                update_host(&inner, epoch, &hostname, |h| {
                    h.state = HostState::Failure;
                    h.conf_state = HostState::ConfFail;
                });
            }
            None => return,
        }
    }

    finish_batch(&inner, epoch, |fleet| fleet.conf_running = false);
}

/// Post phase: execute the installed post-install script on every host
/// whose configuration landed, sequentially.
pub(crate) async fn run_post(inner: Arc<Inner>, epoch: u64) {
    let install = inner.configuration.destination_path.clone();
    let Some(script) = inner.configuration.remote_post_script(&install) else {
        return;
    };
    let targets: Vec<String> = match inner.with_fleet(epoch, |fleet| {
        fleet
            .checked_in(HostState::ConfOk)
            .map(|h| h.hostname.clone())
            .collect()
    }) {
        Some(targets) => targets,
        None => return,
    };

    let etc = install.join("etc");
    let command = format!(
        "chmod +x '{}'/*.sh; '{}'",
        etc.display(),
        script.display()
    );
    info!(hosts = targets.len(), script = %script.display(), "post-install phase starting");

    for hostname in targets {
        if inner.cancel.cancelled(epoch) {
            return;
        }
        if !update_host(&inner, epoch, &hostname, |h| h.state = HostState::PostRunning) {
            return;
        }

        let op = inner.remote.exec(&hostname, &command).await;
        match run_tracked(&inner, epoch, op).await {
            Some(status) if status.success() => {
                update_host(&inner, epoch, &hostname, |h| {
                    h.state = HostState::PostOk;
                    h.post_state = HostState::PostOk;
                });
            }
            Some(status) => {
                error!(host = %hostname, code = status.code(), "post-install script failed");
                update_host(&inner, epoch, &hostname, |h| {
                    h.state = HostState::Failure;
                    h.post_state = HostState::PostFail;
                });
            }
            None => return,
        }
    }

    finish_batch(&inner, epoch, |fleet| fleet.post_running = false);
}
