//! Scripted in-memory collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use spore_core::remote::{
    LOCAL_HOST, OpHandle, OpStatus, RemoteOps, RemoteResult, Verifier, VerifyReport,
};
use spore_core::{Configuration, Distribution, FleetEvent, HostState};

/// One recorded remote operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CopyLocal {
        host: String,
        clean: bool,
    },
    Sync {
        src: String,
        dst: String,
    },
    Exec {
        host: String,
        command: String,
    },
    Recreate {
        host: String,
    },
    KillUnder {
        host: String,
    },
    KillTree {
        host: String,
        pid: u32,
    },
    KillAllLocal {
        pids: Vec<u32>,
    },
}

/// `RemoteOps` fake with scripted per-host outcomes and optional delays
/// to hold operations in flight.
#[derive(Default)]
pub struct ScriptedRemote {
    /// Hosts whose incoming base transfer (bootstrap or peer) fails.
    pub fail_transfer_to: HashSet<String>,
    /// Hosts whose install-path wipe fails.
    pub fail_recreate_on: HashSet<String>,
    /// Hosts whose remote exec (post script) fails.
    pub fail_exec_on: HashSet<String>,
    /// Delay applied to base transfers.
    pub transfer_delay: Duration,
    /// Delay applied to overlay (non-clean) copies.
    pub overlay_delay: Duration,
    ops: Mutex<Vec<Op>>,
    next_pid: AtomicU32,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Default::default()
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn handle(&self, ok: bool, delay: Duration) -> OpHandle {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let status = OpStatus::new(if ok { 0 } else { 1 });
        if delay.is_zero() {
            OpHandle::ready(LOCAL_HOST, pid, status)
        } else {
            OpHandle::new(LOCAL_HOST, pid, async move {
                tokio::time::sleep(delay).await;
                Ok(status)
            })
        }
    }
}

#[async_trait]
impl RemoteOps for ScriptedRemote {
    async fn copy_to_remote(
        &self,
        _src: &Path,
        host: &str,
        _dst: &Path,
        clean: bool,
    ) -> RemoteResult<OpHandle> {
        self.record(Op::CopyLocal {
            host: host.to_string(),
            clean,
        });
        if clean {
            // Base transfer from local staging.
            let ok = !self.fail_transfer_to.contains(host);
            Ok(self.handle(ok, self.transfer_delay))
        } else {
            // Configuration overlay push.
            Ok(self.handle(true, self.overlay_delay))
        }
    }

    async fn sync_between(
        &self,
        src_host: &str,
        _src: &Path,
        dst_host: &str,
        _dst: &Path,
    ) -> RemoteResult<OpHandle> {
        self.record(Op::Sync {
            src: src_host.to_string(),
            dst: dst_host.to_string(),
        });
        let ok = !self.fail_transfer_to.contains(dst_host);
        Ok(self.handle(ok, self.transfer_delay))
    }

    async fn exec(&self, host: &str, command: &str) -> RemoteResult<OpHandle> {
        self.record(Op::Exec {
            host: host.to_string(),
            command: command.to_string(),
        });
        let ok = !self.fail_exec_on.contains(host);
        Ok(self.handle(ok, Duration::ZERO))
    }

    async fn recreate_empty(&self, host: &str, _path: &Path) -> RemoteResult<OpHandle> {
        self.record(Op::Recreate {
            host: host.to_string(),
        });
        let ok = !self.fail_recreate_on.contains(host);
        Ok(self.handle(ok, Duration::ZERO))
    }

    async fn kill_processes_under(&self, host: &str, _path: &Path) -> RemoteResult<OpHandle> {
        self.record(Op::KillUnder {
            host: host.to_string(),
        });
        Ok(self.handle(true, Duration::ZERO))
    }

    async fn kill_tree(&self, host: &str, pid: u32) -> RemoteResult<()> {
        self.record(Op::KillTree {
            host: host.to_string(),
            pid,
        });
        Ok(())
    }

    async fn kill_all_local(&self, pids: &[u32]) -> RemoteResult<()> {
        let mut pids = pids.to_vec();
        pids.sort_unstable();
        self.record(Op::KillAllLocal { pids });
        Ok(())
    }
}

/// `Verifier` fake with scripted mismatches; records which hosts it was
/// asked to verify.
#[derive(Default)]
pub struct ScriptedVerifier {
    /// Host → mismatched files its verification reports (exit code 1).
    pub mismatches: HashMap<String, Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Verifier for ScriptedVerifier {
    async fn verify(
        &self,
        host: &str,
        _install_path: &Path,
        _manifest_file: &str,
    ) -> RemoteResult<VerifyReport> {
        self.calls.lock().unwrap().push(host.to_string());
        match self.mismatches.get(host) {
            Some(files) => Ok(VerifyReport {
                exit_code: 1,
                mismatched: files.clone(),
            }),
            None => Ok(VerifyReport {
                exit_code: 0,
                mismatched: vec![],
            }),
        }
    }
}

pub fn test_distribution() -> Distribution {
    Distribution {
        name: "appsuite".to_string(),
        base_dir: PathBuf::from("/stage/base"),
        manifest: PathBuf::from("/stage/base/base-1.0.txt"),
        size: 4 * 1024 * 1024 * 1024,
    }
}

/// Target set over `hosts` with overlays rooted at `conf_dir` (may be a
/// nonexistent path — overlays are then skipped per host).
pub fn test_configuration(hosts: &[&str], conf_dir: &Path, post_script: bool) -> Configuration {
    let mut conf = Configuration::new("lab", "/stage/base", "/opt/app", conf_dir);
    if post_script {
        conf.post_script = Some(conf_dir.join("common").join("etc").join("post-install.sh"));
    }
    for host in hosts {
        conf.add_host(host);
    }
    conf
}

/// Receive events until the run-finished marker (or panic after 10s).
pub async fn collect_until_finished(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<FleetEvent>,
) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(event)) => {
                let finished = matches!(event, FleetEvent::RunFinished { .. });
                events.push(event);
                if finished {
                    return events;
                }
            }
            Ok(None) => panic!("event stream closed before the run finished"),
            Err(_) => panic!("timed out waiting for the run to finish"),
        }
    }
}

/// Receive events until one matches `pred` (or panic after 10s).
pub async fn wait_for_event(
    rx: &mut tokio::sync::mpsc::UnboundedReceiver<FleetEvent>,
    mut pred: impl FnMut(&FleetEvent) -> bool,
) -> Vec<FleetEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(event)) => {
                let hit = pred(&event);
                events.push(event);
                if hit {
                    return events;
                }
            }
            Ok(None) => panic!("event stream closed before the expected event"),
            Err(_) => panic!("timed out waiting for the expected event"),
        }
    }
}

/// Replay `events` and return each host's state just before `index`.
pub fn states_before(events: &[FleetEvent], index: usize) -> HashMap<String, HostState> {
    let mut states = HashMap::new();
    for event in &events[..index] {
        if let FleetEvent::HostChanged {
            hostname, state, ..
        } = event
        {
            states.insert(hostname.clone(), *state);
        }
    }
    states
}
