//! `RemoteOps` over ssh/rsync child processes.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use spore_core::remote::{LOCAL_HOST, OpHandle, OpStatus, RemoteError, RemoteOps, RemoteResult};

/// Connection settings shared by every shell-backed operation.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Remote account the fleet is administered as.
    pub user: String,
    /// Extra `ssh` options, one flag per element.
    pub options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            options: vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
            ],
        }
    }
}

impl SshConfig {
    /// `user@host` login target.
    pub fn login(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }
}

/// Shell-tool implementation of [`RemoteOps`].
#[derive(Debug, Clone, Default)]
pub struct ShellRemoteOps {
    config: SshConfig,
}

impl ShellRemoteOps {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Spawn `program` with `args` in its own process group, stdio
    /// silenced, and wrap it into an [`OpHandle`].
    fn spawn(&self, program: &str, args: &[String]) -> RemoteResult<OpHandle> {
        debug!(%program, ?args, "spawning remote driver");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command.process_group(0);

        let mut child: Child = command.spawn().map_err(|source| RemoteError::Spawn {
            tool: program.to_string(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);

        Ok(OpHandle::new(LOCAL_HOST, pid, async move {
            let status = child.wait().await?;
            Ok(OpStatus::from(status))
        }))
    }
}

#[async_trait]
impl RemoteOps for ShellRemoteOps {
    async fn copy_to_remote(
        &self,
        src: &Path,
        host: &str,
        dst: &Path,
        clean: bool,
    ) -> RemoteResult<OpHandle> {
        let args = rsync_push_args(&self.config, src, host, dst, clean);
        self.spawn("rsync", &args)
    }

    async fn sync_between(
        &self,
        src_host: &str,
        src: &Path,
        dst_host: &str,
        dst: &Path,
    ) -> RemoteResult<OpHandle> {
        // The source host pushes directly to the destination host; the
        // local machine only drives the session.
        let remote_cmd = format!(
            "rsync -a '{}/' '{}:{}/'",
            src.display(),
            self.config.login(dst_host),
            dst.display()
        );
        let args = ssh_args(&self.config, src_host, &remote_cmd);
        self.spawn("ssh", &args)
    }

    async fn exec(&self, host: &str, command: &str) -> RemoteResult<OpHandle> {
        let args = ssh_args(&self.config, host, command);
        self.spawn("ssh", &args)
    }

    async fn recreate_empty(&self, host: &str, path: &Path) -> RemoteResult<OpHandle> {
        let command = format!(
            "rm -rf '{p}' && mkdir -p '{p}'",
            p = path.display()
        );
        let args = ssh_args(&self.config, host, &command);
        self.spawn("ssh", &args)
    }

    async fn kill_processes_under(&self, host: &str, path: &Path) -> RemoteResult<OpHandle> {
        // pkill exits 1 when nothing matched, which is the common benign
        // case here, so fold it into success.
        let command = format!("pkill -KILL -f '^{}' || true", path.display());
        let args = ssh_args(&self.config, host, &command);
        self.spawn("ssh", &args)
    }

    async fn kill_tree(&self, host: &str, pid: u32) -> RemoteResult<()> {
        if host == LOCAL_HOST {
            kill_local_group(pid);
            return Ok(());
        }
        let command = format!("kill -KILL -- -{pid} 2>/dev/null || kill -KILL {pid}");
        let args = ssh_args(&self.config, host, &command);
        let handle = self.spawn("ssh", &args)?;
        let status = handle.wait().await?;
        if !status.success() {
            warn!(%host, pid, code = status.code(), "remote kill reported failure");
        }
        Ok(())
    }

    async fn kill_all_local(&self, pids: &[u32]) -> RemoteResult<()> {
        for &pid in pids {
            kill_local_group(pid);
        }
        Ok(())
    }
}

/// SIGKILL the process group of a locally-spawned driver.
///
/// Drivers are spawned with `process_group(0)`, so the pid doubles as the
/// group id and the kill reaches ssh/rsync children too.
fn kill_local_group(pid: u32) {
    if pid == 0 {
        return;
    }
    // Safety: killpg on an arbitrary (possibly stale) pgid is benign; a
    // dead group yields ESRCH which we ignore.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        debug!(pid, "killpg had no effect (group already gone?)");
    }
}

/// `rsync` argument list for a local→remote push.
fn rsync_push_args(
    config: &SshConfig,
    src: &Path,
    host: &str,
    dst: &Path,
    clean: bool,
) -> Vec<String> {
    let mut args = vec!["-a".to_string()];
    if clean {
        args.push("--delete".to_string());
    }
    if !config.options.is_empty() {
        args.push("-e".to_string());
        args.push(format!("ssh {}", config.options.join(" ")));
    }
    args.push(format!("{}/", src.display()));
    args.push(format!("{}:{}/", config.login(host), dst.display()));
    args
}

/// `ssh` argument list for running `command` on `host`.
fn ssh_args(config: &SshConfig, host: &str, command: &str) -> Vec<String> {
    let mut args = config.options.clone();
    args.push(config.login(host));
    args.push(command.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn bare_config() -> SshConfig {
        SshConfig {
            user: "root".to_string(),
            options: vec![],
        }
    }

    #[test]
    fn rsync_push_plain() {
        let args = rsync_push_args(
            &bare_config(),
            &PathBuf::from("/stage/base"),
            "web-01",
            &PathBuf::from("/opt/app"),
            false,
        );
        assert_eq!(args, ["-a", "/stage/base/", "root@web-01:/opt/app/"]);
    }

    #[test]
    fn rsync_push_clean_mirrors_destination() {
        let args = rsync_push_args(
            &bare_config(),
            &PathBuf::from("/stage/base"),
            "web-01",
            &PathBuf::from("/opt/app"),
            true,
        );
        assert!(args.contains(&"--delete".to_string()));
    }

    #[test]
    fn rsync_push_threads_ssh_options() {
        let args = rsync_push_args(
            &SshConfig::default(),
            &PathBuf::from("/s"),
            "h",
            &PathBuf::from("/d"),
            false,
        );
        let e = args.iter().position(|a| a == "-e").unwrap();
        assert!(args[e + 1].starts_with("ssh -o BatchMode=yes"));
    }

    #[test]
    fn ssh_command_shape() {
        let args = ssh_args(&bare_config(), "db-01", "uptime");
        assert_eq!(args, ["root@db-01", "uptime"]);

        let args = ssh_args(&SshConfig::default(), "db-01", "uptime");
        assert_eq!(args.last().unwrap(), "uptime");
        assert_eq!(args[args.len() - 2], "root@db-01");
    }

    #[test]
    fn login_uses_configured_user() {
        let config = SshConfig {
            user: "deploy".to_string(),
            options: vec![],
        };
        assert_eq!(config.login("web-01"), "deploy@web-01");
    }
}
