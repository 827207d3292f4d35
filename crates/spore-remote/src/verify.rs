//! Checksum verification via remote `md5sum -c`.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use spore_core::remote::{RemoteError, RemoteResult, Verifier, VerifyReport};

use crate::shell::SshConfig;

/// Runs the stock `md5sum` tool on the destination host against the
/// manifest the base copy delivered, and reads mismatched files off its
/// output.
#[derive(Debug, Clone, Default)]
pub struct Md5Verifier {
    config: SshConfig,
}

impl Md5Verifier {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Verifier for Md5Verifier {
    async fn verify(
        &self,
        host: &str,
        install_path: &Path,
        manifest_file: &str,
    ) -> RemoteResult<VerifyReport> {
        let remote_cmd = format!(
            "cd '{}' && md5sum --quiet -c '{}'",
            install_path.display(),
            manifest_file
        );

        let mut args = self.config.options.clone();
        args.push(self.config.login(host));
        args.push(remote_cmd);

        debug!(%host, manifest = manifest_file, "verifying payload checksums");

        // Captures output, so this runs to completion here instead of
        // returning a handle; verification stays outside the tracked
        // cancellation set.
        let output = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(|source| RemoteError::Spawn {
                tool: "ssh".to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(VerifyReport {
            exit_code: output.status.code().unwrap_or(-1),
            mismatched: parse_mismatches(&stdout),
        })
    }
}

/// Extract failed file paths from `md5sum --quiet -c` output.
///
/// Failure lines look like `bin/app: FAILED` or
/// `etc/app.conf: FAILED open or read`.
fn parse_mismatches(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            line.rsplit_once(": FAILED")
                .map(|(path, _)| path.to_string())
        })
        .filter(|path| !path.is_empty())
        .collect()
}
