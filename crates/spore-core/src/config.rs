//! Rollout target sets and distribution metadata.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::host::HostRecord;

/// A named rollout target set: which hosts get the payload, where it is
/// staged locally, and where it lands on every host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Configuration name (the `conf/<name>` directory).
    pub name: String,
    /// Local staging location of the base payload.
    pub source_path: PathBuf,
    /// Install path shared by every participating host.
    pub destination_path: PathBuf,
    /// Root of this configuration's overlay tree (`conf/<name>`).
    pub conf_dir: PathBuf,
    /// Post-install script under `common/etc/`, if the configuration
    /// ships one. Its presence enables the post phase.
    pub post_script: Option<PathBuf>,
    /// Hosts ordered by hostname, hostnames unique.
    pub hosts: Vec<HostRecord>,
}

impl Configuration {
    pub fn new(
        name: &str,
        source_path: impl Into<PathBuf>,
        destination_path: impl Into<PathBuf>,
        conf_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.to_string(),
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            conf_dir: conf_dir.into(),
            post_script: None,
            hosts: Vec::new(),
        }
    }

    /// Add a host, keeping the collection sorted by hostname and unique.
    ///
    /// Re-adding an existing hostname is a no-op.
    pub fn add_host(&mut self, hostname: &str) {
        let record = HostRecord::new(hostname);
        match self
            .hosts
            .binary_search_by(|h| h.hostname.cmp(&record.hostname))
        {
            Ok(_) => {}
            Err(pos) => self.hosts.insert(pos, record),
        }
    }

    pub fn host(&self, hostname: &str) -> Option<&HostRecord> {
        let needle = hostname.to_lowercase();
        self.hosts.iter().find(|h| h.hostname == needle)
    }

    /// Shared overlay directory (`conf/<name>/common`); optional on disk.
    pub fn common_dir(&self) -> PathBuf {
        self.conf_dir.join("common")
    }

    /// Host-specific overlay directory (`conf/<name>/<hostname>`).
    pub fn host_dir(&self, hostname: &str) -> PathBuf {
        self.conf_dir.join(hostname)
    }

    /// Where the post-install script lands on a host once the `common`
    /// overlay has been pushed.
    pub fn remote_post_script(&self, install_path: &Path) -> Option<PathBuf> {
        let local = self.post_script.as_ref()?;
        let name = local.file_name()?;
        Some(install_path.join("etc").join(name))
    }
}

/// Metadata of a prepared distribution. Read-only once preparation
/// completes; the orchestrator never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Distribution name (from the manifest `name` line, else the
    /// directory name).
    pub name: String,
    /// Directory holding the base payload.
    pub base_dir: PathBuf,
    /// Checksum manifest (`base*.txt`) inside `base_dir`.
    pub manifest: PathBuf,
    /// Total payload size in bytes.
    pub size: u64,
}

impl Distribution {
    /// Manifest file name as it appears inside the install path on a host
    /// after the base copy.
    pub fn manifest_file_name(&self) -> String {
        self.manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
