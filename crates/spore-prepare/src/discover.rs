//! Distribution layout discovery.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use spore_core::{Configuration, Distribution};

use crate::error::{PrepareError, PrepareResult};

/// Everything the rollout engine needs from a prepared distribution.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub distribution: Distribution,
    /// Configuration name → target set, name-ordered.
    pub configurations: BTreeMap<String, Configuration>,
}

/// Prepare the distribution rooted at `dist_root`.
///
/// Validates the `base/` manifest rule, reads the distribution name and
/// payload size, and enumerates every configuration under `conf/`. A tree
/// without `conf/` yields an empty configuration map.
pub fn prepare(dist_root: &Path) -> PrepareResult<Prepared> {
    let base_dir = dist_root.join("base");
    if !base_dir.is_dir() {
        return Err(PrepareError::NoBaseDir(dist_root.to_path_buf()));
    }

    let manifest = find_manifest(&base_dir)?;
    let name = manifest_name(&manifest)?.unwrap_or_else(|| {
        dist_root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "distribution".to_string())
    });

    let size = payload_size(&base_dir);
    let distribution = Distribution {
        name,
        base_dir: base_dir.clone(),
        manifest,
        size,
    };

    let configurations = discover_configurations(dist_root, &base_dir)?;

    info!(
        name = %distribution.name,
        size,
        configurations = configurations.len(),
        "distribution prepared"
    );

    Ok(Prepared {
        distribution,
        configurations,
    })
}

/// Locate the single `base*.txt` manifest inside `base_dir`.
fn find_manifest(base_dir: &Path) -> PrepareResult<PathBuf> {
    let mut candidates: Vec<PathBuf> = fs::read_dir(base_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("base") && n.ends_with(".txt"))
        })
        .collect();

    match candidates.len() {
        0 => Err(PrepareError::ManifestMissing(base_dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        count => Err(PrepareError::ManifestAmbiguous {
            dir: base_dir.to_path_buf(),
            count,
        }),
    }
}

/// Read the optional `name <dist-name>` line from the manifest.
fn manifest_name(manifest: &Path) -> PrepareResult<Option<String>> {
    let content = fs::read_to_string(manifest)?;
    Ok(content.lines().find_map(|line| {
        line.strip_prefix("name ")
            .map(|rest| rest.trim().to_string())
            .filter(|n| !n.is_empty())
    }))
}

/// Byte sum of every file under `base_dir`. Unreadable entries are logged
/// and skipped rather than failing preparation.
fn payload_size(base_dir: &Path) -> u64 {
    let mut size = 0u64;
    for entry in WalkDir::new(base_dir) {
        match entry {
            Ok(entry) if entry.file_type().is_file() => match entry.metadata() {
                Ok(meta) => size += meta.len(),
                Err(e) => warn!(path = %entry.path().display(), error = %e, "skipping unreadable file"),
            },
            Ok(_) => {}
            Err(e) => warn!(error = %e, "skipping unreadable entry"),
        }
    }
    size
}

/// Enumerate `conf/<name>/` target sets.
fn discover_configurations(
    dist_root: &Path,
    base_dir: &Path,
) -> PrepareResult<BTreeMap<String, Configuration>> {
    let conf_root = dist_root.join("conf");
    let mut configurations = BTreeMap::new();
    if !conf_root.is_dir() {
        debug!(root = %dist_root.display(), "no conf/ directory, no configurations");
        return Ok(configurations);
    }

    for entry in fs::read_dir(&conf_root)? {
        let entry = entry?;
        let conf_dir = entry.path();
        if !conf_dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        let destination = read_destination(&conf_dir)
            .unwrap_or_else(|| base_dir.to_path_buf());
        let mut configuration =
            Configuration::new(&name, base_dir, &destination, &conf_dir);

        let post_script = conf_dir.join("common").join("etc").join("post-install.sh");
        if post_script.is_file() {
            configuration.post_script = Some(post_script);
        }

        for host_entry in fs::read_dir(&conf_dir)? {
            let host_entry = host_entry?;
            if !host_entry.path().is_dir() {
                continue;
            }
            let hostname = host_entry.file_name().to_string_lossy().into_owned();
            if hostname == "common" {
                continue;
            }
            configuration.add_host(&hostname);
        }

        debug!(
            configuration = %name,
            hosts = configuration.hosts.len(),
            destination = %configuration.destination_path.display(),
            post_script = configuration.post_script.is_some(),
            "configuration discovered"
        );
        configurations.insert(name, configuration);
    }

    Ok(configurations)
}

/// Install path from the first line of `settings.txt`
/// (`destination <path>`). Absent or malformed settings mean the caller
/// falls back to the staging path.
fn read_destination(conf_dir: &Path) -> Option<PathBuf> {
    let settings = conf_dir.join("settings.txt");
    let content = fs::read_to_string(settings).ok()?;
    let first = content.lines().next()?;
    first
        .split_whitespace()
        .nth(1)
        .map(PathBuf::from)
}
