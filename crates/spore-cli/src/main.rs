//! spore — cascading fleet rollout CLI.
//!
//! Prepares an unpacked distribution tree and drives a rollout run over
//! the selected hosts, streaming per-host progress to the terminal.
//!
//! # Usage
//!
//! ```text
//! spore show --distribution /path/to/dist
//! spore run --distribution /path/to/dist --configuration lab
//! spore run --distribution /path/to/dist --configuration lab \
//!     --host web-01 --host db-01 --no-verify
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use spore_core::{FleetEvent, HostState};
use spore_remote::{Md5Verifier, ShellRemoteOps, SshConfig};
use spore_rollout::Orchestrator;

#[derive(Parser)]
#[command(name = "spore", about = "Cascading fleet rollout")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a distribution's configurations and hosts.
    Show {
        /// Root of an unpacked distribution (contains base/ and conf/).
        #[arg(long)]
        distribution: PathBuf,
    },

    /// Roll a distribution out to a configuration's hosts.
    Run {
        /// Root of an unpacked distribution (contains base/ and conf/).
        #[arg(long)]
        distribution: PathBuf,

        /// Configuration to roll out; may be omitted when the
        /// distribution ships exactly one.
        #[arg(long)]
        configuration: Option<String>,

        /// Restrict the run to these hosts (repeatable). Default: all
        /// hosts of the configuration.
        #[arg(long = "host")]
        hosts: Vec<String>,

        /// Override the install path from settings.txt.
        #[arg(long)]
        install_path: Option<PathBuf>,

        /// Skip checksum verification after base copies.
        #[arg(long)]
        no_verify: bool,

        /// Remote account used for ssh/rsync.
        #[arg(long, default_value = "root")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,spore=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Show { distribution } => show(&distribution),
        Command::Run {
            distribution,
            configuration,
            hosts,
            install_path,
            no_verify,
            user,
        } => {
            run(
                &distribution,
                configuration,
                hosts,
                install_path,
                no_verify,
                user,
            )
            .await
        }
    }
}

fn show(distribution: &Path) -> anyhow::Result<()> {
    let prepared = spore_prepare::prepare(distribution)
        .with_context(|| format!("preparing {}", distribution.display()))?;

    println!(
        "{} ({})",
        prepared.distribution.name,
        bytes_to_human(prepared.distribution.size)
    );
    for (name, conf) in &prepared.configurations {
        println!(
            "  {name} -> {}{}",
            conf.destination_path.display(),
            if conf.post_script.is_some() {
                " [post-install]"
            } else {
                ""
            }
        );
        for host in &conf.hosts {
            println!("    {}", host.hostname);
        }
    }
    Ok(())
}

async fn run(
    distribution: &Path,
    configuration: Option<String>,
    hosts: Vec<String>,
    install_path: Option<PathBuf>,
    no_verify: bool,
    user: String,
) -> anyhow::Result<()> {
    let prepared = spore_prepare::prepare(distribution)
        .with_context(|| format!("preparing {}", distribution.display()))?;

    let name = match configuration {
        Some(name) => name,
        None if prepared.configurations.len() == 1 => {
            prepared.configurations.keys().next().unwrap().clone()
        }
        None => bail!(
            "distribution has {} configurations, pick one with --configuration",
            prepared.configurations.len()
        ),
    };
    let mut configuration = prepared
        .configurations
        .get(&name)
        .cloned()
        .with_context(|| format!("no configuration named '{name}'"))?;
    if let Some(path) = install_path {
        configuration.destination_path = path;
    }

    let ssh = SshConfig {
        user,
        ..SshConfig::default()
    };
    let local = local_hostname();
    info!(
        distribution = %prepared.distribution.name,
        configuration = %name,
        install_path = %configuration.destination_path.display(),
        local_host = %local,
        "rollout prepared"
    );

    let (engine, mut events) = Orchestrator::new(
        prepared.distribution,
        configuration,
        Arc::new(ShellRemoteOps::new(ssh.clone())),
        Arc::new(Md5Verifier::new(ssh)),
        &local,
    );
    engine.set_verify(!no_verify);

    if !hosts.is_empty() {
        let selected: Vec<String> = hosts.iter().map(|h| h.trim().to_lowercase()).collect();
        for record in engine.hosts() {
            engine.set_checked(&record.hostname, selected.contains(&record.hostname))?;
        }
        for host in &selected {
            if !engine.hosts().iter().any(|r| &r.hostname == host) {
                bail!("host '{host}' is not part of configuration '{name}'");
            }
        }
    }
    if !engine.hosts().iter().any(|h| h.checked) {
        bail!("no hosts selected");
    }

    engine.start_all();

    let mut stop_requested = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(FleetEvent::HostChanged { hostname, state, timer }) => {
                    if timer >= 0 {
                        info!(host = %hostname, %state, elapsed_secs = timer, "host update");
                    } else {
                        info!(host = %hostname, %state, "host update");
                    }
                }
                Some(FleetEvent::RunStarted) => info!("run started"),
                Some(FleetEvent::RunFinished { cancelled, elapsed_secs }) => {
                    if cancelled {
                        warn!(elapsed_secs, "run cancelled");
                    } else {
                        info!(elapsed_secs, "run finished");
                    }
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !stop_requested => {
                stop_requested = true;
                warn!("stop requested, unwinding in-flight operations");
                engine.stop().await;
            }
        }
    }

    let mut failed = 0usize;
    for host in engine.hosts() {
        if host.checked {
            info!(host = %host.hostname, outcome = %host.state, "final");
            if host.state == HostState::Failure {
                failed += 1;
            }
        }
    }
    engine.shutdown().await;

    if failed > 0 {
        bail!("{failed} host(s) failed");
    }
    Ok(())
}

/// Lowercased name of this machine, used to seed the fan-out tree locally
/// when possible.
fn local_hostname() -> String {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .trim()
                .to_lowercase()
        })
        .unwrap_or_default()
}

fn bytes_to_human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_to_human_scales() {
        assert_eq!(bytes_to_human(512), "512 B");
        assert_eq!(bytes_to_human(2048), "2.0 KiB");
        assert_eq!(bytes_to_human(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
