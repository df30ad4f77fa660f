//! wardend — the Warden fleet control plane daemon.
//!
//! Single binary that assembles every subsystem:
//! - State store (redb)
//! - Health prober
//! - Metrics collector
//! - Scaling decision engine + lifecycle manager
//! - Chaos injector (opt-in)
//! - Backup/restore orchestrator
//! - Management API (opt-in)
//!
//! # Usage
//!
//! ```text
//! wardend run --config warden.yaml --chaos --intensity high --api-port 9090
//! wardend backup --config warden.yaml
//! wardend restore --config warden.yaml --backup-id backup-1718000000000
//! wardend list-backups --config warden.yaml
//! wardend validate --config warden.yaml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use warden_core::WardenConfig;
use warden_core::config::Intensity;
use warden_core::duration::parse_duration;
use wardend::console;

#[derive(Parser)]
#[command(name = "wardend", about = "Warden fleet control plane", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop.
    Run {
        #[arg(long, default_value = "warden.yaml")]
        config: PathBuf,

        /// Decide and log, but never start, stop, kill or restore anything.
        #[arg(long)]
        dry_run: bool,

        /// Enable the chaos injector.
        #[arg(long)]
        chaos: bool,

        /// Chaos preset: low, medium, high or extreme.
        #[arg(long)]
        intensity: Option<Intensity>,

        /// Stop after this long (e.g. "10m"); runs until interrupted otherwise.
        #[arg(long, value_parser = duration_arg)]
        duration: Option<Duration>,

        /// Override control.check_interval (e.g. "15s").
        #[arg(long, value_parser = duration_arg)]
        check_interval: Option<Duration>,

        /// Serve the management API on this port.
        #[arg(long)]
        api_port: Option<u16>,
    },

    /// Take one backup and exit.
    Backup {
        #[arg(long, default_value = "warden.yaml")]
        config: PathBuf,
    },

    /// Restore a backup (the newest complete one by default) and exit.
    Restore {
        #[arg(long, default_value = "warden.yaml")]
        config: PathBuf,

        #[arg(long)]
        backup_id: Option<String>,
    },

    /// Print complete backups as JSON, oldest first.
    ListBackups {
        #[arg(long, default_value = "warden.yaml")]
        config: PathBuf,
    },

    /// Check a config file and exit.
    Validate {
        #[arg(long, default_value = "warden.yaml")]
        config: PathBuf,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration '{s}' (try 30s, 5m, 500ms)"))
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,wardend=debug,warden=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<WardenConfig> {
    WardenConfig::from_file(path).with_context(|| format!("load config {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            config,
            dry_run,
            chaos,
            intensity,
            duration,
            check_interval,
            api_port,
        } => {
            let mut config = load_config(&config)?;
            config.control.dry_run |= dry_run;
            config.chaos.enabled |= chaos;
            if let Some(intensity) = intensity {
                config.chaos.intensity = intensity;
            }
            if let Some(interval) = check_interval {
                config.control.check_interval = interval;
            }
            if api_port.is_some() {
                config.control.api_port = api_port;
            }
            config.validate()?;
            run(config, duration).await
        }
        Command::Backup { config } => {
            let controller = wardend::assemble(load_config(&config)?)?;
            let manifest = controller.recovery().backup().await?;
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
        Command::Restore { config, backup_id } => {
            let mut config = load_config(&config)?;
            // Workers belong to the running daemon; an offline restore only
            // puts data back.
            config.scaling.min_instances = 0;
            let recovery = wardend::assemble(config)?.recovery();
            let manifest = match backup_id {
                Some(id) => recovery.restore_by_id(&id).await?,
                None => recovery.restore_latest().await?,
            };
            info!(backup_id = %manifest.backup_id, "restore complete");
            Ok(())
        }
        Command::ListBackups { config } => {
            let config = load_config(&config)?;
            let store = warden_recovery::BackupStore::new(config.recovery.backup_dir.clone());
            let manifests = store.list_complete()?;
            println!("{}", serde_json::to_string_pretty(&manifests)?);
            Ok(())
        }
        Command::Validate { config } => {
            let loaded = load_config(&config)?;
            info!(
                path = %config.display(),
                min = loaded.scaling.min_instances,
                max = loaded.scaling.max_instances,
                services = loaded.health.services.len(),
                "config is valid"
            );
            Ok(())
        }
    }
}

async fn run(config: WardenConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    info!("Warden control plane starting");
    let api_port = config.control.api_port;
    let controller = wardend::assemble(config)?;

    let (command_tx, command_rx) = mpsc::channel(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    // ── Management API ─────────────────────────────────────────

    let api_handle = match api_port {
        Some(port) => {
            let router = warden_api::build_router(controller.api_state(command_tx.clone()));
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind management API on {addr}"))?;
            info!(%addr, "API server starting");

            let mut api_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                    let _ = api_shutdown.wait_for(|stop| *stop).await;
                });
                if let Err(e) = server.await {
                    error!(error = %e, "API server error");
                }
            }))
        }
        None => None,
    };

    // ── Operator input ─────────────────────────────────────────

    match console::spawn_stdin_reader(command_tx.clone()) {
        Ok(()) => info!("{}", console::HELP),
        Err(e) => error!(error = %e, "could not start stdin reader"),
    }
    drop(command_tx);

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; finishing current tick");
            let _ = signal_tx.send(true);
        }
    });

    // ── Control loop ───────────────────────────────────────────

    let report = controller.run(command_rx, shutdown_rx, duration).await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    if let Some(alert) = report.alert {
        error!(%alert, "stopped with an open alert");
    }
    info!("Warden control plane stopped");
    Ok(())
}
