// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{http::StatusCode, routing::get, Router};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dnssync::{
    bind9::{
        keys::ensure_key_file,
        writer::{render_all, write_atomically},
        TokioCommandRunner,
    },
    changelog::{DnsRepository, MemoryRepository},
    config::{DnsConfig, ENV_SYSTEM_ID},
    constants::{
        METRICS_SERVER_PATH, RECONCILE_REQUEST_CAPACITY, TOKIO_WORKER_THREADS,
    },
    context::Context,
    convergence::{HickorySoaResolver, SoaResolver},
    metrics::gather_metrics,
    reconcilers::{run_trigger_loop, QueueRouter, ReconcileRequest, ReconciliationOrchestrator},
    serial::SerialTracker,
    zone_data::{ZoneDataBuilder, ZoneInputs},
};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Keeps BIND9 zones in step with the DNS change log.
#[derive(Debug, Parser)]
#[command(name = "dnssync", version, about)]
struct Cli {
    /// YAML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the reconciliation daemon for this region controller
    Run {
        /// Repository snapshot (YAML or JSON)
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Write zone files and named.conf for the snapshot without touching rndc
    Render {
        #[arg(long)]
        snapshot: PathBuf,
        /// Directory receiving the rendered files
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Print the serial applied on this node, or -1 if none
    Serial,
    /// Query one nameserver's SOA serial and compare it to an expected value
    CheckSerial {
        #[arg(long)]
        serial: u64,
        #[arg(long)]
        server: IpAddr,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("dnssync")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Initialize logging with custom format
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Example: RUST_LOG=debug dnssync run --snapshot snapshot.yaml
    //
    // Respects RUST_LOG_FORMAT environment variable for output format
    // Example: RUST_LOG_FORMAT=json dnssync run --snapshot snapshot.yaml
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    debug!("Logging initialized with file and line number tracking");

    let config = DnsConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run { snapshot } => run(config, &snapshot).await,
        Command::Render { snapshot, out_dir } => render(config, &snapshot, out_dir).await,
        Command::Serial => {
            let tracker = SerialTracker::new(config.serial_zone_file_path(), config.default_ttl);
            match tracker.current_serial().await? {
                Some(serial) => println!("{serial}"),
                None => println!("-1"),
            }
            Ok(())
        }
        Command::CheckSerial { serial, server } => check_serial(&config, serial, server).await,
    }
}

async fn run(config: DnsConfig, snapshot: &Path) -> Result<()> {
    if config.system_id.is_empty() {
        anyhow::bail!("system_id is not set; set it in the config file or {ENV_SYSTEM_ID}");
    }
    info!(system_id = %config.system_id, "Starting DNS reconciliation");

    let repository = Arc::new(MemoryRepository::load(snapshot).await?);
    let runner = Arc::new(TokioCommandRunner::new(config.command_timeout()));
    let resolver = Arc::new(HickorySoaResolver::new(
        config.dns_port,
        config.convergence.query_timeout(),
    ));
    let metrics_address = config.metrics_bind_address.clone();
    let escalate_after = config.escalate_after_failures;
    let ctx = Arc::new(Context::new(config, repository.clone(), runner, resolver));

    let router = Arc::new(QueueRouter::new());
    let worker = router.register(&ctx.config.system_id, ctx.clone()).await;

    let (requests_tx, requests) = mpsc::channel(RECONCILE_REQUEST_CAPACITY);
    spawn_full_reload_on_hangup(requests_tx)?;

    let orchestrator = Arc::new(ReconciliationOrchestrator::new(ctx.clone(), router.clone()));
    let changes = repository.subscribe_changes();

    tokio::select! {
        result = serve_metrics(&metrics_address) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Metrics server exited unexpectedly without error")
        }
        tracker = run_trigger_loop(orchestrator, changes, requests, escalate_after, shutdown_signal()) => {
            info!(failed_attempts = tracker.consecutive(), "Reconciliation loop stopped");
        }
    }

    // Let zone work already queued on this node finish before exiting
    router.deregister(&ctx.config.system_id).await;
    if let Err(e) = worker.await {
        warn!(error = %e, "Node worker did not stop cleanly");
    }
    info!("Shutdown complete");
    Ok(())
}

async fn render(mut config: DnsConfig, snapshot: &Path, out_dir: PathBuf) -> Result<()> {
    config.dns_config_dir.clone_from(&out_dir);
    config.zone_file_dir = out_dir;

    let repository = MemoryRepository::load(snapshot).await?;
    let serial = repository.latest_serial().await?.unwrap_or(0);
    let inputs = ZoneInputs::fetch(&repository).await?;
    let zone_data = ZoneDataBuilder::new(config.default_ttl).build(&inputs);

    tokio::fs::create_dir_all(&config.zone_file_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.zone_file_dir.display()))?;
    ensure_key_file(&config.nsupdate_keys_path()).await?;
    let files = render_all(&config, &zone_data, serial, &Utc::now())?;
    write_atomically(&files).await?;

    for file in &files {
        println!("{}", file.path.display());
    }
    info!(serial, files = files.len(), "Rendered zone files");
    Ok(())
}

async fn check_serial(config: &DnsConfig, expected: u64, server: IpAddr) -> Result<()> {
    let resolver = HickorySoaResolver::new(config.dns_port, config.convergence.query_timeout());
    let serial = resolver.soa_serial(server, &config.default_domain).await?;
    println!("{serial}");
    if serial < expected {
        anyhow::bail!("{server} serves serial {serial}, expected at least {expected}");
    }
    Ok(())
}

async fn serve_metrics(address: &str) -> Result<()> {
    let app = Router::new().route(METRICS_SERVER_PATH, get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind metrics server to {address}"))?;
    info!(address, path = METRICS_SERVER_PATH, "Serving Prometheus metrics");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Request a full reload on every SIGHUP.
#[cfg(unix)]
fn spawn_full_reload_on_hangup(requests: mpsc::Sender<ReconcileRequest>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            info!("Received SIGHUP, requesting full reload");
            let request = ReconcileRequest {
                need_full_reload: true,
            };
            if requests.send(request).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_full_reload_on_hangup(_requests: mpsc::Sender<ReconcileRequest>) -> Result<()> {
    Ok(())
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
