// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally Server
//!
//! Entry point for the `tally-server` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the ledger database, and
//! serves the REST API.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the server
//! - `init`    — initialize the data directory and seed defaults
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;

use tally_core::auth::AuthGate;
use tally_core::ledger::{BalancePolicy, LedgerService};
use tally_core::query::Queries;
use tally_core::registry::EntityRegistry;
use tally_core::session::SessionStore;
use tally_core::store::{HistoryPolicy, TrackerDb};

use cli::{Commands, TallyCli};
use logging::LogFormat;
use metrics::TrackerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = TallyCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::Init(args) => init_data_dir(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens (creating if needed) the ledger database under a data directory.
fn open_database(data_dir: &Path) -> Result<Arc<TrackerDb>> {
    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = TrackerDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(Arc::new(db))
}

/// Starts the full server: REST API and metrics endpoint.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "tally_server=info,tally_core=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let balance_policy = if args.clamp_at_zero {
        BalancePolicy::ClampAtZero
    } else {
        BalancePolicy::AllowNegative
    };
    let history_policy = if args.cascade_history {
        HistoryPolicy::Cascade
    } else {
        HistoryPolicy::Retain
    };

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        ?balance_policy,
        ?history_policy,
        "starting tally-server"
    );

    // --- Persistent storage ---
    let db = open_database(&args.data_dir)?;

    // --- Core services ---
    let registry = EntityRegistry::new(Arc::clone(&db), history_policy);
    let ledger = LedgerService::new(Arc::clone(&db), balance_policy);
    let queries = Queries::new(Arc::clone(&db));
    let sessions = SessionStore::new(Arc::clone(&db));
    let gate = AuthGate::new(sessions.clone(), &args.secret);

    // --- Boot-time housekeeping ---
    registry
        .ensure_defaults()
        .context("failed to seed default kids and tags")?;
    let purged = sessions
        .purge_expired()
        .context("failed to purge expired sessions")?;
    if purged > 0 {
        tracing::info!(purged, "expired sessions removed at boot");
    }

    // --- Metrics ---
    let tracker_metrics = Arc::new(TrackerMetrics::new());
    tracker_metrics.subjects.set(db.subject_count() as i64);

    // --- Application state ---
    let app_state = api::AppState {
        registry,
        ledger,
        queries,
        sessions,
        gate,
        metrics: Arc::clone(&tracker_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&tracker_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("final flush failed")?;
    tracing::info!("tally-server stopped");
    Ok(())
}

/// Initializes a data directory and seeds the default kids and tags
/// without starting the server.
fn init_data_dir(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("tally_server=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing data directory");

    let db = open_database(data_dir)?;
    let registry = EntityRegistry::new(Arc::clone(&db), HistoryPolicy::Retain);
    registry
        .ensure_defaults()
        .context("failed to seed default kids and tags")?;
    db.flush().context("flush failed")?;

    println!("Data directory initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Kids seeded    : {}", db.subject_count());
    println!("  Tags seeded    : {}", db.category_count());

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("tally-server {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
