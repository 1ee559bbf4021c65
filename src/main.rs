//! Shadow Evolution - operator CLI and daemon
//!
//! Usage:
//!   shadow-evolution [--config PATH] train
//!   shadow-evolution [--config PATH] evaluate
//!   shadow-evolution [--config PATH] cleanup [--max-age-days N]
//!   shadow-evolution [--config PATH] status [--status VALIDATING]
//!   shadow-evolution [--config PATH] rollback
//!   shadow-evolution [--config PATH] run [--metrics-port 9090]
//!
//! Environment Variables:
//!   SHADOW_EVOLUTION_CONFIG - Path to TOML config file
//!   SHADOW_DB_PATH, SHADOW_ARTIFACT_DIR, SHADOW_SIGNAL_DB_PATH - storage overrides
//!   SHADOW_VALIDATION_WINDOW_HOURS, SHADOW_RETENTION_DAYS - policy overrides
//!   RUST_LOG - log filter (default: shadow_evolution=info)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shadow_evolution::config::EvolutionConfig;
use shadow_evolution::evolution::{IncumbentHandle, Scheduler, ShadowEvolutionEngine};
use shadow_evolution::models::ShadowStatus;
use shadow_evolution::providers::{IncumbentReloader, SignalStore};

#[derive(Parser, Debug)]
#[command(name = "shadow-evolution")]
#[command(about = "Train, shadow, evaluate and promote candidate scoring models")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short, long, env = "SHADOW_EVOLUTION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the candidate line-up once
    Train,
    /// Run one evaluation pass
    Evaluate,
    /// Reclaim expired shadows past retention
    Cleanup {
        /// Override janitor.retention_days
        #[arg(long)]
        max_age_days: Option<u32>,
    },
    /// Show registry counts, incumbent generation and shadows
    Status {
        /// Only list shadows in this status
        #[arg(long)]
        status: Option<ShadowStatus>,
    },
    /// Restore the pre-promotion incumbent backup
    Rollback,
    /// Run the scheduler and serve /metrics and /health
    Run {
        /// Prometheus metrics port
        #[arg(long, default_value = "9090")]
        metrics_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = EvolutionConfig::resolve(cli.config.as_deref())?;
    let engine = Arc::new(open_engine(config)?);

    match cli.command {
        Command::Train => print_json(&engine.train_candidates().await?),
        Command::Evaluate => print_json(&engine.evaluate_candidates().await?),
        Command::Cleanup { max_age_days } => {
            let days = max_age_days.unwrap_or(engine.config().janitor.retention_days);
            print_json(&engine.cleanup(days)?)
        }
        Command::Status { status } => print_json(&engine.status(status)?),
        Command::Rollback => {
            let generation = engine.rollback().await?;
            print_json(&serde_json::json!({ "generation": generation }))
        }
        Command::Run { metrics_port } => run_daemon(engine, metrics_port).await,
    }
}

/// Initialize tracing; `RUST_LOG` wins over the default filter.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shadow_evolution=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_engine(config: EvolutionConfig) -> Result<ShadowEvolutionEngine> {
    ensure_parent(&config.storage.signal_db_path)?;
    let signals = Arc::new(SignalStore::open(&config.storage.signal_db_path)?);
    ShadowEvolutionEngine::open(config, signals.clone(), signals)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Clone)]
struct DaemonState {
    engine: Arc<ShadowEvolutionEngine>,
    incumbent: Arc<IncumbentHandle>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    generation: u64,
    incumbent_loaded: bool,
    validating: usize,
}

async fn run_daemon(engine: Arc<ShadowEvolutionEngine>, metrics_port: u16) -> Result<()> {
    info!("🚀 Starting shadow evolution daemon");

    let incumbent = Arc::new(IncumbentHandle::new(engine.artifacts().clone()));
    if engine.artifacts().incumbent_exists() {
        if let Err(e) = incumbent.reload() {
            warn!(error = %e, "Canonical incumbent present but unreadable");
        }
    } else {
        warn!("No canonical incumbent yet; the first promotion will seed it");
    }
    engine.register_reloader(incumbent.clone());

    let state = DaemonState {
        engine: engine.clone(),
        incumbent,
    };
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Prometheus metrics available at http://{}/metrics", addr);

    let http_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server error");
        }
    });

    let scheduler = Scheduler::new(engine);
    tokio::select! {
        _ = scheduler.run(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Received Ctrl+C, shutting down");
        }) => {}
        _ = http_server => {
            warn!("HTTP server exited");
        }
    }

    Ok(())
}

async fn metrics_handler(State(state): State<DaemonState>) -> String {
    state.engine.metrics().to_prometheus()
}

async fn health_handler(State(state): State<DaemonState>) -> Json<HealthResponse> {
    let generation = state
        .engine
        .registry()
        .incumbent_state()
        .map(|s| s.generation)
        .unwrap_or_default();
    let validating = state
        .engine
        .registry()
        .list_validating()
        .map(|v| v.len())
        .unwrap_or_default();
    Json(HealthResponse {
        status: "ok",
        generation,
        incumbent_loaded: state.incumbent.current().is_some(),
        validating,
    })
}
