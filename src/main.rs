//! Praetor — distributed automation control plane.
//!
//! Job templates reference a source-controlled playbook project and a
//! structured host inventory; the pipeline schedules runs, dispatches them
//! to executor workloads, streams execution events back over the bus, and
//! projects those events into the durable run-state store.
//!
//! One binary, one subcommand per pipeline component; the same image runs
//! as scheduler, executor (daemon or one-shot), consumer, controller, or
//! ingestion endpoint.

mod bus;
mod config;
mod db;
mod messages;
mod metrics;
mod models;
mod routes;
mod schema;
mod services;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::bus::{MessageBus, NatsBus};
use crate::services::executor::{Agent, CancelProbe};
use crate::services::runner::PlaybookRunner;

#[derive(Parser)]
#[command(name = "praetor", about = "Praetor automation control plane")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Claim pending jobs and publish execution requests
    Scheduler,
    /// Execute playbook runs (daemon mode; set PRAETOR_MODE=oneshot for a single injected manifest)
    Executor,
    /// Project job events into the run-state store
    Consumer,
    /// Materialize execution requests as workloads and reconcile run state
    Controller,
    /// Serve the out-of-band event ingestion API
    Ingestion,
    /// Apply the embedded schema migration and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();
    let config = config::Config::from_env();

    match cli.command {
        Command::Migrate => {
            let pool = db::connect(&config.database_url).await?;
            let mut conn = pool
                .get()
                .await
                .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
            tracing::info!("Running database migration...");
            db::run_migration(&mut conn).await?;
            tracing::info!("Migration complete");
        }

        Command::Scheduler => {
            metrics::init_metrics();
            let pool = db::connect(&config.database_url).await?;
            let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&config.nats_url).await?);

            tokio::select! {
                _ = services::scheduler::run_scheduler(pool, bus, config) => {}
                _ = shutdown_signal() => {}
            }
        }

        Command::Consumer => {
            metrics::init_metrics();
            let pool = db::connect(&config.database_url).await?;
            let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&config.nats_url).await?);

            tokio::select! {
                result = services::consumer::run_consumer(pool, bus) => result?,
                _ = shutdown_signal() => {}
            }
        }

        Command::Executor => {
            metrics::init_metrics();
            let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&config.nats_url).await?);
            let runner = PlaybookRunner::new(&config.runs_dir);

            // Cancel polling needs store access; one-shot workloads
            // usually run without it.
            let cancel_probe = if std::env::var("DATABASE_URL").is_ok() {
                match db::connect(&config.database_url).await {
                    Ok(pool) => Some(CancelProbe::new(pool)),
                    Err(e) => {
                        tracing::warn!("Store unavailable, cancel polling disabled: {e:#}");
                        None
                    }
                }
            } else {
                tracing::warn!("DATABASE_URL not set -- cancel polling disabled");
                None
            };

            let agent = Arc::new(Agent::new(
                bus,
                runner,
                config.executor_workers,
                cancel_probe,
            ));

            if config::Config::oneshot_mode() {
                tracing::info!("Starting executor in one-shot mode");
                agent.run_oneshot(&config.manifest_path).await?;
            } else {
                tokio::select! {
                    result = agent.run_daemon() => result?,
                    _ = shutdown_signal() => {}
                }
            }
        }

        Command::Controller => {
            metrics::init_metrics();
            let pool = db::connect(&config.database_url).await?;
            let bus: Arc<dyn MessageBus> = Arc::new(NatsBus::connect(&config.nats_url).await?);
            let client = kube::Client::try_default()
                .await
                .map_err(|e| anyhow::anyhow!("kubernetes client: {e}"))?;

            let reconciler = tokio::spawn(services::reconciler::run_reconciler(
                pool,
                client.clone(),
                config.clone(),
            ));

            tokio::select! {
                result = services::controller::run_controller(bus, client, config) => result?,
                _ = shutdown_signal() => {}
            }
            reconciler.abort();
        }

        Command::Ingestion => {
            metrics::init_metrics();
            let pool = db::connect(&config.database_url).await?;
            let app = routes::ingestion_router(routes::IngestionState { pool });

            let addr = SocketAddr::from(([0, 0, 0, 0], config.ingestion_port));
            tracing::info!("Ingestion API listening on {}", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
