//! # SMM Dispatch Entry Point

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use smm_dispatch::{
    config::{AppConfig, ConfigLoader, EnvConfigProvider},
    db,
    orders::InMemoryOrderSource,
    routing::RoutingTable,
    scheduler::TriggerOutcome,
    server::{AppState, run_server},
    telemetry,
};
use tokio_util::sync::CancellationToken;

/// SMM order dispatch service
#[derive(Parser)]
#[command(name = "smm-dispatch", version, about, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Apply migrations, then run the admin API and retry scheduler (default)
    Serve,
    /// Run one retry sweep and print the report
    Sweep,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    tracing::info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    Migrator::up(&db, None).await.context("applying migrations")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Sweep => {
            let state = build_state(config, db)?;
            match state.scheduler.run_manual().await? {
                TriggerOutcome::Ran(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                other => tracing::warn!(?other, "Sweep did not run"),
            }
            Ok(())
        }
        Command::Serve => {
            let state = build_state(config, db)?;
            let shutdown = CancellationToken::new();

            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Shutdown signal received");
                }
                signal.cancel();
            });

            run_server(state, shutdown).await
        }
    }
}

fn build_state(config: AppConfig, db: sea_orm::DatabaseConnection) -> Result<AppState> {
    let routing = match &config.routing_file {
        Some(path) => RoutingTable::from_path(path).context("loading routing table")?,
        None => {
            tracing::warn!("No routing file configured; every product is unrouted");
            RoutingTable::default()
        }
    };

    let orders = InMemoryOrderSource::new(config.ingestion.clone());
    let provider_config = EnvConfigProvider::new(config.provider.clone());

    Ok(AppState::new(
        Arc::new(config),
        db,
        Arc::new(routing),
        Arc::new(orders),
        Arc::new(provider_config),
    ))
}
