//! Schema migration runner: applies `./migrations` against `DATABASE_URL`.
//! This engine has only schema migrations, so the surface is a single
//! subcommand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use incident_engine_core::Config;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "migrate_cli")]
#[command(about = "Schema migration runner for the incident clustering engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations under `./migrations`.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run_migrations().await,
    }
}

async fn run_migrations() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    tracing::info!("migrations complete");

    Ok(())
}
