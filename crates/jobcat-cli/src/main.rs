use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobcat_sync::{
    connect_store, maybe_build_scheduler, run_sync_once_from_env, SyncConfig, SyncPipeline,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "jobcat")]
#[command(about = "Reconcile job-listing CSV snapshots into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest one snapshot and exit.
    Sync {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Re-ingest a snapshot on the configured cron until interrupted.
    Schedule {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Apply database migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { csv } => {
            let summary = run_sync_once_from_env(&csv).await?;
            println!(
                "sync complete: run_id={} observed={} distinct={} stale={} unparsed={} inserted={} updated={} merged={}",
                summary.run_id,
                summary.observed_rows,
                summary.distinct_listings,
                summary.stale_dropped,
                summary.unparsed_dropped,
                summary.inserted,
                summary.updated,
                summary.merged
            );
        }
        Commands::Schedule { csv } => {
            let config = SyncConfig {
                scheduler_enabled: true,
                ..SyncConfig::from_env()
            };
            let cron = config.sync_cron.clone();
            let store = connect_store(&config).await?;
            let pipeline = Arc::new(SyncPipeline::new(config, Arc::new(store))?);
            let Some(mut sched) = maybe_build_scheduler(pipeline, csv.clone()).await? else {
                anyhow::bail!("scheduler was not built");
            };
            sched.start().await.context("starting scheduler")?;
            tracing::info!(%cron, snapshot = %csv.display(), "scheduler running; ctrl-c to stop");

            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            tracing::info!("shutting down scheduler");
            sched.shutdown().await.context("stopping scheduler")?;
        }
        Commands::Migrate => {
            let config = SyncConfig::from_env();
            let store = connect_store(&config).await?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
        }
    }

    Ok(())
}
