//! Applies `sql/create_pipeline_runs.sql` to the SQLite database named by
//! `PIPELINE_DB_PATH`. Safe to re-run: every statement is `IF NOT EXISTS`.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pipeline_info::storage::SqlStore;

#[derive(Parser, Debug)]
#[command(name = "run_migration")]
#[command(about = "Create the pipeline runs table and its indexes")]
struct Args {
    /// SQLite database file, created if missing
    #[arg(long, env = "PIPELINE_DB_PATH")]
    db_path: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "run_migration=info,pipeline_info=debug".into()),
        )
        .init();

    let args = Args::parse();
    let db_path = args
        .db_path
        .context("PIPELINE_DB_PATH is not set and --db-path was not given")?;

    info!(db_path = %db_path.display(), "Applying creation script");
    let executed = SqlStore::create_schema(&db_path)
        .with_context(|| format!("Migration failed for {}", db_path.display()))?;
    info!(statements = executed, "Migration complete");

    Ok(())
}
