//! Service configuration.
//!
//! Every setting is a CLI flag with an environment fallback. `.env` files are
//! loaded before parsing, so any of the `PIPELINE_*` variables may live there.

use crate::artifact::{ArtifactService, DEFAULT_INLINE_MAX_BYTES};
use crate::query::DEFAULT_MAX_LIMIT;
use crate::storage::sql::DEFAULT_TABLE;
use crate::storage::{ColumnMap, StorageConfig};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Append-only JSON-lines file
    Jsonl,
    /// SQLite database
    Sql,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "pipeline-info")]
#[command(version, about = "Pipeline run metadata service")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "PIPELINE_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// Storage backend
    #[arg(long, env = "PIPELINE_BACKEND", value_enum, ignore_case = true, default_value = "jsonl")]
    pub backend: Backend,

    /// JSON-lines store (jsonl backend)
    #[arg(long, env = "PIPELINE_JSONL_PATH", default_value = "pipeline_data.jsonl")]
    pub jsonl_path: PathBuf,

    /// SQLite database file (sql backend)
    #[arg(long, env = "PIPELINE_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Table holding run records (sql backend)
    #[arg(long, env = "PIPELINE_TABLE", default_value = DEFAULT_TABLE)]
    pub table: String,

    /// JSON object mapping record fields to column names (sql backend)
    #[arg(long, env = "PIPELINE_COLUMN_MAP")]
    pub column_map: Option<String>,

    /// Largest page a caller may request
    #[arg(long, env = "PIPELINE_MAX_LIMIT", default_value_t = DEFAULT_MAX_LIMIT)]
    pub max_limit: usize,

    /// Archives above this size are always downloaded, never shown inline
    #[arg(long, env = "PIPELINE_INLINE_MAX_BYTES", default_value_t = DEFAULT_INLINE_MAX_BYTES)]
    pub inline_max_bytes: u64,

    /// Only serve archives under this directory
    #[arg(long, env = "PIPELINE_ARCHIVE_ROOT")]
    pub archive_root: Option<PathBuf>,
}

impl Config {
    /// Backend selection, checked for completeness.
    pub fn storage(&self) -> Result<StorageConfig> {
        if self.max_limit == 0 {
            bail!("PIPELINE_MAX_LIMIT must be at least 1");
        }

        match self.backend {
            Backend::Jsonl => Ok(StorageConfig::Jsonl {
                path: self.jsonl_path.clone(),
            }),
            Backend::Sql => {
                let db_path = self
                    .db_path
                    .clone()
                    .context("PIPELINE_DB_PATH is required for the sql backend")?;
                let columns = match self.column_map.as_deref().map(str::trim) {
                    Some(raw) if !raw.is_empty() => {
                        ColumnMap::from_json(raw).context("Invalid PIPELINE_COLUMN_MAP")?
                    }
                    _ => ColumnMap::default(),
                };
                Ok(StorageConfig::Sql {
                    db_path,
                    table: self.table.clone(),
                    columns,
                })
            }
        }
    }

    pub fn artifacts(&self) -> ArtifactService {
        ArtifactService::new(self.inline_max_bytes, self.archive_root.clone())
    }
}
