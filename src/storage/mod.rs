//! Run storage.
//!
//! `PipelineStore` is the capability every backend provides. `Repository` is
//! the facade the HTTP layer talks to: it picks one backend at startup,
//! validates caller input, and assembles paged responses. Callers never see
//! which backend answered beyond `backend_name`.

pub mod inference;
pub mod jsonl;
pub mod sql;

pub use jsonl::JsonlStore;
pub use sql::{ColumnMap, SqlStore};

use crate::models::{PipelineRun, PipelineSummary};
use crate::query::{Page, PageRequest, RunFilter, ValidationError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Operations every storage backend supports.
///
/// All methods block. Async callers run them on the blocking pool.
pub trait PipelineStore: Send + Sync {
    /// Short backend identifier for health and info reporting.
    fn backend_name(&self) -> &'static str;

    /// Matching runs, newest `start_utc` first, ties by `date_code`, windowed by `page`.
    fn query(&self, filter: &RunFilter, page: Page) -> Result<Vec<PipelineRun>, StorageError>;

    /// Number of matching runs, independent of any page.
    fn count(&self, filter: &RunFilter) -> Result<u64, StorageError>;

    /// Per-pipeline statistics over every stored run.
    fn summarize(&self) -> Result<Vec<PipelineSummary>, StorageError>;

    /// Append one run. No deduplication.
    fn insert(&self, run: &PipelineRun) -> Result<(), StorageError>;

    /// First stored run with this `date_code`, if any.
    fn get_by_date_code(&self, date_code: &str) -> Result<Option<PipelineRun>, StorageError>;
}

/// Which backend to open, and how.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Jsonl {
        path: PathBuf,
    },
    Sql {
        db_path: PathBuf,
        table: String,
        columns: ColumnMap,
    },
}

/// Errors from the storage layer.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    /// A stored row could not be turned back into a record.
    Decode(String),
    NotFound(String),
    /// Invalid table name, column map or similar.
    Config(String),
    Invalid(ValidationError),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Decode(e) => write!(f, "Decode error: {}", e),
            Self::NotFound(what) => write!(f, "Not found: {}", what),
            Self::Config(e) => write!(f, "Invalid storage configuration: {}", e),
            Self::Invalid(e) => write!(f, "Invalid input: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<ValidationError> for StorageError {
    fn from(e: ValidationError) -> Self {
        Self::Invalid(e)
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct RunPage {
    /// Matches before pagination.
    pub total: u64,
    /// Records in this page.
    pub count: usize,
    pub results: Vec<PipelineRun>,
    /// Sorted distinct pipeline names present in `results`.
    pub pipelines: Vec<String>,
}

/// Facade over the configured backend.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn PipelineStore>,
    max_limit: usize,
}

impl Repository {
    /// Open the backend described by `config`.
    pub fn open(config: StorageConfig, max_limit: usize) -> Result<Self, StorageError> {
        let store: Arc<dyn PipelineStore> = match config {
            StorageConfig::Jsonl { path } => Arc::new(JsonlStore::new(path)),
            StorageConfig::Sql {
                db_path,
                table,
                columns,
            } => Arc::new(SqlStore::open(db_path, &table, columns)?),
        };
        info!(backend = store.backend_name(), max_limit, "Repository opened");
        Ok(Self::new(store, max_limit))
    }

    pub fn new(store: Arc<dyn PipelineStore>, max_limit: usize) -> Self {
        Self { store, max_limit }
    }

    pub fn backend_name(&self) -> &'static str {
        self.store.backend_name()
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Filtered, paged query plus the total match count.
    pub fn query_runs(
        &self,
        filter: RunFilter,
        request: PageRequest,
    ) -> Result<RunPage, StorageError> {
        let filter = filter.normalized();
        filter.validate()?;
        let page = request.resolve(self.max_limit)?;

        let results = self.store.query(&filter, page)?;
        let total = self.store.count(&filter)?;
        let pipelines: BTreeSet<String> = results
            .iter()
            .filter_map(|run| run.pipeline_name.clone())
            .collect();

        debug!(
            backend = self.backend_name(),
            total,
            returned = results.len(),
            "Query complete"
        );

        Ok(RunPage {
            total,
            count: results.len(),
            results,
            pipelines: pipelines.into_iter().collect(),
        })
    }

    pub fn summarize(&self) -> Result<Vec<PipelineSummary>, StorageError> {
        self.store.summarize()
    }

    /// Normalize, validate and store `run`. Returns the stored form.
    pub fn insert(&self, run: PipelineRun) -> Result<PipelineRun, StorageError> {
        let run = run.normalized();
        run.validate().map_err(ValidationError::from)?;
        self.store.insert(&run)?;
        info!(date_code = %run.date_code, backend = self.backend_name(), "Pipeline run stored");
        Ok(run)
    }

    pub fn get_by_date_code(&self, date_code: &str) -> Result<Option<PipelineRun>, StorageError> {
        self.store.get_by_date_code(date_code)
    }
}
