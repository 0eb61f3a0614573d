//! Flat-file backend: one JSON object per line, append-only.
//!
//! Every operation re-reads the whole file. Lines that cannot be decoded are
//! logged and skipped so one bad writer never takes the store offline.

use super::inference::infer_pipeline_name;
use super::{PipelineStore, StorageError};
use crate::models::{PipelineRun, PipelineSummary, RecordError};
use crate::query::{summarize, Page, RunFilter};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonlStore {
    path: PathBuf,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every decodable record, in file order.
    pub fn read_all(&self) -> Result<Vec<PipelineRun>, StorageError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Data file does not exist");
                return Err(StorageError::NotFound("Data file not found".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        let mut skipped = 0usize;
        for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
            let line_num = idx + 1;
            let line = match std::str::from_utf8(raw) {
                Ok(line) => line.trim(),
                Err(e) => {
                    warn!(line = line_num, error = %e, "Skipping non-UTF-8 line");
                    skipped += 1;
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(run) => runs.push(run),
                Err(e) => {
                    warn!(line = line_num, error = %e, "Skipping invalid line");
                    skipped += 1;
                }
            }
        }

        debug!(
            path = %self.path.display(),
            records = runs.len(),
            skipped,
            "Read flat-file store"
        );
        Ok(runs)
    }
}

/// Decode one line, back-filling `pipeline_name` on records that predate it.
fn parse_line(line: &str) -> Result<PipelineRun, RecordError> {
    let mut value: Value =
        serde_json::from_str(line).map_err(|e| RecordError::Malformed(e.to_string()))?;

    if let Some(obj) = value.as_object_mut() {
        if !obj.contains_key("pipeline_name") {
            let name = infer_pipeline_name(
                obj.get("output_file").and_then(Value::as_str).unwrap_or_default(),
                obj.get("log_file").and_then(Value::as_str).unwrap_or_default(),
            );
            obj.insert("pipeline_name".to_string(), Value::String(name));
        }
    }

    PipelineRun::from_value(value)
}

impl PipelineStore for JsonlStore {
    fn backend_name(&self) -> &'static str {
        "jsonl"
    }

    fn query(&self, filter: &RunFilter, page: Page) -> Result<Vec<PipelineRun>, StorageError> {
        let mut matches: Vec<PipelineRun> = self
            .read_all()?
            .into_iter()
            .filter(|run| filter.matches(run))
            .collect();
        matches.sort_by(|a, b| {
            b.start_utc
                .cmp(&a.start_utc)
                .then_with(|| a.date_code.cmp(&b.date_code))
        });
        Ok(page.apply(matches))
    }

    fn count(&self, filter: &RunFilter) -> Result<u64, StorageError> {
        let runs = self.read_all()?;
        Ok(runs.iter().filter(|run| filter.matches(run)).count() as u64)
    }

    fn summarize(&self) -> Result<Vec<PipelineSummary>, StorageError> {
        Ok(summarize(&self.read_all()?))
    }

    fn insert(&self, run: &PipelineRun) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(run)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn get_by_date_code(&self, date_code: &str) -> Result<Option<PipelineRun>, StorageError> {
        Ok(self
            .read_all()?
            .into_iter()
            .find(|run| run.date_code == date_code))
    }
}
