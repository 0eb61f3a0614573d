//! Pipeline run records and their summary projection.
//!
//! A `PipelineRun` is one execution of an external batch/ETL/streaming job as
//! reported by the job itself. Records are immutable once stored; every value
//! handed back to callers is an owned copy.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Field names of a `PipelineRun`, in serialization order.
///
/// The relational backend uses this list to alias mapped columns back to field
/// names and to bind every field on insert.
pub const RUN_FIELDS: [&str; 16] = [
    "start_local",
    "end_local",
    "start_utc",
    "end_utc",
    "elapsed_seconds",
    "elapsed_human",
    "output_file",
    "rowcount",
    "log_file",
    "pid",
    "date_code",
    "archived_file",
    "pipeline_name",
    "script_name",
    "pipeline_type",
    "environment",
];

/// One execution of an external job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Start time, local wall clock.
    #[serde(with = "local_timestamp")]
    pub start_local: NaiveDateTime,
    /// End time, local wall clock.
    #[serde(with = "local_timestamp")]
    pub end_local: NaiveDateTime,
    /// Start time in UTC. Authoritative for filtering and sorting.
    #[serde(with = "utc_timestamp")]
    pub start_utc: DateTime<Utc>,
    /// End time in UTC.
    #[serde(with = "utc_timestamp")]
    pub end_utc: DateTime<Utc>,
    pub elapsed_seconds: f64,
    /// Display form of the duration (e.g. "22m 5s").
    pub elapsed_human: String,
    pub output_file: String,
    pub rowcount: i64,
    pub log_file: String,
    pub pid: i64,
    /// Identifier correlating the run with its output, log and archive files.
    pub date_code: String,
    /// Archived (possibly compressed) artifact. Absent on older records.
    #[serde(default)]
    pub archived_file: Option<String>,
    #[serde(default)]
    pub pipeline_name: Option<String>,
    #[serde(default)]
    pub script_name: Option<String>,
    /// Free text, usually batch / streaming / ml.
    #[serde(default)]
    pub pipeline_type: Option<String>,
    /// Free text, usually prod / dev / test.
    #[serde(default)]
    pub environment: Option<String>,
}

impl PipelineRun {
    /// Decode, normalize and validate a record from its JSON object form.
    ///
    /// Both storage backends funnel rows through here so a record means the
    /// same thing regardless of where it was read from.
    pub fn from_value(value: serde_json::Value) -> Result<Self, RecordError> {
        let run: PipelineRun =
            serde_json::from_value(value).map_err(|e| RecordError::Malformed(e.to_string()))?;
        let run = run.normalized();
        run.validate()?;
        Ok(run)
    }

    /// Trim optional text fields; empty strings become absent. UTC
    /// timestamps are cut to stored precision.
    pub fn normalized(mut self) -> Self {
        self.start_utc = stored_precision(self.start_utc);
        self.end_utc = stored_precision(self.end_utc);
        for field in [
            &mut self.archived_file,
            &mut self.pipeline_name,
            &mut self.script_name,
            &mut self.pipeline_type,
            &mut self.environment,
        ] {
            *field = field
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }
        self
    }

    pub fn validate(&self) -> Result<(), RecordError> {
        if self.date_code.trim().is_empty() {
            return Err(RecordError::EmptyDateCode);
        }
        if self.rowcount < 0 {
            return Err(RecordError::NegativeRowcount(self.rowcount));
        }
        if !self.elapsed_seconds.is_finite() || self.elapsed_seconds < 0.0 {
            return Err(RecordError::InvalidElapsed(self.elapsed_seconds));
        }
        if self.start_utc > self.end_utc {
            return Err(RecordError::EndBeforeStart {
                start_utc: self.start_utc,
                end_utc: self.end_utc,
            });
        }
        Ok(())
    }
}

/// Why a record was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    Malformed(String),
    EmptyDateCode,
    NegativeRowcount(i64),
    InvalidElapsed(f64),
    EndBeforeStart {
        start_utc: DateTime<Utc>,
        end_utc: DateTime<Utc>,
    },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed record: {}", e),
            Self::EmptyDateCode => write!(f, "date_code must not be empty"),
            Self::NegativeRowcount(n) => write!(f, "rowcount must be >= 0, got {}", n),
            Self::InvalidElapsed(v) => {
                write!(f, "elapsed_seconds must be a finite value >= 0, got {}", v)
            }
            Self::EndBeforeStart { start_utc, end_utc } => write!(
                f,
                "start_utc {} is after end_utc {}",
                format_utc(start_utc),
                format_utc(end_utc)
            ),
        }
    }
}

impl std::error::Error for RecordError {}

/// Per-pipeline statistics, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub pipeline_name: Option<String>,
    pub script_name: Option<String>,
    pub pipeline_type: Option<String>,
    pub environment: Option<String>,
    pub total_runs: u64,
    /// Latest `start_utc` in the group.
    #[serde(default, with = "optional_utc_timestamp")]
    pub last_run: Option<DateTime<Utc>>,
    /// Mean of positive `elapsed_seconds`, if any.
    pub avg_duration: Option<f64>,
    /// Mean of positive `rowcount`, if any.
    pub avg_rowcount: Option<f64>,
}

// ===== Timestamp handling =====

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

fn parse_with_offset(raw: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).ok().or_else(|| {
        OFFSET_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(raw, fmt).ok())
    })
}

/// Parse a UTC instant. Offset-aware input is converted; naive input is read as UTC.
pub fn parse_utc(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Some(dt) = parse_with_offset(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    parse_naive(raw)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .ok_or_else(|| format!("invalid UTC timestamp: {:?}", raw))
}

/// Parse a local wall-clock timestamp. An offset, if present, is dropped and
/// the wall-clock reading kept.
pub fn parse_local(raw: &str) -> Result<NaiveDateTime, String> {
    let raw = raw.trim();
    if let Some(naive) = parse_naive(raw) {
        return Ok(naive);
    }
    parse_with_offset(raw)
        .map(|dt| dt.naive_local())
        .ok_or_else(|| format!("invalid local timestamp: {:?}", raw))
}

/// ISO-8601 with a `Z` suffix, as written to the JSONL store and the API.
pub fn format_utc(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Fixed-width form stored in SQL columns so text order equals time order.
/// Truncate to whole microseconds, the finest precision either backend keeps.
pub fn stored_precision(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

pub fn format_sql_utc(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn format_local(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

mod utc_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_utc(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_utc(&raw).map_err(serde::de::Error::custom)
    }
}

mod optional_utc_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => s.serialize_str(&super::format_utc(dt)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_utc(&raw)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

mod local_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_local(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_local(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;

    /// A run starting `minutes` after 2025-08-08T12:00:00Z.
    pub fn run_at(date_code: &str, minutes: i64) -> PipelineRun {
        let start_utc = parse_utc("2025-08-08T12:00:00Z").unwrap() + Duration::minutes(minutes);
        let end_utc = start_utc + Duration::seconds(90);
        PipelineRun {
            start_local: start_utc.naive_utc() - Duration::hours(7),
            end_local: end_utc.naive_utc() - Duration::hours(7),
            start_utc,
            end_utc,
            elapsed_seconds: 90.0,
            elapsed_human: "1m 30s".to_string(),
            output_file: format!("/apps/data/pipeline/output-{}.data", date_code),
            rowcount: 100,
            log_file: format!("/apps/data/pipeline/logs/job-{}.log", date_code),
            pid: 4242,
            date_code: date_code.to_string(),
            archived_file: None,
            pipeline_name: Some("sales_etl".to_string()),
            script_name: Some("process_sales_data.py".to_string()),
            pipeline_type: Some("batch".to_string()),
            environment: Some("prod".to_string()),
        }
    }
}
