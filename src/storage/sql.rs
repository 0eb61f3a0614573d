//! Relational backend on SQLite.
//!
//! Table and column names come from configuration and are checked as plain
//! identifiers once, at construction. Every caller-supplied value travels as
//! a named bind parameter.
//!
//! UTC timestamps are stored as fixed-width `YYYY-MM-DDTHH:MM:SS.ffffffZ`
//! text, so comparing and ordering the column as text matches comparing the
//! instants.

use super::{PipelineStore, StorageError};
use crate::models::{
    format_local, format_sql_utc, PipelineRun, PipelineSummary, RUN_FIELDS,
};
use crate::query::{Operand, Page, RunFilter};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, ToSql};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Table creation script applied by `create_schema` and the migration binary.
pub const CREATE_SCRIPT: &str = include_str!("../../sql/create_pipeline_runs.sql");

/// Default table name.
pub const DEFAULT_TABLE: &str = "PIPELINE_RUNS";

const ROW_NUMBER_COLUMN: &str = "rnum";

type Binds = Vec<(String, Box<dyn ToSql>)>;

/// True for a plain, unquoted SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 128 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Field → column mapping. Unmapped fields use their own name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: HashMap<String, String>,
}

impl ColumnMap {
    pub fn new(columns: HashMap<String, String>) -> Result<Self, StorageError> {
        for (field, column) in &columns {
            if !RUN_FIELDS.contains(&field.as_str()) {
                return Err(StorageError::Config(format!(
                    "column map names unknown field {:?}",
                    field
                )));
            }
            if !is_identifier(column) {
                return Err(StorageError::Config(format!(
                    "column {:?} for field {} is not a valid identifier",
                    column, field
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Parse a JSON object of `{"field": "COLUMN"}` pairs.
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        let columns: HashMap<String, String> = serde_json::from_str(raw)
            .map_err(|e| StorageError::Config(format!("column map is not a JSON object of strings: {}", e)))?;
        Self::new(columns)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.get(field).map(String::as_str).unwrap_or(field)
    }
}

/// Split a script into executable statements, dropping comment-only chunks.
pub fn script_statements(script: &str) -> Vec<&str> {
    script
        .split(';')
        .map(str::trim)
        .filter(|stmt| {
            stmt.lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with("--"))
        })
        .collect()
}

pub struct SqlStore {
    db_path: PathBuf,
    table: String,
    columns: ColumnMap,
}

impl SqlStore {
    /// Open an existing database. Fails if it cannot be reached.
    pub fn open(
        db_path: impl Into<PathBuf>,
        table: &str,
        columns: ColumnMap,
    ) -> Result<Self, StorageError> {
        if !is_identifier(table) {
            return Err(StorageError::Config(format!(
                "table name {:?} is not a valid identifier",
                table
            )));
        }
        let store = Self {
            db_path: db_path.into(),
            table: table.to_string(),
            columns,
        };

        let conn = store.connect()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;

        info!(
            db_path = %store.db_path.display(),
            table = %store.table,
            mapped_columns = store.columns.columns.len(),
            "SQL store opened"
        );
        Ok(store)
    }

    /// Apply the creation script in one transaction, creating the database
    /// file if needed. Returns the number of statements executed.
    pub fn create_schema(db_path: &Path) -> Result<usize, StorageError> {
        let mut conn = Connection::open(db_path)?;
        let statements = script_statements(CREATE_SCRIPT);
        let tx = conn.transaction()?;
        for (i, stmt) in statements.iter().enumerate() {
            debug!(statement = i + 1, total = statements.len(), "Executing schema statement");
            tx.execute(stmt, [])?;
        }
        tx.commit()?;
        Ok(statements.len())
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        Ok(Connection::open_with_flags(&self.db_path, flags)?)
    }

    fn col<'a>(&'a self, field: &'a str) -> &'a str {
        self.columns.column(field)
    }

    fn select_list(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        RUN_FIELDS
            .iter()
            .map(|field| format!("{} AS {}", self.col(field), field))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `WHERE` fragment with one named bind per predicate.
    fn where_clause(&self, filter: &RunFilter) -> (String, Binds) {
        let mut sql = String::from("WHERE 1=1");
        let mut binds: Binds = Vec::new();

        for predicate in filter.predicates() {
            let name = predicate.bind_name();
            sql.push_str(&format!(
                " AND {} {} {}",
                self.col(predicate.field.name()),
                predicate.op.sql(),
                name
            ));
            let value: Box<dyn ToSql> = match predicate.operand {
                Operand::Timestamp(ts) => Box::new(format_sql_utc(&ts)),
                Operand::Integer(n) => Box::new(n),
                Operand::Text(s) => Box::new(s),
            };
            binds.push((name, value));
        }

        (sql, binds)
    }

    fn fetch_runs(&self, sql: &str, binds: &Binds) -> Result<Vec<PipelineRun>, StorageError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let params = named_params(binds);
        let rows = stmt.query_map(params.as_slice(), |row| row_to_object(row, &names))?;

        let mut runs = Vec::new();
        for row in rows {
            let object = row?;
            let run = PipelineRun::from_value(Value::Object(object))
                .map_err(|e| StorageError::Decode(e.to_string()))?;
            runs.push(run);
        }
        Ok(runs)
    }
}

fn named_params(binds: &Binds) -> Vec<(&str, &dyn ToSql)> {
    binds
        .iter()
        .map(|(name, value)| (name.as_str(), &**value))
        .collect()
}

/// Column name → JSON value for every column except the row number.
fn row_to_object(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Map<String, Value>> {
    let mut object = Map::new();
    for (idx, name) in names.iter().enumerate() {
        if name == ROW_NUMBER_COLUMN {
            continue;
        }
        let value = match row.get_ref(idx)? {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(_) => {
                return Err(rusqlite::Error::InvalidColumnType(
                    idx,
                    name.clone(),
                    rusqlite::types::Type::Blob,
                ))
            }
        };
        object.insert(name.clone(), value);
    }
    Ok(object)
}

fn insert_binds(run: &PipelineRun) -> Binds {
    let values: [Box<dyn ToSql>; 16] = [
        Box::new(format_local(&run.start_local)),
        Box::new(format_local(&run.end_local)),
        Box::new(format_sql_utc(&run.start_utc)),
        Box::new(format_sql_utc(&run.end_utc)),
        Box::new(run.elapsed_seconds),
        Box::new(run.elapsed_human.clone()),
        Box::new(run.output_file.clone()),
        Box::new(run.rowcount),
        Box::new(run.log_file.clone()),
        Box::new(run.pid),
        Box::new(run.date_code.clone()),
        Box::new(run.archived_file.clone()),
        Box::new(run.pipeline_name.clone()),
        Box::new(run.script_name.clone()),
        Box::new(run.pipeline_type.clone()),
        Box::new(run.environment.clone()),
    ];
    RUN_FIELDS
        .iter()
        .zip(values)
        .map(|(field, value)| (format!(":{}", field), value))
        .collect()
}

impl PipelineStore for SqlStore {
    fn backend_name(&self) -> &'static str {
        "sql"
    }

    fn query(&self, filter: &RunFilter, page: Page) -> Result<Vec<PipelineRun>, StorageError> {
        let (where_sql, mut binds) = self.where_clause(filter);
        let (first_row, last_row) = page.row_bounds();

        let window = match last_row {
            Some(last_row) => {
                binds.push((":max_row".to_string(), Box::new(last_row)));
                format!("{} BETWEEN :min_row AND :max_row", ROW_NUMBER_COLUMN)
            }
            None => format!("{} >= :min_row", ROW_NUMBER_COLUMN),
        };
        binds.push((":min_row".to_string(), Box::new(first_row)));

        // Ordering refers to aliased field names, filtering to mapped columns.
        let sql = format!(
            "SELECT * FROM (
                SELECT q.*, ROW_NUMBER() OVER (ORDER BY q.start_utc DESC, q.date_code ASC) AS {rnum}
                FROM (SELECT {select} FROM {table} {where_sql}) q
            ) WHERE {window} ORDER BY {rnum}",
            rnum = ROW_NUMBER_COLUMN,
            select = self.select_list(),
            table = self.table,
        );
        debug!(sql = %sql, binds = binds.len(), "SQL query");

        self.fetch_runs(&sql, &binds)
    }

    fn count(&self, filter: &RunFilter) -> Result<u64, StorageError> {
        let (where_sql, binds) = self.where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM {} {}", self.table, where_sql);

        let conn = self.connect()?;
        let params = named_params(&binds);
        let count: i64 = conn.query_row(&sql, params.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    fn summarize(&self) -> Result<Vec<PipelineSummary>, StorageError> {
        let (pn, sn, pt, env) = (
            self.col("pipeline_name"),
            self.col("script_name"),
            self.col("pipeline_type"),
            self.col("environment"),
        );
        let (elapsed, rowcount) = (self.col("elapsed_seconds"), self.col("rowcount"));
        let sql = format!(
            "SELECT {pn} AS pipeline_name, {sn} AS script_name,
                    {pt} AS pipeline_type, {env} AS environment,
                    COUNT(*) AS total_runs,
                    MAX({start}) AS last_run,
                    AVG(CASE WHEN {elapsed} > 0 THEN {elapsed} END) AS avg_duration,
                    AVG(CASE WHEN {rowcount} > 0 THEN {rowcount} END) AS avg_rowcount
             FROM {table}
             GROUP BY {pn}, {sn}, {pt}, {env}
             ORDER BY MAX({start}) IS NULL, MAX({start}) DESC",
            start = self.col("start_utc"),
            table = self.table,
        );

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map([], |row| row_to_object(row, &names))?;

        let mut summaries = Vec::new();
        for row in rows {
            let summary: PipelineSummary = serde_json::from_value(Value::Object(row?))
                .map_err(|e| StorageError::Decode(e.to_string()))?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn insert(&self, run: &PipelineRun) -> Result<(), StorageError> {
        let binds = insert_binds(run);
        let columns: Vec<&str> = RUN_FIELDS.iter().map(|field| self.col(field)).collect();
        let placeholders: Vec<&str> = binds.iter().map(|(name, _)| name.as_str()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            columns.join(", "),
            placeholders.join(", ")
        );

        let conn = self.connect()?;
        let params = named_params(&binds);
        conn.execute(&sql, params.as_slice())?;
        Ok(())
    }

    fn get_by_date_code(&self, date_code: &str) -> Result<Option<PipelineRun>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = :date_code LIMIT 1",
            self.select_list(),
            self.table,
            self.col("date_code")
        );
        let binds: Binds = vec![(
            ":date_code".to_string(),
            Box::new(date_code.to_string()) as Box<dyn ToSql>,
        )];
        Ok(self.fetch_runs(&sql, &binds)?.into_iter().next())
    }
}
