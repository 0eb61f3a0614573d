//! Pipeline Info Library
//!
//! Query, aggregation and artifact delivery over pipeline run records, with
//! interchangeable flat-file and SQLite storage. The HTTP server binary and
//! the integration tests both build on these modules.

pub mod api;
pub mod artifact;
pub mod config;
pub mod middleware;
pub mod models;
pub mod query;
pub mod storage;
