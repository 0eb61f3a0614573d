//! Backend-independent query semantics.
//!
//! Filtering, pagination and per-pipeline aggregation are defined here once.
//! The flat-file backend evaluates them in memory; the relational backend
//! compiles the same predicates and page bounds into SQL.

pub mod aggregate;
pub mod filter;
pub mod page;

pub use aggregate::summarize;
pub use filter::{Field, Operand, Operator, Predicate, RunFilter};
pub use page::{Page, PageRequest, DEFAULT_LIMIT, DEFAULT_MAX_LIMIT};

use crate::models::RecordError;

/// Malformed caller input. The operation is not attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    LimitOutOfRange { limit: i64, max: usize },
    NegativeOffset(i64),
    RowcountRange { min: i64, max: i64 },
    Record(RecordError),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitOutOfRange { limit, max } => {
                write!(f, "limit must be between 1 and {}, got {}", max, limit)
            }
            Self::NegativeOffset(offset) => write!(f, "offset must be >= 0, got {}", offset),
            Self::RowcountRange { min, max } => write!(
                f,
                "min_rowcount ({}) must not exceed max_rowcount ({})",
                min, max
            ),
            Self::Record(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<RecordError> for ValidationError {
    fn from(e: RecordError) -> Self {
        ValidationError::Record(e)
    }
}
