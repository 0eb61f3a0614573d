//! Filter predicate engine.
//!
//! A `RunFilter` is a conjunction of optional criteria. It compiles to a flat
//! list of `Predicate` triples so the in-memory path and the SQL path share a
//! single definition of what each criterion means.

use super::ValidationError;
use crate::models::{stored_precision, PipelineRun};
use chrono::{DateTime, Utc};

/// A filterable record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    StartUtc,
    EndUtc,
    Rowcount,
    PipelineName,
    ScriptName,
    PipelineType,
    Environment,
}

impl Field {
    /// Record field name, also the default column name.
    pub fn name(&self) -> &'static str {
        match self {
            Field::StartUtc => "start_utc",
            Field::EndUtc => "end_utc",
            Field::Rowcount => "rowcount",
            Field::PipelineName => "pipeline_name",
            Field::ScriptName => "script_name",
            Field::PipelineType => "pipeline_type",
            Field::Environment => "environment",
        }
    }

    fn value<'a>(&self, run: &'a PipelineRun) -> FieldValue<'a> {
        match self {
            Field::StartUtc => FieldValue::Timestamp(run.start_utc),
            Field::EndUtc => FieldValue::Timestamp(run.end_utc),
            Field::Rowcount => FieldValue::Integer(run.rowcount),
            Field::PipelineName => FieldValue::Text(run.pipeline_name.as_deref()),
            Field::ScriptName => FieldValue::Text(run.script_name.as_deref()),
            Field::PipelineType => FieldValue::Text(run.pipeline_type.as_deref()),
            Field::Environment => FieldValue::Text(run.environment.as_deref()),
        }
    }
}

enum FieldValue<'a> {
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Text(Option<&'a str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Gte,
    Lte,
    Eq,
}

impl Operator {
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Eq => "=",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Operator::Gte => "min",
            Operator::Lte => "max",
            Operator::Eq => "eq",
        }
    }

    fn holds<T: PartialOrd + ?Sized>(&self, value: &T, operand: &T) -> bool {
        match self {
            Operator::Gte => value >= operand,
            Operator::Lte => value <= operand,
            Operator::Eq => value == operand,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Timestamp(DateTime<Utc>),
    Integer(i64),
    Text(String),
}

/// One `field op operand` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub op: Operator,
    pub operand: Operand,
}

impl Predicate {
    /// In-memory evaluation. A null field never satisfies a comparison.
    pub fn matches(&self, run: &PipelineRun) -> bool {
        match (self.field.value(run), &self.operand) {
            (FieldValue::Timestamp(v), Operand::Timestamp(o)) => self.op.holds(&v, o),
            (FieldValue::Integer(v), Operand::Integer(o)) => self.op.holds(&v, o),
            (FieldValue::Text(Some(v)), Operand::Text(o)) => self.op.holds(v, o.as_str()),
            _ => false,
        }
    }

    /// Named bind parameter for this predicate, e.g. `:rowcount_min`.
    ///
    /// A filter produces at most one predicate per (field, operator) pair, so
    /// the names never collide within one statement.
    pub fn bind_name(&self) -> String {
        format!(":{}_{}", self.field.name(), self.op.suffix())
    }
}

/// Optional query criteria. Every present criterion must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFilter {
    /// Inclusive lower bound on `start_utc`.
    pub start_utc_min: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `end_utc`.
    pub end_utc_max: Option<DateTime<Utc>>,
    pub rowcount_min: Option<i64>,
    pub rowcount_max: Option<i64>,
    pub pipeline_name: Option<String>,
    pub script_name: Option<String>,
    pub pipeline_type: Option<String>,
    pub environment: Option<String>,
}

impl RunFilter {
    /// Drop empty string criteria so they behave as absent. Time bounds are
    /// cut to stored precision.
    pub fn normalized(mut self) -> Self {
        self.start_utc_min = self.start_utc_min.map(stored_precision);
        self.end_utc_max = self.end_utc_max.map(stored_precision);
        for criterion in [
            &mut self.pipeline_name,
            &mut self.script_name,
            &mut self.pipeline_type,
            &mut self.environment,
        ] {
            if criterion.as_deref().is_some_and(str::is_empty) {
                *criterion = None;
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(min), Some(max)) = (self.rowcount_min, self.rowcount_max) {
            if min > max {
                return Err(ValidationError::RowcountRange { min, max });
            }
        }
        Ok(())
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        if let Some(min) = self.start_utc_min {
            predicates.push(Predicate {
                field: Field::StartUtc,
                op: Operator::Gte,
                operand: Operand::Timestamp(stored_precision(min)),
            });
        }
        if let Some(max) = self.end_utc_max {
            predicates.push(Predicate {
                field: Field::EndUtc,
                op: Operator::Lte,
                operand: Operand::Timestamp(stored_precision(max)),
            });
        }
        if let Some(min) = self.rowcount_min {
            predicates.push(Predicate {
                field: Field::Rowcount,
                op: Operator::Gte,
                operand: Operand::Integer(min),
            });
        }
        if let Some(max) = self.rowcount_max {
            predicates.push(Predicate {
                field: Field::Rowcount,
                op: Operator::Lte,
                operand: Operand::Integer(max),
            });
        }

        let text_criteria = [
            (Field::PipelineName, &self.pipeline_name),
            (Field::ScriptName, &self.script_name),
            (Field::PipelineType, &self.pipeline_type),
            (Field::Environment, &self.environment),
        ];
        for (field, criterion) in text_criteria {
            if let Some(value) = criterion.as_deref().filter(|v| !v.is_empty()) {
                predicates.push(Predicate {
                    field,
                    op: Operator::Eq,
                    operand: Operand::Text(value.to_string()),
                });
            }
        }

        predicates
    }

    pub fn matches(&self, run: &PipelineRun) -> bool {
        self.predicates().iter().all(|p| p.matches(run))
    }
}
