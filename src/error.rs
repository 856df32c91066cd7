//! Caller-input errors raised by the engine before any computation starts.

use thiserror::Error;

use crate::table::Column;

/// A malformed filter, grouping, metric or ranking request.
///
/// Each variant names the offending parameter so the caller can point at it.
/// Not-found lookups are not errors; see [`crate::analyzers::types::Lookup`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}' expects {expected} values, got '{found}'")]
    TypeMismatch {
        column: Column,
        expected: &'static str,
        found: String,
    },

    #[error("column '{0}' cannot be used as a group or filter key")]
    NotGroupable(Column),

    #[error("column '{0}' is not numeric")]
    NotNumeric(Column),

    #[error("quantile {0} is outside [0, 1]")]
    InvalidQuantile(f64),

    #[error("{labels} band labels given for {edges} edges (need one label per interval)")]
    BandShape { edges: usize, labels: usize },

    #[error("band edges must be finite and strictly ascending (edge {index})")]
    UnsortedEdges { index: usize },

    #[error("metric output name '{0}' is used twice")]
    DuplicateMetric(String),

    #[error("limit per partition must be at least 1")]
    ZeroLimit,

    #[error("ranking needs at least one entity column")]
    EmptyEntity,
}

pub type QueryResult<T> = Result<T, QueryError>;
