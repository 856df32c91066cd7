//! Request and result types shared by the grouping, ranking and query layers.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};

use crate::error::{QueryError, QueryResult};
use crate::table::{Column, KeyValue};

/// Statistic computed over one numeric column of a group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metric {
    Mean,
    Median,
    /// Sample standard deviation; null for groups with fewer than two values.
    StdDev,
    Min,
    Max,
    /// Rows in the group, nulls included.
    Count,
    /// Linear-interpolated quantile, `q` in `[0, 1]`.
    Quantile(f64),
    /// Percentage of non-null values at or above the pass mark.
    PassRate,
}

/// One requested output column: `name = metric(column)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub column: Column,
    pub metric: Metric,
}

impl MetricSpec {
    pub fn new(name: impl Into<String>, column: Column, metric: Metric) -> Self {
        Self {
            name: name.into(),
            column,
            metric,
        }
    }

    /// Shorthand for a metric over the score column.
    pub fn score(name: impl Into<String>, metric: Metric) -> Self {
        Self::new(name, Column::Score, metric)
    }

    /// The `describe` bundle: count, mean, std, min, quartiles and max.
    pub fn describe(column: Column) -> Vec<MetricSpec> {
        vec![
            MetricSpec::new("count", column, Metric::Count),
            MetricSpec::new("mean", column, Metric::Mean),
            MetricSpec::new("std", column, Metric::StdDev),
            MetricSpec::new("min", column, Metric::Min),
            MetricSpec::new("25%", column, Metric::Quantile(0.25)),
            MetricSpec::new("50%", column, Metric::Quantile(0.5)),
            MetricSpec::new("75%", column, Metric::Quantile(0.75)),
            MetricSpec::new("max", column, Metric::Max),
        ]
    }

    pub fn validate(&self) -> QueryResult<()> {
        if let Metric::Quantile(q) = self.metric {
            if !(0.0..=1.0).contains(&q) {
                return Err(QueryError::InvalidQuantile(q));
            }
        }
        if self.metric != Metric::Count && !self.column.is_numeric() {
            return Err(QueryError::NotNumeric(self.column));
        }
        Ok(())
    }
}

/// One group of the grouping engine's output.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub keys: Vec<(Column, KeyValue)>,
    pub metrics: Vec<(String, Option<f64>)>,
}

impl AggregateRow {
    pub fn key(&self, column: Column) -> Option<&KeyValue> {
        self.keys.iter().find(|(c, _)| *c == column).map(|(_, v)| v)
    }

    /// Value of the named metric; `None` when absent or undefined.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| *v)
    }
}

impl Serialize for AggregateRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.keys.len() + self.metrics.len()))?;
        for (column, value) in &self.keys {
            map.serialize_entry(column.name(), value)?;
        }
        for (name, value) in &self.metrics {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Leaderboard request.
#[derive(Debug, Clone, PartialEq)]
pub struct RankRequest {
    /// Columns identifying one ranked individual.
    pub entity: Vec<Column>,
    /// Column averaged per entity to produce the ranking score.
    pub average_over: Column,
    /// Ranks restart within each distinct tuple; empty means one global partition.
    pub partition_by: Vec<Column>,
    /// Rows (not ranks) kept per partition after sorting.
    pub limit_per_partition: Option<usize>,
}

impl RankRequest {
    pub fn new(entity: Vec<Column>, average_over: Column) -> Self {
        Self {
            entity,
            average_over,
            partition_by: Vec::new(),
            limit_per_partition: None,
        }
    }

    pub fn partitioned_by(mut self, columns: Vec<Column>) -> Self {
        self.partition_by = columns;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit_per_partition = limit;
        self
    }

    pub fn validate(&self) -> QueryResult<()> {
        if self.entity.is_empty() {
            return Err(QueryError::EmptyEntity);
        }
        if let Some(column) = self
            .entity
            .iter()
            .chain(&self.partition_by)
            .find(|c| !c.is_groupable())
        {
            return Err(QueryError::NotGroupable(*column));
        }
        if !self.average_over.is_numeric() {
            return Err(QueryError::NotNumeric(self.average_over));
        }
        if self.limit_per_partition == Some(0) {
            return Err(QueryError::ZeroLimit);
        }
        Ok(())
    }
}

/// One leaderboard entry: partition keys, entity keys, score and dense rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub partition: Vec<(Column, KeyValue)>,
    pub entity: Vec<(Column, KeyValue)>,
    pub score: f64,
    pub rank: usize,
}

impl RankedRow {
    pub fn key(&self, column: Column) -> Option<&KeyValue> {
        self.partition
            .iter()
            .chain(&self.entity)
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }
}

impl Serialize for RankedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map =
            serializer.serialize_map(Some(self.partition.len() + self.entity.len() + 2))?;
        map.serialize_entry("rank", &self.rank)?;
        for (column, value) in self.partition.iter().chain(&self.entity) {
            map.serialize_entry(column.name(), value)?;
        }
        map.serialize_entry("score", &self.score)?;
        map.end()
    }
}

/// Outcome of a query naming a specific entity that may not exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Lookup<T> {
    Found(T),
    NotFound { column: Column, value: String },
}

impl<T> Lookup<T> {
    pub fn not_found(column: Column, value: impl Into<String>) -> Self {
        Lookup::NotFound {
            column,
            value: value.into(),
        }
    }

    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound { column, value } => Lookup::NotFound { column, value },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Lookup::NotFound { .. })
    }
}

/// Per-student breakdown: identity, overall mean and per-course rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentDetail {
    pub student_id: String,
    pub last_name: String,
    pub first_name: String,
    pub gender: KeyValue,
    pub department: KeyValue,
    pub program: KeyValue,
    pub level: KeyValue,
    pub age: KeyValue,
    pub overall_mean: Option<f64>,
    pub grade_count: usize,
    pub courses: Vec<AggregateRow>,
}

/// Headline statistics of two tables side by side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub left: AggregateRow,
    pub right: AggregateRow,
}
