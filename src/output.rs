//! Rendering of query results as JSON or CSV.
//!
//! This is the only place numbers are rounded: every floating-point value
//! leaves with two decimals. Engine results stay at full precision.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use serde_json::{Number, Value};
use tracing::debug;

use crate::analyzers::types::{AggregateRow, RankedRow};
use crate::stats::DatasetStats;
use crate::table::Cell;

/// Decimal places kept in rendered output.
const DECIMALS: i32 = 2;

pub fn round2(value: f64) -> f64 {
    let factor = 10f64.powi(DECIMALS);
    (value * factor).round() / factor
}

/// A result row that can be flattened into named cells.
pub trait Tabular {
    fn cells(&self) -> Vec<(String, Cell)>;
}

impl Tabular for AggregateRow {
    fn cells(&self) -> Vec<(String, Cell)> {
        self.keys
            .iter()
            .map(|(column, value)| (column.name().to_string(), Cell::from(value.clone())))
            .chain(
                self.metrics
                    .iter()
                    .map(|(name, value)| (name.clone(), Cell::from(*value))),
            )
            .collect()
    }
}

impl Tabular for RankedRow {
    fn cells(&self) -> Vec<(String, Cell)> {
        let mut cells = vec![("rank".to_string(), Cell::Int(self.rank as i64))];
        cells.extend(
            self.partition
                .iter()
                .chain(&self.entity)
                .map(|(column, value)| (column.name().to_string(), Cell::from(value.clone()))),
        );
        cells.push(("score".to_string(), Cell::Number(self.score)));
        cells
    }
}

impl Tabular for DatasetStats {
    fn cells(&self) -> Vec<(String, Cell)> {
        let count = |name: &str, n: usize| (name.to_string(), Cell::Int(n as i64));
        let mut cells = vec![
            count("rows", self.rows),
            count("columns", self.columns),
            count("students", self.students),
            count("courses", self.courses),
            count("teachers", self.teachers),
            count("departments", self.departments),
            count("scored", self.scored),
            count("unscored", self.unscored),
            ("scored_pct".to_string(), Cell::Number(self.scored_pct())),
            count("unbanded_ages", self.unbanded_ages),
        ];
        cells.extend(
            self.missing
                .iter()
                .map(|(column, n)| count(&format!("missing_{column}"), *n)),
        );
        cells
    }
}

/// A row tagged with the dataset it came from.
pub struct Labelled<'a, T> {
    pub label: &'a str,
    pub row: &'a T,
}

impl<T: Tabular> Tabular for Labelled<'_, T> {
    fn cells(&self) -> Vec<(String, Cell)> {
        let mut cells = vec![("dataset".to_string(), Cell::Text(self.label.to_string()))];
        cells.extend(self.row.cells());
        cells
    }
}

fn cell_text(cell: &Cell) -> String {
    match cell {
        Cell::Null => String::new(),
        Cell::Text(s) => s.clone(),
        Cell::Int(i) => i.to_string(),
        Cell::Number(v) => round2(*v).to_string(),
        Cell::Date(d) => d.format("%Y-%m-%d").to_string(),
    }
}

fn round_floats(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .and_then(|v| Number::from_f64(round2(v)))
            .map_or(Value::Null, Value::Number),
        Value::Array(items) => Value::Array(items.into_iter().map(round_floats).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| (key, round_floats(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Pretty JSON with every float rounded. Undefined metrics render as `null`.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = round_floats(serde_json::to_value(value)?);
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Writes rows as CSV with a header taken from the first row.
///
/// Undefined metrics become empty cells. An empty slice writes nothing.
pub fn write_csv<W: Write, T: Tabular>(writer: W, rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_writer(writer);

    if let Some(first) = rows.first() {
        writer.write_record(first.cells().iter().map(|(name, _)| name))?;
    }
    for row in rows {
        writer.write_record(row.cells().iter().map(|(_, cell)| cell_text(cell)))?;
    }

    writer.flush()?;
    Ok(())
}

pub fn render_csv<T: Tabular>(rows: &[T]) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(&mut buffer, rows)?;
    Ok(String::from_utf8(buffer)?)
}

/// Writes `rows` to a CSV file at `path`, creating parent directories.
pub fn write_csv_file<T: Tabular>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!(path = %path.display(), rows = rows.len(), "Writing CSV");
    write_csv(File::create(path)?, rows)
}

/// Sends rendered output to `path`, or stdout when no path is given.
pub fn emit(rendered: &str, path: Option<&str>) -> Result<()> {
    match path {
        Some(path) => {
            fs::write(path, rendered)?;
            debug!(path, bytes = rendered.len(), "Wrote output");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{rendered}")?;
        }
    }
    Ok(())
}
