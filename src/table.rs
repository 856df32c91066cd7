//! In-memory grade table and typed column access.
//!
//! A [`RecordTable`] is immutable once built: filtering returns a new table
//! and derived columns (age, age band) are computed from the record and the
//! table's reference date on every access, never stored.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::analyzers::bucket::{Band, Bands};
use crate::error::{QueryError, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Gender {
    pub fn code(&self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "M" | "m" => Some(Gender::Male),
            "F" | "f" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// One grade for one student in one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeRecord {
    pub student_id: String,
    pub last_name: String,
    pub first_name: String,
    pub gender: Option<Gender>,
    pub birth_date: Option<NaiveDate>,
    pub department: Option<String>,
    pub program: Option<String>,
    pub level: Option<String>,
    pub course_code: Option<String>,
    pub teacher: Option<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Date,
    Number,
}

impl ColumnKind {
    fn describe(&self) -> &'static str {
        match self {
            ColumnKind::Text => "text",
            ColumnKind::Integer => "integer",
            ColumnKind::Date => "date (YYYY-MM-DD)",
            ColumnKind::Number => "numeric",
        }
    }
}

/// Every column a query may name, source or derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    StudentId,
    LastName,
    FirstName,
    Gender,
    BirthDate,
    Department,
    Program,
    Level,
    CourseCode,
    Teacher,
    Score,
    Age,
    AgeBand,
}

impl Column {
    pub const ALL: [Column; 13] = [
        Column::StudentId,
        Column::LastName,
        Column::FirstName,
        Column::Gender,
        Column::BirthDate,
        Column::Department,
        Column::Program,
        Column::Level,
        Column::CourseCode,
        Column::Teacher,
        Column::Score,
        Column::Age,
        Column::AgeBand,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::StudentId => "student_id",
            Column::LastName => "last_name",
            Column::FirstName => "first_name",
            Column::Gender => "gender",
            Column::BirthDate => "birth_date",
            Column::Department => "department",
            Column::Program => "program",
            Column::Level => "level",
            Column::CourseCode => "course_code",
            Column::Teacher => "teacher",
            Column::Score => "score",
            Column::Age => "age",
            Column::AgeBand => "age_band",
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::BirthDate => ColumnKind::Date,
            Column::Score => ColumnKind::Number,
            Column::Age => ColumnKind::Integer,
            _ => ColumnKind::Text,
        }
    }

    /// Whether values of this column are derived rather than ingested.
    pub fn is_derived(&self) -> bool {
        matches!(self, Column::Age | Column::AgeBand)
    }

    /// Continuous columns cannot act as group or filter keys.
    pub fn is_groupable(&self) -> bool {
        self.kind() != ColumnKind::Number
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind(), ColumnKind::Number | ColumnKind::Integer)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = QueryError;

    fn from_str(s: &str) -> QueryResult<Self> {
        Column::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| QueryError::UnknownColumn(s.to_string()))
    }
}

/// A group-key value. Null sorts first and only ever equals itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum KeyValue {
    Null,
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

impl KeyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KeyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => Ok(()),
            KeyValue::Text(s) => f.write_str(s),
            KeyValue::Int(i) => write!(f, "{i}"),
            KeyValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<Option<&String>> for KeyValue {
    fn from(value: Option<&String>) -> Self {
        value.map_or(KeyValue::Null, |s| KeyValue::Text(s.clone()))
    }
}

/// Any single column value, including continuous numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Number(f64),
    Date(NaiveDate),
}

impl From<KeyValue> for Cell {
    fn from(value: KeyValue) -> Self {
        match value {
            KeyValue::Null => Cell::Null,
            KeyValue::Text(s) => Cell::Text(s),
            KeyValue::Int(i) => Cell::Int(i),
            KeyValue::Date(d) => Cell::Date(d),
        }
    }
}

impl From<Option<f64>> for Cell {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Cell::Null, Cell::Number)
    }
}

/// Row filter over typed columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Column equals value. A null cell never matches.
    Eq(Column, KeyValue),
    /// Every inner predicate holds. An empty list keeps every row.
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn equals(column: Column, value: impl Into<String>) -> Self {
        Predicate::Eq(column, KeyValue::Text(value.into()))
    }

    /// Builds an equality predicate from untyped input, validating the
    /// column name and coercing the value to the column's type.
    pub fn parse(column: &str, value: &str) -> QueryResult<Self> {
        let column: Column = column.parse()?;
        let mismatch = || QueryError::TypeMismatch {
            column,
            expected: column.kind().describe(),
            found: value.to_string(),
        };
        let key = match column.kind() {
            ColumnKind::Number => return Err(QueryError::NotGroupable(column)),
            ColumnKind::Integer => KeyValue::Int(value.trim().parse().map_err(|_| mismatch())?),
            ColumnKind::Date => KeyValue::Date(
                NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| mismatch())?,
            ),
            ColumnKind::Text if column == Column::Gender => match Gender::from_code(value) {
                Some(gender) => KeyValue::Text(gender.code().to_string()),
                None => return Err(gender_mismatch(value)),
            },
            ColumnKind::Text => KeyValue::Text(value.to_string()),
        };
        let predicate = Predicate::Eq(column, key);
        predicate.validate()?;
        Ok(predicate)
    }

    pub fn validate(&self) -> QueryResult<()> {
        match self {
            Predicate::Eq(column, value) => check_key_type(*column, value),
            Predicate::All(inner) => inner.iter().try_for_each(Predicate::validate),
        }
    }

    fn matches(&self, table: &RecordTable, record: &GradeRecord) -> bool {
        match self {
            Predicate::Eq(column, value) => {
                !value.is_null() && table.key_value(record, *column) == *value
            }
            Predicate::All(inner) => inner.iter().all(|p| p.matches(table, record)),
        }
    }
}

fn check_key_type(column: Column, value: &KeyValue) -> QueryResult<()> {
    let ok = match (column.kind(), value) {
        (ColumnKind::Number, _) => return Err(QueryError::NotGroupable(column)),
        (_, KeyValue::Null) => true,
        // stored gender keys are always the upper-case code
        (ColumnKind::Text, KeyValue::Text(s)) => {
            column != Column::Gender || Gender::from_code(s).is_some_and(|g| g.code() == s)
        }
        (ColumnKind::Integer, KeyValue::Int(_)) => true,
        (ColumnKind::Date, KeyValue::Date(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else if column == Column::Gender {
        Err(gender_mismatch(&value.to_string()))
    } else {
        Err(QueryError::TypeMismatch {
            column,
            expected: column.kind().describe(),
            found: value.to_string(),
        })
    }
}

fn gender_mismatch(found: &str) -> QueryError {
    QueryError::TypeMismatch {
        column: Column::Gender,
        expected: "M or F",
        found: found.to_string(),
    }
}

/// Whole years between `birth` and `reference`, counting a birthday on the
/// reference day as already reached.
pub fn age_at(birth: NaiveDate, reference: NaiveDate) -> i64 {
    let mut age = i64::from(reference.year() - birth.year());
    if (reference.month(), reference.day()) < (birth.month(), birth.day()) {
        age -= 1;
    }
    age
}

/// Ordered grade records plus the as-of date used for age derivation.
#[derive(Debug, Clone)]
pub struct RecordTable {
    records: Vec<GradeRecord>,
    reference_date: NaiveDate,
    age_bands: Bands,
}

impl RecordTable {
    pub fn new(records: Vec<GradeRecord>, reference_date: NaiveDate) -> Self {
        Self {
            records,
            reference_date,
            age_bands: Bands::age_default(),
        }
    }

    pub fn with_age_bands(mut self, age_bands: Bands) -> Self {
        self.age_bands = age_bands;
        self
    }

    pub fn records(&self) -> &[GradeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    pub fn age_bands(&self) -> &Bands {
        &self.age_bands
    }

    pub fn age(&self, record: &GradeRecord) -> Option<i64> {
        record.birth_date.map(|b| age_at(b, self.reference_date))
    }

    pub fn age_band(&self, record: &GradeRecord) -> Band<'_> {
        self.age_bands.place(self.age(record).map(|a| a as f64))
    }

    /// Whether `record` falls outside every age band while `keys` group or
    /// partition on [`Column::AgeBand`]. Such records are left out of
    /// band-keyed results.
    pub fn unbanded_for(&self, record: &GradeRecord, keys: &[Column]) -> bool {
        keys.contains(&Column::AgeBand) && self.age_band(record) == Band::Unbanded
    }

    /// Group-key value of a non-continuous column.
    pub fn key(&self, record: &GradeRecord, column: Column) -> QueryResult<KeyValue> {
        if !column.is_groupable() {
            return Err(QueryError::NotGroupable(column));
        }
        Ok(self.key_value(record, column))
    }

    /// Callers validate `column` as groupable first.
    pub(crate) fn key_value(&self, record: &GradeRecord, column: Column) -> KeyValue {
        match column {
            Column::StudentId => KeyValue::Text(record.student_id.clone()),
            Column::LastName => KeyValue::Text(record.last_name.clone()),
            Column::FirstName => KeyValue::Text(record.first_name.clone()),
            Column::Gender => record
                .gender
                .map_or(KeyValue::Null, |g| KeyValue::Text(g.code().to_string())),
            Column::BirthDate => record.birth_date.map_or(KeyValue::Null, KeyValue::Date),
            Column::Department => record.department.as_ref().into(),
            Column::Program => record.program.as_ref().into(),
            Column::Level => record.level.as_ref().into(),
            Column::CourseCode => record.course_code.as_ref().into(),
            Column::Teacher => record.teacher.as_ref().into(),
            Column::Age => self.age(record).map_or(KeyValue::Null, KeyValue::Int),
            Column::AgeBand => KeyValue::Text(self.age_band(record).label().to_string()),
            Column::Score => KeyValue::Null,
        }
    }

    /// Numeric value of `column` for `record`; null when missing.
    pub fn number(&self, record: &GradeRecord, column: Column) -> QueryResult<Option<f64>> {
        match column {
            Column::Score => Ok(record.score.filter(|s| s.is_finite())),
            Column::Age => Ok(self.age(record).map(|a| a as f64)),
            other => Err(QueryError::NotNumeric(other)),
        }
    }

    pub fn cell(&self, record: &GradeRecord, column: Column) -> Cell {
        match column {
            Column::Score => record.score.filter(|s| s.is_finite()).into(),
            other => self.key_value(record, other).into(),
        }
    }

    /// All values of `column` in record order.
    pub fn column(&self, column: Column) -> Vec<Cell> {
        self.records.iter().map(|r| self.cell(r, column)).collect()
    }

    pub fn filter(&self, predicate: &Predicate) -> QueryResult<RecordTable> {
        predicate.validate()?;
        Ok(self.select(|r| predicate.matches(self, r)))
    }

    /// Copy of the table keeping the records for which `keep` holds.
    pub fn select(&self, keep: impl Fn(&GradeRecord) -> bool) -> RecordTable {
        RecordTable {
            records: self.records.iter().filter(|r| keep(r)).cloned().collect(),
            reference_date: self.reference_date,
            age_bands: self.age_bands.clone(),
        }
    }

    /// Sorted distinct non-null values of a key column.
    pub fn distinct_values(&self, column: Column) -> QueryResult<Vec<String>> {
        if !column.is_groupable() {
            return Err(QueryError::NotGroupable(column));
        }
        let values: BTreeSet<KeyValue> = self
            .records
            .iter()
            .map(|r| self.key_value(r, column))
            .filter(|v| !v.is_null())
            .collect();
        Ok(values.into_iter().map(|v| v.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_counts_birthday_on_reference_day() {
        let reference = date(2025, 9, 1);
        assert_eq!(age_at(date(2005, 9, 1), reference), 20);
        assert_eq!(age_at(date(2005, 9, 2), reference), 19);
        assert_eq!(age_at(date(2005, 8, 31), reference), 20);
    }

    #[test]
    fn test_age_follows_reference_date() {
        let rec = record("S1", Some("INFO"), Some(12.0));
        let early = RecordTable::new(vec![rec.clone()], date(2024, 1, 1));
        let late = RecordTable::new(vec![rec], date(2026, 1, 1));
        assert_eq!(early.age(&early.records()[0]), Some(18));
        assert_eq!(late.age(&late.records()[0]), Some(20));
    }

    #[test]
    fn test_column_names_round_trip_and_unknown_rejected() {
        for column in Column::ALL {
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert_eq!(
            "moyenne".parse::<Column>().unwrap_err(),
            QueryError::UnknownColumn("moyenne".to_string())
        );
    }

    #[test]
    fn test_filter_is_pure() {
        let table = sample_table();
        let filtered = table
            .filter(&Predicate::equals(Column::Department, "INFO"))
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_null_never_matches_equality() {
        let table = sample_table();
        let filtered = table
            .filter(&Predicate::Eq(Column::Department, KeyValue::Null))
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_filter_rejects_wrong_types() {
        let table = sample_table();
        let err = table
            .filter(&Predicate::Eq(Column::Age, KeyValue::from("old")))
            .unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { column: Column::Age, .. }));

        assert_eq!(
            Predicate::parse("score", "12").unwrap_err(),
            QueryError::NotGroupable(Column::Score)
        );
        assert!(matches!(
            Predicate::parse("gender", "X").unwrap_err(),
            QueryError::TypeMismatch { column: Column::Gender, .. }
        ));
        assert!(matches!(
            Predicate::parse("age", "abc").unwrap_err(),
            QueryError::TypeMismatch { column: Column::Age, .. }
        ));
    }

    #[test]
    fn test_gender_filter_accepts_lowercase_input() {
        let table = sample_table();
        let predicate = Predicate::parse("gender", "f").unwrap();
        assert_eq!(
            predicate,
            Predicate::Eq(Column::Gender, KeyValue::from("F"))
        );
        assert_eq!(table.filter(&predicate).unwrap().len(), 4);
        assert!(table
            .filter(&Predicate::parse("gender", "m").unwrap())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_gender_predicate_must_use_stored_code() {
        let err = sample_table()
            .filter(&Predicate::equals(Column::Gender, "f"))
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::TypeMismatch {
                column: Column::Gender,
                expected: "M or F",
                found: "f".to_string(),
            }
        );
    }

    #[test]
    fn test_unbanded_only_matters_for_band_keys() {
        let mut records = vec![record("S1", Some("INFO"), Some(12.0))];
        records.push(GradeRecord {
            birth_date: None,
            ..record("S2", Some("INFO"), Some(9.0))
        });
        let table = RecordTable::new(records, date(2025, 9, 1));
        let (banded, unbanded) = (&table.records()[0], &table.records()[1]);

        assert!(!table.unbanded_for(banded, &[Column::AgeBand]));
        assert!(table.unbanded_for(unbanded, &[Column::Gender, Column::AgeBand]));
        assert!(!table.unbanded_for(unbanded, &[Column::Department]));
    }

    #[test]
    fn test_parse_predicate_coerces_integer() {
        let table = sample_table();
        let filtered = table.filter(&Predicate::parse("age", "20").unwrap()).unwrap();
        assert_eq!(filtered.len(), 4);
    }

    #[test]
    fn test_distinct_values_sorted_without_nulls() {
        let table = sample_table();
        assert_eq!(
            table.distinct_values(Column::Department).unwrap(),
            vec!["GC".to_string(), "INFO".to_string()]
        );
        assert_eq!(
            table.distinct_values(Column::Score).unwrap_err(),
            QueryError::NotGroupable(Column::Score)
        );
    }

    #[test]
    fn test_column_accessor_reports_nulls() {
        let table = sample_table();
        let scores = table.column(Column::Score);
        assert_eq!(scores[0], Cell::Number(12.0));
        assert_eq!(scores[3], Cell::Null);
        assert_eq!(table.column(Column::AgeBand)[0], Cell::Text("18-20".into()));
    }

    #[test]
    fn test_number_only_for_numeric_columns() {
        let table = sample_table();
        let rec = &table.records()[0];
        assert_eq!(table.number(rec, Column::Score).unwrap(), Some(12.0));
        assert_eq!(table.number(rec, Column::Age).unwrap(), Some(20.0));
        assert_eq!(
            table.number(rec, Column::Teacher).unwrap_err(),
            QueryError::NotNumeric(Column::Teacher)
        );
    }

    // Helper functions for tests
    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(id: &str, department: Option<&str>, score: Option<f64>) -> GradeRecord {
        GradeRecord {
            student_id: id.to_string(),
            last_name: format!("Last{id}"),
            first_name: format!("First{id}"),
            gender: Some(Gender::Female),
            birth_date: Some(date(2005, 3, 14)),
            department: department.map(String::from),
            program: Some("GL".to_string()),
            level: Some("L1".to_string()),
            course_code: Some("UE101".to_string()),
            teacher: Some("M. ADJOVI".to_string()),
            score,
        }
    }

    fn sample_table() -> RecordTable {
        RecordTable::new(
            vec![
                record("S1", Some("INFO"), Some(12.0)),
                record("S2", Some("INFO"), Some(8.0)),
                record("S3", Some("GC"), Some(15.0)),
                record("S4", None, None),
            ],
            date(2025, 9, 1),
        )
    }
}
