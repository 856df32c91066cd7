use std::collections::BTreeSet;

use serde::Serialize;

use crate::analyzers::bucket::Band;
use crate::table::{Cell, Column, RecordTable};

/// Shape and completeness of a loaded table.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub rows: usize,
    pub columns: usize,

    // distinct entities
    pub students: usize,
    pub courses: usize,
    pub teachers: usize,
    pub departments: usize,

    // score coverage
    pub scored: usize,
    pub unscored: usize,
    pub unbanded_ages: usize,

    /// Missing values per source column, in column order.
    pub missing: Vec<(Column, usize)>,
}

impl DatasetStats {
    pub fn from_table(table: &RecordTable) -> Self {
        let source: Vec<Column> = Column::ALL
            .iter()
            .copied()
            .filter(|c| !c.is_derived())
            .collect();

        let mut s = DatasetStats {
            rows: table.len(),
            columns: source.len(),
            ..Default::default()
        };

        let mut students = BTreeSet::new();
        let mut courses = BTreeSet::new();
        let mut teachers = BTreeSet::new();
        let mut departments = BTreeSet::new();

        for r in table.records() {
            students.insert(r.student_id.as_str());

            if let Some(c) = &r.course_code {
                courses.insert(c.as_str());
            }

            if let Some(t) = &r.teacher {
                teachers.insert(t.as_str());
            }

            if let Some(d) = &r.department {
                departments.insert(d.as_str());
            }

            if r.score.is_some_and(f64::is_finite) {
                s.scored += 1;
            } else {
                s.unscored += 1;
            }

            if table.age_band(r) == Band::Unbanded {
                s.unbanded_ages += 1;
            }
        }

        s.students = students.len();
        s.courses = courses.len();
        s.teachers = teachers.len();
        s.departments = departments.len();

        s.missing = source
            .into_iter()
            .map(|column| {
                let missing = table
                    .column(column)
                    .iter()
                    .filter(|cell| matches!(cell, Cell::Null))
                    .count();
                (column, missing)
            })
            .collect();

        s
    }

    pub fn pct(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            (part as f64 / total as f64) * 100.0
        }
    }

    pub fn scored_pct(&self) -> f64 {
        Self::pct(self.scored, self.rows)
    }

    /// Share of rows missing `column`; zero for derived or unknown columns.
    pub fn missing_pct(&self, column: Column) -> f64 {
        self.missing
            .iter()
            .find(|(c, _)| *c == column)
            .map_or(0.0, |(_, n)| Self::pct(*n, self.rows))
    }
}
