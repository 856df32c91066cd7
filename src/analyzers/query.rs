//! Named queries: each one a filter followed by a grouping or ranking call.
//!
//! Queries that name a specific entity (a teacher, a course, a student, a
//! department) return [`Lookup::NotFound`] when nothing matches, so callers
//! can tell "no such key" apart from an empty-but-valid result.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzers::aggregate::aggregate;
use crate::analyzers::rank::{rank, top_n};
use crate::analyzers::types::{
    AggregateRow, Comparison, Lookup, Metric, MetricSpec, RankRequest, RankedRow, StudentDetail,
};
use crate::error::QueryResult;
use crate::table::{Column, KeyValue, Predicate, RecordTable};

/// Columns identifying a student on leaderboards scoped to one partition.
const STUDENT: [Column; 3] = [Column::StudentId, Column::LastName, Column::FirstName];

/// Columns identifying a student on the general leaderboard.
const STUDENT_WITH_PROGRAM: [Column; 6] = [
    Column::StudentId,
    Column::LastName,
    Column::FirstName,
    Column::Department,
    Column::Program,
    Column::Level,
];

/// Optional equality filters applied before any query, as a dashboard's
/// sidebar would.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub department: Option<String>,
    pub program: Option<String>,
    pub level: Option<String>,
    pub teacher: Option<String>,
}

impl Scope {
    pub fn is_empty(&self) -> bool {
        self.predicates().is_empty()
    }

    fn predicates(&self) -> Vec<Predicate> {
        [
            (Column::Department, &self.department),
            (Column::Program, &self.program),
            (Column::Level, &self.level),
            (Column::Teacher, &self.teacher),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.as_ref().map(|v| Predicate::equals(column, v.clone())))
        .collect()
    }

    pub fn apply(&self, table: &RecordTable) -> QueryResult<RecordTable> {
        if self.is_empty() {
            return Ok(table.clone());
        }
        let scoped = table.filter(&Predicate::All(self.predicates()))?;
        debug!(before = table.len(), after = scoped.len(), "Scope applied");
        Ok(scoped)
    }
}

fn score_metrics(metrics: &[(&str, Metric)]) -> Vec<MetricSpec> {
    metrics
        .iter()
        .map(|(name, metric)| MetricSpec::score(*name, *metric))
        .collect()
}

/// Rows of `table` where `column == value`, or `None` when nothing matches.
fn restrict(table: &RecordTable, column: Column, value: &str) -> QueryResult<Option<RecordTable>> {
    let subset = table.filter(&Predicate::equals(column, value))?;
    Ok((!subset.is_empty()).then_some(subset))
}

fn single(rows: Vec<AggregateRow>) -> AggregateRow {
    rows.into_iter().next().unwrap_or(AggregateRow {
        keys: Vec::new(),
        metrics: Vec::new(),
    })
}

/// Mean, median, stddev, min, max, Q1, Q3 and pass rate over every score.
pub fn global_stats(table: &RecordTable) -> QueryResult<AggregateRow> {
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("median", Metric::Median),
        ("stddev", Metric::StdDev),
        ("min", Metric::Min),
        ("max", Metric::Max),
        ("q1", Metric::Quantile(0.25)),
        ("q3", Metric::Quantile(0.75)),
        ("pass_rate", Metric::PassRate),
    ]);
    aggregate(table, &[], &metrics).map(single)
}

pub fn department_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("median", Metric::Median),
        ("stddev", Metric::StdDev),
        ("pass_rate", Metric::PassRate),
    ]);
    aggregate(table, &[Column::Department], &metrics)
}

/// Mean score per (department, program, level).
pub fn program_level_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    aggregate(
        table,
        &[Column::Department, Column::Program, Column::Level],
        &score_metrics(&[("mean", Metric::Mean)]),
    )
}

/// Statistics over every grade given by one teacher.
pub fn teacher_stats(table: &RecordTable, teacher: &str) -> QueryResult<Lookup<AggregateRow>> {
    let Some(subset) = restrict(table, Column::Teacher, teacher)? else {
        return Ok(Lookup::not_found(Column::Teacher, teacher));
    };
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("stddev", Metric::StdDev),
        ("pass_rate", Metric::PassRate),
        ("count", Metric::Count),
    ]);
    aggregate(&subset, &[], &metrics).map(|rows| Lookup::Found(single(rows)))
}

/// Per-course statistics, for every course or only `course`.
pub fn course_stats(
    table: &RecordTable,
    course: Option<&str>,
) -> QueryResult<Lookup<Vec<AggregateRow>>> {
    let subset = match course {
        Some(code) => match restrict(table, Column::CourseCode, code)? {
            Some(subset) => subset,
            None => return Ok(Lookup::not_found(Column::CourseCode, code)),
        },
        None => table.clone(),
    };
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("median", Metric::Median),
        ("stddev", Metric::StdDev),
        ("min", Metric::Min),
        ("max", Metric::Max),
        ("pass_rate", Metric::PassRate),
        ("count", Metric::Count),
    ]);
    aggregate(&subset, &[Column::CourseCode], &metrics).map(Lookup::Found)
}

/// Mean, stddev and pass rate per (course, teacher) pair.
pub fn course_teacher_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("stddev", Metric::StdDev),
        ("pass_rate", Metric::PassRate),
    ]);
    aggregate(table, &[Column::CourseCode, Column::Teacher], &metrics)
}

/// The `describe` bundle per gender.
pub fn gender_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    aggregate(table, &[Column::Gender], &MetricSpec::describe(Column::Score))
}

/// Mean score per age band, in band order. Unbanded ages are left out.
pub fn age_band_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    let mut rows = aggregate(
        table,
        &[Column::AgeBand],
        &score_metrics(&[("mean", Metric::Mean)]),
    )?;
    sort_by_band(table, &mut rows);
    Ok(rows)
}

/// Mean score per (gender, age band).
pub fn gender_age_band_stats(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    let mut rows = aggregate(
        table,
        &[Column::Gender, Column::AgeBand],
        &score_metrics(&[("mean", Metric::Mean)]),
    )?;
    sort_by_band(table, &mut rows);
    Ok(rows)
}

/// Mean score per (course, level), the cells of a course-by-level matrix.
pub fn course_level_means(table: &RecordTable) -> QueryResult<Vec<AggregateRow>> {
    aggregate(
        table,
        &[Column::CourseCode, Column::Level],
        &score_metrics(&[("mean", Metric::Mean)]),
    )
}

/// Stable re-sort so age bands follow their numeric order, not label order.
fn sort_by_band(table: &RecordTable, rows: &mut [AggregateRow]) {
    let bands = table.age_bands();
    rows.sort_by_key(|row| {
        let position = row
            .key(Column::AgeBand)
            .and_then(KeyValue::as_text)
            .and_then(|label| bands.position(label));
        let others: Vec<KeyValue> = row
            .keys
            .iter()
            .filter(|(c, _)| *c != Column::AgeBand)
            .map(|(_, v)| v.clone())
            .collect();
        (others, position)
    });
}

/// Every student ranked by mean score over all their grades.
pub fn leaderboard_general(
    table: &RecordTable,
    limit: Option<usize>,
) -> QueryResult<Vec<RankedRow>> {
    rank(
        table,
        &RankRequest::new(STUDENT_WITH_PROGRAM.to_vec(), Column::Score).limit(limit),
    )
}

/// The `n` best students overall.
pub fn top_students(table: &RecordTable, n: usize) -> QueryResult<Vec<RankedRow>> {
    top_n(table, STUDENT_WITH_PROGRAM.to_vec(), Column::Score, n)
}

/// Students ranked within each department, or within `department` only.
pub fn leaderboard_department(
    table: &RecordTable,
    department: Option<&str>,
    limit: Option<usize>,
) -> QueryResult<Lookup<Vec<RankedRow>>> {
    let request = RankRequest::new(STUDENT.to_vec(), Column::Score)
        .partitioned_by(vec![Column::Department])
        .limit(limit);
    scoped_rank(table, &[(Column::Department, department)], &request)
}

/// Students ranked within each (program, level), or one given pair.
pub fn leaderboard_program_level(
    table: &RecordTable,
    program_level: Option<(&str, &str)>,
    limit: Option<usize>,
) -> QueryResult<Lookup<Vec<RankedRow>>> {
    let request = RankRequest::new(STUDENT.to_vec(), Column::Score)
        .partitioned_by(vec![Column::Program, Column::Level])
        .limit(limit);
    let (program, level) = program_level.unzip();
    scoped_rank(
        table,
        &[(Column::Program, program), (Column::Level, level)],
        &request,
    )
}

/// Students ranked within each course, or within `course` only.
pub fn leaderboard_course(
    table: &RecordTable,
    course: Option<&str>,
    limit: Option<usize>,
) -> QueryResult<Lookup<Vec<RankedRow>>> {
    let request = RankRequest::new(STUDENT.to_vec(), Column::Score)
        .partitioned_by(vec![Column::CourseCode])
        .limit(limit);
    scoped_rank(table, &[(Column::CourseCode, course)], &request)
}

fn scoped_rank(
    table: &RecordTable,
    filters: &[(Column, Option<&str>)],
    request: &RankRequest,
) -> QueryResult<Lookup<Vec<RankedRow>>> {
    let mut subset = None;
    for (column, value) in filters {
        let Some(value) = value else { continue };
        let current = subset.as_ref().unwrap_or(table);
        match restrict(current, *column, value)? {
            Some(next) => subset = Some(next),
            None => return Ok(Lookup::not_found(*column, *value)),
        }
    }
    rank(subset.as_ref().unwrap_or(table), request).map(Lookup::Found)
}

/// Identity, overall mean and per-course breakdown for one student.
pub fn student_detail(table: &RecordTable, student_id: &str) -> QueryResult<Lookup<StudentDetail>> {
    let Some(subset) = restrict(table, Column::StudentId, student_id)? else {
        return Ok(Lookup::not_found(Column::StudentId, student_id));
    };

    let overall = single(aggregate(
        &subset,
        &[],
        &score_metrics(&[("mean", Metric::Mean), ("count", Metric::Count)]),
    )?);
    let courses = aggregate(
        &subset,
        &[Column::CourseCode],
        &score_metrics(&[("mean", Metric::Mean), ("count", Metric::Count)]),
    )?;

    let first = &subset.records()[0];
    Ok(Lookup::Found(StudentDetail {
        student_id: first.student_id.clone(),
        last_name: first.last_name.clone(),
        first_name: first.first_name.clone(),
        gender: subset.key_value(first, Column::Gender),
        department: subset.key_value(first, Column::Department),
        program: subset.key_value(first, Column::Program),
        level: subset.key_value(first, Column::Level),
        age: subset.key_value(first, Column::Age),
        overall_mean: overall.metric("mean"),
        grade_count: subset.len(),
        courses,
    }))
}

pub fn departments(table: &RecordTable) -> QueryResult<Vec<String>> {
    table.distinct_values(Column::Department)
}

/// Programs, optionally only those taught within `department`.
pub fn programs(table: &RecordTable, department: Option<&str>) -> QueryResult<Vec<String>> {
    distinct_within(table, Column::Program, Column::Department, department)
}

/// Teachers, optionally only those teaching within `department`.
pub fn teachers(table: &RecordTable, department: Option<&str>) -> QueryResult<Vec<String>> {
    distinct_within(table, Column::Teacher, Column::Department, department)
}

/// Course codes, optionally only those taken at `level`.
pub fn courses(table: &RecordTable, level: Option<&str>) -> QueryResult<Vec<String>> {
    distinct_within(table, Column::CourseCode, Column::Level, level)
}

fn distinct_within(
    table: &RecordTable,
    column: Column,
    within: Column,
    value: Option<&str>,
) -> QueryResult<Vec<String>> {
    match value {
        Some(value) => table
            .filter(&Predicate::equals(within, value))?
            .distinct_values(column),
        None => table.distinct_values(column),
    }
}

/// Mean, median, pass rate and grade count of two tables side by side.
pub fn compare(left: &RecordTable, right: &RecordTable) -> QueryResult<Comparison> {
    let metrics = score_metrics(&[
        ("mean", Metric::Mean),
        ("median", Metric::Median),
        ("pass_rate", Metric::PassRate),
        ("count", Metric::Count),
    ]);
    Ok(Comparison {
        left: single(aggregate(left, &[], &metrics)?),
        right: single(aggregate(right, &[], &metrics)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Gender, GradeRecord};
    use chrono::NaiveDate;

    #[test]
    fn test_global_stats() {
        let stats = global_stats(&sample_table()).unwrap();
        assert!(stats.keys.is_empty());
        assert_eq!(stats.metric("min"), Some(6.0));
        assert_eq!(stats.metric("max"), Some(18.0));
        assert_eq!(stats.metric("median"), Some(12.0));
        // 12, 14, 18, 12 pass; 6 fails
        assert_eq!(stats.metric("pass_rate"), Some(80.0));
    }

    #[test]
    fn test_department_stats_one_row_per_department() {
        let rows = department_stats(&sample_table()).unwrap();
        let departments: Vec<_> = rows
            .iter()
            .map(|r| r.key(Column::Department).unwrap().to_string())
            .collect();
        assert_eq!(departments, vec!["GC", "INFO"]);
        assert_eq!(rows[0].metric("mean"), Some(15.0));
    }

    #[test]
    fn test_teacher_stats_found_and_not_found() {
        let table = sample_table();
        let found = teacher_stats(&table, "M. SOGLO").unwrap().found().unwrap();
        assert_eq!(found.metric("count"), Some(2.0));
        assert!(found.keys.is_empty());

        let missing = teacher_stats(&table, "Dr NOBODY").unwrap();
        assert_eq!(missing, Lookup::not_found(Column::Teacher, "Dr NOBODY"));
    }

    #[test]
    fn test_course_stats_filtered_and_unfiltered() {
        let table = sample_table();
        let all = course_stats(&table, None).unwrap().found().unwrap();
        assert_eq!(all.len(), 2);

        let one = course_stats(&table, Some("UE101")).unwrap().found().unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].metric("count"), Some(3.0));

        assert!(course_stats(&table, Some("UE999")).unwrap().is_not_found());
    }

    #[test]
    fn test_student_detail_unknown_id_is_not_found() {
        let result = student_detail(&sample_table(), "S404").unwrap();
        assert_eq!(result, Lookup::not_found(Column::StudentId, "S404"));
    }

    #[test]
    fn test_student_detail_breakdown() {
        let detail = student_detail(&sample_table(), "S1").unwrap().found().unwrap();
        assert_eq!(detail.grade_count, 2);
        assert_eq!(detail.overall_mean, Some(13.0));
        assert_eq!(detail.courses.len(), 2);
        assert_eq!(detail.department, KeyValue::from("INFO"));
        assert_eq!(detail.age, KeyValue::Int(20));
    }

    #[test]
    fn test_leaderboard_general_orders_by_mean() {
        let rows = leaderboard_general(&sample_table(), None).unwrap();
        let ids: Vec<_> = rows
            .iter()
            .map(|r| r.key(Column::StudentId).unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["S3", "S1", "S2"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[2].rank, 3);
    }

    #[test]
    fn test_leaderboard_department_filter() {
        let table = sample_table();
        let rows = leaderboard_department(&table, Some("INFO"), None)
            .unwrap()
            .found()
            .unwrap();
        assert!(rows
            .iter()
            .all(|r| r.key(Column::Department) == Some(&KeyValue::from("INFO"))));
        assert_eq!(rows.len(), 2);

        assert!(leaderboard_department(&table, Some("ARCHI"), None)
            .unwrap()
            .is_not_found());
    }

    #[test]
    fn test_leaderboard_program_level_pair() {
        let table = sample_table();
        let rows = leaderboard_program_level(&table, Some(("GL", "L1")), Some(1))
            .unwrap()
            .found()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key(Column::StudentId), Some(&KeyValue::from("S1")));

        let missing = leaderboard_program_level(&table, Some(("GL", "M2")), None).unwrap();
        assert_eq!(missing, Lookup::not_found(Column::Level, "M2"));
    }

    #[test]
    fn test_leaderboard_course_partitions() {
        let rows = leaderboard_course(&sample_table(), None, None)
            .unwrap()
            .found()
            .unwrap();
        let courses: Vec<_> = rows
            .iter()
            .map(|r| r.key(Column::CourseCode).unwrap().to_string())
            .collect();
        assert_eq!(courses, vec!["UE101", "UE101", "UE101", "UE102", "UE102"]);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[3].rank, 1);
    }

    #[test]
    fn test_reference_lists() {
        let table = sample_table();
        assert_eq!(departments(&table).unwrap(), vec!["GC", "INFO"]);
        assert_eq!(programs(&table, Some("GC")).unwrap(), vec!["GCIV"]);
        assert_eq!(teachers(&table, None).unwrap(), vec!["M. SOGLO", "Mme KOUADIO"]);
        assert_eq!(courses(&table, Some("L1")).unwrap(), vec!["UE101", "UE102"]);
        assert!(courses(&table, Some("M2")).unwrap().is_empty());
    }

    #[test]
    fn test_scope_narrows_before_query() {
        let scope = Scope {
            department: Some("INFO".to_string()),
            ..Default::default()
        };
        let scoped = scope.apply(&sample_table()).unwrap();
        assert_eq!(scoped.len(), 3);
        assert!(Scope::default().is_empty());
    }

    #[test]
    fn test_age_bands_in_band_order() {
        let mut records = sample_records();
        records[0].birth_date = NaiveDate::from_ymd_opt(1998, 1, 1);
        let table = RecordTable::new(records, reference());
        let rows = age_band_stats(&table).unwrap();
        let labels: Vec<_> = rows
            .iter()
            .map(|r| r.key(Column::AgeBand).unwrap().to_string())
            .collect();
        assert_eq!(labels, vec!["18-20", "27+"]);
    }

    #[test]
    fn test_compare_tables() {
        let table = sample_table();
        let info = Scope {
            department: Some("INFO".to_string()),
            ..Default::default()
        }
        .apply(&table)
        .unwrap();
        let comparison = compare(&table, &info).unwrap();
        assert_eq!(comparison.left.metric("count"), Some(5.0));
        assert_eq!(comparison.right.metric("count"), Some(3.0));
    }

    // Helper functions for tests
    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn grade(
        id: &str,
        department: &str,
        program: &str,
        course: &str,
        teacher: &str,
        score: f64,
    ) -> GradeRecord {
        GradeRecord {
            student_id: id.to_string(),
            last_name: format!("NOM{id}"),
            first_name: format!("Prenom{id}"),
            gender: Some(Gender::Male),
            birth_date: NaiveDate::from_ymd_opt(2005, 2, 1),
            department: Some(department.to_string()),
            program: Some(program.to_string()),
            level: Some("L1".to_string()),
            course_code: Some(course.to_string()),
            teacher: Some(teacher.to_string()),
            score: Some(score),
        }
    }

    fn sample_records() -> Vec<GradeRecord> {
        vec![
            grade("S1", "INFO", "GL", "UE101", "Mme KOUADIO", 12.0),
            grade("S1", "INFO", "GL", "UE102", "M. SOGLO", 14.0),
            grade("S2", "INFO", "GL", "UE101", "Mme KOUADIO", 6.0),
            grade("S3", "GC", "GCIV", "UE101", "Mme KOUADIO", 18.0),
            grade("S3", "GC", "GCIV", "UE102", "M. SOGLO", 12.0),
        ]
    }

    fn sample_table() -> RecordTable {
        RecordTable::new(sample_records(), reference())
    }
}
