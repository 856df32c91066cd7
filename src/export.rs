//! Batch export of every named query as one CSV per query.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{Instrument, error, info};

use crate::analyzers::query;
use crate::analyzers::types::Lookup;
use crate::output::write_csv_file;
use crate::table::RecordTable;

/// Queries included in an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportQuery {
    Global,
    Department,
    ProgramLevel,
    Course,
    CourseTeacher,
    Gender,
    AgeBand,
    GenderAgeBand,
    CourseLevel,
    LeaderboardGeneral,
    LeaderboardDepartment,
    LeaderboardProgramLevel,
    LeaderboardCourse,
}

impl ExportQuery {
    pub const ALL: [ExportQuery; 13] = [
        ExportQuery::Global,
        ExportQuery::Department,
        ExportQuery::ProgramLevel,
        ExportQuery::Course,
        ExportQuery::CourseTeacher,
        ExportQuery::Gender,
        ExportQuery::AgeBand,
        ExportQuery::GenderAgeBand,
        ExportQuery::CourseLevel,
        ExportQuery::LeaderboardGeneral,
        ExportQuery::LeaderboardDepartment,
        ExportQuery::LeaderboardProgramLevel,
        ExportQuery::LeaderboardCourse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ExportQuery::Global => "stats_global",
            ExportQuery::Department => "stats_department",
            ExportQuery::ProgramLevel => "stats_program_level",
            ExportQuery::Course => "stats_course",
            ExportQuery::CourseTeacher => "stats_course_teacher",
            ExportQuery::Gender => "stats_gender",
            ExportQuery::AgeBand => "stats_age_band",
            ExportQuery::GenderAgeBand => "stats_gender_age_band",
            ExportQuery::CourseLevel => "stats_course_level",
            ExportQuery::LeaderboardGeneral => "leaderboard_general",
            ExportQuery::LeaderboardDepartment => "leaderboard_department",
            ExportQuery::LeaderboardProgramLevel => "leaderboard_program_level",
            ExportQuery::LeaderboardCourse => "leaderboard_course",
        }
    }

    /// Runs the query and writes its rows to `path`, returning the row count.
    pub fn write(&self, table: &RecordTable, path: &Path) -> Result<usize> {
        macro_rules! rows {
            ($rows:expr) => {{
                let rows = $rows;
                write_csv_file(path, &rows)?;
                rows.len()
            }};
        }

        let written = match self {
            ExportQuery::Global => rows!(vec![query::global_stats(table)?]),
            ExportQuery::Department => rows!(query::department_stats(table)?),
            ExportQuery::ProgramLevel => rows!(query::program_level_stats(table)?),
            ExportQuery::Course => rows!(found(query::course_stats(table, None)?)),
            ExportQuery::CourseTeacher => rows!(query::course_teacher_stats(table)?),
            ExportQuery::Gender => rows!(query::gender_stats(table)?),
            ExportQuery::AgeBand => rows!(query::age_band_stats(table)?),
            ExportQuery::GenderAgeBand => rows!(query::gender_age_band_stats(table)?),
            ExportQuery::CourseLevel => rows!(query::course_level_means(table)?),
            ExportQuery::LeaderboardGeneral => rows!(query::leaderboard_general(table, None)?),
            ExportQuery::LeaderboardDepartment => {
                rows!(found(query::leaderboard_department(table, None, None)?))
            }
            ExportQuery::LeaderboardProgramLevel => {
                rows!(found(query::leaderboard_program_level(table, None, None)?))
            }
            ExportQuery::LeaderboardCourse => {
                rows!(found(query::leaderboard_course(table, None, None)?))
            }
        };
        Ok(written)
    }
}

/// Unfiltered queries always resolve; an absent result is treated as empty.
fn found<T>(lookup: Lookup<Vec<T>>) -> Vec<T> {
    lookup.found().unwrap_or_default()
}

/// Outcome of one exported query.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub query: ExportQuery,
    pub path: PathBuf,
    pub rows: usize,
}

/// Runs every [`ExportQuery`] against one snapshot, at most `concurrency`
/// at a time, writing `<output_dir>/<query>.csv` for each.
///
/// All queries run to completion; the first failure is returned afterwards.
#[tracing::instrument(skip(table), fields(rows = table.len(), output_dir = %output_dir.display()))]
pub async fn export_all(
    table: Arc<RecordTable>,
    output_dir: &Path,
    concurrency: usize,
) -> Result<Vec<ExportReport>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating export directory {}", output_dir.display()))?;

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = Vec::with_capacity(ExportQuery::ALL.len());

    for export in ExportQuery::ALL {
        let sem = semaphore.clone();
        let table = Arc::clone(&table);
        let path = output_dir.join(format!("{}.csv", export.name()));
        let span = tracing::info_span!("export_query", query = export.name());

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire_owned().await?;
                let blocking_path = path.clone();
                let rows =
                    tokio::task::spawn_blocking(move || export.write(&table, &blocking_path))
                        .await??;
                info!(rows, path = %path.display(), "Query exported");
                Ok::<_, anyhow::Error>(ExportReport {
                    query: export,
                    path,
                    rows,
                })
            }
            .instrument(span),
        );
        tasks.push((export, task));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    let mut first_error = None;
    for (export, task) in tasks {
        match task.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                error!(query = export.name(), error = %e, "Export failed");
                first_error.get_or_insert(e.context(format!("exporting {}", export.name())));
            }
            Err(e) => {
                error!(query = export.name(), error = %e, "Export task panicked");
                first_error.get_or_insert(anyhow::Error::new(e));
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    info!(files = reports.len(), "Export complete");
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Gender, GradeRecord};
    use chrono::NaiveDate;
    use std::env;
    use std::fs;

    #[test]
    fn test_query_names_are_unique() {
        let mut names: Vec<_> = ExportQuery::ALL.iter().map(|q| q.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ExportQuery::ALL.len());
    }

    #[test]
    fn test_write_single_query() {
        let dir = env::temp_dir().join("gradeboard_export_single");
        let _ = fs::remove_dir_all(&dir);
        let path = dir.join("global.csv");

        let rows = ExportQuery::Global.write(&create_table(), &path).unwrap();

        assert_eq!(rows, 1);
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("mean,median,stddev"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_export_all_writes_every_file() {
        let dir = env::temp_dir().join("gradeboard_export_all");
        let _ = fs::remove_dir_all(&dir);

        let reports = export_all(Arc::new(create_table()), &dir, 3).await.unwrap();

        assert_eq!(reports.len(), ExportQuery::ALL.len());
        for report in &reports {
            assert!(report.path.exists(), "{} missing", report.path.display());
        }
        let general = reports
            .iter()
            .find(|r| r.query == ExportQuery::LeaderboardGeneral)
            .unwrap();
        assert_eq!(general.rows, 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    // Helper functions for tests
    fn create_record(id: &str, course: &str, score: f64) -> GradeRecord {
        GradeRecord {
            student_id: id.to_string(),
            last_name: "ADJOVI".to_string(),
            first_name: "Mawuli".to_string(),
            gender: Some(Gender::Male),
            birth_date: NaiveDate::from_ymd_opt(2004, 3, 9),
            department: Some("GC".to_string()),
            program: Some("GCIV".to_string()),
            level: Some("L2".to_string()),
            course_code: Some(course.to_string()),
            teacher: Some("Dr HOUNSOU".to_string()),
            score: Some(score),
        }
    }

    fn create_table() -> RecordTable {
        RecordTable::new(
            vec![
                create_record("S1", "UE201", 13.0),
                create_record("S2", "UE201", 8.5),
                create_record("S1", "UE202", 15.0),
            ],
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
        )
    }
}
