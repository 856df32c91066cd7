//! CLI entry point for gradeboard.
//!
//! Loads one grades CSV, applies the optional scope filters, and answers a
//! single statistics, leaderboard, lookup or export command against it.

use std::ffi::OsStr;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use gradeboard::analyzers::query::{self, Scope};
use gradeboard::analyzers::types::Lookup;
use gradeboard::config::{EngineConfig, REFERENCE_DATE_ENV};
use gradeboard::export::export_all;
use gradeboard::output::{Labelled, Tabular, emit, render_csv, render_json};
use gradeboard::parser::load_table;
use gradeboard::snapshot::SnapshotStore;
use gradeboard::stats::DatasetStats;
use gradeboard::table::Cell;
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const DEFAULT_DATA: &str = "data/raw/grades.csv";

#[derive(Parser)]
#[command(name = "gradeboard")]
#[command(about = "Statistics and leaderboards over student grade records", long_about = None)]
struct Cli {
    /// Grades CSV (falls back to $GRADES_CSV, then data/raw/grades.csv)
    #[arg(long, value_name = "PATH")]
    data: Option<String>,

    /// Date ages are computed at, YYYY-MM-DD (overrides $REFERENCE_DATE)
    #[arg(long, value_name = "DATE")]
    reference_date: Option<NaiveDate>,

    /// JSON engine config (reference date, age bands)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Only keep records from this department
    #[arg(long)]
    department: Option<String>,

    /// Only keep records from this program
    #[arg(long)]
    program: Option<String>,

    /// Only keep records at this level
    #[arg(long)]
    level: Option<String>,

    /// Only keep records graded by this teacher
    #[arg(long)]
    teacher: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Write the result here instead of stdout
    #[arg(long, global = true, value_name = "PATH")]
    output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grouped descriptive statistics
    Stats {
        #[arg(value_enum)]
        kind: StatsKind,

        /// Teacher or course to report on
        #[arg(long)]
        name: Option<String>,
    },
    /// Dense-rank leaderboard of students by mean score
    Rank {
        #[arg(value_enum)]
        board: Board,

        #[arg(long)]
        department: Option<String>,

        #[arg(long, requires = "level")]
        program: Option<String>,

        #[arg(long, requires = "program")]
        level: Option<String>,

        #[arg(long)]
        course: Option<String>,

        /// Rows kept per partition
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Best students overall
    Top {
        #[arg(short, long, default_value_t = 10)]
        n: usize,
    },
    /// One student's identity and per-course means
    Student {
        #[arg(value_name = "STUDENT_ID")]
        id: String,
    },
    /// Distinct reference values
    List {
        #[arg(value_enum)]
        kind: ListKind,

        /// Department for programs/teachers, level for courses
        #[arg(long)]
        within: Option<String>,
    },
    /// Row, entity and missing-value counts
    Summary,
    /// Headline statistics of this dataset next to another
    Compare {
        #[arg(value_name = "OTHER_CSV")]
        other: String,
    },
    /// Write every named query to its own CSV
    Export {
        #[arg(short = 'd', long, default_value = "exports")]
        output_dir: String,

        /// Maximum number of queries computed at once
        #[arg(short, long, default_value_t = 4)]
        concurrency: usize,

        /// Export rounds; the CSV is re-read before each round after the first (0 = forever)
        #[arg(short = 'n', long, default_value_t = 1)]
        rounds: usize,

        /// Seconds to wait between rounds
        #[arg(short = 'r', long, default_value_t = 300)]
        interval: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsKind {
    Global,
    Department,
    Teacher,
    Course,
    ProgramLevel,
    CourseTeacher,
    Gender,
    AgeBand,
    GenderAgeBand,
    CourseLevel,
}

#[derive(Clone, Copy, ValueEnum)]
enum Board {
    General,
    Department,
    ProgramLevel,
    Course,
}

#[derive(Clone, Copy, ValueEnum)]
enum ListKind {
    Departments,
    Programs,
    Teachers,
    Courses,
}

impl ListKind {
    fn column(&self) -> &'static str {
        match self {
            ListKind::Departments => "department",
            ListKind::Programs => "program",
            ListKind::Teachers => "teacher",
            ListKind::Courses => "course_code",
        }
    }
}

/// Where and how a command's result is written.
struct Sink<'a> {
    format: Format,
    path: Option<&'a str>,
}

impl Sink<'_> {
    fn rows<T: Serialize + Tabular>(&self, rows: &[T]) -> Result<()> {
        let rendered = match self.format {
            Format::Json => render_json(rows)?,
            Format::Csv => render_csv(rows)?,
        };
        emit(&rendered, self.path)
    }

    fn lookup<T: Serialize + Tabular>(&self, lookup: &Lookup<Vec<T>>) -> Result<()> {
        match lookup {
            Lookup::Found(rows) => self.rows(rows),
            Lookup::NotFound { column, value } => {
                warn!(column = %column, value = %value, "No records match");
                match self.format {
                    Format::Json => emit(&render_json(lookup)?, self.path),
                    Format::Csv => emit("", self.path),
                }
            }
        }
    }
}

struct ListEntry<'a> {
    column: &'static str,
    value: &'a str,
}

impl Tabular for ListEntry<'_> {
    fn cells(&self) -> Vec<(String, Cell)> {
        vec![(self.column.to_string(), Cell::Text(self.value.to_string()))]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_logging()?;

    let cli = Cli::parse();

    let env_date = std::env::var(REFERENCE_DATE_ENV).ok();
    let config = EngineConfig::resolve(
        cli.config.as_deref(),
        env_date.as_deref(),
        cli.reference_date,
    )?;
    let data = cli
        .data
        .clone()
        .or_else(|| std::env::var("GRADES_CSV").ok())
        .unwrap_or_else(|| DEFAULT_DATA.to_string());

    let scope = Scope {
        department: cli.department.clone(),
        program: cli.program.clone(),
        level: cli.level.clone(),
        teacher: cli.teacher.clone(),
    };
    let store = SnapshotStore::new(scope.apply(&load_table(&data, &config)?)?);
    let table = store.load();
    info!(
        data = %data,
        rows = table.len(),
        reference_date = %config.reference_date,
        "Grade table ready"
    );

    let sink = Sink {
        format: cli.format,
        path: cli.output.as_deref(),
    };

    match cli.command {
        Commands::Stats { kind, name } => match kind {
            StatsKind::Global => sink.rows(&[query::global_stats(&table)?])?,
            StatsKind::Department => sink.rows(&query::department_stats(&table)?)?,
            StatsKind::Teacher => {
                let name = name.context("--name is required for teacher stats")?;
                sink.lookup(&query::teacher_stats(&table, &name)?.map(|row| vec![row]))?;
            }
            StatsKind::Course => sink.lookup(&query::course_stats(&table, name.as_deref())?)?,
            StatsKind::ProgramLevel => sink.rows(&query::program_level_stats(&table)?)?,
            StatsKind::CourseTeacher => sink.rows(&query::course_teacher_stats(&table)?)?,
            StatsKind::Gender => sink.rows(&query::gender_stats(&table)?)?,
            StatsKind::AgeBand => sink.rows(&query::age_band_stats(&table)?)?,
            StatsKind::GenderAgeBand => sink.rows(&query::gender_age_band_stats(&table)?)?,
            StatsKind::CourseLevel => sink.rows(&query::course_level_means(&table)?)?,
        },
        Commands::Rank {
            board,
            department,
            program,
            level,
            course,
            limit,
        } => {
            let leaderboard = match board {
                Board::General => Lookup::Found(query::leaderboard_general(&table, limit)?),
                Board::Department => {
                    query::leaderboard_department(&table, department.as_deref(), limit)?
                }
                Board::ProgramLevel => {
                    let pair = match (program.as_deref(), level.as_deref()) {
                        (Some(program), Some(level)) => Some((program, level)),
                        (None, None) => None,
                        _ => bail!("--program and --level must be given together"),
                    };
                    query::leaderboard_program_level(&table, pair, limit)?
                }
                Board::Course => query::leaderboard_course(&table, course.as_deref(), limit)?,
            };
            sink.lookup(&leaderboard)?;
        }
        Commands::Top { n } => sink.rows(&query::top_students(&table, n)?)?,
        Commands::Student { id } => match query::student_detail(&table, &id)? {
            Lookup::Found(detail) => match sink.format {
                Format::Json => emit(&render_json(&detail)?, sink.path)?,
                Format::Csv => emit(&render_csv(&detail.courses)?, sink.path)?,
            },
            missing => sink.lookup(&missing.map(|detail| detail.courses))?,
        },
        Commands::List { kind, within } => {
            let values = match kind {
                ListKind::Departments => query::departments(&table)?,
                ListKind::Programs => query::programs(&table, within.as_deref())?,
                ListKind::Teachers => query::teachers(&table, within.as_deref())?,
                ListKind::Courses => query::courses(&table, within.as_deref())?,
            };
            let rendered = match sink.format {
                Format::Json => render_json(&values)?,
                Format::Csv => {
                    let entries: Vec<_> = values
                        .iter()
                        .map(|value| ListEntry {
                            column: kind.column(),
                            value,
                        })
                        .collect();
                    render_csv(&entries)?
                }
            };
            emit(&rendered, sink.path)?;
        }
        Commands::Summary => sink.rows(&[DatasetStats::from_table(&table)])?,
        Commands::Compare { other } => {
            let other_table = scope.apply(&load_table(&other, &config)?)?;
            let comparison = query::compare(&table, &other_table)?;
            let rendered = match sink.format {
                Format::Json => render_json(&comparison)?,
                Format::Csv => render_csv(&[
                    Labelled {
                        label: &data,
                        row: &comparison.left,
                    },
                    Labelled {
                        label: &other,
                        row: &comparison.right,
                    },
                ])?,
            };
            emit(&rendered, sink.path)?;
        }
        Commands::Export {
            output_dir,
            concurrency,
            rounds,
            interval,
        } => {
            let mut round = 0;
            loop {
                round += 1;
                if round > 1 {
                    // in-flight readers keep the snapshot they started with
                    store.reload(|| Ok(scope.apply(&load_table(&data, &config)?)?))?;
                }

                let reports =
                    export_all(store.load(), Path::new(&output_dir), concurrency).await?;
                let rows: usize = reports.iter().map(|r| r.rows).sum();
                info!(round, files = reports.len(), rows, output_dir = %output_dir, "Export finished");

                if rounds > 0 && round >= rounds {
                    break;
                }
                info!(interval, "Waiting before next export round");
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
            }
        }
    }

    Ok(())
}

/// Coloured stderr logging plus a JSON daily rolling log file.
///
/// The returned guard flushes the file writer on drop and must outlive
/// every log call.
fn init_logging() -> Result<WorkerGuard> {
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gradeboard.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gradeboard.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter("RUST_LOG", "info"));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(env_filter("RUST_LOG_JSON", "debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

/// Filter from the `var` environment variable, or `default` when unset or invalid.
fn env_filter(var: &str, default: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(default))
}
