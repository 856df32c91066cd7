//! CSV ingestion into a [`RecordTable`].
//!
//! Headers may use the source dataset's French names or the English field
//! names. Cells that cannot be read as their column's type become null
//! rather than failing the load.

use std::fs::File;
use std::io::Read;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::table::{Gender, GradeRecord, RecordTable};

/// Birth dates in the source files are day-first.
const BIRTH_DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
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
}

impl Field {
    const ALL: [Field; 11] = [
        Field::StudentId,
        Field::LastName,
        Field::FirstName,
        Field::Gender,
        Field::BirthDate,
        Field::Department,
        Field::Program,
        Field::Level,
        Field::CourseCode,
        Field::Teacher,
        Field::Score,
    ];

    /// Accepted header names, French first.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::StudentId => &["student_id"],
            Field::LastName => &["nom", "last_name"],
            Field::FirstName => &["prenom", "first_name"],
            Field::Gender => &["sexe", "gender"],
            Field::BirthDate => &["date_naissance", "birth_date"],
            Field::Department => &["departement", "department"],
            Field::Program => &["filiere", "program"],
            Field::Level => &["niveau", "level"],
            Field::CourseCode => &["ue", "course_code"],
            Field::Teacher => &["enseignant", "teacher"],
            Field::Score => &["note", "score"],
        }
    }
}

/// Column positions of each field in one particular file.
struct HeaderMap([usize; 11]);

impl HeaderMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self> {
        let normalized: Vec<String> = headers
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();

        let mut positions = [0usize; 11];
        let mut missing = Vec::new();
        for (slot, field) in positions.iter_mut().zip(Field::ALL) {
            match normalized
                .iter()
                .position(|h| field.aliases().contains(&h.as_str()))
            {
                Some(index) => *slot = index,
                None => missing.push(field.aliases()[0]),
            }
        }

        if !missing.is_empty() {
            bail!("missing required columns: {}", missing.join(", "));
        }
        Ok(Self(positions))
    }

    fn get<'r>(&self, row: &'r csv::StringRecord, field: Field) -> Option<&'r str> {
        let index = Field::ALL.iter().position(|f| *f == field)?;
        row.get(self.0[index])
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
    }
}

/// Records read from one source plus the rows that had to be dropped.
#[derive(Debug, Default)]
pub struct Ingested {
    pub records: Vec<GradeRecord>,
    pub skipped: usize,
}

/// Reads grade records from CSV text.
///
/// # Errors
///
/// Fails when required headers are missing or the CSV itself is malformed.
pub fn parse_records<R: Read>(reader: R) -> Result<Ingested> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = HeaderMap::from_headers(rdr.headers()?)?;

    let mut out = Ingested::default();
    for (line, result) in rdr.records().enumerate() {
        let row = result?;
        match parse_row(&headers, &row) {
            Some(record) => out.records.push(record),
            None => {
                out.skipped += 1;
                warn!(row = line + 1, "Skipping row without student_id");
            }
        }
    }

    debug!(
        records = out.records.len(),
        skipped = out.skipped,
        "Parsed grade rows"
    );
    Ok(out)
}

fn parse_row(headers: &HeaderMap, row: &csv::StringRecord) -> Option<GradeRecord> {
    let text = |field| headers.get(row, field).map(str::to_string);

    Some(GradeRecord {
        student_id: text(Field::StudentId)?,
        last_name: text(Field::LastName).unwrap_or_default(),
        first_name: text(Field::FirstName).unwrap_or_default(),
        gender: headers.get(row, Field::Gender).and_then(Gender::from_code),
        birth_date: headers.get(row, Field::BirthDate).and_then(parse_birth_date),
        department: text(Field::Department),
        program: text(Field::Program),
        level: text(Field::Level),
        course_code: text(Field::CourseCode),
        teacher: text(Field::Teacher),
        score: headers.get(row, Field::Score).and_then(parse_score),
    })
}

fn parse_birth_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, BIRTH_DATE_FORMAT).ok()
}

fn parse_score(raw: &str) -> Option<f64> {
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Loads a CSV file into a table configured by `config`.
pub fn load_table(path: &str, config: &EngineConfig) -> Result<RecordTable> {
    let file = File::open(path).with_context(|| format!("opening grades file {path}"))?;
    let ingested = parse_records(file).with_context(|| format!("reading grades file {path}"))?;

    info!(
        path,
        records = ingested.records.len(),
        skipped = ingested.skipped,
        "Loaded grade table"
    );
    Ok(RecordTable::new(ingested.records, config.reference_date)
        .with_age_bands(config.age_bands.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_french_headers() {
        let csv = "student_id,nom,prenom,sexe,date_naissance,departement,filiere,niveau,ue,enseignant,note\n\
                   S1,AGBO,Kossi,M,02/06/2004,INFO,GL,L3,UE305,M. SOGLO,14.5\n";
        let ingested = parse_records(csv.as_bytes()).unwrap();

        assert_eq!(ingested.skipped, 0);
        let record = &ingested.records[0];
        assert_eq!(record.student_id, "S1");
        assert_eq!(record.gender, Some(Gender::Male));
        assert_eq!(record.birth_date, NaiveDate::from_ymd_opt(2004, 6, 2));
        assert_eq!(record.course_code.as_deref(), Some("UE305"));
        assert_eq!(record.score, Some(14.5));
    }

    #[test]
    fn test_parse_english_headers_any_order() {
        let csv = "score,teacher,course_code,level,program,department,birth_date,gender,first_name,last_name,student_id\n\
                   9,Mme KOUADIO,UE101,L1,RT,INFO,15/01/2006,F,Afi,HOUNKPE,S7\n";
        let ingested = parse_records(csv.as_bytes()).unwrap();

        let record = &ingested.records[0];
        assert_eq!(record.student_id, "S7");
        assert_eq!(record.last_name, "HOUNKPE");
        assert_eq!(record.gender, Some(Gender::Female));
        assert_eq!(record.score, Some(9.0));
    }

    #[test]
    fn test_unreadable_cells_become_null() {
        let csv = "student_id,nom,prenom,sexe,date_naissance,departement,filiere,niveau,ue,enseignant,note\n\
                   S1,AGBO,Kossi,X,2004-06-02,,GL,L3,UE305,M. SOGLO,abs\n\
                   S2,DOSSOU,Yao,M,01/01/2003,INFO,GL,L3,UE305,M. SOGLO,inf\n";
        let ingested = parse_records(csv.as_bytes()).unwrap();

        let first = &ingested.records[0];
        assert_eq!(first.gender, None);
        assert_eq!(first.birth_date, None);
        assert_eq!(first.department, None);
        assert_eq!(first.score, None);
        assert_eq!(ingested.records[1].score, None);
    }

    #[test]
    fn test_rows_without_student_id_are_skipped() {
        let csv = "student_id,nom,prenom,sexe,date_naissance,departement,filiere,niveau,ue,enseignant,note\n\
                   ,AGBO,Kossi,M,02/06/2004,INFO,GL,L3,UE305,M. SOGLO,12\n\
                   S2,DOSSOU,Yao,M,01/01/2003,INFO,GL,L3,UE305,M. SOGLO,11\n";
        let ingested = parse_records(csv.as_bytes()).unwrap();

        assert_eq!(ingested.skipped, 1);
        assert_eq!(ingested.records.len(), 1);
    }

    #[test]
    fn test_missing_headers_are_all_named() {
        let csv = "student_id,nom,prenom,sexe\nS1,AGBO,Kossi,M\n";
        let message = parse_records(csv.as_bytes()).unwrap_err().to_string();

        assert!(message.contains("date_naissance"));
        assert!(message.contains("note"));
        assert!(!message.contains("prenom"));
    }

    #[test]
    fn test_load_table_missing_file() {
        let result = load_table("/nonexistent/grades.csv", &EngineConfig::default());
        assert!(result.is_err());
    }
}
