use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analyzers::bucket::Bands;

pub const REFERENCE_DATE_ENV: &str = "REFERENCE_DATE";

/// Settings that change query results rather than I/O.
///
/// Stored as JSON on disk; every field is optional:
/// ```json
/// {
///   "reference_date": "2025-09-01",
///   "age_bands": {
///     "edges": [17, 20, 23, 26, 30],
///     "labels": ["18-20", "21-23", "24-26", "27+"]
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reference_date: NaiveDate,
    pub age_bands: Bands,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reference_date: default_reference_date(),
            age_bands: Bands::age_default(),
        }
    }
}

fn default_reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).unwrap_or_default()
}

impl EngineConfig {
    /// Loads the config from a JSON file at `path`. Band edges and labels
    /// are validated while deserialising.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
        let config: Self =
            serde_json::from_str(&content).with_context(|| format!("parsing config {path}"))?;
        debug!(path, reference_date = %config.reference_date, "Loaded engine config");
        Ok(config)
    }

    /// Layers the optional file, then `REFERENCE_DATE`, then the command-line
    /// date over the built-in defaults.
    pub fn resolve(
        file: Option<&str>,
        env_date: Option<&str>,
        cli_date: Option<NaiveDate>,
    ) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(raw) = env_date {
            config.reference_date = parse_date(raw)
                .with_context(|| format!("{REFERENCE_DATE_ENV} is not a YYYY-MM-DD date"))?;
        }
        if let Some(date) = cli_date {
            config.reference_date = date;
        }
        Ok(config)
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")?)
}
