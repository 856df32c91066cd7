use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Label returned for values that fall outside every band.
pub const UNBANDED: &str = "unbanded";

/// Ordered, right-closed numeric bands.
///
/// Band `i` covers `edges[i] < value <= edges[i + 1]`.
///
/// | Default edge range | Label |
/// |--------------------|-------|
/// | (17, 20]           | 18-20 |
/// | (20, 23]           | 21-23 |
/// | (23, 26]           | 24-26 |
/// | (26, 30]           | 27+   |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BandsSpec", into = "BandsSpec")]
pub struct Bands {
    edges: Vec<f64>,
    labels: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct BandsSpec {
    edges: Vec<f64>,
    labels: Vec<String>,
}

impl TryFrom<BandsSpec> for Bands {
    type Error = QueryError;

    fn try_from(spec: BandsSpec) -> QueryResult<Self> {
        Bands::new(spec.edges, spec.labels)
    }
}

impl From<Bands> for BandsSpec {
    fn from(bands: Bands) -> Self {
        BandsSpec {
            edges: bands.edges,
            labels: bands.labels,
        }
    }
}

/// Result of placing a value into [`Bands`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band<'a> {
    Labeled { index: usize, label: &'a str },
    Unbanded,
}

impl<'a> Band<'a> {
    pub fn label(&self) -> &'a str {
        match self {
            Band::Labeled { label, .. } => label,
            Band::Unbanded => UNBANDED,
        }
    }
}

impl Bands {
    pub fn new(edges: Vec<f64>, labels: Vec<String>) -> QueryResult<Self> {
        if edges.len() < 2 || labels.len() != edges.len() - 1 {
            return Err(QueryError::BandShape {
                edges: edges.len(),
                labels: labels.len(),
            });
        }
        for (index, pair) in edges.windows(2).enumerate() {
            if !pair[0].is_finite() || !pair[1].is_finite() || pair[0] >= pair[1] {
                return Err(QueryError::UnsortedEdges { index: index + 1 });
            }
        }
        Ok(Self { edges, labels })
    }

    /// Age bands used for demographic breakdowns.
    pub fn age_default() -> Self {
        Self {
            edges: vec![17.0, 20.0, 23.0, 26.0, 30.0],
            labels: ["18-20", "21-23", "24-26", "27+"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Position of `label` in band order, if it names a band.
    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn place(&self, value: Option<f64>) -> Band<'_> {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            return Band::Unbanded;
        };
        // the first edge at or above the value closes its band on the right
        match self.edges.iter().position(|&edge| value <= edge) {
            Some(upper) if upper > 0 => Band::Labeled {
                index: upper - 1,
                label: &self.labels[upper - 1],
            },
            _ => Band::Unbanded,
        }
    }
}

/// Maps `value` to the label of the band containing it, or [`UNBANDED`].
///
/// Validates `edges`/`labels` on every call; use [`Bands`] to validate once.
pub fn bucket(value: Option<f64>, edges: &[f64], labels: &[String]) -> QueryResult<String> {
    let bands = Bands::new(edges.to_vec(), labels.to_vec())?;
    Ok(bands.place(value).label().to_string())
}
