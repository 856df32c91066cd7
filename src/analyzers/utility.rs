//! Numeric kernels shared by the grouping and ranking engines.
//!
//! Every function works on the non-null values of a group and returns `None`
//! where the statistic is undefined, never `NaN` or an infinity.

/// Scores at or above this mark count as a pass.
pub const PASS_MARK: f64 = 10.0;

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Arithmetic mean. `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (N-1 denominator). `None` below two values.
pub fn stddev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let avg = mean(values)?;
    let variance =
        values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / (values.len() - 1) as f64;

    finite(variance.sqrt())
}

/// Quantile `q` of already-sorted values, interpolating linearly between the
/// two nearest order statistics.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    finite(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn median_sorted(sorted: &[f64]) -> Option<f64> {
    quantile_sorted(sorted, 0.5)
}

pub fn min(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::min)
}

pub fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max)
}

/// Percentage (0-100) of values at or above [`PASS_MARK`].
///
/// An empty input (every score in the group was null) yields 0.0. That
/// convention is inherited from the source dashboards and is a candidate
/// to become `None`.
pub fn pass_rate(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let passed = values.iter().filter(|&&v| v >= PASS_MARK).count();
    (passed as f64 / values.len() as f64) * 100.0
}

/// Sorts in place by ascending value; inputs are expected to be finite.
pub fn sort_values(values: &mut [f64]) {
    values.sort_by(f64::total_cmp);
}
