use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::analyzers::types::{AggregateRow, Metric, MetricSpec};
use crate::analyzers::utility::{
    max, mean, median_sorted, min, pass_rate, quantile_sorted, sort_values, stddev,
};
use crate::error::{QueryError, QueryResult};
use crate::table::{Column, GradeRecord, KeyValue, RecordTable};

/// Groups `table` by the `group_by` tuple and computes `metrics` per group.
///
/// Records group together iff every key column compares equal; null keys
/// form their own group. Records outside every age band are left out of
/// groupings keyed on [`Column::AgeBand`]. With no key columns the whole
/// table is a single group and exactly one row is returned, even when the
/// table is empty.
///
/// Rows come back ordered by key tuple; use [`sort_by_metric`] for other
/// orders. The request is validated in full before any grouping happens.
#[tracing::instrument(
    skip(table, metrics),
    fields(rows = table.len(), group_by = ?group_by, metrics = metrics.len())
)]
pub fn aggregate(
    table: &RecordTable,
    group_by: &[Column],
    metrics: &[MetricSpec],
) -> QueryResult<Vec<AggregateRow>> {
    validate(group_by, metrics)?;

    let mut groups: BTreeMap<Vec<KeyValue>, Vec<&GradeRecord>> = BTreeMap::new();
    let mut unbanded = 0usize;

    if group_by.is_empty() {
        groups.insert(Vec::new(), table.records().iter().collect());
    } else {
        for record in table.records() {
            if table.unbanded_for(record, group_by) {
                unbanded += 1;
                continue;
            }
            let key = group_by
                .iter()
                .map(|column| table.key_value(record, *column))
                .collect();
            groups.entry(key).or_default().push(record);
        }
    }

    debug!(groups = groups.len(), unbanded, "Grouped records");

    groups
        .into_iter()
        .map(|(key, records)| {
            Ok(AggregateRow {
                keys: group_by.iter().copied().zip(key).collect(),
                metrics: evaluate_group(table, &records, metrics)?,
            })
        })
        .collect()
}

fn validate(group_by: &[Column], metrics: &[MetricSpec]) -> QueryResult<()> {
    if let Some(column) = group_by.iter().find(|c| !c.is_groupable()) {
        return Err(QueryError::NotGroupable(*column));
    }

    let mut names = HashSet::new();
    for spec in metrics {
        spec.validate()?;
        if !names.insert(spec.name.as_str()) {
            return Err(QueryError::DuplicateMetric(spec.name.clone()));
        }
    }
    Ok(())
}

fn evaluate_group(
    table: &RecordTable,
    records: &[&GradeRecord],
    metrics: &[MetricSpec],
) -> QueryResult<Vec<(String, Option<f64>)>> {
    // non-null values per source column, sorted once and shared across metrics
    let mut series: HashMap<Column, Vec<f64>> = HashMap::new();

    let mut out = Vec::with_capacity(metrics.len());
    for spec in metrics {
        if spec.metric == Metric::Count {
            out.push((spec.name.clone(), Some(records.len() as f64)));
            continue;
        }

        let values = match series.entry(spec.column) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(numeric_series(table, records, spec.column)?),
        };

        let value = match spec.metric {
            Metric::Mean => mean(values),
            Metric::Median => median_sorted(values),
            Metric::StdDev => stddev(values),
            Metric::Min => min(values),
            Metric::Max => max(values),
            Metric::Quantile(q) => quantile_sorted(values, q),
            Metric::PassRate => Some(pass_rate(values)),
            Metric::Count => Some(records.len() as f64),
        };
        out.push((spec.name.clone(), value));
    }
    Ok(out)
}

fn numeric_series(
    table: &RecordTable,
    records: &[&GradeRecord],
    column: Column,
) -> QueryResult<Vec<f64>> {
    let mut values = Vec::with_capacity(records.len());
    for record in records {
        if let Some(v) = table.number(record, column)? {
            values.push(v);
        }
    }
    sort_values(&mut values);
    Ok(values)
}

/// Orders rows by a metric, undefined values last; ties keep key order.
pub fn sort_by_metric(rows: &mut [AggregateRow], name: &str, descending: bool) {
    rows.sort_by(|a, b| match (a.metric(name), b.metric(name)) {
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending { ord.reverse() } else { ord }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
