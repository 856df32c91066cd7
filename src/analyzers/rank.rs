use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use crate::analyzers::types::{RankRequest, RankedRow};
use crate::analyzers::utility::mean;
use crate::error::QueryResult;
use crate::table::{Column, GradeRecord, KeyValue, RecordTable};

/// Whether two ranking scores tie.
///
/// Exact floating-point equality: means that differ only by rounding noise
/// are ranked apart.
pub fn same_score(a: f64, b: f64) -> bool {
    a == b
}

/// Dense-ranks entities by the mean of `request.average_over`, descending,
/// independently within each partition.
///
/// Ties share a rank and the next distinct score takes the next integer.
/// Within a tie, entities are ordered by their key tuple so results are
/// deterministic. Entities without a single non-null value have no score
/// and are left off the leaderboard.
///
/// `limit_per_partition` keeps the first N rows of each partition after
/// sorting. It counts rows, not ranks, so a tie straddling the cut is split.
///
/// Records outside every age band are skipped when the partition or entity
/// key contains [`Column::AgeBand`], as in [`aggregate`](crate::analyzers::aggregate::aggregate).
///
/// Output is ordered by partition key tuple, then rank, then entity key.
#[tracing::instrument(
    skip(table, request),
    fields(
        rows = table.len(),
        entity = ?request.entity,
        partition_by = ?request.partition_by,
        limit = ?request.limit_per_partition,
    )
)]
pub fn rank(table: &RecordTable, request: &RankRequest) -> QueryResult<Vec<RankedRow>> {
    request.validate()?;

    let mut partitions: BTreeMap<Vec<KeyValue>, BTreeMap<Vec<KeyValue>, Vec<f64>>> =
        BTreeMap::new();

    let mut unbanded = 0usize;

    for record in table.records() {
        if table.unbanded_for(record, &request.partition_by)
            || table.unbanded_for(record, &request.entity)
        {
            unbanded += 1;
            continue;
        }
        let partition = key_tuple(table, record, &request.partition_by);
        let entity = key_tuple(table, record, &request.entity);
        let values = partitions
            .entry(partition)
            .or_default()
            .entry(entity)
            .or_default();
        if let Some(v) = table.number(record, request.average_over)? {
            values.push(v);
        }
    }

    let mut out = Vec::new();
    let mut unscored = 0usize;

    for (partition, entities) in partitions {
        let mut scored: Vec<(Vec<KeyValue>, f64)> = Vec::with_capacity(entities.len());
        for (entity, values) in entities {
            match mean(&values) {
                Some(score) => scored.push((entity, score)),
                None => unscored += 1,
            }
        }

        scored.sort_by(|(ea, a), (eb, b)| {
            b.partial_cmp(a)
                .unwrap_or(Ordering::Equal)
                .then_with(|| ea.cmp(eb))
        });

        let keep = request.limit_per_partition.unwrap_or(usize::MAX);
        let mut rank = 0usize;
        let mut previous: Option<f64> = None;

        for (entity, score) in scored.into_iter().take(keep) {
            if previous.is_none_or(|p| !same_score(p, score)) {
                rank += 1;
            }
            previous = Some(score);

            out.push(RankedRow {
                partition: labelled(&request.partition_by, &partition),
                entity: labelled(&request.entity, &entity),
                score,
                rank,
            });
        }
    }

    debug!(ranked = out.len(), unscored, unbanded, "Ranking complete");
    Ok(out)
}

/// Global leaderboard truncated to the first `n` rows.
pub fn top_n(
    table: &RecordTable,
    entity: Vec<Column>,
    average_over: Column,
    n: usize,
) -> QueryResult<Vec<RankedRow>> {
    rank(table, &RankRequest::new(entity, average_over).limit(Some(n)))
}

fn key_tuple(
    table: &RecordTable,
    record: &GradeRecord,
    columns: &[Column],
) -> Vec<KeyValue> {
    columns.iter().map(|c| table.key_value(record, *c)).collect()
}

fn labelled(columns: &[Column], values: &[KeyValue]) -> Vec<(Column, KeyValue)> {
    columns.iter().copied().zip(values.iter().cloned()).collect()
}
