use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;
use tracing::{trace, warn};

use super::ResultSet;
use crate::protocol::{ColumnType, StreamDataChunk};
use crate::telemetry::PerfGuard;

/// Result indices at or above this are rejected rather than allocated.
pub const MAX_RESULT_SETS: usize = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub rows: usize,
    pub result_sets_touched: usize,
    pub rejected_chunks: usize,
}

#[derive(Default)]
struct Group {
    columns: Option<Vec<ColumnType>>,
    rows: Vec<Vec<Value>>,
    truncated: bool,
}

/// Folds a batch of `StreamData` chunks into `result_sets`.
///
/// Rows of one result index keep their arrival order across the batch;
/// indices are independent of each other.
pub fn merge_chunks(
    result_sets: &mut Vec<ResultSet>,
    chunks: Vec<StreamDataChunk>,
    now: Instant,
) -> MergeSummary {
    let _perf = PerfGuard::new("result.merge");
    let mut summary = MergeSummary::default();
    let mut groups: BTreeMap<usize, Group> = BTreeMap::new();

    for chunk in chunks {
        if chunk.result_index >= MAX_RESULT_SETS {
            warn!(
                target: "beach_query::session",
                result_index = chunk.result_index,
                seq_no = chunk.seq_no,
                "result index out of range; dropping chunk"
            );
            summary.rejected_chunks += 1;
            continue;
        }
        let group = groups.entry(chunk.result_index).or_default();
        if group.columns.is_none() {
            group.columns = chunk.columns.filter(|columns| !columns.is_empty());
        }
        group.rows.extend(chunk.rows);
        group.truncated |= chunk.truncated;
    }

    for (index, group) in groups {
        if result_sets.len() <= index {
            result_sets.resize_with(index + 1, ResultSet::default);
        }
        let set = &mut result_sets[index];
        let row_count = group.rows.len();

        if let Some(columns) = group.columns {
            set.adopt_columns(columns);
        }
        set.append_rows(group.rows);
        set.truncated |= group.truncated;
        set.speed.record(now, row_count);

        trace!(
            target: "beach_query::session",
            result_index = index,
            rows = row_count,
            total_rows = set.rows.len(),
            pending = set.pending_rows(),
            "merged stream data"
        );
        summary.rows += row_count;
        summary.result_sets_touched += 1;
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(index: usize, columns: Option<&[&str]>, rows: &[i64], truncated: bool) -> StreamDataChunk {
        StreamDataChunk {
            seq_no: 0,
            result_index: index,
            columns: columns.map(|names| names.iter().map(|n| ColumnType::named(*n)).collect()),
            rows: rows.iter().map(|v| vec![json!(v)]).collect(),
            truncated,
        }
    }

    fn values(set: &ResultSet) -> Vec<Value> {
        set.rows.iter().map(|row| row["v"].clone()).collect()
    }

    #[test]
    fn rows_keep_arrival_order() {
        let now = Instant::now();
        let mut sets = Vec::new();
        merge_chunks(
            &mut sets,
            vec![chunk(0, Some(&["v"]), &[1, 2], false), chunk(0, None, &[3], false)],
            now,
        );
        assert_eq!(values(&sets[0]), vec![json!(1), json!(2), json!(3)]);

        let mut reversed = Vec::new();
        merge_chunks(
            &mut reversed,
            vec![chunk(0, Some(&["v"]), &[3], false), chunk(0, None, &[1, 2], false)],
            now,
        );
        assert_eq!(values(&reversed[0]), vec![json!(3), json!(1), json!(2)]);
    }

    #[test]
    fn columns_are_adopted_once() {
        let now = Instant::now();
        let mut sets = Vec::new();
        merge_chunks(&mut sets, vec![chunk(0, Some(&["v"]), &[1], false)], now);
        merge_chunks(&mut sets, vec![chunk(0, Some(&["other"]), &[2], false)], now);
        assert_eq!(sets[0].columns, vec![ColumnType::named("v")]);
        assert_eq!(values(&sets[0]), vec![json!(1), json!(2)]);
    }

    #[test]
    fn empty_column_list_does_not_count_as_definition() {
        let now = Instant::now();
        let mut sets = Vec::new();
        merge_chunks(
            &mut sets,
            vec![chunk(0, Some(&[]), &[], false), chunk(0, Some(&["v"]), &[4], false)],
            now,
        );
        assert_eq!(sets[0].columns, vec![ColumnType::named("v")]);
        assert_eq!(values(&sets[0]), vec![json!(4)]);
    }

    #[test]
    fn truncation_is_sticky() {
        let now = Instant::now();
        let mut sets = Vec::new();
        merge_chunks(&mut sets, vec![chunk(0, Some(&["v"]), &[1], true)], now);
        merge_chunks(&mut sets, vec![chunk(0, None, &[2], false)], now);
        assert!(sets[0].truncated);
    }

    #[test]
    fn indices_are_independent_and_gaps_filled() {
        let now = Instant::now();
        let mut sets = Vec::new();
        let summary = merge_chunks(
            &mut sets,
            vec![
                chunk(2, Some(&["v"]), &[20], true),
                chunk(0, Some(&["v"]), &[1], false),
                chunk(2, None, &[21], false),
            ],
            now,
        );
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.result_sets_touched, 2);
        assert_eq!(sets.len(), 3);
        assert_eq!(values(&sets[0]), vec![json!(1)]);
        assert!(sets[1].rows.is_empty() && sets[1].columns.is_empty());
        assert_eq!(values(&sets[2]), vec![json!(20), json!(21)]);
        assert!(!sets[0].truncated);
        assert!(sets[2].truncated);
    }

    #[test]
    fn rows_before_columns_are_held_until_columns_arrive() {
        let now = Instant::now();
        let mut sets = Vec::new();
        merge_chunks(&mut sets, vec![chunk(0, None, &[1], false)], now);
        assert!(sets[0].rows.is_empty());
        assert_eq!(sets[0].pending_rows(), 1);

        merge_chunks(&mut sets, vec![chunk(0, Some(&["v"]), &[2], false)], now);
        assert_eq!(values(&sets[0]), vec![json!(1), json!(2)]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut sets = Vec::new();
        let summary = merge_chunks(
            &mut sets,
            vec![chunk(MAX_RESULT_SETS, Some(&["v"]), &[1], false)],
            Instant::now(),
        );
        assert_eq!(summary.rejected_chunks, 1);
        assert!(sets.is_empty());
    }
}
