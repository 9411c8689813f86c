//! Accumulated query output, one [`ResultSet`] per result index.

mod accumulator;
mod speed;

pub use accumulator::{merge_chunks, MergeSummary, MAX_RESULT_SETS};
pub use speed::{SpeedMetrics, DEFAULT_SPEED_WINDOW};

use serde_json::{Map, Value};

use crate::protocol::ColumnType;

/// A decoded row keyed by column name.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnType>,
    pub rows: Vec<Row>,
    pub truncated: bool,
    pub speed: SpeedMetrics,
    /// Raw rows that arrived before any column list.
    pending: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn pending_rows(&self) -> usize {
        self.pending.len()
    }

    /// Adopts `columns` if none are known yet; later definitions are ignored.
    fn adopt_columns(&mut self, columns: Vec<ColumnType>) {
        if !self.columns.is_empty() || columns.is_empty() {
            return;
        }
        self.columns = columns;
        let pending = std::mem::take(&mut self.pending);
        self.push_decoded(pending);
    }

    fn append_rows(&mut self, rows: Vec<Vec<Value>>) {
        if self.columns.is_empty() {
            self.pending.extend(rows);
        } else {
            self.push_decoded(rows);
        }
    }

    fn push_decoded(&mut self, rows: Vec<Vec<Value>>) {
        self.rows.reserve(rows.len());
        for values in rows {
            let row = decode_row(&self.columns, values);
            self.rows.push(row);
        }
    }

    /// Drops raw rows that never received columns; returns how many.
    pub(crate) fn discard_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}

/// Pairs positional values with column names.
///
/// Objects, arrays and booleans are kept as their JSON text so every cell
/// renders as a scalar. Extra values beyond the column list are dropped;
/// missing trailing values are left out of the row.
pub fn decode_row(columns: &[ColumnType], values: Vec<Value>) -> Row {
    let mut row = Map::with_capacity(columns.len());
    for (column, value) in columns.iter().zip(values) {
        row.insert(column.name.clone(), normalize_cell(value));
    }
    row
}

fn normalize_cell(value: Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) | Value::Bool(_) => Value::String(value.to_string()),
        other => other,
    }
}
