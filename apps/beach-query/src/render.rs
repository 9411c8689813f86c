//! Plain-text rendering of query results for the terminal.

use std::fmt::Write as _;

use serde_json::Value;

use crate::result::ResultSet;
use crate::session::{QueryResult, ResultStatus};

pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

/// Tab-separated header line followed by one line per row.
pub fn render_result_set(set: &ResultSet) -> String {
    let mut out = String::new();
    let header: Vec<&str> = set.columns.iter().map(|column| column.name.as_str()).collect();
    out.push_str(&header.join("\t"));
    out.push('\n');
    for row in &set.rows {
        let cells: Vec<String> = set
            .columns
            .iter()
            .map(|column| row.get(&column.name).map(cell_text).unwrap_or_default())
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
    out
}

pub fn render_summary(result: &QueryResult) -> String {
    let mut out = String::new();
    let status = match result.status() {
        ResultStatus::Loading => "running",
        ResultStatus::Completed => "completed",
        ResultStatus::Failed => "failed",
        ResultStatus::Stopped => "stopped",
    };
    let _ = write!(
        out,
        "{status}: {} row(s) in {} result set(s)",
        result.total_rows(),
        result.result_sets().len()
    );
    if result.result_sets().iter().any(|set| set.truncated) {
        out.push_str(", truncated");
    }
    if let Some(duration_us) = result.duration_us() {
        let _ = write!(out, ", {:.3}s", duration_us as f64 / 1_000_000.0);
    }
    if let Some(error) = &result.error {
        let _ = write!(out, "\nerror: {error}");
    }
    out
}
