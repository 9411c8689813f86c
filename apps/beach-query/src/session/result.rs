use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::protocol::{ErrorChunk, Issue, QueryAction, SessionChunk};
use crate::result::ResultSet;
use crate::transport::TransportError;

/// Why a query ended without a successful response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("{message}")]
    Server {
        message: String,
        error: Value,
        issues: Vec<Issue>,
    },
    #[error("{0}")]
    Transport(String),
    #[error("query finished before a session was created")]
    MissingSession,
}

impl QueryError {
    pub fn from_chunk(chunk: ErrorChunk) -> Self {
        QueryError::Server {
            message: chunk.message(),
            error: chunk.error,
            issues: chunk.issues,
        }
    }

    pub fn from_transport(error: &TransportError) -> Self {
        QueryError::Transport(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub server_query_id: String,
    pub node_id: u64,
    pub trace_id: Option<String>,
}

impl From<SessionChunk> for SessionInfo {
    fn from(chunk: SessionChunk) -> Self {
        Self {
            session_id: chunk.session_id,
            server_query_id: chunk.query_id,
            node_id: chunk.node_id,
            trace_id: chunk.trace_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryData {
    pub result_sets: Vec<ResultSet>,
    pub stats: Option<Value>,
    pub plan: Option<Value>,
    pub ast: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Loading,
    Completed,
    Failed,
    Stopped,
}

/// Per-query outcome owned by a tab's session.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub query_id: String,
    pub action: QueryAction,
    pub is_loading: bool,
    pub cancelled: bool,
    pub error: Option<QueryError>,
    pub session: Option<SessionInfo>,
    pub data: QueryData,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub last_keep_alive: Option<OffsetDateTime>,
}

impl QueryResult {
    pub fn loading(query_id: impl Into<String>, action: QueryAction) -> Self {
        Self {
            query_id: query_id.into(),
            action,
            is_loading: true,
            cancelled: false,
            error: None,
            session: None,
            data: QueryData::default(),
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
            last_keep_alive: None,
        }
    }

    pub fn status(&self) -> ResultStatus {
        if self.is_loading {
            ResultStatus::Loading
        } else if self.cancelled {
            ResultStatus::Stopped
        } else if self.error.is_some() {
            ResultStatus::Failed
        } else {
            ResultStatus::Completed
        }
    }

    pub fn result_sets(&self) -> &[ResultSet] {
        &self.data.result_sets
    }

    pub fn total_rows(&self) -> usize {
        self.data.result_sets.iter().map(|set| set.rows.len()).sum()
    }

    pub fn rows_per_second(&self) -> f64 {
        self.data
            .result_sets
            .iter()
            .map(|set| set.speed.rows_per_second())
            .sum()
    }

    pub fn elapsed(&self) -> Option<time::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Server-reported duration, falling back to the measured wall time.
    pub fn duration_us(&self) -> Option<u64> {
        let reported = self
            .data
            .stats
            .as_ref()
            .and_then(|stats| stats.get("DurationUs"))
            .and_then(value_as_u64);
        reported.or_else(|| {
            self.elapsed()
                .and_then(|elapsed| u64::try_from(elapsed.whole_microseconds()).ok())
        })
    }

    /// Unix milliseconds at which the query finished.
    pub fn end_time_ms(&self) -> Option<i64> {
        let reported = self
            .data
            .stats
            .as_ref()
            .and_then(|stats| stats.get("Executions"))
            .and_then(|executions| executions.get(0))
            .and_then(|execution| execution.get("FinishTimeMs"))
            .and_then(value_as_u64)
            .and_then(|ms| i64::try_from(ms).ok());
        reported.or_else(|| self.finished_at.map(unix_millis))
    }

    pub(crate) fn finish(&mut self) {
        self.is_loading = false;
        self.finished_at = Some(OffsetDateTime::now_utc());
    }
}

pub fn unix_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_reflects_terminal_flags() {
        let mut result = QueryResult::loading("q", QueryAction::Execute);
        assert_eq!(result.status(), ResultStatus::Loading);
        result.finish();
        assert_eq!(result.status(), ResultStatus::Completed);
        result.error = Some(QueryError::MissingSession);
        assert_eq!(result.status(), ResultStatus::Failed);
        result.cancelled = true;
        assert_eq!(result.status(), ResultStatus::Stopped);
    }

    #[test]
    fn duration_prefers_server_stats() {
        let mut result = QueryResult::loading("q", QueryAction::Execute);
        result.finish();
        result.data.stats = Some(json!({
            "DurationUs": "1234",
            "Executions": [{"FinishTimeMs": 1700000000123u64}]
        }));
        assert_eq!(result.duration_us(), Some(1234));
        assert_eq!(result.end_time_ms(), Some(1_700_000_000_123));

        result.data.stats = None;
        assert!(result.duration_us().is_some());
        assert_eq!(result.end_time_ms(), result.finished_at.map(unix_millis));
    }

    #[test]
    fn server_error_message_comes_from_issues() {
        let error = QueryError::from_chunk(ErrorChunk {
            error: json!({"status": "GENERIC_ERROR"}),
            issues: vec![Issue {
                message: Some("Column not found".into()),
                ..Issue::default()
            }],
        });
        assert_eq!(error.to_string(), "Column not found");
    }
}
