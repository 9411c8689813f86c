//! Per-tab query lifecycle.
//!
//! A [`QuerySession`] moves `Idle -> Starting -> Streaming -> Finished`, or to
//! `Cancelled` from either active state. Once terminal it ignores everything
//! until the next dispatch replaces the result.

pub mod driver;
mod result;

pub use driver::{drive_query, SessionEvent, SessionEventKind};
pub use result::{unix_millis, QueryData, QueryError, QueryResult, ResultStatus, SessionInfo};

use std::time::Instant;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{QueryAction, StreamDataChunk, StreamingChunk};
use crate::result::merge_chunks;
use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Finished,
    Cancelled,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The session already reached a terminal state.
    Terminal,
    DuplicateSession,
    DataBeforeSession,
    UnknownChunk,
}

/// What applying an input did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Finished,
    Ignored(IgnoreReason),
    /// Finished because the server asked for authentication.
    AuthRedirect { location: Option<String> },
}

#[derive(Debug)]
pub struct QuerySession {
    state: SessionState,
    result: Option<QueryResult>,
    cancel: Option<CancellationToken>,
}

impl Default for QuerySession {
    fn default() -> Self {
        Self::new()
    }
}

impl QuerySession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            result: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn result(&self) -> Option<&QueryResult> {
        self.result.as_ref()
    }

    pub fn query_id(&self) -> Option<&str> {
        self.result.as_ref().map(|result| result.query_id.as_str())
    }

    /// Starts a new query, cancelling any running one, and returns its token.
    pub fn dispatch(&mut self, query_id: impl Into<String>, action: QueryAction) -> CancellationToken {
        if self.is_active() {
            self.cancel();
        }
        let token = CancellationToken::new();
        self.result = Some(QueryResult::loading(query_id, action));
        self.cancel = Some(token.clone());
        self.state = SessionState::Starting;
        token
    }

    pub fn apply_chunk(&mut self, chunk: StreamingChunk) -> Transition {
        match chunk {
            StreamingChunk::StreamData(data) => self.apply_stream_data(vec![data], Instant::now()),
            other => self.apply_control(other),
        }
    }

    /// Merges a batch of `StreamData` chunks as one step.
    pub fn apply_stream_data(&mut self, chunks: Vec<StreamDataChunk>, now: Instant) -> Transition {
        match self.state {
            SessionState::Streaming => {}
            SessionState::Starting => {
                debug!(
                    target: "beach_query::session",
                    query_id = ?self.query_id(),
                    chunks = chunks.len(),
                    "stream data before session; ignoring"
                );
                return Transition::Ignored(IgnoreReason::DataBeforeSession);
            }
            _ => return Transition::Ignored(IgnoreReason::Terminal),
        }
        let Some(result) = self.result.as_mut() else {
            return Transition::Ignored(IgnoreReason::Terminal);
        };
        let summary = merge_chunks(&mut result.data.result_sets, chunks, now);
        debug!(
            target: "beach_query::session",
            query_id = %result.query_id,
            rows = summary.rows,
            result_sets = summary.result_sets_touched,
            "stream data applied"
        );
        Transition::Applied
    }

    fn apply_control(&mut self, chunk: StreamingChunk) -> Transition {
        if !self.is_active() {
            return Transition::Ignored(IgnoreReason::Terminal);
        }
        let state = self.state;
        let Some(result) = self.result.as_mut() else {
            return Transition::Ignored(IgnoreReason::Terminal);
        };

        match chunk {
            StreamingChunk::Session(session) => {
                if state == SessionState::Streaming {
                    debug!(
                        target: "beach_query::session",
                        query_id = %result.query_id,
                        "duplicate session chunk; ignoring"
                    );
                    return Transition::Ignored(IgnoreReason::DuplicateSession);
                }
                debug!(
                    target: "beach_query::session",
                    query_id = %result.query_id,
                    session_id = %session.session_id,
                    node_id = session.node_id,
                    "session created"
                );
                result.session = Some(session.into());
                self.state = SessionState::Streaming;
                Transition::Applied
            }
            StreamingChunk::KeepAlive => {
                result.last_keep_alive = Some(OffsetDateTime::now_utc());
                Transition::Applied
            }
            StreamingChunk::QueryResponse(response) => {
                if state == SessionState::Starting {
                    result.error = Some(QueryError::MissingSession);
                } else {
                    result.data.stats = response.stats;
                    result.data.plan = response.plan;
                    result.data.ast = response.ast;
                }
                self.finish();
                Transition::Finished
            }
            StreamingChunk::Error(error) => {
                // Errors such as an unknown database arrive before any session.
                result.error = Some(QueryError::from_chunk(error));
                self.finish();
                Transition::Finished
            }
            StreamingChunk::Unknown { .. } => Transition::Ignored(IgnoreReason::UnknownChunk),
            StreamingChunk::StreamData(data) => self.apply_stream_data(vec![data], Instant::now()),
        }
    }

    /// Ends the query because its transport failed.
    pub fn fail(&mut self, error: &TransportError) -> Transition {
        if !self.is_active() {
            return Transition::Ignored(IgnoreReason::Terminal);
        }
        if let TransportError::AuthRedirect { location } = error {
            let location = location.clone();
            self.finish();
            return Transition::AuthRedirect { location };
        }
        if let Some(result) = self.result.as_mut() {
            warn!(
                target: "beach_query::session",
                query_id = %result.query_id,
                error = %error,
                "query transport failed"
            );
            result.error = Some(QueryError::from_transport(error));
        }
        self.finish();
        Transition::Finished
    }

    /// Stops the running query; partial results are kept. Returns false if idle or terminal.
    pub fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(result) = self.result.as_mut() {
            result.cancelled = true;
            result.finish();
            debug!(
                target: "beach_query::session",
                query_id = %result.query_id,
                "query cancelled"
            );
        }
        self.drop_pending_rows();
        self.state = SessionState::Cancelled;
        true
    }

    /// Cancels anything running and forgets the last result.
    pub fn reset(&mut self) {
        self.cancel();
        self.result = None;
        self.state = SessionState::Idle;
    }

    fn finish(&mut self) {
        if let Some(result) = self.result.as_mut() {
            result.finish();
        }
        self.cancel = None;
        self.drop_pending_rows();
        self.state = SessionState::Finished;
    }

    fn drop_pending_rows(&mut self) {
        let Some(result) = self.result.as_mut() else {
            return;
        };
        for (index, set) in result.data.result_sets.iter_mut().enumerate() {
            let dropped = set.discard_pending();
            if dropped > 0 {
                warn!(
                    target: "beach_query::session",
                    query_id = %result.query_id,
                    result_index = index,
                    rows = dropped,
                    "discarding rows that never received columns"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{classify, ColumnType, QueryResponseChunk, SessionChunk};
    use serde_json::json;

    fn session_chunk() -> StreamingChunk {
        StreamingChunk::Session(SessionChunk {
            node_id: 1,
            query_id: "server-q".into(),
            session_id: "s1".into(),
            trace_id: None,
        })
    }

    fn data(columns: Option<&[&str]>, rows: &[&str]) -> StreamDataChunk {
        StreamDataChunk {
            seq_no: 0,
            result_index: 0,
            columns: columns.map(|names| names.iter().map(|n| ColumnType::named(*n)).collect()),
            rows: rows.iter().map(|v| vec![json!(v)]).collect(),
            truncated: false,
        }
    }

    fn streaming_session() -> (QuerySession, CancellationToken) {
        let mut session = QuerySession::new();
        let token = session.dispatch("q1", QueryAction::Execute);
        assert_eq!(session.apply_chunk(session_chunk()), Transition::Applied);
        (session, token)
    }

    #[test]
    fn happy_path_reaches_finished() {
        let (mut session, token) = streaming_session();
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(
            session.apply_stream_data(vec![data(Some(&["v"]), &["a", "b"])], Instant::now()),
            Transition::Applied
        );
        assert_eq!(
            session.apply_chunk(StreamingChunk::QueryResponse(QueryResponseChunk {
                stats: Some(json!({"DurationUs": 5})),
                ..QueryResponseChunk::default()
            })),
            Transition::Finished
        );
        let result = session.result().unwrap();
        assert!(!result.is_loading);
        assert!(result.error.is_none());
        assert_eq!(result.total_rows(), 2);
        assert_eq!(result.session.as_ref().unwrap().session_id, "s1");
        assert_eq!(result.data.stats, Some(json!({"DurationUs": 5})));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn terminal_without_session_is_an_error() {
        let mut session = QuerySession::new();
        session.dispatch("q1", QueryAction::Execute);
        let response = classify(json!({"meta": {"event": "QueryResponse"}}));
        assert_eq!(session.apply_chunk(response), Transition::Finished);
        assert_eq!(
            session.result().unwrap().error,
            Some(QueryError::MissingSession)
        );
    }

    #[test]
    fn server_error_before_session_keeps_its_message() {
        let mut session = QuerySession::new();
        session.dispatch("q1", QueryAction::Execute);
        let error = classify(json!({
            "meta": {"event": "QueryResponse"},
            "error": {"message": "Database /nope not found"},
            "issues": [{"message": "scheme error", "severity": 1}]
        }));
        assert_eq!(session.apply_chunk(error), Transition::Finished);

        let result = session.result().unwrap();
        assert_eq!(result.status(), ResultStatus::Failed);
        match result.error.as_ref() {
            Some(QueryError::Server { message, issues, .. }) => {
                assert_eq!(message, "Database /nope not found");
                assert_eq!(issues.len(), 1);
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_chunks_are_ignored() {
        let (mut session, _) = streaming_session();
        let unknown = classify(json!({"meta": {"event": "Progress"}}));
        assert_eq!(
            session.apply_chunk(unknown),
            Transition::Ignored(IgnoreReason::UnknownChunk)
        );
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn data_before_session_and_duplicate_session_are_ignored() {
        let mut session = QuerySession::new();
        session.dispatch("q1", QueryAction::Execute);
        assert_eq!(
            session.apply_chunk(StreamingChunk::StreamData(data(Some(&["v"]), &["x"]))),
            Transition::Ignored(IgnoreReason::DataBeforeSession)
        );
        session.apply_chunk(session_chunk());
        assert_eq!(
            session.apply_chunk(session_chunk()),
            Transition::Ignored(IgnoreReason::DuplicateSession)
        );
        assert_eq!(session.result().unwrap().total_rows(), 0);
    }

    #[test]
    fn error_keeps_partial_results() {
        let (mut session, _) = streaming_session();
        session.apply_stream_data(vec![data(Some(&["v"]), &["a"])], Instant::now());
        let error = classify(json!({
            "meta": {"event": "QueryResponse"},
            "error": {"message": "boom"}
        }));
        assert_eq!(session.apply_chunk(error), Transition::Finished);
        let result = session.result().unwrap();
        assert_eq!(result.total_rows(), 1);
        assert_eq!(result.status(), ResultStatus::Failed);
        assert_eq!(result.error.as_ref().unwrap().to_string(), "boom");
    }

    #[test]
    fn cancel_is_terminal_and_late_chunks_are_inert() {
        let (mut session, token) = streaming_session();
        session.apply_stream_data(vec![data(Some(&["v"]), &["a"])], Instant::now());
        assert!(session.cancel());
        assert!(token.is_cancelled());
        assert_eq!(session.state(), SessionState::Cancelled);

        let before = session.result().cloned();
        assert_eq!(
            session.apply_stream_data(vec![data(None, &["late"])], Instant::now()),
            Transition::Ignored(IgnoreReason::Terminal)
        );
        assert_eq!(
            session.apply_chunk(StreamingChunk::QueryResponse(QueryResponseChunk::default())),
            Transition::Ignored(IgnoreReason::Terminal)
        );
        assert_eq!(session.result().cloned(), before);
        let result = session.result().unwrap();
        assert!(result.cancelled);
        assert!(!result.is_loading);
        assert!(result.error.is_none());
        assert!(!session.cancel());
    }

    #[test]
    fn dispatch_while_running_cancels_previous() {
        let (mut session, first) = streaming_session();
        let second = session.dispatch("q2", QueryAction::Explain);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(session.state(), SessionState::Starting);
        assert_eq!(session.query_id(), Some("q2"));
        assert!(session.result().unwrap().is_loading);
    }

    #[test]
    fn transport_failure_and_auth_redirect() {
        let (mut session, _) = streaming_session();
        assert_eq!(session.fail(&TransportError::UnexpectedEof), Transition::Finished);
        assert!(matches!(
            session.result().unwrap().error,
            Some(QueryError::Transport(_))
        ));

        let mut session = QuerySession::new();
        session.dispatch("q1", QueryAction::Execute);
        let transition = session.fail(&TransportError::AuthRedirect {
            location: Some("/login".into()),
        });
        assert_eq!(
            transition,
            Transition::AuthRedirect {
                location: Some("/login".into())
            }
        );
        let result = session.result().unwrap();
        assert!(result.error.is_none());
        assert!(!result.is_loading);
    }

    #[test]
    fn pending_rows_are_dropped_at_session_end() {
        let (mut session, _) = streaming_session();
        session.apply_stream_data(vec![data(None, &["orphan"])], Instant::now());
        assert_eq!(session.result().unwrap().result_sets()[0].pending_rows(), 1);
        session.apply_chunk(StreamingChunk::QueryResponse(QueryResponseChunk::default()));
        assert_eq!(session.result().unwrap().result_sets()[0].pending_rows(), 0);
        assert_eq!(session.result().unwrap().total_rows(), 0);
    }

    #[test]
    fn reset_returns_to_idle() {
        let (mut session, token) = streaming_session();
        session.reset();
        assert!(token.is_cancelled());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.result().is_none());
    }
}
