use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub const EVENT_SESSION_CREATED: &str = "SessionCreated";
pub const EVENT_STREAM_DATA: &str = "StreamData";
pub const EVENT_QUERY_RESPONSE: &str = "QueryResponse";
pub const EVENT_KEEP_ALIVE: &str = "KeepAlive";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ColumnType {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionChunk {
    pub node_id: u64,
    pub query_id: String,
    pub session_id: String,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamDataChunk {
    pub seq_no: u64,
    pub result_index: usize,
    pub columns: Option<Vec<ColumnType>>,
    pub rows: Vec<Vec<Value>>,
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResponseChunk {
    pub version: Option<String>,
    pub kind: Option<String>,
    pub stats: Option<Value>,
    pub plan: Option<Value>,
    pub ast: Option<String>,
}

/// Server-side issue report; issues nest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorChunk {
    pub error: Value,
    pub issues: Vec<Issue>,
}

impl ErrorChunk {
    /// Best human-readable message carried by the error payload.
    pub fn message(&self) -> String {
        let from_error = match &self.error {
            Value::String(text) => Some(text.clone()),
            Value::Object(map) => map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned),
            _ => None,
        };
        from_error
            .or_else(|| first_issue_message(&self.issues))
            .unwrap_or_else(|| "query failed".to_string())
    }
}

fn first_issue_message(issues: &[Issue]) -> Option<String> {
    issues.iter().find_map(|issue| {
        issue
            .message
            .clone()
            .or_else(|| first_issue_message(&issue.issues))
    })
}

/// Decoded, validated streaming chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingChunk {
    Session(SessionChunk),
    StreamData(StreamDataChunk),
    QueryResponse(QueryResponseChunk),
    Error(ErrorChunk),
    KeepAlive,
    Unknown { event: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Session,
    StreamData,
    QueryResponse,
    Error,
    KeepAlive,
    Unknown,
}

impl ChunkKind {
    /// Classifies a raw frame by its discriminant without validating the body.
    pub fn of(payload: &Value) -> ChunkKind {
        let event = payload
            .get("meta")
            .and_then(|meta| meta.get("event"))
            .and_then(Value::as_str);
        match event {
            Some(EVENT_SESSION_CREATED) => ChunkKind::Session,
            Some(EVENT_STREAM_DATA) => ChunkKind::StreamData,
            Some(EVENT_QUERY_RESPONSE) if payload.get("error").is_some() => ChunkKind::Error,
            Some(EVENT_QUERY_RESPONSE) => ChunkKind::QueryResponse,
            Some(EVENT_KEEP_ALIVE) => ChunkKind::KeepAlive,
            None if payload.get("error").is_some() => ChunkKind::Error,
            _ => ChunkKind::Unknown,
        }
    }
}

impl StreamingChunk {
    pub fn kind(&self) -> ChunkKind {
        match self {
            StreamingChunk::Session(_) => ChunkKind::Session,
            StreamingChunk::StreamData(_) => ChunkKind::StreamData,
            StreamingChunk::QueryResponse(_) => ChunkKind::QueryResponse,
            StreamingChunk::Error(_) => ChunkKind::Error,
            StreamingChunk::KeepAlive => ChunkKind::KeepAlive,
            StreamingChunk::Unknown { .. } => ChunkKind::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamingChunk::QueryResponse(_) | StreamingChunk::Error(_)
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawStreamMeta {
    seq_no: u64,
    result_index: usize,
}

#[derive(Debug, Default, Deserialize)]
struct RawResultSet {
    #[serde(default)]
    columns: Option<Vec<ColumnType>>,
    #[serde(default)]
    rows: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    truncated: Option<bool>,
}

/// Turns a decoded frame into a [`StreamingChunk`].
///
/// Frames with an unrecognised discriminant, or a recognised one whose body
/// does not match the expected shape, come back as `Unknown`.
pub fn classify(payload: Value) -> StreamingChunk {
    let kind = ChunkKind::of(&payload);
    let Value::Object(mut body) = payload else {
        return StreamingChunk::Unknown { event: None };
    };
    let meta = match body.remove("meta") {
        Some(Value::Object(meta)) => meta,
        _ => Map::new(),
    };

    let parsed = match kind {
        ChunkKind::Session => serde_json::from_value::<SessionChunk>(Value::Object(meta.clone()))
            .map(StreamingChunk::Session)
            .map_err(|err| err.to_string()),
        ChunkKind::StreamData => parse_stream_data(&meta, &mut body),
        ChunkKind::QueryResponse => Ok(StreamingChunk::QueryResponse(QueryResponseChunk {
            version: meta.get("version").and_then(scalar_text),
            kind: meta.get("type").and_then(scalar_text),
            stats: body.remove("stats"),
            plan: body.remove("plan"),
            ast: body.get("ast").and_then(scalar_text),
        })),
        ChunkKind::Error => Ok(StreamingChunk::Error(ErrorChunk {
            error: body.remove("error").unwrap_or(Value::Null),
            issues: body
                .remove("issues")
                .and_then(|issues| serde_json::from_value(issues).ok())
                .unwrap_or_default(),
        })),
        ChunkKind::KeepAlive => Ok(StreamingChunk::KeepAlive),
        ChunkKind::Unknown => Err("unrecognised event".to_string()),
    };

    parsed.unwrap_or_else(|reason| {
        let event = meta
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_owned);
        debug!(
            target: "beach_query::protocol",
            event = ?event,
            reason = %reason,
            "ignoring chunk"
        );
        StreamingChunk::Unknown { event }
    })
}

fn parse_stream_data(
    meta: &Map<String, Value>,
    body: &mut Map<String, Value>,
) -> Result<StreamingChunk, String> {
    let RawStreamMeta {
        seq_no,
        result_index,
    } = serde_json::from_value(Value::Object(meta.clone())).map_err(|err| err.to_string())?;
    let result: RawResultSet = match body.remove("result") {
        Some(Value::Null) | None => RawResultSet::default(),
        Some(value) => serde_json::from_value(value).map_err(|err| err.to_string())?,
    };
    Ok(StreamingChunk::StreamData(StreamDataChunk {
        seq_no,
        result_index,
        columns: result.columns,
        rows: result.rows.unwrap_or_default(),
        truncated: result.truncated.unwrap_or(false),
    }))
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
