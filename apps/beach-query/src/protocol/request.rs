use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Row cap sent with every streaming request unless the caller overrides it.
pub const STREAMING_LIMIT_ROWS: u64 = 100_000_000;
pub const OUTPUT_CHUNK_MAX_SIZE: u32 = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueryAction {
    #[default]
    Execute,
    Explain,
}

impl QueryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryAction::Execute => "execute",
            QueryAction::Explain => "explain",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Script,
    Scan,
    Data,
    Query,
    Pg,
}

impl QueryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Script => "script",
            QueryMode::Scan => "scan",
            QueryMode::Data => "data",
            QueryMode::Query => "query",
            QueryMode::Pg => "pg",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuerySyntax {
    #[default]
    #[serde(rename = "yql_v1")]
    YqlV1,
    #[serde(rename = "pg")]
    Pg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StatisticsMode {
    None,
    Basic,
    Full,
    Profile,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum TracingLevel {
    #[default]
    Off,
    Toplevel,
    Info,
    Debug,
    Diagnostic,
    Trace,
}

impl TracingLevel {
    pub fn verbosity(self) -> u8 {
        match self {
            TracingLevel::Off => 0,
            TracingLevel::Toplevel => 1,
            TracingLevel::Info => 2,
            TracingLevel::Debug => 3,
            TracingLevel::Diagnostic => 4,
            TracingLevel::Trace => 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionMode {
    #[default]
    Implicit,
    SerializableReadWrite,
    OnlineReadOnly,
    StaleReadOnly,
    SnapshotReadOnly,
}

/// User-facing knobs that shape a single query request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuerySettings {
    pub mode: Option<QueryMode>,
    pub statistics: Option<StatisticsMode>,
    pub tracing_level: Option<TracingLevel>,
    pub transaction_mode: TransactionMode,
    pub limit_rows: Option<u64>,
    pub timeout_secs: Option<u64>,
}

/// Everything the tab manager needs to launch a query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryParams {
    pub query: String,
    pub database: String,
    pub action: QueryAction,
    pub settings: QuerySettings,
}

impl QueryParams {
    pub fn new(query: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            database: database.into(),
            action: QueryAction::Execute,
            settings: QuerySettings::default(),
        }
    }

    pub fn with_action(mut self, action: QueryAction) -> Self {
        self.action = action;
        self
    }

    pub fn with_settings(mut self, settings: QuerySettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Maps an action and optional mode to the server's action id and syntax.
pub fn action_and_syntax(action: QueryAction, mode: Option<QueryMode>) -> (String, QuerySyntax) {
    match mode {
        Some(QueryMode::Pg) => (format!("{}-query", action.as_str()), QuerySyntax::Pg),
        Some(mode) => (
            format!("{}-{}", action.as_str(), mode.as_str()),
            QuerySyntax::YqlV1,
        ),
        None => (action.as_str().to_string(), QuerySyntax::YqlV1),
    }
}

/// JSON body posted to the streaming query endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryRequest {
    pub query: String,
    pub database: String,
    pub action: String,
    pub syntax: QuerySyntax,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StatisticsMode>,
    #[serde(rename = "tracingLevel", skip_serializing_if = "Option::is_none")]
    pub tracing_level: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_mode: Option<TransactionMode>,
    /// Milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    pub output_chunk_max_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_results: Option<bool>,
    pub query_id: String,
}

impl QueryRequest {
    pub fn streaming(params: &QueryParams, query_id: impl Into<String>) -> Self {
        let settings = &params.settings;
        let (action, syntax) = action_and_syntax(params.action, settings.mode);
        let transaction_mode = match settings.transaction_mode {
            TransactionMode::Implicit => None,
            mode => Some(mode),
        };
        let tracing_level = settings
            .tracing_level
            .filter(|level| *level != TracingLevel::Off)
            .map(TracingLevel::verbosity);

        Self {
            query: params.query.clone(),
            database: params.database.clone(),
            action,
            syntax,
            stats: settings.statistics,
            tracing_level,
            limit_rows: Some(settings.limit_rows.unwrap_or(STREAMING_LIMIT_ROWS)),
            transaction_mode,
            timeout: settings
                .timeout_secs
                .map(|secs| secs.saturating_mul(1000)),
            output_chunk_max_size: OUTPUT_CHUNK_MAX_SIZE,
            concurrent_results: None,
            query_id: query_id.into(),
        }
    }

    /// Value for the `X-Trace-Verbosity` header, when tracing was requested.
    pub fn trace_verbosity(&self) -> Option<u8> {
        self.tracing_level
    }
}
