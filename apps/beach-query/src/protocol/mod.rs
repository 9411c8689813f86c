//! Wire types for the streaming query endpoint.

pub mod chunk;
pub mod request;

pub use chunk::{
    classify, ChunkKind, ColumnType, ErrorChunk, Issue, QueryResponseChunk, SessionChunk,
    StreamDataChunk, StreamingChunk,
};
pub use request::{
    action_and_syntax, QueryAction, QueryMode, QueryParams, QueryRequest, QuerySettings,
    QuerySyntax, StatisticsMode, TracingLevel, TransactionMode,
};
