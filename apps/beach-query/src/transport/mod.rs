//! Byte-stream sources for query responses.

mod http;
mod scripted;

pub use http::HttpTransport;
pub use scripted::{ScriptedTransport, StreamFeed};

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use multipart_stream::DecodeError;
use thiserror::Error;

use crate::protocol::QueryRequest;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("authentication required")]
    AuthRedirect { location: Option<String> },
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("stream ended before the query finished")]
    UnexpectedEof,
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("connection closed: {0}")]
    Closed(String),
}

/// Opens the streaming response for one query request.
#[async_trait]
pub trait QueryTransport: Send + Sync {
    async fn open(&self, request: &QueryRequest) -> Result<ByteStream, TransportError>;
}
