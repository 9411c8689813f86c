use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use multipart_stream::{encode_json_part, DEFAULT_BOUNDARY};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ByteStream, QueryTransport, TransportError};
use crate::protocol::QueryRequest;

enum Script {
    Bytes(Vec<Bytes>),
    Broken { chunks: Vec<Bytes>, reason: String },
    Feed(mpsc::UnboundedReceiver<Result<Bytes, TransportError>>),
    Fail(TransportError),
}

/// In-process transport that replays queued responses, one per `open`.
///
/// Every request is recorded so callers can assert on what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response delivered as the given reads.
    pub fn push_bytes<I, B>(&self, reads: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks = reads.into_iter().map(Into::into).collect();
        self.scripts.lock().push_back(Script::Bytes(chunks));
    }

    /// Queues `frames` encoded as multipart and cut into reads of `read_size` bytes.
    pub fn push_frames(&self, frames: &[Value], read_size: usize) {
        self.push_bytes(split_reads(&encode_frames(frames), read_size));
    }

    /// Queues a response that yields `frames` and then drops the connection.
    pub fn push_broken(&self, frames: &[Value], reason: impl Into<String>) {
        let chunks = vec![Bytes::from(encode_frames(frames))];
        self.scripts.lock().push_back(Script::Broken {
            chunks,
            reason: reason.into(),
        });
    }

    /// Queues a response driven live through the returned handle.
    pub fn push_feed(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(Script::Feed(rx));
        StreamFeed { tx }
    }

    pub fn push_failure(&self, error: TransportError) {
        self.scripts.lock().push_back(Script::Fail(error));
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl QueryTransport for ScriptedTransport {
    async fn open(&self, request: &QueryRequest) -> Result<ByteStream, TransportError> {
        self.requests.lock().push(request.clone());
        let script = self.scripts.lock().pop_front();
        match script {
            None => Err(TransportError::Closed("no scripted response".into())),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Bytes(chunks)) => Ok(Box::pin(stream::iter(
                chunks.into_iter().map(Ok::<Bytes, TransportError>),
            ))),
            Some(Script::Broken { chunks, reason }) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(TransportError::Closed(reason))));
                Ok(Box::pin(stream::iter(items)))
            }
            Some(Script::Feed(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }))),
        }
    }
}

/// Sending half of a live scripted response; dropping it ends the stream.
#[derive(Clone)]
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl StreamFeed {
    /// Returns false once the reading side has gone away.
    pub fn send_bytes(&self, bytes: impl Into<Bytes>) -> bool {
        self.tx.send(Ok(bytes.into())).is_ok()
    }

    pub fn send_frame(&self, frame: &Value) -> bool {
        self.send_bytes(encode_json_part(DEFAULT_BOUNDARY, frame))
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx
            .send(Err(TransportError::Closed(reason.into())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn encode_frames(frames: &[Value]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|frame| encode_json_part(DEFAULT_BOUNDARY, frame))
        .collect()
}

fn split_reads(bytes: &[u8], read_size: usize) -> Vec<Bytes> {
    bytes
        .chunks(read_size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}
