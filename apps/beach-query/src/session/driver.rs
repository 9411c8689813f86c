use std::sync::Arc;

use futures_util::StreamExt;
use multipart_stream::FrameDecoder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::protocol::{classify, QueryRequest, StreamDataChunk, StreamingChunk};
use crate::tabs::TabId;
use crate::transport::{QueryTransport, TransportError};

/// Something the driver observed for one query, addressed to its tab.
#[derive(Debug)]
pub struct SessionEvent {
    pub tab_id: TabId,
    pub query_id: String,
    pub kind: SessionEventKind,
}

#[derive(Debug)]
pub enum SessionEventKind {
    Chunk(StreamingChunk),
    /// Consecutive `StreamData` chunks decoded from one network read.
    StreamData(Vec<StreamDataChunk>),
    Failed(TransportError),
}

/// Pumps one query's response into `events` until it ends or is cancelled.
///
/// The driver owns the transport stream and the frame decoder. It never
/// touches session state; cancellation stops the byte read without sending
/// anything further.
pub async fn drive_query(
    transport: Arc<dyn QueryTransport>,
    request: QueryRequest,
    cancel: CancellationToken,
    tab_id: TabId,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let query_id = request.query_id.clone();
    let emit = |kind: SessionEventKind| {
        events
            .send(SessionEvent {
                tab_id: tab_id.clone(),
                query_id: query_id.clone(),
                kind,
            })
            .is_ok()
    };

    let opened = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(target: "beach_query::session", query_id = %query_id, "cancelled before response");
            return;
        }
        opened = transport.open(&request) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(err) => {
            emit(SessionEventKind::Failed(err));
            return;
        }
    };

    let mut decoder = FrameDecoder::new();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    target: "beach_query::session",
                    query_id = %query_id,
                    bytes = decoder.stats().bytes_in,
                    "cancelled; closing stream"
                );
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                let (batch, terminal) = decode_read(&mut decoder, &bytes);
                for kind in batch {
                    if !emit(kind) {
                        debug!(target: "beach_query::session", query_id = %query_id, "event receiver gone");
                        return;
                    }
                }
                if terminal {
                    trace!(
                        target: "beach_query::session",
                        query_id = %query_id,
                        frames = decoder.stats().frames,
                        skipped = decoder.stats().skipped,
                        "terminal chunk received"
                    );
                    return;
                }
            }
            Some(Err(err)) => {
                emit(SessionEventKind::Failed(err));
                return;
            }
            None => {
                let err = match decoder.finish() {
                    Err(err) => TransportError::Decode(err),
                    Ok(()) => TransportError::UnexpectedEof,
                };
                emit(SessionEventKind::Failed(err));
                return;
            }
        }
    }
}

/// Decodes one network read into events, grouping adjacent `StreamData`.
///
/// Events after a terminal chunk in the same read are not produced.
fn decode_read(decoder: &mut FrameDecoder, bytes: &[u8]) -> (Vec<SessionEventKind>, bool) {
    let mut events = Vec::new();
    let mut data = Vec::new();
    let mut terminal = false;

    decoder.process_chunk(bytes, |frame| {
        if terminal {
            return;
        }
        match classify(frame.payload) {
            StreamingChunk::StreamData(chunk) => data.push(chunk),
            chunk => {
                if !data.is_empty() {
                    events.push(SessionEventKind::StreamData(std::mem::take(&mut data)));
                }
                terminal = chunk.is_terminal();
                events.push(SessionEventKind::Chunk(chunk));
            }
        }
    });
    if !data.is_empty() {
        events.push(SessionEventKind::StreamData(data));
    }
    (events, terminal)
}
