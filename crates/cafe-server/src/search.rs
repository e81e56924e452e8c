//! Streaming query engine.
//!
//! A [`QueryHandler`] answers one query by producing results into a
//! [`QuerySink`]; the HTTP layer consumes the paired [`QueryStream`] and
//! writes each result as a length-prefixed frame. The consumer cancels the
//! producer exactly once, whichever way the stream ends: completion, error,
//! or the client hanging up (which drops the response body and with it the
//! `QueryStream`).

use bytes::Bytes;
use cafe_shared::framing::encode_frame;
use cafe_shared::protocol::Envelope;
use futures::stream::{self, BoxStream, StreamExt};
use libp2p::PeerId;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::ServerError;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    Invalid(String),

    #[error("Index error: {0}")]
    Index(String),
}

/// Producer was told to stop, or the consumer is gone.
#[derive(Debug, Error)]
#[error("query cancelled")]
pub struct Cancelled;

pub enum StreamEvent {
    Item(Envelope),
    Error(QueryError),
    Done,
}

pub trait QueryHandler: Send + Sync {
    /// Start answering `query` for `peer`. Results are produced in the
    /// background; the returned stream yields them in order.
    fn handle(&self, query: Envelope, peer: PeerId) -> QueryStream;
}

pub fn query_channel(buffer: usize) -> (QuerySink, QueryStream) {
    let (results_tx, results_rx) = mpsc::channel(buffer.max(1));
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        QuerySink {
            results: results_tx,
            cancel: cancel_rx,
        },
        QueryStream {
            results: results_rx,
            cancel: Some(cancel_tx),
            finished: false,
        },
    )
}

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

pub struct QuerySink {
    results: mpsc::Sender<Result<Envelope, QueryError>>,
    cancel: watch::Receiver<bool>,
}

impl QuerySink {
    /// Emit one result, waiting for room. Fails once cancelled.
    pub async fn send(&mut self, item: Envelope) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.wait_for(|c| *c) => Err(Cancelled),
            sent = self.results.send(Ok(item)) => sent.map_err(|_| Cancelled),
        }
    }

    /// End the query with an error. Consumes the sink, so at most one
    /// error is ever produced.
    pub async fn fail(self, err: QueryError) {
        let _ = self.results.send(Err(err)).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow() || self.results.is_closed()
    }
}

#[cfg(test)]
impl QuerySink {
    /// Resolves once the consumer cancels or goes away.
    async fn cancelled(&mut self) {
        let _ = self.cancel.wait_for(|c| *c).await;
    }
}

// ---------------------------------------------------------------------------
// Consumer side
// ---------------------------------------------------------------------------

pub struct QueryStream {
    results: mpsc::Receiver<Result<Envelope, QueryError>>,
    cancel: Option<watch::Sender<bool>>,
    finished: bool,
}

impl QueryStream {
    /// Wait for the next result; never busy-polls.
    pub async fn next(&mut self) -> StreamEvent {
        match self.results.recv().await {
            Some(Ok(item)) => StreamEvent::Item(item),
            Some(Err(e)) => {
                self.finished = true;
                StreamEvent::Error(e)
            }
            None => {
                self.finished = true;
                StreamEvent::Done
            }
        }
    }

    /// Tell the producer to stop. Returns `false` if already signalled.
    pub fn cancel(&mut self) -> bool {
        match self.cancel.take() {
            Some(tx) => {
                if !self.finished {
                    debug!("Closing query stream");
                }
                let _ = tx.send(true);
                true
            }
            None => false,
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

// ---------------------------------------------------------------------------
// Framing engine
// ---------------------------------------------------------------------------

pub type FrameStream = BoxStream<'static, Result<Bytes, ServerError>>;

pub enum SearchResponse {
    /// The handler finished without results.
    Empty,
    /// At least one result; frames follow in production order.
    Frames(FrameStream),
}

fn frame(item: &Envelope) -> Result<Bytes, ServerError> {
    let payload = item
        .to_bytes()
        .map_err(|e| ServerError::StreamAborted(e.to_string()))?;
    encode_frame(&payload).map_err(|e| {
        warn!(error = %e, "Query result does not fit in a frame");
        ServerError::StreamAborted(e.to_string())
    })
}

/// Wait for the first event so that a query failing up front is reported
/// as a status code rather than a cut-off stream.
pub async fn open(mut stream: QueryStream) -> Result<SearchResponse, ServerError> {
    match stream.next().await {
        StreamEvent::Error(e) => {
            warn!(error = %e, "Query failed");
            Err(ServerError::StreamAborted(e.to_string()))
        }
        StreamEvent::Done => Ok(SearchResponse::Empty),
        StreamEvent::Item(item) => {
            let first = frame(&item)?;
            Ok(SearchResponse::Frames(frames(stream, first)))
        }
    }
}

enum FrameState {
    Running {
        stream: QueryStream,
        pending: Option<Bytes>,
    },
    Finished,
}

fn frames(stream: QueryStream, first: Bytes) -> FrameStream {
    let initial = FrameState::Running {
        stream,
        pending: Some(first),
    };
    stream::unfold(initial, |state| async move {
        let FrameState::Running {
            mut stream,
            pending,
        } = state
        else {
            return None;
        };

        if let Some(bytes) = pending {
            return Some((
                Ok(bytes),
                FrameState::Running {
                    stream,
                    pending: None,
                },
            ));
        }

        match stream.next().await {
            StreamEvent::Item(item) => match frame(&item) {
                Ok(bytes) => Some((
                    Ok(bytes),
                    FrameState::Running {
                        stream,
                        pending: None,
                    },
                )),
                Err(e) => Some((Err(e), FrameState::Finished)),
            },
            StreamEvent::Error(e) => {
                debug!(error = %e, "Aborting query stream");
                Some((
                    Err(ServerError::StreamAborted(e.to_string())),
                    FrameState::Finished,
                ))
            }
            StreamEvent::Done => None,
        }
    })
    .boxed()
}
