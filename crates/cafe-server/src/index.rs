//! Local index answering search queries from the mailbox.

use std::sync::Arc;

use cafe_shared::constants::MAX_FRAME_PAYLOAD;
use cafe_shared::protocol::{Envelope, MessageType, QueryKind, QueryResult};
use libp2p::PeerId;
use tracing::{debug, warn};

use crate::mailbox::MailboxStore;
use crate::search::{query_channel, QueryError, QueryHandler, QuerySink, QueryStream};

pub struct MailboxIndex {
    mailbox: Arc<dyn MailboxStore>,
    buffer: usize,
}

impl MailboxIndex {
    pub fn new(mailbox: Arc<dyn MailboxStore>, buffer: usize) -> Self {
        Self { mailbox, buffer }
    }
}

impl QueryHandler for MailboxIndex {
    fn handle(&self, query: Envelope, peer: PeerId) -> QueryStream {
        let (sink, stream) = query_channel(self.buffer);
        let mailbox = self.mailbox.clone();
        tokio::spawn(run_query(mailbox, query, peer, sink));
        stream
    }
}

async fn run_query(
    mailbox: Arc<dyn MailboxStore>,
    query: Envelope,
    peer: PeerId,
    mut sink: QuerySink,
) {
    let query = match query.query() {
        Ok(q) => q,
        Err(e) => {
            sink.fail(QueryError::Invalid(e.to_string())).await;
            return;
        }
    };

    let limit = match query.limit {
        0 => usize::MAX,
        n => n as usize,
    };

    match query.kind {
        QueryKind::ThreadSnapshots => {
            let threads = match mailbox.list_threads(&peer.to_string()) {
                Ok(threads) => threads,
                Err(e) => {
                    sink.fail(QueryError::Index(e.to_string())).await;
                    return;
                }
            };

            let mut sent = 0usize;
            for thread in threads {
                if sent >= limit {
                    break;
                }
                let id = thread.id.clone();
                let result = QueryResult {
                    id: thread.id,
                    date: thread.updated,
                    value: thread.ciphertext,
                };
                let item = match Envelope::wrap(MessageType::QueryResult, &result) {
                    Ok(item) => item,
                    Err(e) => {
                        sink.fail(QueryError::Index(e.to_string())).await;
                        return;
                    }
                };
                // unframeable results are skipped, the rest still stream
                let size = match item.to_bytes() {
                    Ok(bytes) => bytes.len(),
                    Err(e) => {
                        sink.fail(QueryError::Index(e.to_string())).await;
                        return;
                    }
                };
                if size > MAX_FRAME_PAYLOAD {
                    warn!(query = %query.id, thread = %id, size, "Skipping snapshot too large for a frame");
                    continue;
                }
                if sink.send(item).await.is_err() {
                    debug!(query = %query.id, sent, "Query cancelled by consumer");
                    return;
                }
                sent += 1;
            }
            debug!(query = %query.id, peer = %peer, sent, "Query complete");
        }
    }
}
