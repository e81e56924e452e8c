//! Relay protocol handler.
//!
//! [`CafeService`] owns the request-level operations a cafe performs for its
//! clients: pinning content, keeping thread snapshots and queueing message
//! envelopes for clients that are offline. It is constructed once at startup
//! with its collaborators injected and shared by reference with the HTTP
//! layer.

use std::collections::HashSet;
use std::sync::Arc;

use cafe_shared::dag::DagNode;
use cafe_shared::protocol::Envelope;
use cafe_shared::types::{Codec, ContentId};
use cafe_store::{CafeClient, CafeClientMessage, CafeClientThread};
use chrono::Utc;
use tracing::{debug, warn};

use crate::content_store::{ContentError, ContentStore, PinMode};
use crate::error::ServerError;
use crate::mailbox::{ClientRegistry, MailboxStore};
use crate::notify::Notifier;

/// Outcome of a message delivery. Both variants answer the sender with
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The envelope is pinned and recorded in the recipient's inbox.
    Queued(ContentId),
    /// The recipient is not a client of this cafe; nothing was stored.
    Dropped,
}

pub struct CafeService {
    content: Arc<dyn ContentStore>,
    clients: Arc<dyn ClientRegistry>,
    mailbox: Arc<dyn MailboxStore>,
    notifier: Notifier,
}

impl CafeService {
    pub fn new(
        content: Arc<dyn ContentStore>,
        clients: Arc<dyn ClientRegistry>,
        mailbox: Arc<dyn MailboxStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            content,
            clients,
            mailbox,
            notifier,
        }
    }

    /// The registered client behind an authenticated identity.
    pub fn registered_client(&self, client_id: &str) -> Result<CafeClient, ServerError> {
        self.clients
            .get(client_id)?
            .ok_or(ServerError::ClientNotFound)
    }

    /// Inbox entries still waiting for `client_id` to pick them up.
    pub fn pending_messages(&self, client_id: &str) -> Result<Vec<CafeClientMessage>, ServerError> {
        Ok(self.mailbox.list_messages(client_id)?)
    }

    /// Pin one uploaded object, structured if it decodes as a node and as
    /// a raw blob otherwise.
    pub async fn store_object(&self, data: &[u8]) -> Result<ContentId, ServerError> {
        let id = match self.content.pin_structured(data).await {
            Ok(id) => id,
            Err(structured) => {
                debug!(error = %structured, "Not a structured object, storing raw");
                self.content.pin_raw(data).await.map_err(|e| {
                    warn!(error = %e, "Unable to store object");
                    ServerError::MalformedInput(e.to_string())
                })?
            }
        };
        debug!(cid = %id, size = data.len(), "Stored object");
        Ok(id)
    }

    /// Drop every pin held on `id`. Returns how many pins were removed.
    pub async fn unstore(&self, id: &ContentId) -> Result<usize, ServerError> {
        let records = self.content.pin_status(id).await.map_err(bad_request)?;

        let mut unpinned = 0;
        for record in records.iter().filter(|r| r.mode != PinMode::NotPinned) {
            self.content.unpin(&record.key).await.map_err(bad_request)?;
            debug!(cid = %record.key, "Unstored object");
            unpinned += 1;
        }
        Ok(unpinned)
    }

    /// Replace the client's snapshot of `thread_id` with `ciphertext`.
    pub fn store_thread(
        &self,
        client_id: &str,
        thread_id: &str,
        ciphertext: Vec<u8>,
    ) -> Result<(), ServerError> {
        let client = self.registered_client(client_id)?;
        self.mailbox.upsert_thread(&CafeClientThread {
            id: thread_id.to_string(),
            client: client.id,
            ciphertext,
            updated: Utc::now(),
        })?;
        debug!(thread = %thread_id, client = %client_id, "Stored thread");
        Ok(())
    }

    pub fn unstore_thread(&self, client_id: &str, thread_id: &str) -> Result<(), ServerError> {
        let client = self.registered_client(client_id)?;
        self.mailbox.delete_thread(thread_id, &client.id)?;
        debug!(thread = %thread_id, client = %client_id, "Unstored thread");
        Ok(())
    }

    /// Queue `body`, an encoded [`Envelope`] carrying a thread update, for
    /// the offline client `recipient`.
    ///
    /// Every content store failure along the way is reported as malformed
    /// input, including faults of the store itself. Only the final inbox
    /// write surfaces as a storage failure.
    pub async fn deliver_message(
        &self,
        sender: &str,
        recipient: &str,
        body: &[u8],
    ) -> Result<Delivery, ServerError> {
        let Some(client) = self.clients.get(recipient)? else {
            warn!(client = %recipient, "Received message for unknown client");
            return Ok(Delivery::Dropped);
        };

        let envelope = Envelope::from_bytes(body).map_err(bad_request)?;
        let update = envelope.thread_envelope().map_err(bad_request)?;

        let node_id = self
            .content
            .pin_structured(&update.node)
            .await
            .map_err(bad_request)?;
        let node = self.content.resolve(&node_id).await.map_err(bad_request)?;

        let carried = match &update.block {
            Some(block) => Some(self.content.pin_raw(block).await.map_err(bad_request)?),
            None => None,
        };
        self.extract(&node, carried).await.map_err(bad_request)?;

        let id = self.content.pin_raw(body).await.map_err(bad_request)?;

        self.mailbox.upsert_message(&CafeClientMessage {
            id: id.to_hex(),
            peer: sender.to_string(),
            client: client.id.clone(),
            date: Utc::now(),
        })?;

        self.notifier.submit(client.id);

        debug!(
            message = %id.short(),
            thread = %update.thread,
            from = %sender,
            "Delivered message"
        );
        Ok(Delivery::Queued(id))
    }

    /// Make sure everything reachable from `root` is in the local store.
    /// `satisfied` names a leaf the caller has already pinned.
    async fn extract(
        &self,
        root: &DagNode,
        satisfied: Option<ContentId>,
    ) -> Result<usize, ContentError> {
        let mut visited: HashSet<ContentId> = satisfied.into_iter().collect();
        let mut pending: Vec<ContentId> = root.links.iter().map(|l| l.cid).collect();
        let mut walked = 0;

        while let Some(cid) = pending.pop() {
            if !visited.insert(cid) {
                continue;
            }
            if !self.content.has(&cid).await? {
                return Err(ContentError::NotFound(cid));
            }
            if cid.codec == Codec::Node {
                let child = self.content.resolve(&cid).await?;
                pending.extend(child.links.iter().map(|l| l.cid));
            }
            walked += 1;
        }
        Ok(walked)
    }
}

fn bad_request(e: impl std::fmt::Display) -> ServerError {
    warn!(error = %e, "Rejected relay request");
    ServerError::MalformedInput(e.to_string())
}
