//! Best-effort "new mail" notifications.
//!
//! Deliveries submit the recipient's client id to a bounded queue; a single
//! worker task hands each id to a [`NotificationSink`]. Submission never
//! blocks and never fails the delivery: a full queue or an unreachable
//! client is only logged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a watching client receives when mail is queued for it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MailNotice {
    pub client: String,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Client {0} has no open connection")]
    NotConnected(String),

    #[error("Connection to client {0} closed")]
    Closed(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, client_id: &str) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// Queue + worker
// ---------------------------------------------------------------------------

/// Submission side of the notification queue.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<String>,
}

/// Owns the worker task. Call [`NotifierWorker::shutdown`] to drain.
pub struct NotifierWorker {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
}

impl Notifier {
    pub fn spawn(
        sink: Arc<dyn NotificationSink>,
        capacity: usize,
        timeout: Duration,
    ) -> (Notifier, NotifierWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(sink, rx, stop_rx, timeout));
        (Notifier { tx }, NotifierWorker { stop, handle })
    }

    /// Queue a notification for `client_id`. Never waits.
    pub fn submit(&self, client_id: String) {
        match self.tx.try_send(client_id) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(client)) => {
                debug!(client = %client, "Notification queue full, dropping notice");
            }
            Err(mpsc::error::TrySendError::Closed(client)) => {
                debug!(client = %client, "Notification queue closed, dropping notice");
            }
        }
    }
}

impl NotifierWorker {
    /// Stop accepting notices, deliver everything already queued and wait
    /// for the worker to exit. Returns the number of notices attempted.
    pub async fn shutdown(self) -> usize {
        let _ = self.stop.send(());
        match self.handle.await {
            Ok(attempted) => attempted,
            Err(e) => {
                warn!(error = %e, "Notification worker failed");
                0
            }
        }
    }
}

async fn run_worker(
    sink: Arc<dyn NotificationSink>,
    mut rx: mpsc::Receiver<String>,
    mut stop: oneshot::Receiver<()>,
    timeout: Duration,
) -> usize {
    let mut attempted = 0;
    loop {
        tokio::select! {
            _ = &mut stop => {
                rx.close();
                break;
            }
            next = rx.recv() => match next {
                Some(client) => {
                    deliver(sink.as_ref(), &client, timeout).await;
                    attempted += 1;
                }
                None => return attempted,
            },
        }
    }

    // drain what was queued before close()
    while let Some(client) = rx.recv().await {
        deliver(sink.as_ref(), &client, timeout).await;
        attempted += 1;
    }
    info!(attempted, "Notification worker stopped");
    attempted
}

async fn deliver(sink: &dyn NotificationSink, client: &str, timeout: Duration) {
    match tokio::time::timeout(timeout, sink.notify(client)).await {
        Ok(Ok(())) => debug!(client = %client, "Notified client"),
        Ok(Err(e)) => debug!(client = %client, error = %e, "Unable to notify client"),
        Err(_) => debug!(client = %client, "Notification timed out"),
    }
}

// ---------------------------------------------------------------------------
// Connected clients
// ---------------------------------------------------------------------------

/// Registry of clients holding an open watch connection.
///
/// The registry owns the only long-lived sender of each connection, so a
/// watcher that gets replaced sees its stream end.
#[derive(Clone, Default)]
pub struct ConnectedClients {
    inner: Arc<Registry>,
}

#[derive(Default)]
struct Registry {
    slots: RwLock<HashMap<String, Slot>>,
    next_id: AtomicU64,
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<MailNotice>,
}

/// An open watch connection. Dropping it unregisters the client.
pub struct Subscription {
    client: String,
    id: u64,
    rx: mpsc::Receiver<MailNotice>,
    clients: ConnectedClients,
}

impl ConnectedClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watcher for `client_id`, replacing any previous one.
    pub fn subscribe(&self, client_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .inner
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client_id.to_string(), Slot { id, tx });
        if previous.is_some() {
            debug!(client = %client_id, "Replaced existing watch connection");
        }
        Subscription {
            client: client_id.to_string(),
            id,
            rx,
            clients: self.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn sender(&self, client_id: &str) -> Option<mpsc::Sender<MailNotice>> {
        self.inner
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(client_id)
            .map(|slot| slot.tx.clone())
    }
}

impl Subscription {
    /// Next notice, or `None` once the connection has been replaced.
    pub async fn recv(&mut self) -> Option<MailNotice> {
        self.rx.recv().await
    }

    /// Push a notice onto this connection directly.
    pub fn push(&self, notice: MailNotice) {
        let slots = self
            .clients
            .inner
            .slots
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&self.client).filter(|slot| slot.id == self.id) {
            let _ = slot.tx.try_send(notice);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut slots = self
            .clients
            .inner
            .slots
            .write()
            .unwrap_or_else(|e| e.into_inner());
        // a newer watcher may already own the slot
        if slots.get(&self.client).is_some_and(|slot| slot.id == self.id) {
            slots.remove(&self.client);
            debug!(client = %self.client, "Watch connection closed");
        }
    }
}

#[async_trait]
impl NotificationSink for ConnectedClients {
    async fn notify(&self, client_id: &str) -> Result<(), NotifyError> {
        let tx = self
            .sender(client_id)
            .ok_or_else(|| NotifyError::NotConnected(client_id.to_string()))?;

        tx.send(MailNotice {
            client: client_id.to_string(),
            date: Utc::now(),
        })
        .await
        .map_err(|_| NotifyError::Closed(client_id.to_string()))
    }
}
