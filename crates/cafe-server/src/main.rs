//! # cafe-server
//!
//! Cafe node: a relay and backup service for peers that are offline.
//!
//! This binary provides:
//! - **Content pinning** on behalf of registered clients, in a
//!   content-addressed store on local disk
//! - **Thread snapshots**: one encrypted blob per thread per client
//! - **Store-and-forward inbox** for message envelopes addressed to clients
//!   that are currently unreachable, with best-effort "new mail" notices
//! - **Streamed search** over the local index, answered as length-prefixed
//!   frames on one long-lived response
//! - **REST API** (axum) for all of the above plus an admin surface

mod api;
mod config;
mod content_store;
mod error;
mod index;
mod mailbox;
mod notify;
mod search;
mod service;

use std::sync::Arc;
use std::time::Instant;

use cafe_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::content_store::FsContentStore;
use crate::index::MailboxIndex;
use crate::mailbox::SqliteMailbox;
use crate::notify::{ConnectedClients, Notifier};
use crate::service::CafeService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cafe_server=debug")),
        )
        .init();

    info!("Starting cafe node v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    info!(
        instance = %config.instance_name,
        admin_enabled = config.admin_token.is_some(),
        "Cafe instance settings"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Client registry + mailbox (creates the database file if missing)
    let db = Database::open_at(&config.database_path)?;
    let mailbox = Arc::new(SqliteMailbox::new(db));

    // Content store (creates directories if missing)
    let content = Arc::new(
        FsContentStore::new(config.content_store_path.clone(), config.max_object_size).await?,
    );

    // Notification fan-out to clients holding a watch connection
    let connected = ConnectedClients::new();
    let (notifier, notify_worker) = Notifier::spawn(
        Arc::new(connected.clone()),
        config.notify_queue_capacity,
        config.notify_timeout,
    );

    let service = Arc::new(CafeService::new(
        content,
        mailbox.clone(),
        mailbox.clone(),
        notifier,
    ));
    let index = Arc::new(MailboxIndex::new(mailbox.clone(), config.query_buffer));

    let http_addr = config.http_addr;
    let app_state = AppState {
        service,
        search: index,
        clients: mailbox,
        connected,
        config: Arc::new(config),
        started: Instant::now(),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    // -----------------------------------------------------------------------
    // 5. Deliver notices that were queued before shutdown
    // -----------------------------------------------------------------------
    let drained = notify_worker.shutdown().await;
    info!(notices = drained, "Notification queue drained");

    if let Err(e) = &result {
        tracing::error!(error = %e, "HTTP server failed");
    }
    result
}
