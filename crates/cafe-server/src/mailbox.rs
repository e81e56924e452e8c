//! Client registry and mailbox contracts, and their SQLite implementation.
//!
//! Callers only see the narrow get/upsert/delete operations; each call maps
//! to one SQL statement executed under the connection lock, so concurrent
//! writes to the same key serialize without lost updates.

use std::sync::{Mutex, MutexGuard};

use cafe_store::{CafeClient, CafeClientMessage, CafeClientThread, Database, StoreError};

pub trait ClientRegistry: Send + Sync {
    /// Look up a registered client. `Ok(None)` when unknown.
    fn get(&self, id: &str) -> Result<Option<CafeClient>, StoreError>;

    /// Used by the registration flow; the relay never calls it.
    fn register(&self, client: &CafeClient) -> Result<(), StoreError>;

    fn count(&self) -> Result<u64, StoreError>;
}

pub trait MailboxStore: Send + Sync {
    fn upsert_thread(&self, thread: &CafeClientThread) -> Result<(), StoreError>;

    /// Deleting a missing key succeeds.
    fn delete_thread(&self, thread_id: &str, client_id: &str) -> Result<(), StoreError>;

    fn list_threads(&self, client_id: &str) -> Result<Vec<CafeClientThread>, StoreError>;

    fn upsert_message(&self, message: &CafeClientMessage) -> Result<(), StoreError>;

    fn list_messages(&self, client_id: &str) -> Result<Vec<CafeClientMessage>, StoreError>;
}

pub struct SqliteMailbox {
    db: Mutex<Database>,
}

impl SqliteMailbox {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>, StoreError> {
        self.db.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ClientRegistry for SqliteMailbox {
    fn get(&self, id: &str) -> Result<Option<CafeClient>, StoreError> {
        self.db()?.get_cafe_client(id)
    }

    fn register(&self, client: &CafeClient) -> Result<(), StoreError> {
        self.db()?.add_cafe_client(client)
    }

    fn count(&self) -> Result<u64, StoreError> {
        self.db()?.count_cafe_clients()
    }
}

impl MailboxStore for SqliteMailbox {
    fn upsert_thread(&self, thread: &CafeClientThread) -> Result<(), StoreError> {
        self.db()?.upsert_cafe_client_thread(thread)
    }

    fn delete_thread(&self, thread_id: &str, client_id: &str) -> Result<(), StoreError> {
        self.db()?.delete_cafe_client_thread(thread_id, client_id)?;
        Ok(())
    }

    fn list_threads(&self, client_id: &str) -> Result<Vec<CafeClientThread>, StoreError> {
        self.db()?.list_cafe_client_threads(client_id)
    }

    fn upsert_message(&self, message: &CafeClientMessage) -> Result<(), StoreError> {
        self.db()?.upsert_cafe_client_message(message)
    }

    fn list_messages(&self, client_id: &str) -> Result<Vec<CafeClientMessage>, StoreError> {
        self.db()?.list_cafe_client_messages(client_id)
    }
}
