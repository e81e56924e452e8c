//! Domain model structs persisted in the cafe database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// CafeClient
// ---------------------------------------------------------------------------

/// A peer registered with this cafe. Created by the registration flow; the
/// relay only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CafeClient {
    /// Opaque client identifier (the client's peer id).
    pub id: String,
    /// Address the client registered from.
    pub address: String,
    pub created: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CafeClientThread
// ---------------------------------------------------------------------------

/// Encrypted snapshot of one thread as stored by one client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CafeClientThread {
    /// Thread identifier, unique per client.
    pub id: String,
    /// Owning client id.
    pub client: String,
    /// Opaque ciphertext, replaced wholesale on update.
    pub ciphertext: Vec<u8>,
    pub updated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CafeClientMessage
// ---------------------------------------------------------------------------

/// Inbox entry for one relayed envelope awaiting pickup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CafeClientMessage {
    /// Content id of the pinned envelope.
    pub id: String,
    /// Sender's peer id.
    pub peer: String,
    /// Recipient client id.
    pub client: String,
    /// When the cafe accepted the envelope.
    pub date: DateTime<Utc>,
}
