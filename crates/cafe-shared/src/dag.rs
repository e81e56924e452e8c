//! Structured content objects.
//!
//! A [`DagNode`] is the unit the content store pins "structurally": a small
//! data section plus named links to other content ids. Thread updates are
//! shipped as a serialized node linking the encrypted block. A cafe never
//! fetches from the network, so every linked object must either travel in
//! the same envelope or already be pinned locally.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::ContentId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DagLink {
    pub name: String,
    pub cid: ContentId,
    /// Size in bytes of the linked object
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DagNode {
    pub data: Vec<u8>,
    pub links: Vec<DagLink>,
}

impl DagNode {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            links: Vec::new(),
        }
    }

    pub fn with_link(mut self, name: impl Into<String>, cid: ContentId, size: u64) -> Self {
        self.links.push(DagLink {
            name: name.into(),
            cid,
            size,
        });
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Decode a node, rejecting trailing bytes so arbitrary blobs are not
    /// mistaken for structured objects.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        use bincode::Options;

        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .with_limit(data.len() as u64)
            .deserialize(data)
            .map_err(|e| ProtocolError::MalformedNode(e.to_string()))
    }
}
