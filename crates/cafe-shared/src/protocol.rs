use bincode::Options;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Type tag of an envelope payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageType {
    /// Thread update relayed to an offline client
    ThreadEnvelope,
    /// Search request against the cafe's local index
    Query,
    /// One search result
    QueryResult,
}

/// Typed payload carried by an [`Envelope`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

/// Outer wire wrapper. The signature is produced and checked by peers; the
/// cafe treats it as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub message: Message,
    pub sig: Vec<u8>,
}

/// A thread update addressed to a cafe client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadEnvelope {
    pub thread: String,
    /// Serialized [`DagNode`](crate::dag::DagNode) describing the update
    pub node: Vec<u8>,
    /// Encrypted block referenced by the node, when shipped inline
    pub block: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum QueryKind {
    /// Thread snapshots the querying peer has stored on this cafe
    ThreadSnapshots,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub kind: QueryKind,
    /// Maximum number of results, 0 = unlimited
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryResult {
    pub id: String,
    pub date: DateTime<Utc>,
    pub value: Vec<u8>,
}

fn decode_strict<T: DeserializeOwned>(data: &[u8]) -> Result<T, bincode::Error> {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
        .with_limit(data.len() as u64)
        .deserialize(data)
}

impl Envelope {
    /// Wrap a serializable payload under the given type tag.
    pub fn wrap<T: Serialize>(msg_type: MessageType, payload: &T) -> Result<Self, ProtocolError> {
        let payload =
            bincode::serialize(payload).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self {
            message: Message { msg_type, payload },
            sig: Vec::new(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        decode_strict(data).map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))
    }

    /// Decode the payload, checking the type tag first.
    pub fn open<T: DeserializeOwned>(&self, expected: MessageType) -> Result<T, ProtocolError> {
        if self.message.msg_type != expected {
            return Err(ProtocolError::UnexpectedPayload {
                expected,
                actual: self.message.msg_type,
            });
        }
        decode_strict(&self.message.payload)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }

    pub fn thread_envelope(&self) -> Result<ThreadEnvelope, ProtocolError> {
        self.open(MessageType::ThreadEnvelope)
    }

    pub fn query(&self) -> Result<Query, ProtocolError> {
        self.open(MessageType::Query)
    }

    pub fn query_result(&self) -> Result<QueryResult, ProtocolError> {
        self.open(MessageType::QueryResult)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thread_env() -> Envelope {
        Envelope::wrap(
            MessageType::ThreadEnvelope,
            &ThreadEnvelope {
                thread: "thread-1".into(),
                node: vec![1, 2, 3],
                block: Some(vec![9; 16]),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_envelope_bytes_decode() {
        let env = thread_env();
        let bytes = env.to_bytes().unwrap();
        let restored = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(restored, env);
        assert_eq!(restored.thread_envelope().unwrap().thread, "thread-1");
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = Envelope::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_wrong_payload_type() {
        let env = thread_env();
        let err = env.query().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnexpectedPayload {
                expected: MessageType::Query,
                actual: MessageType::ThreadEnvelope
            }
        ));
    }

    #[test]
    fn test_payload_garbage() {
        let env = Envelope {
            message: Message {
                msg_type: MessageType::ThreadEnvelope,
                payload: b"definitely not a thread envelope".to_vec(),
            },
            sig: Vec::new(),
        };
        assert!(matches!(
            env.thread_envelope(),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }
}
