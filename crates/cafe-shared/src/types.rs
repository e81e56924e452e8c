use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{CODEC_NODE, CODEC_RAW};
use crate::error::ProtocolError;

/// How the bytes behind a content id are interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Codec {
    /// Opaque data blob.
    Raw = CODEC_RAW,
    /// Structured [`DagNode`](crate::dag::DagNode) with links to children.
    Node = CODEC_NODE,
}

impl Codec {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            CODEC_RAW => Some(Self::Raw),
            CODEC_NODE => Some(Self::Node),
            _ => None,
        }
    }
}

/// Content identifier: codec tag plus the BLAKE3 hash of the object bytes.
///
/// The text form is the lower-case hex encoding of `codec || hash`, so the
/// same bytes stored raw and stored as a node have distinct ids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ContentId {
    pub codec: Codec,
    pub hash: [u8; 32],
}

impl ContentId {
    pub fn new(codec: Codec, data: &[u8]) -> Self {
        Self {
            codec,
            hash: *blake3::hash(data).as_bytes(),
        }
    }

    pub fn raw(data: &[u8]) -> Self {
        Self::new(Codec::Raw, data)
    }

    pub fn node(data: &[u8]) -> Self {
        Self::new(Codec::Node, data)
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(33);
        bytes.push(self.codec as u8);
        bytes.extend_from_slice(&self.hash);
        hex::encode(bytes)
    }

    pub fn short(&self) -> String {
        self.to_hex()[2..10].to_string()
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ContentId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| ProtocolError::InvalidContentId(format!("{s}: {e}")))?;
        if bytes.len() != 33 {
            return Err(ProtocolError::InvalidContentId(format!(
                "expected 33 bytes, got {}",
                bytes.len()
            )));
        }
        let codec = Codec::from_byte(bytes[0]).ok_or_else(|| {
            ProtocolError::InvalidContentId(format!("unknown codec 0x{:02x}", bytes[0]))
        })?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[1..]);
        Ok(Self { codec, hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_changes_id() {
        let data = b"same bytes";
        assert_ne!(ContentId::raw(data), ContentId::node(data));
        assert_eq!(ContentId::raw(data), ContentId::raw(data));
    }

    #[test]
    fn test_parse_display() {
        let id = ContentId::node(b"node");
        let parsed: ContentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 66);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("zz".parse::<ContentId>().is_err());
        assert!("55abcd".parse::<ContentId>().is_err());
        let unknown_codec = format!("01{}", "00".repeat(32));
        assert!(unknown_codec.parse::<ContentId>().is_err());
    }
}
