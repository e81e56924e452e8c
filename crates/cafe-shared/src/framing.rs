//! Length-prefixed framing for streamed search results.
//!
//! Each frame is a 2-byte little-endian length followed by exactly that many
//! payload bytes. The stream ends when the connection closes; there is no
//! trailer frame.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};
use crate::error::ProtocolError;

/// Encode one payload as a frame.
///
/// Payloads longer than [`MAX_FRAME_PAYLOAD`] are rejected instead of having
/// their length silently truncated to 16 bits.
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, ProtocolError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::FrameTooLarge {
            size: payload.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u16_le(payload.len() as u16);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Incremental frame reader for a chunked byte stream.
///
/// Chunk boundaries need not line up with frame boundaries.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let len = u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize;
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            return None;
        }
        self.buf.advance(FRAME_HEADER_SIZE);
        Some(self.buf.split_to(len).freeze())
    }

    /// Call once the stream has ended. Leftover bytes mean the last frame
    /// was cut off.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let needed = if self.buf.len() < FRAME_HEADER_SIZE {
            FRAME_HEADER_SIZE
        } else {
            FRAME_HEADER_SIZE + u16::from_le_bytes([self.buf[0], self.buf[1]]) as usize
        };
        Err(ProtocolError::TruncatedFrame {
            needed,
            available: self.buf.len(),
        })
    }
}

/// Split a complete response body into its frame payloads.
pub fn decode_frames(data: &[u8]) -> Result<Vec<Bytes>, ProtocolError> {
    let mut reader = FrameReader::new();
    reader.push(data);
    let mut frames = Vec::new();
    while let Some(frame) = reader.next_frame() {
        frames.push(frame);
    }
    reader.finish()?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_frames_exact_bytes() {
        let r1 = b"first result".as_slice();
        let r2 = b"second".as_slice();

        let mut stream = Vec::new();
        stream.extend_from_slice(&encode_frame(r1).unwrap());
        stream.extend_from_slice(&encode_frame(r2).unwrap());

        let mut expected = Vec::new();
        expected.extend_from_slice(&(r1.len() as u16).to_le_bytes());
        expected.extend_from_slice(r1);
        expected.extend_from_slice(&(r2.len() as u16).to_le_bytes());
        expected.extend_from_slice(r2);
        assert_eq!(stream, expected);

        let frames = decode_frames(&stream).unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"first result"), Bytes::from_static(b"second")]);
    }

    #[test]
    fn test_max_size_boundary() {
        let max = vec![7u8; MAX_FRAME_PAYLOAD];
        let frame = encode_frame(&max).unwrap();
        assert_eq!(&frame[..2], &[0xff, 0xff]);

        let too_big = vec![7u8; MAX_FRAME_PAYLOAD + 1];
        assert!(matches!(
            encode_frame(&too_big),
            Err(ProtocolError::FrameTooLarge { size, .. }) if size == MAX_FRAME_PAYLOAD + 1
        ));
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode_frame(&[]).unwrap();
        assert_eq!(&frame[..], &[0, 0]);
        assert_eq!(decode_frames(&frame).unwrap(), vec![Bytes::new()]);
    }

    #[test]
    fn test_split_chunks() {
        let frame = encode_frame(b"abcdef").unwrap();
        let mut reader = FrameReader::new();
        reader.push(&frame[..1]);
        assert!(reader.next_frame().is_none());
        reader.push(&frame[1..4]);
        assert!(reader.next_frame().is_none());
        reader.push(&frame[4..]);
        assert_eq!(reader.next_frame().unwrap(), Bytes::from_static(b"abcdef"));
        reader.finish().unwrap();
    }

    #[test]
    fn test_truncated() {
        let frame = encode_frame(b"abcdef").unwrap();
        let err = decode_frames(&frame[..5]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedFrame {
                needed: 8,
                available: 5
            }
        ));
    }
}
