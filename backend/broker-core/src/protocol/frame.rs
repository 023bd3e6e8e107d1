//! Frame tagging.
//!
//! ```text
//! 0x01 | envelope JSON
//! 0x02 | blob_id: u64 BE | seq: u64 BE | flags: u8 | data
//! ```
//!
//! Flag bit 0 marks the final chunk of a blob.

use crate::error::protocol::ProtocolError;
use crate::protocol::Envelope;

use common::ErrorLocation;

use std::panic::Location;

use bytes::{Buf, BufMut, Bytes, BytesMut};

const TAG_ENVELOPE: u8 = 0x01;
const TAG_BLOB_CHUNK: u8 = 0x02;
const FLAG_LAST: u8 = 0x01;
const BLOB_HEADER_LEN: usize = 8 + 8 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobChunk {
    pub blob_id: u64,
    pub seq: u64,
    pub last: bool,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Envelope),
    Chunk(BlobChunk),
}

impl Frame {
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        match self {
            Frame::Message(envelope) => {
                let json = serde_json::to_vec(envelope)?;
                let mut buf = BytesMut::with_capacity(1 + json.len());
                buf.put_u8(TAG_ENVELOPE);
                buf.put_slice(&json);
                Ok(buf.freeze())
            }
            Frame::Chunk(chunk) => {
                let mut buf = BytesMut::with_capacity(1 + BLOB_HEADER_LEN + chunk.data.len());
                buf.put_u8(TAG_BLOB_CHUNK);
                buf.put_u64(chunk.blob_id);
                buf.put_u64(chunk.seq);
                buf.put_u8(if chunk.last { FLAG_LAST } else { 0 });
                buf.put_slice(&chunk.data);
                Ok(buf.freeze())
            }
        }
    }

    #[track_caller]
    pub fn decode(mut frame: Bytes) -> Result<Frame, ProtocolError> {
        if frame.is_empty() {
            return Err(ProtocolError::malformed("empty frame"));
        }

        match frame.get_u8() {
            TAG_ENVELOPE => {
                let envelope: Envelope = serde_json::from_slice(&frame)?;
                envelope.validate()?;
                Ok(Frame::Message(envelope))
            }
            TAG_BLOB_CHUNK => {
                if frame.len() < BLOB_HEADER_LEN {
                    return Err(ProtocolError::malformed(format!(
                        "blob chunk header truncated ({} bytes)",
                        frame.len()
                    )));
                }
                let blob_id = frame.get_u64();
                let seq = frame.get_u64();
                let flags = frame.get_u8();
                Ok(Frame::Chunk(BlobChunk {
                    blob_id,
                    seq,
                    last: flags & FLAG_LAST != 0,
                    data: frame,
                }))
            }
            tag => Err(ProtocolError::UnknownFrameTag {
                tag,
                location: ErrorLocation::from(Location::caller()),
            }),
        }
    }
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Frame::Message(envelope)
    }
}

impl From<BlobChunk> for Frame {
    fn from(chunk: BlobChunk) -> Self {
        Frame::Chunk(chunk)
    }
}
