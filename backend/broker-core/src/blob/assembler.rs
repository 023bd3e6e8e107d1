use crate::error::blob::BlobError;
use crate::protocol::BlobChunk;

use common::ErrorLocation;

use std::collections::BTreeMap;
use std::panic::Location;

use bytes::Bytes;
use log::trace;

/// Reorders the chunks of one blob.
///
/// Chunks are released strictly by sequence number. Chunks that arrive ahead
/// of the next expected one wait in a buffer holding at most
/// `max_out_of_order` entries; exceeding it fails the transfer.
#[derive(Debug)]
pub struct BlobAssembler {
    blob_id: u64,
    next_seq: u64,
    max_out_of_order: usize,
    buffered: BTreeMap<u64, BlobChunk>,
    complete: bool,
    received_len: u64,
}

impl BlobAssembler {
    pub fn new(blob_id: u64, max_out_of_order: usize) -> Self {
        Self {
            blob_id,
            next_seq: 0,
            max_out_of_order,
            buffered: BTreeMap::new(),
            complete: false,
            received_len: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn received_len(&self) -> u64 {
        self.received_len
    }

    /// Accept one chunk; returns the data now releasable, in order.
    ///
    /// Duplicates and chunks after completion are ignored.
    #[track_caller]
    pub fn push(&mut self, chunk: BlobChunk) -> Result<Vec<Bytes>, BlobError> {
        if self.complete || chunk.seq < self.next_seq || self.buffered.contains_key(&chunk.seq) {
            trace!("Ignoring chunk {} of blob {}", chunk.seq, self.blob_id);
            return Ok(Vec::new());
        }

        if chunk.seq > self.next_seq {
            if self.buffered.len() >= self.max_out_of_order {
                return Err(BlobError::Overflow {
                    blob_id: self.blob_id,
                    buffered: self.buffered.len() + 1,
                    limit: self.max_out_of_order,
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            self.buffered.insert(chunk.seq, chunk);
            return Ok(Vec::new());
        }

        let mut released = Vec::new();
        let mut current = Some(chunk);
        while let Some(chunk) = current {
            self.next_seq += 1;
            self.received_len += chunk.data.len() as u64;
            if !chunk.data.is_empty() {
                released.push(chunk.data);
            }
            if chunk.last {
                self.complete = true;
                self.buffered.clear();
                break;
            }
            current = self.buffered.remove(&self.next_seq);
        }

        Ok(released)
    }
}
