//! Out-of-band binary transfer.
//!
//! A blob travels as a run of chunk frames `(blob_id, seq, last, data)` on the
//! same channel as the envelopes that reference it through `blobIds`. Ids are
//! assigned by the sending side, starting at 1, and never reused within a
//! session.

pub mod assembler;
pub(crate) mod ledger;
pub mod reader;

pub use assembler::BlobAssembler;
pub use reader::BlobReader;

use crate::error::blob::BlobError;
use crate::protocol::{BlobChunk, Frame};
use ledger::RetiredIds;
use reader::BlobEvent;

use common::ErrorLocation;

use std::collections::BTreeMap;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
pub const DEFAULT_MAX_OUT_OF_ORDER: usize = 64;
pub const DEFAULT_MAX_UNCLAIMED: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct BlobSettings {
    pub chunk_size: usize,
    pub max_out_of_order: usize,
    /// Inbound blobs held without a reader. A new blob past this evicts the
    /// oldest unclaimed one.
    pub max_unclaimed: usize,
}

impl Default for BlobSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_out_of_order: DEFAULT_MAX_OUT_OF_ORDER,
            max_unclaimed: DEFAULT_MAX_UNCLAIMED,
        }
    }
}

struct IncomingBlob {
    assembler: BlobAssembler,
    events: Option<UnboundedSender<BlobEvent>>,
    reader: Option<UnboundedReceiver<BlobEvent>>,
}

impl IncomingBlob {
    fn new(blob_id: u64, max_out_of_order: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            assembler: BlobAssembler::new(blob_id, max_out_of_order),
            events: Some(tx),
            reader: Some(rx),
        }
    }

    fn emit(&mut self, event: BlobEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn is_settled(&self) -> bool {
        self.events.is_none() && self.reader.is_none()
    }

    fn is_claimed(&self) -> bool {
        self.reader.is_none()
    }
}

/// Inbound blobs plus the ids that may never be delivered again.
#[derive(Default)]
struct IncomingTable {
    blobs: BTreeMap<u64, IncomingBlob>,
    retired: RetiredIds,
}

impl IncomingTable {
    fn unclaimed(&self) -> usize {
        self.blobs.values().filter(|blob| !blob.is_claimed()).count()
    }

    /// Drop `blob_id` once it has been read or failed; its id is never
    /// delivered again.
    fn settle(&mut self, blob_id: u64) {
        if self.blobs.get(&blob_id).is_some_and(IncomingBlob::is_settled) {
            self.blobs.remove(&blob_id);
            self.retired.retire(blob_id);
        }
    }

    /// Make room for one more unclaimed blob.
    fn evict_unclaimed(&mut self, limit: usize) {
        while self.unclaimed() >= limit {
            let Some(oldest) = self
                .blobs
                .iter()
                .find(|(_, blob)| !blob.is_claimed())
                .map(|(id, _)| *id)
            else {
                return;
            };
            warn!("Discarding unclaimed blob {oldest} ({limit} unclaimed blobs held)");
            self.blobs.remove(&oldest);
            self.retired.evict(oldest);
        }
    }
}

/// Blob transfer for one session. Cheap to clone.
#[derive(Clone)]
pub struct BlobChannel {
    inner: Arc<BlobInner>,
}

struct BlobInner {
    next_id: AtomicU64,
    settings: BlobSettings,
    outbound: UnboundedSender<Bytes>,
    incoming: Mutex<IncomingTable>,
    terminated: AtomicBool,
}

impl BlobChannel {
    /// `outbound` takes encoded frames to the channel writer.
    pub fn new(outbound: UnboundedSender<Bytes>, settings: BlobSettings) -> Self {
        Self {
            inner: Arc::new(BlobInner {
                next_id: AtomicU64::new(1),
                settings,
                outbound,
                incoming: Mutex::new(IncomingTable::default()),
                terminated: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    /// Stream `reader` to the peer as chunk frames and return the blob id.
    ///
    /// The id is valid for `blobIds` once this returns; the final frame has
    /// been queued ahead of anything sent afterwards.
    pub async fn send<R>(&self, mut reader: R) -> Result<u64, BlobError>
    where
        R: AsyncRead + Unpin,
    {
        let blob_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let chunk_size = self.inner.settings.chunk_size;
        debug!("Sending blob {blob_id}");

        let mut seq = 0u64;
        let mut pending = read_chunk(&mut reader, chunk_size).await?;
        loop {
            let next = if pending.len() < chunk_size {
                Bytes::new()
            } else {
                read_chunk(&mut reader, chunk_size).await?
            };
            let last = next.is_empty();

            self.queue(BlobChunk {
                blob_id,
                seq,
                last,
                data: pending,
            })?;

            if last {
                break;
            }
            seq += 1;
            pending = next;
        }

        trace!("Blob {blob_id} sent in {} chunks", seq + 1);
        Ok(blob_id)
    }

    pub async fn send_bytes(&self, data: Bytes) -> Result<u64, BlobError> {
        self.send(data.as_ref()).await
    }

    #[track_caller]
    fn queue(&self, chunk: BlobChunk) -> Result<(), BlobError> {
        let blob_id = chunk.blob_id;
        if self.is_terminated() {
            return Err(BlobError::terminated(blob_id));
        }

        let frame = Frame::Chunk(chunk).encode().map_err(|e| BlobError::Io {
            message: e.to_string(),
            location: ErrorLocation::from(Location::caller()),
        })?;

        self.inner
            .outbound
            .send(frame)
            .map_err(|_| BlobError::terminated(blob_id))
    }

    /// Claim the reader for `blob_id`. Chunks that already arrived are
    /// delivered first; the blob may also still be entirely in flight.
    ///
    /// Each id is handed out once. A blob that was discarded unread fails
    /// with [`BlobError::Evicted`].
    #[track_caller]
    pub fn receive(&self, blob_id: u64) -> Result<BlobReader, BlobError> {
        let mut incoming = self.inner.incoming.lock().map_err(|_| BlobError::terminated(blob_id))?;

        if incoming.retired.was_evicted(blob_id) {
            return Err(BlobError::Evicted {
                blob_id,
                location: ErrorLocation::from(Location::caller()),
            });
        }
        if incoming.retired.contains(blob_id) {
            return Err(BlobError::AlreadyClaimed {
                blob_id,
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let max_out_of_order = self.inner.settings.max_out_of_order;
        let entry = incoming
            .blobs
            .entry(blob_id)
            .or_insert_with(|| IncomingBlob::new(blob_id, max_out_of_order));

        let Some(rx) = entry.reader.take() else {
            return Err(BlobError::AlreadyClaimed {
                blob_id,
                location: ErrorLocation::from(Location::caller()),
            });
        };

        if self.is_terminated() && entry.events.is_some() {
            entry.emit(BlobEvent::Failed(BlobError::terminated(blob_id)));
            entry.events = None;
        }

        incoming.settle(blob_id);
        Ok(BlobReader::new(blob_id, rx))
    }

    /// Route an inbound chunk to its blob.
    pub(crate) fn on_chunk(&self, chunk: BlobChunk) {
        let blob_id = chunk.blob_id;
        let Ok(mut incoming) = self.inner.incoming.lock() else {
            return;
        };

        if incoming.retired.contains(blob_id) {
            trace!("Dropping chunk {} for retired blob {blob_id}", chunk.seq);
            return;
        }

        if !incoming.blobs.contains_key(&blob_id) {
            incoming.evict_unclaimed(self.inner.settings.max_unclaimed);
        }

        let max_out_of_order = self.inner.settings.max_out_of_order;
        let entry = incoming
            .blobs
            .entry(blob_id)
            .or_insert_with(|| IncomingBlob::new(blob_id, max_out_of_order));

        if entry.events.is_none() {
            trace!("Dropping chunk {} for settled blob {blob_id}", chunk.seq);
            return;
        }

        match entry.assembler.push(chunk) {
            Ok(released) => {
                for data in released {
                    entry.emit(BlobEvent::Data(data));
                }
                if entry.assembler.is_complete() {
                    trace!(
                        "Blob {blob_id} complete ({} bytes)",
                        entry.assembler.received_len()
                    );
                    entry.emit(BlobEvent::Complete);
                    entry.events = None;
                }
            }
            Err(e) => {
                warn!("Blob {blob_id} failed: {e}");
                entry.emit(BlobEvent::Failed(e));
                entry.events = None;
            }
        }

        incoming.settle(blob_id);
    }

    /// Fail every incomplete incoming blob and refuse further sends.
    pub(crate) fn terminate(&self) {
        self.inner.terminated.store(true, Ordering::Release);

        let Ok(mut incoming) = self.inner.incoming.lock() else {
            return;
        };

        for (blob_id, entry) in incoming.blobs.iter_mut() {
            if entry.events.is_some() {
                entry.emit(BlobEvent::Failed(BlobError::terminated(*blob_id)));
                entry.events = None;
            }
        }
        incoming.blobs.retain(|_, entry| !entry.is_settled());
    }
}

async fn read_chunk<R>(reader: &mut R, chunk_size: usize) -> Result<Bytes, BlobError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(chunk_size);
    while buf.len() < chunk_size {
        let mut limited = (&mut *reader).take((chunk_size - buf.len()) as u64);
        if limited.read_buf(&mut buf).await? == 0 {
            break;
        }
    }
    Ok(buf.freeze())
}
