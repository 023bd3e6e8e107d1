use crate::blob::ledger::RetiredIds;
use crate::blob::{BlobAssembler, BlobChannel, BlobSettings};
use crate::error::blob::BlobError;
use crate::protocol::{BlobChunk, Frame};

use bytes::Bytes;
use futures_util::StreamExt;
use std::time::Duration;

use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio::time::timeout;

fn chunk(seq: u64, last: bool, data: &'static [u8]) -> BlobChunk {
    BlobChunk {
        blob_id: 1,
        seq,
        last,
        data: Bytes::from_static(data),
    }
}

fn drain_chunks(rx: &mut UnboundedReceiver<Bytes>) -> Vec<BlobChunk> {
    let mut chunks = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        match Frame::decode(frame).unwrap() {
            Frame::Chunk(chunk) => chunks.push(chunk),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    chunks
}

fn settings(chunk_size: usize) -> BlobSettings {
    BlobSettings {
        chunk_size,
        max_out_of_order: 4,
        max_unclaimed: 8,
    }
}

fn chunk_of(blob_id: u64, seq: u64, last: bool, data: &'static [u8]) -> BlobChunk {
    BlobChunk {
        blob_id,
        ..chunk(seq, last, data)
    }
}

// ============================================
// ASSEMBLER
// ============================================

/// **VALUE**: Out-of-order chunks are released in sequence order.
///
/// **BUG THIS CATCHES**: Releasing buffered chunks in arrival order instead
/// of sequence order, which reorders plot bytes.
#[test]
fn given_chunks_out_of_order_when_pushed_then_released_in_sequence() {
    // GIVEN: An assembler
    let mut assembler = BlobAssembler::new(1, 4);

    // WHEN: Chunks arrive 2, 0, 1
    let first = assembler.push(chunk(2, true, b"c")).unwrap();
    let second = assembler.push(chunk(0, false, b"a")).unwrap();
    let third = assembler.push(chunk(1, false, b"b")).unwrap();

    // THEN: Nothing until seq 0, then everything in order
    assert!(first.is_empty());
    assert_eq!(second, vec![Bytes::from_static(b"a")]);
    assert_eq!(
        third,
        vec![Bytes::from_static(b"b"), Bytes::from_static(b"c")]
    );
    assert!(assembler.is_complete());
    assert_eq!(assembler.received_len(), 3);
}

#[test]
fn given_duplicate_chunk_when_pushed_then_ignored() {
    let mut assembler = BlobAssembler::new(1, 4);
    assembler.push(chunk(0, false, b"a")).unwrap();

    let released = assembler.push(chunk(0, false, b"a")).unwrap();

    assert!(released.is_empty());
    assert_eq!(assembler.received_len(), 1);
}

#[test]
fn given_buffer_full_when_another_out_of_order_chunk_pushed_then_overflow() {
    // GIVEN: Room for two out-of-order chunks, both used
    let mut assembler = BlobAssembler::new(1, 2);
    assembler.push(chunk(1, false, b"b")).unwrap();
    assembler.push(chunk(2, false, b"c")).unwrap();

    // WHEN: A third one arrives before seq 0
    let result = assembler.push(chunk(3, false, b"d"));

    // THEN: Overflow naming the limit
    assert!(matches!(
        result,
        Err(BlobError::Overflow { limit: 2, .. })
    ));
}

#[test]
fn given_complete_blob_when_late_chunk_pushed_then_ignored() {
    let mut assembler = BlobAssembler::new(1, 4);
    assembler.push(chunk(0, true, b"a")).unwrap();

    let released = assembler.push(chunk(1, false, b"zzz")).unwrap();

    assert!(released.is_empty());
    assert_eq!(assembler.received_len(), 1);
}

// ============================================
// CHANNEL
// ============================================

#[tokio::test]
async fn given_data_larger_than_chunk_size_when_sent_then_split_with_last_flag_on_final() {
    // GIVEN: Chunk size 4 and 10 bytes of data
    let (tx, mut rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));

    // WHEN: Sending
    let id = blobs
        .send_bytes(Bytes::from_static(b"0123456789"))
        .await
        .unwrap();

    // THEN: Three chunks 4/4/2, only the last flagged
    let chunks = drain_chunks(&mut rx);
    assert_eq!(id, 1);
    assert_eq!(chunks.len(), 3);
    assert_eq!(
        chunks.iter().map(|c| c.data.len()).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );
    assert_eq!(
        chunks.iter().map(|c| c.last).collect::<Vec<_>>(),
        vec![false, false, true]
    );
    assert!(chunks.iter().all(|c| c.blob_id == 1));
}

#[tokio::test]
async fn given_exact_multiple_of_chunk_size_when_sent_then_no_trailing_empty_chunk() {
    let (tx, mut rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));

    blobs.send_bytes(Bytes::from_static(b"01234567")).await.unwrap();

    let chunks = drain_chunks(&mut rx);
    assert_eq!(chunks.len(), 2);
    assert!(chunks[1].last);
    assert_eq!(chunks[1].data.len(), 4);
}

#[tokio::test]
async fn given_empty_data_when_sent_then_single_empty_last_chunk() {
    let (tx, mut rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));

    blobs.send_bytes(Bytes::new()).await.unwrap();

    let chunks = drain_chunks(&mut rx);
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].last);
    assert!(chunks[0].data.is_empty());
}

#[tokio::test]
async fn given_two_blobs_when_sent_then_ids_are_distinct_and_increasing() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));

    let first = blobs.send_bytes(Bytes::from_static(b"a")).await.unwrap();
    let second = blobs.send_bytes(Bytes::from_static(b"b")).await.unwrap();

    assert_eq!((first, second), (1, 2));
}

#[tokio::test]
async fn given_chunks_arrive_before_claim_when_received_then_reader_gets_whole_blob() {
    // GIVEN: All chunks already routed, out of order
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    blobs.on_chunk(chunk(1, true, b"world"));
    blobs.on_chunk(chunk(0, false, b"hello "));

    // WHEN: Claiming and reading
    let data = blobs.receive(1).unwrap().read_to_end().await.unwrap();

    // THEN: Reassembled in order
    assert_eq!(data, Bytes::from_static(b"hello world"));
}

#[tokio::test]
async fn given_claimed_reader_when_chunks_arrive_later_then_streamed_in_order() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    let mut reader = blobs.receive(1).unwrap();

    blobs.on_chunk(chunk(0, false, b"a"));
    blobs.on_chunk(chunk(1, true, b"b"));

    assert_eq!(reader.next().await.unwrap().unwrap(), Bytes::from_static(b"a"));
    assert_eq!(reader.next().await.unwrap().unwrap(), Bytes::from_static(b"b"));
    assert!(reader.next().await.is_none());
}

#[test]
fn given_reader_claimed_when_claimed_again_then_already_claimed() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    let _reader = blobs.receive(5).unwrap();

    let result = blobs.receive(5);

    assert!(matches!(
        result,
        Err(BlobError::AlreadyClaimed { blob_id: 5, .. })
    ));
}

/// **VALUE**: Session teardown fails partial blobs instead of hanging readers.
///
/// **BUG THIS CATCHES**: A reader waiting forever for a final chunk that
/// will never come because the channel died mid-transfer.
#[tokio::test]
async fn given_partial_blob_when_terminated_then_reader_yields_terminated() {
    // GIVEN: Half a blob and a waiting reader
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    let reader = blobs.receive(1).unwrap();
    blobs.on_chunk(chunk(0, false, b"half"));

    // WHEN: The session tears down
    blobs.terminate();

    // THEN: Reading fails with Terminated
    let result = reader.read_to_end().await;
    assert!(matches!(result, Err(BlobError::Terminated { blob_id: 1, .. })));
}

#[tokio::test]
async fn given_terminated_channel_when_sending_then_terminated() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    blobs.terminate();

    let result = blobs.send_bytes(Bytes::from_static(b"x")).await;

    assert!(matches!(result, Err(BlobError::Terminated { .. })));
    assert!(blobs.is_terminated());
}

#[tokio::test]
async fn given_overflowing_blob_when_read_then_reader_yields_overflow() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(
        tx,
        BlobSettings {
            chunk_size: 4,
            max_out_of_order: 1,
            max_unclaimed: 8,
        },
    );
    let reader = blobs.receive(1).unwrap();

    blobs.on_chunk(chunk(1, false, b"b"));
    blobs.on_chunk(chunk(2, false, b"c"));

    let result = reader.read_to_end().await;
    assert!(matches!(result, Err(BlobError::Overflow { .. })));
}

/// **VALUE**: A blob without its final chunk is never reported complete.
///
/// **BUG THIS CATCHES**: Treating a quiet channel or the end of the
/// buffered chunks as the end of the blob, which hands out truncated plots.
#[tokio::test]
async fn given_chunks_without_last_flag_when_reading_then_still_pending() {
    // GIVEN: Three chunks, none marked last
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    blobs.on_chunk(chunk(0, false, b"aaaa"));
    blobs.on_chunk(chunk(1, false, b"bbbb"));
    blobs.on_chunk(chunk(2, false, b"cc"));
    let reader = blobs.receive(1).unwrap();

    // WHEN: Waiting for the whole blob
    let result = timeout(Duration::from_millis(200), reader.read_to_end()).await;

    // THEN: Still waiting
    assert!(result.is_err(), "blob completed without its final chunk");
}

/// **VALUE**: A blob's bytes are fixed once it has been read.
///
/// **BUG THIS CATCHES**: A retransmitted chunk recreating a consumed blob so
/// that a second reader sees different bytes under the same id.
#[tokio::test]
async fn given_consumed_blob_when_chunk_for_same_id_arrives_then_dropped_and_not_claimable() {
    // GIVEN: Blob 1 delivered and read
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    blobs.on_chunk(chunk(0, true, b"data"));
    let data = blobs.receive(1).unwrap().read_to_end().await.unwrap();
    assert_eq!(data, Bytes::from_static(b"data"));

    // WHEN: A chunk for blob 1 shows up again
    blobs.on_chunk(chunk(0, true, b"evil"));

    // THEN: The id cannot be claimed a second time
    let result = blobs.receive(1);
    assert!(matches!(
        result,
        Err(BlobError::AlreadyClaimed { blob_id: 1, .. })
    ));
}

#[tokio::test]
async fn given_reader_claimed_before_arrival_when_blob_completes_then_id_retired() {
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(tx, settings(4));
    let reader = blobs.receive(1).unwrap();
    blobs.on_chunk(chunk(0, true, b"once"));
    assert_eq!(reader.read_to_end().await.unwrap(), Bytes::from_static(b"once"));

    blobs.on_chunk(chunk(0, true, b"twice"));

    assert!(matches!(
        blobs.receive(1),
        Err(BlobError::AlreadyClaimed { blob_id: 1, .. })
    ));
}

/// **VALUE**: Blobs nobody reads cannot grow memory without bound.
///
/// **WHY THIS MATTERS**: A front end whose plot callback ignores `blobIds`
/// would otherwise keep every image the host ever sent.
#[tokio::test]
async fn given_unclaimed_limit_reached_when_new_blob_arrives_then_oldest_unclaimed_evicted() {
    // GIVEN: Room for two unclaimed blobs, both used
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(
        tx,
        BlobSettings {
            chunk_size: 4,
            max_out_of_order: 4,
            max_unclaimed: 2,
        },
    );
    blobs.on_chunk(chunk_of(1, 0, true, b"one"));
    blobs.on_chunk(chunk_of(2, 0, true, b"two"));

    // WHEN: A third blob arrives
    blobs.on_chunk(chunk_of(3, 0, true, b"three"));

    // THEN: The oldest is gone and says so
    assert!(matches!(
        blobs.receive(1),
        Err(BlobError::Evicted { blob_id: 1, .. })
    ));

    // AND: The newer two are intact
    let two = blobs.receive(2).unwrap().read_to_end().await.unwrap();
    let three = blobs.receive(3).unwrap().read_to_end().await.unwrap();
    assert_eq!(two, Bytes::from_static(b"two"));
    assert_eq!(three, Bytes::from_static(b"three"));
}

#[tokio::test]
async fn given_claimed_blobs_when_many_more_arrive_then_claimed_ones_never_evicted() {
    // GIVEN: Blob 1 claimed but still in flight
    let (tx, _rx) = unbounded_channel();
    let blobs = BlobChannel::new(
        tx,
        BlobSettings {
            chunk_size: 4,
            max_out_of_order: 4,
            max_unclaimed: 1,
        },
    );
    let reader = blobs.receive(1).unwrap();
    blobs.on_chunk(chunk_of(1, 0, false, b"keep"));

    // WHEN: Many unclaimed blobs arrive
    for blob_id in 2..100 {
        blobs.on_chunk(chunk_of(blob_id, 0, true, b"x"));
    }
    blobs.on_chunk(chunk_of(1, 1, true, b"!"));

    // THEN: The claimed blob completes, and only the newest unclaimed survives
    assert_eq!(reader.read_to_end().await.unwrap(), Bytes::from_static(b"keep!"));
    assert!(matches!(blobs.receive(50), Err(BlobError::Evicted { .. })));
    assert!(blobs.receive(99).is_ok());
}

#[test]
fn given_ids_retired_out_of_order_when_gap_filled_then_compacted() {
    let mut retired = RetiredIds::default();

    retired.retire(2);
    retired.retire(3);
    assert!(!retired.contains(1));
    assert_eq!(retired.pending_len(), 2);

    retired.retire(1);

    assert!(retired.contains(3));
    assert!(!retired.contains(4));
    assert_eq!(retired.pending_len(), 0);
}
