use crate::error::blob::BlobError;

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug)]
pub(crate) enum BlobEvent {
    Data(Bytes),
    Complete,
    Failed(BlobError),
}

/// Receiving end of one blob: an in-order stream of data chunks.
///
/// The stream ends after the final chunk. If the transfer fails (overflow,
/// session teardown) the last item is the error.
pub struct BlobReader {
    blob_id: u64,
    events: UnboundedReceiver<BlobEvent>,
    finished: bool,
}

impl BlobReader {
    pub(crate) fn new(blob_id: u64, events: UnboundedReceiver<BlobEvent>) -> Self {
        Self {
            blob_id,
            events,
            finished: false,
        }
    }

    pub fn blob_id(&self) -> u64 {
        self.blob_id
    }

    /// Collect the whole blob. Waits until the final chunk arrives.
    pub async fn read_to_end(mut self) -> Result<Bytes, BlobError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BlobReader {
    type Item = Result<Bytes, BlobError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(BlobEvent::Data(data))) => Poll::Ready(Some(Ok(data))),
            Poll::Ready(Some(BlobEvent::Complete)) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(BlobEvent::Failed(e))) => {
                self.finished = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(BlobError::terminated(self.blob_id))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
