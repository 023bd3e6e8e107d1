use std::collections::{BTreeSet, VecDeque};

/// How many evicted ids are remembered for error reporting.
const EVICTED_HISTORY: usize = 256;

/// Ids of inbound blobs that were delivered, failed or discarded.
///
/// Peers assign ids upwards from 1, so retired ids are kept as a floor
/// (every id at or below it is retired) plus the ids above it that retired
/// out of order.
#[derive(Debug, Default)]
pub(crate) struct RetiredIds {
    floor: u64,
    above: BTreeSet<u64>,
    evicted: VecDeque<u64>,
}

impl RetiredIds {
    pub(crate) fn contains(&self, blob_id: u64) -> bool {
        blob_id <= self.floor || self.above.contains(&blob_id)
    }

    pub(crate) fn retire(&mut self, blob_id: u64) {
        if self.contains(blob_id) {
            return;
        }
        self.above.insert(blob_id);
        while self.above.remove(&(self.floor + 1)) {
            self.floor += 1;
        }
    }

    /// Retire an id whose data was dropped unread.
    pub(crate) fn evict(&mut self, blob_id: u64) {
        self.retire(blob_id);
        if self.evicted.len() == EVICTED_HISTORY {
            self.evicted.pop_front();
        }
        self.evicted.push_back(blob_id);
    }

    pub(crate) fn was_evicted(&self, blob_id: u64) -> bool {
        self.evicted.contains(&blob_id)
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.above.len()
    }
}
