//! Managed batches: the tuple buffer's handle on one saved batch.
//!
//! The row range and the storage tier are fixed facts about where the batch
//! lives. The payload is a cache: it can be dropped at any time (`reclaim`)
//! and fetched again from the tier by `begin_row`. A pinned batch keeps its
//! payload until the last pin is released.

use std::sync::Arc;

use super::storage::StorageType;
use super::TupleBatch;

#[derive(Debug)]
pub struct ManagedBatch {
    begin_row: i64,
    end_row: i64,
    is_last: bool,
    tier: StorageType,
    payload: Option<Arc<TupleBatch>>,
    accounted_bytes: usize,
    pinned_bytes: usize,
    pin_count: u32,
}

impl ManagedBatch {
    pub fn new(batch: Arc<TupleBatch>, tier: StorageType, accounted_bytes: usize) -> Self {
        Self {
            begin_row: batch.begin_row(),
            end_row: batch.end_row(),
            is_last: batch.is_last(),
            tier,
            payload: Some(batch),
            accounted_bytes,
            pinned_bytes: 0,
            pin_count: 0,
        }
    }

    pub fn begin_row(&self) -> i64 {
        self.begin_row
    }

    pub fn end_row(&self) -> i64 {
        self.end_row
    }

    pub fn row_count(&self) -> usize {
        (self.end_row - self.begin_row + 1) as usize
    }

    pub fn is_last(&self) -> bool {
        self.is_last
    }

    pub fn contains_row(&self, row: i64) -> bool {
        row >= self.begin_row && row <= self.end_row
    }

    /// The resident payload, or None if it was reclaimed.
    pub fn batch(&self) -> Option<Arc<TupleBatch>> {
        self.payload.clone()
    }

    pub fn is_resident(&self) -> bool {
        self.payload.is_some()
    }

    pub fn set_batch_reference(&mut self, batch: Arc<TupleBatch>) {
        debug_assert_eq!(batch.begin_row(), self.begin_row);
        self.payload = Some(batch);
    }

    /// Drops the cached payload unless pinned. Returns true if it was dropped.
    pub fn reclaim(&mut self) -> bool {
        if self.pin_count > 0 || self.payload.is_none() {
            return false;
        }
        self.payload = None;
        true
    }

    pub fn tier(&self) -> StorageType {
        self.tier
    }

    pub fn set_tier(&mut self, tier: StorageType) {
        self.tier = tier;
    }

    /// Bytes charged to the memory budget while on the memory tier.
    pub fn accounted_bytes(&self) -> usize {
        self.accounted_bytes
    }

    pub fn set_accounted_bytes(&mut self, bytes: usize) {
        self.accounted_bytes = bytes;
    }

    /// Bytes charged to the pinned pool while a spilled batch is pinned.
    pub fn pinned_bytes(&self) -> usize {
        self.pinned_bytes
    }

    pub fn set_pinned_bytes(&mut self, bytes: usize) {
        self.pinned_bytes = bytes;
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// Returns the remaining pin count, or None if the batch was not pinned.
    pub fn unpin(&mut self) -> Option<u32> {
        if self.pin_count == 0 {
            return None;
        }
        self.pin_count -= 1;
        Some(self.pin_count)
    }
}
