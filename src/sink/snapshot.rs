//! snapshot.rs
//! Single-slot hand-off cell between the ingest loop and the dashboard
//! feed. The writer swaps in a whole record; the reader clones it out.
//! The lock covers only the swap/clone, so neither side can stall the
//! other for longer than a pointer-sized critical section.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::slot::SlotRecord;

#[derive(Debug, Default)]
pub struct SnapshotCell {
    latest: Mutex<Option<Arc<SlotRecord>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writer side: replaces the published record.
    pub fn publish(&self, record: Arc<SlotRecord>) {
        *self.latest.lock() = Some(record);
    }

    /// Reader side: the most recently published record, if any.
    pub fn peek(&self) -> Option<Arc<SlotRecord>> {
        self.latest.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_replaces_previous_record() {
        let cell = SnapshotCell::new();
        assert!(cell.peek().is_none());

        cell.publish(Arc::new(SlotRecord::new(1)));
        cell.publish(Arc::new(SlotRecord::new(2)));
        assert_eq!(cell.peek().map(|r| r.slot_index), Some(2));
        // Peek does not consume.
        assert_eq!(cell.peek().map(|r| r.slot_index), Some(2));
    }
}
