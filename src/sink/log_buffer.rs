//! log_buffer.rs
//! Bounded in-memory ring of finalized slot records, FIFO eviction.
//! Single writer (ingest loop), single reader (dashboard chart).

use std::collections::VecDeque;

use crate::config::LOG_BUFFER_CAP;
use crate::slot::SlotRecord;

#[derive(Debug)]
pub struct LogBuffer {
    buf: VecDeque<SlotRecord>,
    cap: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(LOG_BUFFER_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, record: SlotRecord) {
        if self.buf.len() >= self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(record);
    }

    pub fn latest(&self) -> Option<&SlotRecord> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotRecord> {
        self.buf.iter()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut ring = LogBuffer::with_capacity(3);
        for k in 0..5 {
            ring.push(SlotRecord::new(k));
        }
        assert_eq!(ring.len(), 3);
        let indices: Vec<u64> = ring.iter().map(|r| r.slot_index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert_eq!(ring.latest().map(|r| r.slot_index), Some(4));
    }
}
