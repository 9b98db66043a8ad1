//! Sink fan-out for finalized slot records.
//!
//! Three consumers per record, none allowed to stall ingestion:
//! - `LogBuffer`: bounded in-memory ring read by the dashboard chart
//! - `SnapshotCell`: latest-record cell read by the dashboard feed
//! - `CsvSink`: persistent log behind a bounded drop-oldest queue
//!
//! Records are handed over in strictly increasing slot order because the
//! single-threaded ingest loop is the only producer.

pub mod csv_log;
pub mod log_buffer;
pub mod snapshot;

use parking_lot::Mutex;
use std::sync::Arc;

use crate::slot::SlotRecord;
use csv_log::CsvSink;
use log_buffer::LogBuffer;
use snapshot::SnapshotCell;

pub type SharedLogBuffer = Arc<Mutex<LogBuffer>>;

pub struct SinkFanout {
    log_buffer: SharedLogBuffer,
    snapshot: Arc<SnapshotCell>,
    csv: CsvSink,
}

impl SinkFanout {
    pub fn new(csv: CsvSink) -> Self {
        Self {
            log_buffer: Arc::new(Mutex::new(LogBuffer::new())),
            snapshot: Arc::new(SnapshotCell::new()),
            csv,
        }
    }

    /// Handles shared with the dashboard threads.
    pub fn log_buffer(&self) -> SharedLogBuffer {
        self.log_buffer.clone()
    }

    pub fn snapshot(&self) -> Arc<SnapshotCell> {
        self.snapshot.clone()
    }

    pub fn csv_path(&self) -> &std::path::Path {
        self.csv.path()
    }

    pub fn csv_dropped(&self) -> u64 {
        self.csv.dropped()
    }

    pub fn csv_dropped_counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicU64> {
        self.csv.dropped_counter()
    }

    /// Publishes one finalized record to all three sinks.
    pub fn publish(&self, record: SlotRecord) {
        let shared = Arc::new(record);
        self.log_buffer.lock().push((*shared).clone());
        self.snapshot.publish(shared.clone());
        self.csv.enqueue((*shared).clone());
    }

    /// Drains and closes the CSV task. Called once at shutdown.
    pub fn shutdown(self) {
        self.csv.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Value;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("canfd_fanout_{}_{}", tag, std::process::id()))
    }

    #[test]
    fn publish_reaches_all_three_sinks() {
        let dir = temp_dir("all");
        let sinks = SinkFanout::new(CsvSink::start(&dir).unwrap());
        let ring = sinks.log_buffer();
        let cell = sinks.snapshot();

        let mut rec = SlotRecord::new(3);
        rec.signals.insert("X".into(), Value::Number(1.0));
        sinks.publish(rec);

        assert_eq!(ring.lock().latest().map(|r| r.slot_index), Some(3));
        assert_eq!(cell.peek().map(|r| r.slot_index), Some(3));
        sinks.shutdown();

        std::fs::remove_dir_all(&dir).ok();
    }
}
