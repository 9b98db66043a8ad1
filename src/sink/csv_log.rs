//! csv_log.rs
//! Append-only CSV log with a dynamic header, fed through a bounded queue
//! so the ingest loop never blocks on disk.
//!
//! One file per session: `logs/realtime_log_<YYYYMMDD_HHMMSS>.csv`, opened
//! with the minimal header `Time,event,trigger`. The signal column set is
//! open: when a record carries a name the file has not seen, the writer
//! task rewrites the file in place with the widened header and re-aligns
//! every previously written row (missing cells stay empty). Rows are
//! `Time` (one decimal), signals in first-seen order, event label, then
//! the comma-joined trigger list.
//!
//! Backpressure: the producer force-pushes; on overflow the oldest queued
//! record is displaced and counted. Ingestion must never stall on the log.

use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, warn};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

use crate::config::CSV_QUEUE_CAP;
use crate::slot::SlotRecord;

const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;
const BATCH: usize = 64;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot prepare log storage at {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Producer handle held by the ingest loop; the writer runs on its own
/// thread until `finish`.
pub struct CsvSink {
    queue: Arc<ArrayQueue<SlotRecord>>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl CsvSink {
    /// Creates the session log file and spawns the writer task.
    ///
    /// # Errors
    /// `SinkError` if the directory or file cannot be created. Fatal at
    /// startup only; once running, write failures are logged and dropped.
    pub fn start(dir: &Path) -> Result<Self, SinkError> {
        Self::start_with_capacity(dir, CSV_QUEUE_CAP)
    }

    pub fn start_with_capacity(dir: &Path, capacity: usize) -> Result<Self, SinkError> {
        create_dir_all(dir).map_err(|source| SinkError::Storage {
            path: dir.display().to_string(),
            source,
        })?;

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("realtime_log_{}.csv", stamp));

        // Initial header before any signal has been observed.
        let file = File::create(&path).map_err(|source| SinkError::Storage {
            path: path.display().to_string(),
            source,
        })?;
        let mut wtr = csv::Writer::from_writer(BufWriter::new(file));
        wtr.write_record(["Time", "event", "trigger"])
            .and_then(|()| wtr.flush().map_err(csv::Error::from))
            .map_err(|e| SinkError::Storage {
                path: path.display().to_string(),
                source: std::io::Error::other(e),
            })?;
        drop(wtr);

        info!("csv logging started: {}", path.display());

        let queue = Arc::new(ArrayQueue::new(capacity));
        let running = Arc::new(AtomicBool::new(true));
        let dropped = Arc::new(AtomicU64::new(0));

        let handle = {
            let queue = queue.clone();
            let running = running.clone();
            let path = path.clone();
            thread::spawn(move || run_writer(&path, &queue, &running))
        };

        Ok(Self {
            queue,
            dropped,
            running,
            handle: Some(handle),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking enqueue. A full queue displaces the oldest waiting
    /// record so ingestion keeps pace with the bus, not the disk.
    pub fn enqueue(&self, record: SlotRecord) {
        if let Some(evicted) = self.queue.force_push(record) {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                warn!(
                    "csv queue full: dropped slot {} ({} dropped so far)",
                    evicted.slot_index, total
                );
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle to the drop counter for the dashboard metrics view.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Signals the writer to drain the queue and waits for it to exit.
    pub fn finish(mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let dropped = self.dropped();
        if dropped > 0 {
            warn!("csv session closed with {} records dropped", dropped);
        }
        info!("csv log written: {}", self.path.display());
    }
}

fn run_writer(path: &Path, queue: &ArrayQueue<SlotRecord>, running: &AtomicBool) {
    let mut worker = match CsvWorker::open(path) {
        Ok(w) => w,
        Err(e) => {
            error!("csv writer failed to open {}: {}", path.display(), e);
            return;
        }
    };

    let mut flush_counter = 0usize;
    loop {
        let mut any = false;
        for _ in 0..BATCH {
            match queue.pop() {
                Some(rec) => {
                    any = true;
                    worker.write_record(&rec);
                }
                None => break,
            }
        }

        if any {
            flush_counter += 1;
            if flush_counter >= FLUSH_BATCHES {
                worker.flush();
                flush_counter = 0;
            }
        } else {
            if !running.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
        }
    }

    // Final drain after shutdown was requested.
    while let Some(rec) = queue.pop() {
        worker.write_record(&rec);
    }
    worker.flush();
    debug!("csv writer exiting");
}

/// Writer-thread state: the open appender plus the signal columns seen so
/// far, in first-seen order.
struct CsvWorker {
    path: PathBuf,
    columns: Vec<String>,
    writer: csv::Writer<BufWriter<File>>,
}

impl CsvWorker {
    fn open(path: &Path) -> Result<Self, csv::Error> {
        Ok(Self {
            path: path.to_path_buf(),
            columns: Vec::new(),
            writer: Self::appender(path)?,
        })
    }

    fn appender(path: &Path) -> Result<csv::Writer<BufWriter<File>>, csv::Error> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(csv::Writer::from_writer(BufWriter::new(file)))
    }

    fn write_record(&mut self, rec: &SlotRecord) {
        // Carry-over keeps each record's key order consistent with the
        // session's first-seen order, so appending unseen names preserves it.
        let fresh: Vec<String> = rec
            .signals
            .keys()
            .filter(|name| !self.columns.contains(name))
            .cloned()
            .collect();
        if !fresh.is_empty() {
            self.columns.extend(fresh);
            if let Err(e) = self.rewrite_for_new_columns() {
                error!("csv header rewrite failed: {}", e);
            }
        }

        let mut row = Vec::with_capacity(self.columns.len() + 3);
        row.push(rec.time_str());
        for name in &self.columns {
            row.push(
                rec.signals
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(rec.event_label());
        row.push(rec.trigger_field());

        if let Err(e) = self.writer.write_record(&row) {
            error!("csv row write failed: {}", e);
        }
    }

    fn header(&self) -> Vec<String> {
        let mut header = Vec::with_capacity(self.columns.len() + 3);
        header.push("Time".to_string());
        header.extend(self.columns.iter().cloned());
        header.push("event".to_string());
        header.push("trigger".to_string());
        header
    }

    /// Rewrites the whole file under the widened header, re-aligning every
    /// previously written row; columns a row never had stay empty.
    fn rewrite_for_new_columns(&mut self) -> Result<(), csv::Error> {
        self.writer.flush()?;

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;
        let mut rows = reader.records();

        let old_header: Vec<String> = match rows.next() {
            Some(row) => row?.iter().map(str::to_string).collect(),
            None => Vec::new(),
        };

        let new_header = self.header();
        let mut adjusted: Vec<Vec<String>> = vec![new_header.clone()];
        for row in rows {
            let row = row?;
            let mut out = Vec::with_capacity(new_header.len());
            for name in &new_header {
                let cell = old_header
                    .iter()
                    .position(|h| h == name)
                    .and_then(|i| row.get(i))
                    .unwrap_or("");
                out.push(cell.to_string());
            }
            adjusted.push(out);
        }

        let mut wtr = csv::Writer::from_writer(BufWriter::new(File::create(&self.path)?));
        for row in &adjusted {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        drop(wtr);

        info!("csv header widened to {} columns", new_header.len());
        self.writer = Self::appender(&self.path)?;
        Ok(())
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("csv flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Trigger};
    use crate::slot::{SignalMap, Value};
    use std::sync::atomic::AtomicUsize;

    static TEST_SEQ: AtomicUsize = AtomicUsize::new(0);

    fn temp_dir() -> PathBuf {
        let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("canfd_csv_test_{}_{}", std::process::id(), n))
    }

    fn record(index: u64, entries: &[(&str, Value)]) -> SlotRecord {
        let mut rec = SlotRecord::new(index);
        rec.signals = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<SignalMap>();
        rec
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_widens_and_old_rows_realign() {
        let dir = temp_dir();
        let sink = CsvSink::start(&dir).unwrap();
        let path = sink.path().to_path_buf();

        sink.enqueue(record(1, &[("BRAKE_PRESSED", Value::Number(1.0))]));
        sink.enqueue(record(
            2,
            &[
                ("BRAKE_PRESSED", Value::Number(1.0)),
                ("BRAKE_PRESSURE", Value::Number(310.5)),
            ],
        ));
        sink.finish();

        let rows = read_rows(&path);
        assert_eq!(
            rows[0],
            vec!["Time", "BRAKE_PRESSED", "BRAKE_PRESSURE", "event", "trigger"]
        );
        // Row one gained an empty cell for the later column.
        assert_eq!(rows[1], vec!["0.1", "1", "", "none", "none"]);
        assert_eq!(rows[2], vec!["0.2", "1", "310.5", "none", "none"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rows_carry_event_and_joined_triggers() {
        let dir = temp_dir();
        let sink = CsvSink::start(&dir).unwrap();
        let path = sink.path().to_path_buf();

        let mut rec = record(7, &[("X", Value::Text("idle".into()))]);
        rec.triggers = vec![Trigger::on(EventKind::Pm), Trigger::off(EventKind::Sa)];
        rec.event = Some(EventKind::Pm);
        sink.enqueue(rec);
        sink.finish();

        let rows = read_rows(&path);
        assert_eq!(rows[0], vec!["Time", "X", "event", "trigger"]);
        assert_eq!(rows[1], vec!["0.7", "idle", "PM_on", "PM_on, SA_off"]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn finish_drains_everything_enqueued() {
        let dir = temp_dir();
        let sink = CsvSink::start(&dir).unwrap();
        let path = sink.path().to_path_buf();

        for k in 1..=50u64 {
            sink.enqueue(record(k, &[("N", Value::Number(k as f64))]));
        }
        assert_eq!(sink.dropped(), 0);
        sink.finish();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 51);
        assert_eq!(rows[50][0], "5.0");

        std::fs::remove_dir_all(&dir).ok();
    }
}
