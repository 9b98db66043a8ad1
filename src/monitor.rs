//! monitor.rs
//! Ingest loop: the single owner of all pipeline state.
//!
//! Reads delimited lines from the byte source (serial device or replay
//! file), routes heartbeats to the slot clock and signal frames through
//! dedup → decode → accumulate, and publishes each finalized slot through
//! detection and arbitration to the sinks. Only this loop mutates the
//! dedup filter, the accumulator, or the event engine; the concurrent
//! actors (CSV task, dashboard) see records through the sink hand-offs.
//!
//! Nothing on the hot path is fatal: bad bytes, malformed lines, and
//! failed decodes are counted and dropped. The loop observes the shared
//! `running` flag between frames and, on shutdown, discards the
//! in-progress slot — a partial bucket is never published.

use log::{debug, info, warn};
use serde::Serialize;
use std::io::{BufRead, ErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::HEARTBEAT_ID;
use crate::decode::SignalDecoder;
use crate::dedup::DedupFilter;
use crate::event::EventFsm;
use crate::frame::{LINE_PREFIX, parse_line};
use crate::sink::SinkFanout;
use crate::slot::SlotAccumulator;

/// Ingest counters, written by the loop and read by the dashboard.
#[derive(Debug, Default)]
pub struct IngestStats {
    pub lines: AtomicU64,
    pub frames: AtomicU64,
    pub malformed: AtomicU64,
    pub duplicates: AtomicU64,
    pub decode_empty: AtomicU64,
    pub slots_emitted: AtomicU64,
}

pub type SharedStats = Arc<IngestStats>;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub lines: u64,
    pub frames: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub decode_empty: u64,
    pub slots_emitted: u64,
    pub csv_dropped: u64,
}

impl IngestStats {
    fn bump(field: &AtomicU64) {
        field.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, csv_dropped: u64) -> StatsSnapshot {
        StatsSnapshot {
            lines: self.lines.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_empty: self.decode_empty.load(Ordering::Relaxed),
            slots_emitted: self.slots_emitted.load(Ordering::Relaxed),
            csv_dropped,
        }
    }
}

pub struct Monitor {
    dedup: DedupFilter,
    slots: SlotAccumulator,
    fsm: EventFsm,
    sinks: SinkFanout,
    running: Arc<AtomicBool>,
    stats: SharedStats,
}

impl Monitor {
    pub fn new(sinks: SinkFanout, running: Arc<AtomicBool>) -> Self {
        Self {
            dedup: DedupFilter::new(),
            slots: SlotAccumulator::new(),
            fsm: EventFsm::new(),
            sinks,
            running,
            stats: Arc::new(IngestStats::default()),
        }
    }

    pub fn stats(&self) -> SharedStats {
        self.stats.clone()
    }

    pub fn sinks(&self) -> &SinkFanout {
        &self.sinks
    }

    /// Runs ingest until the source hits EOF (replay) or the running flag
    /// is cleared (signal or dashboard stop). Does not drain the sinks;
    /// call `shutdown` afterwards.
    pub fn run<R: BufRead>(&mut self, reader: &mut R, decoder: &dyn SignalDecoder) {
        let mut buf: Vec<u8> = Vec::with_capacity(256);

        while self.running.load(Ordering::Acquire) {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    info!("byte source exhausted");
                    break;
                }
                Ok(_) => {
                    // Invalid UTF-8 on the link is replaced, not fatal.
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    self.handle_line(line.trim(), decoder);
                    buf.clear();
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    // Timeout mid-line: keep the partial bytes in `buf` and
                    // re-check the running flag.
                    continue;
                }
                Err(e) => {
                    warn!("read error on byte source: {}", e);
                    thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }

    /// Routes one textual line through the pipeline. Lines without the
    /// `CAN FD RX:` prefix are silently ignored.
    pub fn handle_line(&mut self, line: &str, decoder: &dyn SignalDecoder) {
        IngestStats::bump(&self.stats.lines);

        if !line.starts_with(LINE_PREFIX) {
            return;
        }

        let frame = match parse_line(line) {
            Ok(frame) => frame,
            Err(e) => {
                IngestStats::bump(&self.stats.malformed);
                debug!("dropped malformed line: {}", e);
                return;
            }
        };
        IngestStats::bump(&self.stats.frames);

        if frame.id == HEARTBEAT_ID {
            // Arrival alone advances the clock; the payload is consulted
            // only for the back-to-back repeat check.
            if self.dedup.accept_heartbeat(&frame.payload) {
                self.advance_slot();
            } else {
                IngestStats::bump(&self.stats.duplicates);
                debug!("repeated heartbeat ignored");
            }
            return;
        }

        if !self.dedup.accept(frame.id, &frame.payload) {
            IngestStats::bump(&self.stats.duplicates);
            return;
        }

        let decoded = decoder.decode(frame.id, &frame.payload);
        if decoded.is_empty() {
            IngestStats::bump(&self.stats.decode_empty);
            return;
        }
        self.slots.merge(decoded);
    }

    fn advance_slot(&mut self) {
        let Some(mut record) = self.slots.advance() else {
            return;
        };

        record.triggers = self.fsm.process(&record);
        record.event = self.fsm.current_event();

        for trigger in &record.triggers {
            info!("t={}s trigger {}", record.time_str(), trigger);
        }

        IngestStats::bump(&self.stats.slots_emitted);
        self.sinks.publish(record);
    }

    /// Discards the in-progress slot and drains the sinks. The statistics
    /// line mirrors what the dashboard exposes live.
    pub fn shutdown(mut self) {
        self.slots.discard();

        let snap = self.stats.snapshot(self.sinks.csv_dropped());
        info!(
            "ingest finished: {} lines, {} frames, {} slots, {} malformed, {} duplicates, {} empty decodes, {} csv drops",
            snap.lines,
            snap.frames,
            snap.slots_emitted,
            snap.malformed,
            snap.duplicates,
            snap.decode_empty,
            snap.csv_dropped
        );
        self.sinks.shutdown();
    }
}
