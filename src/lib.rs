//! # CAN-FD Driving-Behavior Monitor
//!
//! Ingests a line stream of CAN-FD frames from an in-vehicle gateway,
//! decodes them through a vendor message table, buckets the decoded signals
//! into heartbeat-driven 0.1 s slots, and runs a prioritized driving-event
//! state machine over the finalized slots.
//!
//! ## Pipeline
//! bytes → frame parse → dedup → decode → slot accumulate; each accepted
//! heartbeat (id `0xEA`) finalizes the previous slot, which flows through
//! detection → priority arbitration → sinks (CSV log, record ring,
//! dashboard snapshot).
//!
//! ## Events
//! Pedal misuse (PM), rapid acceleration (SA), hard braking (SB), drowsy
//! driving (DD), sharp steering (SH); priority PM > DD > SA > SB > SH with
//! at most one active event reported per slot.
//!
//! ## Concurrency
//! Single-threaded cooperative ingest owns all pipeline state. The CSV
//! writer runs on its own thread behind a bounded drop-oldest queue; the
//! dashboard feed and web server read shared hand-off cells. A shared
//! atomic `running` flag (signal handler or HTTP stop) shuts everything
//! down between frames.

pub mod config;
pub mod dashboard;
pub mod decode;
pub mod dedup;
pub mod event;
pub mod frame;
pub mod monitor;
pub mod sink;
pub mod slot;
