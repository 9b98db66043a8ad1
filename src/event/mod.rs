//! Driving-behavior event engine.
//!
//! Split the way the rest of the pipeline is split: the detector computes
//! every event's on/off conditions independently per slot (timers, delay
//! anchors, history window), and the arbitrator applies the fixed priority
//! so at most one event is ever reported active. `EventFsm` is the facade
//! the ingest loop talks to.

pub mod arbitrator;
pub mod detector;

use std::fmt;

use crate::slot::SlotRecord;
use arbitrator::Arbitrator;
use detector::EventDetector;

/// The five event classes, in detector emission order PM, SA, SB, DD, SH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Pedal misuse.
    Pm,
    /// Rapid acceleration.
    Sa,
    /// Hard braking.
    Sb,
    /// Drowsy driving.
    Dd,
    /// Sharp steering.
    Sh,
}

impl EventKind {
    /// Arbitration priority, highest first: PM > DD > SA > SB > SH.
    pub const PRIORITY: [EventKind; 5] = [
        EventKind::Pm,
        EventKind::Dd,
        EventKind::Sa,
        EventKind::Sb,
        EventKind::Sh,
    ];

    pub fn code(self) -> &'static str {
        match self {
            EventKind::Pm => "PM",
            EventKind::Sa => "SA",
            EventKind::Sb => "SB",
            EventKind::Dd => "DD",
            EventKind::Sh => "SH",
        }
    }

    /// Position in `PRIORITY` (0 = highest).
    pub(crate) fn rank(self) -> usize {
        match self {
            EventKind::Pm => 0,
            EventKind::Dd => 1,
            EventKind::Sa => 2,
            EventKind::Sb => 3,
            EventKind::Sh => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    On,
    Off,
}

/// One raised edge, rendered `PM_on` / `PM_off` etc. in logs and the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trigger {
    pub kind: EventKind,
    pub edge: Edge,
}

impl Trigger {
    pub fn on(kind: EventKind) -> Self {
        Self { kind, edge: Edge::On }
    }

    pub fn off(kind: EventKind) -> Self {
        Self { kind, edge: Edge::Off }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edge = match self.edge {
            Edge::On => "on",
            Edge::Off => "off",
        };
        write!(f, "{}_{}", self.kind.code(), edge)
    }
}

/// Detection + arbitration over finalized slots. One instance per ingest
/// session; tests instantiate their own.
#[derive(Debug, Default)]
pub struct EventFsm {
    detector: EventDetector,
    arbitrator: Arbitrator,
}

impl EventFsm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the condition engine on one finalized slot and filters the raw
    /// triggers through the priority arbitrator. The returned list is what
    /// the slot record carries downstream.
    pub fn process(&mut self, record: &SlotRecord) -> Vec<Trigger> {
        let raw = self.detector.detect(record);
        self.arbitrator.process(&raw)
    }

    /// The single active event after arbitration, if any.
    pub fn current_event(&self) -> Option<EventKind> {
        self.arbitrator.current_event()
    }
}
