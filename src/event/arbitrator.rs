//! arbitrator.rs
//! Fixed-priority arbitration over the detector's raw triggers.
//!
//! Priority (highest first): PM > DD > SA > SB > SH. A lower-priority event
//! is not merely suppressed while a higher one is active — it is actively
//! cancelled, and its `_off` edge is emitted so the log keeps a full audit
//! trail. Free of I/O and clocks so the invariants are directly testable.

use crate::event::{Edge, EventKind, Trigger};

/// Canonical active-event state. At most one entry is true at any time.
#[derive(Debug, Default)]
pub struct Arbitrator {
    /// Indexed by priority rank (0 = PM .. 4 = SH).
    active: [bool; 5],
}

impl Arbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, kind: EventKind) -> bool {
        self.active[kind.rank()]
    }

    /// Applies one slot's raw triggers, in input order, and returns the
    /// filtered trigger list:
    ///
    /// 1. On-edges: discarded if the state is already on or any
    ///    higher-priority state is on; otherwise the state turns on and
    ///    every active lower-priority state is forced off, each with its
    ///    `_off` edge appended to the output.
    /// 2. Off-edges: emitted only if the state was on.
    pub fn process(&mut self, triggers: &[Trigger]) -> Vec<Trigger> {
        let mut out = Vec::new();

        for t in triggers.iter().filter(|t| t.edge == Edge::On) {
            let rank = t.kind.rank();
            if self.active[rank] {
                continue;
            }
            if self.active[..rank].iter().any(|&on| on) {
                continue;
            }
            self.active[rank] = true;
            out.push(*t);
            for (offset, on) in self.active[rank + 1..].iter_mut().enumerate() {
                if *on {
                    *on = false;
                    out.push(Trigger::off(EventKind::PRIORITY[rank + 1 + offset]));
                }
            }
        }

        for t in triggers.iter().filter(|t| t.edge == Edge::Off) {
            let rank = t.kind.rank();
            if self.active[rank] {
                self.active[rank] = false;
                out.push(*t);
            }
        }

        out
    }

    /// The first active event in priority order, if any. This is the
    /// record's `event` label.
    pub fn current_event(&self) -> Option<EventKind> {
        EventKind::PRIORITY
            .iter()
            .copied()
            .find(|kind| self.active[kind.rank()])
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&on| on).count()
    }
}
