//! slot.rs
//! Time-bucketed record model and the heartbeat-driven accumulator.
//!
//! A slot is a 0.1 s bucket of signal values, indexed by the number of
//! accepted heartbeats. Slot time is `slot_index / 10` rendered with one
//! decimal; keeping the index integral avoids the drift of accumulating
//! 0.1 in floating point. A new slot inherits every signal of the previous
//! finalized record, so a signal observed in slot k stays visible in slot
//! k+1 until the bus refreshes it.

use indexmap::IndexMap;
use log::info;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::config::WHEEL_SPEEDS;
use crate::event::{EventKind, Trigger};

/// Signal values arrive either numeric or textual (choice labels).
/// The detector consumes only the numeric arm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Coerces textual input that parses as a float into the numeric arm.
    pub fn coerce(raw: Value) -> Value {
        match raw {
            Value::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => Value::Text(s),
            },
            v => v,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // `{}` on f64 is the shortest decimal form that round-trips.
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Open, insertion-ordered signal map. First-seen order drives the CSV
/// header layout.
pub type SignalMap = IndexMap<String, Value>;

/// One finalized (or in-progress) time bucket.
#[derive(Debug, Clone)]
pub struct SlotRecord {
    pub slot_index: u64,
    pub signals: SignalMap,
    /// Edges raised while this slot was finalized, post-arbitration.
    pub triggers: Vec<Trigger>,
    /// The single active event after arbitration, if any.
    pub event: Option<EventKind>,
}

impl SlotRecord {
    pub fn new(slot_index: u64) -> Self {
        Self {
            slot_index,
            signals: SignalMap::new(),
            triggers: Vec::new(),
            event: None,
        }
    }

    pub fn time(&self) -> f64 {
        self.slot_index as f64 / 10.0
    }

    /// Slot time with one decimal, as written to the log and the feed.
    pub fn time_str(&self) -> String {
        format!("{:.1}", self.time())
    }

    pub fn get_num(&self, name: &str) -> Option<f64> {
        self.signals.get(name).and_then(Value::as_f64)
    }

    /// Derived vehicle speed: mean of the four wheel speeds when all are
    /// present and numeric, else 0. Computed on demand, never stored.
    pub fn speed(&self) -> f64 {
        let mut sum = 0.0;
        for name in WHEEL_SPEEDS {
            match self.get_num(name) {
                Some(v) => sum += v,
                None => return 0.0,
            }
        }
        sum / WHEEL_SPEEDS.len() as f64
    }

    pub fn event_label(&self) -> String {
        match self.event {
            Some(kind) => format!("{}_on", kind.code()),
            None => "none".to_string(),
        }
    }

    pub fn trigger_field(&self) -> String {
        if self.triggers.is_empty() {
            return "none".to_string();
        }
        let parts: Vec<String> = self.triggers.iter().map(Trigger::to_string).collect();
        parts.join(", ")
    }
}

/// Slot accumulator: merges decoded signals into the current bucket and
/// finalizes it on each accepted heartbeat.
pub struct SlotAccumulator {
    current: SlotRecord,
    seen_names: HashSet<String>,
}

impl SlotAccumulator {
    pub fn new() -> Self {
        Self {
            // Slot 0 collects frames arriving before the first heartbeat.
            current: SlotRecord::new(0),
            seen_names: HashSet::new(),
        }
    }

    pub fn slot_index(&self) -> u64 {
        self.current.slot_index
    }

    /// Merges one decoded frame into the current slot, coercing values and
    /// logging session-first signal names. Returns the number of names new
    /// to this session.
    pub fn merge(&mut self, decoded: SignalMap) -> usize {
        let mut new_names = 0;
        for (name, value) in decoded {
            if self.seen_names.insert(name.clone()) {
                info!("new signal observed: {}", name);
                new_names += 1;
            }
            self.current.signals.insert(name, Value::coerce(value));
        }
        new_names
    }

    /// Finalizes the current slot on an accepted heartbeat and opens the
    /// next one with all signal values carried forward. Slot 0 is emitted
    /// only if at least one frame landed in it.
    pub fn advance(&mut self) -> Option<SlotRecord> {
        let next_index = self.current.slot_index + 1;
        let mut next = SlotRecord::new(next_index);
        next.signals = self.current.signals.clone();

        let prev = std::mem::replace(&mut self.current, next);
        if prev.slot_index == 0 && prev.signals.is_empty() {
            return None;
        }
        Some(prev)
    }

    /// Drops the in-progress slot without emission (shutdown mid-slot).
    pub fn discard(&mut self) {
        self.current.signals.clear();
    }
}

impl Default for SlotAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Value)]) -> SignalMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn textual_numbers_coerce_to_numeric() {
        assert_eq!(Value::coerce(Value::Text("12.5".into())), Value::Number(12.5));
        assert_eq!(Value::coerce(Value::Text(" 3 ".into())), Value::Number(3.0));
        assert_eq!(
            Value::coerce(Value::Text("REVERSE".into())),
            Value::Text("REVERSE".into())
        );
    }

    #[test]
    fn numbers_render_in_shortest_form() {
        assert_eq!(Value::Number(5.0).to_string(), "5");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
    }

    #[test]
    fn slot_time_is_exact_tenths() {
        // 0.1 accumulated 300 times drifts; index / 10 does not.
        let rec = SlotRecord {
            slot_index: 3000,
            ..SlotRecord::new(0)
        };
        assert_eq!(rec.time_str(), "300.0");
        for k in 0..1000u64 {
            let a = SlotRecord { slot_index: k, ..SlotRecord::new(0) };
            let b = SlotRecord { slot_index: k + 1, ..SlotRecord::new(0) };
            assert!((b.time() - a.time() - 0.1).abs() < 1e-9);
        }
    }

    #[test]
    fn speed_requires_all_four_wheels() {
        let mut rec = SlotRecord::new(1);
        rec.signals = map(&[
            ("WHEEL_SPEED_1", Value::Number(10.0)),
            ("WHEEL_SPEED_2", Value::Number(12.0)),
            ("WHEEL_SPEED_3", Value::Number(8.0)),
        ]);
        assert_eq!(rec.speed(), 0.0);

        rec.signals.insert("WHEEL_SPEED_4".into(), Value::Number(10.0));
        assert_eq!(rec.speed(), 10.0);

        // A textual wheel speed counts as absent.
        rec.signals.insert("WHEEL_SPEED_4".into(), Value::Text("n/a".into()));
        assert_eq!(rec.speed(), 0.0);
    }

    #[test]
    fn carry_over_keeps_unrefreshed_signals() {
        let mut acc = SlotAccumulator::new();
        // Heartbeat 1 opens slot 1; empty slot 0 is not emitted.
        assert!(acc.advance().is_none());

        acc.merge(map(&[("BRAKE_PRESSURE", Value::Number(120.0))]));
        let slot1 = acc.advance().unwrap();
        assert_eq!(slot1.slot_index, 1);
        assert_eq!(slot1.get_num("BRAKE_PRESSURE"), Some(120.0));

        // Nothing observed during slot 2: the value must still be visible.
        let slot2 = acc.advance().unwrap();
        assert_eq!(slot2.slot_index, 2);
        assert_eq!(slot2.get_num("BRAKE_PRESSURE"), Some(120.0));

        // A refresh overwrites the inherited value.
        acc.merge(map(&[("BRAKE_PRESSURE", Value::Number(0.0))]));
        let slot3 = acc.advance().unwrap();
        assert_eq!(slot3.get_num("BRAKE_PRESSURE"), Some(0.0));
    }

    #[test]
    fn frames_before_first_heartbeat_form_slot_zero() {
        let mut acc = SlotAccumulator::new();
        acc.merge(map(&[("BRAKE_PRESSED", Value::Number(1.0))]));
        let slot0 = acc.advance().unwrap();
        assert_eq!(slot0.slot_index, 0);
        assert_eq!(slot0.time_str(), "0.0");
    }

    #[test]
    fn merge_counts_session_first_names_once() {
        let mut acc = SlotAccumulator::new();
        assert_eq!(acc.merge(map(&[("A", Value::Number(1.0))])), 1);
        assert_eq!(acc.merge(map(&[("A", Value::Number(2.0))])), 0);
        let _ = acc.advance();
        // Carry-over does not reset the session-first tracking.
        assert_eq!(acc.merge(map(&[("A", Value::Number(3.0))])), 0);
        assert_eq!(acc.merge(map(&[("B", Value::Number(1.0))])), 1);
    }
}
