//! detector.rs
//! Per-event on/off condition engine.
//!
//! Each finalized slot advances a set of named timers (stepped while their
//! condition holds, reset otherwise), a pair of delay anchors that hold a
//! start-speed observation across a window, and a 3-second history ring
//! backing the window-based checks (hard braking, sharp steering). All five
//! event classes are evaluated independently on the same slot, in the fixed
//! order PM, SA, SB, DD, SH; conflicts are the arbitrator's job.
//!
//! Timers and the detector clock count whole slots and convert to seconds
//! on read, so a threshold like 1.0 s is crossed on exactly the tenth
//! stepped slot — accumulating 0.1 in floating point misses it.
//!
//! The off-wait timers are deliberately asymmetric: `SA_off_wait` resets
//! after firing (one SA_off per quiescent period) while the others keep
//! firing each slot once crossed, and `PM_off_wait` is only ever stepped in
//! the no-accelerator branch so it never resets at all. Downstream log
//! consumers depend on these shapes; do not regularize them.

use std::collections::{HashMap, VecDeque, hash_map::Entry};

use crate::config::{
    HISTORY_CAP, SIG_ACCEL, SIG_BRAKE, SIG_BRAKE_PRESSURE, SIG_STEERING_ANGLE, SIG_STEERING_RATE,
    SIG_STEERING_TORQUE, SLOT_DT,
};
use crate::event::{EventKind, Trigger};
use crate::slot::SlotRecord;

// Timer keys.
const T_PM: &str = "PM";
const T_PM_OFF_WAIT: &str = "PM_off_wait";
const T_SA_OFF_WAIT: &str = "SA_off_wait";
const T_SB_PRE: &str = "SB_pre";
const T_SB_OFF_WAIT: &str = "SB_off_wait";
const T_DD_COUNT: &str = "DD_count";
const T_DD_OFF_WAIT: &str = "DD_off_wait";
const T_SH_OFF_WAIT: &str = "SH_off_wait";

// Delay-anchor keys.
const D_PM_CHECK: &str = "PM_check";
const D_SA_PRE: &str = "SA_pre";

/// History-window width for the SB and SH checks, in slots (0.3 s).
const WINDOW_SLOTS: u64 = 3;

/// Named timers, counted in whole slots and read back as seconds.
#[derive(Debug, Default)]
struct TimerMap(HashMap<&'static str, u64>);

impl TimerMap {
    /// Steps the timer while `cond` holds, resets it otherwise.
    fn update(&mut self, key: &'static str, cond: bool) {
        let t = self.0.entry(key).or_insert(0);
        *t = if cond { *t + 1 } else { 0 };
    }

    /// Accumulated seconds; exact at every tenth because the count is
    /// integral.
    fn secs(&self, key: &'static str) -> f64 {
        self.0.get(key).copied().unwrap_or(0) as f64 * SLOT_DT
    }

    fn reset(&mut self, key: &'static str) {
        self.0.insert(key, 0);
    }
}

/// Start-speed observation held across a multi-slot window. `elapsed`
/// stays 0 on the anchoring slot and steps on subsequent qualifying slots.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    start_speed: f64,
    elapsed_slots: u64,
}

impl Anchor {
    fn elapsed_secs(&self) -> f64 {
        self.elapsed_slots as f64 * SLOT_DT
    }
}

/// One kinematic sample per detector slot. Only `angle` and `pressure`
/// feed the window checks; the rest ride along for diagnostics.
#[derive(Debug, Clone, Copy)]
#[allow(dead_code)]
struct HistorySample {
    tick: u64,
    speed: f64,
    angle: f64,
    rate: f64,
    torque: f64,
    pressure: f64,
}

#[derive(Debug, Default)]
pub struct EventDetector {
    timers: TimerMap,
    delays: HashMap<&'static str, Anchor>,
    history: VecDeque<HistorySample>,
    /// Detector-local clock in slots: advances by one per call, used only
    /// for the history-window cutoffs. Record time comes from the slot
    /// index, not from here.
    tick: u64,
}

impl EventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates every event class on one finalized slot and returns the
    /// raised edges in emission order.
    ///
    /// If the pedal states are absent from the slot (or textual), no
    /// triggers are emitted and the history window is not advanced; the
    /// clock still ticks so window cutoffs stay aligned with the slot count.
    pub fn detect(&mut self, record: &SlotRecord) -> Vec<Trigger> {
        self.tick += 1;

        let mut triggers = Vec::new();

        let (Some(a), Some(b)) = (record.get_num(SIG_ACCEL), record.get_num(SIG_BRAKE)) else {
            return triggers;
        };
        let v = record.speed();
        let p = record.get_num(SIG_BRAKE_PRESSURE).unwrap_or(0.0);
        let ang = record.get_num(SIG_STEERING_ANGLE).unwrap_or(0.0);
        let rate = record.get_num(SIG_STEERING_RATE).unwrap_or(0.0);
        let tq = record.get_num(SIG_STEERING_TORQUE).unwrap_or(0.0);

        if self.history.len() >= HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(HistorySample {
            tick: self.tick,
            speed: v,
            angle: ang,
            rate,
            torque: tq,
            pressure: p,
        });

        let a_on = a != 0.0;
        let b_on = b != 0.0;

        // PM - pedal misuse. T_PM is stepped only here and holds its value
        // while the branch is not taken.
        if a_on && b_on {
            self.timers.update(T_PM, true);
            if self.timers.secs(T_PM) >= 1.0 {
                triggers.push(Trigger::on(EventKind::Pm));
            }
        } else if a_on && !b_on {
            // Anchor the speed at the first accelerator-only slot; the
            // surge check runs once the 1.0 s window completes.
            match self.delays.entry(D_PM_CHECK) {
                Entry::Vacant(slot) => {
                    slot.insert(Anchor { start_speed: v, elapsed_slots: 0 });
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().elapsed_slots += 1;
                    if slot.get().elapsed_secs() >= 1.0 {
                        let anchor = slot.remove();
                        let dv = v - anchor.start_speed;
                        if (anchor.start_speed < 6.0 && dv >= 4.0)
                            || (anchor.start_speed >= 6.0 && dv >= 8.0)
                        {
                            triggers.push(Trigger::on(EventKind::Pm));
                        }
                    }
                }
            }
        } else {
            self.delays.remove(D_PM_CHECK);
            self.timers.update(T_PM_OFF_WAIT, a == 0.0);
            if self.timers.secs(T_PM_OFF_WAIT) >= 0.5 {
                triggers.push(Trigger::off(EventKind::Pm));
            }
        }

        // SA - rapid acceleration
        if a_on && !b_on {
            match self.delays.entry(D_SA_PRE) {
                Entry::Vacant(slot) => {
                    slot.insert(Anchor { start_speed: v, elapsed_slots: 0 });
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().elapsed_slots += 1;
                    if slot.get().elapsed_secs() >= 0.5 {
                        let anchor = slot.remove();
                        let dv = v - anchor.start_speed;
                        if (anchor.start_speed < 6.0 && dv >= 2.0)
                            || (anchor.start_speed >= 6.0 && dv >= 4.0)
                        {
                            triggers.push(Trigger::on(EventKind::Sa));
                        }
                    }
                }
            }
        } else {
            self.delays.remove(D_SA_PRE);
        }

        // SA off-wait runs every slot; the only off-wait that self-resets.
        self.timers.update(T_SA_OFF_WAIT, a == 0.0);
        if self.timers.secs(T_SA_OFF_WAIT) >= 0.5 {
            triggers.push(Trigger::off(EventKind::Sa));
            self.timers.reset(T_SA_OFF_WAIT);
        }

        // SB - hard braking
        if v >= 6.0 && b_on {
            self.timers.update(T_SB_PRE, true);
            if self.timers.secs(T_SB_PRE) >= 0.3 {
                let spike = self.recent().any(|h| h.pressure >= 300.0);
                if spike {
                    triggers.push(Trigger::on(EventKind::Sb));
                }
            }
        } else {
            self.timers.reset(T_SB_PRE);
        }

        self.timers.update(T_SB_OFF_WAIT, b == 0.0);
        if self.timers.secs(T_SB_OFF_WAIT) >= 0.3 {
            triggers.push(Trigger::off(EventKind::Sb));
        }

        // DD - drowsy driving: cruising with no pedal input and the wheel
        // held still for 3 consecutive seconds.
        let c_dd =
            v >= 6.0 && !a_on && !b_on && tq.abs() < 1.0 && ang.abs() < 3.0 && rate.abs() < 30.0;
        if c_dd {
            self.timers.update(T_DD_COUNT, true);
            if self.timers.secs(T_DD_COUNT) >= 3.0 {
                triggers.push(Trigger::on(EventKind::Dd));
            }
        } else {
            self.timers.reset(T_DD_COUNT);
            self.timers.update(T_DD_OFF_WAIT, a == 1.0 || b == 1.0);
            if self.timers.secs(T_DD_OFF_WAIT) >= 0.3 {
                triggers.push(Trigger::off(EventKind::Dd));
            }
        }

        // SH - sharp steering: fast wheel with a >30 degree swing inside
        // the last 0.3 s.
        if v >= 6.0 && rate.abs() >= 100.0 {
            let mut count = 0usize;
            let mut min_angle = f64::INFINITY;
            let mut max_angle = f64::NEG_INFINITY;
            for h in self.recent() {
                count += 1;
                min_angle = min_angle.min(h.angle);
                max_angle = max_angle.max(h.angle);
            }
            if count >= 2 && max_angle - min_angle > 30.0 {
                triggers.push(Trigger::on(EventKind::Sh));
            }
        }

        self.timers.update(T_SH_OFF_WAIT, rate.abs() < 10.0);
        if self.timers.secs(T_SH_OFF_WAIT) >= 1.0 {
            triggers.push(Trigger::off(EventKind::Sh));
        }

        triggers
    }

    /// Contiguous suffix of the history ring inside the 0.3 s window
    /// (samples with tick >= current tick - 3).
    fn recent(&self) -> impl Iterator<Item = &HistorySample> {
        let cutoff = self.tick.saturating_sub(WINDOW_SLOTS);
        self.history.iter().rev().take_while(move |h| h.tick >= cutoff)
    }
}
