use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use canfd_monitor::config::{
    SIG_ACCEL, SIG_BRAKE, SIG_BRAKE_PRESSURE, SIG_STEERING_ANGLE, SIG_STEERING_RATE,
    SIG_STEERING_TORQUE,
};
use canfd_monitor::event::EventFsm;
use canfd_monitor::slot::{SlotRecord, Value};

fn driving_record(index: u64, a: f64, b: f64, v: f64) -> SlotRecord {
    let mut rec = SlotRecord::new(index);
    for (name, value) in [
        (SIG_ACCEL, a),
        (SIG_BRAKE, b),
        ("WHEEL_SPEED_1", v),
        ("WHEEL_SPEED_2", v),
        ("WHEEL_SPEED_3", v),
        ("WHEEL_SPEED_4", v),
        (SIG_BRAKE_PRESSURE, 120.0),
        (SIG_STEERING_ANGLE, 2.0),
        (SIG_STEERING_RATE, 15.0),
        (SIG_STEERING_TORQUE, 0.4),
    ] {
        rec.signals.insert(name.to_string(), Value::Number(value));
    }
    rec
}

/// Detection + arbitration per finalized slot; the per-heartbeat cost on
/// the ingest path.
fn detector_slot_bench(c: &mut Criterion) {
    // A varied script so timers, anchors, and the history window all churn.
    let script: Vec<SlotRecord> = (0..64)
        .map(|k| {
            let a = if k % 3 != 0 { 1.0 } else { 0.0 };
            let b = if k % 7 == 0 { 1.0 } else { 0.0 };
            driving_record(k as u64 + 1, a, b, 5.0 + (k % 9) as f64)
        })
        .collect();

    c.bench_function("detector_slot", |bench| {
        let mut fsm = EventFsm::new();
        let mut i = 0usize;
        bench.iter(|| {
            let rec = &script[i % script.len()];
            i += 1;
            let triggers = fsm.process(black_box(rec));
            black_box(triggers);
        })
    });
}

criterion_group!(benches, detector_slot_bench);
criterion_main!(benches);
