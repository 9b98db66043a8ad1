//! End-to-end pipeline scenarios: textual CAN-FD lines in, slot records
//! and CSV rows out. Frames are encoded with the same layout as
//! `config/decode_table.json`, which is also the table under test.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use canfd_monitor::decode::SignalTable;
use canfd_monitor::monitor::Monitor;
use canfd_monitor::sink::csv_log::CsvSink;
use canfd_monitor::sink::{SharedLogBuffer, SinkFanout};
use canfd_monitor::slot::SlotRecord;

static TEST_SEQ: AtomicUsize = AtomicUsize::new(0);

struct Harness {
    monitor: Monitor,
    table: SignalTable,
    ring: SharedLogBuffer,
    csv_path: PathBuf,
    dir: PathBuf,
    counter: u8,
}

impl Harness {
    fn new() -> Self {
        let n = TEST_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir =
            std::env::temp_dir().join(format!("canfd_pipeline_{}_{}", std::process::id(), n));
        let table = SignalTable::from_json(include_str!("../config/decode_table.json")).unwrap();
        let csv = CsvSink::start(&dir).unwrap();
        let csv_path = csv.path().to_path_buf();
        let sinks = SinkFanout::new(csv);
        let ring = sinks.log_buffer();
        let running = Arc::new(AtomicBool::new(true));
        let monitor = Monitor::new(sinks, running);

        let mut harness = Self {
            monitor,
            table,
            ring,
            csv_path,
            dir,
            counter: 0,
        };
        // Open slot 1 so scenario slot numbering starts at time 0.1.
        harness.heartbeat();
        harness
    }

    fn line(&mut self, line: &str) {
        self.monitor.handle_line(line, &self.table);
    }

    fn frame(&mut self, id: u16, payload: &[u8]) {
        let data: Vec<String> = payload.iter().map(|b| format!("{:02X}", b)).collect();
        let line = format!(
            "CAN FD RX: ID=0x{:X}, DLC={}, Data={}",
            id,
            payload.len(),
            data.join(" ")
        );
        self.line(&line);
    }

    fn heartbeat(&mut self) {
        let counter = self.counter;
        self.counter = self.counter.wrapping_add(1);
        self.frame(0xEA, &[counter]);
    }

    fn pedals(&mut self, accel: bool, brake: bool, pressure: f64) {
        let flags = u8::from(accel) | (u8::from(brake) << 1);
        let raw = pressure.round() as u16;
        let mut payload = vec![flags];
        payload.extend_from_slice(&raw.to_le_bytes());
        self.frame(0x120, &payload);
    }

    fn wheels(&mut self, speed: f64) {
        let raw = (speed / 0.01).round() as u16;
        let mut payload = Vec::new();
        for _ in 0..4 {
            payload.extend_from_slice(&raw.to_le_bytes());
        }
        self.frame(0x220, &payload);
    }

    fn steering(&mut self, angle: f64, rate: f64, torque: f64) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&((angle / 0.1).round() as i16).to_le_bytes());
        payload.extend_from_slice(&(rate.round() as i16).to_le_bytes());
        payload.push(((torque / 0.1).round() as i8) as u8);
        self.frame(0x180, &payload);
    }

    /// One full slot: signal frames, then the heartbeat that finalizes it.
    fn drive_slot(&mut self, accel: bool, brake: bool, speed: f64, pressure: f64) {
        self.wheels(speed);
        self.pedals(accel, brake, pressure);
        self.heartbeat();
    }

    fn records(&self) -> Vec<SlotRecord> {
        self.ring.lock().iter().cloned().collect()
    }

    fn record(&self, slot_index: u64) -> SlotRecord {
        self.records()
            .into_iter()
            .find(|r| r.slot_index == slot_index)
            .unwrap_or_else(|| panic!("no record for slot {}", slot_index))
    }

    /// Shuts down and returns the CSV rows (header included).
    fn finish(self) -> Vec<Vec<String>> {
        self.monitor.shutdown();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.csv_path)
            .unwrap();
        let rows = reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect();
        std::fs::remove_dir_all(&self.dir).ok();
        rows
    }
}

#[test]
fn pm_via_both_pedals_held() {
    let mut h = Harness::new();
    for _ in 0..11 {
        h.drive_slot(true, true, 10.0, 80.0);
    }

    for k in 1..=9 {
        assert_eq!(h.record(k).event_label(), "none", "slot {}", k);
    }
    let r10 = h.record(10);
    assert_eq!(r10.event_label(), "PM_on");
    assert_eq!(r10.trigger_field(), "PM_on");
    assert_eq!(h.record(11).event_label(), "PM_on");
    // The repeat raise at slot 11 is discarded while the state is on.
    assert_eq!(h.record(11).trigger_field(), "none");
    h.finish();
}

#[test]
fn pm_via_acceleration_surge() {
    let mut h = Harness::new();
    // Anchor at slot 1 with v=5; speed climbs to 10 across the window.
    h.drive_slot(true, false, 5.0, 0.0);
    for k in 2..=10 {
        h.drive_slot(true, false, 5.0 + 0.5 * (k as f64 - 1.0), 0.0);
    }
    h.drive_slot(true, false, 10.0, 0.0);

    // start=5 < 6 and dv=5 >= 4: PM raised when the window closes.
    let r11 = h.record(11);
    assert!(r11.trigger_field().contains("PM_on"));
    assert_eq!(r11.event_label(), "PM_on");
    h.finish();
}

#[test]
fn sa_then_pm_preemption_with_audit_off() {
    let mut h = Harness::new();
    // SA anchor at slot 1 (start=2); window closes at slot 6 with dv=3.
    h.drive_slot(true, false, 2.0, 0.0);
    for _ in 2..=5 {
        h.drive_slot(true, false, 3.0, 0.0);
    }
    h.drive_slot(true, false, 5.0, 0.0);

    let r6 = h.record(6);
    assert_eq!(r6.trigger_field(), "SA_on");
    assert_eq!(r6.event_label(), "SA_on");

    // Brake joins at slot 7; T_PM crosses 1.0 s ten slots later.
    for _ in 7..=15 {
        h.drive_slot(true, true, 5.0, 60.0);
    }
    assert_eq!(h.record(15).event_label(), "SA_on");

    h.drive_slot(true, true, 5.0, 60.0);
    let r16 = h.record(16);
    // PM preempts SA: the cancelled SA leaves its off edge in the log.
    assert_eq!(r16.trigger_field(), "PM_on, SA_off");
    assert_eq!(r16.event_label(), "PM_on");
    h.finish();
}

#[test]
fn sb_hard_brake_with_pressure_spike() {
    let mut h = Harness::new();
    for _ in 0..4 {
        h.drive_slot(false, true, 10.0, 350.0);
    }

    assert_eq!(h.record(1).event_label(), "none");
    assert_eq!(h.record(2).event_label(), "none");
    // T_SB_pre reaches 0.3 s on the third braking slot and the window
    // holds a >=300 pressure sample.
    let r3 = h.record(3);
    assert_eq!(r3.trigger_field(), "SB_on");
    assert_eq!(r3.event_label(), "SB_on");
    assert_eq!(h.record(4).event_label(), "SB_on");
    h.finish();
}

#[test]
fn dd_drowsy_cruise() {
    let mut h = Harness::new();
    for _ in 0..31 {
        h.wheels(10.0);
        h.pedals(false, false, 0.0);
        h.steering(1.0, 5.0, 0.2);
        h.heartbeat();
    }

    assert_eq!(h.record(29).event_label(), "none");
    let r30 = h.record(30);
    assert_eq!(r30.trigger_field(), "DD_on");
    assert_eq!(r30.event_label(), "DD_on");
    // Stays on; the repeat raises are discarded.
    assert_eq!(h.record(31).event_label(), "DD_on");
    assert_eq!(h.record(31).trigger_field(), "none");
    h.finish();
}

#[test]
fn sh_sharp_steer_within_window() {
    let mut h = Harness::new();
    h.wheels(10.0);
    h.pedals(false, false, 0.0);
    h.steering(0.0, 120.0, 2.0);
    h.heartbeat();

    h.steering(35.0, 120.0, 2.0);
    h.heartbeat();

    assert_eq!(h.record(1).event_label(), "none");
    let r2 = h.record(2);
    assert_eq!(r2.trigger_field(), "SH_on");
    assert_eq!(r2.event_label(), "SH_on");
    h.finish();
}

#[test]
fn time_axis_is_exact_and_monotonic() {
    let mut h = Harness::new();
    for k in 0..300 {
        h.drive_slot(k % 2 == 0, false, 5.0 + (k % 7) as f64, 0.0);
    }
    let records = h.records();
    assert_eq!(records.len(), 300);
    for pair in records.windows(2) {
        assert!(
            (pair[1].time() - pair[0].time() - 0.1).abs() < 1e-9,
            "spacing broke between {} and {}",
            pair[0].slot_index,
            pair[1].slot_index
        );
    }
    // Rendered times carry exactly one decimal.
    assert_eq!(records[0].time_str(), "0.1");
    assert_eq!(records[299].time_str(), "30.0");
    h.finish();
}

#[test]
fn duplicate_heartbeats_advance_once() {
    let mut h = Harness::new();
    h.pedals(false, true, 50.0);
    // The same heartbeat payload twice: exactly one slot advance.
    h.frame(0xEA, &[0x42]);
    h.frame(0xEA, &[0x42]);
    assert_eq!(h.records().len(), 1);
    // A changed payload advances again.
    h.frame(0xEA, &[0x43]);
    assert_eq!(h.records().len(), 2);
    h.finish();
}

#[test]
fn carry_over_survives_quiet_slots() {
    let mut h = Harness::new();
    h.wheels(10.0);
    h.pedals(false, true, 310.0);
    h.heartbeat();
    // Nothing on the bus for three slots.
    h.heartbeat();
    h.heartbeat();
    h.heartbeat();

    let r4 = h.record(4);
    assert_eq!(r4.get_num("BRAKE_PRESSURE"), Some(310.0));
    assert_eq!(r4.get_num("BRAKE_PRESSED"), Some(1.0));
    assert_eq!(r4.speed(), 10.0);
    h.finish();
}

#[test]
fn garbage_between_frames_changes_nothing() {
    let mut h = Harness::new();
    h.drive_slot(false, false, 10.0, 0.0);
    h.line("");
    h.line("boot: gateway v2.1");
    h.line("CAN FD RX: ID=0xQQ, DLC=1, Data=00");
    h.drive_slot(false, false, 10.0, 0.0);

    let records = h.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].time_str(), "0.2");
    h.finish();
}

#[test]
fn csv_rows_align_with_the_widened_header() {
    let mut h = Harness::new();
    // Slot 1 knows only the wheels; pressure appears in slot 2.
    h.wheels(10.0);
    h.heartbeat();
    h.pedals(false, true, 310.0);
    h.heartbeat();

    let rows = h.finish();
    let header = &rows[0];
    assert_eq!(header[0], "Time");
    assert_eq!(header[header.len() - 2], "event");
    assert_eq!(header[header.len() - 1], "trigger");
    let wheel_col = header.iter().position(|c| c == "WHEEL_SPEED_1").unwrap();
    let pressure_col = header.iter().position(|c| c == "BRAKE_PRESSURE").unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][0], "0.1");
    assert_eq!(rows[1][wheel_col], "10");
    // Slot 1 never saw the pressure: the re-aligned cell is empty.
    assert_eq!(rows[1][pressure_col], "");
    assert_eq!(rows[2][0], "0.2");
    assert_eq!(rows[2][pressure_col], "310");
}

#[test]
fn gear_choice_label_rides_through_as_text() {
    let mut h = Harness::new();
    h.frame(0x1A5, &[0x01]);
    h.heartbeat();
    let r1 = h.record(1);
    assert_eq!(
        r1.signals.get("GEAR_POSITION"),
        Some(&canfd_monitor::slot::Value::Text("R".into()))
    );
    h.finish();
}
