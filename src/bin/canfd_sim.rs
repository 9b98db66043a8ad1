//! Synthetic CAN-FD traffic generator.
//!
//! Emits a scripted drive as `CAN FD RX:` lines on stdout, encoded with the
//! layout of `config/decode_table.json`, so the monitor can be exercised
//! end to end without a vehicle:
//!
//! ```text
//! canfd_sim --realtime > drive.txt          # paced at 10 ms per heartbeat
//! canfd_sim | canfd_monitor start --input /dev/stdin --headless
//! ```
//!
//! The script walks through each detectable behavior: rapid acceleration,
//! pedal misuse, hard braking, a drowsy cruise, and a sharp steer, with
//! idle stretches between. `--noise` adds sensor jitter so consecutive
//! frames differ the way a real bus does.

use rand::random_range;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::io::{BufWriter, Write};
use std::time::Duration;

const HEARTBEAT_PERIOD_MS: u64 = 10;

#[derive(Debug, Clone, Copy)]
struct SlotState {
    accel: bool,
    brake: bool,
    pressure: f64,
    speed: f64,
    angle: f64,
    rate: f64,
    torque: f64,
    gear: u8,
}

impl SlotState {
    fn idle(speed: f64) -> Self {
        Self {
            accel: false,
            brake: false,
            pressure: 0.0,
            speed,
            angle: 0.0,
            rate: 0.0,
            torque: 0.0,
            gear: 3,
        }
    }
}

fn main() {
    env_logger::init();

    let mut realtime = false;
    let mut noise = false;
    let mut loops = 1usize;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--realtime" => realtime = true,
            "--noise" => noise = true,
            "--loops" => {
                loops = args
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1);
            }
            other => {
                eprintln!("unknown option: {}", other);
                eprintln!("usage: canfd_sim [--realtime] [--noise] [--loops N]");
                std::process::exit(2);
            }
        }
    }

    let script = build_script();
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    let mut counter: u8 = 0;
    for _ in 0..loops {
        for state in &script {
            let state = if noise { jitter(*state) } else { *state };
            if emit_slot(&mut out, &state, counter).is_err() {
                // Reader went away (broken pipe): stop quietly.
                return;
            }
            counter = counter.wrapping_add(1);
            if realtime {
                let _ = out.flush();
                sleeper.sleep(Duration::from_millis(HEARTBEAT_PERIOD_MS));
            }
        }
    }
    let _ = out.flush();
}

/// One pass through every detectable behavior, slot by slot.
fn build_script() -> Vec<SlotState> {
    let mut script = Vec::new();

    // Pull-away and idle.
    for _ in 0..20 {
        script.push(SlotState::idle(0.0));
    }

    // Rapid acceleration: 2 -> 8 under accelerator only.
    for k in 0..10 {
        let mut s = SlotState::idle(2.0 + 0.7 * k as f64);
        s.accel = true;
        script.push(s);
    }
    for _ in 0..10 {
        let mut s = SlotState::idle(10.0);
        s.accel = true;
        script.push(s);
    }

    // Pedal misuse: both pedals held well past the 1 s threshold.
    for _ in 0..15 {
        let mut s = SlotState::idle(10.0);
        s.accel = true;
        s.brake = true;
        s.pressure = 80.0;
        script.push(s);
    }

    // Release and coast.
    for _ in 0..10 {
        script.push(SlotState::idle(10.0));
    }

    // Hard braking: pressure spike while still above the speed floor.
    for k in 0..8 {
        let mut s = SlotState::idle(10.0 - 0.5 * k as f64);
        s.brake = true;
        s.pressure = 400.0;
        script.push(s);
    }

    // Drowsy cruise: three-plus quiet seconds at speed.
    for _ in 0..35 {
        let mut s = SlotState::idle(10.0);
        s.angle = 1.0;
        s.rate = 4.0;
        s.torque = 0.2;
        script.push(s);
    }

    // Sharp steer: fast wheel with a wide swing inside 0.3 s.
    for k in 0..5 {
        let mut s = SlotState::idle(10.0);
        s.angle = 10.0 * k as f64;
        s.rate = 150.0;
        s.torque = 2.0;
        script.push(s);
    }

    // Settle out.
    for _ in 0..10 {
        script.push(SlotState::idle(8.0));
    }

    script
}

fn jitter(mut s: SlotState) -> SlotState {
    s.speed = (s.speed + random_range(-0.05..0.05)).max(0.0);
    s.angle += random_range(-0.2..0.2);
    s.pressure = (s.pressure + random_range(-1.0..1.0)).max(0.0);
    s
}

/// Signal frames for one slot, then the heartbeat that closes it.
fn emit_slot(out: &mut impl Write, s: &SlotState, counter: u8) -> std::io::Result<()> {
    write_frame(out, 0x220, &wheel_payload(s.speed))?;
    write_frame(out, 0x120, &pedal_payload(s))?;
    write_frame(out, 0x180, &steering_payload(s))?;
    write_frame(out, 0x1A5, &[s.gear & 0x0F])?;
    write_frame(out, 0xEA, &[counter])?;
    Ok(())
}

fn write_frame(out: &mut impl Write, id: u16, payload: &[u8]) -> std::io::Result<()> {
    let data: Vec<String> = payload.iter().map(|b| format!("{:02X}", b)).collect();
    writeln!(
        out,
        "CAN FD RX: ID=0x{:X}, DLC={}, Data={}",
        id,
        payload.len(),
        data.join(" ")
    )
}

fn wheel_payload(speed: f64) -> Vec<u8> {
    let raw = ((speed / 0.01).round().clamp(0.0, u16::MAX as f64)) as u16;
    let mut payload = Vec::with_capacity(8);
    for _ in 0..4 {
        payload.extend_from_slice(&raw.to_le_bytes());
    }
    payload
}

fn pedal_payload(s: &SlotState) -> Vec<u8> {
    let flags = u8::from(s.accel) | (u8::from(s.brake) << 1);
    let pressure = (s.pressure.round().clamp(0.0, u16::MAX as f64)) as u16;
    let mut payload = vec![flags];
    payload.extend_from_slice(&pressure.to_le_bytes());
    payload
}

fn steering_payload(s: &SlotState) -> Vec<u8> {
    let angle = ((s.angle / 0.1).round().clamp(i16::MIN as f64, i16::MAX as f64)) as i16;
    let rate = (s.rate.round().clamp(i16::MIN as f64, i16::MAX as f64)) as i16;
    let torque = ((s.torque / 0.1).round().clamp(i8::MIN as f64, i8::MAX as f64)) as i8;
    let mut payload = Vec::with_capacity(5);
    payload.extend_from_slice(&angle.to_le_bytes());
    payload.extend_from_slice(&rate.to_le_bytes());
    payload.push(torque as u8);
    payload
}
