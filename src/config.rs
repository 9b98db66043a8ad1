//! Signal-name constants and session defaults.
//! Kept in one place so adding a vendor signal touches a single file.

/// Frame id whose arrival advances the slot clock.
pub const HEARTBEAT_ID: u16 = 0xEA;

/// Fixed slot width in seconds. Slot time is derived from the integer slot
/// index, never accumulated as floating point.
pub const SLOT_DT: f64 = 0.1;

/// History window kept by the detector: 30 slots = 3.0 seconds.
pub const HISTORY_CAP: usize = 30;

/// In-memory record ring capacity (FIFO eviction).
pub const LOG_BUFFER_CAP: usize = 1000;

/// Bounded hand-off queue between the ingest loop and the CSV task.
pub const CSV_QUEUE_CAP: usize = 256;

pub const DEFAULT_DEVICE: &str = "/dev/ttyS0";
pub const SERIAL_BAUD: u32 = 115_200;
pub const DEFAULT_LOGS_DIR: &str = "logs";
pub const DEFAULT_TABLE_PATH: &str = "config/decode_table.json";
pub const DEFAULT_DASHBOARD_PORT: u16 = 8000;

// Detector inputs (vendor DB signal names).
pub const SIG_ACCEL: &str = "ACCELERATOR_PEDAL_PRESSED";
pub const SIG_BRAKE: &str = "BRAKE_PRESSED";
pub const SIG_BRAKE_PRESSURE: &str = "BRAKE_PRESSURE";
pub const SIG_STEERING_ANGLE: &str = "STEERING_ANGLE_2";
pub const SIG_STEERING_RATE: &str = "STEERING_RATE";
pub const SIG_STEERING_TORQUE: &str = "STEERING_COL_TORQUE";

/// Wheel speeds averaged into the derived SPEED value.
pub const WHEEL_SPEEDS: [&str; 4] = [
    "WHEEL_SPEED_1",
    "WHEEL_SPEED_2",
    "WHEEL_SPEED_3",
    "WHEEL_SPEED_4",
];

/// Derived, never persisted to the CSV log.
pub const SIG_SPEED: &str = "SPEED";

/// Signals the detector cannot run without.
pub const REQUIRED_SIGNALS: [&str; 3] = [SIG_ACCEL, SIG_BRAKE, SIG_SPEED];

/// Series plotted on the live dashboard chart.
pub const VISUALIZATION_SIGNALS: [&str; 6] = [
    SIG_SPEED,
    SIG_ACCEL,
    SIG_BRAKE,
    SIG_BRAKE_PRESSURE,
    SIG_STEERING_ANGLE,
    SIG_STEERING_RATE,
];
