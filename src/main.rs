//! CLI entry for the CAN-FD driving-behavior monitor.
//!
//! ## Commands
//! - `start` — open the byte source and ingest until stopped.
//!   - `--headless`          no dashboard threads
//!   - `--device <path>`     serial device (default /dev/ttyS0, 115200 8N1)
//!   - `--input <file>`      replay a captured line log instead of a device
//!   - `--table <file>`      vendor decode table (JSON)
//!   - `--logs <dir>`        CSV output directory (default logs/)
//!   - `--port <n>`          dashboard port (default 8000)
//! - `stop` — ask a dashboard-mode monitor on localhost to stop (`--port`).
//!
//! Exit codes: 0 clean shutdown, 1 byte-source open failure, 2 decode-table
//! or log-storage failure. SIGINT/SIGTERM flip the running flag; the loop
//! drains the CSV queue and exits cleanly.

use log::{error, info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use canfd_monitor::config::{
    DEFAULT_DASHBOARD_PORT, DEFAULT_DEVICE, DEFAULT_LOGS_DIR, DEFAULT_TABLE_PATH, SERIAL_BAUD,
};
use canfd_monitor::dashboard::{DashboardContext, start_dashboard};
use canfd_monitor::decode::SignalTable;
use canfd_monitor::monitor::Monitor;
use canfd_monitor::sink::SinkFanout;
use canfd_monitor::sink::csv_log::CsvSink;

struct StartOpts {
    headless: bool,
    device: String,
    input: Option<PathBuf>,
    table: PathBuf,
    logs_dir: PathBuf,
    port: u16,
}

impl Default for StartOpts {
    fn default() -> Self {
        Self {
            headless: false,
            device: DEFAULT_DEVICE.to_string(),
            input: None,
            table: PathBuf::from(DEFAULT_TABLE_PATH),
            logs_dir: PathBuf::from(DEFAULT_LOGS_DIR),
            port: DEFAULT_DASHBOARD_PORT,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("start") => match parse_start_opts(args) {
            Some(opts) => run_start(opts),
            None => usage(),
        },
        Some("stop") => match parse_stop_port(args) {
            Some(port) => run_stop(port),
            None => usage(),
        },
        _ => usage(),
    }
}

fn usage() -> ExitCode {
    eprintln!("usage: canfd_monitor start [--headless] [--device PATH | --input FILE]");
    eprintln!("                           [--table FILE] [--logs DIR] [--port N]");
    eprintln!("       canfd_monitor stop  [--port N]");
    ExitCode::from(2)
}

fn parse_start_opts(mut args: impl Iterator<Item = String>) -> Option<StartOpts> {
    let mut opts = StartOpts::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--headless" => opts.headless = true,
            "--device" => opts.device = args.next()?,
            "--input" => opts.input = Some(PathBuf::from(args.next()?)),
            "--table" => opts.table = PathBuf::from(args.next()?),
            "--logs" => opts.logs_dir = PathBuf::from(args.next()?),
            "--port" => opts.port = args.next()?.parse().ok()?,
            other => {
                eprintln!("unknown option: {}", other);
                return None;
            }
        }
    }
    Some(opts)
}

fn parse_stop_port(mut args: impl Iterator<Item = String>) -> Option<u16> {
    let mut port = DEFAULT_DASHBOARD_PORT;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => port = args.next()?.parse().ok()?,
            other => {
                eprintln!("unknown option: {}", other);
                return None;
            }
        }
    }
    Some(port)
}

fn run_start(opts: StartOpts) -> ExitCode {
    // Decode table and log storage are the only fatal setup steps besides
    // the byte source itself.
    let table = match SignalTable::load(&opts.table) {
        Ok(table) => {
            info!("decode table loaded: {} messages", table.len());
            table
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let csv = match CsvSink::start(&opts.logs_dir) {
        Ok(csv) => csv,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let running = Arc::new(AtomicBool::new(true));
    {
        let flag = running.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            flag.store(false, Ordering::Release);
        }) {
            warn!("signal handler not installed: {}", e);
        }
    }

    let sinks = SinkFanout::new(csv);
    let mut monitor = Monitor::new(sinks, running.clone());

    let mut dashboard_handles = None;
    if !opts.headless {
        let ctx = DashboardContext {
            snapshot: monitor.sinks().snapshot(),
            log_buffer: monitor.sinks().log_buffer(),
            stats: monitor.stats(),
            csv_dropped: monitor.sinks().csv_dropped_counter(),
            running: running.clone(),
        };
        match start_dashboard(opts.port, ctx) {
            Ok(handles) => dashboard_handles = Some(handles),
            Err(e) => warn!("dashboard disabled, bind failed: {}", e),
        }
    }

    // Byte source: replay file or serial device.
    let source_result: std::io::Result<Box<dyn BufRead>> = match &opts.input {
        Some(path) => {
            info!("replaying {}", path.display());
            File::open(path).map(|f| Box::new(BufReader::new(f)) as Box<dyn BufRead>)
        }
        None => {
            info!("opening {} at {} baud", opts.device, SERIAL_BAUD);
            serialport::new(opts.device.as_str(), SERIAL_BAUD)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .timeout(Duration::from_millis(200))
                .open()
                .map(|p| Box::new(BufReader::new(p)) as Box<dyn BufRead>)
                .map_err(std::io::Error::other)
        }
    };

    let mut reader = match source_result {
        Ok(reader) => reader,
        Err(e) => {
            error!("cannot open byte source: {}", e);
            running.store(false, Ordering::Release);
            monitor.shutdown();
            return ExitCode::from(1);
        }
    };

    monitor.run(&mut reader, &table);

    // EOF or stop request: bring the helper threads down with us.
    running.store(false, Ordering::Release);
    monitor.shutdown();

    if let Some((feed, web)) = dashboard_handles {
        let _ = feed.join();
        let _ = web.join();
    }

    info!("clean shutdown");
    ExitCode::SUCCESS
}

/// Raw HTTP stop request against a dashboard-mode monitor on localhost.
fn run_stop(port: u16) -> ExitCode {
    let addr = format!("127.0.0.1:{}", port);
    let result = TcpStream::connect(&addr).and_then(|mut s| {
        s.set_read_timeout(Some(Duration::from_secs(2)))?;
        s.write_all(b"POST /stop HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")?;
        let mut response = String::new();
        let _ = s.read_to_string(&mut response);
        Ok(response)
    });

    match result {
        Ok(response) if response.starts_with("HTTP/1.1 200") => {
            println!("stop requested");
            ExitCode::SUCCESS
        }
        Ok(response) => {
            error!(
                "unexpected response from {}: {}",
                addr,
                response.lines().next().unwrap_or("")
            );
            ExitCode::from(1)
        }
        Err(e) => {
            error!("no monitor listening on {}: {}", addr, e);
            ExitCode::from(1)
        }
    }
}
