//! dashboard.rs
//! Live feed + HTTP surface for the monitor.
//!
//! Two threads next to the ingest loop:
//! - **Feed loop:** polls the snapshot cell at 20 Hz, skips records whose
//!   `Time` was already sent, computes `SPEED` from the wheel speeds, and
//!   caches the JSON message the transport serves.
//! - **Web server:** plain HTTP on the loopback interface:
//!   `/` (built-in page), `/data.json` (latest feed message), `/chart.svg`
//!   (recent history rendered from the log ring), `/metrics.json` (ingest
//!   counters), `POST /stop` (clears the running flag).
//!
//! Neither thread ever blocks the ingest loop; both exit when the shared
//! running flag clears.

use log::{debug, error, info};
use parking_lot::RwLock;
use plotters::coord::Shift;
use plotters::prelude::*;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{SIG_SPEED, VISUALIZATION_SIGNALS, WHEEL_SPEEDS};
use crate::monitor::SharedStats;
use crate::sink::SharedLogBuffer;
use crate::sink::log_buffer::LogBuffer;
use crate::sink::snapshot::SnapshotCell;
use crate::slot::SlotRecord;

const FEED_TICK_MS: u64 = 50;
const CHART_POINTS: usize = 300;

/// Builds the single message the transport forwards for one record:
/// the record's signals in order, `SPEED` when the four wheel speeds are
/// present, the event/trigger fields, and the session timing attributes.
pub fn build_feed_message(
    record: &SlotRecord,
    logging_start_time: &str,
    logging_duration_secs: f64,
) -> serde_json::Value {
    let mut msg = serde_json::Map::new();
    msg.insert("Time".into(), serde_json::json!(record.time()));

    for (name, value) in &record.signals {
        match serde_json::to_value(value) {
            Ok(v) => {
                msg.insert(name.clone(), v);
            }
            Err(e) => debug!("unserializable signal {}: {}", name, e),
        }
    }

    let wheels_present = WHEEL_SPEEDS
        .iter()
        .all(|name| record.signals.contains_key(*name));
    if wheels_present {
        msg.insert(SIG_SPEED.into(), serde_json::json!(record.speed()));
    }

    msg.insert("event".into(), serde_json::json!(record.event_label()));
    msg.insert("trigger".into(), serde_json::json!(record.trigger_field()));
    msg.insert(
        "logging_start_time".into(),
        serde_json::json!(logging_start_time),
    );
    msg.insert(
        "logging_duration".into(),
        serde_json::json!(logging_duration_secs),
    );

    serde_json::Value::Object(msg)
}

/// Everything the dashboard threads read; all shared handles, no pipeline
/// state.
pub struct DashboardContext {
    pub snapshot: Arc<SnapshotCell>,
    pub log_buffer: SharedLogBuffer,
    pub stats: SharedStats,
    pub csv_dropped: Arc<AtomicU64>,
    pub running: Arc<AtomicBool>,
}

/// Spawns the feed and web threads. Returns their handles; both observe
/// `ctx.running` and exit when it clears.
pub fn start_dashboard(
    port: u16,
    ctx: DashboardContext,
) -> std::io::Result<(JoinHandle<()>, JoinHandle<()>)> {
    let cached_feed: Arc<RwLock<String>> = Arc::new(RwLock::new(String::new()));
    let session_start = chrono::Local::now();
    let started = Instant::now();

    // Bind before spawning anything so a taken port leaves no threads behind.
    let listener = bind_listener(port)?;
    info!("dashboard available at http://127.0.0.1:{}", port);

    let feed_handle = {
        let snapshot = ctx.snapshot.clone();
        let running = ctx.running.clone();
        let cached = cached_feed.clone();
        let start_iso = session_start.to_rfc3339();
        thread::spawn(move || {
            let mut last_sent: Option<u64> = None;
            while running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(FEED_TICK_MS));

                let Some(record) = snapshot.peek() else {
                    continue;
                };
                // Re-sending the same Time value is forbidden.
                if last_sent == Some(record.slot_index) {
                    continue;
                }
                last_sent = Some(record.slot_index);

                let msg =
                    build_feed_message(&record, &start_iso, started.elapsed().as_secs_f64());
                *cached.write() = msg.to_string();
            }
            debug!("dashboard feed loop exiting");
        })
    };

    let web_handle = {
        let running = ctx.running.clone();
        thread::spawn(move || {
            serve(listener, ctx, cached_feed, running);
        })
    };

    Ok((feed_handle, web_handle))
}

fn bind_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(128)?;

    let listener: TcpListener = socket.into();
    // Non-blocking accept so the loop can observe the running flag.
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn serve(
    listener: TcpListener,
    ctx: DashboardContext,
    cached_feed: Arc<RwLock<String>>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((mut stream, _peer)) => {
                let log_buffer = ctx.log_buffer.clone();
                let stats = ctx.stats.clone();
                let csv_dropped = ctx.csv_dropped.clone();
                let feed = cached_feed.clone();
                let flag = running.clone();
                thread::spawn(move || {
                    let _ = stream.set_nonblocking(false);
                    handle_request(&mut stream, &log_buffer, &stats, &csv_dropped, &feed, &flag);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                error!("dashboard accept error: {}", e);
                thread::sleep(Duration::from_millis(100));
            }
        }
    }
    debug!("dashboard web server exiting");
}

fn handle_request(
    stream: &mut TcpStream,
    log_buffer: &SharedLogBuffer,
    stats: &SharedStats,
    csv_dropped: &AtomicU64,
    cached_feed: &RwLock<String>,
    running: &AtomicBool,
) {
    let mut line = String::new();
    {
        let Ok(clone) = stream.try_clone() else {
            return;
        };
        let mut reader = BufReader::new(clone);
        if reader.read_line(&mut line).is_err() {
            return;
        }
    }

    let response = if line.starts_with("GET / ") {
        http_response("text/html", INDEX_HTML)
    } else if line.starts_with("GET /data.json") {
        let feed = cached_feed.read().clone();
        if feed.is_empty() {
            "HTTP/1.1 503 Service Unavailable\r\n\r\nno data yet".to_string()
        } else {
            http_response("application/json", &feed)
        }
    } else if line.starts_with("GET /chart.svg") {
        match render_chart(&log_buffer.lock()) {
            Some(svg) => http_response("image/svg+xml", &svg),
            None => "HTTP/1.1 503 Service Unavailable\r\n\r\nchart not ready".to_string(),
        }
    } else if line.starts_with("GET /metrics.json") {
        let snap = stats.snapshot(csv_dropped.load(Ordering::Relaxed));
        match serde_json::to_string(&snap) {
            Ok(json) => http_response("application/json", &json),
            Err(_) => "HTTP/1.1 500 Internal Server Error\r\n\r\n".to_string(),
        }
    } else if line.starts_with("POST /stop") {
        info!("stop requested over http");
        running.store(false, Ordering::Release);
        http_response("text/plain", "stopping")
    } else {
        "HTTP/1.1 404 Not Found\r\n\r\n".to_string()
    };

    let _ = stream.write_all(response.as_bytes());
}

fn http_response(content_type: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Renders the visualization signals from the record ring as a 3x2 SVG
/// grid, newest `CHART_POINTS` records.
fn render_chart(ring: &LogBuffer) -> Option<String> {
    if ring.is_empty() {
        return None;
    }

    let skip = ring.len().saturating_sub(CHART_POINTS);
    let mut series: Vec<(String, Vec<f64>)> = VISUALIZATION_SIGNALS
        .iter()
        .map(|name| (name.to_string(), Vec::new()))
        .collect();

    for rec in ring.iter().skip(skip) {
        for (name, points) in series.iter_mut() {
            let value = if name.as_str() == SIG_SPEED {
                rec.speed()
            } else {
                rec.get_num(name).unwrap_or(0.0)
            };
            points.push(value);
        }
    }

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (1280, 860)).into_drawing_area();
        root.fill(&WHITE).ok()?;
        let areas = root.split_evenly((3, 2));
        for (area, (name, points)) in areas.iter().zip(series.iter()) {
            plot_series(area, name, points)?;
        }
        root.present().ok()?;
    }
    Some(svg)
}

fn plot_series(
    area: &DrawingArea<SVGBackend, Shift>,
    title: &str,
    data: &[f64],
) -> Option<()> {
    let (min_y, max_y) = if data.is_empty() {
        (0.0, 1.0)
    } else {
        let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        (min, max.max(min + 1e-6))
    };

    let mut chart = ChartBuilder::on(area)
        .caption(title, ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(20)
        .y_label_area_size(40)
        .build_cartesian_2d(0..data.len().max(1), min_y..max_y)
        .ok()?;
    chart.configure_mesh().disable_mesh().draw().ok()?;
    chart
        .draw_series(LineSeries::new(
            data.iter().enumerate().map(|(i, v)| (i, *v)),
            &BLUE,
        ))
        .ok()?;
    Some(())
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>CAN-FD Monitor</title></head>
<body style="font-family:sans-serif;margin:20px">
<h2>CAN-FD Driving Monitor</h2>
<div><b>Time:</b> <span id="time">-</span>s
 <b>Event:</b> <span id="event">-</span>
 <b>Trigger:</b> <span id="trigger">-</span></div>
<img id="chart" src="/chart.svg" width="1280"/>
<pre id="raw"></pre>
<button onclick="fetch('/stop',{method:'POST'})">Stop logging</button>
<script>
setInterval(async () => {
  try {
    const r = await fetch('/data.json');
    if (!r.ok) return;
    const d = await r.json();
    document.getElementById('time').textContent = d.Time;
    document.getElementById('event').textContent = d.event;
    document.getElementById('trigger').textContent = d.trigger;
    document.getElementById('raw').textContent = JSON.stringify(d, null, 1);
  } catch (e) {}
}, 250);
setInterval(() => {
  document.getElementById('chart').src = '/chart.svg?' + Date.now();
}, 1000);
</script>
</body>
</html>
"#;
