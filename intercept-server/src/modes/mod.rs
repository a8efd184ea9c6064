//! Mode controllers.
//!
//! Every radio mode follows the same shape: validate inputs under the
//! controller lock, claim the SDR device, build the external command,
//! spawn via the supervisor, start one blocking reader per output
//! stream, and publish `status: started`. Stop (or child death)
//! terminates children producer-first, joins the readers, releases the
//! device through its scoped claim, and publishes `status: stopped`.

pub mod acars;
pub mod ais;
pub mod dmr;
pub mod dsc;
pub mod meshtastic;
pub mod pager;
pub mod rtlamr;
pub mod vdl2;
pub mod weather_sat;

use crate::bus::EventBus;
use crate::devices::{DeviceClaim, DeviceRegistry};
use crate::supervisor::{ChildHandle, LineReader, LineSource, SpawnError};
use async_trait::async_trait;
use intercept_core::event::Event;
use serde_json::{json, Map, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    DeviceBusy(String),
    #[error("{0} not found. Install it and try again.")]
    ToolMissing(String),
    #[error("{0} decoder already running")]
    AlreadyRunning(&'static str),
    #[error("{0}")]
    Spawn(String),
}

impl From<SpawnError> for ModeError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::ToolMissing(tool) => ModeError::ToolMissing(tool),
            other => ModeError::Spawn(other.to_string()),
        }
    }
}

/// Uniform controller surface the web layer dispatches to.
#[async_trait]
pub trait ModeController: Send + Sync {
    fn name(&self) -> &'static str;
    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError>;
    async fn stop(&self) -> Value;
    fn status(&self) -> Value;
    fn tools(&self) -> Value;
}

/// Everything one running session owns. Built under the controller
/// lock; torn down exactly once.
pub struct PipelineSession {
    /// Children in spawn order (producer first).
    pub children: Vec<Arc<ChildHandle>>,
    pub readers: Vec<JoinHandle<()>>,
    pub cancel: CancellationToken,
    pub claim: Option<DeviceClaim>,
    pub started_at: Instant,
}

impl PipelineSession {
    pub fn new(claim: Option<DeviceClaim>) -> Self {
        PipelineSession {
            children: Vec::new(),
            readers: Vec::new(),
            cancel: CancellationToken::new(),
            claim,
            started_at: Instant::now(),
        }
    }

    /// Any child still alive? Sessions without children (serial-port
    /// modes) count as running while the session exists.
    pub fn is_running(&self) -> bool {
        self.children.is_empty() || self.children.iter().any(|child| child.is_running())
    }

    /// Terminate children producer-first, join readers, release the
    /// device claim. Consumes the session so teardown happens once.
    pub async fn teardown(mut self, grace: Duration) {
        self.cancel.cancel();
        for child in &self.children {
            let child = Arc::clone(child);
            // Blocking wait loop; keep it off the async workers.
            let _ = tokio::task::spawn_blocking(move || child.safe_terminate(grace)).await;
        }
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        // Claim released by drop, exactly once.
        drop(self.claim.take());
    }
}

/// Shared per-mode session slot and bus/registry wiring.
pub struct ModeRuntime {
    pub mode: &'static str,
    pub bus: Arc<EventBus>,
    pub registry: Arc<DeviceRegistry>,
    session: Mutex<Option<PipelineSession>>,
}

impl ModeRuntime {
    pub fn new(mode: &'static str, bus: Arc<EventBus>, registry: Arc<DeviceRegistry>) -> Self {
        ModeRuntime {
            mode,
            bus,
            registry,
            session: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.is_running())
            .unwrap_or(false)
    }

    pub fn elapsed_seconds(&self) -> Option<f64> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.started_at.elapsed().as_secs_f64())
    }

    /// Refuse start when already running.
    pub fn ensure_idle(&self) -> Result<(), ModeError> {
        if self.is_running() {
            Err(ModeError::AlreadyRunning(self.mode))
        } else {
            Ok(())
        }
    }

    /// Install a built session and publish `status: started`.
    pub fn commit(&self, session: PipelineSession) {
        *self.session.lock().unwrap() = Some(session);
        self.bus.publish(self.mode, Event::status("started"));
    }

    /// Take the session out for teardown. `None` when not running.
    pub fn take_session(&self) -> Option<PipelineSession> {
        self.session.lock().unwrap().take()
    }

    /// Full stop path: teardown plus `status: stopped`.
    pub async fn stop_session(&self, grace: Duration) -> bool {
        let Some(session) = self.take_session() else {
            return false;
        };
        session.teardown(grace).await;
        self.bus.publish(self.mode, Event::status("stopped"));
        true
    }

    pub fn publish(&self, event: Event) {
        self.bus.publish(self.mode, event);
    }
}

/// Self-stop path used when a decoder stage exits on its own: the EOF
/// side schedules a normal stop so the device is released and
/// `status: stopped` follows the last data event.
pub fn stop_on_exit(
    runtime: &Arc<ModeRuntime>,
    grace: Duration,
) -> impl FnOnce() + Send + 'static {
    let runtime = Arc::clone(runtime);
    let handle = tokio::runtime::Handle::current();
    move || {
        handle.spawn(async move {
            runtime.stop_session(grace).await;
        });
    }
}

/// Spawn a blocking reader that feeds each line to `handle_line` until
/// EOF or cancellation. EOF runs `on_eof` (typically the self-stop /
/// failed-transition path).
pub fn spawn_line_reader<S>(
    cancel: CancellationToken,
    source: S,
    mut handle_line: impl FnMut(String) + Send + 'static,
    on_eof: impl FnOnce() + Send + 'static,
) -> JoinHandle<()>
where
    S: LineSource + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut reader = LineReader::new(source);
        while let Some(line) = reader.next_line() {
            if cancel.is_cancelled() {
                return;
            }
            handle_line(line);
        }
        if !cancel.is_cancelled() {
            on_eof();
        }
    })
}

/// Rate limiter for `raw` diagnostic events so a chatty decoder cannot
/// flood the bus.
pub struct RawLimiter {
    last: Option<Instant>,
    min_interval: Duration,
}

impl RawLimiter {
    pub fn new(min_interval: Duration) -> Self {
        RawLimiter {
            last: None,
            min_interval,
        }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ----------------------------------------------------------------------
// Input validation
// ----------------------------------------------------------------------

/// Read a field that may arrive as a JSON number or a numeric string.
pub fn field_f64(data: &Map<String, Value>, key: &str) -> Option<f64> {
    match data.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn field_str<'a>(data: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub fn validate_device_index(data: &Map<String, Value>) -> Result<u32, ModeError> {
    let raw = field_f64(data, "device").unwrap_or(0.0);
    if raw < 0.0 || raw > 255.0 || raw.fract() != 0.0 {
        return Err(ModeError::Validation(format!(
            "Invalid device index: {raw}"
        )));
    }
    Ok(raw as u32)
}

/// Gain in tenths of dB, 0 = auto. Accepts 0-49.6 for RTL-SDR.
pub fn validate_gain(data: &Map<String, Value>, default: f64) -> Result<f64, ModeError> {
    let gain = field_f64(data, "gain").unwrap_or(default);
    if !(0.0..=49.6).contains(&gain) {
        return Err(ModeError::Validation(format!(
            "Gain {gain} out of range (0-49.6, 0 = auto)"
        )));
    }
    Ok(gain)
}

pub fn validate_ppm(data: &Map<String, Value>) -> Result<i32, ModeError> {
    let ppm = field_f64(data, "ppm").unwrap_or(0.0);
    if !(-100.0..=100.0).contains(&ppm) || ppm.fract() != 0.0 {
        return Err(ModeError::Validation(format!("Invalid PPM correction: {ppm}")));
    }
    Ok(ppm as i32)
}

/// Frequency in MHz within `[min, max]`.
pub fn validate_frequency_mhz(
    data: &Map<String, Value>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> Result<f64, ModeError> {
    let freq = field_f64(data, key).unwrap_or(default);
    if !(min..=max).contains(&freq) {
        return Err(ModeError::Validation(format!(
            "Frequency {freq} MHz out of range ({min}-{max} MHz)"
        )));
    }
    Ok(freq)
}

/// Format a gain value for a command line, trimming a trailing `.0`.
pub fn format_gain(gain: f64) -> String {
    if gain.fract() == 0.0 {
        format!("{}", gain as i64)
    } else {
        format!("{gain}")
    }
}

/// Spot device-disconnect stderr chatter from the rtl/hackrf family.
pub fn is_device_disconnect(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("no such device")
        || lower.contains("device not found")
        || lower.contains("disconnected")
}

/// Common `status` payload shape shared by all controllers.
pub fn base_status(runtime: &ModeRuntime) -> Value {
    let (events_total, queued, last_message_time) = runtime.bus.counters(runtime.mode);
    json!({
        "running": runtime.is_running(),
        "message_count": events_total,
        "queue_size": queued,
        "last_message_time": last_message_time,
        "elapsed_seconds": runtime.elapsed_seconds(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn numeric_fields_accept_both_encodings() {
        let map = data(json!({"device": "2", "gain": 40.2, "ppm": "-3"}));
        assert_eq!(validate_device_index(&map).unwrap(), 2);
        assert_eq!(validate_gain(&map, 0.0).unwrap(), 40.2);
        assert_eq!(validate_ppm(&map).unwrap(), -3);
    }

    #[test]
    fn out_of_range_inputs_are_validation_errors() {
        assert!(validate_device_index(&data(json!({"device": -1}))).is_err());
        assert!(validate_device_index(&data(json!({"device": 1.5}))).is_err());
        assert!(validate_gain(&data(json!({"gain": 50.0})), 0.0).is_err());
        assert!(validate_ppm(&data(json!({"ppm": 500}))).is_err());
        assert!(validate_frequency_mhz(&data(json!({"frequency": 3.0})), "frequency", 0.0, 24.0, 1766.0).is_err());
    }

    #[test]
    fn defaults_apply_when_fields_missing() {
        let empty = data(json!({}));
        assert_eq!(validate_device_index(&empty).unwrap(), 0);
        assert_eq!(validate_gain(&empty, 40.0).unwrap(), 40.0);
        assert_eq!(validate_ppm(&empty).unwrap(), 0);
        assert_eq!(
            validate_frequency_mhz(&empty, "frequency", 929.6125, 24.0, 1766.0).unwrap(),
            929.6125
        );
    }

    #[test]
    fn gain_formatting() {
        assert_eq!(format_gain(40.0), "40");
        assert_eq!(format_gain(49.6), "49.6");
        assert_eq!(format_gain(0.0), "0");
    }

    #[test]
    fn disconnect_detection() {
        assert!(is_device_disconnect("usb_claim_interface error: No such device"));
        assert!(is_device_disconnect("HackRF disconnected"));
        assert!(!is_device_disconnect("Tuned to 929600000 Hz"));
    }

    #[test]
    fn raw_limiter_throttles() {
        let mut limiter = RawLimiter::new(Duration::from_millis(200));
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
