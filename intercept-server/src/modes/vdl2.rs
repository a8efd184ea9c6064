//! VDL Mode 2 decoding via dumpvdl2.

use super::{
    base_status, spawn_line_reader, stop_on_exit, validate_device_index, validate_gain,
    validate_ppm, ModeController, ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::correlator::FlightCorrelator;
use crate::supervisor::{self, ensure_started, shell_line, spawn_pipe, PipeSource, StdinConfig};
use async_trait::async_trait;
use intercept_core::event::{Event, EventKind};
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODE: &str = "vdl2";

/// Common VDL2 channels (Hz). 136.975 is the worldwide CSC.
pub const DEFAULT_FREQUENCIES: [&str; 4] = ["136975000", "136650000", "136800000", "136925000"];

pub struct Vdl2Controller {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    correlator: Arc<FlightCorrelator>,
    message_count: Arc<AtomicU64>,
}

impl Vdl2Controller {
    pub fn new(
        runtime: Arc<ModeRuntime>,
        constants: Constants,
        correlator: Arc<FlightCorrelator>,
    ) -> Arc<Self> {
        Arc::new(Vdl2Controller {
            runtime,
            constants,
            correlator,
            message_count: Arc::new(AtomicU64::new(0)),
        })
    }
}

fn parse_frequencies(config: &Map<String, Value>) -> Result<Vec<String>, ModeError> {
    let raw: Vec<String> = match config.get("frequencies") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|f| f.trim().to_string()).collect(),
        _ => DEFAULT_FREQUENCIES.iter().map(|f| f.to_string()).collect(),
    };
    let mut frequencies = Vec::new();
    for freq in raw {
        let hz: f64 = freq
            .parse()
            .map_err(|_| ModeError::Validation(format!("Invalid frequency: {freq}")))?;
        // Accept MHz shorthand and normalise to Hz.
        let hz = if hz < 1000.0 { hz * 1_000_000.0 } else { hz };
        if !(118_000_000.0..=137_000_000.0).contains(&hz) {
            return Err(ModeError::Validation(format!(
                "Frequency {freq} outside the VHF airband"
            )));
        }
        frequencies.push(format!("{}", hz as u64));
    }
    if frequencies.is_empty() {
        return Err(ModeError::Validation("No frequencies given".to_string()));
    }
    Ok(frequencies)
}

#[async_trait]
impl ModeController for Vdl2Controller {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        if !supervisor::tool_available("dumpvdl2") {
            return Err(ModeError::ToolMissing("dumpvdl2".to_string()));
        }

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 40.0)?;
        let ppm = validate_ppm(&config)?;
        let frequencies = parse_frequencies(&config)?;
        let soapy_device = super::field_str(&config, "soapy_device").map(String::from);

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        let mut cmd: Vec<String> =
            vec!["dumpvdl2".into(), "--output".into(), "decoded:json".into()];
        match &soapy_device {
            Some(device_string) => {
                cmd.push("--soapysdr".into());
                cmd.push(device_string.clone());
            }
            None => {
                cmd.push("--rtlsdr".into());
                cmd.push(device.to_string());
            }
        }
        if gain != 0.0 {
            cmd.push("--gain".into());
            cmd.push(super::format_gain(gain));
        }
        if ppm != 0 {
            cmd.push("--correction".into());
            cmd.push(ppm.to_string());
        }
        cmd.extend(frequencies.iter().cloned());

        info!("Starting VDL2 decode: {}", shell_line(&cmd));
        let mut spawned = spawn_pipe(&cmd, StdinConfig::Null, true)?;
        ensure_started(&mut spawned, self.constants.process_start_wait).await?;

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&spawned.handle));

        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        let stdout = spawned
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("dumpvdl2 stdout missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let correlator = Arc::clone(&self.correlator);
            let message_count = Arc::clone(&self.message_count);
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stdout),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    match serde_json::from_str::<Map<String, Value>>(&line) {
                        Ok(mut data) => {
                            intercept_core::vdl2::normalize(&mut data);
                            message_count.fetch_add(1, Ordering::Relaxed);
                            correlator.add_vdl2_message(&data);
                            runtime.publish(Event::passthrough(EventKind::Vdl2, data));
                        }
                        Err(_) => debug!("dumpvdl2 non-JSON: {}", &line[..line.len().min(100)]),
                    }
                },
                stop_on_exit(&self.runtime, self.constants.process_terminate_timeout),
            ));
        }

        if let Some(stderr) = spawned.stderr.take() {
            let runtime = Arc::clone(&self.runtime);
            let mut limiter = RawLimiter::new(Duration::from_millis(500));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if super::is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("dumpvdl2: {line}")));
                    } else if !line.is_empty() && limiter.allow() {
                        runtime.publish(Event::raw(format!("[dumpvdl2] {line}")));
                    }
                },
                || {},
            ));
        }

        self.runtime.commit(session);
        Ok(json!({
            "status": "started",
            "frequencies": frequencies,
            "device": device,
        }))
    }

    async fn stop(&self) -> Value {
        if self
            .runtime
            .stop_session(self.constants.process_terminate_timeout)
            .await
        {
            json!({"status": "stopped"})
        } else {
            json!({"status": "not_running"})
        }
    }

    fn status(&self) -> Value {
        let mut status = base_status(&self.runtime);
        status["decoded_count"] = json!(self.message_count.load(Ordering::Relaxed));
        status
    }

    fn tools(&self) -> Value {
        let dumpvdl2 = supervisor::tool_available("dumpvdl2");
        json!({"dumpvdl2": dumpvdl2, "ready": dumpvdl2})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn defaults_are_hz() {
        let freqs = parse_frequencies(&cfg(json!({}))).unwrap();
        assert_eq!(freqs[0], "136975000");
    }

    #[test]
    fn mhz_shorthand_normalises() {
        let freqs = parse_frequencies(&cfg(json!({"frequencies": ["136.975"]}))).unwrap();
        assert_eq!(freqs, vec!["136975000"]);
    }

    #[test]
    fn out_of_band_rejected() {
        assert!(parse_frequencies(&cfg(json!({"frequencies": ["433920000"]}))).is_err());
    }
}
