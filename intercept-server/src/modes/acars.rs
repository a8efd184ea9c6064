//! ACARS aircraft messaging via acarsdec.
//!
//! acarsdec has three forks in circulation with different JSON and
//! device flags; the dialect is detected once from the tool's usage
//! output and cached. Decoded messages are enriched (label translation,
//! classification, payload parsing) and fed to the flight correlator.

use super::{
    base_status, spawn_line_reader, stop_on_exit, validate_device_index, validate_gain,
    validate_ppm, ModeController, ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::correlator::FlightCorrelator;
use crate::supervisor::{self, ensure_started, shell_line, spawn_pipe, PipeSource, StdinConfig};
use async_trait::async_trait;
use intercept_core::acars::enrich;
use intercept_core::event::{Event, EventKind};
use intercept_core::sdr::{detect_acarsdec_dialect, AcarsdecDialect};
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODE: &str = "acars";

/// VHF ACARS frequencies (MHz), North America primary set.
pub const DEFAULT_FREQUENCIES: [&str; 3] = ["131.550", "130.025", "129.125"];

pub struct AcarsController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    correlator: Arc<FlightCorrelator>,
    message_count: Arc<AtomicU64>,
    dialect: Mutex<Option<AcarsdecDialect>>,
}

impl AcarsController {
    pub fn new(
        runtime: Arc<ModeRuntime>,
        constants: Constants,
        correlator: Arc<FlightCorrelator>,
    ) -> Arc<Self> {
        Arc::new(AcarsController {
            runtime,
            constants,
            correlator,
            message_count: Arc::new(AtomicU64::new(0)),
            dialect: Mutex::new(None),
        })
    }

    /// Probe the installed acarsdec's dialect once.
    async fn dialect(&self) -> AcarsdecDialect {
        if let Some(dialect) = *self.dialect.lock().unwrap() {
            return dialect;
        }
        let output = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::process::Command::new("acarsdec").output(),
        )
        .await;
        let dialect = match output {
            Ok(Ok(out)) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&out.stderr));
                detect_acarsdec_dialect(&text)
            }
            _ => {
                debug!("Could not probe acarsdec dialect, assuming -j");
                AcarsdecDialect::JFlag
            }
        };
        *self.dialect.lock().unwrap() = Some(dialect);
        dialect
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
        let value: f64 = freq
            .parse()
            .map_err(|_| ModeError::Validation(format!("Invalid frequency: {freq}")))?;
        if !(108.0..=137.0).contains(&value) {
            return Err(ModeError::Validation(format!(
                "Frequency {value} MHz outside the VHF airband (108-137 MHz)"
            )));
        }
        frequencies.push(freq);
    }
    if frequencies.is_empty() {
        return Err(ModeError::Validation("No frequencies given".to_string()));
    }
    Ok(frequencies)
}

#[async_trait]
impl ModeController for AcarsController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        if !supervisor::tool_available("acarsdec") {
            return Err(ModeError::ToolMissing("acarsdec".to_string()));
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

        let dialect = self.dialect().await;
        let mut cmd: Vec<String> = vec!["acarsdec".into()];
        cmd.extend(dialect.json_args());
        // gain/ppm must come before the device selector.
        if gain != 0.0 {
            cmd.push("-g".into());
            cmd.push(super::format_gain(gain));
        }
        if ppm != 0 {
            cmd.push("-p".into());
            cmd.push(ppm.to_string());
        }
        match &soapy_device {
            Some(device_string) => {
                cmd.push(
                    if dialect == AcarsdecDialect::OutputFlag {
                        "--soapysdr"
                    } else {
                        "-d"
                    }
                    .into(),
                );
                cmd.push(device_string.clone());
            }
            None => {
                cmd.push("-r".into());
                cmd.push(device.to_string());
            }
        }
        cmd.extend(frequencies.iter().cloned());

        info!("Starting ACARS decode: {}", shell_line(&cmd));
        let mut spawned = spawn_pipe(&cmd, StdinConfig::Null, true)?;
        ensure_started(&mut spawned, self.constants.process_start_wait).await?;

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&spawned.handle));

        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        let stdout = spawned
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("acarsdec stdout missing".to_string()))?;
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
                            enrich(&mut data);
                            message_count.fetch_add(1, Ordering::Relaxed);
                            correlator.add_acars_message(&data);
                            runtime.publish(Event::passthrough(EventKind::Acars, data));
                        }
                        Err(_) => debug!("acarsdec non-JSON: {}", &line[..line.len().min(100)]),
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
                        runtime.publish(Event::error(format!("acarsdec: {line}")));
                    } else if !line.is_empty() && limiter.allow() {
                        runtime.publish(Event::raw(format!("[acarsdec] {line}")));
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
        let acarsdec = supervisor::tool_available("acarsdec");
        json!({"acarsdec": acarsdec, "ready": acarsdec})
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn default_frequencies_apply() {
        let freqs = parse_frequencies(&cfg(json!({}))).unwrap();
        assert_eq!(freqs, vec!["131.550", "130.025", "129.125"]);
    }

    #[test]
    fn comma_string_and_array_forms() {
        let freqs = parse_frequencies(&cfg(json!({"frequencies": "131.550, 130.025"}))).unwrap();
        assert_eq!(freqs.len(), 2);
        let freqs = parse_frequencies(&cfg(json!({"frequencies": ["131.725"]}))).unwrap();
        assert_eq!(freqs, vec!["131.725"]);
    }

    #[test]
    fn out_of_band_frequency_rejected() {
        assert!(parse_frequencies(&cfg(json!({"frequencies": ["433.92"]}))).is_err());
        assert!(parse_frequencies(&cfg(json!({"frequencies": ["abc"]}))).is_err());
        assert!(parse_frequencies(&cfg(json!({"frequencies": []}))).is_err());
    }
}
