//! Weather satellite reception via SatDump live pipelines.
//!
//! APT (NOAA) and LRPT (Meteor) passes are demodulated and decoded by
//! `satdump live`, read through a PTY for its progress narration.
//! Decoded products land in a per-pass directory under the data dir.

use super::{
    base_status, field_str, format_gain, is_device_disconnect, spawn_line_reader, stop_on_exit,
    validate_device_index, validate_gain, validate_ppm, ModeController, ModeError, ModeRuntime,
    PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::supervisor::{self, ensure_started, shell_line, spawn_pty, PtySource, StdinConfig};
use async_trait::async_trait;
use chrono::Utc;
use intercept_core::event::{Event, EventKind};
use log::info;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MODE: &str = "weather_sat";

/// Supported satellites: name, downlink (MHz), SatDump pipeline.
pub const SATELLITES: [(&str, f64, &str); 5] = [
    ("NOAA-15", 137.620, "noaa_apt"),
    ("NOAA-18", 137.9125, "noaa_apt"),
    ("NOAA-19", 137.100, "noaa_apt"),
    ("METEOR-M2-3", 137.900, "meteor_m2-x_lrpt"),
    ("METEOR-M2-4", 137.100, "meteor_m2-x_lrpt"),
];

pub struct WeatherSatController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    output_root: PathBuf,
    current: Mutex<Option<(String, PathBuf)>>,
}

impl WeatherSatController {
    pub fn new(
        runtime: Arc<ModeRuntime>,
        constants: Constants,
        output_root: PathBuf,
    ) -> Arc<Self> {
        Arc::new(WeatherSatController {
            runtime,
            constants,
            output_root,
            current: Mutex::new(None),
        })
    }

    pub fn satellites() -> Vec<Value> {
        SATELLITES
            .iter()
            .map(|(name, frequency, pipeline)| {
                json!({"name": name, "frequency": frequency, "pipeline": pipeline})
            })
            .collect()
    }
}

#[async_trait]
impl ModeController for WeatherSatController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        if !supervisor::tool_available("satdump") {
            return Err(ModeError::ToolMissing("satdump".to_string()));
        }

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 40.0)?;
        let ppm = validate_ppm(&config)?;
        let satellite = field_str(&config, "satellite").unwrap_or("NOAA-19");
        let Some((name, frequency, pipeline)) = SATELLITES
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(satellite))
            .copied()
        else {
            return Err(ModeError::Validation(format!(
                "Unknown satellite: {satellite}"
            )));
        };

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        let output_dir = self
            .output_root
            .join(format!("{}_{}", name, Utc::now().format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&output_dir)
            .map_err(|e| ModeError::Spawn(format!("Failed to create pass directory: {e}")))?;

        let mut cmd: Vec<String> = vec![
            "satdump".into(),
            "live".into(),
            pipeline.to_string(),
            output_dir.to_string_lossy().into_owned(),
            "--source".into(),
            "rtlsdr".into(),
            "--samplerate".into(),
            "1.024e6".into(),
            "--frequency".into(),
            format!("{}e6", frequency),
            "--gain".into(),
            format_gain(gain),
        ];
        if device != 0 {
            cmd.extend(["--source_id".into(), device.to_string()]);
        }
        if ppm != 0 {
            cmd.extend(["--ppm_correction".into(), ppm.to_string()]);
        }

        info!("Starting weather-sat pass: {}", shell_line(&cmd));
        let mut spawned = spawn_pty(&cmd, StdinConfig::Null)?;
        ensure_started(&mut spawned, self.constants.process_start_wait).await?;

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&spawned.handle));
        self.runtime.bus.clear(MODE);

        let pty = spawned
            .pty_master
            .take()
            .ok_or_else(|| ModeError::Spawn("pty master missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let sat_name = name.to_string();
            let mut limiter = RawLimiter::new(Duration::from_millis(400));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PtySource(pty),
                move |line| {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        return;
                    }
                    if is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("satdump: {line}")));
                        return;
                    }
                    let lower = line.to_ascii_lowercase();
                    if lower.contains("progress") || lower.contains('%') {
                        runtime.publish(
                            Event::new(EventKind::SatPass)
                                .with("satellite", sat_name.clone())
                                .with("text", line),
                        );
                    } else if lower.contains("saving") || lower.contains("product") {
                        runtime.publish(Event::info(format!("[satdump] {line}")));
                    } else if limiter.allow() {
                        runtime.publish(Event::raw(line));
                    }
                },
                stop_on_exit(&self.runtime, self.constants.process_terminate_timeout),
            ));
        }

        *self.current.lock().unwrap() = Some((name.to_string(), output_dir.clone()));
        self.runtime.commit(session);
        Ok(json!({
            "status": "started",
            "satellite": name,
            "frequency": frequency,
            "pipeline": pipeline,
            "output_dir": output_dir.to_string_lossy(),
        }))
    }

    async fn stop(&self) -> Value {
        let stopped = self
            .runtime
            .stop_session(self.constants.process_terminate_timeout)
            .await;
        let finished = self.current.lock().unwrap().take();
        if stopped {
            let products = finished
                .map(|(_, dir)| list_products(&dir))
                .unwrap_or_default();
            json!({"status": "stopped", "products": products})
        } else {
            json!({"status": "not_running"})
        }
    }

    fn status(&self) -> Value {
        let mut status = base_status(&self.runtime);
        if let Some((satellite, dir)) = self.current.lock().unwrap().as_ref() {
            status["satellite"] = json!(satellite);
            status["output_dir"] = json!(dir.to_string_lossy());
        }
        status
    }

    fn tools(&self) -> Value {
        let satdump = supervisor::tool_available("satdump");
        json!({"satdump": satdump, "ready": satdump})
    }
}

/// Image/product files SatDump left in a pass directory.
fn list_products(dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut products: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let ext = path.extension()?.to_str()?.to_lowercase();
            matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "tif")
                .then(|| entry.file_name().to_string_lossy().into_owned())
        })
        .collect();
    products.sort();
    products
}
