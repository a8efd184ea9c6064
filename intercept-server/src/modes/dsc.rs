//! Marine DSC (VHF channel 70) decoding.
//!
//! Pipeline: `rtl_fm -f 156.525M -s 48000 -M fm -l 0 -E dc` piped into
//! the DSC decoder, which is read through a PTY. DISTRESS and URGENCY
//! calls are persisted to the store in addition to streaming.

use super::{
    base_status, format_gain, is_device_disconnect, spawn_line_reader, stop_on_exit,
    validate_device_index, validate_gain, validate_ppm, ModeController, ModeError, ModeRuntime,
    PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::store::JsonStore;
use crate::supervisor::{
    self, ensure_started, shell_line, spawn_pipe, spawn_pty, PipeSource, PtySource, StdinConfig,
};
use async_trait::async_trait;
use chrono::Utc;
use intercept_core::dsc;
use intercept_core::event::{Event, EventKind};
use log::info;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODE: &str = "dsc";

/// Decoder binary names, in preference order.
const DECODER_NAMES: [&str; 2] = ["dsc-decode", "dscdecoder"];
const ALERTS: &str = "dsc_alerts";
const MAX_STORED_ALERTS: usize = 1000;

pub struct DscController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    store: Arc<JsonStore>,
    message_count: Arc<AtomicU64>,
}

impl DscController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants, store: Arc<JsonStore>) -> Arc<Self> {
        Arc::new(DscController {
            runtime,
            constants,
            store,
            message_count: Arc::new(AtomicU64::new(0)),
        })
    }

    fn find_decoder() -> Option<&'static str> {
        DECODER_NAMES
            .into_iter()
            .find(|name| supervisor::tool_available(name))
    }

    /// Stored DISTRESS/URGENCY alerts, newest first.
    pub fn critical_alerts(&self, limit: usize) -> Vec<Value> {
        let mut rows = self.store.list(ALERTS);
        rows.reverse();
        rows.truncate(limit);
        rows
    }

    fn store_critical(store: &JsonStore, msg: &dsc::DscMessage) {
        let row = json!({
            "source_mmsi": msg.source_mmsi,
            "format_code": msg.format_code,
            "category": msg.category,
            "dest_mmsi": msg.dest_mmsi,
            "nature_of_distress": msg.nature_of_distress,
            "latitude": msg.latitude,
            "longitude": msg.longitude,
            "raw_message": msg.raw_message,
            "created_at": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        });
        store.insert(ALERTS, row.as_object().cloned().unwrap_or_default());
        store.truncate(ALERTS, MAX_STORED_ALERTS);
        info!("Stored {} alert from {}", msg.category, msg.source_mmsi);
    }
}

#[async_trait]
impl ModeController for DscController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        if !supervisor::tool_available("rtl_fm") {
            return Err(ModeError::ToolMissing("rtl_fm".to_string()));
        }
        let decoder =
            Self::find_decoder().ok_or_else(|| ModeError::ToolMissing("dsc-decode".to_string()))?;

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 40.0)?;
        let ppm = validate_ppm(&config)?;

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        // Narrow FM on channel 70 with DC blocking; no squelch so weak
        // distress calls are never gated out.
        let mut rtl_cmd: Vec<String> = vec![
            "rtl_fm".into(),
            "-f".into(),
            format!("{}M", self.constants.dsc_vhf_frequency_mhz),
            "-s".into(),
            self.constants.dsc_sample_rate.to_string(),
            "-d".into(),
            device.to_string(),
            "-g".into(),
            format_gain(gain),
            "-M".into(),
            "fm".into(),
            "-l".into(),
            "0".into(),
            "-E".into(),
            "dc".into(),
        ];
        if ppm != 0 {
            rtl_cmd.extend(["-p".into(), ppm.to_string()]);
        }
        rtl_cmd.push("-".into());
        let decoder_cmd: Vec<String> = vec![decoder.to_string()];

        let command_line = format!("{} | {}", shell_line(&rtl_cmd), shell_line(&decoder_cmd));
        info!("Starting DSC decode: {}", command_line);

        let mut rtl = spawn_pipe(&rtl_cmd, StdinConfig::Null, true)?;
        ensure_started(&mut rtl, self.constants.process_start_wait).await?;

        let rtl_stdout = rtl
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("rtl_fm stdout missing".to_string()))?;
        let mut decoder_spawned =
            match spawn_pty(&decoder_cmd, StdinConfig::From(Stdio::from(rtl_stdout))) {
                Ok(spawned) => spawned,
                Err(e) => {
                    rtl.handle
                        .safe_terminate(self.constants.dsc_terminate_timeout);
                    return Err(e.into());
                }
            };
        if let Err(e) = ensure_started(&mut decoder_spawned, self.constants.process_start_wait).await
        {
            rtl.handle
                .safe_terminate(self.constants.dsc_terminate_timeout);
            return Err(e.into());
        }

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&rtl.handle));
        session.children.push(Arc::clone(&decoder_spawned.handle));

        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        let pty = decoder_spawned
            .pty_master
            .take()
            .ok_or_else(|| ModeError::Spawn("pty master missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let store = Arc::clone(&self.store);
            let message_count = Arc::clone(&self.message_count);
            let mut limiter = RawLimiter::new(Duration::from_millis(200));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PtySource(pty),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    match dsc::parse_line(&line) {
                        Some(msg) => {
                            message_count.fetch_add(1, Ordering::Relaxed);
                            if msg.is_critical {
                                Self::store_critical(&store, &msg);
                            }
                            let payload = serde_json::to_value(&msg)
                                .ok()
                                .and_then(|v| v.as_object().cloned())
                                .unwrap_or_default();
                            runtime.publish(Event::passthrough(EventKind::Message, payload));
                        }
                        None => {
                            if limiter.allow() {
                                runtime.publish(Event::raw(line));
                            }
                        }
                    }
                },
                stop_on_exit(&self.runtime, self.constants.dsc_terminate_timeout),
            ));
        }

        if let Some(stderr) = rtl.stderr.take() {
            let runtime = Arc::clone(&self.runtime);
            let mut limiter = RawLimiter::new(Duration::from_millis(500));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("rtl_fm: {line}")));
                    } else if !line.is_empty() && limiter.allow() {
                        runtime.publish(Event::raw(format!("[rtl_fm] {line}")));
                    }
                },
                || {},
            ));
        }

        self.runtime.commit(session);
        Ok(json!({
            "status": "started",
            "frequency": self.constants.dsc_vhf_frequency_mhz,
            "command": command_line,
        }))
    }

    async fn stop(&self) -> Value {
        if self
            .runtime
            .stop_session(self.constants.dsc_terminate_timeout)
            .await
        {
            json!({"status": "stopped"})
        } else {
            json!({"status": "not_running"})
        }
    }

    fn status(&self) -> Value {
        let mut status = base_status(&self.runtime);
        status["frequency"] = json!(self.constants.dsc_vhf_frequency_mhz);
        status["decoded_count"] = json!(self.message_count.load(Ordering::Relaxed));
        status
    }

    fn tools(&self) -> Value {
        let rtl_fm = supervisor::tool_available("rtl_fm");
        let decoder = Self::find_decoder().is_some();
        json!({"rtl_fm": rtl_fm, "dsc_decoder": decoder, "ready": rtl_fm && decoder})
    }
}
