//! DMR digital voice monitoring via dsd.
//!
//! Pipeline: `rtl_fm -f <freq>M -M fm -s 48000` piped into
//! `dsd -i - -o /dev/null -fr`, read through a PTY. dsd prints frame
//! sync and talkgroup metadata; audio itself is discarded.

use super::{
    base_status, format_gain, is_device_disconnect, spawn_line_reader, stop_on_exit,
    validate_device_index, validate_frequency_mhz, validate_gain, validate_ppm, ModeController,
    ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::supervisor::{
    self, ensure_started, shell_line, spawn_pipe, spawn_pty, PipeSource, PtySource, StdinConfig,
};
use async_trait::async_trait;
use intercept_core::event::{Event, EventKind};
use log::info;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODE: &str = "dmr";

/// Lines from dsd worth surfacing as decoded frames.
const FRAME_MARKERS: [&str; 6] = ["DMR", "Sync:", "TDMA", "slot", "TG", "Color Code"];

pub struct DmrController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    frame_count: Arc<AtomicU64>,
}

impl DmrController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants) -> Arc<Self> {
        Arc::new(DmrController {
            runtime,
            constants,
            frame_count: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl ModeController for DmrController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        for tool in ["rtl_fm", "dsd"] {
            if !supervisor::tool_available(tool) {
                return Err(ModeError::ToolMissing(tool.to_string()));
            }
        }

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 40.0)?;
        let ppm = validate_ppm(&config)?;
        let frequency = validate_frequency_mhz(&config, "frequency", 462.5625, 24.0, 1766.0)?;

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        let mut rtl_cmd: Vec<String> = vec![
            "rtl_fm".into(),
            "-d".into(),
            device.to_string(),
            "-f".into(),
            format!("{frequency}M"),
            "-M".into(),
            "fm".into(),
            "-s".into(),
            "48000".into(),
        ];
        if gain != 0.0 {
            rtl_cmd.extend(["-g".into(), format_gain(gain)]);
        }
        if ppm != 0 {
            rtl_cmd.extend(["-p".into(), ppm.to_string()]);
        }
        rtl_cmd.push("-".into());

        let dsd_cmd: Vec<String> = ["dsd", "-i", "-", "-o", "/dev/null", "-fr"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let command_line = format!("{} | {}", shell_line(&rtl_cmd), shell_line(&dsd_cmd));
        info!("Starting DMR decode: {}", command_line);

        let mut rtl = spawn_pipe(&rtl_cmd, StdinConfig::Null, true)?;
        ensure_started(&mut rtl, self.constants.process_start_wait).await?;

        let rtl_stdout = rtl
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("rtl_fm stdout missing".to_string()))?;
        let mut dsd = match spawn_pty(&dsd_cmd, StdinConfig::From(Stdio::from(rtl_stdout))) {
            Ok(spawned) => spawned,
            Err(e) => {
                rtl.handle
                    .safe_terminate(self.constants.process_terminate_timeout);
                return Err(e.into());
            }
        };
        if let Err(e) = ensure_started(&mut dsd, self.constants.process_start_wait).await {
            rtl.handle
                .safe_terminate(self.constants.process_terminate_timeout);
            return Err(e.into());
        }

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&rtl.handle));
        session.children.push(Arc::clone(&dsd.handle));

        self.frame_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        let pty = dsd
            .pty_master
            .take()
            .ok_or_else(|| ModeError::Spawn("pty master missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let frame_count = Arc::clone(&self.frame_count);
            let mut limiter = RawLimiter::new(Duration::from_millis(250));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PtySource(pty),
                move |line| {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        return;
                    }
                    if FRAME_MARKERS.iter().any(|marker| line.contains(marker)) {
                        frame_count.fetch_add(1, Ordering::Relaxed);
                        runtime.publish(
                            Event::new(EventKind::Message).with("text", line.clone()),
                        );
                    } else if limiter.allow() {
                        runtime.publish(Event::raw(line));
                    }
                },
                stop_on_exit(&self.runtime, self.constants.process_terminate_timeout),
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
        Ok(json!({"status": "started", "frequency": frequency, "command": command_line}))
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
        status["frame_count"] = json!(self.frame_count.load(Ordering::Relaxed));
        status
    }

    fn tools(&self) -> Value {
        let rtl_fm = supervisor::tool_available("rtl_fm");
        let dsd = supervisor::tool_available("dsd");
        json!({"rtl_fm": rtl_fm, "dsd": dsd, "ready": rtl_fm && dsd})
    }
}
