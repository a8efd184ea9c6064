//! POCSAG/FLEX pager decoding.
//!
//! Pipeline: `rtl_fm -f <freq>M -M fm -s 22050 -` piped into
//! `multimon-ng -t raw -a <protocols> -f alpha -`. multimon-ng is read
//! through a PTY so its C stdio stops buffering.

use super::{
    base_status, field_f64, format_gain, is_device_disconnect, spawn_line_reader, stop_on_exit,
    validate_device_index, validate_frequency_mhz, validate_gain, validate_ppm, ModeController,
    ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::supervisor::{
    self, ensure_started, shell_line, spawn_pipe, spawn_pty, PipeSource, PtySource, StdinConfig,
};
use async_trait::async_trait;
use intercept_core::event::Event;
use intercept_core::pager::{self, PAGER_PROTOCOLS};
use log::info;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODE: &str = "pager";
const DEFAULT_FREQUENCY_MHZ: f64 = 929.6125;

pub struct PagerController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    message_count: Arc<AtomicU64>,
}

impl PagerController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants) -> Arc<Self> {
        Arc::new(PagerController {
            runtime,
            constants,
            message_count: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl ModeController for PagerController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        for tool in ["rtl_fm", "multimon-ng"] {
            if !supervisor::tool_available(tool) {
                return Err(ModeError::ToolMissing(tool.to_string()));
            }
        }

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 0.0)?;
        let ppm = validate_ppm(&config)?;
        let squelch = field_f64(&config, "squelch").unwrap_or(0.0);
        let frequency =
            validate_frequency_mhz(&config, "frequency", DEFAULT_FREQUENCY_MHZ, 24.0, 1766.0)?;

        let protocols: Vec<String> = match config.get("protocols").and_then(Value::as_array) {
            Some(list) => list
                .iter()
                .filter_map(Value::as_str)
                .filter(|p| PAGER_PROTOCOLS.contains(p))
                .map(String::from)
                .collect(),
            None => PAGER_PROTOCOLS.iter().map(|p| p.to_string()).collect(),
        };
        if protocols.is_empty() {
            return Err(ModeError::Validation(
                "No valid pager protocols selected".to_string(),
            ));
        }

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
            "22050".into(),
        ];
        if gain != 0.0 {
            rtl_cmd.push("-g".into());
            rtl_cmd.push(format_gain(gain));
        }
        if ppm != 0 {
            rtl_cmd.push("-p".into());
            rtl_cmd.push(ppm.to_string());
        }
        if squelch != 0.0 {
            rtl_cmd.push("-l".into());
            rtl_cmd.push(format!("{}", squelch as i64));
        }
        rtl_cmd.push("-".into());

        let mut multimon_cmd: Vec<String> = vec!["multimon-ng".into(), "-t".into(), "raw".into()];
        for protocol in &protocols {
            multimon_cmd.push("-a".into());
            multimon_cmd.push(protocol.clone());
        }
        multimon_cmd.extend(["-f".into(), "alpha".into(), "-".into()]);

        let command_line = format!("{} | {}", shell_line(&rtl_cmd), shell_line(&multimon_cmd));
        info!("Starting pager decode: {}", command_line);

        // Producer first; its stdout feeds the decoder stage. A failed
        // start drops `claim` and releases the device.
        let mut rtl = spawn_pipe(&rtl_cmd, StdinConfig::Null, true)?;
        ensure_started(&mut rtl, self.constants.process_start_wait).await?;

        let rtl_stdout = rtl
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("rtl_fm stdout missing".to_string()))?;
        let mut multimon =
            match spawn_pty(&multimon_cmd, StdinConfig::From(Stdio::from(rtl_stdout))) {
                Ok(spawned) => spawned,
                Err(e) => {
                    rtl.handle
                        .safe_terminate(self.constants.process_terminate_timeout);
                    return Err(e.into());
                }
            };
        if let Err(e) = ensure_started(&mut multimon, self.constants.process_start_wait).await {
            rtl.handle
                .safe_terminate(self.constants.process_terminate_timeout);
            return Err(e.into());
        }

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&rtl.handle));
        session.children.push(Arc::clone(&multimon.handle));

        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        // Decoder output arrives on the PTY master.
        let pty = multimon
            .pty_master
            .take()
            .ok_or_else(|| ModeError::Spawn("pty master missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let message_count = Arc::clone(&self.message_count);
            let mut limiter = RawLimiter::new(Duration::from_millis(200));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PtySource(pty),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    match pager::parse_line(&line) {
                        Some(message) => {
                            message_count.fetch_add(1, Ordering::Relaxed);
                            runtime.publish(message.into());
                        }
                        None => {
                            if limiter.allow() {
                                runtime.publish(Event::raw(line));
                            }
                        }
                    }
                },
                stop_on_exit(&self.runtime, self.constants.process_terminate_timeout),
            ));
        }

        // rtl_fm narrates on stderr; surface errors and disconnects.
        if let Some(stderr) = rtl.stderr.take() {
            let runtime = Arc::clone(&self.runtime);
            let mut limiter = RawLimiter::new(Duration::from_millis(500));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    if is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("rtl_fm: {line}")));
                    } else if limiter.allow() {
                        runtime.publish(Event::raw(format!("[rtl_fm] {line}")));
                    }
                },
                || {},
            ));
        }

        self.runtime.commit(session);
        self.runtime
            .publish(Event::info(format!("Command: {command_line}")));

        Ok(json!({"status": "started", "command": command_line, "protocols": protocols}))
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
        let rtl_fm = supervisor::tool_available("rtl_fm");
        let multimon = supervisor::tool_available("multimon-ng");
        json!({
            "rtl_fm": rtl_fm,
            "multimon": multimon,
            "ready": rtl_fm && multimon,
        })
    }
}

/// Emergency cleanup of orphaned pipeline stages.
pub fn kill_all() -> Vec<String> {
    let mut killed = supervisor::kill_all_matching("rtl_fm");
    killed.extend(supervisor::kill_all_matching("multimon-ng"));
    killed
}
