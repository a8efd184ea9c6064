//! Utility meter reception via rtlamr.
//!
//! rtlamr does not open the SDR itself: an `rtl_tcp` server stage owns
//! the hardware and rtlamr connects to it. Both are children of this
//! controller; rtl_tcp is the producer and is terminated first.

use super::{
    base_status, field_str, format_gain, is_device_disconnect, spawn_line_reader, stop_on_exit,
    validate_device_index, validate_frequency_mhz, validate_gain, validate_ppm, ModeController,
    ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::supervisor::{self, ensure_started, shell_line, spawn_pipe, PipeSource, StdinConfig};
use async_trait::async_trait;
use intercept_core::event::{Event, EventKind};
use intercept_core::rtlamr::MSG_TYPES;
use log::info;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MODE: &str = "rtlamr";
const RTL_TCP_PORT: u16 = 1234;

pub struct RtlamrController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    message_count: Arc<AtomicU64>,
}

impl RtlamrController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants) -> Arc<Self> {
        Arc::new(RtlamrController {
            runtime,
            constants,
            message_count: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl ModeController for RtlamrController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        for tool in ["rtl_tcp", "rtlamr"] {
            if !supervisor::tool_available(tool) {
                return Err(ModeError::ToolMissing(tool.to_string()));
            }
        }

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 0.0)?;
        let ppm = validate_ppm(&config)?;
        let frequency = validate_frequency_mhz(&config, "frequency", 912.0, 24.0, 1766.0)?;

        let msgtype = field_str(&config, "msgtype").unwrap_or("scm").to_lowercase();
        if !MSG_TYPES.contains(&msgtype.as_str()) {
            return Err(ModeError::Validation(format!(
                "Invalid msgtype: {msgtype}"
            )));
        }
        let filter_id = field_str(&config, "filterid").map(String::from);
        let filter_type = field_str(&config, "filtertype").map(String::from);
        let unique = config
            .get("unique")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        let mut rtl_tcp_cmd: Vec<String> = vec!["rtl_tcp".into(), "-a".into(), "127.0.0.1".into()];
        if device != 0 {
            rtl_tcp_cmd.extend(["-d".into(), device.to_string()]);
        }
        if gain != 0.0 {
            rtl_tcp_cmd.extend(["-g".into(), format_gain(gain)]);
        }
        if ppm != 0 {
            rtl_tcp_cmd.extend(["-p".into(), ppm.to_string()]);
        }

        let mut cmd: Vec<String> = vec![
            "rtlamr".into(),
            format!("-server=127.0.0.1:{RTL_TCP_PORT}"),
            format!("-msgtype={msgtype}"),
            "-format=json".into(),
            format!("-centerfreq={}", (frequency * 1e6) as u64),
        ];
        if let Some(filter_id) = &filter_id {
            cmd.push(format!("-filterid={filter_id}"));
        }
        if let Some(filter_type) = &filter_type {
            cmd.push(format!("-filtertype={filter_type}"));
        }
        if unique {
            cmd.push("-unique=true".into());
        }

        info!(
            "Starting rtlamr: {} & {}",
            shell_line(&rtl_tcp_cmd),
            shell_line(&cmd)
        );

        let mut rtl_tcp = spawn_pipe(&rtl_tcp_cmd, StdinConfig::Null, false)?;
        ensure_started(&mut rtl_tcp, self.constants.process_start_wait).await?;
        // Let the server bind before rtlamr dials in.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut rtlamr = match spawn_pipe(&cmd, StdinConfig::Null, true) {
            Ok(spawned) => spawned,
            Err(e) => {
                rtl_tcp
                    .handle
                    .safe_terminate(self.constants.process_terminate_timeout);
                return Err(e.into());
            }
        };
        if let Err(e) = ensure_started(&mut rtlamr, self.constants.process_start_wait).await {
            rtl_tcp
                .handle
                .safe_terminate(self.constants.process_terminate_timeout);
            return Err(e.into());
        }

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&rtl_tcp.handle));
        session.children.push(Arc::clone(&rtlamr.handle));

        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        let stdout = rtlamr
            .stdout
            .take()
            .ok_or_else(|| ModeError::Spawn("rtlamr stdout missing".to_string()))?;
        {
            let runtime = Arc::clone(&self.runtime);
            let message_count = Arc::clone(&self.message_count);
            let mut limiter = RawLimiter::new(Duration::from_millis(200));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stdout),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    match serde_json::from_str::<Map<String, Value>>(&line) {
                        Ok(mut data) => {
                            intercept_core::rtlamr::normalize(&mut data);
                            message_count.fetch_add(1, Ordering::Relaxed);
                            runtime.publish(Event::passthrough(EventKind::Meter, data));
                        }
                        Err(_) => {
                            if limiter.allow() {
                                runtime.publish(Event::raw(line));
                            }
                        }
                    }
                },
                stop_on_exit(&self.runtime, self.constants.process_terminate_timeout),
            ));
        }

        if let Some(stderr) = rtl_tcp.stderr.take() {
            let runtime = Arc::clone(&self.runtime);
            let mut limiter = RawLimiter::new(Duration::from_millis(500));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("rtl_tcp: {line}")));
                    } else if !line.is_empty() && limiter.allow() {
                        runtime.publish(Event::raw(format!("[rtl_tcp] {line}")));
                    }
                },
                || {},
            ));
        }

        self.runtime.commit(session);
        Ok(json!({
            "status": "started",
            "msgtype": msgtype,
            "frequency": frequency,
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
        let rtl_tcp = supervisor::tool_available("rtl_tcp");
        let rtlamr = supervisor::tool_available("rtlamr");
        json!({"rtl_tcp": rtl_tcp, "rtlamr": rtlamr, "ready": rtl_tcp && rtlamr})
    }
}
