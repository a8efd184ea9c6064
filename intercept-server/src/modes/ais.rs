//! AIS vessel tracking via AIS-catcher.
//!
//! AIS-catcher is not a pipe decoder: it serves decoded JSON on a local
//! TCP port. The controller spawns it detached, then runs a client task
//! that connects with a retrying backoff, aggregates messages per MMSI,
//! and batches vessel updates so the UI is not flooded.

use super::{
    base_status, spawn_line_reader, validate_device_index, validate_gain, validate_ppm,
    ModeController, ModeError, ModeRuntime, PipelineSession, RawLimiter,
};
use crate::config::Constants;
use crate::supervisor::{self, ensure_started, shell_line, spawn_tcp_daemon, PipeSource};
use async_trait::async_trait;
use intercept_core::ais::merge_message;
use intercept_core::event::{Event, EventKind};
use log::{debug, info, warn};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

pub const MODE: &str = "ais";

/// AIS-catcher binary names seen across platforms.
const AIS_CATCHER_NAMES: [&str; 2] = ["AIS-catcher", "aiscatcher"];

pub struct AisController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    vessels: Arc<Mutex<HashMap<String, Map<String, Value>>>>,
    connected: Arc<AtomicBool>,
    message_count: Arc<AtomicU64>,
}

impl AisController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants) -> Arc<Self> {
        Arc::new(AisController {
            runtime,
            constants,
            vessels: Arc::new(Mutex::new(HashMap::new())),
            connected: Arc::new(AtomicBool::new(false)),
            message_count: Arc::new(AtomicU64::new(0)),
        })
    }

    fn find_binary() -> Option<&'static str> {
        AIS_CATCHER_NAMES
            .into_iter()
            .find(|name| supervisor::tool_available(name))
    }

    /// Current vessel table, most recently seen first is left to the
    /// caller; the map itself is unordered.
    pub fn vessels(&self) -> Vec<Value> {
        self.vessels
            .lock()
            .unwrap()
            .values()
            .cloned()
            .map(Value::Object)
            .collect()
    }

    /// TCP client loop: connect, read JSON lines, merge vessels, batch
    /// per-vessel updates onto the bus.
    async fn stream_loop(
        runtime: Arc<ModeRuntime>,
        constants: Constants,
        vessels: Arc<Mutex<HashMap<String, Map<String, Value>>>>,
        connected: Arc<AtomicBool>,
        message_count: Arc<AtomicU64>,
        port: u16,
        cancel: CancellationToken,
    ) {
        let mut logged_error = false;
        while !cancel.is_cancelled() {
            let stream = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tokio::net::TcpStream::connect(("127.0.0.1", port)) => result,
            };
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    if !logged_error {
                        warn!("AIS connection error: {e}, reconnecting...");
                        logged_error = true;
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(constants.ais_reconnect_delay) => {}
                    }
                    continue;
                }
            };
            connected.store(true, Ordering::SeqCst);
            logged_error = false;
            info!("Connected to AIS-catcher TCP server on port {port}");

            let mut lines = tokio::io::BufReader::new(stream).lines();
            let mut pending: HashSet<String> = HashSet::new();
            let mut ticker = tokio::time::interval(constants.ais_update_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let updates: Vec<Map<String, Value>> = {
                            let table = vessels.lock().unwrap();
                            pending
                                .drain()
                                .filter_map(|mmsi| table.get(&mmsi).cloned())
                                .collect()
                        };
                        for vessel in updates {
                            runtime.publish(Event::passthrough(EventKind::Vessel, vessel));
                        }
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let line = line.trim();
                                if line.is_empty() {
                                    continue;
                                }
                                let Ok(msg) = serde_json::from_str::<Map<String, Value>>(line)
                                else {
                                    debug!("AIS invalid JSON: {}", &line[..line.len().min(100)]);
                                    continue;
                                };
                                let mut table = vessels.lock().unwrap();
                                let existing = msg
                                    .get("mmsi")
                                    .map(|m| match m {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    })
                                    .and_then(|mmsi| table.get(&mmsi).cloned());
                                if let Some(vessel) = merge_message(existing.as_ref(), &msg) {
                                    let mmsi = vessel
                                        .get("mmsi")
                                        .and_then(Value::as_str)
                                        .unwrap_or_default()
                                        .to_string();
                                    table.insert(mmsi.clone(), vessel);
                                    pending.insert(mmsi);
                                    message_count.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Ok(None) => {
                                warn!("AIS connection closed (no data)");
                                break;
                            }
                            Err(e) => {
                                debug!("AIS read error: {e}");
                                break;
                            }
                        }
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        }
        connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModeController for AisController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;
        let binary = Self::find_binary()
            .ok_or_else(|| ModeError::ToolMissing("AIS-catcher".to_string()))?;

        let device = validate_device_index(&config)?;
        let gain = validate_gain(&config, 33.0)?;
        let ppm = validate_ppm(&config)?;
        let port = self.constants.ais_tcp_port;

        let claim = self
            .runtime
            .registry
            .claim(device, MODE)
            .map_err(ModeError::DeviceBusy)?;

        let mut cmd: Vec<String> = vec![
            binary.to_string(),
            "-d:".to_string() + &device.to_string(),
            "-gr".into(),
            "tuner".into(),
            super::format_gain(gain),
        ];
        if ppm != 0 {
            cmd.extend(["-p".into(), ppm.to_string()]);
        }
        // JSON over a local TCP listener; we attach as a client.
        cmd.extend(["-S".into(), port.to_string(), "JSON".into(), "on".into()]);

        info!("Starting AIS decode: {}", shell_line(&cmd));
        let mut spawned = spawn_tcp_daemon(&cmd)?;
        ensure_started(&mut spawned, self.constants.process_start_wait).await?;
        // Give the listener a moment to bind before the first connect.
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut session = PipelineSession::new(Some(claim));
        session.children.push(Arc::clone(&spawned.handle));

        self.vessels.lock().unwrap().clear();
        self.message_count.store(0, Ordering::SeqCst);
        self.runtime.bus.clear(MODE);

        session.readers.push(tokio::spawn(Self::stream_loop(
            Arc::clone(&self.runtime),
            self.constants.clone(),
            Arc::clone(&self.vessels),
            Arc::clone(&self.connected),
            Arc::clone(&self.message_count),
            port,
            session.cancel.clone(),
        )));

        if let Some(stderr) = spawned.stderr.take() {
            let runtime = Arc::clone(&self.runtime);
            let mut limiter = RawLimiter::new(Duration::from_millis(500));
            session.readers.push(spawn_line_reader(
                session.cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if super::is_device_disconnect(&line) {
                        runtime.publish(Event::error(format!("AIS-catcher: {line}")));
                    } else if !line.is_empty() && limiter.allow() {
                        runtime.publish(Event::raw(format!("[ais-catcher] {line}")));
                    }
                },
                || {},
            ));
        }

        self.runtime.commit(session);
        Ok(json!({"status": "started", "device": device, "tcp_port": port}))
    }

    async fn stop(&self) -> Value {
        if self
            .runtime
            .stop_session(self.constants.ais_terminate_timeout)
            .await
        {
            json!({"status": "stopped"})
        } else {
            json!({"status": "not_running"})
        }
    }

    fn status(&self) -> Value {
        let mut status = base_status(&self.runtime);
        status["connected"] = json!(self.connected.load(Ordering::SeqCst));
        status["vessel_count"] = json!(self.vessels.lock().unwrap().len());
        status["messages_received"] = json!(self.message_count.load(Ordering::Relaxed));
        status
    }

    fn tools(&self) -> Value {
        let available = Self::find_binary().is_some();
        json!({"ais_catcher": available, "ready": available})
    }
}
