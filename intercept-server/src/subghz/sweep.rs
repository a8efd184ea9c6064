//! Wideband spectrum sweep via hackrf_sweep.
//!
//! Each CSV line becomes one `sweep` event carrying the batch of
//! `(freq, power)` points. The reader restarts the tool on USB drops,
//! with a lower restart budget and less diagnostics than the decode
//! pipeline.

use super::{error_response, SubGhzManager};
use crate::supervisor::{
    ensure_started, shell_line, spawn_pipe, ChildHandle, LineReader, PipeSource, StdinConfig,
};
use intercept_core::event::{Event, EventKind};
use intercept_core::sweep::parse_line;
use log::{error, info};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const RESTART_DELAY: Duration = Duration::from_millis(500);
const MAX_RESTARTS: u32 = 600;

pub struct SweepSession {
    handle: Arc<Mutex<Arc<ChildHandle>>>,
    running: Arc<AtomicBool>,
    readers: Vec<tokio::task::JoinHandle<()>>,
}

impl SweepSession {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.handle.lock().unwrap().is_running()
    }
}

impl SubGhzManager {
    pub async fn start_sweep(
        self: &Arc<Self>,
        freq_start_mhz: f64,
        freq_end_mhz: f64,
        bin_width: u32,
        device_serial: Option<String>,
    ) -> Value {
        let _transition = self.transition.lock().await;
        if self.active_mode() != "idle" {
            return error_response(format!("Already running: {}", self.active_mode()));
        }
        if !self.check_sweep_tool() {
            return error_response("hackrf_sweep not found");
        }
        if let Err(message) = self.require_hackrf_device().await {
            return error_response(message);
        }
        if freq_end_mhz <= freq_start_mhz {
            return error_response("Sweep end frequency must be above the start frequency");
        }
        if !(1.0..=7250.0).contains(&freq_start_mhz) || !(1.0..=7250.0).contains(&freq_end_mhz) {
            return error_response("Sweep range outside HackRF coverage (1-7250 MHz)");
        }
        if !(1_000..=5_000_000).contains(&bin_width) {
            return error_response("Bin width must be between 1 kHz and 5 MHz");
        }

        let mut cmd: Vec<String> = vec![
            "hackrf_sweep".into(),
            "-f".into(),
            format!("{}:{}", freq_start_mhz as u64, freq_end_mhz as u64),
            "-w".into(),
            bin_width.to_string(),
        ];
        if let Some(serial) = &device_serial {
            cmd.extend(["-d".into(), serial.clone()]);
        }
        info!("SubGHz sweep: {}", shell_line(&cmd));

        let mut spawned = match spawn_pipe(&cmd, StdinConfig::Null, true) {
            Ok(spawned) => spawned,
            Err(e) => return error_response(e.to_string()),
        };
        if let Err(e) = ensure_started(&mut spawned, self.constants.process_start_wait).await {
            return error_response(e.to_string());
        }

        let running = Arc::new(AtomicBool::new(true));
        let handle_slot = Arc::new(Mutex::new(Arc::clone(&spawned.handle)));
        let mut readers = Vec::new();

        {
            let manager = Arc::clone(self);
            let running = Arc::clone(&running);
            let handle_slot = Arc::clone(&handle_slot);
            let stdout = spawned
                .stdout
                .take()
                .expect("hackrf_sweep stdout was requested piped");
            let cmd = cmd.clone();
            readers.push(tokio::task::spawn_blocking(move || {
                sweep_loop(manager, cmd, stdout, running, handle_slot)
            }));
        }
        // hackrf_sweep's stderr is noise; drain and drop it.
        if let Some(stderr) = spawned.stderr.take() {
            readers.push(tokio::task::spawn_blocking(move || {
                let mut stderr = stderr;
                let _ = std::io::copy(&mut stderr, &mut std::io::sink());
            }));
        }

        *self.sweep.lock().unwrap() = Some(SweepSession {
            handle: handle_slot,
            running,
            readers,
        });

        self.publish(
            Event::status("started")
                .with("mode", "sweep")
                .with("freq_start_mhz", freq_start_mhz)
                .with("freq_end_mhz", freq_end_mhz),
        );
        json!({
            "status": "started",
            "freq_start_mhz": freq_start_mhz,
            "freq_end_mhz": freq_end_mhz,
        })
    }

    pub async fn stop_sweep(self: &Arc<Self>) -> Value {
        let _transition = self.transition.lock().await;
        let Some(mut session) = self.sweep.lock().unwrap().take() else {
            return json!({"status": "not_running"});
        };
        session.running.store(false, Ordering::SeqCst);

        let handle = Arc::clone(&*session.handle.lock().unwrap());
        let grace = self.constants.process_terminate_timeout;
        let _ = tokio::task::spawn_blocking(move || handle.safe_terminate(grace)).await;

        for reader in session.readers.drain(..) {
            let _ = reader.await;
        }
        self.publish(Event::status("stopped").with("mode", "idle"));
        json!({"status": "stopped"})
    }
}

/// Parse sweep CSV until the child ends; restart within budget.
fn sweep_loop(
    manager: Arc<SubGhzManager>,
    cmd: Vec<String>,
    stdout: std::process::ChildStdout,
    running: Arc<AtomicBool>,
    handle_slot: Arc<Mutex<Arc<ChildHandle>>>,
) {
    let mut reader = LineReader::new(PipeSource(stdout));
    let mut restarts = 0u32;

    loop {
        while let Some(line) = reader.next_line() {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(points) = parse_line(line) {
                manager.publish(Event::new(EventKind::Sweep).with("points", json!(points)));
            }
        }

        if !running.load(Ordering::SeqCst) {
            return;
        }
        if restarts >= MAX_RESTARTS {
            error!("hackrf_sweep: max restarts reached");
            manager.publish(Event::error("HackRF sweep: max restarts reached"));
            break;
        }
        handle_slot
            .lock()
            .unwrap()
            .safe_terminate(Duration::from_millis(100));
        std::thread::sleep(RESTART_DELAY);
        if !running.load(Ordering::SeqCst) {
            return;
        }

        match spawn_pipe(&cmd, StdinConfig::Null, true) {
            Ok(mut spawned) => {
                restarts += 1;
                info!("hackrf_sweep restarted ({restarts})");
                let Some(stdout) = spawned.stdout.take() else {
                    break;
                };
                reader = LineReader::new(PipeSource(stdout));
                if let Some(stderr) = spawned.stderr.take() {
                    std::thread::spawn(move || {
                        let mut stderr = stderr;
                        let _ = std::io::copy(&mut stderr, &mut std::io::sink());
                    });
                }
                *handle_slot.lock().unwrap() = spawned.handle;
            }
            Err(e) => {
                error!("Failed to restart hackrf_sweep: {e}");
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    manager.publish(Event::status("sweep_stopped").with("mode", "idle"));
}
