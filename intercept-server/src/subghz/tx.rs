//! SubGHz replay transmit.
//!
//! Every transmit passes the safety gate in order: engine idle, tool
//! installed and device present, capture on disk with a valid sidecar,
//! sidecar frequency inside a configured ISM band, TX gain and max
//! duration clamped. A one-shot watchdog unconditionally terminates the
//! transmission at `max_duration`; completion cancels it. Segment
//! replay extracts an even-aligned byte range into a temporary IQ file
//! that is deleted on every exit path.

use super::{error_response, SubGhzManager};
use crate::supervisor::{ensure_started, shell_line, spawn_pipe, ChildHandle, StdinConfig};
use intercept_core::capture::plan_window;
use intercept_core::event::{Event, EventKind};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct TxSession {
    handle: Arc<ChildHandle>,
    capture_id: String,
    started_at: Instant,
    temp_file: Arc<Mutex<Option<PathBuf>>>,
    watchdog: tokio::task::JoinHandle<()>,
}

impl TxSession {
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn fill_status(&self, status: &mut Value) {
        status["capture_id"] = json!(self.capture_id);
        status["elapsed_seconds"] =
            json!((self.started_at.elapsed().as_secs_f64() * 10.0).round() / 10.0);
    }
}

fn cleanup_temp(temp_file: &Mutex<Option<PathBuf>>) {
    if let Some(path) = temp_file.lock().unwrap().take() {
        if let Err(e) = std::fs::remove_file(&path) {
            debug!("Failed to remove TX temp file {}: {e}", path.display());
        }
    }
}

impl SubGhzManager {
    /// `None` when `frequency_hz` is inside an allowed ISM band, else
    /// the refusal message listing the permitted ranges.
    pub fn validate_tx_frequency(&self, frequency_hz: u64) -> Option<String> {
        if self.constants.tx_frequency_allowed(frequency_hz) {
            return None;
        }
        Some(format!(
            "Frequency {:.3} MHz is outside allowed TX bands: {}",
            frequency_hz as f64 / 1_000_000.0,
            self.constants.tx_bands_description()
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn transmit(
        self: &Arc<Self>,
        capture_id: &str,
        tx_gain: u32,
        max_duration: u64,
        start_seconds: Option<f64>,
        duration_seconds: Option<f64>,
        device_serial: Option<String>,
    ) -> Value {
        let _transition = self.transition.lock().await;
        if self.active_mode() != "idle" {
            return error_response(format!("Already running: {}", self.active_mode()));
        }

        // The capture and its frequency are validated before any
        // hardware probe: an out-of-band replay must be refused the
        // same way whether or not a radio is plugged in.
        let Some(capture) = self.get_capture(capture_id) else {
            return error_response(format!("Capture not found: {capture_id}"));
        };
        if let Some(message) = self.validate_tx_frequency(capture.frequency_hz) {
            return error_response(message);
        }

        if !self.check_hackrf() {
            return error_response("hackrf_transfer not found");
        }
        if let Err(message) = self.require_hackrf_device().await {
            return error_response(message);
        }

        let tx_gain = tx_gain.clamp(
            self.constants.subghz_tx_vga_gain_min,
            self.constants.subghz_tx_vga_gain_max,
        );
        let max_duration = max_duration.clamp(1, self.constants.subghz_tx_max_duration);

        let iq_path = self.captures_dir.join(&capture.filename);
        if !iq_path.exists() {
            return error_response("IQ file missing");
        }

        // Optional segment replay: carve the byte range into a temp
        // file aligned to whole complex samples.
        let temp_file = Arc::new(Mutex::new(None::<PathBuf>));
        let mut tx_path = iq_path.clone();
        let mut segment_info = Value::Null;
        if start_seconds.is_some() || duration_seconds.is_some() {
            let file_size = match std::fs::metadata(&iq_path) {
                Ok(meta) => meta.len(),
                Err(_) => return error_response("Unable to read capture file"),
            };
            let total_duration = capture.estimated_duration_seconds(file_size);
            if total_duration <= 0.0 {
                return error_response("Unable to determine capture duration for segment TX");
            }
            let window = match plan_window(
                capture.sample_rate,
                total_duration,
                start_seconds.unwrap_or(0.0).max(0.0),
                duration_seconds,
            ) {
                Ok(window) => window,
                Err(e) => return error_response(e.to_string()),
            };

            let segment_name = format!(
                ".txseg_{}_{}.iq",
                capture.capture_id,
                &Uuid::new_v4().simple().to_string()[..8]
            );
            let segment_path = self.captures_dir.join(segment_name);
            let written =
                match Self::copy_slice(&iq_path, &segment_path, window.start_byte, window.end_byte)
                {
                    Ok(written) => written,
                    Err(e) => {
                        error!("Failed to build TX segment: {e}");
                        let _ = std::fs::remove_file(&segment_path);
                        return error_response("Failed to create TX segment");
                    }
                };
            if written < 2 {
                let _ = std::fs::remove_file(&segment_path);
                return error_response("Selected TX segment has no IQ data");
            }
            let bytes_per_second = (capture.sample_rate as f64 * 2.0).max(2.0);
            segment_info = json!({
                "start_seconds": start_seconds.unwrap_or(0.0).max(0.0),
                "duration_seconds": (written as f64 / bytes_per_second * 1000.0).round() / 1000.0,
                "bytes": written,
            });
            *temp_file.lock().unwrap() = Some(segment_path.clone());
            tx_path = segment_path;
        }

        let mut cmd: Vec<String> = vec![
            "hackrf_transfer".into(),
            "-t".into(),
            tx_path.to_string_lossy().into_owned(),
            "-f".into(),
            capture.frequency_hz.to_string(),
            "-s".into(),
            capture.sample_rate.to_string(),
            "-x".into(),
            tx_gain.to_string(),
        ];
        if let Some(serial) = &device_serial {
            cmd.extend(["-d".into(), serial.clone()]);
        }
        info!("SubGHz TX: {}", shell_line(&cmd));

        let mut spawned = match spawn_pipe(&cmd, StdinConfig::Null, false) {
            Ok(spawned) => spawned,
            Err(e) => {
                cleanup_temp(&temp_file);
                return error_response(e.to_string());
            }
        };
        if let Err(e) = ensure_started(&mut spawned, self.constants.process_start_wait).await {
            cleanup_temp(&temp_file);
            return error_response(e.to_string());
        }

        // Drain stderr so a chatty transfer cannot fill the pipe.
        if let Some(stderr) = spawned.stderr.take() {
            tokio::task::spawn_blocking(move || {
                let mut stderr = stderr;
                let _ = std::io::copy(&mut stderr, &mut std::io::sink());
            });
        }

        // One-shot watchdog: the transmission ends at max_duration no
        // matter what hackrf_transfer does.
        let watchdog = {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(max_duration)).await;
                warn!("SubGHz TX watchdog triggered - killing transmission");
                let _ = manager.stop_transmit().await;
            })
        };

        // Completion monitor: reap the child, report, clean the slot.
        {
            let manager = Arc::clone(self);
            let handle = Arc::clone(&spawned.handle);
            tokio::task::spawn_blocking(move || {
                while handle.is_running() {
                    std::thread::sleep(Duration::from_millis(100));
                }
                let rc = handle.exit_code();
                let session = {
                    let mut slot = manager.tx.lock().unwrap();
                    match slot.as_ref() {
                        Some(session) if session.handle.pid == handle.pid => slot.take(),
                        _ => None,
                    }
                };
                let Some(session) = session else {
                    // stop_transmit already owned the teardown.
                    return;
                };
                session.watchdog.abort();
                handle.unregister();
                let duration = session.started_at.elapsed().as_secs_f64();
                if let Some(code) = rc {
                    if code != 0 {
                        warn!("hackrf_transfer TX exited unexpectedly (rc={code})");
                        manager.publish(Event::error(format!(
                            "Transmission failed (hackrf_transfer exited with code {code})"
                        )));
                    }
                }
                cleanup_temp(&session.temp_file);
                manager.publish(
                    Event::new(EventKind::TxStatus)
                        .with("status", "tx_complete")
                        .with("duration_seconds", (duration * 10.0).round() / 10.0),
                );
            });
        }

        *self.tx.lock().unwrap() = Some(TxSession {
            handle: spawned.handle,
            capture_id: capture_id.to_string(),
            started_at: Instant::now(),
            temp_file,
            watchdog,
        });

        self.publish(
            Event::new(EventKind::TxStatus)
                .with("status", "transmitting")
                .with("capture_id", capture_id)
                .with("frequency_hz", capture.frequency_hz)
                .with("max_duration", max_duration)
                .with("segment", segment_info.clone()),
        );
        json!({
            "status": "transmitting",
            "capture_id": capture_id,
            "frequency_hz": capture.frequency_hz,
            "max_duration": max_duration,
            "segment": segment_info,
        })
    }

    pub async fn stop_transmit(self: &Arc<Self>) -> Value {
        let Some(session) = self.tx.lock().unwrap().take() else {
            return json!({"status": "not_running"});
        };
        session.watchdog.abort();

        let handle = Arc::clone(&session.handle);
        let grace = self.constants.process_terminate_timeout;
        let _ = tokio::task::spawn_blocking(move || handle.safe_terminate(grace)).await;

        let duration = session.started_at.elapsed().as_secs_f64();
        cleanup_temp(&session.temp_file);
        self.publish(
            Event::new(EventKind::TxStatus)
                .with("status", "tx_stopped")
                .with("duration_seconds", (duration * 10.0).round() / 10.0),
        );
        json!({"status": "stopped", "duration_seconds": (duration * 10.0).round() / 10.0})
    }
}
