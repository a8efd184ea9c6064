//! SubGHz receive: raw IQ capture with live analytics.
//!
//! `hackrf_transfer -r <file>` owns the USB transfer; a side-channel
//! reader tails the growing file in 256 KB chunks and derives level,
//! waveform, spectrum and burst events without ever back-pressuring the
//! transfer. Burst ends are fingerprinted and fed to the modulation
//! accumulator. The optional smart trigger auto-stops the capture after
//! a quiet post-roll and trims the file to the active window.

use super::{error_response, SubGhzManager};
use crate::supervisor::{ensure_started, shell_line, spawn_pipe, PipeSource, StdinConfig};
use chrono::Utc;
use intercept_core::analytics::{
    self, Burst, BurstDetector, BurstEvent, HintAccumulator, ModulationTuning, ANALYSIS_CHUNK,
};
use intercept_core::capture::{self, Capture};
use intercept_core::event::{Event, EventKind};
use log::{error, info};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const LEVEL_INTERVAL: Duration = Duration::from_millis(50);
const WAVE_INTERVAL: Duration = Duration::from_millis(250);
const SPECTRUM_INTERVAL: Duration = Duration::from_millis(250);
const STATS_INTERVAL: Duration = Duration::from_secs(1);
const HINT_EVAL_INTERVAL: Duration = Duration::from_millis(250);
const HINT_EMIT_INTERVAL: Duration = Duration::from_millis(1500);
const MAX_TRACKED_BURSTS: usize = 512;

/// Smart-trigger configuration.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub pre_s: f64,
    pub post_s: f64,
}

#[derive(Default)]
struct RxLive {
    bursts: Vec<Burst>,
    fingerprint_counts: HashMap<String, u32>,
    modulation_hint: String,
    modulation_confidence: f64,
    protocol_hint: String,
    trigger_first_burst: Option<f64>,
    trigger_last_end: Option<f64>,
    autostop_pending: bool,
}

pub struct RxSession {
    handle: Arc<crate::supervisor::ChildHandle>,
    cancel: CancellationToken,
    readers: Vec<tokio::task::JoinHandle<()>>,
    frequency_hz: u64,
    sample_rate: u32,
    lna_gain: u32,
    vga_gain: u32,
    iq_path: PathBuf,
    started_at: Instant,
    trigger: Option<Trigger>,
    live: Arc<Mutex<RxLive>>,
}

impl RxSession {
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn fill_status(&self, status: &mut Value) {
        status["frequency_hz"] = json!(self.frequency_hz);
        status["sample_rate"] = json!(self.sample_rate);
        status["elapsed_seconds"] = json!(round1(self.started_at.elapsed().as_secs_f64()));
        if let Some(trigger) = &self.trigger {
            status["trigger_enabled"] = json!(true);
            status["trigger_pre_seconds"] = json!(trigger.pre_s);
            status["trigger_post_seconds"] = json!(trigger.post_s);
        } else {
            status["trigger_enabled"] = json!(false);
        }
    }
}

impl SubGhzManager {
    #[allow(clippy::too_many_arguments)]
    pub async fn start_receive(
        self: &Arc<Self>,
        frequency_hz: u64,
        sample_rate: u32,
        lna_gain: u32,
        vga_gain: u32,
        trigger_enabled: bool,
        trigger_pre_ms: u64,
        trigger_post_ms: u64,
        device_serial: Option<String>,
    ) -> Value {
        let _transition = self.transition.lock().await;
        if self.active_mode() != "idle" {
            return error_response(format!("Already running: {}", self.active_mode()));
        }
        if !self.check_hackrf() {
            return error_response("hackrf_transfer not found");
        }
        if let Err(message) = self.require_hackrf_device().await {
            return error_response(message);
        }
        if let Err(message) = self.validate_tune_frequency(frequency_hz) {
            return error_response(message);
        }

        let lna_gain = self.clamp_lna(lna_gain);
        let vga_gain = self.clamp_vga(vga_gain);
        let trigger = trigger_enabled.then(|| Trigger {
            pre_s: (trigger_pre_ms as f64 / 1000.0).clamp(0.05, 5.0),
            post_s: (trigger_post_ms as f64 / 1000.0).clamp(0.10, 10.0),
        });

        let freq_mhz = frequency_hz as f64 / 1_000_000.0;
        let basename = format!("{freq_mhz:.3}MHz_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let iq_path = self.captures_dir.join(format!("{basename}.iq"));
        if let Err(e) = std::fs::File::create(&iq_path) {
            error!("Failed to create RX file: {e}");
            return error_response("Failed to create capture file");
        }

        let mut cmd: Vec<String> = vec![
            "hackrf_transfer".into(),
            "-r".into(),
            iq_path.to_string_lossy().into_owned(),
            "-f".into(),
            frequency_hz.to_string(),
            "-s".into(),
            sample_rate.to_string(),
            "-l".into(),
            lna_gain.to_string(),
            "-g".into(),
            vga_gain.to_string(),
        ];
        if let Some(serial) = &device_serial {
            cmd.extend(["-d".into(), serial.clone()]);
        }
        info!("SubGHz RX: {}", shell_line(&cmd));

        let mut spawned = match spawn_pipe(&cmd, StdinConfig::Null, false) {
            Ok(spawned) => spawned,
            Err(e) => return error_response(e.to_string()),
        };
        if let Err(e) = ensure_started(&mut spawned, self.constants.process_start_wait).await {
            let _ = std::fs::remove_file(&iq_path);
            return error_response(e.to_string());
        }

        let reader_file = match std::fs::File::open(&iq_path) {
            Ok(file) => file,
            Err(e) => {
                spawned
                    .handle
                    .safe_terminate(self.constants.process_terminate_timeout);
                let _ = std::fs::remove_file(&iq_path);
                error!("Failed to open RX file: {e}");
                return error_response("Failed to open capture file");
            }
        };

        let cancel = CancellationToken::new();
        let live = Arc::new(Mutex::new(RxLive::default()));
        let autostop = Arc::new(Notify::new());
        let started_at = Instant::now();

        let mut readers = Vec::new();
        readers.push(spawn_capture_loop(CaptureLoop {
            manager: Arc::clone(self),
            file: reader_file,
            handle: Arc::clone(&spawned.handle),
            cancel: cancel.clone(),
            live: Arc::clone(&live),
            sample_rate,
            frequency_hz,
            trigger,
            autostop: Arc::clone(&autostop),
            started_at,
            iq_path: iq_path.clone(),
        }));

        // hackrf_transfer narrates on stderr.
        if let Some(stderr) = spawned.stderr.take() {
            let manager = Arc::clone(self);
            readers.push(crate::modes::spawn_line_reader(
                cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    log::debug!("[hackrf_rx] {line}");
                    if line.to_ascii_lowercase().contains("error") {
                        manager.publish(Event::info(format!("[hackrf_rx] {line}")));
                    }
                },
                || {},
            ));
        }

        // Smart-trigger auto-stop runs as its own task so the reader
        // loop never calls back into async stop itself.
        {
            let manager = Arc::clone(self);
            let cancel = cancel.clone();
            let autostop = Arc::clone(&autostop);
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = autostop.notified() => {
                        let _ = manager.stop_receive().await;
                    }
                }
            });
        }

        *self.rx.lock().unwrap() = Some(RxSession {
            handle: spawned.handle,
            cancel,
            readers,
            frequency_hz,
            sample_rate,
            lna_gain,
            vga_gain,
            iq_path,
            started_at,
            trigger,
            live,
        });

        let mut response = json!({
            "status": "started",
            "frequency_hz": frequency_hz,
            "sample_rate": sample_rate,
            "file": format!("{basename}.iq"),
            "trigger_enabled": trigger.is_some(),
        });
        self.publish(
            Event::status("started")
                .with("mode", "rx")
                .with("frequency_hz", frequency_hz)
                .with("sample_rate", sample_rate)
                .with("trigger_enabled", trigger.is_some()),
        );
        if let Some(trigger) = trigger {
            response["trigger_pre_seconds"] = json!(trigger.pre_s);
            response["trigger_post_seconds"] = json!(trigger.post_s);
            self.publish(Event::info(format!(
                "[rx] Smart trigger armed (pre {:.2}s, post {:.2}s)",
                trigger.pre_s, trigger.post_s
            )));
        }
        response
    }

    pub async fn stop_receive(self: &Arc<Self>) -> Value {
        let _transition = self.transition.lock().await;
        let Some(mut session) = self.rx.lock().unwrap().take() else {
            return json!({"status": "not_running"});
        };

        session.cancel.cancel();
        {
            let handle = Arc::clone(&session.handle);
            let grace = self.constants.process_terminate_timeout;
            let _ = tokio::task::spawn_blocking(move || handle.safe_terminate(grace)).await;
        }
        for reader in session.readers.drain(..) {
            let _ = reader.await;
        }

        let wall_duration = session.started_at.elapsed().as_secs_f64();
        let capture = self.finalize_capture(&session, wall_duration);

        self.publish(
            Event::status("stopped")
                .with("mode", "idle")
                .with("duration_seconds", round1(wall_duration)),
        );

        match capture {
            Some(capture) => {
                json!({"status": "stopped", "duration_seconds": round1(wall_duration), "capture": capture})
            }
            None => json!({"status": "stopped", "duration_seconds": round1(wall_duration)}),
        }
    }

    /// Build and write the sidecar once the IQ file is final.
    fn finalize_capture(&self, session: &RxSession, wall_duration: f64) -> Option<Capture> {
        if !session.iq_path.exists() {
            return None;
        }
        let live = session.live.lock().unwrap();
        let mut bursts = live.bursts.clone();

        // Trigger trim: cut the file down to the active window.
        if let Some(trigger) = session.trigger {
            if !bursts.is_empty() {
                bursts = self.trim_to_trigger_window(
                    &session.iq_path,
                    session.sample_rate,
                    wall_duration,
                    trigger,
                    bursts,
                );
            }
        }

        let size_bytes = std::fs::metadata(&session.iq_path).map(|m| m.len()).ok()?;
        // The authoritative duration comes from the file itself.
        let duration_seconds = if session.sample_rate > 0 {
            size_bytes as f64 / (session.sample_rate as f64 * 2.0)
        } else {
            wall_duration
        };

        let dominant_fingerprint = live
            .fingerprint_counts
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(fp, _)| fp.clone())
            .unwrap_or_default();

        let (modulation_hint, modulation_confidence) =
            if live.modulation_hint.is_empty() && !bursts.is_empty() {
                analytics::modulation_from_bursts(&bursts).unwrap_or_default()
            } else {
                (live.modulation_hint.clone(), live.modulation_confidence)
            };

        let protocol_hint =
            capture::protocol_hint(session.frequency_hz, &modulation_hint, bursts.len());
        let label = capture::auto_label(
            session.frequency_hz,
            bursts.len(),
            &modulation_hint,
            &protocol_hint,
        );

        let capture = Capture {
            capture_id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            filename: session
                .iq_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            frequency_hz: session.frequency_hz,
            sample_rate: session.sample_rate,
            lna_gain: session.lna_gain,
            vga_gain: session.vga_gain,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            duration_seconds: round3(duration_seconds),
            size_bytes,
            label,
            label_source: "auto".to_string(),
            decoded_protocols: Vec::new(),
            bursts,
            modulation_hint,
            modulation_confidence: round3(modulation_confidence),
            protocol_hint,
            dominant_fingerprint,
            fingerprint_group: String::new(),
            fingerprint_group_size: 0,
            trigger_enabled: session.trigger.is_some(),
            trigger_pre_seconds: session.trigger.map(|t| t.pre_s).unwrap_or(0.0),
            trigger_post_seconds: session.trigger.map(|t| t.post_s).unwrap_or(0.0),
        };

        if let Err(e) = self.write_sidecar(&capture) {
            error!("Failed to write capture metadata: {e}");
        }
        Some(capture)
    }

    /// Rewrite the IQ file to `[first burst - pre, last burst + post]`
    /// and re-base burst timestamps.
    fn trim_to_trigger_window(
        &self,
        iq_path: &PathBuf,
        sample_rate: u32,
        duration_seconds: f64,
        trigger: Trigger,
        bursts: Vec<Burst>,
    ) -> Vec<Burst> {
        let first_start = bursts
            .iter()
            .map(|b| b.start_seconds)
            .fold(f64::INFINITY, f64::min);
        let last_end = bursts
            .iter()
            .map(|b| b.start_seconds + b.duration_seconds)
            .fold(0.0, f64::max);
        let start_s = (first_start - trigger.pre_s).max(0.0);
        let end_s = (last_end + trigger.post_s).min(duration_seconds);
        if end_s <= start_s {
            return bursts;
        }
        // Nothing to cut when the window already spans the file.
        if start_s <= 0.001 && (duration_seconds - end_s) <= 0.001 {
            return bursts;
        }

        let bytes_per_second = (sample_rate as u64 * 2).max(2);
        let start_byte = ((start_s * bytes_per_second as f64) as u64) & !1;
        let end_byte = ((end_s * bytes_per_second as f64) as u64) & !1;
        if end_byte <= start_byte {
            return bursts;
        }

        let tmp_path = iq_path.with_extension("trimtmp");
        match Self::copy_slice(iq_path, &tmp_path, start_byte, end_byte)
            .and_then(|_| std::fs::rename(&tmp_path, iq_path))
        {
            Ok(()) => {}
            Err(e) => {
                error!("Failed trimming trigger capture: {e}");
                let _ = std::fs::remove_file(&tmp_path);
                return bursts;
            }
        }

        // Keep overlapping bursts, shifted into the new timeline.
        let adjusted: Vec<Burst> = bursts
            .iter()
            .filter(|b| {
                let b_end = b.start_seconds + b.duration_seconds;
                b_end >= start_s && b.start_seconds <= end_s
            })
            .map(|b| {
                let mut shifted = b.clone();
                shifted.start_seconds = round3((b.start_seconds - start_s).max(0.0));
                shifted
            })
            .collect();
        if adjusted.is_empty() {
            bursts
        } else {
            adjusted
        }
    }
}

struct CaptureLoop {
    manager: Arc<SubGhzManager>,
    file: std::fs::File,
    handle: Arc<crate::supervisor::ChildHandle>,
    cancel: CancellationToken,
    live: Arc<Mutex<RxLive>>,
    sample_rate: u32,
    frequency_hz: u64,
    trigger: Option<Trigger>,
    autostop: Arc<Notify>,
    started_at: Instant,
    iq_path: PathBuf,
}

/// Tail the growing IQ file and emit live analytics.
fn spawn_capture_loop(mut ctx: CaptureLoop) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let tuning = ModulationTuning::default();
        let mut detector = BurstDetector::new(1.0);
        let mut hints = HintAccumulator::new();
        let mut chunk = vec![0u8; ANALYSIS_CHUNK];
        let max_burst_bytes =
            ANALYSIS_CHUNK.max(ctx.sample_rate as usize * 2 * 2);
        let mut burst_bytes: Vec<u8> = Vec::new();

        let mut last_level = Instant::now() - LEVEL_INTERVAL;
        let mut last_wave = Instant::now();
        let mut last_spectrum = Instant::now();
        let mut last_stats = Instant::now();
        let mut last_hint_eval = Instant::now();
        let mut last_hint_emit = Instant::now();
        let mut last_log = Instant::now();
        let mut bytes_since_stats: u64 = 0;
        let mut first_chunk = true;

        loop {
            if ctx.cancel.is_cancelled() {
                break;
            }
            let n = match ctx.file.read(&mut chunk) {
                Ok(n) => n,
                Err(_) => break,
            };
            if n == 0 {
                if !ctx.handle.is_running() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            let data = &chunk[..n];
            let now_s = ctx.started_at.elapsed().as_secs_f64();
            bytes_since_stats += n as u64;
            if detector.is_active() && burst_bytes.len() < max_burst_bytes {
                let room = max_burst_bytes - burst_bytes.len();
                burst_bytes.extend_from_slice(&data[..n.min(room)]);
            }

            if first_chunk {
                first_chunk = false;
                ctx.manager.publish(Event::info("[rx] Receiving IQ data..."));
            }

            if last_hint_eval.elapsed() >= HINT_EVAL_INTERVAL {
                let hint = analytics::estimate_modulation(data, &tuning);
                hints.add_chunk_hint(&hint);
                last_hint_eval = Instant::now();
            }

            if last_level.elapsed() >= LEVEL_INTERVAL {
                last_level = Instant::now();
                let level = analytics::compute_level(data) as f64;
                let transition = detector.update(now_s, level);
                ctx.manager.publish(
                    Event::new(EventKind::RxLevel)
                        .with("level", detector.smooth_level().round() as u64),
                );

                match transition {
                    Some(BurstEvent::Started { start_offset_s, level }) => {
                        burst_bytes.clear();
                        burst_bytes.extend_from_slice(&data[..n.min(max_burst_bytes)]);
                        let mut live = ctx.live.lock().unwrap();
                        if ctx.trigger.is_some() && live.trigger_first_burst.is_none() {
                            live.trigger_first_burst = Some(start_offset_s);
                            drop(live);
                            ctx.manager.publish(Event::info(
                                "[rx] Trigger fired - capturing burst window",
                            ));
                        }
                        ctx.manager.publish(
                            Event::new(EventKind::RxBurst)
                                .with("mode", "rx")
                                .with("event", "start")
                                .with("start_offset_s", round3(start_offset_s))
                                .with("level", level),
                        );
                    }
                    Some(BurstEvent::Ended {
                        start_offset_s,
                        duration_s,
                        peak_level,
                    }) => {
                        let fingerprint = analytics::fingerprint_burst(
                            &burst_bytes,
                            ctx.sample_rate,
                            duration_s,
                        );
                        let hint = analytics::estimate_modulation(&burst_bytes, &tuning);
                        hints.add_burst_hint(&hint);
                        burst_bytes.clear();

                        let burst = Burst {
                            start_seconds: round3(start_offset_s),
                            duration_seconds: round3(duration_s),
                            peak_level,
                            fingerprint: fingerprint.clone(),
                            modulation_hint: hint.family.clone(),
                            modulation_confidence: round3(hint.confidence as f64),
                        };
                        {
                            let mut live = ctx.live.lock().unwrap();
                            if !fingerprint.is_empty() {
                                *live
                                    .fingerprint_counts
                                    .entry(fingerprint.clone())
                                    .or_default() += 1;
                            }
                            if live.bursts.len() < MAX_TRACKED_BURSTS {
                                live.bursts.push(burst.clone());
                            }
                            live.trigger_last_end = Some(now_s);
                        }
                        ctx.manager.publish(
                            Event::new(EventKind::RxBurst)
                                .with("mode", "rx")
                                .with("event", "end")
                                .with("start_offset_s", burst.start_seconds)
                                .with("duration_ms", (duration_s * 1000.0) as u64)
                                .with("peak_level", peak_level)
                                .with("fingerprint", fingerprint)
                                .with("modulation_hint", hint.family)
                                .with("modulation_confidence", round3(hint.confidence as f64)),
                        );
                    }
                    None => {}
                }
            }

            if last_hint_emit.elapsed() >= HINT_EMIT_INTERVAL {
                last_hint_emit = Instant::now();
                let (family, confidence) = hints.best();
                let burst_count = ctx.live.lock().unwrap().bursts.len();
                let effective = if confidence >= 0.3 { family.as_str() } else { "Unknown" };
                let protocol = capture::protocol_hint(ctx.frequency_hz, effective, burst_count);
                {
                    let mut live = ctx.live.lock().unwrap();
                    live.protocol_hint = protocol.clone();
                    if confidence >= 0.30 {
                        live.modulation_hint = family.clone();
                        live.modulation_confidence = confidence;
                    }
                }
                if confidence >= 0.30 {
                    ctx.manager.publish(
                        Event::new(EventKind::RxHint)
                            .with("modulation_hint", family)
                            .with("confidence", round3(confidence))
                            .with("protocol_hint", protocol)
                            .with("reason", hints.last_reason().to_string()),
                    );
                }
            }

            // Smart-trigger auto-stop after a quiet post-roll.
            if let Some(trigger) = ctx.trigger {
                let should_stop = {
                    let mut live = ctx.live.lock().unwrap();
                    let quiet_long_enough = live
                        .trigger_first_burst
                        .is_some()
                        && !detector.is_active()
                        && !live.autostop_pending
                        && live
                            .trigger_last_end
                            .is_some_and(|last_end| now_s - last_end >= trigger.post_s);
                    if quiet_long_enough {
                        live.autostop_pending = true;
                    }
                    quiet_long_enough
                };
                if should_stop {
                    ctx.manager.publish(Event::info(
                        "[rx] Trigger window complete - finalizing capture",
                    ));
                    ctx.autostop.notify_one();
                    break;
                }
            }

            if last_wave.elapsed() >= WAVE_INTERVAL {
                last_wave = Instant::now();
                let samples = analytics::extract_waveform(data, 256);
                if !samples.is_empty() {
                    ctx.manager
                        .publish(Event::new(EventKind::RxWaveform).with("samples", json!(samples)));
                }
            }

            if last_spectrum.elapsed() >= SPECTRUM_INTERVAL {
                last_spectrum = Instant::now();
                let bins = analytics::compute_spectrum(data, 256);
                if !bins.is_empty() {
                    ctx.manager
                        .publish(Event::new(EventKind::RxSpectrum).with("bins", json!(bins)));
                }
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                let elapsed = last_stats.elapsed().as_secs_f64();
                last_stats = Instant::now();
                let rate_kb = bytes_since_stats as f64 / elapsed / 1024.0;
                let file_size = std::fs::metadata(&ctx.iq_path).map(|m| m.len()).unwrap_or(0);
                ctx.manager.publish(
                    Event::new(EventKind::RxStats)
                        .with("rate_kb", round1(rate_kb))
                        .with("file_size", file_size)
                        .with("elapsed_seconds", round1(now_s)),
                );
                if last_log.elapsed() >= Duration::from_secs(5) {
                    last_log = Instant::now();
                    ctx.manager.publish(Event::info(format!(
                        "[rx] IQ: {rate_kb:.0} KB/s (lvl {:.1}, floor {:.1}, thr {:.1})",
                        detector.smooth_level(),
                        detector.noise_floor(),
                        detector.on_threshold(),
                    )));
                }
                bytes_since_stats = 0;
            }
        }

        // Close out a burst still open at end of stream.
        let now_s = ctx.started_at.elapsed().as_secs_f64();
        if let Some(BurstEvent::Ended {
            start_offset_s,
            duration_s,
            peak_level,
        }) = detector.finish(now_s)
        {
            let fingerprint =
                analytics::fingerprint_burst(&burst_bytes, ctx.sample_rate, duration_s);
            let hint = analytics::estimate_modulation(&burst_bytes, &ModulationTuning::default());
            hints.add_burst_hint(&hint);
            let mut live = ctx.live.lock().unwrap();
            if !fingerprint.is_empty() {
                *live.fingerprint_counts.entry(fingerprint.clone()).or_default() += 1;
            }
            if live.bursts.len() < MAX_TRACKED_BURSTS {
                live.bursts.push(Burst {
                    start_seconds: round3(start_offset_s),
                    duration_seconds: round3(duration_s),
                    peak_level,
                    fingerprint,
                    modulation_hint: hint.family,
                    modulation_confidence: round3(hint.confidence as f64),
                });
            }
            live.trigger_last_end = Some(now_s);
        }

        // Final modulation summary for the sidecar.
        let (family, confidence) = hints.best();
        let mut live = ctx.live.lock().unwrap();
        if confidence >= 0.3 {
            live.modulation_hint = family;
            live.modulation_confidence = confidence;
        }
        let burst_count = live.bursts.len();
        live.protocol_hint =
            capture::protocol_hint(ctx.frequency_hz, &live.modulation_hint, burst_count);
    })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
