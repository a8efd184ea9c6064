//! SubGHz decode: HackRF IQ piped into rtl_433.
//!
//! `hackrf_transfer -r -` produces cs8 IQ on stdout; rtl_433 consumes
//! it on stdin. A bounded drop-oldest queue sits between them: if
//! rtl_433 stalls, old chunks are discarded instead of back-pressuring
//! the USB transfer (which on some hosts disconnects the device). The
//! HackRF stage is restarted automatically on USB drops, with a
//! quick-restart cap that declares the stream unstable.

use super::{error_response, SubGhzManager};
use crate::supervisor::{
    ensure_started, shell_line, spawn_pipe, ChildHandle, PipeSource, StdinConfig,
};
use intercept_core::analytics;
use intercept_core::event::{Event, EventKind};
use log::{debug, error, info, warn};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const CHUNK: usize = 65_536;
const QUEUE_CAPACITY: usize = 512;
const RESTART_DELAY: Duration = Duration::from_millis(150);
const MAX_RESTARTS: u32 = 3600;
const MAX_QUICK_RESTARTS: usize = 6;
const QUICK_RESTART_WINDOW: Duration = Duration::from_secs(20);

/// rtl_433 stderr lines containing these read as decoder activity.
const DECODE_KEYWORDS: [&str; 13] = [
    "pulse", "sync", "message", "decoded", "snr", "rssi", "level", "modulation", "bitbuffer",
    "symbol", "short", "noise", "detected",
];

/// rtl_433 protocol ids for weather/temperature/humidity/rain/wind
/// sensors; the `weather` profile restricts decoding to these for
/// better sensitivity and lower CPU load.
const WEATHER_PROTOCOL_IDS: [u32; 73] = [
    2, 3, 8, 12, 16, 18, 19, 20, 31, 32, 34, 40, 47, 50, 52, 54, 55, 56, 57, 69, 73, 74, 75, 76,
    78, 79, 85, 91, 92, 108, 109, 111, 112, 113, 119, 120, 124, 127, 132, 133, 134, 138, 141, 143,
    144, 145, 146, 147, 152, 153, 157, 158, 163, 165, 166, 170, 171, 172, 173, 175, 182, 183, 184,
    194, 195, 196, 205, 206, 213, 214, 215, 217, 219,
];

/// Bounded chunk queue with drop-oldest overflow. `None` is the
/// end-of-stream sentinel.
struct IqQueue {
    inner: Mutex<VecDeque<Option<Vec<u8>>>>,
    ready: Condvar,
}

impl IqQueue {
    fn new() -> Self {
        IqQueue {
            inner: Mutex::new(VecDeque::with_capacity(QUEUE_CAPACITY)),
            ready: Condvar::new(),
        }
    }

    fn push(&self, chunk: Option<Vec<u8>>) {
        let mut queue = self.inner.lock().unwrap();
        if queue.len() >= QUEUE_CAPACITY {
            // Drop oldest to prevent backpressure on the USB path.
            debug!("IQ queue full, dropping oldest chunk");
            queue.pop_front();
        }
        queue.push_back(chunk);
        self.ready.notify_one();
    }

    /// Pop with a timeout; outer `None` is a timeout, inner `None` the
    /// end-of-stream sentinel.
    fn pop_timeout(&self, timeout: Duration) -> Option<Option<Vec<u8>>> {
        let queue = self.inner.lock().unwrap();
        let (mut queue, result) = self
            .ready
            .wait_timeout_while(queue, timeout, |q| q.is_empty())
            .unwrap();
        if result.timed_out() && queue.is_empty() {
            return None;
        }
        queue.pop_front()
    }
}

pub struct DecodeSession {
    rtl433: Arc<ChildHandle>,
    /// Replaced by the reader when the HackRF stage restarts.
    hackrf: Arc<Mutex<Arc<ChildHandle>>>,
    stop: Arc<AtomicBool>,
    cancel: CancellationToken,
    readers: Vec<tokio::task::JoinHandle<()>>,
    frequency_hz: u64,
    sample_rate: u32,
    started_at: Instant,
}

impl DecodeSession {
    pub fn is_running(&self) -> bool {
        self.rtl433.is_running() || self.hackrf.lock().unwrap().is_running()
    }

    pub fn fill_status(&self, status: &mut Value) {
        status["frequency_hz"] = json!(self.frequency_hz);
        status["sample_rate"] = json!(self.sample_rate);
        status["elapsed_seconds"] =
            json!((self.started_at.elapsed().as_secs_f64() * 10.0).round() / 10.0);
    }
}

impl SubGhzManager {
    pub async fn start_decode(
        self: &Arc<Self>,
        frequency_hz: u64,
        sample_rate: u32,
        lna_gain: u32,
        vga_gain: u32,
        decode_profile: &str,
        device_serial: Option<String>,
    ) -> Value {
        let _transition = self.transition.lock().await;
        if self.active_mode() != "idle" {
            return error_response(format!("Already running: {}", self.active_mode()));
        }
        if !self.check_hackrf() {
            return error_response("hackrf_transfer not found");
        }
        if !self.check_rtl433() {
            return error_response("rtl_433 not found");
        }
        if let Err(message) = self.require_hackrf_device().await {
            return error_response(message);
        }
        if let Err(message) = self.validate_tune_frequency(frequency_hz) {
            return error_response(message);
        }

        // 2 Msps is enough for common SubGHz protocols and keeps the
        // live decode stable on marginal USB hosts.
        let requested_sample_rate = sample_rate;
        let stable_sample_rate = 2_000_000u32;

        let mut hackrf_cmd: Vec<String> = vec![
            "hackrf_transfer".into(),
            "-r".into(),
            "-".into(),
            "-f".into(),
            frequency_hz.to_string(),
            "-s".into(),
            stable_sample_rate.to_string(),
            "-l".into(),
            self.clamp_lna(lna_gain).to_string(),
            "-g".into(),
            self.clamp_vga(vga_gain).to_string(),
        ];
        if let Some(serial) = &device_serial {
            hackrf_cmd.extend(["-d".into(), serial.clone()]);
        }

        let mut rtl433_cmd: Vec<String> = vec![
            "rtl_433".into(),
            "-r".into(),
            "cs8:-".into(),
            "-s".into(),
            stable_sample_rate.to_string(),
            "-f".into(),
            frequency_hz.to_string(),
            "-F".into(),
            "json".into(),
            "-F".into(),
            "log".into(),
            "-M".into(),
            "level".into(),
            "-M".into(),
            "noise:5".into(),
            "-Y".into(),
            "autolevel".into(),
            "-Y".into(),
            "ampest".into(),
            "-Y".into(),
            "minsnr=2.5".into(),
        ];
        let profile = if decode_profile.trim().eq_ignore_ascii_case("weather") {
            rtl433_cmd.extend(["-R".into(), "0".into()]);
            for id in WEATHER_PROTOCOL_IDS {
                rtl433_cmd.extend(["-R".into(), id.to_string()]);
            }
            "weather"
        } else {
            "all"
        };

        info!(
            "SubGHz decode: {} | {}",
            shell_line(&hackrf_cmd),
            shell_line(&rtl433_cmd)
        );

        let mut hackrf = match spawn_pipe(&hackrf_cmd, StdinConfig::Null, true) {
            Ok(spawned) => spawned,
            Err(e) => return error_response(e.to_string()),
        };
        if let Err(e) = ensure_started(&mut hackrf, self.constants.process_start_wait).await {
            return error_response(e.to_string());
        }

        let mut rtl433 = match spawn_pipe(&rtl433_cmd, StdinConfig::Piped, true) {
            Ok(spawned) => spawned,
            Err(e) => {
                hackrf
                    .handle
                    .safe_terminate(self.constants.process_terminate_timeout);
                return error_response(e.to_string());
            }
        };
        if let Err(e) = ensure_started(&mut rtl433, self.constants.process_start_wait).await {
            hackrf
                .handle
                .safe_terminate(self.constants.process_terminate_timeout);
            return error_response(e.to_string());
        }

        let stop = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let queue = Arc::new(IqQueue::new());
        let hackrf_slot = Arc::new(Mutex::new(Arc::clone(&hackrf.handle)));
        let started_at = Instant::now();
        let mut readers = Vec::new();

        self.publish(Event::info(format!("[decode] Profile: {profile}")));
        if requested_sample_rate != stable_sample_rate {
            self.publish(Event::info(format!(
                "[decode] Using {stable_sample_rate} sps (requested {requested_sample_rate}) for stable live decode"
            )));
        }

        // HackRF stdout -> queue, restarting on USB drops.
        {
            let manager = Arc::clone(self);
            let stop = Arc::clone(&stop);
            let queue = Arc::clone(&queue);
            let hackrf_slot = Arc::clone(&hackrf_slot);
            let rtl433_handle = Arc::clone(&rtl433.handle);
            let stdout = hackrf
                .stdout
                .take()
                .expect("hackrf stdout was requested piped");
            let cmd = hackrf_cmd.clone();
            readers.push(tokio::task::spawn_blocking(move || {
                hackrf_reader_loop(
                    manager,
                    cmd,
                    stdout,
                    stop,
                    queue,
                    hackrf_slot,
                    rtl433_handle,
                )
            }));
        }
        spawn_hackrf_stderr_monitor(
            Arc::clone(self),
            Arc::clone(&stop),
            hackrf.stderr.take(),
            cancel.clone(),
        );

        // Queue -> rtl_433 stdin, with decode-side live analytics.
        {
            let manager = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let rtl433_handle = Arc::clone(&rtl433.handle);
            let stdin = rtl433.stdin.take().expect("rtl_433 stdin was requested piped");
            readers.push(tokio::task::spawn_blocking(move || {
                rtl433_writer_loop(manager, queue, stdin, rtl433_handle, started_at)
            }));
        }

        // rtl_433 stdout: decoded JSON events.
        {
            let manager = Arc::clone(self);
            let eof_manager = Arc::clone(self);
            let stdout = rtl433.stdout.take().expect("rtl_433 stdout was requested piped");
            let stop = Arc::clone(&stop);
            readers.push(crate::modes::spawn_line_reader(
                cancel.clone(),
                PipeSource(stdout),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    match serde_json::from_str::<Map<String, Value>>(&line) {
                        Ok(data) => manager.publish(Event::passthrough(EventKind::Decode, data)),
                        Err(_) => manager
                            .publish(Event::new(EventKind::DecodeRaw).with("text", line)),
                    }
                },
                move || {
                    stop.store(true, Ordering::SeqCst);
                    eof_manager.publish(Event::status("decode_stopped").with("mode", "idle"));
                },
            ));
        }

        // rtl_433 stderr: decoder-signal narration.
        if let Some(stderr) = rtl433.stderr.take() {
            let manager = Arc::clone(self);
            readers.push(crate::modes::spawn_line_reader(
                cancel.clone(),
                PipeSource(stderr),
                move |line| {
                    if line.is_empty() {
                        return;
                    }
                    debug!("[rtl_433] {line}");
                    manager.publish(Event::info(format!("[rtl_433] {line}")));
                    let lower = line.to_ascii_lowercase();
                    if DECODE_KEYWORDS.iter().any(|k| lower.contains(k)) {
                        manager.publish(Event::new(EventKind::DecodeRaw).with("text", line));
                    }
                },
                || {},
            ));
        }

        *self.decode.lock().unwrap() = Some(DecodeSession {
            rtl433: rtl433.handle,
            hackrf: hackrf_slot,
            stop,
            cancel,
            readers,
            frequency_hz,
            sample_rate: stable_sample_rate,
            started_at,
        });

        self.publish(
            Event::status("started")
                .with("mode", "decode")
                .with("frequency_hz", frequency_hz)
                .with("sample_rate", stable_sample_rate),
        );
        json!({
            "status": "started",
            "frequency_hz": frequency_hz,
            "sample_rate": stable_sample_rate,
            "profile": profile,
        })
    }

    pub async fn stop_decode(self: &Arc<Self>) -> Value {
        let _transition = self.transition.lock().await;
        let Some(mut session) = self.decode.lock().unwrap().take() else {
            return json!({"status": "not_running"});
        };

        // Stop the reader before killing children so it cannot spawn a
        // replacement hackrf_transfer during cleanup.
        session.stop.store(true, Ordering::SeqCst);
        session.cancel.cancel();

        // Producer first, then the consumer.
        let grace = self.constants.process_terminate_timeout;
        let hackrf = Arc::clone(&*session.hackrf.lock().unwrap());
        let rtl433 = Arc::clone(&session.rtl433);
        let _ = tokio::task::spawn_blocking(move || {
            hackrf.safe_terminate(grace);
            rtl433.safe_terminate(grace);
        })
        .await;

        for reader in session.readers.drain(..) {
            let _ = reader.await;
        }

        // The reader may have respawned the HackRF stage in the window
        // between the stop flag and its next check; reap whatever ended
        // up in the slot.
        let straggler = Arc::clone(&*session.hackrf.lock().unwrap());
        if straggler.is_running() {
            let _ = tokio::task::spawn_blocking(move || straggler.safe_terminate(grace)).await;
        }

        self.publish(Event::status("stopped").with("mode", "idle"));
        json!({"status": "stopped"})
    }
}

/// Read IQ chunks from hackrf_transfer, restarting the child on USB
/// drops until cancelled or the restart budget runs out.
fn hackrf_reader_loop(
    manager: Arc<SubGhzManager>,
    hackrf_cmd: Vec<String>,
    mut stdout: std::process::ChildStdout,
    stop: Arc<AtomicBool>,
    queue: Arc<IqQueue>,
    hackrf_slot: Arc<Mutex<Arc<ChildHandle>>>,
    rtl433_handle: Arc<ChildHandle>,
) {
    let mut buf = vec![0u8; CHUNK];
    let mut restarts = 0u32;
    let mut restart_times: Vec<Instant> = Vec::new();
    let mut first_chunk = true;

    'outer: loop {
        // Drain the current stage until it ends.
        loop {
            if stop.load(Ordering::SeqCst) {
                break 'outer;
            }
            match stdout.read(&mut buf) {
                Ok(0) => {
                    manager.publish(Event::info("[decode] HackRF stream stopped"));
                    break;
                }
                Ok(n) => {
                    if first_chunk {
                        first_chunk = false;
                        manager.publish(Event::info("[decode] IQ source active"));
                    }
                    queue.push(Some(buf[..n].to_vec()));
                }
                Err(e) => {
                    debug!("hackrf stdout read error: {e}");
                    break;
                }
            }
        }

        if stop.load(Ordering::SeqCst) || !rtl433_handle.is_running() {
            break;
        }
        if restarts >= MAX_RESTARTS {
            error!("hackrf_transfer: max restarts reached");
            manager.publish(Event::error("HackRF: max restarts reached"));
            break;
        }

        // The dead stage is unregistered before its replacement spawns.
        hackrf_slot
            .lock()
            .unwrap()
            .safe_terminate(Duration::from_millis(100));
        std::thread::sleep(RESTART_DELAY);
        if stop.load(Ordering::SeqCst) || !rtl433_handle.is_running() {
            break;
        }

        let mut spawned = match spawn_pipe(&hackrf_cmd, StdinConfig::Null, true) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Failed to restart hackrf_transfer: {e}");
                manager.publish(Event::error(format!("Failed to restart hackrf_transfer: {e}")));
                break;
            }
        };
        restarts += 1;
        let now = Instant::now();
        restart_times.push(now);
        restart_times.retain(|t| now.duration_since(*t) <= QUICK_RESTART_WINDOW);
        if restart_times.len() >= MAX_QUICK_RESTARTS {
            manager.publish(Event::error(
                "HackRF stream is unstable (restarting repeatedly). \
                 Try lower gain/sample-rate or reconnect the device.",
            ));
            spawned.handle.safe_terminate(Duration::from_millis(100));
            break;
        }
        info!("hackrf_transfer restarted ({restarts})");
        manager.publish(Event::info(format!("[decode] HackRF stream restarted ({restarts})")));

        stdout = match spawned.stdout.take() {
            Some(stdout) => stdout,
            None => break,
        };
        spawn_hackrf_stderr_monitor(
            Arc::clone(&manager),
            Arc::clone(&stop),
            spawned.stderr.take(),
            CancellationToken::new(),
        );
        *hackrf_slot.lock().unwrap() = Arc::clone(&spawned.handle);
    }

    // Wake the writer so it can exit.
    queue.push(None);
}

/// Drain the IQ queue into rtl_433 stdin, emitting decode-side
/// analytics along the way.
fn rtl433_writer_loop(
    manager: Arc<SubGhzManager>,
    queue: Arc<IqQueue>,
    mut stdin: std::process::ChildStdin,
    rtl433_handle: Arc<ChildHandle>,
    started_at: Instant,
) {
    const LEVEL_INTERVAL: Duration = Duration::from_millis(350);
    const WAVE_INTERVAL: Duration = Duration::from_millis(500);
    const SPECTRUM_INTERVAL: Duration = Duration::from_millis(550);
    const STATS_INTERVAL: Duration = Duration::from_secs(6);
    const BURST_ON_LEVEL: u8 = 9;
    const BURST_OFF_HOLD: f64 = 0.45;
    const BURST_MIN_DURATION: f64 = 0.05;

    let mut last_level = Instant::now() - LEVEL_INTERVAL;
    let mut last_wave = Instant::now();
    let mut last_spectrum = Instant::now();
    let mut last_stats = Instant::now();
    let mut bytes_since_stats = 0u64;
    let mut writes_since_flush = 0u32;
    let mut first_chunk = true;

    let mut burst_active = false;
    let mut burst_start = 0.0f64;
    let mut burst_last_high = 0.0f64;
    let mut burst_peak: u8 = 0;

    let finish_burst = |manager: &SubGhzManager, start: f64, now: f64, peak: u8| {
        let duration = now - start;
        if duration >= BURST_MIN_DURATION {
            manager.publish(
                Event::new(EventKind::RxBurst)
                    .with("mode", "decode")
                    .with("event", "end")
                    .with("start_offset_s", (start * 1000.0).round() / 1000.0)
                    .with("duration_ms", (duration * 1000.0) as u64)
                    .with("peak_level", peak),
            );
        }
    };

    loop {
        let chunk = match queue.pop_timeout(Duration::from_secs(2)) {
            None => {
                if !rtl433_handle.is_running() {
                    break;
                }
                continue;
            }
            Some(None) => break,
            Some(Some(chunk)) => chunk,
        };

        let now_s = started_at.elapsed().as_secs_f64();
        bytes_since_stats += chunk.len() as u64;

        if last_level.elapsed() >= LEVEL_INTERVAL {
            last_level = Instant::now();
            let level = analytics::compute_level(&chunk);
            manager.publish(Event::new(EventKind::DecodeLevel).with("level", level));
            if level >= BURST_ON_LEVEL {
                burst_last_high = now_s;
                if !burst_active {
                    burst_active = true;
                    burst_start = now_s;
                    burst_peak = level;
                    manager.publish(
                        Event::new(EventKind::RxBurst)
                            .with("mode", "decode")
                            .with("event", "start")
                            .with("start_offset_s", (now_s * 1000.0).round() / 1000.0)
                            .with("level", level),
                    );
                } else {
                    burst_peak = burst_peak.max(level);
                }
            } else if burst_active && now_s - burst_last_high >= BURST_OFF_HOLD {
                finish_burst(&manager, burst_start, now_s, burst_peak);
                burst_active = false;
                burst_peak = 0;
            }
        }

        if last_wave.elapsed() >= WAVE_INTERVAL {
            last_wave = Instant::now();
            let samples = analytics::extract_waveform(&chunk, 160);
            if !samples.is_empty() {
                manager.publish(
                    Event::new(EventKind::DecodeWaveform).with("samples", json!(samples)),
                );
            }
        }
        if last_spectrum.elapsed() >= SPECTRUM_INTERVAL {
            last_spectrum = Instant::now();
            let bins = analytics::compute_spectrum(&chunk, 128);
            if !bins.is_empty() {
                manager.publish(Event::new(EventKind::DecodeSpectrum).with("bins", json!(bins)));
            }
        }

        // cs8 IQ passes straight through to rtl_433.
        if let Err(e) = stdin.write_all(&chunk) {
            debug!("rtl_433 writer pipe closed: {e}");
            manager.publish(Event::info(format!("[decode] Writer pipe closed: {e}")));
            break;
        }
        writes_since_flush += 1;
        if writes_since_flush >= 8 {
            let _ = stdin.flush();
            writes_since_flush = 0;
        }

        if first_chunk {
            first_chunk = false;
            info!("IQ data flowing to rtl_433 ({} bytes)", chunk.len());
            manager.publish(Event::info("[decode] Receiving IQ data from HackRF..."));
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            let elapsed = last_stats.elapsed().as_secs_f64();
            last_stats = Instant::now();
            let rate_kb = bytes_since_stats as f64 / elapsed / 1024.0;
            bytes_since_stats = 0;
            manager.publish(Event::info(format!(
                "[decode] IQ: {rate_kb:.0} KB/s - listening for signals..."
            )));
            manager.publish(
                Event::new(EventKind::DecodeRaw)
                    .with("text", format!("IQ stream active: {rate_kb:.0} KB/s")),
            );
        }
    }

    if burst_active {
        let now_s = started_at.elapsed().as_secs_f64();
        finish_burst(&manager, burst_start, now_s, burst_peak);
    }
}

/// Surface HackRF stderr: disconnects stop the pipeline; USB chatter
/// becomes info events.
fn spawn_hackrf_stderr_monitor(
    manager: Arc<SubGhzManager>,
    stop: Arc<AtomicBool>,
    stderr: Option<std::process::ChildStderr>,
    cancel: CancellationToken,
) {
    let Some(stderr) = stderr else {
        return;
    };
    let mut disconnect_emitted = false;
    let _ = crate::modes::spawn_line_reader(
        cancel,
        PipeSource(stderr),
        move |line| {
            if line.is_empty() {
                return;
            }
            debug!("[hackrf_decode] {line}");
            let lower = line.to_ascii_lowercase();
            if !disconnect_emitted && crate::modes::is_device_disconnect(&line) {
                disconnect_emitted = true;
                manager.mark_hackrf_disconnected();
                stop.store(true, Ordering::SeqCst);
                manager.publish(Event::error(
                    "HackRF disconnected during decode. \
                     Reconnect the device, then press Start again.",
                ));
                warn!("HackRF disconnected during decode");
            }
            if ["error", "usb", "overflow", "underflow", "failed", "couldn", "transfer"]
                .iter()
                .any(|k| lower.contains(k))
            {
                manager.publish(Event::info(format!("[hackrf] {line}")));
            }
        },
        || {},
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_drops_oldest_on_overflow() {
        let queue = IqQueue::new();
        for i in 0..(QUEUE_CAPACITY + 10) {
            queue.push(Some(vec![i as u8]));
        }
        // First popped chunk is not chunk 0: the oldest were dropped.
        let first = queue.pop_timeout(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first, vec![10u8]);
        // Length never exceeded capacity.
        assert!(queue.inner.lock().unwrap().len() <= QUEUE_CAPACITY);
    }

    #[test]
    fn queue_pop_times_out_when_empty() {
        let queue = IqQueue::new();
        assert!(queue.pop_timeout(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn queue_sentinel_passes_through() {
        let queue = IqQueue::new();
        queue.push(None);
        assert_eq!(queue.pop_timeout(Duration::from_millis(10)), Some(None));
    }

    #[test]
    fn weather_profile_ids_are_unique_and_sorted() {
        let mut ids = WEATHER_PROTOCOL_IDS.to_vec();
        ids.dedup();
        assert_eq!(ids.len(), WEATHER_PROTOCOL_IDS.len());
        assert!(WEATHER_PROTOCOL_IDS.windows(2).all(|w| w[0] < w[1]));
    }
}
