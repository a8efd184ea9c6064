//! SubGHz transceiver engine.
//!
//! Four mutually-exclusive sub-modes over one HackRF:
//!
//! - **rx** ([`rx`]): raw IQ capture to disk with live envelope,
//!   spectrum and burst analytics, optional smart trigger;
//! - **decode** ([`decode`]): `hackrf_transfer` piped through a
//!   drop-oldest IQ queue into `rtl_433`, with restart-on-USB-drop;
//! - **tx** ([`tx`]): frequency-gated replay of a stored capture with
//!   a hard watchdog;
//! - **sweep** ([`sweep`]): wideband spectrum sweep via `hackrf_sweep`.
//!
//! The HackRF is deliberately not in the SDR device registry; this
//! engine serialises its own access through the transition lock and the
//! single-slot-per-sub-mode state.

pub mod decode;
pub mod library;
pub mod rx;
pub mod sweep;
pub mod tx;

use crate::bus::EventBus;
use crate::config::Constants;
use crate::supervisor;
use intercept_core::event::Event;
use log::debug;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const MODE: &str = "subghz";

/// How long a HackRF presence probe stays fresh.
const HACKRF_CACHE_TTL: std::time::Duration = std::time::Duration::from_secs(2);
/// How long a cached *negative* result is still surfaced while probing
/// is paused by an active sub-mode.
const HACKRF_NEGATIVE_TTL: std::time::Duration = std::time::Duration::from_secs(15);

pub struct SubGhzManager {
    pub(crate) bus: Arc<EventBus>,
    pub(crate) constants: Constants,
    pub(crate) captures_dir: PathBuf,
    /// Serialises sub-mode transitions (start/stop of rx/decode/tx/
    /// sweep). Reader loops never take this lock.
    pub(crate) transition: tokio::sync::Mutex<()>,
    pub(crate) rx: Mutex<Option<rx::RxSession>>,
    pub(crate) decode: Mutex<Option<decode::DecodeSession>>,
    pub(crate) tx: Mutex<Option<tx::TxSession>>,
    pub(crate) sweep: Mutex<Option<sweep::SweepSession>>,
    hackrf_cache: Mutex<Option<(bool, Instant)>>,
}

impl SubGhzManager {
    pub fn new(bus: Arc<EventBus>, constants: Constants, captures_dir: PathBuf) -> Arc<Self> {
        if let Err(e) = std::fs::create_dir_all(&captures_dir) {
            log::error!("Failed to create captures directory: {e}");
        }
        Arc::new(SubGhzManager {
            bus,
            constants,
            captures_dir,
            transition: tokio::sync::Mutex::new(()),
            rx: Mutex::new(None),
            decode: Mutex::new(None),
            tx: Mutex::new(None),
            sweep: Mutex::new(None),
            hackrf_cache: Mutex::new(None),
        })
    }

    pub(crate) fn publish(&self, event: Event) {
        self.bus.publish(MODE, event);
    }

    /// Current sub-mode, judged by which slot holds a live session.
    pub fn active_mode(&self) -> &'static str {
        if self.rx.lock().unwrap().as_ref().is_some_and(|s| s.is_running()) {
            return "rx";
        }
        if self
            .decode
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| s.is_running())
        {
            return "decode";
        }
        if self.tx.lock().unwrap().as_ref().is_some_and(|s| s.is_running()) {
            return "tx";
        }
        if self
            .sweep
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|s| s.is_running())
        {
            return "sweep";
        }
        "idle"
    }

    // ------------------------------------------------------------------
    // Tool and device detection
    // ------------------------------------------------------------------

    pub fn check_hackrf(&self) -> bool {
        supervisor::tool_available("hackrf_transfer")
    }

    pub fn check_hackrf_info(&self) -> bool {
        supervisor::tool_available("hackrf_info")
    }

    pub fn check_rtl433(&self) -> bool {
        supervisor::tool_available("rtl_433")
    }

    pub fn check_sweep_tool(&self) -> bool {
        supervisor::tool_available("hackrf_sweep")
    }

    /// Probe for a connected HackRF with a 2 s cache. `None` means
    /// detection is unavailable (no hackrf_info installed).
    pub async fn check_hackrf_device(&self) -> Option<bool> {
        if !self.check_hackrf_info() {
            return None;
        }
        if let Some((cached, at)) = *self.hackrf_cache.lock().unwrap() {
            if at.elapsed() < HACKRF_CACHE_TTL {
                return Some(cached);
            }
        }
        let connected = !crate::devices::detect_hackrf_devices().await.is_empty();
        *self.hackrf_cache.lock().unwrap() = Some((connected, Instant::now()));
        Some(connected)
    }

    /// Mark the device as gone (driven by stderr disconnect chatter).
    pub(crate) fn mark_hackrf_disconnected(&self) {
        *self.hackrf_cache.lock().unwrap() = Some((false, Instant::now()));
    }

    /// Pre-start gate: refuse when the device is explicitly absent.
    pub(crate) async fn require_hackrf_device(&self) -> Result<(), String> {
        if self.check_hackrf_device().await == Some(false) {
            Err("HackRF device not detected".to_string())
        } else {
            Ok(())
        }
    }

    /// Presence as reported by `status`. Probing is suppressed while a
    /// sub-mode is active (touching the USB device mid-stream is what
    /// kills transfers); a recent negative result is still surfaced so
    /// a just-unplugged radio stays visible.
    async fn hackrf_connected_for_status(&self, active: &str) -> Option<bool> {
        if active == "idle" {
            return self.check_hackrf_device().await;
        }
        match *self.hackrf_cache.lock().unwrap() {
            Some((false, at)) if at.elapsed() < HACKRF_NEGATIVE_TTL => Some(false),
            _ => None,
        }
    }

    pub async fn status(&self) -> Value {
        let active = self.active_mode();
        let detection_paused = active != "idle";
        let mut status = json!({
            "mode": active,
            "hackrf_available": self.check_hackrf(),
            "hackrf_info_available": self.check_hackrf_info(),
            "hackrf_connected": self.hackrf_connected_for_status(active).await,
            "hackrf_detection_paused": detection_paused,
            "rtl433_available": self.check_rtl433(),
            "sweep_available": self.check_sweep_tool(),
        });
        match active {
            "rx" => {
                if let Some(session) = self.rx.lock().unwrap().as_ref() {
                    session.fill_status(&mut status);
                }
            }
            "decode" => {
                if let Some(session) = self.decode.lock().unwrap().as_ref() {
                    session.fill_status(&mut status);
                }
            }
            "tx" => {
                if let Some(session) = self.tx.lock().unwrap().as_ref() {
                    session.fill_status(&mut status);
                }
            }
            _ => {}
        }
        status
    }

    /// Frequency presets for the UI.
    pub fn presets(&self) -> Value {
        json!([
            {"name": "Car remotes (EU)", "frequency_hz": 433920000u64},
            {"name": "Car remotes (US)", "frequency_hz": 315000000u64},
            {"name": "EU ISM 868", "frequency_hz": 868300000u64},
            {"name": "US ISM 915", "frequency_hz": 915000000u64},
            {"name": "Weather sensors", "frequency_hz": 433920000u64},
            {"name": "LoRa EU", "frequency_hz": 868100000u64},
        ])
    }

    /// Stop whatever is running. Used at service shutdown.
    pub async fn stop_all(self: &Arc<Self>) {
        debug!("SubGHz stop_all");
        let _ = self.stop_receive().await;
        let _ = self.stop_decode().await;
        let _ = self.stop_transmit().await;
        let _ = self.stop_sweep().await;
    }

    /// Validate an RX/decode tuning frequency against the configured
    /// hardware range.
    pub(crate) fn validate_tune_frequency(&self, frequency_hz: u64) -> Result<(), String> {
        let mhz = frequency_hz as f64 / 1_000_000.0;
        if mhz < self.constants.subghz_freq_min_mhz || mhz > self.constants.subghz_freq_max_mhz {
            return Err(format!(
                "Frequency {mhz:.3} MHz outside supported range ({}-{} MHz)",
                self.constants.subghz_freq_min_mhz, self.constants.subghz_freq_max_mhz
            ));
        }
        Ok(())
    }

    pub(crate) fn clamp_lna(&self, gain: u32) -> u32 {
        gain.clamp(
            self.constants.subghz_lna_gain_min,
            self.constants.subghz_lna_gain_max,
        )
    }

    pub(crate) fn clamp_vga(&self, gain: u32) -> u32 {
        gain.clamp(
            self.constants.subghz_vga_gain_min,
            self.constants.subghz_vga_gain_max,
        )
    }
}

/// `{status: "error", message}` helper shared by the sub-mode modules.
pub(crate) fn error_response(message: impl Into<String>) -> Value {
    json!({"status": "error", "message": message.into()})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<SubGhzManager>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = EventBus::new(100);
        let manager = SubGhzManager::new(
            bus,
            Constants::from_env(),
            dir.path().join("captures"),
        );
        (manager, dir)
    }

    #[tokio::test]
    async fn idle_manager_reports_idle() {
        let (manager, _dir) = manager();
        assert_eq!(manager.active_mode(), "idle");
        let status = manager.status().await;
        assert_eq!(status["mode"], "idle");
        assert_eq!(status["hackrf_detection_paused"], false);
    }

    #[test]
    fn tune_frequency_validation() {
        let (manager, _dir) = manager();
        assert!(manager.validate_tune_frequency(433_920_000).is_ok());
        assert!(manager.validate_tune_frequency(100_000).is_err());
    }

    #[test]
    fn gain_clamping() {
        let (manager, _dir) = manager();
        assert_eq!(manager.clamp_lna(100), manager.constants.subghz_lna_gain_max);
        assert_eq!(manager.clamp_vga(100), manager.constants.subghz_vga_gain_max);
    }
}
