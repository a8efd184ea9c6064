//! Capture library: sidecar enumeration, fingerprint grouping, label
//! edits, deletion, and trim.

use super::{error_response, SubGhzManager};
use chrono::Utc;
use intercept_core::capture::{
    self, adjust_bursts, assign_fingerprint_groups, dominant_fingerprint, plan_window,
    strongest_burst_window, trim_label, Capture,
};
use intercept_core::CoreError;
use log::{debug, error};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const COPY_CHUNK: usize = 262_144;
const AUTO_TRIM_PAD_S: f64 = 0.06;

impl SubGhzManager {
    /// Enumerate capture sidecars, newest stem first, with fingerprint
    /// groups assigned across the set.
    pub fn list_captures(&self) -> Vec<Capture> {
        let Ok(entries) = std::fs::read_dir(&self.captures_dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        paths.reverse();

        let mut captures = Vec::new();
        for path in paths {
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str::<Capture>(&text).map_err(|e| e.to_string()))
            {
                Ok(capture) => captures.push(capture),
                Err(e) => debug!("Skipping invalid capture metadata {}: {e}", path.display()),
            }
        }
        assign_fingerprint_groups(&mut captures);
        captures
    }

    pub fn get_capture(&self, capture_id: &str) -> Option<Capture> {
        self.list_captures()
            .into_iter()
            .find(|capture| capture.capture_id == capture_id)
    }

    /// Path of a capture's IQ file, when both halves exist.
    pub fn capture_iq_path(&self, capture_id: &str) -> Option<PathBuf> {
        let capture = self.get_capture(capture_id)?;
        let path = self.captures_dir.join(&capture.filename);
        path.exists().then_some(path)
    }

    pub(crate) fn sidecar_path_for(&self, capture: &Capture) -> PathBuf {
        self.captures_dir
            .join(&capture.filename)
            .with_extension("json")
    }

    /// Delete a capture's IQ file and sidecar together.
    pub fn delete_capture(&self, capture_id: &str) -> bool {
        let Some(capture) = self.get_capture(capture_id) else {
            return false;
        };
        let iq_path = self.captures_dir.join(&capture.filename);
        let meta_path = self.sidecar_path_for(&capture);
        let mut deleted = false;
        for path in [iq_path, meta_path] {
            if path.exists() {
                match std::fs::remove_file(&path) {
                    Ok(()) => deleted = true,
                    Err(e) => error!("Failed to delete {}: {e}", path.display()),
                }
            }
        }
        deleted
    }

    /// Update a capture's label; a non-empty label marks it manual.
    pub fn update_capture_label(&self, capture_id: &str, label: &str) -> bool {
        let Some(mut capture) = self.get_capture(capture_id) else {
            return false;
        };
        capture.label = label.to_string();
        if !label.is_empty() {
            capture.label_source = "manual".to_string();
        }
        self.write_sidecar(&capture).is_ok()
    }

    pub(crate) fn write_sidecar(&self, capture: &Capture) -> Result<(), String> {
        let path = self.sidecar_path_for(capture);
        let text = serde_json::to_string_pretty(capture)
            .map_err(|e| format!("Failed to serialize sidecar: {e}"))?;
        std::fs::write(&path, text).map_err(|e| format!("Failed to write sidecar: {e}"))
    }

    /// Copy `[start_byte, end_byte)` of `src` into `dst`.
    pub(crate) fn copy_slice(
        src: &Path,
        dst: &Path,
        start_byte: u64,
        end_byte: u64,
    ) -> std::io::Result<u64> {
        let mut reader = File::open(src)?;
        reader.seek(SeekFrom::Start(start_byte))?;
        let mut writer = File::create(dst)?;
        let mut remaining = end_byte.saturating_sub(start_byte);
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut written = 0u64;
        while remaining > 0 {
            let want = remaining.min(COPY_CHUNK as u64) as usize;
            let n = reader.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
            written += n as u64;
            remaining -= n as u64;
        }
        writer.flush()?;
        Ok(written)
    }

    /// Produce a new capture from a time window of an existing one.
    ///
    /// With neither `start_seconds` nor `duration_seconds` given, the
    /// strongest burst window is selected automatically with short
    /// padding.
    pub async fn trim_capture(
        &self,
        capture_id: &str,
        start_seconds: Option<f64>,
        duration_seconds: Option<f64>,
        label: &str,
    ) -> Value {
        let _transition = self.transition.lock().await;
        if self.active_mode() != "idle" {
            return error_response(format!("Already running: {}", self.active_mode()));
        }

        let Some(capture) = self.get_capture(capture_id) else {
            return error_response(format!("Capture not found: {capture_id}"));
        };
        let src_path = self.captures_dir.join(&capture.filename);
        if !src_path.exists() {
            return error_response("IQ file missing");
        }
        let Ok(src_size) = std::fs::metadata(&src_path).map(|m| m.len()) else {
            return error_response("Unable to read capture file");
        };
        if src_size < 2 {
            return error_response("Capture file has no IQ data");
        }
        let total_duration = capture.estimated_duration_seconds(src_size);
        if total_duration <= 0.0 {
            return error_response("Unable to determine capture duration");
        }

        let auto_selected = start_seconds.is_none() && duration_seconds.is_none();
        let (start_s, duration_s) = if auto_selected {
            match strongest_burst_window(&capture.bursts, total_duration, AUTO_TRIM_PAD_S) {
                Ok(window) => window,
                Err(CoreError::NoBurstMarkers) => {
                    return error_response(
                        "No burst markers available. Select a segment manually before trimming.",
                    )
                }
                Err(e) => return error_response(e.to_string()),
            }
        } else {
            (start_seconds.unwrap_or(0.0).max(0.0), duration_seconds.unwrap_or(0.0))
        };

        let window = match plan_window(
            capture.sample_rate,
            total_duration,
            start_s,
            if auto_selected || duration_seconds.is_some() {
                Some(duration_s)
            } else {
                None
            },
        ) {
            Ok(window) => window,
            Err(e) => return error_response(e.to_string()),
        };

        let source_stem = Path::new(&capture.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| capture.capture_id.clone());
        let trim_name = format!(
            "{source_stem}_trim_{}_{}.iq",
            Utc::now().format("%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..4]
        );
        let trim_path = self.captures_dir.join(&trim_name);

        let written = match Self::copy_slice(&src_path, &trim_path, window.start_byte, window.end_byte)
        {
            Ok(written) => written,
            Err(e) => {
                error!("Failed to create trimmed capture: {e}");
                let _ = std::fs::remove_file(&trim_path);
                return error_response("Failed to write trimmed capture");
            }
        };
        if written < 2 {
            let _ = std::fs::remove_file(&trim_path);
            return error_response("Trimmed capture has no IQ data");
        }

        let bytes_per_second = (capture.sample_rate as f64 * 2.0).max(2.0);
        let trimmed_duration = written as f64 / bytes_per_second;
        let end_s = start_s + window.len() as f64 / bytes_per_second;
        let adjusted = adjust_bursts(&capture.bursts, start_s, end_s);

        let mut dominant = dominant_fingerprint(&adjusted);
        if dominant.is_empty() {
            dominant = capture.dominant_fingerprint.clone();
        }
        let (modulation_hint, modulation_confidence) =
            intercept_core::analytics::modulation_from_bursts(&adjusted)
                .unwrap_or((capture.modulation_hint.clone(), capture.modulation_confidence));
        let protocol_hint =
            capture::protocol_hint(capture.frequency_hz, &modulation_hint, adjusted.len());
        let (capture_label, label_source) = trim_label(
            label,
            &capture.label,
            capture.frequency_hz,
            adjusted.len(),
            &modulation_hint,
            &protocol_hint,
        );

        let trimmed = Capture {
            capture_id: Uuid::new_v4().simple().to_string()[..12].to_string(),
            filename: trim_name,
            frequency_hz: capture.frequency_hz,
            sample_rate: capture.sample_rate,
            lna_gain: capture.lna_gain,
            vga_gain: capture.vga_gain,
            timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            duration_seconds: round3(trimmed_duration),
            size_bytes: written,
            label: capture_label,
            label_source: label_source.to_string(),
            decoded_protocols: capture.decoded_protocols.clone(),
            bursts: adjusted,
            modulation_hint,
            modulation_confidence: round3(modulation_confidence),
            protocol_hint,
            dominant_fingerprint: dominant,
            fingerprint_group: String::new(),
            fingerprint_group_size: 0,
            trigger_enabled: false,
            trigger_pre_seconds: 0.0,
            trigger_post_seconds: 0.0,
        };

        if let Err(e) = self.write_sidecar(&trimmed) {
            error!("Failed to write trimmed capture metadata: {e}");
            let _ = std::fs::remove_file(self.captures_dir.join(&trimmed.filename));
            return error_response("Failed to write trimmed capture metadata");
        }

        json!({
            "status": "ok",
            "capture": trimmed,
            "source_capture_id": capture_id,
            "segment": {
                "start_seconds": round3(start_s),
                "duration_seconds": round3(trimmed_duration),
                "auto_selected": auto_selected,
            },
        })
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::config::Constants;
    use intercept_core::analytics::Burst;
    use std::sync::Arc;

    fn manager() -> (Arc<SubGhzManager>, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = SubGhzManager::new(
            EventBus::new(100),
            Constants::from_env(),
            dir.path().join("captures"),
        );
        (manager, dir)
    }

    fn write_capture(
        manager: &SubGhzManager,
        id: &str,
        seconds: f64,
        sample_rate: u32,
        bursts: Vec<Burst>,
        fingerprint: &str,
    ) -> Capture {
        let filename = format!("{id}.iq");
        let bytes = (seconds * sample_rate as f64 * 2.0) as usize;
        std::fs::write(manager.captures_dir.join(&filename), vec![0u8; bytes]).unwrap();
        let capture = Capture {
            capture_id: id.to_string(),
            filename,
            frequency_hz: 433_920_000,
            sample_rate,
            lna_gain: 32,
            vga_gain: 20,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            duration_seconds: seconds,
            size_bytes: bytes as u64,
            label: "Remote A".to_string(),
            label_source: "auto".to_string(),
            decoded_protocols: Vec::new(),
            bursts,
            modulation_hint: "OOK/ASK".to_string(),
            modulation_confidence: 0.8,
            protocol_hint: String::new(),
            dominant_fingerprint: fingerprint.to_string(),
            fingerprint_group: String::new(),
            fingerprint_group_size: 0,
            trigger_enabled: false,
            trigger_pre_seconds: 0.0,
            trigger_post_seconds: 0.0,
        };
        manager.write_sidecar(&capture).unwrap();
        capture
    }

    fn burst(start: f64, duration: f64, peak: u32, fp: &str) -> Burst {
        Burst {
            start_seconds: start,
            duration_seconds: duration,
            peak_level: peak,
            fingerprint: fp.to_string(),
            modulation_hint: "OOK/ASK".to_string(),
            modulation_confidence: 0.7,
        }
    }

    #[test]
    fn listing_groups_same_fingerprint() {
        let (manager, _dir) = manager();
        write_capture(&manager, "aaa111", 1.0, 100_000, vec![], "deadbeefcafebabe");
        write_capture(&manager, "bbb222", 1.0, 100_000, vec![], "deadbeefcafebabe");
        let captures = manager.list_captures();
        assert_eq!(captures.len(), 2);
        for capture in &captures {
            assert_eq!(capture.fingerprint_group, "SIG-DEADBE");
            assert_eq!(capture.fingerprint_group_size, 2);
        }
    }

    #[test]
    fn delete_removes_both_halves() {
        let (manager, _dir) = manager();
        let capture = write_capture(&manager, "gone01", 0.5, 100_000, vec![], "");
        assert!(manager.delete_capture("gone01"));
        assert!(!manager.captures_dir.join(&capture.filename).exists());
        assert!(!manager.sidecar_path_for(&capture).exists());
        assert!(!manager.delete_capture("gone01"));
    }

    #[test]
    fn label_update_marks_manual() {
        let (manager, _dir) = manager();
        write_capture(&manager, "lbl001", 0.5, 100_000, vec![], "");
        assert!(manager.update_capture_label("lbl001", "Garage door"));
        let capture = manager.get_capture("lbl001").unwrap();
        assert_eq!(capture.label, "Garage door");
        assert_eq!(capture.label_source, "manual");
    }

    #[tokio::test]
    async fn trim_with_window_produces_even_sized_capture() {
        let (manager, _dir) = manager();
        write_capture(
            &manager,
            "trim01",
            2.0,
            100_000,
            vec![burst(0.5, 0.2, 60, "feedface00112233")],
            "",
        );
        let result = manager.trim_capture("trim01", Some(0.4), Some(0.5), "").await;
        assert_eq!(result["status"], "ok", "{result}");
        let size = result["capture"]["size_bytes"].as_u64().unwrap();
        assert_eq!(size % 2, 0);
        assert!(size <= (0.5f64 * 100_000.0 * 2.0).ceil() as u64);
        // Burst re-based into the window.
        let bursts = result["capture"]["bursts"].as_array().unwrap();
        assert_eq!(bursts.len(), 1);
        let start = bursts[0]["start_seconds"].as_f64().unwrap();
        assert!((start - 0.1).abs() < 0.01, "start {start}");
        // Label derives from the source with a Trim suffix.
        assert_eq!(result["capture"]["label"], "Remote A (Trim)");
        assert_eq!(result["capture"]["label_source"], "auto");

        // The new capture is a real library member now.
        let id = result["capture"]["id"].as_str().unwrap();
        assert!(manager.get_capture(id).is_some());
        assert!(manager.capture_iq_path(id).is_some());
    }

    #[tokio::test]
    async fn auto_trim_picks_strongest_burst() {
        let (manager, _dir) = manager();
        write_capture(
            &manager,
            "trim02",
            2.0,
            100_000,
            vec![
                burst(0.2, 0.1, 30, "a"),
                burst(1.0, 0.1, 90, "b"),
            ],
            "",
        );
        let result = manager.trim_capture("trim02", None, None, "").await;
        assert_eq!(result["status"], "ok", "{result}");
        assert_eq!(result["segment"]["auto_selected"], true);
        let start = result["segment"]["start_seconds"].as_f64().unwrap();
        assert!((start - 0.94).abs() < 0.01, "start {start}");
    }

    #[tokio::test]
    async fn auto_trim_without_bursts_is_refused() {
        let (manager, _dir) = manager();
        write_capture(&manager, "trim03", 1.0, 100_000, vec![], "");
        let result = manager.trim_capture("trim03", None, None, "").await;
        assert_eq!(result["status"], "error");
        assert!(result["message"]
            .as_str()
            .unwrap()
            .contains("No burst markers"));
    }

    #[tokio::test]
    async fn trim_validates_window() {
        let (manager, _dir) = manager();
        write_capture(&manager, "trim04", 1.0, 100_000, vec![], "");
        let beyond = manager.trim_capture("trim04", Some(5.0), Some(1.0), "").await;
        assert_eq!(beyond["status"], "error");
        let zero = manager.trim_capture("trim04", Some(0.0), Some(0.0), "").await;
        assert_eq!(zero["status"], "error");
        let missing = manager.trim_capture("nope", Some(0.0), Some(1.0), "").await;
        assert_eq!(missing["status"], "error");
    }
}
