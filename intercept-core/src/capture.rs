//! SubGHz capture library model.
//!
//! A capture is an IQ file (`*.iq`, complex-int8 interleaved) plus a
//! JSON sidecar (`*.json`, matching stem). The sidecar carries the
//! acquisition parameters, burst markers and derived labels. This
//! module owns the sidecar schema and all the pure math around it:
//! trim-window planning, burst adjustment, fingerprint grouping and
//! label/hint derivation. File copying lives in the server crate.

use crate::analytics::Burst;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sidecar metadata for a saved IQ capture.
///
/// Serialized with `id` as the wire name for `capture_id`, matching the
/// on-disk format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    #[serde(rename = "id")]
    pub capture_id: String,
    pub filename: String,
    pub frequency_hz: u64,
    pub sample_rate: u32,
    #[serde(default)]
    pub lna_gain: u32,
    #[serde(default)]
    pub vga_gain: u32,
    pub timestamp: String,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub label_source: String,
    #[serde(default)]
    pub decoded_protocols: Vec<String>,
    #[serde(default)]
    pub bursts: Vec<Burst>,
    #[serde(default)]
    pub modulation_hint: String,
    #[serde(default)]
    pub modulation_confidence: f64,
    #[serde(default)]
    pub protocol_hint: String,
    #[serde(default)]
    pub dominant_fingerprint: String,
    #[serde(default)]
    pub fingerprint_group: String,
    #[serde(default)]
    pub fingerprint_group_size: usize,
    #[serde(default)]
    pub trigger_enabled: bool,
    #[serde(default)]
    pub trigger_pre_seconds: f64,
    #[serde(default)]
    pub trigger_post_seconds: f64,
}

impl Capture {
    /// Estimated duration, preferring the recorded value and falling
    /// back to the file size at 2 bytes per complex sample.
    pub fn estimated_duration_seconds(&self, file_size: u64) -> f64 {
        if self.duration_seconds > 0.0 {
            return self.duration_seconds;
        }
        if self.sample_rate > 0 && file_size > 0 {
            return file_size as f64 / (self.sample_rate as f64 * 2.0);
        }
        0.0
    }
}

/// The most frequent burst fingerprint, if any.
pub fn dominant_fingerprint(bursts: &[Burst]) -> String {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for burst in bursts {
        let fp = burst.fingerprint.trim();
        if !fp.is_empty() {
            *counts.entry(fp).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(fp, _)| fp.to_string())
        .unwrap_or_default()
}

/// Tag captures sharing a dominant fingerprint with a common group id
/// (`SIG-` + first six hex digits, uppercased) and the group size.
/// This is the basis of "likely same remote/button" clustering.
pub fn assign_fingerprint_groups(captures: &mut [Capture]) {
    for capture in captures.iter_mut() {
        if capture.dominant_fingerprint.is_empty() {
            capture.dominant_fingerprint = dominant_fingerprint(&capture.bursts);
        }
    }

    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, capture) in captures.iter().enumerate() {
        let fp = capture.dominant_fingerprint.trim().to_lowercase();
        if !fp.is_empty() {
            groups.entry(fp).or_default().push(index);
        }
    }
    for (fp, members) in groups {
        let group_id = format!("SIG-{}", fp[..fp.len().min(6)].to_uppercase());
        let size = members.len();
        for index in members {
            captures[index].fingerprint_group = group_id.clone();
            captures[index].fingerprint_group_size = size;
        }
    }
}

/// Protocol family guess from acquisition frequency, modulation hint
/// and burst count.
pub fn protocol_hint(frequency_hz: u64, modulation_hint: &str, burst_count: usize) -> String {
    let freq = frequency_hz as f64 / 1_000_000.0;
    let modulation = modulation_hint.to_uppercase();
    if burst_count == 0 {
        return "No burst activity".to_string();
    }
    if (433.70..=434.10).contains(&freq) && modulation.contains("OOK") && burst_count >= 2 {
        return "Likely weather sensor / simple remote telemetry".to_string();
    }
    if (868.0..=870.0).contains(&freq) && modulation.contains("OOK") {
        return "Likely EU ISM OOK sensor/remote".to_string();
    }
    if (902.0..=928.0).contains(&freq) && modulation.contains("FSK") {
        return "Likely ISM telemetry (FSK/GFSK)".to_string();
    }
    if modulation.contains("PWM") {
        return "Likely pulse-width/distance keyed remote".to_string();
    }
    if modulation.contains("FSK") {
        return "Likely continuous-tone telemetry".to_string();
    }
    if modulation.contains("OOK") {
        return "Likely OOK keyed burst transmitter".to_string();
    }
    "Unknown protocol family".to_string()
}

/// Auto label composed from frequency, burst count and modulation.
pub fn auto_label(
    frequency_hz: u64,
    burst_count: usize,
    modulation_hint: &str,
    protocol_hint: &str,
) -> String {
    let freq = frequency_hz as f64 / 1_000_000.0;
    let modulation = modulation_hint.to_uppercase();
    if burst_count == 0 {
        return format!("Raw Capture {freq:.3} MHz");
    }
    if protocol_hint.to_lowercase().contains("weather") {
        return format!("Weather-like Burst ({burst_count})");
    }
    if modulation.contains("OOK") {
        return format!("OOK Burst Cluster ({burst_count})");
    }
    if modulation.contains("FSK") {
        return format!("FSK Telemetry Burst ({burst_count})");
    }
    if modulation.contains("PWM") {
        return format!("PWM/PPM Burst ({burst_count})");
    }
    format!("RF Burst Capture ({burst_count})")
}

/// A planned byte window into an IQ file, aligned down to even offsets
/// (two bytes per complex sample).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteWindow {
    pub start_byte: u64,
    pub end_byte: u64,
}

impl ByteWindow {
    pub fn len(&self) -> u64 {
        self.end_byte - self.start_byte
    }

    pub fn is_empty(&self) -> bool {
        self.end_byte <= self.start_byte
    }
}

/// Plan a byte window for `[start_s, start_s + duration_s)` clamped to
/// the total duration. `duration_s = None` extends to the end.
pub fn plan_window(
    sample_rate: u32,
    total_duration_s: f64,
    start_s: f64,
    duration_s: Option<f64>,
) -> Result<ByteWindow, CoreError> {
    if let Some(d) = duration_s {
        if d <= 0.0 {
            return Err(CoreError::NonPositiveDuration);
        }
    }
    let start_s = start_s.max(0.0);
    if start_s >= total_duration_s {
        return Err(CoreError::StartBeyondEnd);
    }
    let end_s = match duration_s {
        Some(d) => (start_s + d).min(total_duration_s),
        None => total_duration_s,
    };
    if end_s <= start_s {
        return Err(CoreError::EmptySegment);
    }

    let bytes_per_second = (sample_rate as u64 * 2).max(2);
    let start_byte = ((start_s * bytes_per_second as f64) as u64) & !1;
    let end_byte = ((end_s * bytes_per_second as f64) as u64) & !1;
    if end_byte <= start_byte {
        return Err(CoreError::EmptySegment);
    }
    Ok(ByteWindow {
        start_byte,
        end_byte,
    })
}

/// Pick the strongest burst (peak level, ties by duration) and pad it
/// by `pad_s` on both sides. Used when a trim request names no window.
pub fn strongest_burst_window(
    bursts: &[Burst],
    total_duration_s: f64,
    pad_s: f64,
) -> Result<(f64, f64), CoreError> {
    let best = bursts
        .iter()
        .filter(|b| b.duration_seconds > 0.0)
        .max_by(|a, b| {
            (a.peak_level, a.duration_seconds)
                .partial_cmp(&(b.peak_level, b.duration_seconds))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or(CoreError::NoBurstMarkers)?;

    let start = (best.start_seconds - pad_s).max(0.0);
    let end = (best.start_seconds + best.duration_seconds + pad_s).min(total_duration_s);
    Ok((start, (end - start).max(0.0)))
}

/// Shift burst markers into a trim window, keeping overlapping bursts
/// clipped to the window and re-basing their start times.
pub fn adjust_bursts(bursts: &[Burst], start_s: f64, end_s: f64) -> Vec<Burst> {
    let mut adjusted = Vec::new();
    for burst in bursts {
        let burst_start = burst.start_seconds.max(0.0);
        let burst_end = burst_start + burst.duration_seconds.max(0.0);
        let overlap_start = start_s.max(burst_start);
        let overlap_end = end_s.min(burst_end);
        if overlap_end - overlap_start <= 0.0 {
            continue;
        }
        let mut clipped = burst.clone();
        clipped.start_seconds = round3(overlap_start - start_s);
        clipped.duration_seconds = round3(overlap_end - overlap_start);
        adjusted.push(clipped);
    }
    adjusted
}

/// Label for a trimmed capture: manual label wins, else the source
/// label with a `(Trim)` suffix, else a fresh auto label.
pub fn trim_label(
    manual: &str,
    source_label: &str,
    frequency_hz: u64,
    burst_count: usize,
    modulation_hint: &str,
    protocol_hint: &str,
) -> (String, &'static str) {
    let manual = manual.trim();
    if !manual.is_empty() {
        return (manual.to_string(), "manual");
    }
    if !source_label.is_empty() {
        return (format!("{source_label} (Trim)"), "auto");
    }
    (
        format!(
            "{} (Trim)",
            auto_label(frequency_hz, burst_count, modulation_hint, protocol_hint)
        ),
        "auto",
    )
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(start: f64, duration: f64, peak: u32, fp: &str) -> Burst {
        Burst {
            start_seconds: start,
            duration_seconds: duration,
            peak_level: peak,
            fingerprint: fp.to_string(),
            modulation_hint: String::new(),
            modulation_confidence: 0.0,
        }
    }

    fn capture(id: &str, fp: &str) -> Capture {
        Capture {
            capture_id: id.to_string(),
            filename: format!("{id}.iq"),
            frequency_hz: 433_920_000,
            sample_rate: 2_000_000,
            lna_gain: 32,
            vga_gain: 20,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            duration_seconds: 2.0,
            size_bytes: 8_000_000,
            label: String::new(),
            label_source: String::new(),
            decoded_protocols: Vec::new(),
            bursts: Vec::new(),
            modulation_hint: String::new(),
            modulation_confidence: 0.0,
            protocol_hint: String::new(),
            dominant_fingerprint: fp.to_string(),
            fingerprint_group: String::new(),
            fingerprint_group_size: 0,
            trigger_enabled: false,
            trigger_pre_seconds: 0.0,
            trigger_post_seconds: 0.0,
        }
    }

    #[test]
    fn sidecar_round_trips_with_id_field() {
        let c = capture("abc123", "deadbeefcafebabe");
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["id"], "abc123");
        let back: Capture = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn dominant_fingerprint_picks_most_frequent() {
        let bursts = vec![
            burst(0.0, 0.1, 40, "aaaa"),
            burst(0.5, 0.1, 40, "bbbb"),
            burst(1.0, 0.1, 40, "bbbb"),
            burst(1.5, 0.1, 40, ""),
        ];
        assert_eq!(dominant_fingerprint(&bursts), "bbbb");
        assert_eq!(dominant_fingerprint(&[]), "");
    }

    #[test]
    fn fingerprint_groups_cluster_same_remote() {
        let mut captures = vec![
            capture("one", "deadbeefcafebabe"),
            capture("two", "deadbeefcafebabe"),
            capture("three", "0123456789abcdef"),
            capture("four", ""),
        ];
        assign_fingerprint_groups(&mut captures);
        assert_eq!(captures[0].fingerprint_group, "SIG-DEADBE");
        assert_eq!(captures[0].fingerprint_group_size, 2);
        assert_eq!(captures[1].fingerprint_group, "SIG-DEADBE");
        assert_eq!(captures[2].fingerprint_group, "SIG-012345");
        assert_eq!(captures[2].fingerprint_group_size, 1);
        assert_eq!(captures[3].fingerprint_group, "");
    }

    #[test]
    fn grouping_derives_missing_dominant_fingerprint() {
        let mut c = capture("one", "");
        c.bursts = vec![burst(0.0, 0.1, 40, "feedface00112233")];
        let mut captures = vec![c];
        assign_fingerprint_groups(&mut captures);
        assert_eq!(captures[0].dominant_fingerprint, "feedface00112233");
        assert_eq!(captures[0].fingerprint_group, "SIG-FEEDFA");
    }

    #[test]
    fn protocol_hints_follow_band_rules() {
        assert_eq!(protocol_hint(433_920_000, "OOK/ASK", 0), "No burst activity");
        assert_eq!(
            protocol_hint(433_920_000, "OOK/ASK", 3),
            "Likely weather sensor / simple remote telemetry"
        );
        assert_eq!(
            protocol_hint(868_300_000, "OOK/ASK", 1),
            "Likely EU ISM OOK sensor/remote"
        );
        assert_eq!(
            protocol_hint(915_000_000, "FSK/GFSK", 1),
            "Likely ISM telemetry (FSK/GFSK)"
        );
        assert_eq!(
            protocol_hint(300_000_000, "PWM/PPM", 1),
            "Likely pulse-width/distance keyed remote"
        );
        assert_eq!(protocol_hint(300_000_000, "", 1), "Unknown protocol family");
    }

    #[test]
    fn auto_labels() {
        assert_eq!(auto_label(433_920_000, 0, "", ""), "Raw Capture 433.920 MHz");
        assert_eq!(
            auto_label(433_920_000, 3, "OOK/ASK", "Likely weather sensor / simple remote telemetry"),
            "Weather-like Burst (3)"
        );
        assert_eq!(auto_label(315_000_000, 2, "FSK/GFSK", ""), "FSK Telemetry Burst (2)");
        assert_eq!(auto_label(315_000_000, 2, "", ""), "RF Burst Capture (2)");
    }

    #[test]
    fn window_is_even_and_clamped() {
        let window = plan_window(2_000_000, 10.0, 1.0, Some(2.0)).unwrap();
        assert_eq!(window.start_byte % 2, 0);
        assert_eq!(window.end_byte % 2, 0);
        assert_eq!(window.len(), 8_000_000);

        // Clamp past the end.
        let clamped = plan_window(2_000_000, 1.0, 0.5, Some(5.0)).unwrap();
        assert_eq!(clamped.end_byte, 4_000_000);

        // Property: window length never exceeds ceil(duration * sr * 2)
        // and is even.
        let w = plan_window(2_000_000, 10.0, 0.1234567, Some(0.333)).unwrap();
        assert!(w.len() <= (0.333f64 * 2_000_000.0 * 2.0).ceil() as u64);
        assert_eq!(w.len() % 2, 0);
    }

    #[test]
    fn window_rejects_bad_inputs() {
        assert!(matches!(
            plan_window(2_000_000, 10.0, 12.0, Some(1.0)),
            Err(CoreError::StartBeyondEnd)
        ));
        assert!(matches!(
            plan_window(2_000_000, 10.0, 0.0, Some(0.0)),
            Err(CoreError::NonPositiveDuration)
        ));
    }

    #[test]
    fn strongest_burst_selection() {
        let bursts = vec![
            burst(1.0, 0.2, 50, "a"),
            burst(3.0, 0.1, 80, "b"),
            burst(5.0, 0.3, 80, "c"),
        ];
        // Peak ties broken by duration: burst at 5.0 wins.
        let (start, duration) = strongest_burst_window(&bursts, 10.0, 0.06).unwrap();
        assert!((start - 4.94).abs() < 1e-9);
        assert!((duration - 0.42).abs() < 1e-9);

        assert!(matches!(
            strongest_burst_window(&[], 10.0, 0.06),
            Err(CoreError::NoBurstMarkers)
        ));
    }

    #[test]
    fn burst_adjustment_rebases_and_drops() {
        let bursts = vec![
            burst(0.5, 0.2, 40, "a"),  // before window
            burst(2.0, 0.4, 50, "b"),  // inside
            burst(2.9, 0.4, 60, "c"),  // straddles the end
        ];
        let adjusted = adjust_bursts(&bursts, 1.5, 3.0);
        assert_eq!(adjusted.len(), 2);
        assert!((adjusted[0].start_seconds - 0.5).abs() < 1e-9);
        assert!((adjusted[0].duration_seconds - 0.4).abs() < 1e-9);
        assert!((adjusted[1].start_seconds - 1.4).abs() < 1e-9);
        assert!((adjusted[1].duration_seconds - 0.1).abs() < 1e-9);

        // Invariant: adjusted bursts stay within the window.
        for b in &adjusted {
            assert!(b.start_seconds >= 0.0);
            assert!(b.start_seconds + b.duration_seconds <= 1.5 + 1e-9);
        }
    }

    #[test]
    fn trim_label_precedence() {
        assert_eq!(
            trim_label("My remote", "Old", 0, 0, "", ""),
            ("My remote".to_string(), "manual")
        );
        assert_eq!(
            trim_label("", "Old", 0, 0, "", ""),
            ("Old (Trim)".to_string(), "auto")
        );
        let (label, source) = trim_label("", "", 433_920_000, 0, "", "");
        assert_eq!(label, "Raw Capture 433.920 MHz (Trim)");
        assert_eq!(source, "auto");
    }
}
