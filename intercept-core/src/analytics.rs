//! SubGHz IQ analytics.
//!
//! Everything here operates on raw HackRF chunks: interleaved
//! complex-int8 samples (I,Q,I,Q,...), two bytes per complex sample.
//! The functions are pure so the RX and decode pipelines can share them
//! and the burst machinery is testable from synthetic chunks.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Default chunk size the readers feed us: 256 KB (~64 ms at 2 Msps).
pub const ANALYSIS_CHUNK: usize = 262_144;

/// Interpolated percentile over unsorted data (NumPy semantics).
fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (pct / 100.0) * (sorted.len() - 1) as f32;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let frac = rank - low as f32;
        sorted[low] * (1.0 - frac) + sorted[high] * frac
    }
}

fn median(values: &[f32]) -> f32 {
    percentile(values, 50.0)
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Population standard deviation.
fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    (values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32).sqrt()
}

/// Split an interleaved cs8 chunk into I and Q float vectors.
fn split_iq(data: &[u8]) -> (Vec<f32>, Vec<f32>) {
    let mut i_vals = Vec::with_capacity(data.len() / 2);
    let mut q_vals = Vec::with_capacity(data.len() / 2);
    for pair in data.chunks_exact(2) {
        i_vals.push(pair[0] as i8 as f32);
        q_vals.push(pair[1] as i8 as f32);
    }
    (i_vals, q_vals)
}

fn magnitudes(i_vals: &[f32], q_vals: &[f32]) -> Vec<f32> {
    i_vals
        .iter()
        .zip(q_vals)
        .map(|(i, q)| (i * i + q * q).sqrt())
        .collect()
}

/// Gain-tolerant 0-100 signal activity score from raw IQ bytes.
///
/// The score normalises signal contrast by the local noise floor so
/// changing the LNA/VGA gain does not make the detector stick at 0 or
/// 100: low-gain bursts stay detectable and high gain is not always
/// "on".
pub fn compute_level(data: &[u8]) -> u8 {
    if data.len() < 4 {
        return 0;
    }
    let (i_vals, q_vals) = split_iq(data);
    let i_dec: Vec<f32> = i_vals.iter().step_by(4).copied().collect();
    let q_dec: Vec<f32> = q_vals.iter().step_by(4).copied().collect();
    if i_dec.is_empty() || q_dec.is_empty() {
        return 0;
    }
    let mag = magnitudes(&i_dec, &q_dec);

    let noise = percentile(&mag, 30.0);
    let signal = percentile(&mag, 90.0);
    let peak = percentile(&mag, 99.0);
    let contrast = (signal - noise).max(0.0);
    let crest = (peak - signal).max(0.0);
    let mean_mag = mean(&mag);

    let contrast_norm = contrast / (noise + 8.0).max(8.0);
    let crest_norm = crest / (signal + 8.0).max(8.0);
    let energy_norm = mean_mag / 60.0;
    let level_f = contrast_norm * 55.0 + crest_norm * 20.0 + energy_norm * 10.0;
    let level = level_f.clamp(0.0, 100.0) as u8;
    if level == 0 && contrast > 0.5 {
        1
    } else {
        level
    }
}

/// Normalised envelope waveform for UI display.
pub fn extract_waveform(data: &[u8], points: usize) -> Vec<f32> {
    if data.len() < 4 || points == 0 {
        return Vec::new();
    }
    let (i_vals, q_vals) = split_iq(data);
    let mag = magnitudes(&i_vals, &q_vals);

    let step = (mag.len() / points).max(1);
    let scoped: Vec<f32> = mag.iter().step_by(step).take(points).copied().collect();
    if scoped.is_empty() {
        return Vec::new();
    }
    let baseline = median(&scoped);
    let centered: Vec<f32> = scoped.iter().map(|v| v - baseline).collect();
    let abs_centered: Vec<f32> = centered.iter().map(|v| v.abs()).collect();
    let scale = percentile(&abs_centered, 95.0);
    if scale <= 1e-6 {
        return vec![0.0; centered.len()];
    }
    centered
        .iter()
        .map(|v| ((v / (scale * 2.5)).clamp(-1.0, 1.0) * 1000.0).round() / 1000.0)
        .collect()
}

/// Windowed FFT magnitude slice for waterfall rendering.
///
/// Maps the -60..0 dB range onto 0..255 bin values.
pub fn compute_spectrum(data: &[u8], bins: usize) -> Vec<u8> {
    if bins == 0 || data.len() < bins * 2 {
        return Vec::new();
    }
    let fft_size = bins.max(256);
    let needed = fft_size * 2;
    if data.len() < needed {
        return Vec::new();
    }

    let mut buffer: Vec<rustfft::num_complex::Complex<f32>> = data[..needed]
        .chunks_exact(2)
        .enumerate()
        .map(|(n, pair)| {
            // Hann window
            let w = 0.5
                - 0.5
                    * (2.0 * std::f32::consts::PI * n as f32 / (fft_size as f32 - 1.0)).cos();
            rustfft::num_complex::Complex::new(pair[0] as i8 as f32 * w, pair[1] as i8 as f32 * w)
        })
        .collect();

    let mut planner = rustfft::FftPlanner::<f32>::new();
    planner.plan_fft_forward(fft_size).process(&mut buffer);

    // fftshift: move DC to the center.
    let half = fft_size / 2;
    buffer.rotate_left(half);

    let mut mag_db: Vec<f32> = buffer.iter().map(|c| 20.0 * (c.norm() + 1e-6).log10()).collect();
    let max_db = mag_db.iter().cloned().fold(f32::MIN, f32::max);
    for value in &mut mag_db {
        *value -= max_db;
    }

    let scaled: Vec<u8> = mag_db
        .iter()
        .map(|db| (((db + 60.0) / 60.0).clamp(0.0, 1.0) * 255.0) as u8)
        .collect();

    if scaled.len() == bins {
        scaled
    } else {
        resample_indices(scaled.len(), bins)
            .into_iter()
            .map(|i| scaled[i])
            .collect()
    }
}

/// Indices of a linear resample from `len` points down/up to `target`.
fn resample_indices(len: usize, target: usize) -> Vec<usize> {
    if len == 0 || target == 0 {
        return Vec::new();
    }
    if target == 1 {
        return vec![0];
    }
    (0..target)
        .map(|k| ((k as f64) * (len - 1) as f64 / (target - 1) as f64) as usize)
        .collect()
}

/// Coarse modulation families the estimator can vote for.
pub const MODULATION_FAMILIES: [&str; 3] = ["OOK/ASK", "FSK/GFSK", "PWM/PPM"];

/// Empirically chosen weights for the modulation scorer. Tunable, not
/// invariant; tests pin behaviour through [`ModulationTuning::default`].
#[derive(Debug, Clone, Copy)]
pub struct ModulationTuning {
    pub ook_pulse_weight: f32,
    pub fsk_flat_amp_weight: f32,
    pub pwm_edge_weight: f32,
    pub confidence_floor: f32,
}

impl Default for ModulationTuning {
    fn default() -> Self {
        ModulationTuning {
            ook_pulse_weight: 0.35,
            fsk_flat_amp_weight: 0.45,
            pwm_edge_weight: 0.6,
            confidence_floor: 0.25,
        }
    }
}

/// Result of a modulation estimate on one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ModulationHint {
    pub family: String,
    pub confidence: f32,
    pub reason: String,
}

impl ModulationHint {
    fn unknown(reason: &str) -> Self {
        ModulationHint {
            family: "Unknown".to_string(),
            confidence: 0.0,
            reason: reason.to_string(),
        }
    }
}

/// Estimate the coarse modulation family from raw IQ characteristics.
///
/// Three features drive a weighted score: amplitude coefficient of
/// variation (OOK contrast), phase-step variance (FSK movement), and
/// envelope edge density (PWM/PPM keying).
pub fn estimate_modulation(data: &[u8], tuning: &ModulationTuning) -> ModulationHint {
    if data.is_empty() {
        return ModulationHint::unknown("No samples");
    }
    if data.len() < 2048 {
        return ModulationHint::unknown("Insufficient samples");
    }
    let (i_all, q_all) = split_iq(data);

    // Light decimation for lower CPU while preserving burst shape.
    let i_vals: Vec<f32> = i_all.iter().step_by(4).copied().collect();
    let q_vals: Vec<f32> = q_all.iter().step_by(4).copied().collect();
    if i_vals.len() < 256 || q_vals.len() < 256 {
        return ModulationHint::unknown("Short frame");
    }

    let amp = magnitudes(&i_vals, &q_vals);
    let mean_amp = mean(&amp);
    let std_amp = std_dev(&amp);
    let amp_cv = std_amp / mean_amp.max(1.0);

    let phase_steps: Vec<f32> = (1..i_vals.len())
        .map(|n| {
            // angle of iq[n] * conj(iq[n-1])
            let re = i_vals[n] * i_vals[n - 1] + q_vals[n] * q_vals[n - 1];
            let im = q_vals[n] * i_vals[n - 1] - i_vals[n] * q_vals[n - 1];
            im.atan2(re)
        })
        .collect();
    let phase_var = std_dev(&phase_steps);

    // Simple pulse run-length profile on the envelope.
    let env_median = median(&amp);
    let envelope: Vec<f32> = amp.iter().map(|a| a - env_median).collect();
    let env_abs: Vec<f32> = envelope.iter().map(|v| v.abs()).collect();
    let env_scale = percentile(&env_abs, 92.0);
    let (pulse_density, mean_run) = if env_scale <= 1e-6 {
        (0.0, 0.0)
    } else {
        let high: Vec<bool> = envelope
            .iter()
            .map(|v| (v / env_scale).clamp(-1.0, 1.0) > 0.25)
            .collect();
        let density = high.iter().filter(|h| **h).count() as f32 / high.len() as f32;
        let changes: Vec<usize> = high
            .windows(2)
            .enumerate()
            .filter(|(_, w)| w[0] != w[1])
            .map(|(i, _)| i)
            .collect();
        let run = if changes.len() >= 2 {
            let mut edges = Vec::with_capacity(changes.len() + 2);
            edges.push(0usize);
            edges.extend(&changes);
            edges.push(high.len() - 1);
            let runs: Vec<f32> = edges.windows(2).map(|w| (w[1] - w[0]) as f32).collect();
            mean(&runs)
        } else {
            high.len() as f32
        };
        (density, run)
    };

    let mut scores: HashMap<&'static str, f32> = HashMap::new();

    // OOK: stronger amplitude contrast and moderate pulse occupancy.
    let mut ook = ((amp_cv - 0.22) / 0.35).clamp(0.0, 1.0);
    ook += (1.0 - ((pulse_density - 0.4).abs() / 0.4)).max(0.0) * tuning.ook_pulse_weight;
    scores.insert("OOK/ASK", ook);

    // FSK: flatter amplitude, more phase movement.
    let mut fsk = ((phase_var - 0.45) / 0.9).clamp(0.0, 1.0);
    fsk += ((0.33 - amp_cv) / 0.28).clamp(0.0, 1.0) * tuning.fsk_flat_amp_weight;
    scores.insert("FSK/GFSK", fsk);

    // PWM/PPM: high edge density with short run lengths.
    let edge_density = if mean_run <= 0.0 {
        0.0
    } else {
        (28.0 / mean_run.max(1.0)).min(1.0)
    };
    let mut pwm = ((amp_cv - 0.28) / 0.45).clamp(0.0, 1.0);
    pwm += edge_density * tuning.pwm_edge_weight;
    scores.insert("PWM/PPM", pwm);

    let (best_family, best_score) = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(k, v)| (*k, *v))
        .unwrap_or(("Unknown", 0.0));

    let confidence = best_score.clamp(0.0, 0.97);
    if confidence < tuning.confidence_floor {
        return ModulationHint {
            family: "Unknown".to_string(),
            confidence,
            reason: "No clear modulation signature".to_string(),
        };
    }

    ModulationHint {
        family: best_family.to_string(),
        confidence,
        reason: format!(
            "amp_cv={amp_cv:.2} phase_var={phase_var:.2} pulse_density={pulse_density:.2}"
        ),
    }
}

/// Stable burst fingerprint for grouping similar signals.
///
/// Resamples the burst envelope to 128 points, normalises by the 95th
/// percentile amplitude, quantises to 4 bits, appends coarse duration
/// and sample-rate traits, and hashes with SHA-1 truncated to 16 hex
/// characters.
pub fn fingerprint_burst(data: &[u8], sample_rate: u32, duration_seconds: f64) -> String {
    if data.len() < 512 {
        return String::new();
    }
    let (i_vals, q_vals) = split_iq(data);
    let mut amp = magnitudes(&i_vals, &q_vals);
    if amp.len() < 64 {
        return String::new();
    }

    let baseline = median(&amp);
    for value in &mut amp {
        *value -= baseline;
    }
    let abs_amp: Vec<f32> = amp.iter().map(|v| v.abs()).collect();
    let mut scale = percentile(&abs_amp, 95.0);
    if scale <= 1e-6 {
        scale = 1.0;
    }
    for value in &mut amp {
        *value = (*value / scale).clamp(-1.0, 1.0);
    }

    const TARGET: usize = 128;
    let resampled: Vec<f32> = if amp.len() == TARGET {
        amp
    } else {
        resample_indices(amp.len(), TARGET)
            .into_iter()
            .map(|i| amp[i])
            .collect()
    };
    let quant: Vec<u8> = resampled
        .iter()
        .map(|v| ((v + 1.0) * 7.5).round() as u8)
        .collect();

    let burst_ms = ((duration_seconds * 1000.0).round().max(1.0) as u64).min(u16::MAX as u64) as u16;
    let sr_khz = (((sample_rate as f64) / 1000.0).round().max(1.0) as u64).min(u16::MAX as u64) as u16;

    let mut hasher = Sha1::new();
    hasher.update(&quant);
    hasher.update(burst_ms.to_le_bytes());
    hasher.update(sr_khz.to_le_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// A finalised burst marker, relative to capture start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub peak_level: u32,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub modulation_hint: String,
    #[serde(default)]
    pub modulation_confidence: f64,
}

/// Burst detector transitions reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum BurstEvent {
    Started { start_offset_s: f64, level: u32 },
    Ended { start_offset_s: f64, duration_s: f64, peak_level: u32 },
}

/// Hysteresis burst segmentation over the smoothed level signal.
///
/// Maintains an EMA noise floor (updated only outside bursts), a
/// decaying peak tracker, and adaptive on/off thresholds:
/// `on = noise + max(2.8, 0.52*spread)`, `off = noise + max(1.2,
/// 0.24*spread)`, with an off-hold of 180 ms and a 40 ms minimum burst
/// duration. Time is injected by the caller (seconds since capture
/// start) so the machine is deterministic under test.
#[derive(Debug)]
pub struct BurstDetector {
    off_hold_s: f64,
    min_duration_s: f64,
    warmup_until_s: f64,
    smooth: f64,
    prev_smooth: f64,
    noise_floor: f64,
    peak_tracker: f64,
    burst_active: bool,
    burst_start: f64,
    burst_last_high: f64,
    burst_peak: u32,
}

impl BurstDetector {
    pub fn new(warmup_s: f64) -> Self {
        BurstDetector {
            off_hold_s: 0.18,
            min_duration_s: 0.04,
            warmup_until_s: warmup_s,
            smooth: 0.0,
            prev_smooth: 0.0,
            noise_floor: 0.0,
            peak_tracker: 0.0,
            burst_active: false,
            burst_start: 0.0,
            burst_last_high: 0.0,
            burst_peak: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.burst_active
    }

    pub fn smooth_level(&self) -> f64 {
        self.smooth
    }

    pub fn noise_floor(&self) -> f64 {
        self.noise_floor
    }

    pub fn on_threshold(&self) -> f64 {
        let spread = (self.peak_tracker - self.noise_floor).max(2.0);
        (self.noise_floor + (spread * 0.52).max(2.8)).min(95.0)
    }

    fn off_threshold(&self, on_threshold: f64) -> f64 {
        let spread = (self.peak_tracker - self.noise_floor).max(2.0);
        (self.noise_floor + (spread * 0.24).max(1.2))
            .min(on_threshold - 0.5)
            .max(0.8)
    }

    /// Feed one level sample taken at `now_s` seconds since start.
    pub fn update(&mut self, now_s: f64, level: f64) -> Option<BurstEvent> {
        self.prev_smooth = self.smooth;
        if self.smooth <= 0.0 {
            self.smooth = level;
        } else {
            self.smooth = self.smooth * 0.72 + level * 0.28;
        }

        if self.noise_floor <= 0.0 {
            self.noise_floor = self.smooth;
        } else if !self.burst_active {
            // Track the receiver noise floor only when outside a burst.
            self.noise_floor = self.noise_floor * 0.94 + self.smooth * 0.06;
        }

        self.peak_tracker = self.smooth.max(self.peak_tracker * 0.985);
        let on_threshold = self.on_threshold();
        let off_threshold = self.off_threshold(on_threshold);
        let rising = self.smooth - self.prev_smooth;

        if !self.burst_active {
            if now_s >= self.warmup_until_s && self.smooth >= on_threshold && rising >= 0.35 {
                self.burst_active = true;
                self.burst_start = now_s;
                self.burst_last_high = now_s;
                self.burst_peak = self.smooth.round() as u32;
                return Some(BurstEvent::Started {
                    start_offset_s: now_s.max(0.0),
                    level: self.burst_peak,
                });
            }
            return None;
        }

        if self.smooth >= off_threshold {
            self.burst_last_high = now_s;
            self.burst_peak = self.burst_peak.max(self.smooth.round() as u32);
            return None;
        }

        if now_s - self.burst_last_high >= self.off_hold_s {
            let duration = now_s - self.burst_start;
            let start = self.burst_start;
            let peak = self.burst_peak;
            self.burst_active = false;
            self.burst_peak = 0;
            if duration >= self.min_duration_s {
                return Some(BurstEvent::Ended {
                    start_offset_s: start.max(0.0),
                    duration_s: duration,
                    peak_level: peak,
                });
            }
        }
        None
    }

    /// Close out a burst that is still open at end of capture.
    pub fn finish(&mut self, now_s: f64) -> Option<BurstEvent> {
        if !self.burst_active {
            return None;
        }
        let duration = (now_s - self.burst_start).max(0.0);
        let start = self.burst_start;
        let peak = self.burst_peak;
        self.burst_active = false;
        self.burst_peak = 0;
        if duration >= self.min_duration_s {
            Some(BurstEvent::Ended {
                start_offset_s: start.max(0.0),
                duration_s: duration,
                peak_level: peak,
            })
        } else {
            None
        }
    }
}

/// Exponentially-decayed accumulator of per-family modulation votes.
///
/// Chunk hints decay at 0.97 per evaluation; burst-end hints weigh in
/// at 1.8x. The reported confidence is the best family's share of the
/// total score, capped at 0.98.
#[derive(Debug, Default)]
pub struct HintAccumulator {
    scores: HashMap<&'static str, f64>,
    last_reason: String,
}

impl HintAccumulator {
    pub fn new() -> Self {
        let mut scores = HashMap::new();
        for family in MODULATION_FAMILIES {
            scores.insert(family, 0.0);
        }
        HintAccumulator {
            scores,
            last_reason: String::new(),
        }
    }

    fn family_key(family: &str) -> Option<&'static str> {
        MODULATION_FAMILIES.iter().find(|f| **f == family).copied()
    }

    pub fn add_chunk_hint(&mut self, hint: &ModulationHint) {
        for value in self.scores.values_mut() {
            *value *= 0.97;
        }
        if let Some(key) = Self::family_key(&hint.family) {
            *self.scores.entry(key).or_default() += (hint.confidence as f64).max(0.05);
            self.last_reason = hint.reason.clone();
        }
    }

    pub fn add_burst_hint(&mut self, hint: &ModulationHint) {
        if hint.confidence <= 0.0 {
            return;
        }
        if let Some(key) = Self::family_key(&hint.family) {
            *self.scores.entry(key).or_default() += hint.confidence as f64 * 1.8;
            self.last_reason = hint.reason.clone();
        }
    }

    /// Best family with its normalised confidence.
    pub fn best(&self) -> (String, f64) {
        let total: f64 = self.scores.values().map(|v| v.max(0.0)).sum();
        let (family, score) = self
            .scores
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(k, v)| (*k, v.max(0.0)))
            .unwrap_or(("Unknown", 0.0));
        let confidence = if total <= 0.0 {
            0.0
        } else {
            (score / total).min(0.98)
        };
        (family.to_string(), confidence)
    }

    pub fn last_reason(&self) -> &str {
        &self.last_reason
    }
}

/// Derive a capture-level modulation summary from its burst markers,
/// used when the live accumulator never reached confidence.
pub fn modulation_from_bursts(bursts: &[Burst]) -> Option<(String, f64)> {
    let mut totals: HashMap<String, f64> = HashMap::new();
    for burst in bursts {
        let name = burst.modulation_hint.trim();
        if name.is_empty() || name.eq_ignore_ascii_case("unknown") {
            continue;
        }
        *totals.entry(name.to_string()).or_default() += burst.modulation_confidence.max(0.05);
    }
    let total: f64 = totals.values().sum();
    let (family, score) = totals
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    Some((family, (score / total.max(0.001)).min(0.98)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Interleave a constant-amplitude IQ tone.
    fn tone_chunk(amplitude: i8, len: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(len * 2);
        for n in 0..len {
            let phase = n as f32 * 0.3;
            data.push((amplitude as f32 * phase.cos()) as i8 as u8);
            data.push((amplitude as f32 * phase.sin()) as i8 as u8);
        }
        data
    }

    fn noise_chunk(len: usize) -> Vec<u8> {
        // Deterministic pseudo-noise, +/-3 counts.
        let mut state = 0x12345678u32;
        let mut data = Vec::with_capacity(len * 2);
        for _ in 0..len * 2 {
            state = state.wrapping_mul(1664525).wrapping_add(1013904223);
            data.push(((state >> 24) as i8 % 4) as u8);
        }
        data
    }

    #[test]
    fn level_is_zero_for_empty_and_low_for_noise() {
        assert_eq!(compute_level(&[]), 0);
        let level = compute_level(&noise_chunk(8192));
        assert!(level < 30, "noise level {level}");
    }

    #[test]
    fn level_never_exceeds_100() {
        let loud = tone_chunk(120, 8192);
        assert!(compute_level(&loud) <= 100);
    }

    #[test]
    fn waveform_is_bounded_and_sized() {
        let wave = extract_waveform(&tone_chunk(80, 8192), 256);
        assert_eq!(wave.len(), 256);
        assert!(wave.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn spectrum_has_requested_bins() {
        let bins = compute_spectrum(&tone_chunk(100, 4096), 256);
        assert_eq!(bins.len(), 256);
        // A tone should put at least one bin near the top of the scale.
        assert!(bins.iter().any(|b| *b > 200));
    }

    #[test]
    fn spectrum_rejects_short_chunks() {
        assert!(compute_spectrum(&[0u8; 64], 256).is_empty());
    }

    #[test]
    fn fingerprint_is_stable_and_16_hex() {
        let chunk = tone_chunk(90, 4096);
        let fp1 = fingerprint_burst(&chunk, 2_000_000, 0.125);
        let fp2 = fingerprint_burst(&chunk, 2_000_000, 0.125);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), 16);
        assert!(fp1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_varies_with_duration_hint() {
        let chunk = tone_chunk(90, 4096);
        let fp1 = fingerprint_burst(&chunk, 2_000_000, 0.125);
        let fp2 = fingerprint_burst(&chunk, 2_000_000, 0.250);
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn fingerprint_empty_for_tiny_input() {
        assert_eq!(fingerprint_burst(&[0u8; 100], 2_000_000, 0.1), "");
    }

    #[test]
    fn burst_detector_walks_through_a_burst() {
        let mut detector = BurstDetector::new(0.0);
        let mut now = 0.0;
        // Establish a quiet noise floor.
        for _ in 0..40 {
            assert!(detector.update(now, 5.0).is_none());
            now += 0.05;
        }
        // Rising edge above the adaptive threshold starts a burst.
        let mut started = None;
        for _ in 0..10 {
            if let Some(event) = detector.update(now, 60.0) {
                started = Some(event);
                break;
            }
            now += 0.05;
        }
        match started {
            Some(BurstEvent::Started { .. }) => {}
            other => panic!("expected burst start, got {other:?}"),
        }

        // Hold the burst for 200 ms.
        for _ in 0..4 {
            now += 0.05;
            assert!(detector.update(now, 60.0).is_none());
        }

        // Drop back to the floor; after the off-hold the burst ends.
        let mut ended = None;
        for _ in 0..40 {
            now += 0.05;
            if let Some(event) = detector.update(now, 5.0) {
                ended = Some(event);
                break;
            }
        }
        match ended {
            Some(BurstEvent::Ended {
                duration_s,
                peak_level,
                start_offset_s,
            }) => {
                assert!(duration_s >= 0.04);
                assert!(peak_level > 30);
                assert!(start_offset_s >= 0.0);
            }
            other => panic!("expected burst end, got {other:?}"),
        }
        assert!(!detector.is_active());
    }

    #[test]
    fn too_short_bursts_are_dropped() {
        let mut detector = BurstDetector::new(0.0);
        let mut now = 0.0;
        for _ in 0..40 {
            detector.update(now, 5.0);
            now += 0.05;
        }
        // One-sample spike, then immediately quiet.
        while detector.update(now, 80.0).is_none() {
            now += 0.01;
        }
        // Force the end check with a now only slightly later: duration
        // below 40 ms must not produce an Ended event.
        let result = detector.finish(now + 0.01);
        assert!(result.is_none());
    }

    #[test]
    fn finish_closes_open_burst() {
        let mut detector = BurstDetector::new(0.0);
        let mut now = 0.0;
        for _ in 0..40 {
            detector.update(now, 5.0);
            now += 0.05;
        }
        while detector.update(now, 70.0).is_none() {
            now += 0.05;
        }
        now += 0.5;
        detector.update(now, 70.0);
        match detector.finish(now + 0.05) {
            Some(BurstEvent::Ended { duration_s, .. }) => assert!(duration_s >= 0.5),
            other => panic!("expected end, got {other:?}"),
        }
    }

    #[test]
    fn accumulator_prefers_burst_hints() {
        let mut acc = HintAccumulator::new();
        acc.add_chunk_hint(&ModulationHint {
            family: "FSK/GFSK".to_string(),
            confidence: 0.3,
            reason: "chunk".to_string(),
        });
        acc.add_burst_hint(&ModulationHint {
            family: "OOK/ASK".to_string(),
            confidence: 0.8,
            reason: "burst".to_string(),
        });
        let (family, confidence) = acc.best();
        assert_eq!(family, "OOK/ASK");
        assert!(confidence > 0.5);
        assert_eq!(acc.last_reason(), "burst");
    }

    #[test]
    fn unknown_hints_do_not_score() {
        let mut acc = HintAccumulator::new();
        acc.add_chunk_hint(&ModulationHint::unknown("noise"));
        let (_, confidence) = acc.best();
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn modulation_from_bursts_normalises() {
        let bursts = vec![
            Burst {
                start_seconds: 0.0,
                duration_seconds: 0.1,
                peak_level: 50,
                fingerprint: String::new(),
                modulation_hint: "OOK/ASK".to_string(),
                modulation_confidence: 0.6,
            },
            Burst {
                start_seconds: 0.5,
                duration_seconds: 0.1,
                peak_level: 40,
                fingerprint: String::new(),
                modulation_hint: "Unknown".to_string(),
                modulation_confidence: 0.9,
            },
        ];
        let (family, confidence) = modulation_from_bursts(&bursts).unwrap();
        assert_eq!(family, "OOK/ASK");
        assert!(confidence > 0.9);
    }

    #[test]
    fn estimate_modulation_handles_degenerate_input() {
        assert_eq!(estimate_modulation(&[], &ModulationTuning::default()).family, "Unknown");
        assert_eq!(
            estimate_modulation(&[0u8; 100], &ModulationTuning::default()).family,
            "Unknown"
        );
    }

    #[test]
    fn estimate_modulation_sees_phase_movement_as_fsk() {
        // Constant-envelope rotating phasor: flat amplitude, steady
        // phase steps.
        let chunk = tone_chunk(100, 4096);
        let hint = estimate_modulation(&chunk, &ModulationTuning::default());
        // Flat amplitude rules out OOK; accept FSK or an honest Unknown
        // depending on the phase-variance threshold.
        assert_ne!(hint.family, "OOK/ASK");
    }
}
