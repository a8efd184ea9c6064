//! Parser for hackrf_sweep CSV output.
//!
//! Each line is:
//!
//! ```text
//! date, time, hz_low, hz_high, hz_bin_width, num_samples, dB, dB, dB, ...
//! ```
//!
//! Every dB column maps to `freq = hz_low + i * hz_bin_width`; one line
//! becomes one batch of `(freq_mhz, power_dbm)` points.

use serde::{Deserialize, Serialize};

/// A single frequency/power data point from hackrf_sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    #[serde(rename = "freq")]
    pub freq_mhz: f64,
    #[serde(rename = "power")]
    pub power_dbm: f64,
}

/// Parse one CSV line into a batch of sweep points. Malformed lines
/// yield `None` and are skipped by the caller.
pub fn parse_line(line: &str) -> Option<Vec<SweepPoint>> {
    let parts: Vec<&str> = line.split(',').collect();
    if parts.len() < 7 {
        return None;
    }
    let hz_low: f64 = parts[2].trim().parse().ok()?;
    let _hz_high: f64 = parts[3].trim().parse().ok()?;
    let hz_bin_width: f64 = parts[4].trim().parse().ok()?;
    if hz_bin_width <= 0.0 {
        return None;
    }

    let powers: Vec<f64> = parts[6..]
        .iter()
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    if powers.is_empty() {
        return None;
    }

    Some(
        powers
            .iter()
            .enumerate()
            .map(|(i, power)| SweepPoint {
                freq_mhz: round4((hz_low + i as f64 * hz_bin_width) / 1_000_000.0),
                power_dbm: round1(*power),
            })
            .collect(),
    )
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_sweep_line() {
        let line = "2026-01-01, 00:00:01, 433000000, 438000000, 1000000, 8192, -72.5, -68.12, -40.0";
        let points = parse_line(line).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].freq_mhz, 433.0);
        assert_eq!(points[0].power_dbm, -72.5);
        assert_eq!(points[1].freq_mhz, 434.0);
        assert_eq!(points[1].power_dbm, -68.1);
        assert_eq!(points[2].freq_mhz, 435.0);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("a,b,c").is_none());
        assert!(parse_line("d, t, x, y, 1000, 10, -50").is_none());
        assert!(parse_line("d, t, 433000000, 438000000, 0, 10, -50").is_none());
        assert!(parse_line("d, t, 433000000, 438000000, 1000000, 10").is_none());
    }
}
