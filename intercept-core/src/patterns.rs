//! Temporal pattern detection across modes.
//!
//! Every event that carries a device identity (MAC, ICAO, MMSI, meter
//! id, ...) feeds a per-device ring of sighting timestamps. Periodicity
//! confidence is derived lazily from inter-arrival statistics: a device
//! that reappears at regular intervals (low spread relative to the mean
//! interval) scores close to 1.0.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

/// Canonical identity fields, in priority order.
const DEVICE_ID_FIELDS: [&str; 14] = [
    "device_id",
    "id",
    "mac",
    "mac_address",
    "address",
    "bssid",
    "station_mac",
    "client_mac",
    "icao",
    "callsign",
    "mmsi",
    "uuid",
    "hash",
    "meter_id",
];

/// Containers searched one nesting level deep.
const NESTED_CANDIDATES: [&str; 5] = ["target", "device", "source", "aircraft", "vessel"];

/// Extract a device identity from an event payload, looking at the
/// canonical fields first and then one level under the well-known
/// container keys.
pub fn extract_device_id(event: &Map<String, Value>) -> Option<String> {
    extract_inner(event, true)
}

fn extract_inner(event: &Map<String, Value>, recurse: bool) -> Option<String> {
    for field in DEVICE_ID_FIELDS {
        if let Some(value) = event.get(field) {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => continue,
            };
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    if recurse {
        for key in NESTED_CANDIDATES {
            if let Some(nested) = event.get(key).and_then(Value::as_object) {
                if let Some(id) = extract_inner(nested, false) {
                    return Some(id);
                }
            }
        }
    }
    None
}

/// Summary row returned by [`PatternTracker::all_patterns`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub device_id: String,
    pub mode: String,
    pub first_seen: f64,
    pub last_seen: f64,
    pub sighting_count: usize,
    pub mean_interval_seconds: f64,
    /// Periodicity confidence in `[0, 1]`.
    pub confidence: f64,
}

#[derive(Debug)]
struct DeviceRing {
    mode: String,
    timestamps: VecDeque<f64>,
    first_seen: f64,
    total_sightings: usize,
}

/// Per-device sighting rings with lazy periodicity scoring.
///
/// Timestamps are injected by the caller (seconds, any monotonic or
/// epoch base) so the math is deterministic under test.
#[derive(Debug, Default)]
pub struct PatternTracker {
    rings: HashMap<String, DeviceRing>,
    ring_capacity: usize,
}

impl PatternTracker {
    pub fn new(ring_capacity: usize) -> Self {
        PatternTracker {
            rings: HashMap::new(),
            ring_capacity: ring_capacity.max(4),
        }
    }

    /// Record a sighting of `device_id` in `mode` at `now` seconds.
    pub fn record(&mut self, device_id: &str, mode: &str, now: f64) {
        let capacity = self.ring_capacity;
        let ring = self
            .rings
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceRing {
                mode: mode.to_string(),
                timestamps: VecDeque::with_capacity(capacity),
                first_seen: now,
                total_sightings: 0,
            });
        ring.mode = mode.to_string();
        ring.total_sightings += 1;
        if ring.timestamps.len() == capacity {
            ring.timestamps.pop_front();
        }
        ring.timestamps.push_back(now);
    }

    pub fn device_count(&self) -> usize {
        self.rings.len()
    }

    /// Compute summaries for every tracked device, most recent first.
    pub fn all_patterns(&self) -> Vec<PatternSummary> {
        let mut rows: Vec<PatternSummary> = self
            .rings
            .iter()
            .map(|(device_id, ring)| {
                let (mean_interval, confidence) = periodicity(&ring.timestamps);
                PatternSummary {
                    device_id: device_id.clone(),
                    mode: ring.mode.clone(),
                    first_seen: ring.first_seen,
                    last_seen: ring.timestamps.back().copied().unwrap_or(ring.first_seen),
                    sighting_count: ring.total_sightings,
                    mean_interval_seconds: mean_interval,
                    confidence,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.last_seen.partial_cmp(&a.last_seen).unwrap_or(std::cmp::Ordering::Equal));
        rows
    }
}

/// Mean inter-arrival interval and periodicity confidence.
///
/// Confidence grows as the interval spread shrinks relative to the mean
/// and as more sightings accumulate; fewer than three sightings score
/// zero.
fn periodicity(timestamps: &VecDeque<f64>) -> (f64, f64) {
    if timestamps.len() < 3 {
        return (0.0, 0.0);
    }
    let intervals: Vec<f64> = timestamps
        .iter()
        .zip(timestamps.iter().skip(1))
        .map(|(a, b)| b - a)
        .filter(|d| *d > 0.0)
        .collect();
    if intervals.len() < 2 {
        return (0.0, 0.0);
    }
    let mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
    if mean <= 0.0 {
        return (0.0, 0.0);
    }
    let variance = intervals.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>()
        / intervals.len() as f64;
    let spread = variance.sqrt();

    // Regularity: 1 when all intervals are identical, falling toward 0
    // as the spread approaches the mean.
    let regularity = (1.0 - spread / mean).max(0.0);
    // Sample factor: full weight once ten intervals have been seen.
    let sample_factor = (intervals.len() as f64 / 10.0).min(1.0);
    (mean, (regularity * sample_factor).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn extracts_canonical_fields_in_priority_order() {
        let event = obj(json!({"mac": "AA:BB", "icao": "A1B2C3"}));
        assert_eq!(extract_device_id(&event).as_deref(), Some("AA:BB"));
    }

    #[test]
    fn extracts_one_level_of_nesting() {
        let event = obj(json!({"target": {"icao": "A1B2C3"}}));
        assert_eq!(extract_device_id(&event).as_deref(), Some("A1B2C3"));

        // Two levels deep is out of contract.
        let deep = obj(json!({"target": {"inner": {"icao": "A1B2C3"}}}));
        assert_eq!(extract_device_id(&deep), None);
    }

    #[test]
    fn numeric_ids_are_stringified() {
        let event = obj(json!({"mmsi": 367001234u64}));
        assert_eq!(extract_device_id(&event).as_deref(), Some("367001234"));
    }

    #[test]
    fn blank_ids_are_skipped() {
        let event = obj(json!({"id": "  ", "callsign": "SWA123"}));
        assert_eq!(extract_device_id(&event).as_deref(), Some("SWA123"));
    }

    #[test]
    fn periodic_device_scores_high() {
        let mut tracker = PatternTracker::new(64);
        for i in 0..20 {
            tracker.record("beacon", "wifi", i as f64 * 10.0);
        }
        let patterns = tracker.all_patterns();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.device_id, "beacon");
        assert_eq!(p.sighting_count, 20);
        assert!((p.mean_interval_seconds - 10.0).abs() < 1e-9);
        assert!(p.confidence > 0.9, "confidence {}", p.confidence);
    }

    #[test]
    fn erratic_device_scores_low() {
        let mut tracker = PatternTracker::new(64);
        let times = [0.0, 1.0, 50.0, 51.0, 300.0, 302.0, 900.0];
        for t in times {
            tracker.record("rando", "ble", t);
        }
        let p = &tracker.all_patterns()[0];
        assert!(p.confidence < 0.4, "confidence {}", p.confidence);
    }

    #[test]
    fn too_few_sightings_score_zero() {
        let mut tracker = PatternTracker::new(64);
        tracker.record("x", "adsb", 0.0);
        tracker.record("x", "adsb", 5.0);
        assert_eq!(tracker.all_patterns()[0].confidence, 0.0);
    }

    #[test]
    fn ring_is_bounded() {
        let mut tracker = PatternTracker::new(8);
        for i in 0..100 {
            tracker.record("x", "adsb", i as f64);
        }
        let p = &tracker.all_patterns()[0];
        assert_eq!(p.sighting_count, 100);
        // Ring keeps only the tail; last_seen reflects the newest entry.
        assert_eq!(p.last_seen, 99.0);
    }

    #[test]
    fn patterns_sorted_by_recency() {
        let mut tracker = PatternTracker::new(8);
        tracker.record("old", "adsb", 1.0);
        tracker.record("new", "adsb", 100.0);
        let patterns = tracker.all_patterns();
        assert_eq!(patterns[0].device_id, "new");
    }
}
