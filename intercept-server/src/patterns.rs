//! Bus sink wrapper around the core temporal pattern tracker.

use crate::bus::EventSink;
use chrono::Utc;
use intercept_core::event::EventKind;
use intercept_core::patterns::{extract_device_id, PatternSummary, PatternTracker};
use serde_json::{Map, Value};
use std::sync::Mutex;

pub struct PatternDetector {
    tracker: Mutex<PatternTracker>,
}

impl PatternDetector {
    pub fn new(ring_capacity: usize) -> Self {
        PatternDetector {
            tracker: Mutex::new(PatternTracker::new(ring_capacity)),
        }
    }

    pub fn all_patterns(&self) -> Vec<PatternSummary> {
        self.tracker.lock().unwrap().all_patterns()
    }

    pub fn device_count(&self) -> usize {
        self.tracker.lock().unwrap().device_count()
    }
}

impl EventSink for PatternDetector {
    fn name(&self) -> &'static str {
        "patterns"
    }

    fn on_event(&self, mode: &str, _kind: EventKind, event: &Map<String, Value>) {
        if let Some(device_id) = extract_device_id(event) {
            let now = Utc::now().timestamp_millis() as f64 / 1000.0;
            self.tracker.lock().unwrap().record(&device_id, mode, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sink_records_identified_events_only() {
        let detector = PatternDetector::new(16);
        let with_id = json!({"icao": "A1B2C3"}).as_object().cloned().unwrap();
        let without_id = json!({"text": "noise"}).as_object().cloned().unwrap();
        detector.on_event("adsb", EventKind::Aircraft, &with_id);
        detector.on_event("adsb", EventKind::Raw, &without_id);
        assert_eq!(detector.device_count(), 1);
        assert_eq!(detector.all_patterns()[0].device_id, "A1B2C3");
    }
}
