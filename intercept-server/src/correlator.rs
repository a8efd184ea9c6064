//! Flight correlator: matches ACARS/VDL2 messages to aircraft by
//! callsign, flight number, registration or ICAO address, expanding
//! query terms through the IATA/ICAO airline prefix table.

use chrono::Utc;
use intercept_core::airlines::{expand_search_terms, translate_flight};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::Mutex;

const MATCH_FIELDS: [&str; 6] = ["flight", "tail", "reg", "callsign", "icao", "addr"];
const CORR_TIME: &str = "_corr_time";

struct Feeds {
    acars: VecDeque<Map<String, Value>>,
    vdl2: VecDeque<Map<String, Value>>,
}

pub struct FlightCorrelator {
    max_messages: usize,
    feeds: Mutex<Feeds>,
}

impl FlightCorrelator {
    pub fn new(max_messages: usize) -> Self {
        FlightCorrelator {
            max_messages: max_messages.max(1),
            feeds: Mutex::new(Feeds {
                acars: VecDeque::new(),
                vdl2: VecDeque::new(),
            }),
        }
    }

    fn push(&self, feed: &str, msg: &Map<String, Value>) {
        let mut stored = msg.clone();
        stored.insert(
            CORR_TIME.to_string(),
            Value::from(Utc::now().timestamp_millis() as f64 / 1000.0),
        );
        let mut feeds = self.feeds.lock().unwrap();
        let queue = if feed == "acars" {
            &mut feeds.acars
        } else {
            &mut feeds.vdl2
        };
        if queue.len() >= self.max_messages {
            queue.pop_front();
        }
        queue.push_back(stored);
    }

    pub fn add_acars_message(&self, msg: &Map<String, Value>) {
        self.push("acars", msg);
    }

    pub fn add_vdl2_message(&self, msg: &Map<String, Value>) {
        self.push("vdl2", msg);
    }

    /// Messages matching an aircraft, keyed per feed.
    pub fn messages_for_aircraft(
        &self,
        icao: Option<&str>,
        callsign: Option<&str>,
        registration: Option<&str>,
    ) -> Value {
        if icao.map_or(true, str::is_empty) && callsign.map_or(true, str::is_empty) {
            return json!({"acars": [], "vdl2": []});
        }
        let terms: Vec<String> = [callsign, icao, registration]
            .into_iter()
            .flatten()
            .map(|t| t.trim().to_ascii_uppercase())
            .filter(|t| !t.is_empty())
            .collect();
        let terms = expand_search_terms(&terms);

        let feeds = self.feeds.lock().unwrap();
        let collect = |queue: &VecDeque<Map<String, Value>>| -> Vec<Value> {
            queue
                .iter()
                .filter(|msg| matches_terms(msg, &terms))
                .map(|msg| Value::Object(clean(msg)))
                .collect()
        };
        json!({
            "acars": collect(&feeds.acars),
            "vdl2": collect(&feeds.vdl2),
        })
    }

    /// Most recent messages for one feed, newest first.
    pub fn recent_messages(&self, feed: &str, limit: usize) -> Vec<Value> {
        let feeds = self.feeds.lock().unwrap();
        let queue = if feed == "acars" {
            &feeds.acars
        } else {
            &feeds.vdl2
        };
        queue
            .iter()
            .rev()
            .take(limit)
            .map(|msg| Value::Object(clean(msg)))
            .collect()
    }

    pub fn clear(&self, feed: &str) {
        let mut feeds = self.feeds.lock().unwrap();
        if feed == "acars" {
            feeds.acars.clear();
        } else {
            feeds.vdl2.clear();
        }
    }

    pub fn counts(&self) -> (usize, usize) {
        let feeds = self.feeds.lock().unwrap();
        (feeds.acars.len(), feeds.vdl2.len())
    }
}

fn matches_terms(msg: &Map<String, Value>, terms: &[String]) -> bool {
    for field in MATCH_FIELDS {
        let Some(value) = msg.get(field) else {
            continue;
        };
        let text = match value {
            Value::String(s) => s.trim().to_ascii_uppercase(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if text.is_empty() {
            continue;
        }
        if terms.iter().any(|t| *t == text) {
            return true;
        }
        // The stored field gets the same translation as the query.
        if translate_flight(&text).iter().any(|tr| terms.contains(tr)) {
            return true;
        }
    }
    false
}

/// Strip internal correlation bookkeeping before returning a record.
fn clean(msg: &Map<String, Value>) -> Map<String, Value> {
    msg.iter()
        .filter(|(key, _)| !key.starts_with("_corr"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn matches_direct_and_translated_callsigns() {
        let correlator = FlightCorrelator::new(100);
        correlator.add_acars_message(&msg(json!({"flight": "UA2412", "text": "POS"})));
        correlator.add_vdl2_message(&msg(json!({"flight": "UAL2412"})));

        // An ICAO-form query finds both the ICAO and IATA stored forms.
        let result = correlator.messages_for_aircraft(None, Some("UAL2412"), None);
        assert_eq!(result["acars"].as_array().unwrap().len(), 1);
        assert_eq!(result["vdl2"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn query_without_icao_or_callsign_is_empty() {
        let correlator = FlightCorrelator::new(100);
        correlator.add_acars_message(&msg(json!({"reg": "N12345"})));
        let result = correlator.messages_for_aircraft(None, None, Some("N12345"));
        assert!(result["acars"].as_array().unwrap().is_empty());
    }

    #[test]
    fn matches_by_icao_address_field() {
        let correlator = FlightCorrelator::new(100);
        correlator.add_vdl2_message(&msg(json!({"addr": "A1B2C3"})));
        let result = correlator.messages_for_aircraft(Some("a1b2c3"), None, None);
        assert_eq!(result["vdl2"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn returned_records_have_no_bookkeeping_fields() {
        let correlator = FlightCorrelator::new(100);
        correlator.add_acars_message(&msg(json!({"flight": "DL100"})));
        let result = correlator.messages_for_aircraft(None, Some("DL100"), None);
        let record = &result["acars"][0];
        assert!(record.get("_corr_time").is_none());

        let recent = correlator.recent_messages("acars", 10);
        assert!(recent[0].get("_corr_time").is_none());
    }

    #[test]
    fn buffers_are_bounded() {
        let correlator = FlightCorrelator::new(5);
        for i in 0..20 {
            correlator.add_acars_message(&msg(json!({"flight": format!("AA{i}")})));
        }
        let (acars, vdl2) = correlator.counts();
        assert_eq!(acars, 5);
        assert_eq!(vdl2, 0);
        // Newest survive.
        let recent = correlator.recent_messages("acars", 10);
        assert_eq!(recent[0]["flight"], "AA19");
    }

    #[test]
    fn clear_is_per_feed() {
        let correlator = FlightCorrelator::new(10);
        correlator.add_acars_message(&msg(json!({"flight": "AA1"})));
        correlator.add_vdl2_message(&msg(json!({"flight": "AA2"})));
        correlator.clear("acars");
        let (acars, vdl2) = correlator.counts();
        assert_eq!(acars, 0);
        assert_eq!(vdl2, 1);
    }
}
