//! Normalisation of rtlamr JSON meter messages.
//!
//! rtlamr prints one JSON object per intercepted meter message with the
//! payload nested under `Message`. We surface the meter id and type so
//! the pattern detector and alert rules can address them without
//! knowing rtlamr's Go-style field casing.

use serde_json::{Map, Value};

/// Message types rtlamr can be asked to decode.
pub const MSG_TYPES: [&str; 7] = ["scm", "scm+", "idm", "netidm", "r900", "r900bcd", "all"];

/// Lift meter identity fields out of an rtlamr record.
pub fn normalize(data: &mut Map<String, Value>) {
    let message = data.get("Message").and_then(Value::as_object).cloned();
    let Some(message) = message else {
        return;
    };

    for (source, target) in [
        ("ID", "meter_id"),
        ("EndpointID", "meter_id"),
        ("ERTSerialNumber", "meter_id"),
        ("Type", "meter_type"),
        ("EndpointType", "meter_type"),
        ("ERTType", "meter_type"),
        ("Consumption", "consumption"),
        ("LastConsumptionCount", "consumption"),
    ] {
        if let Some(value) = message.get(source) {
            if !value.is_null() {
                data.entry(target.to_string()).or_insert_with(|| value.clone());
            }
        }
    }

    // Canonical id for the pattern detector.
    if let Some(meter_id) = data.get("meter_id").cloned() {
        data.entry("id".to_string()).or_insert(meter_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifts_scm_fields() {
        let mut data = json!({
            "Time": "2026-01-01T00:00:00Z",
            "Type": "SCM",
            "Message": {"ID": 33554433u64, "Type": 12, "Consumption": 54321}
        })
        .as_object()
        .unwrap()
        .clone();
        normalize(&mut data);
        assert_eq!(data["meter_id"], 33554433u64);
        assert_eq!(data["meter_type"], 12);
        assert_eq!(data["consumption"], 54321);
        assert_eq!(data["id"], 33554433u64);
    }

    #[test]
    fn idm_serial_number_variant() {
        let mut data = json!({
            "Message": {"ERTSerialNumber": 99, "ERTType": 7}
        })
        .as_object()
        .unwrap()
        .clone();
        normalize(&mut data);
        assert_eq!(data["meter_id"], 99);
        assert_eq!(data["meter_type"], 7);
    }

    #[test]
    fn records_without_message_pass_through() {
        let mut data = json!({"Time": "t"}).as_object().unwrap().clone();
        let before = data.clone();
        normalize(&mut data);
        assert_eq!(data, before);
    }
}
