//! AIS vessel aggregation.
//!
//! AIS-catcher emits one JSON object per decoded message on its TCP
//! server. Position reports and static-data messages carry different
//! field subsets, so the tracker merges successive messages per MMSI
//! into one vessel record, honouring the AIS "not available" sentinels
//! (102.3 kn speed, 360 deg course, 511 deg heading, out-of-range
//! coordinates).

use serde_json::{Map, Value};

/// Merge an AIS-catcher message into an existing vessel record.
///
/// Returns `None` when the message carries no MMSI. The returned map is
/// the updated vessel (the caller owns the per-MMSI store).
pub fn merge_message(existing: Option<&Map<String, Value>>, msg: &Map<String, Value>) -> Option<Map<String, Value>> {
    let mmsi = match msg.get("mmsi") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let mut vessel = existing.cloned().unwrap_or_default();
    vessel.insert("mmsi".to_string(), Value::from(mmsi));

    // AIS-catcher JSON_FULL uses latitude/longitude; some versions lat/lon.
    let lat = msg.get("latitude").or_else(|| msg.get("lat")).and_then(as_f64);
    let lon = msg.get("longitude").or_else(|| msg.get("lon")).and_then(as_f64);
    if let (Some(lat), Some(lon)) = (lat, lon) {
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            vessel.insert("lat".to_string(), Value::from(lat));
            vessel.insert("lon".to_string(), Value::from(lon));
        }
    }

    if let Some(speed) = msg.get("speed").and_then(as_f64) {
        if speed < 102.3 {
            vessel.insert("speed".to_string(), Value::from(round1(speed)));
        }
    }
    if let Some(course) = msg.get("course").and_then(as_f64) {
        if course < 360.0 {
            vessel.insert("course".to_string(), Value::from(round1(course)));
        }
    }
    if let Some(heading) = msg.get("heading").and_then(as_f64) {
        let heading = heading as i64;
        if heading < 511 {
            vessel.insert("heading".to_string(), Value::from(heading));
        }
    }

    if let Some(status) = msg.get("status") {
        vessel.insert("nav_status".to_string(), status.clone());
    }
    if let Some(status_text) = msg.get("status_text") {
        vessel.insert("nav_status_text".to_string(), status_text.clone());
    }

    if let Some(name) = clean_string(msg.get("shipname")) {
        vessel.insert("name".to_string(), Value::from(name));
    }
    if let Some(callsign) = clean_string(msg.get("callsign")) {
        vessel.insert("callsign".to_string(), Value::from(callsign));
    }
    if let Some(ship_type) = msg.get("shiptype") {
        vessel.insert("ship_type".to_string(), ship_type.clone());
    }
    if let Some(ship_type_text) = msg.get("shiptype_text") {
        vessel.insert("ship_type_text".to_string(), ship_type_text.clone());
    }
    if let Some(dest) = clean_string(msg.get("destination")) {
        vessel.insert("destination".to_string(), Value::from(dest));
    }
    if let Some(eta) = msg.get("eta") {
        vessel.insert("eta".to_string(), eta.clone());
    }

    // Dimensions from the four reference-point offsets.
    if let (Some(to_bow), Some(to_stern)) = (
        msg.get("to_bow").and_then(as_i64),
        msg.get("to_stern").and_then(as_i64),
    ) {
        let length = to_bow + to_stern;
        if length > 0 {
            vessel.insert("length".to_string(), Value::from(length));
        }
    }
    if let (Some(to_port), Some(to_starboard)) = (
        msg.get("to_port").and_then(as_i64),
        msg.get("to_starboard").and_then(as_i64),
    ) {
        let width = to_port + to_starboard;
        if width > 0 {
            vessel.insert("width".to_string(), Value::from(width));
        }
    }

    if let Some(draught) = msg.get("draught").and_then(as_f64) {
        if draught > 0.0 {
            vessel.insert("draught".to_string(), Value::from(draught));
        }
    }
    if let Some(turn) = msg.get("turn").and_then(as_f64) {
        if (-127.0..=127.0).contains(&turn) {
            vessel.insert("rate_of_turn".to_string(), Value::from(turn));
        }
    }
    if let Some(msg_type) = msg.get("type") {
        vessel.insert("last_msg_type".to_string(), msg_type.clone());
    }

    Some(vessel)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Strip AIS `@` padding and whitespace; empty results are dropped.
fn clean_string(value: Option<&Value>) -> Option<String> {
    let s = value?.as_str()?.trim().trim_matches('@').trim();
    (!s.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn message_without_mmsi_is_dropped() {
        assert!(merge_message(None, &obj(json!({"type": 1}))).is_none());
    }

    #[test]
    fn position_report_sets_coordinates() {
        let vessel = merge_message(
            None,
            &obj(json!({"mmsi": 367001234u64, "latitude": 47.6, "longitude": -122.3, "speed": 12.4, "course": 182.6})),
        )
        .unwrap();
        assert_eq!(vessel["mmsi"], "367001234");
        assert_eq!(vessel["lat"], 47.6);
        assert_eq!(vessel["speed"], 12.4);
        assert_eq!(vessel["course"], 182.6);
    }

    #[test]
    fn not_available_sentinels_are_ignored() {
        let vessel = merge_message(
            None,
            &obj(json!({"mmsi": 1, "latitude": 91.0, "longitude": 181.0, "speed": 102.3, "course": 360.0, "heading": 511})),
        )
        .unwrap();
        assert!(vessel.get("lat").is_none());
        assert!(vessel.get("speed").is_none());
        assert!(vessel.get("course").is_none());
        assert!(vessel.get("heading").is_none());
    }

    #[test]
    fn static_data_merges_over_position() {
        let position = merge_message(
            None,
            &obj(json!({"mmsi": 1, "latitude": 1.0, "longitude": 2.0})),
        )
        .unwrap();
        let merged = merge_message(
            Some(&position),
            &obj(json!({"mmsi": 1, "shipname": "EVER GIVEN@@@", "to_bow": 300, "to_stern": 100, "to_port": 20, "to_starboard": 39})),
        )
        .unwrap();
        assert_eq!(merged["lat"], 1.0);
        assert_eq!(merged["name"], "EVER GIVEN");
        assert_eq!(merged["length"], 400);
        assert_eq!(merged["width"], 59);
    }

    #[test]
    fn padding_only_strings_are_dropped() {
        let vessel = merge_message(None, &obj(json!({"mmsi": 1, "shipname": "@@@@"}))).unwrap();
        assert!(vessel.get("name").is_none());
    }
}
