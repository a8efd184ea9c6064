//! ACARS message enrichment: label lookup, classification, and field
//! parsers for the free-text payloads acarsdec emits.
//!
//! Sources for the label table: ARINC 618, ARINC 620, airline
//! implementations.

mod labels;
mod parsers;

pub use labels::{translate_label, ACARS_LABELS};
pub use parsers::{parse_engine_data, parse_oooi, parse_position_report, parse_weather_data};

use serde_json::{Map, Value};

/// Canonical message classes used for UI colour coding.
pub const MESSAGE_TYPES: [&str; 10] = [
    "position",
    "engine_data",
    "weather",
    "ats",
    "handshake",
    "oooi",
    "squawk",
    "link_test",
    "cpdlc",
    "other",
];

/// Classify an ACARS message into a canonical type.
pub fn classify_message_type(label: Option<&str>, text: Option<&str>) -> &'static str {
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return "other";
    };

    match label {
        "H1" | "20" | "15" | "16" | "30" | "S1" => return "position",
        _ => {}
    }
    if text.is_some_and(|t| t.contains("#M1BPOS")) {
        return "position";
    }

    match label {
        "DF" | "D3" | "D6" => "engine_data",
        "H2" | "44" | "50" | "51" | "52" | "54" | "4T" => "weather",
        "AA" | "AB" | "A0" | "A1" | "A2" | "A3" | "A6" | "A7" | "AT" => "cpdlc",
        "5Z" | "2Z" => "oooi",
        "SQ" | "SA" => "squawk",
        "_d" | "Q0" | "QA" | "QB" | "QC" | "QD" | "QE" | "QF" | "QG" | "QH" | "QK" | "QM"
        | "QN" | "QP" | "QQ" | "QR" | "QS" | "QT" | "QX" | "4X" => "link_test",
        l if l.len() == 2 && l.starts_with('B') => "ats",
        _ => "other",
    }
}

/// Enrichment added to a raw acarsdec message.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    pub label_description: String,
    pub message_type: &'static str,
    pub parsed: Option<Map<String, Value>>,
}

/// Translate an ACARS message, returning enrichment fields.
///
/// `msg` is the raw JSON object from acarsdec; `label` and `text` (or
/// `msg`) fields are consulted.
pub fn translate_message(msg: &Map<String, Value>) -> Translation {
    let label = msg.get("label").and_then(Value::as_str);
    let text = msg
        .get("text")
        .and_then(Value::as_str)
        .or_else(|| msg.get("msg").and_then(Value::as_str))
        .unwrap_or("");

    let label_description = translate_label(label);
    let message_type = classify_message_type(label, Some(text));

    let parsed = match message_type {
        "position" => parse_position_report(text),
        "engine_data" => parse_engine_data(text),
        "weather" => parse_weather_data(text),
        "oooi" => parse_oooi(text),
        _ => {
            if label == Some("H1") && text.to_ascii_uppercase().contains("POS") {
                parse_position_report(text)
            } else {
                None
            }
        }
    };

    Translation {
        label_description,
        message_type,
        parsed,
    }
}

/// Apply [`translate_message`] in place, adding `label_description`,
/// `message_type` and `parsed` to the message object.
pub fn enrich(msg: &mut Map<String, Value>) {
    let translation = translate_message(msg);
    msg.insert(
        "label_description".to_string(),
        Value::from(translation.label_description),
    );
    msg.insert(
        "message_type".to_string(),
        Value::from(translation.message_type),
    );
    msg.insert(
        "parsed".to_string(),
        translation.parsed.map(Value::Object).unwrap_or(Value::Null),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn classifies_by_label() {
        assert_eq!(classify_message_type(Some("H1"), None), "position");
        assert_eq!(classify_message_type(Some("DF"), None), "engine_data");
        assert_eq!(classify_message_type(Some("H2"), None), "weather");
        assert_eq!(classify_message_type(Some("B2"), None), "ats");
        assert_eq!(classify_message_type(Some("AA"), None), "cpdlc");
        assert_eq!(classify_message_type(Some("5Z"), None), "oooi");
        assert_eq!(classify_message_type(Some("SQ"), None), "squawk");
        assert_eq!(classify_message_type(Some("Q0"), None), "link_test");
        assert_eq!(classify_message_type(Some("83"), None), "other");
        assert_eq!(classify_message_type(None, None), "other");
    }

    #[test]
    fn bpos_text_is_position_even_without_position_label() {
        assert_eq!(
            classify_message_type(Some("83"), Some("#M1BPOSN42411W086034")),
            "position"
        );
    }

    #[test]
    fn enriches_position_report() {
        let mut msg = obj(json!({
            "label": "H1",
            "text": "#M1BPOSN42411W086034,CSG,070852,340,N42441W087074,DTW,0757,224A8C"
        }));
        enrich(&mut msg);

        assert_eq!(msg["label_description"], "Position report (HF data link)");
        assert_eq!(msg["message_type"], "position");
        let parsed = msg["parsed"].as_object().unwrap();
        let lat = parsed["lat"].as_f64().unwrap();
        let lon = parsed["lon"].as_f64().unwrap();
        assert!(lat > 42.4 && lat < 42.5, "lat {lat}");
        assert!(lon > -86.1 && lon < -86.0, "lon {lon}");
        assert_eq!(parsed["waypoint"], "CSG");
        assert_eq!(parsed["flight_level"], "FL340");
        assert_eq!(parsed["destination"], "DTW");
    }

    #[test]
    fn enrich_without_parseable_payload_sets_parsed_null() {
        let mut msg = obj(json!({"label": "Q0", "text": ""}));
        enrich(&mut msg);
        assert_eq!(msg["message_type"], "link_test");
        assert!(msg["parsed"].is_null());
    }
}
