//! Normalisation of dumpvdl2 `decoded:json` output.
//!
//! dumpvdl2 nests the interesting identity fields: ACARS-over-VDL2
//! payloads live under `vdl2.avlc.acars`, the airframe address under
//! `vdl2.avlc.src.addr`. The flight correlator matches on flat
//! `flight`/`tail`/`reg`/`icao`/`addr` fields, so we lift them to the
//! top level while leaving the original structure untouched.

use serde_json::{Map, Value};

/// Lift correlator identity fields out of the nested dumpvdl2 record.
pub fn normalize(data: &mut Map<String, Value>) {
    let avlc = data
        .get("vdl2")
        .and_then(Value::as_object)
        .and_then(|v| v.get("avlc"))
        .and_then(Value::as_object)
        .cloned();
    let Some(avlc) = avlc else {
        return;
    };

    if let Some(addr) = avlc
        .get("src")
        .and_then(Value::as_object)
        .and_then(|src| src.get("addr"))
        .and_then(Value::as_str)
    {
        data.entry("addr".to_string())
            .or_insert_with(|| Value::from(addr));
        data.entry("icao".to_string())
            .or_insert_with(|| Value::from(addr));
    }

    if let Some(acars) = avlc.get("acars").and_then(Value::as_object) {
        for key in ["flight", "tail", "reg", "label"] {
            if let Some(value) = acars.get(key) {
                if value.as_str().is_some_and(|s| !s.trim().is_empty()) {
                    data.entry(key.to_string()).or_insert_with(|| value.clone());
                }
            }
        }
        if let Some(text) = acars.get("msg_text").or_else(|| acars.get("text")) {
            data.entry("text".to_string()).or_insert_with(|| text.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifts_acars_identity_fields() {
        let mut data = json!({
            "vdl2": {
                "avlc": {
                    "src": {"addr": "A1B2C3"},
                    "acars": {"flight": "UA2412", "tail": "N12345", "msg_text": "HELLO"}
                }
            }
        })
        .as_object()
        .unwrap()
        .clone();
        normalize(&mut data);
        assert_eq!(data["addr"], "A1B2C3");
        assert_eq!(data["icao"], "A1B2C3");
        assert_eq!(data["flight"], "UA2412");
        assert_eq!(data["tail"], "N12345");
        assert_eq!(data["text"], "HELLO");
    }

    #[test]
    fn leaves_existing_top_level_fields_alone() {
        let mut data = json!({
            "flight": "KEEP",
            "vdl2": {"avlc": {"acars": {"flight": "OTHER"}}}
        })
        .as_object()
        .unwrap()
        .clone();
        normalize(&mut data);
        assert_eq!(data["flight"], "KEEP");
    }

    #[test]
    fn non_avlc_records_pass_through() {
        let mut data = json!({"vdl2": {"hdr": 1}}).as_object().unwrap().clone();
        let before = data.clone();
        normalize(&mut data);
        assert_eq!(data, before);
    }

    #[test]
    fn empty_strings_are_not_lifted() {
        let mut data = json!({"vdl2": {"avlc": {"acars": {"flight": "  "}}}})
            .as_object()
            .unwrap()
            .clone();
        normalize(&mut data);
        assert!(data.get("flight").is_none());
    }
}
