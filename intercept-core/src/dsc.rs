//! Parser for marine DSC (Digital Selective Calling) decoder output.
//!
//! DSC decoders print one call per line as loosely keyed text, e.g.
//!
//! ```text
//! DSC: FMT=120 CAT=DISTRESS FROM=367123456 TO=ALLSHIPS NATURE=Fire POS=47.36N 122.20W
//! FORMAT: 116  CATEGORY: ROUTINE  SOURCE: 367999000  DEST: 003669999
//! ```
//!
//! The parser tolerates both `key=value` and `key: value` forms and the
//! common aliases between decoder builds. DISTRESS and URGENCY calls
//! are flagged critical so the server can persist them.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// VHF DSC distress/calling channel 70.
pub const DSC_VHF_FREQUENCY_MHZ: f64 = 156.525;

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(FMT|FORMAT|CAT|CATEGORY|FROM|SRC|SOURCE|TO|DEST|DESTINATION|NATURE)\s*[=:]\s*([^\s=:]+(?:\s+SHIPS)?)",
    )
    .unwrap()
});
static POSITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2}(?:\.\d+)?)\s*([NS])[,\s]+(\d{1,3}(?:\.\d+)?)\s*([EW])").unwrap()
});
static MMSI: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{9}$").unwrap());

/// A decoded DSC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DscMessage {
    pub format_code: String,
    pub category: String,
    pub source_mmsi: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_mmsi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nature_of_distress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    pub is_critical: bool,
    pub raw_message: String,
}

/// Categories that are persisted as critical alerts.
const CRITICAL_CATEGORIES: [&str; 2] = ["DISTRESS", "URGENCY"];

/// Parse one decoder line. Lines without at least a source MMSI and a
/// category or format are not DSC calls and yield `None`.
pub fn parse_line(line: &str) -> Option<DscMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let mut format_code = String::new();
    let mut category = String::new();
    let mut source = String::new();
    let mut dest: Option<String> = None;
    let mut nature: Option<String> = None;

    for caps in KEY_VALUE.captures_iter(line) {
        let key = caps[1].to_ascii_uppercase();
        let value = caps[2].trim().to_string();
        match key.as_str() {
            "FMT" | "FORMAT" => format_code = value,
            "CAT" | "CATEGORY" => category = value.to_ascii_uppercase(),
            "FROM" | "SRC" | "SOURCE" => source = value,
            "TO" | "DEST" | "DESTINATION" => {
                let upper = value.to_ascii_uppercase();
                dest = if upper.contains("ALL") { None } else { Some(value) };
            }
            "NATURE" => nature = Some(value),
            _ => {}
        }
    }

    if source.is_empty() || !MMSI.is_match(&source) {
        return None;
    }
    if format_code.is_empty() && category.is_empty() {
        return None;
    }
    if category.is_empty() {
        category = "ROUTINE".to_string();
    }

    let (latitude, longitude) = POSITION
        .captures(line)
        .map(|caps| {
            let mut lat: f64 = caps[1].parse().unwrap_or(0.0);
            if &caps[2] == "S" {
                lat = -lat;
            }
            let mut lon: f64 = caps[3].parse().unwrap_or(0.0);
            if &caps[4] == "W" {
                lon = -lon;
            }
            (Some(lat), Some(lon))
        })
        .unwrap_or((None, None));

    let is_critical = CRITICAL_CATEGORIES.contains(&category.as_str());

    Some(DscMessage {
        format_code,
        category,
        source_mmsi: source,
        dest_mmsi: dest.filter(|d| MMSI.is_match(d)),
        nature_of_distress: nature,
        latitude,
        longitude,
        is_critical,
        raw_message: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_distress_call_with_position() {
        let msg = parse_line(
            "DSC: FMT=112 CAT=DISTRESS FROM=367123456 TO=ALL SHIPS NATURE=Fire POS=47.36N 122.20W",
        )
        .unwrap();
        assert_eq!(msg.format_code, "112");
        assert_eq!(msg.category, "DISTRESS");
        assert_eq!(msg.source_mmsi, "367123456");
        assert!(msg.dest_mmsi.is_none());
        assert_eq!(msg.nature_of_distress.as_deref(), Some("Fire"));
        assert_eq!(msg.latitude, Some(47.36));
        assert_eq!(msg.longitude, Some(-122.20));
        assert!(msg.is_critical);
    }

    #[test]
    fn parses_routine_call_colon_form() {
        let msg =
            parse_line("FORMAT: 116  CATEGORY: ROUTINE  SOURCE: 367999000  DEST: 003669999")
                .unwrap();
        assert_eq!(msg.format_code, "116");
        assert_eq!(msg.category, "ROUTINE");
        assert_eq!(msg.dest_mmsi.as_deref(), Some("003669999"));
        assert!(!msg.is_critical);
        assert!(msg.latitude.is_none());
    }

    #[test]
    fn urgency_is_critical() {
        let msg = parse_line("CAT=URGENCY FROM=367000001").unwrap();
        assert!(msg.is_critical);
    }

    #[test]
    fn rejects_non_dsc_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("Tuned to 156.525 MHz").is_none());
        assert!(parse_line("FROM=12345").is_none()); // not a 9-digit MMSI
    }
}
