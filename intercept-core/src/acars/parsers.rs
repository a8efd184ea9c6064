//! Field parsers for ACARS free-text payloads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static BPOS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"#M\d[A-Z]*POS([NS])(\d{2,5})([EW])(\d{3,6}),([^,]*),(\d{4,6}),(\d{2,3})(?:,([NS]\d{2,5}[EW]\d{3,6}))?(?:,([A-Z]{3,4}))?",
    )
    .unwrap()
});

static TEMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/TS([MP]?)(\d{2,3})").unwrap());

static WIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:WND|WIND)\s*(\d{3})[/ ]?(\d{2,3})").unwrap());
static AIRPORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z]{3,4})\b").unwrap());
static WX_TEMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:TMP|TEMP|T)\s*([MP+-]?\d{1,3})").unwrap());
static VIS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"VIS\s*(\d+(?:\.\d+)?)").unwrap());

static OOOI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Z]{3,4})\s+([A-Z]{3,4})\s+(\d{4})\s+(\d{4})\s+(\d{4})\s+(\d{4})").unwrap()
});
static AIRPORT_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]{3,4})\s+([A-Z]{3,4})").unwrap());
static TIME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\b").unwrap());

/// Decode a truncated-minutes coordinate like `42411` -> 42.411 deg.
fn decode_coordinate(raw: &str, degree_digits: usize) -> f64 {
    if raw.len() > degree_digits {
        let degrees: f64 = raw[..degree_digits].parse().unwrap_or(0.0);
        let frac: f64 = raw[degree_digits..].parse().unwrap_or(0.0);
        let minutes = frac / 10f64.powi((raw.len() - degree_digits) as i32) * 60.0;
        degrees + minutes / 60.0
    } else {
        raw.parse().unwrap_or(0.0)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Parse H1 / `#MnBPOS` position report fields.
///
/// Example: `#M1BPOSN42411W086034,CSG,070852,340,N42441W087074,DTW,0757,224A8C`
/// yields lat/lon in decimal degrees, the current waypoint, report time,
/// flight level and (when present) the destination airport.
pub fn parse_position_report(text: &str) -> Option<Map<String, Value>> {
    if text.is_empty() {
        return None;
    }
    let mut result = Map::new();

    if let Some(caps) = BPOS_RE.captures(text) {
        // Latitude uses 2 degree digits, longitude 3.
        let mut lat = decode_coordinate(&caps[2], 2);
        if &caps[1] == "S" {
            lat = -lat;
        }
        let mut lon = decode_coordinate(&caps[4], 3);
        if &caps[3] == "W" {
            lon = -lon;
        }

        result.insert("lat".to_string(), Value::from(round4(lat)));
        result.insert("lon".to_string(), Value::from(round4(lon)));
        let waypoint = caps[5].trim();
        result.insert(
            "waypoint".to_string(),
            if waypoint.is_empty() {
                Value::Null
            } else {
                Value::from(waypoint)
            },
        );
        result.insert("time".to_string(), Value::from(&caps[6]));
        result.insert(
            "flight_level".to_string(),
            Value::from(format!("FL{}", &caps[7])),
        );
        if let Some(dest) = caps.get(9) {
            result.insert("destination".to_string(), Value::from(dest.as_str()));
        }
    }

    if let Some(caps) = TEMP_RE.captures(text) {
        let sign = if &caps[1] == "M" { "-" } else { "" };
        result.insert(
            "temperature".to_string(),
            Value::from(format!("{sign}{} C", &caps[2])),
        );
    }

    (!result.is_empty()).then_some(result)
}

const ENGINE_KEYS: [(&str, &str); 14] = [
    ("SM", "Source mode"),
    ("AC0", "Eng 1 N2 (%)"),
    ("AC1", "Eng 2 N2 (%)"),
    ("FL", "Flight level"),
    ("FU", "Fuel used (lbs)"),
    ("ES", "EGT spread"),
    ("BA", "Bleed air"),
    ("CO", "Config"),
    ("AO", "Auto"),
    ("EGT", "Exhaust gas temp"),
    ("OIT", "Oil temp"),
    ("OIP", "Oil pressure"),
    ("FF", "Fuel flow"),
    ("VIB", "Vibration"),
];

static ENGINE_RES: Lazy<Vec<(&'static str, &'static str, Regex)>> = Lazy::new(|| {
    ENGINE_KEYS
        .iter()
        .map(|(key, description)| {
            let pattern = format!(r"\b{}[/: ]?\s*([+-]?\d+\.?\d*)", regex::escape(key));
            (*key, *description, Regex::new(&pattern).expect("engine key pattern"))
        })
        .collect()
});

/// Parse DF (engine / DFDR) messages: `#DFB` followed by KEY/VALUE pairs.
pub fn parse_engine_data(text: &str) -> Option<Map<String, Value>> {
    if text.is_empty() {
        return None;
    }

    let mut result = Map::new();
    for (key, description, re) in ENGINE_RES.iter() {
        if let Some(caps) = re.captures(text) {
            let mut entry = Map::new();
            entry.insert("value".to_string(), Value::from(&caps[1]));
            entry.insert("description".to_string(), Value::from(*description));
            result.insert((*key).to_string(), Value::Object(entry));
        }
    }

    (!result.is_empty()).then_some(result)
}

/// Parse weather report fields (/WX blocks, METAR-like data).
pub fn parse_weather_data(text: &str) -> Option<Map<String, Value>> {
    if text.is_empty() {
        return None;
    }
    let mut result = Map::new();

    if let Some(caps) = WIND_RE.captures(text) {
        result.insert("wind_dir".to_string(), Value::from(format!("{} deg", &caps[1])));
        result.insert(
            "wind_speed".to_string(),
            Value::from(format!("{} kts", &caps[2])),
        );
    }

    let mut airports: Vec<String> = Vec::new();
    for caps in AIRPORT_RE.captures_iter(text) {
        let code = caps[1].to_string();
        if !airports.contains(&code) {
            airports.push(code);
        }
        if airports.len() == 4 {
            break;
        }
    }
    if !airports.is_empty() {
        result.insert("airports".to_string(), Value::from(airports));
    }

    if let Some(caps) = WX_TEMP_RE.captures(text) {
        let value = caps[1].replace('M', "-").replace('P', "");
        result.insert("temperature".to_string(), Value::from(format!("{value} C")));
    }

    if let Some(caps) = VIS_RE.captures(text) {
        result.insert("visibility".to_string(), Value::from(format!("{} SM", &caps[1])));
    }

    (!result.is_empty()).then_some(result)
}

/// Parse 5Z OOOI (Out/Off/On/In) gate time messages.
///
/// Typical format: `KJFK KLAX 1423 1435 1812 1824`.
pub fn parse_oooi(text: &str) -> Option<Map<String, Value>> {
    if text.is_empty() {
        return None;
    }
    let mut result = Map::new();

    if let Some(caps) = OOOI_RE.captures(text) {
        result.insert("origin".to_string(), Value::from(&caps[1]));
        result.insert("destination".to_string(), Value::from(&caps[2]));
        result.insert("out".to_string(), Value::from(&caps[3]));
        result.insert("off".to_string(), Value::from(&caps[4]));
        result.insert("on".to_string(), Value::from(&caps[5]));
        result.insert("in".to_string(), Value::from(&caps[6]));
        return Some(result);
    }

    if let Some(caps) = AIRPORT_PAIR_RE.captures(text) {
        result.insert("origin".to_string(), Value::from(&caps[1]));
        result.insert("destination".to_string(), Value::from(&caps[2]));
    }

    for (i, caps) in TIME_RE.captures_iter(text).take(4).enumerate() {
        let label = ["out", "off", "on", "in"][i];
        result.insert(label.to_string(), Value::from(&caps[1]));
    }

    (!result.is_empty()).then_some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bpos_position() {
        let parsed = parse_position_report(
            "#M1BPOSN42411W086034,CSG,070852,340,N42441W087074,DTW,0757,224A8C",
        )
        .unwrap();
        let lat = parsed["lat"].as_f64().unwrap();
        let lon = parsed["lon"].as_f64().unwrap();
        assert!((lat - 42.411).abs() < 0.001, "lat {lat}");
        assert!((lon + 86.034).abs() < 0.001, "lon {lon}");
        assert_eq!(parsed["waypoint"], "CSG");
        assert_eq!(parsed["time"], "070852");
        assert_eq!(parsed["flight_level"], "FL340");
        assert_eq!(parsed["destination"], "DTW");
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let parsed = parse_position_report("#M2BPOSS33567E151123,SY,101010,370").unwrap();
        assert!(parsed["lat"].as_f64().unwrap() < 0.0);
        assert!(parsed["lon"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn parses_temperature_block() {
        let parsed = parse_position_report("#M1BPOSN42411W086034,CSG,070852,340/TSM045").unwrap();
        assert_eq!(parsed["temperature"], "-045 C");
    }

    #[test]
    fn parses_engine_pairs() {
        let parsed = parse_engine_data("#DFB SM/1 AC0/98.4 AC1/97.9 FL/350 FU/10423").unwrap();
        assert_eq!(parsed["AC0"]["value"], "98.4");
        assert_eq!(parsed["AC0"]["description"], "Eng 1 N2 (%)");
        assert_eq!(parsed["FL"]["value"], "350");
        assert_eq!(parsed["FU"]["value"], "10423");
    }

    #[test]
    fn parses_weather_fields() {
        let parsed = parse_weather_data("KDTW WND270 15 VIS 10 TMP24").unwrap();
        assert_eq!(parsed["wind_dir"], "270 deg");
        assert_eq!(parsed["wind_speed"], "15 kts");
        assert_eq!(parsed["visibility"], "10 SM");
        assert!(parsed["airports"]
            .as_array()
            .unwrap()
            .iter()
            .any(|a| a == "KDTW"));
    }

    #[test]
    fn parses_full_oooi_block() {
        let parsed = parse_oooi("KJFK KLAX 1423 1435 1812 1824").unwrap();
        assert_eq!(parsed["origin"], "KJFK");
        assert_eq!(parsed["destination"], "KLAX");
        assert_eq!(parsed["out"], "1423");
        assert_eq!(parsed["in"], "1824");
    }

    #[test]
    fn partial_oooi_still_extracts_airports() {
        let parsed = parse_oooi("KJFK KLAX 1423").unwrap();
        assert_eq!(parsed["origin"], "KJFK");
        assert_eq!(parsed["out"], "1423");
        assert!(parsed.get("off").is_none());
    }

    #[test]
    fn empty_text_yields_none() {
        assert!(parse_position_report("").is_none());
        assert!(parse_engine_data("no keys here at all").is_none());
        assert!(parse_oooi("lowercase only").is_none());
    }
}
