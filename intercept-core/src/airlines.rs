//! IATA / ICAO airline code mapping for flight number translation.
//!
//! ACARS messages usually carry IATA flight numbers ("UA2412") while
//! ADS-B callsigns use ICAO prefixes ("UAL2412"). The correlator
//! expands query terms through this table in both directions.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// IATA (2-letter) to ICAO (3-letter) prefixes for common airlines.
pub static IATA_TO_ICAO: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // North America - major
        ("AA", "AAL"),
        ("DL", "DAL"),
        ("UA", "UAL"),
        ("WN", "SWA"),
        ("B6", "JBU"),
        ("AS", "ASA"),
        ("NK", "NKS"),
        ("F9", "FFT"),
        ("G4", "AAY"),
        ("HA", "HAL"),
        ("SY", "SCX"),
        ("WS", "WJA"),
        ("AC", "ACA"),
        ("WG", "WGN"),
        ("TS", "TSC"),
        ("PD", "POE"),
        ("QX", "QXE"),
        ("OO", "SKW"),
        ("YX", "RPA"),
        ("9E", "FLG"),
        ("MQ", "ENY"),
        ("YV", "ASH"),
        ("ZW", "AWI"),
        ("G7", "GJS"),
        ("EV", "ASQ"),
        ("AM", "AMX"),
        ("VB", "VIV"),
        ("Y4", "VOI"),
        // North America - cargo
        ("5X", "UPS"),
        ("FX", "FDX"),
        // Europe
        ("BA", "BAW"),
        ("LH", "DLH"),
        ("AF", "AFR"),
        ("KL", "KLM"),
        ("IB", "IBE"),
        ("AZ", "ITY"),
        ("SK", "SAS"),
        ("AY", "FIN"),
        ("OS", "AUA"),
        ("LX", "SWR"),
        ("SN", "BEL"),
        ("TP", "TAP"),
        ("EI", "EIN"),
        ("U2", "EZY"),
        ("FR", "RYR"),
        ("W6", "WZZ"),
        ("VY", "VLG"),
        ("PC", "PGT"),
        ("TK", "THY"),
        ("LO", "LOT"),
        ("BT", "BTI"),
        ("DY", "NAX"),
        ("VS", "VIR"),
        ("EW", "EWG"),
        // Asia-Pacific
        ("SQ", "SIA"),
        ("CX", "CPA"),
        ("QF", "QFA"),
        ("JL", "JAL"),
        ("NH", "ANA"),
        ("KE", "KAL"),
        ("OZ", "AAR"),
        ("CI", "CAL"),
        ("BR", "EVA"),
        ("CZ", "CSN"),
        ("MU", "CES"),
        ("CA", "CCA"),
        ("AI", "AIC"),
        ("GA", "GIA"),
        ("TG", "THA"),
        ("MH", "MAS"),
        ("PR", "PAL"),
        ("VN", "HVN"),
        ("NZ", "ANZ"),
        ("3K", "JSA"),
        ("JQ", "JST"),
        ("AK", "AXM"),
        ("TR", "TGW"),
        ("5J", "CEB"),
        // Middle East / Africa
        ("EK", "UAE"),
        ("QR", "QTR"),
        ("EY", "ETD"),
        ("GF", "GFA"),
        ("SV", "SVA"),
        ("ET", "ETH"),
        ("MS", "MSR"),
        ("SA", "SAA"),
        ("RJ", "RJA"),
        ("WY", "OMA"),
        // South America
        ("LA", "LAN"),
        ("G3", "GLO"),
        ("AD", "AZU"),
        ("AV", "AVA"),
        ("CM", "CMP"),
        ("AR", "ARG"),
    ])
});

/// Reverse mapping (ICAO to IATA).
pub static ICAO_TO_IATA: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| IATA_TO_ICAO.iter().map(|(k, v)| (*v, *k)).collect());

static FLIGHT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Z]{2,3})(\d+[A-Z]?)$").unwrap());

/// Translate a flight number to its equivalent forms.
///
/// "UA2412" (IATA) yields `["UAL2412"]`; "UAL2412" (ICAO) yields
/// `["UA2412"]`. Unknown or unsplittable identifiers yield nothing.
pub fn translate_flight(flight: &str) -> Vec<String> {
    let upper = flight.trim().to_ascii_uppercase();
    let Some(caps) = FLIGHT_RE.captures(&upper) else {
        return Vec::new();
    };
    let prefix = &caps[1];
    let number = &caps[2];

    let mut results = Vec::new();
    if let Some(icao) = IATA_TO_ICAO.get(prefix) {
        results.push(format!("{icao}{number}"));
    }
    if let Some(iata) = ICAO_TO_IATA.get(prefix) {
        results.push(format!("{iata}{number}"));
    }
    results
}

/// Expand a set of callsign/flight search terms with translated variants.
pub fn expand_search_terms(terms: &[String]) -> Vec<String> {
    let mut expanded: Vec<String> = terms
        .iter()
        .map(|t| t.trim().to_ascii_uppercase())
        .filter(|t| !t.is_empty())
        .collect();
    for term in expanded.clone() {
        for translated in translate_flight(&term) {
            if !expanded.contains(&translated) {
                expanded.push(translated);
            }
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iata_to_icao() {
        assert_eq!(translate_flight("UA2412"), vec!["UAL2412"]);
    }

    #[test]
    fn icao_to_iata() {
        assert_eq!(translate_flight("UAL2412"), vec!["UA2412"]);
    }

    #[test]
    fn unknown_prefix_yields_nothing() {
        assert!(translate_flight("ZZ123").is_empty());
        assert!(translate_flight("N123AB").is_empty());
        assert!(translate_flight("").is_empty());
    }

    #[test]
    fn translation_round_trips() {
        // For every prefix in either table, translating twice must
        // arrive back at the original flight number.
        for flight in ["UA2412", "BAW12", "DL100A", "UPS901"] {
            let once = translate_flight(flight);
            assert!(!once.is_empty(), "no translation for {flight}");
            let twice: Vec<String> = once.iter().flat_map(|f| translate_flight(f)).collect();
            assert!(
                twice.iter().any(|f| f == flight),
                "{flight} did not round-trip: {twice:?}"
            );
        }
    }

    #[test]
    fn expand_adds_variants_without_duplicates() {
        let expanded = expand_search_terms(&["ua2412".to_string(), "UAL2412".to_string()]);
        assert!(expanded.contains(&"UA2412".to_string()));
        assert!(expanded.contains(&"UAL2412".to_string()));
        assert_eq!(
            expanded.iter().filter(|t| t.as_str() == "UAL2412").count(),
            1
        );
    }
}
