//! ACARS label code table.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Common ACARS label codes mapped to human-readable descriptions.
pub static ACARS_LABELS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        // Position & navigation
        ("H1", "Position report (HF data link)"),
        ("H2", "Weather report"),
        ("5Z", "OOOI (gate times)"),
        ("15", "Departure report"),
        ("16", "Arrival report"),
        ("20", "Position report"),
        ("22", "Fuel report"),
        ("2Z", "Off-gate report"),
        ("30", "Progress report"),
        ("44", "Weather request"),
        ("80", "Free text (3-char header)"),
        ("83", "Free text"),
        ("8E", "ATIS request"),
        // Engine & performance
        ("DF", "Engine data / DFDR"),
        ("D3", "Engine exceedance"),
        ("D6", "Engine trend data"),
        // ATS / air traffic services
        ("B1", "ATC request"),
        ("B2", "ATC clearance"),
        ("B3", "ATC comm test"),
        ("B6", "ATC departure clearance"),
        ("B9", "ATC message"),
        ("BA", "ATC advisory"),
        ("BB", "ATC response"),
        // CPDLC
        ("AA", "CPDLC message"),
        ("AB", "CPDLC response"),
        ("A0", "CPDLC uplink"),
        ("A1", "CPDLC downlink"),
        ("A2", "CPDLC connection request"),
        ("A3", "CPDLC logon/logoff"),
        ("A6", "CPDLC message"),
        ("A7", "CPDLC response"),
        ("AT", "CPDLC transfer"),
        // Handshake & link management
        ("_d", "Demand mode (link test)"),
        ("Q0", "Link test"),
        ("QA", "Link test reply"),
        ("QB", "Acknowledgement"),
        ("QC", "Link request"),
        ("QD", "Link accept"),
        ("QE", "Link reject"),
        ("QF", "Squitter / heartbeat"),
        ("QG", "Abort"),
        ("QH", "Version request"),
        ("QK", "Mode change"),
        ("QM", "Link verification"),
        ("QN", "Media advisory"),
        ("QP", "Polling"),
        ("QQ", "Status"),
        ("QR", "General response"),
        ("QS", "System table request"),
        ("QT", "System table"),
        ("QX", "Frequency change"),
        // Squawk & surveillance
        ("SQ", "Squawk assignment"),
        ("SA", "Surveillance data"),
        ("S1", "ADS-C report"),
        // Airline operations
        ("C1", "Crew scheduling"),
        ("C2", "Crew response"),
        ("C3", "Crew message"),
        ("C4", "Crew query"),
        ("10", "Delay message"),
        ("12", "Clearance request"),
        ("17", "Cargo/load data"),
        ("4T", "TWIP (terminal weather)"),
        ("4X", "Connectivity test"),
        ("50", "Weather observation"),
        ("51", "METAR/TAF request"),
        ("52", "METAR/TAF response"),
        ("54", "SIGMET / AIRMET"),
        ("70", "Maintenance report"),
        ("7A", "Fault message"),
        ("7B", "Fault clear"),
        ("F3", "Flight plan"),
        ("F5", "Flight plan amendment"),
        ("F6", "Route request"),
        ("F7", "Route clearance"),
        ("RA", "ATIS report"),
        ("RB", "ATIS request"),
    ])
});

/// Return a human-readable description for an ACARS label code.
pub fn translate_label(label: Option<&str>) -> String {
    let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
        return "Unknown label".to_string();
    };
    if let Some(description) = ACARS_LABELS.get(label) {
        return (*description).to_string();
    }
    if label.len() == 2 && label.starts_with('Q') {
        return format!("Link management ({label})");
    }
    format!("Label {label}")
}
