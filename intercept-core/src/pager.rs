//! Parser for multimon-ng pager decoder output (POCSAG and FLEX).
//!
//! multimon-ng emits one message per line on its (pseudo-)terminal:
//!
//! ```text
//! POCSAG512: Address: 1234567  Function: 0  Alpha:   Message here
//! POCSAG1200: Address: 1234567  Function: 0  Numeric: 123-456-7890
//! POCSAG2400: Address: 1234567  Function: 0
//! FLEX: 2024-01-01 12:00:00 1600/2/K 09.085 [001122334] ALN Message here
//! FLEX|2024-01-01|12:00:00|1600/2/K|09.085|001122334|ALN|Message
//! ```

use crate::event::{Event, EventKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static POCSAG_MSG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(POCSAG\d+):\s*Address:\s*(\d+)\s+Function:\s*(\d+)\s+(Alpha|Numeric):\s*(.*)$")
        .unwrap()
});

static POCSAG_TONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(POCSAG\d+):\s*Address:\s*(\d+)\s+Function:\s*(\d+)\s*$").unwrap());

static FLEX_FULL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^FLEX[:\|]\s*[\d\-]+[\s\|]+[\d:]+[\s\|]+([\d/A-Z]+)[\s\|]+([\d.]+)[\s\|]+\[?(\d+)\]?[\s\|]+(\w+)[\s\|]+(.*)$",
    )
    .unwrap()
});

static FLEX_SIMPLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^FLEX:\s*(.+)$").unwrap());

/// A decoded pager message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagerMessage {
    pub protocol: String,
    pub address: String,
    pub function: String,
    pub msg_type: String,
    pub message: String,
}

impl From<PagerMessage> for Event {
    fn from(msg: PagerMessage) -> Self {
        Event::new(EventKind::Message)
            .with("protocol", msg.protocol)
            .with("address", msg.address)
            .with("function", msg.function)
            .with("msg_type", msg.msg_type)
            .with("message", msg.message)
    }
}

/// Parse one multimon-ng output line. Returns `None` for lines that are
/// not recognised pager messages (startup banners, noise).
pub fn parse_line(line: &str) -> Option<PagerMessage> {
    let line = line.trim();

    if let Some(caps) = POCSAG_MSG.captures(line) {
        let message = caps[5].trim();
        return Some(PagerMessage {
            protocol: caps[1].to_string(),
            address: caps[2].to_string(),
            function: caps[3].to_string(),
            msg_type: caps[4].to_string(),
            message: if message.is_empty() {
                "[No Message]".to_string()
            } else {
                message.to_string()
            },
        });
    }

    if let Some(caps) = POCSAG_TONE.captures(line) {
        return Some(PagerMessage {
            protocol: caps[1].to_string(),
            address: caps[2].to_string(),
            function: caps[3].to_string(),
            msg_type: "Tone".to_string(),
            message: "[Tone Only]".to_string(),
        });
    }

    if let Some(caps) = FLEX_FULL.captures(line) {
        let message = caps[5].trim();
        return Some(PagerMessage {
            protocol: "FLEX".to_string(),
            address: caps[3].to_string(),
            function: caps[1].to_string(),
            msg_type: caps[4].to_string(),
            message: if message.is_empty() {
                "[No Message]".to_string()
            } else {
                message.to_string()
            },
        });
    }

    if let Some(caps) = FLEX_SIMPLE.captures(line) {
        return Some(PagerMessage {
            protocol: "FLEX".to_string(),
            address: "Unknown".to_string(),
            function: String::new(),
            msg_type: "Unknown".to_string(),
            message: caps[1].trim().to_string(),
        });
    }

    None
}

/// Pager protocols multimon-ng can be asked to decode.
pub const PAGER_PROTOCOLS: [&str; 4] = ["POCSAG512", "POCSAG1200", "POCSAG2400", "FLEX"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pocsag_numeric() {
        let msg = parse_line("POCSAG1200: Address: 1234567  Function: 0  Numeric: 123-456-7890")
            .unwrap();
        assert_eq!(msg.protocol, "POCSAG1200");
        assert_eq!(msg.address, "1234567");
        assert_eq!(msg.function, "0");
        assert_eq!(msg.msg_type, "Numeric");
        assert_eq!(msg.message, "123-456-7890");
    }

    #[test]
    fn parses_pocsag_alpha() {
        let msg = parse_line("POCSAG512: Address: 99  Function: 3  Alpha:   CALL DISPATCH NOW")
            .unwrap();
        assert_eq!(msg.protocol, "POCSAG512");
        assert_eq!(msg.msg_type, "Alpha");
        assert_eq!(msg.message, "CALL DISPATCH NOW");
    }

    #[test]
    fn parses_tone_only_page() {
        let msg = parse_line("POCSAG2400: Address: 555000  Function: 1").unwrap();
        assert_eq!(msg.msg_type, "Tone");
        assert_eq!(msg.message, "[Tone Only]");
    }

    #[test]
    fn empty_alpha_becomes_placeholder() {
        let msg = parse_line("POCSAG512: Address: 1  Function: 0  Alpha: ").unwrap();
        assert_eq!(msg.message, "[No Message]");
    }

    #[test]
    fn parses_flex_standard_format() {
        let msg = parse_line("FLEX: 2024-03-01 10:22:33 1600/2/K 09.085 [001122334] ALN Water leak B4")
            .unwrap();
        assert_eq!(msg.protocol, "FLEX");
        assert_eq!(msg.address, "001122334");
        assert_eq!(msg.function, "1600/2/K");
        assert_eq!(msg.msg_type, "ALN");
        assert_eq!(msg.message, "Water leak B4");
    }

    #[test]
    fn parses_flex_pipe_format() {
        let msg =
            parse_line("FLEX|2024-03-01|10:22:33|1600/2/K|09.085|001122334|ALN|Water leak B4")
                .unwrap();
        assert_eq!(msg.protocol, "FLEX");
        assert_eq!(msg.address, "001122334");
        assert_eq!(msg.message, "Water leak B4");
    }

    #[test]
    fn rejects_noise() {
        assert!(parse_line("multimon-ng 1.1.9").is_none());
        assert!(parse_line("Enabled demodulators: POCSAG1200").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn message_event_has_expected_shape() {
        let msg = parse_line("POCSAG1200: Address: 1234567  Function: 0  Numeric: 123-456-7890")
            .unwrap();
        let event: Event = msg.into();
        let json = event.to_json(None);
        assert_eq!(json["type"], "message");
        assert_eq!(json["protocol"], "POCSAG1200");
        assert_eq!(json["address"], "1234567");
        assert_eq!(json["function"], "0");
        assert_eq!(json["msg_type"], "Numeric");
        assert_eq!(json["message"], "123-456-7890");
    }
}
