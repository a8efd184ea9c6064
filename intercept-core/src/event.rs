//! Typed event model for the cross-mode event bus.
//!
//! Every decoder line that parses becomes an [`Event`]: a type tag plus a
//! payload. Payload fields that have a typed origin (a parsed pager
//! message, a vessel update, a burst marker) are built through the
//! `From` conversions in the per-mode modules; fields we merely pass
//! through from a tool's JSON output live in the schemaless map.
//! Serialization to JSON happens once, at the SSE boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Event type tags observed on the bus.
///
/// `Keepalive` and `Ping` never traverse the recorder/alert/pattern
/// sinks; `Status` and `Error` are exempt from overflow dropping where
/// avoidable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Vessel,
    Aircraft,
    Acars,
    Vdl2,
    Mesh,
    MeshNode,
    Position,
    Meter,
    Decode,
    DecodeRaw,
    DecodeLevel,
    DecodeWaveform,
    DecodeSpectrum,
    RxLevel,
    RxWaveform,
    RxSpectrum,
    RxBurst,
    RxStats,
    RxHint,
    Sweep,
    TxStatus,
    SatPass,
    Info,
    Raw,
    Status,
    Error,
    Keepalive,
    Ping,
}

impl EventKind {
    /// Tags that are heartbeat noise and must not reach the sinks.
    pub fn is_ignored_by_sinks(self) -> bool {
        matches!(self, EventKind::Keepalive | EventKind::Ping)
    }

    /// Tags that should survive queue overflow ahead of data events.
    pub fn is_control(self) -> bool {
        matches!(self, EventKind::Status | EventKind::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Vessel => "vessel",
            EventKind::Aircraft => "aircraft",
            EventKind::Acars => "acars",
            EventKind::Vdl2 => "vdl2",
            EventKind::Mesh => "mesh",
            EventKind::MeshNode => "mesh_node",
            EventKind::Position => "position",
            EventKind::Meter => "meter",
            EventKind::Decode => "decode",
            EventKind::DecodeRaw => "decode_raw",
            EventKind::DecodeLevel => "decode_level",
            EventKind::DecodeWaveform => "decode_waveform",
            EventKind::DecodeSpectrum => "decode_spectrum",
            EventKind::RxLevel => "rx_level",
            EventKind::RxWaveform => "rx_waveform",
            EventKind::RxSpectrum => "rx_spectrum",
            EventKind::RxBurst => "rx_burst",
            EventKind::RxStats => "rx_stats",
            EventKind::RxHint => "rx_hint",
            EventKind::Sweep => "sweep",
            EventKind::TxStatus => "tx_status",
            EventKind::SatPass => "sat_pass",
            EventKind::Info => "info",
            EventKind::Raw => "raw",
            EventKind::Status => "status",
            EventKind::Error => "error",
            EventKind::Keepalive => "keepalive",
            EventKind::Ping => "ping",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bus event: a type tag plus its payload fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Event {
            kind,
            fields: Map::new(),
        }
    }

    /// Build an event from a tool's JSON object, passing unknown fields
    /// through untouched.
    pub fn passthrough(kind: EventKind, fields: Map<String, Value>) -> Self {
        Event { kind, fields }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn info(text: impl Into<String>) -> Self {
        Event::new(EventKind::Info).with("text", text.into())
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Event::new(EventKind::Raw).with("text", text.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Event::new(EventKind::Error).with("message", message.into())
    }

    pub fn status(status: impl Into<String>) -> Self {
        Event::new(EventKind::Status).with("status", status.into())
    }

    pub fn keepalive() -> Self {
        Event::new(EventKind::Keepalive)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Serialize for the SSE boundary: the payload fields with `type`
    /// set to the tag and, when provided, an ISO-8601 UTC `timestamp`.
    pub fn to_json(&self, timestamp: Option<&str>) -> Value {
        let mut map = self.fields.clone();
        map.insert("type".to_string(), Value::from(self.kind.as_str()));
        if let Some(ts) = timestamp {
            map.entry("timestamp".to_string())
                .or_insert_with(|| Value::from(ts));
        }
        Value::Object(map)
    }

    /// Payload view for sink matching (alert rules, pattern extraction).
    pub fn payload(&self) -> &Map<String, Value> {
        &self.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_serde() {
        let json = serde_json::to_string(&EventKind::RxBurst).unwrap();
        assert_eq!(json, "\"rx_burst\"");
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventKind::RxBurst);
    }

    #[test]
    fn keepalive_is_ignored_by_sinks() {
        assert!(EventKind::Keepalive.is_ignored_by_sinks());
        assert!(EventKind::Ping.is_ignored_by_sinks());
        assert!(!EventKind::Message.is_ignored_by_sinks());
    }

    #[test]
    fn to_json_adds_type_and_timestamp() {
        let event = Event::raw("POCSAG noise");
        let json = event.to_json(Some("2026-01-01T00:00:00Z"));
        assert_eq!(json["type"], "raw");
        assert_eq!(json["text"], "POCSAG noise");
        assert_eq!(json["timestamp"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn to_json_keeps_existing_timestamp() {
        let event = Event::new(EventKind::Message).with("timestamp", "earlier");
        let json = event.to_json(Some("later"));
        assert_eq!(json["timestamp"], "earlier");
    }
}
