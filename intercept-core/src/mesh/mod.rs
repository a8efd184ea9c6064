//! Meshtastic domain logic: serial stream framing, PSK handling,
//! node tracking, and message-stream filtering.
//!
//! The server crate owns the serial port and the protobuf decode; this
//! module owns everything that can be tested without a radio.

mod frame;
mod nodes;
mod psk;

pub use frame::{FrameAccumulator, MAX_FRAME_LEN};
pub use nodes::{MeshNode, NodeTable, NodeUpdate};
pub use psk::parse_psk;

use crate::error::CoreError;

/// Broadcast destination for mesh packets.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// Maximum text payload a single mesh packet can carry.
pub const MAX_TEXT_LEN: usize = 237;

/// Channel indices are 0-7.
pub const MAX_CHANNEL: u32 = 7;

/// Port numbers whose packets are internal protocol chatter: they still
/// update the node table but are hidden from the user-visible message
/// stream.
pub const CHATTER_PORTS: [&str; 5] = [
    "ROUTING_APP",
    "ADMIN_APP",
    "TELEMETRY_APP",
    "POSITION_APP",
    "NODEINFO_APP",
];

/// True when a port's traffic should be hidden from the message stream.
pub fn is_protocol_chatter(port: &str) -> bool {
    CHATTER_PORTS.contains(&port)
}

/// Canonical `!xxxxxxxx` id for a node number.
pub fn format_node_id(num: u32) -> String {
    format!("!{num:08x}")
}

/// Parse a destination: `None`/`^all` broadcast, `!hex` node id, or a
/// bare numeric node number.
pub fn parse_destination(destination: Option<&str>) -> Result<u32, CoreError> {
    let Some(dest) = destination.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(BROADCAST_ADDR);
    };
    if dest == "^all" {
        return Ok(BROADCAST_ADDR);
    }
    if let Some(hex_part) = dest.strip_prefix('!') {
        return u32::from_str_radix(hex_part, 16)
            .map_err(|_| CoreError::InvalidDestination(dest.to_string()));
    }
    dest.parse::<u32>()
        .map_err(|_| CoreError::InvalidDestination(dest.to_string()))
}

/// Validate an outbound text message and its addressing.
pub fn validate_send(text: &str, channel: u32) -> Result<(), CoreError> {
    if text.is_empty() || text.len() > MAX_TEXT_LEN {
        return Err(CoreError::TextTooLong);
    }
    if channel > MAX_CHANNEL {
        return Err(CoreError::InvalidChannel(channel));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_forms() {
        assert_eq!(parse_destination(None).unwrap(), BROADCAST_ADDR);
        assert_eq!(parse_destination(Some("^all")).unwrap(), BROADCAST_ADDR);
        assert_eq!(parse_destination(Some("!a1b2c3d4")).unwrap(), 0xa1b2c3d4);
        assert_eq!(parse_destination(Some("305419896")).unwrap(), 0x12345678);
        assert!(parse_destination(Some("not-a-node")).is_err());
    }

    #[test]
    fn node_id_formatting() {
        assert_eq!(format_node_id(0xa1b2c3d4), "!a1b2c3d4");
        assert_eq!(format_node_id(1), "!00000001");
    }

    #[test]
    fn send_validation() {
        assert!(validate_send("hello", 0).is_ok());
        assert!(validate_send("", 0).is_err());
        assert!(validate_send(&"x".repeat(238), 0).is_err());
        assert!(validate_send(&"x".repeat(237), 7).is_ok());
        assert!(validate_send("hi", 8).is_err());
    }

    #[test]
    fn chatter_filter() {
        assert!(is_protocol_chatter("ROUTING_APP"));
        assert!(is_protocol_chatter("NODEINFO_APP"));
        assert!(!is_protocol_chatter("TEXT_MESSAGE_APP"));
    }
}
