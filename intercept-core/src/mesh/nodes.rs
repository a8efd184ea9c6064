//! Mesh node table.
//!
//! Messages on the bus carry only node numbers; names are resolved
//! through this table at serialisation time. The table is enriched by
//! NODEINFO, POSITION and TELEMETRY packets even when those packets are
//! filtered out of the user-visible message stream.

use super::format_node_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Everything we know about one mesh node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MeshNode {
    pub num: u32,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heard: Option<f64>,
    pub packet_count: u64,
}

/// One observation extracted from a decoded packet.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeUpdate {
    Seen,
    NodeInfo {
        long_name: String,
        short_name: String,
    },
    Position {
        latitude: f64,
        longitude: f64,
        altitude: Option<i32>,
    },
    Telemetry {
        battery_level: Option<u32>,
        voltage: Option<f64>,
    },
    Snr(f64),
}

/// `num -> node` map.
#[derive(Debug, Default)]
pub struct NodeTable {
    nodes: HashMap<u32, MeshNode>,
}

impl NodeTable {
    pub fn new() -> Self {
        NodeTable {
            nodes: HashMap::new(),
        }
    }

    /// Apply an observation of `num` at `now` (epoch seconds).
    pub fn apply(&mut self, num: u32, now: f64, update: NodeUpdate) {
        let node = self.nodes.entry(num).or_insert_with(|| MeshNode {
            num,
            id: format_node_id(num),
            ..MeshNode::default()
        });
        node.last_heard = Some(now);
        node.packet_count += 1;

        match update {
            NodeUpdate::Seen => {}
            NodeUpdate::NodeInfo {
                long_name,
                short_name,
            } => {
                if !long_name.is_empty() {
                    node.long_name = Some(long_name);
                }
                if !short_name.is_empty() {
                    node.short_name = Some(short_name);
                }
            }
            NodeUpdate::Position {
                latitude,
                longitude,
                altitude,
            } => {
                node.latitude = Some(latitude);
                node.longitude = Some(longitude);
                if altitude.is_some() {
                    node.altitude = altitude;
                }
            }
            NodeUpdate::Telemetry {
                battery_level,
                voltage,
            } => {
                if battery_level.is_some() {
                    node.battery_level = battery_level;
                }
                if voltage.is_some() {
                    node.voltage = voltage;
                }
            }
            NodeUpdate::Snr(snr) => node.snr = Some(snr),
        }
    }

    pub fn get(&self, num: u32) -> Option<&MeshNode> {
        self.nodes.get(&num)
    }

    /// Display name for a node: long name, else short name, else the
    /// `!xxxxxxxx` id.
    pub fn display_name(&self, num: u32) -> String {
        match self.nodes.get(&num) {
            Some(node) => node
                .long_name
                .clone()
                .or_else(|| node.short_name.clone())
                .unwrap_or_else(|| node.id.clone()),
            None => format_node_id(num),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, most recently heard first.
    pub fn all(&self) -> Vec<MeshNode> {
        let mut nodes: Vec<MeshNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| {
            b.last_heard
                .partial_cmp(&a.last_heard)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        nodes
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nodeinfo_and_position_enrich_one_node() {
        let mut table = NodeTable::new();
        table.apply(
            0xa1b2c3d4,
            100.0,
            NodeUpdate::NodeInfo {
                long_name: "Base Camp".to_string(),
                short_name: "BC".to_string(),
            },
        );
        table.apply(
            0xa1b2c3d4,
            101.0,
            NodeUpdate::Position {
                latitude: 47.6,
                longitude: -122.3,
                altitude: Some(120),
            },
        );
        let node = table.get(0xa1b2c3d4).unwrap();
        assert_eq!(node.id, "!a1b2c3d4");
        assert_eq!(node.long_name.as_deref(), Some("Base Camp"));
        assert_eq!(node.latitude, Some(47.6));
        assert_eq!(node.altitude, Some(120));
        assert_eq!(node.packet_count, 2);
        assert_eq!(node.last_heard, Some(101.0));
    }

    #[test]
    fn display_name_fallbacks() {
        let mut table = NodeTable::new();
        assert_eq!(table.display_name(1), "!00000001");
        table.apply(1, 0.0, NodeUpdate::Seen);
        assert_eq!(table.display_name(1), "!00000001");
        table.apply(
            1,
            1.0,
            NodeUpdate::NodeInfo {
                long_name: String::new(),
                short_name: "N1".to_string(),
            },
        );
        assert_eq!(table.display_name(1), "N1");
    }

    #[test]
    fn telemetry_preserves_missing_fields() {
        let mut table = NodeTable::new();
        table.apply(
            2,
            0.0,
            NodeUpdate::Telemetry {
                battery_level: Some(87),
                voltage: Some(3.9),
            },
        );
        table.apply(
            2,
            1.0,
            NodeUpdate::Telemetry {
                battery_level: None,
                voltage: None,
            },
        );
        let node = table.get(2).unwrap();
        assert_eq!(node.battery_level, Some(87));
        assert_eq!(node.voltage, Some(3.9));
    }

    #[test]
    fn all_sorts_by_recency() {
        let mut table = NodeTable::new();
        table.apply(1, 10.0, NodeUpdate::Seen);
        table.apply(2, 20.0, NodeUpdate::Seen);
        let all = table.all();
        assert_eq!(all[0].num, 2);
        assert_eq!(all[1].num, 1);
    }
}
