//! Meshtastic mesh radio over a serial device.
//!
//! Unlike the SDR modes there is no child process: the controller talks
//! the device's framed protobuf protocol directly on the serial port
//! (raw termios, 115200 baud). Incoming packets enrich the node table;
//! protocol chatter (routing, admin, telemetry, position, nodeinfo) is
//! filtered from the user-visible message stream while still updating
//! the nodes. Outbound text is validated (237-char limit, channel 0-7)
//! and framed back to the device.

use super::{base_status, field_str, ModeController, ModeError, ModeRuntime, PipelineSession};
use crate::config::Constants;
use crate::protos::meshtastic as proto;
use async_trait::async_trait;
use chrono::Utc;
use intercept_core::event::{Event, EventKind};
use intercept_core::mesh::{
    self, format_node_id, FrameAccumulator, NodeTable, NodeUpdate, BROADCAST_ADDR,
};
use log::{debug, info, warn};
use nix::sys::termios::{
    cfmakeraw, cfsetispeed, cfsetospeed, tcgetattr, tcsetattr, BaudRate, SetArg, SpecialCharacterIndices,
};
use protobuf::Message;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const MODE: &str = "meshtastic";

/// Well-known port numbers (subset).
mod port {
    pub const TEXT_MESSAGE_APP: u32 = 1;
    pub const POSITION_APP: u32 = 3;
    pub const NODEINFO_APP: u32 = 4;
    pub const ROUTING_APP: u32 = 5;
    pub const ADMIN_APP: u32 = 6;
    pub const TELEMETRY_APP: u32 = 67;
    pub const TRACEROUTE_APP: u32 = 70;
}

fn port_name(portnum: u32) -> &'static str {
    match portnum {
        port::TEXT_MESSAGE_APP => "TEXT_MESSAGE_APP",
        port::POSITION_APP => "POSITION_APP",
        port::NODEINFO_APP => "NODEINFO_APP",
        port::ROUTING_APP => "ROUTING_APP",
        port::ADMIN_APP => "ADMIN_APP",
        port::TELEMETRY_APP => "TELEMETRY_APP",
        port::TRACEROUTE_APP => "TRACEROUTE_APP",
        _ => "UNKNOWN_APP",
    }
}

/// Locally tracked channel configuration (index, name, key length).
/// The key itself never leaves the controller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChannelConfig {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub key_type: String,
    pub key_len: usize,
}

pub struct MeshtasticController {
    runtime: Arc<ModeRuntime>,
    constants: Constants,
    nodes: Arc<Mutex<NodeTable>>,
    writer: Mutex<Option<File>>,
    device_path: Mutex<Option<String>>,
    my_node_num: Arc<Mutex<Option<u32>>>,
    channels: Mutex<Vec<ChannelConfig>>,
}

impl MeshtasticController {
    pub fn new(runtime: Arc<ModeRuntime>, constants: Constants) -> Arc<Self> {
        Arc::new(MeshtasticController {
            runtime,
            constants,
            nodes: Arc::new(Mutex::new(NodeTable::new())),
            writer: Mutex::new(None),
            device_path: Mutex::new(None),
            my_node_num: Arc::new(Mutex::new(None)),
            channels: Mutex::new(Vec::new()),
        })
    }

    /// Configure a channel's name and pre-shared key. The PSK string
    /// accepts `none | default | random | base64:... | 0x... |
    /// simple:<passphrase>`.
    pub fn set_channel(
        &self,
        index: u32,
        name: Option<&str>,
        psk: Option<&str>,
    ) -> Result<Value, ModeError> {
        if index > intercept_core::mesh::MAX_CHANNEL {
            return Err(ModeError::Validation(format!(
                "Invalid channel index: {index}. Must be 0-7."
            )));
        }
        let (key_type, key) = match psk {
            Some(psk) => {
                let key = intercept_core::mesh::parse_psk(psk)
                    .map_err(|e| ModeError::Validation(e.to_string()))?;
                let key_type = match key.len() {
                    0 => "none",
                    1 => "default",
                    16 => "aes128",
                    32 => "aes256",
                    _ => "custom",
                };
                (key_type, key)
            }
            None => ("unchanged", Vec::new()),
        };

        let mut channels = self.channels.lock().unwrap();
        channels.retain(|c| c.index != index);
        let config = ChannelConfig {
            index,
            name: name.map(String::from),
            key_type: key_type.to_string(),
            key_len: key.len(),
        };
        channels.push(config.clone());
        channels.sort_by_key(|c| c.index);
        info!("Channel {} configured ({})", index, key_type);
        Ok(json!({"status": "configured", "channel": config}))
    }

    pub fn channels(&self) -> Vec<ChannelConfig> {
        self.channels.lock().unwrap().clone()
    }

    /// Candidate serial devices for auto-detection.
    pub fn candidate_devices() -> Vec<String> {
        let Ok(entries) = std::fs::read_dir("/dev") else {
            return Vec::new();
        };
        let mut candidates: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                (name.starts_with("ttyUSB") || name.starts_with("ttyACM"))
                    .then(|| format!("/dev/{name}"))
            })
            .collect();
        candidates.sort();
        candidates
    }

    pub fn nodes(&self) -> Vec<Value> {
        self.nodes
            .lock()
            .unwrap()
            .all()
            .into_iter()
            .filter_map(|node| serde_json::to_value(node).ok())
            .collect()
    }

    /// Send a text message to the mesh.
    pub fn send_text(
        &self,
        text: &str,
        channel: u32,
        destination: Option<&str>,
    ) -> Result<Value, ModeError> {
        mesh::validate_send(text, channel)
            .map_err(|e| ModeError::Validation(e.to_string()))?;
        let dest = mesh::parse_destination(destination)
            .map_err(|e| ModeError::Validation(e.to_string()))?;

        let mut writer_guard = self.writer.lock().unwrap();
        let Some(writer) = writer_guard.as_mut() else {
            return Err(ModeError::Validation("Not connected to device".to_string()));
        };

        let mut data = proto::Data::new();
        data.portnum = port::TEXT_MESSAGE_APP;
        data.payload = text.as_bytes().to_vec();

        let mut packet = proto::MeshPacket::new();
        packet.to_node = dest;
        packet.channel = channel;
        packet.id = rand::thread_rng().gen();
        packet.hop_limit = 3;
        packet.decoded = protobuf::MessageField::some(data);

        let mut to_radio = proto::ToRadio::new();
        to_radio.packet = protobuf::MessageField::some(packet);

        let payload = to_radio
            .write_to_bytes()
            .map_err(|e| ModeError::Spawn(format!("Failed to encode packet: {e}")))?;
        writer
            .write_all(&FrameAccumulator::encode(&payload))
            .and_then(|_| writer.flush())
            .map_err(|e| ModeError::Spawn(format!("Serial write failed: {e}")))?;

        let dest_str = if dest == BROADCAST_ADDR {
            "^all".to_string()
        } else {
            format_node_id(dest)
        };
        info!("Sent mesh text to {} on channel {}", dest_str, channel);
        Ok(json!({"status": "sent", "to": dest_str, "channel": channel}))
    }

    fn open_serial(path: &str) -> Result<File, ModeError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| ModeError::Spawn(format!("Failed to open {path}: {e}")))?;

        let mut termios = tcgetattr(&file)
            .map_err(|e| ModeError::Spawn(format!("tcgetattr {path}: {e}")))?;
        cfmakeraw(&mut termios);
        cfsetispeed(&mut termios, BaudRate::B115200)
            .map_err(|e| ModeError::Spawn(format!("baud {path}: {e}")))?;
        cfsetospeed(&mut termios, BaudRate::B115200)
            .map_err(|e| ModeError::Spawn(format!("baud {path}: {e}")))?;
        // Timed reads so the reader can observe cancellation: up to
        // 0.5 s per read, returning 0 bytes on timeout.
        termios.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
        termios.control_chars[SpecialCharacterIndices::VTIME as usize] = 5;
        tcsetattr(&file, SetArg::TCSANOW, &termios)
            .map_err(|e| ModeError::Spawn(format!("tcsetattr {path}: {e}")))?;
        Ok(file)
    }

    fn handle_frame(
        frame: &[u8],
        runtime: &ModeRuntime,
        nodes: &Mutex<NodeTable>,
        my_node_num: &Mutex<Option<u32>>,
    ) {
        let from_radio = match proto::FromRadio::parse_from_bytes(frame) {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Undecodable mesh frame ({} bytes): {e}", frame.len());
                return;
            }
        };
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;

        if let Some(my_info) = from_radio.my_info.as_ref() {
            *my_node_num.lock().unwrap() = Some(my_info.my_node_num);
            runtime.publish(Event::info(format!(
                "Connected as {}",
                format_node_id(my_info.my_node_num)
            )));
        }

        if let Some(node_info) = from_radio.node_info.as_ref() {
            let mut table = nodes.lock().unwrap();
            if let Some(user) = node_info.user.as_ref() {
                table.apply(
                    node_info.num,
                    now,
                    NodeUpdate::NodeInfo {
                        long_name: user.long_name.clone(),
                        short_name: user.short_name.clone(),
                    },
                );
            }
            if let Some(position) = node_info.position.as_ref() {
                if position.latitude_i != 0 || position.longitude_i != 0 {
                    table.apply(
                        node_info.num,
                        now,
                        NodeUpdate::Position {
                            latitude: position.latitude_i as f64 * 1e-7,
                            longitude: position.longitude_i as f64 * 1e-7,
                            altitude: Some(position.altitude),
                        },
                    );
                }
            }
            if node_info.snr != 0.0 {
                table.apply(node_info.num, now, NodeUpdate::Snr(node_info.snr as f64));
            }
            return;
        }

        let Some(packet) = from_radio.packet.as_ref() else {
            return;
        };
        let Some(decoded) = packet.decoded.as_ref() else {
            // Encrypted for a channel we do not hold the key for.
            return;
        };
        let portnum = decoded.portnum;
        let from = packet.from_node;
        let port_label = port_name(portnum);

        {
            let mut table = nodes.lock().unwrap();
            match portnum {
                port::POSITION_APP => {
                    if let Ok(position) = proto::Position::parse_from_bytes(&decoded.payload) {
                        if position.latitude_i != 0 || position.longitude_i != 0 {
                            table.apply(
                                from,
                                now,
                                NodeUpdate::Position {
                                    latitude: position.latitude_i as f64 * 1e-7,
                                    longitude: position.longitude_i as f64 * 1e-7,
                                    altitude: Some(position.altitude),
                                },
                            );
                        }
                    }
                }
                port::NODEINFO_APP => {
                    if let Ok(user) = proto::User::parse_from_bytes(&decoded.payload) {
                        table.apply(
                            from,
                            now,
                            NodeUpdate::NodeInfo {
                                long_name: user.long_name,
                                short_name: user.short_name,
                            },
                        );
                    }
                }
                port::TELEMETRY_APP => {
                    if let Ok(telemetry) = proto::Telemetry::parse_from_bytes(&decoded.payload) {
                        if let Some(metrics) = telemetry.device_metrics.as_ref() {
                            table.apply(
                                from,
                                now,
                                NodeUpdate::Telemetry {
                                    battery_level: Some(metrics.battery_level),
                                    voltage: Some(metrics.voltage as f64),
                                },
                            );
                        }
                    }
                }
                _ => table.apply(from, now, NodeUpdate::Seen),
            }
            if packet.rx_snr != 0.0 {
                table.apply(from, now, NodeUpdate::Snr(packet.rx_snr as f64));
            }
        }

        // Chatter still updated the node map above, but stays out of
        // the message stream.
        if mesh::is_protocol_chatter(port_label) {
            if portnum == port::NODEINFO_APP {
                if let Some(node) = nodes.lock().unwrap().get(from) {
                    if let Ok(value) = serde_json::to_value(node) {
                        if let Some(map) = value.as_object() {
                            runtime.publish(Event::passthrough(EventKind::MeshNode, map.clone()));
                        }
                    }
                }
            }
            return;
        }

        let mut event = Event::new(EventKind::Mesh)
            .with("from", from)
            .with("from_id", format_node_id(from))
            .with("from_name", nodes.lock().unwrap().display_name(from))
            .with("to", packet.to_node)
            .with("channel", packet.channel)
            .with("portnum", port_label);
        if portnum == port::TEXT_MESSAGE_APP {
            event = event.with(
                "text",
                String::from_utf8_lossy(&decoded.payload).into_owned(),
            );
        }
        if packet.rx_snr != 0.0 {
            event = event.with("snr", packet.rx_snr as f64);
        }
        if packet.rx_rssi != 0 {
            event = event.with("rssi", packet.rx_rssi);
        }
        runtime.publish(event);
    }

    fn reader_task(
        mut serial: File,
        runtime: Arc<ModeRuntime>,
        nodes: Arc<Mutex<NodeTable>>,
        my_node_num: Arc<Mutex<Option<u32>>>,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            let mut accumulator = FrameAccumulator::new();
            let mut buf = [0u8; 4096];
            loop {
                if cancel.is_cancelled() {
                    return;
                }
                match serial.read(&mut buf) {
                    // VTIME timeout; loop to observe cancellation.
                    Ok(0) => continue,
                    Ok(n) => {
                        for frame in accumulator.feed(&buf[..n]) {
                            Self::handle_frame(&frame, &runtime, &nodes, &my_node_num);
                        }
                    }
                    Err(e) => {
                        if !cancel.is_cancelled() {
                            warn!("Meshtastic serial read failed: {e}");
                            runtime.publish(Event::error(format!("Serial read failed: {e}")));
                        }
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ModeController for MeshtasticController {
    fn name(&self) -> &'static str {
        MODE
    }

    async fn start(&self, config: Map<String, Value>) -> Result<Value, ModeError> {
        self.runtime.ensure_idle()?;

        let path = match field_str(&config, "device") {
            Some(path) => path.to_string(),
            None => Self::candidate_devices()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    ModeError::Validation("No serial device found (ttyUSB*/ttyACM*)".to_string())
                })?,
        };

        let serial = Self::open_serial(&path)?;
        let mut writer = serial
            .try_clone()
            .map_err(|e| ModeError::Spawn(format!("Failed to clone serial handle: {e}")))?;

        // Wake the device's serial console, then ask for the config
        // push (node DB follows it).
        let wake = [0xc3u8; 32];
        let mut want_config = proto::ToRadio::new();
        want_config.want_config_id = rand::thread_rng().gen();
        let hello = want_config
            .write_to_bytes()
            .map_err(|e| ModeError::Spawn(format!("Failed to encode hello: {e}")))?;
        writer
            .write_all(&wake)
            .and_then(|_| writer.write_all(&FrameAccumulator::encode(&hello)))
            .and_then(|_| writer.flush())
            .map_err(|e| ModeError::Spawn(format!("Serial write failed: {e}")))?;

        self.nodes.lock().unwrap().clear();
        *self.my_node_num.lock().unwrap() = None;
        self.runtime.bus.clear(MODE);

        let mut session = PipelineSession::new(None);
        session.readers.push(Self::reader_task(
            serial,
            Arc::clone(&self.runtime),
            Arc::clone(&self.nodes),
            Arc::clone(&self.my_node_num),
            session.cancel.clone(),
        ));

        *self.writer.lock().unwrap() = Some(writer);
        *self.device_path.lock().unwrap() = Some(path.clone());
        self.runtime.commit(session);
        info!("Meshtastic connected on {}", path);
        Ok(json!({"status": "started", "device": path}))
    }

    async fn stop(&self) -> Value {
        *self.writer.lock().unwrap() = None;
        let stopped = self
            .runtime
            .stop_session(self.constants.process_terminate_timeout)
            .await;
        *self.device_path.lock().unwrap() = None;
        if stopped {
            json!({"status": "stopped"})
        } else {
            json!({"status": "not_running"})
        }
    }

    fn status(&self) -> Value {
        let mut status = base_status(&self.runtime);
        status["device"] = json!(*self.device_path.lock().unwrap());
        status["node_count"] = json!(self.nodes.lock().unwrap().len());
        status["my_node"] = json!(self.my_node_num.lock().unwrap().map(format_node_id));
        status["channels"] = serde_json::to_value(self.channels()).unwrap_or_default();
        status
    }

    fn tools(&self) -> Value {
        let candidates = Self::candidate_devices();
        json!({"serial_devices": candidates, "ready": true})
    }
}
