//! Generated Meshtastic wire protocol messages.

include!(concat!(env!("OUT_DIR"), "/protos/mod.rs"));
