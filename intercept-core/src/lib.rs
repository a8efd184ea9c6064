//! # Intercept Core
//!
//! Platform-independent decoder parsing and signal analytics for the
//! Intercept SDR server.
//!
//! This crate contains everything that can be tested without hardware,
//! processes, or an async runtime:
//!
//! - Typed event model for the cross-mode event bus ([`event`])
//! - Line/JSON parsers for the external decoder tools: multimon-ng
//!   ([`pager`]), acarsdec ([`acars`]), dumpvdl2 ([`vdl2`]), AIS-catcher
//!   ([`ais`]), rtlamr ([`rtlamr`]), DSC decoders ([`dsc`]),
//!   hackrf_sweep ([`sweep`])
//! - SubGHz IQ analytics: level scoring, envelope extraction, spectrum,
//!   burst segmentation, fingerprinting and modulation hints
//!   ([`analytics`]) plus the capture library model ([`capture`])
//! - Alert rule match DSL ([`alerts`])
//! - IATA/ICAO airline-code translation ([`airlines`])
//! - Meshtastic serial framing, PSK handling and node tracking ([`mesh`])
//! - Temporal pattern (periodicity) math ([`patterns`])
//! - SDR hardware models and probe-output parsers ([`sdr`])
//!
//! The companion `intercept-server` crate owns all I/O: child processes,
//! PTYs, sockets, files, and the HTTP/SSE surface.

pub mod acars;
pub mod ais;
pub mod airlines;
pub mod alerts;
pub mod analytics;
pub mod capture;
pub mod dsc;
pub mod error;
pub mod event;
pub mod mesh;
pub mod pager;
pub mod patterns;
pub mod rtlamr;
pub mod sdr;
pub mod sweep;
pub mod vdl2;

pub use error::CoreError;
pub use event::{Event, EventKind};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
