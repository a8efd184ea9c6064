//! # Intercept Server
//!
//! Multi-mode SDR intercept server: one service binding heterogeneous
//! RF decoder tools into a coherent signal-intelligence platform.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      intercept-server                        |
//! |  +-----------+  +-----------------+  +--------------------+  |
//! |  | REST API  |  | SSE streams     |  | Capture downloads  |  |
//! |  | (axum)    |  | (per mode)      |  |                    |  |
//! |  +-----+-----+  +--------+--------+  +--------------------+  |
//! |        |                 |                                   |
//! |        v                 v                                   |
//! |  +--------------------------------------------------------+  |
//! |  |                EventBus (per-mode rings)               |  |
//! |  |   sinks: recorder -> alert engine -> correlator ->     |  |
//! |  |          pattern detector                              |  |
//! |  +--------------------------------------------------------+  |
//! |        ^                 ^                  ^                |
//! |  +-----+-----+  +--------+--------+  +------+------------+   |
//! |  | Mode      |  | SubGHz engine   |  | Process           |   |
//! |  | controllers| | (rx/decode/tx/  |  | supervisor +      |   |
//! |  | (10 modes) |  |  sweep)        |  | device registry   |   |
//! |  +-----------+  +-----------------+  +-------------------+   |
//! +--------------------------------------------------------------+
//! ```
//!
//! Controllers spawn external decoders (rtl_fm, multimon-ng, acarsdec,
//! dumpvdl2, AIS-catcher, rtlamr, hackrf tooling, SatDump) via the
//! supervisor, parse their output through `intercept-core`, and publish
//! typed events onto the bus. The HTTP layer in [`web`] only ever talks
//! to the bus and the controllers.

use std::path::PathBuf;
use std::sync::Arc;

pub mod alerts;
pub mod bus;
pub mod config;
pub mod correlator;
pub mod devices;
pub mod modes;
pub mod patterns;
pub mod protos;
pub mod recording;
pub mod store;
pub mod subghz;
pub mod supervisor;
pub mod web;

use crate::alerts::AlertEngine;
use crate::bus::EventBus;
use crate::config::{Cli, Constants};
use crate::correlator::FlightCorrelator;
use crate::devices::DeviceRegistry;
use crate::modes::{ModeController, ModeRuntime};
use crate::patterns::PatternDetector;
use crate::recording::RecordingManager;
use crate::store::JsonStore;
use crate::subghz::SubGhzManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything the web layer and the subsystems share.
pub struct SessionInner {
    pub args: Cli,
    pub constants: Constants,
    pub data_dir: PathBuf,
    pub bus: Arc<EventBus>,
    pub registry: Arc<DeviceRegistry>,
    pub store: Arc<JsonStore>,
    pub recording: Arc<RecordingManager>,
    pub alerts: Arc<AlertEngine>,
    pub correlator: Arc<FlightCorrelator>,
    pub patterns: Arc<PatternDetector>,
    pub subghz: Arc<SubGhzManager>,
    pub controllers: Vec<Arc<dyn ModeController>>,
    // Typed handles for mode-specific endpoints.
    pub ais: Arc<modes::ais::AisController>,
    pub dsc: Arc<modes::dsc::DscController>,
    pub meshtastic: Arc<modes::meshtastic::MeshtasticController>,
}

#[derive(Clone)]
pub struct Session {
    pub inner: Arc<SessionInner>,
}

impl Session {
    /// Build the full service graph. Must run inside a tokio runtime
    /// (the alert engine captures the handle for webhook dispatch).
    pub fn new(args: Cli) -> Self {
        let constants = Constants::from_env();
        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config::get_project_dirs().data_dir().to_path_buf());

        let bus = EventBus::new(constants.event_queue_capacity);
        let registry = DeviceRegistry::new();
        let store = Arc::new(JsonStore::new(data_dir.join("store")));
        let recording = RecordingManager::new(data_dir.join("recordings"), Arc::clone(&store));
        let alerts = AlertEngine::new(
            Arc::clone(&store),
            constants.clone(),
            tokio::runtime::Handle::current(),
        );
        let correlator = Arc::new(FlightCorrelator::new(constants.correlator_max_messages));
        let patterns = Arc::new(PatternDetector::new(constants.pattern_ring_capacity));
        let subghz = SubGhzManager::new(
            Arc::clone(&bus),
            constants.clone(),
            data_dir.join("subghz").join("captures"),
        );

        // Sink order is the contract: recorder, alerts, patterns. The
        // flight correlator is fed directly by the ACARS/VDL2 readers.
        bus.add_sink(Arc::clone(&recording) as Arc<dyn bus::EventSink>);
        bus.add_sink(Arc::clone(&alerts) as Arc<dyn bus::EventSink>);
        bus.add_sink(Arc::clone(&patterns) as Arc<dyn bus::EventSink>);

        let runtime = |mode: &'static str| {
            Arc::new(ModeRuntime::new(mode, Arc::clone(&bus), Arc::clone(&registry)))
        };

        let pager = modes::pager::PagerController::new(runtime(modes::pager::MODE), constants.clone());
        let acars = modes::acars::AcarsController::new(
            runtime(modes::acars::MODE),
            constants.clone(),
            Arc::clone(&correlator),
        );
        let vdl2 = modes::vdl2::Vdl2Controller::new(
            runtime(modes::vdl2::MODE),
            constants.clone(),
            Arc::clone(&correlator),
        );
        let ais = modes::ais::AisController::new(runtime(modes::ais::MODE), constants.clone());
        let dsc = modes::dsc::DscController::new(
            runtime(modes::dsc::MODE),
            constants.clone(),
            Arc::clone(&store),
        );
        let rtlamr =
            modes::rtlamr::RtlamrController::new(runtime(modes::rtlamr::MODE), constants.clone());
        let dmr = modes::dmr::DmrController::new(runtime(modes::dmr::MODE), constants.clone());
        let meshtastic = modes::meshtastic::MeshtasticController::new(
            runtime(modes::meshtastic::MODE),
            constants.clone(),
        );
        let weather_sat = modes::weather_sat::WeatherSatController::new(
            runtime(modes::weather_sat::MODE),
            constants.clone(),
            data_dir.join("weather_sat"),
        );

        let controllers: Vec<Arc<dyn ModeController>> = vec![
            pager,
            acars,
            vdl2,
            Arc::clone(&ais) as Arc<dyn ModeController>,
            Arc::clone(&dsc) as Arc<dyn ModeController>,
            rtlamr,
            dmr,
            Arc::clone(&meshtastic) as Arc<dyn ModeController>,
            weather_sat,
        ];

        Session {
            inner: Arc::new(SessionInner {
                args,
                constants,
                data_dir,
                bus,
                registry,
                store,
                recording,
                alerts,
                correlator,
                patterns,
                subghz,
                controllers,
                ais,
                dsc,
                meshtastic,
            }),
        }
    }

    pub fn controller(&self, mode: &str) -> Option<Arc<dyn ModeController>> {
        self.inner
            .controllers
            .iter()
            .find(|controller| controller.name() == mode)
            .cloned()
    }

    /// Stop every running mode and child process. Called on shutdown.
    pub async fn shutdown(&self) {
        for controller in &self.inner.controllers {
            let _ = controller.stop().await;
        }
        self.inner.subghz.stop_all().await;
        supervisor::shutdown_all(self.inner.constants.process_terminate_timeout);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session {{ }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn test_session() -> (Session, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let args = Cli::parse_from([
            "intercept-server",
            "--no-detect",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        (Session::new(args), dir)
    }

    #[tokio::test]
    async fn session_wires_all_controllers() {
        let (session, _dir) = test_session();
        for mode in [
            "pager",
            "acars",
            "vdl2",
            "ais",
            "dsc",
            "rtlamr",
            "dmr",
            "meshtastic",
            "weather_sat",
        ] {
            assert!(session.controller(mode).is_some(), "missing {mode}");
        }
        assert!(session.controller("nope").is_none());
    }

    #[tokio::test]
    async fn stop_on_idle_modes_reports_not_running() {
        let (session, _dir) = test_session();
        for controller in &session.inner.controllers {
            let result = controller.stop().await;
            assert_eq!(result["status"], "not_running", "{}", controller.name());
        }
    }

    #[tokio::test]
    async fn device_busy_flow_between_modes() {
        let (session, _dir) = test_session();
        // Mode A claims device 0; mode B must be refused; after A's
        // release, B succeeds.
        let claim = session.inner.registry.claim(0, "pager").unwrap();
        let err = session.inner.registry.claim(0, "acars").unwrap_err();
        assert!(err.contains("in use by pager"));
        drop(claim);
        assert!(session.inner.registry.claim(0, "acars").is_ok());
    }
}
