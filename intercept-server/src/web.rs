//! REST + SSE surface.
//!
//! Every mode exposes a uniform sub-tree under `/<mode>/`; SubGHz,
//! alerts, recordings and the correlator add their own routes. Static
//! segments win over the `{mode}` capture, so the specialised routers
//! can share the namespace with the generic one.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use futures_util::StreamExt;
use log::info;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::convert::Infallible;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::modes::{field_f64, field_str, ModeError};
use crate::Session;

// Per-mode sub-tree (dispatched through the controller registry).
const MODE_STATUS_URI: &str = "/{mode}/status";
const MODE_TOOLS_URI: &str = "/{mode}/tools";
const MODE_START_URI: &str = "/{mode}/start";
const MODE_STOP_URI: &str = "/{mode}/stop";
const MODE_STREAM_URI: &str = "/{mode}/stream";
const MODE_MESSAGES_URI: &str = "/{mode}/messages";
const MODE_CLEAR_URI: &str = "/{mode}/clear";

// Platform-wide endpoints.
const DEVICES_URI: &str = "/devices";
const PATTERNS_URI: &str = "/patterns";
const KILLALL_URI: &str = "/killall";
const STATUS_URI: &str = "/api/status";

// Mode-specific extras.
const AIS_VESSELS_URI: &str = "/ais/vessels";
const DSC_ALERTS_URI: &str = "/dsc/alerts";
const MESH_NODES_URI: &str = "/meshtastic/nodes";
const MESH_SEND_URI: &str = "/meshtastic/send";
const MESH_DEVICES_URI: &str = "/meshtastic/devices";
const MESH_CHANNEL_URI: &str = "/meshtastic/channel";
const WEATHER_SAT_LIST_URI: &str = "/weather_sat/satellites";

// Flight correlator.
const CORRELATOR_AIRCRAFT_URI: &str = "/correlator/aircraft";
const CORRELATOR_RECENT_URI: &str = "/correlator/recent/{feed}";
const CORRELATOR_CLEAR_URI: &str = "/correlator/clear/{feed}";

// SubGHz engine.
const SUBGHZ_STATUS_URI: &str = "/subghz/status";
const SUBGHZ_PRESETS_URI: &str = "/subghz/presets";
const SUBGHZ_RX_START_URI: &str = "/subghz/receive/start";
const SUBGHZ_RX_STOP_URI: &str = "/subghz/receive/stop";
const SUBGHZ_DECODE_START_URI: &str = "/subghz/decode/start";
const SUBGHZ_DECODE_STOP_URI: &str = "/subghz/decode/stop";
const SUBGHZ_TX_URI: &str = "/subghz/transmit";
const SUBGHZ_TX_STOP_URI: &str = "/subghz/transmit/stop";
const SUBGHZ_SWEEP_START_URI: &str = "/subghz/sweep/start";
const SUBGHZ_SWEEP_STOP_URI: &str = "/subghz/sweep/stop";
const SUBGHZ_CAPTURES_URI: &str = "/subghz/captures";
const SUBGHZ_CAPTURE_URI: &str = "/subghz/captures/{id}";
const SUBGHZ_CAPTURE_TRIM_URI: &str = "/subghz/captures/{id}/trim";
const SUBGHZ_CAPTURE_DOWNLOAD_URI: &str = "/subghz/captures/{id}/download";

// Alerts.
const ALERT_RULES_URI: &str = "/alerts/rules";
const ALERT_RULE_URI: &str = "/alerts/rules/{id}";
const ALERT_EVENTS_URI: &str = "/alerts/events";
const ALERT_STREAM_URI: &str = "/alerts/stream";

// Recordings.
const RECORDINGS_START_URI: &str = "/recordings/start";
const RECORDINGS_STOP_URI: &str = "/recordings/stop";
const RECORDINGS_LIST_URI: &str = "/recordings/list";
const RECORDINGS_ACTIVE_URI: &str = "/recordings/active";
const RECORDING_URI: &str = "/recordings/{id}";
const RECORDING_DOWNLOAD_URI: &str = "/recordings/{id}/download";

#[derive(Error, Debug)]
pub enum WebError {
    #[error("No such mode '{0}'")]
    NoSuchMode(String),
    #[error("Not found")]
    NotFound,
    #[error(transparent)]
    Mode(#[from] ModeError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::NoSuchMode(mode) => (
                StatusCode::NOT_FOUND,
                Json(json!({"status": "error", "message": format!("No such mode '{mode}'")})),
            )
                .into_response(),
            WebError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({"status": "error", "message": "Not found"})),
            )
                .into_response(),
            WebError::Mode(err) => {
                let (status, error_type) = match &err {
                    ModeError::Validation(_) => (StatusCode::BAD_REQUEST, None),
                    ModeError::ToolMissing(_) => (StatusCode::BAD_REQUEST, None),
                    ModeError::DeviceBusy(_) => (StatusCode::CONFLICT, Some("DEVICE_BUSY")),
                    ModeError::AlreadyRunning(_) => (StatusCode::CONFLICT, Some("ALREADY_RUNNING")),
                    ModeError::Spawn(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
                };
                let mut body = json!({"status": "error", "message": err.to_string()});
                if let Some(error_type) = error_type {
                    body["error_type"] = json!(error_type);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

pub fn router(session: Session) -> Router {
    Router::new()
        .route(STATUS_URI, get(api_status))
        .route(DEVICES_URI, get(list_devices))
        .route(PATTERNS_URI, get(list_patterns))
        .route(KILLALL_URI, post(kill_all))
        // Mode-specific extras (static, so they win over {mode}).
        .route(AIS_VESSELS_URI, get(ais_vessels))
        .route(DSC_ALERTS_URI, get(dsc_alerts))
        .route(MESH_NODES_URI, get(mesh_nodes))
        .route(MESH_SEND_URI, post(mesh_send))
        .route(MESH_DEVICES_URI, get(mesh_devices))
        .route(MESH_CHANNEL_URI, post(mesh_channel))
        .route(WEATHER_SAT_LIST_URI, get(weather_sat_satellites))
        .route(CORRELATOR_AIRCRAFT_URI, get(correlator_aircraft))
        .route(CORRELATOR_RECENT_URI, get(correlator_recent))
        .route(CORRELATOR_CLEAR_URI, post(correlator_clear))
        // SubGHz.
        .route(SUBGHZ_STATUS_URI, get(subghz_status))
        .route(SUBGHZ_PRESETS_URI, get(subghz_presets))
        .route(SUBGHZ_RX_START_URI, post(subghz_rx_start))
        .route(SUBGHZ_RX_STOP_URI, post(subghz_rx_stop))
        .route(SUBGHZ_DECODE_START_URI, post(subghz_decode_start))
        .route(SUBGHZ_DECODE_STOP_URI, post(subghz_decode_stop))
        .route(SUBGHZ_TX_URI, post(subghz_transmit))
        .route(SUBGHZ_TX_STOP_URI, post(subghz_tx_stop))
        .route(SUBGHZ_SWEEP_START_URI, post(subghz_sweep_start))
        .route(SUBGHZ_SWEEP_STOP_URI, post(subghz_sweep_stop))
        .route(SUBGHZ_CAPTURES_URI, get(subghz_captures))
        .route(
            SUBGHZ_CAPTURE_URI,
            get(subghz_capture).delete(subghz_capture_delete).patch(subghz_capture_patch),
        )
        .route(SUBGHZ_CAPTURE_TRIM_URI, post(subghz_capture_trim))
        .route(SUBGHZ_CAPTURE_DOWNLOAD_URI, get(subghz_capture_download))
        // Alerts.
        .route(ALERT_RULES_URI, get(alert_rules).post(alert_rule_add))
        .route(
            ALERT_RULE_URI,
            patch(alert_rule_update).delete(alert_rule_delete),
        )
        .route(ALERT_EVENTS_URI, get(alert_events))
        .route(ALERT_STREAM_URI, get(alert_stream))
        // Recordings.
        .route(RECORDINGS_START_URI, post(recording_start))
        .route(RECORDINGS_STOP_URI, post(recording_stop))
        .route(RECORDINGS_LIST_URI, get(recording_list))
        .route(RECORDINGS_ACTIVE_URI, get(recording_active))
        .route(RECORDING_URI, get(recording_get))
        .route(RECORDING_DOWNLOAD_URI, get(recording_download))
        // Generic per-mode sub-tree, last so statics take priority.
        .route(MODE_STATUS_URI, get(mode_status))
        .route(MODE_TOOLS_URI, get(mode_tools))
        .route(MODE_START_URI, post(mode_start))
        .route(MODE_STOP_URI, post(mode_stop))
        .route(MODE_STREAM_URI, get(mode_stream))
        .route(MODE_MESSAGES_URI, get(mode_messages))
        .route(MODE_CLEAR_URI, post(mode_clear))
        .with_state(session)
}

/// Serve until shutdown is requested.
pub async fn serve(
    subsys: SubsystemHandle,
    session: Session,
    port: u16,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!("Web server listening on port {}", port);
    let app = router(session);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { subsys.on_shutdown_requested().await })
        .await
}

fn body_object(body: Option<Json<Value>>) -> Map<String, Value> {
    body.and_then(|Json(value)| value.as_object().cloned())
        .unwrap_or_default()
}

fn limit_from(params: &HashMap<String, String>, default: usize) -> usize {
    params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(default)
}

// ----------------------------------------------------------------------
// Platform handlers
// ----------------------------------------------------------------------

async fn api_status(State(session): State<Session>) -> Json<Value> {
    let mut modes = Map::new();
    for controller in &session.inner.controllers {
        modes.insert(controller.name().to_string(), controller.status());
    }
    let (acars_buffered, vdl2_buffered) = session.inner.correlator.counts();
    Json(json!({
        "version": crate::VERSION,
        "modes": modes,
        "subghz": session.inner.subghz.status().await,
        "devices_claimed": session.inner.registry.claimed(),
        "recordings_active": session.inner.recording.active_sessions().len(),
        "correlator": {"acars": acars_buffered, "vdl2": vdl2_buffered},
        "shared_observer_location_enabled": session.inner.constants.shared_observer_location_enabled,
    }))
}

async fn list_devices(State(session): State<Session>) -> Json<Value> {
    if session.inner.args.no_detect {
        return Json(json!([]));
    }
    let devices = crate::devices::detect_all_devices().await;
    Json(serde_json::to_value(devices).unwrap_or_else(|_| json!([])))
}

async fn list_patterns(State(session): State<Session>) -> Json<Value> {
    let patterns = session.inner.patterns.all_patterns();
    Json(serde_json::to_value(patterns).unwrap_or_else(|_| json!([])))
}

async fn kill_all() -> Json<Value> {
    let killed = crate::modes::pager::kill_all();
    Json(json!({"status": "killed", "processes": killed}))
}

// ----------------------------------------------------------------------
// Generic per-mode handlers
// ----------------------------------------------------------------------

async fn mode_status(
    State(session): State<Session>,
    Path(mode): Path<String>,
) -> Result<Json<Value>, WebError> {
    let controller = session.controller(&mode).ok_or(WebError::NoSuchMode(mode))?;
    Ok(Json(controller.status()))
}

async fn mode_tools(
    State(session): State<Session>,
    Path(mode): Path<String>,
) -> Result<Json<Value>, WebError> {
    let controller = session.controller(&mode).ok_or(WebError::NoSuchMode(mode))?;
    Ok(Json(controller.tools()))
}

async fn mode_start(
    State(session): State<Session>,
    Path(mode): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let controller = session.controller(&mode).ok_or(WebError::NoSuchMode(mode))?;
    let config = body_object(body);
    Ok(Json(controller.start(config).await?))
}

async fn mode_stop(
    State(session): State<Session>,
    Path(mode): Path<String>,
) -> Result<Json<Value>, WebError> {
    let controller = session.controller(&mode).ok_or(WebError::NoSuchMode(mode))?;
    Ok(Json(controller.stop().await))
}

async fn mode_messages(
    State(session): State<Session>,
    Path(mode): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = limit_from(&params, 100);
    Json(Value::Array(session.inner.bus.recent(&mode, limit)))
}

async fn mode_clear(State(session): State<Session>, Path(mode): Path<String>) -> Json<Value> {
    session.inner.bus.clear(&mode);
    Json(json!({"status": "cleared"}))
}

/// `text/event-stream` of a mode's queue with periodic keepalives.
async fn mode_stream(
    State(session): State<Session>,
    Path(mode): Path<String>,
) -> impl IntoResponse {
    let receiver = session.inner.bus.subscribe(&mode);
    let stream = BroadcastStream::new(receiver).filter_map(|event| async move {
        match event {
            Ok(value) => Some(Ok::<SseEvent, Infallible>(
                SseEvent::default().data(value.to_string()),
            )),
            // A lagged subscriber skips dropped events and carries on.
            Err(_) => None,
        }
    });
    let keepalive = KeepAlive::new()
        .interval(session.inner.constants.sse_keepalive_interval)
        .event(SseEvent::default().data(json!({"type": "keepalive"}).to_string()));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(keepalive),
    )
}

// ----------------------------------------------------------------------
// Mode-specific extras
// ----------------------------------------------------------------------

async fn ais_vessels(State(session): State<Session>) -> Json<Value> {
    Json(Value::Array(session.inner.ais.vessels()))
}

async fn dsc_alerts(
    State(session): State<Session>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = limit_from(&params, 100);
    Json(Value::Array(session.inner.dsc.critical_alerts(limit)))
}

async fn mesh_nodes(State(session): State<Session>) -> Json<Value> {
    Json(Value::Array(session.inner.meshtastic.nodes()))
}

async fn mesh_devices() -> Json<Value> {
    Json(json!(
        crate::modes::meshtastic::MeshtasticController::candidate_devices()
    ))
}

async fn mesh_send(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let config = body_object(body);
    let text = field_str(&config, "text")
        .ok_or_else(|| ModeError::Validation("Message text is required".to_string()))?;
    let channel = field_f64(&config, "channel").unwrap_or(0.0) as u32;
    let destination = field_str(&config, "destination");
    Ok(Json(session.inner.meshtastic.send_text(
        text,
        channel,
        destination,
    )?))
}

async fn mesh_channel(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let config = body_object(body);
    let index = field_f64(&config, "index").unwrap_or(0.0) as u32;
    Ok(Json(session.inner.meshtastic.set_channel(
        index,
        field_str(&config, "name"),
        field_str(&config, "psk"),
    )?))
}

async fn weather_sat_satellites() -> Json<Value> {
    Json(Value::Array(
        crate::modes::weather_sat::WeatherSatController::satellites(),
    ))
}

async fn correlator_aircraft(
    State(session): State<Session>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    Json(session.inner.correlator.messages_for_aircraft(
        params.get("icao").map(String::as_str),
        params.get("callsign").map(String::as_str),
        params.get("registration").map(String::as_str),
    ))
}

async fn correlator_recent(
    State(session): State<Session>,
    Path(feed): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = limit_from(&params, 50);
    Json(Value::Array(
        session.inner.correlator.recent_messages(&feed, limit),
    ))
}

async fn correlator_clear(
    State(session): State<Session>,
    Path(feed): Path<String>,
) -> Json<Value> {
    session.inner.correlator.clear(&feed);
    Json(json!({"status": "cleared", "feed": feed}))
}

// ----------------------------------------------------------------------
// SubGHz handlers
// ----------------------------------------------------------------------

async fn subghz_status(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.status().await)
}

async fn subghz_presets(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.presets())
}

fn u64_field(config: &Map<String, Value>, key: &str, default: u64) -> u64 {
    field_f64(config, key).map(|v| v.max(0.0) as u64).unwrap_or(default)
}

async fn subghz_rx_start(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    Json(
        session
            .inner
            .subghz
            .start_receive(
                u64_field(&config, "frequency_hz", 433_920_000),
                u64_field(&config, "sample_rate", 2_000_000) as u32,
                u64_field(&config, "lna_gain", 32) as u32,
                u64_field(&config, "vga_gain", 20) as u32,
                config.get("trigger_enabled").and_then(Value::as_bool).unwrap_or(false),
                u64_field(&config, "trigger_pre_ms", 350),
                u64_field(&config, "trigger_post_ms", 700),
                field_str(&config, "device_serial").map(String::from),
            )
            .await,
    )
}

async fn subghz_rx_stop(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.stop_receive().await)
}

async fn subghz_decode_start(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    Json(
        session
            .inner
            .subghz
            .start_decode(
                u64_field(&config, "frequency_hz", 433_920_000),
                u64_field(&config, "sample_rate", 2_000_000) as u32,
                u64_field(&config, "lna_gain", 32) as u32,
                u64_field(&config, "vga_gain", 20) as u32,
                field_str(&config, "profile").unwrap_or("weather"),
                field_str(&config, "device_serial").map(String::from),
            )
            .await,
    )
}

async fn subghz_decode_stop(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.stop_decode().await)
}

async fn subghz_transmit(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    let Some(capture_id) = field_str(&config, "capture_id") else {
        return Json(json!({"status": "error", "message": "capture_id is required"}));
    };
    Json(
        session
            .inner
            .subghz
            .transmit(
                capture_id,
                u64_field(&config, "tx_gain", 20) as u32,
                u64_field(&config, "max_duration", 10),
                field_f64(&config, "start_seconds"),
                field_f64(&config, "duration_seconds"),
                field_str(&config, "device_serial").map(String::from),
            )
            .await,
    )
}

async fn subghz_tx_stop(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.stop_transmit().await)
}

async fn subghz_sweep_start(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    Json(
        session
            .inner
            .subghz
            .start_sweep(
                field_f64(&config, "freq_start_mhz").unwrap_or(300.0),
                field_f64(&config, "freq_end_mhz").unwrap_or(928.0),
                u64_field(&config, "bin_width", 100_000) as u32,
                field_str(&config, "device_serial").map(String::from),
            )
            .await,
    )
}

async fn subghz_sweep_stop(State(session): State<Session>) -> Json<Value> {
    Json(session.inner.subghz.stop_sweep().await)
}

async fn subghz_captures(State(session): State<Session>) -> Json<Value> {
    Json(serde_json::to_value(session.inner.subghz.list_captures()).unwrap_or_else(|_| json!([])))
}

async fn subghz_capture(
    State(session): State<Session>,
    Path(id): Path<String>,
) -> Result<Json<Value>, WebError> {
    let capture = session.inner.subghz.get_capture(&id).ok_or(WebError::NotFound)?;
    Ok(Json(serde_json::to_value(capture).unwrap_or(Value::Null)))
}

async fn subghz_capture_delete(
    State(session): State<Session>,
    Path(id): Path<String>,
) -> Result<Json<Value>, WebError> {
    if session.inner.subghz.delete_capture(&id) {
        Ok(Json(json!({"status": "deleted", "id": id})))
    } else {
        Err(WebError::NotFound)
    }
}

async fn subghz_capture_patch(
    State(session): State<Session>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let config = body_object(body);
    let label = field_str(&config, "label").unwrap_or("");
    if session.inner.subghz.update_capture_label(&id, label) {
        Ok(Json(json!({"status": "updated", "id": id})))
    } else {
        Err(WebError::NotFound)
    }
}

async fn subghz_capture_trim(
    State(session): State<Session>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    Json(
        session
            .inner
            .subghz
            .trim_capture(
                &id,
                field_f64(&config, "start_seconds"),
                field_f64(&config, "duration_seconds"),
                field_str(&config, "label").unwrap_or(""),
            )
            .await,
    )
}

async fn subghz_capture_download(
    State(session): State<Session>,
    Path(id): Path<String>,
) -> Result<Response, WebError> {
    let path = session
        .inner
        .subghz
        .capture_iq_path(&id)
        .ok_or(WebError::NotFound)?;
    stream_file(&path, "application/octet-stream").await
}

// ----------------------------------------------------------------------
// Alert handlers
// ----------------------------------------------------------------------

async fn alert_rules(
    State(session): State<Session>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let include_disabled = params
        .get("include_disabled")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(true);
    Json(Value::Array(session.inner.alerts.list_rules(include_disabled)))
}

async fn alert_rule_add(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let rule = body_object(body);
    let id = session.inner.alerts.add_rule(rule);
    Json(json!({"status": "created", "id": id}))
}

async fn alert_rule_update(
    State(session): State<Session>,
    Path(id): Path<i64>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let updates = body_object(body);
    if session.inner.alerts.update_rule(&Value::from(id), updates) {
        Ok(Json(json!({"status": "updated", "id": id})))
    } else {
        Err(WebError::NotFound)
    }
}

async fn alert_rule_delete(
    State(session): State<Session>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, WebError> {
    if session.inner.alerts.delete_rule(&Value::from(id)) {
        Ok(Json(json!({"status": "deleted", "id": id})))
    } else {
        Err(WebError::NotFound)
    }
}

async fn alert_events(
    State(session): State<Session>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = limit_from(&params, 100);
    Json(Value::Array(session.inner.alerts.list_events(
        limit,
        params.get("mode").map(String::as_str),
        params.get("severity").map(String::as_str),
    )))
}

async fn alert_stream(State(session): State<Session>) -> impl IntoResponse {
    let receiver = session.inner.alerts.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|event| async move {
        match event {
            Ok(value) => Some(Ok::<SseEvent, Infallible>(
                SseEvent::default().data(value.to_string()),
            )),
            Err(_) => None,
        }
    });
    let keepalive = KeepAlive::new()
        .interval(session.inner.constants.sse_keepalive_interval)
        .event(SseEvent::default().data(json!({"type": "keepalive"}).to_string()));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream).keep_alive(keepalive),
    )
}

// ----------------------------------------------------------------------
// Recording handlers
// ----------------------------------------------------------------------

async fn recording_start(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Result<Json<Value>, WebError> {
    let config = body_object(body);
    let mode = field_str(&config, "mode")
        .ok_or_else(|| ModeError::Validation("mode is required".to_string()))?;
    let label = field_str(&config, "label").map(String::from);
    let metadata = config.get("metadata").cloned();
    match session.inner.recording.start(mode, label, metadata) {
        Ok(started) => Ok(Json(
            serde_json::to_value(started).unwrap_or_else(|_| json!({"status": "started"})),
        )),
        Err(message) => Err(ModeError::Spawn(message).into()),
    }
}

async fn recording_stop(
    State(session): State<Session>,
    body: Option<Json<Value>>,
) -> Json<Value> {
    let config = body_object(body);
    let stopped = session.inner.recording.stop(
        field_str(&config, "mode"),
        field_str(&config, "id"),
    );
    match stopped {
        Some(stopped) => Json(
            serde_json::to_value(stopped).unwrap_or_else(|_| json!({"status": "stopped"})),
        ),
        None => Json(json!({"status": "not_running"})),
    }
}

async fn recording_list(
    State(session): State<Session>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let limit = limit_from(&params, 50);
    Json(Value::Array(session.inner.recording.list(limit)))
}

async fn recording_active(State(session): State<Session>) -> Json<Value> {
    Json(
        serde_json::to_value(session.inner.recording.active_sessions())
            .unwrap_or_else(|_| json!([])),
    )
}

async fn recording_get(
    State(session): State<Session>,
    Path(id): Path<String>,
) -> Result<Json<Value>, WebError> {
    session
        .inner
        .recording
        .get(&id)
        .map(Json)
        .ok_or(WebError::NotFound)
}

async fn recording_download(
    State(session): State<Session>,
    Path(id): Path<String>,
) -> Result<Response, WebError> {
    let path = session.inner.recording.file_path(&id).ok_or(WebError::NotFound)?;
    stream_file(&path, "application/x-ndjson").await
}

/// Stream a file to the client without loading it into memory.
async fn stream_file(path: &std::path::Path, content_type: &str) -> Result<Response, WebError> {
    let file = tokio::fs::File::open(path).await.map_err(|_| WebError::NotFound)?;
    let stream = tokio_util::io::ReaderStream::new(file);
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;
    use tower::ServiceExt;

    async fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let args = Cli::parse_from([
            "intercept-server",
            "--no-detect",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        (router(Session::new(args)), dir)
    }

    async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn post_json(router: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_all_modes() {
        let (router, _dir) = test_router().await;
        let (status, body) = get_json(&router, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["modes"]["pager"].is_object());
        assert_eq!(body["subghz"]["mode"], "idle");
    }

    #[tokio::test]
    async fn unknown_mode_is_404() {
        let (router, _dir) = test_router().await;
        let (status, body) = get_json(&router, "/nonsense/status").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn mode_stop_when_idle() {
        let (router, _dir) = test_router().await;
        let (status, body) = post_json(&router, "/pager/stop", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "not_running");
    }

    #[tokio::test]
    async fn pager_start_rejects_bad_gain() {
        let (router, _dir) = test_router().await;
        let (status, body) = post_json(&router, "/pager/start", json!({"gain": 1000})).await;
        // Either validation (400) or missing tool (400) depending on
        // the host; both are client errors without side effects.
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn alert_rule_crud_over_http() {
        let (router, _dir) = test_router().await;
        let (status, created) = post_json(
            &router,
            "/alerts/rules",
            json!({"name": "test", "match": {"mode": "adsb"}, "severity": "high"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = created["id"].as_i64().unwrap();

        let (_, rules) = get_json(&router, "/alerts/rules").await;
        assert_eq!(rules.as_array().unwrap().len(), 1);

        let response = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("DELETE")
                    .uri(format!("/alerts/rules/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (_, rules) = get_json(&router, "/alerts/rules").await;
        assert!(rules.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subghz_transmit_refuses_out_of_band_capture() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = Cli::parse_from([
            "intercept-server",
            "--no-detect",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        let session = Session::new(args);

        // A 100 MHz capture is outside every ISM band.
        let captures_dir = &session.inner.subghz.captures_dir;
        std::fs::create_dir_all(captures_dir).unwrap();
        std::fs::write(captures_dir.join("fm.iq"), vec![0u8; 4000]).unwrap();
        std::fs::write(
            captures_dir.join("fm.json"),
            json!({
                "id": "fmcapture0001",
                "filename": "fm.iq",
                "frequency_hz": 100_000_000u64,
                "sample_rate": 2_000_000,
                "timestamp": "2026-01-01T00:00:00Z",
                "size_bytes": 4000,
                "duration_seconds": 0.001,
            })
            .to_string(),
        )
        .unwrap();

        let router = router(session);
        let (status, body) = post_json(
            &router,
            "/subghz/transmit",
            json!({"capture_id": "fmcapture0001"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "error");
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("outside allowed TX bands"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn capture_listing_groups_fingerprints_over_http() {
        let dir = tempfile::TempDir::new().unwrap();
        let args = Cli::parse_from([
            "intercept-server",
            "--no-detect",
            "--data-dir",
            dir.path().to_str().unwrap(),
        ]);
        let session = Session::new(args);
        let captures_dir = session.inner.subghz.captures_dir.clone();
        std::fs::create_dir_all(&captures_dir).unwrap();
        for id in ["cap000000001", "cap000000002"] {
            std::fs::write(captures_dir.join(format!("{id}.iq")), vec![0u8; 100]).unwrap();
            std::fs::write(
                captures_dir.join(format!("{id}.json")),
                json!({
                    "id": id,
                    "filename": format!("{id}.iq"),
                    "frequency_hz": 433_920_000u64,
                    "sample_rate": 2_000_000,
                    "timestamp": "2026-01-01T00:00:00Z",
                    "dominant_fingerprint": "deadbeefcafebabe",
                })
                .to_string(),
            )
            .unwrap();
        }
        let router = router(session);
        let (status, captures) = get_json(&router, "/subghz/captures").await;
        assert_eq!(status, StatusCode::OK);
        let captures = captures.as_array().unwrap();
        assert_eq!(captures.len(), 2);
        for capture in captures {
            assert_eq!(capture["fingerprint_group"], "SIG-DEADBE");
            assert_eq!(capture["fingerprint_group_size"], 2);
        }
    }

    #[tokio::test]
    async fn recordings_lifecycle_over_http() {
        let (router, _dir) = test_router().await;
        let (status, started) =
            post_json(&router, "/recordings/start", json!({"mode": "pager"})).await;
        assert_eq!(status, StatusCode::OK);
        let id = started["id"].as_str().unwrap().to_string();

        let (_, active) = get_json(&router, "/recordings/active").await;
        assert_eq!(active.as_array().unwrap().len(), 1);

        let (_, stopped) = post_json(&router, "/recordings/stop", json!({"id": id})).await;
        assert!(stopped["stopped_at"].is_string());

        let (_, listed) = get_json(&router, "/recordings/list").await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }
}
