//! Session recording: append-only JSONL files of bus events.
//!
//! At most one active session per mode. Every event published for a
//! mode with an active session is appended as a single JSON line under
//! the session lock. Manifest rows live in the store and survive
//! restarts as history only; there is no partial-file resumption.

use crate::bus::EventSink;
use crate::store::JsonStore;
use chrono::{DateTime, Utc};
use intercept_core::event::EventKind;
use log::{debug, error, info};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const MANIFEST: &str = "recording_sessions";

/// Public view of a session, active or historical.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingSession {
    pub id: String,
    pub mode: String,
    pub label: Option<String>,
    pub started_at: String,
    pub stopped_at: Option<String>,
    pub file_path: String,
    pub event_count: u64,
    pub size_bytes: u64,
    pub metadata: Value,
}

struct ActiveSession {
    session: RecordingSession,
    file: File,
}

pub struct RecordingManager {
    base_dir: PathBuf,
    store: Arc<JsonStore>,
    active: Mutex<HashMap<String, ActiveSession>>,
}

impl RecordingManager {
    pub fn new(base_dir: PathBuf, store: Arc<JsonStore>) -> Arc<Self> {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!("Failed to create recordings directory: {}", e);
        } else {
            debug!("Recordings directory: {}", base_dir.display());
        }
        Arc::new(RecordingManager {
            base_dir,
            store,
            active: Mutex::new(HashMap::new()),
        })
    }

    /// Start a session for `mode`. Returns the existing session when
    /// one is already active for the mode.
    pub fn start(
        &self,
        mode: &str,
        label: Option<String>,
        metadata: Option<Value>,
    ) -> Result<RecordingSession, String> {
        let mut active = self.active.lock().unwrap();
        if let Some(existing) = active.get(mode) {
            return Ok(existing.session.clone());
        }

        let started_at: DateTime<Utc> = Utc::now();
        let id = Uuid::new_v4().to_string();
        let filename = format!("{}_{}_{}.jsonl", mode, started_at.format("%Y%m%d_%H%M%S"), id);
        let path = self.base_dir.join(mode).join(filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create directory: {e}"))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| format!("Failed to open recording file: {e}"))?;

        let session = RecordingSession {
            id: id.clone(),
            mode: mode.to_string(),
            label,
            started_at: started_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            stopped_at: None,
            file_path: path.to_string_lossy().into_owned(),
            event_count: 0,
            size_bytes: 0,
            metadata: metadata.unwrap_or_else(|| json!({})),
        };

        self.store.insert(
            MANIFEST,
            obj(json!({
                "id": session.id,
                "mode": session.mode,
                "label": session.label,
                "started_at": session.started_at,
                "stopped_at": null,
                "file_path": session.file_path,
                "event_count": 0,
                "size_bytes": 0,
                "metadata": session.metadata,
            })),
        );

        info!("Recording started for {} -> {}", mode, session.file_path);
        active.insert(mode.to_string(), ActiveSession { session: session.clone(), file });
        Ok(session)
    }

    /// Stop by mode or id; returns the closed session.
    pub fn stop(&self, mode: Option<&str>, id: Option<&str>) -> Option<RecordingSession> {
        let mut active = self.active.lock().unwrap();
        let key = match (mode, id) {
            (Some(mode), _) if active.contains_key(mode) => mode.to_string(),
            (_, Some(id)) => active
                .iter()
                .find(|(_, s)| s.session.id == id)
                .map(|(k, _)| k.clone())?,
            _ => return None,
        };
        let mut closed = active.remove(&key)?;
        let _ = closed.file.flush();
        drop(closed.file);

        closed.session.stopped_at =
            Some(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        self.store.update(
            MANIFEST,
            &Value::from(closed.session.id.clone()),
            obj(json!({
                "stopped_at": closed.session.stopped_at,
                "event_count": closed.session.event_count,
                "size_bytes": closed.session.size_bytes,
            })),
        );
        info!(
            "Recording stopped for {} ({} events, {} bytes)",
            closed.session.mode, closed.session.event_count, closed.session.size_bytes
        );
        Some(closed.session)
    }

    /// Append one event to the mode's active session, if any.
    pub fn record_event(&self, mode: &str, event_type: &str, event: &Map<String, Value>) {
        let mut active = self.active.lock().unwrap();
        let Some(session) = active.get_mut(mode) else {
            return;
        };
        let record = json!({
            "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "mode": mode,
            "event_type": event_type,
            "event": event,
        });
        let mut line = record.to_string();
        line.push('\n');
        match session.file.write_all(line.as_bytes()).and_then(|_| session.file.flush()) {
            Ok(()) => {
                session.session.event_count += 1;
                session.session.size_bytes += line.len() as u64;
            }
            Err(e) => debug!("Recording write failed: {e}"),
        }
    }

    /// Historical manifest rows, most recent first.
    pub fn list(&self, limit: usize) -> Vec<Value> {
        let mut rows = self.store.list(MANIFEST);
        rows.reverse();
        rows.truncate(limit);
        rows
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.store.get(MANIFEST, &Value::from(id))
    }

    /// Path of a recording's JSONL file, for download streaming.
    pub fn file_path(&self, id: &str) -> Option<PathBuf> {
        let row = self.get(id)?;
        let path = PathBuf::from(row.get("file_path")?.as_str()?);
        path.exists().then_some(path)
    }

    /// Currently active sessions.
    pub fn active_sessions(&self) -> Vec<RecordingSession> {
        self.active
            .lock()
            .unwrap()
            .values()
            .map(|s| s.session.clone())
            .collect()
    }
}

impl EventSink for RecordingManager {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn on_event(&self, mode: &str, kind: EventKind, event: &Map<String, Value>) {
        self.record_event(mode, kind.as_str(), event);
    }
}

fn obj(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (Arc<RecordingManager>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().join("store")));
        let manager = RecordingManager::new(dir.path().join("recordings"), store);
        (manager, dir)
    }

    fn event(text: &str) -> Map<String, Value> {
        obj(json!({"type": "message", "message": text}))
    }

    #[test]
    fn one_active_session_per_mode() {
        let (manager, _dir) = manager();
        let first = manager.start("pager", Some("shift".to_string()), None).unwrap();
        let second = manager.start("pager", None, None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.active_sessions().len(), 1);

        let other = manager.start("ais", None, None).unwrap();
        assert_ne!(other.id, first.id);
        assert_eq!(manager.active_sessions().len(), 2);
    }

    #[test]
    fn events_append_as_jsonl() {
        let (manager, _dir) = manager();
        let session = manager.start("pager", None, None).unwrap();
        manager.record_event("pager", "message", &event("alpha one"));
        manager.record_event("pager", "message", &event("alpha two"));
        // Events for modes without a session are dropped silently.
        manager.record_event("ais", "vessel", &event("ignored"));

        let stopped = manager.stop(Some("pager"), None).unwrap();
        assert_eq!(stopped.event_count, 2);
        assert!(stopped.stopped_at.is_some());

        let content = fs::read_to_string(&session.file_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["mode"], "pager");
        assert_eq!(first["event_type"], "message");
        assert_eq!(first["event"]["message"], "alpha one");
        assert_eq!(stopped.size_bytes, content.len() as u64);
    }

    #[test]
    fn manifest_survives_as_history() {
        let (manager, _dir) = manager();
        manager.start("pager", None, None).unwrap();
        manager.record_event("pager", "message", &event("x"));
        let stopped = manager.stop(Some("pager"), None).unwrap();

        let listed = manager.list(10);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], stopped.id.as_str());
        assert_eq!(listed[0]["event_count"], 1);
        assert!(manager.file_path(&stopped.id).is_some());
    }

    #[test]
    fn stop_by_id() {
        let (manager, _dir) = manager();
        let session = manager.start("vdl2", None, None).unwrap();
        assert!(manager.stop(None, Some(&session.id)).is_some());
        assert!(manager.stop(None, Some(&session.id)).is_none());
        assert!(manager.active_sessions().is_empty());
    }
}
