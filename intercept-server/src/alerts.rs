//! Alert engine: rule CRUD, cached matching, persisted alert events,
//! bounded live stream, and webhook notification.

use crate::bus::EventSink;
use crate::config::Constants;
use crate::store::JsonStore;
use chrono::Utc;
use intercept_core::alerts::match_rule;
use intercept_core::event::EventKind;
use log::{debug, warn};
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;

const RULES: &str = "alert_rules";
const EVENTS: &str = "alert_events";
const MAX_STORED_EVENTS: usize = 5000;
const STREAM_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
struct CachedRule {
    id: Value,
    name: String,
    mode: Option<String>,
    event_type: Option<String>,
    match_block: Map<String, Value>,
    severity: String,
    notify: Map<String, Value>,
}

struct RuleCache {
    rules: Vec<CachedRule>,
    loaded_at: Option<Instant>,
}

pub struct AlertEngine {
    store: Arc<JsonStore>,
    constants: Constants,
    cache: Mutex<RuleCache>,
    stream: Mutex<VecDeque<Value>>,
    stream_tx: broadcast::Sender<Value>,
    http: reqwest::Client,
    runtime: tokio::runtime::Handle,
}

impl AlertEngine {
    pub fn new(
        store: Arc<JsonStore>,
        constants: Constants,
        runtime: tokio::runtime::Handle,
    ) -> Arc<Self> {
        let (stream_tx, _) = broadcast::channel(STREAM_QUEUE_CAPACITY);
        Arc::new(AlertEngine {
            store,
            constants,
            cache: Mutex::new(RuleCache {
                rules: Vec::new(),
                loaded_at: None,
            }),
            stream: Mutex::new(VecDeque::with_capacity(STREAM_QUEUE_CAPACITY)),
            stream_tx,
            http: reqwest::Client::new(),
            runtime,
        })
    }

    // ------------------------------------------------------------------
    // Rule management
    // ------------------------------------------------------------------

    pub fn invalidate_cache(&self) {
        self.cache.lock().unwrap().loaded_at = None;
    }

    fn enabled_rules(&self) -> Vec<CachedRule> {
        let mut cache = self.cache.lock().unwrap();
        let stale = cache
            .loaded_at
            .map(|at| at.elapsed() > self.constants.alert_rule_cache_age)
            .unwrap_or(true);
        if stale {
            cache.rules = self
                .store
                .list(RULES)
                .into_iter()
                .filter(|row| row.get("enabled").and_then(Value::as_bool).unwrap_or(true))
                .filter_map(|row| {
                    let row = row.as_object()?;
                    Some(CachedRule {
                        id: row.get("id").cloned().unwrap_or(Value::Null),
                        name: row
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or("Alert Rule")
                            .to_string(),
                        mode: row
                            .get("mode")
                            .and_then(Value::as_str)
                            .filter(|m| !m.is_empty())
                            .map(String::from),
                        event_type: row
                            .get("event_type")
                            .and_then(Value::as_str)
                            .filter(|t| !t.is_empty())
                            .map(String::from),
                        match_block: row
                            .get("match")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default(),
                        severity: row
                            .get("severity")
                            .and_then(Value::as_str)
                            .unwrap_or("medium")
                            .to_string(),
                        notify: row
                            .get("notify")
                            .and_then(Value::as_object)
                            .cloned()
                            .unwrap_or_default(),
                    })
                })
                .collect();
            cache.loaded_at = Some(Instant::now());
            debug!("Alert rule cache reloaded: {} enabled rule(s)", cache.rules.len());
        }
        cache.rules.clone()
    }

    pub fn list_rules(&self, include_disabled: bool) -> Vec<Value> {
        let mut rows = self.store.list(RULES);
        if !include_disabled {
            rows.retain(|row| row.get("enabled").and_then(Value::as_bool).unwrap_or(true));
        }
        rows.reverse();
        rows
    }

    pub fn add_rule(&self, rule: Map<String, Value>) -> Value {
        let mut row = Map::new();
        row.insert(
            "name".to_string(),
            rule.get("name")
                .cloned()
                .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                .unwrap_or_else(|| Value::from("Alert Rule")),
        );
        for key in ["mode", "event_type", "match", "severity", "notify"] {
            row.insert(
                key.to_string(),
                rule.get(key).cloned().unwrap_or(Value::Null),
            );
        }
        if row.get("severity").map_or(true, Value::is_null) {
            row.insert("severity".to_string(), Value::from("medium"));
        }
        row.insert(
            "enabled".to_string(),
            rule.get("enabled").cloned().unwrap_or(Value::from(true)),
        );
        row.insert(
            "created_at".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        let id = self.store.insert(RULES, row);
        self.invalidate_cache();
        id
    }

    pub fn update_rule(&self, id: &Value, updates: Map<String, Value>) -> bool {
        let allowed: Map<String, Value> = updates
            .into_iter()
            .filter(|(key, _)| {
                matches!(
                    key.as_str(),
                    "name" | "mode" | "event_type" | "match" | "severity" | "enabled" | "notify"
                )
            })
            .collect();
        if allowed.is_empty() {
            return false;
        }
        let updated = self.store.update(RULES, id, allowed);
        if updated {
            self.invalidate_cache();
        }
        updated
    }

    pub fn delete_rule(&self, id: &Value) -> bool {
        let deleted = self.store.delete(RULES, id);
        if deleted {
            self.invalidate_cache();
        }
        deleted
    }

    pub fn list_events(
        &self,
        limit: usize,
        mode: Option<&str>,
        severity: Option<&str>,
    ) -> Vec<Value> {
        let mut rows = self.store.list(EVENTS);
        rows.reverse();
        rows.retain(|row| {
            mode.map_or(true, |m| row.get("mode").and_then(Value::as_str) == Some(m))
                && severity
                    .map_or(true, |s| row.get("severity").and_then(Value::as_str) == Some(s))
        });
        rows.truncate(limit);
        rows
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.stream_tx.subscribe()
    }

    // ------------------------------------------------------------------
    // Event processing
    // ------------------------------------------------------------------

    pub fn process_event(&self, mode: &str, event_type: &str, event: &Map<String, Value>) {
        if matches!(event_type, "keepalive" | "ping" | "status") {
            return;
        }
        let rules = self.enabled_rules();
        if rules.is_empty() {
            return;
        }

        for rule in rules {
            if rule.mode.as_deref().is_some_and(|m| m != mode) {
                continue;
            }
            if let Some(wanted) = rule.event_type.as_deref() {
                // A rule that names an event type never matches an
                // untyped event.
                if event_type.is_empty() || wanted != event_type {
                    continue;
                }
            }
            if !match_rule(&rule.match_block, event) {
                continue;
            }

            let title = rule.name.clone();
            let message = build_message(&rule, event, event_type);
            let payload = json!({
                "mode": mode,
                "event_type": event_type,
                "event": event,
                "rule": {"id": rule.id, "name": rule.name},
            });
            let created_at = Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
            let event_id = self.store.insert(
                EVENTS,
                json!({
                    "rule_id": rule.id,
                    "mode": mode,
                    "event_type": event_type,
                    "severity": rule.severity,
                    "title": title,
                    "message": message,
                    "payload": payload,
                    "created_at": created_at,
                })
                .as_object()
                .cloned()
                .unwrap_or_default(),
            );
            self.store.truncate(EVENTS, MAX_STORED_EVENTS);

            let alert = json!({
                "id": event_id,
                "rule_id": rule.id,
                "mode": mode,
                "event_type": event_type,
                "severity": rule.severity,
                "title": title,
                "message": message,
                "payload": payload,
                "created_at": created_at,
            });
            self.queue_alert(alert.clone());
            self.maybe_send_webhook(alert, &rule.notify);
        }
    }

    fn queue_alert(&self, alert: Value) {
        let mut stream = self.stream.lock().unwrap();
        if stream.len() >= STREAM_QUEUE_CAPACITY {
            stream.pop_front();
        }
        stream.push_back(alert.clone());
        let _ = self.stream_tx.send(alert);
    }

    fn maybe_send_webhook(&self, alert: Value, notify: &Map<String, Value>) {
        let Some(url) = self.constants.alert_webhook_url.clone() else {
            return;
        };
        if notify.get("webhook") == Some(&Value::Bool(false)) {
            return;
        }
        let client = self.http.clone();
        let secret = self.constants.alert_webhook_secret.clone().unwrap_or_default();
        let timeout = self.constants.alert_webhook_timeout;
        self.runtime.spawn(async move {
            let result = client
                .post(&url)
                .timeout(timeout)
                .header("Content-Type", "application/json")
                .header("User-Agent", "Intercept-Alert")
                .header("X-Alert-Token", secret)
                .json(&alert)
                .send()
                .await;
            if let Err(e) = result {
                // Webhook failures are logged and never raised.
                warn!("Alert webhook failed: {e}");
            }
        });
    }
}

fn build_message(rule: &CachedRule, event: &Map<String, Value>, event_type: &str) -> String {
    if let Some(message) = rule.notify.get("message").and_then(Value::as_str) {
        return message.to_string();
    }
    let mut bits: Vec<String> = Vec::new();
    if !event_type.is_empty() {
        bits.push(event_type.to_string());
    }
    for key in ["name", "ssid", "bssid", "address", "mac"] {
        if let Some(value) = event.get(key) {
            bits.push(match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
        }
    }
    if bits.is_empty() {
        "Alert triggered".to_string()
    } else {
        bits.join(" | ")
    }
}

impl EventSink for AlertEngine {
    fn name(&self) -> &'static str {
        "alerts"
    }

    fn on_event(&self, mode: &str, kind: EventKind, event: &Map<String, Value>) {
        self.process_event(mode, kind.as_str(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine() -> (Arc<AlertEngine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonStore::new(dir.path().to_path_buf()));
        let engine = AlertEngine::new(
            store,
            Constants::from_env(),
            tokio::runtime::Handle::current(),
        );
        (engine, dir)
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn regex_rule_produces_one_persisted_event() {
        let (engine, _dir) = engine();
        engine.add_rule(obj(json!({
            "name": "Mil ICAO",
            "mode": "adsb",
            "match": {"target.icao": {"op": "regex", "value": "^A[A-F]"}},
            "severity": "high",
        })));

        engine.process_event("adsb", "aircraft", &obj(json!({"target": {"icao": "AE01CE"}})));
        // Non-matching mode and payloads produce nothing.
        engine.process_event("ais", "vessel", &obj(json!({"target": {"icao": "AE01CE"}})));
        engine.process_event("adsb", "aircraft", &obj(json!({"target": {"icao": "123456"}})));

        let events = engine.list_events(10, None, None);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["severity"], "high");
        assert_eq!(events[0]["title"], "Mil ICAO");
        assert_eq!(events[0]["payload"]["event"]["target"]["icao"], "AE01CE");
    }

    #[tokio::test]
    async fn event_type_rule_requires_typed_event() {
        let (engine, _dir) = engine();
        engine.add_rule(obj(json!({
            "name": "vessels only",
            "event_type": "vessel",
            "match": {},
        })));
        engine.process_event("ais", "", &obj(json!({"mmsi": "1"})));
        engine.process_event("ais", "raw", &obj(json!({"mmsi": "1"})));
        engine.process_event("ais", "vessel", &obj(json!({"mmsi": "1"})));
        assert_eq!(engine.list_events(10, None, None).len(), 1);
    }

    #[tokio::test]
    async fn disabled_rules_do_not_match() {
        let (engine, _dir) = engine();
        let id = engine.add_rule(obj(json!({"name": "off", "match": {}, "enabled": false})));
        engine.process_event("pager", "message", &obj(json!({"address": "1"})));
        assert!(engine.list_events(10, None, None).is_empty());

        // Enabling the rule takes effect after cache invalidation.
        assert!(engine.update_rule(&id, obj(json!({"enabled": true}))));
        engine.process_event("pager", "message", &obj(json!({"address": "1"})));
        assert_eq!(engine.list_events(10, None, None).len(), 1);
    }

    #[tokio::test]
    async fn status_and_keepalive_are_ignored() {
        let (engine, _dir) = engine();
        engine.add_rule(obj(json!({"name": "any", "match": {}})));
        engine.process_event("pager", "status", &obj(json!({"status": "started"})));
        engine.process_event("pager", "keepalive", &obj(json!({})));
        assert!(engine.list_events(10, None, None).is_empty());
    }

    #[tokio::test]
    async fn event_filters_by_mode_and_severity() {
        let (engine, _dir) = engine();
        engine.add_rule(obj(json!({"name": "a", "mode": "pager", "match": {}, "severity": "low"})));
        engine.add_rule(obj(json!({"name": "b", "mode": "ais", "match": {}, "severity": "high"})));
        engine.process_event("pager", "message", &obj(json!({"x": 1})));
        engine.process_event("ais", "vessel", &obj(json!({"x": 1})));

        assert_eq!(engine.list_events(10, Some("pager"), None).len(), 1);
        assert_eq!(engine.list_events(10, None, Some("high")).len(), 1);
        assert_eq!(engine.list_events(10, Some("ais"), Some("low")).len(), 0);
    }

    #[tokio::test]
    async fn stream_subscribers_see_alerts() {
        let (engine, _dir) = engine();
        engine.add_rule(obj(json!({"name": "any", "match": {}})));
        let mut rx = engine.subscribe();
        engine.process_event("pager", "message", &obj(json!({"address": "77"})));
        let alert = rx.recv().await.unwrap();
        assert_eq!(alert["title"], "any");
        assert_eq!(alert["message"], "message | 77");
    }

    #[tokio::test]
    async fn delete_rule_stops_matching() {
        let (engine, _dir) = engine();
        let id = engine.add_rule(obj(json!({"name": "any", "match": {}})));
        assert!(engine.delete_rule(&id));
        engine.process_event("pager", "message", &obj(json!({"a": 1})));
        assert!(engine.list_events(10, None, None).is_empty());
        assert_eq!(engine.list_rules(true).len(), 0);
    }
}
