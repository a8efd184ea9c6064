//! Opaque JSON store: named collections of rows with integer or string
//! ids, persisted as one JSON file per collection under the data dir.
//!
//! Used for alert rules, alert events, DSC critical alerts and
//! recording-session manifests. Deliberately not a database; callers
//! treat it as a key-value + append-log store.

use log::{debug, error, warn};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

struct Collection {
    rows: Vec<Value>,
    next_id: i64,
}

pub struct JsonStore {
    base_dir: PathBuf,
    collections: Mutex<HashMap<String, Collection>>,
}

impl JsonStore {
    pub fn new(base_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            error!("Failed to create store directory: {}", e);
        } else {
            debug!("Store directory: {}", base_dir.display());
        }
        JsonStore {
            base_dir,
            collections: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, collection: &str) -> PathBuf {
        self.base_dir.join(format!("{collection}.json"))
    }

    fn load(&self, collections: &mut HashMap<String, Collection>, name: &str) {
        if collections.contains_key(name) {
            return;
        }
        let path = self.path_for(name);
        let rows: Vec<Value> = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!("Corrupt store file {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        let next_id = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1;
        collections.insert(name.to_string(), Collection { rows, next_id });
    }

    fn save(&self, name: &str, rows: &[Value]) {
        let path = self.path_for(name);
        match serde_json::to_string_pretty(rows) {
            Ok(text) => {
                let tmp = path.with_extension("json.tmp");
                if let Err(e) = fs::write(&tmp, text).and_then(|_| fs::rename(&tmp, &path)) {
                    error!("Failed to write store file {}: {}", path.display(), e);
                }
            }
            Err(e) => error!("Failed to serialize collection {name}: {e}"),
        }
    }

    /// Append a row, assigning an integer `id` when the row has none.
    /// Returns the row's id.
    pub fn insert(&self, collection: &str, mut row: Map<String, Value>) -> Value {
        let mut collections = self.collections.lock().unwrap();
        self.load(&mut collections, collection);
        let entry = collections.get_mut(collection).unwrap();
        let id = match row.get("id") {
            Some(id) if !id.is_null() => id.clone(),
            _ => {
                let id = Value::from(entry.next_id);
                entry.next_id += 1;
                row.insert("id".to_string(), id.clone());
                id
            }
        };
        entry.rows.push(Value::Object(row));
        self.save(collection, &entry.rows);
        id
    }

    /// All rows, in insertion order.
    pub fn list(&self, collection: &str) -> Vec<Value> {
        let mut collections = self.collections.lock().unwrap();
        self.load(&mut collections, collection);
        collections[collection].rows.clone()
    }

    pub fn get(&self, collection: &str, id: &Value) -> Option<Value> {
        self.list(collection)
            .into_iter()
            .find(|row| row.get("id") == Some(id))
    }

    /// Merge `updates` into the row with `id`. Returns false when the
    /// row does not exist.
    pub fn update(&self, collection: &str, id: &Value, updates: Map<String, Value>) -> bool {
        let mut collections = self.collections.lock().unwrap();
        self.load(&mut collections, collection);
        let entry = collections.get_mut(collection).unwrap();
        let Some(row) = entry
            .rows
            .iter_mut()
            .find(|row| row.get("id") == Some(id))
        else {
            return false;
        };
        if let Some(obj) = row.as_object_mut() {
            for (key, value) in updates {
                obj.insert(key, value);
            }
        }
        self.save(collection, &entry.rows);
        true
    }

    pub fn delete(&self, collection: &str, id: &Value) -> bool {
        let mut collections = self.collections.lock().unwrap();
        self.load(&mut collections, collection);
        let entry = collections.get_mut(collection).unwrap();
        let before = entry.rows.len();
        entry.rows.retain(|row| row.get("id") != Some(id));
        let deleted = entry.rows.len() != before;
        if deleted {
            self.save(collection, &entry.rows);
        }
        deleted
    }

    /// Drop oldest rows beyond `max` (append-log trimming).
    pub fn truncate(&self, collection: &str, max: usize) {
        let mut collections = self.collections.lock().unwrap();
        self.load(&mut collections, collection);
        let entry = collections.get_mut(collection).unwrap();
        if entry.rows.len() > max {
            let excess = entry.rows.len() - max;
            entry.rows.drain(..excess);
            self.save(collection, &entry.rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn row(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn insert_assigns_incrementing_ids() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf());
        let a = store.insert("rules", row(json!({"name": "a"})));
        let b = store.insert("rules", row(json!({"name": "b"})));
        assert_eq!(a, json!(1));
        assert_eq!(b, json!(2));
        assert_eq!(store.list("rules").len(), 2);
    }

    #[test]
    fn rows_survive_reload() {
        let dir = TempDir::new().unwrap();
        {
            let store = JsonStore::new(dir.path().to_path_buf());
            store.insert("rules", row(json!({"name": "persisted"})));
        }
        let store = JsonStore::new(dir.path().to_path_buf());
        let rows = store.list("rules");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "persisted");
        // The id sequence continues after reload.
        let id = store.insert("rules", row(json!({"name": "next"})));
        assert_eq!(id, json!(2));
    }

    #[test]
    fn update_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf());
        let id = store.insert("rules", row(json!({"name": "x", "enabled": true})));
        assert!(store.update("rules", &id, row(json!({"enabled": false}))));
        assert_eq!(store.get("rules", &id).unwrap()["enabled"], false);
        assert!(store.delete("rules", &id));
        assert!(!store.delete("rules", &id));
        assert!(store.get("rules", &id).is_none());
    }

    #[test]
    fn string_ids_are_preserved() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf());
        let id = store.insert("sessions", row(json!({"id": "uuid-1", "mode": "acars"})));
        assert_eq!(id, json!("uuid-1"));
        assert!(store.get("sessions", &id).is_some());
    }

    #[test]
    fn truncate_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().to_path_buf());
        for i in 0..10 {
            store.insert("events", row(json!({"n": i})));
        }
        store.truncate("events", 3);
        let rows = store.list("events");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["n"], 7);
    }
}
