//! Cross-mode event bus.
//!
//! Each mode owns a bounded ring (recent-events history for the REST
//! surface) plus a broadcast channel fanning out to SSE subscribers.
//! Overflow drops the oldest event, never blocking the producing reader
//! thread; `status`/`error` events are kept ahead of data events where
//! avoidable. After enqueueing, each event traverses the sink chain
//! (recorder, alert engine, pattern detector) synchronously; sink
//! failures are logged and never reach the hot path.

use chrono::Utc;
use intercept_core::event::{Event, EventKind};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;

/// A bus sink: recorder, alert engine, pattern detector.
pub trait EventSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_event(&self, mode: &str, kind: EventKind, event: &Map<String, Value>);
}

struct ModeQueue {
    ring: VecDeque<Value>,
    tx: broadcast::Sender<Value>,
    events_total: u64,
    last_message_time: Option<f64>,
}

pub struct EventBus {
    capacity: usize,
    modes: Mutex<HashMap<String, ModeQueue>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(EventBus {
            capacity: capacity.max(16),
            modes: Mutex::new(HashMap::new()),
            sinks: RwLock::new(Vec::new()),
        })
    }

    /// Install a sink. Sinks run in registration order.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().unwrap().push(sink);
    }

    fn with_mode<R>(&self, mode: &str, f: impl FnOnce(&mut ModeQueue) -> R) -> R {
        let mut modes = self.modes.lock().unwrap();
        let capacity = self.capacity;
        let queue = modes.entry(mode.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(capacity);
            ModeQueue {
                ring: VecDeque::with_capacity(capacity),
                tx,
                events_total: 0,
                last_message_time: None,
            }
        });
        f(queue)
    }

    /// Publish one event for `mode`. Stamps an ISO-8601 UTC timestamp,
    /// enqueues with drop-oldest semantics, fans out to subscribers and
    /// runs the sink chain.
    pub fn publish(&self, mode: &str, event: Event) {
        let now = Utc::now();
        let timestamp = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let kind = event.kind;
        let json = event.to_json(Some(&timestamp));

        self.with_mode(mode, |queue| {
            if queue.ring.len() >= self.capacity {
                drop_one(&mut queue.ring);
            }
            queue.ring.push_back(json.clone());
            queue.events_total += 1;
            if !kind.is_ignored_by_sinks() {
                queue.last_message_time = Some(now.timestamp_millis() as f64 / 1000.0);
            }
            // No receivers is fine; SSE clients come and go.
            let _ = queue.tx.send(json.clone());
        });

        if kind.is_ignored_by_sinks() {
            return;
        }
        let payload = match &json {
            Value::Object(map) => map,
            _ => return,
        };
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().unwrap().clone();
        for sink in sinks {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                sink.on_event(mode, kind, payload)
            }));
            if result.is_err() {
                warn!("Event sink '{}' panicked; event dropped from that sink", sink.name());
            }
        }
    }

    /// Subscribe to a mode's live stream.
    pub fn subscribe(&self, mode: &str) -> broadcast::Receiver<Value> {
        self.with_mode(mode, |queue| queue.tx.subscribe())
    }

    /// Most recent events, newest first, up to `limit`.
    pub fn recent(&self, mode: &str, limit: usize) -> Vec<Value> {
        self.with_mode(mode, |queue| {
            queue.ring.iter().rev().take(limit).cloned().collect()
        })
    }

    /// Clear a mode's history ring.
    pub fn clear(&self, mode: &str) {
        self.with_mode(mode, |queue| queue.ring.clear());
        debug!("Cleared event ring for {}", mode);
    }

    /// `(events_total, queued, last_message_time)` for a mode.
    pub fn counters(&self, mode: &str) -> (u64, usize, Option<f64>) {
        self.with_mode(mode, |queue| {
            (queue.events_total, queue.ring.len(), queue.last_message_time)
        })
    }
}

/// Drop one event to make room: the oldest non-control event when one
/// exists, else the oldest event.
fn drop_one(ring: &mut VecDeque<Value>) {
    let victim = ring.iter().position(|event| {
        !matches!(
            event.get("type").and_then(Value::as_str),
            Some("status") | Some("error")
        )
    });
    match victim {
        Some(index) => {
            ring.remove(index);
        }
        None => {
            ring.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink {
        seen: AtomicUsize,
    }

    impl EventSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn on_event(&self, _mode: &str, _kind: EventKind, _event: &Map<String, Value>) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickySink;

    impl EventSink for PanickySink {
        fn name(&self) -> &'static str {
            "panicky"
        }
        fn on_event(&self, _mode: &str, _kind: EventKind, _event: &Map<String, Value>) {
            panic!("sink bug");
        }
    }

    #[test]
    fn events_are_fifo_and_timestamped() {
        let bus = EventBus::new(100);
        bus.publish("pager", Event::raw("one"));
        bus.publish("pager", Event::raw("two"));
        let recent = bus.recent("pager", 10);
        assert_eq!(recent.len(), 2);
        // Newest first.
        assert_eq!(recent[0]["text"], "two");
        assert_eq!(recent[1]["text"], "one");
        assert!(recent[0]["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn overflow_drops_oldest_never_newest() {
        let bus = EventBus::new(16);
        for i in 0..40 {
            bus.publish("pager", Event::raw(format!("msg-{i}")));
        }
        let recent = bus.recent("pager", 100);
        assert_eq!(recent.len(), 16);
        assert_eq!(recent[0]["text"], "msg-39");
        assert_eq!(recent[15]["text"], "msg-24");
        let (total, queued, _) = bus.counters("pager");
        assert_eq!(total, 40);
        assert_eq!(queued, 16);
    }

    #[test]
    fn control_events_survive_overflow() {
        let bus = EventBus::new(16);
        bus.publish("pager", Event::status("started"));
        for i in 0..40 {
            bus.publish("pager", Event::raw(format!("msg-{i}")));
        }
        let recent = bus.recent("pager", 100);
        assert!(recent.iter().any(|e| e["type"] == "status"));
    }

    #[test]
    fn keepalive_skips_sinks() {
        let bus = EventBus::new(16);
        let sink = Arc::new(CountingSink {
            seen: AtomicUsize::new(0),
        });
        bus.add_sink(sink.clone());
        bus.publish("pager", Event::keepalive());
        bus.publish("pager", Event::raw("data"));
        assert_eq!(sink.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_sink_does_not_break_publish() {
        let bus = EventBus::new(16);
        let counting = Arc::new(CountingSink {
            seen: AtomicUsize::new(0),
        });
        bus.add_sink(Arc::new(PanickySink));
        bus.add_sink(counting.clone());
        bus.publish("pager", Event::raw("data"));
        // The panicking sink is isolated; later sinks still run.
        assert_eq!(counting.seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.recent("pager", 10).len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe("ais");
        bus.publish("ais", Event::raw("hello"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received["text"], "hello");
    }
}
