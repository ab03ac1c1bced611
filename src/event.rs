//! Event data model.
//!
//! Events are immutable once constructed. They carry a sampling `stream`,
//! correlation keys, and an opaque payload the sink is expected to
//! understand; the sidecar never interprets payload contents.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Hard cap on serialized event size; oversize events are dropped at
/// ingestion (reason `oversize`).
pub const MAX_EVENT_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TestStart,
    TestEnd,
    Step,
    HttpCall,
    Log,
    ProfileSample,
    Custom,
}

/// Sampling bucket. `Metrics` always samples at 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    Events,
    Logs,
    Profiling,
    Metrics,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Events => "events",
            Stream::Logs => "logs",
            Stream::Profiling => "profiling",
            Stream::Metrics => "metrics",
        }
    }

    pub const ALL: [Stream; 4] = [Stream::Events, Stream::Logs, Stream::Profiling, Stream::Metrics];
}

/// Monotonic + wall-clock timestamp, nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub wall_nanos: u128,
    pub monotonic_nanos: u128,
}

impl Timestamp {
    pub fn now() -> Self {
        let wall_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self {
            wall_nanos,
            monotonic_nanos: monotonic_now_nanos(),
        }
    }
}

fn monotonic_now_nanos() -> u128 {
    use std::time::Instant;
    // Relative monotonic clock; only deltas between calls are meaningful.
    thread_local! {
        static EPOCH: Instant = Instant::now();
    }
    EPOCH.with(|e| e.elapsed().as_nanos())
}

pub type Payload = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub kind: EventKind,
    pub stream: Stream,
    pub timestamp: Timestamp,
    pub run_id: Option<String>,
    pub test_id: Option<String>,
    #[serde(default)]
    pub payload: Payload,
    /// Set by the host when the event is emitted as part of an anomaly
    /// window, for the sampler's adaptive boost.
    #[serde(default)]
    pub anomaly: bool,
}

impl Event {
    pub fn new(kind: EventKind, stream: Stream) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            stream,
            timestamp: Timestamp::now(),
            run_id: None,
            test_id: None,
            payload: Payload::new(),
            anomaly: false,
        }
    }

    pub fn with_correlation(mut self, run_id: Option<String>, test_id: Option<String>) -> Self {
        self.run_id = run_id;
        self.test_id = test_id;
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Serialized size in bytes, used for the oversize gate.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|b| b.len()).unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_event_is_detected() {
        let mut ev = Event::new(EventKind::Log, Stream::Logs);
        ev.payload
            .insert("blob".into(), serde_json::Value::String("x".repeat(MAX_EVENT_BYTES * 2)));
        assert!(ev.serialized_len() > MAX_EVENT_BYTES);
    }

    #[test]
    fn small_event_fits() {
        let ev = Event::new(EventKind::TestStart, Stream::Events);
        assert!(ev.serialized_len() < MAX_EVENT_BYTES);
    }
}
