//! Unsolicited firmware events.
//!
//! While idle, the firmware may print JSON lines carrying an `event`
//! member. The decoder assembles them from raw chunks and drops a line
//! repeated verbatim within a short window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use crate::transport::{Transport, lock};

/// Repeats of an identical line within this window are dropped.
const DEDUP_WINDOW: Duration = Duration::from_millis(1000);

/// Incremental decoder for event lines.
#[derive(Debug)]
pub struct EventDecoder {
    /// The incomplete trailing line.
    line: Vec<u8>,
    /// When each recent line was last accepted.
    seen: HashMap<Vec<u8>, Instant>,
    /// Deduplication window.
    window: Duration,
}

impl EventDecoder {
    /// Creates an empty decoder.
    pub fn new() -> Self {
        Self {
            line: Vec::new(),
            seen: HashMap::new(),
            window: DEDUP_WINDOW,
        }
    }

    /// Discards the partial line and deduplication history.
    pub fn reset(&mut self) {
        self.line.clear();
        self.seen.clear();
    }

    /// Feeds a received chunk, returning the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        let now = Instant::now();
        let window = self.window;
        self.seen.retain(|_, at| now.duration_since(*at) < window);

        let mut events = Vec::new();
        for &b in chunk {
            if b != b'\n' {
                self.line.push(b);
                continue;
            }
            let line = std::mem::take(&mut self.line);
            let raw = line.trim_ascii();
            if raw.is_empty() || self.seen.contains_key(raw) {
                continue;
            }
            let Some(event) = parse_event(raw) else {
                continue;
            };
            self.seen.insert(raw.to_vec(), now);
            events.push(event);
        }
        events
    }
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// The non-null `event` member of a JSON object line.
fn parse_event(raw: &[u8]) -> Option<Value> {
    let mut value: Value = serde_json::from_slice(raw).ok()?;
    match value.get_mut("event").map(Value::take) {
        Some(Value::Null) | None => None,
        Some(event) => {
            trace!(%event, "firmware event");
            Some(event)
        }
    }
}

impl Transport {
    /// Streams decoded events from all received data.
    ///
    /// The decoder restarts on every connect. Events stop flowing once the
    /// receiver is dropped.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = Arc::new(Mutex::new(EventDecoder::new()));

        let on_connect = Arc::clone(&decoder);
        self.on_connect(move |_| lock(&on_connect).reset());
        self.on_read(move |chunk| {
            for event in lock(&decoder).push(chunk) {
                let _ = tx.send(event);
            }
        });
        rx
    }
}
