//! Bartleby's event vocabulary (§5), an in-process broadcast bus, and a
//! JSONL file logger that mirrors every event to disk for after-the-fact
//! inspection (a daemon has no TUI to watch it live).

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error};

/// The vocabulary of observable Bartleby activity. Events are emitted
/// only after the state they describe has been durably persisted (§5).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    StateChanged { from: String, to: String },
    WorkItemStatusChanged { item_id: String, from: String, to: String },
    SyncStarted,
    SyncCompleted { added: u32, updated: u32, status_pushed: u32, removed: u32 },
    SyncFailed { message: String },
    ItemSynced { item_id: String, action: String },
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StateChanged { .. } => "StateChanged",
            Event::WorkItemStatusChanged { .. } => "WorkItemStatusChanged",
            Event::SyncStarted => "SyncStarted",
            Event::SyncCompleted { .. } => "SyncCompleted",
            Event::SyncFailed { .. } => "SyncFailed",
            Event::ItemSynced { .. } => "ItemSynced",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

impl EventLogEntry {
    pub fn new(event: Event) -> Self {
        Self { timestamp: Utc::now(), event }
    }
}

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central pub/sub for Bartleby events. Fire-and-forget: an emit with no
/// subscribers, or a full channel with a lagging subscriber, simply drops
/// events rather than blocking the orchestrator loop.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn emit(&self, event: Event) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}

/// Appends every event to a single JSONL file at `path`. One writer for
/// the process lifetime; flushed after every line so `tail -f` works and
/// a crash never loses a buffered event.
pub struct EventLogger {
    writer: BufWriter<File>,
}

impl EventLogger {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { writer: BufWriter::new(file) })
    }

    pub fn write_event(&mut self, event: &Event) -> std::io::Result<()> {
        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry).expect("Event serializes infallibly");
        writeln!(self.writer, "{json}")?;
        self.writer.flush()
    }

    /// Drains `bus` until the channel closes. Spawned as a background
    /// task alongside the Orchestrator loop.
    pub async fn run(mut self, bus: Arc<EventBus>, path_for_errors: PathBuf) {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(err) = self.write_event(&event) {
                        error!(?err, path = %path_for_errors.display(), "EventLogger::run: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "EventLogger::run: lagged, some events were not logged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn emit_and_subscribe_round_trips() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(Event::SyncStarted);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "SyncStarted");
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(Event::SyncStarted);
    }

    #[test]
    fn logger_appends_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.jsonl");
        let mut logger = EventLogger::open(&path).unwrap();
        logger.write_event(&Event::SyncStarted).unwrap();
        logger
            .write_event(&Event::SyncCompleted { added: 1, updated: 2, status_pushed: 0, removed: 0 })
            .unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("SyncStarted"));
        assert!(contents.contains("SyncCompleted"));
    }
}
