#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Pipeline event publishing and request/response audit records.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use uuid::Uuid;

/// Generic event record encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier (`evt-<uuid>`).
    pub id: String,
    /// Component producing the event.
    pub source: String,
    /// Event type (e.g., `pipeline.train.completed`).
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: Value,
}

impl EventRecord {
    /// Creates a record stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// One request/response exchange captured for the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionRecord {
    /// Time the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Request method (`POST`, `GET`, or a CLI verb).
    pub method: String,
    /// Request path or route name.
    pub path: String,
    /// Request headers, if the surface has any.
    #[serde(default)]
    pub request_headers: Value,
    /// Request body.
    #[serde(default)]
    pub request_body: Value,
    /// Status code returned to the caller.
    pub response_status: u16,
    /// Response headers, if the surface has any.
    #[serde(default)]
    pub response_headers: Value,
    /// Response body.
    #[serde(default)]
    pub response_body: Value,
    /// Model run directory that answered the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_dir: Option<String>,
}

impl InteractionRecord {
    /// Wraps the interaction into an `audit.interaction` event.
    #[must_use]
    pub fn into_event(self, source: impl Into<String>) -> EventRecord {
        let payload = serde_json::to_value(&self).unwrap_or(Value::Null);
        EventRecord::new(source, "audit.interaction", payload)
    }
}

/// Event publisher interface.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to the sink.
    async fn publish(&self, event: EventRecord) -> Result<()>;
}

/// In-memory bounded bus retaining the most recent events (tests and local runs).
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl MemoryEventBus {
    /// Creates a bus retaining at most `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Event types of the retained events, oldest first.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.backlog
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventBus {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut backlog = self.backlog.lock();
        if backlog.len() == self.capacity {
            backlog.pop_front();
        }
        backlog.push_back(event);
        Ok(())
    }
}

/// File-backed publisher appending one JSON document per line.
#[derive(Debug, Clone)]
pub struct FileEventPublisher {
    path: PathBuf,
}

impl FileEventPublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventPublisher for FileEventPublisher {
    async fn publish(&self, event: EventRecord) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut data = serde_json::to_vec(&event)?;
        data.push(b'\n');
        file.write_all(&data).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio::runtime::Runtime;

    #[test]
    fn memory_bus_keeps_most_recent_events() {
        let rt = Runtime::new().unwrap();
        let bus = MemoryEventBus::new(2);
        rt.block_on(async {
            for kind in ["a", "b", "c"] {
                bus.publish(EventRecord::new("tester", kind, json!({})))
                    .await
                    .unwrap();
            }
        });
        assert_eq!(bus.event_types(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn file_publisher_appends_interactions() {
        let rt = Runtime::new().unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit/interactions.jsonl");
        let publisher = FileEventPublisher::new(&path).unwrap();
        let interaction = InteractionRecord {
            timestamp: Utc::now(),
            method: "POST".into(),
            path: "/predictprice".into(),
            request_headers: json!({}),
            request_body: json!({ "carat": 0.5 }),
            response_status: 200,
            response_headers: json!({ "content-type": "application/json" }),
            response_body: json!({ "carat": 0.5, "prediction": 1234.5 }),
            run_dir: Some("train/diamonds/1700000000".into()),
        };
        rt.block_on(async {
            publisher
                .publish(interaction.clone().into_event("lpd"))
                .await
                .unwrap();
            publisher
                .publish(EventRecord::new("lpd", "unit.test", json!(null)))
                .await
                .unwrap();
        });
        let content = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: EventRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.event_type, "audit.interaction");
        assert_eq!(first.payload["run_dir"], json!("train/diamonds/1700000000"));
        let restored: InteractionRecord = serde_json::from_value(first.payload).unwrap();
        assert_eq!(restored, interaction);
    }
}
