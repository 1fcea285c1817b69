//! Behavior event reporting.
//!
//! Every notable action (login, delivery, verification handoff, run summary)
//! is emitted as a [`BehaviorEvent`]. Emission is strictly fire-and-forget:
//! a sink failure is logged at debug and never affects the run.

use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Serialize, Debug, Clone)]
pub struct BehaviorEvent {
    pub user_id: String,
    /// Event kind: `login`, `delivery`, `verification`, `run_summary`, …
    pub kind: String,
    /// `success` / `failed` / `skipped` / `requested`, depending on the kind.
    pub status: String,
    pub description: String,
    pub platform: String,
    /// Free-form extra payload (job name, company, scheme, …).
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl BehaviorEvent {
    pub fn new(user_id: &str, kind: &str, status: &str, description: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            status: status.to_string(),
            description: description.to_string(),
            platform: "boss".to_string(),
            extra: serde_json::Value::Null,
            at: Utc::now(),
        }
    }

    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = extra;
        self
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: BehaviorEvent);
}

/// Appends one JSON object per line to `~/.zhipin-pilot/events.jsonl`.
pub struct FileEventSink {
    path: PathBuf,
}

impl FileEventSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl EventSink for FileEventSink {
    async fn emit(&self, event: BehaviorEvent) {
        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{}", line)?;
            Ok(())
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("event sink write failed: {}", e),
            Err(e) => debug!("event sink task failed: {}", e),
        }
    }
}

/// Discards everything. Used when event reporting is not wanted.
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn emit(&self, _event: BehaviorEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_append_as_jsonl() {
        let path = std::env::temp_dir()
            .join(format!("zhipin-events-{}", uuid::Uuid::new_v4()))
            .join("events.jsonl");
        let sink = FileEventSink::new(path.clone());

        sink.emit(BehaviorEvent::new("u1", "delivery", "success", "sent greeting"))
            .await;
        sink.emit(
            BehaviorEvent::new("u1", "delivery", "skipped", "salary out of range")
                .with_extra(serde_json::json!({"company": "某某科技"})),
        )
        .await;

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["platform"], "boss");
        assert_eq!(first["kind"], "delivery");
        // Null extras are omitted entirely.
        assert!(first.get("extra").is_none());

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["extra"]["company"], "某某科技");
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        // A directory path cannot be opened for append; emit must not panic.
        let sink = FileEventSink::new(std::env::temp_dir());
        sink.emit(BehaviorEvent::new("u1", "login", "success", "session replayed"))
            .await;
    }
}
