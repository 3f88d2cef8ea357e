//! Trace recorder: an append-only, time-ordered view of the current run.
//!
//! The orchestrator writes; observers read. Nothing here feeds back into
//! pipeline control flow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Pipeline role that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TraceRole {
    Ingestion,
    Classifier,
    Recall,
    Decision,
    Execution,
}

impl std::fmt::Display for TraceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ingestion => "Ingestion",
            Self::Classifier => "Classifier",
            Self::Recall => "Recall",
            Self::Decision => "Decision",
            Self::Execution => "Execution",
        };
        f.write_str(s)
    }
}

/// What a stage was doing when it emitted the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    /// Reasoning; no state change yet.
    Thinking,
    /// Performing an effect.
    Action,
    /// Produced the stage's final value for this run.
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub role: TraceRole,
    pub message: String,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Broadcast to observers as the buffer changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    TraceReset,
    TraceEntry { entry: TraceEntry },
}

pub struct TraceRecorder {
    entries: RwLock<Vec<TraceEntry>>,
    tx: broadcast::Sender<TraceEvent>,
}

impl TraceRecorder {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            entries: RwLock::new(Vec::new()),
            tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TraceEvent> {
        self.tx.subscribe()
    }

    /// Clear the buffer at the start of a run.
    pub async fn reset(&self) {
        self.entries.write().await.clear();
        let _ = self.tx.send(TraceEvent::TraceReset);
    }

    pub async fn record(
        &self,
        role: TraceRole,
        kind: StepKind,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> TraceEntry {
        let entry = {
            let mut entries = self.entries.write().await;
            let mut timestamp = Utc::now();
            // Keep timestamps non-decreasing even if the clock steps back.
            if let Some(last) = entries.last()
                && last.timestamp > timestamp
            {
                timestamp = last.timestamp;
            }
            let entry = TraceEntry {
                id: Uuid::new_v4(),
                timestamp,
                role,
                message: message.into(),
                kind,
                payload,
            };
            entries.push(entry.clone());
            entry
        };
        let _ = self.tx.send(TraceEvent::TraceEntry {
            entry: entry.clone(),
        });
        entry
    }

    pub async fn thinking(&self, role: TraceRole, message: impl Into<String>) -> TraceEntry {
        self.record(role, StepKind::Thinking, message, None).await
    }

    pub async fn action(&self, role: TraceRole, message: impl Into<String>) -> TraceEntry {
        self.record(role, StepKind::Action, message, None).await
    }

    pub async fn result(
        &self,
        role: TraceRole,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> TraceEntry {
        self.record(role, StepKind::Result, message, payload).await
    }

    /// Snapshot of the current run's entries, in order.
    pub async fn entries(&self) -> Vec<TraceEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
