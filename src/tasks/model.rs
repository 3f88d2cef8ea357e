//! Task data model: lifecycle status, classification, decision, output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::connectors::ConnectorId;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be processed.
    Pending,
    /// A pipeline run is in flight.
    Processing,
    /// The run finished; never re-run.
    Completed,
    /// The run aborted; may be reset to pending for a manual retry.
    Failed,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Processing) |
            (Processing, Completed) | (Processing, Failed) |
            // Manual retry
            (Failed, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// What kind of work a signal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    ActionItem,
    Question,
    Informational,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ActionItem => "ACTION_ITEM",
            Self::Question => "QUESTION",
            Self::Informational => "INFORMATIONAL",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Kind of artifact the execution stage should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputKind {
    Email,
    Prd,
    Summary,
    /// No artifact; execution only records the decision.
    None,
}

impl OutputKind {
    pub fn needs_generation(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Prd => "PRD",
            Self::Summary => "SUMMARY",
            Self::None => "NONE",
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Classifier stage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub priority: Priority,
    /// One-sentence summary.
    pub summary: String,
    pub entities: Vec<String>,
}

impl Classification {
    /// Substituted when the classifier backend fails.
    pub fn fallback() -> Self {
        Self {
            kind: TaskKind::Unknown,
            priority: Priority::Medium,
            summary: "classification failed".to_string(),
            entities: Vec::new(),
        }
    }
}

/// Decision stage result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub reasoning: String,
    #[serde(rename = "output_type")]
    pub output_kind: OutputKind,
}

impl Decision {
    /// Substituted when the decision backend fails.
    pub fn fallback() -> Self {
        Self {
            action: "manual review required".to_string(),
            reasoning: "decision backend unavailable".to_string(),
            output_kind: OutputKind::None,
        }
    }
}

/// Artifact produced by the execution stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedOutput {
    pub kind: OutputKind,
    pub content: String,
}

/// One inbound signal and everything derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique, never reused.
    pub id: String,
    pub source: ConnectorId,
    pub content: String,
    pub sender: String,
    /// Subject line when the source has one (mail).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Priority suggested at ingestion; the classifier has the final word.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_hint: Option<Priority>,
    /// When the remote source says the item arrived. Ordering uses
    /// `created_at`, the local admission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub classification: Option<Classification>,
    pub decision: Option<Decision>,
    pub output: Option<GeneratedOutput>,
}

impl Task {
    /// Create a pending task with a fresh identifier.
    pub fn new(source: ConnectorId, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::with_id(format!("task-{}", Uuid::new_v4()), source, sender, content)
    }

    /// Create a pending task with a caller-derived identifier.
    pub fn with_id(
        id: impl Into<String>,
        source: ConnectorId,
        sender: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            source,
            content: content.into(),
            sender: sender.into(),
            subject: None,
            priority_hint: None,
            received_at: None,
            created_at: now,
            updated_at: now,
            status: TaskStatus::Pending,
            classification: None,
            decision: None,
            output: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_priority_hint(mut self, priority: Priority) -> Self {
        self.priority_hint = Some(priority);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self
    }
}
