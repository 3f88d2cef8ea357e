//! Reasoning backends: the capability consulted by each pipeline stage.
//!
//! Two implementations share one contract:
//! - [`LiveBackend`] prompts an [`LlmProvider`](crate::llm::LlmProvider)
//! - [`SimulatedBackend`] gives deterministic, time-delayed canned responses
//!
//! [`BackendSelector`] picks one per run, so a run is never mixed.

pub mod live;
pub mod selector;
pub mod simulated;

pub use live::LiveBackend;
pub use selector::{BackendSelector, SelectedBackend};
pub use simulated::SimulatedBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::tasks::{Classification, Decision, OutputKind, Priority, Task, TaskKind};

/// Which backend served a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    Live,
    Simulated,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

/// Classifier stage input.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyInput {
    pub raw_content: String,
    pub sender: String,
    pub subject: Option<String>,
    pub priority_hint: Option<Priority>,
}

impl ClassifyInput {
    pub fn from_task(task: &Task) -> Self {
        Self {
            raw_content: task.content.clone(),
            sender: task.sender.clone(),
            subject: task.subject.clone(),
            priority_hint: task.priority_hint,
        }
    }
}

/// Decision stage input.
#[derive(Debug, Clone, Serialize)]
pub struct DecideInput {
    pub summary: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub priority: Priority,
    pub sender: String,
    pub raw_content: String,
}

impl DecideInput {
    pub fn new(task: &Task, classification: &Classification) -> Self {
        Self {
            summary: classification.summary.clone(),
            kind: classification.kind,
            priority: classification.priority,
            sender: task.sender.clone(),
            raw_content: task.content.clone(),
        }
    }
}

/// Execution stage input.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteInput {
    #[serde(rename = "output_type")]
    pub output_kind: OutputKind,
    pub raw_content: String,
    pub summary: String,
    pub sender: String,
}

impl ExecuteInput {
    pub fn new(task: &Task, classification: &Classification, decision: &Decision) -> Self {
        Self {
            output_kind: decision.output_kind,
            raw_content: task.content.clone(),
            summary: classification.summary.clone(),
            sender: task.sender.clone(),
        }
    }
}

/// Stage capability consulted by the orchestrator.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    /// Classify a raw signal.
    async fn classify(&self, input: &ClassifyInput) -> Result<Classification, BackendError>;

    /// Choose an action and the artifact to produce.
    async fn decide(&self, input: &DecideInput) -> Result<Decision, BackendError>;

    /// Generate the artifact text for a non-`None` output kind.
    async fn execute(&self, input: &ExecuteInput) -> Result<String, BackendError>;
}
