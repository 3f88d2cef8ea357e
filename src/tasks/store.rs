//! Task store: the authoritative in-memory task collection, with broadcast
//! of every mutation to observers (auto-trigger rule, WebSocket clients).

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info};

use super::model::{Task, TaskStatus};
use crate::connectors::ConnectorId;
use crate::error::PipelineError;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Emitted after every store mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskCreated { task: Task },
    TaskUpdated { task: Task },
    TasksCleared,
}

/// In-memory task store.
///
/// Mutation is whole-record replacement under the write lock: the current
/// record is read, the next record is produced, and it is written back.
pub struct TaskStore {
    tasks: RwLock<Vec<Task>>,
    tx: broadcast::Sender<TaskEvent>,
}

impl TaskStore {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self {
            tasks: RwLock::new(Vec::new()),
            tx,
        })
    }

    /// Subscribe to store mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Insert a task unless one with the same identifier already exists.
    ///
    /// Returns the inserted task, or `None` for a duplicate.
    pub async fn insert_if_absent(&self, task: Task) -> Option<Task> {
        {
            let mut tasks = self.tasks.write().await;
            if tasks.iter().any(|t| t.id == task.id) {
                debug!(task_id = %task.id, "Task already present, skipping insert");
                return None;
            }
            tasks.push(task.clone());
        }

        info!(
            task_id = %task.id,
            source = %task.source,
            sender = %task.sender,
            "Task created"
        );
        let _ = self.tx.send(TaskEvent::TaskCreated { task: task.clone() });
        Some(task)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.tasks.read().await.iter().any(|t| t.id == id)
    }

    pub async fn get(&self, id: &str) -> Option<Task> {
        self.tasks.read().await.iter().find(|t| t.id == id).cloned()
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks.iter().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Pending tasks from `source`, oldest first.
    pub async fn pending_for(&self, source: ConnectorId) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.source == source)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    /// Oldest pending task matching `pred`.
    pub async fn first_pending_where<F>(&self, pred: F) -> Option<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let tasks = self.tasks.read().await;
        tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && pred(t))
            .min_by_key(|t| t.created_at)
            .cloned()
    }

    /// Replace a task with the record produced by `f`.
    ///
    /// Status changes must follow the lifecycle, and result fields that were
    /// set are carried forward if `f` leaves them empty.
    pub async fn replace<F>(&self, id: &str, f: F) -> Result<Task, PipelineError>
    where
        F: FnOnce(&Task) -> Task,
    {
        self.try_replace(id, |current| Ok(f(current))).await
    }

    /// Move a task to `to`, failing without mutation unless it is currently
    /// in `from`.
    pub async fn transition(
        &self,
        id: &str,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<Task, PipelineError> {
        self.try_replace(id, |current| {
            if current.status != from {
                return Err(PipelineError::InvalidTransition {
                    id: current.id.clone(),
                    from: current.status.to_string(),
                    to: to.to_string(),
                });
            }
            Ok(Task {
                status: to,
                ..current.clone()
            })
        })
        .await
    }

    async fn try_replace<F>(&self, id: &str, f: F) -> Result<Task, PipelineError>
    where
        F: FnOnce(&Task) -> Result<Task, PipelineError>,
    {
        let next = {
            let mut tasks = self.tasks.write().await;
            let slot = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| PipelineError::TaskNotFound(id.to_string()))?;

            let mut next = f(slot)?;
            next.id = slot.id.clone();
            if next.status != slot.status && !slot.status.can_transition_to(next.status) {
                return Err(PipelineError::InvalidTransition {
                    id: id.to_string(),
                    from: slot.status.to_string(),
                    to: next.status.to_string(),
                });
            }
            if next.classification.is_none() {
                next.classification = slot.classification.clone();
            }
            if next.decision.is_none() {
                next.decision = slot.decision.clone();
            }
            if next.output.is_none() {
                next.output = slot.output.clone();
            }
            next.updated_at = Utc::now();

            *slot = next.clone();
            next
        };

        let _ = self.tx.send(TaskEvent::TaskUpdated { task: next.clone() });
        Ok(next)
    }

    /// Remove every task.
    pub async fn clear(&self) -> usize {
        let removed = {
            let mut tasks = self.tasks.write().await;
            let n = tasks.len();
            tasks.clear();
            n
        };
        info!(removed, "Task store cleared");
        let _ = self.tx.send(TaskEvent::TasksCleared);
        removed
    }
}
