//! Pipeline orchestrator: drives one task through
//! classify → recall → decide → execute.
//!
//! Only one run is in flight system-wide. The run slot is a single-permit
//! semaphore taken with `try_acquire_owned`, so a second submission is
//! rejected immediately rather than queued. A task enters a run only by the
//! atomic PENDING → PROCESSING transition, and every run ends in COMPLETED
//! or FAILED.
//!
//! Classification and decision failures are recoverable: the stage records
//! the error, substitutes a documented default and the run continues.
//! Fatal backend errors at any stage, any execution failure, and store
//! errors abort the run and mark the task FAILED, keeping fields already
//! written.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::trace::{StepKind, TraceRecorder, TraceRole};
use crate::backend::{
    BackendSelector, ClassifyInput, DecideInput, ExecuteInput, SelectedBackend,
};
use crate::error::{BackendError, PipelineError};
use crate::tasks::{
    Classification, Decision, GeneratedOutput, Task, TaskStatus, TaskStore,
};

/// Orchestrator timing settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fixed latency of the recall stage.
    pub recall_delay: Duration,
    /// Optional bound on each backend call.
    pub stage_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            recall_delay: Duration::from_millis(400),
            stage_timeout: None,
        }
    }
}

/// Exclusive right to run one task. Dropping it frees the run slot.
#[derive(Debug)]
pub struct RunPermit {
    task: Task,
    permit: Option<OwnedSemaphorePermit>,
    busy: Arc<watch::Sender<bool>>,
}

impl RunPermit {
    /// The task as it entered PROCESSING.
    pub fn task(&self) -> &Task {
        &self.task
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        // Release the slot before announcing idle so observers can acquire it.
        drop(self.permit.take());
        self.busy.send_replace(false);
    }
}

/// A stage failure that ends the run.
struct RunFailure {
    role: TraceRole,
    error: PipelineError,
}

impl RunFailure {
    fn new(role: TraceRole, error: PipelineError) -> Self {
        Self { role, error }
    }

    fn stage(role: TraceRole, source: BackendError) -> Self {
        Self::new(
            role,
            PipelineError::Stage {
                stage: role.to_string(),
                source,
            },
        )
    }
}

pub struct Orchestrator {
    store: Arc<TaskStore>,
    trace: Arc<TraceRecorder>,
    selector: Arc<BackendSelector>,
    config: OrchestratorConfig,
    slot: Arc<Semaphore>,
    busy: Arc<watch::Sender<bool>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<TaskStore>,
        trace: Arc<TraceRecorder>,
        selector: Arc<BackendSelector>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let (busy, _rx) = watch::channel(false);
        Arc::new(Self {
            store,
            trace,
            selector,
            config,
            slot: Arc::new(Semaphore::new(1)),
            busy: Arc::new(busy),
        })
    }

    /// Observe the global in-flight flag.
    pub fn subscribe_busy(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Claim the run slot and move the task to PROCESSING.
    ///
    /// Rejections leave the store and the trace untouched.
    pub async fn try_begin(&self, task_id: &str) -> Result<RunPermit, PipelineError> {
        let permit = self.acquire_slot(task_id)?;
        self.claim(permit, task_id).await
    }

    fn acquire_slot(&self, task_id: &str) -> Result<OwnedSemaphorePermit, PipelineError> {
        self.slot.clone().try_acquire_owned().map_err(|_| {
            debug!(task_id, "Submission rejected: run in flight");
            PipelineError::Busy
        })
    }

    /// PENDING → PROCESSING under an already held slot.
    async fn claim(
        &self,
        permit: OwnedSemaphorePermit,
        task_id: &str,
    ) -> Result<RunPermit, PipelineError> {
        let task = self
            .store
            .transition(task_id, TaskStatus::Pending, TaskStatus::Processing)
            .await
            .inspect_err(|e| debug!(task_id, reason = %e, "Submission rejected"))?;

        self.busy.send_replace(true);
        info!(task_id, source = %task.source, "Run accepted");
        Ok(RunPermit {
            task,
            permit: Some(permit),
            busy: self.busy.clone(),
        })
    }

    /// Submit and run to completion on the caller's task.
    pub async fn process(&self, task_id: &str) -> Result<Task, PipelineError> {
        let permit = self.try_begin(task_id).await?;
        self.run(permit).await
    }

    /// Submit and run in the background. Returns the PROCESSING task.
    pub async fn submit(self: &Arc<Self>, task_id: &str) -> Result<Task, PipelineError> {
        let permit = self.try_begin(task_id).await?;
        let task = permit.task().clone();
        self.spawn_run(permit);
        Ok(task)
    }

    pub fn spawn_run(self: &Arc<Self>, permit: RunPermit) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let task_id = permit.task().id.clone();
            if let Err(e) = this.run(permit).await {
                error!(task_id = %task_id, error = %e, "Run ended without a final status");
            }
        })
    }

    /// Reset a FAILED task to PENDING and submit it again.
    ///
    /// The run slot is held across both transitions, so a busy pipeline
    /// leaves the task FAILED.
    pub async fn retry(self: &Arc<Self>, task_id: &str) -> Result<Task, PipelineError> {
        let slot = self.acquire_slot(task_id)?;
        self.store
            .transition(task_id, TaskStatus::Failed, TaskStatus::Pending)
            .await?;
        info!(task_id, "Task reset for retry");

        let permit = self.claim(slot, task_id).await?;
        let task = permit.task().clone();
        self.spawn_run(permit);
        Ok(task)
    }

    /// Execute the stages for an accepted task.
    ///
    /// Returns the finalized task (COMPLETED or FAILED). An error means the
    /// task disappeared from the store mid-run.
    pub async fn run(&self, permit: RunPermit) -> Result<Task, PipelineError> {
        let task = permit.task().clone();
        self.trace.reset().await;

        let selected = self.selector.select().await;
        self.trace
            .thinking(
                TraceRole::Ingestion,
                format!(
                    "Picked up {} from {} ({} backend)",
                    task.id, task.source, selected.mode
                ),
            )
            .await;

        let result = match self.run_stages(&task, &selected).await {
            Ok(done) => {
                info!(
                    task_id = %done.id,
                    mode = %selected.mode,
                    output = done.output.as_ref().map(|o| o.kind.label()).unwrap_or("NONE"),
                    "Run completed"
                );
                Ok(done)
            }
            Err(failure) => self.fail(&task.id, failure).await,
        };

        drop(permit);
        result
    }

    async fn fail(&self, task_id: &str, failure: RunFailure) -> Result<Task, PipelineError> {
        error!(
            task_id,
            stage = %failure.role,
            error = %failure.error,
            "Run failed"
        );
        self.trace
            .result(
                failure.role,
                format!("Run failed: {}", failure.error),
                None,
            )
            .await;
        self.store
            .transition(task_id, TaskStatus::Processing, TaskStatus::Failed)
            .await
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        match self.config.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| BackendError::Timeout(limit))?,
            None => fut.await,
        }
    }

    async fn run_stages(
        &self,
        task: &Task,
        selected: &SelectedBackend,
    ) -> Result<Task, RunFailure> {
        let backend = selected.backend.as_ref();

        // 1. Classifier
        self.trace
            .thinking(
                TraceRole::Classifier,
                format!("Classifying signal from {}", task.sender),
            )
            .await;
        let classification = match self.call(backend.classify(&ClassifyInput::from_task(task))).await {
            Ok(c) => {
                self.trace
                    .result(
                        TraceRole::Classifier,
                        format!("Classified as {} ({} priority)", c.kind, c.priority),
                        serde_json::to_value(&c).ok(),
                    )
                    .await;
                c
            }
            Err(e) if e.is_recoverable() => {
                warn!(task_id = %task.id, error = %e, "Classification failed, using defaults");
                let c = Classification::fallback();
                self.trace
                    .result(
                        TraceRole::Classifier,
                        format!("Classification failed ({e}); using defaults"),
                        serde_json::to_value(&c).ok(),
                    )
                    .await;
                c
            }
            Err(e) => return Err(RunFailure::stage(TraceRole::Classifier, e)),
        };
        let task = self
            .store
            .replace(&task.id, |t| Task {
                classification: Some(classification.clone()),
                ..t.clone()
            })
            .await
            .map_err(|e| RunFailure::new(TraceRole::Classifier, e))?;

        // 2. Recall
        self.trace
            .thinking(TraceRole::Recall, "Checking task history for conflicts")
            .await;
        if !self.config.recall_delay.is_zero() {
            tokio::time::sleep(self.config.recall_delay).await;
        }
        self.trace
            .result(TraceRole::Recall, "No blocking constraint", None)
            .await;

        // 3. Decision
        self.trace
            .thinking(TraceRole::Decision, "Choosing next action")
            .await;
        let decision = match self
            .call(backend.decide(&DecideInput::new(&task, &classification)))
            .await
        {
            Ok(d) => {
                self.trace
                    .result(
                        TraceRole::Decision,
                        format!("{} (output: {})", d.action, d.output_kind),
                        serde_json::to_value(&d).ok(),
                    )
                    .await;
                d
            }
            Err(e) if e.is_recoverable() => {
                warn!(task_id = %task.id, error = %e, "Decision failed, using defaults");
                let d = Decision::fallback();
                self.trace
                    .result(
                        TraceRole::Decision,
                        format!("Decision failed ({e}); {}", d.action),
                        serde_json::to_value(&d).ok(),
                    )
                    .await;
                d
            }
            Err(e) => return Err(RunFailure::stage(TraceRole::Decision, e)),
        };
        let task = self
            .store
            .replace(&task.id, |t| Task {
                decision: Some(decision.clone()),
                ..t.clone()
            })
            .await
            .map_err(|e| RunFailure::new(TraceRole::Decision, e))?;

        // 4. Execution
        let output = if decision.output_kind.needs_generation() {
            let label = decision.output_kind.label();
            self.trace
                .action(TraceRole::Execution, format!("Generating {label}"))
                .await;
            let content = self
                .call(backend.execute(&ExecuteInput::new(&task, &classification, &decision)))
                .await
                .map_err(|e| RunFailure::stage(TraceRole::Execution, e))?;
            self.trace
                .record(
                    TraceRole::Execution,
                    StepKind::Result,
                    format!("Generated {label} ({} chars)", content.chars().count()),
                    None,
                )
                .await;
            Some(GeneratedOutput {
                kind: decision.output_kind,
                content,
            })
        } else {
            self.trace
                .action(
                    TraceRole::Execution,
                    format!("No artifact required; recorded \"{}\"", decision.action),
                )
                .await;
            None
        };

        self.store
            .replace(&task.id, |t| Task {
                status: TaskStatus::Completed,
                output: output.clone(),
                ..t.clone()
            })
            .await
            .map_err(|e| RunFailure::new(TraceRole::Execution, e))
    }
}
