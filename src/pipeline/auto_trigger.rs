//! Auto-trigger rule: submit pending work from auto-enabled connectors.
//!
//! Re-evaluated after every store mutation, every connector change and
//! every time the orchestrator goes idle. Submission goes through the
//! orchestrator's run slot, so the rule never starts a second concurrent run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use super::orchestrator::Orchestrator;
use crate::connectors::{ConnectorId, ConnectorRegistry};
use crate::schedule::LoopHandle;
use crate::tasks::TaskStore;

/// Periodic re-check, in case a notification was coalesced away.
const HEARTBEAT: Duration = Duration::from_secs(1);

pub struct AutoTrigger {
    store: Arc<TaskStore>,
    registry: Arc<ConnectorRegistry>,
    orchestrator: Arc<Orchestrator>,
}

impl AutoTrigger {
    pub fn new(
        store: Arc<TaskStore>,
        registry: Arc<ConnectorRegistry>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            store,
            registry,
            orchestrator,
        }
    }

    /// Submit the oldest eligible pending task if the orchestrator is idle.
    ///
    /// Returns the submitted task id.
    pub async fn evaluate(&self) -> Option<String> {
        if self.orchestrator.is_busy() {
            return None;
        }

        let enabled: Vec<ConnectorId> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|c| c.connected && c.auto_trigger)
            .map(|c| c.id)
            .collect();
        if enabled.is_empty() {
            return None;
        }

        let candidate = self
            .store
            .first_pending_where(|t| enabled.contains(&t.source))
            .await?;

        match self.orchestrator.submit(&candidate.id).await {
            Ok(task) => {
                info!(task_id = %task.id, source = %task.source, "Auto-trigger submitted task");
                Some(task.id)
            }
            Err(e) => {
                debug!(task_id = %candidate.id, reason = %e, "Auto-trigger submission rejected");
                None
            }
        }
    }

    /// Run the rule until stopped.
    pub fn spawn(self) -> LoopHandle {
        LoopHandle::spawn("auto-trigger", move |shutdown| self.run(shutdown))
    }

    async fn run(self, shutdown: Arc<AtomicBool>) {
        let mut tasks = self.store.subscribe();
        let mut connectors = self.registry.subscribe();
        let mut busy = self.orchestrator.subscribe_busy();
        let mut heartbeat = crate::schedule::ticker(HEARTBEAT);
        info!("Auto-trigger rule started");

        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            self.evaluate().await;

            tokio::select! {
                event = tasks.recv() => match event {
                    Ok(_) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => return,
                },
                changed = connectors.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                changed = busy.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = heartbeat.tick() => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::{BackendSelector, SimulatedBackend};
    use crate::pipeline::orchestrator::OrchestratorConfig;
    use crate::pipeline::trace::TraceRecorder;
    use crate::tasks::{Task, TaskStatus};

    struct Fixture {
        store: Arc<TaskStore>,
        registry: Arc<ConnectorRegistry>,
        orchestrator: Arc<Orchestrator>,
    }

    fn fixture() -> Fixture {
        let store = TaskStore::new();
        let registry = ConnectorRegistry::new();
        let selector = BackendSelector::new(None, "unused", SimulatedBackend::new(Duration::from_millis(2)));
        let orchestrator = Orchestrator::new(
            store.clone(),
            TraceRecorder::new(),
            Arc::new(selector),
            OrchestratorConfig {
                recall_delay: Duration::from_millis(1),
                stage_timeout: None,
            },
        );
        Fixture {
            store,
            registry,
            orchestrator,
        }
    }

    impl Fixture {
        fn rule(&self) -> AutoTrigger {
            AutoTrigger::new(
                self.store.clone(),
                self.registry.clone(),
                self.orchestrator.clone(),
            )
        }

        async fn wait_until_terminal(&self, ids: &[&str]) {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let mut done = true;
                    for id in ids {
                        let status = self.store.get(id).await.map(|t| t.status);
                        done &= status.is_some_and(|s| s.is_terminal());
                    }
                    if done {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn ignores_sources_without_auto_trigger() {
        let f = fixture();
        f.registry.connect(ConnectorId::Slack, None).await.unwrap();
        f.store
            .insert_if_absent(Task::with_id("t1", ConnectorId::Slack, "a", "hello"))
            .await;
        assert!(f.rule().evaluate().await.is_none());
        assert_eq!(f.store.get("t1").await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn submits_pending_task_from_enabled_source() {
        let f = fixture();
        f.registry.connect(ConnectorId::Slack, None).await.unwrap();
        f.registry.set_auto_trigger(ConnectorId::Slack, true).await.unwrap();
        f.store
            .insert_if_absent(Task::with_id("t1", ConnectorId::Slack, "a", "hello"))
            .await;
        f.store
            .insert_if_absent(Task::with_id("t2", ConnectorId::Docs, "b", "hello"))
            .await;

        assert_eq!(f.rule().evaluate().await.as_deref(), Some("t1"));
        f.wait_until_terminal(&["t1"]).await;
        assert_eq!(f.store.get("t2").await.unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn does_not_submit_while_busy() {
        let f = fixture();
        f.registry.connect(ConnectorId::Slack, None).await.unwrap();
        f.registry.set_auto_trigger(ConnectorId::Slack, true).await.unwrap();
        f.store
            .insert_if_absent(Task::with_id("a", ConnectorId::Slack, "x", "one"))
            .await;
        f.store
            .insert_if_absent(Task::with_id("b", ConnectorId::Slack, "x", "two"))
            .await;

        let permit = f.orchestrator.try_begin("a").await.unwrap();
        assert!(f.rule().evaluate().await.is_none());
        assert_eq!(f.store.get("b").await.unwrap().status, TaskStatus::Pending);
        drop(permit);
    }

    #[tokio::test]
    async fn background_rule_drains_queue_one_at_a_time() {
        let f = fixture();
        f.registry.connect(ConnectorId::Slack, None).await.unwrap();
        f.registry.set_auto_trigger(ConnectorId::Slack, true).await.unwrap();
        let handle = f.rule().spawn();

        let mut events = f.store.subscribe();
        for id in ["a", "b", "c"] {
            f.store
                .insert_if_absent(Task::with_id(id, ConnectorId::Slack, "x", "Please draft a reply"))
                .await;
        }
        f.wait_until_terminal(&["a", "b", "c"]).await;
        handle.stop();

        // Never more than one task in PROCESSING at once.
        let mut processing = std::collections::HashSet::new();
        let mut max_concurrent = 0;
        while let Ok(event) = events.try_recv() {
            if let crate::tasks::TaskEvent::TaskUpdated { task } = event {
                if task.status == TaskStatus::Processing {
                    processing.insert(task.id.clone());
                } else if task.status.is_terminal() {
                    processing.remove(&task.id);
                }
                max_concurrent = max_concurrent.max(processing.len());
            }
        }
        assert_eq!(max_concurrent, 1);
    }
}
