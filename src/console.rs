//! Console: wires the registry, store, ingestion loops and pipeline.
//!
//! Background loops follow connector state. The mailbox poller runs only
//! while Gmail is connected with a credential, and the simulated traffic
//! generator runs only while at least one simulation-eligible connector is
//! connected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use secrecy::SecretString;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{BackendMode, BackendSelector, SimulatedBackend};
use crate::config::ConsoleConfig;
use crate::connectors::{ConnectorId, ConnectorRegistry, ConnectorState};
use crate::error::{ConnectorError, PipelineError};
use crate::ingest::{
    DedupCounts, GmailClient, Intake, MailboxClient, MailboxPoller, SimulatedTraffic,
};
use crate::pipeline::{AutoTrigger, Orchestrator, OrchestratorConfig, TraceRecorder};
use crate::schedule::LoopHandle;
use crate::tasks::{Task, TaskStore};

#[derive(Default)]
struct LoopSlots {
    poller: Option<LoopHandle>,
    simulator: Option<LoopHandle>,
}

/// Starts and stops ingestion loops to match connector state.
struct LoopSupervisor {
    registry: Arc<ConnectorRegistry>,
    intake: Arc<Intake>,
    mailbox: Arc<dyn MailboxClient>,
    config: ConsoleConfig,
    slots: Mutex<LoopSlots>,
}

impl LoopSupervisor {
    async fn sync(&self) {
        let mut slots = self.slots.lock().await;

        let want_poller = self.registry.credential(ConnectorId::Gmail).await.is_some();
        if slots.poller.as_ref().is_some_and(LoopHandle::is_finished) {
            slots.poller = None;
        }
        match (want_poller, slots.poller.is_some()) {
            (true, false) => {
                let poller = MailboxPoller::new(
                    self.mailbox.clone(),
                    self.registry.clone(),
                    self.intake.clone(),
                    self.config.mailbox_poll_interval,
                    self.config.mailbox_max_results,
                );
                slots.poller = Some(poller.spawn());
            }
            (false, true) => {
                if let Some(handle) = slots.poller.take() {
                    handle.stop();
                }
            }
            _ => {}
        }

        let want_simulator = self.config.simulation.enabled
            && !self.registry.simulation_sources().await.is_empty();
        if slots.simulator.as_ref().is_some_and(LoopHandle::is_finished) {
            slots.simulator = None;
        }
        match (want_simulator, slots.simulator.is_some()) {
            (true, false) => {
                let traffic = SimulatedTraffic::new(
                    self.registry.clone(),
                    self.intake.clone(),
                    self.config.simulation.clone(),
                );
                slots.simulator = Some(traffic.spawn());
            }
            (false, true) => {
                if let Some(handle) = slots.simulator.take() {
                    handle.stop();
                }
            }
            _ => {}
        }
    }

    async fn running(&self) -> (bool, bool) {
        let slots = self.slots.lock().await;
        (
            slots.poller.as_ref().is_some_and(|h| !h.is_finished()),
            slots.simulator.as_ref().is_some_and(|h| !h.is_finished()),
        )
    }

    async fn stop_all(&self) {
        let mut slots = self.slots.lock().await;
        for handle in [slots.poller.take(), slots.simulator.take()].into_iter().flatten() {
            handle.stop();
        }
    }
}

pub struct Console {
    store: Arc<TaskStore>,
    registry: Arc<ConnectorRegistry>,
    trace: Arc<TraceRecorder>,
    intake: Arc<Intake>,
    selector: Arc<BackendSelector>,
    orchestrator: Arc<Orchestrator>,
    supervisor: Arc<LoopSupervisor>,
    background: Mutex<Vec<LoopHandle>>,
    started: AtomicBool,
}

impl Console {
    pub fn new(config: ConsoleConfig) -> Arc<Self> {
        Self::with_mailbox(config, Arc::new(GmailClient::new()))
    }

    /// Build with a custom mailbox client.
    pub fn with_mailbox(config: ConsoleConfig, mailbox: Arc<dyn MailboxClient>) -> Arc<Self> {
        let simulated = SimulatedBackend::new(config.simulation.backend_delay);
        let selector = Arc::new(BackendSelector::new(
            config.api_key.clone(),
            config.model.clone(),
            simulated,
        ));
        Self::with_parts(config, mailbox, selector)
    }

    /// Build with a custom mailbox client and backend selector.
    pub fn with_parts(
        config: ConsoleConfig,
        mailbox: Arc<dyn MailboxClient>,
        selector: Arc<BackendSelector>,
    ) -> Arc<Self> {
        let store = TaskStore::new();
        let registry = ConnectorRegistry::new();
        let trace = TraceRecorder::new();
        let intake = Intake::new(store.clone());
        let orchestrator = Orchestrator::new(
            store.clone(),
            trace.clone(),
            selector.clone(),
            OrchestratorConfig {
                recall_delay: config.recall_delay,
                stage_timeout: config.stage_timeout,
            },
        );
        let supervisor = Arc::new(LoopSupervisor {
            registry: registry.clone(),
            intake: intake.clone(),
            mailbox,
            config,
            slots: Mutex::new(LoopSlots::default()),
        });

        Arc::new(Self {
            store,
            registry,
            trace,
            intake,
            selector,
            orchestrator,
            supervisor,
            background: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Connect boot-time connectors and start the background rules.
    /// Calling it again is a no-op.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = &self.supervisor.config;
        for id in config.auto_connect.clone() {
            if id.uses_live_polling() {
                continue;
            }
            if let Err(e) = self.registry.connect(id, None).await {
                warn!(connector = %id, error = %e, "Boot connect failed");
            }
        }
        if let Some(token) = config.gmail_token.clone()
            && let Err(e) = self.registry.connect(ConnectorId::Gmail, Some(token)).await
        {
            warn!(error = %e, "Boot connect of Gmail failed");
        }

        let auto = AutoTrigger::new(
            self.store.clone(),
            self.registry.clone(),
            self.orchestrator.clone(),
        )
        .spawn();

        let supervisor = self.supervisor.clone();
        let mut changes = self.registry.subscribe();
        let sync = LoopHandle::spawn("connector-sync", move |shutdown| async move {
            loop {
                supervisor.sync().await;
                if changes.changed().await.is_err() || shutdown.load(Ordering::Relaxed) {
                    return;
                }
            }
        });

        self.background.lock().await.extend([auto, sync]);
        info!(
            mode = %self.selector.current_mode().await,
            "Console started"
        );
    }

    /// Stop every background loop.
    pub async fn shutdown(&self) {
        for handle in self.background.lock().await.drain(..) {
            handle.stop();
        }
        self.supervisor.stop_all().await;
        info!("Console stopped");
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectorRegistry> {
        &self.registry
    }

    pub fn trace(&self) -> &Arc<TraceRecorder> {
        &self.trace
    }

    pub fn dedup_counts(&self) -> DedupCounts {
        self.intake.dedup_counts()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Manual dispatch. `None` for blank content.
    pub async fn dispatch(
        &self,
        source: ConnectorId,
        sender: Option<String>,
        content: &str,
    ) -> Option<Task> {
        self.intake.dispatch(source, sender, content).await
    }

    /// Submit a pending task; the run continues in the background.
    pub async fn process(&self, task_id: &str) -> Result<Task, PipelineError> {
        self.orchestrator.submit(task_id).await
    }

    /// Resubmit a failed task.
    pub async fn retry(&self, task_id: &str) -> Result<Task, PipelineError> {
        self.orchestrator.retry(task_id).await
    }

    pub async fn connect(
        &self,
        id: ConnectorId,
        credential: Option<SecretString>,
    ) -> Result<ConnectorState, ConnectorError> {
        let state = self.registry.connect(id, credential).await?;
        self.supervisor.sync().await;
        Ok(state)
    }

    pub async fn disconnect(&self, id: ConnectorId) -> ConnectorState {
        let state = self.registry.disconnect(id).await;
        self.supervisor.sync().await;
        state
    }

    pub async fn set_auto_trigger(
        &self,
        id: ConnectorId,
        enabled: bool,
    ) -> Result<ConnectorState, ConnectorError> {
        self.registry.set_auto_trigger(id, enabled).await
    }

    /// Set or clear the user-supplied live backend credential.
    pub async fn set_credential(&self, credential: Option<SecretString>) {
        self.selector.set_user_credential(credential).await;
    }

    pub async fn backend_mode(&self) -> BackendMode {
        self.selector.current_mode().await
    }

    pub async fn clear_tasks(&self) -> usize {
        self.store.clear().await
    }

    /// Whether the (poller, simulator) loops are running.
    pub async fn loops_running(&self) -> (bool, bool) {
        self.supervisor.running().await
    }
}
