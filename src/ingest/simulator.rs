//! Simulated traffic generator.
//!
//! On each tick, if at least one simulation-eligible connector is
//! connected, flip a weighted coin and maybe emit a canned signal from that
//! source's template pool with a randomly weighted priority hint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::prelude::*;
use rand::rngs::StdRng;
use tracing::{debug, info};

use super::{InboundSignal, Intake};
use crate::config::SimulationConfig;
use crate::connectors::{ConnectorId, ConnectorRegistry};
use crate::schedule::{LoopHandle, ticker};
use crate::tasks::{Priority, Task};

/// Priority hint choices and their weights.
const PRIORITY_WEIGHTS: [(Priority, u32); 3] = [
    (Priority::High, 2),
    (Priority::Medium, 5),
    (Priority::Low, 3),
];

const SLACK_TEMPLATES: &[(&str, &str)] = &[
    ("maya.chen", "We need a PRD for the new onboarding flow, priority high"),
    ("devon", "Can someone summarize yesterday's incident channel for leadership?"),
    ("priya", "Is the Atlas launch still on for Friday?"),
    ("sam.ortiz", "FYI the staging cluster will be down for maintenance tonight."),
    ("maya.chen", "Please draft a reply to the Acme team about the API rate limits"),
];

const JIRA_TEMPLATES: &[(&str, &str)] = &[
    ("jira-bot", "OPS-412 moved to Blocked: payment webhook retries failing, urgent"),
    ("jira-bot", "OPS-398 needs requirements before sprint planning"),
    ("jira-bot", "OPS-377 resolved: search latency back under 200ms."),
    ("jira-bot", "Can we get a recap of open P1 tickets for the weekly review?"),
];

const DOCS_TEMPLATES: &[(&str, &str)] = &[
    ("docs", "New comment on Q3 Roadmap: could you write the spec for offline mode?"),
    ("docs", "Meeting notes from the Platform sync were shared with you."),
    ("docs", "Leo asked: should the pricing page reply email go out this week?"),
    ("docs", "Design review doc for Billing v2 was updated."),
];

const GMAIL_TEMPLATES: &[(&str, &str)] = &[
    ("partner@acme.io", "Could you send over the integration timeline? No rush."),
];

fn templates_for(source: ConnectorId) -> &'static [(&'static str, &'static str)] {
    match source {
        ConnectorId::Slack => SLACK_TEMPLATES,
        ConnectorId::Jira => JIRA_TEMPLATES,
        ConnectorId::Docs => DOCS_TEMPLATES,
        ConnectorId::Gmail => GMAIL_TEMPLATES,
    }
}

pub struct SimulatedTraffic {
    registry: Arc<ConnectorRegistry>,
    intake: Arc<Intake>,
    config: SimulationConfig,
    rng: Mutex<StdRng>,
}

impl SimulatedTraffic {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        intake: Arc<Intake>,
        config: SimulationConfig,
    ) -> Self {
        Self::with_rng(registry, intake, config, StdRng::from_entropy())
    }

    /// Deterministic generator for tests.
    pub fn with_seed(
        registry: Arc<ConnectorRegistry>,
        intake: Arc<Intake>,
        config: SimulationConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(registry, intake, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        registry: Arc<ConnectorRegistry>,
        intake: Arc<Intake>,
        config: SimulationConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            registry,
            intake,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Draw a signal for one of `sources`, or `None` if the coin says no.
    fn draw(&self, sources: &[ConnectorId]) -> Option<InboundSignal> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        if !rng.gen_bool(self.config.probability.clamp(0.0, 1.0)) {
            return None;
        }
        let source = *sources.choose(&mut *rng)?;
        let (sender, content) = *templates_for(source).choose(&mut *rng)?;
        let priority = PRIORITY_WEIGHTS
            .choose_weighted(&mut *rng, |(_, weight)| *weight)
            .map(|(p, _)| *p)
            .unwrap_or(Priority::Medium);

        let mut signal = InboundSignal::new(source, sender, content);
        signal.priority_hint = Some(priority);
        Some(signal)
    }

    /// One generator tick.
    pub async fn tick(&self) -> Option<Task> {
        let sources = self.registry.simulation_sources().await;
        if sources.is_empty() {
            debug!("No active connectors, skipping simulated traffic");
            return None;
        }
        let signal = self.draw(&sources)?;
        let task = self.intake.admit(signal).await?;
        debug!(task_id = %task.id, source = %task.source, "Simulated signal generated");
        Some(task)
    }

    pub fn spawn(self) -> LoopHandle {
        LoopHandle::spawn("simulated-traffic", move |shutdown| self.run(shutdown))
    }

    async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            probability = self.config.probability,
            "Simulated traffic started"
        );
        let mut tick = ticker(self.config.interval);
        // The first tick fires immediately; skip it so traffic starts one
        // interval after activation.
        tick.tick().await;

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Simulated traffic shutting down");
                return;
            }

            self.tick().await;
        }
    }
}
