//! Event ingestion.
//!
//! Three producers feed one intake:
//! - manual dispatch ([`Intake::dispatch`])
//! - the simulated traffic generator ([`SimulatedTraffic`])
//! - the external mailbox poller ([`MailboxPoller`])
//!
//! Every admitted signal becomes a PENDING task in the store.

pub mod dedup;
pub mod mailbox;
pub mod poller;
pub mod simulator;

pub use dedup::{DedupCounts, DedupLedger};
pub use mailbox::{GmailClient, MailItem, MailboxClient};
pub use poller::{MailboxPoller, PollReport};
pub use simulator::SimulatedTraffic;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::connectors::ConnectorId;
use crate::tasks::{Priority, Task, TaskStore};

/// Sender recorded for manual dispatches without one.
pub const DEFAULT_SENDER: &str = "operator";

/// One inbound unit of raw text, before it becomes a task.
#[derive(Debug, Clone)]
pub struct InboundSignal {
    pub source: ConnectorId,
    pub sender: String,
    pub content: String,
    pub subject: Option<String>,
    pub priority_hint: Option<Priority>,
    /// Remote identifier for signals that may be fetched more than once.
    pub external_id: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
}

impl InboundSignal {
    pub fn new(source: ConnectorId, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source,
            sender: sender.into(),
            content: content.into(),
            subject: None,
            priority_hint: None,
            external_id: None,
            received_at: None,
        }
    }

    fn into_task(self, id: Option<String>) -> Task {
        let mut task = match id {
            Some(id) => Task::with_id(id, self.source, self.sender, self.content),
            None => Task::new(self.source, self.sender, self.content),
        };
        task.subject = self.subject;
        task.priority_hint = self.priority_hint;
        task.received_at = self.received_at;
        task
    }
}

/// Single funnel from producers into the task store.
pub struct Intake {
    store: Arc<TaskStore>,
    ledger: DedupLedger,
}

impl Intake {
    pub fn new(store: Arc<TaskStore>) -> Arc<Self> {
        let ledger = DedupLedger::new(store.clone());
        Arc::new(Self { store, ledger })
    }

    /// Remote items admitted and skipped as duplicates.
    pub fn dedup_counts(&self) -> DedupCounts {
        self.ledger.counts()
    }

    /// Admit a signal. Blank content and already-seen remote items are
    /// dropped without error.
    pub async fn admit(&self, signal: InboundSignal) -> Option<Task> {
        if signal.content.trim().is_empty() {
            debug!(source = %signal.source, "Dropping blank signal");
            return None;
        }

        match signal.external_id.clone() {
            Some(remote_id) => {
                let id = DedupLedger::derive_id(signal.source, &remote_id);
                self.ledger.admit(signal.into_task(Some(id))).await
            }
            None => self.store.insert_if_absent(signal.into_task(None)).await,
        }
    }

    /// Manual dispatch entry point.
    pub async fn dispatch(
        &self,
        source: ConnectorId,
        sender: Option<String>,
        content: &str,
    ) -> Option<Task> {
        let sender = sender
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());
        self.admit(InboundSignal::new(source, sender, content.trim()))
            .await
    }
}
