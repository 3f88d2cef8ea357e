//! Mailbox poller: fetch recent items on an interval and admit new ones.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::mailbox::{MailItem, MailboxClient};
use super::{InboundSignal, Intake};
use crate::connectors::{ConnectorId, ConnectorRegistry};
use crate::error::MailboxError;
use crate::schedule::{LoopHandle, ticker};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollReport {
    pub fetched: usize,
    pub admitted: usize,
}

pub struct MailboxPoller {
    client: Arc<dyn MailboxClient>,
    registry: Arc<ConnectorRegistry>,
    intake: Arc<Intake>,
    interval: Duration,
    max_results: u32,
}

impl MailboxPoller {
    pub fn new(
        client: Arc<dyn MailboxClient>,
        registry: Arc<ConnectorRegistry>,
        intake: Arc<Intake>,
        interval: Duration,
        max_results: u32,
    ) -> Self {
        Self {
            client,
            registry,
            intake,
            interval,
            max_results,
        }
    }

    fn to_signal(item: MailItem) -> InboundSignal {
        let content = item.content();
        InboundSignal {
            source: ConnectorId::Gmail,
            sender: item.from,
            content,
            subject: Some(item.subject),
            priority_hint: None,
            external_id: Some(item.remote_id),
            received_at: Some(item.received_at),
        }
    }

    /// Run a single poll cycle.
    ///
    /// A rejected credential disconnects the connector before the error is
    /// returned.
    pub async fn poll_once(&self) -> Result<PollReport, MailboxError> {
        let credential = self
            .registry
            .credential(ConnectorId::Gmail)
            .await
            .ok_or_else(|| MailboxError::MissingCredential(ConnectorId::Gmail.to_string()))?;

        let items = match self.client.fetch_recent(&credential, self.max_results).await {
            Ok(items) => items,
            Err(MailboxError::Unauthorized) => {
                warn!("Mailbox credential rejected, disconnecting connector");
                self.registry.disconnect(ConnectorId::Gmail).await;
                return Err(MailboxError::Unauthorized);
            }
            Err(e) => return Err(e),
        };

        let mut report = PollReport {
            fetched: items.len(),
            admitted: 0,
        };
        for item in items {
            if self.intake.admit(Self::to_signal(item)).await.is_some() {
                report.admitted += 1;
            }
        }
        self.registry.mark_synced(ConnectorId::Gmail).await;

        if report.admitted > 0 {
            info!(fetched = report.fetched, admitted = report.admitted, "Mailbox poll admitted new items");
        } else {
            debug!(fetched = report.fetched, "Mailbox poll found nothing new");
        }
        Ok(report)
    }

    /// Poll until stopped, or until the credential is rejected or removed.
    pub fn spawn(self) -> LoopHandle {
        LoopHandle::spawn("mailbox-poller", move |shutdown| self.run(shutdown))
    }

    async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(interval_secs = self.interval.as_secs(), "Mailbox poller started");
        let mut tick = ticker(self.interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mailbox poller shutting down");
                return;
            }

            match self.poll_once().await {
                Ok(_) => {}
                Err(e @ (MailboxError::Unauthorized | MailboxError::MissingCredential(_))) => {
                    warn!(error = %e, "Mailbox poller stopping until reconnected");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Mailbox poll failed");
                }
            }
        }
    }
}
