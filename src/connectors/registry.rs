//! In-memory connector registry with change notification.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info};

use super::{ConnectorId, ConnectorState, ConnectorSummary};
use crate::error::ConnectorError;

/// Tracks connection and auto-trigger state for every connector.
///
/// Records are replaced whole: read the current state, build the next one,
/// write it back under the same lock.
pub struct ConnectorRegistry {
    states: RwLock<BTreeMap<ConnectorId, ConnectorState>>,
    /// Bumped after every change so observers can re-evaluate.
    changes: watch::Sender<u64>,
}

impl ConnectorRegistry {
    /// Create a registry with every connector disconnected.
    pub fn new() -> Arc<Self> {
        let states = ConnectorId::ALL
            .into_iter()
            .map(|id| (id, ConnectorState::disconnected(id)))
            .collect();
        let (changes, _rx) = watch::channel(0);
        Arc::new(Self {
            states: RwLock::new(states),
            changes,
        })
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    async fn replace<F>(&self, id: ConnectorId, f: F) -> Result<ConnectorState, ConnectorError>
    where
        F: FnOnce(&ConnectorState) -> Result<ConnectorState, ConnectorError>,
    {
        let next = {
            let mut states = self.states.write().await;
            let current = states
                .get(&id)
                .cloned()
                .unwrap_or_else(|| ConnectorState::disconnected(id));
            let next = f(&current)?;
            states.insert(id, next.clone());
            next
        };
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
        Ok(next)
    }

    /// Mark a connector connected. Live-polling connectors need a credential.
    pub async fn connect(
        &self,
        id: ConnectorId,
        credential: Option<SecretString>,
    ) -> Result<ConnectorState, ConnectorError> {
        if id.uses_live_polling() && credential.is_none() {
            return Err(ConnectorError::CredentialRequired(id.to_string()));
        }
        let credential = if id.uses_live_polling() { credential } else { None };

        let state = self
            .replace(id, |current| {
                Ok(ConnectorState {
                    connected: true,
                    credential,
                    ..current.clone()
                })
            })
            .await?;
        info!(connector = %id, "Connector connected");
        Ok(state)
    }

    /// Disconnect a connector, clearing its credential and auto-trigger flag.
    pub async fn disconnect(&self, id: ConnectorId) -> ConnectorState {
        let result = self
            .replace(id, |current| {
                Ok(ConnectorState {
                    last_sync: current.last_sync,
                    ..ConnectorState::disconnected(id)
                })
            })
            .await;
        info!(connector = %id, "Connector disconnected");
        result.unwrap_or_else(|_| ConnectorState::disconnected(id))
    }

    /// Toggle auto-processing. Enabling requires the connector be connected.
    pub async fn set_auto_trigger(
        &self,
        id: ConnectorId,
        enabled: bool,
    ) -> Result<ConnectorState, ConnectorError> {
        let state = self
            .replace(id, |current| {
                if enabled && !current.connected {
                    return Err(ConnectorError::NotConnected(id.to_string()));
                }
                Ok(ConnectorState {
                    auto_trigger: enabled,
                    ..current.clone()
                })
            })
            .await?;
        info!(connector = %id, enabled, "Auto-trigger updated");
        Ok(state)
    }

    /// Record a successful sync.
    pub async fn mark_synced(&self, id: ConnectorId) {
        let _ = self
            .replace(id, |current| {
                Ok(ConnectorState {
                    last_sync: Some(Utc::now()),
                    ..current.clone()
                })
            })
            .await;
        debug!(connector = %id, "Connector synced");
    }

    pub async fn get(&self, id: ConnectorId) -> ConnectorState {
        self.states
            .read()
            .await
            .get(&id)
            .cloned()
            .unwrap_or_else(|| ConnectorState::disconnected(id))
    }

    pub async fn list(&self) -> Vec<ConnectorSummary> {
        self.states
            .read()
            .await
            .values()
            .map(ConnectorState::summary)
            .collect()
    }

    /// Credential of a connected connector, if any.
    pub async fn credential(&self, id: ConnectorId) -> Option<SecretString> {
        self.states
            .read()
            .await
            .get(&id)
            .filter(|s| s.connected)
            .and_then(|s| s.credential.clone())
    }

    /// Connected connectors that are fed simulated traffic.
    pub async fn simulation_sources(&self) -> Vec<ConnectorId> {
        self.states
            .read()
            .await
            .values()
            .filter(|s| s.connected && !s.id.uses_live_polling())
            .map(|s| s.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_disconnected() {
        let registry = ConnectorRegistry::new();
        let all = registry.list().await;
        assert_eq!(all.len(), ConnectorId::ALL.len());
        assert!(all.iter().all(|c| !c.connected && !c.auto_trigger));
        assert!(registry.simulation_sources().await.is_empty());
    }

    #[tokio::test]
    async fn auto_trigger_requires_connection() {
        let registry = ConnectorRegistry::new();
        let err = registry
            .set_auto_trigger(ConnectorId::Slack, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected(_)));

        registry.connect(ConnectorId::Slack, None).await.unwrap();
        registry.set_auto_trigger(ConnectorId::Slack, true).await.unwrap();
        assert!(registry.get(ConnectorId::Slack).await.auto_trigger);
    }

    #[tokio::test]
    async fn gmail_requires_credential() {
        let registry = ConnectorRegistry::new();
        let err = registry.connect(ConnectorId::Gmail, None).await.unwrap_err();
        assert!(matches!(err, ConnectorError::CredentialRequired(_)));

        registry
            .connect(ConnectorId::Gmail, Some(SecretString::from("tok")))
            .await
            .unwrap();
        assert!(registry.credential(ConnectorId::Gmail).await.is_some());
        // Live connectors never receive simulated traffic.
        assert!(registry.simulation_sources().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_clears_credential_and_auto_trigger() {
        let registry = ConnectorRegistry::new();
        registry
            .connect(ConnectorId::Gmail, Some(SecretString::from("tok")))
            .await
            .unwrap();
        registry.set_auto_trigger(ConnectorId::Gmail, true).await.unwrap();
        registry.mark_synced(ConnectorId::Gmail).await;

        let state = registry.disconnect(ConnectorId::Gmail).await;
        assert!(!state.connected);
        assert!(!state.auto_trigger);
        assert!(state.credential.is_none());
        assert!(state.last_sync.is_some());
        assert!(registry.credential(ConnectorId::Gmail).await.is_none());
    }

    #[tokio::test]
    async fn changes_are_observable() {
        let registry = ConnectorRegistry::new();
        let mut rx = registry.subscribe();
        registry.connect(ConnectorId::Docs, None).await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();
        assert_eq!(registry.simulation_sources().await, vec![ConnectorId::Docs]);
    }

    #[tokio::test]
    async fn simulated_connectors_drop_credentials() {
        let registry = ConnectorRegistry::new();
        let state = registry
            .connect(ConnectorId::Slack, Some(SecretString::from("ignored")))
            .await
            .unwrap();
        assert!(state.credential.is_none());
    }
}
