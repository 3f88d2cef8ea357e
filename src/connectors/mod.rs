//! Connector registry: which external signal sources are enabled and
//! whether their tasks are processed automatically.

pub mod registry;

pub use registry::ConnectorRegistry;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Closed set of signal sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorId {
    /// Team chat.
    Slack,
    /// Real mailbox, polled over the Gmail API.
    Gmail,
    /// Issue tracker.
    Jira,
    /// Shared documents.
    Docs,
}

impl ConnectorId {
    pub const ALL: [ConnectorId; 4] = [Self::Slack, Self::Gmail, Self::Jira, Self::Docs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Gmail => "gmail",
            Self::Jira => "jira",
            Self::Docs => "docs",
        }
    }

    /// Connectors fed by a live poller rather than simulated traffic.
    pub fn uses_live_polling(&self) -> bool {
        matches!(self, Self::Gmail)
    }
}

impl std::fmt::Display for ConnectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectorId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "slack" => Ok(Self::Slack),
            "gmail" | "email" => Ok(Self::Gmail),
            "jira" => Ok(Self::Jira),
            "docs" => Ok(Self::Docs),
            _ => Err(ConfigError::UnknownConnector(s.to_string())),
        }
    }
}

/// Configuration of one connector.
///
/// `auto_trigger` is only ever true while `connected` is; disconnecting
/// drops both the credential and the auto-trigger flag.
#[derive(Debug, Clone)]
pub struct ConnectorState {
    pub id: ConnectorId,
    pub connected: bool,
    pub auto_trigger: bool,
    pub last_sync: Option<DateTime<Utc>>,
    /// Opaque credential handle, present only for live-polling connectors.
    pub credential: Option<SecretString>,
}

impl ConnectorState {
    pub fn disconnected(id: ConnectorId) -> Self {
        Self {
            id,
            connected: false,
            auto_trigger: false,
            last_sync: None,
            credential: None,
        }
    }

    /// Serializable view without the credential.
    pub fn summary(&self) -> ConnectorSummary {
        ConnectorSummary {
            id: self.id,
            connected: self.connected,
            auto_trigger: self.auto_trigger,
            last_sync: self.last_sync,
            has_credential: self.credential.is_some(),
        }
    }
}

/// Connector state as exposed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSummary {
    pub id: ConnectorId,
    pub connected: bool,
    pub auto_trigger: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub has_credential: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("SLACK".parse::<ConnectorId>().unwrap(), ConnectorId::Slack);
        assert_eq!(" Gmail ".parse::<ConnectorId>().unwrap(), ConnectorId::Gmail);
        assert_eq!("email".parse::<ConnectorId>().unwrap(), ConnectorId::Gmail);
        assert!("fax".parse::<ConnectorId>().is_err());
    }

    #[test]
    fn display_matches_serde() {
        for id in ConnectorId::ALL {
            let json = serde_json::to_value(id).unwrap();
            assert_eq!(json, id.to_string());
        }
    }

    #[test]
    fn summary_hides_credential() {
        let mut state = ConnectorState::disconnected(ConnectorId::Gmail);
        state.connected = true;
        state.credential = Some(SecretString::from("s3cret-token"));
        let json = serde_json::to_string(&state.summary()).unwrap();
        assert!(json.contains("\"has_credential\":true"));
        assert!(!json.contains("s3cret"));
    }
}
