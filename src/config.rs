//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::connectors::ConnectorId;

/// Default live model.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Console configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// Environment-level default credential for the live backend.
    pub api_key: Option<SecretString>,
    /// Model name used by the live backend.
    pub model: String,
    /// Port for the HTTP/WS surface.
    pub http_port: u16,
    /// Simulated traffic generator settings.
    pub simulation: SimulationConfig,
    /// Fixed latency of the recall stage.
    pub recall_delay: Duration,
    /// Mailbox poll interval.
    pub mailbox_poll_interval: Duration,
    /// Items fetched per mailbox poll.
    pub mailbox_max_results: u32,
    /// Optional per-backend-call timeout.
    pub stage_timeout: Option<Duration>,
    /// Gmail access token; connects the Gmail connector at boot when set.
    pub gmail_token: Option<SecretString>,
    /// Connectors connected at boot (for simulated traffic).
    pub auto_connect: Vec<ConnectorId>,
    /// Directory for a rolling log file (stderr only when unset).
    pub log_dir: Option<String>,
}

/// Settings for the simulated traffic generator and backend.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub enabled: bool,
    pub interval: Duration,
    /// Probability in `0.0..=1.0` that a tick emits a signal.
    pub probability: f64,
    /// Per-call latency of the simulation backend.
    pub backend_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(8),
            probability: 0.5,
            backend_delay: Duration::from_millis(800),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            http_port: 8080,
            simulation: SimulationConfig::default(),
            recall_delay: Duration::from_millis(400),
            mailbox_poll_interval: Duration::from_secs(60),
            mailbox_max_results: 10,
            stage_timeout: None,
            gmail_token: None,
            auto_connect: vec![ConnectorId::Slack, ConnectorId::Docs],
            log_dir: None,
        }
    }
}

impl ConsoleConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary variable lookup. Unparseable values
    /// fall back to their defaults, as do zero loop periods.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let parsed = |key: &str| non_empty(key).and_then(|v| v.trim().parse::<u64>().ok());

        let simulation = SimulationConfig {
            enabled: non_empty("OPS_CONSOLE_SIM_ENABLED")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(defaults.simulation.enabled),
            interval: parsed("OPS_CONSOLE_SIM_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.simulation.interval),
            probability: non_empty("OPS_CONSOLE_SIM_PROBABILITY")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|p| p.is_finite())
                .map(|p| p.clamp(0.0, 1.0))
                .unwrap_or(defaults.simulation.probability),
            backend_delay: parsed("OPS_CONSOLE_SIM_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.simulation.backend_delay),
        };

        let auto_connect = match non_empty("OPS_CONSOLE_AUTO_CONNECT") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse::<ConnectorId>() {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring auto-connect entry");
                        None
                    }
                })
                .collect(),
            None => defaults.auto_connect,
        };

        Self {
            api_key: non_empty("ANTHROPIC_API_KEY").map(SecretString::from),
            model: non_empty("OPS_CONSOLE_MODEL").unwrap_or(defaults.model),
            http_port: non_empty("OPS_CONSOLE_HTTP_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.http_port),
            simulation,
            recall_delay: parsed("OPS_CONSOLE_RECALL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.recall_delay),
            mailbox_poll_interval: parsed("OPS_CONSOLE_MAILBOX_POLL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.mailbox_poll_interval),
            mailbox_max_results: parsed("OPS_CONSOLE_MAILBOX_MAX_RESULTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.mailbox_max_results),
            stage_timeout: parsed("OPS_CONSOLE_STAGE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            gmail_token: non_empty("GMAIL_ACCESS_TOKEN").map(SecretString::from),
            auto_connect,
            log_dir: non_empty("OPS_CONSOLE_LOG_DIR"),
        }
    }
}
