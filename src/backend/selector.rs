//! Per-run backend selection.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{BackendMode, LiveBackend, ReasoningBackend, SimulatedBackend};
use crate::error::LlmError;
use crate::llm::{LlmBackend, LlmConfig, LlmProvider, create_provider};

/// Builds an LLM provider from a credential.
pub type ProviderFactory =
    Arc<dyn Fn(SecretString) -> Result<Arc<dyn LlmProvider>, LlmError> + Send + Sync>;

/// A backend fixed for the duration of one run.
#[derive(Clone)]
pub struct SelectedBackend {
    pub backend: Arc<dyn ReasoningBackend>,
    pub mode: BackendMode,
}

/// Chooses between the live and simulated backends.
///
/// A user-supplied credential wins over the environment default; with
/// neither, the simulation backend is used.
pub struct BackendSelector {
    env_credential: Option<SecretString>,
    user_credential: RwLock<Option<SecretString>>,
    factory: ProviderFactory,
    simulated: Arc<SimulatedBackend>,
}

impl BackendSelector {
    pub fn new(
        env_credential: Option<SecretString>,
        model: impl Into<String>,
        simulated: SimulatedBackend,
    ) -> Self {
        let model = model.into();
        let factory: ProviderFactory = Arc::new(move |api_key| {
            create_provider(&LlmConfig {
                backend: LlmBackend::Anthropic,
                api_key,
                model: model.clone(),
            })
        });
        Self::with_factory(env_credential, simulated, factory)
    }

    /// Use a custom provider factory (tests, alternative providers).
    pub fn with_factory(
        env_credential: Option<SecretString>,
        simulated: SimulatedBackend,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            env_credential: env_credential.filter(|k| !k.expose_secret().trim().is_empty()),
            user_credential: RwLock::new(None),
            factory,
            simulated: Arc::new(simulated),
        }
    }

    /// Set or clear the user-supplied credential. Blank clears it.
    pub async fn set_user_credential(&self, credential: Option<SecretString>) {
        let credential = credential.filter(|k| !k.expose_secret().trim().is_empty());
        let present = credential.is_some();
        *self.user_credential.write().await = credential;
        info!(present, "User credential updated");
    }

    async fn credential(&self) -> Option<SecretString> {
        if let Some(ref key) = *self.user_credential.read().await {
            return Some(key.clone());
        }
        self.env_credential.clone()
    }

    /// Mode the next run would use.
    pub async fn current_mode(&self) -> BackendMode {
        if self.credential().await.is_some() {
            BackendMode::Live
        } else {
            BackendMode::Simulated
        }
    }

    /// Pick the backend for one run.
    ///
    /// If the live provider cannot be constructed the run is simulated.
    pub async fn select(&self) -> SelectedBackend {
        if let Some(key) = self.credential().await {
            match (self.factory)(key) {
                Ok(llm) => {
                    info!(mode = %BackendMode::Live, model = llm.model_name(), "Backend selected");
                    return SelectedBackend {
                        backend: Arc::new(LiveBackend::new(llm)),
                        mode: BackendMode::Live,
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Live provider unavailable, falling back to simulation");
                }
            }
        }

        info!(mode = %BackendMode::Simulated, "Backend selected");
        SelectedBackend {
            backend: self.simulated.clone(),
            mode: BackendMode::Simulated,
        }
    }
}
