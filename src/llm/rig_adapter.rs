//! Bridge from rig's `CompletionModel` to [`LlmProvider`].

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionError, CompletionModel, Message};

use super::provider::{CompletionRequest, CompletionResponse, LlmProvider, Role};
use crate::error::LlmError;

/// Anthropic rejects requests without a token limit.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Wraps any rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    model_name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
        }
    }
}

/// System messages joined into one preamble, the rest as rig messages.
fn split_messages(request: &CompletionRequest) -> (Option<String>, Vec<Message>) {
    let system: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let history = request
        .messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(Message::user(m.content.clone())),
            Role::Assistant => Some(Message::assistant(m.content.clone())),
        })
        .collect();

    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    (preamble, history)
}

/// Map a rig error onto our taxonomy. rig reports provider HTTP failures
/// as text, so status codes and error types are matched in the message.
fn map_error(provider: &str, error: CompletionError) -> LlmError {
    let reason = error.to_string();
    let lower = reason.to_lowercase();
    let provider = provider.to_string();

    if ["401", "403", "authentication_error", "permission_error", "invalid x-api-key"]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        return LlmError::AuthFailed { provider };
    }
    if lower.contains("429") || lower.contains("rate_limit") {
        return LlmError::RateLimited { provider };
    }
    match error {
        CompletionError::JsonError(_) | CompletionError::ResponseError(_) => {
            LlmError::InvalidResponse { provider, reason }
        }
        _ => LlmError::RequestFailed { provider, reason },
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, mut history) = split_messages(&request);
        let prompt = history.pop().ok_or_else(|| LlmError::InvalidResponse {
            provider: self.model_name.clone(),
            reason: "request has no user message".to_string(),
        })?;

        let mut builder = self
            .model
            .completion_request(prompt)
            .messages(history)
            .max_tokens(u64::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)));
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(&self.model_name, e))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.model_name.clone(),
                reason: "empty completion".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
        })
    }
}
