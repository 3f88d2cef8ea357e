//! Live backend: stage prompts sent to an LLM provider, with JSON replies
//! validated against the stage contracts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{BackendMode, ClassifyInput, DecideInput, ExecuteInput, ReasoningBackend};
use crate::error::BackendError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::tasks::{Classification, Decision, OutputKind, Priority, TaskKind};

/// Max tokens for the classify/decide calls (runs on every task).
const STRUCTURED_MAX_TOKENS: u32 = 512;

/// Max tokens for artifact generation.
const GENERATION_MAX_TOKENS: u32 = 2048;

/// Temperature for structured stages (deterministic-ish).
const STRUCTURED_TEMPERATURE: f32 = 0.1;

const GENERATION_TEMPERATURE: f32 = 0.4;

/// Characters of raw content included in prompts.
const CONTENT_PREVIEW_CHARS: usize = 2000;

pub struct LiveBackend {
    llm: Arc<dyn LlmProvider>,
}

impl LiveBackend {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn call(
        &self,
        system: String,
        user: String,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, BackendError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
        ])
        .with_temperature(temperature)
        .with_max_tokens(max_tokens);

        let response = self.llm.complete(request).await?;
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Live backend call complete"
        );
        Ok(response.content)
    }
}

#[async_trait]
impl ReasoningBackend for LiveBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Live
    }

    async fn classify(&self, input: &ClassifyInput) -> Result<Classification, BackendError> {
        let raw = self
            .call(
                build_classify_system_prompt(),
                build_classify_user_prompt(input),
                STRUCTURED_TEMPERATURE,
                STRUCTURED_MAX_TOKENS,
            )
            .await?;
        parse_classification(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Failed to parse classification");
            BackendError::InvalidResponse(e)
        })
    }

    async fn decide(&self, input: &DecideInput) -> Result<Decision, BackendError> {
        let raw = self
            .call(
                build_decide_system_prompt(),
                build_decide_user_prompt(input),
                STRUCTURED_TEMPERATURE,
                STRUCTURED_MAX_TOKENS,
            )
            .await?;
        parse_decision(&raw).map_err(|e| {
            warn!(raw_response = %raw, error = %e, "Failed to parse decision");
            BackendError::InvalidResponse(e)
        })
    }

    async fn execute(&self, input: &ExecuteInput) -> Result<String, BackendError> {
        let text = self
            .call(
                build_execute_system_prompt(input.output_kind),
                build_execute_user_prompt(input),
                GENERATION_TEMPERATURE,
                GENERATION_MAX_TOKENS,
            )
            .await?;
        Ok(text.trim().to_string())
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn preview(content: &str) -> String {
    content.chars().take(CONTENT_PREVIEW_CHARS).collect()
}

fn build_classify_system_prompt() -> String {
    "You are the intake classifier of an operations console. Classify the incoming signal.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"type\": \"ACTION_ITEM\" | \"QUESTION\" | \"INFORMATIONAL\" | \"UNKNOWN\", \
     \"priority\": \"HIGH\" | \"MEDIUM\" | \"LOW\", \
     \"summary\": \"...\", \"entities\": [\"...\"]}\n\n\
     Rules:\n\
     - summary is exactly one sentence\n\
     - entities are names of people, products, features, or systems mentioned\n\
     - HIGH only for explicit urgency or deadlines"
        .to_string()
}

fn build_classify_user_prompt(input: &ClassifyInput) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(&format!("From: {}\n", input.sender));
    if let Some(ref subject) = input.subject {
        prompt.push_str(&format!("Subject: {}\n", subject));
    }
    if let Some(hint) = input.priority_hint {
        prompt.push_str(&format!("Suggested priority: {}\n", hint));
    }
    prompt.push_str(&format!("\nSignal:\n{}", preview(&input.raw_content)));
    prompt
}

fn build_decide_system_prompt() -> String {
    "You are the decision engine of an operations console. Given a classified signal, \
     choose the next action and the artifact to produce for human review.\n\n\
     Output types:\n\
     - \"PRD\": a product requirements document is needed\n\
     - \"EMAIL\": a reply should be drafted to the sender\n\
     - \"SUMMARY\": a short digest for the team\n\
     - \"NONE\": no artifact; acknowledge only\n\n\
     Respond with ONLY a JSON object:\n\
     {\"action\": \"...\", \"reasoning\": \"...\", \"outputType\": \"PRD\" | \"EMAIL\" | \"SUMMARY\" | \"NONE\"}"
        .to_string()
}

fn build_decide_user_prompt(input: &DecideInput) -> String {
    format!(
        "Type: {}\nPriority: {}\nFrom: {}\nSummary: {}\n\nSignal:\n{}",
        input.kind,
        input.priority,
        input.sender,
        input.summary,
        preview(&input.raw_content)
    )
}

fn build_execute_system_prompt(kind: OutputKind) -> String {
    match kind {
        OutputKind::Prd => "You are a product manager. Write a concise product requirements \
             document in Markdown with the sections: Overview, Problem, Goals, Requirements, \
             Open Questions. Use numbered requirements."
            .to_string(),
        OutputKind::Email => "You are drafting an email reply on behalf of the user. Write a \
             short, professional reply addressed to the sender. Start with a Subject line. \
             Do not invent commitments."
            .to_string(),
        OutputKind::Summary | OutputKind::None => "Summarize the signal as a bullet-point \
             digest of at most five bullets, ending with a suggested next step."
            .to_string(),
    }
}

fn build_execute_user_prompt(input: &ExecuteInput) -> String {
    format!(
        "Artifact: {}\nFrom: {}\nSummary: {}\n\nOriginal signal:\n{}",
        input.output_kind,
        input.sender,
        input.summary,
        preview(&input.raw_content)
    )
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClassificationResponse {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    entities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DecisionResponse {
    action: String,
    #[serde(default)]
    reasoning: String,
    #[serde(rename = "outputType", alias = "output_type")]
    output_type: String,
}

fn normalize(label: &str) -> String {
    label.trim().to_uppercase().replace([' ', '-'], "_")
}

fn parse_kind(label: &str) -> Result<TaskKind, String> {
    match normalize(label).as_str() {
        "ACTION_ITEM" | "ACTION" => Ok(TaskKind::ActionItem),
        "QUESTION" => Ok(TaskKind::Question),
        "INFORMATIONAL" | "INFO" => Ok(TaskKind::Informational),
        "UNKNOWN" => Ok(TaskKind::Unknown),
        other => Err(format!("unknown task type: '{other}'")),
    }
}

fn parse_priority(label: &str) -> Result<Priority, String> {
    match normalize(label).as_str() {
        "HIGH" | "URGENT" => Ok(Priority::High),
        "MEDIUM" | "NORMAL" | "" => Ok(Priority::Medium),
        "LOW" => Ok(Priority::Low),
        other => Err(format!("unknown priority: '{other}'")),
    }
}

fn parse_output_kind(label: &str) -> Result<OutputKind, String> {
    match normalize(label).as_str() {
        "EMAIL" => Ok(OutputKind::Email),
        "PRD" => Ok(OutputKind::Prd),
        "SUMMARY" => Ok(OutputKind::Summary),
        "NONE" => Ok(OutputKind::None),
        other => Err(format!("unknown output type: '{other}'")),
    }
}

/// Parse the classifier reply into a `Classification`.
fn parse_classification(raw: &str) -> Result<Classification, String> {
    let json_str = extract_json_object(raw);
    let response: ClassificationResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let summary = response.summary.trim().to_string();
    if summary.is_empty() {
        return Err("classification requires a summary".into());
    }

    Ok(Classification {
        kind: parse_kind(&response.kind)?,
        priority: parse_priority(&response.priority)?,
        summary,
        entities: response
            .entities
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect(),
    })
}

/// Parse the decision reply into a `Decision`.
fn parse_decision(raw: &str) -> Result<Decision, String> {
    let json_str = extract_json_object(raw);
    let response: DecisionResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let action = response.action.trim().to_string();
    if action.is_empty() {
        return Err("decision requires an action".into());
    }

    Ok(Decision {
        action,
        reasoning: response.reasoning.trim().to_string(),
        output_kind: parse_output_kind(&response.output_type)?,
    })
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_classification_response() {
        let raw = r#"{"type": "ACTION_ITEM", "priority": "HIGH", "summary": "Needs a PRD for feature X.", "entities": ["Feature X", " "]}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.kind, TaskKind::ActionItem);
        assert_eq!(c.priority, Priority::High);
        assert_eq!(c.entities, vec!["Feature X"]);
    }

    #[test]
    fn parse_classification_accepts_loose_labels() {
        let raw = r#"{"type": "action item", "priority": "low", "summary": "x"}"#;
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.kind, TaskKind::ActionItem);
        assert_eq!(c.priority, Priority::Low);
        assert!(c.entities.is_empty());
    }

    #[test]
    fn parse_classification_rejects_unknown_type() {
        let raw = r#"{"type": "ESCALATION", "priority": "HIGH", "summary": "x"}"#;
        assert!(parse_classification(raw).is_err());
    }

    #[test]
    fn parse_classification_requires_summary() {
        let raw = r#"{"type": "QUESTION", "priority": "LOW", "summary": "  "}"#;
        assert!(parse_classification(raw).is_err());
    }

    #[test]
    fn parse_decision_response_in_markdown() {
        let raw = "Here you go:\n```json\n{\"action\": \"Write PRD\", \"reasoning\": \"asked for one\", \"outputType\": \"PRD\"}\n```";
        let d = parse_decision(raw).unwrap();
        assert_eq!(d.action, "Write PRD");
        assert_eq!(d.output_kind, OutputKind::Prd);
    }

    #[test]
    fn parse_decision_snake_case_alias() {
        let raw = r#"{"action": "Acknowledge", "output_type": "none"}"#;
        let d = parse_decision(raw).unwrap();
        assert_eq!(d.output_kind, OutputKind::None);
        assert!(d.reasoning.is_empty());
    }

    #[test]
    fn parse_decision_rejects_garbage() {
        assert!(parse_decision("I think you should write a PRD").is_err());
        assert!(parse_decision(r#"{"action": "x", "outputType": "SLIDES"}"#).is_err());
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "My analysis: {\"type\": \"QUESTION\"} done.";
        let result = extract_json_object(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    #[test]
    fn prompts_carry_inputs() {
        let prompt = build_classify_user_prompt(&ClassifyInput {
            raw_content: "Can we ship Friday?".into(),
            sender: "alice@example.com".into(),
            subject: Some("Release".into()),
            priority_hint: Some(Priority::High),
        });
        assert!(prompt.contains("alice@example.com"));
        assert!(prompt.contains("Subject: Release"));
        assert!(prompt.contains("Suggested priority: HIGH"));
        assert!(prompt.contains("ship Friday"));

        assert!(build_execute_system_prompt(OutputKind::Prd).contains("Requirements"));
        assert!(build_execute_system_prompt(OutputKind::Email).contains("reply"));
        assert!(build_execute_system_prompt(OutputKind::Summary).contains("bullet"));
    }

    // ── Backend with mock LLM ───────────────────────────────────────

    struct MockLlm {
        responses: Mutex<Vec<Result<String, LlmError>>>,
    }

    impl MockLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            let next = self.responses.lock().unwrap().remove(0);
            next.map(|content| CompletionResponse {
                content,
                input_tokens: 10,
                output_tokens: 10,
            })
        }
    }

    fn classify_input() -> ClassifyInput {
        ClassifyInput {
            raw_content: "We need a PRD for feature X".into(),
            sender: "alice".into(),
            subject: None,
            priority_hint: None,
        }
    }

    #[tokio::test]
    async fn live_classify_parses_reply() {
        let backend = LiveBackend::new(MockLlm::new(vec![Ok(
            r#"{"type": "ACTION_ITEM", "priority": "HIGH", "summary": "PRD request.", "entities": []}"#.into(),
        )]));
        let c = backend.classify(&classify_input()).await.unwrap();
        assert_eq!(c.kind, TaskKind::ActionItem);
        assert_eq!(backend.mode(), BackendMode::Live);
    }

    #[tokio::test]
    async fn live_classify_malformed_is_recoverable() {
        let backend = LiveBackend::new(MockLlm::new(vec![Ok("not json".into())]));
        let err = backend.classify(&classify_input()).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn live_auth_failure_is_fatal() {
        let backend = LiveBackend::new(MockLlm::new(vec![Err(LlmError::AuthFailed {
            provider: "mock".into(),
        })]));
        let err = backend.classify(&classify_input()).await.unwrap_err();
        assert!(!err.is_recoverable());
    }

    #[tokio::test]
    async fn live_execute_returns_trimmed_text() {
        let backend = LiveBackend::new(MockLlm::new(vec![Ok("\n# PRD\n\nBody\n".into())]));
        let text = backend
            .execute(&ExecuteInput {
                output_kind: OutputKind::Prd,
                raw_content: "x".into(),
                summary: "y".into(),
                sender: "z".into(),
            })
            .await
            .unwrap();
        assert_eq!(text, "# PRD\n\nBody");
    }
}
