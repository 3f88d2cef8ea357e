//! Simulation backend: deterministic, time-delayed canned responses.
//!
//! Keyword rules stand in for the model. Each stage sleeps for a fixed delay
//! first so the console behaves like a slow remote service, then returns a
//! value shaped exactly like the live backend's.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::{BackendMode, ClassifyInput, DecideInput, ExecuteInput, ReasoningBackend};
use crate::error::BackendError;
use crate::tasks::{Classification, Decision, OutputKind, Priority, TaskKind};

/// Longest summary the simulator produces.
const MAX_SUMMARY_CHARS: usize = 120;

/// Words that never count as entities even when capitalized.
const ENTITY_STOPWORDS: &[&str] = &[
    "We", "I", "The", "A", "An", "Can", "Could", "Please", "Hi", "Hey", "Is", "Are", "Do",
    "Does", "FYI", "This", "That", "It", "Our", "Any", "What", "When", "How", "Why", "PRD",
];

pub struct SimulatedBackend {
    delay: Duration,
    question: Regex,
    action: Regex,
    high: Regex,
    low: Regex,
    prd: Regex,
    email: Regex,
    summary: Regex,
    entity: Regex,
}

impl SimulatedBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            question: Regex::new(r"\?").unwrap(),
            action: Regex::new(
                r"(?i)\b(need|needs|please|can you|could you|prd|draft|write|prepare|review|fix|update|todo)\b",
            )
            .unwrap(),
            high: Regex::new(r"(?i)\b(urgent|asap|priority high|high priority|critical|blocker)\b")
                .unwrap(),
            low: Regex::new(r"(?i)\b(low priority|priority low|whenever|no rush)\b").unwrap(),
            prd: Regex::new(r"(?i)\b(prd|requirements?|spec)\b").unwrap(),
            email: Regex::new(r"(?i)\b(email|reply|respond|get back)\b").unwrap(),
            summary: Regex::new(r"(?i)(summar|digest|recap|notes|minutes)").unwrap(),
            entity: Regex::new(r"\b[A-Z][A-Za-z0-9]*(?:\s+[A-Z0-9][A-Za-z0-9]*)*\b").unwrap(),
        }
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    fn kind_for(&self, content: &str) -> TaskKind {
        if self.action.is_match(content) {
            TaskKind::ActionItem
        } else if self.question.is_match(content) {
            TaskKind::Question
        } else if content.trim().is_empty() {
            TaskKind::Unknown
        } else {
            TaskKind::Informational
        }
    }

    fn priority_for(&self, content: &str, hint: Option<Priority>) -> Priority {
        if self.high.is_match(content) {
            Priority::High
        } else if self.low.is_match(content) {
            Priority::Low
        } else {
            hint.unwrap_or(Priority::Medium)
        }
    }

    fn entities_in(&self, content: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in self.entity.find_iter(content) {
            let words: Vec<&str> = m
                .as_str()
                .split_whitespace()
                .skip_while(|w| ENTITY_STOPWORDS.contains(w))
                .collect();
            if words.is_empty() {
                continue;
            }
            let name = words.join(" ");
            if !out.contains(&name) {
                out.push(name);
            }
        }
        out
    }
}

/// First sentence of `content`, bounded in length.
fn first_sentence(content: &str) -> String {
    let trimmed = content.trim();
    let end = trimmed
        .find(['.', '!', '?', '\n'])
        .map(|i| i + 1)
        .unwrap_or(trimmed.len());
    let sentence = trimmed[..end].trim();
    if sentence.chars().count() <= MAX_SUMMARY_CHARS {
        sentence.to_string()
    } else {
        let cut: String = sentence.chars().take(MAX_SUMMARY_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

#[async_trait]
impl ReasoningBackend for SimulatedBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Simulated
    }

    async fn classify(&self, input: &ClassifyInput) -> Result<Classification, BackendError> {
        self.pause().await;
        let text = match input.subject {
            Some(ref subject) => format!("{subject}\n{}", input.raw_content),
            None => input.raw_content.clone(),
        };
        let kind = self.kind_for(&text);
        let priority = self.priority_for(&text, input.priority_hint);
        let summary = format!("{} (from {})", first_sentence(&input.raw_content), input.sender);
        debug!(kind = %kind, priority = %priority, "Simulated classification");

        Ok(Classification {
            kind,
            priority,
            summary,
            entities: self.entities_in(&input.raw_content),
        })
    }

    async fn decide(&self, input: &DecideInput) -> Result<Decision, BackendError> {
        self.pause().await;
        let text = &input.raw_content;
        let (output_kind, reasoning) = if self.prd.is_match(text) {
            (OutputKind::Prd, "signal asks for requirements")
        } else if self.email.is_match(text) {
            (OutputKind::Email, "sender expects a reply")
        } else if self.summary.is_match(text) {
            (OutputKind::Summary, "content is best shared as a digest")
        } else {
            match input.kind {
                TaskKind::Question => (OutputKind::Email, "a question deserves an answer"),
                TaskKind::ActionItem => (OutputKind::Summary, "action item tracked as a digest"),
                TaskKind::Informational | TaskKind::Unknown => {
                    (OutputKind::None, "nothing to produce")
                }
            }
        };

        let action = match output_kind {
            OutputKind::Prd => "Draft a product requirements document",
            OutputKind::Email => "Draft a reply email",
            OutputKind::Summary => "Write a summary digest",
            OutputKind::None => "Acknowledge and archive",
        };

        Ok(Decision {
            action: action.to_string(),
            reasoning: format!("Simulated decision: {reasoning} ({} priority)", input.priority),
            output_kind,
        })
    }

    async fn execute(&self, input: &ExecuteInput) -> Result<String, BackendError> {
        self.pause().await;
        let body = match input.output_kind {
            OutputKind::Prd => format!(
                "# Simulated PRD\n\n## Overview\n{summary}\n\n## Problem\n{raw}\n\n\
                 ## Goals\n- Address the request from {sender}\n\n\
                 ## Requirements\n1. Capture the scope described above\n2. Confirm acceptance criteria with {sender}\n\n\
                 ## Open Questions\n- Timeline and owners",
                summary = input.summary,
                raw = input.raw_content,
                sender = input.sender,
            ),
            OutputKind::Email => format!(
                "Subject: Re: {summary}\n\nHi {sender},\n\nThanks for reaching out. \
                 I've reviewed your note and will follow up shortly.\n\nBest regards\n\n\
                 (Simulated email draft)",
                summary = input.summary,
                sender = input.sender,
            ),
            OutputKind::Summary | OutputKind::None => format!(
                "Simulated summary\n\n- {summary}\n- Source: {sender}\n- Next step: review and assign an owner",
                summary = input.summary,
                sender = input.sender,
            ),
        };
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> SimulatedBackend {
        SimulatedBackend::new(Duration::ZERO)
    }

    fn classify_input(content: &str) -> ClassifyInput {
        ClassifyInput {
            raw_content: content.into(),
            sender: "alice".into(),
            subject: None,
            priority_hint: None,
        }
    }

    async fn run(content: &str) -> (Classification, Decision, String) {
        let backend = backend();
        let c = backend.classify(&classify_input(content)).await.unwrap();
        let decide = DecideInput {
            summary: c.summary.clone(),
            kind: c.kind,
            priority: c.priority,
            sender: "alice".into(),
            raw_content: content.into(),
        };
        let d = backend.decide(&decide).await.unwrap();
        let out = backend
            .execute(&ExecuteInput {
                output_kind: d.output_kind,
                raw_content: content.into(),
                summary: c.summary.clone(),
                sender: "alice".into(),
            })
            .await
            .unwrap();
        (c, d, out)
    }

    #[tokio::test]
    async fn prd_request_scenario() {
        let (c, d, out) = run("We need a PRD for feature X, priority high").await;
        assert_eq!(c.kind, TaskKind::ActionItem);
        assert_eq!(c.priority, Priority::High);
        assert_eq!(d.output_kind, OutputKind::Prd);
        assert!(out.contains("Simulated PRD"));
    }

    #[tokio::test]
    async fn question_gets_email_reply() {
        let (c, d, out) = run("Is the Atlas launch still on for Friday?").await;
        assert_eq!(c.kind, TaskKind::Question);
        assert_eq!(d.output_kind, OutputKind::Email);
        assert!(out.contains("Simulated email draft"));
        assert!(c.entities.contains(&"Atlas".to_string()));
    }

    #[tokio::test]
    async fn informational_needs_no_artifact() {
        let (c, d, _) = run("FYI the office is closed on Monday.").await;
        assert_eq!(c.kind, TaskKind::Informational);
        assert_eq!(d.output_kind, OutputKind::None);
    }

    #[tokio::test]
    async fn meeting_notes_become_summary() {
        let (_, d, out) = run("Attached are the meeting notes from standup.").await;
        assert_eq!(d.output_kind, OutputKind::Summary);
        assert!(out.contains("Simulated summary"));
    }

    #[tokio::test]
    async fn priority_hint_applies_without_keywords() {
        let backend = backend();
        let mut input = classify_input("Quarterly numbers are in.");
        input.priority_hint = Some(Priority::Low);
        let c = backend.classify(&input).await.unwrap();
        assert_eq!(c.priority, Priority::Low);

        input.raw_content = "Quarterly numbers are in, urgent.".into();
        let c = backend.classify(&input).await.unwrap();
        assert_eq!(c.priority, Priority::High);
    }

    #[tokio::test]
    async fn responses_are_deterministic() {
        let a = run("Please review the Orion rollout plan").await;
        let b = run("Please review the Orion rollout plan").await;
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
        assert_eq!(a.2, b.2);
    }

    #[tokio::test]
    async fn each_call_waits_for_delay() {
        let backend = SimulatedBackend::new(Duration::from_millis(30));
        let started = std::time::Instant::now();
        backend.classify(&classify_input("hello")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn summary_is_first_sentence_and_bounded() {
        assert_eq!(first_sentence("Ship it. Then relax."), "Ship it.");
        let long = "x".repeat(500);
        let s = first_sentence(&long);
        assert_eq!(s.chars().count(), MAX_SUMMARY_CHARS);
        assert!(s.ends_with("..."));
    }
}
