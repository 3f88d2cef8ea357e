//! Task processing pipeline.
//!
//! A task moves through four stages, in order:
//! 1. Classifier: kind, priority, summary, entities
//! 2. Recall: check against prior history (currently a fixed-latency no-op)
//! 3. Decision: action and output kind
//! 4. Execution: generate the artifact unless the output kind is `NONE`
//!
//! The [`Orchestrator`] owns the single global run slot. The
//! [`AutoTrigger`] rule feeds it from auto-enabled connectors, and every
//! step is written to the [`TraceRecorder`].

pub mod auto_trigger;
pub mod orchestrator;
pub mod trace;

pub use auto_trigger::AutoTrigger;
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunPermit};
pub use trace::{StepKind, TraceEntry, TraceEvent, TraceRecorder, TraceRole};
