//! Ops Console: an operations automation pipeline.
//!
//! Signals arrive from connectors (manual dispatch, simulated traffic, a
//! polled mailbox), become tasks, and are processed one at a time through
//! classification, recall, decision and execution against a live or
//! simulated reasoning backend.

pub mod api;
pub mod backend;
pub mod config;
pub mod connectors;
pub mod console;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod schedule;
pub mod tasks;
