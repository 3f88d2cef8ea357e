//! Tasks: inbound signals and their derived results.
//!
//! `model` holds the data types and lifecycle rules, `store` the
//! authoritative in-memory collection with change broadcast.

pub mod model;
pub mod store;

pub use model::{
    Classification, Decision, GeneratedOutput, OutputKind, Priority, Task, TaskKind, TaskStatus,
};
pub use store::{TaskEvent, TaskStore};
