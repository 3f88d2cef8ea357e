//! Deduplication ledger for remotely sourced signals.
//!
//! Identity is derived from the remote item's own id, so polling the same
//! item twice yields the same local id. The task store is the record of
//! what has been seen; admission is a single check-and-insert.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::connectors::ConnectorId;
use crate::tasks::{Task, TaskStore};

/// Admission totals since startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DedupCounts {
    pub admitted: u64,
    pub duplicates: u64,
}

pub struct DedupLedger {
    store: Arc<TaskStore>,
    admitted: AtomicU64,
    duplicates: AtomicU64,
}

impl DedupLedger {
    pub fn new(store: Arc<TaskStore>) -> Self {
        Self {
            store,
            admitted: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    /// Local task id for a remote item, e.g. `gmail-18c2f0a`.
    pub fn derive_id(source: ConnectorId, remote_id: &str) -> String {
        format!("{}-{}", source.as_str(), remote_id.trim())
    }

    /// Insert `task` unless its id is already present.
    pub async fn admit(&self, task: Task) -> Option<Task> {
        let id = task.id.clone();
        match self.store.insert_if_absent(task).await {
            Some(task) => {
                self.admitted.fetch_add(1, Ordering::Relaxed);
                Some(task)
            }
            None => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %id, "Duplicate remote item skipped");
                None
            }
        }
    }

    pub fn counts(&self) -> DedupCounts {
        DedupCounts {
            admitted: self.admitted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        assert_eq!(DedupLedger::derive_id(ConnectorId::Gmail, "abc"), "gmail-abc");
        assert_eq!(
            DedupLedger::derive_id(ConnectorId::Gmail, " abc "),
            DedupLedger::derive_id(ConnectorId::Gmail, "abc")
        );
    }

    #[tokio::test]
    async fn second_admit_is_rejected() {
        let store = TaskStore::new();
        let ledger = DedupLedger::new(store.clone());
        let id = DedupLedger::derive_id(ConnectorId::Gmail, "m1");
        let task = || Task::with_id(id.clone(), ConnectorId::Gmail, "a@b.c", "hello");

        assert!(!store.contains(&id).await);
        assert!(ledger.admit(task()).await.is_some());
        assert!(store.contains(&id).await);
        assert!(ledger.admit(task()).await.is_none());
        assert_eq!(
            ledger.counts(),
            DedupCounts {
                admitted: 1,
                duplicates: 1
            }
        );
    }

    #[tokio::test]
    async fn concurrent_admits_insert_once() {
        let store = TaskStore::new();
        let ledger = Arc::new(DedupLedger::new(store.clone()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .admit(Task::with_id("gmail-x", ConnectorId::Gmail, "a", "b"))
                    .await
                    .is_some()
            }));
        }
        let mut inserted = 0;
        for h in handles {
            if h.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.len().await, 1);
    }
}
