//! Operation registry: the only shared mutable state in the crate.
//!
//! Records live in an id-keyed arena ordered most-recent-first for display.
//! Every change bumps a revision published through a `watch` channel, so a
//! UI can subscribe instead of polling. The lock is plain `std::sync::Mutex`
//! and is never held across an await.

use crate::types::{
    MutationKind, MutationPayload, Operation, OperationId, OperationStatus, OperationSummary,
    RuleId,
};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

pub struct OperationRegistry {
    records: Mutex<IndexMap<OperationId, Operation>>,
    revision: watch::Sender<u64>,
}

impl OperationRegistry {
    pub fn new() -> Arc<Self> {
        let (revision, _) = watch::channel(0);
        Arc::new(OperationRegistry {
            records: Mutex::new(IndexMap::new()),
            revision,
        })
    }

    /// Insert a new `queued` record at the front of the display order and
    /// return its id. The record is visible to subscribers immediately.
    pub fn create(
        &self,
        kind: MutationKind,
        label: String,
        target_id: Option<RuleId>,
        retry_payload: MutationPayload,
    ) -> OperationId {
        let id = Uuid::new_v4();
        let operation = Operation {
            id,
            kind,
            target_id,
            target_label: label,
            status: OperationStatus::Queued,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_code: None,
            error_message: None,
            recoverable: false,
            expiring: false,
            retry_payload: Some(retry_payload),
        };

        self.records
            .lock()
            .expect("registry lock poisoned")
            .shift_insert(0, id, operation);
        self.bump();
        id
    }

    /// Apply a mutation to the named record. Returns false when the id is
    /// gone — retries and timers may race with dismissal, so a missing id is
    /// a no-op rather than an error.
    pub fn update(&self, id: &OperationId, apply: impl FnOnce(&mut Operation)) -> bool {
        let found = {
            let mut records = self.records.lock().expect("registry lock poisoned");
            match records.get_mut(id) {
                Some(operation) => {
                    apply(operation);
                    true
                }
                None => false,
            }
        };
        if found {
            self.bump();
        }
        found
    }

    pub fn remove(&self, id: &OperationId) -> Option<Operation> {
        let removed = self
            .records
            .lock()
            .expect("registry lock poisoned")
            .shift_remove(id);
        if removed.is_some() {
            self.bump();
        }
        removed
    }

    /// Remove every record matching the predicate, preserving display order
    /// of the rest.
    pub fn remove_where(&self, mut predicate: impl FnMut(&Operation) -> bool) -> Vec<OperationId> {
        let removed: Vec<OperationId> = {
            let mut records = self.records.lock().expect("registry lock poisoned");
            let ids: Vec<OperationId> = records
                .values()
                .filter(|op| predicate(op))
                .map(|op| op.id)
                .collect();
            for id in &ids {
                records.shift_remove(id);
            }
            ids
        };
        if !removed.is_empty() {
            self.bump();
        }
        removed
    }

    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.records
            .lock()
            .expect("registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// All records in display order (most recent first).
    pub fn snapshot(&self) -> Vec<Operation> {
        self.records
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Derived counts per status, recomputed on read.
    pub fn summary(&self) -> OperationSummary {
        let records = self.records.lock().expect("registry lock poisoned");
        let mut summary = OperationSummary::default();
        for operation in records.values() {
            match operation.status {
                OperationStatus::Queued => summary.queued += 1,
                OperationStatus::Running => summary.running += 1,
                OperationStatus::Verifying => summary.verifying += 1,
                OperationStatus::Failed => summary.failed += 1,
                OperationStatus::Succeeded => summary.succeeded += 1,
            }
        }
        summary
    }

    /// For each distinct target, the operation with the greatest start time.
    /// Lets a caller show a per-rule "current status" even when several
    /// operations referenced the same rule over time.
    pub fn latest_by_target(&self) -> HashMap<RuleId, Operation> {
        let records = self.records.lock().expect("registry lock poisoned");
        let mut latest: HashMap<RuleId, Operation> = HashMap::new();
        for operation in records.values() {
            let Some(target) = operation.target_id.clone() else {
                continue;
            };
            let candidate_at = operation.started_at.unwrap_or(operation.created_at);
            match latest.get(&target) {
                Some(current)
                    if current.started_at.unwrap_or(current.created_at) >= candidate_at => {}
                _ => {
                    latest.insert(target, operation.clone());
                }
            }
        }
        latest
    }

    /// Watch receiver over the registry revision. The value itself is just a
    /// counter; receivers re-read whatever views they need on change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
