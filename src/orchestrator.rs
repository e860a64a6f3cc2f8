//! Mutation executor and caller-facing surface.
//!
//! The orchestrator owns the operation registry, the auto-clear scheduler
//! and the transport. [`MutationOrchestrator::request_mutation`] records a
//! `queued` operation and returns its id immediately; a spawned task then
//! drives the record through its state machine:
//!
//! `queued → running → {verifying → {succeeded | failed}} | succeeded | failed`
//!
//! `failed`/`succeeded` are terminal, re-enterable into `running` only via
//! [`MutationOrchestrator::retry`], which reuses the record and accumulates
//! `attempts`. An ambiguous failure (timeout, network, 5xx, configured
//! codes) is resolved by re-reading the authoritative collection and
//! checking whether the mutation's effect is observably present.

use crate::autoclear::AutoClearScheduler;
use crate::classify::{classify, ClassifiedError};
use crate::compare::payload_reflected;
use crate::config::OrchestratorConfig;
use crate::error::{ProxyDeckError, Result};
use crate::lookup::RuleLookup;
use crate::registry::OperationRegistry;
use crate::transport::{RuleTransport, TransportError};
use crate::types::{
    MutationPayload, Operation, OperationId, OperationStatus, OperationSummary, RuleId,
};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Notify};

/// Per-request options. `label` overrides the display label derived from
/// the payload.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub label: Option<String>,
}

/// How one execution attempt resolved. Every spawned attempt ends in
/// exactly one of these; nothing escapes the task as an unhandled error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// Ambiguous failure resolved as applied by verification.
    Recovered,
    Failed,
}

enum Verified {
    Applied { discovered: Option<RuleId> },
    NotApplied,
}

pub struct MutationOrchestrator<T: RuleTransport> {
    transport: Arc<T>,
    lookup: RuleLookup<T>,
    registry: Arc<OperationRegistry>,
    autoclear: AutoClearScheduler,
    config: OrchestratorConfig,
    rules_changed: Notify,
}

impl<T: RuleTransport> MutationOrchestrator<T> {
    pub fn new(transport: Arc<T>, config: OrchestratorConfig) -> Arc<Self> {
        let registry = OperationRegistry::new();
        let autoclear = AutoClearScheduler::new(
            Arc::clone(&registry),
            config.autoclear_dwell,
            config.autoclear_fade_lead,
        );
        Arc::new(MutationOrchestrator {
            lookup: RuleLookup::new(Arc::clone(&transport)),
            transport,
            registry,
            autoclear,
            config,
            rules_changed: Notify::new(),
        })
    }

    /// Record a mutation and kick off its execution. Returns the operation
    /// id immediately; callers observe progress through [`subscribe`] or
    /// [`operations`].
    ///
    /// [`subscribe`]: MutationOrchestrator::subscribe
    /// [`operations`]: MutationOrchestrator::operations
    pub fn request_mutation(
        self: &Arc<Self>,
        payload: MutationPayload,
        options: RequestOptions,
    ) -> OperationId {
        let label = options.label.unwrap_or_else(|| derive_label(&payload));
        let id = self.registry.create(
            payload.kind(),
            label,
            payload.target_id().cloned(),
            payload,
        );
        tracing::debug!("[OPS {}] queued", id);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(id).await;
        });
        id
    }

    /// Re-run a terminal operation with its stored payload. The record is
    /// reused: `attempts` accumulates and the id stays stable.
    pub fn retry(self: &Arc<Self>, id: OperationId) -> Result<()> {
        let operation = self
            .registry
            .get(&id)
            .ok_or(ProxyDeckError::OperationNotFound(id))?;
        if !operation.status.is_terminal() {
            return Err(ProxyDeckError::OperationInProgress(id));
        }
        if operation.retry_payload.is_none() {
            return Err(ProxyDeckError::NotRetryable(id));
        }

        tracing::info!("[OPS {}] retry requested (attempt {})", id, operation.attempts + 1);
        self.autoclear.cancel(&id);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(id).await;
        });
        Ok(())
    }

    /// Drop an operation from the registry. Does not abort an in-flight
    /// transport call; a still-running attempt finds its record gone and
    /// its registry writes become no-ops.
    pub fn dismiss(&self, id: OperationId) -> bool {
        self.autoclear.cancel(&id);
        self.registry.remove(&id).is_some()
    }

    pub fn clear_all_succeeded(&self) {
        let removed = self
            .registry
            .remove_where(|op| op.status == OperationStatus::Succeeded);
        for id in &removed {
            self.autoclear.cancel(id);
        }
        tracing::debug!("[OPS] cleared {} succeeded operations", removed.len());
    }

    pub fn set_auto_clear_paused(&self, paused: bool) {
        self.autoclear.set_paused(paused);
    }

    /// All operations, most recent first.
    pub fn operations(&self) -> Vec<Operation> {
        self.registry.snapshot()
    }

    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.registry.get(id)
    }

    pub fn summary(&self) -> OperationSummary {
        self.registry.summary()
    }

    pub fn latest_by_target(&self) -> HashMap<RuleId, Operation> {
        self.registry.latest_by_target()
    }

    /// Revision watch over the operation list; bumps on every change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.registry.subscribe()
    }

    /// Signalled after every successful mutation so the caller can silently
    /// re-fetch the authoritative collection.
    pub fn rules_changed(&self) -> &Notify {
        &self.rules_changed
    }

    /// Drive one attempt through the state machine. Verification assumes
    /// the portal's list endpoint is read-your-writes consistent; under
    /// server-side lag a single verification read can false-negative, which
    /// errs toward a retryable failure rather than a fabricated success.
    async fn run(self: Arc<Self>, id: OperationId) -> ExecutionOutcome {
        let Some(payload) = self.registry.get(&id).and_then(|op| op.retry_payload) else {
            // Dismissed (or created without a payload) before the task ran.
            tracing::warn!("[OPS {}] no record or payload at execution time", id);
            return ExecutionOutcome::Failed;
        };

        self.autoclear.cancel(&id);
        self.registry.update(&id, |op| {
            op.status = OperationStatus::Running;
            op.attempts += 1;
            op.error_code = None;
            op.error_message = None;
            op.finished_at = None;
            op.recoverable = false;
            op.expiring = false;
            if op.started_at.is_none() {
                op.started_at = Some(Utc::now());
            }
        });

        // Pre-flight for creates: remember whether some rule already
        // satisfied the natural key, so verification cannot mistake a prior
        // duplicate for this attempt's success. Without the pre-state the
        // whole operation is unsafe to continue.
        let pre_existing: Option<RuleId> = match payload.natural_key() {
            Some(key) => match self.lookup.find_by_natural_key(&key).await {
                Ok(found) => found.map(|rule| rule.uuid),
                Err(err) => {
                    tracing::warn!("[OPS {}] pre-flight lookup failed: {}", id, err);
                    self.finish_failure(&id, &classify(&err));
                    return ExecutionOutcome::Failed;
                }
            },
            None => None,
        };

        match self.execute(&payload).await {
            Ok(()) => {
                tracing::info!("[OPS {}] applied", id);
                self.finish_success(&id, None);
                ExecutionOutcome::Succeeded
            }
            Err(err) => {
                let classified = classify(&err);
                if !classified.is_ambiguous(&self.config.ambiguous_codes) {
                    tracing::info!("[OPS {}] definite failure: {}", id, classified.message);
                    self.finish_failure(&id, &classified);
                    return ExecutionOutcome::Failed;
                }

                tracing::info!("[OPS {}] ambiguous failure, verifying: {}", id, classified.message);
                self.registry.update(&id, |op| {
                    op.status = OperationStatus::Verifying;
                    op.error_code = classified.code;
                    op.error_message = Some("verifying current state...".to_string());
                });

                match self.verify_applied(&payload, pre_existing.as_deref()).await {
                    Ok(Verified::Applied { discovered }) => {
                        tracing::info!("[OPS {}] recovered: mutation was applied", id);
                        self.finish_success(&id, discovered);
                        ExecutionOutcome::Recovered
                    }
                    Ok(Verified::NotApplied) => {
                        self.finish_failure(&id, &classified);
                        ExecutionOutcome::Failed
                    }
                    Err(verify_err) => {
                        // Surface the original mutation error; a broken
                        // verification read must not mask the root cause.
                        tracing::warn!("[OPS {}] verification lookup failed: {}", id, verify_err);
                        self.finish_failure(&id, &classified);
                        ExecutionOutcome::Failed
                    }
                }
            }
        }
    }

    async fn execute(&self, payload: &MutationPayload) -> std::result::Result<(), TransportError> {
        match payload {
            MutationPayload::Create { rule } => self.transport.create(rule).await,
            MutationPayload::Update { id, patch } => self.transport.update(id, patch).await,
            MutationPayload::Delete { id } => self.transport.delete(id).await,
            MutationPayload::BulkDelete { ids } => self.transport.bulk_delete(ids).await,
        }
    }

    /// Is the mutation's effect observably present in a fresh fetch?
    async fn verify_applied(
        &self,
        payload: &MutationPayload,
        pre_existing: Option<&str>,
    ) -> std::result::Result<Verified, TransportError> {
        match payload {
            MutationPayload::Create { rule } => {
                let Some(key) = payload.natural_key() else {
                    return Ok(Verified::NotApplied);
                };
                let Some(found) = self.lookup.find_by_natural_key(&key).await? else {
                    return Ok(Verified::NotApplied);
                };
                // A rule that already satisfied the key before this attempt
                // is not evidence that this attempt succeeded.
                if pre_existing == Some(found.uuid.as_str()) {
                    return Ok(Verified::NotApplied);
                }
                if payload_reflected(rule, &found) {
                    Ok(Verified::Applied {
                        discovered: Some(found.uuid),
                    })
                } else {
                    Ok(Verified::NotApplied)
                }
            }
            MutationPayload::Update { id, patch } => match self.lookup.find_by_id(id).await? {
                Some(rule) if payload_reflected(patch, &rule) => {
                    Ok(Verified::Applied { discovered: None })
                }
                _ => Ok(Verified::NotApplied),
            },
            MutationPayload::Delete { id } => {
                let rules = self.lookup.all().await?;
                if rules.iter().any(|rule| &rule.uuid == id) {
                    Ok(Verified::NotApplied)
                } else {
                    Ok(Verified::Applied { discovered: None })
                }
            }
            MutationPayload::BulkDelete { ids } => {
                let rules = self.lookup.all().await?;
                if rules.iter().any(|rule| ids.contains(&rule.uuid)) {
                    Ok(Verified::NotApplied)
                } else {
                    Ok(Verified::Applied { discovered: None })
                }
            }
        }
    }

    fn finish_success(&self, id: &OperationId, discovered: Option<RuleId>) {
        self.registry.update(id, |op| {
            op.status = OperationStatus::Succeeded;
            op.finished_at = Some(Utc::now());
            op.recoverable = false;
            op.error_code = None;
            op.error_message = None;
            if discovered.is_some() {
                op.target_id = discovered.clone();
            }
        });
        self.rules_changed.notify_waiters();
        self.autoclear.schedule(*id);
    }

    fn finish_failure(&self, id: &OperationId, classified: &ClassifiedError) {
        self.registry.update(id, |op| {
            op.status = OperationStatus::Failed;
            op.finished_at = Some(Utc::now());
            op.recoverable = op.retry_payload.is_some();
            op.error_code = classified.code;
            op.error_message = Some(classified.message.clone());
        });
    }
}

fn derive_label(payload: &MutationPayload) -> String {
    match payload {
        MutationPayload::Create { rule } => rule
            .get("description")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| rule.get("frontend_fqdn").and_then(Value::as_str))
            .unwrap_or("new rule")
            .to_string(),
        MutationPayload::Update { id, patch } => patch
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("rule {}", id)),
        MutationPayload::Delete { id } => format!("rule {}", id),
        MutationPayload::BulkDelete { ids } => format!("{} rules", ids.len()),
    }
}
