//! Auto-clear of succeeded operations.
//!
//! Each succeeded operation gets two deferred timers: one flips the
//! cosmetic `expiring` flag shortly before expiry (so a UI can fade the row
//! out), the other removes the record after the dwell period. Timers are
//! plain tokio tasks whose handles live in a [`DashMap`]; dropping a handle
//! pair aborts both tasks, which makes cancel/pause a map operation.
//!
//! Pausing aborts every pending timer. Unpausing is not retroactive: only
//! operations that reach `succeeded` while unpaused get scheduled, so a user
//! reading the list is never surprised by rows vanishing on mouse-out.

use crate::registry::OperationRegistry;
use crate::types::{OperationId, OperationStatus};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct ClearTimers {
    fade: JoinHandle<()>,
    remove: JoinHandle<()>,
}

impl Drop for ClearTimers {
    fn drop(&mut self) {
        self.fade.abort();
        self.remove.abort();
    }
}

pub struct AutoClearScheduler {
    registry: Arc<OperationRegistry>,
    timers: Arc<DashMap<OperationId, ClearTimers>>,
    paused: AtomicBool,
    dwell: Duration,
    fade_lead: Duration,
}

impl AutoClearScheduler {
    pub fn new(registry: Arc<OperationRegistry>, dwell: Duration, fade_lead: Duration) -> Self {
        AutoClearScheduler {
            registry,
            timers: Arc::new(DashMap::new()),
            paused: AtomicBool::new(false),
            dwell,
            fade_lead,
        }
    }

    /// Arm both timers for a freshly succeeded operation. No-op while
    /// paused. Re-scheduling an id replaces (and thereby aborts) any timers
    /// already pending for it.
    pub fn schedule(&self, id: OperationId) {
        if self.paused.load(Ordering::SeqCst) {
            return;
        }

        let fade_after = self.dwell.saturating_sub(self.fade_lead);
        let registry = Arc::clone(&self.registry);
        let fade = tokio::spawn(async move {
            tokio::time::sleep(fade_after).await;
            registry.update(&id, |op| {
                if op.status == OperationStatus::Succeeded {
                    op.expiring = true;
                }
            });
        });

        let registry = Arc::clone(&self.registry);
        let timers = Arc::clone(&self.timers);
        let dwell = self.dwell;
        let remove = tokio::spawn(async move {
            tokio::time::sleep(dwell).await;
            // The record may have been retried or dismissed since; only a
            // still-succeeded operation is expired.
            let still_succeeded = registry
                .get(&id)
                .map(|op| op.status == OperationStatus::Succeeded)
                .unwrap_or(false);
            if still_succeeded {
                tracing::debug!("[CLEAR {}] dwell elapsed, removing", id);
                registry.remove(&id);
            }
            timers.remove(&id);
        });

        self.timers.insert(id, ClearTimers { fade, remove });
    }

    /// Cancel any pending timers for this operation (dismissal or retry).
    pub fn cancel(&self, id: &OperationId) {
        self.timers.remove(id);
    }

    pub fn set_paused(&self, paused: bool) {
        let was = self.paused.swap(paused, Ordering::SeqCst);
        if paused && !was {
            tracing::debug!("[CLEAR] paused, cancelling {} pending timers", self.timers.len());
            self.timers.clear();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}
