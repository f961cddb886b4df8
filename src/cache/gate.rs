// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Consistency gate: the highest revision fully reflected in the cache.
//!
//! The revision lives in a `watch` channel. The replication sink advances it
//! while still holding the core write lock, after the snapshot and event ring
//! have been mutated, so a waiter released at `R` always reads a state that
//! includes every commit up to `R`.
//!
//! # Waiting
//!
//! ```text
//! wait_for_revision(R)
//!   ├─ R == 0 or current >= R ──────────────► Ok(current)
//!   └─ loop
//!        ├─ revision changed, >= R ─────────► Ok
//!        ├─ grace elapsed (once) ───────────► spawn request_progress()
//!        ├─ deadline ───────────────────────► Timeout (too large resource version)
//!        └─ cancelled ──────────────────────► Cancelled
//! ```
//!
//! The spawned progress request is aborted when the wait returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::WatchCacheConfig;
use crate::error::WatchCacheError;
use crate::metrics;
use crate::storage::traits::StoreOfRecord;

/// Time limits for one revision wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBudget {
    pub timeout: Duration,
    /// How long to wait before asking the store of record for a bookmark
    pub grace: Duration,
}

impl WaitBudget {
    #[must_use]
    pub fn from_config(config: &WatchCacheConfig) -> Self {
        Self {
            timeout: config.block_timeout(),
            grace: config.progress_grace(),
        }
    }
}

/// Aborts the in-flight progress request when the waiter goes away.
struct ProgressTask(JoinHandle<()>);

impl Drop for ProgressTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct ConsistencyGate {
    revision_tx: watch::Sender<u64>,
    progress: Option<Arc<dyn StoreOfRecord>>,
}

impl ConsistencyGate {
    /// `progress` is asked for a bookmark when a wait stalls; None disables escalation.
    #[must_use]
    pub fn new(progress: Option<Arc<dyn StoreOfRecord>>) -> Self {
        let (revision_tx, _) = watch::channel(0);
        Self { revision_tx, progress }
    }

    #[must_use]
    pub fn current(&self) -> u64 {
        *self.revision_tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Move the revision forward and wake waiters. Lower values are ignored.
    ///
    /// Must be called under the core write lock, after the matching mutation.
    pub fn advance(&self, revision: u64) -> bool {
        let advanced = self.revision_tx.send_if_modified(|current| {
            if revision > *current {
                *current = revision;
                true
            } else {
                false
            }
        });
        if advanced {
            metrics::set_current_revision(revision);
        }
        advanced
    }

    /// Block until the revision reaches `target`, the budget runs out, or
    /// `cancel` fires. Returns the revision observed.
    pub async fn wait_for_revision(
        &self,
        target: u64,
        budget: WaitBudget,
        cancel: &CancellationToken,
    ) -> Result<u64, WatchCacheError> {
        let mut rx = self.revision_tx.subscribe();
        let current = *rx.borrow_and_update();
        if target == 0 || current >= target {
            return Ok(current);
        }

        let started = Instant::now();
        let deadline = tokio::time::sleep_until(started + budget.timeout);
        tokio::pin!(deadline);
        let grace = tokio::time::sleep(budget.grace.min(budget.timeout));
        tokio::pin!(grace);
        let mut progress: Option<ProgressTask> = None;
        let mut escalated = self.progress.is_none();

        let result = loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break Err(WatchCacheError::Cancelled { requested: target, current: self.current() });
                    }
                    let current = *rx.borrow_and_update();
                    if current >= target {
                        break Ok(current);
                    }
                }
                () = &mut grace, if !escalated => {
                    escalated = true;
                    progress = self.spawn_progress_request(target);
                }
                () = &mut deadline => {
                    break Err(WatchCacheError::Timeout { requested: target, current: self.current() });
                }
                () = cancel.cancelled() => {
                    break Err(WatchCacheError::Cancelled { requested: target, current: self.current() });
                }
            }
        };
        drop(progress);

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.reason(),
        };
        metrics::record_wait(outcome, started.elapsed());
        if let Err(e) = &result {
            debug!(target_revision = target, error = %e, "Revision wait failed");
        }
        result
    }

    fn spawn_progress_request(&self, target: u64) -> Option<ProgressTask> {
        let store = self.progress.clone()?;
        debug!(target_revision = target, current = self.current(), "Requesting progress from store of record");
        let handle = tokio::spawn(async move {
            match store.request_progress().await {
                Ok(()) => metrics::record_progress_request("sent"),
                Err(e) => {
                    metrics::record_progress_request("error");
                    warn!(error = %e, "Progress request failed");
                }
            }
        });
        Some(ProgressTask(handle))
    }
}
