// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication sink: the single write path into the cache.
//!
//! Each notification is committed under one write lock, in this order:
//!
//! 1. snapshot mutation (add / update / delete / replace)
//! 2. event append (or ring reset for a Replace)
//! 3. gate advance
//!
//! Attribute extraction runs before the lock is taken. An object that cannot
//! be extracted or indexed is skipped: its revision is recorded as a bookmark
//! so waiters still make progress, and the stream carries on.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::WatchCacheError;
use crate::event_store::{ChangeEvent, EventType};
use crate::metrics;
use crate::object::{AttrExtractor, Object, StoreElement};
use crate::storage::traits::Notification;

use super::gate::ConsistencyGate;
use super::CacheCore;

pub struct ReplicationSink {
    core: Arc<RwLock<CacheCore>>,
    gate: Arc<ConsistencyGate>,
    extractor: Arc<dyn AttrExtractor>,
}

enum Change {
    Upsert,
    Delete,
}

impl ReplicationSink {
    pub(crate) fn new(
        core: Arc<RwLock<CacheCore>>,
        gate: Arc<ConsistencyGate>,
        extractor: Arc<dyn AttrExtractor>,
    ) -> Self {
        Self { core, gate, extractor }
    }

    /// Commit one notification. Returns the revision the cache is now at.
    ///
    /// Errors are per-notification (stale or out-of-order revisions) and never
    /// leave the cache partially updated.
    pub fn apply(&self, notification: Notification) -> Result<u64, WatchCacheError> {
        let kind = notification.kind();
        let result = match notification {
            Notification::Added(object) | Notification::Modified(object) => {
                self.apply_object(object, Change::Upsert)
            }
            Notification::Deleted(object) => self.apply_object(object, Change::Delete),
            Notification::Bookmark(revision) => self.apply_bookmark(revision),
            Notification::Replace { items, revision } => self.apply_replace(items, revision),
        };
        match &result {
            Ok(_) => metrics::record_ingest(kind, "success"),
            Err(e) => metrics::record_ingest(kind, e.reason()),
        }
        result
    }

    fn check_order(&self, core: &CacheCore, revision: u64) -> Result<(), WatchCacheError> {
        let floor = core
            .events
            .last_revision()
            .unwrap_or(0)
            .max(self.gate.current());
        if revision <= floor {
            warn!(revision, current = floor, "Ignoring out-of-order notification");
            return Err(WatchCacheError::InvalidInput(format!(
                "notification revision {revision} is not after {floor}"
            )));
        }
        Ok(())
    }

    fn apply_object(&self, object: Object, change: Change) -> Result<u64, WatchCacheError> {
        let revision = object.revision;
        let element = match self.extractor.element(object) {
            Ok(element) => Arc::new(element),
            Err(e) => {
                warn!(revision, error = %e, "Skipping object that failed attribute extraction");
                metrics::record_extraction_failures(1);
                return self.commit_marker(revision);
            }
        };

        let mut core = self.core.write();
        self.check_order(&core, revision)?;

        let (event_type, prev) = match change {
            Change::Upsert => {
                let upserted = core.snapshot.upsert(element.clone());
                match upserted {
                    Ok(Some(prev)) => (EventType::Modified, Some(prev)),
                    Ok(None) => (EventType::Added, None),
                    Err(e) => {
                        drop(core);
                        warn!(key = %element.key, revision, error = %e, "Skipping object that failed indexing");
                        metrics::record_extraction_failures(1);
                        return self.commit_marker(revision);
                    }
                }
            }
            Change::Delete => (EventType::Deleted, core.snapshot.delete(&element.key)),
        };

        core.events.append(ChangeEvent {
            event_type,
            revision,
            object: Some(element),
            prev_object: prev,
            recorded_at: Instant::now(),
        })?;
        core.snapshot.set_revision(revision);
        self.gate.advance(revision);
        metrics::set_snapshot_items(core.snapshot.len());
        Ok(revision)
    }

    /// Record `revision` without an object change.
    fn commit_marker(&self, revision: u64) -> Result<u64, WatchCacheError> {
        let mut core = self.core.write();
        self.check_order(&core, revision)?;
        core.events
            .append(ChangeEvent::bookmark(revision, Instant::now()))?;
        core.snapshot.set_revision(revision);
        self.gate.advance(revision);
        Ok(revision)
    }

    fn apply_bookmark(&self, revision: u64) -> Result<u64, WatchCacheError> {
        let current = self.gate.current();
        if revision <= current {
            debug!(revision, current, "Bookmark already covered");
            return Ok(current);
        }
        self.commit_marker(revision)
    }

    fn apply_replace(&self, items: Vec<Object>, revision: u64) -> Result<u64, WatchCacheError> {
        let total = items.len();
        let elements: Vec<Arc<StoreElement>> = items
            .into_iter()
            .filter_map(|object| match self.extractor.element(object) {
                Ok(element) => Some(Arc::new(element)),
                Err(e) => {
                    warn!(revision, error = %e, "Skipping object in full listing");
                    None
                }
            })
            .collect();

        let mut core = self.core.write();
        let current = self.gate.current();
        if revision < current {
            warn!(revision, current, "Ignoring full listing older than the cache");
            return Err(WatchCacheError::InvalidInput(format!(
                "full listing at {revision} is older than {current}"
            )));
        }
        let index_skipped = core.snapshot.replace(elements, revision);
        core.events.reset(revision);
        self.gate.advance(revision);

        let kept = core.snapshot.len();
        metrics::set_snapshot_items(kept);
        metrics::record_extraction_failures(total - kept);
        debug!(revision, items = kept, skipped = total - kept, index_skipped, "Applied full listing");
        Ok(revision)
    }
}
