//! Caller-facing read API: `get`, `list`, `events_since`.
//!
//! - `get()` - point lookup at a revision no older than requested
//! - `list()` - planned listing with transparent store-of-record fallback
//! - `events_since()` - watch cursor creation
//! - `wait_for_revision()` - bare gate wait with the configured budget

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::WatchCacheError;
use crate::metrics::{self, ListTimer};
use crate::object::StoreElement;

use super::cursor::EventCursor;
use super::gate::WaitBudget;
use super::planner::{paginate_fallback, validate_continuation, RequestedRevision, RevisionMode};
use super::types::{CacheState, GetResult, ListOptions, ListResult, ListSource, WatchOptions};
use super::WatchCache;

impl WatchCache {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reads are refused until the first full listing has been applied.
    pub(super) fn ensure_initialized(&self) -> Result<(), WatchCacheError> {
        if self.state() == CacheState::Pending {
            return Err(WatchCacheError::Uninitialized);
        }
        Ok(())
    }

    /// Block until the cache reflects `revision`, using the configured budget.
    pub async fn wait_for_revision(
        &self,
        revision: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, WatchCacheError> {
        let budget = WaitBudget::from_config(&self.config.read());
        self.gate.wait_for_revision(revision, budget, cancel).await
    }

    /// Look up one key.
    ///
    /// A positive `resource_version` waits until the cache has reached it;
    /// `""`, `"0"` and anything unparseable read the latest state.
    #[tracing::instrument(skip(self, cancel), fields(revision))]
    pub async fn get(
        &self,
        key: &str,
        resource_version: &str,
        cancel: &CancellationToken,
    ) -> Result<GetResult, WatchCacheError> {
        let waited = match RequestedRevision::parse(resource_version) {
            RequestedRevision::At(target) => self.wait_for_revision(target, cancel).await.map(drop),
            _ => Ok(()),
        };
        if let Err(e) = waited.and_then(|()| self.ensure_initialized()) {
            metrics::record_read_error("get", e.reason());
            return Err(e);
        }

        let core = self.core.read();
        let result = GetResult {
            element: core.snapshot.get(key),
            revision: core.snapshot.revision(),
        };
        tracing::Span::current().record("revision", result.revision);
        Ok(result)
    }

    /// List everything under `prefix` matching the options' predicate.
    ///
    /// When the cache can no longer reconstruct a consistent listing and
    /// `consistent_list_from_snapshot` is on, the store of record answers
    /// instead; [`ListResult::source`] tells which.
    #[tracing::instrument(skip(self, opts, cancel), fields(mode))]
    pub async fn list(
        &self,
        prefix: &str,
        opts: ListOptions,
        cancel: &CancellationToken,
    ) -> Result<ListResult, WatchCacheError> {
        opts.predicate.validate()?;
        let from_snapshot = self.config.read().consistent_list_from_snapshot;
        let mode = RevisionMode::resolve(&opts, from_snapshot);
        tracing::Span::current().record("mode", mode.as_str());
        let _timer = ListTimer::new(mode.as_str());

        match self.list_from_cache(prefix, &opts, mode, cancel).await {
            Ok(result) => Ok(result),
            Err(WatchCacheError::ResourceExpired { requested, reason }) if from_snapshot => {
                info!(requested, %reason, "Falling back to store of record");
                metrics::record_fallback("expired");
                self.list_from_store(prefix, &opts, requested).await
            }
            Err(e) => {
                metrics::record_read_error("list", e.reason());
                debug!(error = %e, "List failed");
                Err(e)
            }
        }
    }

    async fn list_from_store(
        &self,
        prefix: &str,
        opts: &ListOptions,
        min_revision: u64,
    ) -> Result<ListResult, WatchCacheError> {
        if let Some(continuation) = &opts.continuation {
            validate_continuation(prefix, continuation)?;
        }
        let page = self.store.get_list(prefix, min_revision).await?;
        let mut items: Vec<Arc<StoreElement>> = page
            .items
            .into_iter()
            .filter_map(|object| match self.extractor.element(object) {
                Ok(element) => Some(Arc::new(element)),
                Err(e) => {
                    warn!(error = %e, "Skipping unextractable object from store of record");
                    None
                }
            })
            .filter(|el| el.key.starts_with(prefix) && opts.predicate.matches(el))
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        metrics::record_list("consistent", ListSource::StoreOfRecord.as_str(), false);
        Ok(paginate_fallback(items, page.revision, opts))
    }

    /// Open a cursor over events after `revision`.
    ///
    /// Revision 0 starts from the latest committed revision. Fails with
    /// `TooOld` when `revision` has left the ring.
    pub fn events_since(
        &self,
        revision: u64,
        opts: WatchOptions,
    ) -> Result<EventCursor, WatchCacheError> {
        opts.predicate.validate()?;
        let chunk = self.config.read().cursor_buffer_size;
        let start = {
            let core = self.core.read();
            let start = if revision == 0 {
                core.events.last_revision().ok_or(WatchCacheError::Uninitialized)?
            } else {
                revision
            };
            if let Err(e) = core.events.position_after(start) {
                metrics::record_cursor(e.reason());
                return Err(e);
            }
            start
        };
        metrics::record_cursor("created");
        Ok(EventCursor::new(
            self.core.clone(),
            self.gate.subscribe(),
            start,
            opts.predicate,
            opts.allow_bookmarks,
            chunk,
        ))
    }
}
