// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Watch cache coordinator.
//!
//! The [`WatchCache`] ties the components together:
//! - [`IndexedSnapshot`]: key → element map with secondary indexes
//! - [`EventStore`]: revision-ordered event ring
//! - [`ConsistencyGate`]: highest committed revision, with bounded waits
//! - [`ReplicationSink`]: the single ingestion path
//! - the list planner, which picks snapshot, replay or store of record
//!
//! Snapshot and ring sit behind one `RwLock` and are only mutated by the sink.
//! Readers hold the read side for the duration of one lookup, never across a wait.
//!
//! # Lifecycle
//!
//! ```text
//! Pending ──(first full listing)──► Ready ──(run loop exits)──► Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watch_cache::{
//!     InMemoryStore, IndexSpec, ListOptions, NamespacedExtractor, WatchCache, WatchCacheConfig,
//! };
//! use tokio::sync::watch;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = WatchCacheConfig::default();
//! let (_tx, rx) = watch::channel(config.clone());
//! let store = Arc::new(InMemoryStore::with_prefix("/pods"));
//! let cache = Arc::new(
//!     WatchCache::new(
//!         config,
//!         rx,
//!         store.clone(),
//!         Arc::new(NamespacedExtractor::new("/pods")),
//!         vec![IndexSpec::label("app")],
//!     )
//!     .unwrap(),
//! );
//!
//! let feed = store.subscribe(64).await;
//! let shutdown = CancellationToken::new();
//! let runner = cache.clone();
//! tokio::spawn(async move { runner.run(feed, shutdown).await });
//!
//! let page = cache
//!     .list("/pods", ListOptions::at("0"), &CancellationToken::new())
//!     .await
//!     .unwrap();
//! println!("{} pods at revision {}", page.items.len(), page.revision);
//! # }
//! ```

mod types;
mod api;
mod cursor;
mod gate;
mod lifecycle;
mod planner;
mod sink;

pub use cursor::EventCursor;
pub use gate::{ConsistencyGate, WaitBudget};
pub use planner::RevisionMode;
pub use sink::ReplicationSink;
pub use types::{
    CacheState, CacheStats, Continuation, GetResult, ListOptions, ListResult, ListSource,
    ResourceVersionMatch, WatchOptions,
};

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::config::WatchCacheConfig;
use crate::error::WatchCacheError;
use crate::event_store::EventStore;
use crate::metrics;
use crate::object::AttrExtractor;
use crate::snapshot::{IndexSpec, IndexedSnapshot};
use crate::storage::traits::{Notification, StoreOfRecord};

/// State guarded by the core lock.
pub(crate) struct CacheCore {
    pub(crate) snapshot: IndexedSnapshot,
    pub(crate) events: EventStore,
}

/// In-memory, revision-ordered mirror of one resource prefix.
///
/// # Thread Safety
///
/// `Send + Sync`; share it behind an `Arc`. One task runs [`WatchCache::run`]
/// (or calls [`WatchCache::ingest`] in order); any number of tasks read.
pub struct WatchCache {
    /// Configuration (updated at runtime via the watch channel)
    pub(super) config: RwLock<WatchCacheConfig>,

    /// Runtime config updates, consumed by the run loop
    pub(super) config_rx: Mutex<watch::Receiver<WatchCacheConfig>>,

    /// Cache state (broadcast to watchers)
    pub(super) state: watch::Sender<CacheState>,

    /// Cache state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<CacheState>,

    pub(super) core: Arc<RwLock<CacheCore>>,
    pub(super) gate: Arc<ConsistencyGate>,
    pub(super) sink: ReplicationSink,
    pub(super) extractor: Arc<dyn AttrExtractor>,

    /// Store of record: progress requests, consistent revisions, fallback lists
    pub(super) store: Arc<dyn StoreOfRecord>,
}

impl WatchCache {
    /// Create an empty cache in the `Pending` state.
    ///
    /// Fails if the config is invalid or two index specs share a name.
    pub fn new(
        config: WatchCacheConfig,
        config_rx: watch::Receiver<WatchCacheConfig>,
        store: Arc<dyn StoreOfRecord>,
        extractor: Arc<dyn AttrExtractor>,
        indexes: Vec<IndexSpec>,
    ) -> Result<Self, WatchCacheError> {
        config.validate()?;
        let snapshot = IndexedSnapshot::new(indexes)?;
        let events = EventStore::new(&config);
        let core = Arc::new(RwLock::new(CacheCore { snapshot, events }));
        let gate = Arc::new(ConsistencyGate::new(Some(store.clone())));
        let sink = ReplicationSink::new(core.clone(), gate.clone(), extractor.clone());
        let (state_tx, state_rx) = watch::channel(CacheState::Pending);

        debug!(
            capacity = config.initial_capacity,
            from_snapshot = config.consistent_list_from_snapshot,
            "Watch cache created"
        );
        Ok(Self {
            config: RwLock::new(config),
            config_rx: Mutex::new(config_rx),
            state: state_tx,
            state_rx,
            core,
            gate,
            sink,
            extractor,
            store,
        })
    }

    #[must_use]
    pub fn state(&self) -> CacheState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<CacheState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == CacheState::Ready
    }

    /// Highest revision fully reflected in the cache.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.gate.current()
    }

    /// Receiver that observes every revision advance.
    #[must_use]
    pub fn revision_receiver(&self) -> watch::Receiver<u64> {
        self.gate.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> WatchCacheConfig {
        self.config.read().clone()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let core = self.core.read();
        CacheStats {
            state: self.state(),
            revision: self.gate.current(),
            items: core.snapshot.len(),
            events: core.events.len(),
            capacity: core.events.capacity(),
            boundary_revision: core.events.boundary_revision(),
        }
    }

    /// Commit one feed notification. The first full listing makes the cache `Ready`.
    pub fn ingest(&self, notification: Notification) -> Result<u64, WatchCacheError> {
        let is_replace = matches!(notification, Notification::Replace { .. });
        let revision = self.sink.apply(notification)?;
        if is_replace && self.state() == CacheState::Pending {
            info!(revision, "Watch cache ready");
            self.set_state(CacheState::Ready);
        }
        Ok(revision)
    }

    pub(super) fn set_state(&self, state: CacheState) {
        let _ = self.state.send(state);
        metrics::set_cache_state(&state.to_string());
    }

    pub(super) fn update_gauge_metrics(&self) {
        let core = self.core.read();
        metrics::set_snapshot_items(core.snapshot.len());
        metrics::set_ring_gauges(core.events.capacity(), core.events.len());
        metrics::set_current_revision(self.gate.current());
    }
}
