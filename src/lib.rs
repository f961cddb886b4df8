//! # Watch Cache
//!
//! An in-memory, revision-ordered mirror of a keyed object store. It serves
//! consistent LIST and GET at a requested revision and an ordered event stream
//! to watchers, while staying in step with the store of record it replicates.
//!
//! ## Architecture
//!
//! One writer (the change feed), many readers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Store of record (external)                │
//! │  • ordered change feed (Added/Modified/Deleted/Bookmark)   │
//! │  • get_list fallback, request_progress                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  mpsc feed
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ReplicationSink                         │
//! │  • extract key/labels/fields                               │
//! │  • one write lock per commit:                              │
//! │      snapshot → event ring → gate advance                  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                   │                    │
//!            ▼                   ▼                    ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ IndexedSnapshot  │ │   EventStore     │ │ ConsistencyGate  │
//! │ key → element    │ │ revision ring    │ │ watch<u64>       │
//! │ l:/f: indexes    │ │ elastic capacity │ │ bounded waits    │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!            ▲                   ▲                    ▲
//!            └─────────── ListPlanner / get / events_since
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watch_cache::{
//!     IndexSpec, InMemoryStore, ListOptions, NamespacedExtractor, Object, SelectionPredicate,
//!     Selector, WatchCache, WatchCacheConfig,
//! };
//! use tokio::sync::watch;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = WatchCacheConfig::default();
//!     let (_tx, rx) = watch::channel(config.clone());
//!     let store = Arc::new(InMemoryStore::with_prefix("/pods"));
//!     let cache = Arc::new(
//!         WatchCache::new(
//!             config,
//!             rx,
//!             store.clone(),
//!             Arc::new(NamespacedExtractor::new("/pods")),
//!             vec![IndexSpec::label("app")],
//!         )
//!         .expect("valid config"),
//!     );
//!
//!     let feed = store.subscribe(256).await;
//!     let runner = cache.clone();
//!     tokio::spawn(async move { runner.run(feed, CancellationToken::new()).await });
//!
//!     let rev = store
//!         .put(Object::new("web-1").with_namespace("default").with_label("app", "web"))
//!         .await
//!         .unwrap();
//!
//!     // Read-your-write: wait until the cache has seen `rev`
//!     let pred = SelectionPredicate::everything()
//!         .with_label_selector(Selector::from_set([("app", "web")]))
//!         .with_index_label("app");
//!     let page = cache
//!         .list(
//!             "/pods",
//!             ListOptions::at(rev.to_string()).with_predicate(pred),
//!             &CancellationToken::new(),
//!         )
//!         .await
//!         .unwrap();
//!     assert_eq!(page.index_used.as_deref(), Some("l:app"));
//! }
//! ```
//!
//! ## Consistency
//!
//! - The gate revision never decreases.
//! - A caller released at revision `R` sees every commit up to `R`.
//! - Event replay yields strictly increasing revisions with no gaps inside
//!   the retained window; older requests fail with `TooOld`.
//! - Index-based and full-scan listings always agree.
//!
//! ## Configuration
//!
//! See [`WatchCacheConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`cache`]: the [`WatchCache`] coordinator, gate, sink, planner and cursor
//! - [`event_store`]: revision-ordered event ring
//! - [`snapshot`]: indexed point-in-time snapshot
//! - [`selector`]: label/field selectors and predicates
//! - [`object`]: objects, elements and attribute extraction
//! - [`storage`]: the store-of-record seam and an in-memory store

pub mod config;
pub mod error;
pub mod object;
pub mod selector;
pub mod event_store;
pub mod snapshot;
pub mod storage;
pub mod cache;
pub mod metrics;

pub use config::WatchCacheConfig;
pub use error::WatchCacheError;
pub use object::{AttrExtractor, Attrs, NamespacedExtractor, Object, StoreElement};
pub use selector::{Requirement, SelectionPredicate, Selector};
pub use event_store::{ChangeEvent, EventStore, EventType};
pub use snapshot::{IndexSpec, IndexedSnapshot};
pub use storage::memory::InMemoryStore;
pub use storage::traits::{ListPage, Notification, StorageError, StoreOfRecord};
pub use cache::{
    CacheState, CacheStats, ConsistencyGate, Continuation, EventCursor, GetResult, ListOptions,
    ListResult, ListSource, ResourceVersionMatch, RevisionMode, WaitBudget, WatchCache,
    WatchOptions,
};
