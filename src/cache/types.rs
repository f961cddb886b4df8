//! Public types for the watch cache coordinator.

use std::sync::Arc;

use crate::object::{Object, StoreElement};
use crate::selector::SelectionPredicate;

/// Cache lifecycle state.
///
/// Use [`super::WatchCache::state()`] to check the current state or
/// [`super::WatchCache::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Created, waiting for the first full listing
    Pending,
    /// Populated and serving reads
    Ready,
    /// Run loop has exited
    Stopped,
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// How a non-zero requested revision is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceVersionMatch {
    /// Any state at least as new as the requested revision
    #[default]
    NotOlderThan,
    /// Exactly the state at the requested revision
    Exact,
}

/// Resume point of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    /// First key of the next page (inclusive)
    pub start_key: String,
    /// Revision the whole paginated listing is pinned to
    pub revision: u64,
}

/// LIST request options.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// `""` (latest or consistent), `"0"` (latest) or a decimal revision.
    /// Anything negative or unparseable is served as latest.
    pub resource_version: String,
    pub resource_version_match: ResourceVersionMatch,
    pub predicate: SelectionPredicate,
    pub continuation: Option<Continuation>,
    /// Page size, 0 for unlimited
    pub limit: u64,
}

impl ListOptions {
    #[must_use]
    pub fn at(resource_version: impl Into<String>) -> Self {
        Self {
            resource_version: resource_version.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn exact(mut self) -> Self {
        self.resource_version_match = ResourceVersionMatch::Exact;
        self
    }

    #[must_use]
    pub fn with_predicate(mut self, predicate: SelectionPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = Some(continuation);
        self
    }
}

/// Where a listing was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSource {
    Cache,
    StoreOfRecord,
}

impl ListSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::StoreOfRecord => "store_of_record",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListResult {
    /// Ordered by key
    pub items: Vec<Arc<Object>>,
    /// Revision the listing reflects
    pub revision: u64,
    /// Secondary index used, None for a full scan
    pub index_used: Option<String>,
    /// Present when the listing was truncated by `limit`
    pub continuation: Option<Continuation>,
    /// Matching items past this page, when truncated
    pub remaining_item_count: Option<u64>,
    pub source: ListSource,
}

#[derive(Debug, Clone)]
pub struct GetResult {
    pub element: Option<Arc<StoreElement>>,
    /// Revision the lookup reflects
    pub revision: u64,
}

impl GetResult {
    #[must_use]
    pub fn exists(&self) -> bool {
        self.element.is_some()
    }

    #[must_use]
    pub fn object(&self) -> Option<&Object> {
        self.element.as_deref().map(|e| e.object.as_ref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub predicate: SelectionPredicate,
    /// Deliver bookmark events
    pub allow_bookmarks: bool,
}

/// Point-in-time view of cache occupancy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub state: CacheState,
    pub revision: u64,
    pub items: usize,
    pub events: usize,
    pub capacity: usize,
    /// Oldest retained event revision
    pub boundary_revision: Option<u64>,
}
