use async_trait::async_trait;
use thiserror::Error;

use crate::object::Object;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Progress notifications are not supported by this store")]
    ProgressUnsupported,
}

/// A full listing read directly from the store of record.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects under the requested prefix, unfiltered
    pub items: Vec<Object>,
    /// Revision the listing reflects
    pub revision: u64,
}

/// One entry of the ordered change feed the cache replicates from.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Added(Object),
    Modified(Object),
    /// The object as deleted, carrying the deletion revision
    Deleted(Object),
    /// Progress marker: everything up to this revision has been delivered
    Bookmark(u64),
    /// Full resync
    Replace { items: Vec<Object>, revision: u64 },
}

impl Notification {
    #[must_use]
    pub fn revision(&self) -> u64 {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o.revision,
            Self::Bookmark(r) => *r,
            Self::Replace { revision, .. } => *revision,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Modified(_) => "modified",
            Self::Deleted(_) => "deleted",
            Self::Bookmark(_) => "bookmark",
            Self::Replace { .. } => "replace",
        }
    }
}

/// The authoritative store the cache mirrors.
#[async_trait]
pub trait StoreOfRecord: Send + Sync {
    /// List everything under `prefix` at a revision no older than `min_revision`
    /// (0 means latest).
    async fn get_list(&self, prefix: &str, min_revision: u64) -> Result<ListPage, StorageError>;

    /// Latest committed revision.
    async fn current_revision(&self) -> Result<u64, StorageError>;

    /// Ask the feed to emit a bookmark at or after the current revision.
    async fn request_progress(&self) -> Result<(), StorageError>;
}
