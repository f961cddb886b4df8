// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-facing error taxonomy.
//!
//! | Error | Meaning | Caller action |
//! |---|---|---|
//! | [`WatchCacheError::TooOld`] | revision predates the retained window | full resync |
//! | [`WatchCacheError::Timeout`] | revision not reached in time | retry |
//! | [`WatchCacheError::ResourceExpired`] | consistent target aged out | query the store of record |
//! | [`WatchCacheError::InvalidInput`] | malformed predicate, index or continuation | none, fatal |

use thiserror::Error;

use crate::storage::traits::StorageError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchCacheError {
    /// The requested revision is older than anything the event ring can answer.
    #[error("too old resource version: {requested} ({oldest})")]
    TooOld { requested: u64, oldest: u64 },

    /// The requested revision was not observed within the wait budget.
    #[error("Timeout: Too large resource version: {requested}, current: {current}")]
    Timeout { requested: u64, current: u64 },

    /// The caller gave up while waiting for a revision.
    #[error("wait for resource version {requested} cancelled, current: {current}")]
    Cancelled { requested: u64, current: u64 },

    /// A consistent listing can no longer be reconstructed from the cache.
    #[error("resource version {requested} expired: {reason}")]
    ResourceExpired { requested: u64, reason: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Key or attribute extraction failed for a single object.
    #[error("attribute extraction failed: {0}")]
    Extraction(String),

    /// The cache has neither events nor an initial listing yet.
    #[error("watch cache is not initialized")]
    Uninitialized,

    #[error("store of record: {0}")]
    Storage(#[from] StorageError),
}

impl WatchCacheError {
    /// Whether this is the "too large resource version" timeout.
    #[must_use]
    pub fn is_too_large_resource_version(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled { .. })
    }

    #[must_use]
    pub fn is_too_old(&self) -> bool {
        matches!(self, Self::TooOld { .. })
    }

    /// Whether retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Cancelled { .. } | Self::Uninitialized | Self::Storage(_)
        )
    }

    /// Short label used for metrics and structured logs.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::TooOld { .. } => "too_old",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::ResourceExpired { .. } => "expired",
            Self::InvalidInput(_) => "invalid_input",
            Self::Extraction(_) => "extraction",
            Self::Uninitialized => "uninitialized",
            Self::Storage(_) => "storage",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_carries_too_large_marker() {
        let err = WatchCacheError::Timeout { requested: 4, current: 3 };
        assert!(err.is_too_large_resource_version());
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("Too large resource version: 4"));
    }

    #[test]
    fn test_too_old_is_not_retryable() {
        let err = WatchCacheError::TooOld { requested: 1, oldest: 2 };
        assert!(err.is_too_old());
        assert!(!err.is_retryable());
        assert!(!err.is_too_large_resource_version());
        assert_eq!(err.to_string(), "too old resource version: 1 (2)");
    }

    #[test]
    fn test_cancelled_is_timeout_but_not_too_large() {
        let err = WatchCacheError::Cancelled { requested: 9, current: 1 };
        assert!(err.is_timeout());
        assert!(!err.is_too_large_resource_version());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: WatchCacheError = StorageError::Backend("down".into()).into();
        assert_eq!(err.reason(), "storage");
        assert!(err.is_retryable());
    }
}
