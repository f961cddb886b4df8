// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! List planner: chooses how a LIST is answered.
//!
//! # Mode resolution
//!
//! | `resource_version` | other inputs | mode |
//! |---|---|---|
//! | negative / unparseable | anything | `Latest` |
//! | any | continuation present | `Exact(continuation.revision)` |
//! | `""` | toggle on | `Consistent(None)` |
//! | `""` | toggle off | `Latest` |
//! | `"0"` | | `Latest` |
//! | `R > 0` | match = Exact | `Exact(R)` |
//! | `R > 0` | limit > 0, toggle on | `Consistent(Some(R))` |
//! | `R > 0` | otherwise | `NotOlderThan(R)` |
//!
//! # Execution
//!
//! - `Latest`: current snapshot, no wait.
//! - `NotOlderThan(R)`: wait for `R`, then the current snapshot.
//! - `Exact(R)`: wait for `R`; with a continuation and `R` retained, rebuild
//!   the listing at `R` from the ring; else the snapshot if it sits exactly at
//!   `R`; else `TooOld`.
//! - `Consistent(target)`: wait for `target` (the store's current revision
//!   when None). An explicit target is rebuilt exactly and is
//!   `ResourceExpired` once it leaves the ring.
//!
//! Rebuilding undoes, newest first, every retained event after `R`: Added
//! removes the key, Modified and Deleted restore the previous object.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::WatchCacheError;
use crate::metrics;
use crate::object::StoreElement;
use crate::selector::SelectionPredicate;

use super::gate::WaitBudget;
use super::types::{Continuation, ListOptions, ListResult, ListSource, ResourceVersionMatch};
use super::{CacheCore, WatchCache};

/// How a LIST's requested revision is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionMode {
    Latest,
    NotOlderThan(u64),
    Exact(u64),
    /// Linearizable against the store of record; None targets its current revision
    Consistent(Option<u64>),
}

/// Parsed `resource_version` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RequestedRevision {
    Unset,
    Invalid,
    At(u64),
}

impl RequestedRevision {
    pub(super) fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Unset;
        }
        match raw.parse::<u64>() {
            Ok(revision) => Self::At(revision),
            Err(_) => Self::Invalid,
        }
    }
}

impl RevisionMode {
    #[must_use]
    pub fn resolve(opts: &ListOptions, consistent_from_snapshot: bool) -> Self {
        let requested = RequestedRevision::parse(&opts.resource_version);
        if requested == RequestedRevision::Invalid {
            return Self::Latest;
        }
        if let Some(continuation) = &opts.continuation {
            return Self::Exact(continuation.revision);
        }
        match requested {
            RequestedRevision::Unset if consistent_from_snapshot => Self::Consistent(None),
            RequestedRevision::Unset | RequestedRevision::Invalid | RequestedRevision::At(0) => {
                Self::Latest
            }
            RequestedRevision::At(r) if opts.resource_version_match == ResourceVersionMatch::Exact => {
                Self::Exact(r)
            }
            RequestedRevision::At(r) if opts.limit > 0 && consistent_from_snapshot => {
                Self::Consistent(Some(r))
            }
            RequestedRevision::At(r) => Self::NotOlderThan(r),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::NotOlderThan(_) => "not_older_than",
            Self::Exact(_) => "exact",
            Self::Consistent(_) => "consistent",
        }
    }
}

/// Elements selected for one listing, before pagination.
struct Selected {
    items: Vec<Arc<StoreElement>>,
    revision: u64,
    index_used: Option<String>,
}

impl WatchCache {
    /// Answer a LIST from cached state only.
    pub(super) async fn list_from_cache(
        &self,
        prefix: &str,
        opts: &ListOptions,
        mode: RevisionMode,
        cancel: &CancellationToken,
    ) -> Result<ListResult, WatchCacheError> {
        if let Some(continuation) = &opts.continuation {
            validate_continuation(prefix, continuation)?;
        }
        let budget = WaitBudget::from_config(&self.config.read());

        // A bookmark can move the gate before the first full listing lands,
        // so initialisation is checked after every wait.
        let selected = match mode {
            RevisionMode::Latest => {
                self.ensure_initialized()?;
                let core = self.core.read();
                current_listing(&core, prefix, &opts.predicate)
            }
            RevisionMode::NotOlderThan(target) => {
                self.gate.wait_for_revision(target, budget, cancel).await?;
                self.ensure_initialized()?;
                let core = self.core.read();
                current_listing(&core, prefix, &opts.predicate)
            }
            RevisionMode::Exact(target) => {
                self.gate.wait_for_revision(target, budget, cancel).await?;
                self.ensure_initialized()?;
                let core = self.core.read();
                exact_listing(&core, prefix, &opts.predicate, target, opts.continuation.is_some())?
            }
            RevisionMode::Consistent(explicit) => {
                let target = match explicit {
                    Some(target) => target,
                    None => self.consistent_target(budget, cancel).await?,
                };
                self.gate.wait_for_revision(target, budget, cancel).await?;
                self.ensure_initialized()?;
                let core = self.core.read();
                match explicit {
                    Some(target) => rebuild_at(&core, prefix, &opts.predicate, target).map_err(
                        |e| match e {
                            WatchCacheError::TooOld { requested, oldest } => {
                                WatchCacheError::ResourceExpired {
                                    requested,
                                    reason: format!("oldest retained revision is {oldest}"),
                                }
                            }
                            other => other,
                        },
                    )?,
                    None => current_listing(&core, prefix, &opts.predicate),
                }
            }
        };

        debug!(
            mode = mode.as_str(),
            revision = selected.revision,
            items = selected.items.len(),
            index = selected.index_used.as_deref().unwrap_or(""),
            "Listing served from cache"
        );
        metrics::record_list(mode.as_str(), ListSource::Cache.as_str(), selected.index_used.is_some());
        Ok(paginate(selected, opts, ListSource::Cache))
    }

    /// Ask the store of record for its current revision, within the wait budget.
    async fn consistent_target(
        &self,
        budget: WaitBudget,
        cancel: &CancellationToken,
    ) -> Result<u64, WatchCacheError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(WatchCacheError::Cancelled {
                requested: 0,
                current: self.gate.current(),
            }),
            revision = self.store.current_revision() => Ok(revision?),
            () = tokio::time::sleep(budget.timeout) => {
                let current = self.gate.current();
                warn!(current, timeout_ms = budget.timeout.as_millis() as u64, "Store of record did not report its revision in time");
                Err(WatchCacheError::Timeout { requested: 0, current })
            }
        }
    }
}

fn current_listing(core: &CacheCore, prefix: &str, predicate: &SelectionPredicate) -> Selected {
    let (items, index_used) = core.snapshot.list(prefix, predicate);
    Selected {
        items,
        revision: core.snapshot.revision(),
        index_used,
    }
}

fn exact_listing(
    core: &CacheCore,
    prefix: &str,
    predicate: &SelectionPredicate,
    target: u64,
    continued: bool,
) -> Result<Selected, WatchCacheError> {
    if continued {
        return rebuild_at(core, prefix, predicate, target);
    }
    if core.snapshot.revision() == target {
        return Ok(current_listing(core, prefix, predicate));
    }
    // Without a continuation only the snapshot's own revision is served exactly.
    Err(WatchCacheError::TooOld {
        requested: target,
        oldest: core.snapshot.revision(),
    })
}

/// The listing as it stood at `target`.
fn rebuild_at(
    core: &CacheCore,
    prefix: &str,
    predicate: &SelectionPredicate,
    target: u64,
) -> Result<Selected, WatchCacheError> {
    if core.snapshot.revision() == target {
        return Ok(current_listing(core, prefix, predicate));
    }

    // key → state at `target`; the oldest event after `target` holds it.
    let mut undone: HashMap<&str, Option<&Arc<StoreElement>>> = HashMap::new();
    for event in core.events.interval(target)?.rev() {
        if let Some(key) = event.key() {
            undone.insert(key, event.prev_object.as_ref());
        }
    }

    let (current, index_used) = core.snapshot.list(prefix, predicate);
    let mut items: Vec<Arc<StoreElement>> = current
        .into_iter()
        .filter(|el| !undone.contains_key(el.key.as_str()))
        .collect();
    items.extend(
        undone
            .values()
            .flatten()
            .filter(|el| el.key.starts_with(prefix) && predicate.matches(el))
            .map(|el| Arc::clone(*el)),
    );
    items.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(Selected {
        items,
        revision: target,
        index_used,
    })
}

/// Reject continuation keys that escape the listed prefix.
pub(super) fn validate_continuation(
    prefix: &str,
    continuation: &Continuation,
) -> Result<(), WatchCacheError> {
    let key = &continuation.start_key;
    if continuation.revision == 0 {
        return Err(WatchCacheError::InvalidInput(
            "continuation carries no revision".into(),
        ));
    }
    if !key.starts_with(prefix) {
        return Err(WatchCacheError::InvalidInput(format!(
            "continuation key {key:?} is outside {prefix:?}"
        )));
    }
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(WatchCacheError::InvalidInput(format!(
            "continuation key {key:?} contains a relative path segment"
        )));
    }
    Ok(())
}

/// Apply continuation and limit to a key-ordered selection.
fn paginate(selected: Selected, opts: &ListOptions, source: ListSource) -> ListResult {
    let Selected {
        items,
        revision,
        index_used,
    } = selected;
    let mut items: Vec<Arc<StoreElement>> = match &opts.continuation {
        Some(c) => items
            .into_iter()
            .skip_while(|el| el.key < c.start_key)
            .collect(),
        None => items,
    };

    let limit = usize::try_from(opts.limit).unwrap_or(usize::MAX);
    let (continuation, remaining_item_count) = if opts.limit > 0 && items.len() > limit {
        let rest = items.split_off(limit);
        let next = Continuation {
            start_key: rest[0].key.clone(),
            revision,
        };
        (Some(next), Some(rest.len() as u64))
    } else {
        (None, None)
    };

    ListResult {
        items: items.into_iter().map(|el| el.object.clone()).collect(),
        revision,
        index_used,
        continuation,
        remaining_item_count,
        source,
    }
}

/// Paginate a listing read straight from the store of record.
pub(super) fn paginate_fallback(
    items: Vec<Arc<StoreElement>>,
    revision: u64,
    opts: &ListOptions,
) -> ListResult {
    paginate(
        Selected {
            items,
            revision,
            index_used: None,
        },
        opts,
        ListSource::StoreOfRecord,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(rv: &str) -> ListOptions {
        ListOptions::at(rv)
    }

    #[test]
    fn test_negative_and_garbage_are_latest_regardless_of_toggle() {
        for flag in [false, true] {
            assert_eq!(RevisionMode::resolve(&opts("-5").with_limit(10), flag), RevisionMode::Latest);
            assert_eq!(RevisionMode::resolve(&opts("abc").exact(), flag), RevisionMode::Latest);
            let continued = opts("-1").with_continuation(Continuation {
                start_key: "/pods/a".into(),
                revision: 4,
            });
            assert_eq!(RevisionMode::resolve(&continued, flag), RevisionMode::Latest);
        }
    }

    #[test]
    fn test_empty_is_latest_without_toggle() {
        assert_eq!(RevisionMode::resolve(&opts("").with_limit(5), false), RevisionMode::Latest);
        assert_eq!(RevisionMode::resolve(&opts(""), true), RevisionMode::Consistent(None));
    }

    #[test]
    fn test_zero_is_latest() {
        assert_eq!(RevisionMode::resolve(&opts("0").with_limit(5), true), RevisionMode::Latest);
    }

    #[test]
    fn test_positive_revisions() {
        assert_eq!(RevisionMode::resolve(&opts("7"), false), RevisionMode::NotOlderThan(7));
        assert_eq!(RevisionMode::resolve(&opts("7").exact(), true), RevisionMode::Exact(7));
        assert_eq!(RevisionMode::resolve(&opts("7").with_limit(2), false), RevisionMode::NotOlderThan(7));
        assert_eq!(
            RevisionMode::resolve(&opts("7").with_limit(2), true),
            RevisionMode::Consistent(Some(7))
        );
    }

    #[test]
    fn test_continuation_pins_exact() {
        let continued = opts("").with_continuation(Continuation {
            start_key: "/pods/b".into(),
            revision: 9,
        });
        assert_eq!(RevisionMode::resolve(&continued, true), RevisionMode::Exact(9));
    }

    #[test]
    fn test_continuation_validation() {
        let ok = Continuation { start_key: "/pods/ns/b".into(), revision: 3 };
        assert!(validate_continuation("/pods", &ok).is_ok());
        let outside = Continuation { start_key: "/secrets/x".into(), revision: 3 };
        assert!(validate_continuation("/pods", &outside).is_err());
        let traversal = Continuation { start_key: "/pods/../secrets".into(), revision: 3 };
        assert!(validate_continuation("/pods", &traversal).is_err());
        let dot = Continuation { start_key: "/pods/./x".into(), revision: 3 };
        assert!(validate_continuation("/pods", &dot).is_err());
        let unpinned = Continuation { start_key: "/pods/x".into(), revision: 0 };
        assert!(validate_continuation("/pods", &unpinned).is_err());
    }
}
