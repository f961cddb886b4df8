// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Revision-ordered ring of change events.
//!
//! # Retained window
//!
//! ```text
//!   evicted            retained (strictly increasing revisions)
//! ───────────┤ e(r4) e(r5) e(r6) … e(rN) ├─── append
//!            ▲
//!            oldest valid = last evicted + 1
//! ```
//!
//! `EventsSince(R)` is answerable iff `R >= oldest_valid()`; it yields every
//! retained event with revision `> R`. After a Replace at revision `L` with no
//! eviction since, `L` itself is the oldest valid revision.
//!
//! # Capacity
//!
//! Capacity moves between `lower_bound` and `upper_bound`:
//! - full and the oldest event is still fresh → double (up to the upper bound)
//! - full and the newest quarter already starts with a stale event → halve
//!   (down to the lower bound), dropping only stale events
//!
//! Independently, events older than the freshness window are trimmed, always
//! keeping the newest event.

use std::collections::{vec_deque, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::WatchCacheConfig;
use crate::error::WatchCacheError;
use crate::metrics;
use crate::object::StoreElement;
use crate::selector::SelectionPredicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
}

impl EventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Bookmark => "bookmark",
        }
    }
}

/// One committed change. Immutable once appended.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub revision: u64,
    /// Object after the change (for Deleted, the object as deleted). None for bookmarks.
    pub object: Option<Arc<StoreElement>>,
    /// Object before the change, for Modified and Deleted.
    pub prev_object: Option<Arc<StoreElement>>,
    pub recorded_at: Instant,
}

impl ChangeEvent {
    #[must_use]
    pub fn bookmark(revision: u64, recorded_at: Instant) -> Self {
        Self {
            event_type: EventType::Bookmark,
            revision,
            object: None,
            prev_object: None,
            recorded_at,
        }
    }

    #[must_use]
    pub fn is_bookmark(&self) -> bool {
        self.event_type == EventType::Bookmark
    }

    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.object
            .as_ref()
            .or(self.prev_object.as_ref())
            .map(|e| e.key.as_str())
    }

    /// Bookmarks always match; a change matches if either side of it does.
    #[must_use]
    pub fn matches(&self, predicate: &SelectionPredicate) -> bool {
        if self.is_bookmark() || predicate.is_everything() {
            return true;
        }
        self.object.as_deref().is_some_and(|e| predicate.matches(e))
            || self.prev_object.as_deref().is_some_and(|e| predicate.matches(e))
    }
}

pub struct EventStore {
    events: VecDeque<Arc<ChangeEvent>>,
    capacity: usize,
    lower_bound: usize,
    upper_bound: usize,
    fresh_duration: Duration,
    /// Revision of the newest event dropped for capacity since the last Replace
    evicted_through: Option<u64>,
    /// Revision of the newest event dropped for age since the last Replace
    trimmed_through: Option<u64>,
    /// Revision of the last Replace
    list_revision: Option<u64>,
}

impl EventStore {
    #[must_use]
    pub fn new(config: &WatchCacheConfig) -> Self {
        let capacity = config
            .initial_capacity
            .clamp(config.lower_bound_capacity.max(1), config.upper_bound_capacity.max(1));
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            lower_bound: config.lower_bound_capacity.max(1),
            upper_bound: config.upper_bound_capacity.max(1),
            fresh_duration: config.event_fresh_duration(),
            evicted_through: None,
            trimmed_through: None,
            list_revision: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest revision this store knows about (newest event or last Replace).
    #[must_use]
    pub fn last_revision(&self) -> Option<u64> {
        let newest = self.events.back().map(|e| e.revision);
        match (newest, self.list_revision) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    /// Lowest revision `R` for which [`Self::interval`] answers.
    ///
    /// Capacity eviction of `E` invalidates `E` itself. An age trim of `E`
    /// does not: every event after `E` is still retained.
    pub fn oldest_valid(&self) -> Result<u64, WatchCacheError> {
        let floor = self.evicted_through.map(|r| r + 1).max(self.trimmed_through);
        if let Some(floor) = floor {
            return Ok(floor);
        }
        if let Some(listed) = self.list_revision {
            return Ok(listed);
        }
        self.events
            .front()
            .map(|e| e.revision.saturating_sub(1))
            .ok_or(WatchCacheError::Uninitialized)
    }

    /// Oldest retained revision (the boundary), if any event is retained.
    #[must_use]
    pub fn boundary_revision(&self) -> Option<u64> {
        self.events.front().map(|e| e.revision)
    }

    /// Append a committed event. Revisions must strictly increase.
    pub fn append(&mut self, event: ChangeEvent) -> Result<u64, WatchCacheError> {
        if let Some(last) = self.last_revision() {
            if event.revision <= last {
                return Err(WatchCacheError::InvalidInput(format!(
                    "event revision {} not after {}",
                    event.revision, last
                )));
            }
        }
        let revision = event.revision;
        let now = event.recorded_at;

        // Make room before the push so the current head stays answerable.
        self.resize_for(now);
        self.trim_expired(now);
        let mut evicted = 0;
        while self.events.len() >= self.capacity {
            self.evict_front();
            evicted += 1;
        }
        metrics::record_events_evicted("capacity", evicted);

        self.events.push_back(Arc::new(event));
        Ok(revision)
    }

    fn evict_front(&mut self) -> Option<Arc<ChangeEvent>> {
        let event = self.events.pop_front()?;
        self.evicted_through = Some(event.revision);
        Some(event)
    }

    fn is_fresh(&self, event: &ChangeEvent, now: Instant) -> bool {
        now.saturating_duration_since(event.recorded_at) < self.fresh_duration
    }

    fn resize_for(&mut self, now: Instant) {
        if self.events.len() < self.capacity {
            return;
        }
        let Some(oldest) = self.events.front() else {
            return;
        };
        if self.is_fresh(oldest, now) {
            let grown = (self.capacity * 2).min(self.upper_bound);
            if grown > self.capacity {
                debug!(from = self.capacity, to = grown, "Growing event ring");
                self.capacity = grown;
                metrics::record_ring_resize("grow", grown);
            }
            return;
        }
        let quarter = (self.capacity / 4).max(1);
        let pivot = self.events.len().saturating_sub(quarter);
        let stale_quarter = self
            .events
            .get(pivot)
            .is_some_and(|e| !self.is_fresh(e, now));
        if stale_quarter {
            let shrunk = (self.capacity / 2).max(self.lower_bound);
            if shrunk < self.capacity {
                self.shrink_to(shrunk);
            }
        }
    }

    fn shrink_to(&mut self, capacity: usize) {
        debug!(from = self.capacity, to = capacity, "Shrinking event ring");
        let mut dropped = 0;
        while self.events.len() > capacity {
            self.evict_front();
            dropped += 1;
        }
        self.capacity = capacity;
        metrics::record_events_evicted("resize", dropped);
        metrics::record_ring_resize("shrink", capacity);
    }

    /// Drop events older than the freshness window, keeping the newest one.
    pub fn trim_expired(&mut self, now: Instant) -> usize {
        let mut dropped = 0;
        while self.events.len() > 1 {
            match self.events.front() {
                Some(e) if !self.is_fresh(e, now) => {
                    self.trimmed_through = Some(e.revision);
                    self.events.pop_front();
                    dropped += 1;
                }
                _ => break,
            }
        }
        metrics::record_events_evicted("freshness", dropped);
        dropped
    }

    /// Periodic upkeep: freshness trim, then shrink when mostly empty.
    pub fn maintain(&mut self, now: Instant) {
        self.trim_expired(now);
        if self.capacity > self.lower_bound && self.events.len() <= self.capacity / 4 {
            let shrunk = (self.capacity / 2).max(self.lower_bound);
            self.shrink_to(shrunk);
        }
        metrics::set_ring_gauges(self.capacity, self.events.len());
    }

    /// Apply new bounds from a config reload.
    pub fn set_bounds(&mut self, config: &WatchCacheConfig) {
        self.lower_bound = config.lower_bound_capacity.max(1);
        self.upper_bound = config.upper_bound_capacity.max(self.lower_bound);
        self.fresh_duration = config.event_fresh_duration();
        let target = self.capacity.clamp(self.lower_bound, self.upper_bound);
        if target < self.capacity {
            self.shrink_to(target);
        } else {
            self.capacity = target;
        }
    }

    /// Forget all history; the listing at `revision` is the new origin.
    pub fn reset(&mut self, revision: u64) {
        metrics::record_events_evicted("replace", self.events.len());
        self.events.clear();
        self.evicted_through = None;
        self.trimmed_through = None;
        self.list_revision = Some(revision);
    }

    /// Index of the first retained event with revision `> after`.
    pub fn position_after(&self, after: u64) -> Result<usize, WatchCacheError> {
        let oldest = self.oldest_valid()?;
        if after < oldest {
            return Err(WatchCacheError::TooOld {
                requested: after,
                oldest,
            });
        }
        Ok(self.events.partition_point(|e| e.revision <= after))
    }

    /// Lazy forward view over every retained event with revision `> after`.
    pub fn interval(&self, after: u64) -> Result<Interval<'_>, WatchCacheError> {
        let start = self.position_after(after)?;
        Ok(Interval {
            inner: self.events.range(start..),
        })
    }

    /// Matching events after `after`, lazily filtered.
    pub fn events_since<'a>(
        &'a self,
        after: u64,
        predicate: &'a SelectionPredicate,
    ) -> Result<impl Iterator<Item = &'a Arc<ChangeEvent>> + 'a, WatchCacheError> {
        Ok(self.interval(after)?.filter(move |e| e.matches(predicate)))
    }
}

/// Borrowing cursor over a contiguous run of the ring.
pub struct Interval<'a> {
    inner: vec_deque::Iter<'a, Arc<ChangeEvent>>,
}

impl<'a> Iterator for Interval<'a> {
    type Item = &'a Arc<ChangeEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for Interval<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back()
    }
}

impl ExactSizeIterator for Interval<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{AttrExtractor, NamespacedExtractor, Object};

    fn element(name: &str, revision: u64) -> Arc<StoreElement> {
        let ex = NamespacedExtractor::new("/pods");
        Arc::new(
            ex.element(Object::new(name).with_namespace("ns").at_revision(revision))
                .unwrap(),
        )
    }

    fn event(kind: EventType, revision: u64, at: Instant) -> ChangeEvent {
        ChangeEvent {
            event_type: kind,
            revision,
            object: Some(element("pod", revision)),
            prev_object: None,
            recorded_at: at,
        }
    }

    fn store(capacity: usize) -> EventStore {
        EventStore::new(&WatchCacheConfig::with_fixed_capacity(capacity))
    }

    fn revisions(store: &EventStore, after: u64) -> Vec<u64> {
        store
            .interval(after)
            .unwrap()
            .map(|e| e.revision)
            .collect()
    }

    #[test]
    fn test_empty_store_is_uninitialized() {
        let store = store(2);
        assert!(matches!(store.interval(0), Err(WatchCacheError::Uninitialized)));
    }

    #[test]
    fn test_capacity_eviction_boundary() {
        let now = Instant::now();
        let mut store = store(2);
        store.append(event(EventType::Added, 1, now)).unwrap();
        store.append(event(EventType::Modified, 2, now)).unwrap();
        store.append(event(EventType::Modified, 3, now)).unwrap();

        assert!(matches!(
            store.interval(1),
            Err(WatchCacheError::TooOld { requested: 1, oldest: 2 })
        ));
        assert_eq!(revisions(&store, 2), vec![3]);
        assert_eq!(revisions(&store, 3), Vec::<u64>::new());
        assert_eq!(store.boundary_revision(), Some(2));
    }

    #[test]
    fn test_before_eviction_first_minus_one_is_valid() {
        let now = Instant::now();
        let mut store = store(4);
        store.append(event(EventType::Added, 5, now)).unwrap();
        store.append(event(EventType::Modified, 7, now)).unwrap();
        assert_eq!(revisions(&store, 4), vec![5, 7]);
        assert_eq!(revisions(&store, 6), vec![7]);
        assert!(store.interval(3).is_err());
    }

    #[test]
    fn test_replace_marker_is_valid_with_no_events() {
        let mut store = store(4);
        store.reset(10);
        assert_eq!(revisions(&store, 10), Vec::<u64>::new());
        assert!(store.interval(9).is_err());
        assert_eq!(store.last_revision(), Some(10));
    }

    #[test]
    fn test_rejects_non_increasing_revision() {
        let now = Instant::now();
        let mut store = store(4);
        store.reset(5);
        assert!(store.append(event(EventType::Added, 5, now)).is_err());
        store.append(event(EventType::Added, 6, now)).unwrap();
        assert!(store.append(event(EventType::Added, 6, now)).is_err());
    }

    #[test]
    fn test_bookmark_at_boundary_answers_empty() {
        let now = Instant::now();
        let mut store = store(2);
        store.append(event(EventType::Added, 1, now)).unwrap();
        store.append(event(EventType::Modified, 2, now)).unwrap();
        store.append(ChangeEvent::bookmark(3, now)).unwrap();
        // Revision 1 evicted; the bookmark at 3 is the newest event.
        assert_eq!(revisions(&store, 3), Vec::<u64>::new());
    }

    #[test]
    fn test_grows_while_events_are_fresh() {
        let now = Instant::now();
        let mut store = EventStore::new(&WatchCacheConfig {
            initial_capacity: 2,
            lower_bound_capacity: 2,
            upper_bound_capacity: 8,
            ..Default::default()
        });
        for rev in 1..=6 {
            store.append(event(EventType::Added, rev, now)).unwrap();
        }
        assert_eq!(store.capacity(), 8);
        assert_eq!(revisions(&store, 0), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_shrinks_when_history_is_stale() {
        let start = Instant::now();
        let mut store = EventStore::new(&WatchCacheConfig {
            initial_capacity: 8,
            lower_bound_capacity: 2,
            upper_bound_capacity: 8,
            event_fresh_duration_ms: 1_000,
            ..Default::default()
        });
        for rev in 1..=8 {
            store.append(event(EventType::Added, rev, start)).unwrap();
        }
        let later = start + Duration::from_secs(5);
        store.append(event(EventType::Added, 9, later)).unwrap();
        assert!(store.capacity() < 8);
        // Stale events are trimmed, the newest survives.
        assert_eq!(revisions(&store, 8), vec![9]);
    }

    #[test]
    fn test_trim_expired_keeps_newest() {
        let start = Instant::now();
        let mut store = EventStore::new(&WatchCacheConfig {
            event_fresh_duration_ms: 1_000,
            ..Default::default()
        });
        store.append(event(EventType::Added, 1, start)).unwrap();
        store.append(event(EventType::Modified, 2, start)).unwrap();
        let dropped = store.trim_expired(start + Duration::from_secs(10));
        assert_eq!(dropped, 1);
        assert_eq!(store.len(), 1);
        assert!(store.interval(1).is_ok());
        assert!(store.interval(0).is_err());
    }

    #[test]
    fn test_events_since_filters_by_predicate() {
        use crate::selector::Selector;
        let now = Instant::now();
        let mut store = store(8);
        let ex = NamespacedExtractor::new("/pods");
        let web = Arc::new(
            ex.element(Object::new("a").with_label("app", "web").at_revision(1))
                .unwrap(),
        );
        let db = Arc::new(
            ex.element(Object::new("b").with_label("app", "db").at_revision(2))
                .unwrap(),
        );
        store
            .append(ChangeEvent {
                event_type: EventType::Added,
                revision: 1,
                object: Some(web),
                prev_object: None,
                recorded_at: now,
            })
            .unwrap();
        store
            .append(ChangeEvent {
                event_type: EventType::Added,
                revision: 2,
                object: Some(db),
                prev_object: None,
                recorded_at: now,
            })
            .unwrap();
        let pred = SelectionPredicate::everything()
            .with_label_selector(Selector::from_set([("app", "web")]));
        let matched: Vec<u64> = store
            .events_since(0, &pred)
            .unwrap()
            .map(|e| e.revision)
            .collect();
        assert_eq!(matched, vec![1]);
    }

    #[test]
    fn test_interval_is_double_ended() {
        let now = Instant::now();
        let mut store = store(8);
        for rev in 1..=4 {
            store.append(event(EventType::Added, rev, now)).unwrap();
        }
        let newest_first: Vec<u64> = store.interval(1).unwrap().rev().map(|e| e.revision).collect();
        assert_eq!(newest_first, vec![4, 3, 2]);
        assert_eq!(store.interval(1).unwrap().len(), 3);
    }
}
