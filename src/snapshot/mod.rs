// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Point-in-time key → element map with secondary indexes.
//!
//! Every mutation keeps all registered indexes in step: index values for
//! the new element are computed first, so a failing extractor leaves the
//! snapshot untouched.
//!
//! # Listing
//!
//! ```text
//! predicate ──► index_candidates() ──► first registered index?
//!                                       │yes                 │no
//!                                       ▼                    ▼
//!                               union of buckets        full scan
//!                                       └──── filter by full predicate ────► sorted by key
//! ```

pub mod index;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::warn;

use crate::error::WatchCacheError;
use crate::object::StoreElement;
use crate::selector::SelectionPredicate;

pub use index::{field_index_name, label_index_name, IndexFunc, IndexSpec};
use index::Index;

#[derive(Debug)]
pub struct IndexedSnapshot {
    items: HashMap<String, Arc<StoreElement>>,
    indexes: Vec<Index>,
    revision: u64,
}

impl IndexedSnapshot {
    /// Empty snapshot with the given indexes. Index names must be unique.
    pub fn new(specs: Vec<IndexSpec>) -> Result<Self, WatchCacheError> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            if !seen.insert(spec.name().to_string()) {
                return Err(WatchCacheError::InvalidInput(format!(
                    "duplicate index {:?}",
                    spec.name()
                )));
            }
        }
        Ok(Self {
            items: HashMap::new(),
            indexes: specs.into_iter().map(Index::new).collect(),
            revision: 0,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<StoreElement>> {
        self.items.get(key).cloned()
    }

    pub fn add(&mut self, element: Arc<StoreElement>) -> Result<Option<Arc<StoreElement>>, WatchCacheError> {
        self.upsert(element)
    }

    pub fn update(&mut self, element: Arc<StoreElement>) -> Result<Option<Arc<StoreElement>>, WatchCacheError> {
        self.upsert(element)
    }

    /// Insert or replace, returning the previous element.
    pub fn upsert(
        &mut self,
        element: Arc<StoreElement>,
    ) -> Result<Option<Arc<StoreElement>>, WatchCacheError> {
        let values = self
            .indexes
            .iter()
            .map(|i| i.spec.values(&element))
            .collect::<Result<Vec<_>, _>>()?;
        let key = element.key.clone();
        for (index, values) in self.indexes.iter_mut().zip(values) {
            index.remove(&key);
            index.insert(&key, values);
        }
        Ok(self.items.insert(key, element))
    }

    pub fn delete(&mut self, key: &str) -> Option<Arc<StoreElement>> {
        let removed = self.items.remove(key)?;
        for index in &mut self.indexes {
            index.remove(key);
        }
        Some(removed)
    }

    /// Swap in a complete new content set and rebuild every index.
    ///
    /// Elements whose index extraction fails are skipped; the count is returned.
    pub fn replace(&mut self, elements: Vec<Arc<StoreElement>>, revision: u64) -> usize {
        self.items.clear();
        for index in &mut self.indexes {
            index.clear();
        }
        let mut skipped = 0;
        for element in elements {
            if let Err(e) = self.upsert(element.clone()) {
                warn!(key = %element.key, error = %e, "Skipping object with failing index extractor");
                skipped += 1;
            }
        }
        self.revision = revision;
        skipped
    }

    /// All elements, unordered.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<StoreElement>> {
        self.items.values()
    }

    /// Elements under `prefix` matching `predicate`, ordered by key, plus the
    /// name of the index used (None for a full scan).
    #[must_use]
    pub fn list(
        &self,
        prefix: &str,
        predicate: &SelectionPredicate,
    ) -> (Vec<Arc<StoreElement>>, Option<String>) {
        let in_scope = |el: &Arc<StoreElement>| el.key.starts_with(prefix) && predicate.matches(el);

        for (name, values) in predicate.index_candidates() {
            let Some(index) = self.indexes.iter().find(|i| i.spec.name() == name) else {
                continue;
            };
            let keys: BTreeSet<&String> = values
                .iter()
                .filter_map(|v| index.keys(v))
                .flatten()
                .collect();
            let items = keys
                .into_iter()
                .filter_map(|k| self.items.get(k))
                .filter(|el| in_scope(*el))
                .cloned()
                .collect();
            return (items, Some(name));
        }

        let mut items: Vec<_> = self
            .items
            .values()
            .filter(|el| in_scope(*el))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        (items, None)
    }

    /// Elements whose `index` value is `value`, ordered by key.
    pub fn by_index(&self, index: &str, value: &str) -> Result<Vec<Arc<StoreElement>>, WatchCacheError> {
        let index = self
            .indexes
            .iter()
            .find(|i| i.spec.name() == index)
            .ok_or_else(|| WatchCacheError::InvalidInput(format!("no index named {index:?}")))?;
        Ok(index
            .keys(value)
            .into_iter()
            .flatten()
            .filter_map(|k| self.items.get(k).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{AttrExtractor, NamespacedExtractor, Object};
    use crate::selector::Selector;
    use serde_json::json;

    fn pod(name: &str, label: &str, node: &str) -> Arc<StoreElement> {
        Arc::new(
            NamespacedExtractor::new("/pods")
                .with_field("spec.nodeName")
                .element(
                    Object::new(name)
                        .with_namespace("ns")
                        .with_label("label", label)
                        .with_content(json!({"spec": {"nodeName": node}})),
                )
                .unwrap(),
        )
    }

    fn snapshot() -> IndexedSnapshot {
        let mut snap = IndexedSnapshot::new(vec![
            IndexSpec::label("label"),
            IndexSpec::field("spec.nodeName"),
        ])
        .unwrap();
        snap.add(pod("p1", "v1", "node1")).unwrap();
        snap.add(pod("p2", "v1", "node1")).unwrap();
        snap.add(pod("p3", "v2", "node2")).unwrap();
        snap
    }

    fn keys(items: &[Arc<StoreElement>]) -> Vec<&str> {
        items.iter().map(|e| e.key.as_str()).collect()
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let err = IndexedSnapshot::new(vec![IndexSpec::label("a"), IndexSpec::label("a")]);
        assert!(matches!(err, Err(WatchCacheError::InvalidInput(_))));
    }

    #[test]
    fn test_full_scan_is_key_ordered() {
        let snap = snapshot();
        let (items, index) = snap.list("/pods", &SelectionPredicate::everything());
        assert_eq!(keys(&items), vec!["/pods/ns/p1", "/pods/ns/p2", "/pods/ns/p3"]);
        assert!(index.is_none());
    }

    #[test]
    fn test_label_index_filters_by_full_predicate() {
        let snap = snapshot();
        let pred = SelectionPredicate::everything()
            .with_label_selector(Selector::from_set([("label", "v1")]))
            .with_field_selector(Selector::from_set([("spec.nodeName", "node2")]))
            .with_index_label("label")
            .with_index_field("spec.nodeName");
        let (items, index) = snap.list("/pods", &pred);
        assert!(items.is_empty());
        assert_eq!(index.as_deref(), Some("l:label"));
    }

    #[test]
    fn test_unregistered_candidate_falls_through() {
        let snap = snapshot();
        let pred = SelectionPredicate::everything()
            .with_label_selector(Selector::from_set([("other", "x")]))
            .with_field_selector(Selector::from_set([("spec.nodeName", "node1")]))
            .with_index_label("other")
            .with_index_field("spec.nodeName");
        let (items, index) = snap.list("/pods", &pred);
        assert!(items.is_empty());
        assert_eq!(index.as_deref(), Some("f:spec.nodeName"));
    }

    #[test]
    fn test_update_moves_between_buckets() {
        let mut snap = snapshot();
        let prev = snap.update(pod("p1", "v2", "node1")).unwrap();
        assert_eq!(prev.map(|p| p.labels["label"].clone()), Some("v1".into()));
        assert_eq!(keys(&snap.by_index("l:label", "v1").unwrap()), vec!["/pods/ns/p2"]);
        assert_eq!(
            keys(&snap.by_index("l:label", "v2").unwrap()),
            vec!["/pods/ns/p1", "/pods/ns/p3"]
        );
    }

    #[test]
    fn test_delete_leaves_indexes() {
        let mut snap = snapshot();
        assert!(snap.delete("/pods/ns/p3").is_some());
        assert!(snap.delete("/pods/ns/p3").is_none());
        assert!(snap.by_index("f:spec.nodeName", "node2").unwrap().is_empty());
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn test_failing_extractor_leaves_snapshot_untouched() {
        let mut snap = IndexedSnapshot::new(vec![IndexSpec::custom("strict", |el: &StoreElement| {
            el.labels
                .get("required")
                .map(|v| vec![v.clone()])
                .ok_or_else(|| WatchCacheError::Extraction("missing required".into()))
        })])
        .unwrap();
        assert!(snap.add(pod("p1", "v1", "n")).is_err());
        assert!(snap.is_empty());
    }

    #[test]
    fn test_replace_rebuilds() {
        let mut snap = snapshot();
        let skipped = snap.replace(vec![pod("p9", "v3", "node9")], 42);
        assert_eq!(skipped, 0);
        assert_eq!(snap.revision(), 42);
        assert_eq!(snap.len(), 1);
        assert!(snap.by_index("l:label", "v1").unwrap().is_empty());
        assert_eq!(keys(&snap.by_index("l:label", "v3").unwrap()), vec!["/pods/ns/p9"]);
    }

    #[test]
    fn test_unknown_index_is_invalid_input() {
        let snap = snapshot();
        assert!(matches!(
            snap.by_index("l:nope", "x"),
            Err(WatchCacheError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_prefix_scopes_listing() {
        let snap = snapshot();
        let (items, _) = snap.list("/pods/other", &SelectionPredicate::everything());
        assert!(items.is_empty());
    }
}
