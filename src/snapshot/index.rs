// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Secondary index definitions and buckets.
//!
//! Label indexes are named `l:<label>`, field indexes `f:<field>`. An element
//! without the indexed label is simply absent from the index; field indexes
//! always carry a value (possibly empty).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::WatchCacheError;
use crate::object::StoreElement;

/// Extracts the index values of one element.
pub type IndexFunc =
    Arc<dyn Fn(&StoreElement) -> Result<Vec<String>, WatchCacheError> + Send + Sync>;

#[must_use]
pub fn label_index_name(label: &str) -> String {
    format!("l:{label}")
}

#[must_use]
pub fn field_index_name(field: &str) -> String {
    format!("f:{field}")
}

/// A named index extractor, registered at construction time.
#[derive(Clone)]
pub struct IndexSpec {
    name: String,
    func: IndexFunc,
}

impl IndexSpec {
    #[must_use]
    pub fn label(label: impl Into<String>) -> Self {
        let label: String = label.into();
        let name = label_index_name(&label);
        Self {
            name,
            func: Arc::new(move |el: &StoreElement| {
                Ok(el.labels.get(&label).cloned().into_iter().collect())
            }),
        }
    }

    #[must_use]
    pub fn field(field: impl Into<String>) -> Self {
        let field: String = field.into();
        let name = field_index_name(&field);
        Self {
            name,
            func: Arc::new(move |el: &StoreElement| {
                Ok(vec![el.fields.get(&field).cloned().unwrap_or_default()])
            }),
        }
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&StoreElement) -> Result<Vec<String>, WatchCacheError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self, element: &StoreElement) -> Result<Vec<String>, WatchCacheError> {
        (self.func)(element)
    }
}

impl fmt::Debug for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSpec").field("name", &self.name).finish()
    }
}

/// value → keys, plus the reverse map so an update can leave its old buckets.
#[derive(Debug)]
pub(crate) struct Index {
    pub(crate) spec: IndexSpec,
    buckets: HashMap<String, BTreeSet<String>>,
    values_by_key: HashMap<String, Vec<String>>,
}

impl Index {
    pub(crate) fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            buckets: HashMap::new(),
            values_by_key: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, key: &str, values: Vec<String>) {
        for value in &values {
            self.buckets
                .entry(value.clone())
                .or_default()
                .insert(key.to_string());
        }
        if !values.is_empty() {
            self.values_by_key.insert(key.to_string(), values);
        }
    }

    pub(crate) fn remove(&mut self, key: &str) {
        let Some(values) = self.values_by_key.remove(key) else {
            return;
        };
        for value in values {
            if let Some(bucket) = self.buckets.get_mut(&value) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(&value);
                }
            }
        }
    }

    pub(crate) fn keys(&self, value: &str) -> Option<&BTreeSet<String>> {
        self.buckets.get(value)
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
        self.values_by_key.clear();
    }
}
