// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cached objects and attribute extraction.
//!
//! An [`Object`] is what the store of record holds. A [`StoreElement`] is the
//! cached, immutable view of one object at one revision: the object plus its
//! storage key and the label/field sets that selectors and indexes evaluate.
//!
//! Extraction is injectable through [`AttrExtractor`]. The default
//! [`NamespacedExtractor`] keys objects as `<prefix>/<namespace>/<name>`.
//!
//! ```
//! use watch_cache::{AttrExtractor, NamespacedExtractor, Object};
//! use serde_json::json;
//!
//! let extractor = NamespacedExtractor::new("/pods").with_field("spec.nodeName");
//! let pod = Object::new("p1")
//!     .with_namespace("ns")
//!     .with_label("app", "web")
//!     .with_content(json!({"spec": {"nodeName": "node1"}}));
//!
//! let element = extractor.element(pod).unwrap();
//! assert_eq!(element.key, "/pods/ns/p1");
//! assert_eq!(element.fields.get("spec.nodeName").map(String::as_str), Some("node1"));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WatchCacheError;

/// Label or field set: attribute name to value.
pub type Attrs = BTreeMap<String, String>;

/// An object as held by the store of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Optional namespace (cluster-scoped objects have none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    /// Revision at which this version of the object was written
    #[serde(default)]
    pub revision: u64,

    #[serde(default)]
    pub labels: Attrs,

    /// Arbitrary payload (spec/status)
    #[serde(default)]
    pub content: Value,
}

impl Object {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            revision: 0,
            labels: Attrs::new(),
            content: Value::Null,
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    #[must_use]
    pub fn at_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }

    /// Look up a dotted path (`spec.nodeName`) inside the content.
    #[must_use]
    pub fn content_path(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.content, |value, segment| value.get(segment))
    }
}

/// Cached view of one object at one revision. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreElement {
    pub key: String,
    pub object: Arc<Object>,
    pub labels: Attrs,
    pub fields: Attrs,
}

impl StoreElement {
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.object.revision
    }
}

/// Derives the storage key and selectable attributes of an object.
pub trait AttrExtractor: Send + Sync {
    fn key(&self, object: &Object) -> Result<String, WatchCacheError>;

    /// Returns `(labels, fields)`.
    fn attrs(&self, object: &Object) -> Result<(Attrs, Attrs), WatchCacheError>;

    fn element(&self, object: Object) -> Result<StoreElement, WatchCacheError> {
        let key = self.key(&object)?;
        let (labels, fields) = self.attrs(&object)?;
        Ok(StoreElement {
            key,
            object: Arc::new(object),
            labels,
            fields,
        })
    }
}

/// Keys objects under a resource prefix and exposes `metadata.*` plus any
/// registered content paths as fields.
#[derive(Debug, Clone)]
pub struct NamespacedExtractor {
    prefix: String,
    field_paths: Vec<String>,
}

impl NamespacedExtractor {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            field_paths: Vec::new(),
        }
    }

    /// Expose a dotted content path as a selectable field.
    #[must_use]
    pub fn with_field(mut self, path: impl Into<String>) -> Self {
        self.field_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

fn check_segment(kind: &str, value: &str) -> Result<(), WatchCacheError> {
    if value.is_empty() {
        return Err(WatchCacheError::Extraction(format!("{kind} must not be empty")));
    }
    if value.contains('/') || value == "." || value == ".." {
        return Err(WatchCacheError::Extraction(format!(
            "{kind} {value:?} is not a valid path segment"
        )));
    }
    Ok(())
}

impl AttrExtractor for NamespacedExtractor {
    fn key(&self, object: &Object) -> Result<String, WatchCacheError> {
        check_segment("name", &object.name)?;
        match &object.namespace {
            Some(ns) => {
                check_segment("namespace", ns)?;
                Ok(format!("{}/{}/{}", self.prefix, ns, object.name))
            }
            None => Ok(format!("{}/{}", self.prefix, object.name)),
        }
    }

    fn attrs(&self, object: &Object) -> Result<(Attrs, Attrs), WatchCacheError> {
        let mut fields = Attrs::new();
        fields.insert("metadata.name".into(), object.name.clone());
        fields.insert(
            "metadata.namespace".into(),
            object.namespace.clone().unwrap_or_default(),
        );
        for path in &self.field_paths {
            let value = match object.content_path(path) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            fields.insert(path.clone(), value);
        }
        Ok((object.labels.clone(), fields))
    }
}
