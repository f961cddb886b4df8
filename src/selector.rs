// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Label and field selectors.
//!
//! # Grammar
//!
//! A selector is a comma separated list of requirements, all of which must hold:
//!
//! | Form | Requirement |
//! |---|---|
//! | `k=v`, `k==v` | value equals `v` |
//! | `k!=v` | value differs from `v` (or key absent) |
//! | `k in (a,b)` | value is one of the set |
//! | `k notin (a,b)` | value is none of the set (or key absent) |
//! | `k` | key present |
//! | `!k` | key absent |
//!
//! The empty string parses to the selector that matches everything.
//!
//! ```
//! use watch_cache::Selector;
//! use std::collections::BTreeMap;
//!
//! let sel = Selector::parse("app=web, tier in (front,back), !canary").unwrap();
//! let mut labels = BTreeMap::new();
//! labels.insert("app".to_string(), "web".to_string());
//! labels.insert("tier".to_string(), "front".to_string());
//! assert!(sel.matches(&labels));
//! assert_eq!(sel.exact_match_values("app"), Some(vec!["web".to_string()]));
//! ```

use std::fmt;

use crate::error::WatchCacheError;
use crate::object::{Attrs, StoreElement};
use crate::snapshot::index::{field_index_name, label_index_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    Exists(String),
    DoesNotExist(String),
}

impl Requirement {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Equals(k, _)
            | Self::NotEquals(k, _)
            | Self::In(k, _)
            | Self::NotIn(k, _)
            | Self::Exists(k)
            | Self::DoesNotExist(k) => k,
        }
    }

    #[must_use]
    pub fn matches(&self, attrs: &Attrs) -> bool {
        let value = attrs.get(self.key());
        match self {
            Self::Equals(_, v) => value == Some(v),
            Self::NotEquals(_, v) => value != Some(v),
            Self::In(_, vs) => value.is_some_and(|x| vs.contains(x)),
            Self::NotIn(_, vs) => value.map_or(true, |x| !vs.contains(x)),
            Self::Exists(_) => value.is_some(),
            Self::DoesNotExist(_) => value.is_none(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{k}={v}"),
            Self::NotEquals(k, v) => write!(f, "{k}!={v}"),
            Self::In(k, vs) => write!(f, "{k} in ({})", vs.join(",")),
            Self::NotIn(k, vs) => write!(f, "{k} notin ({})", vs.join(",")),
            Self::Exists(k) => write!(f, "{k}"),
            Self::DoesNotExist(k) => write!(f, "!{k}"),
        }
    }
}

/// Conjunction of requirements over one attribute set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Equality selector from `(key, value)` pairs.
    #[must_use]
    pub fn from_set<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            requirements: pairs
                .into_iter()
                .map(|(k, v)| Requirement::Equals(k.into(), v.into()))
                .collect(),
        }
    }

    pub fn parse(input: &str) -> Result<Self, WatchCacheError> {
        let mut requirements = Vec::new();
        for term in split_terms(input)? {
            let term = term.trim();
            if term.is_empty() {
                if input.trim().is_empty() {
                    continue;
                }
                return Err(invalid(input, "empty requirement"));
            }
            requirements.push(parse_requirement(term).map_err(|reason| invalid(input, reason))?);
        }
        Ok(Self { requirements })
    }

    #[must_use]
    pub fn is_everything(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn matches(&self, attrs: &Attrs) -> bool {
        self.requirements.iter().all(|r| r.matches(attrs))
    }

    /// Values `key` is pinned to by an `=`/`==`/`in` requirement, if any.
    #[must_use]
    pub fn exact_match_values(&self, key: &str) -> Option<Vec<String>> {
        self.requirements.iter().find_map(|r| match r {
            Requirement::Equals(k, v) if k == key => Some(vec![v.clone()]),
            Requirement::In(k, vs) if k == key => Some(vs.clone()),
            _ => None,
        })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

fn invalid(input: &str, reason: &str) -> WatchCacheError {
    WatchCacheError::InvalidInput(format!("selector {input:?}: {reason}"))
}

/// Split on commas that are not inside a value set.
fn split_terms(input: &str) -> Result<Vec<&str>, WatchCacheError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| invalid(input, "unbalanced ')'"))?;
            }
            ',' if depth == 0 => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(invalid(input, "unbalanced '('"));
    }
    terms.push(&input[start..]);
    Ok(terms)
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
}

fn checked_key(key: &str) -> Result<String, &'static str> {
    let key = key.trim();
    if valid_key(key) {
        Ok(key.to_string())
    } else {
        Err("invalid key")
    }
}

fn parse_set(rest: &str) -> Result<Vec<String>, &'static str> {
    let rest = rest.trim();
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or("set must be parenthesised")?;
    let values: Vec<String> = inner.split(',').map(|v| v.trim().to_string()).collect();
    if values.iter().any(String::is_empty) {
        return Err("empty value in set");
    }
    Ok(values)
}

fn parse_requirement(term: &str) -> Result<Requirement, &'static str> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Requirement::DoesNotExist(checked_key(key)?));
    }
    if let Some((key, rest)) = term.split_once(" notin ") {
        return Ok(Requirement::NotIn(checked_key(key)?, parse_set(rest)?));
    }
    if let Some((key, rest)) = term.split_once(" in ") {
        return Ok(Requirement::In(checked_key(key)?, parse_set(rest)?));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Requirement::NotEquals(checked_key(key)?, value.trim().to_string()));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        let value = value.trim();
        if value.contains('=') {
            return Err("unexpected '='");
        }
        return Ok(Requirement::Equals(checked_key(key)?, value.to_string()));
    }
    Ok(Requirement::Exists(checked_key(term)?))
}

/// Label + field selector, plus hints naming which attributes may be
/// answered from a secondary index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionPredicate {
    pub label: Selector,
    pub field: Selector,
    /// Label keys eligible for `l:<label>` index lookup, in preference order
    pub index_labels: Vec<String>,
    /// Field paths eligible for `f:<field>` index lookup, in preference order
    pub index_fields: Vec<String>,
}

impl SelectionPredicate {
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_label_selector(mut self, selector: Selector) -> Self {
        self.label = selector;
        self
    }

    #[must_use]
    pub fn with_field_selector(mut self, selector: Selector) -> Self {
        self.field = selector;
        self
    }

    #[must_use]
    pub fn with_index_label(mut self, label: impl Into<String>) -> Self {
        self.index_labels.push(label.into());
        self
    }

    #[must_use]
    pub fn with_index_field(mut self, field: impl Into<String>) -> Self {
        self.index_fields.push(field.into());
        self
    }

    #[must_use]
    pub fn is_everything(&self) -> bool {
        self.label.is_everything() && self.field.is_everything()
    }

    #[must_use]
    pub fn matches_attrs(&self, labels: &Attrs, fields: &Attrs) -> bool {
        self.label.matches(labels) && self.field.matches(fields)
    }

    #[must_use]
    pub fn matches(&self, element: &StoreElement) -> bool {
        self.matches_attrs(&element.labels, &element.fields)
    }

    /// Index lookups this predicate can be answered from: `(index name, values)`,
    /// label indexes first, each group in hint order.
    #[must_use]
    pub fn index_candidates(&self) -> Vec<(String, Vec<String>)> {
        let labels = self.index_labels.iter().filter_map(|label| {
            self.label
                .exact_match_values(label)
                .map(|values| (label_index_name(label), values))
        });
        let fields = self.index_fields.iter().filter_map(|field| {
            self.field
                .exact_match_values(field)
                .map(|values| (field_index_name(field), values))
        });
        labels.chain(fields).collect()
    }

    pub fn validate(&self) -> Result<(), WatchCacheError> {
        if let Some(bad) = self
            .index_labels
            .iter()
            .chain(&self.index_fields)
            .find(|hint| !valid_key(hint))
        {
            return Err(WatchCacheError::InvalidInput(format!(
                "invalid index hint {bad:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attrs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_empty_matches_everything() {
        let sel = Selector::parse("").unwrap();
        assert!(sel.is_everything());
        assert!(sel.matches(&attrs(&[("a", "b")])));
    }

    #[test]
    fn test_parse_all_forms() {
        let sel = Selector::parse("a=1,b==2,c!=3,d in (x, y),e notin (z),f,!g").unwrap();
        assert_eq!(sel.requirements().len(), 7);
        assert_eq!(sel.requirements()[0], Requirement::Equals("a".into(), "1".into()));
        assert_eq!(sel.requirements()[1], Requirement::Equals("b".into(), "2".into()));
        assert_eq!(
            sel.requirements()[3],
            Requirement::In("d".into(), vec!["x".into(), "y".into()])
        );
        assert_eq!(sel.requirements()[6], Requirement::DoesNotExist("g".into()));
        assert_eq!(sel.to_string(), "a=1,b=2,c!=3,d in (x,y),e notin (z),f,!g");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["a=1,", "=v", "a in x", "a in (x", "a=b=c", "a in ()", "a b"] {
            assert!(
                matches!(Selector::parse(bad), Err(WatchCacheError::InvalidInput(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_negative_requirements_match_missing_keys() {
        let sel = Selector::parse("env!=prod,tier notin (db)").unwrap();
        assert!(sel.matches(&attrs(&[])));
        assert!(!sel.matches(&attrs(&[("env", "prod")])));
        assert!(!sel.matches(&attrs(&[("tier", "db")])));
    }

    #[test]
    fn test_exact_match_values() {
        let sel = Selector::parse("a in (x,y),b!=z").unwrap();
        assert_eq!(sel.exact_match_values("a"), Some(vec!["x".into(), "y".into()]));
        assert_eq!(sel.exact_match_values("b"), None);
        assert_eq!(sel.exact_match_values("c"), None);
    }

    #[test]
    fn test_index_candidates_prefer_labels() {
        let pred = SelectionPredicate::everything()
            .with_label_selector(Selector::from_set([("label", "v1")]))
            .with_field_selector(Selector::from_set([("spec.nodeName", "node2")]))
            .with_index_field("spec.nodeName")
            .with_index_label("label");
        let candidates = pred.index_candidates();
        assert_eq!(candidates[0], ("l:label".to_string(), vec!["v1".to_string()]));
        assert_eq!(candidates[1], ("f:spec.nodeName".to_string(), vec!["node2".to_string()]));
    }

    #[test]
    fn test_index_candidates_need_pinned_values() {
        let pred = SelectionPredicate::everything()
            .with_label_selector(Selector::parse("label!=v1").unwrap())
            .with_index_label("label");
        assert!(pred.index_candidates().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_hint() {
        let pred = SelectionPredicate::everything().with_index_label("bad key");
        assert!(pred.validate().is_err());
        assert!(SelectionPredicate::everything().validate().is_ok());
    }
}
