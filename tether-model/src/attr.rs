//! Attribute records and their namespaced collections.
//!
//! - [`Attr`]: a plain `(key, value, frozen)` record as written by callers
//! - [`VAttr`]: an `Attr` stamped with the revisions at which it was created and last updated
//! - [`Table`]: all `VAttr`s of one namespace
//! - [`Catalog`]: every namespace of a session, each table shared copy-on-write
//! - [`Diff`]: the entries changed by one mutation

use crate::error::SessionError;
use crate::types::RevisionNumber;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A single attribute as submitted by a writer or returned to a reader.
///
/// An empty value is a valid state. Keys that were never set read as empty and non-frozen.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attr {
    pub key: String,
    pub value: String,
    pub frozen: bool,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into(), frozen: false }
    }

    /// An attribute whose value can never change again once written.
    pub fn frozen(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into(), frozen: true }
    }

    /// The value a never-set key reads as.
    pub fn empty(key: impl Into<String>) -> Self {
        Self { key: key.into(), value: String::new(), frozen: false }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// True if `other` carries the same value and freeze state (keys are not compared).
    pub fn same_state(&self, other: &Attr) -> bool {
        self.value == other.value && self.frozen == other.frozen
    }
}

/// How a versioned attribute looks from a given revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visibility {
    /// The key did not exist yet; it reads as empty.
    Absent,
    /// The stored value is the value at that revision.
    Current,
    /// The value changed after that revision and the earlier value is unknown.
    Stale,
}

/// An attribute stamped with the revision that created it and the one that last changed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VAttr {
    pub attr: Attr,
    pub created_at: RevisionNumber,
    pub updated_at: RevisionNumber,
}

impl VAttr {
    pub fn new(attr: Attr, created_at: RevisionNumber, updated_at: RevisionNumber) -> Self {
        debug_assert!(updated_at >= created_at);
        Self { attr, created_at, updated_at }
    }

    pub fn key(&self) -> &str {
        &self.attr.key
    }

    pub fn is_frozen(&self) -> bool {
        self.attr.frozen
    }

    /// Freshness test: can this record answer a read at `revision`?
    ///
    /// Frozen values never change after they are written, so they stay current
    /// even for revisions before their last update.
    pub fn visibility_at(&self, revision: RevisionNumber) -> Visibility {
        if self.created_at > revision {
            Visibility::Absent
        } else if self.updated_at > revision && !self.attr.frozen {
            Visibility::Stale
        } else {
            Visibility::Current
        }
    }
}

static NAMESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-:]+$").expect("namespace pattern is valid"));

/// An application-chosen partition of a session's attributes.
///
/// Non-empty, matching `[A-Za-z0-9_.\-:]+`, and not starting with `_` (reserved).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self, SessionError> {
        let name = name.into();
        if name.starts_with('_') || !NAMESPACE_RE.is_match(&name) {
            return Err(SessionError::InvalidNamespace(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Namespace {
    type Error = SessionError;
    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::new(name)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

/// All attributes of one namespace, keyed by attribute key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Table {
    entries: HashMap<String, VAttr>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&VAttr> {
        self.entries.get(key)
    }

    /// Insert or replace the entry for `vattr.attr.key`.
    pub fn insert(&mut self, vattr: VAttr) {
        self.entries.insert(vattr.attr.key.clone(), vattr);
    }

    pub fn iter(&self) -> impl Iterator<Item = &VAttr> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every namespace table of a session as of some revision.
///
/// Tables are shared behind `Arc`; replacing one namespace with [`Catalog::with_table`]
/// leaves snapshots held by readers untouched.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    namespaces: HashMap<Namespace, Arc<Table>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, namespace: &Namespace) -> Option<&Arc<Table>> {
        self.namespaces.get(namespace)
    }

    /// Look up one attribute.
    pub fn get(&self, namespace: &Namespace, key: &str) -> Option<&VAttr> {
        self.namespaces.get(namespace).and_then(|t| t.get(key))
    }

    /// A new catalog sharing every table except `namespace`, which becomes `table`.
    pub fn with_table(&self, namespace: Namespace, table: Table) -> Catalog {
        let mut namespaces = self.namespaces.clone();
        namespaces.insert(namespace, Arc::new(table));
        Catalog { namespaces }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &Namespace> {
        self.namespaces.keys()
    }
}

/// The attribute changes produced by one update or clear.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diff {
    pub namespace: Namespace,
    pub revision: RevisionNumber,
    pub entries: Vec<VAttr>,
}

impl Diff {
    pub fn new(namespace: Namespace, revision: RevisionNumber) -> Self {
        Self { namespace, revision, entries: Vec::new() }
    }

    /// Record a change, replacing an earlier entry for the same key.
    pub fn push(&mut self, vattr: VAttr) {
        match self.entries.iter_mut().find(|e| e.attr.key == vattr.attr.key) {
            Some(existing) => *existing = vattr,
            None => self.entries.push(vattr),
        }
    }

    /// Entries whose key first appeared in this revision.
    pub fn created(&self) -> impl Iterator<Item = &VAttr> {
        let revision = self.revision;
        self.entries.iter().filter(move |e| e.created_at == revision)
    }

    /// Entries for keys that already existed before this revision.
    pub fn updated(&self) -> impl Iterator<Item = &VAttr> {
        let revision = self.revision;
        self.entries.iter().filter(move |e| e.created_at != revision)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_validation() {
        for ok in ["app", "app.v2", "chat:room-1", "A_b"] {
            assert!(Namespace::new(ok).is_ok(), "{} should be valid", ok);
        }
        for bad in ["", "_internal", "has space", "slash/ns", "émoji"] {
            assert!(
                matches!(Namespace::new(bad), Err(SessionError::InvalidNamespace(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_visibility_at() {
        let v = VAttr::new(Attr::new("a", "1"), 3, 5);
        assert_eq!(v.visibility_at(2), Visibility::Absent);
        assert_eq!(v.visibility_at(3), Visibility::Stale);
        assert_eq!(v.visibility_at(5), Visibility::Current);
        assert_eq!(v.visibility_at(9), Visibility::Current);

        let frozen = VAttr::new(Attr::frozen("a", "1"), 3, 5);
        assert_eq!(frozen.visibility_at(4), Visibility::Current);
        assert_eq!(frozen.visibility_at(2), Visibility::Absent);
    }

    #[test]
    fn test_catalog_with_table_shares_other_namespaces() {
        let ns_a = Namespace::new("a").unwrap();
        let ns_b = Namespace::new("b").unwrap();
        let mut table = Table::new();
        table.insert(VAttr::new(Attr::new("k", "v"), 1, 1));
        let first = Catalog::new().with_table(ns_a.clone(), table.clone());
        let second = first.with_table(ns_b.clone(), Table::new());

        assert!(Arc::ptr_eq(first.table(&ns_a).unwrap(), second.table(&ns_a).unwrap()));
        assert!(first.table(&ns_b).is_none());
        assert_eq!(second.get(&ns_a, "k").unwrap().attr.value, "v");
    }

    #[test]
    fn test_diff_splits_created_and_updated() {
        let ns = Namespace::new("app").unwrap();
        let mut diff = Diff::new(ns, 4);
        diff.push(VAttr::new(Attr::new("new", "x"), 4, 4));
        diff.push(VAttr::new(Attr::new("old", "y"), 2, 4));
        diff.push(VAttr::new(Attr::new("new", "z"), 4, 4));

        assert_eq!(diff.len(), 2);
        let created: Vec<_> = diff.created().map(|e| e.attr.value.as_str()).collect();
        let updated: Vec<_> = diff.updated().map(|e| e.key()).collect();
        assert_eq!(created, vec!["z"]);
        assert_eq!(updated, vec!["old"]);
    }
}
