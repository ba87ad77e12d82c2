//! Prop maps - insertion-ordered key/value attributes on virtual nodes.
//!
//! Order matters: the prop diff patches keys in declared order (with
//! `value` deferred to last), so the map preserves insertion order.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::collections::Value;

/// Keys that describe the vnode itself and never reach the host.
pub fn is_reserved_prop(key: &str) -> bool {
    matches!(key, "key" | "ref")
}

/// Ordered attribute map of a virtual node.
#[derive(Clone, Default)]
pub struct PropMap {
    entries: IndexMap<Rc<str>, Value>,
}

impl PropMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.insert(Rc::from(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_ref(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_ref())
    }
}

impl PartialEq for PropMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl std::fmt::Debug for PropMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for PropMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = PropMap::new();
        for (k, v) in iter {
            map.set(k.as_ref(), v);
        }
        map
    }
}

/// Shorthand for an empty prop map to build on.
pub fn props() -> PropMap {
    PropMap::new()
}
