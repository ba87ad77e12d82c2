//! Object observer - reactive access to a keyed record.
//!
//! Every read routes through the cell's dep table and every write
//! classifies itself as ADD, SET, or DELETE before triggering. Nested
//! cells come back wrapped with the same readonly/shallow flags, lazily,
//! so deep reactivity costs nothing until a subtree is actually read.
//!
//! Raw identity invariants: `raw(reactive(x)) == x`,
//! `reactive(reactive(x)) == reactive(x)` (wrappers compare by raw
//! identity plus flags), and a skip-marked cell passes through unwrapped.

use std::collections::HashSet;
use std::rc::Rc;

use super::list::ReactiveList;
use super::value::{RawMap, TrackKey, Value};

/// A nested read result: scalars (and cells excluded from observation)
/// pass through plainly, observable cells come back wrapped.
#[derive(Clone, Debug, PartialEq)]
pub enum ReactiveValue {
    Plain(Value),
    Record(ReactiveRecord),
    List(ReactiveList),
}

impl ReactiveValue {
    /// Unwrap back to the underlying value.
    pub fn into_value(self) -> Value {
        match self {
            ReactiveValue::Plain(v) => v,
            ReactiveValue::Record(r) => Value::Map(r.raw()),
            ReactiveValue::List(l) => Value::List(l.raw()),
        }
    }

    pub fn as_record(&self) -> Option<&ReactiveRecord> {
        match self {
            ReactiveValue::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ReactiveList> {
        match self {
            ReactiveValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub(crate) fn traverse(&self, depth: u32, seen: &mut HashSet<usize>) {
        match self {
            ReactiveValue::Plain(_) => {}
            ReactiveValue::Record(r) => r.traverse(depth, seen),
            ReactiveValue::List(l) => l.traverse(depth, seen),
        }
    }
}

/// Reactive wrapper over a [`RawMap`] cell.
#[derive(Clone)]
pub struct ReactiveRecord {
    raw: RawMap,
    readonly: bool,
    shallow: bool,
}

impl PartialEq for ReactiveRecord {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
            && self.readonly == other.readonly
            && self.shallow == other.shallow
    }
}

impl std::fmt::Debug for ReactiveRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveRecord")
            .field("raw", &self.raw)
            .field("readonly", &self.readonly)
            .field("shallow", &self.shallow)
            .finish()
    }
}

impl ReactiveRecord {
    /// Deep reactive view of `raw`.
    pub fn new(raw: RawMap) -> Self {
        Self {
            raw,
            readonly: false,
            shallow: false,
        }
    }

    /// Deep readonly view: reads track, writes warn and are dropped.
    pub fn readonly(raw: RawMap) -> Self {
        Self {
            raw,
            readonly: true,
            shallow: false,
        }
    }

    /// Reactive at the first level only; nested cells pass through raw.
    pub fn shallow(raw: RawMap) -> Self {
        Self {
            raw,
            readonly: false,
            shallow: true,
        }
    }

    pub fn shallow_readonly(raw: RawMap) -> Self {
        Self {
            raw,
            readonly: true,
            shallow: true,
        }
    }

    /// Readonly view over the same cell (readonly composes over reactive).
    pub fn readonly_view(&self) -> ReactiveRecord {
        Self {
            raw: self.raw.clone(),
            readonly: true,
            shallow: self.shallow,
        }
    }

    /// The raw target. `raw(raw(x)) == raw(x)` holds trivially: a raw map
    /// unwraps to itself.
    pub fn raw(&self) -> RawMap {
        self.raw.clone()
    }

    pub fn is_reactive(&self) -> bool {
        !self.raw.is_skip()
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    fn wrap(&self, value: Value) -> ReactiveValue {
        if self.shallow {
            return ReactiveValue::Plain(value);
        }
        match value {
            Value::Map(m) if !m.is_skip() => ReactiveValue::Record(ReactiveRecord {
                raw: m,
                readonly: self.readonly,
                shallow: false,
            }),
            Value::List(l) if !l.is_skip() => ReactiveValue::List(if self.readonly {
                ReactiveList::readonly(l)
            } else {
                ReactiveList::new(l)
            }),
            other => ReactiveValue::Plain(other),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &str) -> Option<ReactiveValue> {
        if self.raw.is_skip() {
            return self.raw.borrow().get(key).cloned().map(ReactiveValue::Plain);
        }
        self.raw.cell.deps.track(TrackKey::Key(Rc::from(key)));
        let value = self.raw.borrow().get(key).cloned();
        value.map(|v| self.wrap(v))
    }

    pub fn has(&self, key: &str) -> bool {
        if !self.raw.is_skip() {
            self.raw.cell.deps.track(TrackKey::Key(Rc::from(key)));
        }
        self.raw.borrow().contains_key(key)
    }

    /// Key list in insertion order. Tracks the iteration key.
    pub fn keys(&self) -> Vec<String> {
        if !self.raw.is_skip() {
            self.raw.cell.deps.track(TrackKey::Iterate);
        }
        self.raw.borrow().keys().cloned().collect()
    }

    /// Entry snapshot in insertion order. Tracks the iteration key and
    /// every present key, so both structural and per-key changes re-run
    /// iterating subscribers.
    pub fn entries(&self) -> Vec<(String, ReactiveValue)> {
        if self.raw.is_skip() {
            return self
                .raw
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), ReactiveValue::Plain(v.clone())))
                .collect();
        }
        self.raw.cell.deps.track(TrackKey::Iterate);
        let snapshot: Vec<(String, Value)> = self
            .raw
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        snapshot
            .into_iter()
            .map(|(k, v)| {
                self.raw.cell.deps.track(TrackKey::Key(Rc::from(k.as_str())));
                (k, self.wrap(v))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        if !self.raw.is_skip() {
            self.raw.cell.deps.track(TrackKey::Iterate);
        }
        self.raw.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a key. ADD (new key) additionally notifies iterating
    /// subscribers; SET with an unchanged value notifies nobody.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if self.readonly {
            log::warn!("set of key {key:?} on a readonly record was ignored");
            return;
        }
        let value = value.into();
        enum WriteKind {
            Add,
            Set,
            Unchanged,
        }
        let kind = {
            let mut entries = self.raw.borrow_mut();
            let existing = entries.get(key).cloned();
            match existing {
                None => {
                    entries.insert(key.to_string(), value);
                    WriteKind::Add
                }
                Some(old) if old != value => {
                    entries.insert(key.to_string(), value);
                    WriteKind::Set
                }
                Some(_) => WriteKind::Unchanged,
            }
        };
        match kind {
            WriteKind::Add => self
                .raw
                .cell
                .deps
                .trigger(&[TrackKey::Key(Rc::from(key)), TrackKey::Iterate]),
            WriteKind::Set => self.raw.cell.deps.trigger(&[TrackKey::Key(Rc::from(key))]),
            WriteKind::Unchanged => {}
        }
    }

    /// Delete a key; notifies the key and iterating subscribers.
    pub fn remove(&self, key: &str) -> bool {
        if self.readonly {
            log::warn!("delete of key {key:?} on a readonly record was ignored");
            return false;
        }
        let removed = self.raw.borrow_mut().shift_remove(key).is_some();
        if removed {
            self.raw
                .cell
                .deps
                .trigger(&[TrackKey::Key(Rc::from(key)), TrackKey::Iterate]);
        }
        removed
    }

    // =========================================================================
    // Deep Traversal
    // =========================================================================

    /// Visit up to `depth` levels, establishing deps along the way.
    /// Cycle-safe via the seen set; honors the skip sentinel.
    pub(crate) fn traverse(&self, depth: u32, seen: &mut HashSet<usize>) {
        if depth == 0 || self.raw.is_skip() {
            return;
        }
        if !seen.insert(self.raw.addr()) {
            return;
        }
        for key in self.keys() {
            if let Some(child) = self.get(&key) {
                child.traverse(depth - 1, seen);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use std::cell::Cell;

    fn counted_effect(f: impl Fn() + 'static) -> (Rc<Cell<usize>>, crate::reactive::effect::Effect) {
        let runs = Rc::new(Cell::new(0));
        let runs2 = runs.clone();
        let e = effect(move || {
            runs2.set(runs2.get() + 1);
            f();
        });
        (runs, e)
    }

    #[test]
    fn test_get_set_roundtrip() {
        let r = ReactiveRecord::new(RawMap::from_entries([("name", "ada")]));
        assert_eq!(
            r.get("name").map(|v| v.into_value()),
            Some(Value::from("ada"))
        );

        r.set("name", "grace");
        assert_eq!(
            r.get("name").map(|v| v.into_value()),
            Some(Value::from("grace"))
        );
    }

    #[test]
    fn test_set_notifies_key_readers() {
        let r = ReactiveRecord::new(RawMap::from_entries([("count", 0)]));
        let r2 = r.clone();
        let (runs, _e) = counted_effect(move || {
            let _ = r2.get("count");
        });
        assert_eq!(runs.get(), 1);

        r.set("count", 1);
        assert_eq!(runs.get(), 2);

        // Unchanged write: no notification.
        r.set("count", 1);
        assert_eq!(runs.get(), 2);

        // Unrelated key: no notification.
        r.set("other", 9);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_add_and_delete_notify_iterators() {
        let r = ReactiveRecord::new(RawMap::from_entries([("a", 1)]));
        let r2 = r.clone();
        let (runs, _e) = counted_effect(move || {
            let _ = r2.keys();
        });
        assert_eq!(runs.get(), 1);

        r.set("b", 2);
        assert_eq!(runs.get(), 2, "ADD must notify iteration");

        r.set("b", 3);
        assert_eq!(runs.get(), 2, "SET must not notify iteration");

        r.remove("a");
        assert_eq!(runs.get(), 3, "DELETE must notify iteration");
        assert_eq!(r.keys(), vec!["b".to_string()]);
    }

    #[test]
    fn test_has_tracks_missing_key() {
        let r = ReactiveRecord::new(RawMap::new());
        let r2 = r.clone();
        let (runs, _e) = counted_effect(move || {
            let _ = r2.has("pending");
        });
        assert_eq!(runs.get(), 1);

        r.set("pending", true);
        assert_eq!(runs.get(), 2, "a later ADD must notify the absent-key read");
    }

    #[test]
    fn test_nested_wrapping_is_lazy_and_stable() {
        let inner = RawMap::from_entries([("x", 1)]);
        let r = ReactiveRecord::new(RawMap::from_entries([("inner", inner.clone())]));

        let nested = r.get("inner").unwrap();
        let nested = nested.as_record().expect("nested map wraps as record");
        assert_eq!(nested.raw(), inner, "raw(reactive(x)) == x");

        let again = r.get("inner").unwrap();
        assert_eq!(
            ReactiveValue::Record(nested.clone()),
            again,
            "reactive(reactive(x)) == reactive(x)"
        );
    }

    #[test]
    fn test_readonly_write_warns_and_is_dropped() {
        let raw = RawMap::from_entries([("k", 1)]);
        let rw = ReactiveRecord::new(raw.clone());
        let ro = rw.readonly_view();

        ro.set("k", 2);
        assert_eq!(
            rw.get("k").map(|v| v.into_value()),
            Some(Value::from(1)),
            "write through readonly must not reach the target"
        );
        assert!(ro.is_readonly());
        assert!(!rw.is_readonly());
    }

    #[test]
    fn test_readonly_composes_deeply() {
        let inner = RawMap::from_entries([("x", 1)]);
        let r = ReactiveRecord::readonly(RawMap::from_entries([("inner", inner)]));

        let nested = r.get("inner").unwrap();
        let nested = nested.as_record().unwrap();
        assert!(nested.is_readonly(), "readonly wraps nested cells readonly");
    }

    #[test]
    fn test_shallow_passes_nested_through() {
        let inner = RawMap::from_entries([("x", 1)]);
        let r = ReactiveRecord::shallow(RawMap::from_entries([("inner", inner.clone())]));

        match r.get("inner").unwrap() {
            ReactiveValue::Plain(Value::Map(m)) => assert_eq!(m, inner),
            other => panic!("shallow read must pass the raw cell through, got {other:?}"),
        }
        assert!(r.is_shallow());
    }

    #[test]
    fn test_skip_prevents_observation() {
        let skipped = RawMap::from_entries([("x", 1)]);
        skipped.mark_skip();
        let r = ReactiveRecord::new(RawMap::from_entries([("s", skipped.clone())]));

        match r.get("s").unwrap() {
            ReactiveValue::Plain(Value::Map(m)) => {
                assert_eq!(m, skipped);
                assert!(!ReactiveRecord::new(m).is_reactive());
            }
            other => panic!("skip-marked cell must pass through, got {other:?}"),
        }
    }

    #[test]
    fn test_traverse_terminates_on_cycles() {
        let raw = RawMap::new();
        let r = ReactiveRecord::new(raw.clone());
        r.set("self", raw.clone());

        let mut seen = std::collections::HashSet::new();
        r.traverse(u32::MAX, &mut seen);
        assert_eq!(seen.len(), 1, "the cycle is visited exactly once");
    }
}
