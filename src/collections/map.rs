//! Collection observer - reactive keyed map with typed keys and values.
//!
//! Lookup-style reads (`get`, `contains_key`) track a per-key dep created
//! lazily; size and value iteration track the iterate key; key-only
//! iteration tracks its own key, so inserting a value under an existing
//! key re-runs value iterators but not key iterators.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::reactive::batch;
use crate::reactive::dep::Dep;
use crate::reactive::subscriber::{active_sub, is_tracking};

pub(crate) struct MapStore<K, V> {
    entries: RefCell<IndexMap<K, V>>,
    key_deps: RefCell<HashMap<K, Rc<Dep>>>,
    iterate: RefCell<Option<Rc<Dep>>>,
    key_iterate: RefCell<Option<Rc<Dep>>>,
}

/// A reactive insertion-ordered map. Cloning shares the store.
pub struct ReactiveMap<K: 'static, V: 'static> {
    store: Rc<MapStore<K, V>>,
    readonly: bool,
}

impl<K, V> Clone for ReactiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            readonly: self.readonly,
        }
    }
}

impl<K, V> Default for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + 'static,
    V: Clone + PartialEq + 'static,
{
    pub fn new() -> Self {
        Self {
            store: Rc::new(MapStore {
                entries: RefCell::new(IndexMap::new()),
                key_deps: RefCell::new(HashMap::new()),
                iterate: RefCell::new(None),
                key_iterate: RefCell::new(None),
            }),
            readonly: false,
        }
    }

    /// Readonly view over the same store.
    pub fn readonly_view(&self) -> ReactiveMap<K, V> {
        Self {
            store: self.store.clone(),
            readonly: true,
        }
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn track_key(&self, key: &K) {
        if !is_tracking() || active_sub().is_none() {
            return;
        }
        let dep = {
            let mut deps = self.store.key_deps.borrow_mut();
            deps.entry(key.clone())
                .or_insert_with(|| {
                    let dep = Dep::new();
                    let store: Weak<MapStore<K, V>> = Rc::downgrade(&self.store);
                    let key = key.clone();
                    dep.set_orphan_hook(move || {
                        if let Some(store) = store.upgrade() {
                            store.key_deps.borrow_mut().remove(&key);
                        }
                    });
                    dep
                })
                .clone()
        };
        dep.track();
    }

    fn track_iterate(&self, keys_only: bool) {
        if !is_tracking() || active_sub().is_none() {
            return;
        }
        let slot = if keys_only {
            &self.store.key_iterate
        } else {
            &self.store.iterate
        };
        let dep = slot
            .borrow_mut()
            .get_or_insert_with(Dep::new)
            .clone();
        dep.track();
    }

    /// Deps to fire for a structural change (ADD / DELETE / CLEAR).
    fn structural_deps(&self) -> Vec<Rc<Dep>> {
        let mut deps = Vec::new();
        if let Some(d) = self.store.iterate.borrow().as_ref() {
            deps.push(d.clone());
        }
        if let Some(d) = self.store.key_iterate.borrow().as_ref() {
            deps.push(d.clone());
        }
        deps
    }

    fn key_dep(&self, key: &K) -> Option<Rc<Dep>> {
        self.store.key_deps.borrow().get(key).cloned()
    }

    fn fire(&self, deps: Vec<Rc<Dep>>) {
        if deps.is_empty() {
            return;
        }
        batch::start_batch();
        for dep in deps {
            dep.trigger();
        }
        batch::end_batch();
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &K) -> Option<V> {
        self.track_key(key);
        self.store.entries.borrow().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.track_key(key);
        self.store.entries.borrow().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.track_iterate(false);
        self.store.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<K> {
        self.track_iterate(true);
        self.store.entries.borrow().keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<V> {
        self.track_iterate(false);
        self.store.entries.borrow().values().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(K, V)> {
        self.track_iterate(false);
        self.store
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (k, v) in self.entries() {
            f(&k, &v);
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert or replace. ADD notifies key + both iteration deps; SET with
    /// a changed value notifies the key and value iterators only.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        if self.readonly {
            log::warn!("insert on a readonly map was ignored");
            return None;
        }
        let (previous, added, changed) = {
            let mut entries = self.store.entries.borrow_mut();
            match entries.insert(key.clone(), value) {
                None => (None, true, true),
                Some(old) => {
                    let changed = old != entries[&key];
                    (Some(old), false, changed)
                }
            }
        };
        if added {
            let mut deps = self.structural_deps();
            if let Some(d) = self.key_dep(&key) {
                deps.push(d);
            }
            self.fire(deps);
        } else if changed {
            let mut deps = Vec::new();
            if let Some(d) = self.store.iterate.borrow().as_ref() {
                deps.push(d.clone());
            }
            if let Some(d) = self.key_dep(&key) {
                deps.push(d);
            }
            self.fire(deps);
        }
        previous
    }

    /// Delete a key; notifies the key and both iteration deps.
    pub fn remove(&self, key: &K) -> Option<V> {
        if self.readonly {
            log::warn!("remove on a readonly map was ignored");
            return None;
        }
        let removed = self.store.entries.borrow_mut().shift_remove(key);
        if removed.is_some() {
            let mut deps = self.structural_deps();
            if let Some(d) = self.key_dep(key) {
                deps.push(d);
            }
            self.fire(deps);
        }
        removed
    }

    /// Remove everything; every tracked key triggers at once.
    pub fn clear(&self) {
        if self.readonly {
            log::warn!("clear on a readonly map was ignored");
            return;
        }
        let had_entries = {
            let mut entries = self.store.entries.borrow_mut();
            let had = !entries.is_empty();
            entries.clear();
            had
        };
        if had_entries {
            let mut deps = self.structural_deps();
            deps.extend(self.store.key_deps.borrow().values().cloned());
            self.fire(deps);
        }
    }

    /// Plain snapshot of the contents (tracks value iteration).
    pub fn to_map(&self) -> IndexMap<K, V> {
        self.track_iterate(false);
        self.store.entries.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use std::cell::Cell;

    #[test]
    fn test_get_insert_remove() {
        let m: ReactiveMap<String, i32> = ReactiveMap::new();
        assert_eq!(m.get(&"a".to_string()), None);

        m.insert("a".to_string(), 1);
        assert_eq!(m.get(&"a".to_string()), Some(1));
        assert_eq!(m.len(), 1);

        assert_eq!(m.remove(&"a".to_string()), Some(1));
        assert!(m.is_empty());
    }

    #[test]
    fn test_key_readers_notified_precisely() {
        let m: ReactiveMap<&'static str, i32> = ReactiveMap::new();
        m.insert("a", 1);
        m.insert("b", 2);

        let runs = Rc::new(Cell::new(0));
        let (m2, runs2) = (m.clone(), runs.clone());
        let _e = effect(move || {
            let _ = m2.get(&"a");
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        m.insert("a", 10);
        assert_eq!(runs.get(), 2);

        m.insert("a", 10);
        assert_eq!(runs.get(), 2, "unchanged value must not notify");

        m.insert("b", 20);
        assert_eq!(runs.get(), 2, "unrelated key must not notify");
    }

    #[test]
    fn test_key_iteration_ignores_value_changes() {
        let m: ReactiveMap<&'static str, i32> = ReactiveMap::new();
        m.insert("a", 1);

        let key_runs = Rc::new(Cell::new(0));
        let value_runs = Rc::new(Cell::new(0));

        let (m2, kr) = (m.clone(), key_runs.clone());
        let _keys = effect(move || {
            let _ = m2.keys();
            kr.set(kr.get() + 1);
        });
        let (m3, vr) = (m.clone(), value_runs.clone());
        let _values = effect(move || {
            let _ = m3.values();
            vr.set(vr.get() + 1);
        });

        // Value change under an existing key: value iterators only.
        m.insert("a", 2);
        assert_eq!(key_runs.get(), 1, "keys() must not re-run on SET");
        assert_eq!(value_runs.get(), 2);

        // New key: both.
        m.insert("b", 3);
        assert_eq!(key_runs.get(), 2);
        assert_eq!(value_runs.get(), 3);
    }

    #[test]
    fn test_size_tracks_structure() {
        let m: ReactiveMap<i32, i32> = ReactiveMap::new();
        let runs = Rc::new(Cell::new(0));
        let (m2, runs2) = (m.clone(), runs.clone());
        let _e = effect(move || {
            let _ = m2.len();
            runs2.set(runs2.get() + 1);
        });

        m.insert(1, 1);
        m.remove(&1);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_clear_notifies_all_keys() {
        let m: ReactiveMap<&'static str, i32> = ReactiveMap::new();
        m.insert("a", 1);
        m.insert("b", 2);

        let runs = Rc::new(Cell::new(0));
        let (m2, runs2) = (m.clone(), runs.clone());
        let _e = effect(move || {
            let _ = m2.get(&"b");
            runs2.set(runs2.get() + 1);
        });

        m.clear();
        assert_eq!(runs.get(), 2, "clear must reach per-key readers");
        assert!(m.is_empty());
    }

    #[test]
    fn test_readonly_view() {
        let m: ReactiveMap<i32, i32> = ReactiveMap::new();
        m.insert(1, 1);

        let ro = m.readonly_view();
        ro.insert(2, 2);
        ro.remove(&1);
        ro.clear();

        assert_eq!(m.get(&1), Some(1), "readonly writes must be dropped");
        assert!(ro.is_readonly());
        assert_eq!(ro.get(&1), Some(1), "readonly reads share the store");
    }

    #[test]
    fn test_insertion_order_preserved() {
        let m: ReactiveMap<&'static str, i32> = ReactiveMap::new();
        m.insert("z", 1);
        m.insert("a", 2);
        m.insert("m", 3);

        assert_eq!(m.keys(), vec!["z", "a", "m"]);
        m.remove(&"a");
        assert_eq!(m.keys(), vec!["z", "m"]);
    }
}
