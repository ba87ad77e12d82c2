//! Collection observer - reactive set.
//!
//! Membership reads track a per-item dep; iteration reads track the
//! iterate key, so deriveds that walk the set re-run when members are
//! added or removed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;

use crate::reactive::batch;
use crate::reactive::dep::Dep;
use crate::reactive::subscriber::{active_sub, is_tracking};

pub(crate) struct SetStore<T> {
    items: RefCell<IndexSet<T>>,
    item_deps: RefCell<HashMap<T, Rc<Dep>>>,
    iterate: RefCell<Option<Rc<Dep>>>,
}

/// A reactive insertion-ordered set. Cloning shares the store.
pub struct ReactiveSet<T: 'static> {
    store: Rc<SetStore<T>>,
}

impl<T> Clone for ReactiveSet<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T> Default for ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReactiveSet<T>
where
    T: Eq + Hash + Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            store: Rc::new(SetStore {
                items: RefCell::new(IndexSet::new()),
                item_deps: RefCell::new(HashMap::new()),
                iterate: RefCell::new(None),
            }),
        }
    }

    fn track_item(&self, item: &T) {
        if !is_tracking() || active_sub().is_none() {
            return;
        }
        let dep = {
            let mut deps = self.store.item_deps.borrow_mut();
            deps.entry(item.clone())
                .or_insert_with(|| {
                    let dep = Dep::new();
                    let store: Weak<SetStore<T>> = Rc::downgrade(&self.store);
                    let item = item.clone();
                    dep.set_orphan_hook(move || {
                        if let Some(store) = store.upgrade() {
                            store.item_deps.borrow_mut().remove(&item);
                        }
                    });
                    dep
                })
                .clone()
        };
        dep.track();
    }

    fn track_iterate(&self) {
        if !is_tracking() || active_sub().is_none() {
            return;
        }
        let dep = self
            .store
            .iterate
            .borrow_mut()
            .get_or_insert_with(Dep::new)
            .clone();
        dep.track();
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

    pub fn contains(&self, item: &T) -> bool {
        self.track_item(item);
        self.store.items.borrow().contains(item)
    }

    /// Snapshot of the members in insertion order. Tracks iteration, so a
    /// derived value or effect calling this re-runs on add/remove.
    pub fn iter(&self) -> Vec<T> {
        self.track_iterate();
        self.store.items.borrow().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.track_iterate();
        self.store.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Add a member. Returns true when it was not present before.
    pub fn insert(&self, item: T) -> bool {
        let added = self.store.items.borrow_mut().insert(item.clone());
        if added {
            let mut deps = Vec::new();
            if let Some(d) = self.store.iterate.borrow().as_ref() {
                deps.push(d.clone());
            }
            if let Some(d) = self.store.item_deps.borrow().get(&item) {
                deps.push(d.clone());
            }
            self.fire(deps);
        }
        added
    }

    /// Remove a member. Returns true when it was present.
    pub fn remove(&self, item: &T) -> bool {
        let removed = self.store.items.borrow_mut().shift_remove(item);
        if removed {
            let mut deps = Vec::new();
            if let Some(d) = self.store.iterate.borrow().as_ref() {
                deps.push(d.clone());
            }
            if let Some(d) = self.store.item_deps.borrow().get(item) {
                deps.push(d.clone());
            }
            self.fire(deps);
        }
        removed
    }

    /// Remove everything; every tracked member triggers at once.
    pub fn clear(&self) {
        let had_items = {
            let mut items = self.store.items.borrow_mut();
            let had = !items.is_empty();
            items.clear();
            had
        };
        if had_items {
            let mut deps: Vec<Rc<Dep>> =
                self.store.item_deps.borrow().values().cloned().collect();
            if let Some(d) = self.store.iterate.borrow().as_ref() {
                deps.push(d.clone());
            }
            self.fire(deps);
        }
    }
}
