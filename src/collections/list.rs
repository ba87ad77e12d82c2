//! Array observer - reactive access to an ordered list.
//!
//! Reads track either a single index, the length, or the list-iterate
//! key; iteration-style reads track the iterate key once per call and
//! walk the raw storage. Index writes notify the index and the iterate
//! key, so iteration subscribers rebuild without per-index tracking.
//! Length-altering mutations run with tracking paused inside a batch, so
//! a subscriber mutating the list it iterates cannot retrigger itself
//! through the length key mid-operation.

use std::collections::HashSet;

use super::record::{ReactiveRecord, ReactiveValue};
use super::value::{RawList, TrackKey, Value};
use crate::reactive::batch;
use crate::reactive::subscriber::{pause_tracking, reset_tracking};

/// Reactive wrapper over a [`RawList`] cell.
#[derive(Clone)]
pub struct ReactiveList {
    raw: RawList,
    readonly: bool,
    shallow: bool,
}

impl PartialEq for ReactiveList {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
            && self.readonly == other.readonly
            && self.shallow == other.shallow
    }
}

impl std::fmt::Debug for ReactiveList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveList")
            .field("raw", &self.raw)
            .field("readonly", &self.readonly)
            .field("shallow", &self.shallow)
            .finish()
    }
}

impl ReactiveList {
    pub fn new(raw: RawList) -> Self {
        Self {
            raw,
            readonly: false,
            shallow: false,
        }
    }

    pub fn readonly(raw: RawList) -> Self {
        Self {
            raw,
            readonly: true,
            shallow: false,
        }
    }

    pub fn shallow(raw: RawList) -> Self {
        Self {
            raw,
            readonly: false,
            shallow: true,
        }
    }

    pub fn readonly_view(&self) -> ReactiveList {
        Self {
            raw: self.raw.clone(),
            readonly: true,
            shallow: self.shallow,
        }
    }

    pub fn raw(&self) -> RawList {
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
            Value::Map(m) if !m.is_skip() => ReactiveValue::Record(if self.readonly {
                ReactiveRecord::readonly(m)
            } else {
                ReactiveRecord::new(m)
            }),
            Value::List(l) if !l.is_skip() => ReactiveValue::List(ReactiveList {
                raw: l,
                readonly: self.readonly,
                shallow: false,
            }),
            other => ReactiveValue::Plain(other),
        }
    }

    fn track(&self, key: TrackKey) {
        if !self.raw.is_skip() {
            self.raw.cell.deps.track(key);
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn len(&self) -> usize {
        self.track(TrackKey::Length);
        self.raw.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<ReactiveValue> {
        self.track(TrackKey::Index(index));
        let value = self.raw.borrow().get(index).cloned();
        value.map(|v| self.wrap(v))
    }

    /// Snapshot of all items, wrapped. Tracks the iterate key once.
    pub fn iter(&self) -> Vec<ReactiveValue> {
        self.track(TrackKey::Iterate);
        let snapshot: Vec<Value> = self.raw.borrow().clone();
        snapshot.into_iter().map(|v| self.wrap(v)).collect()
    }

    /// Raw value snapshot. Tracks the iterate key once.
    pub fn to_vec(&self) -> Vec<Value> {
        self.track(TrackKey::Iterate);
        self.raw.borrow().clone()
    }

    pub fn for_each(&self, mut f: impl FnMut(usize, ReactiveValue)) {
        for (i, v) in self.iter().into_iter().enumerate() {
            f(i, v);
        }
    }

    /// Identity search. Cells compare by raw identity, so a query taken
    /// from a reactive wrapper still matches the stored raw cell.
    pub fn contains(&self, value: &Value) -> bool {
        self.track(TrackKey::Iterate);
        self.raw.borrow().iter().any(|v| v == value)
    }

    pub fn index_of(&self, value: &Value) -> Option<usize> {
        self.track(TrackKey::Iterate);
        self.raw.borrow().iter().position(|v| v == value)
    }

    pub fn last_index_of(&self, value: &Value) -> Option<usize> {
        self.track(TrackKey::Iterate);
        self.raw.borrow().iter().rposition(|v| v == value)
    }

    pub fn position(&self, mut pred: impl FnMut(&Value) -> bool) -> Option<usize> {
        self.track(TrackKey::Iterate);
        self.raw.borrow().iter().position(|v| pred(v))
    }

    /// Join the display form of every item. Tracks the iterate key once.
    pub fn join(&self, separator: &str) -> String {
        self.track(TrackKey::Iterate);
        self.raw
            .borrow()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write one index. Writing past the end extends the list (ADD);
    /// holes are filled with nulls, as the host semantics prescribe.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        if self.readonly {
            log::warn!("set of index {index} on a readonly list was ignored");
            return;
        }
        let value = value.into();
        let grown = {
            let mut items = self.raw.borrow_mut();
            if index < items.len() {
                if items[index] == value {
                    return;
                }
                items[index] = value;
                false
            } else {
                items.resize(index, Value::Null);
                items.push(value);
                true
            }
        };
        if grown {
            self.raw.cell.deps.trigger(&[
                TrackKey::Index(index),
                TrackKey::Length,
                TrackKey::Iterate,
            ]);
        } else {
            self.raw
                .cell
                .deps
                .trigger(&[TrackKey::Index(index), TrackKey::Iterate]);
        }
    }

    /// Run a structural mutation with tracking paused inside a batch,
    /// then trigger the keys the mutation reported.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> (R, Vec<TrackKey>)) -> Option<R> {
        if self.readonly {
            log::warn!("structural mutation of a readonly list was ignored");
            return None;
        }
        pause_tracking();
        let (result, keys) = {
            let mut items = self.raw.borrow_mut();
            f(&mut items)
        };
        reset_tracking();
        self.raw.cell.deps.trigger(&keys);
        Some(result)
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| {
            let index = items.len();
            items.push(value);
            ((), vec![TrackKey::Index(index), TrackKey::Length, TrackKey::Iterate])
        });
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate(|items| {
            let popped = items.pop();
            let keys = match popped {
                Some(_) => vec![
                    TrackKey::Index(items.len()),
                    TrackKey::Length,
                    TrackKey::Iterate,
                ],
                None => Vec::new(),
            };
            (popped, keys)
        })
        .flatten()
    }

    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| {
            items.insert(0, value);
            let mut keys: Vec<TrackKey> = (0..items.len()).map(TrackKey::Index).collect();
            keys.push(TrackKey::Length);
            keys.push(TrackKey::Iterate);
            ((), keys)
        });
    }

    pub fn shift(&self) -> Option<Value> {
        self.mutate(|items| {
            if items.is_empty() {
                return (None, Vec::new());
            }
            let removed = items.remove(0);
            let mut keys: Vec<TrackKey> = (0..=items.len()).map(TrackKey::Index).collect();
            keys.push(TrackKey::Length);
            keys.push(TrackKey::Iterate);
            (Some(removed), keys)
        })
        .flatten()
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.mutate(|items| {
            let index = index.min(items.len());
            items.insert(index, value);
            let mut keys: Vec<TrackKey> = (index..items.len()).map(TrackKey::Index).collect();
            keys.push(TrackKey::Length);
            keys.push(TrackKey::Iterate);
            ((), keys)
        });
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        self.mutate(|items| {
            if index >= items.len() {
                return (None, Vec::new());
            }
            let removed = items.remove(index);
            let mut keys: Vec<TrackKey> = (index..=items.len()).map(TrackKey::Index).collect();
            keys.push(TrackKey::Length);
            keys.push(TrackKey::Iterate);
            (Some(removed), keys)
        })
        .flatten()
    }

    /// Remove `delete_count` items starting at `start`, inserting
    /// `replacement` in their place. Returns the removed items.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        replacement: Vec<Value>,
    ) -> Vec<Value> {
        self.mutate(|items| {
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            let old_len = items.len();
            let removed: Vec<Value> = items.splice(start..end, replacement).collect();
            let touched_end = items.len().max(old_len);
            let mut keys: Vec<TrackKey> = (start..touched_end).map(TrackKey::Index).collect();
            keys.push(TrackKey::Length);
            keys.push(TrackKey::Iterate);
            (removed, keys)
        })
        .unwrap_or_default()
    }

    /// Remove everything; every key triggers at once.
    pub fn clear(&self) {
        if self.readonly {
            log::warn!("clear of a readonly list was ignored");
            return;
        }
        pause_tracking();
        let emptied = {
            let mut items = self.raw.borrow_mut();
            let had = !items.is_empty();
            items.clear();
            had
        };
        reset_tracking();
        if emptied {
            batch::start_batch();
            self.raw.cell.deps.trigger_all();
            batch::end_batch();
        }
    }

    pub(crate) fn traverse(&self, depth: u32, seen: &mut HashSet<usize>) {
        if depth == 0 || self.raw.is_skip() {
            return;
        }
        if !seen.insert(self.raw.addr()) {
            return;
        }
        let _ = self.len();
        for child in self.iter() {
            child.traverse(depth - 1, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::value::RawMap;
    use super::*;
    use crate::reactive::effect::effect;
    use std::cell::Cell;
    use std::rc::Rc;

    fn ints(list: &ReactiveList) -> Vec<i64> {
        list.to_vec()
            .into_iter()
            .map(|v| v.as_int().unwrap())
            .collect()
    }

    #[test]
    fn test_index_read_write() {
        let l = ReactiveList::new(RawList::from_values([1, 2, 3]));
        assert_eq!(l.get(1).map(|v| v.into_value()), Some(Value::from(2)));

        l.set(1, 20);
        assert_eq!(ints(&l), vec![1, 20, 3]);

        // Writing past the end extends with null holes.
        l.set(5, 9);
        assert_eq!(l.get(4).map(|v| v.into_value()), Some(Value::Null));
        assert_eq!(l.get(5).map(|v| v.into_value()), Some(Value::from(9)));
    }

    #[test]
    fn test_length_tracking() {
        let l = ReactiveList::new(RawList::from_values([1]));
        let runs = Rc::new(Cell::new(0));
        let (l2, runs2) = (l.clone(), runs.clone());
        let _e = effect(move || {
            let _ = l2.len();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        l.push(2);
        assert_eq!(runs.get(), 2);

        // In-place write leaves the length untouched.
        l.set(0, 10);
        assert_eq!(runs.get(), 2);

        l.pop();
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_iteration_tracking() {
        let l = ReactiveList::new(RawList::from_values([1, 2]));
        let sums = Rc::new(Cell::new(0_i64));
        let runs = Rc::new(Cell::new(0));
        let (l2, sums2, runs2) = (l.clone(), sums.clone(), runs.clone());
        let _e = effect(move || {
            runs2.set(runs2.get() + 1);
            sums2.set(l2.to_vec().iter().filter_map(|v| v.as_int()).sum());
        });
        assert_eq!((runs.get(), sums.get()), (1, 3));

        // Index write re-runs iteration subscribers.
        l.set(0, 10);
        assert_eq!((runs.get(), sums.get()), (2, 12));

        l.push(5);
        assert_eq!((runs.get(), sums.get()), (3, 17));
    }

    #[test]
    fn test_push_inside_effect_does_not_subscribe() {
        // Length-altering methods run with tracking paused: appending from
        // inside an effect must not make the effect a length subscriber.
        let l = ReactiveList::new(RawList::from_values([1]));
        let runs = Rc::new(Cell::new(0));
        let (l2, runs2) = (l.clone(), runs.clone());
        let _e = effect(move || {
            runs2.set(runs2.get() + 1);
            l2.push(0);
        });
        assert_eq!(runs.get(), 1);
        assert_eq!(l.len(), 2);

        l.push(5);
        assert_eq!(runs.get(), 1, "the pushing effect tracked nothing");
    }

    #[test]
    fn test_splice() {
        let l = ReactiveList::new(RawList::from_values([1, 2, 3, 4, 5]));
        let removed = l.splice(1, 2, vec![Value::from(9)]);

        assert_eq!(
            removed.iter().filter_map(|v| v.as_int()).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(ints(&l), vec![1, 9, 4, 5]);
    }

    #[test]
    fn test_shift_unshift() {
        let l = ReactiveList::new(RawList::from_values([2, 3]));
        l.unshift(1);
        assert_eq!(ints(&l), vec![1, 2, 3]);

        assert_eq!(l.shift(), Some(Value::from(1)));
        assert_eq!(ints(&l), vec![2, 3]);
    }

    #[test]
    fn test_identity_search_matches_raw_cell() {
        let shared = RawMap::from_entries([("id", 1)]);
        let l = ReactiveList::new(RawList::from_values([Value::from(shared.clone())]));

        // The wrapped read and the raw cell share identity.
        let wrapped = l.get(0).unwrap();
        let query = wrapped.into_value();
        assert_eq!(l.index_of(&query), Some(0));
        assert!(l.contains(&Value::from(shared)));
    }

    #[test]
    fn test_clear_notifies_every_reader() {
        let l = ReactiveList::new(RawList::from_values([1, 2, 3]));
        let (index_runs, len_runs) = (Rc::new(Cell::new(0)), Rc::new(Cell::new(0)));

        let (l2, r2) = (l.clone(), index_runs.clone());
        let _e1 = effect(move || {
            let _ = l2.get(2);
            r2.set(r2.get() + 1);
        });
        let (l3, r3) = (l.clone(), len_runs.clone());
        let _e2 = effect(move || {
            let _ = l3.len();
            r3.set(r3.get() + 1);
        });

        l.clear();
        assert_eq!(index_runs.get(), 2);
        assert_eq!(len_runs.get(), 2);
        assert!(l.is_empty());
    }

    #[test]
    fn test_readonly_list_ignores_writes() {
        let l = ReactiveList::new(RawList::from_values([1]));
        let ro = l.readonly_view();

        ro.push(2);
        ro.set(0, 9);
        ro.clear();

        assert_eq!(ints(&l), vec![1], "readonly writes must not reach the target");
    }
}
