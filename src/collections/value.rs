//! Dynamic value model shared by the observers and the virtual tree.
//!
//! Scalars are plain data; lists and maps are `Rc`-shared cells, so value
//! equality follows the host rule "changed unless references or scalars
//! compare equal". Each cell embeds its own key-to-dep table, which gives
//! deps the same lifetime as the data they describe: created lazily on
//! first track, removed when their last subscriber leaves.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::reactive::batch;
use crate::reactive::dep::Dep;
use crate::reactive::subscriber::{active_sub, is_tracking};

// =============================================================================
// Track Keys
// =============================================================================

/// What a read touched: a named key, an index, the length, or one of the
/// magic iteration keys.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub(crate) enum TrackKey {
    Key(Rc<str>),
    Index(usize),
    Length,
    /// Any iteration or unknown-key read.
    Iterate,
    /// Key-only iteration over a keyed collection.
    KeyIterate,
}

// =============================================================================
// Dep Table
// =============================================================================

pub(crate) struct DepTableInner {
    deps: RefCell<HashMap<TrackKey, Rc<Dep>>>,
}

/// Lazily populated key-to-dep table embedded in every observed cell.
#[derive(Clone)]
pub(crate) struct DepTable(Rc<DepTableInner>);

impl DepTable {
    pub(crate) fn new() -> Self {
        Self(Rc::new(DepTableInner {
            deps: RefCell::new(HashMap::new()),
        }))
    }

    /// Track a read of `key` by the current subscriber. Does not allocate
    /// a dep when nothing can subscribe.
    pub(crate) fn track(&self, key: TrackKey) {
        if !is_tracking() || active_sub().is_none() {
            return;
        }
        let dep = {
            let mut deps = self.0.deps.borrow_mut();
            deps.entry(key.clone())
                .or_insert_with(|| {
                    let dep = Dep::new();
                    let table = Rc::downgrade(&self.0);
                    let key = key.clone();
                    dep.set_orphan_hook(move || {
                        if let Some(table) = table.upgrade() {
                            table.deps.borrow_mut().remove(&key);
                        }
                    });
                    dep
                })
                .clone()
        };
        dep.track();
    }

    /// Trigger every dep named in `keys`, inside one batch.
    pub(crate) fn trigger(&self, keys: &[TrackKey]) {
        let deps: Vec<Rc<Dep>> = {
            let table = self.0.deps.borrow();
            keys.iter().filter_map(|k| table.get(k).cloned()).collect()
        };
        if deps.is_empty() {
            return;
        }
        batch::start_batch();
        for dep in deps {
            dep.trigger();
        }
        batch::end_batch();
    }

    /// Trigger every dep in the table at once (clear semantics).
    pub(crate) fn trigger_all(&self) {
        let deps: Vec<Rc<Dep>> = self.0.deps.borrow().values().cloned().collect();
        if deps.is_empty() {
            return;
        }
        batch::start_batch();
        for dep in deps {
            dep.trigger();
        }
        batch::end_batch();
    }
}

// =============================================================================
// Value
// =============================================================================

/// A dynamic value: scalar, shared list cell, or shared map cell.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(RawList),
    Map(RawMap),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RawList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&RawMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(_) => write!(f, "[list]"),
            Value::Map(_) => write!(f, "[map]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(l) => write!(f, "List(0x{:x})", l.addr()),
            Value::Map(m) => write!(f, "Map(0x{:x})", m.addr()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Rc::from(v))
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Rc::from(v.as_str()))
    }
}
impl From<RawList> for Value {
    fn from(v: RawList) -> Self {
        Value::List(v)
    }
}
impl From<RawMap> for Value {
    fn from(v: RawMap) -> Self {
        Value::Map(v)
    }
}

// =============================================================================
// Raw Cells
// =============================================================================

pub(crate) struct MapCell {
    pub(crate) entries: RefCell<IndexMap<String, Value>>,
    pub(crate) deps: DepTable,
    pub(crate) skip: Cell<bool>,
}

/// Shared storage for a keyed record. Identity (not contents) defines
/// equality; this is the "raw target" side of the raw/reactive pair.
#[derive(Clone)]
pub struct RawMap {
    pub(crate) cell: Rc<MapCell>,
}

impl PartialEq for RawMap {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Default for RawMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RawMap {
    pub fn new() -> Self {
        Self {
            cell: Rc::new(MapCell {
                entries: RefCell::new(IndexMap::new()),
                deps: DepTable::new(),
                skip: Cell::new(false),
            }),
        }
    }

    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let map = Self::new();
        {
            let mut store = map.cell.entries.borrow_mut();
            for (k, v) in entries {
                store.insert(k.into(), v.into());
            }
        }
        map
    }

    /// Stable identity of the underlying cell.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }

    /// Exclude this cell from observation: reads pass it through unwrapped
    /// and untracked.
    pub fn mark_skip(&self) {
        self.cell.skip.set(true);
    }

    pub fn is_skip(&self) -> bool {
        self.cell.skip.get()
    }

    pub(crate) fn borrow(&self) -> Ref<'_, IndexMap<String, Value>> {
        self.cell.entries.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, IndexMap<String, Value>> {
        self.cell.entries.borrow_mut()
    }
}

impl fmt::Debug for RawMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawMap(0x{:x})", self.addr())
    }
}

pub(crate) struct ListCell {
    pub(crate) items: RefCell<Vec<Value>>,
    pub(crate) deps: DepTable,
    pub(crate) skip: Cell<bool>,
}

/// Shared storage for an ordered list. Identity defines equality.
#[derive(Clone)]
pub struct RawList {
    pub(crate) cell: Rc<ListCell>,
}

impl PartialEq for RawList {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Default for RawList {
    fn default() -> Self {
        Self::new()
    }
}

impl RawList {
    pub fn new() -> Self {
        Self {
            cell: Rc::new(ListCell {
                items: RefCell::new(Vec::new()),
                deps: DepTable::new(),
                skip: Cell::new(false),
            }),
        }
    }

    pub fn from_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        let list = Self::new();
        {
            let mut items = list.cell.items.borrow_mut();
            for v in values {
                items.push(v.into());
            }
        }
        list
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.cell) as usize
    }

    pub fn mark_skip(&self) {
        self.cell.skip.set(true);
    }

    pub fn is_skip(&self) -> bool {
        self.cell.skip.get()
    }

    pub(crate) fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.cell.items.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.cell.items.borrow_mut()
    }
}

impl fmt::Debug for RawList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawList(0x{:x})", self.addr())
    }
}
