//! Signal - a writable reactive cell.
//!
//! The leaf of the dependency graph: reads track, writes trigger. Writes
//! are gated by an equality check so setting an unchanged value never
//! notifies subscribers.

use std::cell::RefCell;
use std::rc::Rc;

use super::dep::Dep;

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct SignalInner<T> {
    value: RefCell<T>,
    dep: Rc<Dep>,
    equals: EqualsFn<T>,
}

/// A writable reactive cell. Cloning shares the cell.
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a signal with `PartialEq`-based change detection.
pub fn signal<T: Clone + PartialEq + 'static>(value: T) -> Signal<T> {
    signal_with_equals(value, |a: &T, b: &T| a == b)
}

/// Create a signal with a custom change comparator.
///
/// The comparator returns `true` when two values are considered equal;
/// equal writes do not notify.
pub fn signal_with_equals<T: Clone + 'static>(
    value: T,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> Signal<T> {
    Signal {
        inner: Rc::new(SignalInner {
            value: RefCell::new(value),
            dep: Dep::new(),
            equals: Box::new(equals),
        }),
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Read the value, registering a dependency for the current subscriber.
    pub fn get(&self) -> T {
        self.inner.dep.track();
        self.inner.value.borrow().clone()
    }

    /// Read the value without registering a dependency.
    pub fn peek(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Write a new value; notifies only when the comparator reports change.
    pub fn set(&self, value: T) {
        let changed = !(self.inner.equals)(&self.inner.value.borrow(), &value);
        if changed {
            *self.inner.value.borrow_mut() = value;
            self.inner.dep.trigger();
        }
    }

    /// Mutate the value in place, then notify if the result changed.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let next = {
            let mut next = self.inner.value.borrow().clone();
            f(&mut next);
            next
        };
        self.set(next);
    }

    /// Run `f` against the current value without cloning or tracking.
    pub fn with_peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Signal").field(&*self.inner.value.borrow()).finish()
    }
}
