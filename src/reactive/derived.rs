//! Derived - a cached computation that is both dep and subscriber.
//!
//! Readers subscribe to the derived value's own dep; the derived value
//! subscribes to whatever its getter reads. Recomputation is pull-based:
//! a change upstream only marks the derived dirty, and the next read
//! decides whether the body actually needs to run.
//!
//! Refresh policy, cheapest check first:
//! 1. push-validated (TRACKING and not DIRTY): return;
//! 2. nothing reactive changed anywhere (global version match): return;
//! 3. evaluated once with no remaining deps and not forced: return;
//! 4. deps unchanged by version walk: return; otherwise run the body and
//!    bump the output dep's version only when the value actually changed.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::batch;
use super::dep::{global_version, AnyDerived, Dep};
use super::link;
use super::scope;
use super::subscriber::{
    active_sub, swap_active_sub, swap_tracking, SubscriberCore, SubscriberFlags, SubscriberId,
    SubscriberState,
};

type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool>;

pub(crate) struct DerivedCore<T: 'static> {
    state: SubscriberState,
    dep: Rc<Dep>,
    value: RefCell<Option<T>>,
    getter: RefCell<Box<dyn FnMut() -> T>>,
    setter: Option<Box<dyn Fn(T)>>,
    equals: EqualsFn<T>,
    /// Global version at the time of the last validation.
    global_snapshot: Cell<u64>,
    /// Set when the last subscriber left and upstream links were detached;
    /// forces one recomputation on the next read.
    cold: Cell<bool>,
}

struct RefreshGuard<T: Clone + 'static> {
    core: Rc<DerivedCore<T>>,
    prev_sub: Option<Rc<dyn SubscriberCore>>,
    prev_track: bool,
}

impl<T: Clone + 'static> Drop for RefreshGuard<T> {
    fn drop(&mut self) {
        swap_active_sub(self.prev_sub.take());
        swap_tracking(self.prev_track);
        link::cleanup_deps(self.core.as_ref());
        self.core.state.remove(SubscriberFlags::RUNNING);
    }
}

impl<T: Clone + 'static> DerivedCore<T> {
    fn refresh_impl(this: &Rc<Self>) {
        let flags = this.state.flags();
        if flags.contains(SubscriberFlags::TRACKING) && !flags.contains(SubscriberFlags::DIRTY) {
            return;
        }
        if flags.contains(SubscriberFlags::RUNNING) {
            // Reading yourself mid-evaluation yields the previous value.
            return;
        }
        this.state.remove(SubscriberFlags::DIRTY);

        if this.global_snapshot.get() == global_version() {
            return;
        }
        this.global_snapshot.set(global_version());

        if flags.contains(SubscriberFlags::EVALUATED) {
            let up_to_date = if this.state.deps_head.get().is_none() {
                // A constant derivation stays valid forever; a cooled-down
                // one must recompute once to rebuild its deps.
                !this.cold.get()
            } else {
                !link::is_dirty(this.as_ref())
            };
            if up_to_date {
                return;
            }
        }

        this.state.insert(SubscriberFlags::RUNNING);
        link::prepare_deps(this.as_ref());
        let new_value = {
            let _guard = RefreshGuard {
                core: this.clone(),
                prev_sub: swap_active_sub(Some(this.clone() as Rc<dyn SubscriberCore>)),
                prev_track: swap_tracking(true),
            };
            let mut getter = this.getter.borrow_mut();
            (*getter)()
        };
        this.cold.set(false);

        let first = !this.state.has(SubscriberFlags::EVALUATED);
        let changed = first || {
            let current = this.value.borrow();
            match current.as_ref() {
                Some(current) => !(this.equals)(current, &new_value),
                None => true,
            }
        };
        if changed {
            *this.value.borrow_mut() = Some(new_value);
            this.state.insert(SubscriberFlags::EVALUATED);
            this.dep.bump_version_quiet();
        }
    }
}

impl<T: Clone + 'static> SubscriberCore for DerivedCore<T> {
    fn state(&self) -> &SubscriberState {
        &self.state
    }

    fn notify(self: Rc<Self>) -> bool {
        self.state.insert(SubscriberFlags::DIRTY);
        if self.state.has(SubscriberFlags::NOTIFIED) {
            return false;
        }
        // A write landing back on the derived value during its own
        // evaluation must not enqueue it against itself.
        if let Some(active) = active_sub() {
            if active.state().id() == self.state.id() {
                return false;
            }
        }
        self.state.insert(SubscriberFlags::NOTIFIED);
        batch::add(self.clone(), true);
        true
    }

    fn flush(self: Rc<Self>) {
        // Derived values recompute lazily on the next read.
    }

    fn owned_dep(&self) -> Option<Rc<Dep>> {
        Some(self.dep.clone())
    }
}

impl<T: Clone + 'static> AnyDerived for DerivedCore<T> {
    fn id(&self) -> SubscriberId {
        self.state.id()
    }

    fn refresh(self: Rc<Self>) {
        Self::refresh_impl(&self);
    }

    fn on_warm(&self) {
        // First subscriber arrived: cache validity is push-maintained from
        // now on; force one validation pass in case we were cold.
        self.state
            .insert(SubscriberFlags::TRACKING | SubscriberFlags::DIRTY);
    }

    fn on_cold(self: Rc<Self>) {
        self.state.remove(SubscriberFlags::TRACKING);
        self.cold.set(true);
        link::detach_all(self.as_ref());
    }
}

// =============================================================================
// Derived Handle
// =============================================================================

/// Handle to a cached reactive derivation. Cloning shares the cache.
pub struct Derived<T: 'static> {
    core: Rc<DerivedCore<T>>,
}

impl<T: 'static> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Create a derived value with `PartialEq`-based change detection.
pub fn derived<T: Clone + PartialEq + 'static>(getter: impl FnMut() -> T + 'static) -> Derived<T> {
    make_derived(Box::new(getter), Box::new(|a: &T, b: &T| a == b), None)
}

/// Create a derived value with a custom change comparator.
pub fn derived_with_equals<T: Clone + 'static>(
    getter: impl FnMut() -> T + 'static,
    equals: impl Fn(&T, &T) -> bool + 'static,
) -> Derived<T> {
    make_derived(Box::new(getter), Box::new(equals), None)
}

/// Create a writable derived value: reads go through the getter, writes
/// through the setter.
pub fn derived_writable<T: Clone + PartialEq + 'static>(
    getter: impl FnMut() -> T + 'static,
    setter: impl Fn(T) + 'static,
) -> Derived<T> {
    make_derived(
        Box::new(getter),
        Box::new(|a: &T, b: &T| a == b),
        Some(Box::new(setter)),
    )
}

fn make_derived<T: Clone + 'static>(
    getter: Box<dyn FnMut() -> T>,
    equals: EqualsFn<T>,
    setter: Option<Box<dyn Fn(T)>>,
) -> Derived<T> {
    let core = Rc::new(DerivedCore {
        state: SubscriberState::new(SubscriberFlags::empty()),
        dep: Dep::new(),
        value: RefCell::new(None),
        getter: RefCell::new(getter),
        setter,
        equals,
        global_snapshot: Cell::new(global_version().wrapping_sub(1)),
        cold: Cell::new(false),
    });
    let weak: Weak<dyn AnyDerived> = Rc::downgrade(&core) as Weak<dyn AnyDerived>;
    core.dep.set_owner(weak);

    // Scope-owned teardown keeps upstream deps from pinning the cache
    // after the owning scope stops.
    let for_dispose = Rc::downgrade(&core);
    scope::register_scope_cleanup(move || {
        if let Some(core) = for_dispose.upgrade() {
            link::detach_all(core.as_ref());
        }
    });

    Derived { core }
}

impl<T: Clone + 'static> Derived<T> {
    /// Read the cached value, recomputing if a dependency changed, and
    /// subscribe the current subscriber to this derived value.
    pub fn get(&self) -> T {
        self.core.dep.track();
        DerivedCore::refresh_impl(&self.core);
        // The reader linked against the pre-refresh version; sync it so a
        // recompute here does not immediately look like a change.
        self.core.dep.sync_active_link_version();
        self.core
            .value
            .borrow()
            .clone()
            .expect("derived value read during its own first evaluation")
    }

    /// Read without subscribing the current subscriber.
    pub fn peek(&self) -> T {
        DerivedCore::refresh_impl(&self.core);
        self.core
            .value
            .borrow()
            .clone()
            .expect("derived value read during its own first evaluation")
    }

    /// Write through the setter of a writable derived value.
    pub fn set(&self, value: T) {
        match &self.core.setter {
            Some(setter) => setter(value),
            None => log::warn!("write to a read-only derived value; ignored"),
        }
    }
}

impl<T: Clone + std::fmt::Debug + 'static> std::fmt::Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("value", &self.core.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::signal::signal;
    use std::cell::Cell as StdCell;

    #[test]
    fn test_counter_derivation() {
        let a = signal(1);
        let b = signal(2);
        let runs = Rc::new(StdCell::new(0));

        let (a2, b2, runs2) = (a.clone(), b.clone(), runs.clone());
        let c = derived(move || {
            runs2.set(runs2.get() + 1);
            a2.get() + b2.get()
        });

        assert_eq!(c.get(), 3);
        a.set(10);
        assert_eq!(c.get(), 12);
        assert_eq!(runs.get(), 2, "body runs exactly twice: initial + after write");
    }

    #[test]
    fn test_stable_derivation() {
        let a = signal(1);
        let runs = Rc::new(StdCell::new(0));

        let (a2, runs2) = (a.clone(), runs.clone());
        let c = derived(move || {
            runs2.set(runs2.get() + 1);
            a2.get() * 2
        });

        assert_eq!(c.get(), 2);
        assert_eq!(c.get(), 2);
        assert_eq!(c.get(), 2);
        assert_eq!(runs.get(), 1, "repeated reads with unchanged deps reuse the cache");
    }

    #[test]
    fn test_unrelated_change_does_not_recompute() {
        let a = signal(1);
        let unrelated = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let (a2, runs2) = (a.clone(), runs.clone());
        let c = derived(move || {
            runs2.set(runs2.get() + 1);
            a2.get()
        });
        assert_eq!(c.get(), 1);

        unrelated.set(5);
        assert_eq!(c.get(), 1);
        assert_eq!(runs.get(), 1, "version walk spares the body on unrelated writes");
    }

    #[test]
    fn test_unchanged_result_short_circuits_downstream() {
        let a = signal(1);
        let inner_runs = Rc::new(StdCell::new(0));
        let outer_runs = Rc::new(StdCell::new(0));

        let (a2, inner2) = (a.clone(), inner_runs.clone());
        let parity = derived(move || {
            inner2.set(inner2.get() + 1);
            a2.get() % 2
        });
        let (parity2, outer2) = (parity.clone(), outer_runs.clone());
        let label = derived(move || {
            outer2.set(outer2.get() + 1);
            if parity2.get() == 0 { "even" } else { "odd" }
        });

        assert_eq!(label.get(), "odd");
        assert_eq!((inner_runs.get(), outer_runs.get()), (1, 1));

        // 1 -> 3 keeps parity; inner recomputes, outer must not.
        a.set(3);
        assert_eq!(label.get(), "odd");
        assert_eq!(inner_runs.get(), 2);
        assert_eq!(outer_runs.get(), 1, "unchanged derived output must not cascade");
    }

    #[test]
    fn test_effect_over_derived() {
        let a = signal(1);
        let a2 = a.clone();
        let doubled = derived(move || a2.get() * 2);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let (d2, seen2) = (doubled.clone(), seen.clone());
        let _e = effect(move || {
            seen2.borrow_mut().push(d2.get());
        });
        assert_eq!(*seen.borrow(), vec![2]);

        a.set(5);
        assert_eq!(*seen.borrow(), vec![2, 10]);
    }

    #[test]
    fn test_self_read_does_not_create_self_edge() {
        let a = signal(1);
        let a2 = a.clone();
        let handle: Rc<RefCell<Option<Derived<i32>>>> = Rc::new(RefCell::new(None));
        let evals = Rc::new(StdCell::new(0));

        let (handle2, evals2) = (handle.clone(), evals.clone());
        let c = derived(move || {
            let n = evals2.get();
            evals2.set(n + 1);
            if n > 0 {
                // From the second evaluation on, read yourself: yields the
                // previous cached value, no edge, no recursion.
                if let Some(me) = handle2.borrow().as_ref() {
                    let _: i32 = me.get();
                }
            }
            a2.get()
        });
        *handle.borrow_mut() = Some(c.clone());

        assert_eq!(c.get(), 1);
        a.set(2);
        assert_eq!(c.get(), 2);
        assert_eq!(evals.get(), 2);
        assert_eq!(c.core.dep.sub_count(), 0, "no self-edge may exist");
    }

    #[test]
    fn test_constant_derivation_evaluates_once() {
        let runs = Rc::new(StdCell::new(0));
        let runs2 = runs.clone();
        let c = derived(move || {
            runs2.set(runs2.get() + 1);
            42
        });

        assert_eq!(c.get(), 42);
        // Move the global version; a pure constant must still not re-run.
        let s = signal(0);
        s.set(1);
        assert_eq!(c.get(), 42);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_cold_derived_recomputes_after_reader_stops() {
        let a = signal(1);
        let runs = Rc::new(StdCell::new(0));
        let (a2, runs2) = (a.clone(), runs.clone());
        let c = derived(move || {
            runs2.set(runs2.get() + 1);
            a2.get()
        });

        let c2 = c.clone();
        let e = effect(move || {
            let _ = c2.get();
        });
        assert_eq!(runs.get(), 1);

        e.stop();
        // While cold, the upstream write is not pushed to the cache.
        a.set(7);
        assert_eq!(c.get(), 7, "cold derived must recompute on next read");
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_writable_derived() {
        let celsius = signal(0.0_f64);
        let (read, write) = (celsius.clone(), celsius.clone());
        let fahrenheit = derived_writable(
            move || read.get() * 9.0 / 5.0 + 32.0,
            move |f| write.set((f - 32.0) * 5.0 / 9.0),
        );

        assert_eq!(fahrenheit.get(), 32.0);
        fahrenheit.set(212.0);
        assert_eq!(celsius.get(), 100.0);
        assert_eq!(fahrenheit.get(), 212.0);
    }
}
