//! Dep - a single observable cell and the track/trigger protocol.
//!
//! A dep owns its subscriber-link list and a monotonically increasing
//! version. Reads inside a running subscriber call [`Dep::track`]; writes
//! call [`Dep::trigger`], which bumps the dep version and the process-wide
//! global version, then notifies subscribers through the batch.
//!
//! Notification walks the subscriber list in reverse insertion order; the
//! batch queue prepends, so at flush time effects run in forward
//! subscription order without any auxiliary sorted structure.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::batch;
use super::link::{self, LinkId};
use super::subscriber::{active_sub, is_tracking, SubscriberId};

thread_local! {
    /// Bumped on every trigger anywhere; lets derived values skip
    /// revalidation entirely when nothing reactive has changed.
    static GLOBAL_VERSION: Cell<u64> = const { Cell::new(0) };
}

/// The process-wide change counter.
pub fn global_version() -> u64 {
    GLOBAL_VERSION.with(|v| v.get())
}

pub(crate) fn bump_global_version() {
    GLOBAL_VERSION.with(|v| v.set(v.get() + 1));
}

// =============================================================================
// Derived Back-Reference
// =============================================================================

/// Type-erased handle to the derived value that owns a dep.
///
/// Used for the self-read check during tracking and to refresh upstream
/// derived values while checking dirtiness.
pub(crate) trait AnyDerived {
    fn id(&self) -> SubscriberId;
    fn refresh(self: Rc<Self>);
    /// Called when the derived value's dep gains its first subscriber.
    fn on_warm(&self);
    /// Called when the derived value's dep loses its last subscriber.
    fn on_cold(self: Rc<Self>);
}

// =============================================================================
// Dep
// =============================================================================

/// Identity of one reactive cell.
///
/// Created lazily on first track of a keyed target, or owned directly by a
/// signal or derived value.
pub struct Dep {
    version: Cell<i64>,
    /// Head/tail of the subscriber-link list (insertion order).
    pub(crate) subs_head: Cell<Option<LinkId>>,
    pub(crate) subs_tail: Cell<Option<LinkId>>,
    sub_count: Cell<usize>,
    /// Cached link for the currently preparing/running subscriber.
    pub(crate) active_link: Cell<Option<LinkId>>,
    /// Set when this dep is the output of a derived value.
    owner: RefCell<Option<Weak<dyn AnyDerived>>>,
    /// Removes this dep from the key map that produced it once the
    /// subscriber count returns to zero.
    orphan_hook: RefCell<Option<Box<dyn Fn()>>>,
    /// Back-reference to the owning `Rc`, so links can hold the dep
    /// strongly from `&self` methods.
    weak_self: Weak<Dep>,
}

impl Dep {
    pub fn new() -> Rc<Self> {
        Rc::new_cyclic(|weak| Self {
            version: Cell::new(0),
            subs_head: Cell::new(None),
            subs_tail: Cell::new(None),
            sub_count: Cell::new(0),
            active_link: Cell::new(None),
            owner: RefCell::new(None),
            orphan_hook: RefCell::new(None),
            weak_self: weak.clone(),
        })
    }

    fn strong(&self) -> Rc<Dep> {
        self.weak_self.upgrade().expect("dep outlives its handle")
    }

    pub(crate) fn version(&self) -> i64 {
        self.version.get()
    }

    pub(crate) fn sub_count(&self) -> usize {
        self.sub_count.get()
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn AnyDerived>) {
        *self.owner.borrow_mut() = Some(owner);
    }

    pub(crate) fn owner(&self) -> Option<Rc<dyn AnyDerived>> {
        self.owner.borrow().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_orphan_hook(&self, hook: impl Fn() + 'static) {
        *self.orphan_hook.borrow_mut() = Some(Box::new(hook));
    }

    pub(crate) fn on_subscriber_added(&self) {
        let count = self.sub_count.get();
        self.sub_count.set(count + 1);
        if count == 0 {
            if let Some(owner) = self.owner() {
                owner.on_warm();
            }
        }
    }

    pub(crate) fn on_subscriber_removed(&self) {
        let count = self.sub_count.get().saturating_sub(1);
        self.sub_count.set(count);
        if count == 0 {
            if let Some(owner) = self.owner() {
                owner.on_cold();
            }
            let hook = self.orphan_hook.borrow_mut().take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    /// Record a read of this dep by the current subscriber.
    ///
    /// No-op when there is no current subscriber, tracking is paused, or
    /// the current subscriber is the derived value that owns this dep.
    pub fn track(&self) {
        if !is_tracking() {
            return;
        }
        let Some(sub) = active_sub() else { return };
        if let Some(owner) = self.owner() {
            if owner.id() == sub.state().id() {
                return;
            }
        }

        if let Some(id) = self.active_link.get() {
            if let Some(existing) = link::get(id) {
                if existing.sub.state().id() == sub.state().id() {
                    // Reuse: a -1 version means first use this run; sync it
                    // and keep the dep list in first-read order.
                    if existing.version.get() == link::VERSION_UNUSED {
                        existing.version.set(self.version.get());
                        link::move_to_deps_tail(id);
                    }
                    return;
                }
            }
        }
        let id = link::attach(self.strong(), sub);
        self.active_link.set(Some(id));
    }

    /// Bump the version without notifying. Used by derived values, whose
    /// readers discover the change through the version walk.
    pub(crate) fn bump_version_quiet(&self) {
        self.version.set(self.version.get() + 1);
    }

    /// Sync the current subscriber's link to this dep's version, if that
    /// link is the cached active one. A derived refresh bumps the version
    /// after the reader already linked; without the sync the reader would
    /// immediately look stale.
    pub(crate) fn sync_active_link_version(&self) {
        let Some(id) = self.active_link.get() else { return };
        let Some(l) = link::get(id) else { return };
        let Some(sub) = active_sub() else { return };
        if l.sub.state().id() == sub.state().id() {
            l.version.set(self.version.get());
        }
    }

    /// Record a change to this dep: bump versions and notify subscribers.
    pub fn trigger(&self) {
        self.version.set(self.version.get() + 1);
        bump_global_version();
        self.notify();
    }

    /// Notify all subscribers inside a batch, without bumping versions.
    pub(crate) fn notify(&self) {
        batch::start_batch();
        // Reverse insertion order here; the batch prepends, so the flush
        // sees forward insertion order.
        let mut cur = self.subs_tail.get();
        while let Some(id) = cur {
            let Some(l) = link::get(id) else { break };
            cur = l.prev_sub.get();
            let sub = l.sub.clone();
            if sub.notify() {
                if let Some(derived_dep) = l.sub.owned_dep() {
                    derived_dep.notify();
                }
            }
        }
        batch::end_batch();
    }
}
