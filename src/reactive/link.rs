//! Link - the edge record between one Dep and one Subscriber.
//!
//! A link is a node in two doubly-linked lists at once: the subscriber's
//! dep list (ordered by first read) and the dep's subscriber list (ordered
//! by first subscription). Links live in a thread-local slab arena with
//! stable indices, so deps and subscribers store plain handles and freed
//! slots are reused without allocation churn.
//!
//! The `version == -1` protocol drives dependency refresh: before a run,
//! every link of the subscriber is marked unused (-1); reads during the run
//! sync links back to their dep's version; after the run, links still at -1
//! are unlinked from both lists and reclaimed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use slabmap::SlabMap;

use super::dep::Dep;
use super::subscriber::{SubscriberCore, SubscriberFlags};

/// Stable handle of a link in the arena.
pub(crate) type LinkId = usize;

/// Marks a link as unused during the current run.
pub(crate) const VERSION_UNUSED: i64 = -1;

pub(crate) struct Link {
    /// The dep's version at the time of last use, or -1 for "not used
    /// this run".
    pub(crate) version: Cell<i64>,
    pub(crate) dep: Rc<Dep>,
    pub(crate) sub: Rc<dyn SubscriberCore>,
    /// Previous/next within the subscriber's dep list.
    pub(crate) prev_dep: Cell<Option<LinkId>>,
    pub(crate) next_dep: Cell<Option<LinkId>>,
    /// Previous/next within the dep's subscriber list.
    pub(crate) prev_sub: Cell<Option<LinkId>>,
    pub(crate) next_sub: Cell<Option<LinkId>>,
    /// The dep's active link before this run, restored by the cleanup sweep.
    pub(crate) prev_active: Cell<Option<LinkId>>,
}

thread_local! {
    static LINKS: RefCell<SlabMap<Rc<Link>>> = RefCell::new(SlabMap::new());
}

pub(crate) fn get(id: LinkId) -> Option<Rc<Link>> {
    LINKS.with(|links| links.borrow().get(id).cloned())
}

/// Number of live links in the arena (diagnostics and tests).
pub(crate) fn live_count() -> usize {
    LINKS.with(|links| links.borrow().len())
}

// =============================================================================
// Attach / Detach
// =============================================================================

/// Create a link between `dep` and `sub`, splicing it onto the tail of both
/// lists and bumping the dep's subscriber count.
pub(crate) fn attach(dep: Rc<Dep>, sub: Rc<dyn SubscriberCore>) -> LinkId {
    let link = Rc::new(Link {
        version: Cell::new(dep.version()),
        dep: dep.clone(),
        sub: sub.clone(),
        prev_dep: Cell::new(None),
        next_dep: Cell::new(None),
        prev_sub: Cell::new(None),
        next_sub: Cell::new(None),
        prev_active: Cell::new(None),
    });
    let id = LINKS.with(|links| links.borrow_mut().insert(link.clone()));

    // Tail of the subscriber's dep list.
    let state = sub.state();
    link.prev_dep.set(state.deps_tail.get());
    if let Some(tail) = state.deps_tail.get().and_then(get) {
        tail.next_dep.set(Some(id));
    } else {
        state.deps_head.set(Some(id));
    }
    state.deps_tail.set(Some(id));

    // Tail of the dep's subscriber list.
    link.prev_sub.set(dep.subs_tail.get());
    if let Some(tail) = dep.subs_tail.get().and_then(get) {
        tail.next_sub.set(Some(id));
    } else {
        dep.subs_head.set(Some(id));
    }
    dep.subs_tail.set(Some(id));

    dep.on_subscriber_added();
    id
}

/// Unlink `id` from both lists and release its arena slot.
pub(crate) fn detach(id: LinkId) {
    let Some(link) = get(id) else { return };
    unlink_from_sub(&link, id);
    unlink_from_dep(&link, id);
    LINKS.with(|links| {
        links.borrow_mut().remove(id);
    });
    link.dep.on_subscriber_removed();
}

fn unlink_from_sub(link: &Link, id: LinkId) {
    let state = link.sub.state();
    match link.prev_dep.get().and_then(get) {
        Some(prev) => prev.next_dep.set(link.next_dep.get()),
        None => state.deps_head.set(link.next_dep.get()),
    }
    match link.next_dep.get().and_then(get) {
        Some(next) => next.prev_dep.set(link.prev_dep.get()),
        None => state.deps_tail.set(link.prev_dep.get()),
    }
    debug_assert!(state.deps_head.get() != Some(id) && state.deps_tail.get() != Some(id));
    link.prev_dep.set(None);
    link.next_dep.set(None);
}

fn unlink_from_dep(link: &Link, id: LinkId) {
    match link.prev_sub.get().and_then(get) {
        Some(prev) => prev.next_sub.set(link.next_sub.get()),
        None => link.dep.subs_head.set(link.next_sub.get()),
    }
    match link.next_sub.get().and_then(get) {
        Some(next) => next.prev_sub.set(link.prev_sub.get()),
        None => link.dep.subs_tail.set(link.prev_sub.get()),
    }
    link.prev_sub.set(None);
    link.next_sub.set(None);
    // A removed link can no longer serve as the dep's cached active link.
    if link.dep.active_link.get() == Some(id) {
        link.dep.active_link.set(None);
    }
}

/// Move an existing link to the tail of its subscriber's dep list,
/// preserving "deps appear in the order they are first read" across runs.
pub(crate) fn move_to_deps_tail(id: LinkId) {
    let Some(link) = get(id) else { return };
    let state = link.sub.state();
    if state.deps_tail.get() == Some(id) {
        return;
    }
    unlink_from_sub(&link, id);
    link.prev_dep.set(state.deps_tail.get());
    if let Some(tail) = state.deps_tail.get().and_then(get) {
        tail.next_dep.set(Some(id));
    } else {
        state.deps_head.set(Some(id));
    }
    state.deps_tail.set(Some(id));
}

// =============================================================================
// Run Sweeps
// =============================================================================

/// Pre-run sweep: mark every link unused and install each link as its
/// dep's active link, saving the previous active link for restore.
pub(crate) fn prepare_deps(sub: &dyn SubscriberCore) {
    let mut cur = sub.state().deps_head.get();
    while let Some(id) = cur {
        let Some(link) = get(id) else { break };
        link.version.set(VERSION_UNUSED);
        link.prev_active.set(link.dep.active_link.get());
        link.dep.active_link.set(Some(id));
        cur = link.next_dep.get();
    }
}

/// Post-run sweep, tail to head: reclaim links the run did not touch and
/// restore each surviving dep's previous active link.
pub(crate) fn cleanup_deps(sub: &dyn SubscriberCore) {
    let mut cur = sub.state().deps_tail.get();
    while let Some(id) = cur {
        let Some(link) = get(id) else { break };
        cur = link.prev_dep.get();
        if link.version.get() == VERSION_UNUSED {
            if link.dep.active_link.get() == Some(id) {
                link.dep.active_link.set(link.prev_active.get());
            }
            link.prev_active.set(None);
            detach(id);
        } else {
            link.dep.active_link.set(link.prev_active.get());
            link.prev_active.set(None);
        }
    }
}

/// Detach every link of `sub` (stop path). O(|deps|).
pub(crate) fn detach_all(sub: &dyn SubscriberCore) {
    let mut cur = sub.state().deps_head.get();
    while let Some(id) = cur {
        let Some(link) = get(id) else { break };
        cur = link.next_dep.get();
        detach(id);
    }
    sub.state().deps_head.set(None);
    sub.state().deps_tail.set(None);
}

/// Whether any of `sub`'s deps changed since its links last synced,
/// refreshing upstream derived values along the way.
pub(crate) fn is_dirty(sub: &dyn SubscriberCore) -> bool {
    let mut cur = sub.state().deps_head.get();
    while let Some(id) = cur {
        let Some(link) = get(id) else { break };
        cur = link.next_dep.get();
        if link.dep.version() != link.version.get() {
            return true;
        }
        if let Some(owner) = link.dep.owner() {
            owner.refresh();
            if link.dep.version() != link.version.get() {
                return true;
            }
        }
    }
    if sub.state().has(SubscriberFlags::DIRTY) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscriber::SubscriberState;

    struct StubSub {
        state: SubscriberState,
    }

    impl StubSub {
        fn new() -> Rc<Self> {
            Rc::new(Self {
                state: SubscriberState::new(SubscriberFlags::ACTIVE),
            })
        }
    }

    impl SubscriberCore for StubSub {
        fn state(&self) -> &SubscriberState {
            &self.state
        }
        fn notify(self: Rc<Self>) -> bool {
            false
        }
        fn flush(self: Rc<Self>) {}
        fn owned_dep(&self) -> Option<Rc<Dep>> {
            None
        }
    }

    fn dep_list(sub: &dyn SubscriberCore) -> Vec<LinkId> {
        let mut out = Vec::new();
        let mut cur = sub.state().deps_head.get();
        while let Some(id) = cur {
            out.push(id);
            cur = get(id).unwrap().next_dep.get();
        }
        out
    }

    #[test]
    fn test_attach_links_both_lists() {
        let dep = Dep::new();
        let sub = StubSub::new();

        let id = attach(dep.clone(), sub.clone());

        assert_eq!(sub.state().deps_head.get(), Some(id));
        assert_eq!(sub.state().deps_tail.get(), Some(id));
        assert_eq!(dep.subs_head.get(), Some(id));
        assert_eq!(dep.subs_tail.get(), Some(id));
        assert_eq!(dep.sub_count(), 1);

        detach(id);
        assert_eq!(dep.sub_count(), 0);
        assert_eq!(sub.state().deps_head.get(), None);
        assert_eq!(dep.subs_head.get(), None);
    }

    #[test]
    fn test_link_bijection() {
        let a = Dep::new();
        let b = Dep::new();
        let sub = StubSub::new();

        let ia = attach(a.clone(), sub.clone());
        let ib = attach(b.clone(), sub.clone());

        // Dep-side and sub-side membership agree, one link per pair.
        assert_eq!(dep_list(sub.as_ref()), vec![ia, ib]);
        assert_eq!(a.subs_head.get(), Some(ia));
        assert_eq!(b.subs_head.get(), Some(ib));
        assert_eq!(a.sub_count(), 1);
        assert_eq!(b.sub_count(), 1);

        detach(ia);
        assert_eq!(dep_list(sub.as_ref()), vec![ib]);
        assert_eq!(a.sub_count(), 0);
        detach(ib);
    }

    #[test]
    fn test_move_to_deps_tail() {
        let a = Dep::new();
        let b = Dep::new();
        let c = Dep::new();
        let sub = StubSub::new();

        let ia = attach(a, sub.clone());
        let ib = attach(b, sub.clone());
        let ic = attach(c, sub.clone());
        assert_eq!(dep_list(sub.as_ref()), vec![ia, ib, ic]);

        move_to_deps_tail(ia);
        assert_eq!(dep_list(sub.as_ref()), vec![ib, ic, ia]);

        // Already at the tail: no change.
        move_to_deps_tail(ia);
        assert_eq!(dep_list(sub.as_ref()), vec![ib, ic, ia]);

        detach_all(sub.as_ref());
    }

    #[test]
    fn test_cleanup_reclaims_unused_links() {
        let a = Dep::new();
        let b = Dep::new();
        let sub = StubSub::new();

        let ia = attach(a.clone(), sub.clone());
        let ib = attach(b.clone(), sub.clone());

        prepare_deps(sub.as_ref());
        // Only `a` is "read" this run.
        get(ia).unwrap().version.set(a.version());
        cleanup_deps(sub.as_ref());

        assert_eq!(dep_list(sub.as_ref()), vec![ia]);
        assert_eq!(a.sub_count(), 1);
        assert_eq!(b.sub_count(), 0, "unused link must release its dep");
        assert!(get(ib).is_none(), "unused link slot must be reclaimed");

        detach_all(sub.as_ref());
        assert_eq!(live_count(), 0, "no links may outlive their endpoints");
    }

    #[test]
    fn test_detach_all_clears_everything() {
        let deps: Vec<_> = (0..4).map(|_| Dep::new()).collect();
        let sub = StubSub::new();
        for d in &deps {
            attach(d.clone(), sub.clone());
        }

        detach_all(sub.as_ref());

        assert_eq!(sub.state().deps_head.get(), None);
        assert_eq!(sub.state().deps_tail.get(), None);
        for d in &deps {
            assert_eq!(d.sub_count(), 0);
            assert_eq!(d.subs_head.get(), None);
        }
    }
}
