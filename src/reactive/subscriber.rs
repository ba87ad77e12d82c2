//! Subscriber contract - shared state for anything that tracks deps.
//!
//! Effects and derived values are both subscribers: they run a computation
//! while registered as the "current subscriber", and every reactive read
//! during that run links them to the dep that was read. The shared graph
//! state (flags, dep-link list ends, batch chain) lives in [`SubscriberState`]
//! so the link machinery can treat both kinds uniformly.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bitflags::bitflags;

use super::dep::Dep;
use super::link::LinkId;

bitflags! {
    /// Lifecycle and bookkeeping flags shared by effects and derived values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscriberFlags: u16 {
        /// Subscriber has not been stopped.
        const ACTIVE = 1 << 0;
        /// Currently executing its body.
        const RUNNING = 1 << 1;
        /// Has live downstream subscribers (derived values only).
        const TRACKING = 1 << 2;
        /// Already enqueued in the current batch.
        const NOTIFIED = 1 << 3;
        /// A dependency changed since the last run / evaluation.
        const DIRTY = 1 << 4;
        /// Self-triggered notifications re-run instead of being dropped.
        const ALLOW_RECURSE = 1 << 5;
        /// Triggers are deferred until resume.
        const PAUSED = 1 << 6;
        /// Derived value has produced a value at least once.
        const EVALUATED = 1 << 7;
    }
}

// =============================================================================
// Subscriber Identity
// =============================================================================

/// Unique identity for a subscriber within the current reactive world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

thread_local! {
    static NEXT_SUBSCRIBER_ID: Cell<u64> = const { Cell::new(0) };
}

impl SubscriberId {
    pub(crate) fn next() -> Self {
        NEXT_SUBSCRIBER_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            SubscriberId(id)
        })
    }
}

// =============================================================================
// Shared Graph State
// =============================================================================

/// Graph-side state embedded in every subscriber.
///
/// All fields are `Cell`s so the link machinery can splice lists without
/// borrowing the subscriber itself.
pub(crate) struct SubscriberState {
    id: SubscriberId,
    flags: Cell<SubscriberFlags>,
    /// Head of this subscriber's dep-link list (first-read order).
    pub(crate) deps_head: Cell<Option<LinkId>>,
    /// Tail of this subscriber's dep-link list.
    pub(crate) deps_tail: Cell<Option<LinkId>>,
    /// Next subscriber in the batch chain (prepend on notify).
    pub(crate) next_batched: RefCell<Option<Rc<dyn SubscriberCore>>>,
}

impl SubscriberState {
    pub(crate) fn new(flags: SubscriberFlags) -> Self {
        Self {
            id: SubscriberId::next(),
            flags: Cell::new(flags),
            deps_head: Cell::new(None),
            deps_tail: Cell::new(None),
            next_batched: RefCell::new(None),
        }
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn flags(&self) -> SubscriberFlags {
        self.flags.get()
    }

    pub(crate) fn has(&self, flag: SubscriberFlags) -> bool {
        self.flags.get().contains(flag)
    }

    pub(crate) fn insert(&self, flag: SubscriberFlags) {
        self.flags.set(self.flags.get() | flag);
    }

    pub(crate) fn remove(&self, flag: SubscriberFlags) {
        self.flags.set(self.flags.get() - flag);
    }
}

/// Common contract of anything that tracks deps.
///
/// `notify` returns `true` when the subscriber is a derived value, so the
/// dep propagator knows to recurse into the derived value's own dep.
pub(crate) trait SubscriberCore {
    fn state(&self) -> &SubscriberState;

    /// React to a dep change. Pure bookkeeping: sets flags and enqueues
    /// into the batch; never runs user code.
    fn notify(self: Rc<Self>) -> bool;

    /// Deliver a batched notification (batch flush calls this on effects;
    /// derived values are lazy and ignore it).
    fn flush(self: Rc<Self>);

    /// The dep owned by this subscriber, when it is a derived value.
    fn owned_dep(&self) -> Option<Rc<Dep>>;
}

// =============================================================================
// Current Subscriber
// =============================================================================

thread_local! {
    static ACTIVE_SUB: RefCell<Option<Rc<dyn SubscriberCore>>> = const { RefCell::new(None) };

    /// Whether reads currently establish dependencies.
    static SHOULD_TRACK: Cell<bool> = const { Cell::new(true) };

    /// Saved tracking states for pause/reset nesting.
    static TRACK_STACK: RefCell<Vec<bool>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn active_sub() -> Option<Rc<dyn SubscriberCore>> {
    ACTIVE_SUB.with(|s| s.borrow().clone())
}

/// Swap in a new current subscriber, returning the previous one.
pub(crate) fn swap_active_sub(
    next: Option<Rc<dyn SubscriberCore>>,
) -> Option<Rc<dyn SubscriberCore>> {
    ACTIVE_SUB.with(|s| s.replace(next))
}

pub(crate) fn is_tracking() -> bool {
    SHOULD_TRACK.with(|t| t.get())
}

/// Set the tracking flag, returning the previous value.
pub(crate) fn swap_tracking(on: bool) -> bool {
    SHOULD_TRACK.with(|t| t.replace(on))
}

/// Temporarily disable dependency tracking.
///
/// Must be paired with [`reset_tracking`].
pub fn pause_tracking() {
    TRACK_STACK.with(|s| s.borrow_mut().push(is_tracking()));
    SHOULD_TRACK.with(|t| t.set(false));
}

/// Temporarily re-enable dependency tracking.
///
/// Must be paired with [`reset_tracking`].
pub fn enable_tracking() {
    TRACK_STACK.with(|s| s.borrow_mut().push(is_tracking()));
    SHOULD_TRACK.with(|t| t.set(true));
}

/// Restore the tracking state saved by the last pause/enable.
pub fn reset_tracking() {
    let last = TRACK_STACK.with(|s| s.borrow_mut().pop());
    SHOULD_TRACK.with(|t| t.set(last.unwrap_or(true)));
}

/// Run `f` with dependency tracking disabled.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    pause_tracking();
    let result = f();
    reset_tracking();
    result
}
