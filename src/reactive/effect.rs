//! Effect - a re-runnable computation with automatic dependency refresh.
//!
//! Each run swaps the effect in as the current subscriber, marks every
//! existing link unused, executes the body, then reclaims links the body
//! did not touch. Finalization (restoring the previous subscriber and
//! tracking state, sweeping links, clearing RUNNING) happens on every
//! exit path, including unwinds out of the body.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::batch;
use super::dep::Dep;
use super::link;
use super::scope::{self, ScopeCore};
use super::subscriber::{
    swap_active_sub, swap_tracking, SubscriberCore, SubscriberFlags, SubscriberId,
    SubscriberState,
};

thread_local! {
    /// The effect whose body is currently executing (for cleanup
    /// registration). Distinct from the active subscriber, which may be a
    /// derived value.
    static CURRENT_EFFECT: RefCell<Option<Rc<EffectCore>>> = const { RefCell::new(None) };

    /// Effects that were triggered while paused, in first-arrival order.
    static PAUSED_TRIGGERS: RefCell<Vec<Rc<EffectCore>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) struct EffectCore {
    state: SubscriberState,
    body: RefCell<Box<dyn FnMut()>>,
    cleanup: RefCell<Option<Box<dyn FnOnce()>>>,
    on_stop: RefCell<Option<Box<dyn FnOnce()>>>,
    scheduler: RefCell<Option<Rc<dyn Fn()>>>,
    /// Owning scope and the index of this effect inside it, for O(1)
    /// detach on stop.
    pub(crate) scope: RefCell<Option<Weak<ScopeCore>>>,
    pub(crate) scope_index: Cell<usize>,
}

/// Restores the reactive world on drop, so a panicking body cannot leave
/// a stale current subscriber or half-swept links behind.
struct RunGuard {
    core: Rc<EffectCore>,
    prev_sub: Option<Rc<dyn SubscriberCore>>,
    prev_track: bool,
    prev_effect: Option<Rc<EffectCore>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        swap_active_sub(self.prev_sub.take());
        swap_tracking(self.prev_track);
        CURRENT_EFFECT.with(|c| *c.borrow_mut() = self.prev_effect.take());
        link::cleanup_deps(self.core.as_ref());
        self.core.state.remove(SubscriberFlags::RUNNING);
    }
}

impl EffectCore {
    fn new(body: Box<dyn FnMut()>) -> Rc<Self> {
        Rc::new(Self {
            state: SubscriberState::new(SubscriberFlags::ACTIVE),
            body: RefCell::new(body),
            cleanup: RefCell::new(None),
            on_stop: RefCell::new(None),
            scheduler: RefCell::new(None),
            scope: RefCell::new(None),
            scope_index: Cell::new(0),
        })
    }

    fn run(this: &Rc<Self>) {
        if !this.state.has(SubscriberFlags::ACTIVE) {
            if !this.state.has(SubscriberFlags::RUNNING) {
                let mut body = this.body.borrow_mut();
                (*body)();
            }
            return;
        }
        if this.state.has(SubscriberFlags::RUNNING) {
            // Re-entrant request (ALLOW_RECURSE self-write): re-run after
            // the current pass instead of literally re-entering the body.
            this.state.insert(SubscriberFlags::DIRTY);
            return;
        }

        loop {
            this.state.remove(SubscriberFlags::DIRTY);
            this.state.insert(SubscriberFlags::RUNNING);
            this.run_cleanup();
            link::prepare_deps(this.as_ref());

            let guard = RunGuard {
                core: this.clone(),
                prev_sub: swap_active_sub(Some(this.clone() as Rc<dyn SubscriberCore>)),
                prev_track: swap_tracking(true),
                prev_effect: CURRENT_EFFECT.with(|c| c.replace(Some(this.clone()))),
            };
            {
                let mut body = this.body.borrow_mut();
                (*body)();
            }
            drop(guard);

            if !(this.state.has(SubscriberFlags::DIRTY) && this.state.has(SubscriberFlags::ACTIVE))
            {
                break;
            }
        }
    }

    fn run_if_dirty(this: &Rc<Self>) {
        if link::is_dirty(this.as_ref()) {
            Self::run(this);
        }
    }

    /// Deliver a trigger outside the batch bookkeeping: park when paused,
    /// defer to the custom scheduler, or run if a dep actually changed.
    fn trigger_now(this: &Rc<Self>) {
        if this.state.has(SubscriberFlags::PAUSED) {
            PAUSED_TRIGGERS.with(|q| {
                let mut q = q.borrow_mut();
                if !q.iter().any(|e| e.state.id() == this.state.id()) {
                    q.push(this.clone());
                }
            });
            return;
        }
        let scheduler = this.scheduler.borrow().clone();
        match scheduler {
            Some(scheduler) => scheduler(),
            None => Self::run_if_dirty(this),
        }
    }

    /// Run the user cleanup registered during the previous run, outside of
    /// any subscriber context.
    fn run_cleanup(&self) {
        let cleanup = self.cleanup.borrow_mut().take();
        if let Some(cleanup) = cleanup {
            struct Restore(Option<Rc<dyn SubscriberCore>>);
            impl Drop for Restore {
                fn drop(&mut self) {
                    swap_active_sub(self.0.take());
                }
            }
            let _restore = Restore(swap_active_sub(None));
            cleanup();
        }
    }

    fn stop(this: &Rc<Self>) {
        if !this.state.has(SubscriberFlags::ACTIVE) {
            return;
        }
        link::detach_all(this.as_ref());
        this.run_cleanup();
        let on_stop = this.on_stop.borrow_mut().take();
        if let Some(on_stop) = on_stop {
            on_stop();
        }
        this.state.remove(SubscriberFlags::ACTIVE);
        PAUSED_TRIGGERS.with(|q| {
            q.borrow_mut().retain(|e| e.state.id() != this.state.id());
        });
        let owner = this.scope.borrow_mut().take();
        if let Some(owner) = owner.and_then(|w| w.upgrade()) {
            owner.forget_effect(this.scope_index.get(), this.state.id());
        }
    }
}

impl SubscriberCore for EffectCore {
    fn state(&self) -> &SubscriberState {
        &self.state
    }

    fn notify(self: Rc<Self>) -> bool {
        let flags = self.state.flags();
        if flags.contains(SubscriberFlags::RUNNING)
            && !flags.contains(SubscriberFlags::ALLOW_RECURSE)
        {
            return false;
        }
        if !flags.contains(SubscriberFlags::NOTIFIED) {
            self.state.insert(SubscriberFlags::NOTIFIED);
            batch::add(self, false);
        }
        false
    }

    fn flush(self: Rc<Self>) {
        EffectCore::trigger_now(&self);
    }

    fn owned_dep(&self) -> Option<Rc<Dep>> {
        None
    }
}

// =============================================================================
// Effect Handle
// =============================================================================

/// Handle to a re-runnable reactive computation.
///
/// Cloning shares the underlying effect. Dropping the handle does not stop
/// the effect; call [`Effect::stop`] (or stop the owning scope).
pub struct Effect {
    core: Rc<EffectCore>,
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

impl Effect {
    /// Create an effect without running it. The caller decides when the
    /// first run happens (renderers wire a scheduler first).
    pub fn new(body: impl FnMut() + 'static) -> Effect {
        let effect = Effect {
            core: EffectCore::new(Box::new(body)),
        };
        scope::register_effect(&effect);
        effect
    }

    /// Run the effect now, refreshing its dependencies.
    pub fn run(&self) {
        EffectCore::run(&self.core);
    }

    /// Stop the effect: detach every link, run pending cleanup, fire the
    /// on-stop hook. Idempotent; pending notifications become no-ops.
    pub fn stop(&self) {
        EffectCore::stop(&self.core);
    }

    pub fn is_active(&self) -> bool {
        self.core.state.has(SubscriberFlags::ACTIVE)
    }

    /// Defer triggers until [`Effect::resume`].
    pub fn pause(&self) {
        self.core.state.insert(SubscriberFlags::PAUSED);
    }

    /// Resume and replay at most one deferred trigger.
    pub fn resume(&self) {
        if !self.core.state.has(SubscriberFlags::PAUSED) {
            return;
        }
        self.core.state.remove(SubscriberFlags::PAUSED);
        let deferred = PAUSED_TRIGGERS.with(|q| {
            let mut q = q.borrow_mut();
            let pos = q.iter().position(|e| e.state.id() == self.core.state.id());
            pos.map(|p| q.remove(p))
        });
        if deferred.is_some() {
            EffectCore::trigger_now(&self.core);
        }
    }

    /// Let notifications fired by the effect's own writes re-run it.
    pub fn allow_recurse(&self, allow: bool) {
        if allow {
            self.core.state.insert(SubscriberFlags::ALLOW_RECURSE);
        } else {
            self.core.state.remove(SubscriberFlags::ALLOW_RECURSE);
        }
    }

    /// Replace the default run-if-dirty delivery with a custom scheduler.
    pub fn set_scheduler(&self, scheduler: impl Fn() + 'static) {
        *self.core.scheduler.borrow_mut() = Some(Rc::new(scheduler));
    }

    /// Hook invoked once when the effect is stopped.
    pub fn set_on_stop(&self, hook: impl FnOnce() + 'static) {
        *self.core.on_stop.borrow_mut() = Some(Box::new(hook));
    }

    pub(crate) fn id(&self) -> SubscriberId {
        self.core.state.id()
    }

    pub(crate) fn set_scope(&self, owner: Weak<ScopeCore>, index: usize) {
        *self.core.scope.borrow_mut() = Some(owner);
        self.core.scope_index.set(index);
    }

    pub(crate) fn set_scope_index(&self, index: usize) {
        self.core.scope_index.set(index);
    }
}

/// Create an effect and run it immediately.
pub fn effect(body: impl FnMut() + 'static) -> Effect {
    let e = Effect::new(body);
    e.run();
    e
}

/// Register a cleanup to run before the current effect's next run, or when
/// it stops. Must be called from inside an effect body.
pub fn on_effect_cleanup(cleanup: impl FnOnce() + 'static) {
    CURRENT_EFFECT.with(|c| {
        let current = c.borrow();
        match current.as_ref() {
            Some(effect) => {
                *effect.cleanup.borrow_mut() = Some(Box::new(cleanup));
            }
            None => {
                log::warn!("on_effect_cleanup called outside of an effect body; ignored");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::signal::signal;
    use std::cell::Cell as StdCell;

    #[test]
    fn test_effect_runs_immediately() {
        let runs = Rc::new(StdCell::new(0));
        let runs_clone = runs.clone();
        let _e = effect(move || runs_clone.set(runs_clone.get() + 1));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_unrelated_write_does_not_rerun() {
        let a = signal(1);
        let b = signal(2);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let a_clone = a.clone();
        let seen_clone = seen.clone();
        let _e = effect(move || {
            seen_clone.borrow_mut().push(a_clone.get());
        });
        assert_eq!(*seen.borrow(), vec![1]);

        b.set(99);
        assert_eq!(*seen.borrow(), vec![1], "unrelated write must not re-run");

        a.set(7);
        assert_eq!(*seen.borrow(), vec![1, 7]);
    }

    #[test]
    fn test_batched_update_runs_once() {
        let a = signal(1);
        let b = signal(2);
        let runs = Rc::new(StdCell::new(0));
        let observed = Rc::new(StdCell::new((0, 0)));

        let (a2, b2) = (a.clone(), b.clone());
        let (runs2, observed2) = (runs.clone(), observed.clone());
        let _e = effect(move || {
            runs2.set(runs2.get() + 1);
            observed2.set((a2.get(), b2.get()));
        });
        assert_eq!(runs.get(), 1);

        batch::start_batch();
        a.set(10);
        b.set(20);
        assert_eq!(runs.get(), 1, "no delivery while batch is open");
        batch::end_batch();

        assert_eq!(runs.get(), 2);
        assert_eq!(observed.get(), (10, 20), "second run sees both writes");
    }

    #[test]
    fn test_dynamic_deps_are_dropped() {
        let gate = signal(true);
        let a = signal(1);
        let b = signal(2);
        let runs = Rc::new(StdCell::new(0));

        let (gate2, a2, b2, runs2) = (gate.clone(), a.clone(), b.clone(), runs.clone());
        let _e = effect(move || {
            runs2.set(runs2.get() + 1);
            if gate2.get() {
                let _ = a2.get();
            } else {
                let _ = b2.get();
            }
        });
        assert_eq!(runs.get(), 1);

        gate.set(false);
        assert_eq!(runs.get(), 2);

        // `a` is no longer a dependency.
        a.set(100);
        assert_eq!(runs.get(), 2, "stale dep must be swept after the run");

        b.set(200);
        assert_eq!(runs.get(), 3);
    }

    #[test]
    fn test_insertion_order_flush() {
        let s = signal(0);
        let order = Rc::new(RefCell::new(Vec::new()));

        let (s1, o1) = (s.clone(), order.clone());
        let _e1 = effect(move || {
            let _ = s1.get();
            o1.borrow_mut().push("first");
        });
        let (s2, o2) = (s.clone(), order.clone());
        let _e2 = effect(move || {
            let _ = s2.get();
            o2.borrow_mut().push("second");
        });
        order.borrow_mut().clear();

        batch::start_batch();
        s.set(1);
        s.set(2);
        batch::end_batch();

        assert_eq!(
            *order.borrow(),
            vec!["first", "second"],
            "effects flush in first-subscription order"
        );
    }

    #[test]
    fn test_stop_detaches() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));
        let (s2, runs2) = (s.clone(), runs.clone());
        let e = effect(move || {
            let _ = s2.get();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        e.stop();
        s.set(1);
        assert_eq!(runs.get(), 1, "stopped effect must not re-run");

        // Idempotent.
        e.stop();
        assert!(!e.is_active());
    }

    #[test]
    fn test_stop_during_own_run_finishes_cleanly() {
        let s = signal(0);
        let handle: Rc<RefCell<Option<Effect>>> = Rc::new(RefCell::new(None));
        let runs = Rc::new(StdCell::new(0));

        let (s2, handle2, runs2) = (s.clone(), handle.clone(), runs.clone());
        let e = effect(move || {
            let _ = s2.get();
            runs2.set(runs2.get() + 1);
            if runs2.get() == 2 {
                if let Some(me) = handle2.borrow().as_ref() {
                    me.stop();
                }
            }
        });
        *handle.borrow_mut() = Some(e.clone());

        s.set(1);
        assert_eq!(runs.get(), 2);
        assert!(!e.is_active());

        s.set(2);
        assert_eq!(runs.get(), 2, "self-stopped effect must not run again");
    }

    #[test]
    fn test_pause_accumulates_one_trigger() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));
        let (s2, runs2) = (s.clone(), runs.clone());
        let e = effect(move || {
            let _ = s2.get();
            runs2.set(runs2.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        e.pause();
        s.set(1);
        s.set(2);
        s.set(3);
        assert_eq!(runs.get(), 1, "paused effect defers triggers");

        e.resume();
        assert_eq!(runs.get(), 2, "resume dispatches the deferred trigger once");

        e.resume();
        assert_eq!(runs.get(), 2, "resume without a pending trigger is a no-op");
    }

    #[test]
    fn test_effect_cleanup_runs_before_next_run() {
        let s = signal(0);
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s2, log2) = (s.clone(), log.clone());
        let e = effect(move || {
            let v = s2.get();
            let log3 = log2.clone();
            log2.borrow_mut().push(format!("run {v}"));
            on_effect_cleanup(move || log3.borrow_mut().push(format!("cleanup {v}")));
        });

        s.set(1);
        e.stop();

        assert_eq!(
            *log.borrow(),
            vec!["run 0", "cleanup 0", "run 1", "cleanup 1"],
            "cleanup interleaves runs and fires at stop"
        );
    }

    #[test]
    fn test_allow_recurse_reruns_after_self_write() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let (s2, runs2) = (s.clone(), runs.clone());
        let e = Effect::new(move || {
            runs2.set(runs2.get() + 1);
            let v = s2.get();
            if v < 3 {
                s2.set(v + 1);
            }
        });
        e.allow_recurse(true);
        e.run();

        assert_eq!(s.get(), 3, "self-writes keep re-running until settled");
        assert_eq!(runs.get(), 4);
    }

    #[test]
    fn test_self_write_without_recurse_is_ignored() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let (s2, runs2) = (s.clone(), runs.clone());
        let _e = effect(move || {
            runs2.set(runs2.get() + 1);
            let v = s2.get();
            s2.set(v + 1);
        });

        assert_eq!(runs.get(), 1, "self-trigger is dropped without ALLOW_RECURSE");
        assert_eq!(s.get(), 1);
    }
}
