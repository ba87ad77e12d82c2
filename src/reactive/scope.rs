//! EffectScope - hierarchical ownership of effects and child scopes.
//!
//! A scope collects every effect created while it is active, so one
//! `stop()` tears the whole subtree down. Scopes form a tree rooted at
//! whichever scope is currently active; child scopes remember their index
//! in the parent's list for O(1) removal by swap-with-last.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::effect::Effect;
use super::subscriber::SubscriberId;

pub(crate) struct ScopeCore {
    active: Cell<bool>,
    paused: Cell<bool>,
    effects: RefCell<Vec<Effect>>,
    scopes: RefCell<Vec<EffectScope>>,
    cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    parent: RefCell<Option<Weak<ScopeCore>>>,
    /// This scope's index in the parent's child list.
    index: Cell<usize>,
}

impl ScopeCore {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            active: Cell::new(true),
            paused: Cell::new(false),
            effects: RefCell::new(Vec::new()),
            scopes: RefCell::new(Vec::new()),
            cleanups: RefCell::new(Vec::new()),
            parent: RefCell::new(None),
            index: Cell::new(0),
        })
    }

    /// O(1) removal of a stopped effect. The id guards against stale
    /// indices when the scope is already draining.
    pub(crate) fn forget_effect(&self, index: usize, id: SubscriberId) {
        let mut effects = self.effects.borrow_mut();
        if index >= effects.len() || effects[index].id() != id {
            return;
        }
        effects.swap_remove(index);
        if let Some(moved) = effects.get(index) {
            moved.set_scope_index(index);
        }
    }

    fn forget_scope(&self, index: usize, ptr: *const ScopeCore) {
        let mut scopes = self.scopes.borrow_mut();
        if index >= scopes.len() || !std::ptr::eq(Rc::as_ptr(&scopes[index].core), ptr) {
            return;
        }
        scopes.swap_remove(index);
        if let Some(moved) = scopes.get(index) {
            moved.core.index.set(index);
        }
    }
}

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<EffectScope>> = const { RefCell::new(None) };
}

/// A container owning effects and child scopes with a combined lifetime.
/// Cloning shares the scope.
pub struct EffectScope {
    core: Rc<ScopeCore>,
}

impl Clone for EffectScope {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

/// Create a scope linked to the currently active scope.
pub fn effect_scope() -> EffectScope {
    let scope = EffectScope { core: ScopeCore::new() };
    if let Some(parent) = get_current_scope() {
        scope.core.index.set(parent.core.scopes.borrow().len());
        *scope.core.parent.borrow_mut() = Some(Rc::downgrade(&parent.core));
        parent.core.scopes.borrow_mut().push(scope.clone());
    }
    scope
}

/// Create a scope that is not owned by the active scope.
pub fn effect_scope_detached() -> EffectScope {
    EffectScope { core: ScopeCore::new() }
}

/// The scope new effects currently register with, if any.
pub fn get_current_scope() -> Option<EffectScope> {
    ACTIVE_SCOPE.with(|s| s.borrow().clone())
}

/// Register a callback to run when the active scope stops.
pub fn on_scope_dispose(cleanup: impl FnOnce() + 'static) {
    match get_current_scope() {
        Some(scope) => scope.core.cleanups.borrow_mut().push(Box::new(cleanup)),
        None => log::warn!("on_scope_dispose called outside of an active scope; ignored"),
    }
}

/// Like [`on_scope_dispose`] but silent without a scope (internal hooks).
pub(crate) fn register_scope_cleanup(cleanup: impl FnOnce() + 'static) {
    if let Some(scope) = get_current_scope() {
        scope.core.cleanups.borrow_mut().push(Box::new(cleanup));
    }
}

/// Attach a freshly created effect to the active scope.
pub(crate) fn register_effect(effect: &Effect) {
    if let Some(scope) = get_current_scope() {
        if scope.core.active.get() {
            let mut effects = scope.core.effects.borrow_mut();
            effect.set_scope(Rc::downgrade(&scope.core), effects.len());
            effects.push(effect.clone());
        }
    }
}

impl EffectScope {
    /// Run `f` with this scope active, restoring the previous scope after.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        if !self.core.active.get() {
            log::warn!("cannot run an inactive scope");
            return f();
        }
        struct Restore(Option<EffectScope>);
        impl Drop for Restore {
            fn drop(&mut self) {
                ACTIVE_SCOPE.with(|s| *s.borrow_mut() = self.0.take());
            }
        }
        let _restore = Restore(ACTIVE_SCOPE.with(|s| s.replace(Some(self.clone()))));
        f()
    }

    pub fn is_active(&self) -> bool {
        self.core.active.get()
    }

    /// Defer triggers for every owned effect and child scope.
    pub fn pause(&self) {
        if self.core.paused.get() {
            return;
        }
        self.core.paused.set(true);
        for scope in self.core.scopes.borrow().iter() {
            scope.pause();
        }
        for effect in self.core.effects.borrow().iter() {
            effect.pause();
        }
    }

    /// Resume every owned effect and child scope, replaying deferred
    /// triggers.
    pub fn resume(&self) {
        if !self.core.paused.get() {
            return;
        }
        self.core.paused.set(false);
        for scope in self.core.scopes.borrow().iter() {
            scope.resume();
        }
        for effect in self.core.effects.borrow().iter() {
            effect.resume();
        }
    }

    /// Stop all owned effects, run cleanup callbacks, stop child scopes,
    /// and detach from the parent. Idempotent.
    pub fn stop(&self) {
        if !self.core.active.get() {
            return;
        }
        self.core.active.set(false);

        let effects = std::mem::take(&mut *self.core.effects.borrow_mut());
        for effect in effects {
            effect.stop();
        }
        let cleanups = std::mem::take(&mut *self.core.cleanups.borrow_mut());
        for cleanup in cleanups {
            cleanup();
        }
        let scopes = std::mem::take(&mut *self.core.scopes.borrow_mut());
        for scope in scopes {
            scope.stop();
        }

        let parent = self.core.parent.borrow_mut().take();
        if let Some(parent) = parent.and_then(|w| w.upgrade()) {
            parent.forget_scope(self.core.index.get(), Rc::as_ptr(&self.core));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::effect;
    use crate::reactive::signal::signal;
    use std::cell::Cell as StdCell;

    #[test]
    fn test_scope_stops_owned_effects() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let scope = effect_scope();
        let (s2, runs2) = (s.clone(), runs.clone());
        scope.run(|| {
            let _ = effect(move || {
                let _ = s2.get();
                runs2.set(runs2.get() + 1);
            });
        });
        assert_eq!(runs.get(), 1);

        s.set(1);
        assert_eq!(runs.get(), 2);

        scope.stop();
        s.set(2);
        assert_eq!(runs.get(), 2, "effects owned by a stopped scope must not run");
    }

    #[test]
    fn test_nested_scope_stops_with_parent() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let outer = effect_scope();
        let (s2, runs2) = (s.clone(), runs.clone());
        outer.run(|| {
            let inner = effect_scope();
            inner.run(|| {
                let _ = effect(move || {
                    let _ = s2.get();
                    runs2.set(runs2.get() + 1);
                });
            });
        });

        outer.stop();
        s.set(1);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_detached_scope_survives_parent() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let outer = effect_scope();
        let detached: Rc<RefCell<Option<EffectScope>>> = Rc::new(RefCell::new(None));

        let (s2, runs2, detached2) = (s.clone(), runs.clone(), detached.clone());
        outer.run(move || {
            let scope = effect_scope_detached();
            scope.run(|| {
                let _ = effect(move || {
                    let _ = s2.get();
                    runs2.set(runs2.get() + 1);
                });
            });
            *detached2.borrow_mut() = Some(scope);
        });

        outer.stop();
        s.set(1);
        assert_eq!(runs.get(), 2, "a detached scope is not stopped by its creator");

        detached.borrow().as_ref().unwrap().stop();
        s.set(2);
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_on_scope_dispose_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        let scope = effect_scope();
        let log2 = log.clone();
        scope.run(move || {
            let (a, b) = (log2.clone(), log2.clone());
            on_scope_dispose(move || a.borrow_mut().push("first"));
            on_scope_dispose(move || b.borrow_mut().push("second"));
        });

        scope.stop();
        assert_eq!(*log.borrow(), vec!["first", "second"]);

        // Idempotent.
        scope.stop();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_pause_resume_recurses() {
        let s = signal(0);
        let runs = Rc::new(StdCell::new(0));

        let scope = effect_scope();
        let (s2, runs2) = (s.clone(), runs.clone());
        scope.run(|| {
            let inner = effect_scope();
            inner.run(|| {
                let _ = effect(move || {
                    let _ = s2.get();
                    runs2.set(runs2.get() + 1);
                });
            });
        });
        assert_eq!(runs.get(), 1);

        scope.pause();
        s.set(1);
        s.set(2);
        assert_eq!(runs.get(), 1, "paused scope defers nested effects");

        scope.resume();
        assert_eq!(runs.get(), 2, "resume replays the deferred trigger once");
    }

    #[test]
    fn test_current_scope_restored() {
        assert!(get_current_scope().is_none());
        let outer = effect_scope();
        outer.run(|| {
            assert!(get_current_scope().is_some());
            let inner = effect_scope();
            inner.run(|| {
                let current = get_current_scope().unwrap();
                assert!(std::ptr::eq(
                    Rc::as_ptr(&current.core),
                    Rc::as_ptr(&inner.core)
                ));
            });
            let current = get_current_scope().unwrap();
            assert!(std::ptr::eq(
                Rc::as_ptr(&current.core),
                Rc::as_ptr(&outer.core)
            ));
        });
        assert!(get_current_scope().is_none());
    }

    #[test]
    fn test_child_removal_keeps_siblings() {
        let parent = effect_scope();
        let (a, b, c) = parent.run(|| (effect_scope(), effect_scope(), effect_scope()));

        // Stop the middle child: last child is swapped into its slot.
        b.stop();
        assert_eq!(parent.core.scopes.borrow().len(), 2);

        a.stop();
        c.stop();
        assert_eq!(parent.core.scopes.borrow().len(), 0);

        parent.stop();
    }
}
