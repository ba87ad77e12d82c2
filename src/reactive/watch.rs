//! Watch - declarative source-to-callback bridge.
//!
//! A watcher is an effect whose body reads the source and whose scheduler
//! routes into a job: re-read, compare old against new, deliver the
//! callback when something changed. Sources are getters (signals and
//! derived values read naturally through closures; tuples give
//! multi-source watchers with element-wise comparison) or reactive
//! records/lists, which traverse to a bounded depth and force delivery
//! on any reachable change.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use super::effect::Effect;
use crate::collections::{ReactiveList, ReactiveRecord};
use crate::error::{call_guarded, ErrorKind};

/// Unbounded traversal depth for `deep`.
pub const DEEP_UNBOUNDED: u32 = u32::MAX;

/// A re-runnable delivery job handed to a custom scheduler.
pub type WatchJob = Rc<dyn Fn()>;

/// Custom delivery hook: receives the job and whether this is the
/// immediate first call.
pub type WatchScheduler = Box<dyn Fn(&WatchJob, bool)>;

/// Recognized watch options.
#[derive(Default)]
pub struct WatchOptions {
    /// Fire the callback once at registration with no old value.
    pub immediate: bool,
    /// Traversal depth for reactive record/list sources. `None` keeps the
    /// source default (one level); `Some(n)` traverses `n` levels.
    pub deep: Option<u32>,
    /// Detach after the first delivery.
    pub once: bool,
    /// Custom delivery; defaults to synchronous.
    pub scheduler: Option<WatchScheduler>,
}

type Cleanups = Rc<RefCell<Vec<Box<dyn FnOnce()>>>>;

thread_local! {
    /// Cleanup collector of the watcher whose callback is running.
    static ACTIVE_CLEANUPS: RefCell<Option<Cleanups>> = const { RefCell::new(None) };
}

/// Register a cleanup during a watcher callback; it runs before the next
/// delivery or at stop.
pub fn on_watch_cleanup(cleanup: impl FnOnce() + 'static) {
    ACTIVE_CLEANUPS.with(|c| match c.borrow().as_ref() {
        Some(collector) => collector.borrow_mut().push(Box::new(cleanup)),
        None => log::warn!("on_watch_cleanup called outside of a watcher callback; ignored"),
    });
}

fn run_cleanups(cleanups: &Cleanups) {
    let pending = std::mem::take(&mut *cleanups.borrow_mut());
    for cleanup in pending {
        call_guarded(ErrorKind::WatchCleanup, None, cleanup);
    }
}

/// Handle to an active watcher.
pub struct WatchHandle {
    effect: Effect,
    cleanups: Cleanups,
}

impl WatchHandle {
    /// Defer deliveries until [`WatchHandle::resume`].
    pub fn pause(&self) {
        self.effect.pause();
    }

    /// Resume and replay at most one deferred delivery.
    pub fn resume(&self) {
        self.effect.resume();
    }

    /// Stop the watcher: run pending cleanups and detach from every dep
    /// and from the owning scope. Idempotent.
    pub fn stop(&self) {
        run_cleanups(&self.cleanups);
        self.effect.stop();
    }

    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

// =============================================================================
// Entry Points
// =============================================================================

/// Watch a getter. Signals and derived values read through the closure;
/// tuples of reads give multi-source watchers with element-wise change
/// comparison.
pub fn watch<T, F, C>(getter: F, callback: C, options: WatchOptions) -> WatchHandle
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> T + 'static,
    C: FnMut(&T, Option<&T>) + 'static,
{
    if options.deep.is_some() {
        log::warn!("deep option has no effect on a plain getter source; ignored");
    }
    make_watcher(
        Box::new(getter),
        Rc::new(|old: &T, new: &T| old != new),
        Box::new(callback),
        options,
    )
}

/// Watch a reactive record. Traverses one level by default, or to the
/// depth given by `deep`; any reachable change delivers the callback.
pub fn watch_record<C>(source: &ReactiveRecord, callback: C, options: WatchOptions) -> WatchHandle
where
    C: FnMut(&ReactiveRecord, Option<&ReactiveRecord>) + 'static,
{
    let depth = resolve_depth(options.deep);
    let source = source.clone();
    make_watcher(
        Box::new(move || {
            let mut seen = HashSet::new();
            source.traverse(depth, &mut seen);
            source.clone()
        }),
        // Same identity before and after: delivery is forced by the
        // traversal deps having fired at all.
        Rc::new(|_: &ReactiveRecord, _: &ReactiveRecord| true),
        Box::new(callback),
        options,
    )
}

/// Watch a reactive list, with the same depth semantics as records.
pub fn watch_list<C>(source: &ReactiveList, callback: C, options: WatchOptions) -> WatchHandle
where
    C: FnMut(&ReactiveList, Option<&ReactiveList>) + 'static,
{
    let depth = resolve_depth(options.deep);
    let source = source.clone();
    make_watcher(
        Box::new(move || {
            let mut seen = HashSet::new();
            source.traverse(depth, &mut seen);
            source.clone()
        }),
        Rc::new(|_: &ReactiveList, _: &ReactiveList| true),
        Box::new(callback),
        options,
    )
}

fn resolve_depth(deep: Option<u32>) -> u32 {
    match deep {
        None => 1,
        Some(0) => {
            log::warn!("deep: 0 is not a valid traversal depth; using the default");
            1
        }
        Some(n) => n,
    }
}

// =============================================================================
// Core
// =============================================================================

fn make_watcher<V: Clone + 'static>(
    read: Box<dyn Fn() -> V>,
    changed: Rc<dyn Fn(&V, &V) -> bool>,
    callback: Box<dyn FnMut(&V, Option<&V>)>,
    options: WatchOptions,
) -> WatchHandle {
    let WatchOptions {
        immediate,
        once,
        scheduler,
        ..
    } = options;

    let latest: Rc<RefCell<Option<V>>> = Rc::new(RefCell::new(None));
    let old: Rc<RefCell<Option<V>>> = Rc::new(RefCell::new(None));
    let cleanups: Cleanups = Rc::new(RefCell::new(Vec::new()));
    let callback = Rc::new(RefCell::new(callback));

    let effect = Effect::new({
        let latest = latest.clone();
        move || {
            if let Some(value) = call_guarded(ErrorKind::WatchGetter, None, &read) {
                *latest.borrow_mut() = Some(value);
            }
        }
    });

    let job: WatchJob = Rc::new({
        let effect = effect.clone();
        let latest = latest.clone();
        let old = old.clone();
        let cleanups = cleanups.clone();
        let changed = changed.clone();
        let callback = callback.clone();
        move || {
            if !effect.is_active() {
                return;
            }
            effect.run();
            let Some(new) = latest.borrow_mut().take() else {
                return;
            };
            let previous = old.borrow_mut().take();
            let deliver = match previous.as_ref() {
                Some(prev) => changed(prev, &new),
                None => true,
            };
            if deliver {
                run_cleanups(&cleanups);

                struct CollectorGuard(Option<Cleanups>);
                impl Drop for CollectorGuard {
                    fn drop(&mut self) {
                        ACTIVE_CLEANUPS.with(|c| *c.borrow_mut() = self.0.take());
                    }
                }
                let _guard =
                    CollectorGuard(ACTIVE_CLEANUPS.with(|c| c.replace(Some(cleanups.clone()))));
                call_guarded(ErrorKind::WatchCallback, None, || {
                    let mut cb = callback.borrow_mut();
                    (*cb)(&new, previous.as_ref());
                });
            }
            *old.borrow_mut() = Some(new);
            if deliver && once {
                run_cleanups(&cleanups);
                effect.stop();
            }
        }
    });

    let scheduler: Option<Rc<dyn Fn(&WatchJob, bool)>> = scheduler.map(|s| Rc::from(s));
    {
        let job = job.clone();
        match scheduler.clone() {
            Some(custom) => effect.set_scheduler(move || custom(&job, false)),
            None => effect.set_scheduler(move || job()),
        }
    }

    if immediate {
        match scheduler {
            Some(custom) => custom(&job, true),
            None => job(),
        }
    } else {
        effect.run();
        *old.borrow_mut() = latest.borrow_mut().take();
    }

    WatchHandle { effect, cleanups }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{RawMap, Value};
    use crate::reactive::derived::derived;
    use crate::reactive::signal::signal;
    use std::cell::Cell;

    #[test]
    fn test_watch_getter_delivers_on_change() {
        let s = signal(1);
        let log: Rc<RefCell<Vec<(i32, Option<i32>)>>> = Rc::new(RefCell::new(Vec::new()));

        let (s2, log2) = (s.clone(), log.clone());
        let _w = watch(
            move || s2.get(),
            move |new, old| log2.borrow_mut().push((*new, old.copied())),
            WatchOptions::default(),
        );
        assert!(log.borrow().is_empty(), "no immediate delivery by default");

        s.set(2);
        assert_eq!(*log.borrow(), vec![(2, Some(1))]);

        s.set(2);
        assert_eq!(log.borrow().len(), 1, "unchanged value must not deliver");

        s.set(5);
        assert_eq!(*log.borrow(), vec![(2, Some(1)), (5, Some(2))]);
    }

    #[test]
    fn test_watch_immediate() {
        let s = signal(1);
        let log: Rc<RefCell<Vec<(i32, Option<i32>)>>> = Rc::new(RefCell::new(Vec::new()));

        let (s2, log2) = (s.clone(), log.clone());
        let _w = watch(
            move || s2.get(),
            move |new, old| log2.borrow_mut().push((*new, old.copied())),
            WatchOptions {
                immediate: true,
                ..Default::default()
            },
        );
        assert_eq!(
            *log.borrow(),
            vec![(1, None)],
            "immediate fires with no old value"
        );

        s.set(2);
        assert_eq!(*log.borrow(), vec![(1, None), (2, Some(1))]);
    }

    #[test]
    fn test_watch_once_immediate_fires_exactly_once() {
        let s = signal(1);
        let calls = Rc::new(Cell::new(0));

        let (s2, calls2) = (s.clone(), calls.clone());
        let w = watch(
            move || s2.get(),
            move |_, _| calls2.set(calls2.get() + 1),
            WatchOptions {
                immediate: true,
                once: true,
                ..Default::default()
            },
        );
        assert_eq!(calls.get(), 1);
        assert!(!w.is_active(), "once detaches after the first delivery");

        s.set(2);
        s.set(3);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_watch_multi_source_tuple() {
        let a = signal(1);
        let b = signal("x".to_string());
        let log: Rc<RefCell<Vec<(i32, String)>>> = Rc::new(RefCell::new(Vec::new()));

        let (a2, b2, log2) = (a.clone(), b.clone(), log.clone());
        let _w = watch(
            move || (a2.get(), b2.get()),
            move |new, _| log2.borrow_mut().push(new.clone()),
            WatchOptions::default(),
        );

        a.set(2);
        b.set("y".to_string());
        assert_eq!(
            *log.borrow(),
            vec![(2, "x".to_string()), (2, "y".to_string())]
        );
    }

    #[test]
    fn test_watch_derived_source() {
        let a = signal(1);
        let a2 = a.clone();
        let doubled = derived(move || a2.get() * 2);

        let log: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let (d2, log2) = (doubled.clone(), log.clone());
        let _w = watch(
            move || d2.get(),
            move |new, _| log2.borrow_mut().push(*new),
            WatchOptions::default(),
        );

        a.set(3);
        assert_eq!(*log.borrow(), vec![6]);
    }

    #[test]
    fn test_watch_record_default_depth_is_one_level() {
        let inner = RawMap::from_entries([("x", 1)]);
        let raw = RawMap::from_entries([
            ("inner", Value::from(inner.clone())),
            ("top", Value::from(1)),
        ]);
        let record = ReactiveRecord::new(raw);

        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let _w = watch_record(
            &record,
            move |_, _| hits2.set(hits2.get() + 1),
            WatchOptions::default(),
        );

        record.set("top", 2);
        assert_eq!(hits.get(), 1, "level-one key change delivers");

        ReactiveRecord::new(inner).set("x", 99);
        assert_eq!(hits.get(), 1, "level-two change is below the default depth");
    }

    #[test]
    fn test_watch_record_deep_with_cycles() {
        let raw = RawMap::new();
        let record = ReactiveRecord::new(raw.clone());
        record.set("self", raw.clone());

        let hits = Rc::new(Cell::new(0));
        let hits2 = hits.clone();
        let _w = watch_record(
            &record,
            move |_, _| hits2.set(hits2.get() + 1),
            WatchOptions {
                deep: Some(DEEP_UNBOUNDED),
                ..Default::default()
            },
        );

        // Mutating through the cycle fires exactly once; traversal
        // terminates on the visited set.
        record
            .get("self")
            .unwrap()
            .as_record()
            .unwrap()
            .set("x", 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_on_watch_cleanup_runs_before_next_delivery_and_at_stop() {
        let s = signal(0);
        let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

        let (s2, log2) = (s.clone(), log.clone());
        let w = watch(
            move || s2.get(),
            move |new, _| {
                let n = *new;
                let log3 = log2.clone();
                log2.borrow_mut().push(format!("cb {n}"));
                on_watch_cleanup(move || log3.borrow_mut().push(format!("cleanup {n}")));
            },
            WatchOptions::default(),
        );

        s.set(1);
        s.set(2);
        w.stop();

        assert_eq!(
            *log.borrow(),
            vec!["cb 1", "cleanup 1", "cb 2", "cleanup 2"],
            "cleanups run before the next delivery and at stop"
        );
    }

    #[test]
    fn test_watch_pause_resume() {
        let s = signal(0);
        let calls = Rc::new(Cell::new(0));
        let (s2, calls2) = (s.clone(), calls.clone());
        let w = watch(
            move || s2.get(),
            move |_, _| calls2.set(calls2.get() + 1),
            WatchOptions::default(),
        );

        w.pause();
        s.set(1);
        s.set(2);
        assert_eq!(calls.get(), 0, "paused watcher defers delivery");

        w.resume();
        assert_eq!(calls.get(), 1, "resume delivers once with the latest value");
    }

    #[test]
    fn test_custom_scheduler_controls_delivery() {
        let s = signal(0);
        let queued: Rc<RefCell<Vec<WatchJob>>> = Rc::new(RefCell::new(Vec::new()));
        let calls = Rc::new(Cell::new(0));

        let queued2 = queued.clone();
        let calls2 = calls.clone();
        let s2 = s.clone();
        let _w = watch(
            move || s2.get(),
            move |_, _| calls2.set(calls2.get() + 1),
            WatchOptions {
                scheduler: Some(Box::new(move |job, _is_first| {
                    queued2.borrow_mut().push(job.clone());
                })),
                ..Default::default()
            },
        );

        s.set(1);
        assert_eq!(calls.get(), 0, "delivery waits for the scheduler");
        assert_eq!(queued.borrow().len(), 1);

        let job = queued.borrow_mut().remove(0);
        job();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_stopped_watcher_ignores_writes() {
        let s = signal(0);
        let calls = Rc::new(Cell::new(0));
        let (s2, calls2) = (s.clone(), calls.clone());
        let w = watch(
            move || s2.get(),
            move |_, _| calls2.set(calls2.get() + 1),
            WatchOptions::default(),
        );

        w.stop();
        s.set(1);
        assert_eq!(calls.get(), 0);

        // Idempotent.
        w.stop();
    }

    #[test]
    fn test_watch_record_passes_record_through() {
        let record = ReactiveRecord::new(RawMap::from_entries([("k", 1)]));
        let seen: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

        let seen2 = seen.clone();
        let _w = watch_record(
            &record,
            move |rec, _| {
                seen2
                    .borrow_mut()
                    .push(rec.get("k").unwrap().into_value());
            },
            WatchOptions::default(),
        );

        record.set("k", 2);
        assert_eq!(*seen.borrow(), vec![Value::from(2)]);
    }
}
