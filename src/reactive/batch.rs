//! Batch scheduler - defers trigger side effects until depth zero.
//!
//! Two chains are built while a batch is open, one for derived values and
//! one for effects, by prepending at notify time. Because deps notify
//! their subscriber lists in reverse insertion order, the prepended chains
//! come out in forward insertion order at flush time: effects observe
//! notifications in the order their first subscription was established.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use super::subscriber::{SubscriberCore, SubscriberFlags};

thread_local! {
    static BATCH_DEPTH: Cell<u32> = const { Cell::new(0) };
    static BATCHED_EFFECTS: RefCell<Option<Rc<dyn SubscriberCore>>> = const { RefCell::new(None) };
    static BATCHED_DERIVEDS: RefCell<Option<Rc<dyn SubscriberCore>>> = const { RefCell::new(None) };
}

/// Open a batch region. Triggers inside the region are queued and
/// delivered when the matching [`end_batch`] brings the depth back to zero.
pub fn start_batch() {
    BATCH_DEPTH.with(|d| d.set(d.get() + 1));
}

pub(crate) fn batch_depth() -> u32 {
    BATCH_DEPTH.with(|d| d.get())
}

/// Enqueue a notified subscriber. Caller has already set NOTIFIED.
pub(crate) fn add(sub: Rc<dyn SubscriberCore>, derived: bool) {
    let slot = if derived {
        &BATCHED_DERIVEDS
    } else {
        &BATCHED_EFFECTS
    };
    slot.with(|head| {
        let prev = head.borrow_mut().take();
        *sub.state().next_batched.borrow_mut() = prev;
        *head.borrow_mut() = Some(sub);
    });
}

/// Close a batch region; at depth zero, flush.
///
/// The derived chain is walked first, clearing NOTIFIED (recomputation
/// stays lazy). The effect chain then delivers `trigger()` to each ACTIVE
/// effect, collecting at most the first panic and resuming it once the
/// flush is complete, so one failing effect cannot wedge the queue.
pub fn end_batch() {
    let depth = BATCH_DEPTH.with(|d| {
        let depth = d.get().saturating_sub(1);
        d.set(depth);
        depth
    });
    if depth > 0 {
        return;
    }

    if let Some(head) = BATCHED_DERIVEDS.with(|h| h.borrow_mut().take()) {
        let mut cur = Some(head);
        while let Some(sub) = cur {
            cur = sub.state().next_batched.borrow_mut().take();
            sub.state().remove(SubscriberFlags::NOTIFIED);
        }
    }

    let mut error: Option<Box<dyn Any + Send>> = None;
    loop {
        let Some(head) = BATCHED_EFFECTS.with(|h| h.borrow_mut().take()) else {
            break;
        };
        let mut cur = Some(head);
        while let Some(sub) = cur {
            cur = sub.state().next_batched.borrow_mut().take();
            sub.state().remove(SubscriberFlags::NOTIFIED);
            if sub.state().has(SubscriberFlags::ACTIVE) {
                let result = catch_unwind(AssertUnwindSafe(|| sub.clone().flush()));
                if let Err(payload) = result {
                    if error.is_none() {
                        error = Some(payload);
                    }
                }
            }
        }
    }

    if let Some(payload) = error {
        resume_unwind(payload);
    }
}

/// Run `f` inside a batch region.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    start_batch();
    let result = f();
    end_batch();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::dep::Dep;
    use crate::reactive::subscriber::SubscriberState;
    use std::cell::Cell as StdCell;

    struct CountingSub {
        state: SubscriberState,
        flushed: Rc<StdCell<usize>>,
    }

    impl CountingSub {
        fn new(flushed: Rc<StdCell<usize>>) -> Rc<Self> {
            Rc::new(Self {
                state: SubscriberState::new(SubscriberFlags::ACTIVE),
                flushed,
            })
        }
    }

    impl SubscriberCore for CountingSub {
        fn state(&self) -> &SubscriberState {
            &self.state
        }
        fn notify(self: Rc<Self>) -> bool {
            if !self.state.has(SubscriberFlags::NOTIFIED) {
                self.state.insert(SubscriberFlags::NOTIFIED);
                add(self.clone(), false);
            }
            false
        }
        fn flush(self: Rc<Self>) {
            self.flushed.set(self.flushed.get() + 1);
        }
        fn owned_dep(&self) -> Option<Rc<Dep>> {
            None
        }
    }

    #[test]
    fn test_depth_defers_delivery() {
        let count = Rc::new(StdCell::new(0));
        let sub = CountingSub::new(count.clone());

        start_batch();
        sub.clone().notify();
        assert_eq!(count.get(), 0, "no delivery while batch is open");
        end_batch();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_notified_dedupes_within_batch() {
        let count = Rc::new(StdCell::new(0));
        let sub = CountingSub::new(count.clone());

        start_batch();
        sub.clone().notify();
        sub.clone().notify();
        sub.clone().notify();
        end_batch();

        assert_eq!(count.get(), 1, "one delivery per batch");
        assert!(!sub.state.has(SubscriberFlags::NOTIFIED));
    }

    #[test]
    fn test_inactive_subscriber_is_skipped() {
        let count = Rc::new(StdCell::new(0));
        let sub = CountingSub::new(count.clone());
        sub.state.remove(SubscriberFlags::ACTIVE);

        start_batch();
        sub.state.insert(SubscriberFlags::NOTIFIED);
        add(sub.clone(), false);
        end_batch();

        assert_eq!(count.get(), 0);
        assert!(
            !sub.state.has(SubscriberFlags::NOTIFIED),
            "flags still reset for inactive subscribers"
        );
    }

    #[test]
    fn test_nested_batches_flush_once() {
        let count = Rc::new(StdCell::new(0));
        let sub = CountingSub::new(count.clone());

        start_batch();
        start_batch();
        sub.clone().notify();
        end_batch();
        assert_eq!(count.get(), 0, "inner end keeps the batch open");
        end_batch();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_first_panic_survives_flush() {
        struct PanickingSub {
            state: SubscriberState,
        }
        impl SubscriberCore for PanickingSub {
            fn state(&self) -> &SubscriberState {
                &self.state
            }
            fn notify(self: Rc<Self>) -> bool {
                self.state.insert(SubscriberFlags::NOTIFIED);
                add(self.clone(), false);
                false
            }
            fn flush(self: Rc<Self>) {
                panic!("boom");
            }
            fn owned_dep(&self) -> Option<Rc<Dep>> {
                None
            }
        }

        let count = Rc::new(StdCell::new(0));
        let ok = CountingSub::new(count.clone());
        let bad = Rc::new(PanickingSub {
            state: SubscriberState::new(SubscriberFlags::ACTIVE),
        });

        let result = catch_unwind(AssertUnwindSafe(|| {
            start_batch();
            bad.clone().notify();
            ok.clone().notify();
            end_batch();
        }));

        assert!(result.is_err(), "the first panic is re-raised at batch end");
        assert_eq!(count.get(), 1, "later effects still ran");
        assert_eq!(batch_depth(), 0);
    }
}
