//! Flush queues - pre/render/post job scheduling per tick.
//!
//! Render jobs are keyed by component uid so instances render in creation
//! order; pre jobs sort ahead of the render job with the same id. Jobs
//! dedupe by identity: enqueueing a job that is already queued is a
//! no-op. Delivery is synchronous at reactive-batch depth zero; a render
//! call wraps its work in a flush guard so nested renders do not
//! double-flush. The first panic out of a job survives the flush and is
//! re-raised once the queues are drained and reset.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::rc::Rc;

use bitflags::bitflags;

use crate::reactive::batch::batch_depth;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct JobFlags: u8 {
        const QUEUED = 1;
        const PRE = 1 << 1;
        const DISPOSED = 1 << 2;
    }
}

pub(crate) struct SchedulerJob {
    id: Option<u64>,
    flags: Cell<JobFlags>,
    cb: Box<dyn Fn()>,
}

impl SchedulerJob {
    pub(crate) fn new(id: Option<u64>, pre: bool, cb: impl Fn() + 'static) -> Rc<Self> {
        let flags = if pre { JobFlags::PRE } else { JobFlags::empty() };
        Rc::new(Self {
            id,
            flags: Cell::new(flags),
            cb: Box::new(cb),
        })
    }

    /// Ordering key: ids ascend, unkeyed jobs run last, pre jobs run
    /// before the render job sharing their id.
    fn order_key(&self) -> (u64, bool) {
        (
            self.id.unwrap_or(u64::MAX),
            !self.flags.get().contains(JobFlags::PRE),
        )
    }

    pub(crate) fn dispose(&self) {
        self.flags.set(self.flags.get() | JobFlags::DISPOSED);
    }
}

pub(crate) struct PostJob {
    id: Option<u64>,
    cancelled: Cell<bool>,
    cb: Box<dyn Fn()>,
}

impl PostJob {
    pub(crate) fn new(id: Option<u64>, cb: impl Fn() + 'static) -> Rc<Self> {
        Rc::new(Self {
            id,
            cancelled: Cell::new(false),
            cb: Box::new(cb),
        })
    }

    pub(crate) fn cancel(&self) {
        self.cancelled.set(true);
    }
}

thread_local! {
    static QUEUE: RefCell<Vec<Rc<SchedulerJob>>> = const { RefCell::new(Vec::new()) };
    static FLUSH_INDEX: Cell<usize> = const { Cell::new(0) };
    static POST_QUEUE: RefCell<Vec<Rc<PostJob>>> = const { RefCell::new(Vec::new()) };
    static IS_FLUSHING: Cell<bool> = const { Cell::new(false) };
    /// Open render() calls; flushing waits for the outermost to finish.
    static RENDER_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Enqueue a job, keeping the pending region sorted by id. No-op when the
/// job is already queued. Outside of any flush, render guard, or open
/// batch, delivery happens immediately.
pub(crate) fn queue_job(job: Rc<SchedulerJob>) {
    let flags = job.flags.get();
    if flags.contains(JobFlags::QUEUED) {
        return;
    }
    job.flags.set(flags | JobFlags::QUEUED);

    QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        let start = if IS_FLUSHING.with(|f| f.get()) {
            FLUSH_INDEX.with(|i| i.get())
        } else {
            0
        };
        let key = job.order_key();
        let pos = queue[start..]
            .iter()
            .position(|j| j.order_key() > key)
            .map(|p| p + start)
            .unwrap_or(queue.len());
        queue.insert(pos, job);
    });

    maybe_flush();
}

/// Queue a post-flush callback (mounted/updated hooks, transitions).
pub(crate) fn queue_post(job: Rc<PostJob>) {
    POST_QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        let key = job.id.unwrap_or(u64::MAX);
        let pos = queue
            .iter()
            .position(|j| j.id.unwrap_or(u64::MAX) > key)
            .unwrap_or(queue.len());
        queue.insert(pos, job);
    });
    maybe_flush();
}

/// Drop a queued job before it runs (used when a parent update supersedes
/// a child's scheduled render).
pub(crate) fn invalidate_job(job: &Rc<SchedulerJob>) {
    QUEUE.with(|queue| {
        let mut queue = queue.borrow_mut();
        let start = if IS_FLUSHING.with(|f| f.get()) {
            FLUSH_INDEX.with(|i| i.get())
        } else {
            0
        };
        if let Some(pos) = queue[start..]
            .iter()
            .position(|j| Rc::ptr_eq(j, job))
        {
            queue.remove(pos + start);
            job.flags.set(job.flags.get() - JobFlags::QUEUED);
        }
    });
}

fn maybe_flush() {
    if IS_FLUSHING.with(|f| f.get()) {
        return;
    }
    if RENDER_DEPTH.with(|d| d.get()) > 0 {
        return;
    }
    if batch_depth() > 0 {
        return;
    }
    flush_jobs();
}

/// Drain the job queue, then the post queue, repeating until both stay
/// empty. Jobs may enqueue further jobs within the same phase.
pub(crate) fn flush_jobs() {
    if IS_FLUSHING.with(|f| f.get()) {
        return;
    }
    IS_FLUSHING.with(|f| f.set(true));

    let mut error: Option<Box<dyn Any + Send>> = None;
    loop {
        loop {
            let job = QUEUE.with(|queue| {
                let queue = queue.borrow();
                let index = FLUSH_INDEX.with(|i| i.get());
                queue.get(index).cloned()
            });
            let Some(job) = job else { break };
            FLUSH_INDEX.with(|i| i.set(i.get() + 1));

            let flags = job.flags.get();
            if flags.contains(JobFlags::DISPOSED) {
                job.flags.set(flags - JobFlags::QUEUED);
                continue;
            }
            // QUEUED clears before the call so a job may re-enqueue itself.
            job.flags.set(flags - JobFlags::QUEUED);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (job.cb)())) {
                if error.is_none() {
                    error = Some(payload);
                }
            }
        }
        QUEUE.with(|queue| queue.borrow_mut().clear());
        FLUSH_INDEX.with(|i| i.set(0));

        let mut post_index = 0;
        loop {
            let job = POST_QUEUE.with(|queue| queue.borrow().get(post_index).cloned());
            let Some(job) = job else { break };
            post_index += 1;
            if job.cancelled.get() {
                continue;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (job.cb)())) {
                if error.is_none() {
                    error = Some(payload);
                }
            }
        }
        POST_QUEUE.with(|queue| queue.borrow_mut().clear());

        let drained = QUEUE.with(|q| q.borrow().is_empty())
            && POST_QUEUE.with(|q| q.borrow().is_empty());
        if drained {
            break;
        }
    }

    IS_FLUSHING.with(|f| f.set(false));
    if let Some(payload) = error {
        resume_unwind(payload);
    }
}

/// Guard for a top-level render: defers flushing until the outermost
/// render finishes, so nested renders do not double-flush.
pub(crate) struct FlushGuard;

impl FlushGuard {
    pub(crate) fn new() -> Self {
        RENDER_DEPTH.with(|d| d.set(d.get() + 1));
        FlushGuard
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        let depth = RENDER_DEPTH.with(|d| {
            let depth = d.get().saturating_sub(1);
            d.set(depth);
            depth
        });
        if depth == 0 && batch_depth() == 0 {
            flush_jobs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jobs_run_in_id_order() {
        let log: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
        let guard = FlushGuard::new();

        for id in [3_u64, 1, 2] {
            let log2 = log.clone();
            queue_job(SchedulerJob::new(Some(id), false, move || {
                log2.borrow_mut().push(id);
            }));
        }
        assert!(log.borrow().is_empty(), "guard defers the flush");
        drop(guard);

        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_queued_job_dedupes() {
        let runs = Rc::new(Cell::new(0));
        let guard = FlushGuard::new();
        let runs2 = runs.clone();
        let job = SchedulerJob::new(Some(1), false, move || {
            runs2.set(runs2.get() + 1);
        });
        queue_job(job.clone());
        queue_job(job.clone());
        queue_job(job);
        drop(guard);

        assert_eq!(runs.get(), 1, "re-enqueueing a queued job is a no-op");
    }

    #[test]
    fn test_pre_jobs_run_before_render_job_with_same_id() {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let guard = FlushGuard::new();

        let log2 = log.clone();
        queue_job(SchedulerJob::new(Some(5), false, move || {
            log2.borrow_mut().push("render");
        }));
        let log3 = log.clone();
        queue_job(SchedulerJob::new(Some(5), true, move || {
            log3.borrow_mut().push("pre");
        }));
        drop(guard);

        assert_eq!(*log.borrow(), vec!["pre", "render"]);
    }

    #[test]
    fn test_post_runs_after_jobs_and_can_extend() {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let guard = FlushGuard::new();

        let log_post = log.clone();
        queue_post(PostJob::new(None, move || {
            log_post.borrow_mut().push("post");
        }));
        let log_job = log.clone();
        queue_job(SchedulerJob::new(Some(1), false, move || {
            log_job.borrow_mut().push("job");
        }));
        drop(guard);

        assert_eq!(*log.borrow(), vec!["job", "post"]);
    }

    #[test]
    fn test_cancelled_post_job_is_skipped() {
        let runs = Rc::new(Cell::new(0));
        let guard = FlushGuard::new();
        let runs2 = runs.clone();
        let job = PostJob::new(None, move || runs2.set(runs2.get() + 1));
        queue_post(job.clone());
        job.cancel();
        drop(guard);

        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn test_invalidated_job_is_skipped_and_reusable() {
        let runs = Rc::new(Cell::new(0));
        let guard = FlushGuard::new();
        let runs2 = runs.clone();
        let job = SchedulerJob::new(Some(1), false, move || {
            runs2.set(runs2.get() + 1);
        });
        queue_job(job.clone());
        invalidate_job(&job);
        drop(guard);
        assert_eq!(runs.get(), 0, "invalidated before running");

        let guard = FlushGuard::new();
        queue_job(job);
        drop(guard);
        assert_eq!(runs.get(), 1, "the job can be queued again afterwards");
    }

    #[test]
    fn test_job_enqueueing_job_drains_same_flush() {
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let guard = FlushGuard::new();

        let log2 = log.clone();
        queue_job(SchedulerJob::new(Some(1), false, move || {
            log2.borrow_mut().push("first");
            let log3 = log2.clone();
            queue_job(SchedulerJob::new(Some(2), false, move || {
                log3.borrow_mut().push("second");
            }));
        }));
        drop(guard);

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_first_panic_survives_and_queue_resets() {
        let ran_after = Rc::new(Cell::new(false));
        let guard = FlushGuard::new();

        queue_job(SchedulerJob::new(Some(1), false, || panic!("job failed")));
        let ran = ran_after.clone();
        queue_job(SchedulerJob::new(Some(2), false, move || ran.set(true)));

        let result = catch_unwind(AssertUnwindSafe(|| drop(guard)));
        assert!(result.is_err(), "the first panic re-raises after the drain");
        assert!(ran_after.get(), "later jobs still ran");
        assert!(QUEUE.with(|q| q.borrow().is_empty()));
        assert!(!IS_FLUSHING.with(|f| f.get()));
    }
}
