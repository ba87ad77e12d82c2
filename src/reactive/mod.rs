//! Reactive core - dependency graph, effects, derived values, batching.
//!
//! The protocol: a computation runs as the current subscriber; reads of
//! reactive data link it to each dep; writes bump the dep version and
//! notify through the batch, which delivers in first-subscription order
//! at depth zero. Derived values stay lazy: a notification only marks
//! them dirty, and the next read revalidates.

pub mod batch;
pub mod dep;
pub mod derived;
pub mod effect;
pub mod link;
pub mod scope;
pub mod signal;
pub mod subscriber;
pub mod watch;

pub use batch::{batch, end_batch, start_batch};
pub use dep::{global_version, Dep};
pub use derived::{derived, derived_with_equals, derived_writable, Derived};
pub use effect::{effect, on_effect_cleanup, Effect};
pub use scope::{
    effect_scope, effect_scope_detached, get_current_scope, on_scope_dispose, EffectScope,
};
pub use signal::{signal, signal_with_equals, Signal};
pub use subscriber::{pause_tracking, reset_tracking, untracked, SubscriberFlags};
pub use watch::{
    on_watch_cleanup, watch, watch_list, watch_record, WatchHandle, WatchJob, WatchOptions,
    WatchScheduler, DEEP_UNBOUNDED,
};
