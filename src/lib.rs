//! # lumen
//!
//! Fine-grained reactivity engine with a virtual-tree reconciler.
//!
//! Two subsystems compose the crate:
//!
//! - A dependency graph of deps (observable cells) and subscribers
//!   (effects and cached derived values) with a track/trigger protocol,
//!   batched delivery in subscription order, hierarchical effect scopes,
//!   reactive collections, and a declarative watch API.
//! - A diff-and-patch reconciler over typed virtual nodes that consumes
//!   the engine: each component's render is an effect, updates flow
//!   through patch-flag fast paths, and keyed lists reorder with
//!   LIS-minimal moves.
//!
//! The reconciler drives an injected [`renderer::HostOps`] capability
//! set; the same engine runs against documents, native toolkits, or the
//! bundled in-memory [`renderer::TestHost`].
//!
//! ## Example
//!
//! ```
//! use lumen::{signal, derived, effect};
//!
//! let count = signal(1);
//! let doubled = {
//!     let count = count.clone();
//!     derived(move || count.get() * 2)
//! };
//!
//! let seen = std::rc::Rc::new(std::cell::Cell::new(0));
//! let _e = {
//!     let (doubled, seen) = (doubled.clone(), seen.clone());
//!     effect(move || seen.set(doubled.get()))
//! };
//! assert_eq!(seen.get(), 2);
//!
//! count.set(5);
//! assert_eq!(seen.get(), 10);
//! ```
//!
//! ## Modules
//!
//! - [`reactive`] - deps, links, effects, derived values, scopes, batch,
//!   watch
//! - [`collections`] - reactive records, lists, maps, and sets
//! - [`tree`] - virtual nodes, shape and patch flags, block helpers
//! - [`renderer`] - patch engine, components, flush queues, host seam
//! - [`error`] - phase-tagged error capture and propagation

pub mod collections;
pub mod error;
pub mod reactive;
pub mod renderer;
pub mod tree;

// Re-export the everyday surface.
pub use reactive::{
    batch, derived, derived_with_equals, derived_writable, effect, effect_scope,
    effect_scope_detached, end_batch, get_current_scope, global_version, on_effect_cleanup,
    on_scope_dispose, on_watch_cleanup, pause_tracking, reset_tracking, signal,
    signal_with_equals, start_batch, untracked, watch, watch_list, watch_record, Derived, Effect,
    EffectScope, Signal, WatchHandle, WatchOptions,
};

pub use collections::{
    RawList, RawMap, ReactiveList, ReactiveMap, ReactiveRecord, ReactiveSet, ReactiveValue, Value,
};

pub use tree::{
    comment, component, element, fragment, open_block, props, static_content, text, Children,
    Directive, DirectiveBinding, Key, NodeType, PatchFlags, PropMap, ShapeFlags, VNode,
    VNodeBuilder, VNodeHooks, PATCH_FLAG_BAIL, PATCH_FLAG_CACHED,
};

pub use renderer::{
    on_activated, on_before_mount, on_before_unmount, on_before_update, on_error_captured,
    on_mounted, on_unmounted, on_updated, Component, ComponentInstance, HostNode, HostOps,
    Namespace, Renderer, TestHost,
};

pub use error::{
    clear_app_error_handler, handle_error, set_app_error_handler, ErrorInfo, ErrorKind,
};
