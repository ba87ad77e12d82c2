//! Components - descriptors, instances, lifecycle, and the render effect.
//!
//! A component's render is just an effect: its body renders the subtree
//! and patches it against the previous one, and its scheduler enqueues a
//! render job keyed by the instance's uid, so instances render in
//! creation order within a tick. Parent-driven updates go through a
//! should-update predicate (shallow prop diff plus slot presence) and
//! re-enter the same update function synchronously.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::collections::{RawMap, ReactiveRecord, Value};
use crate::error::{call_guarded, ErrorInfo, ErrorKind};
use crate::reactive::effect::Effect;
use crate::reactive::scope::{effect_scope_detached, EffectScope};
use crate::tree::node::{same_vnode_type, Children, NodeType, PatchFlags, ShapeFlags, VNode};
use crate::tree::props::is_reserved_prop;

use super::host::{HostNode, Namespace};
use super::scheduler::{self, PostJob, SchedulerJob};
use super::Renderer;

// =============================================================================
// Descriptor
// =============================================================================

/// Marks a descriptor as one of the built-in boundary components, whose
/// processing is delegated to an injected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Teleport,
    Suspense,
}

/// Handler vtable for teleport/suspense-style builtins. The core only
/// defines the seam; implementations are injected by the embedder.
pub trait BuiltinHandler {
    #[allow(clippy::too_many_arguments)]
    fn process(
        &self,
        renderer: &Rc<Renderer>,
        n1: Option<Rc<VNode>>,
        n2: Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    );

    fn remove(&self, renderer: &Rc<Renderer>, vnode: &Rc<VNode>);

    fn move_to(
        &self,
        renderer: &Rc<Renderer>,
        vnode: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    );
}

/// Cache controller seam for keep-alive wrappers: instead of destroying a
/// kept-alive subtree, the owner deactivates it and can activate it back.
pub trait KeepAliveContext {
    fn activate(
        &self,
        renderer: &Rc<Renderer>,
        vnode: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    );

    fn deactivate(&self, renderer: &Rc<Renderer>, vnode: &Rc<VNode>);
}

pub struct Builtin {
    pub kind: BuiltinKind,
    pub handler: Rc<dyn BuiltinHandler>,
}

/// A component descriptor: identity for diffing, plus the behavior.
pub struct Component {
    pub name: Rc<str>,
    pub functional: bool,
    /// Runs once per instance before the first render; registers state,
    /// watchers, and lifecycle hooks against the current instance.
    pub setup: Option<Box<dyn Fn(&Rc<ComponentInstance>)>>,
    pub render: Box<dyn Fn(&Rc<ComponentInstance>) -> Rc<VNode>>,
    /// Style scope id stamped onto rendered host elements.
    pub scope_id: Option<Rc<str>>,
    pub builtin: Option<Builtin>,
}

impl Component {
    pub fn new(
        name: &str,
        render: impl Fn(&Rc<ComponentInstance>) -> Rc<VNode> + 'static,
    ) -> Rc<Component> {
        Rc::new(Component {
            name: Rc::from(name),
            functional: false,
            setup: None,
            render: Box::new(render),
            scope_id: None,
            builtin: None,
        })
    }

    pub fn with_setup(
        name: &str,
        setup: impl Fn(&Rc<ComponentInstance>) + 'static,
        render: impl Fn(&Rc<ComponentInstance>) -> Rc<VNode> + 'static,
    ) -> Rc<Component> {
        Rc::new(Component {
            name: Rc::from(name),
            functional: false,
            setup: Some(Box::new(setup)),
            render: Box::new(render),
            scope_id: None,
            builtin: None,
        })
    }

    pub(crate) fn builtin_kind(&self) -> Option<BuiltinKind> {
        self.builtin.as_ref().map(|b| b.kind)
    }
}

// =============================================================================
// Instance
// =============================================================================

thread_local! {
    static NEXT_UID: Cell<u64> = const { Cell::new(0) };
    static CURRENT_INSTANCE: RefCell<Option<Rc<ComponentInstance>>> = const { RefCell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookPhase {
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
    Activated,
    Deactivated,
}

#[derive(Default)]
struct HookStore {
    before_mount: RefCell<Vec<Rc<dyn Fn()>>>,
    mounted: RefCell<Vec<Rc<dyn Fn()>>>,
    before_update: RefCell<Vec<Rc<dyn Fn()>>>,
    updated: RefCell<Vec<Rc<dyn Fn()>>>,
    before_unmount: RefCell<Vec<Rc<dyn Fn()>>>,
    unmounted: RefCell<Vec<Rc<dyn Fn()>>>,
    activated: RefCell<Vec<Rc<dyn Fn()>>>,
    deactivated: RefCell<Vec<Rc<dyn Fn()>>>,
    error_captured: RefCell<Vec<Rc<dyn Fn(&ErrorInfo) -> bool>>>,
}

/// Per-mount state of a component.
pub struct ComponentInstance {
    pub(crate) uid: u64,
    pub(crate) def: Rc<Component>,
    vnode: RefCell<Rc<VNode>>,
    parent: Option<Weak<ComponentInstance>>,
    /// Shallow-reactive props: renders read through this, so prop writes
    /// re-render precisely.
    props: ReactiveRecord,
    slots: RefCell<Children>,
    pub(crate) scope: EffectScope,
    pub(crate) render_effect: RefCell<Option<Effect>>,
    pub(crate) job: RefCell<Option<Rc<SchedulerJob>>>,
    pub(crate) subtree: RefCell<Option<Rc<VNode>>>,
    pub(crate) next: RefCell<Option<Rc<VNode>>>,
    pub(crate) is_mounted: Cell<bool>,
    pub(crate) is_unmounted: Cell<bool>,
    hooks: HookStore,
    /// Injected keep-alive controller, when this instance owns one.
    pub(crate) keep_alive: RefCell<Option<Rc<dyn KeepAliveContext>>>,
    /// Post jobs queued on behalf of this instance, cancelled on unmount.
    pub(crate) pending_post: RefCell<Vec<Rc<PostJob>>>,
}

impl ComponentInstance {
    pub(crate) fn new(
        def: Rc<Component>,
        vnode: &Rc<VNode>,
        parent: Option<&Rc<ComponentInstance>>,
    ) -> Rc<Self> {
        let uid = NEXT_UID.with(|c| {
            let uid = c.get();
            c.set(uid + 1);
            uid
        });
        let props = RawMap::from_entries(
            vnode
                .props
                .iter()
                .filter(|(k, _)| !is_reserved_prop(k))
                .map(|(k, v)| (k.to_string(), v.clone())),
        );
        Rc::new(Self {
            uid,
            def,
            vnode: RefCell::new(vnode.clone()),
            parent: parent.map(Rc::downgrade),
            props: ReactiveRecord::shallow(props),
            slots: RefCell::new(vnode.children.clone()),
            scope: effect_scope_detached(),
            render_effect: RefCell::new(None),
            job: RefCell::new(None),
            subtree: RefCell::new(None),
            next: RefCell::new(None),
            is_mounted: Cell::new(false),
            is_unmounted: Cell::new(false),
            hooks: HookStore::default(),
            keep_alive: RefCell::new(None),
            pending_post: RefCell::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn parent(&self) -> Option<Rc<ComponentInstance>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_mounted(&self) -> bool {
        self.is_mounted.get()
    }

    pub fn is_unmounted(&self) -> bool {
        self.is_unmounted.get()
    }

    /// The shallow-reactive props record; reads inside the render track.
    pub fn props(&self) -> ReactiveRecord {
        self.props.clone()
    }

    /// One prop by name, unwrapped.
    pub fn prop(&self, key: &str) -> Option<Value> {
        self.props.get(key).map(|v| v.into_value())
    }

    /// Slot content passed by the parent (the node's children).
    pub fn slot_children(&self) -> Option<Vec<Rc<VNode>>> {
        match &*self.slots.borrow() {
            Children::Nodes(nodes) => Some(nodes.clone()),
            _ => None,
        }
    }

    pub fn slot_text(&self) -> Option<Rc<str>> {
        match &*self.slots.borrow() {
            Children::Text(t) => Some(t.clone()),
            _ => None,
        }
    }

    /// Install the keep-alive controller this instance owns.
    pub fn set_keep_alive(&self, ctx: Rc<dyn KeepAliveContext>) {
        *self.keep_alive.borrow_mut() = Some(ctx);
    }

    pub(crate) fn vnode(&self) -> Rc<VNode> {
        self.vnode.borrow().clone()
    }

    /// Adopt a parent-provided vnode before re-rendering: sync props into
    /// the reactive record and replace the slot content.
    pub(crate) fn adopt(&self, next: &Rc<VNode>) {
        *self.vnode.borrow_mut() = next.clone();
        *self.slots.borrow_mut() = next.children.clone();

        crate::reactive::subscriber::untracked(|| {
            let stale: Vec<String> = self
                .props
                .keys()
                .into_iter()
                .filter(|k| !next.props.contains(k))
                .collect();
            for (k, v) in next.props.iter() {
                if !is_reserved_prop(k) {
                    self.props.set(k, v.clone());
                }
            }
            for k in stale {
                self.props.remove(&k);
            }
        });
    }

    fn hook_list(&self, phase: HookPhase) -> Vec<Rc<dyn Fn()>> {
        let cell = match phase {
            HookPhase::BeforeMount => &self.hooks.before_mount,
            HookPhase::Mounted => &self.hooks.mounted,
            HookPhase::BeforeUpdate => &self.hooks.before_update,
            HookPhase::Updated => &self.hooks.updated,
            HookPhase::BeforeUnmount => &self.hooks.before_unmount,
            HookPhase::Unmounted => &self.hooks.unmounted,
            HookPhase::Activated => &self.hooks.activated,
            HookPhase::Deactivated => &self.hooks.deactivated,
        };
        cell.borrow().clone()
    }

    pub(crate) fn invoke_hooks(&self, phase: HookPhase) {
        for hook in self.hook_list(phase) {
            call_guarded(ErrorKind::LifecycleHook, Some(self), || hook());
        }
    }

    pub(crate) fn error_captured_hooks(&self) -> Vec<Rc<dyn Fn(&ErrorInfo) -> bool>> {
        self.hooks.error_captured.borrow().clone()
    }

    fn register_hook(&self, phase: HookPhase, hook: Rc<dyn Fn()>) {
        let cell = match phase {
            HookPhase::BeforeMount => &self.hooks.before_mount,
            HookPhase::Mounted => &self.hooks.mounted,
            HookPhase::BeforeUpdate => &self.hooks.before_update,
            HookPhase::Updated => &self.hooks.updated,
            HookPhase::BeforeUnmount => &self.hooks.before_unmount,
            HookPhase::Unmounted => &self.hooks.unmounted,
            HookPhase::Activated => &self.hooks.activated,
            HookPhase::Deactivated => &self.hooks.deactivated,
        };
        cell.borrow_mut().push(hook);
    }
}

impl std::fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("uid", &self.uid)
            .field("name", &self.def.name)
            .field("mounted", &self.is_mounted.get())
            .finish()
    }
}

// =============================================================================
// Hook Registration
// =============================================================================

pub(crate) fn current_instance() -> Option<Rc<ComponentInstance>> {
    CURRENT_INSTANCE.with(|c| c.borrow().clone())
}

pub(crate) fn swap_current_instance(
    next: Option<Rc<ComponentInstance>>,
) -> Option<Rc<ComponentInstance>> {
    CURRENT_INSTANCE.with(|c| c.replace(next))
}

fn register_on_current(phase: HookPhase, hook: impl Fn() + 'static) {
    match current_instance() {
        Some(instance) => instance.register_hook(phase, Rc::new(hook)),
        None => log::warn!("lifecycle hook registered outside of component setup; ignored"),
    }
}

pub fn on_before_mount(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::BeforeMount, hook);
}
pub fn on_mounted(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::Mounted, hook);
}
pub fn on_before_update(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::BeforeUpdate, hook);
}
pub fn on_updated(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::Updated, hook);
}
pub fn on_before_unmount(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::BeforeUnmount, hook);
}
pub fn on_unmounted(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::Unmounted, hook);
}
pub fn on_activated(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::Activated, hook);
}
pub fn on_deactivated(hook: impl Fn() + 'static) {
    register_on_current(HookPhase::Deactivated, hook);
}

/// Claim errors propagating up from descendants. Return `false` to stop
/// the propagation.
pub fn on_error_captured(hook: impl Fn(&ErrorInfo) -> bool + 'static) {
    match current_instance() {
        Some(instance) => instance
            .hooks
            .error_captured
            .borrow_mut()
            .push(Rc::new(hook)),
        None => log::warn!("on_error_captured called outside of component setup; ignored"),
    }
}

// =============================================================================
// Renderer-Side Processing
// =============================================================================

impl Renderer {
    pub(crate) fn process_component(
        &self,
        n1: Option<Rc<VNode>>,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        match n1 {
            None => {
                if n2.shape().contains(ShapeFlags::COMPONENT_KEPT_ALIVE) {
                    let ctx = parent.and_then(|p| p.keep_alive.borrow().clone());
                    match ctx {
                        Some(ctx) => ctx.activate(&self.strong(), n2, container, anchor),
                        None => log::warn!(
                            "kept-alive component has no keep-alive owner; mounting fresh"
                        ),
                    }
                } else {
                    self.mount_component(n2, container, anchor, parent, ns, optimized);
                }
            }
            Some(old) => self.update_component(&old, n2),
        }
    }

    fn mount_component(
        &self,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        _optimized: bool,
    ) {
        let def = match &n2.node_type {
            NodeType::Component(def) => def.clone(),
            _ => return,
        };
        let instance = ComponentInstance::new(def.clone(), n2, parent);
        *n2.component.borrow_mut() = Some(instance.clone());

        if let Some(setup) = &def.setup {
            let prev = swap_current_instance(Some(instance.clone()));
            instance.scope.run(|| {
                call_guarded(ErrorKind::SetupFunction, Some(instance.as_ref()), || {
                    setup(&instance)
                });
            });
            swap_current_instance(prev);
        }

        self.setup_render_effect(&instance, container, anchor, ns);
    }

    fn setup_render_effect(
        &self,
        instance: &Rc<ComponentInstance>,
        container: HostNode,
        anchor: Option<HostNode>,
        ns: Namespace,
    ) {
        let renderer = self.strong();
        let inst = instance.clone();
        let update_fn = move || {
            if inst.is_unmounted.get() {
                return;
            }
            if !inst.is_mounted.get() {
                inst.invoke_hooks(HookPhase::BeforeMount);

                let subtree = renderer.render_component(&inst);
                *inst.subtree.borrow_mut() = Some(subtree.clone());
                renderer.patch(
                    None,
                    &subtree,
                    container,
                    anchor,
                    Some(&inst),
                    ns,
                    false,
                );
                inst.vnode().el.set(subtree.el.get());
                inst.is_mounted.set(true);

                let hooked = inst.clone();
                let post = PostJob::new(Some(inst.uid), move || {
                    hooked.invoke_hooks(HookPhase::Mounted);
                });
                inst.pending_post.borrow_mut().push(post.clone());
                scheduler::queue_post(post);
            } else {
                // Recursion into this component is off while the pre-render
                // state (next vnode, before-update hooks) is applied.
                if let Some(effect) = inst.render_effect.borrow().as_ref() {
                    effect.allow_recurse(false);
                }
                let next = inst.next.borrow_mut().take();
                if let Some(next) = &next {
                    next.el.set(inst.vnode().el.get());
                    inst.adopt(next);
                }
                inst.invoke_hooks(HookPhase::BeforeUpdate);
                if let Some(effect) = inst.render_effect.borrow().as_ref() {
                    effect.allow_recurse(true);
                }

                let new_subtree = renderer.render_component(&inst);
                let prev_subtree = inst
                    .subtree
                    .borrow_mut()
                    .replace(new_subtree.clone())
                    .expect("updating a component that never rendered");
                let parent_container = prev_subtree
                    .el
                    .get()
                    .and_then(|el| renderer.host.parent_node(el))
                    .unwrap_or(container);
                let next_anchor = renderer.get_next_host_node(&prev_subtree);
                renderer.patch(
                    Some(prev_subtree),
                    &new_subtree,
                    parent_container,
                    next_anchor,
                    Some(&inst),
                    ns,
                    false,
                );
                inst.vnode().el.set(new_subtree.el.get());

                let hooked = inst.clone();
                scheduler::queue_post(PostJob::new(Some(inst.uid), move || {
                    hooked.invoke_hooks(HookPhase::Updated);
                }));
            }
        };

        let effect = instance.scope.run(|| Effect::new(update_fn));
        effect.allow_recurse(true);
        let job = SchedulerJob::new(Some(instance.uid), false, {
            let effect = effect.clone();
            move || effect.run()
        });
        effect.set_scheduler({
            let job = job.clone();
            move || scheduler::queue_job(job.clone())
        });
        *instance.render_effect.borrow_mut() = Some(effect.clone());
        *instance.job.borrow_mut() = Some(job);

        effect.run();
    }

    fn render_component(&self, instance: &Rc<ComponentInstance>) -> Rc<VNode> {
        let prev = swap_current_instance(Some(instance.clone()));
        let rendered = call_guarded(ErrorKind::RenderFunction, Some(instance.as_ref()), || {
            (instance.def.render)(instance)
        });
        swap_current_instance(prev);
        // A failed render leaves a placeholder so the tree stays patchable.
        rendered.unwrap_or_else(|| crate::tree::node::comment("render error"))
    }

    fn update_component(&self, n1: &Rc<VNode>, n2: &Rc<VNode>) {
        let instance = n1
            .component
            .borrow()
            .clone()
            .expect("updating a component vnode that was never mounted");
        *n2.component.borrow_mut() = Some(instance.clone());

        if should_update_component(n1, n2) {
            *instance.next.borrow_mut() = Some(n2.clone());
            // A queued async render is superseded by this sync update.
            let job = instance.job.borrow().clone();
            if let Some(job) = job {
                scheduler::invalidate_job(&job);
            }
            let effect = instance.render_effect.borrow().clone();
            if let Some(effect) = effect {
                effect.run();
            }
        } else {
            n2.el.set(n1.el.get());
            *instance.vnode.borrow_mut() = n2.clone();
        }
    }

    pub(crate) fn unmount_component(
        &self,
        instance: &Rc<ComponentInstance>,
        do_remove: bool,
    ) {
        if instance.is_unmounted.get() {
            return;
        }
        // Queued mount/update hooks must not fire after the teardown.
        for job in instance.pending_post.borrow_mut().drain(..) {
            job.cancel();
        }
        instance.invoke_hooks(HookPhase::BeforeUnmount);
        if let Some(job) = instance.job.borrow().as_ref() {
            job.dispose();
        }
        instance.scope.stop();

        let subtree = instance.subtree.borrow_mut().take();
        if let Some(subtree) = subtree {
            self.unmount(&subtree, Some(instance), do_remove);
        }
        instance.is_unmounted.set(true);

        let hooked = instance.clone();
        scheduler::queue_post(PostJob::new(Some(instance.uid), move || {
            hooked.invoke_hooks(HookPhase::Unmounted);
        }));
    }
}

/// Shallow prop diff plus slot presence: dynamic slots or any slot
/// content forces the update, equal props skip it.
fn should_update_component(prev: &Rc<VNode>, next: &Rc<VNode>) -> bool {
    if next.has_patch_flag(PatchFlags::DYNAMIC_SLOTS) {
        return true;
    }
    if !matches!(next.children, Children::None) {
        return true;
    }
    if prev.props != next.props {
        return true;
    }
    debug_assert!(same_vnode_type(prev, next));
    false
}
