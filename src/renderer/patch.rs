//! Patch dispatch - reconciling one node pair per kind.
//!
//! Entry rules, in order: identical nodes short-circuit; a type or key
//! mismatch unmounts the old tree and mounts fresh; a BAIL patch flag
//! forces the unoptimized paths; then dispatch on the node type. Text
//! nodes update in place, comments never re-diff, static content moves
//! and re-emits as a host range, fragments carry explicit start/end
//! anchors, and teleport/suspense-shaped components delegate to their
//! injected handler.

use std::rc::Rc;

use crate::error::{call_guarded, ErrorKind};
use crate::tree::node::{
    same_vnode_type, Children, NodeType, PatchFlags, ShapeFlags, VNode,
};

use super::component::ComponentInstance;
use super::host::{HostNode, Namespace};
use super::scheduler::{self, PostJob};
use super::Renderer;

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn patch(
        &self,
        n1: Option<Rc<VNode>>,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        if let Some(old) = &n1 {
            if Rc::ptr_eq(old, n2) {
                return;
            }
        }

        let mut n1 = n1;
        let mut anchor = anchor;
        let replaced = match &n1 {
            Some(old) if !same_vnode_type(old, n2) => {
                anchor = self.get_next_host_node(old);
                self.unmount(old, parent, true);
                true
            }
            _ => false,
        };
        if replaced {
            n1 = None;
        }

        let mut optimized = optimized;
        if n2.is_bail() {
            optimized = false;
            *n2.dynamic_children.borrow_mut() = None;
        }

        match &n2.node_type {
            NodeType::Text => self.process_text(n1, n2, container, anchor),
            NodeType::Comment => self.process_comment(n1, n2, container, anchor),
            NodeType::Static => match n1 {
                None => self.mount_static(n2, container, anchor, ns),
                Some(old) => self.patch_static(&old, n2, ns),
            },
            NodeType::Fragment => {
                self.process_fragment(n1, n2, container, anchor, parent, ns, optimized)
            }
            NodeType::Element(_) => {
                self.process_element(n1, n2, container, anchor, parent, ns, optimized)
            }
            NodeType::Component(def) => {
                if n2
                    .shape()
                    .intersects(ShapeFlags::TELEPORT | ShapeFlags::SUSPENSE)
                {
                    match &def.builtin {
                        Some(builtin) => builtin.handler.process(
                            &self.strong(),
                            n1,
                            n2.clone(),
                            container,
                            anchor,
                            parent.cloned(),
                            ns,
                            optimized,
                        ),
                        None => log::warn!(
                            "component {} is teleport/suspense shaped but has no handler",
                            def.name
                        ),
                    }
                } else {
                    self.process_component(n1, n2, container, anchor, parent, ns, optimized);
                }
            }
        }
    }

    // =========================================================================
    // Text / Comment
    // =========================================================================

    fn process_text(
        &self,
        n1: Option<Rc<VNode>>,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) {
        match n1 {
            None => {
                let el = self.host.create_text(n2.text());
                n2.el.set(Some(el));
                self.host.insert(el, container, anchor);
            }
            Some(old) => {
                let el = mounted_el(&old);
                n2.el.set(Some(el));
                if old.text() != n2.text() {
                    self.host.set_text(el, n2.text());
                }
            }
        }
    }

    fn process_comment(
        &self,
        n1: Option<Rc<VNode>>,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) {
        match n1 {
            None => {
                let el = self.host.create_comment(n2.text());
                n2.el.set(Some(el));
                self.host.insert(el, container, anchor);
            }
            Some(old) => {
                // Comments carry no diffable content after mount.
                n2.el.set(old.el.get());
            }
        }
    }

    // =========================================================================
    // Static Ranges
    // =========================================================================

    fn mount_static(
        &self,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        ns: Namespace,
    ) {
        let (first, last) = self
            .host
            .insert_static_content(n2.text(), container, anchor, ns);
        n2.el.set(Some(first));
        n2.anchor.set(Some(last));
    }

    /// Hot-reload path: re-emit when the content changed, otherwise adopt
    /// the mounted range.
    fn patch_static(&self, n1: &Rc<VNode>, n2: &Rc<VNode>, ns: Namespace) {
        if n1.text() == n2.text() {
            n2.el.set(n1.el.get());
            n2.anchor.set(n1.anchor.get());
            return;
        }
        let last = n1.anchor.get().unwrap_or_else(|| mounted_el(n1));
        let container = self
            .host
            .parent_node(mounted_el(n1))
            .expect("patching a detached static range");
        let anchor = self.host.next_sibling(last);
        self.remove_static(n1);
        self.mount_static(n2, container, anchor, ns);
    }

    pub(crate) fn move_static(
        &self,
        vnode: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) {
        self.for_static_range(vnode, |host, node| host.insert(node, container, anchor));
    }

    pub(crate) fn remove_static(&self, vnode: &Rc<VNode>) {
        self.for_static_range(vnode, |host, node| host.remove(node));
    }

    /// Walk the inclusive host range `[el ..= anchor]`.
    fn for_static_range(
        &self,
        vnode: &Rc<VNode>,
        f: impl Fn(&dyn super::HostOps, HostNode),
    ) {
        let last = vnode.anchor.get().unwrap_or_else(|| mounted_el(vnode));
        let mut cursor = vnode.el.get();
        while let Some(node) = cursor {
            cursor = self.host.next_sibling(node);
            f(self.host.as_ref(), node);
            if node == last {
                break;
            }
        }
    }

    // =========================================================================
    // Fragments
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn process_fragment(
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
                // Start/end anchors bracket the children so the whole
                // range can be relocated later.
                let start = self.host.create_text("");
                let end = self.host.create_text("");
                n2.el.set(Some(start));
                n2.anchor.set(Some(end));
                self.host.insert(start, container, anchor);
                self.host.insert(end, container, anchor);
                if let Children::Nodes(children) = &n2.children {
                    self.mount_children(children, container, Some(end), parent, ns, optimized);
                }
            }
            Some(old) => {
                n2.el.set(old.el.get());
                let end = old.anchor.get();
                n2.anchor.set(end);

                let stable = n2.has_patch_flag(PatchFlags::STABLE_FRAGMENT);
                let old_dynamic = old.dynamic_children.borrow().clone();
                let new_dynamic = n2.dynamic_children.borrow().clone();
                match (stable, old_dynamic, new_dynamic) {
                    (true, Some(old_blocks), Some(new_blocks)) => {
                        self.patch_block_children(
                            &old_blocks,
                            &new_blocks,
                            container,
                            parent,
                            ns,
                        );
                    }
                    _ => {
                        self.patch_children(&old, n2, container, end, parent, ns, optimized);
                    }
                }
            }
        }
    }

    /// Block fast path: pair up the compiler-collected dynamic
    /// descendants; everything else is provably stable.
    pub(crate) fn patch_block_children(
        &self,
        old_children: &[Rc<VNode>],
        new_children: &[Rc<VNode>],
        fallback_container: HostNode,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
    ) {
        for i in 0..new_children.len() {
            let Some(old) = old_children.get(i) else { break };
            let new = &new_children[i];
            // A dynamic child that roots its own subtree (fragment,
            // component, or replaced node) patches against its real host
            // parent, not the block container.
            let container = match old.el.get() {
                Some(el)
                    if matches!(old.node_type, NodeType::Fragment)
                        || !same_vnode_type(old, new)
                        || old
                            .shape()
                            .intersects(ShapeFlags::COMPONENT | ShapeFlags::TELEPORT) =>
                {
                    self.host.parent_node(el).unwrap_or(fallback_container)
                }
                _ => fallback_container,
            };
            self.patch(Some(old.clone()), new, container, None, parent, ns, true);
        }
    }

    // =========================================================================
    // Unmount / Move / Traversal
    // =========================================================================

    pub(crate) fn unmount(
        &self,
        vnode: &Rc<VNode>,
        parent: Option<&Rc<ComponentInstance>>,
        do_remove: bool,
    ) {
        let shape = vnode.shape();

        if shape.contains(ShapeFlags::COMPONENT_SHOULD_KEEP_ALIVE) {
            let ctx = parent.and_then(|p| p.keep_alive.borrow().clone());
            if let Some(ctx) = ctx {
                ctx.deactivate(&self.strong(), vnode);
                return;
            }
            log::warn!("keep-alive shaped component has no keep-alive owner; destroying");
        }

        self.invoke_vnode_hook(&vnode.hooks.before_unmount, vnode, None);
        self.invoke_dir_hooks(vnode, None, DirPhase::BeforeUnmount);

        if shape.intersects(ShapeFlags::COMPONENT) {
            let instance = vnode.component.borrow().clone();
            if let Some(instance) = instance {
                if shape.intersects(ShapeFlags::TELEPORT | ShapeFlags::SUSPENSE) {
                    if let Some(builtin) = &instance.def.builtin {
                        builtin.handler.remove(&self.strong(), vnode);
                    }
                }
                self.unmount_component(&instance, do_remove);
            }
        } else {
            if matches!(vnode.node_type, NodeType::Fragment)
                || vnode.shape().contains(ShapeFlags::ARRAY_CHILDREN)
            {
                if let Children::Nodes(children) = &vnode.children {
                    self.unmount_children(children, parent, false);
                }
            }
            if do_remove {
                self.remove_vnode(vnode);
            }
        }

        let unmounted_hook = vnode.hooks.unmounted.clone();
        let has_dir_unmounted = vnode.dirs.iter().any(|d| d.directive.unmounted.is_some());
        if unmounted_hook.is_some() || has_dir_unmounted {
            let renderer = self.strong();
            let vnode = vnode.clone();
            scheduler::queue_post(PostJob::new(None, move || {
                renderer.invoke_vnode_hook(&vnode.hooks.unmounted, &vnode, None);
                renderer.invoke_dir_hooks(&vnode, None, DirPhase::Unmounted);
            }));
        }
    }

    pub(crate) fn unmount_children(
        &self,
        children: &[Rc<VNode>],
        parent: Option<&Rc<ComponentInstance>>,
        do_remove: bool,
    ) {
        for child in children {
            self.unmount(child, parent, do_remove);
        }
    }

    /// Remove a mounted vnode's host footprint.
    pub(crate) fn remove_vnode(&self, vnode: &Rc<VNode>) {
        match &vnode.node_type {
            NodeType::Fragment => {
                // Everything between the anchors, anchors included.
                self.remove_static(vnode);
            }
            NodeType::Static => self.remove_static(vnode),
            _ => {
                if let Some(el) = vnode.el.get() {
                    self.host.remove(el);
                }
            }
        }
    }

    /// Relocate a mounted vnode in front of `anchor`.
    pub(crate) fn move_vnode(
        &self,
        vnode: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) {
        let shape = vnode.shape();
        if shape.intersects(ShapeFlags::COMPONENT) {
            if shape.contains(ShapeFlags::TELEPORT) {
                let instance = vnode.component.borrow().clone();
                if let Some(builtin) = instance.as_ref().and_then(|i| i.def.builtin.as_ref()) {
                    builtin.handler.move_to(&self.strong(), vnode, container, anchor);
                    return;
                }
            }
            let subtree = vnode
                .component
                .borrow()
                .as_ref()
                .and_then(|i| i.subtree.borrow().clone());
            if let Some(subtree) = subtree {
                self.move_vnode(&subtree, container, anchor);
            }
            return;
        }
        match &vnode.node_type {
            NodeType::Fragment | NodeType::Static => self.move_static(vnode, container, anchor),
            _ => {
                if let Some(el) = vnode.el.get() {
                    self.host.insert(el, container, anchor);
                }
            }
        }
    }

    /// The host node right after a mounted vnode's footprint; the anchor
    /// for inserting in front of its successor.
    pub(crate) fn get_next_host_node(&self, vnode: &Rc<VNode>) -> Option<HostNode> {
        if vnode.shape().intersects(ShapeFlags::COMPONENT) {
            let subtree = vnode
                .component
                .borrow()
                .as_ref()
                .and_then(|i| i.subtree.borrow().clone());
            return subtree.and_then(|s| self.get_next_host_node(&s));
        }
        let after = match &vnode.node_type {
            NodeType::Fragment | NodeType::Static => vnode.anchor.get(),
            _ => vnode.el.get(),
        };
        after.and_then(|node| self.host.next_sibling(node))
    }

    // =========================================================================
    // Hook Invocation
    // =========================================================================

    pub(crate) fn invoke_vnode_hook(
        &self,
        hook: &Option<crate::tree::node::VNodeHook>,
        vnode: &Rc<VNode>,
        old: Option<&Rc<VNode>>,
    ) {
        if let Some(hook) = hook {
            call_guarded(ErrorKind::VnodeHook, None, || hook(vnode, old));
        }
    }

    pub(crate) fn invoke_dir_hooks(
        &self,
        vnode: &Rc<VNode>,
        old: Option<&Rc<VNode>>,
        phase: DirPhase,
    ) {
        if vnode.dirs.is_empty() {
            return;
        }
        let Some(el) = vnode.el.get() else { return };
        for binding in &vnode.dirs {
            let hook = match phase {
                DirPhase::Created => &binding.directive.created,
                DirPhase::BeforeMount => &binding.directive.before_mount,
                DirPhase::Mounted => &binding.directive.mounted,
                DirPhase::BeforeUpdate => &binding.directive.before_update,
                DirPhase::Updated => &binding.directive.updated,
                DirPhase::BeforeUnmount => &binding.directive.before_unmount,
                DirPhase::Unmounted => &binding.directive.unmounted,
            };
            if let Some(hook) = hook {
                call_guarded(ErrorKind::DirectiveHook, None, || hook(el, vnode, old));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirPhase {
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    BeforeUnmount,
    Unmounted,
}

/// The host element of a mounted vnode.
pub(crate) fn mounted_el(vnode: &VNode) -> HostNode {
    vnode.el.get().expect("vnode is not mounted")
}
