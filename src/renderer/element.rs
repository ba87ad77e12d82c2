//! Element mount and update.
//!
//! Mount order: create, children, directive `created`, scope id, props in
//! declared order with `value` patched last, before-mount hooks, insert,
//! then queue post-render mounted hooks. Updates pick the cheapest valid
//! path from the patch flag (class/style/dynamic-prop list/text) and fall
//! back to the full diffs when the compiler provided no guarantees.

use std::rc::Rc;

use crate::collections::Value;
use crate::tree::node::{Children, NodeType, PatchFlags, VNode};
use crate::tree::props::{is_reserved_prop, PropMap};

use super::component::ComponentInstance;
use super::host::{HostNode, Namespace};
use super::patch::{mounted_el, DirPhase};
use super::scheduler::{self, PostJob};
use super::Renderer;

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn process_element(
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
            None => self.mount_element(n2, container, anchor, parent, ns, optimized),
            Some(old) => self.patch_element(&old, n2, parent, ns, optimized),
        }
    }

    fn mount_element(
        &self,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        let tag = match &n2.node_type {
            NodeType::Element(tag) => tag.clone(),
            _ => return,
        };
        let is = n2.props.get("is").and_then(|v| v.as_str().map(String::from));
        let el = self.host.create_element(&tag, ns, is.as_deref());
        n2.el.set(Some(el));

        match &n2.children {
            Children::Text(text) => self.host.set_element_text(el, text),
            Children::Nodes(children) => {
                self.mount_children(children, el, None, parent, ns, optimized)
            }
            Children::None => {}
        }

        self.invoke_dir_hooks(n2, None, DirPhase::Created);

        if let Some(scope_id) = parent.and_then(|p| p.def.scope_id.clone()) {
            self.host.set_scope_id(el, &scope_id);
        }

        // Declared order, `value` last: hosts with range constraints need
        // min/max applied before the value.
        for (key, value) in n2.props.iter() {
            if is_reserved_prop(key) || key == "value" {
                continue;
            }
            self.host.patch_prop(el, key, None, Some(value), ns);
        }
        if let Some(value) = n2.props.get("value") {
            self.host.patch_prop(el, "value", None, Some(value), ns);
        }

        self.invoke_vnode_hook(&n2.hooks.before_mount, n2, None);
        self.invoke_dir_hooks(n2, None, DirPhase::BeforeMount);

        self.host.insert(el, container, anchor);

        let needs_post = n2.hooks.mounted.is_some()
            || n2.dirs.iter().any(|d| d.directive.mounted.is_some());
        if needs_post {
            let renderer = self.strong();
            let vnode = n2.clone();
            scheduler::queue_post(PostJob::new(None, move || {
                renderer.invoke_vnode_hook(&vnode.hooks.mounted, &vnode, None);
                renderer.invoke_dir_hooks(&vnode, None, DirPhase::Mounted);
            }));
        }
    }

    fn patch_element(
        &self,
        n1: &Rc<VNode>,
        n2: &Rc<VNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        let el = mounted_el(n1);
        n2.el.set(Some(el));

        self.invoke_vnode_hook(&n2.hooks.before_update, n2, Some(n1));
        self.invoke_dir_hooks(n2, Some(n1), DirPhase::BeforeUpdate);

        // Children first, then props.
        let old_dynamic = n1.dynamic_children.borrow().clone();
        let new_dynamic = n2.dynamic_children.borrow().clone();
        if let (Some(old_blocks), Some(new_blocks)) = (&old_dynamic, &new_dynamic) {
            self.patch_block_children(old_blocks, new_blocks, el, parent, ns);
        } else if !optimized {
            self.patch_children(n1, n2, el, None, parent, ns, false);
        }

        if n2.patch_flag > 0 {
            let flags = PatchFlags::from_bits_truncate(n2.patch_flag);
            if flags.contains(PatchFlags::FULL_PROPS) {
                self.patch_props_full(el, &n1.props, &n2.props, ns);
            } else {
                if flags.contains(PatchFlags::CLASS) {
                    let prev = n1.props.get("class");
                    let next = n2.props.get("class");
                    if prev != next {
                        self.host.patch_prop(el, "class", prev, next, ns);
                    }
                }
                // The host diffs style at a finer grain; always forward.
                if flags.contains(PatchFlags::STYLE) {
                    self.host
                        .patch_prop(el, "style", n1.props.get("style"), n2.props.get("style"), ns);
                }
                if flags.contains(PatchFlags::PROPS) {
                    if let Some(dynamic_props) = &n2.dynamic_props {
                        for key in dynamic_props {
                            let prev = n1.props.get(key);
                            let next = n2.props.get(key);
                            // `value` forwards even when unchanged; host
                            // state can drift from the vnode record.
                            if prev != next || key.as_ref() == "value" {
                                self.host.patch_prop(el, key, prev, next, ns);
                            }
                        }
                    }
                }
            }
            if flags.contains(PatchFlags::TEXT) && n1.children.as_text() != n2.children.as_text()
            {
                self.host.set_element_text(el, n2.text());
            }
        } else if !optimized && n2.dynamic_children.borrow().is_none() {
            self.patch_props_full(el, &n1.props, &n2.props, ns);
        }

        let needs_post = n2.hooks.updated.is_some()
            || n2.dirs.iter().any(|d| d.directive.updated.is_some());
        if needs_post {
            let renderer = self.strong();
            let (vnode, old) = (n2.clone(), n1.clone());
            scheduler::queue_post(PostJob::new(None, move || {
                renderer.invoke_vnode_hook(&vnode.hooks.updated, &vnode, Some(&old));
                renderer.invoke_dir_hooks(&vnode, Some(&old), DirPhase::Updated);
            }));
        }
    }

    /// Full prop diff: removed keys to null, changed keys patched,
    /// `value` deferred to last.
    pub(crate) fn patch_props_full(
        &self,
        el: HostNode,
        old_props: &PropMap,
        new_props: &PropMap,
        ns: Namespace,
    ) {
        if old_props == new_props {
            return;
        }
        for (key, prev) in old_props.iter() {
            if is_reserved_prop(key) || new_props.contains(key) {
                continue;
            }
            self.host.patch_prop(el, key, Some(prev), None, ns);
        }
        let mut deferred_value: Option<(Option<&Value>, &Value)> = None;
        for (key, next) in new_props.iter() {
            if is_reserved_prop(key) {
                continue;
            }
            let prev = old_props.get(key);
            if key == "value" {
                deferred_value = Some((prev, next));
                continue;
            }
            if prev != Some(next) {
                self.host.patch_prop(el, key, prev, Some(next), ns);
            }
        }
        if let Some((prev, next)) = deferred_value {
            if prev != Some(next) {
                self.host.patch_prop(el, "value", prev, Some(next), ns);
            }
        }
    }

    pub(crate) fn mount_children(
        &self,
        children: &[Rc<VNode>],
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        for child in children {
            self.patch(None, child, container, anchor, parent, ns, optimized);
        }
    }
}
