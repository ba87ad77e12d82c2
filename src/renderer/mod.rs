//! Renderer - orchestrates patching against an injected host.
//!
//! The renderer owns nothing host-specific: it drives the [`HostOps`]
//! capability set and keeps one previous tree per container so repeated
//! [`Renderer::render`] calls diff instead of remounting. Render work is
//! wrapped in a flush guard; post-render callbacks (mounted/updated
//! hooks) run when the outermost render finishes.

pub mod children;
pub mod component;
pub mod element;
pub mod host;
pub mod patch;
pub mod scheduler;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::tree::node::VNode;

pub use component::{
    on_activated, on_before_mount, on_before_unmount, on_before_update, on_error_captured,
    on_mounted, on_unmounted, on_updated, Builtin, BuiltinHandler, BuiltinKind, Component,
    ComponentInstance, KeepAliveContext,
};
pub use host::{HostNode, HostOps, Namespace, TestHost};

use host::HostNode as Node;

pub struct Renderer {
    pub(crate) host: Rc<dyn HostOps>,
    /// Previous tree per container, for top-level re-renders.
    roots: RefCell<HashMap<Node, Rc<VNode>>>,
    /// Back-reference to the owning `Rc`, for effects and post jobs that
    /// must hold the renderer alive.
    weak_self: std::rc::Weak<Renderer>,
}

impl Renderer {
    pub fn new(host: Rc<dyn HostOps>) -> Rc<Renderer> {
        Rc::new_cyclic(|weak| Renderer {
            host,
            roots: RefCell::new(HashMap::new()),
            weak_self: weak.clone(),
        })
    }

    pub(crate) fn strong(&self) -> Rc<Renderer> {
        self.weak_self
            .upgrade()
            .expect("renderer outlives its handle")
    }

    /// Render `vnode` into `container`, diffing against whatever this
    /// renderer put there before. `None` unmounts the container's tree.
    pub fn render(&self, vnode: Option<Rc<VNode>>, container: Node) {
        let guard = scheduler::FlushGuard::new();
        let previous = self.roots.borrow().get(&container).cloned();
        match vnode {
            Some(node) => {
                self.patch(
                    previous,
                    &node,
                    container,
                    None,
                    None,
                    host::Namespace::Default,
                    false,
                );
                self.roots.borrow_mut().insert(container, node);
            }
            None => {
                if let Some(previous) = previous {
                    self.unmount(&previous, None, true);
                }
                self.roots.borrow_mut().remove(&container);
            }
        }
        drop(guard);
    }
}
