//! Host capability set - the injected operations the patch engine calls.
//!
//! The engine makes no assumptions about the host beyond this trait: the
//! same reconciler drives documents, native toolkits, and the in-memory
//! [`TestHost`] that ships here for tests and headless use. Host nodes
//! are opaque handles owned by the host.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::collections::Value;

/// Opaque host node handle.
pub type HostNode = usize;

/// Element namespace, forwarded to element creation and prop patching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Namespace {
    #[default]
    Default,
    Svg,
    MathMl,
}

/// Operations the renderer requires from a host platform.
pub trait HostOps {
    fn create_element(&self, tag: &str, ns: Namespace, is: Option<&str>) -> HostNode;
    fn create_text(&self, text: &str) -> HostNode;
    fn create_comment(&self, text: &str) -> HostNode;
    fn set_text(&self, node: HostNode, text: &str);
    fn set_element_text(&self, el: HostNode, text: &str);
    fn insert(&self, node: HostNode, parent: HostNode, anchor: Option<HostNode>);
    fn remove(&self, node: HostNode);
    fn parent_node(&self, node: HostNode) -> Option<HostNode>;
    fn next_sibling(&self, node: HostNode) -> Option<HostNode>;
    fn patch_prop(
        &self,
        el: HostNode,
        key: &str,
        prev: Option<&Value>,
        next: Option<&Value>,
        ns: Namespace,
    );
    /// Emit pre-rendered content, returning the first and last inserted
    /// nodes so the range can be moved or removed later.
    fn insert_static_content(
        &self,
        content: &str,
        parent: HostNode,
        anchor: Option<HostNode>,
        ns: Namespace,
    ) -> (HostNode, HostNode);

    fn query_selector(&self, _selector: &str) -> Option<HostNode> {
        None
    }

    fn set_scope_id(&self, _el: HostNode, _scope_id: &str) {}
}

// =============================================================================
// Test Host
// =============================================================================

enum TestNodeKind {
    Element {
        tag: String,
        props: RefCell<IndexMap<String, Value>>,
        scope_id: RefCell<Option<String>>,
    },
    Text(RefCell<String>),
    Comment(RefCell<String>),
    StaticChunk(String),
}

struct TestNode {
    kind: TestNodeKind,
    parent: Cell<Option<HostNode>>,
    children: RefCell<Vec<HostNode>>,
}

/// In-memory host backend: a node arena with parent/child wiring and an
/// operation log for order-sensitive assertions.
pub struct TestHost {
    nodes: RefCell<Vec<TestNode>>,
    log: RefCell<Vec<String>>,
}

impl TestHost {
    /// Create a host with a root container at handle 0.
    pub fn new() -> Rc<Self> {
        let host = Rc::new(Self {
            nodes: RefCell::new(Vec::new()),
            log: RefCell::new(Vec::new()),
        });
        host.alloc(TestNodeKind::Element {
            tag: "#root".to_string(),
            props: RefCell::new(IndexMap::new()),
            scope_id: RefCell::new(None),
        });
        host
    }

    /// The root container.
    pub fn root(&self) -> HostNode {
        0
    }

    fn alloc(&self, kind: TestNodeKind) -> HostNode {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(TestNode {
            kind,
            parent: Cell::new(None),
            children: RefCell::new(Vec::new()),
        });
        nodes.len() - 1
    }

    fn record(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }

    /// Drain the operation log.
    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    /// Entries of the log that start with `prefix`, without draining.
    pub fn log_entries(&self, prefix: &str) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn detach(&self, node: HostNode) {
        let nodes = self.nodes.borrow();
        if let Some(parent) = nodes[node].parent.take() {
            nodes[parent].children.borrow_mut().retain(|&c| c != node);
        }
    }

    /// Serialize a subtree to a markup-like string.
    pub fn html(&self, node: HostNode) -> String {
        enum Snapshot {
            Leaf(String),
            Element {
                open: String,
                close: String,
                children: Vec<HostNode>,
            },
        }
        let snapshot = {
            let nodes = self.nodes.borrow();
            let n = &nodes[node];
            match &n.kind {
                TestNodeKind::Text(t) => Snapshot::Leaf(t.borrow().clone()),
                TestNodeKind::Comment(c) => Snapshot::Leaf(format!("<!--{}-->", c.borrow())),
                TestNodeKind::StaticChunk(s) => Snapshot::Leaf(s.clone()),
                TestNodeKind::Element { tag, props, .. } => {
                    let mut open = format!("<{tag}");
                    for (k, v) in props.borrow().iter() {
                        if v.is_null() {
                            continue;
                        }
                        open.push_str(&format!(" {k}={:?}", v.to_string()));
                    }
                    open.push('>');
                    Snapshot::Element {
                        open,
                        close: format!("</{tag}>"),
                        children: n.children.borrow().clone(),
                    }
                }
            }
        };
        match snapshot {
            Snapshot::Leaf(s) => s,
            Snapshot::Element {
                open,
                close,
                children,
            } => {
                let mut out = open;
                for child in children {
                    out.push_str(&self.html(child));
                }
                out.push_str(&close);
                out
            }
        }
    }

    /// Serialized children of the root container.
    pub fn root_html(&self) -> String {
        let children: Vec<HostNode> = self.nodes.borrow()[0].children.borrow().clone();
        children.into_iter().map(|c| self.html(c)).collect()
    }

    pub fn child_count(&self, node: HostNode) -> usize {
        self.nodes.borrow()[node].children.borrow().len()
    }
}

impl HostOps for TestHost {
    fn create_element(&self, tag: &str, _ns: Namespace, _is: Option<&str>) -> HostNode {
        let id = self.alloc(TestNodeKind::Element {
            tag: tag.to_string(),
            props: RefCell::new(IndexMap::new()),
            scope_id: RefCell::new(None),
        });
        self.record(format!("create_element {tag}"));
        id
    }

    fn create_text(&self, text: &str) -> HostNode {
        let id = self.alloc(TestNodeKind::Text(RefCell::new(text.to_string())));
        self.record(format!("create_text {text:?}"));
        id
    }

    fn create_comment(&self, text: &str) -> HostNode {
        let id = self.alloc(TestNodeKind::Comment(RefCell::new(text.to_string())));
        self.record(format!("create_comment {text:?}"));
        id
    }

    fn set_text(&self, node: HostNode, text: &str) {
        self.record(format!("set_text {text:?}"));
        let nodes = self.nodes.borrow();
        match &nodes[node].kind {
            TestNodeKind::Text(t) | TestNodeKind::Comment(t) => *t.borrow_mut() = text.to_string(),
            _ => {}
        }
    }

    fn set_element_text(&self, el: HostNode, text: &str) {
        self.record(format!("set_element_text {text:?}"));
        {
            // Raw text replaces all children.
            let nodes = self.nodes.borrow();
            let children = std::mem::take(&mut *nodes[el].children.borrow_mut());
            for child in children {
                nodes[child].parent.set(None);
            }
        }
        if !text.is_empty() {
            let id = self.alloc(TestNodeKind::Text(RefCell::new(text.to_string())));
            let nodes = self.nodes.borrow();
            nodes[id].parent.set(Some(el));
            nodes[el].children.borrow_mut().push(id);
        }
    }

    fn insert(&self, node: HostNode, parent: HostNode, anchor: Option<HostNode>) {
        self.detach(node);
        self.record(format!("insert {node} -> {parent}"));
        let nodes = self.nodes.borrow();
        nodes[node].parent.set(Some(parent));
        let mut children = nodes[parent].children.borrow_mut();
        match anchor.and_then(|a| children.iter().position(|&c| c == a)) {
            Some(index) => children.insert(index, node),
            None => children.push(node),
        }
    }

    fn remove(&self, node: HostNode) {
        self.record(format!("remove {node}"));
        self.detach(node);
    }

    fn parent_node(&self, node: HostNode) -> Option<HostNode> {
        self.nodes.borrow()[node].parent.get()
    }

    fn next_sibling(&self, node: HostNode) -> Option<HostNode> {
        let nodes = self.nodes.borrow();
        let parent = nodes[node].parent.get()?;
        let children = nodes[parent].children.borrow();
        let index = children.iter().position(|&c| c == node)?;
        children.get(index + 1).copied()
    }

    fn patch_prop(
        &self,
        el: HostNode,
        key: &str,
        _prev: Option<&Value>,
        next: Option<&Value>,
        _ns: Namespace,
    ) {
        self.record(format!("patch_prop {key}"));
        let nodes = self.nodes.borrow();
        if let TestNodeKind::Element { props, .. } = &nodes[el].kind {
            match next {
                Some(v) => {
                    props.borrow_mut().insert(key.to_string(), v.clone());
                }
                None => {
                    props.borrow_mut().shift_remove(key);
                }
            }
        }
    }

    fn insert_static_content(
        &self,
        content: &str,
        parent: HostNode,
        anchor: Option<HostNode>,
        _ns: Namespace,
    ) -> (HostNode, HostNode) {
        let id = self.alloc(TestNodeKind::StaticChunk(content.to_string()));
        self.record(format!("insert_static {content:?}"));
        self.insert(id, parent, anchor);
        (id, id)
    }

    fn set_scope_id(&self, el: HostNode, scope_id: &str) {
        let nodes = self.nodes.borrow();
        if let TestNodeKind::Element { scope_id: slot, .. } = &nodes[el].kind {
            *slot.borrow_mut() = Some(scope_id.to_string());
        }
    }
}
