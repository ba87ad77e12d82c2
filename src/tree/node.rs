//! Virtual nodes - typed records describing what the tree should be.
//!
//! A node carries its type (element tag, component descriptor, or one of
//! the sentinels), an optional key for list diffing, props, children, and
//! two bitfields: shape flags classifying the content, and a patch flag
//! advertising what may have changed since the node's previous
//! incarnation. Compiler-shaped trees additionally collect their dynamic
//! descendants into blocks so updates can skip stable structure.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use bitflags::bitflags;

use super::props::PropMap;
use crate::collections::Value;
use crate::renderer::component::{BuiltinKind, Component, ComponentInstance};
use crate::renderer::host::HostNode;

bitflags! {
    /// Classifies a node's content kind and role.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShapeFlags: u16 {
        const ELEMENT = 1;
        const FUNCTIONAL_COMPONENT = 1 << 1;
        const STATEFUL_COMPONENT = 1 << 2;
        const TEXT_CHILDREN = 1 << 3;
        const ARRAY_CHILDREN = 1 << 4;
        const SLOT_CHILDREN = 1 << 5;
        const TELEPORT = 1 << 6;
        const SUSPENSE = 1 << 7;
        const COMPONENT_SHOULD_KEEP_ALIVE = 1 << 8;
        const COMPONENT_KEPT_ALIVE = 1 << 9;
        const COMPONENT = Self::FUNCTIONAL_COMPONENT.bits() | Self::STATEFUL_COMPONENT.bits();
    }
}

bitflags! {
    /// What the compiler says may have changed. Positive bits compose;
    /// the negative sentinels [`PATCH_FLAG_CACHED`] and [`PATCH_FLAG_BAIL`]
    /// stand alone.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatchFlags: i32 {
        const TEXT = 1;
        const CLASS = 1 << 1;
        const STYLE = 1 << 2;
        const PROPS = 1 << 3;
        const FULL_PROPS = 1 << 4;
        const NEED_HYDRATION = 1 << 5;
        const STABLE_FRAGMENT = 1 << 6;
        const KEYED_FRAGMENT = 1 << 7;
        const UNKEYED_FRAGMENT = 1 << 8;
        const NEED_PATCH = 1 << 9;
        const DYNAMIC_SLOTS = 1 << 10;
        const DEV_ROOT_FRAGMENT = 1 << 11;
    }
}

/// A cached node that never changes.
pub const PATCH_FLAG_CACHED: i32 = -1;
/// Diff optimization opt-out: forces the full, unoptimized paths.
pub const PATCH_FLAG_BAIL: i32 = -2;

// =============================================================================
// Key / Type / Children
// =============================================================================

/// Identity of a node within a keyed list.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Key {
    Int(i64),
    Str(Rc<str>),
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::Int(v)
    }
}
impl From<i32> for Key {
    fn from(v: i32) -> Self {
        Key::Int(v as i64)
    }
}
impl From<usize> for Key {
    fn from(v: usize) -> Self {
        Key::Int(v as i64)
    }
}
impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::Str(Rc::from(v))
    }
}

/// What kind of node this is.
#[derive(Clone)]
pub enum NodeType {
    Element(Rc<str>),
    Component(Rc<Component>),
    Text,
    Comment,
    Static,
    Fragment,
}

impl PartialEq for NodeType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (NodeType::Element(a), NodeType::Element(b)) => a == b,
            (NodeType::Component(a), NodeType::Component(b)) => Rc::ptr_eq(a, b),
            (NodeType::Text, NodeType::Text) => true,
            (NodeType::Comment, NodeType::Comment) => true,
            (NodeType::Static, NodeType::Static) => true,
            (NodeType::Fragment, NodeType::Fragment) => true,
            _ => false,
        }
    }
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::Element(tag) => write!(f, "Element({tag})"),
            NodeType::Component(c) => write!(f, "Component({})", c.name),
            NodeType::Text => write!(f, "Text"),
            NodeType::Comment => write!(f, "Comment"),
            NodeType::Static => write!(f, "Static"),
            NodeType::Fragment => write!(f, "Fragment"),
        }
    }
}

/// Node content: nothing, raw text, or an ordered child sequence.
#[derive(Clone, Default)]
pub enum Children {
    #[default]
    None,
    Text(Rc<str>),
    Nodes(Vec<Rc<VNode>>),
}

impl Children {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Children::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_nodes(&self) -> Option<&[Rc<VNode>]> {
        match self {
            Children::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }
}

impl From<&str> for Children {
    fn from(v: &str) -> Self {
        Children::Text(Rc::from(v))
    }
}
impl From<String> for Children {
    fn from(v: String) -> Self {
        Children::Text(Rc::from(v.as_str()))
    }
}
impl From<Vec<Rc<VNode>>> for Children {
    fn from(v: Vec<Rc<VNode>>) -> Self {
        Children::Nodes(v)
    }
}
impl From<()> for Children {
    fn from(_: ()) -> Self {
        Children::None
    }
}

// =============================================================================
// Hooks and Directives
// =============================================================================

/// Per-node lifecycle hooks, invoked with (node, previous node).
pub type VNodeHook = Rc<dyn Fn(&Rc<VNode>, Option<&Rc<VNode>>)>;

#[derive(Clone, Default)]
pub struct VNodeHooks {
    pub before_mount: Option<VNodeHook>,
    pub mounted: Option<VNodeHook>,
    pub before_update: Option<VNodeHook>,
    pub updated: Option<VNodeHook>,
    pub before_unmount: Option<VNodeHook>,
    pub unmounted: Option<VNodeHook>,
}

/// Directive hook: receives the host element and the node pair.
pub type DirectiveHook = Rc<dyn Fn(HostNode, &Rc<VNode>, Option<&Rc<VNode>>)>;

/// An element-scoped behavior with hooks at each lifecycle point.
#[derive(Clone, Default)]
pub struct Directive {
    pub created: Option<DirectiveHook>,
    pub before_mount: Option<DirectiveHook>,
    pub mounted: Option<DirectiveHook>,
    pub before_update: Option<DirectiveHook>,
    pub updated: Option<DirectiveHook>,
    pub before_unmount: Option<DirectiveHook>,
    pub unmounted: Option<DirectiveHook>,
}

/// A directive applied to one node, with its bound value.
#[derive(Clone)]
pub struct DirectiveBinding {
    pub directive: Rc<Directive>,
    pub value: Option<Value>,
}

// =============================================================================
// VNode
// =============================================================================

/// An immutable-by-convention description of one tree node. The mounted
/// host element, fragment anchor, and component instance slots are filled
/// in by the patch engine.
pub struct VNode {
    pub node_type: NodeType,
    pub key: Option<Key>,
    pub props: PropMap,
    pub children: Children,
    pub shape: Cell<ShapeFlags>,
    pub patch_flag: i32,
    /// Compiler-declared possibly-changing prop keys (with PROPS flag).
    pub dynamic_props: Option<Vec<Rc<str>>>,
    /// Possibly-changing descendants collected by the block tree.
    pub dynamic_children: RefCell<Option<Vec<Rc<VNode>>>>,
    /// Resolved host element after mount.
    pub el: Cell<Option<HostNode>>,
    /// Fragment/static end anchor.
    pub anchor: Cell<Option<HostNode>>,
    pub component: RefCell<Option<Rc<ComponentInstance>>>,
    pub hooks: VNodeHooks,
    pub dirs: Vec<DirectiveBinding>,
}

impl VNode {
    pub fn has_patch_flag(&self, flag: PatchFlags) -> bool {
        self.patch_flag > 0
            && PatchFlags::from_bits_truncate(self.patch_flag).intersects(flag)
    }

    pub fn is_bail(&self) -> bool {
        self.patch_flag == PATCH_FLAG_BAIL
    }

    pub fn shape(&self) -> ShapeFlags {
        self.shape.get()
    }

    pub fn text(&self) -> &str {
        self.children.as_text().unwrap_or("")
    }
}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VNode")
            .field("type", &self.node_type)
            .field("key", &self.key)
            .field("patch_flag", &self.patch_flag)
            .finish()
    }
}

/// Nodes reconcile in place only when both type and key match.
pub fn same_vnode_type(a: &VNode, b: &VNode) -> bool {
    a.node_type == b.node_type && a.key == b.key
}

// =============================================================================
// Builder
// =============================================================================

pub struct VNodeBuilder {
    node_type: NodeType,
    key: Option<Key>,
    props: PropMap,
    children: Children,
    patch_flag: i32,
    dynamic_props: Option<Vec<Rc<str>>>,
    hooks: VNodeHooks,
    dirs: Vec<DirectiveBinding>,
}

impl VNodeBuilder {
    fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            key: None,
            props: PropMap::new(),
            children: Children::None,
            patch_flag: 0,
            dynamic_props: None,
            hooks: VNodeHooks::default(),
            dirs: Vec::new(),
        }
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn prop(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.props.set(key, value);
        self
    }

    pub fn props(mut self, props: PropMap) -> Self {
        self.props = props;
        self
    }

    pub fn children(mut self, children: impl Into<Children>) -> Self {
        self.children = children.into();
        self
    }

    pub fn patch_flag(mut self, flag: PatchFlags) -> Self {
        if self.patch_flag >= 0 {
            self.patch_flag |= flag.bits();
        }
        self
    }

    /// Set one of the negative sentinel flags (CACHED / BAIL).
    pub fn patch_flag_raw(mut self, flag: i32) -> Self {
        self.patch_flag = flag;
        self
    }

    pub fn dynamic_props(mut self, keys: &[&str]) -> Self {
        self.dynamic_props = Some(keys.iter().map(|k| Rc::from(*k)).collect());
        self
    }

    pub fn hooks(mut self, hooks: VNodeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn directive(mut self, binding: DirectiveBinding) -> Self {
        self.dirs.push(binding);
        self
    }

    fn into_vnode(self) -> Rc<VNode> {
        let mut shape = match &self.node_type {
            NodeType::Element(_) => ShapeFlags::ELEMENT,
            NodeType::Component(def) => {
                let mut s = if def.functional {
                    ShapeFlags::FUNCTIONAL_COMPONENT
                } else {
                    ShapeFlags::STATEFUL_COMPONENT
                };
                match def.builtin_kind() {
                    Some(BuiltinKind::Teleport) => s |= ShapeFlags::TELEPORT,
                    Some(BuiltinKind::Suspense) => s |= ShapeFlags::SUSPENSE,
                    None => {}
                }
                s
            }
            _ => ShapeFlags::empty(),
        };
        match &self.children {
            Children::None => {}
            Children::Text(_) => shape |= ShapeFlags::TEXT_CHILDREN,
            Children::Nodes(_) => {
                // A component's children are its slot content.
                if shape.intersects(ShapeFlags::COMPONENT) {
                    shape |= ShapeFlags::SLOT_CHILDREN;
                } else {
                    shape |= ShapeFlags::ARRAY_CHILDREN;
                }
            }
        }
        Rc::new(VNode {
            node_type: self.node_type,
            key: self.key,
            props: self.props,
            children: self.children,
            shape: Cell::new(shape),
            patch_flag: self.patch_flag,
            dynamic_props: self.dynamic_props,
            dynamic_children: RefCell::new(None),
            el: Cell::new(None),
            anchor: Cell::new(None),
            component: RefCell::new(None),
            hooks: self.hooks,
            dirs: self.dirs,
        })
    }

    /// Finish the node, registering it with the enclosing block when it
    /// advertises dynamic content.
    pub fn build(self) -> Rc<VNode> {
        let node = self.into_vnode();
        if node.patch_flag > 0
            || node.shape().intersects(ShapeFlags::COMPONENT)
        {
            track_in_block(&node);
        }
        node
    }

    /// Finish the node as a block root: it adopts the dynamic children
    /// collected since the matching [`open_block`], and registers itself
    /// with the parent block unconditionally.
    pub fn build_block(self) -> Rc<VNode> {
        let node = self.into_vnode();
        *node.dynamic_children.borrow_mut() = close_block();
        track_in_block(&node);
        node
    }
}

// =============================================================================
// Constructors
// =============================================================================

pub fn element(tag: &str) -> VNodeBuilder {
    VNodeBuilder::new(NodeType::Element(Rc::from(tag)))
}

pub fn fragment() -> VNodeBuilder {
    VNodeBuilder::new(NodeType::Fragment)
}

pub fn component(def: Rc<Component>) -> VNodeBuilder {
    VNodeBuilder::new(NodeType::Component(def))
}

pub fn text(content: &str) -> Rc<VNode> {
    VNodeBuilder::new(NodeType::Text)
        .children(content)
        .into_vnode()
}

pub fn comment(content: &str) -> Rc<VNode> {
    VNodeBuilder::new(NodeType::Comment)
        .children(content)
        .into_vnode()
}

/// Pre-rendered host content, emitted verbatim on mount.
pub fn static_content(content: &str) -> Rc<VNode> {
    VNodeBuilder::new(NodeType::Static)
        .children(content)
        .into_vnode()
}

// =============================================================================
// Block Tree
// =============================================================================

thread_local! {
    static BLOCK_STACK: RefCell<Vec<Vec<Rc<VNode>>>> = const { RefCell::new(Vec::new()) };
}

/// Start collecting dynamic descendants for the next block root.
pub fn open_block() {
    BLOCK_STACK.with(|stack| stack.borrow_mut().push(Vec::new()));
}

fn close_block() -> Option<Vec<Rc<VNode>>> {
    BLOCK_STACK.with(|stack| stack.borrow_mut().pop())
}

fn track_in_block(node: &Rc<VNode>) {
    if node.patch_flag == PATCH_FLAG_CACHED {
        return;
    }
    BLOCK_STACK.with(|stack| {
        if let Some(top) = stack.borrow_mut().last_mut() {
            top.push(node.clone());
        }
    });
}
