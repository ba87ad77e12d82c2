//! Virtual tree - node records, flags, and construction helpers.

pub mod node;
pub mod props;

pub use node::{
    comment, component, element, fragment, open_block, same_vnode_type, static_content, text,
    Children, Directive, DirectiveBinding, DirectiveHook, Key, NodeType, PatchFlags, ShapeFlags,
    VNode, VNodeBuilder, VNodeHook, VNodeHooks, PATCH_FLAG_BAIL, PATCH_FLAG_CACHED,
};
pub use props::{is_reserved_prop, props, PropMap};
