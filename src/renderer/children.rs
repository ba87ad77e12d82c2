//! Child diff - text/array transitions, unkeyed min-diff, and the keyed
//! diff with LIS-minimized moves.
//!
//! The keyed algorithm: trim matching heads and tails, handle the pure
//! mount and pure unmount leftovers, then resolve the true middle with a
//! key-to-new-index map, patching matches in place while recording where
//! each new position came from. If anything moved out of increasing
//! order, the longest increasing subsequence of that mapping names the
//! nodes that may stay put; everything else mounts or moves, walking
//! backwards so each placed node anchors its predecessor.

use std::collections::HashMap;
use std::rc::Rc;

use crate::tree::node::{same_vnode_type, Children, Key, PatchFlags, VNode};

use super::component::ComponentInstance;
use super::host::{HostNode, Namespace};
use super::Renderer;

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn patch_children(
        &self,
        n1: &Rc<VNode>,
        n2: &Rc<VNode>,
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        // Compiler-shaped fragments name their children discipline.
        if n2.has_patch_flag(PatchFlags::KEYED_FRAGMENT) {
            if let (Children::Nodes(old), Children::Nodes(new)) = (&n1.children, &n2.children) {
                self.patch_keyed_children(old, new, container, anchor, parent, ns, optimized);
                return;
            }
        }
        if n2.has_patch_flag(PatchFlags::UNKEYED_FRAGMENT) {
            if let (Children::Nodes(old), Children::Nodes(new)) = (&n1.children, &n2.children) {
                self.patch_unkeyed_children(old, new, container, anchor, parent, ns, optimized);
                return;
            }
        }

        match (&n1.children, &n2.children) {
            (old, Children::Text(text)) => {
                if let Children::Nodes(old_children) = old {
                    self.unmount_children(old_children, parent, true);
                }
                if old.as_text() != Some(text.as_ref()) {
                    self.host.set_element_text(container, text);
                }
            }
            (Children::Nodes(old_children), Children::Nodes(new_children)) => {
                self.patch_keyed_children(
                    old_children,
                    new_children,
                    container,
                    anchor,
                    parent,
                    ns,
                    optimized,
                );
            }
            (Children::Text(_), Children::Nodes(new_children)) => {
                self.host.set_element_text(container, "");
                self.mount_children(new_children, container, anchor, parent, ns, optimized);
            }
            (Children::None, Children::Nodes(new_children)) => {
                self.mount_children(new_children, container, anchor, parent, ns, optimized);
            }
            (Children::Nodes(old_children), Children::None) => {
                self.unmount_children(old_children, parent, true);
            }
            (Children::Text(_), Children::None) => {
                self.host.set_element_text(container, "");
            }
            (Children::None, Children::None) => {}
        }
    }

    /// Position-by-position patch of the common prefix, then mount or
    /// unmount the tail.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn patch_unkeyed_children(
        &self,
        old_children: &[Rc<VNode>],
        new_children: &[Rc<VNode>],
        container: HostNode,
        anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        let common = old_children.len().min(new_children.len());
        for i in 0..common {
            self.patch(
                Some(old_children[i].clone()),
                &new_children[i],
                container,
                None,
                parent,
                ns,
                optimized,
            );
        }
        if old_children.len() > common {
            self.unmount_children(&old_children[common..], parent, true);
        } else if new_children.len() > common {
            self.mount_children(
                &new_children[common..],
                container,
                anchor,
                parent,
                ns,
                optimized,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn patch_keyed_children(
        &self,
        old_children: &[Rc<VNode>],
        new_children: &[Rc<VNode>],
        container: HostNode,
        parent_anchor: Option<HostNode>,
        parent: Option<&Rc<ComponentInstance>>,
        ns: Namespace,
        optimized: bool,
    ) {
        let mut i: usize = 0;
        let mut e1: isize = old_children.len() as isize - 1;
        let mut e2: isize = new_children.len() as isize - 1;

        // 1. Matching head: patch in place.
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let o = &old_children[i];
            let n = &new_children[i];
            if !same_vnode_type(o, n) {
                break;
            }
            self.patch(Some(o.clone()), n, container, None, parent, ns, optimized);
            i += 1;
        }

        // 2. Matching tail: patch in place.
        while (i as isize) <= e1 && (i as isize) <= e2 {
            let o = &old_children[e1 as usize];
            let n = &new_children[e2 as usize];
            if !same_vnode_type(o, n) {
                break;
            }
            self.patch(Some(o.clone()), n, container, None, parent, ns, optimized);
            e1 -= 1;
            e2 -= 1;
        }

        // 3. Only new nodes remain: mount in front of the successor.
        if (i as isize) > e1 {
            if (i as isize) <= e2 {
                let next_pos = (e2 + 1) as usize;
                let insert_anchor = if next_pos < new_children.len() {
                    new_children[next_pos].el.get()
                } else {
                    parent_anchor
                };
                for j in i..=(e2 as usize) {
                    self.patch(
                        None,
                        &new_children[j],
                        container,
                        insert_anchor,
                        parent,
                        ns,
                        optimized,
                    );
                }
            }
            return;
        }

        // 4. Only old nodes remain: unmount.
        if (i as isize) > e2 {
            for j in i..=(e1 as usize) {
                self.unmount(&old_children[j], parent, true);
            }
            return;
        }

        // 5. True middle.
        let s1 = i;
        let s2 = i;

        // 5a. key -> new index. First mapping wins on duplicates.
        let mut key_to_new_index: HashMap<Key, usize> = HashMap::new();
        for (j, node) in new_children
            .iter()
            .enumerate()
            .take(e2 as usize + 1)
            .skip(s2)
        {
            if let Some(key) = &node.key {
                if key_to_new_index.contains_key(key) {
                    log::warn!("duplicate key {key:?} in keyed children; using the first");
                } else {
                    key_to_new_index.insert(key.clone(), j);
                }
            }
        }

        // 5b. Walk the old middle: patch matches in place, recording
        // old positions per new index; unmount the unmatched.
        let to_be_patched = e2 as usize - s2 + 1;
        let mut patched = 0usize;
        // 0 means "no old counterpart: mount"; otherwise old index + 1.
        let mut new_index_to_old_index = vec![0usize; to_be_patched];
        let mut moved = false;
        let mut max_new_index_so_far = 0usize;

        for j in s1..=(e1 as usize) {
            let prev_child = &old_children[j];
            if patched >= to_be_patched {
                self.unmount(prev_child, parent, true);
                continue;
            }
            let new_index = match &prev_child.key {
                Some(key) => key_to_new_index.get(key).copied(),
                None => {
                    // Unkeyed inside a keyed list: first unmatched node of
                    // the same type.
                    (s2..=(e2 as usize)).find(|&idx| {
                        new_index_to_old_index[idx - s2] == 0
                            && same_vnode_type(prev_child, &new_children[idx])
                    })
                }
            };
            match new_index {
                None => self.unmount(prev_child, parent, true),
                Some(new_index) => {
                    new_index_to_old_index[new_index - s2] = j + 1;
                    if new_index >= max_new_index_so_far {
                        max_new_index_so_far = new_index;
                    } else {
                        moved = true;
                    }
                    self.patch(
                        Some(prev_child.clone()),
                        &new_children[new_index],
                        container,
                        None,
                        parent,
                        ns,
                        optimized,
                    );
                    patched += 1;
                }
            }
        }

        // 5c. Mount the new, move the out-of-sequence, backwards so each
        // placed node anchors the one before it.
        let increasing = if moved {
            longest_increasing_subsequence(&new_index_to_old_index)
        } else {
            Vec::new()
        };
        let mut seq_cursor: isize = increasing.len() as isize - 1;
        for offset in (0..to_be_patched).rev() {
            let new_index = s2 + offset;
            let next_pos = new_index + 1;
            let insert_anchor = if next_pos < new_children.len() {
                new_children[next_pos].el.get()
            } else {
                parent_anchor
            };
            if new_index_to_old_index[offset] == 0 {
                self.patch(
                    None,
                    &new_children[new_index],
                    container,
                    insert_anchor,
                    parent,
                    ns,
                    optimized,
                );
            } else if moved {
                if seq_cursor < 0 || offset != increasing[seq_cursor as usize] {
                    self.move_vnode(&new_children[new_index], container, insert_anchor);
                } else {
                    seq_cursor -= 1;
                }
            }
        }
    }
}

/// Indices of one longest strictly increasing subsequence of `arr`,
/// skipping zeros (which encode "mount, never moves"). Patience-sort
/// variant with predecessor reconstruction, O(n log n).
pub(crate) fn longest_increasing_subsequence(arr: &[usize]) -> Vec<usize> {
    let mut predecessors: Vec<usize> = (0..arr.len()).collect();
    let mut result: Vec<usize> = Vec::new();

    for (index, &value) in arr.iter().enumerate() {
        if value == 0 {
            continue;
        }
        let Some(&last) = result.last() else {
            result.push(index);
            continue;
        };
        if arr[last] < value {
            predecessors[index] = last;
            result.push(index);
            continue;
        }
        // Binary search for the first tail >= value.
        let (mut lo, mut hi) = (0usize, result.len() - 1);
        while lo < hi {
            let mid = (lo + hi) / 2;
            if arr[result[mid]] < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if value < arr[result[lo]] {
            if lo > 0 {
                predecessors[index] = result[lo - 1];
            }
            result[lo] = index;
        }
    }

    let Some(&last) = result.last() else {
        return result;
    };
    let mut cursor = last;
    for slot in result.iter_mut().rev() {
        *slot = cursor;
        cursor = predecessors[cursor];
    }
    result
}
