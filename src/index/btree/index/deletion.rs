use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchStack, PageWriteGuard};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};
use super::base::BPlusTree;

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Remove a key. Returns false if it was not present.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let root_guard = self.root_latch.lock();
        let mut stack = LatchStack::new(&self.buffer_pool, root_guard);

        if self.is_empty() {
            return Ok(false);
        }

        let mut leaf = self.find_leaf_write(key, false, &mut stack)?;

        if !leaf.leaf_remove(key) {
            stack.release_all();
            return Ok(false);
        }

        let top = stack.len() - 1;
        self.write_back(&mut stack, top, &leaf)?;

        if leaf.is_root() {
            // A root leaf may become empty but never merges. Emptying it
            // implies it was unsafe during descent, so the root latch is
            // still held.
            if leaf.keys.is_empty() {
                self.adjust_root(&mut stack, &leaf)?;
            }
        } else if leaf.is_underflowing() {
            self.handle_underflow(&mut stack, leaf)?;
        }

        stack.release_all();
        Ok(true)
    }

    /// Shrink the tree at the root: an empty leaf root empties the tree, an
    /// internal root left with a single child hands the root to that child.
    /// Caller holds the root latch.
    fn adjust_root(
        &self,
        stack: &mut LatchStack<'_>,
        root: &BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        debug_assert!(stack.holds_root());

        if root.is_leaf() {
            if root.keys.is_empty() {
                stack.defer_delete(root.page_id);
                self.set_root_page_id(INVALID_PAGE_ID)?;
            }
            return Ok(());
        }

        if root.children.len() == 1 {
            let child_pid = root.children[0];
            self.patch_parent_of(child_pid, INVALID_PAGE_ID)?;
            stack.defer_delete(root.page_id);
            self.set_root_page_id(child_pid)?;
        }
        Ok(())
    }

    /// Walk underflow repairs up the latched path. On entry the stack's top
    /// holds `node`, underflowing and not the root, with its parent latched
    /// just below.
    fn handle_underflow(
        &self,
        stack: &mut LatchStack<'_>,
        mut node: BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        loop {
            debug_assert!(stack.len() >= 2, "underflowing non-root must have latched parent");
            let parent_idx = stack.len() - 2;
            let mut parent: BTreeNode<K> = deserialize_node(&stack.entry(parent_idx).guard)?;

            let child_pos = parent
                .child_position(node.page_id)
                .expect("node missing from its parent");

            // Prefer the left sibling; only the leftmost child borrows from
            // the right
            let (sibling_pos, sibling_is_left) = if child_pos == 0 {
                (1, false)
            } else {
                (child_pos - 1, true)
            };
            let sibling_pid = parent.children[sibling_pos];

            let sibling_ptr = self.buffer_pool.fetch_page(sibling_pid)?;
            let mut sibling_guard = sibling_ptr.write_arc();
            let mut sibling: BTreeNode<K> = match deserialize_node(&sibling_guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(sibling_guard);
                    let _ = self.buffer_pool.unpin_page(sibling_pid, false);
                    return Err(e);
                }
            };

            let combined = sibling.size() + node.size();
            let fits_in_one = combined <= node.max_size;

            if !fits_in_one {
                // Borrow a single entry through the parent and stop
                self.redistribute(
                    stack,
                    &mut parent,
                    parent_idx,
                    &mut node,
                    &mut sibling,
                    &mut sibling_guard,
                    child_pos,
                    sibling_is_left,
                )?;
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_pid, true)?;
                return Ok(());
            }

            // Merge the right node into the left and drop the separator
            let removed_pos = if sibling_is_left { child_pos } else { 1 };
            if sibling_is_left {
                // node is the right half; it disappears
                self.merge_into(&mut sibling, node, &parent, removed_pos)?;
                serialize_node(&sibling, &mut sibling_guard)?;
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_pid, true)?;

                stack.defer_delete(stack.entry(stack.len() - 1).page_id);
            } else {
                // sibling is the right half; it disappears
                self.merge_into(&mut node, sibling, &parent, removed_pos)?;
                let top = stack.len() - 1;
                self.write_back(stack, top, &node)?;
                drop(sibling_guard);
                self.buffer_pool.unpin_page(sibling_pid, false)?;
                stack.defer_delete(sibling_pid);
            }

            parent.keys.remove(removed_pos - 1);
            parent.children.remove(removed_pos);
            self.write_back(stack, parent_idx, &parent)?;

            // The merged level is settled; release it and look at the parent
            stack.pop_release();

            if stack.len() == 1 {
                self.adjust_root(stack, &parent)?;
                return Ok(());
            }
            if !parent.is_underflowing() {
                return Ok(());
            }
            node = parent;
        }
    }

    /// Move every entry of `right` into `left`, pulling the separator key
    /// down for internal nodes and repairing the leaf chain and child
    /// parent pointers
    fn merge_into(
        &self,
        left: &mut BTreeNode<K>,
        right: BTreeNode<K>,
        parent: &BTreeNode<K>,
        removed_pos: usize,
    ) -> Result<(), BTreeError> {
        if left.is_leaf() {
            left.keys.extend(right.keys);
            left.values.extend(right.values);
            left.next_page_id = right.next_page_id;
        } else {
            left.keys.push(parent.keys[removed_pos - 1].clone());
            left.keys.extend(right.keys);
            for &child in &right.children {
                self.patch_parent_of(child, left.page_id)?;
            }
            left.children.extend(right.children);
        }
        Ok(())
    }

    /// Shift one entry from the sibling into `node`, rewriting the parent's
    /// separator
    #[allow(clippy::too_many_arguments)]
    fn redistribute(
        &self,
        stack: &mut LatchStack<'_>,
        parent: &mut BTreeNode<K>,
        parent_idx: usize,
        node: &mut BTreeNode<K>,
        sibling: &mut BTreeNode<K>,
        sibling_guard: &mut PageWriteGuard,
        child_pos: usize,
        sibling_is_left: bool,
    ) -> Result<(), BTreeError> {
        if sibling_is_left {
            // Separator between sibling and node
            let sep_idx = child_pos - 1;
            if node.is_leaf() {
                let key = sibling.keys.pop().expect("sibling ran out of keys");
                let value = sibling.values.pop().expect("sibling ran out of values");
                node.keys.insert(0, key.clone());
                node.values.insert(0, value);
                parent.keys[sep_idx] = key;
            } else {
                let moved_child = sibling.children.pop().expect("sibling ran out of children");
                node.children.insert(0, moved_child);
                node.keys.insert(0, parent.keys[sep_idx].clone());
                parent.keys[sep_idx] = sibling.keys.pop().expect("sibling ran out of keys");
                self.patch_parent_of(moved_child, node.page_id)?;
            }
        } else {
            // Separator between node and sibling
            let sep_idx = child_pos;
            if node.is_leaf() {
                let key = sibling.keys.remove(0);
                let value = sibling.values.remove(0);
                node.keys.push(key);
                node.values.push(value);
                parent.keys[sep_idx] = sibling.keys[0].clone();
            } else {
                let moved_child = sibling.children.remove(0);
                node.children.push(moved_child);
                node.keys.push(parent.keys[sep_idx].clone());
                parent.keys[sep_idx] = sibling.keys.remove(0);
                self.patch_parent_of(moved_child, node.page_id)?;
            }
        }

        let top = stack.len() - 1;
        self.write_back(stack, top, node)?;
        serialize_node(sibling, &mut *sibling_guard)?;
        self.write_back(stack, parent_idx, parent)?;
        Ok(())
    }
}
