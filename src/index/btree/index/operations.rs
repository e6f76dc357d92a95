use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::LatchStack;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, patch_parent_pointer, serialize_node};
use super::base::BPlusTree;

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a key. Returns false (and changes nothing) if the key exists.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let root_guard = self.root_latch.lock();
        let mut stack = LatchStack::new(&self.buffer_pool, root_guard);

        if self.is_empty() {
            self.start_new_tree(key, rid)?;
            return Ok(true);
        }

        let mut leaf = self.find_leaf_write(&key, true, &mut stack)?;

        if leaf.lookup(&key).is_some() {
            stack.release_all();
            return Ok(false);
        }

        leaf.leaf_insert(key, rid);
        if !leaf.is_overflowing() {
            let top = stack.len() - 1;
            self.write_back(&mut stack, top, &leaf)?;
            stack.release_all();
            return Ok(true);
        }

        // Leaf overflow: move the upper half to a fresh right sibling and
        // push its first key into the parent
        let (new_ptr, new_pid) = self.buffer_pool.new_page()?;
        let (right, separator) = leaf.split_leaf(new_pid);
        let written = {
            let mut page = new_ptr.write();
            serialize_node(&right, &mut page)
        };
        self.buffer_pool.unpin_page(new_pid, true)?;
        written?;

        let top = stack.len() - 1;
        self.write_back(&mut stack, top, &leaf)?;

        self.insert_into_parent(&mut stack, separator, new_pid)?;
        Ok(true)
    }

    /// First insert: a single leaf becomes the root
    fn start_new_tree(&self, key: K, rid: Rid) -> Result<(), BTreeError> {
        let (root_ptr, root_pid) = self.buffer_pool.new_page()?;
        let mut root: BTreeNode<K> = BTreeNode::new_leaf(root_pid, self.leaf_max_size);
        root.leaf_insert(key, rid);
        let written = {
            let mut page = root_ptr.write();
            serialize_node(&root, &mut page)
        };
        self.buffer_pool.unpin_page(root_pid, true)?;
        written?;
        self.set_root_page_id(root_pid)?;
        Ok(())
    }

    /// Propagate a split up the latched path. On entry the stack's top holds
    /// the just-split left node (already written back); `separator` and
    /// `right_pid` describe the new right sibling.
    fn insert_into_parent(
        &self,
        stack: &mut LatchStack<'_>,
        mut separator: K,
        mut right_pid: PageId,
    ) -> Result<(), BTreeError> {
        loop {
            let left_pid = {
                let top = stack.len() - 1;
                stack.entry(top).page_id
            };

            if stack.len() == 1 {
                // The root itself split; grow the tree by one level. The
                // root latch is still held, so nobody else can observe the
                // transition.
                debug_assert!(stack.holds_root());
                let (root_ptr, root_pid) = self.buffer_pool.new_page()?;
                let mut new_root: BTreeNode<K> =
                    BTreeNode::new_internal(root_pid, self.internal_max_size);
                new_root.keys.push(separator);
                new_root.children.push(left_pid);
                new_root.children.push(right_pid);
                let written = {
                    let mut page = root_ptr.write();
                    serialize_node(&new_root, &mut page)
                };
                self.buffer_pool.unpin_page(root_pid, true)?;
                written?;

                {
                    let entry = stack.entry_mut(0);
                    patch_parent_pointer(&mut entry.guard, root_pid);
                    entry.dirty = true;
                }
                self.patch_parent_of(right_pid, root_pid)?;

                self.set_root_page_id(root_pid)?;
                stack.release_all();
                return Ok(());
            }

            // The level below is finished; its latch can go before we touch
            // the parent
            stack.pop_release();

            let parent_idx = stack.len() - 1;
            let mut parent: BTreeNode<K> = deserialize_node(&stack.entry(parent_idx).guard)?;

            parent.internal_insert_after(left_pid, separator, right_pid);

            if !parent.is_overflowing() {
                self.write_back(stack, parent_idx, &parent)?;
                stack.release_all();
                return Ok(());
            }

            // Parent overflow: split it the same way and keep climbing
            let (new_ptr, new_pid) = self.buffer_pool.new_page()?;
            let (right_node, promoted) = parent.split_internal(new_pid);
            self.write_back(stack, parent_idx, &parent)?;
            let written = {
                let mut page = new_ptr.write();
                serialize_node(&right_node, &mut page)
            };
            self.buffer_pool.unpin_page(new_pid, true)?;
            written?;

            // Children that moved to the new sibling must point back at it
            for &child in &right_node.children {
                self.patch_parent_of(child, new_pid)?;
            }

            separator = promoted;
            right_pid = new_pid;
        }
    }

    /// Rewrite one page's parent pointer. The page is below a write-latched
    /// ancestor and outside this operation's latch set, so a short write
    /// latch here cannot deadlock.
    pub(crate) fn patch_parent_of(
        &self,
        page_id: PageId,
        parent_pid: PageId,
    ) -> Result<(), BTreeError> {
        debug_assert_ne!(page_id, INVALID_PAGE_ID);
        let ptr = self.buffer_pool.fetch_page(page_id)?;
        {
            let mut page = ptr.write();
            patch_parent_pointer(&mut page, parent_pid);
        }
        self.buffer_pool.unpin_page(page_id, true)?;
        Ok(())
    }
}
