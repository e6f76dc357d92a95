use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::storage::page::header::MAX_INDEX_NAME_LEN;
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::LatchStack;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{deserialize_node, serialize_node};

/// Concurrent B+ tree over buffer-pool pages: unique ordered keys mapped to
/// record ids, with sibling-linked leaves for range scans.
///
/// Readers descend with hand-over-hand read latches. Writers descend with
/// write latches and release all ancestors as soon as the newly latched
/// child cannot split or merge. Root identity changes are serialized by a
/// tree-level latch held from the start of a mutating descent until the
/// path below the root is known safe.
pub struct BPlusTree<K> {
    pub(crate) name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: AtomicI32,
    pub(crate) root_latch: Mutex<()>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or register) the index named `name`, reading its root from the
    /// header page. A new index starts empty with no root page.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf nodes need room to split");
        assert!(internal_max_size >= 3, "internal nodes need room to split");

        let name = name.into();
        if name.len() > MAX_INDEX_NAME_LEN {
            return Err(BTreeError::IndexNameTooLong(name));
        }

        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header.write();
            match HeaderPage::get_root_id(&page, &name) {
                Some(root) => root,
                None => {
                    HeaderPage::insert_record(&mut page, &name, INVALID_PAGE_ID);
                    INVALID_PAGE_ID
                }
            }
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;

        Ok(Self {
            name,
            buffer_pool,
            root_page_id: AtomicI32::new(root_page_id),
            root_latch: Mutex::new(()),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    /// Record a root change in memory and in the header page. Callers hold
    /// the root latch.
    pub(crate) fn set_root_page_id(&self, page_id: PageId) -> Result<(), BTreeError> {
        self.root_page_id.store(page_id, Ordering::SeqCst);
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            if !HeaderPage::update_record(&mut page, &self.name, page_id) {
                HeaderPage::insert_record(&mut page, &self.name, page_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Point lookup. Descends with hand-over-hand read latches: the parent
    /// latch is dropped only after the child is latched.
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let (leaf, leaf_pid) = match self.find_leaf_read(key)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let result = leaf.lookup(key);
        self.buffer_pool.unpin_page(leaf_pid, false)?;
        Ok(result)
    }

    /// Read-descend to the leaf covering `key`. Returns the deserialized
    /// leaf with its page still pinned (latch already released); the caller
    /// unpins.
    pub(crate) fn find_leaf_read(
        &self,
        key: &K,
    ) -> Result<Option<(BTreeNode<K>, PageId)>, BTreeError> {
        self.find_leaf_read_by(|node| node.child_for(key))
    }

    /// Read-descend always taking the leftmost child
    pub(crate) fn find_leftmost_leaf(&self) -> Result<Option<(BTreeNode<K>, PageId)>, BTreeError> {
        self.find_leaf_read_by(|node| node.children[0])
    }

    fn find_leaf_read_by(
        &self,
        pick_child: impl Fn(&BTreeNode<K>) -> PageId,
    ) -> Result<Option<(BTreeNode<K>, PageId)>, BTreeError> {
        // The root may move between reading its id and latching it; retry
        // until the two agree
        let (mut guard, mut page_id) = loop {
            let root = self.root_page_id();
            if root == INVALID_PAGE_ID {
                return Ok(None);
            }
            let ptr = self.buffer_pool.fetch_page(root)?;
            let guard = ptr.read_arc();
            if self.root_page_id() == root {
                break (guard, root);
            }
            drop(guard);
            self.buffer_pool.unpin_page(root, false)?;
        };

        loop {
            let node: BTreeNode<K> = match deserialize_node(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            if node.is_leaf() {
                drop(guard);
                return Ok(Some((node, page_id)));
            }

            let child_pid = pick_child(&node);
            let child_ptr = match self.buffer_pool.fetch_page(child_pid) {
                Ok(ptr) => ptr,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(page_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_ptr.read_arc();

            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;

            guard = child_guard;
            page_id = child_pid;
        }
    }

    /// Write-descend to the leaf covering `key`, latch-crabbing: each
    /// latched child that cannot split (insert) or underflow (delete)
    /// releases every ancestor latch. On return the stack holds the
    /// write-latched path from the shallowest unsafe ancestor to the leaf,
    /// and the leaf is deserialized at the top.
    pub(crate) fn find_leaf_write<'a>(
        &'a self,
        key: &K,
        for_insert: bool,
        stack: &mut LatchStack<'a>,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let mut page_id = self.root_page_id();
        debug_assert_ne!(page_id, INVALID_PAGE_ID);

        loop {
            let ptr = self.buffer_pool.fetch_page(page_id)?;
            let guard = ptr.write_arc();
            stack.push(page_id, guard);

            let node: BTreeNode<K> = deserialize_node(&stack.top_mut().guard)?;
            let safe = if for_insert {
                node.is_insert_safe()
            } else {
                node.is_delete_safe()
            };
            if safe {
                stack.release_ancestors();
            }

            if node.is_leaf() {
                return Ok(node);
            }
            page_id = node.child_for(key);
        }
    }

    /// Rewrite a node into the latched page at `index` on the stack and
    /// mark it dirty
    pub(crate) fn write_back(
        &self,
        stack: &mut LatchStack<'_>,
        index: usize,
        node: &BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let entry = stack.entry_mut(index);
        serialize_node(node, &mut entry.guard)?;
        entry.dirty = true;
        Ok(())
    }

    /// Walk the whole tree asserting its structural invariants: size
    /// bounds on non-root nodes, sorted keys, child/parent pointer
    /// agreement, and an ordered, acyclic leaf chain. Test and diagnostics
    /// helper; assumes no concurrent writers.
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_pid = self.root_page_id();
        if root_pid == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaves_in_order = Vec::new();
        self.verify_subtree(root_pid, INVALID_PAGE_ID, true, &mut leaves_in_order)?;

        // The sibling chain must enumerate exactly the leaves found by the
        // in-order walk
        let mut chained = Vec::new();
        let mut cursor = leaves_in_order.first().copied();
        while let Some(page_id) = cursor {
            assert!(
                !chained.contains(&page_id),
                "cycle in leaf chain at page {}",
                page_id
            );
            chained.push(page_id);
            let ptr = self.buffer_pool.fetch_page(page_id)?;
            let guard = ptr.read_arc();
            let node: BTreeNode<K> = deserialize_node(&guard)?;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false)?;
            cursor = if node.next_page_id == INVALID_PAGE_ID {
                None
            } else {
                Some(node.next_page_id)
            };
        }
        assert_eq!(chained, leaves_in_order, "leaf chain disagrees with tree order");
        Ok(())
    }

    fn verify_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        is_root: bool,
        leaves: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        let ptr = self.buffer_pool.fetch_page(page_id)?;
        let guard = ptr.read_arc();
        let node: BTreeNode<K> = deserialize_node(&guard)?;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, false)?;

        assert_eq!(node.page_id, page_id);
        assert_eq!(
            node.parent_page_id, expected_parent,
            "page {} has a dangling parent pointer",
            page_id
        );
        assert!(
            node.keys.windows(2).all(|w| w[0] < w[1]),
            "page {} keys out of order",
            page_id
        );
        if !is_root {
            // The structural floor is ceil(max/2); the repair threshold in
            // min_size() sits one above it for internal nodes
            let structural_min = (node.max_size + 1) / 2;
            assert!(
                node.size() >= structural_min && node.size() <= node.max_size,
                "page {} size {} outside [{}, {}]",
                page_id,
                node.size(),
                structural_min,
                node.max_size
            );
        }

        if node.is_leaf() {
            leaves.push(page_id);
        } else {
            assert_eq!(node.children.len(), node.keys.len() + 1);
            for &child in &node.children {
                self.verify_subtree(child, page_id, false, leaves)?;
            }
        }
        Ok(())
    }

    /// Number of keys in the tree (full scan; test and diagnostics helper)
    pub fn len(&self) -> Result<usize, BTreeError> {
        let mut count = 0;
        let mut cursor = self.find_leftmost_leaf()?;
        while let Some((node, page_id)) = cursor {
            count += node.keys.len();
            let next = node.next_page_id;
            self.buffer_pool.unpin_page(page_id, false)?;
            cursor = if next == INVALID_PAGE_ID {
                None
            } else {
                let ptr = self.buffer_pool.fetch_page(next)?;
                let guard = ptr.read_arc();
                let node: BTreeNode<K> = match deserialize_node(&guard) {
                    Ok(node) => node,
                    Err(e) => {
                        drop(guard);
                        let _ = self.buffer_pool.unpin_page(next, false);
                        return Err(e);
                    }
                };
                drop(guard);
                Some((node, next))
            };
        }
        Ok(count)
    }
}
