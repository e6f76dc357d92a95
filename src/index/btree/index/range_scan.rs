use std::sync::Arc;
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::storage::buffer::BufferPoolManager;
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use super::base::BPlusTree;

/// Forward scan over the leaf chain. Each advance fetches the next leaf
/// under a read latch before unpinning the previous one, so the iterator
/// always observes a consistent leaf; no cross-leaf snapshot is implied.
pub struct BPlusTreeIter<K> {
    buffer_pool: Arc<BufferPoolManager>,
    current: Option<(PageId, BTreeNode<K>)>,
    index: usize,
    end_key: Option<K>,
}

impl<K> BPlusTreeIter<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        start: Option<(PageId, BTreeNode<K>, usize)>,
        end_key: Option<K>,
    ) -> Self {
        match start {
            Some((page_id, node, index)) => Self {
                buffer_pool,
                current: Some((page_id, node)),
                index,
                end_key,
            },
            None => Self {
                buffer_pool,
                current: None,
                index: 0,
                end_key,
            },
        }
    }

    fn release_current(&mut self) {
        if let Some((page_id, _)) = self.current.take() {
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }

    /// Move to the next leaf in the sibling chain
    fn advance_leaf(&mut self) -> bool {
        let next_pid = match &self.current {
            Some((_, node)) => node.next_page_id,
            None => return false,
        };

        if next_pid == INVALID_PAGE_ID {
            self.release_current();
            return false;
        }

        let next_node = match self.fetch_leaf(next_pid) {
            Ok(node) => node,
            Err(e) => {
                warn!("range scan stopped early: {}", e);
                self.release_current();
                return false;
            }
        };

        self.release_current();
        self.current = Some((next_pid, next_node));
        self.index = 0;
        true
    }

    fn fetch_leaf(&self, page_id: PageId) -> Result<BTreeNode<K>, BTreeError> {
        let ptr = self.buffer_pool.fetch_page(page_id)?;
        let guard = ptr.read_arc();
        match deserialize_node(&guard) {
            Ok(node) => Ok(node),
            Err(e) => {
                drop(guard);
                let _ = self.buffer_pool.unpin_page(page_id, false);
                Err(e)
            }
        }
    }
}

impl<K> Iterator for BPlusTreeIter<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (_, node) = self.current.as_ref()?;

            if self.index < node.keys.len() {
                let key = node.keys[self.index].clone();
                if let Some(end) = &self.end_key {
                    if &key > end {
                        self.release_current();
                        return None;
                    }
                }
                let value = node.values[self.index];
                self.index += 1;
                return Some((key, value));
            }

            if !self.advance_leaf() {
                return None;
            }
        }
    }
}

impl<K> Drop for BPlusTreeIter<K> {
    fn drop(&mut self) {
        if let Some((page_id, _)) = self.current.take() {
            let _ = self.buffer_pool.unpin_page(page_id, false);
        }
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Iterate every key in ascending order from the leftmost leaf
    pub fn iter(&self) -> Result<BPlusTreeIter<K>, BTreeError> {
        let start = self
            .find_leftmost_leaf()?
            .map(|(node, page_id)| (page_id, node, 0));
        Ok(BPlusTreeIter::new(self.buffer_pool.clone(), start, None))
    }

    /// Iterate keys >= `start_key` in ascending order
    pub fn iter_from(&self, start_key: &K) -> Result<BPlusTreeIter<K>, BTreeError> {
        let start = self.find_leaf_read(start_key)?.map(|(node, page_id)| {
            let index = match node.keys.binary_search(start_key) {
                Ok(i) => i,
                Err(i) => i,
            };
            (page_id, node, index)
        });
        Ok(BPlusTreeIter::new(self.buffer_pool.clone(), start, None))
    }

    /// All record ids with keys in `[start_key, end_key]`
    pub fn range_scan(&self, start_key: &K, end_key: &K) -> Result<Vec<Rid>, BTreeError> {
        if start_key > end_key {
            return Ok(Vec::new());
        }

        let start = self.find_leaf_read(start_key)?.map(|(node, page_id)| {
            let index = match node.keys.binary_search(start_key) {
                Ok(i) => i,
                Err(i) => i,
            };
            (page_id, node, index)
        });

        let iter = BPlusTreeIter::new(
            self.buffer_pool.clone(),
            start,
            Some(end_key.clone()),
        );
        Ok(iter.map(|(_, rid)| rid).collect())
    }
}
