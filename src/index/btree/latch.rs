use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{MutexGuard, RawRwLock};

use crate::common::types::{Page, PageId};
use crate::storage::buffer::BufferPoolManager;

pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// One write-latched page held by a descending operation
pub struct LatchedPage {
    pub page_id: PageId,
    pub guard: PageWriteGuard,
    pub dirty: bool,
}

/// The ordered set of latches a mutating descent holds: the tree-level root
/// latch (until the root can no longer change under this operation) and the
/// write-latched path from the shallowest unsafe ancestor down to the
/// current node. Pages scheduled for deletion are collected here and dropped
/// only after every latch is released.
///
/// Latches are released top-down; every release pairs the fetch with its
/// unpin, error paths included (`Drop` covers early exits).
pub struct LatchStack<'a> {
    buffer_pool: &'a BufferPoolManager,
    root_guard: Option<MutexGuard<'a, ()>>,
    pages: Vec<LatchedPage>,
    deleted: Vec<PageId>,
}

impl<'a> LatchStack<'a> {
    pub fn new(buffer_pool: &'a BufferPoolManager, root_guard: MutexGuard<'a, ()>) -> Self {
        Self {
            buffer_pool,
            root_guard: Some(root_guard),
            pages: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.pages.push(LatchedPage {
            page_id,
            guard,
            dirty: false,
        });
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether the root latch is still held (the path still reaches the root)
    pub fn holds_root(&self) -> bool {
        self.root_guard.is_some()
    }

    pub fn entry(&self, index: usize) -> &LatchedPage {
        &self.pages[index]
    }

    pub fn entry_mut(&mut self, index: usize) -> &mut LatchedPage {
        &mut self.pages[index]
    }

    pub fn top_mut(&mut self) -> &mut LatchedPage {
        self.pages.last_mut().expect("latch stack is empty")
    }

    /// The current node is safe: ancestors can no longer be touched by this
    /// operation. Release them (and the root latch) in top-down order,
    /// keeping only the newest latch.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        let keep = match self.pages.pop() {
            Some(entry) => entry,
            None => return,
        };
        self.release_pages();
        self.pages.push(keep);
    }

    /// Release the newest latch and unpin its page
    pub fn pop_release(&mut self) {
        if let Some(LatchedPage {
            page_id,
            guard,
            dirty,
        }) = self.pages.pop()
        {
            drop(guard);
            let _ = self.buffer_pool.unpin_page(page_id, dirty);
        }
    }

    /// Schedule a page for deletion once all latches are gone
    pub fn defer_delete(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Release every latch in order, unpin every page, then delete the
    /// pages scheduled for deletion
    pub fn release_all(&mut self) {
        self.root_guard = None;
        self.release_pages();
        for page_id in std::mem::take(&mut self.deleted) {
            // Deletion is best-effort: a page re-pinned by a concurrent
            // operation simply stays allocated
            let _ = self.buffer_pool.delete_page(page_id);
        }
    }

    fn release_pages(&mut self) {
        for entry in self.pages.drain(..) {
            let LatchedPage {
                page_id,
                guard,
                dirty,
            } = entry;
            drop(guard);
            let _ = self.buffer_pool.unpin_page(page_id, dirty);
        }
    }
}

impl Drop for LatchStack<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}
