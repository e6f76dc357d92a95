use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Page, PageId, PagePtr, FrameId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::{Replacer, ReplacerPolicy};

/// Buffer pool construction parameters
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    pub pool_size: usize,
    pub replacer: ReplacerPolicy,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 64,
            replacer: ReplacerPolicy::Lru,
        }
    }
}

/// Per-frame bookkeeping, guarded by the pool latch
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn new() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// Everything the pool latch protects: the page table, the free list, the
/// replacer handle, frame metadata and the page-id allocator. Page payloads
/// are latched separately through their own RwLock.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: Box<dyn Replacer>,
    meta: Vec<FrameMeta>,
    next_page_id: PageId,
}

/// Fixed-size page cache over the disk manager. One latch serializes all
/// mapping and pin-count changes; readers and writers of page payloads
/// synchronize on the per-frame RwLock instead.
pub struct BufferPoolManager {
    pool_size: usize,
    num_instances: u32,
    frames: Vec<PagePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(
            BufferPoolConfig {
                pool_size,
                ..Default::default()
            },
            disk_manager,
            1,
            0,
        ))
    }

    pub fn with_config(
        config: BufferPoolConfig,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(config, disk_manager, 1, 0))
    }

    /// Build one instance of a (possibly sharded) pool. Page IDs handed out
    /// by this instance are congruent to `instance_index` mod `num_instances`.
    pub fn with_disk_manager(
        config: BufferPoolConfig,
        disk_manager: Arc<DiskManager>,
        num_instances: u32,
        instance_index: u32,
    ) -> Self {
        assert!(num_instances > 0);
        assert!(instance_index < num_instances);

        let pool_size = config.pool_size;
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        let mut meta = Vec::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            free_list.push_back(frame_id);
            meta.push(FrameMeta::new());
        }

        // Page 0 is the header page and is never handed out by new_page;
        // resume allocation past whatever already exists on disk
        let stride = num_instances as PageId;
        let existing = disk_manager.page_count();
        let mut next_page_id = instance_index as PageId;
        if next_page_id == HEADER_PAGE_ID {
            next_page_id += stride;
        }
        while next_page_id < existing {
            next_page_id += stride;
        }

        Self {
            pool_size,
            num_instances,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: config.replacer.build(pool_size),
                meta,
                next_page_id,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, reading it from disk if not resident. The returned page
    /// is pinned; every success must be paired with exactly one `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.meta[frame_id].pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.find_victim(&mut state)?;

        let mut page = self.frames[frame_id].write();
        if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
            page.reset();
            drop(page);
            state.free_list.push_back(frame_id);
            return Err(e.into());
        }
        drop(page);

        state.meta[frame_id].page_id = page_id;
        state.meta[frame_id].pin_count = 1;
        state.meta[frame_id].is_dirty = false;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok(self.frames[frame_id].clone())
    }

    /// Allocate a fresh page in a zeroed frame, pinned with count 1
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = self.find_victim(&mut state)?;

        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;

        let mut page = self.frames[frame_id].write();
        page.reset();
        page.page_id = page_id;
        drop(page);

        state.meta[frame_id].page_id = page_id;
        state.meta[frame_id].pin_count = 1;
        state.meta[frame_id].is_dirty = true;
        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Drop one pin, OR-ing in the caller's dirty flag. The frame becomes an
    /// eviction candidate when its pin count reaches zero; flushing is
    /// deferred to eviction time.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        if state.meta[frame_id].pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        state.meta[frame_id].pin_count -= 1;
        state.meta[frame_id].is_dirty |= is_dirty;

        if state.meta[frame_id].pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page to disk unconditionally and clear its dirty bit
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let page = self.frames[frame_id].read();
        self.disk_manager.write_page(page_id, &page.data)?;
        drop(page);

        state.meta[frame_id].is_dirty = false;
        Ok(())
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();

        for (page_id, frame_id) in resident {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
            drop(page);
            state.meta[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Drop a page from the pool and deallocate it. Fails while pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            if state.meta[frame_id].pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }

            state.page_table.remove(&page_id);
            state.replacer.pin(frame_id);
            state.meta[frame_id] = FrameMeta::new();
            self.frames[frame_id].write().reset();
            state.free_list.push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Number of frames that could be handed out right now
    pub fn free_frame_count(&self) -> usize {
        let state = self.state.lock();
        state.free_list.len() + state.replacer.size()
    }

    /// Claim a frame: free list first, then a replacer victim (flushing the
    /// evicted page if dirty). Caller still holds the pool latch.
    fn find_victim(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = match state.replacer.victim() {
            Some(id) => id,
            None => return Err(BufferPoolError::PoolExhausted),
        };

        let old_page_id = state.meta[frame_id].page_id;
        debug_assert_eq!(state.meta[frame_id].pin_count, 0, "evicting a pinned frame");

        if state.meta[frame_id].is_dirty {
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
            let page = self.frames[frame_id].read();
            if let Err(e) = self.disk_manager.write_page(old_page_id, &page.data) {
                // Page stays dirty and evictable; the caller sees the I/O error
                drop(page);
                state.replacer.unpin(frame_id);
                return Err(e.into());
            }
        }

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }
        state.meta[frame_id] = FrameMeta::new();

        Ok(frame_id)
    }
}
