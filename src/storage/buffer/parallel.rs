use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::common::types::{PageId, PagePtr};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::{BufferPoolManager, BufferPoolConfig};

/// Sharded buffer pool: `N` independent instances keyed by
/// `page_id mod N`, each with its own latch, cutting contention on the
/// pool-wide lock. Page IDs allocated by instance `i` are congruent to
/// `i` mod `N`, so routing never changes for a page's lifetime.
pub struct ParallelBufferPoolManager {
    instances: Vec<Arc<BufferPoolManager>>,
    next_instance: AtomicUsize,
}

impl ParallelBufferPoolManager {
    pub fn new(
        num_instances: usize,
        pool_size_per_instance: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0);
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolManager::with_disk_manager(
                    BufferPoolConfig {
                        pool_size: pool_size_per_instance,
                        ..Default::default()
                    },
                    disk_manager.clone(),
                    num_instances as u32,
                    i as u32,
                ))
            })
            .collect();

        Ok(Self {
            instances,
            next_instance: AtomicUsize::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Total frames across all instances
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    fn instance_for(&self, page_id: PageId) -> &BufferPoolManager {
        &self.instances[page_id.rem_euclid(self.instances.len() as PageId) as usize]
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id).fetch_page(page_id)
    }

    /// Round-robin over instances starting just past the last success, so a
    /// single full instance does not starve allocation.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let start = self.next_instance.fetch_add(1, Ordering::Relaxed);
        let n = self.instances.len();

        let mut last_err = BufferPoolError::PoolExhausted;
        for offset in 0..n {
            let idx = (start + offset) % n;
            match self.instances[idx].new_page() {
                Ok(result) => return Ok(result),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id).delete_page(page_id)
    }
}
