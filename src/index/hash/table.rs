use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use log::debug;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;
use crate::storage::page::header::MAX_INDEX_NAME_LEN;
use crate::index::hash::bucket::{bucket_capacity_for, HashBucket};
use crate::index::hash::directory::{HashDirectory, MAX_DEPTH};
use crate::index::hash::error::HashTableError;

/// 32-bit hash used for directory routing. Pluggable so tests can pin
/// keys to chosen buckets.
pub trait KeyHasher<K>: Send + Sync {
    fn hash(&self, key: &K) -> u32;
}

/// Routes through the standard library's hasher
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Concurrent extendible hash table: point key -> record id, non-unique
/// keys, exact duplicate pairs rejected.
///
/// The table-level latch guards directory shape: lookups and non-splitting
/// inserts hold it shared, splits and merges hold it exclusive. Bucket
/// payloads synchronize on their page latches underneath.
pub struct ExtendibleHashTable<K> {
    name: String,
    buffer_pool: Arc<BufferPoolManager>,
    directory_page_id: AtomicI32,
    table_latch: RwLock<()>,
    bucket_capacity: usize,
    hasher: Box<dyn KeyHasher<K>>,
    _phantom: PhantomData<K>,
}

impl<K> ExtendibleHashTable<K>
where
    K: Clone + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open (or create) the table named `name` with a default bucket
    /// capacity sized for `key_width`-byte encoded keys
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        key_width: usize,
    ) -> Result<Self, HashTableError> {
        Self::with_hasher(
            name,
            buffer_pool,
            bucket_capacity_for(key_width),
            Box::new(DefaultKeyHasher),
        )
    }

    /// Full-control constructor: explicit bucket capacity and hash function
    pub fn with_hasher(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        bucket_capacity: usize,
        hasher: Box<dyn KeyHasher<K>>,
    ) -> Result<Self, HashTableError> {
        assert!(bucket_capacity >= 1);
        // Bitmaps plus value-only slots must fit even before key bytes
        assert!(2 + 2 * ((bucket_capacity + 7) / 8) + bucket_capacity * 10 <= PAGE_SIZE);

        let name = name.into();
        if name.len() > MAX_INDEX_NAME_LEN {
            return Err(HashTableError::IndexNameTooLong(name));
        }

        let table = Self {
            name,
            buffer_pool,
            directory_page_id: AtomicI32::new(INVALID_PAGE_ID),
            table_latch: RwLock::new(()),
            bucket_capacity,
            hasher,
            _phantom: PhantomData,
        };
        table.ensure_directory()?;
        Ok(table)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory_page_id(&self) -> PageId {
        self.directory_page_id.load(Ordering::SeqCst)
    }

    /// Locate the directory via the header page, creating directory and
    /// first bucket on first open
    fn ensure_directory(&self) -> Result<(), HashTableError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let recorded = {
            let page = header.read();
            HeaderPage::get_root_id(&page, &self.name)
        };

        if let Some(dir_pid) = recorded {
            if dir_pid != INVALID_PAGE_ID {
                self.directory_page_id.store(dir_pid, Ordering::SeqCst);
                self.buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                return Ok(());
            }
        }

        // First open: one empty bucket behind a depth-0 directory
        let (bucket_ptr, bucket_pid) = self.buffer_pool.new_page()?;
        let written = {
            let mut page = bucket_ptr.write();
            HashBucket::<K>::new(self.bucket_capacity).serialize(&mut page)
        };
        self.buffer_pool.unpin_page(bucket_pid, true)?;
        if let Err(e) = written {
            let _ = self.buffer_pool.unpin_page(HEADER_PAGE_ID, false);
            return Err(e);
        }

        let (dir_ptr, dir_pid) = self.buffer_pool.new_page()?;
        {
            let mut page = dir_ptr.write();
            let mut dir = HashDirectory::new(dir_pid);
            dir.bucket_page_ids[0] = bucket_pid;
            dir.serialize(&mut page);
        }
        self.buffer_pool.unpin_page(dir_pid, true)?;

        {
            let mut page = header.write();
            if !HeaderPage::update_record(&mut page, &self.name, dir_pid) {
                HeaderPage::insert_record(&mut page, &self.name, dir_pid);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        self.directory_page_id.store(dir_pid, Ordering::SeqCst);
        Ok(())
    }

    fn hash(&self, key: &K) -> u32 {
        self.hasher.hash(key)
    }

    fn load_directory(&self) -> Result<HashDirectory, HashTableError> {
        let dir_pid = self.directory_page_id();
        let ptr = self.buffer_pool.fetch_page(dir_pid)?;
        let dir = {
            let page = ptr.read();
            HashDirectory::deserialize(&page)
        };
        self.buffer_pool.unpin_page(dir_pid, false)?;
        Ok(dir)
    }

    fn store_directory(&self, dir: &HashDirectory) -> Result<(), HashTableError> {
        let ptr = self.buffer_pool.fetch_page(dir.page_id)?;
        {
            let mut page = ptr.write();
            dir.serialize(&mut page);
        }
        self.buffer_pool.unpin_page(dir.page_id, true)?;
        Ok(())
    }

    /// Every value stored under `key`
    pub fn get_value(&self, key: &K) -> Result<Vec<Rid>, HashTableError> {
        let _table = self.table_latch.read();

        let dir = self.load_directory()?;
        let bucket_pid = dir.bucket_page_id(dir.bucket_index(self.hash(key)));

        let ptr = self.buffer_pool.fetch_page(bucket_pid)?;
        let result = {
            let page = ptr.read();
            HashBucket::<K>::deserialize(&page).map(|bucket| bucket.get_value(key))
        };
        self.buffer_pool.unpin_page(bucket_pid, false)?;
        result
    }

    /// Insert a pair, splitting the target bucket as often as needed.
    /// Returns false on an exact duplicate, or when the bucket chain is at
    /// maximum depth and full.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, HashTableError> {
        loop {
            // Fast path under the shared latch: room in the bucket
            {
                let _table = self.table_latch.read();

                let dir = self.load_directory()?;
                let bucket_pid = dir.bucket_page_id(dir.bucket_index(self.hash(key)));

                let ptr = self.buffer_pool.fetch_page(bucket_pid)?;
                let outcome = {
                    let mut page = ptr.write();
                    HashBucket::<K>::deserialize(&page).and_then(|mut bucket| {
                        if bucket.is_full() {
                            return Ok(None);
                        }
                        let inserted = bucket.insert(key.clone(), rid);
                        if inserted {
                            bucket.serialize(&mut page)?;
                        }
                        Ok(Some(inserted))
                    })
                };
                let dirty = matches!(outcome, Ok(Some(true)));
                self.buffer_pool.unpin_page(bucket_pid, dirty)?;
                if let Some(inserted) = outcome? {
                    return Ok(inserted);
                }
            }

            // Bucket full: take the directory exclusively and split
            if !self.split_bucket(key)? {
                return Ok(false);
            }
        }
    }

    /// Split the bucket covering `key` under the exclusive table latch.
    /// Returns false when no further split is possible.
    fn split_bucket(&self, key: &K) -> Result<bool, HashTableError> {
        let _table = self.table_latch.write();

        let mut dir = self.load_directory()?;
        let slot = dir.bucket_index(self.hash(key));
        let bucket_pid = dir.bucket_page_id(slot);
        let local_depth = dir.local_depth(slot);

        let ptr = self.buffer_pool.fetch_page(bucket_pid)?;
        let mut page = ptr.write();
        let mut bucket = match HashBucket::<K>::deserialize(&page) {
            Ok(bucket) => bucket,
            Err(e) => {
                drop(page);
                let _ = self.buffer_pool.unpin_page(bucket_pid, false);
                return Err(e);
            }
        };

        // Someone else split while we queued for the exclusive latch
        if !bucket.is_full() {
            drop(page);
            self.buffer_pool.unpin_page(bucket_pid, false)?;
            return Ok(true);
        }

        if local_depth >= MAX_DEPTH {
            drop(page);
            self.buffer_pool.unpin_page(bucket_pid, false)?;
            debug!("bucket at max depth {}, insert fails", MAX_DEPTH);
            return Ok(false);
        }

        if local_depth == dir.global_depth {
            dir.incr_global_depth();
        }
        let new_local = local_depth + 1;

        let entries = bucket.all_entries();
        bucket.clear();

        let (image_ptr, image_pid) = self.buffer_pool.new_page()?;
        let mut image = HashBucket::<K>::new(self.bucket_capacity);

        debug!(
            "splitting bucket {} (local depth {} -> {}), image {}",
            bucket_pid, local_depth, new_local, image_pid
        );

        // Repartition the directory: slots that agree with `slot` on the new
        // routing bit keep the old bucket, the rest move to the image
        let split_bit = 1usize << (new_local - 1);
        let keeps_bit = slot & split_bit;
        for i in 0..dir.size() {
            if dir.bucket_page_ids[i] == bucket_pid {
                dir.local_depths[i] = new_local as u8;
                if i & split_bit != keeps_bit {
                    dir.bucket_page_ids[i] = image_pid;
                }
            }
        }

        // Rehash every entry on the new bit
        for (k, r) in entries {
            let target_keeps = (self.hash(&k) as usize) & split_bit == keeps_bit;
            let accepted = if target_keeps {
                bucket.insert(k, r)
            } else {
                image.insert(k, r)
            };
            debug_assert!(accepted, "rehashed entry must fit");
        }

        let written = bucket.serialize(&mut page);
        drop(page);
        self.buffer_pool.unpin_page(bucket_pid, true)?;
        written?;

        let written = {
            let mut image_page = image_ptr.write();
            image.serialize(&mut image_page)
        };
        self.buffer_pool.unpin_page(image_pid, true)?;
        written?;

        self.store_directory(&dir)?;
        Ok(true)
    }

    /// Remove a pair (lazy delete in the bucket). An emptied bucket tries
    /// to merge with its split image.
    pub fn remove(&self, key: &K, rid: &Rid) -> Result<bool, HashTableError> {
        let (removed, became_empty) = {
            let _table = self.table_latch.read();

            let dir = self.load_directory()?;
            let bucket_pid = dir.bucket_page_id(dir.bucket_index(self.hash(key)));

            let ptr = self.buffer_pool.fetch_page(bucket_pid)?;
            let outcome = {
                let mut page = ptr.write();
                HashBucket::<K>::deserialize(&page).and_then(|mut bucket| {
                    let removed = bucket.remove(key, rid);
                    if removed {
                        bucket.serialize(&mut page)?;
                    }
                    Ok((removed, removed && bucket.is_empty()))
                })
            };
            let dirty = matches!(outcome, Ok((true, _)));
            self.buffer_pool.unpin_page(bucket_pid, dirty)?;
            outcome?
        };

        if became_empty {
            self.merge_bucket(key)?;
        }
        Ok(removed)
    }

    /// Fold an empty bucket into its split image and shrink the directory
    /// as far as it goes. A no-op unless the image shares the local depth.
    fn merge_bucket(&self, key: &K) -> Result<(), HashTableError> {
        let _table = self.table_latch.write();

        let mut dir = self.load_directory()?;
        let slot = dir.bucket_index(self.hash(key));
        let local_depth = dir.local_depth(slot);
        if local_depth == 0 {
            return Ok(());
        }

        let target_pid = dir.bucket_page_id(slot);
        let image_slot = dir.split_image_index(slot);
        if dir.local_depth(image_slot) != local_depth {
            return Ok(());
        }
        let image_pid = dir.bucket_page_id(image_slot);
        if image_pid == target_pid {
            return Ok(());
        }

        // Re-check emptiness: an insert may have landed since the remove
        let still_empty = {
            let ptr = self.buffer_pool.fetch_page(target_pid)?;
            let empty = {
                let page = ptr.read();
                HashBucket::<K>::deserialize(&page).map(|bucket| bucket.is_empty())
            };
            self.buffer_pool.unpin_page(target_pid, false)?;
            empty?
        };
        if !still_empty {
            return Ok(());
        }

        debug!(
            "merging empty bucket {} into image {} at local depth {}",
            target_pid, image_pid, local_depth
        );

        for i in 0..dir.size() {
            if dir.bucket_page_ids[i] == target_pid {
                dir.bucket_page_ids[i] = image_pid;
            }
            if dir.bucket_page_ids[i] == image_pid {
                dir.local_depths[i] = (local_depth - 1) as u8;
            }
        }

        while dir.can_shrink() {
            dir.decr_global_depth();
        }

        self.store_directory(&dir)?;
        self.buffer_pool.delete_page(target_pid)?;
        Ok(())
    }

    pub fn global_depth(&self) -> Result<u32, HashTableError> {
        let _table = self.table_latch.read();
        Ok(self.load_directory()?.global_depth)
    }

    /// Assert every directory invariant; test and diagnostics helper
    pub fn verify_integrity(&self) -> Result<(), HashTableError> {
        let _table = self.table_latch.read();
        self.load_directory()?.verify_integrity();
        Ok(())
    }
}
