use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::hash::error::HashTableError;

const CAPACITY_OFFSET: usize = 0;
const BITMAPS_OFFSET: usize = 2;

/// In-memory form of one hash bucket page: a fixed-capacity slot array with
/// two bitmaps. A slot is live iff both bits are set; removal only clears
/// `readable`, leaving `occupied` as a tombstone, so the slot's bytes stay
/// parseable and the slot is reusable.
pub struct HashBucket<K> {
    pub capacity: usize,
    occupied: Vec<bool>,
    readable: Vec<bool>,
    entries: Vec<Option<(K, Rid)>>,
}

impl<K> HashBucket<K>
where
    K: Clone + Eq + Serialize + DeserializeOwned,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            occupied: vec![false; capacity],
            readable: vec![false; capacity],
            entries: (0..capacity).map(|_| None).collect(),
        }
    }

    pub fn is_occupied(&self, slot: usize) -> bool {
        self.occupied[slot]
    }

    pub fn is_readable(&self, slot: usize) -> bool {
        self.readable[slot]
    }

    /// Every readable value stored under `key`
    pub fn get_value(&self, key: &K) -> Vec<Rid> {
        (0..self.capacity)
            .filter(|&i| self.readable[i])
            .filter_map(|i| match &self.entries[i] {
                Some((k, rid)) if k == key => Some(*rid),
                _ => None,
            })
            .collect()
    }

    /// Insert a pair into the first non-readable slot (tombstones are
    /// reused). False if the exact pair already exists or the bucket is full.
    pub fn insert(&mut self, key: K, rid: Rid) -> bool {
        let mut free_slot = None;
        for i in 0..self.capacity {
            if self.readable[i] {
                if let Some((k, r)) = &self.entries[i] {
                    if *k == key && *r == rid {
                        return false;
                    }
                }
            } else if free_slot.is_none() {
                free_slot = Some(i);
            }
        }

        match free_slot {
            Some(i) => {
                self.occupied[i] = true;
                self.readable[i] = true;
                self.entries[i] = Some((key, rid));
                true
            }
            None => false,
        }
    }

    /// Lazy delete: clear `readable`, keep `occupied`
    pub fn remove(&mut self, key: &K, rid: &Rid) -> bool {
        for i in 0..self.capacity {
            if self.readable[i] {
                if let Some((k, r)) = &self.entries[i] {
                    if k == key && r == rid {
                        self.readable[i] = false;
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn is_full(&self) -> bool {
        self.readable.iter().all(|&r| r)
    }

    pub fn is_empty(&self) -> bool {
        self.readable.iter().all(|&r| !r)
    }

    pub fn num_readable(&self) -> usize {
        self.readable.iter().filter(|&&r| r).count()
    }

    /// Snapshot of the live pairs, for split redistribution
    pub fn all_entries(&self) -> Vec<(K, Rid)> {
        (0..self.capacity)
            .filter(|&i| self.readable[i])
            .filter_map(|i| self.entries[i].clone())
            .collect()
    }

    /// Drop everything, tombstones included
    pub fn clear(&mut self) {
        self.occupied.iter_mut().for_each(|b| *b = false);
        self.readable.iter_mut().for_each(|b| *b = false);
        self.entries.iter_mut().for_each(|e| *e = None);
    }

    pub fn serialize(&self, page: &mut Page) -> Result<(), HashTableError> {
        page.data.fill(0);
        LittleEndian::write_u16(
            &mut page.data[CAPACITY_OFFSET..BITMAPS_OFFSET],
            self.capacity as u16,
        );

        let bitmap_len = (self.capacity + 7) / 8;
        for i in 0..self.capacity {
            if self.occupied[i] {
                page.data[BITMAPS_OFFSET + i / 8] |= 1 << (i % 8);
            }
            if self.readable[i] {
                page.data[BITMAPS_OFFSET + bitmap_len + i / 8] |= 1 << (i % 8);
            }
        }

        let mut offset = BITMAPS_OFFSET + 2 * bitmap_len;
        for i in 0..self.capacity {
            if !self.occupied[i] {
                continue;
            }
            let (key, rid) = self.entries[i]
                .as_ref()
                .ok_or(HashTableError::InvalidPageFormat)?;
            let key_bytes = bincode::serialize(key)
                .map_err(|e| HashTableError::SerializationError(e.to_string()))?;
            if offset + 2 + key_bytes.len() + 8 > PAGE_SIZE {
                return Err(HashTableError::SerializationError(
                    "bucket contents exceed page".to_string(),
                ));
            }
            LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
            offset += 2;
            page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
            offset += key_bytes.len();
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], rid.page_id);
            offset += 4;
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.slot);
            offset += 4;
        }

        Ok(())
    }

    pub fn deserialize(page: &Page) -> Result<Self, HashTableError> {
        let capacity =
            LittleEndian::read_u16(&page.data[CAPACITY_OFFSET..BITMAPS_OFFSET]) as usize;
        if capacity == 0 {
            return Err(HashTableError::InvalidPageFormat);
        }
        let mut bucket = Self::new(capacity);

        let bitmap_len = (capacity + 7) / 8;
        for i in 0..capacity {
            bucket.occupied[i] = page.data[BITMAPS_OFFSET + i / 8] & (1 << (i % 8)) != 0;
            bucket.readable[i] =
                page.data[BITMAPS_OFFSET + bitmap_len + i / 8] & (1 << (i % 8)) != 0;
        }

        let mut offset = BITMAPS_OFFSET + 2 * bitmap_len;
        for i in 0..capacity {
            if !bucket.occupied[i] {
                continue;
            }
            if offset + 2 > PAGE_SIZE {
                return Err(HashTableError::InvalidPageFormat);
            }
            let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
            offset += 2;
            if offset + key_len + 8 > PAGE_SIZE {
                return Err(HashTableError::InvalidPageFormat);
            }
            let key = bincode::deserialize(&page.data[offset..offset + key_len])
                .map_err(|e| HashTableError::SerializationError(e.to_string()))?;
            offset += key_len;
            let rid_page = LittleEndian::read_i32(&page.data[offset..offset + 4]);
            offset += 4;
            let slot = LittleEndian::read_u32(&page.data[offset..offset + 4]);
            offset += 4;
            bucket.entries[i] = Some((key, Rid::new(rid_page, slot)));
        }

        Ok(bucket)
    }
}

/// Largest capacity whose bitmaps and worst-case slots still fit one page
pub fn bucket_capacity_for(key_width: usize) -> usize {
    let slot = 2 + key_width + 8;
    let mut capacity = (PAGE_SIZE - BITMAPS_OFFSET) / slot;
    while BITMAPS_OFFSET + 2 * ((capacity + 7) / 8) + capacity * slot > PAGE_SIZE {
        capacity -= 1;
    }
    capacity.max(2)
}
