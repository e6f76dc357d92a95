use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};

/// Upper bound on directory slots; caps global depth at MAX_DEPTH
pub const DIRECTORY_ARRAY_SIZE: usize = 512;

/// log2 of DIRECTORY_ARRAY_SIZE; no bucket may use more hash bits
pub const MAX_DEPTH: u32 = 9;

const GLOBAL_DEPTH_OFFSET: usize = 4;
const LOCAL_DEPTHS_OFFSET: usize = 8;
const BUCKET_IDS_OFFSET: usize = LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE;

/// In-memory form of the extendible hash directory page: how many hash bits
/// route globally, and per slot the bucket page plus how many of the low
/// bits that bucket actually distinguishes.
pub struct HashDirectory {
    pub page_id: PageId,
    pub global_depth: u32,
    pub local_depths: [u8; DIRECTORY_ARRAY_SIZE],
    pub bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
}

impl HashDirectory {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            global_depth: 0,
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Number of live directory slots
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Directory slot for a 32-bit hash
    pub fn bucket_index(&self, hash: u32) -> usize {
        (hash & self.global_depth_mask()) as usize
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        self.bucket_page_ids[index]
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        self.local_depths[index] as u32
    }

    /// The slot this one pairs with at its current local depth: flip the
    /// highest locally-routed bit
    pub fn split_image_index(&self, index: usize) -> usize {
        debug_assert!(self.local_depth(index) > 0);
        index ^ (1 << (self.local_depth(index) - 1))
    }

    /// Double the directory: each new slot mirrors the slot that shares its
    /// low `global_depth` bits
    pub fn incr_global_depth(&mut self) {
        debug_assert!(self.global_depth < MAX_DEPTH);
        let old_size = self.size();
        for i in 0..old_size {
            self.local_depths[old_size + i] = self.local_depths[i];
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// The directory can halve when the top half duplicates the bottom half
    /// and no bucket routes on the full global depth
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }
        let half = 1 << (self.global_depth - 1);
        (0..self.size()).all(|i| self.local_depth(i) < self.global_depth)
            && (0..half).all(|i| self.bucket_page_ids[i] == self.bucket_page_ids[i + half])
    }

    /// Directory invariants: local depths bounded by the global depth, every
    /// slot mapped, and slots agreeing on their low local-depth bits sharing
    /// a bucket page
    pub fn verify_integrity(&self) {
        for i in 0..self.size() {
            assert!(
                self.local_depth(i) <= self.global_depth,
                "slot {} local depth exceeds global",
                i
            );
            assert_ne!(self.bucket_page_ids[i], INVALID_PAGE_ID, "slot {} unmapped", i);

            let mask = (1usize << self.local_depth(i)) - 1;
            for j in 0..self.size() {
                if i & mask == j & mask {
                    assert_eq!(
                        self.bucket_page_ids[i], self.bucket_page_ids[j],
                        "slots {} and {} agree on {} low bits but differ in bucket",
                        i, j, self.local_depth(i)
                    );
                    assert_eq!(self.local_depths[i], self.local_depths[j]);
                }
            }
        }
    }

    pub fn serialize(&self, page: &mut Page) {
        page.data.fill(0);
        LittleEndian::write_i32(&mut page.data[0..4], self.page_id);
        LittleEndian::write_u32(
            &mut page.data[GLOBAL_DEPTH_OFFSET..LOCAL_DEPTHS_OFFSET],
            self.global_depth,
        );
        page.data[LOCAL_DEPTHS_OFFSET..BUCKET_IDS_OFFSET].copy_from_slice(&self.local_depths);
        for (i, &pid) in self.bucket_page_ids.iter().enumerate() {
            let offset = BUCKET_IDS_OFFSET + i * 4;
            LittleEndian::write_i32(&mut page.data[offset..offset + 4], pid);
        }
    }

    pub fn deserialize(page: &Page) -> Self {
        let mut dir = Self::new(LittleEndian::read_i32(&page.data[0..4]));
        dir.global_depth =
            LittleEndian::read_u32(&page.data[GLOBAL_DEPTH_OFFSET..LOCAL_DEPTHS_OFFSET]);
        dir.local_depths
            .copy_from_slice(&page.data[LOCAL_DEPTHS_OFFSET..BUCKET_IDS_OFFSET]);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            let offset = BUCKET_IDS_OFFSET + i * 4;
            dir.bucket_page_ids[i] = LittleEndian::read_i32(&page.data[offset..offset + 4]);
        }
        dir
    }
}
