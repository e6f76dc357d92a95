use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

/// LRU page replacement policy: a recency-ordered map gives O(1)
/// victim/pin/unpin. Front is least recently unpinned.
pub struct LruReplacer {
    lru_list: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            lru_list: Mutex::new(LinkedHashMap::with_capacity(pool_size)),
        }
    }
}

impl Replacer for LruReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut list = self.lru_list.lock();
        list.pop_front().map(|(frame_id, ())| frame_id)
    }

    fn pin(&self, frame_id: FrameId) {
        let mut list = self.lru_list.lock();
        list.remove(&frame_id);
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut list = self.lru_list.lock();
        // Already a candidate: keep its position
        if !list.contains_key(&frame_id) {
            list.insert(frame_id, ());
        }
    }

    fn size(&self) -> usize {
        self.lru_list.lock().len()
    }
}
