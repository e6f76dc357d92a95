use parking_lot::Mutex;

use crate::common::types::FrameId;
use crate::storage::buffer::replacer::Replacer;

struct ClockState {
    // (contains, reference) per frame slot
    frames: Vec<(bool, bool)>,
    hand: usize,
}

/// Clock (second-chance) page replacement policy
pub struct ClockReplacer {
    state: Mutex<ClockState>,
}

impl ClockReplacer {
    pub fn new(pool_size: usize) -> Self {
        Self {
            state: Mutex::new(ClockState {
                frames: vec![(false, false); pool_size],
                hand: 0,
            }),
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.lock();
        if !state.frames.iter().any(|&(contains, _)| contains) {
            return None;
        }

        // Terminates: every pass clears at least one reference bit
        loop {
            let hand = state.hand;
            state.hand = (hand + 1) % state.frames.len();

            let (contains, reference) = state.frames[hand];
            if !contains {
                continue;
            }
            if reference {
                state.frames[hand].1 = false;
            } else {
                state.frames[hand].0 = false;
                return Some(hand);
            }
        }
    }

    fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if frame_id < state.frames.len() {
            state.frames[frame_id] = (false, false);
        }
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.lock();
        if frame_id < state.frames.len() {
            state.frames[frame_id] = (true, true);
        }
    }

    fn size(&self) -> usize {
        let state = self.state.lock();
        state.frames.iter().filter(|&&(contains, _)| contains).count()
    }
}
