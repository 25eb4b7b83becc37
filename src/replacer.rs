use std::sync::Mutex;

use hashlink::LinkedHashMap;

use crate::FrameId;

/// LRU victim selection over unpinned frames.
///
/// Insertion order of the map is the recency list: the back holds the most
/// recently unpinned frame, the front holds the next victim. The hash side
/// makes membership checks and removal O(1), so every operation here is
/// constant time.
///
/// Each operation takes the internal mutex on its own; calls are
/// individually atomic but sequences of them are not. The buffer pool only
/// ever calls in while holding its own latch, so this mutex is uncontended
/// in practice and retained for isolation.
pub struct LruReplacer {
    frames: Mutex<LinkedHashMap<FrameId, ()>>,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            frames: Mutex::new(LinkedHashMap::with_capacity(num_frames)),
        }
    }

    /// Removes and returns the least recently unpinned frame, or `None`
    /// when no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        frames.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Takes `frame_id` out of consideration for eviction. No-op if the
    /// frame is not present.
    pub fn pin(&self, frame_id: FrameId) {
        let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        frames.remove(&frame_id);
    }

    /// Marks `frame_id` evictable as the most recent entry. Unpinning a
    /// frame that is already present is a no-op: it keeps its recency slot.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        if !frames.contains_key(&frame_id) {
            frames.insert(frame_id, ());
        }
    }

    pub fn size(&self) -> usize {
        let frames = self.frames.lock().unwrap_or_else(|p| p.into_inner());
        frames.len()
    }
}
