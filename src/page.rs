use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// The in-memory container backing one buffer frame.
///
/// A frame holds at most one disk page at a time; the metadata here says
/// which page that currently is, how many callers have it pinned, and
/// whether its bytes have diverged from disk. Metadata is only mutated
/// while the buffer pool's latch is held. The data buffer sits behind its
/// own reader/writer lock, which doubles as the frame latch the index
/// layer uses for latch coupling.
pub struct Page {
    page_id: AtomicU32,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
    data: RwLock<[u8; PAGE_SIZE]>,
}

impl Page {
    pub(crate) fn new() -> Self {
        Self {
            page_id: AtomicU32::new(INVALID_PAGE_ID),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            data: RwLock::new([0; PAGE_SIZE]),
        }
    }

    /// The id of the page currently held, or `INVALID_PAGE_ID` for an
    /// empty frame.
    pub fn page_id(&self) -> PageId {
        self.page_id.load(Ordering::SeqCst)
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id, Ordering::SeqCst);
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::SeqCst);
    }

    pub(crate) fn or_dirty(&self, dirty: bool) {
        if dirty {
            self.is_dirty.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::SeqCst);
    }

    pub(crate) fn increment_pin(&self) {
        self.pin_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the pin count after the decrement.
    pub(crate) fn decrement_pin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn data_read(&self) -> RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.data.read()
    }

    pub(crate) fn data_write(&self) -> RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.data.write()
    }

    /// Resets the frame to the empty state. Caller must already hold the
    /// frame's writer latch via `data`.
    pub(crate) fn reset(&self, data: &mut [u8; PAGE_SIZE]) {
        self.page_id.store(INVALID_PAGE_ID, Ordering::SeqCst);
        self.pin_count.store(0, Ordering::SeqCst);
        self.is_dirty.store(false, Ordering::SeqCst);
        data.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_page_is_empty() {
        let page = Page::new();
        assert_eq!(page.page_id(), INVALID_PAGE_ID);
        assert_eq!(page.pin_count(), 0);
        assert!(!page.is_dirty());
        assert!(page.data_read().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_or_dirty_never_clears() {
        let page = Page::new();
        page.or_dirty(false);
        assert!(!page.is_dirty());
        page.or_dirty(true);
        page.or_dirty(false);
        assert!(page.is_dirty());
    }
}
