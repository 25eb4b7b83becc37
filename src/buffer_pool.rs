//! Manages the buffer pool, a collection of in-memory frames that cache
//! disk pages.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use crate::failpoint;
use crate::page::Page;
use crate::pager::Pager;
use crate::replacer::LruReplacer;
use crate::wal::{WalManager, WalRecord};
use crate::{FrameId, PageId, INVALID_PAGE_ID, PAGE_SIZE};

fn lock_mutex_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bookkeeping guarded by the pool's single coarse latch.
struct PoolState {
    /// Maps each cached page id to the frame holding it.
    page_table: HashMap<PageId, FrameId>,
    /// Frames never used or just released; drained before the replacer.
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
}

/// The buffer pool manager.
///
/// All public operations serialize on one latch; disk I/O happens while it
/// is held. The latch is acquired before any frame latch and released only
/// after that frame latch is released. Callers must not hold the latch, or
/// the target frame's latch, when calling back in.
pub struct BufferPoolManager {
    pool_size: usize,
    /// One entry per frame, fixed for the lifetime of the pool.
    pages: Vec<Arc<Page>>,
    latch: Mutex<PoolState>,
    pub pager: Mutex<Pager>,
    wal: Option<Arc<Mutex<WalManager>>>,
}

/// An RAII pin on a page.
///
/// `read`/`write` take the frame latch; `write` also marks the page dirty.
/// Dropping the guard releases the pin.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page: Arc<Page>,
    page_id: PageId,
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        self.page.data_read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        self.page.set_dirty(true);
        self.page.data_write()
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        // `write()` already set the dirty bit, so nothing to OR in here.
        self.bpm.unpin_page(self.page_id, false);
    }
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, pager: Pager) -> Self {
        Self::build(pool_size, pager, None)
    }

    /// A pool that forces `wal` before every dirty-page write.
    pub fn with_wal(pool_size: usize, pager: Pager, wal: Arc<Mutex<WalManager>>) -> Self {
        Self::build(pool_size, pager, Some(wal))
    }

    fn build(pool_size: usize, pager: Pager, wal: Option<Arc<Mutex<WalManager>>>) -> Self {
        let pages = (0..pool_size).map(|_| Arc::new(Page::new())).collect();
        // Initially, every frame is on the free list.
        let free_list = (0..pool_size).collect();

        Self {
            pool_size,
            pages,
            latch: Mutex::new(PoolState {
                page_table: HashMap::with_capacity(pool_size),
                free_list,
                replacer: LruReplacer::new(pool_size),
            }),
            pager: Mutex::new(pager),
            wal,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Pins the page `page_id` and returns a guard for it, reading it from
    /// disk if it is not already cached. `Ok(None)` means every frame is
    /// pinned; the caller can release pins and retry. I/O errors are fatal.
    pub fn fetch_page(&self, page_id: PageId) -> io::Result<Option<PageGuard<'_>>> {
        let mut state = lock_mutex_recover(&self.latch);

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let page = &self.pages[frame_id];
            state.replacer.pin(frame_id);
            page.increment_pin();
            return Ok(Some(self.guard(frame_id, page_id)));
        }

        let Some(frame_id) = Self::find_available_frame(&mut state) else {
            crate::stratum_debug_log!("[BufferPoolManager::fetch_page] No frame for {page_id}");
            return Ok(None);
        };

        let page = &self.pages[frame_id];
        let mut data = page.data_write();

        // Write the old occupant back before re-mapping the frame, so a
        // failed write-back leaves the page table intact.
        self.flush_frame_locked(page, &data)?;
        let old_page_id = page.page_id();
        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }
        state.page_table.insert(page_id, frame_id);

        lock_mutex_recover(&self.pager).read_page(page_id, &mut data)?;
        page.set_page_id(page_id);
        page.set_pin_count(1);
        page.set_dirty(false);
        drop(data);

        Ok(Some(self.guard(frame_id, page_id)))
    }

    /// Allocates a fresh page on disk and pins a zeroed frame for it.
    /// `Ok(None)` means every frame is pinned.
    pub fn new_page(&self) -> io::Result<Option<PageGuard<'_>>> {
        let mut state = lock_mutex_recover(&self.latch);

        let Some(frame_id) = Self::find_available_frame(&mut state) else {
            crate::stratum_debug_log!("[BufferPoolManager::new_page] All frames pinned");
            return Ok(None);
        };

        let page = &self.pages[frame_id];
        let mut data = page.data_write();

        self.flush_frame_locked(page, &data)?;
        let new_page_id = lock_mutex_recover(&self.pager).allocate_page()?;

        let old_page_id = page.page_id();
        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }
        state.page_table.insert(new_page_id, frame_id);
        state.replacer.pin(frame_id);

        data.fill(0);
        page.set_page_id(new_page_id);
        page.set_pin_count(1);
        page.set_dirty(false);
        drop(data);

        Ok(Some(self.guard(frame_id, new_page_id)))
    }

    /// Drops one pin on `page_id`, ORing `is_dirty` into its dirty flag.
    /// Returns whether a pin was actually released; an id that is not
    /// cached at all reports `true` (nothing left to release).
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = lock_mutex_recover(&self.latch);

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return true;
        };
        let page = &self.pages[frame_id];
        if page.pin_count() == 0 {
            return false;
        }

        page.or_dirty(is_dirty);
        if page.decrement_pin() == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes `page_id` back to disk if it is cached and dirty. Returns
    /// whether the id was known to the pool.
    pub fn flush_page(&self, page_id: PageId) -> io::Result<bool> {
        let state = lock_mutex_recover(&self.latch);

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let page = &self.pages[frame_id];
        let data = page.data_write();
        self.flush_frame_locked(page, &data)?;
        Ok(true)
    }

    /// Flushes every page currently in the page table.
    pub fn flush_all_pages(&self) -> io::Result<()> {
        let state = lock_mutex_recover(&self.latch);

        let frame_ids: Vec<FrameId> = state.page_table.values().copied().collect();
        for frame_id in frame_ids {
            let page = &self.pages[frame_id];
            let data = page.data_write();
            self.flush_frame_locked(page, &data)?;
        }
        Ok(())
    }

    /// Removes `page_id` from the pool and deallocates it on disk.
    /// A page that is not cached deallocates straight away; a pinned page
    /// cannot be deleted and reports `false`.
    pub fn delete_page(&self, page_id: PageId) -> io::Result<bool> {
        let mut state = lock_mutex_recover(&self.latch);

        let Some(&frame_id) = state.page_table.get(&page_id) else {
            lock_mutex_recover(&self.pager).deallocate_page(page_id);
            return Ok(true);
        };
        let page = &self.pages[frame_id];
        if page.pin_count() > 0 {
            return Ok(false);
        }

        // The page is going away; its dirty bytes are dropped, not flushed.
        let mut data = page.data_write();
        page.reset(&mut data);
        drop(data);

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        state.free_list.push_back(frame_id);
        lock_mutex_recover(&self.pager).deallocate_page(page_id);
        Ok(true)
    }

    /// Free list first, then the replacer; recency information survives as
    /// long as free frames remain.
    fn find_available_frame(state: &mut PoolState) -> Option<FrameId> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Some(frame_id);
        }
        state.replacer.victim()
    }

    /// Writes the frame's page back if dirty, forcing the WAL first when
    /// one is attached. The dirty bit is cleared only after the write
    /// succeeds.
    fn flush_frame_locked(&self, page: &Page, data: &[u8; PAGE_SIZE]) -> io::Result<()> {
        if !page.is_dirty() {
            return Ok(());
        }
        failpoint::maybe_fail("bpm.flush.before_page")?;
        if let Some(wal) = &self.wal {
            let mut wal = lock_mutex_recover(wal);
            wal.log(&WalRecord::PageImage {
                page_id: page.page_id(),
                data: data.to_vec(),
            })?;
            wal.flush()?;
        }
        lock_mutex_recover(&self.pager).write_page(page.page_id(), data)?;
        page.set_dirty(false);
        Ok(())
    }

    fn guard(&self, frame_id: FrameId, page_id: PageId) -> PageGuard<'_> {
        PageGuard {
            bpm: self,
            page: Arc::clone(&self.pages[frame_id]),
            page_id,
        }
    }

    /// The pin count of a cached page. Intended for tests and introspection.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = lock_mutex_recover(&self.latch);
        let frame_id = state.page_table.get(&page_id)?;
        Some(self.pages[*frame_id].pin_count())
    }

    /// The dirty flag of a cached page. Intended for tests and introspection.
    pub fn is_page_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = lock_mutex_recover(&self.latch);
        let frame_id = state.page_table.get(&page_id)?;
        Some(self.pages[*frame_id].is_dirty())
    }

    /// The frame currently holding a cached page.
    pub fn frame_of(&self, page_id: PageId) -> Option<FrameId> {
        let state = lock_mutex_recover(&self.latch);
        state.page_table.get(&page_id).copied()
    }

    /// The id of the page held by `frame_id`, or `INVALID_PAGE_ID`.
    pub fn frame_page_id(&self, frame_id: FrameId) -> PageId {
        self.pages[frame_id].page_id()
    }

    pub fn free_frame_count(&self) -> usize {
        let state = lock_mutex_recover(&self.latch);
        state.free_list.len()
    }
}
