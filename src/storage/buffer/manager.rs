use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::config::LRUK_REPLACER_K;
use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::lru_k_replacer::LruKReplacer;
use crate::storage::buffer::page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::disk::DiskManager;

/// Bookkeeping mutated only under the pool latch
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// BufferPoolManager maps logical page ids to in-memory frames, mediates
/// disk I/O and enforces pinning. Page latches are the per-page `RwLock`s;
/// the pool latch covers the page table, the free list and id allocation.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    latch: Mutex<PoolState>,
    replacer: Mutex<LruKReplacer>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            latch: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: 1,
            }),
            replacer: Mutex::new(LruKReplacer::new(pool_size, LRUK_REPLACER_K)),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id and bring a zeroed page for it into a frame,
    /// pinned once. Fails with `BufferPoolFull` when every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.latch.lock();
        let frame_id = self.acquire_frame(&mut state)?;

        let page_id = state.next_page_id;
        state.next_page_id += 1;
        state.page_table.insert(page_id, frame_id);

        let frame = &self.frames[frame_id];
        let page_ptr = {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(page_id);
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
            frame_guard.page.clone()
        };

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);

        Ok((page_ptr, page_id))
    }

    /// Fetch a page, faulting it in from disk if it is not resident
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut state = self.latch.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            let page_ptr = {
                let mut frame_guard = frame.write();
                frame_guard.pin_count += 1;
                frame_guard.page.clone()
            };
            let mut replacer = self.replacer.lock();
            replacer.record_access(frame_id);
            replacer.set_evictable(frame_id, false);
            return Ok(page_ptr);
        }

        let frame_id = self.acquire_frame(&mut state)?;

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        let read_result = {
            let mut page_guard = frame_guard.page.write();
            self.disk_manager.read_page(page_id, &mut page_guard)
        };
        if let Err(e) = read_result {
            // Hand the frame back rather than stranding it
            state.free_list.push_back(frame_id);
            return Err(e.into());
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;
        let page_ptr = frame_guard.page.clone();
        drop(frame_guard);
        state.page_table.insert(page_id, frame_id);

        let mut replacer = self.replacer.lock();
        replacer.record_access(frame_id);
        replacer.set_evictable(frame_id, false);

        Ok(page_ptr)
    }

    /// Drop one pin on a page, OR-ing in the dirty flag. The frame becomes
    /// evictable when its pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let state = self.latch.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame_guard.is_dirty |= is_dirty;
        frame_guard.pin_count -= 1;
        if frame_guard.pin_count == 0 {
            self.replacer.lock().set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Write a resident page to disk unconditionally and clear its dirty
    /// flag. The pool latch is released before the page latch is taken, so
    /// a flush can wait out a page writer without stalling the whole pool.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let frame_id = {
            let state = self.latch.lock();
            match state.page_table.get(&page_id) {
                Some(&id) => id,
                None => return Err(BufferPoolError::PageNotFound(page_id)),
            }
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        {
            let page_guard = frame_guard.page.read();
            if page_guard.page_id != page_id {
                // Raced with eviction; the evictor already wrote it out
                return Ok(());
            }
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;

        Ok(())
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let state = self.latch.lock();
            state.page_table.keys().copied().collect()
        };
        for page_id in page_ids {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Remove a page from the pool and return its frame to the free list.
    /// Deleting an absent page succeeds (the call is idempotent); deleting a
    /// pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.latch.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }
        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }

        {
            let mut page_guard = frame_guard.page.write();
            *page_guard = Page::new(INVALID_PAGE_ID);
        }
        frame_guard.is_dirty = false;
        frame_guard.pin_count = 0;
        drop(frame_guard);

        state.page_table.remove(&page_id);
        state.free_list.push_back(frame_id);
        self.replacer.lock().remove(frame_id);

        Ok(())
    }

    /// Scoped guard that unpins on drop
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<BasicPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(BasicPageGuard::new(self.clone(), page, page_id))
    }

    /// Scoped guard holding the page's read latch
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<ReadPageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(self.clone(), page, page_id))
    }

    /// Scoped guard holding the page's write latch
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<WritePageGuard, BufferPoolError> {
        let page = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(self.clone(), page, page_id))
    }

    /// Allocate a new page and hand it back behind a basic guard
    pub fn new_page_guarded(self: &Arc<Self>) -> Result<(BasicPageGuard, PageId), BufferPoolError> {
        let (page, page_id) = self.new_page()?;
        Ok((BasicPageGuard::new(self.clone(), page, page_id), page_id))
    }

    /// Take a frame from the free list, or evict a victim. The caller holds
    /// the pool latch; on return the frame is clean and unmapped.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = match self.replacer.lock().evict() {
            Some(frame_id) => frame_id,
            None => return Err(BufferPoolError::BufferPoolFull),
        };

        let frame = &self.frames[victim];
        let mut frame_guard = frame.write();
        let old_page_id = frame_guard.page.read().page_id;
        if frame_guard.is_dirty {
            let page_guard = frame_guard.page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;
        drop(frame_guard);

        if old_page_id != INVALID_PAGE_ID {
            debug!("evicting page {} from frame {}", old_page_id, victim);
            state.page_table.remove(&old_page_id);
        }

        Ok(victim)
    }
}
