use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

type PageReadLatch = ArcRwLockReadGuard<RawRwLock, Page>;
type PageWriteLatch = ArcRwLockWriteGuard<RawRwLock, Page>;

/// Drops the pin a guard holds on its page. Kept as the *last* field of
/// every guard so that the latch (an earlier field) is released before the
/// unpin runs -- mirroring latch-then-pin teardown order.
struct Unpinner {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    is_dirty: bool,
}

impl Drop for Unpinner {
    fn drop(&mut self) {
        // The page can only be missing if the pool was torn down first;
        // nothing useful to do with the error inside a destructor.
        let _ = self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// Scoped pin on a page without holding its latch. Dirtiness is recorded
/// iff mutable access was requested.
pub struct BasicPageGuard {
    page: PagePtr,
    unpinner: Unpinner,
}

impl BasicPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        Self {
            page,
            unpinner: Unpinner {
                bpm,
                page_id,
                is_dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.unpinner.page_id
    }

    /// Briefly latch the page for reading
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    /// Briefly latch the page for writing; the eventual unpin reports dirty
    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.unpinner.is_dirty = true;
        self.page.write()
    }
}

/// Scoped pin that also holds the page's read latch for its whole lifetime
pub struct ReadPageGuard {
    latch: PageReadLatch,
    unpinner: Unpinner,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        let latch = page.read_arc();
        Self {
            latch,
            unpinner: Unpinner {
                bpm,
                page_id,
                is_dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.unpinner.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }
}

/// Scoped pin that holds the page's write latch for its whole lifetime
pub struct WritePageGuard {
    latch: PageWriteLatch,
    unpinner: Unpinner,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: PagePtr, page_id: PageId) -> Self {
        let latch = page.write_arc();
        Self {
            latch,
            unpinner: Unpinner {
                bpm,
                page_id,
                is_dirty: false,
            },
        }
    }

    pub fn page_id(&self) -> PageId {
        self.unpinner.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.latch.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.unpinner.is_dirty = true;
        &mut self.latch.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn test_pool(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let bpm = Arc::new(BufferPoolManager::new(pool_size, file.path()).unwrap());
        (bpm, file)
    }

    #[test]
    fn test_basic_guard_unpins_on_drop() {
        let (bpm, _file) = test_pool(4);
        let (_, page_id) = bpm.new_page().unwrap();
        bpm.unpin_page(page_id, false).unwrap();

        {
            let _guard = bpm.fetch_page_basic(page_id).unwrap();
            // While the guard is live the page is pinned and cannot be deleted.
            assert!(bpm.delete_page(page_id).is_err());
        }
        // Guard dropped: the page is unpinned and deletable.
        bpm.delete_page(page_id).unwrap();
    }

    #[test]
    fn test_write_guard_marks_dirty() {
        let (bpm, _file) = test_pool(4);
        let (guard, page_id) = bpm.new_page_guarded().unwrap();
        drop(guard);

        {
            let mut guard = bpm.fetch_page_write(page_id).unwrap();
            guard.data_mut()[0..4].copy_from_slice(b"tern");
        }
        bpm.flush_page(page_id).unwrap();

        let guard = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(&guard.data()[0..4], b"tern");
    }

    #[test]
    fn test_read_guards_share_the_latch() {
        let (bpm, _file) = test_pool(4);
        let (guard, page_id) = bpm.new_page_guarded().unwrap();
        drop(guard);

        let g1 = bpm.fetch_page_read(page_id).unwrap();
        let g2 = bpm.fetch_page_read(page_id).unwrap();
        assert_eq!(g1.page_id(), g2.page_id());
    }

    #[test]
    fn test_moved_guard_releases_once() {
        let (bpm, _file) = test_pool(4);
        let (guard, page_id) = bpm.new_page_guarded().unwrap();
        drop(guard);

        let guard = bpm.fetch_page_read(page_id).unwrap();
        let moved = guard;
        drop(moved);
        // Exactly one unpin happened: the page is deletable, and a second
        // unpin would now report an un-pinned page.
        assert!(bpm.unpin_page(page_id, false).is_err());
        bpm.delete_page(page_id).unwrap();
    }
}
