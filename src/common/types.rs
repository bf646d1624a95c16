use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel page ID meaning "no page"
pub const INVALID_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel transaction ID
pub const INVALID_TXN_ID: TxnId = 0;

/// Table OID type
pub type TableOid = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Record ID: the location of a tuple inside a table heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure. The surrounding `RwLock` doubles as the page latch:
/// holding the read/write half is what the page guards call "latched".
#[derive(Debug, Clone)]
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame: owns at most one page at a time. Pin count and dirty
/// flag live here rather than on the page, so the page latch governs only
/// the page bytes.
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
