use std::sync::Arc;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::query::executor::result::Tuple;
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{PageError, PageManager};

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Tuple too large for a page")]
    TupleTooLarge,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Page error: {0}")]
    PageError(#[from] PageError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}

/// Per-tuple metadata stored in front of the payload. A deleted tuple stays
/// in place as a tombstone; scans are responsible for skipping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupleMeta {
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn live() -> Self {
        Self { is_deleted: false }
    }
}

/// A paged heap of tuples. Pages are chained through their headers; tuples
/// are addressed by `Rid { page_id, slot }` and never move once inserted.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    page_manager: PageManager,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Result<Self, TableError> {
        let (mut guard, first_page_id) = bpm.new_page_guarded()?;
        let page_manager = PageManager::new();
        {
            let mut page = guard.write();
            page_manager.init_page(&mut page.data);
        }
        drop(guard);

        Ok(Self {
            bpm,
            page_manager,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Append a tuple to the heap, growing it by a page when the tail fills
    pub fn insert_tuple(&self, meta: TupleMeta, tuple: &Tuple) -> Result<Rid, TableError> {
        let record = encode_record(meta, tuple)?;

        let mut last_page_id = self.last_page_id.lock();
        let mut guard = self.bpm.fetch_page_write(*last_page_id)?;

        match self.page_manager.insert_record(guard.data_mut(), &record) {
            Ok(slot) => return Ok(Rid::new(guard.page_id(), slot)),
            Err(PageError::InsufficientSpace) => {}
            Err(e) => return Err(e.into()),
        }

        let (mut new_guard, new_page_id) = self.bpm.new_page_guarded()?;
        let slot = {
            let mut page = new_guard.write();
            self.page_manager.init_page(&mut page.data);
            self.page_manager
                .insert_record(&mut page.data, &record)
                .map_err(|e| match e {
                    PageError::InsufficientSpace => TableError::TupleTooLarge,
                    other => TableError::from(other),
                })?
        };
        self.page_manager.set_next_page_id(guard.data_mut(), new_page_id);
        *last_page_id = new_page_id;

        Ok(Rid::new(new_page_id, slot))
    }

    pub fn get_tuple(&self, rid: Rid) -> Result<(TupleMeta, Tuple), TableError> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let record = self.page_manager.read_record(guard.data(), rid.slot)?;
        decode_record(&record)
    }

    pub fn get_tuple_meta(&self, rid: Rid) -> Result<TupleMeta, TableError> {
        let guard = self.bpm.fetch_page_read(rid.page_id)?;
        let record = self.page_manager.read_record(guard.data(), rid.slot)?;
        Ok(TupleMeta {
            is_deleted: record[0] == 1,
        })
    }

    /// Rewrite a tuple's metadata in place
    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> Result<(), TableError> {
        let mut guard = self.bpm.fetch_page_write(rid.page_id)?;
        let mut record = self.page_manager.read_record(guard.data(), rid.slot)?;
        record[0] = u8::from(meta.is_deleted);
        self.page_manager.update_record(guard.data_mut(), rid.slot, &record)?;
        Ok(())
    }

    /// Iterate every tuple in the heap, tombstones included. The scan end
    /// is pinned at creation time, so tuples appended mid-scan (e.g. by an
    /// update fed from this very scan) are not revisited.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        let stop_page_id = *self.last_page_id.lock();
        let stop_slot = self
            .bpm
            .fetch_page_read(stop_page_id)
            .map(|guard| self.page_manager.record_count(guard.data()))
            .unwrap_or(0);
        TableIterator {
            heap: self.clone(),
            page_id: self.first_page_id,
            slot: 0,
            stop_page_id,
            stop_slot,
        }
    }
}

/// Walks the page chain slot by slot up to the end position captured at
/// creation. Yields tombstoned tuples too; the caller decides whether to
/// skip them.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    page_id: PageId,
    slot: u32,
    stop_page_id: PageId,
    stop_slot: u32,
}

impl Iterator for TableIterator {
    type Item = (Rid, TupleMeta, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = self.heap.bpm.fetch_page_read(self.page_id).ok()?;
            let mut count = self.heap.page_manager.record_count(guard.data());
            if self.page_id == self.stop_page_id {
                count = count.min(self.stop_slot);
            }
            if self.slot < count {
                let rid = Rid::new(self.page_id, self.slot);
                let record = self
                    .heap
                    .page_manager
                    .read_record(guard.data(), self.slot)
                    .ok()?;
                let (meta, tuple) = decode_record(&record).ok()?;
                self.slot += 1;
                return Some((rid, meta, tuple));
            }

            if self.page_id == self.stop_page_id {
                self.page_id = INVALID_PAGE_ID;
            } else {
                self.page_id = self.heap.page_manager.next_page_id(guard.data());
            }
            self.slot = 0;
        }
    }
}

fn encode_record(meta: TupleMeta, tuple: &Tuple) -> Result<Vec<u8>, TableError> {
    let payload = bincode::serialize(&tuple.values).map_err(|e| TableError::Codec(e.to_string()))?;
    let mut record = Vec::with_capacity(payload.len() + 1);
    record.push(u8::from(meta.is_deleted));
    record.extend_from_slice(&payload);
    Ok(record)
}

fn decode_record(record: &[u8]) -> Result<(TupleMeta, Tuple), TableError> {
    let meta = TupleMeta {
        is_deleted: record[0] == 1,
    };
    let values = bincode::deserialize(&record[1..]).map_err(|e| TableError::Codec(e.to_string()))?;
    Ok((meta, Tuple::new(values)))
}
