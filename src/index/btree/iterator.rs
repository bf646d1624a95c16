use std::marker::PhantomData;
use std::sync::Arc;
use serde::Deserialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::deserialize_node;
use crate::storage::buffer::BufferPoolManager;

/// Forward iterator over a tree's `(key, rid)` pairs in ascending key
/// order. Holds only a leaf page id and a slot offset; each step latches
/// the current leaf for reading and follows the next-leaf link at the end.
/// The end of the scan is the `INVALID_PAGE_ID` sentinel.
pub struct BTreeIterator<K> {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    slot: usize,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIterator<K> {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, slot: usize) -> Self {
        Self {
            bpm,
            page_id,
            slot,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self::new(bpm, INVALID_PAGE_ID, 0)
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID
    }
}

impl<K> Iterator for BTreeIterator<K>
where
    K: Clone + Ord + for<'de> Deserialize<'de>,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            if self.page_id == INVALID_PAGE_ID {
                return None;
            }

            let guard = self.bpm.fetch_page_read(self.page_id).ok()?;
            let node: BTreeNode<K> = deserialize_node(guard.data()).ok()?;

            if self.slot < node.size() {
                let item = (node.key_at(self.slot).clone(), node.rids[self.slot]);
                self.slot += 1;
                return Some(item);
            }

            // Exhausted this leaf; chase the sibling link
            self.page_id = node.next_leaf;
            self.slot = 0;
        }
    }
}
