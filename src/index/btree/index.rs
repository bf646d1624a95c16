use std::marker::PhantomData;
use std::sync::Arc;
use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Deserialize};

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::iterator::BTreeIterator;
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{serialize_node, deserialize_node};
use crate::storage::buffer::{BufferPoolManager, WritePageGuard};

/// Write-latch context for a top-down insert or delete: the header guard
/// plus every ancestor latched on the way down. Dropping the context
/// releases the header first, then the ancestors top-down.
struct Context {
    header: WritePageGuard,
    write_set: Vec<WritePageGuard>,
}

/// A concurrent, disk-backed B+Tree index mapping unique keys to record
/// ids. Traversals latch-crab: reads release each parent as soon as the
/// child is latched; writes keep the full ancestor path latched until the
/// structural change is complete.
pub struct BPlusTree<K> {
    bpm: Arc<BufferPoolManager>,
    header_page_id: PageId,
    leaf_max_size: usize,
    internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static,
{
    /// Create an empty tree, allocating its header page
    pub fn new(
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let (mut header_guard, header_page_id) = bpm.new_page_guarded()?;
        {
            let mut page = header_guard.write();
            write_root(&mut page.data, INVALID_PAGE_ID);
        }
        drop(header_guard);

        Ok(Self {
            bpm,
            header_page_id,
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.root_page_id()? == INVALID_PAGE_ID)
    }

    pub fn root_page_id(&self) -> Result<PageId, BTreeError> {
        let guard = self.bpm.fetch_page_read(self.header_page_id)?;
        Ok(read_root(guard.data()))
    }

    /// Point lookup. Descends with read latches, releasing each parent as
    /// soon as the child latch is held.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_page_id = read_root(header_guard.data());
        if root_page_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.bpm.fetch_page_read(root_page_id)?;
        drop(header_guard);

        loop {
            let node: BTreeNode<K> = deserialize_node(guard.data())?;
            if node.is_leaf {
                return Ok(node.find_value(key));
            }
            let child_id = node.child_at(node.find_child_index(key));
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Insert a key-value pair; returns false on a duplicate key
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_page_id = read_root(header.data());

        if root_page_id == INVALID_PAGE_ID {
            let (mut root_guard, root_id) = self.bpm.new_page_guarded()?;
            let mut root: BTreeNode<K> = BTreeNode::new_leaf(self.leaf_max_size);
            root.insert(key, rid);
            {
                let mut page = root_guard.write();
                serialize_node(&root, &mut page.data)?;
            }
            write_root(header.data_mut(), root_id);
            return Ok(true);
        }

        let mut ctx = Context {
            header,
            write_set: Vec::new(),
        };

        let mut guard = self.bpm.fetch_page_write(root_page_id)?;
        let mut node: BTreeNode<K> = deserialize_node(guard.data())?;
        while !node.is_leaf {
            let child_id = node.child_at(node.find_child_index(&key));
            ctx.write_set.push(guard);
            guard = self.bpm.fetch_page_write(child_id)?;
            node = deserialize_node(guard.data())?;
        }

        if !node.insert(key, rid) {
            return Ok(false);
        }

        if node.size() > self.leaf_max_size {
            let (mut right_guard, right_id) = self.bpm.new_page_guarded()?;
            let right = node.split_leaf();
            node.next_leaf = right_id;
            let promoted = right.key_at(0).clone();
            {
                let mut page = right_guard.write();
                serialize_node(&right, &mut page.data)?;
            }
            serialize_node(&node, guard.data_mut())?;
            let left_id = guard.page_id();
            self.insert_in_parent(&mut ctx, promoted, right_id, left_id)?;
        } else {
            serialize_node(&node, guard.data_mut())?;
        }

        Ok(true)
    }

    /// Propagate a leaf or internal split upward. `key` separates `left_id`
    /// from `right_id`; with no latched ancestor left, the tree grows a new
    /// root.
    fn insert_in_parent(
        &self,
        ctx: &mut Context,
        key: K,
        right_id: PageId,
        left_id: PageId,
    ) -> Result<(), BTreeError> {
        let mut parent_guard = match ctx.write_set.pop() {
            None => {
                let (mut root_guard, new_root_id) = self.bpm.new_page_guarded()?;
                let mut root: BTreeNode<K> = BTreeNode::new_internal(self.internal_max_size);
                root.keys = vec![key.clone(), key];
                root.children = vec![left_id, right_id];
                {
                    let mut page = root_guard.write();
                    serialize_node(&root, &mut page.data)?;
                }
                write_root(ctx.header.data_mut(), new_root_id);
                return Ok(());
            }
            Some(guard) => guard,
        };

        let mut parent: BTreeNode<K> = deserialize_node(parent_guard.data())?;
        if parent.size() == self.internal_max_size {
            let (mut new_guard, new_page_id) = self.bpm.new_page_guarded()?;
            let parent_page_id = parent_guard.page_id();
            let (right, promoted) = parent.split_insert_entry(key, right_id);
            {
                let mut page = new_guard.write();
                serialize_node(&right, &mut page.data)?;
            }
            serialize_node(&parent, parent_guard.data_mut())?;
            self.insert_in_parent(ctx, promoted, new_page_id, parent_page_id)?;
        } else {
            parent.insert_entry(key, right_id);
            serialize_node(&parent, parent_guard.data_mut())?;
        }
        ctx.write_set.push(parent_guard);
        Ok(())
    }

    /// Delete a key; returns false if the key was absent
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let header = self.bpm.fetch_page_write(self.header_page_id)?;
        let root_page_id = read_root(header.data());
        if root_page_id == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = Context {
            header,
            write_set: Vec::new(),
        };

        let mut guard = self.bpm.fetch_page_write(root_page_id)?;
        let mut node: BTreeNode<K> = deserialize_node(guard.data())?;
        while !node.is_leaf {
            let child_id = node.child_at(node.find_child_index(key));
            ctx.write_set.push(guard);
            guard = self.bpm.fetch_page_write(child_id)?;
            node = deserialize_node(guard.data())?;
        }

        self.remove_from_leaf(&mut ctx, key, guard, node)
    }

    /// Remove `key` from the latched leaf and rebalance if it underflows
    fn remove_from_leaf(
        &self,
        ctx: &mut Context,
        key: &K,
        mut guard: WritePageGuard,
        mut leaf: BTreeNode<K>,
    ) -> Result<bool, BTreeError> {
        let removed = leaf.remove(key);
        // ceil((max_size + 2) / 2) - 1: a leaf must stay at least half full
        let least_size = (self.leaf_max_size + 3) / 2 - 1;

        if ctx.write_set.is_empty() {
            // The leaf is the root: the tree empties out rather than merging
            if leaf.size() == 0 {
                let page_id = guard.page_id();
                drop(guard);
                self.bpm.delete_page(page_id)?;
                write_root(ctx.header.data_mut(), INVALID_PAGE_ID);
            } else {
                serialize_node(&leaf, guard.data_mut())?;
            }
            return Ok(removed);
        }

        if leaf.size() >= least_size {
            serialize_node(&leaf, guard.data_mut())?;
            return Ok(removed);
        }

        let Some(mut parent_guard) = ctx.write_set.pop() else {
            return Ok(removed);
        };
        let mut parent: BTreeNode<K> = deserialize_node(parent_guard.data())?;
        let index = parent.find_child_index(key);
        let (sibling_index, sibling_is_right) = if index != parent.size() - 1 {
            (index + 1, true)
        } else {
            (index - 1, false)
        };
        let sibling_id = parent.child_at(sibling_index);
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;
        let mut sibling: BTreeNode<K> = deserialize_node(sibling_guard.data())?;

        if sibling.size() > least_size {
            // Borrow one entry across and patch the separator key
            if sibling_is_right {
                let (moved_key, moved_rid) = sibling.remove_at(0);
                let end = leaf.size();
                leaf.insert_at(end, moved_key, moved_rid);
                parent.set_key_at(index + 1, sibling.key_at(0).clone());
            } else {
                let last = sibling.size() - 1;
                let (moved_key, moved_rid) = sibling.remove_at(last);
                parent.set_key_at(index, moved_key.clone());
                leaf.insert_at(0, moved_key, moved_rid);
            }
            serialize_node(&leaf, guard.data_mut())?;
            serialize_node(&sibling, sibling_guard.data_mut())?;
            serialize_node(&parent, parent_guard.data_mut())?;
            return Ok(removed);
        }

        // Merge into the left of the pair, then fix up the parent
        if sibling_is_right {
            leaf.append_from(&sibling);
            leaf.next_leaf = sibling.next_leaf;
            serialize_node(&leaf, guard.data_mut())?;
            drop(sibling_guard);
            self.bpm.delete_page(sibling_id)?;
            self.remove_from_internal(ctx, parent_guard, parent, index + 1, key)?;
        } else {
            sibling.append_from(&leaf);
            sibling.next_leaf = leaf.next_leaf;
            serialize_node(&sibling, sibling_guard.data_mut())?;
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.delete_page(page_id)?;
            self.remove_from_internal(ctx, parent_guard, parent, index, key)?;
        }
        Ok(removed)
    }

    /// Delete the entry at `index` from a latched internal node, collapsing
    /// or rebalancing upward as needed.
    fn remove_from_internal(
        &self,
        ctx: &mut Context,
        mut guard: WritePageGuard,
        mut node: BTreeNode<K>,
        index: usize,
        key: &K,
    ) -> Result<(), BTreeError> {
        node.remove_entry_at(index);

        if ctx.write_set.is_empty() {
            // The node is the root; a single remaining child replaces it
            if node.size() == 1 {
                write_root(ctx.header.data_mut(), node.child_at(0));
                let page_id = guard.page_id();
                drop(guard);
                self.bpm.delete_page(page_id)?;
            } else {
                serialize_node(&node, guard.data_mut())?;
            }
            return Ok(());
        }

        let least_size = (self.internal_max_size + 1) / 2 - 1;
        if node.size() - 1 >= least_size {
            serialize_node(&node, guard.data_mut())?;
            return Ok(());
        }

        let Some(mut parent_guard) = ctx.write_set.pop() else {
            return Ok(());
        };
        let mut parent: BTreeNode<K> = deserialize_node(parent_guard.data())?;
        let parent_index = parent.find_child_index(key);
        let (sibling_index, sibling_is_right) = if parent_index != parent.size() - 1 {
            (parent_index + 1, true)
        } else {
            (parent_index - 1, false)
        };
        let sibling_id = parent.child_at(sibling_index);
        let mut sibling_guard = self.bpm.fetch_page_write(sibling_id)?;
        let mut sibling: BTreeNode<K> = deserialize_node(sibling_guard.data())?;

        if sibling.size() - 1 > least_size {
            // Rotate one child through the parent separator
            if sibling_is_right {
                let moved_child = sibling.child_at(0);
                let moved_key = sibling.key_at(1).clone();
                sibling.remove_entry_at(0);
                let separator = parent.key_at(parent_index + 1).clone();
                parent.set_key_at(parent_index + 1, moved_key);
                let end = node.size();
                node.insert_entry_at(end, separator, moved_child);
            } else {
                let last = sibling.size() - 1;
                let moved_key = sibling.key_at(last).clone();
                let moved_child = sibling.child_at(last);
                sibling.remove_entry_at(last);
                let separator = parent.key_at(parent_index).clone();
                parent.set_key_at(parent_index, moved_key);
                node.set_key_at(0, separator.clone());
                node.insert_entry_at(0, separator, moved_child);
            }
            serialize_node(&node, guard.data_mut())?;
            serialize_node(&sibling, sibling_guard.data_mut())?;
            serialize_node(&parent, parent_guard.data_mut())?;
            return Ok(());
        }

        if sibling_is_right {
            let separator = parent.key_at(parent_index + 1).clone();
            node.merge_entries_from(&sibling, separator);
            serialize_node(&node, guard.data_mut())?;
            drop(sibling_guard);
            self.bpm.delete_page(sibling_id)?;
            self.remove_from_internal(ctx, parent_guard, parent, parent_index + 1, key)?;
        } else {
            let separator = parent.key_at(parent_index).clone();
            sibling.merge_entries_from(&node, separator);
            serialize_node(&sibling, sibling_guard.data_mut())?;
            let page_id = guard.page_id();
            drop(guard);
            self.bpm.delete_page(page_id)?;
            self.remove_from_internal(ctx, parent_guard, parent, parent_index, key)?;
        }
        Ok(())
    }

    /// Iterator positioned at the first key in the tree
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_page_id = read_root(header_guard.data());
        if root_page_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(self.bpm.clone()));
        }

        let mut guard = self.bpm.fetch_page_read(root_page_id)?;
        drop(header_guard);

        loop {
            let node: BTreeNode<K> = deserialize_node(guard.data())?;
            if node.is_leaf {
                return Ok(BTreeIterator::new(self.bpm.clone(), guard.page_id(), 0));
            }
            let child_guard = self.bpm.fetch_page_read(node.child_at(0))?;
            guard = child_guard;
        }
    }

    /// Iterator positioned at `key`, or at the next larger key if absent
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let header_guard = self.bpm.fetch_page_read(self.header_page_id)?;
        let root_page_id = read_root(header_guard.data());
        if root_page_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end(self.bpm.clone()));
        }

        let mut guard = self.bpm.fetch_page_read(root_page_id)?;
        drop(header_guard);

        loop {
            let node: BTreeNode<K> = deserialize_node(guard.data())?;
            if node.is_leaf {
                let slot = node.lower_bound(key);
                return Ok(BTreeIterator::new(self.bpm.clone(), guard.page_id(), slot));
            }
            let child_id = node.child_at(node.find_child_index(key));
            let child_guard = self.bpm.fetch_page_read(child_id)?;
            guard = child_guard;
        }
    }
}

fn read_root(data: &[u8]) -> PageId {
    LittleEndian::read_u32(&data[0..4])
}

fn write_root(data: &mut [u8], root_page_id: PageId) {
    LittleEndian::write_u32(&mut data[0..4], root_page_id);
}
