use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Deserialize};

use crate::common::types::{PageId, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;

// Node header layout:
// - is_leaf:    u8  (1 byte)
// - size:       u16 (2 bytes)
// - max_size:   u16 (2 bytes)
// - next_leaf:  u32 (4 bytes, INVALID_PAGE_ID for internals)
const NODE_HEADER_SIZE: usize = 9;

/// Serialize a B+Tree node into a page buffer
pub fn serialize_node<K>(node: &BTreeNode<K>, data: &mut [u8]) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    data.fill(0);

    data[0] = u8::from(node.is_leaf);
    LittleEndian::write_u16(&mut data[1..3], node.size() as u16);
    LittleEndian::write_u16(&mut data[3..5], node.max_size as u16);
    LittleEndian::write_u32(&mut data[5..9], node.next_leaf);

    let mut offset = NODE_HEADER_SIZE;
    for key in &node.keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    if node.is_leaf {
        for rid in &node.rids {
            if offset + 8 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_u32(&mut data[offset..offset + 4], rid.page_id);
            LittleEndian::write_u32(&mut data[offset + 4..offset + 8], rid.slot);
            offset += 8;
        }
    } else {
        for &child in &node.children {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_u32(&mut data[offset..offset + 4], child);
            offset += 4;
        }
    }

    Ok(())
}

/// Deserialize a B+Tree node from a page buffer
pub fn deserialize_node<K>(data: &[u8]) -> Result<BTreeNode<K>, BTreeError>
where
    K: for<'de> Deserialize<'de> + Clone + Ord,
{
    let is_leaf = data[0] == 1;
    let size = LittleEndian::read_u16(&data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&data[3..5]) as usize;
    let next_leaf: PageId = LittleEndian::read_u32(&data[5..9]);

    let mut node = if is_leaf {
        BTreeNode::new_leaf(max_size)
    } else {
        BTreeNode::new_internal(max_size)
    };
    node.next_leaf = next_leaf;

    let mut offset = NODE_HEADER_SIZE;
    for _ in 0..size {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key_len = LittleEndian::read_u16(&data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + key_len > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key: K = bincode::deserialize(&data[offset..offset + key_len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        node.keys.push(key);
        offset += key_len;
    }

    if is_leaf {
        for _ in 0..size {
            if offset + 8 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            let page_id = LittleEndian::read_u32(&data[offset..offset + 4]);
            let slot = LittleEndian::read_u32(&data[offset + 4..offset + 8]);
            node.rids.push(Rid::new(page_id, slot));
            offset += 8;
        }
    } else {
        for _ in 0..size {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            node.children.push(LittleEndian::read_u32(&data[offset..offset + 4]));
            offset += 4;
        }
    }

    Ok(node)
}
