use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{Page, PageId, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, NodeType};

// Node header layout:
// - page_type: u8 (1 = leaf, 2 = internal)
// - size: u16 (keys for leaves, children for internals)
// - max_size: u16
// - parent_page_id: i32
// - page_id: i32
// - next_page_id: i32 (leaf chain; -1 elsewhere)
pub(crate) const NODE_HEADER_SIZE: usize = 17;

const LEAF_TYPE: u8 = 1;
const INTERNAL_TYPE: u8 = 2;

/// Serialize a node into its page
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);

    page.data[0] = match node.node_type {
        NodeType::Leaf => LEAF_TYPE,
        NodeType::Internal => INTERNAL_TYPE,
    };
    LittleEndian::write_u16(&mut page.data[1..3], node.size() as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.max_size as u16);
    LittleEndian::write_i32(&mut page.data[5..9], node.parent_page_id);
    LittleEndian::write_i32(&mut page.data[9..13], node.page_id);
    LittleEndian::write_i32(&mut page.data[13..17], node.next_page_id);

    let mut offset = NODE_HEADER_SIZE;

    for key in &node.keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    match node.node_type {
        NodeType::Leaf => {
            for value in &node.values {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], value.page_id);
                offset += 4;
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], value.slot);
                offset += 4;
            }
        }
        NodeType::Internal => {
            for child in &node.children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_i32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize the node stored in a page
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[5..9]);
    let page_id = LittleEndian::read_i32(&page.data[9..13]);
    let next_page_id = LittleEndian::read_i32(&page.data[13..17]);

    let (node_type, key_count) = match page.data[0] {
        LEAF_TYPE => (NodeType::Leaf, size),
        INTERNAL_TYPE => (NodeType::Internal, size.saturating_sub(1)),
        _ => return Err(BTreeError::InvalidPageFormat),
    };

    let mut offset = NODE_HEADER_SIZE;
    let mut keys = Vec::with_capacity(key_count);
    for _ in 0..key_count {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + len > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key = bincode::deserialize(&page.data[offset..offset + len])
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        offset += len;
        keys.push(key);
    }

    let mut node = BTreeNode {
        node_type,
        page_id,
        parent_page_id,
        max_size,
        keys,
        values: Vec::new(),
        children: Vec::new(),
        next_page_id,
    };

    match node_type {
        NodeType::Leaf => {
            node.values.reserve(size);
            for _ in 0..size {
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                let rid_page = LittleEndian::read_i32(&page.data[offset..offset + 4]);
                offset += 4;
                let slot = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                offset += 4;
                node.values.push(Rid::new(rid_page, slot));
            }
        }
        NodeType::Internal => {
            node.children.reserve(size);
            for _ in 0..size {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::InvalidPageFormat);
                }
                node.children
                    .push(LittleEndian::read_i32(&page.data[offset..offset + 4]));
                offset += 4;
            }
        }
    }

    Ok(node)
}

/// Overwrite the parent pointer field in place, leaving the rest of the
/// node untouched
pub(crate) fn patch_parent_pointer(page: &mut Page, parent_page_id: PageId) {
    LittleEndian::write_i32(&mut page.data[5..9], parent_page_id);
}

/// How many entries of `key_width` encoded bytes fit a leaf page, with the
/// same headroom the other node kinds need. A sensible default order for
/// callers that do not pick one.
pub fn suggested_order(key_width: usize) -> usize {
    // Per entry: length prefix + key + rid
    let per_entry = 2 + key_width + 8;
    let usable = PAGE_SIZE - NODE_HEADER_SIZE;
    (usable / per_entry).max(3)
}
