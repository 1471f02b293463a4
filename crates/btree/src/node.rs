//! Node payload encoding.
//!
//! Both node kinds are framed the same way once decoded: a one-byte kind
//! tag followed by a flat sequence of entries. A leaf entry is a key/value
//! pair with a packed 12-bit/28-bit length pair ahead of it (matching the
//! length encoding `couchstore-storage::int_codec` already provides for
//! exactly this purpose); an interior entry is a separator key plus a
//! [`NodePointer`].

use crate::error::{BtreeError, Result};
use crate::pointer::NodePointer;
use couchstore_storage::int_codec::{
    get_packed_12_28, get_u16, get_u48, put_packed_12_28, put_u16, put_u48,
};

const KIND_INTERIOR: u8 = 0x00;
const KIND_LEAF: u8 = 0x01;

/// A node is internally either a leaf (sorted key/value pairs) or an
/// interior node (sorted separator keys + child pointers).
#[derive(Debug, Clone)]
pub enum NodeContents {
    Leaf(Vec<(Vec<u8>, Vec<u8>)>),
    Interior(Vec<NodePointer>),
}

impl NodeContents {
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeContents::Leaf(_))
    }

    /// Highest key present in the node; used as the separator key for the
    /// pointer a parent keeps for this subtree.
    pub fn highest_key(&self) -> Option<&[u8]> {
        match self {
            NodeContents::Leaf(entries) => entries.last().map(|(k, _)| k.as_slice()),
            NodeContents::Interior(pointers) => pointers.last().map(|p| p.key.as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            NodeContents::Leaf(entries) => entries.len(),
            NodeContents::Interior(pointers) => pointers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn encode_node(contents: &NodeContents) -> Vec<u8> {
    let mut buf = Vec::new();
    match contents {
        NodeContents::Leaf(entries) => {
            buf.push(KIND_LEAF);
            for (key, value) in entries {
                put_packed_12_28(&mut buf, key.len() as u16, value.len() as u32);
                buf.extend_from_slice(key);
                buf.extend_from_slice(value);
            }
        }
        NodeContents::Interior(pointers) => {
            buf.push(KIND_INTERIOR);
            for p in pointers {
                put_u16(&mut buf, p.key.len() as u16);
                buf.extend_from_slice(&p.key);
                put_u48(&mut buf, p.offset);
                put_u48(&mut buf, p.subtree_size);
                put_u16(&mut buf, p.reduce_value.len() as u16);
                buf.extend_from_slice(&p.reduce_value);
            }
        }
    }
    buf
}

pub fn decode_node(bytes: &[u8]) -> Result<NodeContents> {
    if bytes.is_empty() {
        return Err(BtreeError::Corrupt("empty node payload".into()));
    }
    let kind = bytes[0];
    let mut pos = 1usize;

    match kind {
        KIND_LEAF => {
            let mut entries = Vec::new();
            while pos < bytes.len() {
                if pos + 5 > bytes.len() {
                    return Err(BtreeError::Corrupt("truncated leaf entry length".into()));
                }
                let (key_len, value_len) = get_packed_12_28(&bytes[pos..pos + 5]);
                pos += 5;
                let (key_len, value_len) = (key_len as usize, value_len as usize);
                if pos + key_len + value_len > bytes.len() {
                    return Err(BtreeError::Corrupt("truncated leaf entry body".into()));
                }
                let key = bytes[pos..pos + key_len].to_vec();
                pos += key_len;
                let value = bytes[pos..pos + value_len].to_vec();
                pos += value_len;
                entries.push((key, value));
            }
            Ok(NodeContents::Leaf(entries))
        }
        KIND_INTERIOR => {
            let mut pointers = Vec::new();
            while pos < bytes.len() {
                if pos + 2 > bytes.len() {
                    return Err(BtreeError::Corrupt("truncated interior key length".into()));
                }
                let key_len = get_u16(&bytes[pos..pos + 2]) as usize;
                pos += 2;
                if pos + key_len + 6 + 6 + 2 > bytes.len() {
                    return Err(BtreeError::Corrupt("truncated interior entry".into()));
                }
                let key = bytes[pos..pos + key_len].to_vec();
                pos += key_len;
                let offset = get_u48(&bytes[pos..pos + 6]);
                pos += 6;
                let subtree_size = get_u48(&bytes[pos..pos + 6]);
                pos += 6;
                let reduce_len = get_u16(&bytes[pos..pos + 2]) as usize;
                pos += 2;
                if pos + reduce_len > bytes.len() {
                    return Err(BtreeError::Corrupt("truncated interior reduce value".into()));
                }
                let reduce_value = bytes[pos..pos + reduce_len].to_vec();
                pos += reduce_len;
                pointers.push(NodePointer::new(key, offset, subtree_size, reduce_value));
            }
            Ok(NodeContents::Interior(pointers))
        }
        other => Err(BtreeError::Corrupt(format!("unknown node kind tag {other:#04x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_roundtrip() {
        let contents = NodeContents::Leaf(vec![
            (b"apple".to_vec(), b"red".to_vec()),
            (b"banana".to_vec(), b"yellow".to_vec()),
        ]);
        let encoded = encode_node(&contents);
        let decoded = decode_node(&encoded).unwrap();
        match decoded {
            NodeContents::Leaf(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, b"apple");
                assert_eq!(entries[1].1, b"yellow");
            }
            _ => panic!("expected leaf"),
        }
    }

    #[test]
    fn interior_roundtrip() {
        let contents = NodeContents::Interior(vec![
            NodePointer::new(b"m".to_vec(), 4096, 8192, vec![1, 2, 3]),
            NodePointer::new(b"z".to_vec(), 12288, 4096, vec![4, 5]),
        ]);
        let encoded = encode_node(&contents);
        let decoded = decode_node(&encoded).unwrap();
        match decoded {
            NodeContents::Interior(pointers) => {
                assert_eq!(pointers.len(), 2);
                assert_eq!(pointers[0].offset, 4096);
                assert_eq!(pointers[1].reduce_value, vec![4, 5]);
            }
            _ => panic!("expected interior"),
        }
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let mut encoded = encode_node(&NodeContents::Leaf(vec![(b"k".to_vec(), b"v".to_vec())]));
        encoded.truncate(encoded.len() - 1);
        assert!(decode_node(&encoded).is_err());
    }
}
