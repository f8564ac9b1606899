//! storage/record — кодирование/декодирование записей (общий формат data file и журналов).
//!
//! Layout (LE), см. consts.rs:
//! [kind u8][flags u8][tree_len u16][key_len u32][value_len u32][lsn u64][crc32c u32]
//! + tree(utf‑8) + key + value
//!
//! Декодер различает:
//! - End      — нулевой kind (преаллоцированный хвост журнала) или конец буфера;
//! - Torn     — запись не помещается в буфер (оборванный хвост после краха);
//! - Corrupt  — полная запись с неверным CRC/kind/UTF‑8.

use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{
    REC_HDR_SIZE, REC_KIND_DELETE, REC_KIND_END, REC_KIND_PUT, REC_OFF_CRC32, REC_OFF_FLAGS,
    REC_OFF_KEY_LEN, REC_OFF_KIND, REC_OFF_LSN, REC_OFF_TREE_LEN, REC_OFF_VALUE_LEN,
};

/// One mutation of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        tree: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        tree: String,
        key: Vec<u8>,
    },
}

impl WriteOp {
    pub fn put<T, K, V>(tree: T, key: K, value: V) -> Self
    where
        T: Into<String>,
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        WriteOp::Put {
            tree: tree.into(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete<T, K>(tree: T, key: K) -> Self
    where
        T: Into<String>,
        K: Into<Vec<u8>>,
    {
        WriteOp::Delete {
            tree: tree.into(),
            key: key.into(),
        }
    }

    pub fn tree(&self) -> &str {
        match self {
            WriteOp::Put { tree, .. } | WriteOp::Delete { tree, .. } => tree,
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key, .. } => key,
        }
    }

    /// Size of the record on disk.
    pub fn encoded_len(&self) -> usize {
        let value_len = match self {
            WriteOp::Put { value, .. } => value.len(),
            WriteOp::Delete { .. } => 0,
        };
        REC_HDR_SIZE + self.tree().len() + self.key().len() + value_len
    }
}

/// Append the encoded record to `out`.
pub(crate) fn encode_into(out: &mut Vec<u8>, op: &WriteOp, lsn: u64) -> Result<()> {
    let (kind, tree, key, value): (u8, &str, &[u8], &[u8]) = match op {
        WriteOp::Put { tree, key, value } => {
            (REC_KIND_PUT, tree.as_str(), key.as_slice(), value.as_slice())
        }
        WriteOp::Delete { tree, key } => (REC_KIND_DELETE, tree.as_str(), key.as_slice(), &[][..]),
    };
    if tree.is_empty() || tree.len() > u16::MAX as usize {
        return Err(anyhow!(
            "tree name length must be in 1..={} bytes, got {}",
            u16::MAX,
            tree.len()
        ));
    }
    if key.len() > u32::MAX as usize || value.len() > u32::MAX as usize {
        return Err(anyhow!(
            "record too large: key={} value={} bytes",
            key.len(),
            value.len()
        ));
    }

    let mut hdr = [0u8; REC_HDR_SIZE];
    hdr[REC_OFF_KIND] = kind;
    hdr[REC_OFF_FLAGS] = 0;
    LittleEndian::write_u16(&mut hdr[REC_OFF_TREE_LEN..REC_OFF_TREE_LEN + 2], tree.len() as u16);
    LittleEndian::write_u32(&mut hdr[REC_OFF_KEY_LEN..REC_OFF_KEY_LEN + 4], key.len() as u32);
    LittleEndian::write_u32(
        &mut hdr[REC_OFF_VALUE_LEN..REC_OFF_VALUE_LEN + 4],
        value.len() as u32,
    );
    LittleEndian::write_u64(&mut hdr[REC_OFF_LSN..REC_OFF_LSN + 8], lsn);

    let crc = record_crc(&hdr[..REC_OFF_CRC32], tree.as_bytes(), key, value);
    LittleEndian::write_u32(&mut hdr[REC_OFF_CRC32..REC_OFF_CRC32 + 4], crc);

    out.reserve(REC_HDR_SIZE + tree.len() + key.len() + value.len());
    out.extend_from_slice(&hdr);
    out.extend_from_slice(tree.as_bytes());
    out.extend_from_slice(key);
    out.extend_from_slice(value);
    Ok(())
}

#[inline]
fn record_crc(head_without_crc: &[u8], tree: &[u8], key: &[u8], value: &[u8]) -> u32 {
    let mut c = crc32c::crc32c_append(0, head_without_crc);
    c = crc32c::crc32c_append(c, tree);
    c = crc32c::crc32c_append(c, key);
    crc32c::crc32c_append(c, value)
}

#[derive(Debug)]
pub(crate) enum Decoded {
    Record { op: WriteOp, lsn: u64, len: usize },
    End,
    Torn,
    Corrupt(String),
}

/// Decode the record starting at `buf[0]`.
pub(crate) fn decode_at(buf: &[u8]) -> Decoded {
    if buf.is_empty() || buf[REC_OFF_KIND] == REC_KIND_END {
        return Decoded::End;
    }
    if buf.len() < REC_HDR_SIZE {
        return Decoded::Torn;
    }

    let kind = buf[REC_OFF_KIND];
    if kind != REC_KIND_PUT && kind != REC_KIND_DELETE {
        return Decoded::Corrupt(format!("unknown record kind {}", kind));
    }

    let tree_len = LittleEndian::read_u16(&buf[REC_OFF_TREE_LEN..REC_OFF_TREE_LEN + 2]) as usize;
    let key_len = LittleEndian::read_u32(&buf[REC_OFF_KEY_LEN..REC_OFF_KEY_LEN + 4]) as usize;
    let value_len =
        LittleEndian::read_u32(&buf[REC_OFF_VALUE_LEN..REC_OFF_VALUE_LEN + 4]) as usize;
    let lsn = LittleEndian::read_u64(&buf[REC_OFF_LSN..REC_OFF_LSN + 8]);

    let total = REC_HDR_SIZE + tree_len + key_len + value_len;
    if total > buf.len() {
        return Decoded::Torn;
    }

    let body = &buf[REC_HDR_SIZE..total];
    let (tree, rest) = body.split_at(tree_len);
    let (key, value) = rest.split_at(key_len);

    let stored = LittleEndian::read_u32(&buf[REC_OFF_CRC32..REC_OFF_CRC32 + 4]);
    let calc = record_crc(&buf[..REC_OFF_CRC32], tree, key, value);
    if stored != calc {
        return Decoded::Corrupt(format!(
            "record CRC mismatch (stored={}, calc={}, lsn={})",
            stored, calc, lsn
        ));
    }

    let tree = match std::str::from_utf8(tree) {
        Ok(s) if !s.is_empty() => s.to_string(),
        _ => return Decoded::Corrupt(format!("invalid tree name in record lsn={}", lsn)),
    };

    let op = if kind == REC_KIND_PUT {
        WriteOp::Put {
            tree,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    } else {
        if value_len != 0 {
            return Decoded::Corrupt(format!("delete record with payload at lsn={}", lsn));
        }
        WriteOp::Delete {
            tree,
            key: key.to_vec(),
        }
    };

    Decoded::Record {
        op,
        lsn,
        len: total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_back_what_encode_wrote() {
        let mut buf = Vec::new();
        let op = WriteOp::put("users", b"users/1".to_vec(), b"{\"name\":\"a\"}".to_vec());
        encode_into(&mut buf, &op, 7).unwrap();
        encode_into(&mut buf, &WriteOp::delete("users", b"users/1".to_vec()), 8).unwrap();
        assert_eq!(buf.len(), op.encoded_len() + REC_HDR_SIZE + 5 + 7);

        let first_len = match decode_at(&buf) {
            Decoded::Record { op: got, lsn, len } => {
                assert_eq!(got, op);
                assert_eq!(lsn, 7);
                len
            }
            other => panic!("unexpected {:?}", other),
        };
        match decode_at(&buf[first_len..]) {
            Decoded::Record { op, lsn, .. } => {
                assert!(matches!(op, WriteOp::Delete { .. }));
                assert_eq!(lsn, 8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn torn_and_corrupt_are_distinguished() {
        let mut buf = Vec::new();
        encode_into(&mut buf, &WriteOp::put("t", b"k".to_vec(), vec![1u8; 64]), 1).unwrap();

        assert!(matches!(decode_at(&buf[..buf.len() - 3]), Decoded::Torn));
        assert!(matches!(decode_at(&buf[..10]), Decoded::Torn));
        assert!(matches!(decode_at(&[0u8; 64]), Decoded::End));

        let last = buf.len() - 1;
        buf[last] ^= 0xFF;
        assert!(matches!(decode_at(&buf), Decoded::Corrupt(_)));
    }

    #[test]
    fn empty_tree_name_is_rejected() {
        let mut buf = Vec::new();
        assert!(encode_into(&mut buf, &WriteOp::put("", b"k".to_vec(), b"v".to_vec()), 1).is_err());
        assert!(buf.is_empty());
    }
}
