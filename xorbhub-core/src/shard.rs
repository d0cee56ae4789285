//! Binary shard format
//!
//! A shard is an immutable snapshot of the block→xorb placement table.
//!
//! Layout (all integers big-endian):
//! ```text
//! +--------+---------+-------+----------------------------+
//! | "XSHD" | version | count | count × 80-byte entries    |
//! | 4 B    | u32     | u32   |                            |
//! +--------+---------+-------+----------------------------+
//! entry = block digest (32) | xorb id (32) | offset u64 | length u64
//! ```

use crate::error::{Result, XorbError};
use crate::hash::{ContentHash, HASH_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const SHARD_MAGIC: &[u8; 4] = b"XSHD";
pub const SHARD_VERSION: u32 = 1;
pub const SHARD_HEADER_SIZE: usize = 12;
pub const SHARD_ENTRY_SIZE: usize = 2 * HASH_LEN + 16;

/// One placement record inside a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardEntry {
    pub block: ContentHash,
    pub xorb: ContentHash,
    pub offset: u64,
    pub length: u64,
}

impl ShardEntry {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(self.block.as_bytes());
        buf.put_slice(self.xorb.as_bytes());
        buf.put_u64(self.offset);
        buf.put_u64(self.length);
    }

    fn read(mut raw: &[u8]) -> Result<Self> {
        let block = ContentHash::from_slice(&raw[..HASH_LEN])?;
        raw.advance(HASH_LEN);
        let xorb = ContentHash::from_slice(&raw[..HASH_LEN])?;
        raw.advance(HASH_LEN);
        let offset = raw.get_u64();
        let length = raw.get_u64();
        Ok(Self {
            block,
            xorb,
            offset,
            length,
        })
    }
}

fn header(count: u32, buf: &mut BytesMut) {
    buf.put_slice(SHARD_MAGIC);
    buf.put_u32(SHARD_VERSION);
    buf.put_u32(count);
}

fn checked_count(entries: usize) -> Result<u32> {
    u32::try_from(entries).map_err(|_| {
        XorbError::SerializationInvariant(format!("{} entries exceed u32 count", entries))
    })
}

/// Serialize entries in the given order
pub fn encode(entries: &[ShardEntry]) -> Result<Bytes> {
    let count = checked_count(entries.len())?;
    let mut buf = BytesMut::with_capacity(SHARD_HEADER_SIZE + entries.len() * SHARD_ENTRY_SIZE);
    header(count, &mut buf);
    for entry in entries {
        entry.put(&mut buf);
    }
    Ok(buf.freeze())
}

/// Validate a shard and return its declared entry count
pub fn entry_count(data: &[u8]) -> Result<u32> {
    if data.len() < SHARD_HEADER_SIZE {
        return Err(XorbError::SerializationInvariant(format!(
            "shard truncated: {} bytes",
            data.len()
        )));
    }
    if &data[..4] != SHARD_MAGIC {
        return Err(XorbError::SerializationInvariant("bad shard magic".into()));
    }
    let mut rest = &data[4..SHARD_HEADER_SIZE];
    let version = rest.get_u32();
    if version != SHARD_VERSION {
        return Err(XorbError::SerializationInvariant(format!(
            "unsupported shard version {}",
            version
        )));
    }
    let count = rest.get_u32();
    let expected = SHARD_HEADER_SIZE + count as usize * SHARD_ENTRY_SIZE;
    if data.len() != expected {
        return Err(XorbError::SerializationInvariant(format!(
            "shard declares {} entries ({} bytes) but is {} bytes",
            count,
            expected,
            data.len()
        )));
    }
    Ok(count)
}

/// The entry bytes of a validated shard, without the header
pub fn entry_region(data: &[u8]) -> Result<&[u8]> {
    entry_count(data)?;
    Ok(&data[SHARD_HEADER_SIZE..])
}

/// Parse every entry of a shard
pub fn decode(data: &[u8]) -> Result<Vec<ShardEntry>> {
    entry_region(data)?
        .chunks_exact(SHARD_ENTRY_SIZE)
        .map(ShardEntry::read)
        .collect()
}

/// Merge shards by concatenating their entry regions under a fresh header.
///
/// Sources are validated first; entries are kept in source order.
pub fn merge<S: AsRef<[u8]>>(sources: &[S]) -> Result<Bytes> {
    let regions = sources
        .iter()
        .map(|s| entry_region(s.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let total: usize = regions.iter().map(|r| r.len()).sum();
    let count = checked_count(total / SHARD_ENTRY_SIZE)?;

    let mut buf = BytesMut::with_capacity(SHARD_HEADER_SIZE + total);
    header(count, &mut buf);
    for region in regions {
        buf.put_slice(region);
    }
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: u8, offset: u64, length: u64) -> ShardEntry {
        ShardEntry {
            block: ContentHash::compute(&[n]),
            xorb: ContentHash::compute(b"xorb"),
            offset,
            length,
        }
    }

    #[test]
    fn test_layout_is_exact() {
        let entries = vec![entry(1, 0, 10), entry(2, 10, 5)];
        let data = encode(&entries).unwrap();

        assert_eq!(data.len(), 12 + 2 * 80);
        assert_eq!(&data[..4], b"XSHD");
        assert_eq!(&data[4..8], &1u32.to_be_bytes());
        assert_eq!(&data[8..12], &2u32.to_be_bytes());
        assert_eq!(&data[12..44], entries[0].block.as_bytes());
        assert_eq!(&data[76..84], &0u64.to_be_bytes());
        assert_eq!(&data[84..92], &10u64.to_be_bytes());
        assert_eq!(&data[164..], &5u64.to_be_bytes());
        assert_eq!(decode(&data).unwrap(), entries);
    }

    #[test]
    fn test_empty_shard() {
        let data = encode(&[]).unwrap();
        assert_eq!(data.len(), SHARD_HEADER_SIZE);
        assert_eq!(entry_count(&data).unwrap(), 0);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let data = encode(&[entry(1, 0, 1)]).unwrap();

        let mut bad_magic = data.to_vec();
        bad_magic[0] = b'Y';
        assert!(matches!(decode(&bad_magic), Err(XorbError::SerializationInvariant(_))));

        let mut bad_version = data.to_vec();
        bad_version[7] = 2;
        assert!(decode(&bad_version).is_err());

        assert!(decode(&data[..data.len() - 1]).is_err());
        assert!(decode(&data[..8]).is_err());

        let mut extra = data.to_vec();
        extra.push(0);
        assert!(decode(&extra).is_err());
    }

    #[test]
    fn test_merge_preserves_all_entries() {
        let a = encode(&[entry(1, 0, 1), entry(2, 1, 1)]).unwrap();
        let b = encode(&[entry(3, 0, 4)]).unwrap();
        let c = encode(&[]).unwrap();

        let merged = merge(&[a.clone(), b.clone(), c]).unwrap();
        assert_eq!(entry_count(&merged).unwrap(), 3);

        let mut expected = decode(&a).unwrap();
        expected.extend(decode(&b).unwrap());
        assert_eq!(decode(&merged).unwrap(), expected);
    }

    #[test]
    fn test_merge_rejects_invalid_source() {
        let good = encode(&[entry(1, 0, 1)]).unwrap();
        let bad = Bytes::from_static(b"nope");
        assert!(merge(&[good, bad]).is_err());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let entries = vec![entry(9, 0, 3), entry(8, 3, 3)];
        assert_eq!(encode(&entries).unwrap(), encode(&entries).unwrap());
    }
}
