//! Shard index parsing and partial-range decompression
//!
//! A sharded payload splits an entry's uncompressed contents into
//! fixed-size shards, each compressed independently, so a byte range
//! can be served by decoding only the shards that cover it. The
//! `VSHF` header carries the shard count, the total uncompressed
//! size, and `shard_count + 1` cumulative compressed offsets into
//! the packed-shards region.

use tracing::trace;

use crate::error::{Result, VarkError};
use crate::format::{self, SHARD_MAGIC};
use crate::payload::decompress_block;

/// Parsed shard header of one sharded payload.
#[derive(Debug, Clone)]
pub struct ShardIndex {
    /// Uncompressed bytes per shard (the last shard may be shorter)
    shard_size: u32,
    /// Total uncompressed size of the entry
    total_size: u64,
    /// `shard_count + 1` cumulative compressed offsets; empty when
    /// the payload holds zero shards
    offsets: Vec<u64>,
    /// Byte offset of the packed-shards region within the payload
    data_offset: usize,
}

impl ShardIndex {
    /// Parse the `VSHF` header at the start of `payload`.
    ///
    /// `shard_size` comes from the entry's sidecar record and must be
    /// nonzero. A zero-length payload is a valid empty entry, as is a
    /// `shard_count = 0` header with or without its single offset
    /// cell.
    pub fn parse(payload: &[u8], shard_size: u32) -> Result<Self> {
        debug_assert!(shard_size > 0);

        if payload.is_empty() {
            return Ok(Self {
                shard_size,
                total_size: 0,
                offsets: Vec::new(),
                data_offset: 0,
            });
        }
        if payload.len() < 16 {
            return Err(VarkError::Truncated {
                expected: 16,
                actual: payload.len() as u64,
            });
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&payload[0..4]);
        if magic != SHARD_MAGIC {
            return Err(VarkError::BadMagic {
                expected: SHARD_MAGIC,
                actual: magic,
            });
        }

        let shard_count = format::u32_at(payload, 4);
        let total_size = format::u64_at(payload, 8);
        trace!("Shard header: {shard_count} shards, {total_size} uncompressed bytes");

        if shard_count == 0 {
            if total_size != 0 {
                return Err(VarkError::DecompressFailed(format!(
                    "zero shards cannot hold {total_size} bytes"
                )));
            }
            return Ok(Self {
                shard_size,
                total_size: 0,
                offsets: Vec::new(),
                data_offset: payload.len(),
            });
        }

        if u64::from(shard_count) * u64::from(shard_size) < total_size {
            return Err(VarkError::DecompressFailed(format!(
                "{shard_count} shards of {shard_size} bytes cannot hold {total_size} bytes"
            )));
        }

        let cells = shard_count as usize + 1;
        let data_offset = 16 + 8 * cells;
        if payload.len() < data_offset {
            return Err(VarkError::Truncated {
                expected: data_offset as u64,
                actual: payload.len() as u64,
            });
        }

        let mut offsets = Vec::with_capacity(cells);
        for i in 0..cells {
            offsets.push(format::u64_at(payload, 16 + 8 * i));
        }
        if offsets[0] != 0 || offsets.windows(2).any(|w| w[0] > w[1]) {
            return Err(VarkError::DecompressFailed(
                "shard offset array is not monotonic from zero".to_string(),
            ));
        }
        let packed_len = (payload.len() - data_offset) as u64;
        if offsets[cells - 1] > packed_len {
            return Err(VarkError::Truncated {
                expected: data_offset as u64 + offsets[cells - 1],
                actual: payload.len() as u64,
            });
        }

        Ok(Self {
            shard_size,
            total_size,
            offsets,
            data_offset,
        })
    }

    /// Number of shards in the payload.
    pub fn shard_count(&self) -> u32 {
        self.offsets.len().saturating_sub(1) as u32
    }

    /// Total uncompressed size of the entry.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Compressed span of shard `i` within the packed-shards region.
    fn shard_span(&self, i: usize) -> (usize, usize) {
        (self.offsets[i] as usize, self.offsets[i + 1] as usize)
    }

    /// Uncompressed length of shard `i`.
    fn shard_len(&self, i: usize) -> usize {
        let start = i as u64 * u64::from(self.shard_size);
        u64::from(self.shard_size).min(self.total_size - start) as usize
    }
}

/// Decompress the byte range `[offset, offset + size)` of a sharded
/// payload.
///
/// Every shard covering the range is decoded whole into `scratch`
/// (reused across calls to keep hot paths allocation-free), then the
/// requested window is sliced out.
///
/// # Errors
///
/// Returns [`VarkError::RangeViolation`] when the range extends past
/// the entry's uncompressed size.
pub fn decompress_range(
    payload: &[u8],
    index: &ShardIndex,
    offset: u64,
    size: u64,
    scratch: &mut Vec<u8>,
) -> Result<Vec<u8>> {
    match offset.checked_add(size) {
        Some(end) if end <= index.total_size => {}
        _ => {
            return Err(VarkError::RangeViolation {
                offset,
                size,
                total: index.total_size,
            });
        }
    }
    if size == 0 {
        return Ok(Vec::new());
    }

    let shard_size = u64::from(index.shard_size);
    let first = offset / shard_size;
    let last = (offset + size - 1) / shard_size;
    trace!("Range [{offset}, {}) covered by shards {first}..={last}", offset + size);

    scratch.resize((last - first + 1) as usize * index.shard_size as usize, 0);
    let data = &payload[index.data_offset..];
    for i in first..=last {
        let (span_start, span_end) = index.shard_span(i as usize);
        let shard_len = index.shard_len(i as usize);
        let at = (i - first) as usize * index.shard_size as usize;
        decompress_block(&data[span_start..span_end], &mut scratch[at..at + shard_len])?;
    }

    let skip = (offset - first * shard_size) as usize;
    Ok(scratch[skip..skip + size as usize].to_vec())
}

/// Decompress a whole sharded payload straight into an exactly-sized
/// buffer, shard by shard.
pub fn decompress_all(payload: &[u8], index: &ShardIndex) -> Result<Vec<u8>> {
    let mut out = vec![0u8; index.total_size as usize];
    let data = &payload[index.data_offset..];
    let mut pos = 0usize;
    for i in 0..index.shard_count() as usize {
        let (span_start, span_end) = index.shard_span(i);
        let shard_len = index.shard_len(i);
        decompress_block(&data[span_start..span_end], &mut out[pos..pos + shard_len])?;
        pos += shard_len;
    }
    if pos != out.len() {
        return Err(VarkError::DecompressFailed(format!(
            "shards produced {pos} of {} bytes",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::write_sharded;

    const SHARD: u32 = 16;

    fn sharded(data: &[u8]) -> Vec<u8> {
        let mut payload = Vec::new();
        write_sharded(&mut payload, data, SHARD).unwrap();
        payload
    }

    #[test]
    fn parse_round_trip() {
        let data: Vec<u8> = (0u8..=255).collect();
        let payload = sharded(&data);
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        assert_eq!(index.shard_count(), 16);
        assert_eq!(index.total_size(), 256);
        assert_eq!(decompress_all(&payload, &index).unwrap(), data);
    }

    #[test]
    fn parse_rejects_bad_magic() {
        let mut payload = sharded(b"0123456789abcdef0123");
        payload[0] = b'X';
        assert!(matches!(
            ShardIndex::parse(&payload, SHARD),
            Err(VarkError::BadMagic { .. })
        ));
    }

    #[test]
    fn empty_payload_is_valid() {
        let index = ShardIndex::parse(&[], SHARD).unwrap();
        assert_eq!(index.shard_count(), 0);
        assert_eq!(index.total_size(), 0);
        assert!(decompress_all(&[], &index).unwrap().is_empty());
    }

    #[test]
    fn zero_shard_header_without_offset_cell() {
        // A producer may omit the offset array when shard_count = 0
        let mut payload = Vec::new();
        payload.extend_from_slice(b"VSHF");
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.extend_from_slice(&0u64.to_le_bytes());
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        assert_eq!(index.shard_count(), 0);
        assert!(decompress_all(&payload, &index).unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_non_monotonic_offsets() {
        let data = vec![7u8; 40];
        let mut payload = sharded(&data);
        // Swap the second offset cell to break monotonicity
        payload[24..32].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            ShardIndex::parse(&payload, SHARD),
            Err(VarkError::DecompressFailed(_) | VarkError::Truncated { .. })
        ));
    }

    #[test]
    fn parse_rejects_truncated_offset_array() {
        let payload = sharded(&vec![7u8; 40]);
        assert!(matches!(
            ShardIndex::parse(&payload[..20], SHARD),
            Err(VarkError::Truncated { .. })
        ));
    }

    #[test]
    fn range_within_single_shard() {
        let data: Vec<u8> = (0u8..48).collect();
        let payload = sharded(&data);
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        let mut scratch = Vec::new();
        let got = decompress_range(&payload, &index, 18, 10, &mut scratch).unwrap();
        assert_eq!(got, &data[18..28]);
    }

    #[test]
    fn range_across_shard_boundary() {
        let data: Vec<u8> = (0..100u8).cycle().take(50).collect();
        let payload = sharded(&data);
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        let mut scratch = Vec::new();
        for k in 1..=8 {
            let got = decompress_range(&payload, &index, 16 - k, 2 * k, &mut scratch).unwrap();
            assert_eq!(got, &data[(16 - k) as usize..(16 + k) as usize]);
        }
    }

    #[test]
    fn zero_size_range_is_empty() {
        let payload = sharded(b"0123456789abcdef");
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        let mut scratch = Vec::new();
        assert!(decompress_range(&payload, &index, 16, 0, &mut scratch)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn out_of_range_request_fails() {
        let payload = sharded(b"0123456789abcdef");
        let index = ShardIndex::parse(&payload, SHARD).unwrap();
        let mut scratch = Vec::new();
        assert!(matches!(
            decompress_range(&payload, &index, 16, 1, &mut scratch),
            Err(VarkError::RangeViolation { .. })
        ));
        assert!(matches!(
            decompress_range(&payload, &index, u64::MAX, 2, &mut scratch),
            Err(VarkError::RangeViolation { .. })
        ));
    }
}
