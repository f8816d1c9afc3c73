//! Per-entry payload codecs
//!
//! An entry's on-disk payload is one of two formats:
//!
//! - *plain*: `u64 uncompressed_size` followed by one compressed blob;
//! - *sharded*: a `VSHF` header (`u32 shard_count`,
//!   `u64 total_uncompressed_size`), `shard_count + 1` cumulative
//!   compressed offsets, then the independently-compressed shards
//!   packed back to back.
//!
//! Empty inputs never reach the compressor: an empty plain payload is
//! the 8-byte size header alone, and an empty sharded payload has
//! `shard_count = 0` with a single `0` offset cell.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use tracing::trace;

use crate::error::{Result, VarkError};
use crate::format::{self, SHARD_MAGIC};

/// Compress one block into a bound-sized buffer, shrunk to the
/// actual compressed length.
///
/// # Errors
///
/// Returns [`VarkError::CompressRefused`] when the compressor
/// produces no output for a non-empty input.
pub fn compress_block(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let bound = lz4_flex::block::get_maximum_output_size(data.len());
    let mut out = vec![0u8; bound];
    let written = lz4_flex::block::compress_into(data, &mut out)
        .map_err(|_| VarkError::CompressRefused(data.len()))?;
    if written == 0 {
        return Err(VarkError::CompressRefused(data.len()));
    }
    out.truncate(written);
    Ok(out)
}

/// Decompress one block into an exactly-sized output slice.
///
/// # Errors
///
/// Returns [`VarkError::DecompressFailed`] when the decompressor
/// fails or produces a length other than `out.len()`.
pub fn decompress_block(src: &[u8], out: &mut [u8]) -> Result<()> {
    if out.is_empty() && src.is_empty() {
        return Ok(());
    }
    let produced = lz4_flex::block::decompress_into(src, out)
        .map_err(|e| VarkError::DecompressFailed(e.to_string()))?;
    if produced != out.len() {
        return Err(VarkError::DecompressFailed(format!(
            "expected {} bytes, produced {produced}",
            out.len()
        )));
    }
    Ok(())
}

/// Write a plain payload: u64 uncompressed size plus compressed
/// bytes. Returns the payload span in bytes.
pub fn write_plain<W: Write>(writer: &mut W, data: &[u8]) -> Result<u64> {
    writer.write_u64::<LittleEndian>(data.len() as u64)?;
    if data.is_empty() {
        return Ok(8);
    }
    let compressed = compress_block(data)?;
    writer.write_all(&compressed)?;
    trace!(
        "Plain payload: {} bytes -> {} compressed",
        data.len(),
        compressed.len()
    );
    Ok(8 + compressed.len() as u64)
}

/// Write a sharded payload: `VSHF` header, cumulative offset array,
/// packed shards. Each shard of `shard_size` uncompressed bytes is
/// compressed independently. Returns the payload span in bytes.
pub fn write_sharded<W: Write>(writer: &mut W, data: &[u8], shard_size: u32) -> Result<u64> {
    let mut packed = Vec::new();
    let mut offsets: Vec<u64> = Vec::with_capacity(data.len() / shard_size as usize + 2);
    offsets.push(0);
    for shard in data.chunks(shard_size as usize) {
        let compressed = compress_block(shard)?;
        packed.extend_from_slice(&compressed);
        offsets.push(packed.len() as u64);
    }
    let shard_count = (offsets.len() - 1) as u32;

    writer.write_all(&SHARD_MAGIC)?;
    writer.write_u32::<LittleEndian>(shard_count)?;
    writer.write_u64::<LittleEndian>(data.len() as u64)?;
    for offset in &offsets {
        writer.write_u64::<LittleEndian>(*offset)?;
    }
    writer.write_all(&packed)?;

    trace!(
        "Sharded payload: {} bytes in {shard_count} shards -> {} compressed",
        data.len(),
        packed.len()
    );
    Ok(16 + 8 * offsets.len() as u64 + packed.len() as u64)
}

/// Decode a plain payload into its uncompressed bytes.
pub fn decode_plain(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < 8 {
        return Err(VarkError::Truncated {
            expected: 8,
            actual: payload.len() as u64,
        });
    }
    let uncompressed_size = format::u64_at(payload, 0) as usize;
    let mut out = vec![0u8; uncompressed_size];
    if uncompressed_size > 0 {
        decompress_block(&payload[8..], &mut out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog, twice over";
        let compressed = compress_block(data).unwrap();
        let mut out = vec![0u8; data.len()];
        decompress_block(&compressed, &mut out).unwrap();
        assert_eq!(&out, data);
    }

    #[test]
    fn block_length_mismatch_fails() {
        let compressed = compress_block(b"some test input bytes").unwrap();
        let mut short = vec![0u8; 4];
        assert!(matches!(
            decompress_block(&compressed, &mut short),
            Err(VarkError::DecompressFailed(_))
        ));
    }

    #[test]
    fn plain_round_trip() {
        let data = b"Small text file";
        let mut payload = Vec::new();
        let span = write_plain(&mut payload, data).unwrap();
        assert_eq!(span, payload.len() as u64);
        assert_eq!(format::u64_at(&payload, 0), data.len() as u64);
        assert_eq!(decode_plain(&payload).unwrap(), data);
    }

    #[test]
    fn plain_empty_is_header_only() {
        let mut payload = Vec::new();
        let span = write_plain(&mut payload, &[]).unwrap();
        assert_eq!(span, 8);
        assert_eq!(payload, 0u64.to_le_bytes());
        assert!(decode_plain(&payload).unwrap().is_empty());
    }

    #[test]
    fn plain_truncated_header_fails() {
        assert!(matches!(
            decode_plain(&[1, 2, 3]),
            Err(VarkError::Truncated { .. })
        ));
    }

    #[test]
    fn sharded_layout() {
        // Three shards: 16 + 16 + 4 uncompressed bytes
        let data: Vec<u8> = (0u8..36).collect();
        let mut payload = Vec::new();
        let span = write_sharded(&mut payload, &data, 16).unwrap();
        assert_eq!(span, payload.len() as u64);

        assert_eq!(&payload[0..4], b"VSHF");
        assert_eq!(format::u32_at(&payload, 4), 3);
        assert_eq!(format::u64_at(&payload, 8), 36);

        // Four cumulative offsets, starting at zero, non-decreasing,
        // final cell equal to the packed-shards length
        let offsets: Vec<u64> = (0..4).map(|i| format::u64_at(&payload, 16 + 8 * i)).collect();
        assert_eq!(offsets[0], 0);
        assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(offsets[3], (payload.len() - 16 - 32) as u64);
    }

    #[test]
    fn sharded_empty_has_zero_shards() {
        let mut payload = Vec::new();
        let span = write_sharded(&mut payload, &[], 16).unwrap();
        // Magic + count + total size + the single zero offset cell
        assert_eq!(span, 24);
        assert_eq!(format::u32_at(&payload, 4), 0);
        assert_eq!(format::u64_at(&payload, 8), 0);
        assert_eq!(format::u64_at(&payload, 16), 0);
    }
}
