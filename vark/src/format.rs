//! On-disk layout: fixed header, trailing file table, shard-size sidecar
//!
//! All integers are little-endian. Strings are a u32 length prefix
//! followed by that many UTF-8 bytes, no terminator.
//!
//! Layout of an archive file:
//!
//! ```text
//! [0..4)    magic "VARK"
//! [4..12)   table_offset : u64
//! [12..)    packed per-entry payloads (see payload module)
//! table_offset:
//!           u64 count, then per entry: string path, u64 offset,
//!           u64 size, u64 hash
//! after the table (only when count > 0):
//!           "VSHD", u64 shard_entry_count, u32 shard_size[count]
//! ```
//!
//! The sidecar is an extension block added after the table format was
//! fixed. Loaders that do not find its magic, or that find a count
//! that disagrees with the table, treat every entry as plain.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};
use tracing::trace;

use crate::error::{Result, VarkError};

/// Archive magic at byte 0
pub const VARK_MAGIC: [u8; 4] = *b"VARK";

/// Sharded payload magic
pub const SHARD_MAGIC: [u8; 4] = *b"VSHF";

/// Shard-size sidecar magic
pub const SIDECAR_MAGIC: [u8; 4] = *b"VSHD";

/// Fixed header size: magic (4) + table offset (8)
pub const HEADER_SIZE: u64 = 12;

/// Default shard size for sharded appends: 128 KiB
pub const DEFAULT_SHARD_SIZE: u32 = 128 * 1024;

/// One logical file inside an archive.
///
/// `shard_size == 0` means a plain payload; nonzero means a sharded
/// payload split into chunks of that many uncompressed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarkEntry {
    /// Logical path as stored, always with `/` separators
    pub path: String,
    /// Byte offset of the payload within the archive
    pub offset: u64,
    /// Byte length of the payload, framing included
    pub size: u64,
    /// FNV-1a of the uncompressed contents
    pub hash: u64,
    /// Uncompressed shard size in bytes, 0 for plain entries
    pub shard_size: u32,
}

/// Write the fixed header: magic plus table offset.
pub fn write_header<W: Write>(writer: &mut W, table_offset: u64) -> Result<()> {
    writer.write_all(&VARK_MAGIC)?;
    writer.write_u64::<LittleEndian>(table_offset)?;
    Ok(())
}

/// Read the fixed header, returning the table offset.
pub fn read_header<R: Read>(reader: &mut R) -> Result<u64> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != VARK_MAGIC {
        return Err(VarkError::BadMagic {
            expected: VARK_MAGIC,
            actual: magic,
        });
    }
    Ok(reader.read_u64::<LittleEndian>()?)
}

fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    writer.write_u32::<LittleEndian>(s.len() as u32)?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| VarkError::Io(std::io::Error::new(ErrorKind::InvalidData, e)))
}

/// Write the trailing file table: count word plus serialized entries.
pub fn write_table<W: Write>(writer: &mut W, entries: &[VarkEntry]) -> Result<()> {
    writer.write_u64::<LittleEndian>(entries.len() as u64)?;
    for entry in entries {
        write_string(writer, &entry.path)?;
        writer.write_u64::<LittleEndian>(entry.offset)?;
        writer.write_u64::<LittleEndian>(entry.size)?;
        writer.write_u64::<LittleEndian>(entry.hash)?;
    }
    Ok(())
}

/// Read the trailing file table. Every entry comes back with
/// `shard_size = 0`; the sidecar fills shard sizes in afterwards.
pub fn read_table<R: Read>(reader: &mut R) -> Result<Vec<VarkEntry>> {
    let count = reader.read_u64::<LittleEndian>()?;
    trace!("Reading file table with {count} entries");

    let mut entries = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        let path = read_string(reader)?;
        let offset = reader.read_u64::<LittleEndian>()?;
        let size = reader.read_u64::<LittleEndian>()?;
        let hash = reader.read_u64::<LittleEndian>()?;
        entries.push(VarkEntry {
            path,
            offset,
            size,
            hash,
            shard_size: 0,
        });
    }
    Ok(entries)
}

/// Write the shard-size sidecar. Omitted entirely for an empty table.
pub fn write_sidecar<W: Write>(writer: &mut W, entries: &[VarkEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    writer.write_all(&SIDECAR_MAGIC)?;
    writer.write_u64::<LittleEndian>(entries.len() as u64)?;
    for entry in entries {
        writer.write_u32::<LittleEndian>(entry.shard_size)?;
    }
    Ok(())
}

/// Read the shard-size sidecar that may follow the table.
///
/// Returns `None` when the sidecar is absent, its entry count does
/// not match the table, or the file ends mid-sidecar. Archives
/// written before the sidecar existed load with every entry plain.
pub fn read_sidecar<R: Read>(reader: &mut R, count: u64) -> Result<Option<Vec<u32>>> {
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if magic != SIDECAR_MAGIC {
        trace!("No shard sidecar magic after table");
        return Ok(None);
    }

    let sidecar_count = match reader.read_u64::<LittleEndian>() {
        Ok(n) => n,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if sidecar_count != count {
        trace!("Shard sidecar count {sidecar_count} does not match table count {count}, ignoring");
        return Ok(None);
    }

    let mut sizes = Vec::with_capacity(count.min(1 << 16) as usize);
    for _ in 0..count {
        match reader.read_u32::<LittleEndian>() {
            Ok(s) => sizes.push(s),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(sizes))
}

/// Copy a little-endian u32 out of a byte buffer. No alignment is
/// assumed; the caller has already bounds-checked `pos + 4`.
pub(crate) fn u32_at(buf: &[u8], pos: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[pos..pos + 4]);
    u32::from_le_bytes(raw)
}

/// Copy a little-endian u64 out of a byte buffer. No alignment is
/// assumed; the caller has already bounds-checked `pos + 8`.
pub(crate) fn u64_at(buf: &[u8], pos: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(raw)
}
