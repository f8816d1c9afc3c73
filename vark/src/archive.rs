//! Archive object: create, load, append, and the unified read path
//!
//! A `VarkArchive` owns the in-memory file table, a name index, an
//! optional persistent file handle, an optional read-only memory
//! mapping, and two scratch buffers reused across decompress calls.
//! It is a single-threaded object; open several read-only archives
//! against the same file for parallel use.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::{Mmap, MmapOptions};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Result, VarkError};
use crate::format::{self, VarkEntry, DEFAULT_SHARD_SIZE, HEADER_SIZE, SHARD_MAGIC};
use crate::hash::fnv1a;
use crate::payload;
use crate::shard::{self, ShardIndex};

/// Open-time options.
///
/// `write` and `mmap` are mutually exclusive: a mapping is read-only
/// and would go stale under the append protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Open for appending
    pub write: bool,
    /// Memory-map the archive read-only and serve reads from the map
    pub mmap: bool,
    /// Keep an OS file handle alive on the archive to amortize open
    /// cost across calls
    pub persistent_handle: bool,
}

impl OpenFlags {
    /// Flags for an appendable archive with a retained handle.
    pub fn writable() -> Self {
        Self {
            write: true,
            persistent_handle: true,
            ..Self::default()
        }
    }

    /// Flags for memory-mapped read-only access.
    pub fn mapped() -> Self {
        Self {
            mmap: true,
            ..Self::default()
        }
    }

    fn validate(self) -> Result<()> {
        if self.write && self.mmap {
            return Err(VarkError::BadFlags("write and mmap are mutually exclusive"));
        }
        Ok(())
    }
}

/// Per-call append options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOptions {
    /// Write the entry in sharded format
    pub sharded: bool,
    /// Uncompressed shard size in bytes, used when `sharded` is set
    pub shard_size: u32,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            sharded: false,
            shard_size: DEFAULT_SHARD_SIZE,
        }
    }
}

impl AppendOptions {
    /// Plain (whole-entry) compression.
    pub fn plain() -> Self {
        Self::default()
    }

    /// Sharded compression with the default 128 KiB shard size.
    pub fn sharded() -> Self {
        Self {
            sharded: true,
            shard_size: DEFAULT_SHARD_SIZE,
        }
    }

    /// Override the shard size.
    pub fn with_shard_size(mut self, shard_size: u32) -> Self {
        self.shard_size = shard_size;
        self
    }

    fn validate(self) -> Result<()> {
        if self.sharded && self.shard_size == 0 {
            return Err(VarkError::BadFlags("shard size must be nonzero"));
        }
        Ok(())
    }
}

/// A Vark archive: header, packed payloads, trailing file table, and
/// optional shard-size sidecar.
pub struct VarkArchive {
    /// Archive location on disk
    path: PathBuf,
    /// File table in append order
    entries: Vec<VarkEntry>,
    /// Normalized path -> position in `entries`
    index: HashMap<String, usize>,
    /// Archive byte length after the last mutation
    size: u64,
    /// Persistent handle, retained when requested at open
    file: Option<File>,
    /// Read-only mapping of the whole archive, when requested
    mapping: Option<Mmap>,
    /// Scratch for compressed payload bytes on the buffered path
    temp_buf: Vec<u8>,
    /// Scratch for whole-shard staging in partial reads
    temp_shard_buf: Vec<u8>,
    /// Options chosen at open/create time
    flags: OpenFlags,
}

/// Replace host path separators so stored and queried paths compare
/// equal on every platform.
fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

impl VarkArchive {
    /// Create a new archive at `path`, overwriting any existing file.
    ///
    /// Writes the bootstrap header: magic, a table offset pointing
    /// directly after the header, and an empty table.
    pub fn create<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<Self> {
        flags.validate()?;
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        format::write_header(&mut file, HEADER_SIZE)?;
        file.write_u64::<LittleEndian>(0)?;
        let size = file.stream_position()?;

        debug!("Created archive {:?} ({size} bytes)", path);

        let mapping = if flags.mmap {
            Some(unsafe { MmapOptions::new().map(&file)? })
        } else {
            None
        };
        Ok(Self {
            path,
            entries: Vec::new(),
            index: HashMap::new(),
            size,
            file: flags.persistent_handle.then_some(file),
            mapping,
            temp_buf: Vec::new(),
            temp_shard_buf: Vec::new(),
            flags,
        })
    }

    /// Load an existing archive: validate the header, read the
    /// trailing table and the shard sidecar if one follows it.
    ///
    /// Entry contents stay on disk; only the table is brought into
    /// memory.
    pub fn load<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<Self> {
        flags.validate()?;
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(flags.write)
            .open(&path)?;
        let size = file.metadata()?.len();

        let mut reader = BufReader::new(&mut file);
        let table_offset = format::read_header(&mut reader)?;
        if table_offset > size {
            return Err(VarkError::Truncated {
                expected: table_offset,
                actual: size,
            });
        }
        reader.seek(SeekFrom::Start(table_offset))?;
        let mut entries = format::read_table(&mut reader)?;
        if !entries.is_empty() {
            if let Some(sizes) = format::read_sidecar(&mut reader, entries.len() as u64)? {
                for (entry, shard_size) in entries.iter_mut().zip(sizes) {
                    entry.shard_size = shard_size;
                }
            }
        }
        drop(reader);

        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            index.insert(entry.path.clone(), position);
        }

        debug!(
            "Loaded archive {:?}: {} entries, {size} bytes",
            path,
            entries.len()
        );

        let mapping = if flags.mmap {
            Some(unsafe { MmapOptions::new().map(&file)? })
        } else {
            None
        };
        Ok(Self {
            path,
            entries,
            index,
            size,
            file: flags.persistent_handle.then_some(file),
            mapping,
            temp_buf: Vec::new(),
            temp_shard_buf: Vec::new(),
            flags,
        })
    }

    /// Release the mapping, the handle, and the scratch buffers.
    ///
    /// Dropping the archive has the same effect; `close` makes the
    /// end of its lifecycle explicit.
    pub fn close(self) {}

    /// Archive location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Archive byte length after the last mutation.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Entries in append order.
    pub fn entries(&self) -> &[VarkEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the archive holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by logical path.
    pub fn find(&self, name: &str) -> Option<&VarkEntry> {
        self.index
            .get(&normalize_path(name))
            .map(|&position| &self.entries[position])
    }

    /// True when the archive contains `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Compress a file from disk and append it under its normalized
    /// source path.
    pub fn append_file<P: AsRef<Path>>(&mut self, source: P, options: AppendOptions) -> Result<()> {
        let source = source.as_ref();
        let data = std::fs::read(source)?;
        let name = normalize_path(&source.to_string_lossy());
        self.append_data(&name, &data, options)
    }

    /// Compress `data` and append it under `name`.
    ///
    /// The append protocol: read the table offset from the header,
    /// overwrite the old trailing table with the new payload, rewrite
    /// the table and shard sidecar at the new tail, then patch the
    /// header's table offset. A failure after the payload write can
    /// leave the on-disk table region inconsistent (the format keeps
    /// no journal); the in-memory entry is rolled back so the archive
    /// object stays usable.
    pub fn append_data(&mut self, name: &str, data: &[u8], options: AppendOptions) -> Result<()> {
        if !self.flags.write {
            return Err(VarkError::ReadOnly);
        }
        options.validate()?;

        let name = normalize_path(name);
        if self.index.contains_key(&name) {
            return Err(VarkError::DuplicateEntry(name));
        }

        let mut local = None;
        let file: &mut File = match self.file.as_mut() {
            Some(handle) => handle,
            None => local.insert(
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&self.path)?,
            ),
        };

        file.seek(SeekFrom::Start(4))?;
        let table_offset = file.read_u64::<LittleEndian>()?;
        file.seek(SeekFrom::Start(table_offset))?;

        let mut writer = BufWriter::new(file);
        let payload_size = if options.sharded {
            payload::write_sharded(&mut writer, data, options.shard_size)?
        } else {
            payload::write_plain(&mut writer, data)?
        };
        let new_table_offset = table_offset + payload_size;

        self.entries.push(VarkEntry {
            path: name.clone(),
            offset: table_offset,
            size: payload_size,
            hash: fnv1a(data),
            shard_size: if options.sharded { options.shard_size } else { 0 },
        });
        self.index.insert(name.clone(), self.entries.len() - 1);

        let result = (|| -> Result<u64> {
            format::write_table(&mut writer, &self.entries)?;
            format::write_sidecar(&mut writer, &self.entries)?;
            writer.flush()?;
            let file = writer.get_mut();
            file.seek(SeekFrom::Start(4))?;
            file.write_u64::<LittleEndian>(new_table_offset)?;
            Ok(file.seek(SeekFrom::End(0))?)
        })();
        match result {
            Ok(end) => {
                self.size = end;
                debug!(
                    "Appended {name:?}: {} bytes -> {payload_size} at offset {table_offset}",
                    data.len()
                );
                Ok(())
            }
            Err(e) => {
                self.entries.pop();
                self.index.remove(&name);
                Err(e)
            }
        }
    }

    /// Decompress a whole entry.
    pub fn decompress_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let (offset, size, shard_size) = self.resolve(name)?;

        if self.mapping.is_none() {
            self.fill_temp_buf(offset, size as usize)?;
        }
        let payload: &[u8] = match self.mapping.as_ref() {
            Some(mapping) => Self::mapped_slice(mapping, offset, size)?,
            None => &self.temp_buf[..size as usize],
        };

        if shard_size == 0 {
            payload::decode_plain(payload)
        } else {
            let index = ShardIndex::parse(payload, shard_size)?;
            shard::decompress_all(payload, &index)
        }
    }

    /// Decompress the byte range `[offset, offset + size)` of a
    /// sharded entry's uncompressed contents.
    ///
    /// # Errors
    ///
    /// Returns [`VarkError::NotSharded`] for plain entries and
    /// [`VarkError::RangeViolation`] when the range extends past the
    /// entry's uncompressed size.
    pub fn decompress_file_range(
        &mut self,
        name: &str,
        range_offset: u64,
        range_size: u64,
    ) -> Result<Vec<u8>> {
        let (offset, size, shard_size) = self.resolve(name)?;
        if shard_size == 0 {
            return Err(VarkError::NotSharded(normalize_path(name)));
        }

        if self.mapping.is_none() {
            self.fill_temp_buf(offset, size as usize)?;
        }
        let payload: &[u8] = match self.mapping.as_ref() {
            Some(mapping) => Self::mapped_slice(mapping, offset, size)?,
            None => &self.temp_buf[..size as usize],
        };

        let index = ShardIndex::parse(payload, shard_size)?;
        shard::decompress_range(payload, &index, range_offset, range_size, &mut self.temp_shard_buf)
    }

    /// Uncompressed size of an entry, read from its payload framing
    /// without decompressing.
    pub fn file_size(&mut self, name: &str) -> Result<u64> {
        let (offset, size, shard_size) = self.resolve(name)?;

        if shard_size == 0 {
            if size < 8 {
                return Err(VarkError::Truncated {
                    expected: 8,
                    actual: size,
                });
            }
            let mut header = [0u8; 8];
            self.read_exact_at(offset, &mut header)?;
            Ok(u64::from_le_bytes(header))
        } else {
            // A zero-length payload span is a valid empty sharded entry
            if size == 0 {
                return Ok(0);
            }
            if size < 16 {
                return Err(VarkError::Truncated {
                    expected: 16,
                    actual: size,
                });
            }
            let mut header = [0u8; 16];
            self.read_exact_at(offset, &mut header)?;
            if header[0..4] != SHARD_MAGIC {
                let mut actual = [0u8; 4];
                actual.copy_from_slice(&header[0..4]);
                return Err(VarkError::BadMagic {
                    expected: SHARD_MAGIC,
                    actual,
                });
            }
            Ok(format::u64_at(&header, 8))
        }
    }

    /// Resolve a lookup to the entry's payload location.
    fn resolve(&self, name: &str) -> Result<(u64, u64, u32)> {
        let normalized = normalize_path(name);
        let position = *self
            .index
            .get(&normalized)
            .ok_or(VarkError::NotFound(normalized))?;
        let entry = &self.entries[position];
        trace!(
            "Resolved {:?} -> offset {}, {} payload bytes",
            entry.path,
            entry.offset,
            entry.size
        );
        Ok((entry.offset, entry.size, entry.shard_size))
    }

    /// Bounds-checked slice of the mapping.
    fn mapped_slice(mapping: &Mmap, offset: u64, size: u64) -> Result<&[u8]> {
        let end = offset.checked_add(size).filter(|&e| e <= mapping.len() as u64);
        match end {
            Some(end) => Ok(&mapping[offset as usize..end as usize]),
            None => Err(VarkError::Truncated {
                expected: offset.saturating_add(size),
                actual: mapping.len() as u64,
            }),
        }
    }

    /// Fill `temp_buf` with `len` payload bytes starting at `offset`.
    fn fill_temp_buf(&mut self, offset: u64, len: usize) -> Result<()> {
        let mut buf = std::mem::take(&mut self.temp_buf);
        buf.resize(len, 0);
        let result = self.read_exact_at(offset, &mut buf[..len]);
        self.temp_buf = buf;
        result
    }

    /// Read exactly `buf.len()` bytes at `offset`, from the mapping
    /// when one exists, else through the persistent handle or an
    /// ad-hoc read-only handle closed before returning.
    fn read_exact_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if let Some(mapping) = self.mapping.as_ref() {
            buf.copy_from_slice(Self::mapped_slice(mapping, offset, buf.len() as u64)?);
            return Ok(());
        }
        match self.file.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
            None => {
                let mut file = File::open(&self.path)?;
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for VarkArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VarkArchive")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .field("size", &self.size)
            .field("mapped", &self.mapping.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}
