//! Vark single-file archive format
//!
//! A Vark archive bundles many input files into one compressed
//! container with fast, random-access decompression. The layout is
//! built around appendability: payloads pack from byte 12, the file
//! table trails them, and appending overwrites the old table with the
//! new payload before rewriting the table at the new tail and
//! patching one header pointer.
//!
//! Entries are compressed either *plain* (one blob with an 8-byte
//! uncompressed-size prefix) or *sharded* (fixed-size chunks with a
//! cumulative offset index), and sharded entries serve byte-range
//! reads by decoding only the covering shards. Read paths work over
//! buffered I/O or a read-only memory mapping of the archive.
//!
//! ```no_run
//! use vark::{AppendOptions, OpenFlags, VarkArchive};
//!
//! # fn main() -> vark::Result<()> {
//! let mut archive = VarkArchive::create("assets.vark", OpenFlags::writable())?;
//! archive.append_file("textures/grass.png", AppendOptions::sharded())?;
//! archive.close();
//!
//! let mut archive = VarkArchive::load("assets.vark", OpenFlags::mapped())?;
//! let header = archive.decompress_file_range("textures/grass.png", 0, 128)?;
//! # let _ = header;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod error;
pub mod format;
pub mod hash;
pub mod payload;
pub mod shard;

pub use archive::{AppendOptions, OpenFlags, VarkArchive};
pub use error::{Result, VarkError};
pub use format::{VarkEntry, DEFAULT_SHARD_SIZE, HEADER_SIZE, SHARD_MAGIC, SIDECAR_MAGIC, VARK_MAGIC};
pub use hash::fnv1a;
pub use shard::ShardIndex;
