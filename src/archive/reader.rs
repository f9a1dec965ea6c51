use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::{debug, trace};

use super::directory::{DirectoryEntry, decode_directory, find_entry};
use super::header::{ArchiveHeader, HEADER_SIZE};
use super::tile_id::zxy_to_tile_id;
use crate::config::HttpConfig;
use crate::error::{GeoDataError, Result};
use crate::range_reader::{RangeReader, create_range_reader};

/// Directories read per lookup, root included. A chain that still points at
/// a leaf after this many reads is treated as "tile not found".
pub const MAX_DIRECTORY_DEPTH: usize = 4;

const DIRECTORY_CACHE_CAPACITY: usize = 128;

type Directory = Arc<Vec<DirectoryEntry>>;

/// Reads tiles out of a PMTiles v3 archive through a [`RangeReader`].
///
/// The header is read and validated when the reader is opened. Decoded
/// directories are kept in a small LRU keyed by their byte range.
pub struct ArchiveReader {
    reader: Arc<dyn RangeReader>,
    header: ArchiveHeader,
    directories: Mutex<LruCache<(u64, u64), Directory>>,
}

impl ArchiveReader {
    pub fn open(reader: Arc<dyn RangeReader>) -> Result<Self> {
        let bytes = reader.read_range(0, HEADER_SIZE)?;
        let header = ArchiveHeader::parse(&bytes)?;
        header.warn_on_unexpected(reader.identifier());
        debug!(
            source = reader.identifier(),
            min_zoom = header.min_zoom,
            max_zoom = header.max_zoom,
            "opened tile archive"
        );
        let capacity = NonZeroUsize::new(DIRECTORY_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            reader,
            header,
            directories: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Open a local path or an HTTP(S) URL.
    pub fn open_source(source: &str, http: &HttpConfig) -> Result<Self> {
        Self::open(create_range_reader(source, http)?)
    }

    #[must_use]
    pub fn header(&self) -> &ArchiveHeader {
        &self.header
    }

    #[must_use]
    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Raw (still tile-compressed) bytes of a tile, or `None` when the archive
    /// has no such tile.
    pub fn get_tile_bytes(&self, z: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>> {
        let Some(tile_id) = zxy_to_tile_id(z, x, y) else {
            return Ok(None);
        };
        if z < self.header.min_zoom || z > self.header.max_zoom {
            return Ok(None);
        }

        let mut offset = self.header.root_dir_offset;
        let mut length = self.header.root_dir_length;
        for depth in 0..MAX_DIRECTORY_DEPTH {
            let directory = self.directory(offset, length)?;
            let Some(entry) = find_entry(&directory, tile_id) else {
                return Ok(None);
            };
            if !entry.is_leaf_pointer() {
                let length = usize::try_from(entry.length).map_err(|_| {
                    GeoDataError::ArchiveFormat(format!("tile length {} too large", entry.length))
                })?;
                trace!(z, x, y, tile_id, depth, "tile located");
                let start =
                    section_offset(self.header.tile_data_offset, entry.offset, "tile")?;
                return self.reader.read_range(start, length).map(Some);
            }
            offset =
                section_offset(self.header.leaf_dirs_offset, entry.offset, "leaf directory")?;
            length = u64::from(entry.length);
        }

        debug!(
            source = self.reader.identifier(),
            z, x, y, "leaf directory chain deeper than {MAX_DIRECTORY_DEPTH}"
        );
        Ok(None)
    }

    fn directory(&self, offset: u64, length: u64) -> Result<Directory> {
        if let Some(dir) = self
            .directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(offset, length))
        {
            return Ok(Arc::clone(dir));
        }

        let byte_len = usize::try_from(length).map_err(|_| {
            GeoDataError::ArchiveFormat(format!("directory length {length} too large"))
        })?;
        let compressed = self.reader.read_range(offset, byte_len)?;
        let raw = super::decompress(&compressed, self.header.internal_compression)?;
        let directory = Arc::new(decode_directory(&raw)?);
        trace!(offset, length, entries = directory.len(), "directory decoded");

        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put((offset, length), Arc::clone(&directory));
        Ok(directory)
    }

    #[must_use]
    pub fn cached_directories(&self) -> usize {
        self.directories
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn section_offset(base: u64, offset: u64, what: &str) -> Result<u64> {
    base.checked_add(offset).ok_or_else(|| {
        GeoDataError::ArchiveFormat(format!("{what} offset {offset} overflows section at {base}"))
    })
}
