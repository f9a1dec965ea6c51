//! Single-file tile archive reader (PMTiles v3)
//!
//! The archive is a 127-byte header followed by a gzip-compressed root
//! directory, optional leaf directories and the tile data. Tiles are addressed
//! by a Hilbert-curve tile ID; directories map ID ranges to byte ranges.

pub mod directory;
pub mod header;
pub mod reader;
pub mod tile_id;

use std::io::Read;

use crate::error::{GeoDataError, Result};

pub use directory::{DirectoryEntry, decode_directory, find_entry, read_varint};
pub use header::{ArchiveHeader, Compression, HEADER_SIZE, TileType};
pub use reader::{ArchiveReader, MAX_DIRECTORY_DEPTH};
pub use tile_id::{tile_id_to_zxy, zxy_to_tile_id};

/// Undoes archive-level compression for directories and tiles.
pub fn decompress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut decoder = flate2::read::GzDecoder::new(bytes);
            let mut out = Vec::with_capacity(bytes.len() * 4);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| GeoDataError::Decode(format!("gzip: {e}")))?;
            Ok(out)
        }
        other => Err(GeoDataError::Decode(format!(
            "unsupported archive compression {other:?}"
        ))),
    }
}
