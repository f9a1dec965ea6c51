use tracing::warn;

use crate::error::{GeoDataError, Result};

pub const HEADER_SIZE: usize = 127;
pub const MAGIC: &[u8; 7] = b"PMTiles";
pub const SUPPORTED_VERSION: u8 = 3;

/// Compression code used for directories and for tile payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Unknown,
    None,
    Gzip,
    Brotli,
    Zstd,
}

impl Compression {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Compression::None,
            2 => Compression::Gzip,
            3 => Compression::Brotli,
            4 => Compression::Zstd,
            _ => Compression::Unknown,
        }
    }

    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Compression::Unknown => 0,
            Compression::None => 1,
            Compression::Gzip => 2,
            Compression::Brotli => 3,
            Compression::Zstd => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileType {
    Unknown,
    Mvt,
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl TileType {
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => TileType::Mvt,
            2 => TileType::Png,
            3 => TileType::Jpeg,
            4 => TileType::Webp,
            5 => TileType::Avif,
            _ => TileType::Unknown,
        }
    }
}

/// Parsed archive header. Offsets are absolute byte positions in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveHeader {
    pub version: u8,
    pub root_dir_offset: u64,
    pub root_dir_length: u64,
    pub metadata_offset: u64,
    pub metadata_length: u64,
    pub leaf_dirs_offset: u64,
    pub leaf_dirs_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub addressed_tiles: u64,
    pub tile_entries: u64,
    pub tile_contents: u64,
    pub clustered: bool,
    pub internal_compression: Compression,
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub center_zoom: u8,
    pub center_lon: f64,
    pub center_lat: f64,
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(b)
}

fn coord_at(bytes: &[u8], at: usize) -> f64 {
    let b = [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
    f64::from(i32::from_le_bytes(b)) / 10_000_000.0
}

impl ArchiveHeader {
    /// Parses the fixed header. Bad magic and short input are archive-format
    /// errors; any version other than 3 is unsupported.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(GeoDataError::ArchiveFormat(format!(
                "header is {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }
        if &bytes[0..7] != MAGIC {
            return Err(GeoDataError::ArchiveFormat("missing PMTiles magic".into()));
        }
        let version = bytes[7];
        if version != SUPPORTED_VERSION {
            return Err(GeoDataError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            root_dir_offset: u64_at(bytes, 8),
            root_dir_length: u64_at(bytes, 16),
            metadata_offset: u64_at(bytes, 24),
            metadata_length: u64_at(bytes, 32),
            leaf_dirs_offset: u64_at(bytes, 40),
            leaf_dirs_length: u64_at(bytes, 48),
            tile_data_offset: u64_at(bytes, 56),
            tile_data_length: u64_at(bytes, 64),
            addressed_tiles: u64_at(bytes, 72),
            tile_entries: u64_at(bytes, 80),
            tile_contents: u64_at(bytes, 88),
            clustered: bytes[96] == 1,
            internal_compression: Compression::from_code(bytes[97]),
            tile_compression: Compression::from_code(bytes[98]),
            tile_type: TileType::from_code(bytes[99]),
            min_zoom: bytes[100],
            max_zoom: bytes[101],
            min_lon: coord_at(bytes, 102),
            min_lat: coord_at(bytes, 106),
            max_lon: coord_at(bytes, 110),
            max_lat: coord_at(bytes, 114),
            center_zoom: bytes[118],
            center_lon: coord_at(bytes, 119),
            center_lat: coord_at(bytes, 123),
        })
    }

    /// Logs (but accepts) layouts this crate was not built around:
    /// non-gzip directories, tile payloads other than raw or gzip, and
    /// non-PNG tiles.
    pub fn warn_on_unexpected(&self, source: &str) {
        if self.internal_compression != Compression::Gzip {
            warn!(
                source,
                compression = ?self.internal_compression,
                "archive directories are not gzip-compressed"
            );
        }
        if !matches!(
            self.tile_compression,
            Compression::None | Compression::Gzip
        ) {
            warn!(
                source,
                compression = ?self.tile_compression,
                "unexpected archive tile compression"
            );
        }
        if self.tile_type != TileType::Png {
            warn!(source, tile_type = ?self.tile_type, "unexpected archive tile type");
        }
    }
}
