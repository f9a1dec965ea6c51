//! # terra-tiles - Real-world geodata for world generators
//!
//! Samples surface elevation, land cover, climate class and a land/water mask
//! at world coordinates, fetching and decoding the underlying tiles on demand.
//!
//! ## Features
//!
//! - **Tiled GeoTIFF**: IFD parsing, Deflate and TIFF-LZW tiles, per-raster tile LRU
//! - **PMTiles v3**: Hilbert tile IDs, varint directories, bounded leaf descent
//! - **Range requests**: the same decoders over local files, HTTP, or memory
//! - **Caching**: atomic on-disk mirror plus single-flight in-memory LRU per source
//! - **Resampling**: bilinear across tile seams, majority smoothing, nearest
//! - **Downsampling**: world positions snap to coarser cells at large world scales
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use terra_tiles::{GeoData, GeoDataConfig};
//!
//! let geo = GeoData::new(GeoDataConfig::from_env())?;
//!
//! // 30 meters per block
//! let meters = geo.sample_elevation_meters(1200.0, -5400.0, 30.0, false);
//! let class = geo.sample_land_cover_class(1200.0, -5400.0, 30.0);
//! let climate = geo.sample_climate_code(1200.0, -5400.0, 30.0);
//! let mask = geo.sample_land_mask(1200.0, -5400.0, 30.0);
//! ```
//!
//! Sampling never fails: positions off the globe, missing tiles and unusable
//! sources all come back as "unknown" values.
//!
//! ## Architecture
//!
//! - [`geometry`]: coordinate types, world/geographic/Mercator/pixel mapping
//! - [`tiff_utils`], [`lzw`], [`geotiff`]: tiled GeoTIFF decoding
//! - [`archive`]: PMTiles archive reading
//! - [`range_reader`], [`http`]: byte-range and whole-object I/O
//! - [`disk_cache`], [`tile_cache`]: on-disk mirror and in-memory caches
//! - [`sampler`], [`noise`]: resampling and coordinate dithering
//! - [`source`]: the four data sources
//! - [`geodata`], [`executor`]: the facade and its worker pool

// ============================================================================
// Public modules
// ============================================================================

pub mod archive;
pub mod config;
pub mod disk_cache;
pub mod error;
pub mod executor;
pub mod geodata;
pub mod geometry;
pub mod geotiff;
pub mod http;
pub mod lzw;
pub mod noise;
pub mod range_reader;
pub mod raster;
pub mod sampler;
pub mod source;
pub mod tiff_utils;
pub mod tile_cache;

#[cfg(test)]
mod test_fixtures;

// ============================================================================
// Facade
// ============================================================================

pub use geodata::{GeoData, GeoSources};
pub use executor::{PreviewRequests, PreviewTicket, WorkerPool};

// ============================================================================
// Configuration & Errors
// ============================================================================

pub use config::{GeoDataConfig, HttpConfig, SourceConfig};
pub use error::{GeoDataError, Result};

// ============================================================================
// Data Sources
// ============================================================================

pub use source::{
    ClimateSource,
    ElevationSource,
    LandCoverSource,
    LandMaskSample,
    LandMaskSource,
    koppen_name,
    worldcover_tile_name,
};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::{GeoCoord, PixelCoordinate, TileAddress};
pub use geometry::projection::{
    downsample,
    geographic_to_pixel,
    geographic_to_tile_address,
    tile_address_to_geographic,
    world_to_geographic,
};

// ============================================================================
// Decoders
// ============================================================================

pub use archive::{ArchiveHeader, ArchiveReader, DirectoryEntry};
pub use geotiff::{GeoTiffRaster, GeoTransform};
pub use lzw::decode_lzw;

// ============================================================================
// I/O & Caching
// ============================================================================

pub use disk_cache::DiskCache;
pub use http::{HttpFetcher, TileFetcher};
pub use range_reader::{
    RangeReader,
    LocalRangeReader,
    HttpRangeReader,
    MemoryRangeReader,
    create_range_reader,
};
pub use tile_cache::TileCache;

// ============================================================================
// Rasters & Sampling
// ============================================================================

pub use raster::{RasterResult, RasterSource, RasterTile};
pub use sampler::{sample_bilinear, sample_majority, sample_nearest};
pub use noise::WarpField;
