//! Tiled GeoTIFF reader
//!
//! - Reads the header and first IFD once, at open
//! - Fetches and decodes individual tiles on demand through a [`RangeReader`]
//! - Keeps the last [`TILE_CACHE_CAPACITY`] decoded tiles per raster
//!
//! Only single-band, 8-bit unsigned or 16-bit signed rasters with pixel-scale
//! and tiepoint georeferencing are supported; that covers the classified
//! land-cover and climate rasters.

use std::io::Read;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use lru::LruCache;
use tracing::{debug, trace};

use crate::config::HttpConfig;
use crate::error::{GeoDataError, Result};
use crate::geometry::projection::geographic_to_pixel_position;
use crate::geometry::{GeoCoord, PixelCoordinate};
use crate::lzw::decode_lzw;
use crate::range_reader::{LocalRangeReader, RangeReader, create_range_reader};
use crate::raster::{RasterSource, RasterTile};
use crate::tiff_utils::{
    TAG_BITS_PER_SAMPLE, TAG_COMPRESSION, TAG_IMAGE_LENGTH, TAG_IMAGE_WIDTH,
    TAG_MODEL_PIXEL_SCALE, TAG_MODEL_TIEPOINT, TAG_PREDICTOR, TAG_SAMPLE_FORMAT,
    TAG_SAMPLES_PER_PIXEL, TAG_TILE_BYTE_COUNTS, TAG_TILE_LENGTH, TAG_TILE_OFFSETS,
    TAG_TILE_WIDTH, read_ifd, read_tag_f64_vec, read_tag_u64, read_tag_u64_optional,
    read_tag_u64_vec, read_tiff_header,
};

/// Decoded tiles kept per raster.
pub const TILE_CACHE_CAPACITY: usize = 64;

/// Largest accepted TileWidth or TileLength. Decoding allocates a full tile.
pub const MAX_TILE_DIMENSION: usize = 4096;

const COMPRESSION_NONE: u16 = 1;
const COMPRESSION_LZW: u16 = 5;
const COMPRESSION_DEFLATE: u16 = 8;
const COMPRESSION_DEFLATE_LEGACY: u16 = 32946;

const PREDICTOR_NONE: u16 = 1;
const PREDICTOR_HORIZONTAL: u16 = 2;

const SAMPLE_FORMAT_UINT: u64 = 1;
const SAMPLE_FORMAT_INT: u64 = 2;

/// Compression method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Lzw,
    Deflate,
}

impl Compression {
    #[must_use]
    pub fn from_tag(value: u16) -> Option<Self> {
        match value {
            COMPRESSION_NONE => Some(Compression::None),
            COMPRESSION_LZW => Some(Compression::Lzw),
            COMPRESSION_DEFLATE | COMPRESSION_DEFLATE_LEGACY => Some(Compression::Deflate),
            _ => None,
        }
    }
}

/// Sample layout detected from BitsPerSample and SampleFormat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    UInt8,
    Int16,
}

impl SampleType {
    #[must_use]
    pub fn from_tags(bits_per_sample: u64, sample_format: u64) -> Option<Self> {
        match (sample_format, bits_per_sample) {
            (SAMPLE_FORMAT_UINT, 8) => Some(SampleType::UInt8),
            (SAMPLE_FORMAT_INT, 16) => Some(SampleType::Int16),
            _ => None,
        }
    }

    #[must_use]
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleType::UInt8 => 1,
            SampleType::Int16 => 2,
        }
    }
}

/// Pixel-scale plus tiepoint georeferencing, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    pub pixel_scale_x: f64,
    pub pixel_scale_y: f64,
    /// Longitude of the raster's top-left corner
    pub tie_lon: f64,
    /// Latitude of the raster's top-left corner
    pub tie_lat: f64,
}

impl GeoTransform {
    /// Builds from the raw ModelPixelScale and ModelTiepoint values.
    #[must_use]
    pub fn from_tags(pixel_scale: &[f64], tiepoint: &[f64]) -> Option<Self> {
        if pixel_scale.len() < 2 || tiepoint.len() < 5 {
            return None;
        }
        Some(Self {
            pixel_scale_x: pixel_scale[0],
            pixel_scale_y: pixel_scale[1],
            tie_lon: tiepoint[3],
            tie_lat: tiepoint[4],
        })
    }

    /// Fractional pixel position of a coordinate.
    #[must_use]
    pub fn world_to_pixel(&self, coord: GeoCoord) -> Option<(f64, f64)> {
        geographic_to_pixel_position(
            coord,
            self.pixel_scale_x,
            self.pixel_scale_y,
            self.tie_lon,
            self.tie_lat,
        )
    }

    #[must_use]
    pub fn pixel_to_world(&self, px: f64, py: f64) -> (f64, f64) {
        (
            self.tie_lon + px * self.pixel_scale_x,
            self.tie_lat - py * self.pixel_scale_y,
        )
    }
}

/// Layout of the first image, read once at open.
#[derive(Debug, Clone)]
pub struct TiffMetadata {
    pub width: usize,
    pub height: usize,
    pub tile_width: usize,
    pub tile_height: usize,
    pub tiles_across: usize,
    pub tiles_down: usize,
    pub compression: Compression,
    pub predictor: u16,
    pub sample_type: SampleType,
    pub little_endian: bool,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
    pub geo_transform: GeoTransform,
}

impl TiffMetadata {
    /// Linear tile index owning pixel (x, y), or `None` off the image.
    #[must_use]
    pub fn tile_index_for_pixel(&self, px: usize, py: usize) -> Option<usize> {
        if px >= self.width || py >= self.height {
            return None;
        }
        Some((py / self.tile_height) * self.tiles_across + px / self.tile_width)
    }

    fn tile_samples(&self) -> usize {
        self.tile_width * self.tile_height
    }
}

pub struct GeoTiffRaster {
    reader: Arc<dyn RangeReader>,
    metadata: TiffMetadata,
    tiles: Mutex<LruCache<usize, Arc<RasterTile>>>,
}

impl std::fmt::Debug for GeoTiffRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoTiffRaster")
            .field("source", &self.reader.identifier())
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl GeoTiffRaster {
    /// Open a local file. The handle stays open until the raster is dropped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(Arc::new(LocalRangeReader::new(path)?))
    }

    /// Open a local path or an HTTP(S) URL.
    pub fn open_source(source: &str, http: &HttpConfig) -> Result<Self> {
        Self::from_reader(create_range_reader(source, http)?)
    }

    pub fn from_reader(reader: Arc<dyn RangeReader>) -> Result<Self> {
        let metadata = read_metadata(reader.as_ref())?;
        debug!(
            source = reader.identifier(),
            width = metadata.width,
            height = metadata.height,
            tile_width = metadata.tile_width,
            tile_height = metadata.tile_height,
            compression = ?metadata.compression,
            "opened GeoTIFF"
        );
        let capacity = NonZeroUsize::new(TILE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            reader,
            metadata,
            tiles: Mutex::new(LruCache::new(capacity)),
        })
    }

    #[must_use]
    pub fn metadata(&self) -> &TiffMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn geo_transform(&self) -> &GeoTransform {
        &self.metadata.geo_transform
    }

    /// Integer pixel for a coordinate, `None` off the raster.
    #[must_use]
    pub fn pixel_for(&self, coord: GeoCoord) -> Option<PixelCoordinate> {
        let (px, py) = self.metadata.geo_transform.world_to_pixel(coord)?;
        if px < 0.0 || py < 0.0 {
            return None;
        }
        let (x, y) = (px.floor() as usize, py.floor() as usize);
        if x >= self.metadata.width || y >= self.metadata.height {
            return None;
        }
        Some(PixelCoordinate { x, y })
    }

    /// Decoded tile by linear index, from the per-raster cache when possible.
    pub fn read_tile(&self, tile_index: usize) -> Result<Arc<RasterTile>> {
        if let Some(tile) = self
            .tiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&tile_index)
        {
            return Ok(Arc::clone(tile));
        }

        let tile = Arc::new(self.decode_tile(tile_index)?);
        self.tiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(tile_index, Arc::clone(&tile));
        Ok(tile)
    }

    fn decode_tile(&self, tile_index: usize) -> Result<RasterTile> {
        let meta = &self.metadata;
        let (Some(&offset), Some(&byte_count)) = (
            meta.tile_offsets.get(tile_index),
            meta.tile_byte_counts.get(tile_index),
        ) else {
            return Err(GeoDataError::TiffFormat(format!(
                "tile index {tile_index} out of range (have {})",
                meta.tile_offsets.len()
            )));
        };

        let samples = meta.tile_samples();
        if byte_count == 0 {
            // Sparse tile: every pixel is no-data.
            return match meta.sample_type {
                SampleType::UInt8 => {
                    RasterTile::new_u8(meta.tile_width, meta.tile_height, vec![0; samples])
                }
                SampleType::Int16 => {
                    RasterTile::new_i16(meta.tile_width, meta.tile_height, vec![0; samples])
                }
            };
        }

        let byte_count = usize::try_from(byte_count)
            .map_err(|_| GeoDataError::TiffFormat(format!("tile {tile_index} too large")))?;
        let compressed = self.reader.read_range(offset, byte_count)?;
        let expected = samples * meta.sample_type.bytes_per_sample();
        let raw = decompress_tile(&compressed, meta.compression, expected)?;
        trace!(
            source = self.reader.identifier(),
            tile_index, byte_count, "decoded tile"
        );

        match meta.sample_type {
            SampleType::UInt8 => {
                let mut data = raw;
                if meta.predictor == PREDICTOR_HORIZONTAL {
                    undo_horizontal_predictor(&mut data, meta.tile_width, u8::wrapping_add);
                }
                RasterTile::new_u8(meta.tile_width, meta.tile_height, data)
            }
            SampleType::Int16 => {
                let mut values: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| {
                        if meta.little_endian {
                            u16::from_le_bytes([c[0], c[1]])
                        } else {
                            u16::from_be_bytes([c[0], c[1]])
                        }
                    })
                    .collect();
                if meta.predictor == PREDICTOR_HORIZONTAL {
                    undo_horizontal_predictor(&mut values, meta.tile_width, u16::wrapping_add);
                }
                let data = values.into_iter().map(|v| v as i16).collect();
                RasterTile::new_i16(meta.tile_width, meta.tile_height, data)
            }
        }
    }

    /// Sample at an absolute pixel. Out-of-bounds is `Ok(None)`.
    pub fn try_sample(&self, x: usize, y: usize) -> Result<Option<f64>> {
        let meta = &self.metadata;
        let Some(tile_index) = meta.tile_index_for_pixel(x, y) else {
            return Ok(None);
        };
        let tile = self.read_tile(tile_index)?;
        Ok(tile.get(x % meta.tile_width, y % meta.tile_height))
    }

    /// 8-bit class at an absolute pixel; errors propagate.
    pub fn try_sample_value(&self, x: usize, y: usize) -> Result<u8> {
        Ok(self
            .try_sample(x, y)?
            .map_or(0, |v| v.clamp(0.0, 255.0) as u8))
    }

    /// 8-bit class at an absolute pixel. `0` (no-data) off the raster or when
    /// the owning tile cannot be decoded.
    #[must_use]
    pub fn sample_value(&self, x: usize, y: usize) -> u8 {
        self.try_sample_value(x, y).unwrap_or_else(|error| {
            debug!(source = self.reader.identifier(), x, y, %error, "tile read failed");
            0
        })
    }

    /// Drops every cached decoded tile.
    pub fn clear_tile_cache(&self) {
        self.tiles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl RasterSource for GeoTiffRaster {
    fn width(&self) -> usize {
        self.metadata.width
    }

    fn height(&self) -> usize {
        self.metadata.height
    }

    fn sample(&self, x: usize, y: usize) -> Option<f64> {
        match self.try_sample(x, y) {
            Ok(value) => value,
            Err(error) => {
                debug!(source = self.reader.identifier(), x, y, %error, "tile read failed");
                None
            }
        }
    }
}

fn read_metadata(reader: &dyn RangeReader) -> Result<TiffMetadata> {
    let header = read_tiff_header(reader)?;
    let le = header.little_endian;
    let entries = read_ifd(reader, &header)?;

    let as_usize = |value: u64, what: &str| {
        usize::try_from(value)
            .ok()
            .filter(|&v| v > 0)
            .ok_or_else(|| GeoDataError::TiffFormat(format!("invalid {what} {value}")))
    };

    let width = as_usize(read_tag_u64(reader, &entries, TAG_IMAGE_WIDTH, le)?, "width")?;
    let height = as_usize(read_tag_u64(reader, &entries, TAG_IMAGE_LENGTH, le)?, "height")?;
    let tile_width = as_usize(read_tag_u64(reader, &entries, TAG_TILE_WIDTH, le)?, "tile width")?;
    let tile_height = as_usize(
        read_tag_u64(reader, &entries, TAG_TILE_LENGTH, le)?,
        "tile height",
    )?;
    if tile_width > MAX_TILE_DIMENSION || tile_height > MAX_TILE_DIMENSION {
        return Err(GeoDataError::TiffFormat(format!(
            "tile size {tile_width}x{tile_height} exceeds {MAX_TILE_DIMENSION}"
        )));
    }

    let compression_tag = read_tag_u64_optional(reader, &entries, TAG_COMPRESSION, le)?
        .unwrap_or(u64::from(COMPRESSION_NONE));
    let compression_tag = u16::try_from(compression_tag).unwrap_or(u16::MAX);
    let compression = Compression::from_tag(compression_tag)
        .ok_or(GeoDataError::UnsupportedCompression(compression_tag))?;

    let predictor = read_tag_u64_optional(reader, &entries, TAG_PREDICTOR, le)?
        .unwrap_or(u64::from(PREDICTOR_NONE));
    let predictor = match u16::try_from(predictor) {
        Ok(p @ (PREDICTOR_NONE | PREDICTOR_HORIZONTAL)) => p,
        _ => {
            return Err(GeoDataError::TiffFormat(format!(
                "unsupported predictor {predictor}"
            )));
        }
    };

    let samples_per_pixel =
        read_tag_u64_optional(reader, &entries, TAG_SAMPLES_PER_PIXEL, le)?.unwrap_or(1);
    if samples_per_pixel != 1 {
        return Err(GeoDataError::TiffFormat(format!(
            "{samples_per_pixel} samples per pixel, only single-band rasters are supported"
        )));
    }

    let bits = read_tag_u64_optional(reader, &entries, TAG_BITS_PER_SAMPLE, le)?.unwrap_or(8);
    let format = read_tag_u64_optional(reader, &entries, TAG_SAMPLE_FORMAT, le)?
        .unwrap_or(SAMPLE_FORMAT_UINT);
    let sample_type = SampleType::from_tags(bits, format).ok_or_else(|| {
        GeoDataError::TiffFormat(format!(
            "unsupported sample layout: {bits} bits, format {format}"
        ))
    })?;

    let tile_offsets = read_tag_u64_vec(reader, &entries, TAG_TILE_OFFSETS, le)?;
    let tile_byte_counts = read_tag_u64_vec(reader, &entries, TAG_TILE_BYTE_COUNTS, le)?;
    let tiles_across = width.div_ceil(tile_width);
    let tiles_down = height.div_ceil(tile_height);
    if tile_offsets.len() != tile_byte_counts.len() {
        return Err(GeoDataError::TiffFormat(
            "TileOffsets and TileByteCounts length mismatch".into(),
        ));
    }
    if tile_offsets.len() < tiles_across * tiles_down {
        return Err(GeoDataError::TiffFormat(format!(
            "not enough tile records: have {}, expected {} ({tiles_across} across x {tiles_down} down)",
            tile_offsets.len(),
            tiles_across * tiles_down
        )));
    }

    let pixel_scale = read_tag_f64_vec(reader, &entries, TAG_MODEL_PIXEL_SCALE, le)?;
    let tiepoint = read_tag_f64_vec(reader, &entries, TAG_MODEL_TIEPOINT, le)?;
    let geo_transform = GeoTransform::from_tags(&pixel_scale, &tiepoint).ok_or_else(|| {
        GeoDataError::TiffFormat("pixel scale or tiepoint has too few values".into())
    })?;

    Ok(TiffMetadata {
        width,
        height,
        tile_width,
        tile_height,
        tiles_across,
        tiles_down,
        compression,
        predictor,
        sample_type,
        little_endian: le,
        tile_offsets,
        tile_byte_counts,
        geo_transform,
    })
}

/// Decompresses a tile to exactly `expected` bytes. Short output is an error;
/// trailing bytes some writers leave behind are dropped.
fn decompress_tile(compressed: &[u8], compression: Compression, expected: usize) -> Result<Vec<u8>> {
    let mut data = match compression {
        Compression::None => compressed.to_vec(),
        Compression::Deflate => {
            let mut decoder = flate2::read::ZlibDecoder::new(compressed);
            let mut out = Vec::with_capacity(expected);
            decoder
                .read_to_end(&mut out)
                .map_err(|e| GeoDataError::Decode(format!("deflate: {e}")))?;
            out
        }
        Compression::Lzw => return decode_lzw(compressed, expected),
    };
    if data.len() < expected {
        return Err(GeoDataError::Decode(format!(
            "tile decoded to {} bytes, expected {expected}",
            data.len()
        )));
    }
    data.truncate(expected);
    Ok(data)
}

/// Reverses horizontal differencing row by row.
fn undo_horizontal_predictor<T: Copy>(data: &mut [T], row_len: usize, add: fn(T, T) -> T) {
    if row_len == 0 {
        return;
    }
    for row in data.chunks_mut(row_len) {
        for i in 1..row.len() {
            row[i] = add(row[i], row[i - 1]);
        }
    }
}
