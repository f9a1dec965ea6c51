//! Binary land/water mask backed by a PMTiles archive of PNG tiles.
//!
//! A local `land-mask.pmtiles` in the source's cache directory is preferred;
//! otherwise the configured URL is read with HTTP range requests. Nonzero
//! luma means land.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use super::classify;
use crate::archive::{ArchiveReader, decompress};
use crate::config::{HttpConfig, SourceConfig};
use crate::error::{GeoDataError, Result};
use crate::geometry::TileAddress;
use crate::geometry::projection::{downsample, geographic_to_tile_position, world_to_geographic};
use crate::range_reader::{HttpRangeReader, LocalRangeReader, RangeReader};
use crate::raster::{RasterResult, RasterTile};
use crate::tile_cache::TileCache;

pub const ARCHIVE_FILE: &str = "land-mask.pmtiles";

/// Produces the archive's byte source; `Ok(None)` when there is none.
pub type ReaderFactory = Arc<dyn Fn() -> Result<Option<Arc<dyn RangeReader>>> + Send + Sync>;

type ArchiveCache = TileCache<(), RasterResult<Arc<ArchiveReader>>>;
type MaskTileCache = TileCache<TileAddress, RasterResult<Arc<RasterTile>>>;

/// Land/water answer for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LandMaskSample {
    /// Whether the mask had data here at all
    pub known: bool,
    pub is_land: bool,
}

impl LandMaskSample {
    pub const UNKNOWN: Self = Self {
        known: false,
        is_land: false,
    };
    pub const LAND: Self = Self {
        known: true,
        is_land: true,
    };
    pub const WATER: Self = Self {
        known: true,
        is_land: false,
    };
}

/// Local archive in `cache_dir` if present, else the remote URL if any.
#[must_use]
pub fn default_reader_factory(config: &SourceConfig, http: &HttpConfig) -> ReaderFactory {
    let local: PathBuf = config.cache_dir.join(ARCHIVE_FILE);
    let url = config.url.trim().to_string();
    let http = http.clone();
    Arc::new(move || -> Result<Option<Arc<dyn RangeReader>>> {
        if local.is_file() {
            debug!(path = %local.display(), "using local land-mask archive");
            return Ok(Some(Arc::new(LocalRangeReader::new(&local)?) as Arc<dyn RangeReader>));
        }
        if url.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(HttpRangeReader::new(&url, &http)?) as Arc<dyn RangeReader>))
    })
}

pub struct LandMaskSource {
    config: SourceConfig,
    archive: Arc<ArchiveCache>,
    tiles: MaskTileCache,
}

impl LandMaskSource {
    pub fn new(config: SourceConfig, http: &HttpConfig) -> Self {
        let factory = default_reader_factory(&config, http);
        Self::with_reader_factory(config, factory)
    }

    pub fn with_reader_factory(config: SourceConfig, factory: ReaderFactory) -> Self {
        let archive: Arc<ArchiveCache> = Arc::new(TileCache::new(
            "land-mask-archive",
            std::num::NonZeroUsize::MIN,
            Arc::new(move |_: &()| open_archive(&factory)),
        ));
        let tiles = {
            let archive = Arc::clone(&archive);
            TileCache::new(
                "land-mask",
                config.cache_capacity(),
                Arc::new(move |address: &TileAddress| load_tile(&archive, *address)),
            )
        };
        Self {
            config,
            archive,
            tiles,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn archive(&self) -> Option<Arc<ArchiveReader>> {
        self.archive.get(&())?.into_ready()
    }

    pub fn tile(&self, address: TileAddress) -> Option<Arc<RasterTile>> {
        self.tiles.get(&address)?.into_ready()
    }

    /// Land/water at a world position.
    ///
    /// `known` is false when the position is off the globe, the archive is
    /// unusable, or the archive has no tile there.
    pub fn sample(&self, world_x: f64, world_z: f64, world_scale: f64) -> LandMaskSample {
        let (x, z) = downsample(world_x, world_z, world_scale, self.config.resolution_meters);
        let Some(coord) = world_to_geographic(x, z, world_scale) else {
            return LandMaskSample::UNKNOWN;
        };
        let Some(archive) = self.archive() else {
            return LandMaskSample::UNKNOWN;
        };
        let header = archive.header();
        let zoom = self
            .config
            .zoom
            .clamp(header.min_zoom, header.max_zoom.max(header.min_zoom));

        let (tx, ty) = geographic_to_tile_position(coord, zoom);
        let last = (1u64 << zoom) - 1;
        let col = (tx.floor().max(0.0) as u64).min(last);
        let row = (ty.floor().max(0.0) as u64).min(last);
        let Some(address) = TileAddress::new(zoom, col as u32, row as u32) else {
            return LandMaskSample::UNKNOWN;
        };
        let Some(tile) = self.tile(address) else {
            return LandMaskSample::UNKNOWN;
        };

        let (w, h) = (tile.width(), tile.height());
        let px = (((tx - col as f64) * w as f64).floor().max(0.0) as usize).min(w.saturating_sub(1));
        let py = (((ty - row as f64) * h as f64).floor().max(0.0) as usize).min(h.saturating_sub(1));
        match tile.get(px, py) {
            Some(v) if v != 0.0 => LandMaskSample::LAND,
            Some(_) => LandMaskSample::WATER,
            None => LandMaskSample::UNKNOWN,
        }
    }

    pub fn invalidate_all(&self) {
        self.tiles.invalidate_all();
        self.archive.invalidate_all();
    }

    #[must_use]
    pub fn cached_tiles(&self) -> usize {
        self.tiles.len()
    }
}

fn open_archive(factory: &ReaderFactory) -> Result<RasterResult<Arc<ArchiveReader>>> {
    let Some(reader) = factory()? else {
        warn!("no land-mask archive configured, land mask unavailable");
        return Ok(RasterResult::Unavailable);
    };
    let identifier = reader.identifier().to_string();
    classify(
        "land-mask",
        &identifier,
        ArchiveReader::open(reader).map(|archive| Some(Arc::new(archive))),
    )
}

fn load_tile(archive: &ArchiveCache, address: TileAddress) -> Result<RasterResult<Arc<RasterTile>>> {
    let archive = match archive.get(&()) {
        Some(RasterResult::Ready(archive)) => archive,
        Some(_) => return Ok(RasterResult::Unavailable),
        None => {
            return Err(GeoDataError::Transport(
                "land-mask archive could not be opened".into(),
            ));
        }
    };

    let Some(bytes) = archive.get_tile_bytes(address.zoom, address.x, address.y)? else {
        debug!(%address, "no land-mask tile in archive");
        return Ok(RasterResult::Missing);
    };
    let png = decompress(&bytes, archive.header().tile_compression)?;
    let luma = image::load_from_memory_with_format(&png, image::ImageFormat::Png)?.to_luma8();
    let (width, height) = (luma.width() as usize, luma.height() as usize);
    let tile = RasterTile::new_u8(width, height, luma.into_raw())?;
    Ok(RasterResult::Ready(Arc::new(tile)))
}
