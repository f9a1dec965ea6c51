//! Köppen-Geiger climate classes from a single global classified GeoTIFF.

use std::sync::Arc;

use tracing::{debug, warn};

use super::classify;
use crate::config::SourceConfig;
use crate::disk_cache::DiskCache;
use crate::error::Result;
use crate::geometry::GeoCoord;
use crate::geometry::projection::{downsample, world_to_geographic};
use crate::geotiff::GeoTiffRaster;
use crate::http::TileFetcher;
use crate::noise::WarpField;
use crate::raster::RasterResult;
use crate::sampler::sample_majority;
use crate::tile_cache::TileCache;

pub const RASTER_FILE: &str = "koppen.tif";

const NO_DATA: [u8; 1] = [0];
const SMOOTHING_RADIUS: usize = 2;

/// Legend of the 1 km Köppen-Geiger map, indexed by `code - 1`.
pub const KOPPEN_CLASSES: [&str; 30] = [
    "Af", "Am", "Aw", "BWh", "BWk", "BSh", "BSk", "Csa", "Csb", "Csc", "Cwa", "Cwb", "Cwc", "Cfa",
    "Cfb", "Cfc", "Dsa", "Dsb", "Dsc", "Dsd", "Dwa", "Dwb", "Dwc", "Dwd", "Dfa", "Dfb", "Dfc",
    "Dfd", "ET", "EF",
];

#[must_use]
pub fn koppen_name(code: u8) -> Option<&'static str> {
    KOPPEN_CLASSES.get(usize::from(code).checked_sub(1)?).copied()
}

pub struct ClimateSource {
    config: SourceConfig,
    warp: WarpField,
    raster: TileCache<(), RasterResult<Arc<GeoTiffRaster>>>,
}

impl ClimateSource {
    pub fn new(config: SourceConfig, fetcher: Arc<dyn TileFetcher>) -> Self {
        Self::with_warp(config, fetcher, WarpField::default())
    }

    pub fn with_warp(config: SourceConfig, fetcher: Arc<dyn TileFetcher>, warp: WarpField) -> Self {
        let disk = DiskCache::new(config.cache_dir.clone());
        let url = config.url.clone();
        // One global raster; it stays resident once opened.
        let raster = TileCache::new(
            "koppen",
            std::num::NonZeroUsize::MIN,
            Arc::new(move |_: &()| load_raster(&disk, fetcher.as_ref(), &url)),
        );
        Self {
            config,
            warp,
            raster,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    #[must_use]
    pub fn warp(&self) -> &WarpField {
        &self.warp
    }

    pub fn raster(&self) -> Option<Arc<GeoTiffRaster>> {
        self.raster.get(&())?.into_ready()
    }

    /// Smoothed class code at a world position, `None` when unknown or
    /// no-data. The position is dithered by the warp field first.
    pub fn sample_code(&self, world_x: f64, world_z: f64, world_scale: f64) -> Option<u8> {
        let (x, z) = downsample(world_x, world_z, world_scale, self.config.resolution_meters);
        let (x, z) = self.warp.warp(x, z, world_scale);
        self.sample_coord(world_to_geographic(x, z, world_scale)?)
    }

    pub fn sample_coord(&self, coord: GeoCoord) -> Option<u8> {
        let raster = self.raster()?;
        let pixel = raster.pixel_for(coord)?;
        sample_majority(raster.as_ref(), pixel.x, pixel.y, SMOOTHING_RADIUS, &NO_DATA)
            .filter(|&code| code != 0)
    }

    /// Legend name at a world position, e.g. `"Cfb"`.
    pub fn sample_name(&self, world_x: f64, world_z: f64, world_scale: f64) -> Option<&'static str> {
        koppen_name(self.sample_code(world_x, world_z, world_scale)?)
    }

    pub fn invalidate_all(&self) {
        self.raster.invalidate_all();
    }
}

fn load_raster(
    disk: &DiskCache,
    fetcher: &dyn TileFetcher,
    url: &str,
) -> Result<RasterResult<Arc<GeoTiffRaster>>> {
    let url = (!url.trim().is_empty()).then_some(url);
    let Some(path) = disk.fetch_to_file(RASTER_FILE, fetcher, url)? else {
        warn!(
            dir = %disk.root().display(),
            "climate raster neither cached nor downloadable, climate unavailable"
        );
        return Ok(RasterResult::Unavailable);
    };
    debug!(path = %path.display(), "opening climate raster");
    classify("koppen", RASTER_FILE, GeoTiffRaster::open(&path).map(|r| Some(Arc::new(r))))
}
