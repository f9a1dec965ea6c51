//! Land-cover classes from 3x3 degree classified GeoTIFF files.
//!
//! Files are named after their south-west corner (`N00E003`, `S03W006`) and
//! mirrored to disk whole, then read tile by tile through [`GeoTiffRaster`].

use std::sync::Arc;

use tracing::debug;

use super::classify;
use crate::config::SourceConfig;
use crate::disk_cache::DiskCache;
use crate::error::Result;
use crate::geometry::GeoCoord;
use crate::geometry::projection::{downsample, world_to_geographic};
use crate::geotiff::GeoTiffRaster;
use crate::http::{TileFetcher, expand_template};
use crate::raster::RasterResult;
use crate::sampler::sample_majority;
use crate::tile_cache::TileCache;

/// Degrees covered by one file along each axis.
pub const TILE_DEGREES: i32 = 3;

/// No-data and permanent water. Never win a majority vote.
pub const EXCLUDED_CLASSES: [u8; 2] = [0, 80];

const SMOOTHING_RADIUS: usize = 1;

/// Name of the file holding `coord`, e.g. `N51E000`.
///
/// Rows run north to south, so a latitude on a file boundary belongs to the
/// top row of the file below it. Longitudes on a boundary start the file to
/// the east.
#[must_use]
pub fn worldcover_tile_name(coord: GeoCoord) -> String {
    let degrees = f64::from(TILE_DEGREES);
    let lat = ((coord.lat() / degrees).ceil() as i32 - 1) * TILE_DEGREES;
    let lat = lat.clamp(-90, 90 - TILE_DEGREES);
    let lon = (coord.lon() / degrees).floor() as i32 * TILE_DEGREES;
    let lon = lon.min(180 - TILE_DEGREES);
    format!(
        "{}{:02}{}{:03}",
        if lat < 0 { 'S' } else { 'N' },
        lat.abs(),
        if lon < 0 { 'W' } else { 'E' },
        lon.abs()
    )
}

pub struct LandCoverSource {
    config: SourceConfig,
    files: TileCache<String, RasterResult<Arc<GeoTiffRaster>>>,
}

impl LandCoverSource {
    pub fn new(config: SourceConfig, fetcher: Arc<dyn TileFetcher>) -> Self {
        let disk = DiskCache::new(config.cache_dir.clone());
        let template = config.url.clone();
        let files = TileCache::new(
            "land-cover",
            config.cache_capacity(),
            Arc::new(move |name: &String| load_file(&disk, fetcher.as_ref(), &template, name)),
        )
        .with_eviction_listener(Arc::new(|name: &String, file: &RasterResult<Arc<GeoTiffRaster>>| {
            if let RasterResult::Ready(raster) = file {
                debug!(name, "releasing land-cover file");
                raster.clear_tile_cache();
            }
        }));
        Self { config, files }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn raster(&self, name: &str) -> Option<Arc<GeoTiffRaster>> {
        self.files.get(&name.to_string())?.into_ready()
    }

    /// Class code at a world position, `0` when unknown.
    ///
    /// Land pixels are smoothed by a radius-1 majority vote that ignores
    /// no-data and water; water and no-data pixels are returned as is.
    pub fn sample_class(&self, world_x: f64, world_z: f64, world_scale: f64) -> u8 {
        let (x, z) = downsample(world_x, world_z, world_scale, self.config.resolution_meters);
        world_to_geographic(x, z, world_scale)
            .and_then(|coord| self.sample_coord(coord))
            .unwrap_or(0)
    }

    pub fn sample_coord(&self, coord: GeoCoord) -> Option<u8> {
        let raster = self.raster(&worldcover_tile_name(coord))?;
        let pixel = raster.pixel_for(coord)?;
        let center = raster.sample_value(pixel.x, pixel.y);
        if EXCLUDED_CLASSES.contains(&center) {
            return Some(center);
        }
        sample_majority(raster.as_ref(), pixel.x, pixel.y, SMOOTHING_RADIUS, &EXCLUDED_CLASSES)
    }

    pub fn invalidate_all(&self) {
        self.files.invalidate_all();
    }

    #[must_use]
    pub fn cached_files(&self) -> usize {
        self.files.len()
    }
}

fn load_file(
    disk: &DiskCache,
    fetcher: &dyn TileFetcher,
    template: &str,
    name: &str,
) -> Result<RasterResult<Arc<GeoTiffRaster>>> {
    let key = format!("{name}.tif");
    let url = (!template.trim().is_empty()).then(|| expand_template(template, &[("tile", name)]));
    let Some(path) = disk.fetch_to_file(&key, fetcher, url.as_deref())? else {
        debug!(name, "land-cover file missing");
        return Ok(RasterResult::Missing);
    };

    let opened = GeoTiffRaster::open(&path);
    if let Err(error) = &opened {
        if error.is_permanent() {
            // Structurally broken: drop it so a later session downloads again.
            if let Err(error) = disk.remove(&key) {
                debug!(name, %error, "could not remove cached file");
            }
        }
    }
    classify("land-cover", name, opened.map(|raster| Some(Arc::new(raster))))
}
