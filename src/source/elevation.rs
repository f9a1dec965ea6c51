//! Surface elevation from Terrarium-encoded PNG slippy tiles.

use std::sync::Arc;

use tracing::{debug, warn};

use super::classify;
use crate::config::SourceConfig;
use crate::disk_cache::DiskCache;
use crate::error::Result;
use crate::geometry::projection::{downsample, geographic_to_tile_position, world_to_geographic};
use crate::geometry::{GeoCoord, TileAddress};
use crate::http::{TileFetcher, expand_template};
use crate::raster::{RasterResult, RasterTile};
use crate::sampler::sample_bilinear_tiled;
use crate::tile_cache::TileCache;

/// Zoom levels below the configured zoom used for the coarse ocean lookup.
const OCEAN_ZOOM_OFFSET: u8 = 3;

type ElevationCache = TileCache<TileAddress, RasterResult<Arc<RasterTile>>>;

/// Decodes a Terrarium PNG: `meters = R * 256 + G + B / 256 - 32768`,
/// rounded to whole meters.
pub fn decode_terrarium(bytes: &[u8]) -> Result<RasterTile> {
    let rgb = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)?.to_rgb8();
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let data = rgb
        .pixels()
        .map(|p| {
            let meters = f64::from(p[0]) * 256.0 + f64::from(p[1]) + f64::from(p[2]) / 256.0
                - 32768.0;
            meters.round().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
        })
        .collect();
    RasterTile::new_i16(width, height, data)
}

pub struct ElevationSource {
    config: SourceConfig,
    tiles: ElevationCache,
}

impl ElevationSource {
    pub fn new(config: SourceConfig, fetcher: Arc<dyn TileFetcher>) -> Self {
        let disk = DiskCache::new(config.cache_dir.clone());
        let template = config.url.clone();
        let tiles = TileCache::new(
            "elevation",
            config.cache_capacity(),
            Arc::new(move |address: &TileAddress| {
                load_tile(&disk, fetcher.as_ref(), &template, *address)
            }),
        );
        Self { config, tiles }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Decoded tile, or `None` when it is missing or the load failed.
    pub fn tile(&self, address: TileAddress) -> Option<Arc<RasterTile>> {
        self.tiles.get(&address)?.into_ready()
    }

    /// Elevation in meters at a world position, `None` when unknown.
    ///
    /// With `high_res_ocean` off, a coarser tile is consulted first and a
    /// below-sea-level answer from it is returned as is; full resolution is
    /// only fetched for land.
    pub fn sample(
        &self,
        world_x: f64,
        world_z: f64,
        world_scale: f64,
        high_res_ocean: bool,
    ) -> Option<f64> {
        let (x, z) = downsample(world_x, world_z, world_scale, self.config.resolution_meters);
        let coord = world_to_geographic(x, z, world_scale)?;
        let zoom = self.config.zoom;

        if !high_res_ocean && zoom > 0 {
            let coarse = zoom.saturating_sub(OCEAN_ZOOM_OFFSET);
            if let Some(meters) = self.sample_coord(coord, coarse) {
                if meters < 0.0 {
                    return Some(meters);
                }
            }
        }
        self.sample_coord(coord, zoom)
    }

    /// Bilinear elevation at a coordinate and zoom, stitched across tiles.
    pub fn sample_coord(&self, coord: GeoCoord, zoom: u8) -> Option<f64> {
        let (tx, ty) = geographic_to_tile_position(coord, zoom);
        sample_bilinear_tiled(zoom, tx, ty, |x, y| self.tile(TileAddress::new(zoom, x, y)?))
    }

    pub fn invalidate_all(&self) {
        self.tiles.invalidate_all();
    }

    #[must_use]
    pub fn cached_tiles(&self) -> usize {
        self.tiles.len()
    }
}

fn load_tile(
    disk: &DiskCache,
    fetcher: &dyn TileFetcher,
    template: &str,
    address: TileAddress,
) -> Result<RasterResult<Arc<RasterTile>>> {
    let key = address.cache_path("png");
    let url = (!template.trim().is_empty()).then(|| {
        expand_template(
            template,
            &[
                ("z", &address.zoom.to_string()),
                ("x", &address.x.to_string()),
                ("y", &address.y.to_string()),
            ],
        )
    });

    let Some(bytes) = disk.fetch_through(&key, fetcher, url.as_deref())? else {
        debug!(%address, "elevation tile missing");
        return Ok(RasterResult::Missing);
    };
    let decoded = decode_terrarium(&bytes).inspect_err(|error| {
        warn!(%address, %error, "discarding undecodable elevation tile");
        if let Err(error) = disk.remove(&key) {
            warn!(%address, %error, "could not remove cached tile");
        }
    });
    classify("elevation", &key, decoded.map(|tile| Some(Arc::new(tile))))
}
