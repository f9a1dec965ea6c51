//! The sampling facade handed to world generation and preview code.

use std::sync::Arc;

use tracing::debug;

use crate::config::GeoDataConfig;
use crate::error::Result;
use crate::executor::{PreviewRequests, PreviewTicket, WorkerPool};
use crate::http::{HttpFetcher, TileFetcher};
use crate::source::land_mask::default_reader_factory;
use crate::source::{
    ClimateSource, ElevationSource, LandCoverSource, LandMaskSample, LandMaskSource, ReaderFactory,
    koppen_name,
};

/// The four data sources. Cheap to share; every method takes `&self`.
pub struct GeoSources {
    pub elevation: ElevationSource,
    pub land_cover: LandCoverSource,
    pub climate: ClimateSource,
    pub land_mask: LandMaskSource,
}

impl GeoSources {
    /// Elevation in meters, `0.0` where unknown.
    pub fn sample_elevation_meters(
        &self,
        world_x: f64,
        world_z: f64,
        world_scale: f64,
        high_res_ocean: bool,
    ) -> f64 {
        self.try_sample_elevation_meters(world_x, world_z, world_scale, high_res_ocean)
            .unwrap_or(0.0)
    }

    pub fn try_sample_elevation_meters(
        &self,
        world_x: f64,
        world_z: f64,
        world_scale: f64,
        high_res_ocean: bool,
    ) -> Option<f64> {
        self.elevation
            .sample(world_x, world_z, world_scale, high_res_ocean)
    }

    /// Land-cover class, `0` (no-data) where unknown.
    pub fn sample_land_cover_class(&self, world_x: f64, world_z: f64, world_scale: f64) -> u8 {
        self.land_cover.sample_class(world_x, world_z, world_scale)
    }

    /// Köppen-Geiger class name such as `"Cfb"`.
    pub fn sample_climate_code(&self, world_x: f64, world_z: f64, world_scale: f64) -> Option<String> {
        let code = self.climate.sample_code(world_x, world_z, world_scale)?;
        koppen_name(code).map(str::to_string)
    }

    pub fn sample_land_mask(&self, world_x: f64, world_z: f64, world_scale: f64) -> LandMaskSample {
        self.land_mask.sample(world_x, world_z, world_scale)
    }

    pub fn invalidate_all(&self) {
        self.elevation.invalidate_all();
        self.land_cover.invalidate_all();
        self.climate.invalidate_all();
        self.land_mask.invalidate_all();
    }
}

/// Owns the data sources and the worker pool.
///
/// Build one per process and share it behind an `Arc`.
pub struct GeoData {
    config: GeoDataConfig,
    sources: Arc<GeoSources>,
    pool: WorkerPool,
}

impl GeoData {
    pub fn new(config: GeoDataConfig) -> Result<Self> {
        let fetcher: Arc<dyn TileFetcher> = Arc::new(HttpFetcher::new(&config.http)?);
        Self::with_fetcher(config, fetcher)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GeoDataConfig::from_env())
    }

    /// Uses `fetcher` for whole-tile downloads; the land mask still reads its
    /// archive from disk or over HTTP ranges.
    pub fn with_fetcher(config: GeoDataConfig, fetcher: Arc<dyn TileFetcher>) -> Result<Self> {
        let factory = default_reader_factory(&config.land_mask, &config.http);
        Self::with_components(config, fetcher, factory)
    }

    pub fn with_components(
        config: GeoDataConfig,
        fetcher: Arc<dyn TileFetcher>,
        land_mask_reader: ReaderFactory,
    ) -> Result<Self> {
        let sources = GeoSources {
            elevation: ElevationSource::new(config.elevation.clone(), Arc::clone(&fetcher)),
            land_cover: LandCoverSource::new(config.land_cover.clone(), Arc::clone(&fetcher)),
            climate: ClimateSource::new(config.climate.clone(), fetcher),
            land_mask: LandMaskSource::with_reader_factory(config.land_mask.clone(), land_mask_reader),
        };
        let pool = WorkerPool::new(config.worker_threads)?;
        debug!(
            elevation = %config.elevation.cache_dir.display(),
            land_cover = %config.land_cover.cache_dir.display(),
            climate = %config.climate.cache_dir.display(),
            land_mask = %config.land_mask.cache_dir.display(),
            "geodata sources ready"
        );
        Ok(Self {
            config,
            sources: Arc::new(sources),
            pool,
        })
    }

    #[must_use]
    pub fn config(&self) -> &GeoDataConfig {
        &self.config
    }

    #[must_use]
    pub fn sources(&self) -> &Arc<GeoSources> {
        &self.sources
    }

    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn sample_elevation_meters(
        &self,
        world_x: f64,
        world_z: f64,
        world_scale: f64,
        high_res_ocean: bool,
    ) -> f64 {
        self.sources
            .sample_elevation_meters(world_x, world_z, world_scale, high_res_ocean)
    }

    pub fn try_sample_elevation_meters(
        &self,
        world_x: f64,
        world_z: f64,
        world_scale: f64,
        high_res_ocean: bool,
    ) -> Option<f64> {
        self.sources
            .try_sample_elevation_meters(world_x, world_z, world_scale, high_res_ocean)
    }

    pub fn sample_land_cover_class(&self, world_x: f64, world_z: f64, world_scale: f64) -> u8 {
        self.sources
            .sample_land_cover_class(world_x, world_z, world_scale)
    }

    pub fn sample_climate_code(&self, world_x: f64, world_z: f64, world_scale: f64) -> Option<String> {
        self.sources.sample_climate_code(world_x, world_z, world_scale)
    }

    pub fn sample_land_mask(&self, world_x: f64, world_z: f64, world_scale: f64) -> LandMaskSample {
        self.sources.sample_land_mask(world_x, world_z, world_scale)
    }

    /// Builds a preview on the worker pool, superseding any earlier request
    /// on `requests`. Collect the result with [`PreviewRequests::poll`].
    pub fn submit_preview<T, F>(&self, requests: &PreviewRequests<T>, build: F) -> PreviewTicket
    where
        T: Send + 'static,
        F: FnOnce(&GeoSources) -> T + Send + 'static,
    {
        let sources = Arc::clone(&self.sources);
        requests.submit(&self.pool, move || build(&sources))
    }

    /// Drops every cached tile, raster and archive handle.
    pub fn invalidate_all(&self) {
        self.sources.invalidate_all();
    }
}
