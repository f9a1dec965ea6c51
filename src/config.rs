//! Construction-time configuration for the geodata sources.
//!
//! Values are read once when [`crate::GeoData`] is built. The defaults point
//! at the public elevation and land-cover buckets; the climate raster and the
//! land-mask archive have no public default and must be configured through
//! the environment (or placed in the disk cache ahead of time).
//!
//! Environment overrides:
//! - `TERRA_TILES_CACHE_DIR` - root directory for the on-disk caches
//! - `TERRA_TILES_ELEVATION_URL` - elevation tile URL template
//! - `TERRA_TILES_LAND_COVER_URL` - land-cover file URL template
//! - `TERRA_TILES_CLIMATE_URL` - climate raster URL
//! - `TERRA_TILES_LAND_MASK_URL` - land-mask archive URL
//! - `TERRA_TILES_CACHE_CAPACITY` - in-memory tile capacity for every source

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::geometry::projection::EQUATOR_CIRCUMFERENCE;

pub const MIN_CACHE_CAPACITY: usize = 64;
pub const MAX_CACHE_CAPACITY: usize = 1024;

const MIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_USER_AGENT: &str = concat!("terra-tiles/", env!("CARGO_PKG_VERSION"));

/// Outbound HTTP settings shared by every remote source.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout, including reading the body
    pub read_timeout: Duration,
    /// Fixed User-Agent sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpConfig {
    /// Timeouts clamped to the supported 5-15 second window.
    #[must_use]
    pub fn clamped(&self) -> Self {
        Self {
            connect_timeout: self.connect_timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT),
            read_timeout: self.read_timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT),
            user_agent: self.user_agent.clone(),
        }
    }
}

/// Per-source settings.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Directory holding this source's on-disk mirror
    pub cache_dir: PathBuf,
    /// URL or URL template. Empty disables network access for the source.
    pub url: String,
    /// In-memory tile capacity (clamped to 64..=1024)
    pub capacity: usize,
    /// Ground resolution of one source pixel, used for downsampling
    pub resolution_meters: f64,
    /// Zoom level for slippy-tile sources, ignored by single-raster sources
    pub zoom: u8,
}

impl SourceConfig {
    #[must_use]
    pub fn cache_capacity(&self) -> NonZeroUsize {
        let clamped = self.capacity.clamp(MIN_CACHE_CAPACITY, MAX_CACHE_CAPACITY);
        NonZeroUsize::new(clamped).unwrap_or(NonZeroUsize::MIN)
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Top-level configuration for [`crate::GeoData`].
#[derive(Debug, Clone)]
pub struct GeoDataConfig {
    pub elevation: SourceConfig,
    pub land_cover: SourceConfig,
    pub climate: SourceConfig,
    pub land_mask: SourceConfig,
    pub http: HttpConfig,
    /// Threads in the background worker pool
    pub worker_threads: usize,
}

impl Default for GeoDataConfig {
    fn default() -> Self {
        Self::with_cache_root(PathBuf::from("geodata-cache"))
    }
}

impl GeoDataConfig {
    /// Default settings with every source mirrored under `root`.
    #[must_use]
    pub fn with_cache_root(root: PathBuf) -> Self {
        let elevation_zoom = 12;
        Self {
            elevation: SourceConfig {
                cache_dir: root.join("elevation"),
                url: "https://s3.amazonaws.com/elevation-tiles-prod/terrarium/{z}/{x}/{y}.png"
                    .to_string(),
                capacity: 256,
                resolution_meters: slippy_resolution_meters(elevation_zoom, 256),
                zoom: elevation_zoom,
            },
            land_cover: SourceConfig {
                cache_dir: root.join("land-cover"),
                url: "https://esa-worldcover.s3.eu-central-1.amazonaws.com/v200/2021/map/ESA_WorldCover_10m_2021_v200_{tile}_Map.tif"
                    .to_string(),
                capacity: MIN_CACHE_CAPACITY,
                resolution_meters: 10.0,
                zoom: 0,
            },
            climate: SourceConfig {
                cache_dir: root.join("koppen"),
                url: String::new(),
                capacity: MIN_CACHE_CAPACITY,
                resolution_meters: 1000.0,
                zoom: 0,
            },
            land_mask: SourceConfig {
                cache_dir: root.join("land-mask"),
                url: String::new(),
                capacity: 512,
                resolution_meters: slippy_resolution_meters(10, 256),
                zoom: 10,
            },
            http: HttpConfig::default(),
            worker_threads: 4,
        }
    }

    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = match std::env::var("TERRA_TILES_CACHE_DIR") {
            Ok(dir) if !dir.trim().is_empty() => Self::with_cache_root(PathBuf::from(dir)),
            _ => Self::default(),
        };

        let url_overrides = [
            ("TERRA_TILES_ELEVATION_URL", &mut config.elevation),
            ("TERRA_TILES_LAND_COVER_URL", &mut config.land_cover),
            ("TERRA_TILES_CLIMATE_URL", &mut config.climate),
            ("TERRA_TILES_LAND_MASK_URL", &mut config.land_mask),
        ];
        for (var, source) in url_overrides {
            if let Ok(url) = std::env::var(var) {
                source.url = url;
            }
        }

        if let Some(capacity) = std::env::var("TERRA_TILES_CACHE_CAPACITY")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            for source in [
                &mut config.elevation,
                &mut config.land_cover,
                &mut config.climate,
                &mut config.land_mask,
            ] {
                source.capacity = capacity;
            }
        }

        config
    }
}

/// Equatorial ground size of one pixel of a `tile_size` slippy tile at `zoom`.
#[must_use]
pub fn slippy_resolution_meters(zoom: u8, tile_size: u32) -> f64 {
    EQUATOR_CIRCUMFERENCE / (f64::from(tile_size) * 2f64.powi(i32::from(zoom)))
}
