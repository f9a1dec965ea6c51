//! The four sampled data sources.
//!
//! Each source owns its disk mirror and in-memory caches, and turns loader
//! outcomes into [`RasterResult`]s at the cache boundary:
//! - a decoded tile is `Ready`
//! - a tile that does not exist upstream is `Missing` (cached)
//! - a structurally unusable file or archive is `Unavailable` (cached)
//! - anything transient is an error, which the cache logs and does not keep

pub mod climate;
pub mod elevation;
pub mod land_cover;
pub mod land_mask;

use tracing::warn;

use crate::error::Result;
use crate::raster::RasterResult;

pub use climate::{ClimateSource, KOPPEN_CLASSES, koppen_name};
pub use elevation::{ElevationSource, decode_terrarium};
pub use land_cover::{LandCoverSource, worldcover_tile_name};
pub use land_mask::{LandMaskSample, LandMaskSource, ReaderFactory};

/// Maps a loader outcome onto the cached result.
///
/// Permanent errors become `Unavailable` so the source stops retrying; other
/// errors are returned and the cache leaves the key empty.
pub(crate) fn classify<T>(source: &str, key: &str, outcome: Result<Option<T>>) -> Result<RasterResult<T>> {
    match outcome {
        Ok(Some(value)) => Ok(RasterResult::Ready(value)),
        Ok(None) => Ok(RasterResult::Missing),
        Err(error) if error.is_permanent() => {
            warn!(source, key, %error, "source data unusable, marking unavailable");
            Ok(RasterResult::Unavailable)
        }
        Err(error) => Err(error),
    }
}
