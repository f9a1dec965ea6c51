pub mod projection;

/// Longitude bounds accepted by every source.
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;
/// Latitude bounds for geographic (non-Mercator) sources.
pub const MIN_LAT: f64 = -90.0;
pub const MAX_LAT: f64 = 90.0;

/// Highest slippy zoom whose tile IDs fit the archive addressing scheme.
pub const MAX_ZOOM: u8 = 26;

/// A validated longitude/latitude pair in degrees.
///
/// Construction rejects anything outside `[-180, 180] x [-90, 90]` (and
/// non-finite values), so holding a `GeoCoord` means the coordinate is
/// meaningful for a geographic source. Mercator sources clamp latitude further
/// at projection time.
///
/// # Example
///
/// ```rust
/// use terra_tiles::GeoCoord;
///
/// let sf = GeoCoord::new(-122.4, 37.8).unwrap();
/// assert_eq!(sf.lon(), -122.4);
/// assert!(GeoCoord::new(200.0, 0.0).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoord {
    lon: f64,
    lat: f64,
}

impl GeoCoord {
    /// Returns `None` for out-of-range or non-finite input.
    #[inline]
    #[must_use]
    pub fn new(lon: f64, lat: f64) -> Option<Self> {
        if !lon.is_finite() || !lat.is_finite() {
            return None;
        }
        if !(MIN_LON..=MAX_LON).contains(&lon) || !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return None;
        }
        Some(Self { lon, lat })
    }

    #[inline]
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.lon
    }

    #[inline]
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat
    }

    #[inline]
    #[must_use]
    pub fn to_tuple(&self) -> (f64, f64) {
        (self.lon, self.lat)
    }
}

/// A slippy tile address. Identity is all three fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileAddress {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    /// Returns `None` unless `x` and `y` are in `[0, 2^zoom)`.
    #[must_use]
    pub fn new(zoom: u8, x: u32, y: u32) -> Option<Self> {
        if zoom > MAX_ZOOM {
            return None;
        }
        let n = 1u64 << zoom;
        if u64::from(x) >= n || u64::from(y) >= n {
            return None;
        }
        Some(Self { zoom, x, y })
    }

    /// Number of tiles along one axis at this zoom.
    #[inline]
    #[must_use]
    pub fn tiles_per_axis(&self) -> u64 {
        1u64 << self.zoom
    }

    /// Filesystem-safe relative path for the disk mirror.
    #[must_use]
    pub fn cache_path(&self, extension: &str) -> String {
        format!("{}/{}/{}.{}", self.zoom, self.x, self.y, extension)
    }
}

impl std::fmt::Display for TileAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Integer offsets into an untiled raster's full pixel grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelCoordinate {
    pub x: usize,
    pub y: usize,
}

impl From<(usize, usize)> for PixelCoordinate {
    #[inline]
    fn from((x, y): (usize, usize)) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_coord_bounds() {
        assert!(GeoCoord::new(180.0, 90.0).is_some());
        assert!(GeoCoord::new(-180.0, -90.0).is_some());
        assert!(GeoCoord::new(180.0001, 0.0).is_none());
        assert!(GeoCoord::new(0.0, -90.5).is_none());
        assert!(GeoCoord::new(f64::NAN, 0.0).is_none());
        assert!(GeoCoord::new(0.0, f64::INFINITY).is_none());
    }

    #[test]
    fn test_tile_address_bounds() {
        assert!(TileAddress::new(0, 0, 0).is_some());
        assert!(TileAddress::new(0, 1, 0).is_none());
        assert!(TileAddress::new(3, 7, 7).is_some());
        assert!(TileAddress::new(3, 8, 0).is_none());
        assert!(TileAddress::new(MAX_ZOOM + 1, 0, 0).is_none());
    }

    #[test]
    fn test_tile_address_identity() {
        let a = TileAddress::new(4, 3, 2).unwrap();
        let b = TileAddress::new(4, 3, 2).unwrap();
        let c = TileAddress::new(5, 3, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.cache_path("png"), "4/3/2.png");
        assert_eq!(a.to_string(), "4/3/2");
    }
}
