//! Conversions between world space, geographic space, and raster addresses.
//!
//! World space is the generator's block grid: `x` grows east, `z` grows south,
//! and one unit covers `world_scale` meters. Geographic degrees derive from
//! the equatorial circumference, so the mapping is a plain equirectangular
//! scale (no Mercator distortion in world space).

use std::f64::consts::PI;

use super::{GeoCoord, PixelCoordinate, TileAddress, MAX_ZOOM};

/// Equatorial circumference in meters (WGS84 semi-major axis).
pub const EQUATOR_CIRCUMFERENCE: f64 = 40_075_016.685_578_49;
pub const METERS_PER_DEGREE: f64 = EQUATOR_CIRCUMFERENCE / 360.0;

/// Latitude limit of the square Web Mercator world.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Source pixels per world unit above which sample positions are snapped.
pub const DOWNSAMPLE_THRESHOLD: f64 = 4.0;
pub const MAX_DOWNSAMPLE_STEP: i64 = 256;

#[inline]
#[must_use]
pub fn blocks_per_degree(world_scale: f64) -> f64 {
    METERS_PER_DEGREE / world_scale
}

/// World coordinates to longitude/latitude.
///
/// Returns `None` ("unknown") for a non-positive scale or when the result
/// falls outside the globe. Longitude is never wrapped.
#[must_use]
pub fn world_to_geographic(world_x: f64, world_z: f64, world_scale: f64) -> Option<GeoCoord> {
    if !(world_scale.is_finite() && world_scale > 0.0) {
        return None;
    }
    let bpd = blocks_per_degree(world_scale);
    GeoCoord::new(world_x / bpd, -world_z / bpd)
}

/// Inverse of [`world_to_geographic`].
#[must_use]
pub fn geographic_to_world(coord: GeoCoord, world_scale: f64) -> (f64, f64) {
    let bpd = blocks_per_degree(world_scale);
    (coord.lon() * bpd, -coord.lat() * bpd)
}

/// Snap step (in world units) for a source of the given resolution.
///
/// One world unit spans `world_scale / resolution` source pixels. Past the
/// threshold, neighbouring columns would each pull a distinct source pixel, so
/// positions are grouped into `step`-sized cells instead.
#[must_use]
pub fn downsample_step(world_scale: f64, source_resolution_meters: f64) -> i64 {
    if !(source_resolution_meters > 0.0) {
        return 1;
    }
    let pixels_per_unit = world_scale / source_resolution_meters;
    if !(pixels_per_unit > DOWNSAMPLE_THRESHOLD) {
        return 1;
    }
    ((pixels_per_unit / DOWNSAMPLE_THRESHOLD).floor() as i64).clamp(1, MAX_DOWNSAMPLE_STEP)
}

/// Center of the `step`-sized cell containing `world`.
#[inline]
#[must_use]
pub fn snap_to_cell(world: f64, step: i64) -> f64 {
    if step <= 1 {
        return world;
    }
    let step = step as f64;
    (world / step).floor() * step + step / 2.0
}

/// Applies [`downsample_step`] and [`snap_to_cell`] to both axes.
#[must_use]
pub fn downsample(
    world_x: f64,
    world_z: f64,
    world_scale: f64,
    source_resolution_meters: f64,
) -> (f64, f64) {
    let step = downsample_step(world_scale, source_resolution_meters);
    (snap_to_cell(world_x, step), snap_to_cell(world_z, step))
}

#[inline]
#[must_use]
pub fn clamp_mercator_lat(lat: f64) -> f64 {
    lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT)
}

/// Fractional slippy-tile position (in tile units) of a coordinate.
#[must_use]
pub fn geographic_to_tile_position(coord: GeoCoord, zoom: u8) -> (f64, f64) {
    let n = 2f64.powi(i32::from(zoom));
    let x = (coord.lon() + 180.0) / 360.0 * n;
    let lat_rad = clamp_mercator_lat(coord.lat()).to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x, y)
}

/// Tile containing a coordinate. `lon = 180` and the clamped poles land in the
/// last row/column rather than one past it.
#[must_use]
pub fn geographic_to_tile_address(coord: GeoCoord, zoom: u8) -> Option<TileAddress> {
    if zoom > MAX_ZOOM {
        return None;
    }
    let max_index = (1u64 << zoom) - 1;
    let (x, y) = geographic_to_tile_position(coord, zoom);
    let tx = (x.floor().max(0.0) as u64).min(max_index);
    let ty = (y.floor().max(0.0) as u64).min(max_index);
    TileAddress::new(zoom, u32::try_from(tx).ok()?, u32::try_from(ty).ok()?)
}

/// Inverse Mercator for a fractional tile position.
#[must_use]
pub fn tile_position_to_geographic(x: f64, y: f64, zoom: u8) -> Option<GeoCoord> {
    let n = 2f64.powi(i32::from(zoom));
    let lon = x / n * 360.0 - 180.0;
    let lat = (PI - 2.0 * PI * y / n).sinh().atan().to_degrees();
    GeoCoord::new(lon, lat)
}

/// North-west corner of a tile.
#[must_use]
pub fn tile_address_to_geographic(address: TileAddress) -> GeoCoord {
    let n = 2f64.powi(i32::from(address.zoom));
    let lon = f64::from(address.x) / n * 360.0 - 180.0;
    let lat = (PI - 2.0 * PI * f64::from(address.y) / n).sinh().atan().to_degrees();
    // Both values are inside the globe for any valid address.
    GeoCoord { lon, lat }
}

/// Fractional pixel position under a north-up pixel-scale/tiepoint transform.
#[must_use]
pub fn geographic_to_pixel_position(
    coord: GeoCoord,
    pixel_scale_x: f64,
    pixel_scale_y: f64,
    tie_lon: f64,
    tie_lat: f64,
) -> Option<(f64, f64)> {
    if !(pixel_scale_x > 0.0 && pixel_scale_y > 0.0) {
        return None;
    }
    let px = (coord.lon() - tie_lon) / pixel_scale_x;
    let py = (tie_lat - coord.lat()) / pixel_scale_y;
    Some((px, py))
}

/// Pixel containing a coordinate, or `None` when it lies before the tiepoint.
#[must_use]
pub fn geographic_to_pixel(
    coord: GeoCoord,
    pixel_scale_x: f64,
    pixel_scale_y: f64,
    tie_lon: f64,
    tie_lat: f64,
) -> Option<PixelCoordinate> {
    let (px, py) =
        geographic_to_pixel_position(coord, pixel_scale_x, pixel_scale_y, tie_lon, tie_lat)?;
    if px < 0.0 || py < 0.0 || !px.is_finite() || !py.is_finite() {
        return None;
    }
    Some(PixelCoordinate {
        x: px.floor() as usize,
        y: py.floor() as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn coord(lon: f64, lat: f64) -> GeoCoord {
        GeoCoord::new(lon, lat).unwrap()
    }

    #[test]
    fn test_world_origin_is_null_island() {
        let c = world_to_geographic(0.0, 0.0, 1.0).unwrap();
        assert_eq!(c.to_tuple(), (0.0, 0.0));
    }

    #[test]
    fn test_world_z_points_south() {
        let bpd = blocks_per_degree(30.0);
        let c = world_to_geographic(10.0 * bpd, 20.0 * bpd, 30.0).unwrap();
        assert!((c.lon() - 10.0).abs() < EPS);
        assert!((c.lat() + 20.0).abs() < EPS);

        let (x, z) = geographic_to_world(c, 30.0);
        assert!((x - 10.0 * bpd).abs() < 1e-6);
        assert!((z - 20.0 * bpd).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_longitude_is_unknown() {
        let bpd = blocks_per_degree(1.0);
        assert!(world_to_geographic(200.0 * bpd, 0.0, 1.0).is_none());
        assert!(world_to_geographic(-181.0 * bpd, 0.0, 1.0).is_none());
        assert!(world_to_geographic(0.0, 95.0 * bpd, 1.0).is_none());
    }

    #[test]
    fn test_invalid_scale_is_unknown() {
        assert!(world_to_geographic(0.0, 0.0, 0.0).is_none());
        assert!(world_to_geographic(0.0, 0.0, -2.0).is_none());
        assert!(world_to_geographic(0.0, 0.0, f64::NAN).is_none());
    }

    #[test]
    fn test_downsample_step() {
        // 10 m source at 1 m/unit: far below the threshold.
        assert_eq!(downsample_step(1.0, 10.0), 1);
        // Exactly 4 pixels per unit is not above the threshold.
        assert_eq!(downsample_step(40.0, 10.0), 1);
        // 100 pixels per unit -> floor(100 / 4) = 25.
        assert_eq!(downsample_step(1000.0, 10.0), 25);
        // Capped.
        assert_eq!(downsample_step(1_000_000.0, 1.0), MAX_DOWNSAMPLE_STEP);
        assert_eq!(downsample_step(1000.0, 0.0), 1);
    }

    #[test]
    fn test_snap_to_cell_center() {
        assert_eq!(snap_to_cell(3.7, 1), 3.7);
        assert_eq!(snap_to_cell(0.0, 8), 4.0);
        assert_eq!(snap_to_cell(7.9, 8), 4.0);
        assert_eq!(snap_to_cell(8.0, 8), 12.0);
        assert_eq!(snap_to_cell(-0.5, 8), -4.0);
        assert_eq!(downsample(9.0, -1.0, 1000.0, 10.0), (12.5, -12.5));
    }

    #[test]
    fn test_tile_address_new_york_z16() {
        let tile = geographic_to_tile_address(coord(-74.0060, 40.7128), 16).unwrap();
        assert_eq!(tile.x, 19295);
        assert_eq!(tile.y, 24640);
        assert_eq!(tile.zoom, 16);
    }

    #[test]
    fn test_tile_address_edges_clamp() {
        let east = geographic_to_tile_address(coord(180.0, 0.0), 3).unwrap();
        assert_eq!(east.x, 7);
        let north = geographic_to_tile_address(coord(0.0, 90.0), 3).unwrap();
        assert_eq!(north.y, 0);
        let south = geographic_to_tile_address(coord(0.0, -90.0), 3).unwrap();
        assert_eq!(south.y, 7);
        assert!(geographic_to_tile_address(coord(0.0, 0.0), MAX_ZOOM + 1).is_none());
    }

    #[test]
    fn test_projection_round_trip_within_one_pixel() {
        let points = [
            (0.0, 0.0),
            (10.0, 51.5),
            (-122.4, 37.8),
            (139.7, 35.7),
            (-179.9, -84.9),
            (179.9, 84.9),
        ];
        for zoom in [0u8, 4, 10, 16] {
            let pixel_degrees = 360.0 / (2f64.powi(i32::from(zoom)) * 256.0);
            for (lon, lat) in points {
                let c = coord(lon, lat);
                let (x, y) = geographic_to_tile_position(c, zoom);
                let back = tile_position_to_geographic(x, y, zoom).unwrap();
                assert!((back.lon() - lon).abs() <= pixel_degrees, "lon {lon} z{zoom}");
                assert!((back.lat() - lat).abs() <= pixel_degrees, "lat {lat} z{zoom}");

                let tile = geographic_to_tile_address(c, zoom).unwrap();
                let corner = tile_address_to_geographic(tile);
                let tile_degrees = 360.0 / 2f64.powi(i32::from(zoom));
                assert!(corner.lon() <= lon + EPS && lon - corner.lon() <= tile_degrees + EPS);
                assert!(corner.lat() + EPS >= lat);
            }
        }
    }

    #[test]
    fn test_pixel_transform() {
        // 0.5 degree pixels with the tiepoint at the north-west corner of the globe.
        let p = geographic_to_pixel(coord(0.25, 0.25), 0.5, 0.5, -180.0, 90.0).unwrap();
        assert_eq!(p, PixelCoordinate { x: 360, y: 179 });

        assert!(geographic_to_pixel(coord(-10.0, 0.0), 0.5, 0.5, 0.0, 90.0).is_none());
        assert!(geographic_to_pixel(coord(0.0, 0.0), 0.0, 0.5, -180.0, 90.0).is_none());

        let (px, py) =
            geographic_to_pixel_position(coord(-179.75, 89.0), 0.5, 0.5, -180.0, 90.0).unwrap();
        assert!((px - 0.5).abs() < EPS);
        assert!((py - 2.0).abs() < EPS);
    }
}
