//! Hilbert-curve tile addressing.
//!
//! A tile's ID is the number of tiles at all coarser zooms, `(4^z - 1) / 3`,
//! plus its distance along the Hilbert curve covering zoom `z`.

use crate::geometry::MAX_ZOOM;

#[inline]
fn zoom_base(z: u8) -> u64 {
    ((1u64 << (2 * u32::from(z))) - 1) / 3
}

fn rotate(n: u64, x: &mut u64, y: &mut u64, rx: u64, ry: u64) {
    if ry == 0 {
        if rx == 1 {
            *x = n - 1 - *x;
            *y = n - 1 - *y;
        }
        std::mem::swap(x, y);
    }
}

fn xy_to_hilbert(n: u64, mut x: u64, mut y: u64) -> u64 {
    let mut d = 0;
    let mut s = n / 2;
    while s > 0 {
        let rx = u64::from(x & s > 0);
        let ry = u64::from(y & s > 0);
        d += s * s * ((3 * rx) ^ ry);
        rotate(n, &mut x, &mut y, rx, ry);
        s /= 2;
    }
    d
}

fn hilbert_to_xy(n: u64, d: u64) -> (u64, u64) {
    let (mut x, mut y) = (0, 0);
    let mut t = d;
    let mut s = 1;
    while s < n {
        let rx = 1 & (t / 2);
        let ry = 1 & (t ^ rx);
        rotate(s, &mut x, &mut y, rx, ry);
        x += s * rx;
        y += s * ry;
        t /= 4;
        s *= 2;
    }
    (x, y)
}

/// Tile ID for (z, x, y), or `None` when the address is off the pyramid.
#[must_use]
pub fn zxy_to_tile_id(z: u8, x: u32, y: u32) -> Option<u64> {
    if z > MAX_ZOOM {
        return None;
    }
    let n = 1u64 << z;
    let (x, y) = (u64::from(x), u64::from(y));
    if x >= n || y >= n {
        return None;
    }
    Some(zoom_base(z) + xy_to_hilbert(n, x, y))
}

/// Inverse of [`zxy_to_tile_id`].
#[must_use]
pub fn tile_id_to_zxy(tile_id: u64) -> Option<(u8, u32, u32)> {
    for z in 0..=MAX_ZOOM {
        let base = zoom_base(z);
        let count = 1u64 << (2 * u32::from(z));
        if tile_id < base + count {
            let (x, y) = hilbert_to_xy(1u64 << z, tile_id - base);
            return Some((z, u32::try_from(x).ok()?, u32::try_from(y).ok()?));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_ids() {
        assert_eq!(zxy_to_tile_id(0, 0, 0), Some(0));
        assert_eq!(zxy_to_tile_id(1, 0, 0), Some(1));
        assert_eq!(zxy_to_tile_id(1, 0, 1), Some(2));
        assert_eq!(zxy_to_tile_id(1, 1, 1), Some(3));
        assert_eq!(zxy_to_tile_id(1, 1, 0), Some(4));
        assert_eq!(zxy_to_tile_id(2, 0, 0), Some(5));
        assert_eq!(zxy_to_tile_id(3, 0, 0), Some(21));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(zxy_to_tile_id(1, 2, 0), None);
        assert_eq!(zxy_to_tile_id(0, 0, 1), None);
        assert_eq!(zxy_to_tile_id(MAX_ZOOM + 1, 0, 0), None);
    }

    #[test]
    fn test_bijection_per_zoom() {
        for z in 0..=6u8 {
            let n = 1u32 << z;
            let base = zoom_base(z);
            let mut seen = HashSet::new();
            for x in 0..n {
                for y in 0..n {
                    let id = zxy_to_tile_id(z, x, y).unwrap();
                    assert!(id >= base && id < base + u64::from(n) * u64::from(n));
                    assert!(seen.insert(id), "collision at z{z} ({x},{y})");
                    assert_eq!(tile_id_to_zxy(id), Some((z, x, y)));
                }
            }
            assert_eq!(seen.len() as u64, u64::from(n) * u64::from(n));
        }
    }

    #[test]
    fn test_deep_zoom_round_trip() {
        for (z, x, y) in [(12u8, 1205, 1539), (20, 524_287, 1), (MAX_ZOOM, (1 << 26) - 1, 12345)] {
            let id = zxy_to_tile_id(z, x, y).unwrap();
            assert_eq!(tile_id_to_zxy(id), Some((z, x, y)));
        }
    }
}
