//! Resampling of decoded rasters: nearest, bilinear (with tile stitching) and
//! majority smoothing of class rasters.
//!
//! Pixel `(i, j)` sits at position `(i, j)`, so a position of `(0.5, 0.5)` is
//! the midpoint of the first four pixels.

use std::sync::Arc;

use crate::raster::{RasterSource, RasterTile};

#[inline]
#[must_use]
pub fn bilerp(v00: f64, v10: f64, v01: f64, v11: f64, fx: f64, fy: f64) -> f64 {
    let top = v00 + (v10 - v00) * fx;
    let bottom = v01 + (v11 - v01) * fx;
    top + (bottom - top) * fy
}

fn in_raster<R: RasterSource + ?Sized>(raster: &R, px: f64, py: f64) -> bool {
    px >= 0.0 && py >= 0.0 && px < raster.width() as f64 && py < raster.height() as f64
}

/// Value of the pixel containing `(px, py)`.
#[must_use]
pub fn sample_nearest<R: RasterSource + ?Sized>(raster: &R, px: f64, py: f64) -> Option<f64> {
    if !in_raster(raster, px, py) {
        return None;
    }
    raster.sample(px.floor() as usize, py.floor() as usize)
}

/// Bilinear blend within one raster. Neighbours past the last row or column
/// are clamped to the edge.
#[must_use]
pub fn sample_bilinear<R: RasterSource + ?Sized>(raster: &R, px: f64, py: f64) -> Option<f64> {
    if !in_raster(raster, px, py) {
        return None;
    }
    let (x0, y0) = (px.floor() as usize, py.floor() as usize);
    let (fx, fy) = (px - x0 as f64, py - y0 as f64);
    let x1 = (x0 + 1).min(raster.width() - 1);
    let y1 = (y0 + 1).min(raster.height() - 1);
    Some(bilerp(
        raster.sample(x0, y0)?,
        raster.sample(x1, y0)?,
        raster.sample(x0, y1)?,
        raster.sample(x1, y1)?,
        fx,
        fy,
    ))
}

/// Bilinear sample over a slippy-tile pyramid.
///
/// `tile_x`/`tile_y` are fractional tile positions at `zoom`. Neighbours that
/// fall in the next tile east or south are read from that tile, resolved
/// through `resolve`. If any needed neighbour tile is missing (or has a
/// different size), the blend falls back to the owning tile alone. Returns
/// `None` only when the owning tile itself is unavailable.
pub fn sample_bilinear_tiled<F>(zoom: u8, tile_x: f64, tile_y: f64, mut resolve: F) -> Option<f64>
where
    F: FnMut(u32, u32) -> Option<Arc<RasterTile>>,
{
    if !(tile_x.is_finite() && tile_y.is_finite()) {
        return None;
    }
    let last = (1u64 << zoom) - 1;
    let tx = (tile_x.floor().max(0.0) as u64).min(last);
    let ty = (tile_y.floor().max(0.0) as u64).min(last);

    let primary = resolve(tx as u32, ty as u32)?;
    let (w, h) = (primary.width(), primary.height());
    if w == 0 || h == 0 {
        return None;
    }
    let px = ((tile_x - tx as f64) * w as f64).clamp(0.0, w as f64 - 1e-9);
    let py = ((tile_y - ty as f64) * h as f64).clamp(0.0, h as f64 - 1e-9);
    let (x0, y0) = ((px.floor() as usize).min(w - 1), (py.floor() as usize).min(h - 1));
    let (fx, fy) = (px - x0 as f64, py - y0 as f64);

    // [east, south, south-east]; None = not needed, Some(None) = missing
    let mut neighbours: [Option<Option<Arc<RasterTile>>>; 3] = [None, None, None];
    let mut pixel = |dx: usize, dy: usize| -> Option<f64> {
        let (mut lx, mut ly) = (x0 + dx, y0 + dy);
        let (mut ntx, mut nty) = (tx, ty);
        if lx >= w {
            if tx < last {
                ntx += 1;
                lx = 0;
            } else {
                lx = w - 1;
            }
        }
        if ly >= h {
            if ty < last {
                nty += 1;
                ly = 0;
            } else {
                ly = h - 1;
            }
        }
        let tile = match (ntx > tx, nty > ty) {
            (false, false) => Arc::clone(&primary),
            (east, south) => {
                let slot = match (east, south) {
                    (true, false) => 0,
                    (false, true) => 1,
                    _ => 2,
                };
                neighbours[slot]
                    .get_or_insert_with(|| resolve(ntx as u32, nty as u32))
                    .clone()?
            }
        };
        if tile.width() != w || tile.height() != h {
            return None;
        }
        tile.get(lx, ly)
    };

    match (pixel(0, 0), pixel(1, 0), pixel(0, 1), pixel(1, 1)) {
        (Some(v00), Some(v10), Some(v01), Some(v11)) => Some(bilerp(v00, v10, v01, v11, fx, fy)),
        _ => sample_bilinear(primary.as_ref(), px, py),
    }
}

/// Modal class in a disk of `radius` pixels around `(cx, cy)`.
///
/// Classes listed in `excluded` are not counted. The center's class wins any
/// tie, other ties go to the lower code, and a neighbourhood with nothing
/// countable returns the center unchanged. `None` only when the center itself
/// cannot be read.
#[must_use]
pub fn sample_majority<R: RasterSource + ?Sized>(
    raster: &R,
    cx: usize,
    cy: usize,
    radius: usize,
    excluded: &[u8],
) -> Option<u8> {
    let center = raster.sample_class(cx, cy)?;
    let mut counts = [0u32; 256];
    let r = radius as i64;
    let (w, h) = (raster.width() as i64, raster.height() as i64);

    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let (x, y) = (cx as i64 + dx, cy as i64 + dy);
            if x < 0 || y < 0 || x >= w || y >= h {
                continue;
            }
            if let Some(class) = raster.sample_class(x as usize, y as usize) {
                if !excluded.contains(&class) {
                    counts[usize::from(class)] += 1;
                }
            }
        }
    }

    let mut best = center;
    let mut best_count = if excluded.contains(&center) {
        0
    } else {
        counts[usize::from(center)]
    };
    for (class, &count) in counts.iter().enumerate() {
        if count > best_count {
            best = class as u8;
            best_count = count;
        }
    }
    Some(best)
}
