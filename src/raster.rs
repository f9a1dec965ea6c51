use std::sync::Arc;

use crate::error::{GeoDataError, Result};

/// Decoded sample plane. Class rasters are 8-bit, elevation is signed 16-bit.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterData {
    U8(Vec<u8>),
    I16(Vec<i16>),
}

impl RasterData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RasterData::U8(v) => v.len(),
            RasterData::I16(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An immutable decoded raster, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    width: usize,
    height: usize,
    data: RasterData,
}

impl RasterTile {
    pub fn new(width: usize, height: usize, data: RasterData) -> Result<Self> {
        let expected = width.checked_mul(height).ok_or_else(|| {
            GeoDataError::Decode(format!("raster size {width}x{height} overflows"))
        })?;
        if data.len() != expected {
            return Err(GeoDataError::Decode(format!(
                "raster {width}x{height} needs {expected} samples, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn new_u8(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, RasterData::U8(data))
    }

    pub fn new_i16(width: usize, height: usize, data: Vec<i16>) -> Result<Self> {
        Self::new(width, height, RasterData::I16(data))
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    #[must_use]
    pub fn data(&self) -> &RasterData {
        &self.data
    }

    #[must_use]
    pub fn size_bytes(&self) -> usize {
        match &self.data {
            RasterData::U8(v) => v.len(),
            RasterData::I16(v) => v.len() * 2,
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y * self.width + x;
        Some(match &self.data {
            RasterData::U8(v) => f64::from(v[idx]),
            RasterData::I16(v) => f64::from(v[idx]),
        })
    }
}

/// Outcome of resolving a tile through a cache.
///
/// `Missing` is a tile that could not be had right now (404, network or decode
/// failure). `Unavailable` means the whole source is unusable. Neither is the
/// same as a tile whose pixels carry a no-data class.
#[derive(Debug, Clone)]
pub enum RasterResult<R> {
    Ready(R),
    Missing,
    Unavailable,
}

impl<R> RasterResult<R> {
    #[must_use]
    pub fn ready(&self) -> Option<&R> {
        match self {
            RasterResult::Ready(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_ready(self) -> Option<R> {
        match self {
            RasterResult::Ready(r) => Some(r),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, RasterResult::Ready(_))
    }
}

/// Anything that can be sampled by absolute pixel position.
pub trait RasterSource: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    /// `None` outside the raster or when the pixel cannot be read.
    fn sample(&self, x: usize, y: usize) -> Option<f64>;

    /// Sample interpreted as an 8-bit class code.
    fn sample_class(&self, x: usize, y: usize) -> Option<u8> {
        self.sample(x, y).map(|v| v.clamp(0.0, 255.0) as u8)
    }
}

impl RasterSource for RasterTile {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn sample(&self, x: usize, y: usize) -> Option<f64> {
        self.get(x, y)
    }
}

impl<T: RasterSource + ?Sized> RasterSource for Arc<T> {
    fn width(&self) -> usize {
        (**self).width()
    }

    fn height(&self) -> usize {
        (**self).height()
    }

    fn sample(&self, x: usize, y: usize) -> Option<f64> {
        (**self).sample(x, y)
    }
}
