//! Fixed, seedless value noise used to dither classification boundaries.

use crate::geometry::projection::METERS_PER_DEGREE;
use crate::sampler::bilerp;

pub const DEFAULT_WARP_AMPLITUDE_METERS: f64 = 3_000.0;
pub const DEFAULT_WARP_WAVELENGTH_METERS: f64 = 25_000.0;

// Decorrelates the x and z displacement fields.
const Z_CHANNEL: u64 = 0x632b_e59b_d9b4_e019;

#[inline]
fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Lattice value in [-1, 1].
#[inline]
fn lattice(ix: i64, iz: i64, channel: u64) -> f64 {
    let h = splitmix64((ix as u64) ^ splitmix64((iz as u64) ^ channel));
    (h >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
}

/// Bilinearly interpolated lattice noise at `(x, z)` in lattice units.
#[must_use]
pub fn value_noise(x: f64, z: f64, channel: u64) -> f64 {
    let (x0, z0) = (x.floor(), z.floor());
    let (ix, iz) = (x0 as i64, z0 as i64);
    bilerp(
        lattice(ix, iz, channel),
        lattice(ix + 1, iz, channel),
        lattice(ix, iz + 1, channel),
        lattice(ix + 1, iz + 1, channel),
        x - x0,
        z - z0,
    )
}

/// Displaces world coordinates by a smooth noise field.
///
/// Amplitude and wavelength are in meters and converted to world units
/// through the world scale, so the dither looks the same at any scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarpField {
    pub amplitude_meters: f64,
    pub wavelength_meters: f64,
}

impl Default for WarpField {
    fn default() -> Self {
        Self {
            amplitude_meters: DEFAULT_WARP_AMPLITUDE_METERS,
            wavelength_meters: DEFAULT_WARP_WAVELENGTH_METERS,
        }
    }
}

impl WarpField {
    #[must_use]
    pub fn new(amplitude_meters: f64, wavelength_meters: f64) -> Self {
        Self {
            amplitude_meters,
            wavelength_meters,
        }
    }

    #[must_use]
    pub fn warp(&self, world_x: f64, world_z: f64, world_scale: f64) -> (f64, f64) {
        if !(world_scale > 0.0 && self.wavelength_meters > 0.0 && self.amplitude_meters != 0.0) {
            return (world_x, world_z);
        }
        // Sample the lattice in meters so the pattern is tied to the globe.
        let (mx, mz) = (world_x * world_scale, world_z * world_scale);
        let (u, v) = (mx / self.wavelength_meters, mz / self.wavelength_meters);
        let amplitude = self.amplitude_meters / world_scale;
        (
            world_x + value_noise(u, v, 0) * amplitude,
            world_z + value_noise(u, v, Z_CHANNEL) * amplitude,
        )
    }

    /// Largest displacement in degrees, for diagnostics.
    #[must_use]
    pub fn max_offset_degrees(&self) -> f64 {
        self.amplitude_meters.abs() / METERS_PER_DEGREE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_is_deterministic_and_bounded() {
        for i in 0..500 {
            let (x, z) = (i as f64 * 0.37 - 90.0, i as f64 * -1.13 + 40.0);
            let a = value_noise(x, z, 0);
            assert_eq!(a, value_noise(x, z, 0));
            assert!((-1.0..=1.0).contains(&a), "{a}");
        }
    }

    #[test]
    fn test_noise_matches_lattice_at_integer_points() {
        assert_eq!(value_noise(3.0, -7.0, 0), lattice(3, -7, 0));
        assert_ne!(value_noise(3.0, -7.0, 0), value_noise(3.0, -7.0, Z_CHANNEL));
    }

    #[test]
    fn test_noise_is_continuous() {
        let a = value_noise(10.999_999, 4.5, 0);
        let b = value_noise(11.000_001, 4.5, 0);
        assert!((a - b).abs() < 1e-4);
    }

    #[test]
    fn test_warp_bounded_by_amplitude() {
        let field = WarpField::default();
        for scale in [1.0, 30.0, 500.0] {
            let limit = field.amplitude_meters / scale;
            for i in 0..200 {
                let (x, z) = (i as f64 * 123.4, i as f64 * -56.7);
                let (wx, wz) = field.warp(x, z, scale);
                assert!((wx - x).abs() <= limit + 1e-9);
                assert!((wz - z).abs() <= limit + 1e-9);
            }
        }
    }

    #[test]
    fn test_zero_amplitude_is_identity() {
        let field = WarpField::new(0.0, 1_000.0);
        assert_eq!(field.warp(12.5, -3.0, 10.0), (12.5, -3.0));
        assert_eq!(WarpField::default().warp(1.0, 2.0, 0.0), (1.0, 2.0));
    }
}
