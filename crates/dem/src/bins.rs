//! Uniform spatial-hash bins covering the world box.
//!
//! The bin side comes from the user, or defaults to twice the smallest sphere
//! radius. Bin ids are 32-bit; a grid that would not fit is a hard error at
//! init, and a `TooCrowded` halving that would overflow escalates instead of
//! shrinking further.

use glam::Vec3;

use crate::error::ConfigError;
use crate::geometry::Aabb;
use crate::world::WorldFrame;

/// Packed bin id; `x` fastest, then `y`, then `z`.
pub type BinId = u32;

#[derive(Clone, Copy, Debug)]
pub struct BinGrid {
    pub bin_size: f32,
    pub counts: [u32; 3],
    pub origin: Vec3,
}

impl BinGrid {
    /// Build a grid of `bin_size` bins over the world box.
    pub fn new(frame: &WorldFrame, bin_size: f32) -> Result<Self, ConfigError> {
        if !(bin_size > 0.0) {
            return Err(ConfigError::BadBinSize(bin_size));
        }
        let extent = frame.extent();
        let nx = (extent.x / bin_size).ceil().max(1.0) as u64;
        let ny = (extent.y / bin_size).ceil().max(1.0) as u64;
        let nz = (extent.z / bin_size).ceil().max(1.0) as u64;
        if nx.checked_mul(ny).and_then(|v| v.checked_mul(nz)).map_or(true, |total| total > BinId::MAX as u64) {
            return Err(ConfigError::BinCountOverflow { nx, ny, nz });
        }
        Ok(Self {
            bin_size,
            counts: [nx as u32, ny as u32, nz as u32],
            origin: frame.origin,
        })
    }

    /// Pick the bin size: the user's explicit value, else `2 * r_min`.
    pub fn derive_size(user: Option<f32>, min_sphere_radius: Option<f32>) -> Result<f32, ConfigError> {
        match (user, min_sphere_radius) {
            (Some(b), _) => Ok(b),
            (None, Some(r)) => Ok(2.0 * r),
            (None, None) => Err(ConfigError::BadBinSize(0.0)),
        }
    }

    /// Same grid with half the bin size (eight times the bins).
    pub fn halved(&self, frame: &WorldFrame) -> Result<Self, ConfigError> {
        Self::new(frame, self.bin_size * 0.5)
    }

    pub fn total_bins(&self) -> u64 {
        self.counts[0] as u64 * self.counts[1] as u64 * self.counts[2] as u64
    }

    #[inline]
    pub fn pack(&self, ix: u32, iy: u32, iz: u32) -> BinId {
        (iz * self.counts[1] + iy) * self.counts[0] + ix
    }

    /// Per-axis bin coordinate of a world point, clamped into the grid.
    #[inline]
    pub fn coords_of(&self, p: Vec3) -> [u32; 3] {
        let rel = p - self.origin;
        let mut out = [0u32; 3];
        for axis in 0..3 {
            let i = (rel[axis] / self.bin_size).floor();
            out[axis] = (i.max(0.0) as u32).min(self.counts[axis] - 1);
        }
        out
    }

    /// Inclusive bin-coordinate range an AABB touches, clamped to the grid.
    #[inline]
    pub fn range_of(&self, aabb: &Aabb) -> ([u32; 3], [u32; 3]) {
        (self.coords_of(aabb.min), self.coords_of(aabb.max))
    }

    /// Number of bins in an inclusive coordinate range.
    #[inline]
    pub fn range_volume(lo: &[u32; 3], hi: &[u32; 3]) -> usize {
        ((hi[0] - lo[0] + 1) as usize)
            * ((hi[1] - lo[1] + 1) as usize)
            * ((hi[2] - lo[2] + 1) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> WorldFrame {
        WorldFrame::new(Vec3::splat(2.0), [11, 11, 10], Vec3::ZERO).unwrap()
    }

    #[test]
    fn derive_size_prefers_user_value() {
        assert_eq!(BinGrid::derive_size(Some(0.5), Some(0.1)).unwrap(), 0.5);
        assert_eq!(BinGrid::derive_size(None, Some(0.1)).unwrap(), 0.2);
        assert!(BinGrid::derive_size(None, None).is_err());
    }

    #[test]
    fn grid_covers_world() {
        let f = frame();
        let g = BinGrid::new(&f, 0.3).unwrap();
        let e = f.extent();
        for axis in 0..3 {
            assert!(g.counts[axis] as f32 * 0.3 >= e[axis]);
        }
    }

    #[test]
    fn overflow_is_a_hard_error() {
        let f = frame();
        assert!(matches!(
            BinGrid::new(&f, 1e-6),
            Err(ConfigError::BinCountOverflow { .. })
        ));
    }

    #[test]
    fn out_of_grid_points_clamp_to_boundary_bins() {
        let f = frame();
        let g = BinGrid::new(&f, 0.5).unwrap();
        let lo = g.coords_of(Vec3::splat(-100.0));
        let hi = g.coords_of(Vec3::splat(100.0));
        assert_eq!(lo, [0, 0, 0]);
        for axis in 0..3 {
            assert_eq!(hi[axis], g.counts[axis] - 1);
        }
    }

    #[test]
    fn aabb_range_counts_touched_bins() {
        let f = frame();
        let g = BinGrid::new(&f, 0.5).unwrap();
        let aabb = Aabb::of_sphere(Vec3::ZERO, 0.3);
        let (lo, hi) = g.range_of(&aabb);
        // A 0.6-wide box straddling a 0.5 grid line touches 2 bins per axis.
        assert_eq!(BinGrid::range_volume(&lo, &hi), 8);
    }

    #[test]
    fn halving_multiplies_bins_by_eight() {
        let f = frame();
        let g = BinGrid::new(&f, 0.4).unwrap();
        let h = g.halved(&f).unwrap();
        assert!((h.bin_size - 0.2).abs() < 1e-7);
        assert!(h.total_bins() >= 8 * g.total_bins() / 2);
    }
}
