//! World frame: a large integer voxel grid plus a small length unit.
//!
//! Positions are stored as `(voxel id, in-voxel offset)` so a particle keeps
//! full float precision no matter how far it sits from the origin. The voxel
//! id packs the three integer voxel coordinates into one 32-bit word; the
//! offset is a real vector in `[0, voxel_size)` on every axis.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bit width of a packed voxel id. The three per-axis exponents must sum to
/// exactly this.
pub const VOXEL_ID_BITS: u32 = 32;

/// A voxel edge spans `2^VOXEL_RES_POWER` length units, so offsets within a
/// voxel keep around `VOXEL_RES_POWER` bits of mantissa headroom.
pub const VOXEL_RES_POWER: u32 = 8;

/// The world box: per-axis voxel-count exponents and the length unit `l`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorldFrame {
    /// Voxel-count exponents per axis; `2^exp[i]` voxels along axis `i`.
    pub exp: [u32; 3],
    /// Length unit. Everything the engine stores is measured in multiples.
    pub l: f32,
    /// Voxel edge length, `2^VOXEL_RES_POWER * l`.
    pub voxel_size: f32,
    /// World minimum corner in real units.
    pub origin: Vec3,
}

impl WorldFrame {
    /// Build a frame that covers at least `size` centered on `center`.
    ///
    /// The length unit is derived from the tightest axis, so the covered box
    /// is the requested one rounded up to a power-of-two voxel count.
    pub fn new(size: Vec3, exp: [u32; 3], center: Vec3) -> Result<Self, ConfigError> {
        if !(size.x > 0.0 && size.y > 0.0 && size.z > 0.0) {
            return Err(ConfigError::InvalidWorldDims(size.x, size.y, size.z));
        }
        if exp[0] + exp[1] + exp[2] != VOXEL_ID_BITS || exp.contains(&0) {
            return Err(ConfigError::BadVoxelExponents(exp[0], exp[1], exp[2]));
        }
        // The unit must satisfy size[i] <= 2^(exp[i] + VOXEL_RES_POWER) * l on
        // every axis; take the binding one.
        let mut l = 0.0f32;
        for i in 0..3 {
            let needed = size[i] / 2f32.powi((exp[i] + VOXEL_RES_POWER) as i32);
            l = l.max(needed);
        }
        let voxel_size = 2f32.powi(VOXEL_RES_POWER as i32) * l;
        let covered = Vec3::new(
            voxel_size * 2f32.powi(exp[0] as i32),
            voxel_size * 2f32.powi(exp[1] as i32),
            voxel_size * 2f32.powi(exp[2] as i32),
        );
        Ok(Self {
            exp,
            l,
            voxel_size,
            origin: center - covered * 0.5,
        })
    }

    /// Number of voxels along an axis.
    #[inline]
    pub fn voxels_on(&self, axis: usize) -> u32 {
        1u32 << self.exp[axis]
    }

    /// Full covered extent in real units.
    pub fn extent(&self) -> Vec3 {
        Vec3::new(
            self.voxel_size * self.voxels_on(0) as f32,
            self.voxel_size * self.voxels_on(1) as f32,
            self.voxel_size * self.voxels_on(2) as f32,
        )
    }

    /// Pack per-axis voxel indices into a voxel id. X owns the low bits.
    #[inline]
    pub fn pack(&self, ix: u32, iy: u32, iz: u32) -> u32 {
        ix | (iy << self.exp[0]) | (iz << (self.exp[0] + self.exp[1]))
    }

    /// Unpack a voxel id into per-axis indices.
    #[inline]
    pub fn unpack(&self, voxel: u32) -> (u32, u32, u32) {
        let ix = voxel & ((1 << self.exp[0]) - 1);
        let iy = (voxel >> self.exp[0]) & ((1 << self.exp[1]) - 1);
        let iz = voxel >> (self.exp[0] + self.exp[1]);
        (ix, iy, iz)
    }

    /// Encode a real position into `(voxel id, offset)`.
    ///
    /// Positions outside the world box are clamped to the boundary voxel;
    /// the second return flags that case so the caller can report it.
    pub fn encode(&self, pos: Vec3) -> ((u32, Vec3), bool) {
        let rel = pos - self.origin;
        let mut clamped = false;
        let mut idx = [0u32; 3];
        let mut off = Vec3::ZERO;
        for axis in 0..3 {
            let n = self.voxels_on(axis);
            let v = rel[axis] / self.voxel_size;
            if v < 0.0 {
                idx[axis] = 0;
                off[axis] = 0.0;
                clamped = true;
            } else if v >= n as f32 {
                idx[axis] = n - 1;
                // Offsets live in the half-open range; park just inside.
                off[axis] = self.voxel_size * (1.0 - f32::EPSILON);
                clamped = true;
            } else {
                let i = v.floor() as u32;
                idx[axis] = i.min(n - 1);
                off[axis] = rel[axis] - idx[axis] as f32 * self.voxel_size;
            }
        }
        ((self.pack(idx[0], idx[1], idx[2]), off), clamped)
    }

    /// Decode `(voxel id, offset)` back into a real position.
    #[inline]
    pub fn decode(&self, voxel: u32, off: Vec3) -> Vec3 {
        let (ix, iy, iz) = self.unpack(voxel);
        self.origin
            + Vec3::new(
                ix as f32 * self.voxel_size + off.x,
                iy as f32 * self.voxel_size + off.y,
                iz as f32 * self.voxel_size + off.z,
            )
    }

    /// Re-normalize a position after its offset drifted out of `[0, vs)`.
    ///
    /// Used after every integration step: the integrator adds `v * dt` to the
    /// offset and this folds whole voxels back into the id. Returns `true` if
    /// the position had to be clamped to the world boundary.
    pub fn renormalize(&self, voxel: &mut u32, off: &mut Vec3) -> bool {
        if off.x >= 0.0
            && off.x < self.voxel_size
            && off.y >= 0.0
            && off.y < self.voxel_size
            && off.z >= 0.0
            && off.z < self.voxel_size
        {
            return false;
        }
        let pos = self.decode(*voxel, *off);
        let ((v, o), clamped) = self.encode(pos);
        *voxel = v;
        *off = o;
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> WorldFrame {
        WorldFrame::new(Vec3::splat(2.0), [11, 11, 10], Vec3::ZERO).unwrap()
    }

    #[test]
    fn exponents_must_sum_to_id_bits() {
        assert!(WorldFrame::new(Vec3::ONE, [11, 11, 11], Vec3::ZERO).is_err());
        assert!(WorldFrame::new(Vec3::ONE, [11, 11, 10], Vec3::ZERO).is_ok());
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let f = frame();
        let id = f.pack(1234, 567, 89);
        assert_eq!(f.unpack(id), (1234, 567, 89));
    }

    #[test]
    fn encode_decode_roundtrip_within_unit() {
        let f = frame();
        for p in [
            Vec3::ZERO,
            Vec3::new(0.5, -0.25, 0.75),
            Vec3::new(-0.999, 0.999, -0.5),
        ] {
            let ((v, o), clamped) = f.encode(p);
            assert!(!clamped, "{p} should be inside the box");
            let q = f.decode(v, o);
            assert!((q - p).length() <= 2.0 * f.l, "{p} round-tripped to {q}");
        }
    }

    #[test]
    fn out_of_box_positions_clamp() {
        let f = frame();
        let ((v, o), clamped) = f.encode(Vec3::new(100.0, 0.0, 0.0));
        assert!(clamped);
        let q = f.decode(v, o);
        let half = f.extent() * 0.5;
        assert!(q.x <= half.x && q.x >= -half.x);
    }

    #[test]
    fn renormalize_folds_offsets() {
        let f = frame();
        let ((mut v, mut o), _) = f.encode(Vec3::new(0.1, 0.1, 0.1));
        o.x += 3.5 * f.voxel_size;
        let clamped = f.renormalize(&mut v, &mut o);
        assert!(!clamped);
        assert!(o.x >= 0.0 && o.x < f.voxel_size);
        let q = f.decode(v, o);
        assert!((q.x - (0.1 + 3.5 * f.voxel_size)).abs() <= 2.0 * f.l);
    }
}
