//! Geometry store: the contact-bearing primitives attached to owners.
//!
//! Every geometry carries a back-reference to its owner and a material slot.
//! Global geometry ids are dense and stable: spheres first, then triangles,
//! then analytical primitives, in insertion order. Pair kinds fall out of
//! which range each id lands in, and the `gidA < gidB` pair convention makes
//! the sphere always come first in mixed pairs.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::material::MaterialId;
use crate::owner::OwnerId;

/// Global geometry id, stable across contact-detection cycles.
pub type GeomId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairKind {
    SphereSphere,
    SphereTriangle,
    SphereAnalytical,
}

/// A sphere component bound to a clump owner.
#[derive(Clone, Copy, Debug)]
pub struct SphereGeom {
    pub owner: OwnerId,
    /// Position in the owner's body frame.
    pub rel_pos: Vec3,
    pub radius: f32,
    pub material: MaterialId,
}

/// A triangle bound to a mesh owner, vertices in the owner's body frame.
#[derive(Clone, Copy, Debug)]
pub struct TriangleGeom {
    pub owner: OwnerId,
    pub v: [Vec3; 3],
    pub material: MaterialId,
}

/// Analytical boundary primitives. Normals follow the convention that the
/// contactable side is the one the normal points into.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum AnalyticalShape {
    /// Half-space boundary: contact on the `normal` side of the plane.
    Plane { point: Vec3, normal: Vec3 },
    /// Finite rectangle: `center`, unit `normal`, in-plane unit axis `u` and
    /// half extents along `u` and `normal x u`.
    Plate {
        center: Vec3,
        normal: Vec3,
        u: Vec3,
        half_u: f32,
        half_v: f32,
    },
    /// Infinite cylinder around `axis` through `center`. `inward` selects
    /// whether contact happens inside (a drum) or outside (a post).
    Cylinder {
        center: Vec3,
        axis: Vec3,
        radius: f32,
        inward: bool,
    },
}

#[derive(Clone, Copy, Debug)]
pub struct AnalyticalGeom {
    pub owner: OwnerId,
    pub shape: AnalyticalShape,
    pub material: MaterialId,
}

/// Axis-aligned bounding box used by the broad phase.
#[derive(Clone, Copy, Debug)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    #[inline]
    pub fn of_sphere(center: Vec3, radius: f32) -> Self {
        Self {
            min: center - Vec3::splat(radius),
            max: center + Vec3::splat(radius),
        }
    }

    #[inline]
    pub fn of_triangle(v: &[Vec3; 3], inflate: f32) -> Self {
        let min = v[0].min(v[1]).min(v[2]) - Vec3::splat(inflate);
        let max = v[0].max(v[1]).max(v[2]) + Vec3::splat(inflate);
        Self { min, max }
    }

    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
            && self.min.z <= other.max.z
            && other.min.z <= self.max.z
    }
}

/// Append-only registry of all geometries, built before `initialize` and
/// shared read-only with both workers afterwards.
#[derive(Clone, Default)]
pub struct GeometryStore {
    pub spheres: Vec<SphereGeom>,
    pub triangles: Vec<TriangleGeom>,
    pub analytical: Vec<AnalyticalGeom>,
}

impl GeometryStore {
    pub fn sphere_count(&self) -> usize {
        self.spheres.len()
    }

    pub fn total(&self) -> usize {
        self.spheres.len() + self.triangles.len() + self.analytical.len()
    }

    /// First triangle gid; spheres occupy `[0, tri_base)`.
    #[inline]
    pub fn tri_base(&self) -> GeomId {
        self.spheres.len() as GeomId
    }

    /// First analytical gid.
    #[inline]
    pub fn anal_base(&self) -> GeomId {
        (self.spheres.len() + self.triangles.len()) as GeomId
    }

    #[inline]
    pub fn is_sphere(&self, gid: GeomId) -> bool {
        gid < self.tri_base()
    }

    /// Kind of a canonical (`a < b`) pair.
    pub fn pair_kind(&self, a: GeomId, b: GeomId) -> PairKind {
        debug_assert!(a < b);
        if b < self.tri_base() {
            PairKind::SphereSphere
        } else if b < self.anal_base() {
            PairKind::SphereTriangle
        } else {
            PairKind::SphereAnalytical
        }
    }

    /// Owner of any geometry id.
    pub fn owner_of(&self, gid: GeomId) -> OwnerId {
        let g = gid as usize;
        if gid < self.tri_base() {
            self.spheres[g].owner
        } else if gid < self.anal_base() {
            self.triangles[g - self.spheres.len()].owner
        } else {
            self.analytical[g - self.spheres.len() - self.triangles.len()].owner
        }
    }

    /// Material of any geometry id.
    pub fn material_of(&self, gid: GeomId) -> MaterialId {
        let g = gid as usize;
        if gid < self.tri_base() {
            self.spheres[g].material
        } else if gid < self.anal_base() {
            self.triangles[g - self.spheres.len()].material
        } else {
            self.analytical[g - self.spheres.len() - self.triangles.len()].material
        }
    }

    /// Smallest sphere radius; feeds the default bin size.
    pub fn min_sphere_radius(&self) -> Option<f32> {
        self.spheres
            .iter()
            .map(|s| s.radius)
            .min_by(|a, b| a.partial_cmp(b).unwrap())
    }
}

/// World-space placement of a body-frame point.
#[inline]
pub fn to_world(owner_pos: Vec3, owner_quat: Quat, rel: Vec3) -> Vec3 {
    owner_pos + owner_quat * rel
}
