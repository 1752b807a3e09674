//! Read-only reductions over the committed owner/sphere state.
//!
//! Queries run against a published snapshot, so callers must hold a synced
//! stance for exact answers. Built-in queries reduce over sphere centers of
//! active clump owners; custom queries supply their own per-sphere scalar.

use glam::Vec3;

use crate::geometry::GeometryStore;
use crate::owner::{MassProps, StateSnapshot};
use crate::world::WorldFrame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduce {
    Min,
    Max,
    Sum,
}

/// Per-sphere view handed to custom queries.
pub struct SphereView {
    pub center: Vec3,
    pub radius: f32,
    pub owner: u32,
    pub lin_vel: Vec3,
    /// World-frame angular velocity of the owner.
    pub ang_vel: Vec3,
    pub family: u8,
}

/// A named inspection, parsed once and reusable across syncs.
pub enum Query {
    /// Highest sphere center.
    ClumpMaxZ,
    /// Lowest sphere center.
    ClumpMinZ,
    /// Fastest sphere center speed (translation plus spin contribution).
    ClumpMaxAbsv,
    /// Total mass of active clump owners.
    ClumpTotalMass,
    /// Total kinetic energy (translation plus rotation) of active clumps.
    ClumpKineticEnergy,
    /// User-supplied per-sphere scalar with an explicit reduction.
    Custom {
        scalar: Box<dyn Fn(&SphereView) -> f32 + Send + Sync>,
        reduce: Reduce,
    },
}

impl Query {
    /// Parse a named query. Unknown names return `None`.
    pub fn by_name(name: &str) -> Option<Query> {
        match name {
            "clump_max_z" => Some(Query::ClumpMaxZ),
            "clump_min_z" => Some(Query::ClumpMinZ),
            "clump_max_absv" => Some(Query::ClumpMaxAbsv),
            "clump_mass" => Some(Query::ClumpTotalMass),
            "clump_kinetic_energy" => Some(Query::ClumpKineticEnergy),
            _ => None,
        }
    }
}

fn reduce_spheres(
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
    scalar: impl Fn(&SphereView) -> f32,
    reduce: Reduce,
) -> f32 {
    let mut acc = match reduce {
        Reduce::Min => f32::INFINITY,
        Reduce::Max => f32::NEG_INFINITY,
        Reduce::Sum => 0.0,
    };
    for sphere in &geometry.spheres {
        let o = sphere.owner as usize;
        if !snapshot.active[o] {
            continue;
        }
        let quat = snapshot.quat[o];
        let pos = snapshot.position(frame, sphere.owner);
        let center = pos + quat * sphere.rel_pos;
        let ang_world = quat * snapshot.ang_vel[o];
        let view = SphereView {
            center,
            radius: sphere.radius,
            owner: sphere.owner,
            lin_vel: snapshot.lin_vel[o] + ang_world.cross(center - pos),
            ang_vel: ang_world,
            family: snapshot.family[o],
        };
        let v = scalar(&view);
        acc = match reduce {
            Reduce::Min => acc.min(v),
            Reduce::Max => acc.max(v),
            Reduce::Sum => acc + v,
        };
    }
    acc
}

/// Evaluate a query against a snapshot. Exact under the committed state.
pub fn evaluate(
    query: &Query,
    snapshot: &StateSnapshot,
    frame: &WorldFrame,
    geometry: &GeometryStore,
    mass_props: &[MassProps],
    mass_idx: &[u32],
) -> f32 {
    match query {
        Query::ClumpMaxZ => {
            reduce_spheres(snapshot, frame, geometry, |s| s.center.z, Reduce::Max)
        }
        Query::ClumpMinZ => {
            reduce_spheres(snapshot, frame, geometry, |s| s.center.z, Reduce::Min)
        }
        Query::ClumpMaxAbsv => {
            reduce_spheres(snapshot, frame, geometry, |s| s.lin_vel.length(), Reduce::Max)
        }
        Query::ClumpTotalMass => {
            let mut total = 0.0;
            for i in 0..snapshot.len() {
                if !snapshot.active[i] {
                    continue;
                }
                // Boundaries and meshes carry zero mass slots.
                total += mass_props[mass_idx[i] as usize].mass.max(0.0);
            }
            total
        }
        Query::ClumpKineticEnergy => {
            let mut total = 0.0;
            for i in 0..snapshot.len() {
                if !snapshot.active[i] {
                    continue;
                }
                let props = mass_props[mass_idx[i] as usize];
                if props.mass <= 0.0 {
                    continue;
                }
                let v = snapshot.lin_vel[i];
                let w = snapshot.ang_vel[i];
                total += 0.5 * props.mass * v.length_squared()
                    + 0.5
                        * (props.moi.x * w.x * w.x
                            + props.moi.y * w.y * w.y
                            + props.moi.z * w.z * w.z);
            }
            total
        }
        Query::Custom { scalar, reduce } => {
            reduce_spheres(snapshot, frame, geometry, scalar, *reduce)
        }
    }
}
