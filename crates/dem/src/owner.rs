//! Owner store: the rigid bodies the integrator advances.
//!
//! Owners are kept SoA-style (one vector per attribute, indexed by dense
//! owner id) because the dynamics thread walks whole columns every step and
//! the contact detector snapshots them wholesale. Three flavors share the
//! schema: clumps (sphere sets), external objects (analytical primitives) and
//! meshes (triangle sets); the flavor only decides what geometry points back
//! at the owner.

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::family::FamilyIdx;
use crate::material::MaterialId;
use crate::world::WorldFrame;

/// Dense owner id; assignment order.
pub type OwnerId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnerKind {
    Clump,
    External,
    Mesh,
}

/// One sphere component of a clump template, in the clump's body frame.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SphereComp {
    pub rel_pos: Vec3,
    pub radius: f32,
    pub material: MaterialId,
}

/// A clump template: mass properties plus the sphere components every clump
/// instantiated from it carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClumpTemplate {
    pub mass: f32,
    /// Principal moments of inertia (the body frame is the principal frame).
    pub moi: Vec3,
    pub spheres: Vec<SphereComp>,
}

impl ClumpTemplate {
    /// Radius of the sphere around the body origin containing every component.
    pub fn bounding_radius(&self) -> f32 {
        self.spheres
            .iter()
            .map(|s| s.rel_pos.length() + s.radius)
            .fold(0.0, f32::max)
    }
}

/// Mass/inertia slot shared by all owners stamped from the same template.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MassProps {
    pub mass: f32,
    pub moi: Vec3,
}

impl MassProps {
    #[inline]
    pub fn inv_mass(&self) -> f32 {
        if self.mass > 0.0 {
            1.0 / self.mass
        } else {
            0.0
        }
    }
}

/// SoA registry of owner states. Mutable only by the dynamics thread once
/// the solver is initialized; everyone else reads published snapshots.
#[derive(Clone, Default)]
pub struct OwnerStore {
    pub voxel: Vec<u32>,
    pub offset: Vec<Vec3>,
    pub quat: Vec<Quat>,
    pub lin_vel: Vec<Vec3>,
    /// Angular velocity in the owner's body frame.
    pub ang_vel: Vec<Vec3>,
    pub family: Vec<FamilyIdx>,
    pub mass_idx: Vec<u32>,
    pub kind: Vec<OwnerKind>,
    /// Cleared by a family purge; inactive owners are skipped everywhere.
    pub active: Vec<bool>,
    /// Bounding radius of the owner's geometry, for drift estimation.
    pub bound_radius: Vec<f32>,
    /// Named per-owner scalar columns, opaque to the engine.
    pub wildcards: FxHashMap<String, Vec<f32>>,
    /// Accumulated contact impulse per owner (sum of F * dt), diagnostic.
    pub contact_impulse: Vec<Vec3>,
}

impl OwnerStore {
    pub fn len(&self) -> usize {
        self.voxel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel.is_empty()
    }

    /// Append an owner; returns its id.
    #[allow(clippy::too_many_arguments)]
    pub fn push(
        &mut self,
        frame: &WorldFrame,
        kind: OwnerKind,
        pos: Vec3,
        quat: Quat,
        lin_vel: Vec3,
        ang_vel: Vec3,
        family: FamilyIdx,
        mass_idx: u32,
        bound_radius: f32,
    ) -> OwnerId {
        let ((voxel, offset), _) = frame.encode(pos);
        self.voxel.push(voxel);
        self.offset.push(offset);
        self.quat.push(quat.normalize());
        self.lin_vel.push(lin_vel);
        self.ang_vel.push(ang_vel);
        self.family.push(family);
        self.mass_idx.push(mass_idx);
        self.kind.push(kind);
        self.active.push(true);
        self.bound_radius.push(bound_radius);
        self.contact_impulse.push(Vec3::ZERO);
        for column in self.wildcards.values_mut() {
            column.push(0.0);
        }
        (self.voxel.len() - 1) as OwnerId
    }

    /// Register a named wildcard column, zero-filled for existing owners.
    pub fn add_wildcard(&mut self, name: &str) {
        self.wildcards
            .entry(name.to_owned())
            .or_insert_with(|| vec![0.0; self.voxel.len()]);
    }

    #[inline]
    pub fn position(&self, frame: &WorldFrame, id: OwnerId) -> Vec3 {
        frame.decode(self.voxel[id as usize], self.offset[id as usize])
    }

    pub fn set_position(&mut self, frame: &WorldFrame, id: OwnerId, pos: Vec3) -> bool {
        let ((voxel, offset), clamped) = frame.encode(pos);
        self.voxel[id as usize] = voxel;
        self.offset[id as usize] = offset;
        clamped
    }

    /// Fastest surface point speed estimate over all active owners; the
    /// contact detector sizes its safety margin against this.
    pub fn max_surface_speed(&self) -> f32 {
        let mut max = 0.0f32;
        for i in 0..self.len() {
            if !self.active[i] {
                continue;
            }
            let v = self.lin_vel[i].length() + self.ang_vel[i].length() * self.bound_radius[i];
            max = max.max(v);
        }
        max
    }
}

/// What the dynamics thread publishes at each step end: the full committed
/// owner state plus the timestamp it holds for.
#[derive(Clone, Default)]
pub struct StateSnapshot {
    pub voxel: Vec<u32>,
    pub offset: Vec<Vec3>,
    pub quat: Vec<Quat>,
    pub lin_vel: Vec<Vec3>,
    pub ang_vel: Vec<Vec3>,
    pub family: Vec<FamilyIdx>,
    pub active: Vec<bool>,
    pub contact_impulse: Vec<Vec3>,
    pub wildcards: FxHashMap<String, Vec<f32>>,
    /// Simulated time this state is committed for.
    pub t: f64,
    /// Max surface speed at commit time.
    pub max_speed: f32,
}

impl StateSnapshot {
    pub fn capture(store: &OwnerStore, t: f64) -> Self {
        Self {
            voxel: store.voxel.clone(),
            offset: store.offset.clone(),
            quat: store.quat.clone(),
            lin_vel: store.lin_vel.clone(),
            ang_vel: store.ang_vel.clone(),
            family: store.family.clone(),
            active: store.active.clone(),
            contact_impulse: store.contact_impulse.clone(),
            wildcards: store.wildcards.clone(),
            t,
            max_speed: store.max_surface_speed(),
        }
    }

    pub fn len(&self) -> usize {
        self.voxel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxel.is_empty()
    }

    #[inline]
    pub fn position(&self, frame: &WorldFrame, id: OwnerId) -> Vec3 {
        frame.decode(self.voxel[id as usize], self.offset[id as usize])
    }
}
