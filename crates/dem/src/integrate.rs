//! Dynamics step: narrow phase, force accumulation and the symplectic update.
//!
//! One call to [`DynamicsContext::step`] is one `dt` of simulated time. The
//! candidate list it walks may be several steps stale; the safety margin the
//! broad phase applied guarantees no touching pair is missing from it.

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::bins::BinGrid;
use crate::broadphase::PairList;
use crate::contact::{ContactTable, PairKey};
use crate::error::{Anomaly, AnomalyLog, FatalError};
use crate::family::{FamilyIdx, FamilyMask, FIXED_FAMILY};
use crate::geometry::{GeometryStore, PairKind};
use crate::kernels::{ContactCtx, ContactForce, ContactKernel, PrescriptionKernel};
use crate::material::MaterialTable;
use crate::owner::{MassProps, OwnerId, OwnerStore};
use crate::world::WorldFrame;
use std::sync::Arc;

/// Everything both workers read but never write after `initialize`.
pub struct SimStatics {
    pub frame: WorldFrame,
    pub geometry: GeometryStore,
    pub materials: MaterialTable,
    pub mass_props: Vec<MassProps>,
    /// Mass slot per owner, in owner order (owners also carry it; this copy
    /// serves read-only consumers that never see the live store).
    pub owner_mass_idx: Vec<u32>,
    pub mask: FamilyMask,
    pub gravity: Vec3,
    pub dt: f32,
    /// Safety margin (expand factor) applied by the broad phase.
    pub margin: f32,
    /// Bin population ceiling before a cycle fails with `TooCrowded`.
    pub crowd_cap: usize,
    /// Max halvings before `TooCrowded` escalates to fatal.
    pub max_crowd_retries: u32,
    /// Drift budget: DI steps allowed per CD publication.
    pub update_freq: u32,
    /// Anomaly threshold, not a hard limit.
    pub max_velocity: f32,
    pub initial_bins: BinGrid,
}

/// A queued one-shot impulse (force and torque over one step).
#[derive(Clone, Copy, Debug)]
pub struct Impulse {
    pub owner: OwnerId,
    pub force: Vec3,
    pub torque: Vec3,
}

/// The dynamics thread's working state. Owner state lives here exclusively
/// once the workers start; everyone else reads published snapshots.
pub struct DynamicsContext {
    pub statics: Arc<SimStatics>,
    pub owners: OwnerStore,
    pub contacts: ContactTable,
    pub kernel: Arc<dyn ContactKernel>,
    pub prescriptions: FxHashMap<FamilyIdx, Arc<dyn PrescriptionKernel>>,
    pub impulses: Vec<Impulse>,
    pub t: f64,
    anomalies: Arc<AnomalyLog>,
    // Scratch, sized once.
    contact_force: Vec<Vec3>,
    torque: Vec<Vec3>,
}

impl DynamicsContext {
    pub fn new(
        statics: Arc<SimStatics>,
        owners: OwnerStore,
        contacts: ContactTable,
        kernel: Arc<dyn ContactKernel>,
        prescriptions: FxHashMap<FamilyIdx, Arc<dyn PrescriptionKernel>>,
        anomalies: Arc<AnomalyLog>,
    ) -> Self {
        let n = owners.len();
        Self {
            statics,
            owners,
            contacts,
            kernel,
            prescriptions,
            impulses: Vec::new(),
            t: 0.0,
            anomalies,
            contact_force: vec![Vec3::ZERO; n],
            torque: vec![Vec3::ZERO; n],
        }
    }

    /// Advance one step against the given candidate list.
    pub fn step(&mut self, pairs: &PairList) -> Result<(), FatalError> {
        let dt = self.statics.dt;

        self.contact_force.fill(Vec3::ZERO);
        self.torque.fill(Vec3::ZERO);

        self.accumulate_contacts(pairs)?;
        self.contacts.sweep();

        // Soft prescriptions seed state before forces integrate over it.
        self.apply_prescriptions(false);

        self.integrate()?;

        // Dictated prescriptions overwrite whatever the integrator produced.
        self.apply_prescriptions(true);

        self.t += dt as f64;
        Ok(())
    }

    fn owner_world(&self, id: OwnerId) -> (Vec3, Quat) {
        (
            self.owners.position(&self.statics.frame, id),
            self.owners.quat[id as usize],
        )
    }

    fn inv_mass(&self, id: OwnerId) -> f32 {
        let i = id as usize;
        if self.owners.family[i] == FIXED_FAMILY {
            return 0.0;
        }
        self.statics.mass_props[self.owners.mass_idx[i] as usize].inv_mass()
    }

    fn accumulate_contacts(&mut self, pairs: &PairList) -> Result<(), FatalError> {
        let statics = self.statics.clone();
        let geo = &statics.geometry;

        for pair in &pairs.pairs {
            let sphere_a = &geo.spheres[pair.a as usize];
            let owner_a = sphere_a.owner;
            let owner_b = geo.owner_of(pair.b);
            // A pair may reference an owner purged since the cycle ran.
            if !self.owners.active[owner_a as usize] || !self.owners.active[owner_b as usize] {
                continue;
            }

            let (pos_a, quat_a) = self.owner_world(owner_a);
            let center_a = pos_a + quat_a * sphere_a.rel_pos;
            let radius_a = sphere_a.radius;

            let key = PairKey::new(pair.a, pair.b);
            let (pos_b, quat_b) = self.owner_world(owner_b);

            // Exact overlap for this pair kind.
            let (overlap, r_eff) = match pair.kind {
                PairKind::SphereSphere => {
                    let sb = &geo.spheres[pair.b as usize];
                    let center_b = pos_b + quat_b * sb.rel_pos;
                    (
                        crate::narrowphase::sphere_sphere(center_a, radius_a, center_b, sb.radius),
                        radius_a * sb.radius / (radius_a + sb.radius),
                    )
                }
                PairKind::SphereTriangle => {
                    let tri = &geo.triangles[(pair.b - geo.tri_base()) as usize];
                    let v = [
                        pos_b + quat_b * tri.v[0],
                        pos_b + quat_b * tri.v[1],
                        pos_b + quat_b * tri.v[2],
                    ];
                    (
                        crate::narrowphase::sphere_triangle(center_a, radius_a, &v),
                        radius_a,
                    )
                }
                PairKind::SphereAnalytical => {
                    let anal = &geo.analytical[(pair.b - geo.anal_base()) as usize];
                    (
                        crate::narrowphase::sphere_analytical(center_a, radius_a, &anal.shape),
                        radius_a,
                    )
                }
            };

            let Some(geom) = overlap else {
                // Separated: any friction history for the pair dies.
                self.contacts.drop_pair(key);
                continue;
            };

            let min_r = match pair.kind {
                PairKind::SphereSphere => radius_a.min(geo.spheres[pair.b as usize].radius),
                _ => radius_a,
            };
            if geom.depth > min_r {
                self.anomalies.record(Anomaly::DeepPenetration {
                    gid_a: pair.a,
                    gid_b: pair.b,
                    depth: geom.depth,
                });
            }

            let inv_a = self.inv_mass(owner_a);
            let inv_b = self.inv_mass(owner_b);
            let inv_sum = inv_a + inv_b;
            if inv_sum <= 0.0 {
                // Two pinned bodies; nothing to push.
                continue;
            }
            let m_eff = 1.0 / inv_sum;

            // Velocity of each surface at the contact point.
            let ia = owner_a as usize;
            let ib = owner_b as usize;
            let w_a = quat_a * self.owners.ang_vel[ia];
            let w_b = quat_b * self.owners.ang_vel[ib];
            let v_a = self.owners.lin_vel[ia] + w_a.cross(geom.point - pos_a);
            let v_b = self.owners.lin_vel[ib] + w_b.cross(geom.point - pos_b);

            let props = *statics
                .materials
                .pair(geo.material_of(pair.a), geo.material_of(pair.b));

            let history = self.contacts.touch(key);
            let mut ctx = ContactCtx {
                normal: geom.normal,
                depth: geom.depth,
                rel_vel: v_a - v_b,
                rel_ang_vel: w_a - w_b,
                props,
                r_eff,
                m_eff,
                dt: statics.dt,
                history,
            };
            let ContactForce { force, torque } = self.kernel.evaluate(&mut ctx);

            if !force.is_finite() || !torque.is_finite() {
                return Err(FatalError::NarrowPhaseNan {
                    owner: owner_a,
                    t: self.t,
                });
            }

            self.contact_force[ia] += force;
            self.torque[ia] += (geom.point - pos_a).cross(force) + torque;
            self.contact_force[ib] -= force;
            self.torque[ib] -= (geom.point - pos_b).cross(force) + torque;
            self.owners.contact_impulse[ia] += force * statics.dt;
            self.owners.contact_impulse[ib] -= force * statics.dt;
        }
        Ok(())
    }

    fn integrate(&mut self) -> Result<(), FatalError> {
        let statics = self.statics.clone();
        let frame = &statics.frame;
        let dt = statics.dt;
        let gravity = statics.gravity;

        // Queued impulses act for exactly one step.
        for imp in self.impulses.drain(..) {
            let i = imp.owner as usize;
            if i < self.contact_force.len() {
                self.contact_force[i] += imp.force;
                self.torque[i] += imp.torque;
            }
        }

        for i in 0..self.owners.len() {
            if !self.owners.active[i] {
                continue;
            }
            if self.owners.family[i] == FIXED_FAMILY {
                self.owners.lin_vel[i] = Vec3::ZERO;
                self.owners.ang_vel[i] = Vec3::ZERO;
                continue;
            }
            let props = statics.mass_props[self.owners.mass_idx[i] as usize];
            let inv_m = props.inv_mass();

            // Velocity first, then position: symplectic Euler. Massless
            // owners (boundaries) keep whatever velocity they were given.
            if inv_m > 0.0 {
                let accel = self.contact_force[i] * inv_m + gravity;
                self.owners.lin_vel[i] += accel * dt;
            }
            self.owners.offset[i] += self.owners.lin_vel[i] * dt;
            if frame.renormalize(&mut self.owners.voxel[i], &mut self.owners.offset[i]) {
                self.anomalies.record(Anomaly::OutOfWorld { owner: i as u32 });
            }

            // Euler's equations in the body (principal) frame. Massless
            // owners skip the torque response but still turn with any
            // velocity they were given.
            if inv_m > 0.0 {
                let q = self.owners.quat[i];
                let torque_body = q.inverse() * self.torque[i];
                let w = self.owners.ang_vel[i];
                let moi = props.moi;
                let w_dot = Vec3::new(
                    (torque_body.x - (w.y * w.z) * (moi.z - moi.y)) / moi.x,
                    (torque_body.y - (w.z * w.x) * (moi.x - moi.z)) / moi.y,
                    (torque_body.z - (w.x * w.y) * (moi.y - moi.x)) / moi.z,
                );
                self.owners.ang_vel[i] += w_dot * dt;
            }
            if self.owners.ang_vel[i] != Vec3::ZERO {
                let q = self.owners.quat[i];
                self.owners.quat[i] =
                    (q * Quat::from_scaled_axis(self.owners.ang_vel[i] * dt)).normalize();
            }

            let v = self.owners.lin_vel[i];
            let w = self.owners.ang_vel[i];
            if !v.is_finite() || !w.is_finite() || !self.owners.offset[i].is_finite() {
                return Err(FatalError::NarrowPhaseNan {
                    owner: i as u32,
                    t: self.t,
                });
            }
            let speed = v.length();
            if speed > statics.max_velocity {
                self.anomalies.record(Anomaly::SpeedExceeded {
                    owner: i as u32,
                    speed,
                    limit: statics.max_velocity,
                });
            }
        }
        Ok(())
    }

    /// Apply family prescriptions whose `dictate` flag matches `dictated`.
    fn apply_prescriptions(&mut self, dictated: bool) {
        if self.prescriptions.is_empty() {
            return;
        }
        let frame = self.statics.frame;
        // Next step's end time: prescriptions describe where the family
        // should be once this step lands.
        let t_eval = (self.t + self.statics.dt as f64) as f32;
        for i in 0..self.owners.len() {
            if !self.owners.active[i] {
                continue;
            }
            let Some(kernel) = self.prescriptions.get(&self.owners.family[i]) else {
                continue;
            };
            let motion = kernel.evaluate(t_eval);
            if motion.dictate != dictated {
                continue;
            }
            if let Some(v) = motion.lin_vel {
                self.owners.lin_vel[i] = v;
            }
            if let Some(w) = motion.ang_vel {
                self.owners.ang_vel[i] = w;
            }
            if let Some(p) = motion.position {
                self.owners.set_position(&frame, i as u32, p);
            }
            if let Some(q) = motion.quat {
                self.owners.quat[i] = q.normalize();
            }
        }
    }

    /// Deactivate every owner of a family (bulk purge between sync points).
    pub fn purge_family(&mut self, family: FamilyIdx) {
        for i in 0..self.owners.len() {
            if self.owners.family[i] == family {
                self.owners.active[i] = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadphase::{ContactPair, find_pairs};
    use crate::geometry::SphereGeom;
    use crate::kernels::{ContactModelSpec, CpuBackend, ComputeBackend, PrescriptionSpec};
    use crate::owner::OwnerKind;

    fn statics_for(dt: f32, gravity: Vec3) -> SimStatics {
        let frame = WorldFrame::new(Vec3::splat(4.0), [11, 11, 10], Vec3::ZERO).unwrap();
        let mut materials = MaterialTable::default();
        materials.load(crate::material::Material {
            e: 1e9,
            nu: 0.3,
            cor: 1.0,
            mu: 0.0,
            crr: 0.0,
        });
        materials.seal();
        let initial_bins = BinGrid::new(&frame, 0.1).unwrap();
        SimStatics {
            frame,
            geometry: GeometryStore::default(),
            materials,
            mass_props: vec![MassProps {
                mass: 1.0,
                moi: Vec3::splat(0.01),
            }],
            owner_mass_idx: Vec::new(),
            mask: FamilyMask::default(),
            gravity,
            dt,
            margin: 0.01,
            crowd_cap: 256,
            max_crowd_retries: 8,
            update_freq: 5,
            max_velocity: 1e3,
            initial_bins,
        }
    }

    fn one_sphere_scene(
        statics: &mut SimStatics,
        positions: &[(Vec3, Vec3)],
        radius: f32,
    ) -> OwnerStore {
        let frame = statics.frame;
        let mut owners = OwnerStore::default();
        for &(pos, vel) in positions {
            let id = owners.push(
                &frame,
                OwnerKind::Clump,
                pos,
                Quat::IDENTITY,
                vel,
                Vec3::ZERO,
                0,
                0,
                radius,
            );
            statics.geometry.spheres.push(SphereGeom {
                owner: id,
                rel_pos: Vec3::ZERO,
                radius,
                material: 0,
            });
        }
        owners
    }

    fn context(statics: SimStatics, owners: OwnerStore) -> DynamicsContext {
        let kernel = CpuBackend.build_contact_kernel(&ContactModelSpec::HertzMindlin);
        DynamicsContext::new(
            Arc::new(statics),
            owners,
            ContactTable::new(&[]),
            kernel,
            FxHashMap::default(),
            Arc::new(AnomalyLog::default()),
        )
    }

    #[test]
    fn free_fall_matches_closed_form() {
        let dt = 1e-4;
        let g = 9.81;
        let mut statics = statics_for(dt, Vec3::new(0.0, 0.0, -g));
        let owners = one_sphere_scene(&mut statics, &[(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO)], 0.01);
        let mut ctx = context(statics, owners);
        let empty = PairList::default();
        let steps = 1000;
        for _ in 0..steps {
            ctx.step(&empty).unwrap();
        }
        let t = steps as f32 * dt;
        let z = ctx.owners.position(&ctx.statics.frame, 0).z;
        let expected = 1.0 - 0.5 * g * t * t;
        // Symplectic Euler lags the parabola by g*t*dt/2 at worst.
        assert!(
            (z - expected).abs() < g * t * dt,
            "z = {z}, closed form = {expected}"
        );
    }

    #[test]
    fn queued_impulse_changes_momentum_once() {
        let dt = 1e-3;
        let mut statics = statics_for(dt, Vec3::ZERO);
        let owners = one_sphere_scene(&mut statics, &[(Vec3::ZERO, Vec3::ZERO)], 0.01);
        let mut ctx = context(statics, owners);
        ctx.impulses.push(Impulse {
            owner: 0,
            force: Vec3::new(2.0, 0.0, 0.0),
            torque: Vec3::ZERO,
        });
        let empty = PairList::default();
        ctx.step(&empty).unwrap();
        let v1 = ctx.owners.lin_vel[0];
        ctx.step(&empty).unwrap();
        let v2 = ctx.owners.lin_vel[0];
        assert!((v1.x - 2.0 * dt).abs() < 1e-7, "impulse applied for one step");
        assert_eq!(v1, v2, "impulse does not persist");
    }

    #[test]
    fn contact_pushes_spheres_apart() {
        let dt = 1e-6;
        let mut statics = statics_for(dt, Vec3::ZERO);
        let owners = one_sphere_scene(
            &mut statics,
            &[
                (Vec3::new(-0.0099, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0)),
                (Vec3::new(0.0099, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0)),
            ],
            0.01,
        );
        let mut ctx = context(statics, owners);
        let pairs = PairList {
            pairs: vec![ContactPair {
                a: 0,
                b: 1,
                kind: PairKind::SphereSphere,
            }],
            t: 0.0,
        };
        for _ in 0..5000 {
            ctx.step(&pairs).unwrap();
        }
        assert!(ctx.owners.lin_vel[0].x < 0.0, "left sphere bounced back");
        assert!(ctx.owners.lin_vel[1].x > 0.0, "right sphere bounced back");
    }

    #[test]
    fn fixed_family_never_moves() {
        let dt = 1e-3;
        let mut statics = statics_for(dt, Vec3::new(0.0, 0.0, -9.81));
        let mut owners =
            one_sphere_scene(&mut statics, &[(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO)], 0.01);
        owners.family[0] = FIXED_FAMILY;
        let mut ctx = context(statics, owners);
        let empty = PairList::default();
        for _ in 0..100 {
            ctx.step(&empty).unwrap();
        }
        let p = ctx.owners.position(&ctx.statics.frame, 0);
        assert!((p.z - 1.0).abs() < 1e-6);
        assert_eq!(ctx.owners.lin_vel[0], Vec3::ZERO);
    }

    #[test]
    fn dictated_spin_is_exact() {
        let dt = 1e-3;
        let mut statics = statics_for(dt, Vec3::new(0.0, 0.0, -9.81));
        let owners = one_sphere_scene(&mut statics, &[(Vec3::ZERO, Vec3::ZERO)], 0.01);
        let mut ctx = context(statics, owners);
        let spec = PrescriptionSpec {
            ang_vel: Some(Arc::new(|_| Vec3::new(0.0, 0.0, 3.0))),
            lin_vel: Some(Arc::new(|_| Vec3::ZERO)),
            dictate: true,
            ..Default::default()
        };
        ctx.prescriptions
            .insert(0, CpuBackend.build_prescription_kernel(&spec));
        let empty = PairList::default();
        for _ in 0..1000 {
            ctx.step(&empty).unwrap();
        }
        assert_eq!(ctx.owners.ang_vel[0], Vec3::new(0.0, 0.0, 3.0));
        // Gravity was dictated away.
        assert_eq!(ctx.owners.lin_vel[0], Vec3::ZERO);
    }

    #[test]
    fn purged_owner_pairs_are_skipped() {
        let dt = 1e-5;
        let mut statics = statics_for(dt, Vec3::ZERO);
        let owners = one_sphere_scene(
            &mut statics,
            &[
                (Vec3::new(-0.009, 0.0, 0.0), Vec3::ZERO),
                (Vec3::new(0.009, 0.0, 0.0), Vec3::ZERO),
            ],
            0.01,
        );
        let mut ctx = context(statics, owners);
        ctx.purge_family(0);
        let pairs = PairList {
            pairs: vec![ContactPair {
                a: 0,
                b: 1,
                kind: PairKind::SphereSphere,
            }],
            t: 0.0,
        };
        ctx.step(&pairs).unwrap();
        assert_eq!(ctx.owners.lin_vel[0], Vec3::ZERO);

        // And the broad phase stops seeing them entirely.
        let snap = crate::owner::StateSnapshot::capture(&ctx.owners, 0.0);
        let list = find_pairs(
            &snap,
            &ctx.statics.frame,
            &ctx.statics.geometry,
            &ctx.statics.initial_bins,
            &ctx.statics.mask,
            0.0,
            64,
        )
        .unwrap();
        assert!(list.pairs.is_empty());
    }
}
