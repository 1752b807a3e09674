//! The controller surface: configuration, entity loading, and the
//! step/sync/shutdown drive of the two workers.
//!
//! A [`Solver`] lives in two phases. Before `initialize()` every call stages
//! data (materials, templates, clump batches, boundaries, family rules).
//! `initialize()` validates the configuration, compacts family numbers,
//! flattens templates into the flat stores, and spawns the worker pair.
//! Afterwards the controller drives the run and reads committed snapshots;
//! mutations travel to the dynamics thread as queued commands.

use std::path::Path;
use std::sync::Arc;

use glam::{Quat, Vec3};
use rustc_hash::FxHashMap;

use crate::bins::BinGrid;
use crate::broadphase::{find_pairs, PairList};
use crate::contact::ContactTable;
use crate::error::{Anomaly, AnomalyLog, ConfigError, FatalError};
use crate::family::{FamilyMap, FamilyMask};
use crate::geometry::{AnalyticalGeom, AnalyticalShape, GeometryStore, SphereGeom, TriangleGeom};
use crate::inspector::{self, Query};
use crate::integrate::{DynamicsContext, Impulse, SimStatics};
use crate::kernels::{
    ComputeBackend, ContactModelSpec, CpuBackend, PrescriptionSpec,
};
use crate::material::{Material, MaterialId, MaterialTable};
use crate::owner::{
    ClumpTemplate, MassProps, OwnerId, OwnerKind, OwnerStore, SphereComp, StateSnapshot,
};
use crate::output;
use crate::scheduler::{Command, Scheduler, SchedulerStats};
use crate::world::WorldFrame;

/// Handle to a contiguous batch of owners added in one call.
#[derive(Clone, Copy, Debug)]
pub struct OwnerHandle {
    pub first: OwnerId,
    pub count: u32,
}

impl OwnerHandle {
    /// The single owner of a one-element batch.
    pub fn id(&self) -> OwnerId {
        self.first
    }

    pub fn ids(&self) -> std::ops::Range<OwnerId> {
        self.first..self.first + self.count
    }
}

/// One clump to spawn: template plus initial state.
#[derive(Clone, Copy, Debug)]
pub struct ClumpSpawn {
    pub template: u32,
    pub pos: Vec3,
    pub quat: Quat,
    pub lin_vel: Vec3,
    pub ang_vel: Vec3,
    pub family: u32,
}

impl ClumpSpawn {
    pub fn at(template: u32, pos: Vec3) -> Self {
        Self {
            template,
            pos,
            quat: Quat::IDENTITY,
            lin_vel: Vec3::ZERO,
            ang_vel: Vec3::ZERO,
            family: 0,
        }
    }

    pub fn vel(mut self, v: Vec3) -> Self {
        self.lin_vel = v;
        self
    }

    pub fn ang_vel(mut self, w: Vec3) -> Self {
        self.ang_vel = w;
        self
    }

    pub fn quat(mut self, q: Quat) -> Self {
        self.quat = q;
        self
    }

    pub fn family(mut self, f: u32) -> Self {
        self.family = f;
        self
    }
}

enum StagedPayload {
    Clump { template: u32 },
    External { shapes: Vec<(AnalyticalShape, MaterialId)> },
    Mesh {
        triangles: Vec<[Vec3; 3]>,
        material: MaterialId,
        mass: f32,
        moi: Vec3,
    },
}

struct StagedOwner {
    payload: StagedPayload,
    pos: Vec3,
    quat: Quat,
    lin_vel: Vec3,
    ang_vel: Vec3,
    family: u32,
}

struct Run {
    scheduler: Scheduler,
    statics: Arc<SimStatics>,
}

/// The discrete-element solver.
pub struct Solver {
    // World and run parameters, immutable once initialized.
    world_size: Vec3,
    world_center: Vec3,
    voxel_exp: [u32; 3],
    gravity: Vec3,
    dt: f32,
    update_freq: u32,
    expand_factor: Option<f32>,
    bin_size: Option<f32>,
    crowd_cap: usize,
    max_crowd_retries: u32,
    max_velocity: f32,

    backend: Arc<dyn ComputeBackend>,
    contact_model: ContactModelSpec,
    contact_wildcards: Vec<String>,
    owner_wildcards: Vec<String>,

    materials: MaterialTable,
    templates: Vec<ClumpTemplate>,
    staged: Vec<StagedOwner>,
    staged_wildcards: Vec<(String, OwnerId, f32)>,

    families: FamilyMap,
    forbidden_pairs: Vec<(u32, u32)>,
    prescriptions: Vec<(u32, PrescriptionSpec)>,

    anomalies: Arc<AnomalyLog>,
    run: Option<Run>,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    pub fn new() -> Self {
        Self {
            world_size: Vec3::ONE,
            world_center: Vec3::ZERO,
            voxel_exp: [11, 11, 10],
            gravity: Vec3::new(0.0, 0.0, -9.81),
            dt: 1e-5,
            update_freq: 10,
            expand_factor: None,
            bin_size: None,
            crowd_cap: 256,
            max_crowd_retries: 8,
            max_velocity: 1e3,
            backend: Arc::new(CpuBackend),
            contact_model: ContactModelSpec::HertzMindlin,
            contact_wildcards: Vec::new(),
            owner_wildcards: Vec::new(),
            materials: MaterialTable::default(),
            templates: Vec::new(),
            staged: Vec::new(),
            staged_wildcards: Vec::new(),
            families: FamilyMap::default(),
            forbidden_pairs: Vec::new(),
            prescriptions: Vec::new(),
            anomalies: Arc::new(AnomalyLog::default()),
            run: None,
        }
    }

    // --- configuration -----------------------------------------------------

    /// World box dimensions and center. The box is rounded up to whole
    /// power-of-two voxel counts.
    pub fn instruct_box_domain(&mut self, size: Vec3, center: Vec3) -> &mut Self {
        self.world_size = size;
        self.world_center = center;
        self
    }

    /// Per-axis voxel-count exponents; must sum to the voxel-id bit width.
    pub fn set_voxel_exponents(&mut self, exp: [u32; 3]) -> &mut Self {
        self.voxel_exp = exp;
        self
    }

    pub fn set_gravity(&mut self, g: Vec3) -> &mut Self {
        self.gravity = g;
        self
    }

    pub fn set_time_step(&mut self, dt: f32) -> &mut Self {
        self.dt = dt;
        self
    }

    /// Drift budget: how many steps the dynamics thread may run on a stale
    /// pair list. Zero means strict lockstep.
    pub fn set_cd_update_freq(&mut self, freq: u32) -> &mut Self {
        self.update_freq = freq;
        self
    }

    /// Safety radius added to every geometry during contact detection.
    pub fn set_expand_factor(&mut self, beta: f32) -> &mut Self {
        self.expand_factor = Some(beta);
        self
    }

    /// Derive the expand factor from an expected top speed: the margin must
    /// cover the `update_freq` steps the integrator may spend on one pair
    /// list (at least one, even in lockstep) at that speed.
    pub fn suggest_expand_factor(&mut self, max_vel: f32) -> &mut Self {
        self.expand_factor = Some(max_vel * self.update_freq.max(1) as f32 * self.dt);
        self
    }

    pub fn set_init_bin_size(&mut self, size: f32) -> &mut Self {
        self.bin_size = Some(size);
        self
    }

    /// Geometries allowed in one bin before the detector gives up and halves
    /// the bin size.
    pub fn set_bin_crowd_cap(&mut self, cap: usize) -> &mut Self {
        self.crowd_cap = cap;
        self
    }

    /// Speed above which owners are reported as anomalous (not clamped).
    pub fn set_max_velocity(&mut self, v: f32) -> &mut Self {
        self.max_velocity = v;
        self
    }

    pub fn set_contact_model(&mut self, spec: ContactModelSpec) -> &mut Self {
        self.contact_model = spec;
        self
    }

    pub fn set_compute_backend(&mut self, backend: Arc<dyn ComputeBackend>) -> &mut Self {
        self.backend = backend;
        self
    }

    /// Register a named per-contact scalar carried in contact history.
    pub fn add_contact_wildcard(&mut self, name: &str) -> &mut Self {
        if !self.contact_wildcards.iter().any(|n| n == name) {
            self.contact_wildcards.push(name.to_owned());
        }
        self
    }

    /// Register a named per-owner scalar column.
    pub fn add_owner_wildcard(&mut self, name: &str) -> &mut Self {
        if !self.owner_wildcards.iter().any(|n| n == name) {
            self.owner_wildcards.push(name.to_owned());
        }
        self
    }

    // --- loading -----------------------------------------------------------

    pub fn load_material(&mut self, mat: Material) -> MaterialId {
        self.materials.load(mat)
    }

    /// Load a clump template from its mass properties and sphere components.
    pub fn load_clump_template(
        &mut self,
        mass: f32,
        moi: Vec3,
        spheres: Vec<SphereComp>,
    ) -> Result<u32, ConfigError> {
        if spheres.is_empty() {
            return Err(ConfigError::EmptyTemplate);
        }
        for s in &spheres {
            self.materials.get(s.material)?;
        }
        self.templates.push(ClumpTemplate { mass, moi, spheres });
        Ok((self.templates.len() - 1) as u32)
    }

    /// One-sphere convenience template.
    pub fn load_clump_simple_sphere(
        &mut self,
        mass: f32,
        radius: f32,
        material: MaterialId,
    ) -> Result<u32, ConfigError> {
        let i = 2.0 / 5.0 * mass * radius * radius;
        self.load_clump_template(
            mass,
            Vec3::splat(i),
            vec![SphereComp {
                rel_pos: Vec3::ZERO,
                radius,
                material,
            }],
        )
    }

    /// Append a batch of clumps; they become owners at `initialize`.
    pub fn add_clumps(&mut self, batch: &[ClumpSpawn]) -> Result<OwnerHandle, ConfigError> {
        self.fail_if_running()?;
        let first = self.staged.len() as OwnerId;
        for spawn in batch {
            if spawn.template as usize >= self.templates.len() {
                return Err(ConfigError::UnknownTemplate(spawn.template));
            }
            self.families.mention(spawn.family);
            self.staged.push(StagedOwner {
                payload: StagedPayload::Clump {
                    template: spawn.template,
                },
                pos: spawn.pos,
                quat: spawn.quat,
                lin_vel: spawn.lin_vel,
                ang_vel: spawn.ang_vel,
                family: spawn.family,
            });
        }
        Ok(OwnerHandle {
            first,
            count: batch.len() as u32,
        })
    }

    /// Append an owner made of analytical primitives.
    pub fn add_external_object(
        &mut self,
        shapes: Vec<(AnalyticalShape, MaterialId)>,
        family: u32,
    ) -> Result<OwnerHandle, ConfigError> {
        self.fail_if_running()?;
        for (_, m) in &shapes {
            self.materials.get(*m)?;
        }
        self.families.mention(family);
        let first = self.staged.len() as OwnerId;
        self.staged.push(StagedOwner {
            payload: StagedPayload::External { shapes },
            pos: Vec3::ZERO,
            quat: Quat::IDENTITY,
            lin_vel: Vec3::ZERO,
            ang_vel: Vec3::ZERO,
            family,
        });
        Ok(OwnerHandle { first, count: 1 })
    }

    /// Fixed boundary plane: a one-primitive external owner in a family that
    /// is pinned in place.
    pub fn add_bc_plane(
        &mut self,
        point: Vec3,
        normal: Vec3,
        material: MaterialId,
        family: u32,
    ) -> Result<OwnerHandle, ConfigError> {
        self.set_family_fixed(family);
        self.add_external_object(
            vec![(
                AnalyticalShape::Plane {
                    point,
                    normal: normal.normalize(),
                },
                material,
            )],
            family,
        )
    }

    /// Append a triangle-mesh owner. `mass = 0` pins it against forces
    /// (it still follows prescribed velocities).
    #[allow(clippy::too_many_arguments)]
    pub fn add_mesh(
        &mut self,
        triangles: Vec<[Vec3; 3]>,
        material: MaterialId,
        pos: Vec3,
        quat: Quat,
        family: u32,
        mass: f32,
        moi: Vec3,
    ) -> Result<OwnerHandle, ConfigError> {
        self.fail_if_running()?;
        if triangles.is_empty() {
            return Err(ConfigError::EmptyMesh);
        }
        self.materials.get(material)?;
        self.families.mention(family);
        let first = self.staged.len() as OwnerId;
        self.staged.push(StagedOwner {
            payload: StagedPayload::Mesh {
                triangles,
                material,
                mass,
                moi,
            },
            pos,
            quat,
            lin_vel: Vec3::ZERO,
            ang_vel: Vec3::ZERO,
            family,
        });
        Ok(OwnerHandle { first, count: 1 })
    }

    // --- family rules ------------------------------------------------------

    /// Forbid contacts between two (user-numbered) families.
    pub fn disable_contact_between_families(&mut self, a: u32, b: u32) {
        self.families.mention(a);
        self.families.mention(b);
        if !self.forbidden_pairs.contains(&(a, b)) && !self.forbidden_pairs.contains(&(b, a)) {
            self.forbidden_pairs.push((a, b));
        }
        self.refresh_mask_if_running();
    }

    /// Re-allow a previously forbidden pair.
    pub fn enable_contact_between_families(&mut self, a: u32, b: u32) {
        self.forbidden_pairs
            .retain(|&(x, y)| !((x, y) == (a, b) || (x, y) == (b, a)));
        self.refresh_mask_if_running();
    }

    /// Pin a family: members never integrate and read zero velocity.
    pub fn set_family_fixed(&mut self, family: u32) {
        self.families.set_fixed(family);
    }

    /// Install (or replace) the motion prescription of a family.
    pub fn set_family_prescription(&mut self, family: u32, spec: PrescriptionSpec) {
        self.families.mention(family);
        self.prescriptions.retain(|(f, _)| *f != family);
        self.prescriptions.push((family, spec.clone()));
        if let Some(run) = &self.run {
            let internal = self.families.index_of(family).expect("mentioned above");
            let kernel = self.backend.build_prescription_kernel(&spec);
            run.scheduler.push_command(Command::SetPrescription {
                family: internal,
                kernel: Some(kernel),
            });
        }
    }

    /// Prescribe a constant angular velocity (body frame), dictated.
    pub fn set_family_prescribed_ang_vel(&mut self, family: u32, w: Vec3) {
        self.set_family_prescription(
            family,
            PrescriptionSpec {
                ang_vel: Some(Arc::new(move |_| w)),
                dictate: true,
                ..Default::default()
            },
        );
    }

    /// Prescribe a constant linear velocity, dictated.
    pub fn set_family_prescribed_lin_vel(&mut self, family: u32, v: Vec3) {
        self.set_family_prescription(
            family,
            PrescriptionSpec {
                lin_vel: Some(Arc::new(move |_| v)),
                dictate: true,
                ..Default::default()
            },
        );
    }

    /// Synchronous family renumbering; requires a synced stance when running.
    pub fn change_family_now(&mut self, from: u32, to: u32) -> Result<(), ConfigError> {
        self.families.mention(to);
        if let Some(run) = &self.run {
            let from_idx = self.families.index_of(from)?;
            let to_idx = self.families.index_of(to)?;
            run.scheduler.sync().map_err(|_| ConfigError::NotSynced)?;
            run.scheduler
                .push_command(Command::RenameFamily {
                    from: from_idx,
                    to: to_idx,
                });
            run.scheduler.sync().map_err(|_| ConfigError::NotSynced)?;
        } else {
            for staged in &mut self.staged {
                if staged.family == from {
                    staged.family = to;
                }
            }
        }
        Ok(())
    }

    /// Remove every owner of a family. Between sync points only.
    pub fn purge_family(&mut self, family: u32) -> Result<(), ConfigError> {
        if let Some(run) = &self.run {
            let idx = self.families.index_of(family)?;
            run.scheduler.sync().map_err(|_| ConfigError::NotSynced)?;
            run.scheduler.push_command(Command::PurgeFamily(idx));
            run.scheduler.sync().map_err(|_| ConfigError::NotSynced)?;
        } else {
            self.staged.retain(|s| s.family != family);
        }
        Ok(())
    }

    // --- initialize --------------------------------------------------------

    fn fail_if_running(&self) -> Result<(), ConfigError> {
        if self.run.is_some() {
            Err(ConfigError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    fn build_mask(&self) -> Result<FamilyMask, ConfigError> {
        let mut mask = FamilyMask::default();
        for &(a, b) in &self.forbidden_pairs {
            mask.forbid(self.families.index_of(a)?, self.families.index_of(b)?);
        }
        Ok(mask)
    }

    fn refresh_mask_if_running(&mut self) {
        if let Some(run) = &self.run {
            if let Ok(mask) = self.build_mask() {
                run.scheduler.update_mask(mask);
            }
        }
    }

    /// Close the configuration, build the flat stores and start the workers.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        self.fail_if_running()?;
        if !(self.dt > 0.0) {
            return Err(ConfigError::BadStepSize(self.dt));
        }
        if self.materials.is_empty() {
            return Err(ConfigError::NoMaterial);
        }
        if self.templates.is_empty() {
            return Err(ConfigError::NoTemplate);
        }

        let frame = WorldFrame::new(self.world_size, self.voxel_exp, self.world_center)?;

        // Materials first, then geometry flattening, then family compaction
        // is resolved per staged owner below.
        let mut materials = self.materials.clone();
        materials.seal();

        let mut owners = OwnerStore::default();
        for name in &self.owner_wildcards {
            owners.add_wildcard(name);
        }
        let mut geometry = GeometryStore::default();
        let mut mass_props: Vec<MassProps> = Vec::new();
        let mut template_slot: FxHashMap<u32, u32> = FxHashMap::default();

        // Sphere components first so sphere gids stay the low range.
        let mut sphere_batches: Vec<(OwnerId, u32)> = Vec::new();
        let mut tri_batches: Vec<(OwnerId, usize)> = Vec::new();
        for (idx, staged) in self.staged.iter().enumerate() {
            let family = self.families.index_of(staged.family)?;
            let id = idx as OwnerId;
            match &staged.payload {
                StagedPayload::Clump { template } => {
                    let tpl = &self.templates[*template as usize];
                    let slot = *template_slot.entry(*template).or_insert_with(|| {
                        mass_props.push(MassProps {
                            mass: tpl.mass,
                            moi: tpl.moi,
                        });
                        (mass_props.len() - 1) as u32
                    });
                    owners.push(
                        &frame,
                        OwnerKind::Clump,
                        staged.pos,
                        staged.quat,
                        staged.lin_vel,
                        staged.ang_vel,
                        family,
                        slot,
                        tpl.bounding_radius(),
                    );
                    sphere_batches.push((id, *template));
                }
                StagedPayload::External { .. } => {
                    mass_props.push(MassProps {
                        mass: 0.0,
                        moi: Vec3::ZERO,
                    });
                    owners.push(
                        &frame,
                        OwnerKind::External,
                        staged.pos,
                        staged.quat,
                        staged.lin_vel,
                        staged.ang_vel,
                        family,
                        (mass_props.len() - 1) as u32,
                        0.0,
                    );
                }
                StagedPayload::Mesh {
                    triangles,
                    mass,
                    moi,
                    ..
                } => {
                    mass_props.push(MassProps {
                        mass: *mass,
                        moi: *moi,
                    });
                    let bound = triangles
                        .iter()
                        .flat_map(|t| t.iter())
                        .map(|v| v.length())
                        .fold(0.0, f32::max);
                    owners.push(
                        &frame,
                        OwnerKind::Mesh,
                        staged.pos,
                        staged.quat,
                        staged.lin_vel,
                        staged.ang_vel,
                        family,
                        (mass_props.len() - 1) as u32,
                        bound,
                    );
                    tri_batches.push((id, idx));
                }
            }
        }

        // Flatten geometry: spheres, then triangles, then analytical.
        for (owner, template) in &sphere_batches {
            for comp in &self.templates[*template as usize].spheres {
                geometry.spheres.push(SphereGeom {
                    owner: *owner,
                    rel_pos: comp.rel_pos,
                    radius: comp.radius,
                    material: comp.material,
                });
            }
        }
        for (owner, staged_idx) in &tri_batches {
            if let StagedPayload::Mesh {
                triangles, material, ..
            } = &self.staged[*staged_idx].payload
            {
                for tri in triangles {
                    geometry.triangles.push(TriangleGeom {
                        owner: *owner,
                        v: *tri,
                        material: *material,
                    });
                }
            }
        }
        for (idx, staged) in self.staged.iter().enumerate() {
            if let StagedPayload::External { shapes } = &staged.payload {
                for (shape, material) in shapes {
                    geometry.analytical.push(AnalyticalGeom {
                        owner: idx as OwnerId,
                        shape: *shape,
                        material: *material,
                    });
                }
            }
        }

        let bin_size = BinGrid::derive_size(self.bin_size, geometry.min_sphere_radius())?;
        let initial_bins = BinGrid::new(&frame, bin_size)?;
        let mask = self.build_mask()?;

        let margin = self.expand_factor.unwrap_or(0.0);
        // The scheduler lets the integrator spend at most `update_freq`
        // steps on one pair list (one even in lockstep), so that is the
        // drift the margin has to cover.
        let drift_steps = self.update_freq.max(1);
        let needed = drift_steps as f32 * self.dt * self.max_velocity;
        if margin < needed {
            self.anomalies.record(Anomaly::ExpandFactorTooSmall {
                expand: margin,
                needed,
            });
        }

        let owner_mass_idx = owners.mass_idx.clone();
        let statics = Arc::new(SimStatics {
            frame,
            geometry,
            materials,
            mass_props,
            owner_mass_idx,
            mask,
            gravity: self.gravity,
            dt: self.dt,
            margin,
            crowd_cap: self.crowd_cap,
            max_crowd_retries: self.max_crowd_retries,
            update_freq: self.update_freq,
            max_velocity: self.max_velocity,
            initial_bins,
        });

        // Initial owner-wildcard values staged before initialize.
        for (name, owner, value) in self.staged_wildcards.drain(..) {
            if let Some(column) = owners.wildcards.get_mut(&name) {
                if (owner as usize) < column.len() {
                    column[owner as usize] = value;
                }
            }
        }

        let kernel = self.backend.build_contact_kernel(&self.contact_model);
        let mut prescriptions = FxHashMap::default();
        for (family, spec) in &self.prescriptions {
            prescriptions.insert(
                self.families.index_of(*family)?,
                self.backend.build_prescription_kernel(spec),
            );
        }

        let ctx = DynamicsContext::new(
            statics.clone(),
            owners,
            ContactTable::new(&self.contact_wildcards),
            kernel,
            prescriptions,
            self.anomalies.clone(),
        );
        let scheduler = Scheduler::start(statics.clone(), ctx, self.anomalies.clone());
        self.run = Some(Run { scheduler, statics });
        Ok(())
    }

    // --- drive -------------------------------------------------------------

    fn run(&self) -> &Run {
        self.run.as_ref().expect("solver is not initialized")
    }

    pub fn is_initialized(&self) -> bool {
        self.run.is_some()
    }

    /// Advance the simulation by `duration` seconds of simulated time;
    /// blocks until the dynamics thread has finished the steps.
    pub fn step(&self, duration: f64) -> Result<(), FatalError> {
        self.run().scheduler.step(duration)
    }

    /// Block until both workers are idle; afterwards reads are exact.
    pub fn sync(&self) -> Result<(), FatalError> {
        self.run().scheduler.sync()
    }

    /// Stop the workers. Idempotent; the final committed state stays
    /// readable.
    pub fn shutdown(&mut self) {
        if let Some(run) = &mut self.run {
            run.scheduler.shutdown();
        }
    }

    /// Committed simulated time.
    pub fn time(&self) -> f64 {
        self.run().scheduler.time()
    }

    /// Simulated time of the freshest published pair list.
    pub fn last_pair_time(&self) -> f64 {
        self.run().scheduler.last_pair_time()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.run().scheduler.stats()
    }

    pub fn reset_stats(&self) {
        self.run().scheduler.reset_stats()
    }

    // --- owner access ------------------------------------------------------

    fn snapshot(&self) -> StateSnapshot {
        self.run().scheduler.snapshot()
    }

    pub fn owner_position(&self, owner: OwnerId) -> Vec3 {
        let run = self.run();
        self.snapshot().position(&run.statics.frame, owner)
    }

    pub fn owner_quat(&self, owner: OwnerId) -> Quat {
        self.snapshot().quat[owner as usize]
    }

    pub fn owner_lin_vel(&self, owner: OwnerId) -> Vec3 {
        self.snapshot().lin_vel[owner as usize]
    }

    /// Angular velocity in the owner's body frame.
    pub fn owner_ang_vel(&self, owner: OwnerId) -> Vec3 {
        self.snapshot().ang_vel[owner as usize]
    }

    /// Accumulated contact impulse (sum of contact force times dt).
    pub fn owner_contact_impulse(&self, owner: OwnerId) -> Vec3 {
        self.snapshot().contact_impulse[owner as usize]
    }

    pub fn set_owner_position(&self, owner: OwnerId, pos: Vec3) {
        self.run()
            .scheduler
            .push_command(Command::SetPosition { owner, pos });
    }

    pub fn set_owner_quat(&self, owner: OwnerId, quat: Quat) {
        self.run()
            .scheduler
            .push_command(Command::SetQuat { owner, quat });
    }

    pub fn set_owner_lin_vel(&self, owner: OwnerId, vel: Vec3) {
        self.run()
            .scheduler
            .push_command(Command::SetLinVel { owner, vel });
    }

    pub fn set_owner_ang_vel(&self, owner: OwnerId, vel: Vec3) {
        self.run()
            .scheduler
            .push_command(Command::SetAngVel { owner, vel });
    }

    /// Queue a one-step force/torque on an owner, consumed at the next
    /// force-collection phase.
    pub fn add_impulse(&self, owner: OwnerId, force: Vec3, torque: Vec3) {
        self.run().scheduler.push_command(Command::AddImpulse(Impulse {
            owner,
            force,
            torque,
        }));
    }

    /// Set a per-owner wildcard value (before or after initialize).
    pub fn set_owner_wildcard(&mut self, name: &str, owner: OwnerId, value: f32) {
        match &self.run {
            Some(run) => run.scheduler.push_command(Command::SetOwnerWildcard {
                name: name.to_owned(),
                owner,
                value,
            }),
            None => self.staged_wildcards.push((name.to_owned(), owner, value)),
        }
    }

    pub fn owner_wildcard(&self, name: &str, owner: OwnerId) -> Option<f32> {
        self.snapshot()
            .wildcards
            .get(name)
            .and_then(|col| col.get(owner as usize).copied())
    }

    // --- inspection and output ---------------------------------------------

    /// Evaluate a named query against the committed state. Call from a
    /// synced stance for exact results.
    pub fn inspect(&self, name: &str) -> Result<f32, ConfigError> {
        let query =
            Query::by_name(name).ok_or_else(|| ConfigError::UnknownQuery(name.to_owned()))?;
        Ok(self.inspect_query(&query))
    }

    /// Evaluate an arbitrary (possibly custom) query.
    pub fn inspect_query(&self, query: &Query) -> f32 {
        let run = self.run();
        let snap = self.snapshot();
        inspector::evaluate(
            query,
            &snap,
            &run.statics.frame,
            &run.statics.geometry,
            &run.statics.mass_props,
            &run.statics.owner_mass_idx,
        )
    }

    /// Drain and return the anomalies recorded so far.
    pub fn show_anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.drain()
    }

    pub fn anomaly_count(&self) -> u64 {
        self.anomalies.count()
    }

    pub fn write_sphere_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let run = self.run();
        output::write_sphere_csv(
            path.as_ref(),
            &self.snapshot(),
            &run.statics.frame,
            &run.statics.geometry,
        )
    }

    pub fn write_mesh_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let run = self.run();
        output::write_mesh_csv(
            path.as_ref(),
            &self.snapshot(),
            &run.statics.frame,
            &run.statics.geometry,
        )
    }

    /// Write the currently touching contacts (recomputed from the committed
    /// state with no safety margin).
    pub fn write_contact_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let run = self.run();
        let snap = self.snapshot();
        let pairs = self.current_contacts(&snap)?;
        output::write_contact_csv(
            path.as_ref(),
            &snap,
            &run.statics.frame,
            &run.statics.geometry,
            &pairs,
        )
    }

    fn current_contacts(&self, snap: &StateSnapshot) -> Result<PairList, ConfigError> {
        let statics = &self.run().statics;
        let mut bins = statics.initial_bins;
        for _ in 0..=statics.max_crowd_retries {
            match find_pairs(
                snap,
                &statics.frame,
                &statics.geometry,
                &bins,
                &statics.mask,
                0.0,
                statics.crowd_cap,
            ) {
                Ok(list) => return Ok(list),
                Err(_) => bins = bins.halved(&statics.frame)?,
            }
        }
        Ok(PairList::default())
    }
}

impl Drop for Solver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
