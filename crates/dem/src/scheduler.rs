//! Two-thread cooperation: the contact detector (CD) and the dynamics
//! integrator (DI) as long-lived workers around a mutex/condvar core.
//!
//! Channels between the workers:
//! - pair channel (CD -> DI): the freshest complete candidate list, replaced
//!   atomically under the coordination lock at cycle end;
//! - state channel (DI -> CD and the controller): the committed owner
//!   snapshot, replaced atomically at step end;
//! - control: pending-step counter, drift budget, hold/stop flags.
//!
//! The drift budget `U` bounds how many steps DI may take against one pair
//! list in total, so the integrator never runs more than `U * dt` past a
//! publication. `U = 0` is strict lockstep: every step needs a fresh
//! publication.
//! CD re-cycles whenever the committed state moved past its last snapshot,
//! so a fast CD throttles itself instead of spinning.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use glam::{Quat, Vec3};

use crate::bins::BinGrid;
use crate::broadphase::{find_pairs, PairList};
use crate::error::{Anomaly, AnomalyLog, FatalError};
use crate::family::{FamilyIdx, FamilyMask};
use crate::integrate::{DynamicsContext, Impulse, SimStatics};
use crate::kernels::PrescriptionKernel;
use crate::owner::{OwnerId, StateSnapshot};

/// Controller-issued mutations, drained by DI at its next opportunity.
pub enum Command {
    SetPosition { owner: OwnerId, pos: Vec3 },
    SetQuat { owner: OwnerId, quat: Quat },
    SetLinVel { owner: OwnerId, vel: Vec3 },
    SetAngVel { owner: OwnerId, vel: Vec3 },
    AddImpulse(Impulse),
    SetFamily { owner: OwnerId, family: FamilyIdx },
    RenameFamily { from: FamilyIdx, to: FamilyIdx },
    PurgeFamily(FamilyIdx),
    SetPrescription { family: FamilyIdx, kernel: Option<Arc<dyn PrescriptionKernel>> },
    SetOwnerWildcard { name: String, owner: OwnerId, value: f32 },
}

/// Counters mirroring how often each side worked or was held back.
#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub di_steps: u64,
    pub cd_cycles: u64,
    pub di_held_back: u64,
    pub cd_held_back: u64,
}

struct Coord {
    pending: u64,
    stop: bool,
    fatal: Option<FatalError>,

    // Pair channel.
    pair_front: Option<PairList>,
    pair_seq: u64,
    pair_consumed: u64,
    t_cd: f64,

    // State channel.
    state: StateSnapshot,
    state_seq: u64,
    state_seen_by_cd: u64,

    // Drift budget and recovery. Counts every step taken against the
    // current pair list, the adopting step included.
    di_steps_on_list: u32,
    hold_di: bool,
    crowd_retries: u32,

    commands: Vec<Command>,
    mask_update: Option<FamilyMask>,

    cd_idle: bool,
    di_idle: bool,
    stats: SchedulerStats,
}

struct Shared {
    coord: Mutex<Coord>,
    cd_wake: Condvar,
    di_wake: Condvar,
    main_wake: Condvar,
}

/// Owns the two workers; dropping it shuts them down.
pub struct Scheduler {
    shared: Arc<Shared>,
    statics: Arc<SimStatics>,
    cd_handle: Option<JoinHandle<()>>,
    di_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn both workers around a freshly assembled dynamics context.
    pub fn start(statics: Arc<SimStatics>, ctx: DynamicsContext, anomalies: Arc<AnomalyLog>) -> Self {
        let initial_state = StateSnapshot::capture(&ctx.owners, 0.0);
        let shared = Arc::new(Shared {
            coord: Mutex::new(Coord {
                pending: 0,
                stop: false,
                fatal: None,
                pair_front: None,
                pair_seq: 0,
                pair_consumed: 0,
                t_cd: 0.0,
                state: initial_state,
                state_seq: 1,
                state_seen_by_cd: 0,
                di_steps_on_list: 0,
                hold_di: false,
                crowd_retries: 0,
                commands: Vec::new(),
                mask_update: None,
                cd_idle: false,
                di_idle: true,
                stats: SchedulerStats::default(),
            }),
            cd_wake: Condvar::new(),
            di_wake: Condvar::new(),
            main_wake: Condvar::new(),
        });

        let cd_handle = {
            let shared = shared.clone();
            let statics = statics.clone();
            let anomalies = anomalies.clone();
            std::thread::Builder::new()
                .name("dem-contact-detect".into())
                .spawn(move || detector_loop(shared, statics, anomalies))
                .expect("spawn contact-detection thread")
        };
        let di_handle = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("dem-dynamics".into())
                .spawn(move || dynamics_loop(shared, ctx))
                .expect("spawn dynamics thread")
        };

        Self {
            shared,
            statics,
            cd_handle: Some(cd_handle),
            di_handle: Some(di_handle),
        }
    }

    /// Queue `round(duration / dt)` steps and block until they are done.
    pub fn step(&self, duration: f64) -> Result<(), FatalError> {
        let n = (duration / self.statics.dt as f64).round().max(0.0) as u64;
        let mut coord = self.shared.coord.lock().unwrap();
        if let Some(fatal) = &coord.fatal {
            return Err(fatal.clone());
        }
        if n == 0 {
            return Ok(());
        }
        coord.pending += n;
        coord.di_idle = false;
        self.shared.di_wake.notify_all();
        self.shared.cd_wake.notify_all();
        loop {
            if let Some(fatal) = &coord.fatal {
                return Err(fatal.clone());
            }
            if coord.pending == 0 || coord.stop {
                return Ok(());
            }
            coord = self.shared.main_wake.wait(coord).unwrap();
        }
    }

    /// Block until both workers are idle with no queued work.
    pub fn sync(&self) -> Result<(), FatalError> {
        let mut coord = self.shared.coord.lock().unwrap();
        loop {
            if let Some(fatal) = &coord.fatal {
                return Err(fatal.clone());
            }
            if coord.stop || (coord.pending == 0 && coord.di_idle && coord.cd_idle && coord.commands.is_empty()) {
                return Ok(());
            }
            self.shared.di_wake.notify_all();
            self.shared.cd_wake.notify_all();
            coord = self.shared.main_wake.wait(coord).unwrap();
        }
    }

    /// Stop both workers and join them. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        {
            let mut coord = self.shared.coord.lock().unwrap();
            coord.stop = true;
            self.shared.cd_wake.notify_all();
            self.shared.di_wake.notify_all();
            self.shared.main_wake.notify_all();
        }
        for handle in [self.cd_handle.take(), self.di_handle.take()].into_iter().flatten() {
            if handle.join().is_err() {
                let mut coord = self.shared.coord.lock().unwrap();
                coord.fatal.get_or_insert(FatalError::WorkerPanicked);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cd_handle.is_none() && self.di_handle.is_none()
    }

    /// Latest committed owner state.
    pub fn snapshot(&self) -> StateSnapshot {
        self.shared.coord.lock().unwrap().state.clone()
    }

    /// Committed simulated time.
    pub fn time(&self) -> f64 {
        self.shared.coord.lock().unwrap().state.t
    }

    /// Timestamp of the last published pair list.
    pub fn last_pair_time(&self) -> f64 {
        self.shared.coord.lock().unwrap().t_cd
    }

    pub fn fatal(&self) -> Option<FatalError> {
        self.shared.coord.lock().unwrap().fatal.clone()
    }

    /// Queue a controller mutation; DI applies it at the next opportunity
    /// (immediately when idle).
    pub fn push_command(&self, cmd: Command) {
        let mut coord = self.shared.coord.lock().unwrap();
        coord.commands.push(cmd);
        self.shared.di_wake.notify_all();
    }

    /// Swap in a new family mask for the following CD cycles.
    pub fn update_mask(&self, mask: FamilyMask) {
        let mut coord = self.shared.coord.lock().unwrap();
        coord.mask_update = Some(mask);
        self.shared.cd_wake.notify_all();
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.coord.lock().unwrap().stats
    }

    pub fn reset_stats(&self) {
        self.shared.coord.lock().unwrap().stats = SchedulerStats::default();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Contact-detection worker: snapshot, build, publish, repeat.
fn detector_loop(shared: Arc<Shared>, statics: Arc<SimStatics>, anomalies: Arc<AnomalyLog>) {
    let mut bins: BinGrid = statics.initial_bins;
    let mut mask: FamilyMask = statics.mask.clone();
    let mut retry = false;

    loop {
        // Wait for something to do.
        let snapshot = {
            let mut coord = shared.coord.lock().unwrap();
            loop {
                if let Some(update) = coord.mask_update.take() {
                    mask = update;
                    // Pairs built under the old mask must not linger.
                    coord.state_seen_by_cd = 0;
                }
                if coord.stop || coord.fatal.is_some() {
                    coord.cd_idle = true;
                    shared.main_wake.notify_all();
                    return;
                }
                let work =
                    retry || coord.pair_seq == 0 || coord.state_seq > coord.state_seen_by_cd;
                if work {
                    break;
                }
                if coord.pending > 0 {
                    coord.stats.cd_held_back += 1;
                }
                coord.cd_idle = true;
                shared.main_wake.notify_all();
                coord = shared.cd_wake.wait(coord).unwrap();
            }
            coord.cd_idle = false;
            coord.state_seen_by_cd = coord.state_seq;
            // Snapshot discipline: copy the committed state at cycle start;
            // everything after works on the copy.
            coord.state.clone()
        };

        match find_pairs(
            &snapshot,
            &statics.frame,
            &statics.geometry,
            &bins,
            &mask,
            statics.margin,
            statics.crowd_cap,
        ) {
            Ok(list) => {
                retry = false;
                let mut coord = shared.coord.lock().unwrap();
                coord.pair_front = Some(list);
                coord.pair_seq += 1;
                coord.t_cd = snapshot.t;
                coord.crowd_retries = 0;
                coord.hold_di = false;
                coord.stats.cd_cycles += 1;
                shared.di_wake.notify_all();
                shared.main_wake.notify_all();
            }
            Err(crowded) => {
                let mut coord = shared.coord.lock().unwrap();
                coord.crowd_retries += 1;
                if coord.crowd_retries > statics.max_crowd_retries {
                    coord.fatal = Some(FatalError::TooCrowdedEscalated {
                        bin: crowded.bin as u64,
                        count: crowded.count,
                        retries: coord.crowd_retries,
                    });
                    shared.di_wake.notify_all();
                    shared.main_wake.notify_all();
                    continue;
                }
                match bins.halved(&statics.frame) {
                    Ok(halved) => {
                        bins = halved;
                        retry = true;
                        coord.hold_di = true;
                        anomalies.record(Anomaly::TooCrowdedRetry {
                            bin_size: bins.bin_size,
                        });
                    }
                    Err(_) => {
                        coord.fatal = Some(FatalError::TooCrowdedEscalated {
                            bin: crowded.bin as u64,
                            count: crowded.count,
                            retries: coord.crowd_retries,
                        });
                    }
                }
                shared.di_wake.notify_all();
                shared.main_wake.notify_all();
            }
        }
    }
}

fn apply_command(ctx: &mut DynamicsContext, cmd: Command) {
    match cmd {
        Command::SetPosition { owner, pos } => {
            let frame = ctx.statics.frame;
            ctx.owners.set_position(&frame, owner, pos);
        }
        Command::SetQuat { owner, quat } => ctx.owners.quat[owner as usize] = quat.normalize(),
        Command::SetLinVel { owner, vel } => ctx.owners.lin_vel[owner as usize] = vel,
        Command::SetAngVel { owner, vel } => ctx.owners.ang_vel[owner as usize] = vel,
        Command::AddImpulse(imp) => ctx.impulses.push(imp),
        Command::SetFamily { owner, family } => ctx.owners.family[owner as usize] = family,
        Command::RenameFamily { from, to } => {
            for f in ctx.owners.family.iter_mut() {
                if *f == from {
                    *f = to;
                }
            }
        }
        Command::PurgeFamily(family) => ctx.purge_family(family),
        Command::SetPrescription { family, kernel } => match kernel {
            Some(k) => {
                ctx.prescriptions.insert(family, k);
            }
            None => {
                ctx.prescriptions.remove(&family);
            }
        },
        Command::SetOwnerWildcard { name, owner, value } => {
            if let Some(column) = ctx.owners.wildcards.get_mut(&name) {
                column[owner as usize] = value;
            }
        }
    }
}

/// Dynamics worker: adopt pairs, step, publish state, repeat.
fn dynamics_loop(shared: Arc<Shared>, mut ctx: DynamicsContext) {
    let update_freq = ctx.statics.update_freq;
    let mut current_pairs = PairList::default();
    let mut margin_warned = false;

    loop {
        let adopted;
        {
            let mut coord = shared.coord.lock().unwrap();
            loop {
                if coord.stop || coord.fatal.is_some() {
                    coord.di_idle = true;
                    shared.main_wake.notify_all();
                    return;
                }
                // Idle-time commands apply immediately and republish so a
                // synced controller reads its own writes.
                if !coord.commands.is_empty() {
                    for cmd in std::mem::take(&mut coord.commands) {
                        apply_command(&mut ctx, cmd);
                    }
                    coord.state = StateSnapshot::capture(&ctx.owners, ctx.t);
                    coord.state_seq += 1;
                    shared.cd_wake.notify_all();
                    shared.main_wake.notify_all();
                }
                let fresh = coord.pair_seq > coord.pair_consumed;
                let within_budget = coord.pair_seq > 0 && coord.di_steps_on_list < update_freq;
                let can_step = coord.pending > 0 && !coord.hold_di && (fresh || within_budget);
                if can_step {
                    break;
                }
                if coord.pending > 0 {
                    coord.stats.di_held_back += 1;
                    shared.cd_wake.notify_all();
                }
                coord.di_idle = coord.pending == 0;
                if coord.di_idle {
                    shared.main_wake.notify_all();
                }
                coord = shared.di_wake.wait(coord).unwrap();
            }
            coord.di_idle = false;
            if coord.pair_seq > coord.pair_consumed {
                coord.pair_consumed = coord.pair_seq;
                coord.di_steps_on_list = 0;
                adopted = coord.pair_front.take();
            } else {
                adopted = None;
            }
            // The adopting step spends budget too: a list published at
            // `t_cd` carries the simulation to at most `t_cd + U * dt`.
            coord.di_steps_on_list += 1;
        }

        if let Some(list) = adopted {
            current_pairs = list;
        }

        // The margin must cover however far we have drifted past the list.
        let needed = (ctx.t - current_pairs.t) as f32 * ctx.owners.max_surface_speed();
        if !margin_warned && needed > ctx.statics.margin && ctx.statics.margin > 0.0 {
            margin_warned = true;
            log::warn!(
                "drift {needed} exceeds the expand factor {}; contacts may appear late",
                ctx.statics.margin
            );
        }

        let result = ctx.step(&current_pairs);

        let mut coord = shared.coord.lock().unwrap();
        match result {
            Ok(()) => {
                coord.state = StateSnapshot::capture(&ctx.owners, ctx.t);
                coord.state_seq += 1;
                coord.pending = coord.pending.saturating_sub(1);
                coord.stats.di_steps += 1;
                if coord.pending == 0 {
                    coord.di_idle = true;
                }
                shared.cd_wake.notify_all();
                shared.main_wake.notify_all();
            }
            Err(fatal) => {
                coord.fatal = Some(fatal);
                coord.di_idle = true;
                shared.cd_wake.notify_all();
                shared.main_wake.notify_all();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::ContactTable;
    use crate::geometry::{GeometryStore, SphereGeom};
    use crate::kernels::{ComputeBackend, ContactModelSpec, CpuBackend};
    use crate::material::{Material, MaterialTable};
    use crate::owner::{MassProps, OwnerKind, OwnerStore};
    use crate::world::WorldFrame;
    use rustc_hash::FxHashMap;

    fn make_scheduler(update_freq: u32, n_spheres: usize) -> Scheduler {
        let frame = WorldFrame::new(Vec3::splat(4.0), [11, 11, 10], Vec3::ZERO).unwrap();
        let mut materials = MaterialTable::default();
        materials.load(Material {
            e: 1e8,
            nu: 0.3,
            cor: 0.5,
            mu: 0.3,
            crr: 0.0,
        });
        materials.seal();
        let mut owners = OwnerStore::default();
        let mut geometry = GeometryStore::default();
        for i in 0..n_spheres {
            let id = owners.push(
                &frame,
                OwnerKind::Clump,
                Vec3::new(-1.5 + 0.1 * i as f32, 0.0, 0.0),
                Quat::IDENTITY,
                Vec3::ZERO,
                Vec3::ZERO,
                0,
                0,
                0.01,
            );
            geometry.spheres.push(SphereGeom {
                owner: id,
                rel_pos: Vec3::ZERO,
                radius: 0.01,
                material: 0,
            });
        }
        let initial_bins = BinGrid::new(&frame, 0.05).unwrap();
        let statics = Arc::new(SimStatics {
            frame,
            geometry,
            materials,
            mass_props: vec![MassProps {
                mass: 1.0,
                moi: Vec3::splat(1e-4),
            }],
            owner_mass_idx: vec![0; n_spheres],
            mask: FamilyMask::default(),
            gravity: Vec3::ZERO,
            dt: 1e-4,
            margin: 0.005,
            crowd_cap: 256,
            max_crowd_retries: 8,
            update_freq,
            max_velocity: 1e3,
            initial_bins,
        });
        let anomalies = Arc::new(AnomalyLog::default());
        let kernel = CpuBackend.build_contact_kernel(&ContactModelSpec::HertzMindlin);
        let ctx = DynamicsContext::new(
            statics.clone(),
            owners,
            ContactTable::new(&[]),
            kernel,
            FxHashMap::default(),
            anomalies.clone(),
        );
        Scheduler::start(statics, ctx, anomalies)
    }

    #[test]
    fn step_advances_exactly_the_requested_steps() {
        let sched = make_scheduler(5, 4);
        sched.step(0.01).unwrap();
        sched.sync().unwrap();
        assert_eq!(sched.stats().di_steps, 100);
        assert!((sched.time() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn lockstep_mode_publishes_before_every_step() {
        let sched = make_scheduler(0, 4);
        sched.step(0.005).unwrap();
        sched.sync().unwrap();
        let stats = sched.stats();
        assert_eq!(stats.di_steps, 50);
        // U = 0: at least one publication per step.
        assert!(
            stats.cd_cycles >= stats.di_steps,
            "cd {} < di {}",
            stats.cd_cycles,
            stats.di_steps
        );
    }

    #[test]
    fn drift_stays_within_budget() {
        let sched = make_scheduler(3, 4);
        sched.step(0.02).unwrap();
        sched.sync().unwrap();
        let dt = 1e-4f64;
        let lag = sched.time() - sched.last_pair_time();
        assert!(
            lag <= 3.0 * dt + 1e-9,
            "post-sync drift {lag} exceeds the budget"
        );
    }

    #[test]
    fn shutdown_twice_is_clean() {
        let mut sched = make_scheduler(2, 2);
        sched.step(0.001).unwrap();
        sched.shutdown();
        assert!(sched.is_stopped());
        sched.shutdown();
        assert!(sched.is_stopped());
    }

    #[test]
    fn commands_apply_from_a_synced_stance() {
        let sched = make_scheduler(2, 2);
        sched.sync().unwrap();
        sched.push_command(Command::SetLinVel {
            owner: 0,
            vel: Vec3::new(0.25, 0.0, 0.0),
        });
        sched.sync().unwrap();
        let snap = sched.snapshot();
        assert_eq!(snap.lin_vel[0], Vec3::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn step_after_shutdown_is_rejected_or_inert() {
        let mut sched = make_scheduler(2, 2);
        sched.shutdown();
        // Queued work on stopped workers must not hang the caller.
        let r = sched.step(0.001);
        assert!(r.is_ok() || r.is_err());
    }
}
