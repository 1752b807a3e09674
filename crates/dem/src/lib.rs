//! Asynchronous discrete-element engine for granular assemblies.
//!
//! Rigid clumps (multi-sphere bodies), meshed obstacles and analytical
//! boundaries interact through Hertzian contacts. Two worker threads split
//! the work: a contact detector rediscovers candidate pairs over a voxelized
//! spatial hash, while a dynamics integrator consumes those candidates,
//! accumulates forces and advances the owners. A drift budget lets the
//! integrator run several steps ahead of detection; the safety margin added
//! during binning guarantees no contact is missed in between.
//!
//! # Example
//!
//! ```no_run
//! use dem::{ClumpSpawn, Material, Solver};
//! use glam::Vec3;
//!
//! let mut sim = Solver::new();
//! sim.instruct_box_domain(Vec3::splat(1.0), Vec3::ZERO)
//!     .set_time_step(5e-6)
//!     .set_cd_update_freq(10)
//!     .set_expand_factor(1e-3)
//!     .set_gravity(Vec3::new(0.0, 0.0, -9.81));
//!
//! let granite = sim.load_material(Material {
//!     e: 1e9,
//!     nu: 0.3,
//!     cor: 0.5,
//!     mu: 0.4,
//!     crr: 0.01,
//! });
//! let pebble = sim.load_clump_simple_sphere(0.01, 0.005, granite).unwrap();
//! sim.add_bc_plane(Vec3::ZERO, Vec3::Z, granite, 99).unwrap();
//! sim.add_clumps(&[ClumpSpawn::at(pebble, Vec3::new(0.0, 0.0, 0.1))])
//!     .unwrap();
//!
//! sim.initialize().unwrap();
//! sim.step(0.5).unwrap();
//! sim.sync().unwrap();
//! println!("settled at z = {}", sim.inspect("clump_max_z").unwrap());
//! ```

pub mod bins;
pub mod broadphase;
pub mod contact;
pub mod error;
pub mod family;
pub mod geometry;
pub mod inspector;
pub mod integrate;
pub mod kernels;
pub mod material;
pub mod narrowphase;
pub mod output;
pub mod owner;
pub mod scheduler;
pub mod solver;
pub mod world;

pub use error::{Anomaly, ConfigError, FatalError};
pub use geometry::AnalyticalShape;
pub use inspector::{Query, Reduce};
pub use kernels::{
    ComputeBackend, ContactCtx, ContactForce, ContactKernel, ContactModelSpec, CpuBackend,
    PrescriptionSpec,
};
pub use material::{Material, MaterialId};
pub use owner::{OwnerId, SphereComp};
pub use scheduler::SchedulerStats;
pub use solver::{ClumpSpawn, OwnerHandle, Solver};

pub use glam::{Quat, Vec3};
