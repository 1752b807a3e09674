//! Granular flow in a rotating drum.
//!
//! A few hundred spheres tumble inside a prescribed-spin cylinder. The drum
//! is a massless analytical owner whose family carries a dictated angular
//! velocity; the grains respond through wall friction.

use dem::{AnalyticalShape, ClumpSpawn, Material, PrescriptionSpec, Solver, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

const DRUM_RADIUS: f32 = 0.12;
const GRAIN_RADIUS: f32 = 0.006;

fn main() {
    env_logger::init();

    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(0.6), Vec3::ZERO)
        .set_time_step(2e-5)
        .set_cd_update_freq(20)
        .suggest_expand_factor(2.0)
        .set_max_velocity(10.0)
        .set_gravity(Vec3::new(0.0, 0.0, -9.81));

    let steel = sim.load_material(Material {
        e: 1e8,
        nu: 0.3,
        cor: 0.4,
        mu: 0.5,
        crr: 0.01,
    });
    let gravel = sim.load_material(Material {
        e: 1e7,
        nu: 0.33,
        cor: 0.3,
        mu: 0.4,
        crr: 0.02,
    });

    let mass = 2600.0 * 4.0 / 3.0 * std::f32::consts::PI * GRAIN_RADIUS.powi(3);
    let grain = sim
        .load_clump_simple_sphere(mass, GRAIN_RADIUS, gravel)
        .unwrap();

    // The drum spins about its own axis; walls move, the shape stays put.
    sim.add_external_object(
        vec![(
            AnalyticalShape::Cylinder {
                center: Vec3::ZERO,
                axis: Vec3::Y,
                radius: DRUM_RADIUS,
                inward: true,
            },
            steel,
        )],
        40,
    )
    .unwrap();
    sim.set_family_prescription(
        40,
        PrescriptionSpec {
            ang_vel: Some(Arc::new(|_| Vec3::new(0.0, 2.0, 0.0))),
            lin_vel: Some(Arc::new(|_| Vec3::ZERO)),
            dictate: true,
            ..Default::default()
        },
    );

    // Seeded jittered grid of grains in the lower half of the drum.
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let spacing = 2.4 * GRAIN_RADIUS;
    let mut batch = Vec::new();
    for ix in -6..=6 {
        for iy in -3..=3 {
            for iz in -6..0 {
                let jitter = Vec3::new(
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                    rng.gen_range(-0.1..0.1),
                ) * spacing;
                let pos = Vec3::new(ix as f32, iy as f32, iz as f32) * spacing + jitter;
                if (pos.x * pos.x + pos.z * pos.z).sqrt() < DRUM_RADIUS - 2.0 * GRAIN_RADIUS {
                    batch.push(ClumpSpawn::at(grain, pos));
                }
            }
        }
    }
    println!("spawning {} grains", batch.len());
    sim.add_clumps(&batch).unwrap();

    sim.initialize().unwrap();

    for _ in 0..40 {
        sim.step(0.05).expect("dynamics step");
        sim.sync().expect("sync");
        let absv = sim.inspect("clump_max_absv").unwrap();
        let max_z = sim.inspect("clump_max_z").unwrap();
        println!(
            "t = {:.2}s  max speed = {absv:.3} m/s  bed top = {max_z:.3} m",
            sim.time()
        );
    }

    let stats = sim.stats();
    println!(
        "dynamics steps: {}  detection cycles: {}",
        stats.di_steps, stats.cd_cycles
    );
}
