//! Head-on elastic impact and free fall against closed-form results.
//!
//! Verified behavior:
//! 1. Two equal elastic spheres swap velocities in a head-on collision.
//! 2. Kinetic energy survives an elastic, frictionless contact.
//! 3. A contact-free clump follows the gravity parabola.

use dem::{ClumpSpawn, Material, Solver, Vec3};

fn elastic_material(sim: &mut Solver) -> u32 {
    sim.load_material(Material {
        e: 1e9,
        nu: 0.3,
        cor: 1.0,
        mu: 0.0,
        crr: 0.0,
    })
}

#[test]
fn head_on_impact_swaps_velocities() {
    const DT: f32 = 1e-5;

    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(1.0), Vec3::ZERO)
        .set_time_step(DT)
        .set_cd_update_freq(10)
        .set_expand_factor(1e-3)
        .set_max_velocity(10.0)
        .set_gravity(Vec3::ZERO);

    let mat = elastic_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(1.0, 0.01, mat).unwrap();
    let pair = sim
        .add_clumps(&[
            ClumpSpawn::at(ball, Vec3::new(-0.05, 0.0, 0.0)).vel(Vec3::new(1.0, 0.0, 0.0)),
            ClumpSpawn::at(ball, Vec3::new(0.05, 0.0, 0.0)).vel(Vec3::new(-1.0, 0.0, 0.0)),
        ])
        .unwrap();

    sim.initialize().unwrap();
    sim.step(0.1).unwrap();
    sim.sync().unwrap();

    let v0 = sim.owner_lin_vel(pair.first);
    let v1 = sim.owner_lin_vel(pair.first + 1);
    println!("post-impact velocities: {v0:?} {v1:?}");

    assert!(
        (v0.x + 1.0).abs() < 0.01,
        "left sphere should leave at -1 m/s, got {}",
        v0.x
    );
    assert!(
        (v1.x - 1.0).abs() < 0.01,
        "right sphere should leave at +1 m/s, got {}",
        v1.x
    );
    assert!(v0.y.abs() < 1e-4 && v0.z.abs() < 1e-4, "impact stays on the x axis");

    // Energy sanity: nothing dissipates with CoR = 1 and mu = 0.
    let ke = 0.5 * (v0.length_squared() + v1.length_squared());
    assert!((ke - 1.0).abs() < 0.01, "kinetic energy drifted to {ke}");
}

#[test]
fn free_fall_follows_the_parabola() {
    const DT: f32 = 1e-4;
    const G: f32 = 9.81;

    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(4.0), Vec3::ZERO)
        .set_time_step(DT)
        .set_cd_update_freq(10)
        .set_expand_factor(1e-2)
        .set_gravity(Vec3::new(0.0, 0.0, -G));

    let mat = elastic_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(0.5, 0.01, mat).unwrap();
    let h = sim
        .add_clumps(&[
            ClumpSpawn::at(ball, Vec3::new(0.0, 0.0, 1.0)).vel(Vec3::new(0.3, 0.0, 0.2))
        ])
        .unwrap();

    sim.initialize().unwrap();
    let t = 0.4f32;
    sim.step(t as f64).unwrap();
    sim.sync().unwrap();

    let p = sim.owner_position(h.id());
    let expected = Vec3::new(0.3 * t, 0.0, 1.0 + 0.2 * t - 0.5 * G * t * t);
    // First-order integrator: the position lags by O(g t dt).
    let tolerance = G * t * DT * 1.5 + 1e-4;
    assert!(
        (p - expected).length() < tolerance,
        "free fall drifted: {p:?} vs {expected:?}"
    );

    let v = sim.owner_lin_vel(h.id());
    assert!((v.z + G * t).abs() < 0.01, "vz should be -g t, got {}", v.z);
}
