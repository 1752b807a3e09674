//! Regression test for monolayer settling on a boundary plane.
//!
//! Verified behavior:
//! 1. A hex-grid monolayer dropped from 10 mm comes to rest within a second.
//! 2. No sphere tunnels through the plane (centers stay near one radius).
//! 3. Contact detection keeps every sphere inside the world box.

use dem::{ClumpSpawn, Material, Solver, Vec3};

#[test]
fn monolayer_settles_on_plane() {
    const DT: f32 = 2e-5;
    const RADIUS: f32 = 0.005;

    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(0.5), Vec3::ZERO)
        .set_time_step(DT)
        .set_cd_update_freq(20)
        .set_expand_factor(5e-4)
        .set_max_velocity(5.0)
        .set_gravity(Vec3::new(0.0, 0.0, -9.81));

    let sand = sim.load_material(Material {
        e: 1e6,
        nu: 0.3,
        cor: 0.3,
        mu: 0.3,
        crr: 0.01,
    });
    // ~2600 kg/m^3 quartz sphere.
    let mass = 2600.0 * 4.0 / 3.0 * std::f32::consts::PI * RADIUS.powi(3);
    let grain = sim.load_clump_simple_sphere(mass, RADIUS, sand).unwrap();

    sim.add_bc_plane(Vec3::ZERO, Vec3::Z, sand, 99).unwrap();

    // 10 x 10 hex-packed monolayer just above the plane.
    let spacing = 2.2 * RADIUS;
    let mut batch = Vec::new();
    for row in 0..10 {
        for col in 0..10 {
            let x = (col as f32 - 4.5) * spacing + if row % 2 == 1 { spacing * 0.5 } else { 0.0 };
            let y = (row as f32 - 4.5) * spacing * 0.866;
            batch.push(ClumpSpawn::at(grain, Vec3::new(x, y, 0.01)));
        }
    }
    let grains = sim.add_clumps(&batch).unwrap();
    assert_eq!(grains.count, 100);

    sim.initialize().unwrap();
    sim.step(1.0).unwrap();
    sim.sync().unwrap();

    let max_absv = sim.inspect("clump_max_absv").unwrap();
    let min_z = sim.inspect("clump_min_z").unwrap();
    let max_z = sim.inspect("clump_max_z").unwrap();
    println!("settled: max_absv = {max_absv}, min_z = {min_z}, max_z = {max_z}");

    assert!(
        max_absv < 0.01,
        "monolayer still moving at {max_absv} m/s after 1 s"
    );
    assert!(
        min_z > 0.004,
        "a sphere sank into the plane: min center z = {min_z}"
    );
    assert!(
        max_z < 0.012,
        "a sphere bounced away and never settled: max center z = {max_z}"
    );
}
