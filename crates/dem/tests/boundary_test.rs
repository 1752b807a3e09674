//! Boundary kinds end to end: analytical primitives, triangle meshes and
//! the CSV writers.

use dem::{AnalyticalShape, ClumpSpawn, Material, Quat, Solver, Vec3};

fn stiff_material(sim: &mut Solver) -> u32 {
    sim.load_material(Material {
        e: 1e7,
        nu: 0.3,
        cor: 0.4,
        mu: 0.3,
        crr: 0.0,
    })
}

fn base_solver() -> Solver {
    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(1.0), Vec3::ZERO)
        .set_time_step(2e-5)
        .set_cd_update_freq(10)
        .set_expand_factor(1e-3)
        .set_max_velocity(10.0)
        .set_gravity(Vec3::new(0.0, 0.0, -9.81));
    sim
}

#[test]
fn sphere_rests_inside_a_drum() {
    let mut sim = base_solver();
    let mat = stiff_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(0.05, 0.01, mat).unwrap();

    sim.set_family_fixed(50);
    sim.add_external_object(
        vec![(
            AnalyticalShape::Cylinder {
                center: Vec3::ZERO,
                axis: Vec3::Y,
                radius: 0.1,
                inward: true,
            },
            mat,
        )],
        50,
    )
    .unwrap();
    let h = sim
        .add_clumps(&[ClumpSpawn::at(ball, Vec3::ZERO)])
        .unwrap();

    sim.initialize().unwrap();
    sim.step(1.0).unwrap();
    sim.sync().unwrap();

    let p = sim.owner_position(h.id());
    let radial = (p.x * p.x + p.z * p.z).sqrt();
    println!("rest position {p:?}, radial {radial}");
    // Settled against the inner wall near the bottom.
    assert!(
        (radial - 0.09).abs() < 0.003,
        "center should sit one radius off the wall, radial = {radial}"
    );
    assert!(p.z < -0.05, "rest point is at the drum bottom");
    assert!(
        sim.owner_lin_vel(h.id()).length() < 0.05,
        "ball should have damped out"
    );
}

#[test]
fn sphere_lands_on_a_plate_and_misses_its_edge() {
    let mut sim = base_solver();
    let mat = stiff_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(0.05, 0.01, mat).unwrap();

    sim.set_family_fixed(50);
    sim.add_external_object(
        vec![(
            AnalyticalShape::Plate {
                center: Vec3::new(0.0, 0.0, 0.1),
                normal: Vec3::Z,
                u: Vec3::X,
                half_u: 0.05,
                half_v: 0.05,
            },
            mat,
        )],
        50,
    )
    .unwrap();
    // One sphere above the plate, one beyond its rim.
    let on = sim
        .add_clumps(&[ClumpSpawn::at(ball, Vec3::new(0.0, 0.0, 0.12))])
        .unwrap();
    let off = sim
        .add_clumps(&[ClumpSpawn::at(ball, Vec3::new(0.2, 0.0, 0.12))])
        .unwrap();

    sim.initialize().unwrap();
    sim.step(0.25).unwrap();
    sim.sync().unwrap();

    let p_on = sim.owner_position(on.id());
    let p_off = sim.owner_position(off.id());
    assert!(
        (p_on.z - 0.11).abs() < 0.002,
        "sphere should rest one radius above the plate, z = {}",
        p_on.z
    );
    assert!(
        p_off.z < 0.0,
        "the off-edge sphere falls past the plate, z = {}",
        p_off.z
    );
}

#[test]
fn sphere_settles_on_a_mesh_wedge() {
    let mut sim = base_solver();
    let mat = stiff_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(0.05, 0.01, mat).unwrap();

    // Two triangles forming a horizontal square at z = 0.05.
    let quad = vec![
        [
            Vec3::new(-0.1, -0.1, 0.05),
            Vec3::new(0.1, -0.1, 0.05),
            Vec3::new(0.1, 0.1, 0.05),
        ],
        [
            Vec3::new(-0.1, -0.1, 0.05),
            Vec3::new(0.1, 0.1, 0.05),
            Vec3::new(-0.1, 0.1, 0.05),
        ],
    ];
    sim.set_family_fixed(50);
    sim.add_mesh(quad, mat, Vec3::ZERO, Quat::IDENTITY, 50, 0.0, Vec3::ZERO)
        .unwrap();
    let h = sim
        .add_clumps(&[ClumpSpawn::at(ball, Vec3::new(0.01, 0.02, 0.12))])
        .unwrap();

    sim.initialize().unwrap();
    sim.step(0.5).unwrap();
    sim.sync().unwrap();

    let p = sim.owner_position(h.id());
    assert!(
        (p.z - 0.06).abs() < 0.002,
        "sphere should rest one radius above the mesh, z = {}",
        p.z
    );
}

#[test]
fn csv_writers_emit_current_state() {
    let mut sim = base_solver();
    let mat = stiff_material(&mut sim);
    let ball = sim.load_clump_simple_sphere(0.05, 0.01, mat).unwrap();
    sim.add_bc_plane(Vec3::ZERO, Vec3::Z, mat, 99).unwrap();
    sim.add_clumps(&[ClumpSpawn::at(ball, Vec3::new(0.0, 0.0, 0.009))])
        .unwrap();

    sim.initialize().unwrap();
    sim.sync().unwrap();

    let dir = std::env::temp_dir().join("dem_boundary_csv");
    std::fs::create_dir_all(&dir).unwrap();

    let spheres = dir.join("spheres.csv");
    sim.write_sphere_file(&spheres).unwrap();
    let text = std::fs::read_to_string(&spheres).unwrap();
    assert_eq!(text.lines().count(), 2, "header plus one sphere");

    let contacts = dir.join("contacts.csv");
    sim.write_contact_file(&contacts).unwrap();
    let text = std::fs::read_to_string(&contacts).unwrap();
    assert_eq!(
        text.lines().count(),
        2,
        "the sphere is pressed into the plane: one contact row"
    );
    assert!(text.lines().nth(1).unwrap().contains("sa"));
}
