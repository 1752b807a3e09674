//! End-to-end scheduler behavior: crowding recovery, strict lockstep, drift
//! accounting and shutdown hygiene.

use dem::{ClumpSpawn, Material, Solver, Vec3};

fn loose_grid_solver(bin_size: Option<f32>, update_freq: u32, dt: f32) -> Solver {
    let mut sim = Solver::new();
    sim.instruct_box_domain(Vec3::splat(2.0), Vec3::ZERO)
        .set_time_step(dt)
        .set_cd_update_freq(update_freq)
        .set_expand_factor(1e-3)
        .set_gravity(Vec3::ZERO);
    if let Some(b) = bin_size {
        sim.set_init_bin_size(b);
    }
    let mat = sim.load_material(Material {
        e: 1e7,
        nu: 0.3,
        cor: 0.5,
        mu: 0.3,
        crr: 0.0,
    });
    let ball = sim.load_clump_simple_sphere(0.01, 0.005, mat).unwrap();
    // 10 x 10 separated grid; no actual contacts, plenty of broad-phase work.
    let mut batch = Vec::new();
    for row in 0..10 {
        for col in 0..10 {
            batch.push(ClumpSpawn::at(
                ball,
                Vec3::new((col as f32 - 4.5) * 0.02, (row as f32 - 4.5) * 0.02, 0.0),
            ));
        }
    }
    sim.add_clumps(&batch).unwrap();
    sim
}

#[test]
fn too_crowded_recovers_and_completes_all_steps() {
    const DT: f32 = 1e-4;
    // Bin size two orders of magnitude too large: the whole grid lands in
    // one bin and the first cycle must fail.
    let mut sim = loose_grid_solver(Some(1.0), 5, DT);
    sim.set_bin_crowd_cap(32);
    sim.initialize().unwrap();

    sim.step(0.01).unwrap();
    sim.sync().unwrap();

    assert_eq!(
        sim.stats().di_steps,
        (0.01 / DT as f64).round() as u64,
        "recovery must not eat steps"
    );
    let anomalies = sim.show_anomalies();
    assert!(
        anomalies
            .iter()
            .any(|a| matches!(a, dem::Anomaly::TooCrowdedRetry { .. })),
        "the bin-size halving should be on the record"
    );
}

#[test]
fn lockstep_pairs_every_step() {
    const DT: f32 = 1e-4;
    let mut sim = loose_grid_solver(None, 0, DT);
    sim.initialize().unwrap();

    sim.step(0.005).unwrap();
    sim.sync().unwrap();

    let stats = sim.stats();
    assert_eq!(stats.di_steps, 50);
    assert!(
        stats.cd_cycles >= stats.di_steps,
        "strict synchrony demands a publication per step: cd {} di {}",
        stats.cd_cycles,
        stats.di_steps
    );
    // After sync the detector has caught up completely.
    assert!((sim.time() - sim.last_pair_time()).abs() < 1e-12);
}

#[test]
fn drift_never_exceeds_the_budget() {
    const DT: f32 = 1e-4;
    const U: u32 = 4;
    let mut sim = loose_grid_solver(None, U, DT);
    sim.initialize().unwrap();

    // Probe the lag at several sync points mid-run.
    for _ in 0..5 {
        sim.step(0.002).unwrap();
        sim.sync().unwrap();
        let lag = sim.time() - sim.last_pair_time();
        assert!(
            lag <= U as f64 * DT as f64 + 1e-9,
            "lag {lag} exceeds the drift budget"
        );
    }
}

#[test]
fn shutdown_is_idempotent_and_state_survives() {
    let mut sim = loose_grid_solver(None, 5, 1e-4);
    sim.initialize().unwrap();
    sim.step(0.002).unwrap();
    sim.sync().unwrap();
    let p = sim.owner_position(0);

    sim.shutdown();
    sim.shutdown();

    // The last committed state is still readable.
    assert_eq!(sim.owner_position(0), p);
}

#[test]
fn zero_duration_step_is_a_no_op() {
    let mut sim = loose_grid_solver(None, 5, 1e-4);
    sim.initialize().unwrap();
    sim.step(0.0).unwrap();
    sim.sync().unwrap();
    assert_eq!(sim.stats().di_steps, 0);
    assert_eq!(sim.time(), 0.0);
}
