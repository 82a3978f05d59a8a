//! End-to-end scenario properties: consistent initialization onto the
//! binding equilibrium manifold, flow reversal of the inlet map, the
//! volume-fraction guard, closed-system mass conservation under implicit
//! Euler stepping, and parameter-derivative consistency.

mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use chromsol::error::ConfigError;
use chromsol::{ChromsolError, Indexer, ParamId};
use common::{
    closed_tracer_model, langmuir_qs_model, random_state, two_type_model, two_type_provider,
};

#[test]
fn consistent_initialization_reaches_langmuir_equilibrium() {
    let mut model = langmuir_qs_model();
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let mut y = vec![0.0; n];
    let mut ydot = vec![0.0; n];
    model.apply_initial_condition(&mut y, &mut ydot);

    model
        .consistent_initial_state(0.0, 0, &mut y, 1e-13)
        .unwrap();

    // q_i = qmax_i keq_i c_i / (1 + sum_j keq_j c_j) at every shell
    let disc = model.discretization().clone();
    let idx = Indexer::new(&disc);
    let cp = [0.5, 0.25];
    let keq = [1.2 / 0.6, 2.5 / 1.0];
    let qmax = [8.0, 5.0];
    let denom = 1.0 + keq[0] * cp[0] + keq[1] * cp[1];
    for k in 0..disc.n_col {
        for s in 0..disc.n_par_cell[0] {
            let base = idx.offset_cp_shell(0, k, s);
            for c in 0..2 {
                assert_abs_diff_eq!(y[base + c], cp[c], epsilon = 1e-15);
                assert_abs_diff_eq!(
                    y[base + 2 + c],
                    qmax[c] * keq[c] * cp[c] / denom,
                    epsilon = 1e-12
                );
            }
        }
    }

    // the completed pair must zero the full residual
    let status = model.consistent_initial_time_derivative(0.0, 0, &y, &mut ydot);
    assert_eq!(status, 0);
    let mut res = vec![0.0; n];
    model.residual(0.0, 0, &y, Some(&ydot), &mut res);
    for (i, r) in res.iter().enumerate() {
        assert!(r.abs() < 1e-10, "residual {r} at dof {i}");
    }
}

#[test]
fn flow_reversal_remaps_the_inlet_block() {
    let mut pp = two_type_provider(true, true, vec![0.5, -0.5]);
    let mut model = chromsol::GeneralRateModel::new(0);
    model.configure_model_discretization(&mut pp).unwrap();
    model.configure(&mut pp).unwrap();
    let disc = model.discretization().clone();
    let h = 1.0 / disc.n_col as f64;

    model.notify_discontinuous_section_transition(0.0, 0);
    let entries: Vec<_> = model.jac_inlet().iter().collect();
    assert_eq!(entries.len(), disc.n_comp);
    for (row, col, value) in &entries {
        // forward flow: inlet feeds the first bulk cell with -u/h
        assert_eq!(row, col);
        assert!(*row < disc.n_comp);
        assert_relative_eq!(*value, -0.5 / h);
    }
    assert_eq!(
        model.local_outlet_component_index(0),
        disc.n_comp + (disc.n_col - 1) * disc.n_comp
    );

    model.notify_discontinuous_section_transition(1.0, 1);
    let entries: Vec<_> = model.jac_inlet().iter().collect();
    assert_eq!(entries.len(), disc.n_comp);
    for (row, col, value) in &entries {
        // backward flow: inlet feeds the last bulk cell with u/h
        assert_eq!(*row, (disc.n_col - 1) * disc.n_comp + col);
        assert_relative_eq!(*value, -0.5 / h);
        assert_relative_eq!(value.abs(), 0.5 / h);
    }
    assert_eq!(model.local_outlet_component_index(0), disc.n_comp);
    assert_eq!(model.local_inlet_component_index(0), 0);
}

#[test]
fn volume_fractions_must_sum_to_one() {
    let mut pp = two_type_provider(true, true, vec![0.5]);
    pp.add("PAR_TYPE_VOLFRAC", vec![0.6, 0.5]);
    let mut model = chromsol::GeneralRateModel::new(0);
    model.configure_model_discretization(&mut pp).unwrap();
    match model.configure(&mut pp) {
        Err(ChromsolError::ConfigError(ConfigError::VolumeFractionSum { cell, sum })) => {
            assert_eq!(cell, 0);
            assert_relative_eq!(sum, 1.1);
        }
        other => panic!("expected volume-fraction error, got {other:?}"),
    }
}

#[test]
fn dof_count_matches_the_closed_form() {
    let model = two_type_model(true, true);
    let disc = model.discretization();
    // inlet + bulk + particles + fluxes
    let particles = 4 * (3 * (3 + 3)) + 4 * (2 * (3 + 3));
    assert_eq!(model.num_dofs(), 3 + 4 * 3 + particles + 4 * 3 * 2);
    assert_eq!(model.num_pure_dofs(), model.num_dofs() - disc.n_comp);
}

/// Backward Euler via the unit's own Newton pieces: residual + Jacobian,
/// then the Schur-complement linear solve.
fn implicit_euler_step(
    model: &mut chromsol::GeneralRateModel,
    t: f64,
    dt: f64,
    y: &mut [f64],
    y_prev: &[f64],
) {
    let n = y.len();
    let mut res = vec![0.0; n];
    for _ in 0..6 {
        let ydot: Vec<f64> = y
            .iter()
            .zip(y_prev)
            .map(|(a, b)| (a - b) / dt)
            .collect();
        let status = model.residual_with_jacobian(t, 0, y, Some(&ydot), &mut res);
        assert_eq!(status, 0);
        let norm = res.iter().fold(0.0f64, |acc, r| acc.max(r.abs()));
        if norm < 1e-11 {
            return;
        }
        let status = model.linear_solve(t, 1.0 / dt, 1e-4, &mut res);
        assert_eq!(status, 0);
        for (yi, di) in y.iter_mut().zip(&res) {
            *yi -= di;
        }
    }
    panic!("implicit Euler Newton iteration did not converge");
}

#[test]
fn closed_system_conserves_mass() {
    let mut model = closed_tracer_model();
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let mut y = vec![0.0; n];
    let mut ydot = vec![0.0; n];
    model.apply_initial_condition(&mut y, &mut ydot);
    model
        .consistent_initialization(0.0, 0, &mut y, &mut ydot, 1e-10)
        .unwrap();

    let disc = model.discretization().clone();
    let idx = Indexer::new(&disc);
    let (eps_c, eps_p) = (0.4, 0.5);
    // equivolume shells: every shell holds the same particle volume share
    let total_mass = |y: &[f64]| -> f64 {
        let mut mass = 0.0;
        for k in 0..disc.n_col {
            mass += eps_c * y[idx.offset_c() + k];
            let mut held = 0.0;
            for s in 0..disc.n_par_cell[0] {
                held += y[idx.offset_cp_shell(0, k, s)];
            }
            mass += (1.0 - eps_c) * eps_p * held / disc.n_par_cell[0] as f64;
        }
        mass / disc.n_col as f64
    };

    let m0 = total_mass(&y);
    assert!(m0 > 0.0);
    let dt = 0.05;
    let mut t = 0.0;
    for _ in 0..5 {
        let y_prev = y.clone();
        t += dt;
        implicit_euler_step(&mut model, t, dt, &mut y, &y_prev);
    }
    // diffusion moved tracer into the particles
    assert!(y[idx.offset_cp_shell(0, 0, 0)] > 1e-3);
    assert_relative_eq!(total_mass(&y), m0, max_relative = 1e-8);
}

#[test]
fn parameter_derivative_matches_finite_differences() {
    let mut model = two_type_model(true, true);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 53);
    let ydot = random_state(n, 59);

    let pid = ParamId::new("FILM_DIFFUSION", 0)
        .with_component(1)
        .with_particle_type(0);
    assert!(model.set_sensitive_parameter(&pid, 0, 1.0));
    assert_eq!(model.num_sens_params(), 1);

    let status = model.residual_sens_fwd_ad_only(0.0, 0, &y, Some(&ydot));
    assert_eq!(status, 0);
    let zeros = vec![vec![0.0; n]];
    let mut res_s = vec![vec![0.0; n]];
    model.residual_sens_fwd_combine(&zeros, &zeros, &mut res_s);

    // finite difference on the same parameter
    let base = 0.12;
    let eps = 1e-6;
    let mut res_plus = vec![0.0; n];
    let mut res_minus = vec![0.0; n];
    model.set_parameter(&pid, base + eps);
    model.residual(0.0, 0, &y, Some(&ydot), &mut res_plus);
    model.set_parameter(&pid, base - eps);
    model.residual(0.0, 0, &y, Some(&ydot), &mut res_minus);
    model.set_parameter(&pid, base);

    for i in 0..n {
        let fd = (res_plus[i] - res_minus[i]) / (2.0 * eps);
        assert_relative_eq!(res_s[0][i], fd, epsilon = 1e-7, max_relative = 1e-5);
    }
}
