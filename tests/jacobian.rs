//! Central correctness gates: the analytic banded Jacobian against its
//! band-compressed AD counterpart, the assembled coupling blocks against
//! finite differences of the residual, and the mass-matrix action.

mod common;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use chromsol::Indexer;
use common::{random_state, two_type_model};

#[test]
fn analytic_and_ad_jacobians_agree_with_surface_diffusion() {
    let mut model = two_type_model(true, true);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 11);
    let ydot = random_state(n, 23);

    let mut res = vec![0.0; n];
    let status = model.residual_with_jacobian(0.0, 0, &y, Some(&ydot), &mut res);
    assert_eq!(status, 0);

    let deviation = model.ad_jacobian_deviation(0.0, 0, &y, Some(&ydot));
    assert!(
        deviation < 1e-10,
        "analytic vs AD Jacobian deviation {deviation}"
    );
}

#[test]
fn analytic_and_ad_jacobians_agree_without_surface_diffusion() {
    let mut model = two_type_model(true, false);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 5);

    let mut res = vec![0.0; n];
    model.residual_with_jacobian(0.0, 0, &y, None, &mut res);
    let deviation = model.ad_jacobian_deviation(0.0, 0, &y, None);
    assert!(deviation < 1e-10, "deviation {deviation}");
}

#[test]
fn ad_computed_jacobian_reproduces_the_analytic_matvec() {
    let mut analytic = two_type_model(true, true);
    let mut ad = two_type_model(false, true);
    analytic.notify_discontinuous_section_transition(0.0, 0);
    ad.notify_discontinuous_section_transition(0.0, 0);

    let n = analytic.num_dofs();
    let y = random_state(n, 3);
    let ydot = random_state(n, 7);
    let mut res_a = vec![0.0; n];
    let mut res_b = vec![0.0; n];
    analytic.residual_with_jacobian(0.0, 0, &y, Some(&ydot), &mut res_a);
    ad.residual_with_jacobian(0.0, 0, &y, Some(&ydot), &mut res_b);
    for i in 0..n {
        assert_abs_diff_eq!(res_a[i], res_b[i], epsilon = 1e-12);
    }

    let v = random_state(n, 31);
    let mut jv_a = vec![0.0; n];
    let mut jv_b = vec![0.0; n];
    analytic.multiply_with_jacobian(&v, 1.0, 0.0, &mut jv_a);
    ad.multiply_with_jacobian(&v, 1.0, 0.0, &mut jv_b);
    for i in 0..n {
        assert_abs_diff_eq!(jv_a[i], jv_b[i], epsilon = 1e-10);
    }
}

#[test]
fn jacobian_matvec_matches_finite_differences() {
    let mut model = two_type_model(true, true);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 17);
    let ydot = random_state(n, 29);

    let mut res = vec![0.0; n];
    model.residual_with_jacobian(0.0, 0, &y, Some(&ydot), &mut res);

    let v = random_state(n, 41);
    let mut jv = vec![0.0; n];
    model.multiply_with_jacobian(&v, 1.0, 0.0, &mut jv);

    // central difference along v, ydot held fixed
    let eps = 1e-6;
    let y_plus: Vec<f64> = y.iter().zip(&v).map(|(a, b)| a + eps * b).collect();
    let y_minus: Vec<f64> = y.iter().zip(&v).map(|(a, b)| a - eps * b).collect();
    let mut res_plus = vec![0.0; n];
    let mut res_minus = vec![0.0; n];
    model.residual(0.0, 0, &y_plus, Some(&ydot), &mut res_plus);
    model.residual(0.0, 0, &y_minus, Some(&ydot), &mut res_minus);

    for i in 0..n {
        let fd = (res_plus[i] - res_minus[i]) / (2.0 * eps);
        assert_relative_eq!(jv[i], fd, epsilon = 1e-6, max_relative = 1e-6);
    }
}

#[test]
fn jacobian_sparsity_matches_finite_difference_pattern() {
    let mut model = two_type_model(true, true);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 13);
    let mut res = vec![0.0; n];
    model.residual_with_jacobian(0.0, 0, &y, None, &mut res);

    // a handful of unit directions: wherever the finite difference sees a
    // coupling, the analytic Jacobian must see it too (and vice versa)
    let eps = 1e-6;
    for col in (0..n).step_by(7) {
        let mut v = vec![0.0; n];
        v[col] = 1.0;
        let mut jv = vec![0.0; n];
        model.multiply_with_jacobian(&v, 1.0, 0.0, &mut jv);

        let mut y_pert = y.clone();
        y_pert[col] += eps;
        let mut res_pert = vec![0.0; n];
        model.residual(0.0, 0, &y_pert, None, &mut res_pert);
        for i in 0..n {
            let fd = (res_pert[i] - res[i]) / eps;
            let analytic_nonzero = jv[i].abs() > 1e-10;
            let fd_nonzero = fd.abs() > 1e-6;
            assert_eq!(
                analytic_nonzero, fd_nonzero,
                "sparsity mismatch at row {i}, col {col}: analytic {}, fd {fd}",
                jv[i]
            );
        }
    }
}

#[test]
fn derivative_jacobian_is_exact_and_zero_on_algebraic_rows() {
    let mut model = two_type_model(true, true);
    model.notify_discontinuous_section_transition(0.0, 0);
    let n = model.num_dofs();
    let y = random_state(n, 19);
    let ydot = random_state(n, 37);
    let v = random_state(n, 43);

    let mut mv = vec![0.0; n];
    model.multiply_with_derivative_jacobian(&v, &mut mv);

    // flux and inlet DOFs are algebraic
    let disc = model.discretization().clone();
    let idx = Indexer::new(&disc);
    for i in 0..disc.n_comp {
        assert_eq!(mv[i], 0.0);
    }
    for i in idx.offset_jf()..n {
        assert_eq!(mv[i], 0.0);
    }

    // the residual is linear in ydot, so one forward difference is exact
    let ydot_pert: Vec<f64> = ydot.iter().zip(&v).map(|(a, b)| a + b).collect();
    let mut res0 = vec![0.0; n];
    let mut res1 = vec![0.0; n];
    model.residual(0.0, 0, &y, Some(&ydot), &mut res0);
    model.residual(0.0, 0, &y, Some(&ydot_pert), &mut res1);
    for i in 0..n {
        assert_abs_diff_eq!(res1[i] - res0[i], mv[i], epsilon = 1e-10);
    }
}
