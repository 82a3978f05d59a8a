//! Shared builders for the integration tests.
#![allow(dead_code)]

use chromsol::{GeneralRateModel, InMemoryParameterProvider};

/// Deterministic pseudo-random sequence in `[0, 1)`.
pub fn lcg(seed: u64) -> impl FnMut() -> f64 {
    let mut state = seed;
    move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((state >> 33) as f64) / ((1u64 << 31) as f64)
    }
}

pub fn random_state(n: usize, seed: u64) -> Vec<f64> {
    let mut next = lcg(seed);
    (0..n).map(|_| next()).collect()
}

/// Two particle types with heterogeneous shell counts and bound states:
/// an inert type with dynamic bound states and a kinetic Langmuir type,
/// with bulk and particle first-order reactions. Parameter scales are
/// kept near unity so finite differences stay well conditioned.
pub fn two_type_provider(
    analytic_jacobian: bool,
    surface_diffusion: bool,
    velocity: Vec<f64>,
) -> InMemoryParameterProvider {
    let mut pp = InMemoryParameterProvider::new();
    pp.add("NCOMP", 3i64)
        .add("COL_LENGTH", 1.0)
        .add("VELOCITY", velocity)
        .add("COL_DISPERSION", vec![1e-3, 2e-3, 1.5e-3])
        .add("COL_POROSITY", 0.37)
        .add("PAR_RADIUS", vec![0.3, 0.25])
        .add("PAR_CORERADIUS", vec![0.0, 0.05])
        .add("PAR_POROSITY", vec![0.75, 0.6])
        .add("PAR_TYPE_VOLFRAC", vec![0.6, 0.4])
        .add("FILM_DIFFUSION", vec![0.1, 0.12, 0.09, 0.11, 0.08, 0.1])
        .add("PAR_DIFFUSION", vec![0.01, 0.012, 0.009, 0.011, 0.008, 0.01])
        .add(
            "PAR_SURFDIFFUSION",
            if surface_diffusion {
                vec![5e-3, 4e-3, 3e-3, 6e-3, 2e-3, 5e-3]
            } else {
                vec![0.0; 6]
            },
        )
        .add(
            "PORE_ACCESSIBILITY",
            vec![1.0, 0.9, 0.95, 0.85, 1.0, 0.9],
        )
        .add("ADSORPTION_MODEL", vec!["NONE", "MULTI_COMPONENT_LANGMUIR"])
        .add("adsorption_001/IS_KINETIC", true)
        .add("adsorption_001/MCL_KA", vec![1.1, 0.8, 1.5])
        .add("adsorption_001/MCL_KD", vec![0.9, 1.2, 0.7])
        .add("adsorption_001/MCL_QMAX", vec![5.0, 4.0, 6.0])
        .add("REACTION_MODEL", "FIRST_ORDER")
        .add("reaction_bulk/RATE_CONST", vec![0.2, 0.1, 0.0])
        .add("REACTION_MODEL_PARTICLES", vec!["FIRST_ORDER"])
        .add("reaction_particle/RATE_CONST", vec![0.05, 0.02, 0.0])
        .add("INIT_C", vec![0.0, 0.0, 0.0])
        .add("discretization/NCOL", 4i64)
        .add("discretization/NPAR", vec![3i64, 2])
        .add("discretization/NBOUND", vec![1i64, 0, 2, 1, 1, 1])
        .add("discretization/NPARTYPE", 2i64)
        .add(
            "discretization/PAR_DISC_TYPE",
            vec!["EQUIDISTANT_PAR", "EQUIVOLUME_PAR"],
        )
        .add("discretization/USE_ANALYTIC_JACOBIAN", analytic_jacobian)
        .add("discretization/MAX_KRYLOV", 0i64)
        .add("discretization/GS_TYPE", 1i64)
        .add("discretization/MAX_RESTARTS", 20i64)
        .add("discretization/SCHUR_SAFETY", 1e-8);
    if !surface_diffusion {
        pp.add("discretization/FIX_ZERO_SURFACE_DIFFUSION", true);
    }
    pp
}

pub fn two_type_model(analytic_jacobian: bool, surface_diffusion: bool) -> GeneralRateModel {
    let mut pp = two_type_provider(analytic_jacobian, surface_diffusion, vec![0.5]);
    let mut model = GeneralRateModel::new(0);
    model.configure_model_discretization(&mut pp).unwrap();
    model.configure(&mut pp).unwrap();
    model
}

/// Single particle type, two components, quasi-stationary competitive
/// Langmuir binding.
pub fn langmuir_qs_model() -> GeneralRateModel {
    let mut pp = InMemoryParameterProvider::new();
    pp.add("NCOMP", 2i64)
        .add("COL_LENGTH", 1.0)
        .add("VELOCITY", 0.5)
        .add("COL_DISPERSION", vec![1e-3, 1e-3])
        .add("COL_POROSITY", 0.4)
        .add("PAR_RADIUS", 0.3)
        .add("PAR_POROSITY", 0.65)
        .add("PAR_TYPE_VOLFRAC", 1.0)
        .add("FILM_DIFFUSION", vec![0.1, 0.08])
        .add("PAR_DIFFUSION", vec![0.01, 0.012])
        .add("ADSORPTION_MODEL", "MULTI_COMPONENT_LANGMUIR")
        .add("adsorption/IS_KINETIC", false)
        .add("adsorption/MCL_KA", vec![1.2, 2.5])
        .add("adsorption/MCL_KD", vec![0.6, 1.0])
        .add("adsorption/MCL_QMAX", vec![8.0, 5.0])
        .add("INIT_C", vec![1.0, 1.0])
        .add("INIT_CP", vec![0.5, 0.25])
        .add("INIT_Q", vec![0.0, 0.0])
        .add("discretization/NCOL", 3i64)
        .add("discretization/NPAR", 2i64)
        .add("discretization/NBOUND", vec![1i64, 1])
        .add("discretization/PAR_DISC_TYPE", "EQUIDISTANT_PAR")
        .add("discretization/USE_ANALYTIC_JACOBIAN", true)
        .add("discretization/MAX_KRYLOV", 0i64)
        .add("discretization/GS_TYPE", 1i64)
        .add("discretization/MAX_RESTARTS", 10i64)
        .add("discretization/SCHUR_SAFETY", 1e-8);
    let mut model = GeneralRateModel::new(0);
    model.configure_model_discretization(&mut pp).unwrap();
    model.configure(&mut pp).unwrap();
    model
}

/// Closed single-component tracer column: zero velocity, no bound states,
/// used for the mass-conservation property.
pub fn closed_tracer_model() -> GeneralRateModel {
    let mut pp = InMemoryParameterProvider::new();
    pp.add("NCOMP", 1i64)
        .add("COL_LENGTH", 1.0)
        .add("VELOCITY", 0.0)
        .add("COL_DISPERSION", 1e-2)
        .add("COL_POROSITY", 0.4)
        .add("PAR_RADIUS", 0.3)
        .add("PAR_POROSITY", 0.5)
        .add("PAR_TYPE_VOLFRAC", 1.0)
        .add("FILM_DIFFUSION", 0.1)
        .add("PAR_DIFFUSION", 0.01)
        .add("ADSORPTION_MODEL", "NONE")
        .add("INIT_C", 1.0)
        .add("INIT_CP", 0.0)
        .add("discretization/NCOL", 4i64)
        .add("discretization/NPAR", 3i64)
        .add("discretization/NBOUND", 0i64)
        .add("discretization/PAR_DISC_TYPE", "EQUIVOLUME_PAR")
        .add("discretization/USE_ANALYTIC_JACOBIAN", true)
        .add("discretization/MAX_KRYLOV", 0i64)
        .add("discretization/GS_TYPE", 0i64)
        .add("discretization/MAX_RESTARTS", 10i64)
        .add("discretization/SCHUR_SAFETY", 1e-8);
    let mut model = GeneralRateModel::new(0);
    model.configure_model_discretization(&mut pp).unwrap();
    model.configure(&mut pp).unwrap();
    model
}
