//! # chromsol
//!
//! Chromsol is the numerical core of a chromatography simulator: the
//! General Rate Model (GRM) unit operation, a spatially discretized system
//! of partial differential-algebraic equations coupling axial bulk-phase
//! convection-dispersion with intra-particle radial diffusion, film mass
//! transfer, surface diffusion and nonlinear adsorption/reaction kinetics.
//!
//! The unit serves an implicit ODE/DAE integrator at every evaluation
//! point `(t, y, ydot)` with
//!
//! - the residual vector `F(t, y, ydot)`
//!   ([`GeneralRateModel::residual`]),
//! - the banded state Jacobian `dF/dy`, computed analytically or through
//!   band-compressed forward-mode AD as a cross-check
//!   ([`GeneralRateModel::residual_with_jacobian`]),
//! - matrix-free multiplications with `dF/dy` and `dF/dydot`
//!   ([`GeneralRateModel::multiply_with_jacobian`],
//!   [`GeneralRateModel::multiply_with_derivative_jacobian`]).
//!
//! ## Configuration
//!
//! A unit is built from a hierarchical [`params::ParameterProvider`]
//! in two steps: [`GeneralRateModel::configure_model_discretization`]
//! reads the `discretization` scope (grid sizes, bound states, solver
//! options) and allocates all Jacobian storage, then
//! [`GeneralRateModel::configure`] reads the physical parameters, derives
//! the particle geometry and configures the binding and reaction plug-ins.
//! Size mismatches and unknown model names surface as typed
//! [`error::ConfigError`] values naming the offending field.
//!
//! ## State layout
//!
//! Degrees of freedom are ordered inlet, bulk, particles, fluxes; all
//! address arithmetic goes through [`model::Indexer`]. See
//! [`model::indexer`] for the exact layout contract shared with the
//! integrator.
//!
//! ## Linear solver
//!
//! Newton systems are solved by eliminating the bulk and particle blocks
//! (banded LU) and iterating on the flux Schur complement with restarted
//! GMRES ([`GeneralRateModel::linear_solve`]). Residual and Jacobian must
//! be evaluated before the first solve of a Newton step.
//!
//! ## Consistent initialization and sensitivities
//!
//! [`GeneralRateModel::consistent_initialization`] solves the algebraic
//! constraints (inlet identities, film-flux equations, quasi-stationary
//! binding equilibria) and recovers dynamic time derivatives through the
//! mass matrix; a lean variant handles section-transition restarts.
//! Forward parameter sensitivities share the Jacobian infrastructure
//! through dual-number arithmetic ([`scalar::Active`]).

pub mod error;
pub mod jacobian;
pub mod linear_solver;
pub mod matrix;
pub mod model;
pub mod params;
pub mod scalar;

pub use error::ChromsolError;
pub use linear_solver::{Gmres, GmresStats, Orthogonalization};
pub use matrix::{BandMatrix, FactorizableBandMatrix, RowMut, SparseMatrix};
pub use model::binding::{create_binding_model, BindingModel};
pub use model::reaction::{create_reaction_model, DynamicReactionModel};
pub use model::{ColumnPosition, ConvectionDispersionOperator, Discretization, GeneralRateModel, Indexer};
pub use params::{
    hash_string, InMemoryParameterProvider, MultiplexMode, ParamId, ParameterProvider, UnitOpIdx,
};
pub use scalar::{Active, ByValue, ModelScalar, ParamLift, WithGradient};
