//! Adsorption (binding) models.
//!
//! A binding model contributes the reaction flux `f` of the solid phase:
//! dynamic bound states obey `dq/dt + f = 0`, quasi-stationary bound states
//! the algebraic constraint `f = 0`. The contract mirrors the particle cell
//! kernel: `y` is one shell (`nComp` mobile-phase entries followed by the
//! bound states), `res` covers the bound-state rows only, and the analytic
//! Jacobian is written through a band-matrix row cursor positioned on the
//! first bound-state row.
//!
//! Models are instantiated by [`create_binding_model`] and may be shared
//! across particle types when multiplexed.

mod langmuir;
mod linear;
mod none;

pub use langmuir::LangmuirBinding;
pub use linear::LinearBinding;
pub use none::NoBinding;

use std::sync::Arc;

use crate::config_error;
use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::Active;

/// Time- and position-dependent external source for externally-dependent
/// models.
pub trait ExternalFunction: Send + Sync {
    fn value(&self, t: f64, z: f64, r: f64) -> f64;
}

pub trait BindingModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn configure_model_discretization(
        &mut self,
        n_comp: usize,
        n_bound: &[usize],
        bound_offset: &[usize],
    ) -> Result<(), ChromsolError>;

    fn requires_configuration(&self) -> bool {
        true
    }

    fn configure(
        &mut self,
        provider: &mut dyn ParameterProvider,
        unit: UnitOpIdx,
        par_type: Option<usize>,
    ) -> Result<(), ChromsolError>;

    /// One flag per bound state; `true` marks the state as quasi-stationary
    /// (algebraic).
    fn reaction_quasi_stationarity(&self) -> &[bool];

    fn has_quasi_stationary_reactions(&self) -> bool {
        self.reaction_quasi_stationarity().iter().any(|q| *q)
    }

    fn has_dynamic_reactions(&self) -> bool {
        self.reaction_quasi_stationarity().iter().any(|q| !*q)
    }

    fn requires_workspace(&self) -> bool {
        false
    }

    fn workspace_size(&self, _n_comp: usize, _stride_bound: usize) -> usize {
        0
    }

    fn set_external_functions(&mut self, _functions: &[Arc<dyn ExternalFunction>]) {}

    /// Adds the binding flux to the bound-state residual rows.
    fn flux_value(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        ws: &mut Workspace,
    );

    /// Dual-number variant; `with_param_grads` keeps the directional
    /// derivatives of the model parameters (parameter sensitivities).
    fn flux_dual(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        with_param_grads: bool,
        ws: &mut Workspace,
    );

    /// Adds `d flux / d (c_p, q)` to the banded Jacobian; `jac` is centered
    /// on the first bound-state row of the shell.
    fn analytic_jacobian(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        jac: &mut RowMut<'_>,
        ws: &mut Workspace,
    );
}

/// Instantiates a binding model by its configuration name.
pub fn create_binding_model(name: &str) -> Result<Box<dyn BindingModel>, ChromsolError> {
    match name {
        "NONE" => Ok(Box::new(NoBinding::new())),
        "LINEAR" => Ok(Box::new(LinearBinding::new())),
        "MULTI_COMPONENT_LANGMUIR" => Ok(Box::new(LangmuirBinding::new())),
        _ => Err(config_error!(UnknownBindingModel, name.to_string())),
    }
}
