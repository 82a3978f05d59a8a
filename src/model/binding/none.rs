//! Inert binding: bound states (if any) carry no reaction flux and stay
//! purely dynamic.

use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::Active;

use super::BindingModel;

#[derive(Debug, Default)]
pub struct NoBinding {
    quasi_stationary: Vec<bool>,
}

impl NoBinding {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BindingModel for NoBinding {
    fn name(&self) -> &'static str {
        "NONE"
    }

    fn configure_model_discretization(
        &mut self,
        _n_comp: usize,
        n_bound: &[usize],
        _bound_offset: &[usize],
    ) -> Result<(), ChromsolError> {
        let stride: usize = n_bound.iter().sum();
        self.quasi_stationary = vec![false; stride];
        Ok(())
    }

    fn requires_configuration(&self) -> bool {
        false
    }

    fn configure(
        &mut self,
        _provider: &mut dyn ParameterProvider,
        _unit: UnitOpIdx,
        _par_type: Option<usize>,
    ) -> Result<(), ChromsolError> {
        Ok(())
    }

    fn reaction_quasi_stationarity(&self) -> &[bool] {
        &self.quasi_stationary
    }

    fn flux_value(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        _y: &[f64],
        _res: &mut [f64],
        _ws: &mut Workspace,
    ) {
    }

    fn flux_dual(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        _y: &[Active],
        _res: &mut [Active],
        _with_param_grads: bool,
        _ws: &mut Workspace,
    ) {
    }

    fn analytic_jacobian(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        _y: &[f64],
        _jac: &mut RowMut<'_>,
        _ws: &mut Workspace,
    ) {
    }
}
