//! Dynamic reaction models.
//!
//! A reaction model adds production terms to the mobile phase of the bulk
//! (`residual_liquid_*`) or to both phases of a particle shell
//! (`residual_combined_*`). Contributions enter the residual scaled by
//! `factor`; the unit operation passes `-1` so that production lowers the
//! residual.

mod first_order;

pub use first_order::FirstOrderReaction;

use crate::config_error;
use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::Active;

pub trait DynamicReactionModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// `n_bound` and `bound_offset` are absent for bulk-phase usage.
    fn configure_model_discretization(
        &mut self,
        n_comp: usize,
        n_bound: Option<&[usize]>,
        bound_offset: Option<&[usize]>,
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

    fn num_reactions_liquid(&self) -> usize;
    fn num_reactions_combined(&self) -> usize;

    fn requires_workspace(&self) -> bool {
        false
    }

    fn workspace_size(&self, _n_comp: usize, _stride_bound: usize) -> usize {
        0
    }

    /// Adds `factor *` production to the mobile-phase rows; `y` and `res`
    /// cover `n_comp` entries.
    fn residual_liquid_value(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        ws: &mut Workspace,
    );

    fn residual_liquid_dual(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    );

    /// Particle variant over one shell (`n_comp` mobile entries followed by
    /// the bound states).
    fn residual_combined_value(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        ws: &mut Workspace,
    );

    fn residual_combined_dual(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    );

    /// Adds `factor * d production / d y` rows through the cursor, centered
    /// on the first mobile-phase row.
    fn analytic_jacobian_liquid(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        factor: f64,
        jac: &mut RowMut<'_>,
        ws: &mut Workspace,
    );

    fn analytic_jacobian_combined(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        factor: f64,
        jac: &mut RowMut<'_>,
        ws: &mut Workspace,
    );
}

/// Instantiates a dynamic reaction model by its configuration name.
pub fn create_reaction_model(name: &str) -> Result<Box<dyn DynamicReactionModel>, ChromsolError> {
    match name {
        "FIRST_ORDER" => Ok(Box::new(FirstOrderReaction::new())),
        _ => Err(config_error!(UnknownReactionModel, name.to_string())),
    }
}
