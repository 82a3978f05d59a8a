//! First-order conversion chain in the mobile phase: component `c` converts
//! into component `c + 1` at rate `RATE_CONST[c]`; the last rate consumes
//! without product. Production of component `c` is
//! `k_{c-1} y_{c-1} - k_c y_c`.

use crate::config_error;
use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::{Active, ByValue, ModelScalar, ParamLift, WithGradient};

use super::DynamicReactionModel;

#[derive(Debug, Default)]
pub struct FirstOrderReaction {
    n_comp: usize,
    rate: Vec<Active>,
}

impl FirstOrderReaction {
    pub fn new() -> Self {
        Self::default()
    }

    fn production_impl<T: ModelScalar, L: ParamLift<T>>(&self, y: &[T], res: &mut [T], factor: f64) {
        let factor = T::from_re(factor);
        for c in 0..self.n_comp {
            let k_c = L::lift(&self.rate[c]);
            let mut prod = -(k_c * y[c].clone());
            if c > 0 {
                let k_prev = L::lift(&self.rate[c - 1]);
                prod += k_prev * y[c - 1].clone();
            }
            res[c] += factor.clone() * prod;
        }
    }

    fn jacobian_impl(&self, factor: f64, jac: &mut RowMut<'_>) {
        for c in 0..self.n_comp {
            jac.advance(c as isize);
            jac[0] += -factor * self.rate[c].value();
            if c > 0 {
                jac[-1] += factor * self.rate[c - 1].value();
            }
            jac.advance(-(c as isize));
        }
    }
}

impl DynamicReactionModel for FirstOrderReaction {
    fn name(&self) -> &'static str {
        "FIRST_ORDER"
    }

    fn configure_model_discretization(
        &mut self,
        n_comp: usize,
        _n_bound: Option<&[usize]>,
        _bound_offset: Option<&[usize]>,
    ) -> Result<(), ChromsolError> {
        self.n_comp = n_comp;
        Ok(())
    }

    fn configure(
        &mut self,
        provider: &mut dyn ParameterProvider,
        _unit: UnitOpIdx,
        _par_type: Option<usize>,
    ) -> Result<(), ChromsolError> {
        let rate = provider.get_double_array("RATE_CONST")?;
        if rate.len() < self.n_comp {
            return Err(config_error!(TooFewElements {
                field: "RATE_CONST".to_string(),
                expected: self.n_comp,
            }));
        }
        self.rate = rate.iter().map(|v| Active::new(*v)).collect();
        Ok(())
    }

    fn num_reactions_liquid(&self) -> usize {
        self.n_comp
    }

    fn num_reactions_combined(&self) -> usize {
        self.n_comp
    }

    fn residual_liquid_value(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        _ws: &mut Workspace,
    ) {
        self.production_impl::<f64, ByValue>(y, res, factor);
    }

    fn residual_liquid_dual(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        factor: f64,
        with_param_grads: bool,
        _ws: &mut Workspace,
    ) {
        if with_param_grads {
            self.production_impl::<Active, WithGradient>(y, res, factor);
        } else {
            self.production_impl::<Active, ByValue>(y, res, factor);
        }
    }

    fn residual_combined_value(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        ws: &mut Workspace,
    ) {
        // conversion acts on the shell's mobile phase only
        self.residual_liquid_value(t, sec, pos, y, res, factor, ws);
    }

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
    ) {
        self.residual_liquid_dual(t, sec, pos, y, res, factor, with_param_grads, ws);
    }

    fn analytic_jacobian_liquid(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        _y: &[f64],
        factor: f64,
        jac: &mut RowMut<'_>,
        _ws: &mut Workspace,
    ) {
        self.jacobian_impl(factor, jac);
    }

    fn analytic_jacobian_combined(
        &self,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        factor: f64,
        jac: &mut RowMut<'_>,
        ws: &mut Workspace,
    ) {
        self.analytic_jacobian_liquid(t, sec, pos, y, factor, jac, ws);
    }
}
