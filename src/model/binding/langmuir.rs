//! Competitive multi-component Langmuir adsorption.
//!
//! With free-site fraction `psi = 1 - sum_j q_j / q_{max,j}` the flux of a
//! component with a bound state is `f = k_d q - k_a c_p q_max psi`. At
//! equilibrium this yields `q_i = q_{max,i} k_{eq,i} c_i / (1 + sum_j
//! k_{eq,j} c_j)` for `k_eq = k_a / k_d`.

use crate::config_error;
use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::{Active, ByValue, ModelScalar, ParamLift, WithGradient};

use super::BindingModel;

#[derive(Debug, Default)]
pub struct LangmuirBinding {
    n_comp: usize,
    n_bound: Vec<usize>,
    bound_offset: Vec<usize>,
    quasi_stationary: Vec<bool>,
    is_kinetic: bool,
    ka: Vec<Active>,
    kd: Vec<Active>,
    qmax: Vec<Active>,
}

impl LangmuirBinding {
    pub fn new() -> Self {
        Self {
            is_kinetic: true,
            ..Self::default()
        }
    }

    fn flux_impl<T: ModelScalar, L: ParamLift<T>>(&self, y: &[T], res: &mut [T]) {
        let mut psi = T::one();
        for j in 0..self.n_comp {
            if self.n_bound[j] == 0 {
                continue;
            }
            let qmax_j = L::lift(&self.qmax[j]);
            psi -= y[self.n_comp + self.bound_offset[j]].clone() / qmax_j;
        }
        for c in 0..self.n_comp {
            if self.n_bound[c] == 0 {
                continue;
            }
            let b = self.bound_offset[c];
            let ka = L::lift(&self.ka[c]);
            let kd = L::lift(&self.kd[c]);
            let qmax = L::lift(&self.qmax[c]);
            let f = kd * y[self.n_comp + b].clone() - ka * y[c].clone() * qmax * psi.clone();
            res[b] += f;
        }
    }
}

impl BindingModel for LangmuirBinding {
    fn name(&self) -> &'static str {
        "MULTI_COMPONENT_LANGMUIR"
    }

    fn configure_model_discretization(
        &mut self,
        n_comp: usize,
        n_bound: &[usize],
        bound_offset: &[usize],
    ) -> Result<(), ChromsolError> {
        if n_bound.iter().any(|n| *n > 1) {
            return Err(config_error!(InvalidValue {
                field: "NBOUND".to_string(),
                reason: "MULTI_COMPONENT_LANGMUIR supports at most one bound state per component"
                    .to_string(),
            }));
        }
        self.n_comp = n_comp;
        self.n_bound = n_bound.to_vec();
        self.bound_offset = bound_offset.to_vec();
        self.quasi_stationary = vec![!self.is_kinetic; n_bound.iter().sum()];
        Ok(())
    }

    fn configure(
        &mut self,
        provider: &mut dyn ParameterProvider,
        _unit: UnitOpIdx,
        _par_type: Option<usize>,
    ) -> Result<(), ChromsolError> {
        self.is_kinetic = provider.get_bool("IS_KINETIC")?;
        for (field, target) in [("MCL_KA", 0usize), ("MCL_KD", 1), ("MCL_QMAX", 2)] {
            let values = provider.get_double_array(field)?;
            if values.len() < self.n_comp {
                return Err(config_error!(TooFewElements {
                    field: field.to_string(),
                    expected: self.n_comp,
                }));
            }
            let values: Vec<Active> = values.iter().map(|v| Active::new(*v)).collect();
            match target {
                0 => self.ka = values,
                1 => self.kd = values,
                _ => self.qmax = values,
            }
        }
        self.quasi_stationary = vec![!self.is_kinetic; self.n_bound.iter().sum()];
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
        y: &[f64],
        res: &mut [f64],
        _ws: &mut Workspace,
    ) {
        self.flux_impl::<f64, ByValue>(y, res);
    }

    fn flux_dual(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        with_param_grads: bool,
        _ws: &mut Workspace,
    ) {
        if with_param_grads {
            self.flux_impl::<Active, WithGradient>(y, res);
        } else {
            self.flux_impl::<Active, ByValue>(y, res);
        }
    }

    fn analytic_jacobian(
        &self,
        _t: f64,
        _sec: usize,
        _pos: &ColumnPosition,
        y: &[f64],
        jac: &mut RowMut<'_>,
        _ws: &mut Workspace,
    ) {
        let mut psi = 1.0;
        for j in 0..self.n_comp {
            if self.n_bound[j] == 0 {
                continue;
            }
            psi -= y[self.n_comp + self.bound_offset[j]] / self.qmax[j].value();
        }
        for c in 0..self.n_comp {
            if self.n_bound[c] == 0 {
                continue;
            }
            let b = self.bound_offset[c];
            let ka = self.ka[c].value();
            let kd = self.kd[c].value();
            let qmax = self.qmax[c].value();

            jac.advance(b as isize);
            // dres / dc_{p,c}
            jac[c as isize - (self.n_comp + b) as isize] += -ka * qmax * psi;
            for j in 0..self.n_comp {
                if self.n_bound[j] == 0 {
                    continue;
                }
                let bj = self.bound_offset[j];
                // dres / dq_j via the free-site fraction
                jac[bj as isize - b as isize] += ka * y[c] * qmax / self.qmax[j].value();
            }
            // dres / dq_c
            jac[0] += kd;
            jac.advance(-(b as isize));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::binding::BindingModel;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn configured(kinetic: bool) -> LangmuirBinding {
        let mut model = LangmuirBinding::new();
        model
            .configure_model_discretization(2, &[1, 1], &[0, 1])
            .unwrap();
        let mut pp = crate::params::InMemoryParameterProvider::new();
        pp.add("IS_KINETIC", kinetic)
            .add("MCL_KA", vec![1.2, 2.5])
            .add("MCL_KD", vec![0.6, 1.0])
            .add("MCL_QMAX", vec![8.0, 5.0]);
        model.configure(&mut pp, 0, None).unwrap();
        model
    }

    #[test]
    fn equilibrium_isotherm_is_a_root_of_the_flux() {
        let model = configured(false);
        let c = [0.7, 0.4];
        let keq = [1.2 / 0.6, 2.5 / 1.0];
        let denom = 1.0 + keq[0] * c[0] + keq[1] * c[1];
        let q = [8.0 * keq[0] * c[0] / denom, 5.0 * keq[1] * c[1] / denom];
        let y = [c[0], c[1], q[0], q[1]];
        let mut res = [0.0; 2];
        let mut ws = Workspace::default();
        model.flux_value(0.0, 0, &ColumnPosition::default(), &y, &mut res, &mut ws);
        assert_abs_diff_eq!(res[0], 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(res[1], 0.0, epsilon = 1e-14);
    }

    #[test]
    fn analytic_jacobian_matches_dual_derivatives() {
        let model = configured(true);
        let y = [0.7, 0.4, 2.0, 1.0];
        let n = 4;

        // dual pass: seed every cell variable in its own direction
        let mut y_ad: Vec<Active> = y.iter().map(|v| Active::new(*v)).collect();
        for (dir, v) in y_ad.iter_mut().enumerate() {
            v.set_grad(dir, 1.0);
        }
        let mut res_ad = vec![Active::new(0.0); 2];
        let mut ws = Workspace::default();
        model.flux_dual(
            0.0,
            0,
            &ColumnPosition::default(),
            &y_ad,
            &mut res_ad,
            false,
            &mut ws,
        );

        // analytic pass through a fully-banded scratch matrix: rows are the
        // cell, the solid rows start at index 2
        let mut mat = crate::matrix::BandMatrix::new(n, n - 1, n - 1);
        let mut row = mat.row_mut(2);
        model.analytic_jacobian(0.0, 0, &ColumnPosition::default(), &y, &mut row, &mut ws);

        for b in 0..2 {
            for col in 0..n {
                let diag = col as isize - (2 + b) as isize;
                assert_relative_eq!(
                    mat.get(2 + b, diag),
                    res_ad[b].grad(col),
                    epsilon = 1e-12
                );
            }
        }
    }
}
