//! Linear adsorption, `f = k_d q - k_a c_p` per component with a bound
//! state. `IS_KINETIC = 0` declares all bound states quasi-stationary, which
//! turns the flux into the algebraic constraint `q = (k_a / k_d) c_p`.

use crate::config_error;
use crate::error::ChromsolError;
use crate::matrix::RowMut;
use crate::model::{ColumnPosition, Workspace};
use crate::params::{ParameterProvider, UnitOpIdx};
use crate::scalar::{Active, ByValue, ModelScalar, ParamLift, WithGradient};

use super::BindingModel;

#[derive(Debug, Default)]
pub struct LinearBinding {
    n_comp: usize,
    n_bound: Vec<usize>,
    bound_offset: Vec<usize>,
    quasi_stationary: Vec<bool>,
    is_kinetic: bool,
    ka: Vec<Active>,
    kd: Vec<Active>,
}

impl LinearBinding {
    pub fn new() -> Self {
        Self {
            is_kinetic: true,
            ..Self::default()
        }
    }

    fn flux_impl<T: ModelScalar, L: ParamLift<T>>(&self, y: &[T], res: &mut [T]) {
        for c in 0..self.n_comp {
            if self.n_bound[c] == 0 {
                continue;
            }
            let b = self.bound_offset[c];
            let ka = L::lift(&self.ka[c]);
            let kd = L::lift(&self.kd[c]);
            let f = kd * y[self.n_comp + b].clone() - ka * y[c].clone();
            res[b] += f;
        }
    }
}

impl BindingModel for LinearBinding {
    fn name(&self) -> &'static str {
        "LINEAR"
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
                reason: "LINEAR binding supports at most one bound state per component"
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
        let ka = provider.get_double_array("LIN_KA")?;
        let kd = provider.get_double_array("LIN_KD")?;
        if ka.len() < self.n_comp {
            return Err(config_error!(TooFewElements {
                field: "LIN_KA".to_string(),
                expected: self.n_comp,
            }));
        }
        if kd.len() < self.n_comp {
            return Err(config_error!(TooFewElements {
                field: "LIN_KD".to_string(),
                expected: self.n_comp,
            }));
        }
        self.ka = ka.iter().map(|v| Active::new(*v)).collect();
        self.kd = kd.iter().map(|v| Active::new(*v)).collect();
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
        _y: &[f64],
        jac: &mut RowMut<'_>,
        _ws: &mut Workspace,
    ) {
        for c in 0..self.n_comp {
            if self.n_bound[c] == 0 {
                continue;
            }
            let b = self.bound_offset[c];
            jac.advance(b as isize);
            // dres / dq_c and dres / dc_{p,c}
            jac[0] += self.kd[c].value();
            jac[c as isize - (self.n_comp + b) as isize] += -self.ka[c].value();
            jac.advance(-(b as isize));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::binding::BindingModel;
    use approx::assert_relative_eq;

    fn configured() -> LinearBinding {
        let mut model = LinearBinding::new();
        model
            .configure_model_discretization(2, &[1, 1], &[0, 1])
            .unwrap();
        let mut pp = crate::params::InMemoryParameterProvider::new();
        pp.add("IS_KINETIC", false)
            .add("LIN_KA", vec![2.0, 3.0])
            .add("LIN_KD", vec![1.0, 0.5]);
        model.configure(&mut pp, 0, None).unwrap();
        model
    }

    #[test]
    fn equilibrium_flux_vanishes() {
        let model = configured();
        assert!(model.has_quasi_stationary_reactions());
        // q = (ka/kd) c at equilibrium
        let y = [1.0, 2.0, 2.0, 12.0];
        let mut res = [0.0, 0.0];
        let mut ws = Workspace::default();
        model.flux_value(0.0, 0, &ColumnPosition::default(), &y, &mut res, &mut ws);
        assert_relative_eq!(res[0], 0.0);
        assert_relative_eq!(res[1], 0.0);
    }

    #[test]
    fn dual_flux_matches_value_flux() {
        let model = configured();
        let y = [0.4, 1.5, 0.3, 2.0];
        let mut res = [0.0, 0.0];
        let mut ws = Workspace::default();
        model.flux_value(0.0, 0, &ColumnPosition::default(), &y, &mut res, &mut ws);

        let y_ad: Vec<Active> = y.iter().map(|v| Active::new(*v)).collect();
        let mut res_ad = vec![Active::new(0.0); 2];
        model.flux_dual(
            0.0,
            0,
            &ColumnPosition::default(),
            &y_ad,
            &mut res_ad,
            false,
            &mut ws,
        );
        assert_relative_eq!(res_ad[0].value(), res[0]);
        assert_relative_eq!(res_ad[1].value(), res[1]);
    }
}
