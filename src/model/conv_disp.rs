//! Axial convection-dispersion operator of the bulk column.
//!
//! First-order upwind convection and central-difference dispersion on the
//! axial finite-volume grid, with closed dispersive boundaries. The inlet
//! DOF enters the upwind flux of the first cell (forward flow) or the last
//! cell (backward flow); the corresponding Jacobian block is kept outside
//! the banded matrix and assembled by the unit operation on section
//! transitions. The sign of the interstitial velocity selects the upwind
//! direction per section.

use crate::error::ChromsolError;
use crate::jacobian::{compare_banded_jacobian, extract_banded_jacobian, prepare_band_seed_vectors};
use crate::matrix::{BandMatrix, FactorizableBandMatrix};
use crate::params::{
    read_comp_type_sec_param, section_dependent_slice, ParamId, ParameterProvider,
};
use crate::scalar::{Active, ModelScalar, ParamLift};
use crate::{config_error, params::hash_string};

#[derive(Debug, Clone)]
pub struct ConvectionDispersionOperator {
    n_comp: usize,
    n_col: usize,
    col_length: Active,
    /// Interstitial velocity, signed; one entry per section or a single one.
    velocity: Vec<Active>,
    /// Axial dispersion per component, one block per section when
    /// section-dependent.
    col_dispersion: Vec<Active>,
    cur_section: usize,
    jac_c: BandMatrix,
    jac_c_disc: FactorizableBandMatrix,
}

impl ConvectionDispersionOperator {
    pub fn new() -> Self {
        Self {
            n_comp: 0,
            n_col: 0,
            col_length: Active::new(0.0),
            velocity: Vec::new(),
            col_dispersion: Vec::new(),
            cur_section: 0,
            jac_c: BandMatrix::new(1, 0, 0),
            jac_c_disc: FactorizableBandMatrix::new(1, 0, 0),
        }
    }

    pub fn configure_model_discretization(
        &mut self,
        n_comp: usize,
        n_col: usize,
    ) -> Result<(), ChromsolError> {
        self.n_comp = n_comp;
        self.n_col = n_col;
        let n = n_col * n_comp;
        self.jac_c = BandMatrix::new(n, n_comp, n_comp);
        self.jac_c_disc = FactorizableBandMatrix::new(n, n_comp, n_comp);
        Ok(())
    }

    pub fn configure(&mut self, provider: &dyn ParameterProvider) -> Result<(), ChromsolError> {
        self.col_length = Active::new(provider.get_double("COL_LENGTH")?);
        if self.col_length.value() <= 0.0 {
            return Err(config_error!(InvalidValue {
                field: "COL_LENGTH".to_string(),
                reason: "column length must be positive".to_string(),
            }));
        }
        let velocity = provider.get_double_array("VELOCITY")?;
        if velocity.is_empty() {
            return Err(config_error!(TooFewElements {
                field: "VELOCITY".to_string(),
                expected: 1,
            }));
        }
        self.velocity = velocity.iter().map(|v| Active::new(*v)).collect();
        // reuse the component/section reader with a single "type"
        let (disp, _mode) = read_comp_type_sec_param(provider, "COL_DISPERSION", 1, self.n_comp)?;
        self.col_dispersion = disp;
        Ok(())
    }

    pub fn column_length(&self) -> &Active {
        &self.col_length
    }

    fn velocity_at(&self, sec: usize) -> &Active {
        &self.velocity[sec.min(self.velocity.len() - 1)]
    }

    /// Signed interstitial velocity of the current section.
    pub fn current_velocity(&self) -> f64 {
        self.velocity_at(self.cur_section).value()
    }

    /// Updates the section index; returns whether the flow direction changed
    /// (always true on the first section, which forces the initial inlet
    /// Jacobian assembly).
    pub fn notify_discontinuous_section_transition(&mut self, _t: f64, sec: usize) -> bool {
        let old_sign = self.current_velocity() >= 0.0;
        self.cur_section = sec;
        let new_sign = self.current_velocity() >= 0.0;
        sec == 0 || old_sign != new_sign
    }

    /// Bulk residual over the column; `y` and `res` are full state vectors
    /// (inlet DOFs at the front, bulk DOFs following). Writes only bulk rows.
    pub fn residual<T: ModelScalar, L: ParamLift<T>>(
        &mut self,
        _t: f64,
        sec: usize,
        y: &[T],
        ydot: Option<&[f64]>,
        res: &mut [T],
        want_jac: bool,
    ) {
        let n_comp = self.n_comp;
        let n_col = self.n_col;
        let offset_c = n_comp;
        let Self {
            ref velocity,
            ref col_dispersion,
            ref col_length,
            ref mut jac_c,
            ..
        } = *self;

        let u_active = &velocity[sec.min(velocity.len() - 1)];
        let forward = u_active.value() >= 0.0;
        let u: T = L::lift(u_active);
        let h: T = L::lift(col_length) / T::from_re(n_col as f64);
        let disp = section_dependent_slice(col_dispersion, n_comp, sec);
        let u_over_h = u / h.clone();
        let inv_h2 = T::one() / (h.clone() * h);

        let u_v = u_active.value();
        let h_v = col_length.value() / n_col as f64;

        if want_jac {
            jac_c.set_all(0.0);
        }

        for col in 0..n_col {
            for comp in 0..n_comp {
                let row = col * n_comp + comp;
                let idx = offset_c + row;
                let d: T = L::lift(&disp[comp]);
                let d_v = disp[comp].value();

                let mut r = match ydot {
                    Some(yd) => T::from_re(yd[idx]),
                    None => T::zero(),
                };

                // upwind convective difference; the inlet DOF supplies the
                // upstream value of the boundary cell
                if forward {
                    let upstream = if col == 0 { comp } else { idx - n_comp };
                    r += u_over_h.clone() * (y[idx].clone() - y[upstream].clone());
                } else {
                    let downstream = if col == n_col - 1 { comp } else { idx + n_comp };
                    r -= u_over_h.clone() * (y[idx].clone() - y[downstream].clone());
                }

                // dispersive exchange with the axial neighbors
                if col > 0 {
                    r += d.clone() * inv_h2.clone() * (y[idx].clone() - y[idx - n_comp].clone());
                }
                if col < n_col - 1 {
                    r += d.clone() * inv_h2.clone() * (y[idx].clone() - y[idx + n_comp].clone());
                }
                res[idx] = r;

                if want_jac {
                    let mut jr = jac_c.row_mut(row);
                    let d_h2 = d_v / (h_v * h_v);
                    if forward {
                        jr[0] += u_v / h_v;
                        if col > 0 {
                            jr[-(n_comp as isize)] += -u_v / h_v;
                        }
                    } else {
                        jr[0] += -u_v / h_v;
                        if col < n_col - 1 {
                            jr[n_comp as isize] += u_v / h_v;
                        }
                    }
                    if col > 0 {
                        jr[0] += d_h2;
                        jr[-(n_comp as isize)] += -d_h2;
                    }
                    if col < n_col - 1 {
                        jr[0] += d_h2;
                        jr[n_comp as isize] += -d_h2;
                    }
                }
            }
        }
    }

    /// `ret = dF/dydot * sdot` on the bulk rows (identity mass).
    pub fn multiply_with_derivative_jacobian(&self, sdot: &[f64], ret: &mut [f64]) {
        let offset_c = self.n_comp;
        let n = self.n_col * self.n_comp;
        ret[offset_c..offset_c + n].copy_from_slice(&sdot[offset_c..offset_c + n]);
    }

    pub fn jacobian(&self) -> &BandMatrix {
        &self.jac_c
    }

    /// Cursor on one row of the banded bulk Jacobian, used by the unit to
    /// add bulk reaction contributions.
    pub fn jacobian_row_mut(&mut self, row: usize) -> crate::matrix::RowMut<'_> {
        self.jac_c.row_mut(row)
    }

    pub fn required_ad_dirs(&self) -> usize {
        self.jac_c.stride()
    }

    /// Seeds the bulk DOFs of the dual state for band compression.
    pub fn prepare_ad_vectors(&self, ad_y: &mut [Active], dir_offset: usize) {
        let offset_c = self.n_comp;
        let n = self.n_col * self.n_comp;
        prepare_band_seed_vectors(
            &mut ad_y[offset_c..offset_c + n],
            dir_offset,
            self.jac_c.lower_bandwidth(),
            self.jac_c.upper_bandwidth(),
        );
    }

    pub fn extract_jacobian_from_ad(&mut self, ad_res: &[Active], dir_offset: usize) {
        let offset_c = self.n_comp;
        let n = self.n_col * self.n_comp;
        extract_banded_jacobian(&ad_res[offset_c..offset_c + n], dir_offset, &mut self.jac_c);
    }

    /// Maximum absolute deviation between the stored analytic Jacobian and
    /// the AD residual of the bulk block.
    pub fn check_analytic_jacobian_against_ad(&self, ad_res: &[Active], dir_offset: usize) -> f64 {
        let offset_c = self.n_comp;
        let n = self.n_col * self.n_comp;
        compare_banded_jacobian(&ad_res[offset_c..offset_c + n], dir_offset, &self.jac_c)
    }

    /// Rebuilds the factorizable bulk block as `J_c + alpha * I` and
    /// factorizes it.
    pub fn assemble_and_factorize(&mut self, alpha: f64) -> Result<(), ChromsolError> {
        self.jac_c_disc.copy_from(&self.jac_c);
        for row in 0..self.n_col * self.n_comp {
            self.jac_c_disc.add_diagonal(row, alpha);
        }
        self.jac_c_disc.factorize()
    }

    /// Back-solves the factorized bulk block in place; `rhs` holds the bulk
    /// rows only.
    pub fn solve_bulk(&self, rhs: &mut [f64]) -> Result<(), ChromsolError> {
        self.jac_c_disc.solve(rhs)
    }

    pub fn set_parameter(&mut self, pid: &ParamId, value: f64) -> bool {
        if pid.name == hash_string("COL_LENGTH") {
            self.col_length.set_value(value);
            return true;
        }
        if pid.name == hash_string("VELOCITY") {
            match pid.section {
                Some(sec) if sec < self.velocity.len() => self.velocity[sec].set_value(value),
                Some(_) => return false,
                None => self.velocity.iter_mut().for_each(|v| v.set_value(value)),
            }
            return true;
        }
        if pid.name == hash_string("COL_DISPERSION") {
            let n_comp = self.n_comp;
            let n_sec = self.col_dispersion.len() / n_comp;
            let comps: Vec<usize> = match pid.component {
                Some(c) if c < n_comp => vec![c],
                Some(_) => return false,
                None => (0..n_comp).collect(),
            };
            let secs: Vec<usize> = match pid.section {
                Some(s) if s < n_sec => vec![s],
                Some(_) => return false,
                None => (0..n_sec).collect(),
            };
            for s in &secs {
                for c in &comps {
                    self.col_dispersion[s * n_comp + c].set_value(value);
                }
            }
            return true;
        }
        false
    }

    pub fn set_sensitive_parameter(
        &mut self,
        pid: &ParamId,
        ad_direction: usize,
        ad_value: f64,
    ) -> bool {
        if pid.name == hash_string("COL_LENGTH") {
            self.col_length.set_grad(ad_direction, ad_value);
            return true;
        }
        if pid.name == hash_string("VELOCITY") {
            match pid.section {
                Some(sec) if sec < self.velocity.len() => {
                    self.velocity[sec].set_grad(ad_direction, ad_value)
                }
                Some(_) => return false,
                None => self
                    .velocity
                    .iter_mut()
                    .for_each(|v| v.set_grad(ad_direction, ad_value)),
            }
            return true;
        }
        if pid.name == hash_string("COL_DISPERSION") {
            let n_comp = self.n_comp;
            for (i, d) in self.col_dispersion.iter_mut().enumerate() {
                let comp_ok = pid.component.map_or(true, |c| c == i % n_comp);
                let sec_ok = pid.section.map_or(true, |s| s == i / n_comp);
                if comp_ok && sec_ok {
                    d.set_grad(ad_direction, ad_value);
                }
            }
            return true;
        }
        false
    }
}

impl Default for ConvectionDispersionOperator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar::ByValue;
    use approx::assert_relative_eq;

    fn configured(velocity: Vec<f64>) -> ConvectionDispersionOperator {
        let mut op = ConvectionDispersionOperator::new();
        op.configure_model_discretization(2, 5).unwrap();
        let mut pp = crate::params::InMemoryParameterProvider::new();
        pp.add("COL_LENGTH", 1.0)
            .add("VELOCITY", velocity)
            .add("COL_DISPERSION", vec![1e-3, 2e-3]);
        op.configure(&pp).unwrap();
        op
    }

    fn random_state(n: usize, seed: u64) -> Vec<f64> {
        let mut s = seed;
        (0..n)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((s >> 33) as f64) / ((1u64 << 31) as f64)
            })
            .collect()
    }

    fn check_jacobian_against_ad(velocity: Vec<f64>) {
        let mut op = configured(velocity);
        let n_dofs = 2 + 5 * 2;
        let y = random_state(n_dofs, 7);

        let mut res = vec![0.0; n_dofs];
        op.residual::<f64, ByValue>(0.0, 0, &y, None, &mut res, true);

        let mut ad_y: Vec<Active> = y.iter().map(|v| Active::new(*v)).collect();
        op.prepare_ad_vectors(&mut ad_y, 0);
        let mut ad_res = vec![Active::new(0.0); n_dofs];
        op.residual::<Active, ByValue>(0.0, 0, &ad_y, None, &mut ad_res, false);

        assert!(op.check_analytic_jacobian_against_ad(&ad_res, 0) < 1e-12);
    }

    #[test]
    fn analytic_jacobian_matches_ad_forward_flow() {
        check_jacobian_against_ad(vec![0.5]);
    }

    #[test]
    fn analytic_jacobian_matches_ad_backward_flow() {
        check_jacobian_against_ad(vec![-0.5]);
    }

    #[test]
    fn flow_reversal_is_flagged() {
        let mut op = configured(vec![0.5, -0.5, -0.25]);
        assert!(op.notify_discontinuous_section_transition(0.0, 0));
        assert_relative_eq!(op.current_velocity(), 0.5);
        assert!(op.notify_discontinuous_section_transition(1.0, 1));
        assert_relative_eq!(op.current_velocity(), -0.5);
        // same sign again: no reversal
        assert!(!op.notify_discontinuous_section_transition(2.0, 2));
    }

    #[test]
    fn steady_uniform_state_has_zero_transport_residual() {
        let mut op = configured(vec![0.5]);
        let n_dofs = 2 + 5 * 2;
        // inlet equal to a spatially constant bulk profile
        let mut y = vec![0.0; n_dofs];
        for c in y.iter_mut().step_by(2) {
            *c = 3.0;
        }
        for c in y.iter_mut().skip(1).step_by(2) {
            *c = 1.5;
        }
        let mut res = vec![0.0; n_dofs];
        op.residual::<f64, ByValue>(0.0, 0, &y, None, &mut res, false);
        for r in &res[2..] {
            assert_relative_eq!(*r, 0.0, epsilon = 1e-14);
        }
    }
}
