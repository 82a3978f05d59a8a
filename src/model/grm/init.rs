//! Consistent initialization of the DAE state.
//!
//! A consistent pair `(y0, ydot0)` satisfies `F(t0, y0, ydot0) = 0` with all
//! algebraic constraints met exactly: inlet identities, flux equations and
//! quasi-stationary binding equilibria. The full algorithm solves the
//! binding equilibria with a damped Newton per shell, computes the flux
//! DOFs explicitly, and recovers the dynamic time derivatives through the
//! mass matrix. The lean variant skips the binding solves and is meant for
//! restarts across section transitions where only the flow field jumped.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::ChromsolError;
use crate::matrix::BandMatrix;
use crate::model::indexer::Indexer;
use crate::model::{ColumnPosition, Workspace};
use crate::non_linear_solver_error;
use crate::scalar::Active;

use super::GeneralRateModel;

/// Damping by step halving, up to this many times per Newton iteration.
const MAX_LINE_SEARCH: usize = 8;
const MAX_NEWTON_ITER: usize = 50;
/// Safety factor applied to the integrator error tolerance.
const INIT_TOL_SAFETY: f64 = 1e-2;

impl GeneralRateModel {
    /// Phase 1: solves the algebraic state. Inlet DOFs take the upstream
    /// values, quasi-stationary bound states are brought onto the binding
    /// equilibrium manifold, and the flux DOFs are computed from the film
    /// equations.
    pub fn consistent_initial_state(
        &mut self,
        t: f64,
        sec: usize,
        y: &mut [f64],
        error_tol: f64,
    ) -> Result<(), ChromsolError> {
        let tol = (error_tol * INIT_TOL_SAFETY).max(1e-13);

        for c in 0..self.disc.n_comp {
            y[c] = self.inlet.as_ref().map_or(0.0, |f| f(t, c));
        }

        self.solve_quasi_stationary_states(t, sec, y, tol)?;
        self.solve_flux_dofs(sec, y);
        Ok(())
    }

    /// Lean phase 1: only inlet identities and flux equations.
    pub fn lean_consistent_initial_state(&mut self, t: f64, sec: usize, y: &mut [f64]) {
        for c in 0..self.disc.n_comp {
            y[c] = self.inlet.as_ref().map_or(0.0, |f| f(t, c));
        }
        self.solve_flux_dofs(sec, y);
    }

    fn solve_flux_dofs(&self, sec: usize, y: &mut [f64]) {
        let idx = Indexer::new(&self.disc);
        for t in 0..self.disc.n_par_type {
            let kf_fv = self.film_coefficients(t, sec);
            for k in 0..self.disc.n_col {
                for c in 0..self.disc.n_comp {
                    let bulk = y[idx.offset_c() + k * idx.stride_col_cell() + c];
                    let outer = y[idx.offset_cp_cell(t, k) + c];
                    y[idx.offset_jf_type(t) + k * self.disc.n_comp + c] =
                        kf_fv[c] * (bulk - outer);
                }
            }
        }
    }

    /// Damped Newton on the quasi-stationary rows of every particle shell.
    fn solve_quasi_stationary_states(
        &self,
        t: f64,
        sec: usize,
        y: &mut [f64],
        tol: f64,
    ) -> Result<(), ChromsolError> {
        let idx = Indexer::new(&self.disc);
        let mut ws = Workspace::new(self.thread_local_memory_size());

        for par_type in 0..self.disc.n_par_type {
            let binding = &*self.binding_models[self.binding_index[par_type]];
            if !binding.has_quasi_stationary_reactions() {
                continue;
            }
            let qs = binding.reaction_quasi_stationarity();
            let n_comp = self.disc.n_comp;
            let stride_bound = self.disc.stride_bound[par_type];
            let shell = n_comp + stride_bound;
            let mask: Vec<usize> = (0..stride_bound).filter(|b| qs[*b]).collect();

            let geo_lo = self.disc.n_par_cells_before_type[par_type];
            for k in 0..self.disc.n_col {
                let z = (0.5 + k as f64) / self.disc.n_col as f64;
                for s in 0..self.disc.n_par_cell[par_type] {
                    let pos = ColumnPosition {
                        z,
                        r: self.geometry.center_radius[geo_lo + s].value()
                            / self.par_radius[par_type].value(),
                    };
                    let lo = idx.offset_cp_shell(par_type, k, s);
                    let cell = &mut y[lo..lo + shell];
                    solve_cell_equilibrium(
                        binding, t, sec, &pos, cell, &mask, n_comp, stride_bound, tol, &mut ws,
                    )
                    .map_err(|err| {
                        debug!(
                            par_type,
                            col_cell = k,
                            shell = s,
                            "consistent initialization Newton failed"
                        );
                        err
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Phases 2 and 3: evaluates `F(t0, y0, 0)` and inverts the mass matrix
    /// on the dynamic rows; algebraic rows receive zero.
    pub fn consistent_initial_time_derivative(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: &mut [f64],
    ) -> i32 {
        let mut res = vec![0.0; self.disc.num_dofs()];
        let status = self.residual(t, sec, y, None, &mut res);
        if status != 0 {
            return status;
        }
        self.invert_mass_matrix(&res, ydot);
        0
    }

    /// Lean variant: recomputes bulk time derivatives only.
    pub fn lean_consistent_initial_time_derivative(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: &mut [f64],
    ) -> i32 {
        let mut res = vec![0.0; self.disc.num_dofs()];
        let status = self.residual(t, sec, y, None, &mut res);
        if status != 0 {
            return status;
        }
        let idx = Indexer::new(&self.disc);
        let n_bulk = self.disc.n_col * self.disc.n_comp;
        for i in 0..n_bulk {
            ydot[idx.offset_c() + i] = -res[idx.offset_c() + i];
        }
        ydot[..self.disc.n_comp].fill(0.0);
        ydot[idx.offset_jf()..].fill(0.0);
        0
    }

    /// Full consistent initialization: algebraic state, then dynamic
    /// time derivatives.
    pub fn consistent_initialization(
        &mut self,
        t: f64,
        sec: usize,
        y: &mut [f64],
        ydot: &mut [f64],
        error_tol: f64,
    ) -> Result<(), ChromsolError> {
        self.consistent_initial_state(t, sec, y, error_tol)?;
        let status = self.consistent_initial_time_derivative(t, sec, y, ydot);
        if status != 0 {
            return Err(non_linear_solver_error!(LinearSolveFailed));
        }
        Ok(())
    }

    /// `ydot = -M^-1 rhs` on dynamic rows, zero on algebraic rows. `rhs` is
    /// a residual evaluated at `ydot = 0`.
    fn invert_mass_matrix(&self, rhs: &[f64], ydot: &mut [f64]) {
        let idx = Indexer::new(&self.disc);
        let n_bulk = self.disc.n_col * self.disc.n_comp;
        for i in 0..n_bulk {
            ydot[idx.offset_c() + i] = -rhs[idx.offset_c() + i];
        }

        for par_type in 0..self.disc.n_par_type {
            let base = par_type * self.disc.n_comp;
            let qs = self.binding_models[self.binding_index[par_type]].reaction_quasi_stationarity();
            let eps = self.par_porosity[par_type].value();
            for k in 0..self.disc.n_col {
                for s in 0..self.disc.n_par_cell[par_type] {
                    let lo = idx.offset_cp_shell(par_type, k, s);
                    // dynamic bound states first, the mobile phase needs them
                    for bnd in 0..self.disc.stride_bound[par_type] {
                        ydot[lo + self.disc.n_comp + bnd] = if qs[bnd] {
                            0.0
                        } else {
                            -rhs[lo + self.disc.n_comp + bnd]
                        };
                    }
                    for c in 0..self.disc.n_comp {
                        let inv_beta = (1.0 - eps) / (eps * self.pore_access[base + c].value());
                        let mut qdot_sum = 0.0;
                        for b in 0..self.disc.n_bound[base + c] {
                            qdot_sum +=
                                ydot[lo + self.disc.n_comp + self.disc.bound_offset[base + c] + b];
                        }
                        ydot[lo + c] = -rhs[lo + c] - inv_beta * qdot_sum;
                    }
                }
            }
        }

        ydot[..self.disc.n_comp].fill(0.0);
        ydot[idx.offset_jf()..].fill(0.0);
    }

    /// Consistent initialization of one forward sensitivity direction:
    /// solves the algebraic rows with `-dF/dp` on the right-hand side and
    /// recovers the dynamic sensitivity derivatives through the mass matrix.
    ///
    /// The Jacobian blocks must be current at `(t, y, ydot)`; this routine
    /// refreshes them itself before solving.
    #[allow(clippy::too_many_arguments)]
    pub fn consistent_initial_sensitivity(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: &[f64],
        s_y: &mut [f64],
        s_ydot: &mut [f64],
        param_dir: usize,
    ) -> Result<(), ChromsolError> {
        let n = self.disc.num_dofs();
        let mut scratch = vec![0.0; n];
        let status = self.residual_with_jacobian(t, sec, y, Some(ydot), &mut scratch);
        if status != 0 {
            return Err(non_linear_solver_error!(LinearSolveFailed));
        }

        // one dual pass for dF/dp
        self.ensure_ad_vectors();
        let mut ad_y = std::mem::take(&mut self.ad_y);
        let mut ad_res = std::mem::take(&mut self.ad_res);
        crate::jacobian::copy_values_to_ad(y, &mut ad_y);
        for r in ad_res.iter_mut() {
            *r = Active::new(0.0);
        }
        let status = self.residual_impl::<Active, crate::scalar::WithGradient>(
            t,
            sec,
            &ad_y,
            Some(ydot),
            &mut ad_res,
            false,
        );
        let dfdp: Vec<f64> = ad_res.iter().map(|r| r.grad(param_dir)).collect();
        self.ad_y = ad_y;
        self.ad_res = ad_res;
        if status != 0 {
            return Err(non_linear_solver_error!(LinearSolveFailed));
        }

        let idx = Indexer::new(&self.disc);

        // inlet rows: s + dF/dp = 0
        for c in 0..self.disc.n_comp {
            s_y[c] = -dfdp[c];
        }

        // quasi-stationary rows: banded row of the particle Jacobian against
        // the known sensitivities, solved for the masked columns per shell
        for par_type in 0..self.disc.n_par_type {
            let binding = &*self.binding_models[self.binding_index[par_type]];
            if !binding.has_quasi_stationary_reactions() {
                continue;
            }
            let qs = binding.reaction_quasi_stationarity();
            let n_comp = self.disc.n_comp;
            let shell = idx.stride_par_shell(par_type);
            let mask: Vec<usize> = (0..self.disc.stride_bound[par_type])
                .filter(|b| qs[*b])
                .map(|b| n_comp + b)
                .collect();

            for k in 0..self.disc.n_col {
                let jac = &self.jac_p[par_type * self.disc.n_col + k];
                let block_lo = idx.offset_cp_cell(par_type, k);
                for s in 0..self.disc.n_par_cell[par_type] {
                    let row0 = s * shell;
                    solve_masked_rows(
                        jac,
                        block_lo,
                        row0,
                        &mask,
                        &dfdp,
                        s_y,
                    )?;
                }
            }
        }

        // flux rows are linear: s_f = kf (s_c - s_cp) - dF/dp
        for par_type in 0..self.disc.n_par_type {
            let kf_fv = self.film_coefficients(par_type, sec);
            for k in 0..self.disc.n_col {
                for c in 0..self.disc.n_comp {
                    let eq = idx.offset_jf_type(par_type) + k * self.disc.n_comp + c;
                    let s_bulk = s_y[idx.offset_c() + k * idx.stride_col_cell() + c];
                    let s_outer = s_y[idx.offset_cp_cell(par_type, k) + c];
                    s_y[eq] = kf_fv[c] * (s_bulk - s_outer) - dfdp[eq];
                }
            }
        }

        // dynamic derivatives: M s_ydot = -(J s + dF/dp)
        let mut tmp = dfdp;
        self.multiply_with_jacobian(s_y, 1.0, 1.0, &mut tmp);
        self.invert_mass_matrix(&tmp, s_ydot);
        Ok(())
    }
}

/// Solves the masked (quasi-stationary) rows of one shell for the masked
/// columns, holding all other sensitivities fixed.
fn solve_masked_rows(
    jac: &BandMatrix,
    block_lo: usize,
    row0: usize,
    mask: &[usize],
    dfdp: &[f64],
    s_y: &mut [f64],
) -> Result<(), ChromsolError> {
    let n_mask = mask.len();
    if n_mask == 0 {
        return Ok(());
    }
    let mut a = DMatrix::zeros(n_mask, n_mask);
    let mut b = DVector::zeros(n_mask);
    for (mi, m_row) in mask.iter().enumerate() {
        let row = row0 + m_row;
        let mut rhs = -dfdp[block_lo + row];
        let lo = row.saturating_sub(jac.lower_bandwidth());
        let hi = (row + jac.upper_bandwidth()).min(jac.rows() - 1);
        for col in lo..=hi {
            let v = jac.get(row, col as isize - row as isize);
            if v == 0.0 {
                continue;
            }
            // a masked column of the same shell is an unknown, everything
            // else is known
            if col >= row0 && col < row0 + mask[n_mask - 1] + 1 && mask.contains(&(col - row0)) {
                let mj = mask.iter().position(|m| *m == col - row0).unwrap();
                a[(mi, mj)] = v;
            } else {
                rhs -= v * s_y[block_lo + col];
            }
        }
        b[mi] = rhs;
    }
    let solved = a
        .lu()
        .solve(&b)
        .ok_or_else(|| non_linear_solver_error!(LinearSolveFailed))?;
    for (mi, m_row) in mask.iter().enumerate() {
        s_y[block_lo + row0 + m_row] = solved[mi];
    }
    Ok(())
}

/// Damped Newton for the quasi-stationary bound states of one shell, with
/// the mobile phase held fixed.
#[allow(clippy::too_many_arguments)]
fn solve_cell_equilibrium(
    binding: &dyn crate::model::binding::BindingModel,
    t: f64,
    sec: usize,
    pos: &ColumnPosition,
    cell: &mut [f64],
    mask: &[usize],
    n_comp: usize,
    stride_bound: usize,
    tol: f64,
    ws: &mut Workspace,
) -> Result<(), ChromsolError> {
    let n_mask = mask.len();
    if n_mask == 0 {
        return Ok(());
    }
    let shell = n_comp + stride_bound;

    let residual_norm = |cell: &[f64], ws: &mut Workspace| -> (Vec<f64>, f64) {
        let mut res = vec![0.0; stride_bound];
        binding.flux_value(t, sec, pos, cell, &mut res, ws);
        let norm = mask
            .iter()
            .map(|b| res[*b].abs())
            .fold(0.0f64, f64::max);
        (res, norm)
    };

    let (mut res, mut norm) = residual_norm(cell, ws);
    for _ in 0..MAX_NEWTON_ITER {
        if norm <= tol {
            return Ok(());
        }

        // analytic Jacobian of the binding flux through a fully-banded
        // scratch block, reduced to the masked square system
        let mut scratch = BandMatrix::new(shell, shell - 1, shell - 1);
        {
            let mut row = scratch.row_mut(n_comp);
            binding.analytic_jacobian(t, sec, pos, cell, &mut row, ws);
        }
        let mut a = DMatrix::zeros(n_mask, n_mask);
        let mut b = DVector::zeros(n_mask);
        for (mi, m_row) in mask.iter().enumerate() {
            for (mj, m_col) in mask.iter().enumerate() {
                let row = n_comp + m_row;
                let col = n_comp + m_col;
                a[(mi, mj)] = scratch.get(row, col as isize - row as isize);
            }
            b[mi] = res[*m_row];
        }
        let delta = a
            .lu()
            .solve(&b)
            .ok_or_else(|| non_linear_solver_error!(LinearSolveFailed))?;

        // step halving until the residual norm improves
        let mut alpha = 1.0;
        let mut accepted = false;
        let backup: Vec<f64> = mask.iter().map(|b| cell[n_comp + b]).collect();
        for _ in 0..=MAX_LINE_SEARCH {
            for (mi, m_row) in mask.iter().enumerate() {
                cell[n_comp + m_row] = backup[mi] - alpha * delta[mi];
            }
            let (res_new, norm_new) = residual_norm(cell, ws);
            if norm_new < norm || norm_new <= tol {
                res = res_new;
                norm = norm_new;
                accepted = true;
                break;
            }
            alpha *= 0.5;
        }
        if !accepted {
            return Err(non_linear_solver_error!(NewtonDidNotConverge));
        }
    }
    if norm <= tol {
        Ok(())
    } else {
        Err(non_linear_solver_error!(NewtonDidNotConverge))
    }
}
