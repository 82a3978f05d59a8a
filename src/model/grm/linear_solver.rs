//! Schur-complement solution of the block-structured Newton system.
//!
//! The Newton matrix at rate `alpha` couples the factorizable bulk block,
//! the block-diagonal particle systems and the identity flux block:
//!
//! ```text
//! [ J_c     0       J_cf ]
//! [ 0       J_p     J_pf ]
//! [ J_fc    J_fp    I    ]
//! ```
//!
//! Eliminating bulk and particles leaves the Schur complement
//! `S = I - J_fc J_c^-1 J_cf - J_fp J_p^-1 J_pf` on the flux DOFs, solved
//! matrix-free by restarted GMRES; every operator application costs one
//! back-solve against `J_c` and one against each particle block.

use tracing::debug;

use crate::model::cell::add_time_derivative_to_jacobian_cell;
use crate::model::indexer::Indexer;

use super::GeneralRateModel;

impl GeneralRateModel {
    /// Folds `alpha * dF/dydot` into copies of the diagonal Jacobian blocks
    /// and factorizes them. The Jacobian blocks themselves must have been
    /// populated by a preceding `residual_with_jacobian` call.
    pub fn assemble_and_factorize(&mut self, alpha: f64) -> i32 {
        if self.conv_disp.assemble_and_factorize(alpha).is_err() {
            debug!("bulk block factorization failed");
            return 1;
        }

        for t in 0..self.disc.n_par_type {
            let base = t * self.disc.n_comp;
            let n_bound = &self.disc.n_bound[base..base + self.disc.n_comp];
            let bound_offset = &self.disc.bound_offset[base..base + self.disc.n_comp];
            let qs = self.binding_models[self.binding_index[t]].reaction_quasi_stationarity();
            let inv_beta: Vec<f64> = (0..self.disc.n_comp)
                .map(|c| {
                    let eps = self.par_porosity[t].value();
                    (1.0 - eps) / (eps * self.pore_access[base + c].value())
                })
                .collect();
            let shell = self.disc.n_comp + self.disc.stride_bound[t];

            for k in 0..self.disc.n_col {
                let pblk = t * self.disc.n_col + k;
                let (jac_p, jac_p_disc) = (&self.jac_p[pblk], &mut self.jac_p_disc[pblk]);
                jac_p_disc.copy_from(jac_p);
                for s in 0..self.disc.n_par_cell[t] {
                    add_time_derivative_to_jacobian_cell(
                        jac_p_disc,
                        s * shell,
                        alpha,
                        self.disc.n_comp,
                        n_bound,
                        bound_offset,
                        self.disc.stride_bound[t],
                        qs,
                        &inv_beta,
                    );
                }
                if jac_p_disc.factorize().is_err() {
                    debug!(par_type = t, col_cell = k, "particle block factorization failed");
                    return 1;
                }
            }
        }
        self.factorize_jacobian = false;
        0
    }

    /// Applies the Schur complement to a flux-sized vector.
    fn schur_complement_matvec(&self, x: &[f64], z: &mut [f64]) {
        let idx = Indexer::new(&self.disc);
        let n_bulk = self.disc.n_col * self.disc.n_comp;

        z.copy_from_slice(x);

        let mut tmp_bulk = vec![0.0; n_bulk];
        self.jac_cf.multiply_add(x, &mut tmp_bulk, 1.0);
        if self.conv_disp.solve_bulk(&mut tmp_bulk).is_ok() {
            self.jac_fc.multiply_add(&tmp_bulk, z, -1.0);
        }

        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let pblk = t * self.disc.n_col + k;
                let mut tmp_p = vec![0.0; idx.stride_par_block(t)];
                self.jac_pf[pblk].multiply_add(x, &mut tmp_p, 1.0);
                if self.jac_p_disc[pblk].solve(&mut tmp_p).is_ok() {
                    self.jac_fp[pblk].multiply_add(&tmp_p, z, -1.0);
                }
            }
        }
    }

    /// Solves the Newton system at rate `alpha` for `rhs` in place.
    ///
    /// Returns 0 on success and a positive (recoverable) status when the
    /// factorization or the Schur GMRES iteration fails; the integrator is
    /// expected to shrink the step and retry.
    pub fn linear_solve(&mut self, _t: f64, alpha: f64, outer_tol: f64, rhs: &mut [f64]) -> i32 {
        let n_comp = self.disc.n_comp;
        let n_bulk = self.disc.n_col * n_comp;

        if self.factorize_jacobian {
            let status = self.assemble_and_factorize(alpha);
            if status != 0 {
                return status;
            }
        }

        let idx = Indexer::new(&self.disc);
        let offset_c = idx.offset_c();
        let offset_jf = idx.offset_jf();

        // inlet block is the identity; its solution feeds the bulk rhs
        let inlet_values: Vec<f64> = rhs[..n_comp].to_vec();
        self.jac_inlet
            .multiply_add(&inlet_values, &mut rhs[offset_c..offset_c + n_bulk], -1.0);

        // forward elimination of bulk and particle blocks
        if self
            .conv_disp
            .solve_bulk(&mut rhs[offset_c..offset_c + n_bulk])
            .is_err()
        {
            return 1;
        }
        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let lo = idx.offset_cp_cell(t, k);
                let hi = lo + idx.stride_par_block(t);
                if self.jac_p_disc[t * self.disc.n_col + k]
                    .solve(&mut rhs[lo..hi])
                    .is_err()
                {
                    return 1;
                }
            }
        }

        // reduce the flux right-hand side
        {
            let (front, rhs_f) = rhs.split_at_mut(offset_jf);
            self.jac_fc
                .multiply_add(&front[offset_c..offset_c + n_bulk], rhs_f, -1.0);
            for t in 0..self.disc.n_par_type {
                for k in 0..self.disc.n_col {
                    let lo = idx.offset_cp_cell(t, k);
                    let hi = lo + idx.stride_par_block(t);
                    self.jac_fp[t * self.disc.n_col + k].multiply_add(&front[lo..hi], rhs_f, -1.0);
                }
            }
        }

        // Schur-complement solve on the flux DOFs
        let n_flux = self.disc.num_dofs() - offset_jf;
        let mut x_f = vec![0.0; n_flux];
        let tol = (outer_tol * self.schur_safety).max(f64::EPSILON);
        let stats = {
            let this = &*self;
            let gmres = &this.gmres;
            gmres.solve(
                |x, z| this.schur_complement_matvec(x, z),
                &rhs[offset_jf..],
                &mut x_f,
                tol,
            )
        };
        match stats {
            Ok(stats) => {
                debug!(
                    iterations = stats.iterations,
                    residual = stats.residual_norm,
                    "Schur complement solved"
                );
            }
            Err(err) => {
                debug!(%err, "Schur complement GMRES failed");
                return 1;
            }
        }
        rhs[offset_jf..].copy_from_slice(&x_f);

        // back-substitution: propagate the flux solution into bulk and
        // particle unknowns
        let mut tmp_bulk = vec![0.0; n_bulk];
        self.jac_cf.multiply_add(&x_f, &mut tmp_bulk, 1.0);
        if self.conv_disp.solve_bulk(&mut tmp_bulk).is_err() {
            return 1;
        }
        for (dst, src) in rhs[offset_c..offset_c + n_bulk].iter_mut().zip(&tmp_bulk) {
            *dst -= src;
        }

        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let pblk = t * self.disc.n_col + k;
                let lo = idx.offset_cp_cell(t, k);
                let hi = lo + idx.stride_par_block(t);
                let mut tmp_p = vec![0.0; hi - lo];
                self.jac_pf[pblk].multiply_add(&x_f, &mut tmp_p, 1.0);
                if self.jac_p_disc[pblk].solve(&mut tmp_p).is_err() {
                    return 1;
                }
                for (dst, src) in rhs[lo..hi].iter_mut().zip(&tmp_p) {
                    *dst -= src;
                }
            }
        }
        0
    }
}
