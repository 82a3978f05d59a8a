//! Film-diffusion flux coupling between bulk, particle outer shells and the
//! flux DOFs, plus the assembly of the off-diagonal Jacobian blocks.
//!
//! The film coefficient is the series resistance of pore diffusion across
//! the outermost half-shell and the film layer:
//! `k_f^FV = 1 / ( (dr_0/2) / (eps_p F_acc D_p) + 1 / k_f )`.

use crate::model::cell::CellScalar;
use crate::model::indexer::Indexer;
use crate::params::section_dependent_slice;
use crate::scalar::ParamLift;

use super::GeneralRateModel;

impl GeneralRateModel {
    /// Discretized film coefficients of one particle type at one section,
    /// in plain numbers.
    pub(super) fn film_coefficients(&self, par_type: usize, sec: usize) -> Vec<f64> {
        let n_comp = self.disc.n_comp;
        let n_types = self.disc.n_par_type;
        let film = &section_dependent_slice(&self.film_diffusion, n_comp * n_types, sec)
            [par_type * n_comp..(par_type + 1) * n_comp];
        let pdiff = &section_dependent_slice(&self.par_diffusion, n_comp * n_types, sec)
            [par_type * n_comp..(par_type + 1) * n_comp];
        let pore_access = &section_dependent_slice(&self.pore_access, n_comp * n_types, sec)
            [par_type * n_comp..(par_type + 1) * n_comp];
        let eps_p = self.par_porosity[par_type].value();
        let half_shell =
            0.5 * self.geometry.cell_size[self.disc.n_par_cells_before_type[par_type]].value();
        (0..n_comp)
            .map(|c| {
                1.0 / (half_shell / (eps_p * pore_access[c].value() * pdiff[c].value())
                    + 1.0 / film[c].value())
            })
            .collect()
    }

    /// Flux residual: the identity block on the flux DOFs plus the four
    /// coupling contributions `J_cf`, `J_fc`, `J_pf`, `J_fp`.
    pub(super) fn residual_flux<T: CellScalar, L: ParamLift<T>>(
        &self,
        _t: f64,
        sec: usize,
        y: &[T],
        res: &mut [T],
    ) {
        let disc = &self.disc;
        let idx = Indexer::new(disc);
        let n_comp = disc.n_comp;
        let n_col = disc.n_col;
        let offset_c = idx.offset_c();
        let offset_jf = idx.offset_jf();

        let inv_beta_c: T = T::one() / L::lift(&self.col_porosity) - T::one();

        // J_f identity block
        for i in 0..n_col * n_comp * disc.n_par_type {
            res[offset_jf + i] = y[offset_jf + i].clone();
        }

        for t in 0..disc.n_par_type {
            let offset_jf_type = idx.offset_jf_type(t);
            let eps_p: T = L::lift(&self.par_porosity[t]);
            let film = &section_dependent_slice(&self.film_diffusion, n_comp * disc.n_par_type, sec)
                [t * n_comp..(t + 1) * n_comp];
            let pdiff = &section_dependent_slice(&self.par_diffusion, n_comp * disc.n_par_type, sec)
                [t * n_comp..(t + 1) * n_comp];
            let pore_access =
                &section_dependent_slice(&self.pore_access, n_comp * disc.n_par_type, sec)
                    [t * n_comp..(t + 1) * n_comp];

            let geo_lo = disc.n_par_cells_before_type[t];
            let surface_to_volume: T = T::from_re(3.0) / L::lift(&self.par_radius[t]);
            let outer_apv: T = L::lift(&self.geometry.outer_surf_area_per_volume[geo_lo]);
            let half_shell: T =
                T::from_re(0.5) * L::lift(&self.geometry.cell_size[geo_lo]);

            let jac_cf_val: T = inv_beta_c.clone() * surface_to_volume;
            let jac_pf_val: T = -(outer_apv / eps_p.clone());

            let kf_fv: Vec<T> = (0..n_comp)
                .map(|c| {
                    T::one()
                        / (half_shell.clone()
                            / (eps_p.clone() * L::lift(&pore_access[c]) * L::lift(&pdiff[c]))
                            + T::one() / L::lift(&film[c]))
                })
                .collect();

            // J_cf: flux enters the bulk equations
            for i in 0..n_col * n_comp {
                let col_cell = i / n_comp;
                let vol_frac: T = L::lift(&self.par_type_vol_frac[col_cell * disc.n_par_type + t]);
                res[offset_c + i] +=
                    jac_cf_val.clone() * vol_frac * y[offset_jf_type + i].clone();
            }

            // J_fc: bulk concentration drives the flux equation
            for k in 0..n_col {
                for c in 0..n_comp {
                    let eq = k * n_comp + c;
                    res[offset_jf_type + eq] -= kf_fv[c].clone() * y[offset_c + eq].clone();
                }
            }

            // J_pf: bead boundary condition in the outermost shell
            for k in 0..n_col {
                for c in 0..n_comp {
                    let eq = k * n_comp + c;
                    res[idx.offset_cp_cell(t, k) + c] += jac_pf_val.clone()
                        / L::lift(&pore_access[c])
                        * y[offset_jf_type + eq].clone();
                }
            }

            // J_fp: outer-shell concentration closes the flux equation
            for k in 0..n_col {
                for c in 0..n_comp {
                    let eq = k * n_comp + c;
                    res[offset_jf_type + eq] +=
                        kf_fv[c].clone() * y[idx.offset_cp_cell(t, k) + c].clone();
                }
            }
        }
    }

    /// Rebuilds the four off-diagonal sparse blocks for the given section.
    /// The `J_f` identity block is handled by the linear solver and never
    /// materialized.
    pub(super) fn assemble_offdiag_jac(&mut self, _t: f64, sec: usize) {
        let disc = self.disc.clone();
        let idx = Indexer::new(&disc);
        let n_comp = disc.n_comp;
        let n_col = disc.n_col;

        self.jac_cf.clear();
        self.jac_fc.clear();
        for pblk in 0..n_col * disc.n_par_type {
            self.jac_pf[pblk].clear();
            self.jac_fp[pblk].clear();
        }

        let inv_beta_c = 1.0 / self.col_porosity.value() - 1.0;

        for t in 0..disc.n_par_type {
            let type_offset = t * n_col * n_comp;
            let eps_p = self.par_porosity[t].value();
            let pore_access =
                &section_dependent_slice(&self.pore_access, n_comp * disc.n_par_type, sec)
                    [t * n_comp..(t + 1) * n_comp];
            let geo_lo = disc.n_par_cells_before_type[t];
            let surface_to_volume = 3.0 / self.par_radius[t].value();
            let outer_apv = self.geometry.outer_surf_area_per_volume[geo_lo].value();

            let jac_cf_val = inv_beta_c * surface_to_volume;
            let jac_pf_val = -outer_apv / eps_p;
            let kf_fv = self.film_coefficients(t, sec);

            for eq in 0..n_col * n_comp {
                let col_cell = eq / n_comp;
                self.jac_cf.add_element(
                    eq,
                    eq + type_offset,
                    jac_cf_val * self.par_type_vol_frac[col_cell * disc.n_par_type + t].value(),
                );
            }
            for k in 0..n_col {
                for c in 0..n_comp {
                    let eq = k * idx.stride_col_cell() + c;
                    self.jac_fc.add_element(eq + type_offset, eq, -kf_fv[c]);
                }
            }
            for k in 0..n_col {
                for c in 0..n_comp {
                    let eq = type_offset + k * n_comp + c;
                    self.jac_pf[t * n_col + k].add_element(
                        c,
                        eq,
                        jac_pf_val / pore_access[c].value(),
                    );
                    self.jac_fp[t * n_col + k].add_element(eq, c, kf_fv[c]);
                }
            }
        }
    }
}
