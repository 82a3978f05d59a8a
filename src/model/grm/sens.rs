//! Forward parameter sensitivities.
//!
//! The sensitivity residual of direction `p` is
//! `dF/dy * s + dF/dydot * sdot + dF/dp`: the two matrix actions reuse the
//! Jacobian infrastructure, and `dF/dp` comes from one dual-number pass
//! whose parameter directions sit below the band-compression directions.

use crate::scalar::{Active, WithGradient};

use super::GeneralRateModel;

impl GeneralRateModel {
    /// Evaluates `dF/dp` for all sensitive parameters in one dual pass; the
    /// result stays in the dual residual buffer for
    /// [`Self::residual_sens_fwd_combine`].
    pub fn residual_sens_fwd_ad_only(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: Option<&[f64]>,
    ) -> i32 {
        self.ensure_ad_vectors();
        let mut ad_y = std::mem::take(&mut self.ad_y);
        let mut ad_res = std::mem::take(&mut self.ad_res);
        crate::jacobian::copy_values_to_ad(y, &mut ad_y);
        for r in ad_res.iter_mut() {
            *r = Active::new(0.0);
        }
        let status =
            self.residual_impl::<Active, WithGradient>(t, sec, &ad_y, ydot, &mut ad_res, false);
        self.ad_y = ad_y;
        self.ad_res = ad_res;
        status
    }

    /// Evaluates the residual with parameter derivatives and updates the
    /// Jacobian in the same sweep (analytically, or from the band-seeded
    /// directions when AD Jacobians are configured).
    pub fn residual_sens_fwd_with_jacobian(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: Option<&[f64]>,
        res: Option<&mut [f64]>,
    ) -> i32 {
        self.factorize_jacobian = true;
        self.ensure_ad_vectors();
        let mut ad_y = std::mem::take(&mut self.ad_y);
        let mut ad_res = std::mem::take(&mut self.ad_res);
        crate::jacobian::copy_values_to_ad(y, &mut ad_y);
        for r in ad_res.iter_mut() {
            *r = Active::new(0.0);
        }
        let analytic = self.analytic_jac;
        let status = self.residual_impl::<Active, WithGradient>(
            t,
            sec,
            &ad_y,
            ydot,
            &mut ad_res,
            analytic,
        );
        if let Some(res) = res {
            crate::jacobian::copy_values_from_ad(&ad_res, res);
        }
        self.ad_y = ad_y;
        self.ad_res = ad_res;
        if !analytic {
            self.extract_jacobian_from_ad();
        }
        status
    }

    /// Completes the sensitivity residuals: for every parameter direction
    /// `p`, `res_s[p] = dF/dy * ys[p] + dF/dydot * ysdot[p] + dF/dp`.
    /// Requires a preceding [`Self::residual_sens_fwd_ad_only`] or
    /// [`Self::residual_sens_fwd_with_jacobian`] at the same point.
    pub fn residual_sens_fwd_combine(
        &self,
        ys: &[Vec<f64>],
        ysdot: &[Vec<f64>],
        res_s: &mut [Vec<f64>],
    ) -> i32 {
        debug_assert_eq!(ys.len(), ysdot.len());
        debug_assert_eq!(ys.len(), res_s.len());
        let n = self.disc.num_dofs();

        let combine = |param: usize, out: &mut Vec<f64>| {
            let mut jac_dir = vec![0.0; n];
            self.multiply_with_jacobian(&ys[param], 1.0, 0.0, &mut jac_dir);
            let mut mass_dir = vec![0.0; n];
            self.multiply_with_derivative_jacobian(&ysdot[param], &mut mass_dir);
            out.resize(n, 0.0);
            for i in 0..n {
                out[i] = jac_dir[i] + mass_dir[i] + self.ad_res[i].grad(param);
            }
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            res_s
                .par_iter_mut()
                .enumerate()
                .for_each(|(param, out)| combine(param, out));
        }
        #[cfg(not(feature = "parallel"))]
        {
            for (param, out) in res_s.iter_mut().enumerate() {
                combine(param, out);
            }
        }
        0
    }
}
