//! Shared particle-cell kernel: time derivatives, binding fluxes and
//! dynamic reactions of one shell, plus the matching mass-matrix kernels.
//!
//! The kernel operates on one shell record (`nComp` mobile-phase entries
//! followed by the bound states). Transport terms are added by the caller.
//! Dynamic bound states receive their time derivative here; quasi-stationary
//! bound states are algebraic and their residual is the binding flux alone.

use crate::matrix::{FactorizableBandMatrix, RowMut};
use crate::model::binding::BindingModel;
use crate::model::reaction::DynamicReactionModel;
use crate::model::{ColumnPosition, Workspace};
use crate::scalar::{Active, ModelScalar, ParamLift};

/// Routes the scalar-dependent plug-in calls to the matching monomorphic
/// entry points of the binding and reaction contracts.
pub trait CellScalar: ModelScalar {
    #[allow(clippy::too_many_arguments)]
    fn binding_flux(
        model: &dyn BindingModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Self],
        res: &mut [Self],
        with_param_grads: bool,
        ws: &mut Workspace,
    );

    #[allow(clippy::too_many_arguments)]
    fn reaction_liquid(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Self],
        res: &mut [Self],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    );

    #[allow(clippy::too_many_arguments)]
    fn reaction_combined(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Self],
        res: &mut [Self],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    );
}

impl CellScalar for f64 {
    fn binding_flux(
        model: &dyn BindingModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        _with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.flux_value(t, sec, pos, y, res, ws);
    }

    fn reaction_liquid(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        _with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.residual_liquid_value(t, sec, pos, y, res, factor, ws);
    }

    fn reaction_combined(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[f64],
        res: &mut [f64],
        factor: f64,
        _with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.residual_combined_value(t, sec, pos, y, res, factor, ws);
    }
}

impl CellScalar for Active {
    fn binding_flux(
        model: &dyn BindingModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.flux_dual(t, sec, pos, y, res, with_param_grads, ws);
    }

    fn reaction_liquid(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.residual_liquid_dual(t, sec, pos, y, res, factor, with_param_grads, ws);
    }

    fn reaction_combined(
        model: &dyn DynamicReactionModel,
        t: f64,
        sec: usize,
        pos: &ColumnPosition,
        y: &[Active],
        res: &mut [Active],
        factor: f64,
        with_param_grads: bool,
        ws: &mut Workspace,
    ) {
        model.residual_combined_dual(t, sec, pos, y, res, factor, with_param_grads, ws);
    }
}

/// Shell-invariant parameters of the cell kernel for one particle type.
pub struct CellParameters<'a> {
    pub n_comp: usize,
    pub n_bound: &'a [usize],
    pub bound_offset: &'a [usize],
    pub stride_bound: usize,
    pub qs_binding: &'a [bool],
    pub porosity: &'a Active,
    pub pore_access: &'a [Active],
    pub binding: &'a dyn BindingModel,
    pub reaction: Option<&'a dyn DynamicReactionModel>,
}

impl CellParameters<'_> {
    /// `(1 - eps_p) / (eps_p * F_acc)` of component `c`.
    #[inline]
    pub fn inv_beta_p<T: ModelScalar, L: ParamLift<T>>(&self, c: usize) -> T {
        let eps = L::lift(self.porosity);
        (T::one() - eps.clone()) / (eps * L::lift(&self.pore_access[c]))
    }
}

/// Accumulates time derivatives, binding fluxes and dynamic reactions of one
/// shell; transport terms are the caller's business. With `jac`, the
/// analytic contributions of binding and reactions are written through the
/// cursor, which must be centered on the shell's first mobile-phase row.
#[allow(clippy::too_many_arguments)]
pub fn residual_cell<T: CellScalar, L: ParamLift<T>>(
    t: f64,
    sec: usize,
    pos: &ColumnPosition,
    y: &[T],
    ydot: Option<&[f64]>,
    res: &mut [T],
    mut jac: Option<&mut RowMut<'_>>,
    p: &CellParameters<'_>,
    ws: &mut Workspace,
) {
    // time derivatives; the mobile phase carries the solid-phase hold-up of
    // all bound states of its component
    for c in 0..p.n_comp {
        res[c] = match ydot {
            Some(yd) => {
                let mut qdot_sum = 0.0;
                for b in 0..p.n_bound[c] {
                    qdot_sum += yd[p.n_comp + p.bound_offset[c] + b];
                }
                T::from_re(yd[c]) + p.inv_beta_p::<T, L>(c) * T::from_re(qdot_sum)
            }
            None => T::zero(),
        };
    }
    for bnd in 0..p.stride_bound {
        res[p.n_comp + bnd] = match ydot {
            Some(yd) if !p.qs_binding[bnd] => T::from_re(yd[p.n_comp + bnd]),
            _ => T::zero(),
        };
    }

    {
        let (_, res_solid) = res.split_at_mut(p.n_comp);
        T::binding_flux(p.binding, t, sec, pos, y, res_solid, L::WITH_GRADIENT, ws);
    }
    if let Some(reaction) = p.reaction {
        T::reaction_combined(reaction, t, sec, pos, y, res, -1.0, L::WITH_GRADIENT, ws);
    }

    if let Some(jac) = jac.take() {
        let y_values: Vec<f64> = y.iter().map(ModelScalar::re).collect();
        jac.advance(p.n_comp as isize);
        p.binding.analytic_jacobian(t, sec, pos, &y_values, jac, ws);
        jac.advance(-(p.n_comp as isize));
        if let Some(reaction) = p.reaction {
            reaction.analytic_jacobian_combined(t, sec, pos, &y_values, -1.0, jac, ws);
        }
    }
}

/// `ret = dF/dydot * sdot` for one shell: identity on the mobile phase plus
/// the solid hold-up couplings, identity on dynamic bound states, zero on
/// quasi-stationary rows.
#[allow(clippy::too_many_arguments)]
pub fn multiply_with_derivative_jacobian_cell(
    sdot: &[f64],
    ret: &mut [f64],
    n_comp: usize,
    n_bound: &[usize],
    bound_offset: &[usize],
    stride_bound: usize,
    qs_binding: &[bool],
    inv_beta_p: &[f64],
) {
    for c in 0..n_comp {
        let mut v = sdot[c];
        for b in 0..n_bound[c] {
            v += inv_beta_p[c] * sdot[n_comp + bound_offset[c] + b];
        }
        ret[c] = v;
    }
    for bnd in 0..stride_bound {
        ret[n_comp + bnd] = if qs_binding[bnd] {
            0.0
        } else {
            sdot[n_comp + bnd]
        };
    }
}

/// Folds `alpha * dF/dydot` of one shell into the factorizable Jacobian,
/// with `row0` the shell's first mobile-phase row.
#[allow(clippy::too_many_arguments)]
pub fn add_time_derivative_to_jacobian_cell(
    jac: &mut FactorizableBandMatrix,
    row0: usize,
    alpha: f64,
    n_comp: usize,
    n_bound: &[usize],
    bound_offset: &[usize],
    stride_bound: usize,
    qs_binding: &[bool],
    inv_beta_p: &[f64],
) {
    for c in 0..n_comp {
        jac.add_diagonal(row0 + c, alpha);
        for b in 0..n_bound[c] {
            let off = (n_comp + bound_offset[c] + b - c) as isize;
            jac.add(row0 + c, off, alpha * inv_beta_p[c]);
        }
    }
    for bnd in 0..stride_bound {
        if !qs_binding[bnd] {
            jac.add_diagonal(row0 + n_comp + bnd, alpha);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::binding::{BindingModel, LinearBinding};
    use crate::scalar::ByValue;
    use approx::assert_relative_eq;

    fn linear_binding(kinetic: bool) -> LinearBinding {
        let mut model = LinearBinding::new();
        let mut pp = crate::params::InMemoryParameterProvider::new();
        pp.add("IS_KINETIC", kinetic)
            .add("LIN_KA", vec![2.0])
            .add("LIN_KD", vec![4.0]);
        model.configure_model_discretization(1, &[1], &[0]).unwrap();
        model.configure(&mut pp, 0, None).unwrap();
        model
    }

    #[test]
    fn dynamic_bound_state_gets_time_derivative_and_flux() {
        let binding = linear_binding(true);
        let porosity = Active::new(0.5);
        let pore_access = [Active::new(1.0)];
        let p = CellParameters {
            n_comp: 1,
            n_bound: &[1],
            bound_offset: &[0],
            stride_bound: 1,
            qs_binding: binding.reaction_quasi_stationarity(),
            porosity: &porosity,
            pore_access: &pore_access,
            binding: &binding,
            reaction: None,
        };
        let y = [3.0, 1.0];
        let ydot = [0.25, 0.5];
        let mut res = [0.0, 0.0];
        let mut ws = Workspace::default();
        residual_cell::<f64, ByValue>(
            0.0,
            0,
            &ColumnPosition::default(),
            &y,
            Some(&ydot),
            &mut res,
            None,
            &p,
            &mut ws,
        );
        // mobile: dc/dt + (1-e)/e * dq/dt = 0.25 + 1.0 * 0.5
        assert_relative_eq!(res[0], 0.75);
        // solid: dq/dt + kd q - ka c = 0.5 + 4 - 6
        assert_relative_eq!(res[1], -1.5);
    }

    #[test]
    fn quasi_stationary_row_is_pure_binding_residual() {
        let binding = linear_binding(false);
        let porosity = Active::new(0.5);
        let pore_access = [Active::new(1.0)];
        let p = CellParameters {
            n_comp: 1,
            n_bound: &[1],
            bound_offset: &[0],
            stride_bound: 1,
            qs_binding: binding.reaction_quasi_stationarity(),
            porosity: &porosity,
            pore_access: &pore_access,
            binding: &binding,
            reaction: None,
        };
        let y = [3.0, 1.0];
        let ydot = [0.25, 123.0];
        let mut res = [0.0, 0.0];
        let mut ws = Workspace::default();
        residual_cell::<f64, ByValue>(
            0.0,
            0,
            &ColumnPosition::default(),
            &y,
            Some(&ydot),
            &mut res,
            None,
            &p,
            &mut ws,
        );
        // the bound-state time derivative still appears in the mobile row
        assert_relative_eq!(res[0], 0.25 + 123.0);
        // but the algebraic row sees only kd q - ka c
        assert_relative_eq!(res[1], 4.0 - 6.0);
    }

    #[test]
    fn derivative_jacobian_kernel_zeroes_quasi_stationary_rows() {
        let sdot = [1.0, 2.0, 3.0];
        let mut ret = [0.0; 3];
        multiply_with_derivative_jacobian_cell(
            &sdot,
            &mut ret,
            1,
            &[2],
            &[0],
            2,
            &[false, true],
            &[0.5],
        );
        assert_relative_eq!(ret[0], 1.0 + 0.5 * (2.0 + 3.0));
        assert_relative_eq!(ret[1], 2.0);
        assert_relative_eq!(ret[2], 0.0);
    }
}
