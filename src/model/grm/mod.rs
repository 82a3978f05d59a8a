//! The General Rate Model unit operation.
//!
//! Couples axial convection-dispersion in the bulk with intra-particle
//! radial diffusion, surface diffusion, film mass transfer and
//! adsorption/reaction kinetics, discretized by finite volumes. The unit
//! serves an implicit DAE integrator with residual evaluations, analytic or
//! AD banded Jacobians, matrix-free multiplications with `dF/dy` and
//! `dF/dydot`, a Schur-complement linear solve, consistent initialization
//! and forward parameter sensitivities.

mod flux;
mod init;
mod linear_solver;
mod sens;

use tracing::debug;

use crate::error::ChromsolError;
use crate::jacobian::{
    compare_banded_jacobian, copy_values_from_ad, copy_values_to_ad, extract_banded_jacobian,
    prepare_band_seed_vectors,
};
use crate::linear_solver::{Gmres, Orthogonalization};
use crate::matrix::{BandMatrix, FactorizableBandMatrix, SparseMatrix};
use crate::model::binding::{create_binding_model, BindingModel};
use crate::model::cell::{residual_cell, CellParameters, CellScalar};
use crate::model::conv_disp::ConvectionDispersionOperator;
use crate::model::indexer::{Discretization, Indexer};
use crate::model::radial::{
    set_equidistant_radial_disc, set_equivolume_radial_disc, set_user_defined_radial_disc,
    ParticleDiscretizationMode, ParticleGeometry,
};
use crate::model::reaction::{create_reaction_model, DynamicReactionModel};
use crate::model::{ColumnPosition, Workspace};
use crate::params::{
    hash_string, read_bound_type_sec_param, read_comp_type_sec_param, read_type_multiplexed,
    section_dependent_slice, MultiplexMode, ParamId, ParameterProvider, UnitOpIdx,
};
use crate::scalar::{Active, ByValue, ModelScalar, ParamLift};
use crate::config_error;

/// Inlet concentration profile supplied by the upstream coupling.
pub type InletProfile = Box<dyn Fn(f64, usize) -> f64 + Send + Sync>;

pub struct GeneralRateModel {
    unit_op_idx: UnitOpIdx,
    disc: Discretization,
    conv_disp: ConvectionDispersionOperator,

    col_porosity: Active,
    par_radius: Vec<Active>,
    single_par_radius: bool,
    par_core_radius: Vec<Active>,
    single_par_core_radius: bool,
    par_porosity: Vec<Active>,
    single_par_porosity: bool,
    /// Cell-major `[k * nParType + t]`.
    par_type_vol_frac: Vec<Active>,
    axially_constant_vol_frac: bool,
    film_diffusion: Vec<Active>,
    film_diffusion_mode: MultiplexMode,
    par_diffusion: Vec<Active>,
    par_diffusion_mode: MultiplexMode,
    par_surf_diffusion: Vec<Active>,
    pore_access: Vec<Active>,
    par_disc_mode: Vec<ParticleDiscretizationMode>,
    par_disc_vector: Vec<f64>,
    geometry: ParticleGeometry,
    has_surface_diffusion: Vec<bool>,

    binding_models: Vec<Box<dyn BindingModel>>,
    binding_index: Vec<usize>,
    single_binding: bool,
    reaction_models: Vec<Box<dyn DynamicReactionModel>>,
    reaction_index: Vec<Option<usize>>,
    single_reaction: bool,
    bulk_reaction: Option<Box<dyn DynamicReactionModel>>,

    /// Per-(type, axial cell) particle Jacobians, type-major.
    jac_p: Vec<BandMatrix>,
    jac_p_disc: Vec<FactorizableBandMatrix>,
    jac_cf: SparseMatrix,
    jac_fc: SparseMatrix,
    jac_pf: Vec<SparseMatrix>,
    jac_fp: Vec<SparseMatrix>,
    jac_inlet: SparseMatrix,
    factorize_jacobian: bool,

    gmres: Gmres,
    schur_safety: f64,

    analytic_jac: bool,
    ad_y: Vec<Active>,
    ad_res: Vec<Active>,
    ad_dir_offset: usize,
    n_sens_params: usize,

    init_c: Vec<Active>,
    init_cp: Vec<Active>,
    init_q: Vec<Active>,
    init_state_y: Option<Vec<f64>>,
    init_state_ydot: Option<Vec<f64>>,

    inlet: Option<InletProfile>,
}

/// Borrowed view of everything a particle-block residual needs; constructed
/// once per evaluation so the block loop can run over disjoint Jacobian and
/// residual slices.
struct ParticleEnv<'a> {
    disc: &'a Discretization,
    geometry: &'a ParticleGeometry,
    par_radius: &'a [Active],
    par_porosity: &'a [Active],
    pore_access: &'a [Active],
    par_diffusion: &'a [Active],
    par_surf_diffusion: &'a [Active],
    has_surface_diffusion: &'a [bool],
    binding_models: &'a [Box<dyn BindingModel>],
    binding_index: &'a [usize],
    reaction_models: &'a [Box<dyn DynamicReactionModel>],
    reaction_index: &'a [Option<usize>],
    workspace_size: usize,
    t: f64,
    sec: usize,
}

impl GeneralRateModel {
    pub fn new(unit_op_idx: UnitOpIdx) -> Self {
        Self {
            unit_op_idx,
            disc: Discretization::new(1, 1, vec![1], vec![0]),
            conv_disp: ConvectionDispersionOperator::new(),
            col_porosity: Active::new(1.0),
            par_radius: Vec::new(),
            single_par_radius: true,
            par_core_radius: Vec::new(),
            single_par_core_radius: true,
            par_porosity: Vec::new(),
            single_par_porosity: true,
            par_type_vol_frac: Vec::new(),
            axially_constant_vol_frac: true,
            film_diffusion: Vec::new(),
            film_diffusion_mode: MultiplexMode::PerType,
            par_diffusion: Vec::new(),
            par_diffusion_mode: MultiplexMode::PerType,
            par_surf_diffusion: Vec::new(),
            pore_access: Vec::new(),
            par_disc_mode: Vec::new(),
            par_disc_vector: Vec::new(),
            geometry: ParticleGeometry::default(),
            has_surface_diffusion: Vec::new(),
            binding_models: Vec::new(),
            binding_index: Vec::new(),
            single_binding: true,
            reaction_models: Vec::new(),
            reaction_index: Vec::new(),
            single_reaction: true,
            bulk_reaction: None,
            jac_p: Vec::new(),
            jac_p_disc: Vec::new(),
            jac_cf: SparseMatrix::new(),
            jac_fc: SparseMatrix::new(),
            jac_pf: Vec::new(),
            jac_fp: Vec::new(),
            jac_inlet: SparseMatrix::new(),
            factorize_jacobian: true,
            gmres: Gmres::new(1, 0, Orthogonalization::Modified, 0),
            schur_safety: 1e-8,
            analytic_jac: true,
            ad_y: Vec::new(),
            ad_res: Vec::new(),
            ad_dir_offset: 0,
            n_sens_params: 0,
            init_c: Vec::new(),
            init_cp: Vec::new(),
            init_q: Vec::new(),
            init_state_y: None,
            init_state_ydot: None,
            inlet: None,
        }
    }

    pub fn unit_op_idx(&self) -> UnitOpIdx {
        self.unit_op_idx
    }

    pub fn discretization(&self) -> &Discretization {
        &self.disc
    }

    pub fn num_dofs(&self) -> usize {
        self.disc.num_dofs()
    }

    pub fn num_pure_dofs(&self) -> usize {
        self.disc.num_pure_dofs()
    }

    pub fn uses_ad(&self) -> bool {
        !self.analytic_jac
    }

    /// Installs the upstream inlet profile (the system-coupling stand-in).
    pub fn set_inlet_profile(&mut self, inlet: InletProfile) {
        self.inlet = Some(inlet);
    }

    pub(crate) fn binding(&self, par_type: usize) -> &dyn BindingModel {
        &*self.binding_models[self.binding_index[par_type]]
    }

    /// Reads the `discretization` scope, sizes the DOF layout and allocates
    /// all Jacobian storage. Must run before [`Self::configure`].
    pub fn configure_model_discretization(
        &mut self,
        provider: &mut dyn ParameterProvider,
    ) -> Result<(), ChromsolError> {
        let n_comp = provider.get_int("NCOMP")? as usize;

        provider.push_scope("discretization");
        let result = self.configure_discretization_scope(provider, n_comp);
        provider.pop_scope();
        let (optimize_surf_diffusion, analytic_jac) = result?;

        // surface-diffusion optimization reads the unit-scope coefficients
        self.has_surface_diffusion = if optimize_surf_diffusion {
            let mut has = vec![false; self.disc.n_par_type];
            if provider.exists("PAR_SURFDIFFUSION") {
                let surf = provider.get_double_array("PAR_SURFDIFFUSION")?;
                for (t, h) in has.iter_mut().enumerate() {
                    let lo = self.disc.n_bound_before_type[t];
                    let hi = lo + self.disc.stride_bound[t];
                    *h = surf.get(lo..hi).is_some_and(|s| s.iter().any(|v| *v != 0.0));
                }
            }
            has
        } else {
            vec![true; self.disc.n_par_type]
        };

        self.conv_disp
            .configure_model_discretization(self.disc.n_comp, self.disc.n_col)?;

        self.configure_binding_models(provider)?;
        self.configure_reaction_models(provider)?;

        // particle Jacobian blocks; the upper bandwidth grows by the
        // bound-state stride when surface diffusion couples the phases
        self.jac_p.clear();
        self.jac_p_disc.clear();
        for t in 0..self.disc.n_par_type {
            let lower = self.disc.n_comp + self.disc.stride_bound[t];
            let upper = lower
                + if self.has_surface_diffusion[t] {
                    self.disc.stride_bound[t]
                } else {
                    0
                };
            let rows = self.disc.n_par_cell[t] * (self.disc.n_comp + self.disc.stride_bound[t]);
            for _ in 0..self.disc.n_col {
                self.jac_p.push(BandMatrix::new(rows, lower, upper));
                self.jac_p_disc
                    .push(FactorizableBandMatrix::new(rows, lower, upper));
            }
        }

        let n_cells = self.disc.n_col * self.disc.n_par_type;
        self.jac_pf = vec![SparseMatrix::new(); n_cells];
        self.jac_fp = vec![SparseMatrix::new(); n_cells];
        self.jac_cf = SparseMatrix::new();
        self.jac_fc = SparseMatrix::new();
        self.jac_inlet = SparseMatrix::new();

        self.analytic_jac = analytic_jac;
        Ok(())
    }

    fn configure_discretization_scope(
        &mut self,
        provider: &mut dyn ParameterProvider,
        n_comp: usize,
    ) -> Result<(bool, bool), ChromsolError> {
        let n_col = provider.get_int("NCOL")? as usize;
        let n_par_cell_raw = provider.get_int_array("NPAR")?;
        let n_bound_raw = provider.get_int_array("NBOUND")?;
        if n_bound_raw.len() < n_comp {
            return Err(config_error!(TooFewElements {
                field: "NBOUND".to_string(),
                expected: n_comp,
            }));
        }

        let n_par_type = if provider.exists("NPARTYPE") {
            provider.get_int("NPARTYPE")? as usize
        } else {
            (n_bound_raw.len() / n_comp).max(n_par_cell_raw.len())
        };

        if n_par_cell_raw.len() > 1 && n_par_cell_raw.len() < n_par_type {
            return Err(config_error!(TooFewElements {
                field: "NPAR".to_string(),
                expected: n_par_type,
            }));
        }
        let n_par_cell: Vec<usize> = if n_par_cell_raw.len() < n_par_type {
            vec![n_par_cell_raw[0] as usize; n_par_type]
        } else {
            n_par_cell_raw[..n_par_type]
                .iter()
                .map(|v| *v as usize)
                .collect()
        };

        if n_bound_raw.len() > n_comp && n_bound_raw.len() < n_comp * n_par_type {
            return Err(config_error!(TooFewElements {
                field: "NBOUND".to_string(),
                expected: n_comp * n_par_type,
            }));
        }
        let n_bound: Vec<usize> = if n_bound_raw.len() < n_comp * n_par_type {
            let one_type: Vec<usize> = n_bound_raw[..n_comp].iter().map(|v| *v as usize).collect();
            (0..n_par_type).flat_map(|_| one_type.clone()).collect()
        } else {
            n_bound_raw[..n_comp * n_par_type]
                .iter()
                .map(|v| *v as usize)
                .collect()
        };

        self.disc = Discretization::new(n_comp, n_col, n_par_cell, n_bound);

        let total_cells = self.disc.n_par_cells_before_type[self.disc.n_par_type];
        self.geometry = ParticleGeometry::new(total_cells);

        // particle discretization mode, multiplexed over types
        let pdt = if provider.exists("PAR_DISC_TYPE") {
            provider.get_string_array("PAR_DISC_TYPE")?
        } else {
            vec!["EQUIDISTANT_PAR".to_string()]
        };
        let pdt = if pdt.len() == 1 && self.disc.n_par_type > 1 {
            vec![pdt[0].clone(); self.disc.n_par_type]
        } else if pdt.len() < self.disc.n_par_type {
            return Err(config_error!(TooFewElements {
                field: "PAR_DISC_TYPE".to_string(),
                expected: self.disc.n_par_type,
            }));
        } else {
            pdt
        };
        self.par_disc_mode = pdt
            .iter()
            .map(|s| match s.as_str() {
                "EQUIVOLUME_PAR" => ParticleDiscretizationMode::Equivolume,
                "USER_DEFINED_PAR" => ParticleDiscretizationMode::UserDefined,
                _ => ParticleDiscretizationMode::Equidistant,
            })
            .collect();

        if provider.exists("PAR_DISC_VECTOR") {
            self.par_disc_vector = provider.get_double_array("PAR_DISC_VECTOR")?;
            if self.par_disc_vector.len() < total_cells + self.disc.n_par_type {
                return Err(config_error!(TooFewElements {
                    field: "PAR_DISC_VECTOR".to_string(),
                    expected: total_cells + self.disc.n_par_type,
                }));
            }
        }

        let analytic_jac = provider.get_bool("USE_ANALYTIC_JACOBIAN")?;

        self.gmres = Gmres::new(
            self.disc.n_col * self.disc.n_comp * self.disc.n_par_type,
            provider.get_int("MAX_KRYLOV")? as usize,
            Orthogonalization::from_config(provider.get_int("GS_TYPE")?),
            provider.get_int("MAX_RESTARTS")? as usize,
        );
        self.schur_safety = provider.get_double("SCHUR_SAFETY")?;

        self.init_c = vec![Active::new(0.0); self.disc.n_comp];
        self.init_cp = vec![Active::new(0.0); self.disc.n_comp * self.disc.n_par_type];
        self.init_q = vec![Active::new(0.0); self.disc.n_total_bound];

        let optimize_surf_diffusion = if provider.exists("FIX_ZERO_SURFACE_DIFFUSION") {
            provider.get_bool("FIX_ZERO_SURFACE_DIFFUSION")?
        } else {
            false
        };
        Ok((optimize_surf_diffusion, analytic_jac))
    }

    fn configure_binding_models(
        &mut self,
        provider: &mut dyn ParameterProvider,
    ) -> Result<(), ChromsolError> {
        let names = provider.get_string_array("ADSORPTION_MODEL")?;
        self.single_binding = if provider.exists("ADSORPTION_MODEL_MULTIPLEX") {
            provider.get_int("ADSORPTION_MODEL_MULTIPLEX")? == 1
        } else {
            names.len() == 1
        };
        if !self.single_binding && names.len() < self.disc.n_par_type {
            return Err(config_error!(TooFewElements {
                field: "ADSORPTION_MODEL".to_string(),
                expected: self.disc.n_par_type,
            }));
        }
        if self.single_binding && names.len() != 1 {
            return Err(config_error!(WrongElementCount {
                field: "ADSORPTION_MODEL".to_string(),
                expected: 1,
            }));
        }

        self.binding_models.clear();
        self.binding_index = vec![0; self.disc.n_par_type];
        for t in 0..self.disc.n_par_type {
            if self.single_binding && t > 0 {
                self.binding_index[t] = 0;
                continue;
            }
            let mut model = create_binding_model(&names[t.min(names.len() - 1)])?;
            let base = t * self.disc.n_comp;
            model.configure_model_discretization(
                self.disc.n_comp,
                &self.disc.n_bound[base..base + self.disc.n_comp],
                &self.disc.bound_offset[base..base + self.disc.n_comp],
            )?;
            self.binding_index[t] = self.binding_models.len();
            self.binding_models.push(model);
        }
        Ok(())
    }

    fn configure_reaction_models(
        &mut self,
        provider: &mut dyn ParameterProvider,
    ) -> Result<(), ChromsolError> {
        self.bulk_reaction = if provider.exists("REACTION_MODEL") {
            let name = provider.get_string("REACTION_MODEL")?;
            let mut model = create_reaction_model(&name)?;
            model.configure_model_discretization(self.disc.n_comp, None, None)?;
            Some(model)
        } else {
            None
        };

        self.reaction_models.clear();
        self.reaction_index = vec![None; self.disc.n_par_type];
        if !provider.exists("REACTION_MODEL_PARTICLES") {
            return Ok(());
        }
        let names = provider.get_string_array("REACTION_MODEL_PARTICLES")?;
        self.single_reaction = if provider.exists("REACTION_MODEL_PARTICLES_MULTIPLEX") {
            provider.get_int("REACTION_MODEL_PARTICLES_MULTIPLEX")? == 1
        } else {
            names.len() == 1
        };
        if !self.single_reaction && names.len() < self.disc.n_par_type {
            return Err(config_error!(TooFewElements {
                field: "REACTION_MODEL_PARTICLES".to_string(),
                expected: self.disc.n_par_type,
            }));
        }
        for t in 0..self.disc.n_par_type {
            if self.single_reaction && t > 0 {
                self.reaction_index[t] = Some(0);
                continue;
            }
            let mut model = create_reaction_model(&names[t.min(names.len() - 1)])?;
            let base = t * self.disc.n_comp;
            model.configure_model_discretization(
                self.disc.n_comp,
                Some(&self.disc.n_bound[base..base + self.disc.n_comp]),
                Some(&self.disc.bound_offset[base..base + self.disc.n_comp]),
            )?;
            self.reaction_index[t] = Some(self.reaction_models.len());
            self.reaction_models.push(model);
        }
        Ok(())
    }

    /// Reads the unit-scope physical parameters, derives the particle
    /// geometry and configures the plug-in models.
    pub fn configure(&mut self, provider: &mut dyn ParameterProvider) -> Result<(), ChromsolError> {
        let n_comp = self.disc.n_comp;
        let n_par_type = self.disc.n_par_type;
        let n_col = self.disc.n_col;

        self.conv_disp.configure(provider)?;

        self.col_porosity = Active::new(provider.get_double("COL_POROSITY")?);
        let (par_radius, single_radius) =
            read_type_multiplexed(provider, "PAR_RADIUS", n_par_type)?;
        self.par_radius = par_radius;
        self.single_par_radius = single_radius;
        let (par_porosity, single_porosity) =
            read_type_multiplexed(provider, "PAR_POROSITY", n_par_type)?;
        self.par_porosity = par_porosity;
        self.single_par_porosity = single_porosity;
        if provider.exists("PAR_CORERADIUS") {
            let (core, single_core) = read_type_multiplexed(provider, "PAR_CORERADIUS", n_par_type)?;
            self.par_core_radius = core;
            self.single_par_core_radius = single_core;
        } else {
            self.par_core_radius = vec![Active::new(0.0); n_par_type];
            self.single_par_core_radius = true;
        }

        if n_par_type > 1 && !provider.exists("PAR_TYPE_VOLFRAC") {
            return Err(config_error!(MissingParameter {
                field: "PAR_TYPE_VOLFRAC".to_string(),
            }));
        }
        if provider.exists("PAR_TYPE_VOLFRAC") {
            let raw = provider.get_double_array("PAR_TYPE_VOLFRAC")?;
            if raw.len() == n_par_type {
                self.axially_constant_vol_frac = true;
                self.par_type_vol_frac = (0..n_col)
                    .flat_map(|_| raw.iter().map(|v| Active::new(*v)))
                    .collect();
            } else if raw.len() == n_col * n_par_type {
                self.axially_constant_vol_frac = false;
                self.par_type_vol_frac = raw.iter().map(|v| Active::new(*v)).collect();
            } else {
                return Err(config_error!(WrongElementCount {
                    field: "PAR_TYPE_VOLFRAC".to_string(),
                    expected: n_col * n_par_type,
                }));
            }
        } else {
            self.axially_constant_vol_frac = true;
            self.par_type_vol_frac = vec![Active::new(1.0); n_col];
        }

        for cell in 0..n_col {
            let sum: f64 = self.par_type_vol_frac[cell * n_par_type..(cell + 1) * n_par_type]
                .iter()
                .map(Active::value)
                .sum();
            if (1.0 - sum).abs() > 1e-10 {
                return Err(config_error!(VolumeFractionSum { cell: cell, sum: sum }));
            }
        }

        let (film, film_mode) = read_comp_type_sec_param(provider, "FILM_DIFFUSION", n_par_type, n_comp)?;
        self.film_diffusion = film;
        self.film_diffusion_mode = film_mode;
        let (pdiff, pdiff_mode) = read_comp_type_sec_param(provider, "PAR_DIFFUSION", n_par_type, n_comp)?;
        self.par_diffusion = pdiff;
        self.par_diffusion_mode = pdiff_mode;

        if provider.exists("PAR_SURFDIFFUSION") {
            let (sdiff, _mode) =
                read_bound_type_sec_param(provider, "PAR_SURFDIFFUSION", self.disc.n_total_bound)?;
            self.par_surf_diffusion = sdiff;
        } else {
            self.par_surf_diffusion = vec![Active::new(0.0); self.disc.n_total_bound];
        }

        if provider.exists("PORE_ACCESSIBILITY") {
            let (pa, _mode) = read_comp_type_sec_param(provider, "PORE_ACCESSIBILITY", n_par_type, n_comp)?;
            self.pore_access = pa;
        } else {
            self.pore_access = vec![Active::new(1.0); n_comp * n_par_type];
        }

        self.update_radial_disc();
        self.read_initial_condition(provider)?;

        // binding model configuration, multiplexed scope selection
        for (slot, model) in self.binding_models.iter_mut().enumerate() {
            if !model.requires_configuration() {
                continue;
            }
            let scope = if self.single_binding || n_par_type == 1 {
                "adsorption".to_string()
            } else {
                format!("adsorption_{slot:03}")
            };
            provider.push_scope(&scope);
            let res = model.configure(provider, self.unit_op_idx, Some(slot));
            provider.pop_scope();
            res?;
        }

        if let Some(model) = self.bulk_reaction.as_mut() {
            if model.requires_configuration() {
                provider.push_scope("reaction_bulk");
                let res = model.configure(provider, self.unit_op_idx, None);
                provider.pop_scope();
                res?;
            }
        }
        for (slot, model) in self.reaction_models.iter_mut().enumerate() {
            if !model.requires_configuration() {
                continue;
            }
            let scope = if self.single_reaction || n_par_type == 1 {
                "reaction_particle".to_string()
            } else {
                format!("reaction_particle_{slot:03}")
            };
            provider.push_scope(&scope);
            let res = model.configure(provider, self.unit_op_idx, Some(slot));
            provider.pop_scope();
            res?;
        }

        self.factorize_jacobian = true;
        Ok(())
    }

    fn read_initial_condition(
        &mut self,
        provider: &mut dyn ParameterProvider,
    ) -> Result<(), ChromsolError> {
        if provider.exists("INIT_STATE_Y") {
            let y = provider.get_double_array("INIT_STATE_Y")?;
            if y.len() != self.disc.num_dofs() {
                return Err(config_error!(WrongElementCount {
                    field: "INIT_STATE_Y".to_string(),
                    expected: self.disc.num_dofs(),
                }));
            }
            self.init_state_y = Some(y);
            if provider.exists("INIT_STATE_YDOT") {
                let ydot = provider.get_double_array("INIT_STATE_YDOT")?;
                if ydot.len() != self.disc.num_dofs() {
                    return Err(config_error!(WrongElementCount {
                        field: "INIT_STATE_YDOT".to_string(),
                        expected: self.disc.num_dofs(),
                    }));
                }
                self.init_state_ydot = Some(ydot);
            }
            return Ok(());
        }

        if provider.exists("INIT_C") {
            let c = provider.get_double_array("INIT_C")?;
            if c.len() < self.disc.n_comp {
                return Err(config_error!(TooFewElements {
                    field: "INIT_C".to_string(),
                    expected: self.disc.n_comp,
                }));
            }
            for (dst, src) in self.init_c.iter_mut().zip(&c) {
                dst.set_value(*src);
            }
        }
        if provider.exists("INIT_CP") {
            let cp = provider.get_double_array("INIT_CP")?;
            let expanded: Vec<f64> = if cp.len() == self.disc.n_comp {
                (0..self.disc.n_par_type).flat_map(|_| cp.clone()).collect()
            } else if cp.len() == self.disc.n_comp * self.disc.n_par_type {
                cp
            } else {
                return Err(config_error!(WrongElementCount {
                    field: "INIT_CP".to_string(),
                    expected: self.disc.n_comp * self.disc.n_par_type,
                }));
            };
            for (dst, src) in self.init_cp.iter_mut().zip(&expanded) {
                dst.set_value(*src);
            }
        } else {
            for (dst, src) in self
                .init_cp
                .iter_mut()
                .zip((0..self.disc.n_par_type).flat_map(|_| self.init_c.iter()))
            {
                dst.set_value(src.value());
            }
        }
        if provider.exists("INIT_Q") {
            let q = provider.get_double_array("INIT_Q")?;
            if q.len() < self.disc.n_total_bound {
                return Err(config_error!(TooFewElements {
                    field: "INIT_Q".to_string(),
                    expected: self.disc.n_total_bound,
                }));
            }
            for (dst, src) in self.init_q.iter_mut().zip(&q) {
                dst.set_value(*src);
            }
        }
        Ok(())
    }

    /// Fills `y` (and `ydot`) with the configured initial conditions.
    pub fn apply_initial_condition(&self, y: &mut [f64], ydot: &mut [f64]) {
        y.fill(0.0);
        ydot.fill(0.0);
        if let Some(init_y) = &self.init_state_y {
            y.copy_from_slice(init_y);
            if let Some(init_ydot) = &self.init_state_ydot {
                ydot.copy_from_slice(init_ydot);
            }
            return;
        }
        let idx = Indexer::new(&self.disc);
        for col in 0..self.disc.n_col {
            for c in 0..self.disc.n_comp {
                y[idx.offset_c() + col * idx.stride_col_cell() + c] = self.init_c[c].value();
            }
        }
        for t in 0..self.disc.n_par_type {
            for col in 0..self.disc.n_col {
                for s in 0..self.disc.n_par_cell[t] {
                    let base = idx.offset_cp_shell(t, col, s);
                    for c in 0..self.disc.n_comp {
                        y[base + c] = self.init_cp[t * self.disc.n_comp + c].value();
                    }
                    for b in 0..self.disc.stride_bound[t] {
                        y[base + self.disc.n_comp + b] =
                            self.init_q[self.disc.n_bound_before_type[t] + b].value();
                    }
                }
            }
        }
    }

    /// Re-derives per-shell geometry for all particle types, in dual
    /// arithmetic so active radius parameters keep their gradients.
    pub fn update_radial_disc(&mut self) {
        for t in 0..self.disc.n_par_type {
            let offset = self.disc.n_par_cells_before_type[t];
            let n_cells = self.disc.n_par_cell[t];
            match self.par_disc_mode[t] {
                ParticleDiscretizationMode::Equidistant => set_equidistant_radial_disc(
                    &mut self.geometry,
                    offset,
                    n_cells,
                    &self.par_radius[t],
                    &self.par_core_radius[t],
                ),
                ParticleDiscretizationMode::Equivolume => set_equivolume_radial_disc(
                    &mut self.geometry,
                    offset,
                    n_cells,
                    &self.par_radius[t],
                    &self.par_core_radius[t],
                ),
                ParticleDiscretizationMode::UserDefined => {
                    let lo = offset + t;
                    set_user_defined_radial_disc(
                        &mut self.geometry,
                        offset,
                        n_cells,
                        &self.par_radius[t],
                        &self.par_core_radius[t],
                        &self.par_disc_vector[lo..lo + n_cells + 1],
                    )
                }
            }
        }
    }

    /// Maximum per-cell workspace over all particle types.
    pub fn thread_local_memory_size(&self) -> usize {
        let max_stride = self.disc.stride_bound.iter().copied().max().unwrap_or(0);
        let cell = self.disc.n_comp + max_stride;
        let mut plugin = 0usize;
        for (t, _) in self.disc.stride_bound.iter().enumerate() {
            let binding = self.binding(t);
            if binding.requires_workspace() {
                plugin = plugin.max(binding.workspace_size(self.disc.n_comp, self.disc.stride_bound[t]));
            }
            if let Some(slot) = self.reaction_index[t] {
                let reaction = &self.reaction_models[slot];
                if reaction.requires_workspace() {
                    plugin =
                        plugin.max(reaction.workspace_size(self.disc.n_comp, self.disc.stride_bound[t]));
                }
            }
        }
        cell + cell * cell + plugin
    }

    /// AD directions needed by the widest diagonal block.
    pub fn num_ad_dirs_for_jacobian(&self) -> usize {
        let par = self
            .jac_p
            .iter()
            .map(BandMatrix::stride)
            .max()
            .unwrap_or(0);
        self.conv_disp.required_ad_dirs().max(par)
    }

    pub fn required_ad_dirs(&self) -> usize {
        self.ad_dir_offset + self.num_ad_dirs_for_jacobian()
    }

    /// (Re)creates the dual state and residual vectors and seeds them for
    /// band compression; parameter directions stay below `ad_dir_offset`.
    pub fn prepare_ad_vectors(&mut self) {
        let n = self.disc.num_dofs();
        self.ad_dir_offset = self.n_sens_params;
        self.ad_y = vec![Active::new(0.0); n];
        self.ad_res = vec![Active::new(0.0); n];
        self.conv_disp.prepare_ad_vectors(&mut self.ad_y, self.ad_dir_offset);
        let idx = Indexer::new(&self.disc);
        for t in 0..self.disc.n_par_type {
            let jac = &self.jac_p[t * self.disc.n_col];
            for k in 0..self.disc.n_col {
                let lo = idx.offset_cp_cell(t, k);
                let hi = lo + idx.stride_par_block(t);
                prepare_band_seed_vectors(
                    &mut self.ad_y[lo..hi],
                    self.ad_dir_offset,
                    jac.lower_bandwidth(),
                    jac.upper_bandwidth(),
                );
            }
        }
    }

    fn ensure_ad_vectors(&mut self) {
        if self.ad_y.len() != self.disc.num_dofs() || self.ad_dir_offset != self.n_sens_params {
            self.prepare_ad_vectors();
        }
    }

    /// Pulls the banded Jacobians of all diagonal blocks out of the dual
    /// residual.
    pub fn extract_jacobian_from_ad(&mut self) {
        let idx = Indexer::new(&self.disc);
        let ad_res = std::mem::take(&mut self.ad_res);
        self.conv_disp
            .extract_jacobian_from_ad(&ad_res, self.ad_dir_offset);
        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let lo = idx.offset_cp_cell(t, k);
                let jac = &mut self.jac_p[t * self.disc.n_col + k];
                extract_banded_jacobian(&ad_res[lo..lo + jac.rows()], self.ad_dir_offset, jac);
            }
        }
        self.ad_res = ad_res;
    }

    /// Maximum deviation between the analytic Jacobian blocks and the AD
    /// residual currently held in the dual buffers.
    pub fn check_analytic_jacobian_against_ad(&self) -> f64 {
        let idx = Indexer::new(&self.disc);
        let mut max_diff = self
            .conv_disp
            .check_analytic_jacobian_against_ad(&self.ad_res, self.ad_dir_offset);
        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let lo = idx.offset_cp_cell(t, k);
                let jac = &self.jac_p[t * self.disc.n_col + k];
                let diff =
                    compare_banded_jacobian(&self.ad_res[lo..lo + jac.rows()], self.ad_dir_offset, jac);
                max_diff = max_diff.max(diff);
            }
        }
        max_diff
    }

    /// Evaluates the dual residual with band-seeded state and returns the
    /// maximum deviation of the AD Jacobian from the analytic blocks, which
    /// must be current at `(t, y, ydot)`. Debug cross-check for the
    /// analytic Jacobian.
    pub fn ad_jacobian_deviation(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: Option<&[f64]>,
    ) -> f64 {
        self.ensure_ad_vectors();
        let mut ad_y = std::mem::take(&mut self.ad_y);
        let mut ad_res = std::mem::take(&mut self.ad_res);
        copy_values_to_ad(y, &mut ad_y);
        for r in ad_res.iter_mut() {
            *r = Active::new(0.0);
        }
        self.residual_impl::<Active, ByValue>(t, sec, &ad_y, ydot, &mut ad_res, false);
        self.ad_y = ad_y;
        self.ad_res = ad_res;
        self.check_analytic_jacobian_against_ad()
    }

    /// Reassembles the coupling blocks and, on flow reversal, the inlet map.
    pub fn notify_discontinuous_section_transition(&mut self, t: f64, sec: usize) {
        if sec == 0
            || self.film_diffusion_mode.is_section_dependent()
            || self.par_diffusion_mode.is_section_dependent()
        {
            self.assemble_offdiag_jac(t, sec);
        }

        if !self.conv_disp.notify_discontinuous_section_transition(t, sec) {
            return;
        }

        let idx = Indexer::new(&self.disc);
        self.jac_inlet.clear();
        let h = self.conv_disp.column_length().value() / self.disc.n_col as f64;
        let u = self.conv_disp.current_velocity();
        if u >= 0.0 {
            for comp in 0..self.disc.n_comp {
                self.jac_inlet
                    .add_element(comp * idx.stride_col_comp(), comp, -u / h);
            }
        } else {
            let offset = (self.disc.n_col - 1) * idx.stride_col_cell();
            for comp in 0..self.disc.n_comp {
                self.jac_inlet
                    .add_element(offset + comp * idx.stride_col_comp(), comp, u / h);
            }
        }
        debug!(section = sec, velocity = u, "rebuilt inlet coupling map");
        self.factorize_jacobian = true;
    }

    /// Inlet Jacobian map (bulk row, inlet component, coefficient).
    pub fn jac_inlet(&self) -> &SparseMatrix {
        &self.jac_inlet
    }

    pub fn local_outlet_component_index(&self, _port: usize) -> usize {
        if self.conv_disp.current_velocity() >= 0.0 {
            self.disc.n_comp + (self.disc.n_col - 1) * self.disc.n_comp
        } else {
            self.disc.n_comp
        }
    }

    pub fn local_inlet_component_index(&self, _port: usize) -> usize {
        0
    }

    pub fn local_outlet_component_stride(&self, _port: usize) -> usize {
        1
    }

    pub fn local_inlet_component_stride(&self, _port: usize) -> usize {
        1
    }

    /// Expands integrator error tolerances across the state vector
    /// (identity expansion).
    pub fn expand_error_tol(&self, error_spec: &[f64], expand_out: &mut [f64]) {
        if error_spec.len() == expand_out.len() {
            expand_out.copy_from_slice(error_spec);
        } else {
            expand_out.fill(error_spec.first().copied().unwrap_or(1.0));
        }
    }

    /// Plain residual evaluation, no Jacobian update.
    pub fn residual(&mut self, t: f64, sec: usize, y: &[f64], ydot: Option<&[f64]>, res: &mut [f64]) -> i32 {
        self.residual_impl::<f64, ByValue>(t, sec, y, ydot, res, false)
    }

    /// Residual plus Jacobian update (analytic, or via banded AD when
    /// configured with `USE_ANALYTIC_JACOBIAN = false`).
    pub fn residual_with_jacobian(
        &mut self,
        t: f64,
        sec: usize,
        y: &[f64],
        ydot: Option<&[f64]>,
        res: &mut [f64],
    ) -> i32 {
        self.factorize_jacobian = true;
        if self.analytic_jac {
            self.residual_impl::<f64, ByValue>(t, sec, y, ydot, res, true)
        } else {
            self.ensure_ad_vectors();
            let mut ad_y = std::mem::take(&mut self.ad_y);
            let mut ad_res = std::mem::take(&mut self.ad_res);
            copy_values_to_ad(y, &mut ad_y);
            for r in ad_res.iter_mut() {
                *r = Active::new(0.0);
            }
            let status = self.residual_impl::<Active, ByValue>(t, sec, &ad_y, ydot, &mut ad_res, false);
            copy_values_from_ad(&ad_res, res);
            self.ad_y = ad_y;
            self.ad_res = ad_res;
            self.extract_jacobian_from_ad();
            status
        }
    }

    /// The shared residual core, generic over the residual scalar and the
    /// parameter-lift policy.
    fn residual_impl<T: CellScalar, L: ParamLift<T>>(
        &mut self,
        t: f64,
        sec: usize,
        y: &[T],
        ydot: Option<&[f64]>,
        res: &mut [T],
        want_jac: bool,
    ) -> i32 {
        debug_assert_eq!(y.len(), self.disc.num_dofs());
        debug_assert_eq!(res.len(), self.disc.num_dofs());

        self.residual_bulk::<T, L>(t, sec, y, ydot, res, want_jac);

        // one independent task per (type, axial cell) particle block
        let disc = &self.disc;
        let idx = Indexer::new(disc);
        let env = ParticleEnv {
            disc,
            geometry: &self.geometry,
            par_radius: &self.par_radius,
            par_porosity: &self.par_porosity,
            pore_access: &self.pore_access,
            par_diffusion: &self.par_diffusion,
            par_surf_diffusion: &self.par_surf_diffusion,
            has_surface_diffusion: &self.has_surface_diffusion,
            binding_models: &self.binding_models,
            binding_index: &self.binding_index,
            reaction_models: &self.reaction_models,
            reaction_index: &self.reaction_index,
            workspace_size: {
                let max_stride = disc.stride_bound.iter().copied().max().unwrap_or(0);
                let cell = disc.n_comp + max_stride;
                cell + cell * cell
            },
            t,
            sec,
        };

        let par_start = idx.offset_cp(0);
        let par_end = idx.offset_jf();
        let (_, rest) = res.split_at_mut(par_start);
        let (par_region, _) = rest.split_at_mut(par_end - par_start);
        let mut chunks: Vec<&mut [T]> = Vec::with_capacity(disc.n_col * disc.n_par_type);
        let mut remaining = par_region;
        for t_idx in 0..disc.n_par_type {
            for _ in 0..disc.n_col {
                let (head, tail) = remaining.split_at_mut(idx.stride_par_block(t_idx));
                chunks.push(head);
                remaining = tail;
            }
        }

        let jac_p = &mut self.jac_p;
        let run_block = |pblk: usize, jac: &mut BandMatrix, chunk: &mut [T]| {
            let par_type = pblk / disc.n_col;
            let col_cell = pblk % disc.n_col;
            residual_particle_block::<T, L>(&env, par_type, col_cell, y, ydot, chunk, jac, want_jac);
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            jac_p
                .par_iter_mut()
                .zip(chunks.into_par_iter())
                .enumerate()
                .for_each(|(pblk, (jac, chunk))| run_block(pblk, jac, chunk));
        }
        #[cfg(not(feature = "parallel"))]
        {
            for (pblk, (jac, chunk)) in jac_p.iter_mut().zip(chunks.into_iter()).enumerate() {
                run_block(pblk, jac, chunk);
            }
        }

        // serial flux pass after all particle and bulk tasks
        self.residual_flux::<T, L>(t, sec, y, res);

        // inlet DOFs: identity against the upstream profile
        for c in 0..self.disc.n_comp {
            let feed = self.inlet.as_ref().map_or(0.0, |f| f(t, c));
            res[c] = y[c].clone() - T::from_re(feed);
        }
        0
    }

    fn residual_bulk<T: CellScalar, L: ParamLift<T>>(
        &mut self,
        t: f64,
        sec: usize,
        y: &[T],
        ydot: Option<&[f64]>,
        res: &mut [T],
        want_jac: bool,
    ) {
        self.conv_disp.residual::<T, L>(t, sec, y, ydot, res, want_jac);
        let Some(reaction) = self.bulk_reaction.as_deref() else {
            return;
        };
        if reaction.num_reactions_liquid() == 0 {
            return;
        }
        let idx = Indexer::new(&self.disc);
        let mut ws = Workspace::new(self.disc.n_comp);
        for col in 0..self.disc.n_col {
            let pos = ColumnPosition {
                z: (0.5 + col as f64) / self.disc.n_col as f64,
                r: 0.0,
            };
            let lo = idx.offset_c() + col * idx.stride_col_cell();
            let hi = lo + self.disc.n_comp;
            T::reaction_liquid(
                reaction,
                t,
                sec,
                &pos,
                &y[lo..hi],
                &mut res[lo..hi],
                -1.0,
                L::WITH_GRADIENT,
                &mut ws,
            );
            if want_jac {
                let y_values: Vec<f64> = y[lo..hi].iter().map(ModelScalar::re).collect();
                let mut row = self.conv_disp.jacobian_row_mut(col * idx.stride_col_cell());
                reaction.analytic_jacobian_liquid(t, sec, &pos, &y_values, -1.0, &mut row, &mut ws);
            }
        }
    }

    /// `ret = alpha * dF/dy * ys + beta * ret`.
    ///
    /// Uses the Jacobian blocks of the last `residual_with_jacobian` call;
    /// the given point is ignored, matching the evaluation-order guarantee.
    pub fn multiply_with_jacobian(&self, ys: &[f64], alpha: f64, beta: f64, ret: &mut [f64]) {
        let idx = Indexer::new(&self.disc);

        for i in 0..self.disc.n_comp {
            ret[i] = alpha * ys[i] + beta * ret[i];
        }

        let offset_c = idx.offset_c();
        let n_bulk = self.disc.n_col * self.disc.n_comp;
        self.conv_disp.jacobian().multiply_vector(
            &ys[offset_c..offset_c + n_bulk],
            alpha,
            beta,
            &mut ret[offset_c..offset_c + n_bulk],
        );
        self.jac_cf
            .multiply_add(&ys[idx.offset_jf()..], &mut ret[offset_c..offset_c + n_bulk], alpha);

        for t in 0..self.disc.n_par_type {
            for k in 0..self.disc.n_col {
                let lo = idx.offset_cp_cell(t, k);
                let hi = lo + idx.stride_par_block(t);
                let pblk = t * self.disc.n_col + k;
                self.jac_p[pblk].multiply_vector(&ys[lo..hi], alpha, beta, &mut ret[lo..hi]);
                self.jac_pf[pblk].multiply_add(&ys[idx.offset_jf()..], &mut ret[lo..hi], alpha);
            }
        }

        // flux rows: identity plus the two coupling blocks
        for i in idx.offset_jf()..self.disc.num_dofs() {
            ret[i] = alpha * ys[i] + beta * ret[i];
        }
        {
            let (head, ret_jf) = ret.split_at_mut(idx.offset_jf());
            let _ = head;
            self.jac_fc
                .multiply_add(&ys[offset_c..offset_c + n_bulk], ret_jf, alpha);
            for t in 0..self.disc.n_par_type {
                for k in 0..self.disc.n_col {
                    let lo = idx.offset_cp_cell(t, k);
                    let hi = lo + idx.stride_par_block(t);
                    self.jac_fp[t * self.disc.n_col + k].multiply_add(&ys[lo..hi], ret_jf, alpha);
                }
            }
        }

        // inlet DOFs feed the boundary bulk cells
        self.jac_inlet
            .multiply_add(&ys[..self.disc.n_comp], &mut ret[offset_c..offset_c + n_bulk], alpha);
    }

    /// `ret = dF/dydot * sdot`, matrix-free. Flux and inlet rows are
    /// algebraic and map to zero.
    pub fn multiply_with_derivative_jacobian(&self, sdot: &[f64], ret: &mut [f64]) {
        use crate::model::cell::multiply_with_derivative_jacobian_cell;
        let idx = Indexer::new(&self.disc);

        self.conv_disp.multiply_with_derivative_jacobian(sdot, ret);

        for t in 0..self.disc.n_par_type {
            let base = t * self.disc.n_comp;
            let n_bound = &self.disc.n_bound[base..base + self.disc.n_comp];
            let bound_offset = &self.disc.bound_offset[base..base + self.disc.n_comp];
            let qs = self.binding(t).reaction_quasi_stationarity();
            let inv_beta: Vec<f64> = (0..self.disc.n_comp)
                .map(|c| {
                    let eps = self.par_porosity[t].value();
                    (1.0 - eps) / (eps * self.pore_access[base + c].value())
                })
                .collect();
            for k in 0..self.disc.n_col {
                for s in 0..self.disc.n_par_cell[t] {
                    let lo = idx.offset_cp_shell(t, k, s);
                    let hi = lo + idx.stride_par_shell(t);
                    let (sdot_cell, ret_cell) = (&sdot[lo..hi], &mut ret[lo..hi]);
                    multiply_with_derivative_jacobian_cell(
                        sdot_cell,
                        ret_cell,
                        self.disc.n_comp,
                        n_bound,
                        bound_offset,
                        self.disc.stride_bound[t],
                        qs,
                        &inv_beta,
                    );
                }
            }
        }

        ret[..self.disc.n_comp].fill(0.0);
        let jf = idx.offset_jf();
        ret[jf..].fill(0.0);
    }

    pub fn set_parameter(&mut self, pid: &ParamId, value: f64) -> bool {
        if self.set_parameter_impl(pid, value, None) {
            if pid.name == hash_string("PAR_RADIUS") || pid.name == hash_string("PAR_CORERADIUS") {
                self.update_radial_disc();
            }
            return true;
        }
        false
    }

    /// Changes the value of an already-registered sensitive parameter,
    /// keeping its seed directions.
    pub fn set_sensitive_parameter_value(&mut self, pid: &ParamId, value: f64) {
        self.set_parameter(pid, value);
    }

    /// Marks a parameter as sensitive: assigns the AD direction and seed.
    /// Multiplexed parameters expand over their replicas on assignment.
    pub fn set_sensitive_parameter(&mut self, pid: &ParamId, ad_direction: usize, ad_value: f64) -> bool {
        if self.set_parameter_impl(pid, ad_value, Some(ad_direction)) {
            self.n_sens_params = self.n_sens_params.max(ad_direction + 1);
            if pid.name == hash_string("PAR_RADIUS") || pid.name == hash_string("PAR_CORERADIUS") {
                // gradients changed even though nominal values did not
                self.update_radial_disc();
            }
            return true;
        }
        false
    }

    pub fn num_sens_params(&self) -> usize {
        self.n_sens_params
    }

    /// Shared matcher for value updates (`dir == None`) and AD seeding
    /// (`dir == Some`).
    fn set_parameter_impl(&mut self, pid: &ParamId, value: f64, dir: Option<usize>) -> bool {
        fn apply(target: &mut Active, value: f64, dir: Option<usize>) {
            match dir {
                None => target.set_value(value),
                Some(d) => target.set_grad(d, value),
            }
        }

        if pid.unit != self.unit_op_idx {
            return false;
        }
        let n_comp = self.disc.n_comp;
        let n_par_type = self.disc.n_par_type;

        if pid.name == hash_string("COL_POROSITY") {
            apply(&mut self.col_porosity, value, dir);
            return true;
        }

        for (name, values, single) in [
            ("PAR_RADIUS", &mut self.par_radius, self.single_par_radius),
            (
                "PAR_CORERADIUS",
                &mut self.par_core_radius,
                self.single_par_core_radius,
            ),
            ("PAR_POROSITY", &mut self.par_porosity, self.single_par_porosity),
        ] {
            if pid.name != hash_string(name) {
                continue;
            }
            match pid.particle_type {
                Some(t) if t < n_par_type && !single => apply(&mut values[t], value, dir),
                None if single => values.iter_mut().for_each(|v| apply(v, value, dir)),
                _ => return false,
            }
            return true;
        }

        // PAR_TYPE_VOLFRAC: when axially constant, one value is copied to
        // every axial cell of the given type (the 2D registration path)
        if pid.name == hash_string("PAR_TYPE_VOLFRAC") {
            let Some(t) = pid.particle_type else {
                return false;
            };
            if t >= n_par_type {
                return false;
            }
            if self.axially_constant_vol_frac {
                if pid.section.is_some() {
                    return false;
                }
                for k in 0..self.disc.n_col {
                    apply(&mut self.par_type_vol_frac[k * n_par_type + t], value, dir);
                }
            } else {
                // per-cell values are addressed through the section slot
                let Some(cell) = pid.section else {
                    return false;
                };
                if cell >= self.disc.n_col {
                    return false;
                }
                apply(&mut self.par_type_vol_frac[cell * n_par_type + t], value, dir);
            }
            return true;
        }

        for (name, values) in [
            ("FILM_DIFFUSION", &mut self.film_diffusion),
            ("PAR_DIFFUSION", &mut self.par_diffusion),
            ("PORE_ACCESSIBILITY", &mut self.pore_access),
        ] {
            if pid.name != hash_string(name) {
                continue;
            }
            let block = n_comp * n_par_type;
            let n_sec = values.len() / block;
            for (i, v) in values.iter_mut().enumerate() {
                let sec = i / block;
                let t = (i % block) / n_comp;
                let c = i % n_comp;
                let ok = pid.component.map_or(true, |pc| pc == c)
                    && pid.particle_type.map_or(true, |pt| pt == t)
                    && pid.section.map_or(true, |ps| ps == sec && ps < n_sec);
                if ok {
                    apply(v, value, dir);
                }
            }
            return true;
        }

        if pid.name == hash_string("PAR_SURFDIFFUSION") {
            let block = self.disc.n_total_bound;
            if block == 0 {
                return false;
            }
            for (i, v) in self.par_surf_diffusion.iter_mut().enumerate() {
                let sec = i / block;
                let within = i % block;
                let t = (0..n_par_type)
                    .find(|t| within < self.disc.n_bound_before_type[*t] + self.disc.stride_bound[*t])
                    .unwrap();
                let bnd = within - self.disc.n_bound_before_type[t];
                let ok = pid.particle_type.map_or(true, |pt| pt == t)
                    && pid.bound_state.map_or(true, |pb| pb == bnd)
                    && pid.section.map_or(true, |ps| ps == sec);
                if ok {
                    apply(v, value, dir);
                }
            }
            return true;
        }

        if pid.name == hash_string("INIT_C") {
            let Some(c) = pid.component else { return false };
            if c >= n_comp {
                return false;
            }
            apply(&mut self.init_c[c], value, dir);
            return true;
        }

        if dir.is_none() {
            return self.conv_disp.set_parameter(pid, value);
        }
        self.conv_disp
            .set_sensitive_parameter(pid, dir.unwrap(), value)
    }
}

/// Residual and analytic Jacobian of one `(type, axial cell)` particle
/// block: radial diffusion, surface diffusion and the shared cell kernel.
#[allow(clippy::too_many_arguments)]
fn residual_particle_block<T: CellScalar, L: ParamLift<T>>(
    env: &ParticleEnv<'_>,
    par_type: usize,
    col_cell: usize,
    y: &[T],
    ydot: Option<&[f64]>,
    res_block: &mut [T],
    jac: &mut BandMatrix,
    want_jac: bool,
) {
    let disc = env.disc;
    let idx = Indexer::new(disc);
    let n_comp = disc.n_comp;
    let n_cells = disc.n_par_cell[par_type];
    let shell = idx.stride_par_shell(par_type);
    let stride_bound = disc.stride_bound[par_type];
    let block_offset = idx.offset_cp_cell(par_type, col_cell);

    let par_diff = &section_dependent_slice(env.par_diffusion, n_comp * disc.n_par_type, env.sec)
        [par_type * n_comp..(par_type + 1) * n_comp];
    let surf_diff: &[Active] = if disc.n_total_bound > 0 {
        let all = section_dependent_slice(env.par_surf_diffusion, disc.n_total_bound, env.sec);
        let lo = disc.n_bound_before_type[par_type];
        &all[lo..lo + stride_bound]
    } else {
        &[]
    };
    let pore_access = &section_dependent_slice(env.pore_access, n_comp * disc.n_par_type, env.sec)
        [par_type * n_comp..(par_type + 1) * n_comp];

    let geo_lo = disc.n_par_cells_before_type[par_type];
    let outer = &env.geometry.outer_surf_area_per_volume[geo_lo..geo_lo + n_cells];
    let inner = &env.geometry.inner_surf_area_per_volume[geo_lo..geo_lo + n_cells];
    let center = &env.geometry.center_radius[geo_lo..geo_lo + n_cells];

    let binding = &*env.binding_models[env.binding_index[par_type]];
    let qs = binding.reaction_quasi_stationarity();
    let reaction = env.reaction_index[par_type]
        .map(|slot| &*env.reaction_models[slot])
        .filter(|r| r.num_reactions_combined() > 0);
    let has_surf_diff = env.has_surface_diffusion[par_type];

    let base = par_type * n_comp;
    let cell_params = CellParameters {
        n_comp,
        n_bound: &disc.n_bound[base..base + n_comp],
        bound_offset: &disc.bound_offset[base..base + n_comp],
        stride_bound,
        qs_binding: qs,
        porosity: &env.par_porosity[par_type],
        pore_access,
        binding,
        reaction,
    };

    let z = (0.5 + col_cell as f64) / disc.n_col as f64;
    let mut ws = Workspace::new(env.workspace_size);

    if want_jac {
        jac.set_all(0.0);
    }

    for s in 0..n_cells {
        let pos = ColumnPosition {
            z,
            r: center[s].value() / env.par_radius[par_type].value(),
        };
        let row0 = s * shell;
        let y_cell = &y[block_offset + row0..block_offset + row0 + shell];
        let ydot_cell = ydot.map(|yd| &yd[block_offset + row0..block_offset + row0 + shell]);
        {
            let mut row = jac.row_mut(row0);
            let jac_opt = if want_jac { Some(&mut row) } else { None };
            residual_cell::<T, L>(
                env.t,
                env.sec,
                &pos,
                y_cell,
                ydot_cell,
                &mut res_block[row0..row0 + shell],
                jac_opt,
                &cell_params,
                &mut ws,
            );
        }

        let a_out: T = L::lift(&outer[s]);
        let a_in: T = L::lift(&inner[s]);
        let a_out_v = outer[s].value();
        let a_in_v = inner[s].value();

        // mobile phase: radial diffusion plus surface-diffusion hold-up
        for c in 0..n_comp {
            let row = row0 + c;
            let cur = block_offset + row;
            let n_bound_c = disc.n_bound[base + c];
            let dp: T = L::lift(&par_diff[c]);
            let dp_v = par_diff[c].value();
            let inv_beta: T = cell_params.inv_beta_p::<T, L>(c);
            let inv_beta_v = {
                let eps = env.par_porosity[par_type].value();
                (1.0 - eps) / (eps * pore_access[c].value())
            };

            // outer face; the outermost shell couples to the film flux
            // through the flux equations instead
            if s != 0 {
                let dr: T = L::lift(&center[s - 1]) - L::lift(&center[s]);
                let dr_v = center[s - 1].value() - center[s].value();
                let grad_cp = (y[cur - shell].clone() - y[cur].clone()) / dr.clone();
                res_block[row] -= a_out.clone() * dp.clone() * grad_cp;

                if has_surf_diff {
                    for i in 0..n_bound_c {
                        let cur_idx = (n_comp - c + idx.offset_bound_comp(par_type, c) + i) as isize;
                        let ds: T = L::lift(&surf_diff[idx.offset_bound_comp(par_type, c) + i]);
                        let q_cur = (cur as isize + cur_idx) as usize;
                        let grad_q = (y[q_cur - shell].clone() - y[q_cur].clone()) / dr.clone();
                        res_block[row] -= a_out.clone() * ds * inv_beta.clone() * grad_q;
                    }
                }
                if want_jac {
                    let mut jr = jac.row_mut(row);
                    jr[0] += a_out_v * dp_v / dr_v;
                    jr[-(shell as isize)] += -a_out_v * dp_v / dr_v;
                    if has_surf_diff {
                        for i in 0..n_bound_c {
                            let cur_idx =
                                (n_comp - c + idx.offset_bound_comp(par_type, c) + i) as isize;
                            let ds_v = surf_diff[idx.offset_bound_comp(par_type, c) + i].value();
                            jr[cur_idx] += a_out_v * inv_beta_v * ds_v / dr_v;
                            jr[cur_idx - shell as isize] += -a_out_v * inv_beta_v * ds_v / dr_v;
                        }
                    }
                }
            }

            // inner face; vanishes at the innermost shell
            if s != n_cells - 1 {
                let dr: T = L::lift(&center[s]) - L::lift(&center[s + 1]);
                let dr_v = center[s].value() - center[s + 1].value();
                let grad_cp = (y[cur].clone() - y[cur + shell].clone()) / dr.clone();
                res_block[row] += a_in.clone() * dp.clone() * grad_cp;

                if has_surf_diff {
                    for i in 0..n_bound_c {
                        let cur_idx = (n_comp - c + idx.offset_bound_comp(par_type, c) + i) as isize;
                        let ds: T = L::lift(&surf_diff[idx.offset_bound_comp(par_type, c) + i]);
                        let q_cur = (cur as isize + cur_idx) as usize;
                        let grad_q = (y[q_cur].clone() - y[q_cur + shell].clone()) / dr.clone();
                        res_block[row] += a_in.clone() * ds * inv_beta.clone() * grad_q;
                    }
                }
                if want_jac {
                    let mut jr = jac.row_mut(row);
                    jr[0] += a_in_v * dp_v / dr_v;
                    jr[shell as isize] += -a_in_v * dp_v / dr_v;
                    if has_surf_diff {
                        for i in 0..n_bound_c {
                            let cur_idx =
                                (n_comp - c + idx.offset_bound_comp(par_type, c) + i) as isize;
                            let ds_v = surf_diff[idx.offset_bound_comp(par_type, c) + i].value();
                            jr[cur_idx] += a_in_v * inv_beta_v * ds_v / dr_v;
                            jr[cur_idx + shell as isize] += -a_in_v * inv_beta_v * ds_v / dr_v;
                        }
                    }
                }
            }
        }

        // solid phase: surface-diffusion transport of dynamic bound states
        if has_surf_diff && binding.has_dynamic_reactions() {
            for bnd in 0..stride_bound {
                if qs[bnd] {
                    continue;
                }
                let row = row0 + n_comp + bnd;
                let cur = block_offset + row;
                let ds: T = L::lift(&surf_diff[bnd]);
                let ds_v = surf_diff[bnd].value();

                if s != 0 {
                    let dr: T = L::lift(&center[s - 1]) - L::lift(&center[s]);
                    let dr_v = center[s - 1].value() - center[s].value();
                    let grad_q = (y[cur - shell].clone() - y[cur].clone()) / dr;
                    res_block[row] -= a_out.clone() * ds.clone() * grad_q;
                    if want_jac {
                        let mut jr = jac.row_mut(row);
                        jr[0] += a_out_v * ds_v / dr_v;
                        jr[-(shell as isize)] += -a_out_v * ds_v / dr_v;
                    }
                }
                if s != n_cells - 1 {
                    let dr: T = L::lift(&center[s]) - L::lift(&center[s + 1]);
                    let dr_v = center[s].value() - center[s + 1].value();
                    let grad_q = (y[cur].clone() - y[cur + shell].clone()) / dr;
                    res_block[row] += a_in.clone() * ds.clone() * grad_q;
                    if want_jac {
                        let mut jr = jac.row_mut(row);
                        jr[0] += a_in_v * ds_v / dr_v;
                        jr[shell as isize] += -a_in_v * ds_v / dr_v;
                    }
                }
            }
        }
    }
}
