//! Parameter identifiers, the hierarchical parameter provider, and helpers
//! for section-dependent and multiplexed parameter storage.
//!
//! A [`ParamId`] addresses one scalar parameter by name hash plus index
//! tuple; `None` in an index slot is the explicit "independent" sentinel.
//! Multiplexed parameters (a single value applied to all particle types or
//! sections) are expanded into the value store on assignment and read back
//! through [`section_dependent_slice`].

use std::collections::HashMap;

use crate::config_error;
use crate::error::ChromsolError;
use crate::scalar::Active;

pub type UnitOpIdx = u32;

/// FNV-1a 64-bit hash, used to key parameters by name.
pub const fn hash_string(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut hash = 0xcbf29ce484222325u64;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(0x100000001b3);
        i += 1;
    }
    hash
}

/// Structured parameter identifier. `None` marks an index slot as
/// independent of that dimension.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ParamId {
    pub name: u64,
    pub unit: UnitOpIdx,
    pub component: Option<usize>,
    pub particle_type: Option<usize>,
    pub bound_state: Option<usize>,
    pub reaction: Option<usize>,
    pub section: Option<usize>,
}

impl ParamId {
    pub fn new(name: &str, unit: UnitOpIdx) -> Self {
        Self {
            name: hash_string(name),
            unit,
            component: None,
            particle_type: None,
            bound_state: None,
            reaction: None,
            section: None,
        }
    }

    pub fn with_component(mut self, component: usize) -> Self {
        self.component = Some(component);
        self
    }

    pub fn with_particle_type(mut self, particle_type: usize) -> Self {
        self.particle_type = Some(particle_type);
        self
    }

    pub fn with_bound_state(mut self, bound_state: usize) -> Self {
        self.bound_state = Some(bound_state);
        self
    }

    pub fn with_section(mut self, section: usize) -> Self {
        self.section = Some(section);
        self
    }
}

/// A value held by a parameter provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    String(String),
    IntArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}
impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Int(v as i64)
    }
}
impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}
impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}
impl From<Vec<i64>> for ParamValue {
    fn from(v: Vec<i64>) -> Self {
        ParamValue::IntArray(v)
    }
}
impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::DoubleArray(v)
    }
}
impl From<Vec<&str>> for ParamValue {
    fn from(v: Vec<&str>) -> Self {
        ParamValue::StringArray(v.into_iter().map(str::to_string).collect())
    }
}

/// Hierarchical read access to configuration input.
///
/// Scalar getters accept scalar entries; the array getters additionally
/// accept a scalar as a one-element array, which is how multiplexed fields
/// like `NPAR` arrive.
pub trait ParameterProvider {
    fn exists(&self, name: &str) -> bool;
    fn get_int(&self, name: &str) -> Result<i64, ChromsolError>;
    fn get_double(&self, name: &str) -> Result<f64, ChromsolError>;
    fn get_bool(&self, name: &str) -> Result<bool, ChromsolError>;
    fn get_string(&self, name: &str) -> Result<String, ChromsolError>;
    fn get_int_array(&self, name: &str) -> Result<Vec<i64>, ChromsolError>;
    fn get_double_array(&self, name: &str) -> Result<Vec<f64>, ChromsolError>;
    fn get_string_array(&self, name: &str) -> Result<Vec<String>, ChromsolError>;
    fn push_scope(&mut self, scope: &str);
    fn pop_scope(&mut self);
}

/// In-memory parameter provider keyed by `scope/.../NAME` paths.
#[derive(Debug, Default, Clone)]
pub struct InMemoryParameterProvider {
    values: HashMap<String, ParamValue>,
    scopes: Vec<String>,
}

impl InMemoryParameterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value at an absolute `scope/.../NAME` path.
    pub fn add(&mut self, path: &str, value: impl Into<ParamValue>) -> &mut Self {
        self.values.insert(path.to_string(), value.into());
        self
    }

    fn key(&self, name: &str) -> String {
        if self.scopes.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.scopes.join("/"), name)
        }
    }

    fn get(&self, name: &str) -> Result<&ParamValue, ChromsolError> {
        self.values.get(&self.key(name)).ok_or_else(|| {
            config_error!(MissingParameter {
                field: self.key(name),
            })
        })
    }
}

impl ParameterProvider for InMemoryParameterProvider {
    fn exists(&self, name: &str) -> bool {
        self.values.contains_key(&self.key(name))
    }

    fn get_int(&self, name: &str) -> Result<i64, ChromsolError> {
        match self.get(name)? {
            ParamValue::Int(v) => Ok(*v),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn get_double(&self, name: &str) -> Result<f64, ChromsolError> {
        match self.get(name)? {
            ParamValue::Double(v) => Ok(*v),
            ParamValue::Int(v) => Ok(*v as f64),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn get_bool(&self, name: &str) -> Result<bool, ChromsolError> {
        Ok(self.get_int(name)? != 0)
    }

    fn get_string(&self, name: &str) -> Result<String, ChromsolError> {
        match self.get(name)? {
            ParamValue::String(v) => Ok(v.clone()),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn get_int_array(&self, name: &str) -> Result<Vec<i64>, ChromsolError> {
        match self.get(name)? {
            ParamValue::IntArray(v) => Ok(v.clone()),
            ParamValue::Int(v) => Ok(vec![*v]),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn get_double_array(&self, name: &str) -> Result<Vec<f64>, ChromsolError> {
        match self.get(name)? {
            ParamValue::DoubleArray(v) => Ok(v.clone()),
            ParamValue::Double(v) => Ok(vec![*v]),
            ParamValue::Int(v) => Ok(vec![*v as f64]),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn get_string_array(&self, name: &str) -> Result<Vec<String>, ChromsolError> {
        match self.get(name)? {
            ParamValue::StringArray(v) => Ok(v.clone()),
            ParamValue::String(v) => Ok(vec![v.clone()]),
            _ => Err(config_error!(WrongParameterType {
                field: name.to_string(),
            })),
        }
    }

    fn push_scope(&mut self, scope: &str) {
        self.scopes.push(scope.to_string());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }
}

/// How a vector-valued parameter was multiplexed on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexMode {
    /// One block shared across particle types, expanded on assignment.
    Shared,
    /// Explicit per-type values, one block.
    PerType,
    /// Shared across types, one block per section.
    SharedSection,
    /// Explicit per-type values, one block per section.
    PerTypeSection,
}

impl MultiplexMode {
    pub fn is_section_dependent(self) -> bool {
        matches!(
            self,
            MultiplexMode::SharedSection | MultiplexMode::PerTypeSection
        )
    }
}

/// Returns the block of `values` for section `sec`, or the sole block when
/// the parameter is not section-dependent.
pub fn section_dependent_slice(values: &[Active], block: usize, sec: usize) -> &[Active] {
    debug_assert!(block > 0 && values.len() >= block);
    let n_blocks = values.len() / block;
    let s = sec.min(n_blocks - 1);
    &values[block * s..block * (s + 1)]
}

/// Reads a scalar-or-per-type parameter (`PAR_RADIUS` style). Returns the
/// values expanded to one per type and whether a single value was given.
pub fn read_type_multiplexed(
    provider: &dyn ParameterProvider,
    field: &str,
    n_par_type: usize,
) -> Result<(Vec<Active>, bool), ChromsolError> {
    let raw = provider.get_double_array(field)?;
    if raw.len() == 1 {
        Ok((vec![Active::new(raw[0]); n_par_type], true))
    } else if raw.len() >= n_par_type {
        Ok((
            raw[..n_par_type].iter().map(|v| Active::new(*v)).collect(),
            false,
        ))
    } else {
        Err(config_error!(TooFewElements {
            field: field.to_string(),
            expected: n_par_type,
        }))
    }
}

/// Reads a component/particle-type/section parameter (`FILM_DIFFUSION`
/// style). Accepts `nComp` entries (shared across types), or a positive
/// multiple of `nComp * nParType` (one block per section).
pub fn read_comp_type_sec_param(
    provider: &dyn ParameterProvider,
    field: &str,
    n_par_type: usize,
    n_comp: usize,
) -> Result<(Vec<Active>, MultiplexMode), ChromsolError> {
    let raw = provider.get_double_array(field)?;
    let block = n_comp * n_par_type;
    if raw.len() == n_comp && n_par_type > 1 {
        let mut values = Vec::with_capacity(block);
        for _ in 0..n_par_type {
            values.extend(raw.iter().map(|v| Active::new(*v)));
        }
        return Ok((values, MultiplexMode::Shared));
    }
    if raw.is_empty() || raw.len() % block != 0 {
        return Err(config_error!(NotAMultiple {
            field: field.to_string(),
            multiple: block,
            found: raw.len(),
        }));
    }
    let mode = if raw.len() > block {
        MultiplexMode::PerTypeSection
    } else {
        MultiplexMode::PerType
    };
    Ok((raw.iter().map(|v| Active::new(*v)).collect(), mode))
}

/// Reads a bound-state/type/section parameter (`PAR_SURFDIFFUSION` style);
/// ordering inside one block is `bnd0comp0, bnd0comp1, ..., bnd1comp0, ...`
/// with particle types consecutive.
pub fn read_bound_type_sec_param(
    provider: &dyn ParameterProvider,
    field: &str,
    n_total_bound: usize,
) -> Result<(Vec<Active>, MultiplexMode), ChromsolError> {
    let raw = provider.get_double_array(field)?;
    if n_total_bound == 0 {
        return Ok((Vec::new(), MultiplexMode::PerType));
    }
    if raw.len() < n_total_bound || raw.len() % n_total_bound != 0 {
        return Err(config_error!(NotAMultiple {
            field: field.to_string(),
            multiple: n_total_bound,
            found: raw.len(),
        }));
    }
    let mode = if raw.len() > n_total_bound {
        MultiplexMode::PerTypeSection
    } else {
        MultiplexMode::PerType
    };
    Ok((raw.iter().map(|v| Active::new(*v)).collect(), mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lookup() {
        let mut pp = InMemoryParameterProvider::new();
        pp.add("NCOMP", 3i64)
            .add("discretization/NCOL", 16i64)
            .add("discretization/PAR_DISC_TYPE", vec!["EQUIDISTANT_PAR"]);
        assert_eq!(pp.get_int("NCOMP").unwrap(), 3);
        assert!(!pp.exists("NCOL"));
        pp.push_scope("discretization");
        assert_eq!(pp.get_int("NCOL").unwrap(), 16);
        assert_eq!(
            pp.get_string_array("PAR_DISC_TYPE").unwrap(),
            vec!["EQUIDISTANT_PAR"]
        );
        pp.pop_scope();
        assert!(pp.exists("NCOMP"));
    }

    #[test]
    fn scalar_promotes_to_array() {
        let mut pp = InMemoryParameterProvider::new();
        pp.add("NPAR", 4i64);
        assert_eq!(pp.get_int_array("NPAR").unwrap(), vec![4]);
    }

    #[test]
    fn missing_field_is_reported_with_path() {
        let mut pp = InMemoryParameterProvider::new();
        pp.push_scope("discretization");
        let err = pp.get_int("NCOL").unwrap_err();
        assert!(err.to_string().contains("discretization/NCOL"));
    }

    #[test]
    fn comp_type_sec_accepts_shared_and_sectioned() {
        let mut pp = InMemoryParameterProvider::new();
        pp.add("FILM_DIFFUSION", vec![1.0, 2.0]);
        let (vals, mode) = read_comp_type_sec_param(&pp, "FILM_DIFFUSION", 2, 2).unwrap();
        assert_eq!(mode, MultiplexMode::Shared);
        assert_eq!(vals.len(), 4);
        assert_eq!(vals[2].value(), 1.0);

        pp.add("PAR_DIFFUSION", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let (vals, mode) = read_comp_type_sec_param(&pp, "PAR_DIFFUSION", 2, 2).unwrap();
        assert_eq!(mode, MultiplexMode::PerTypeSection);
        assert_eq!(section_dependent_slice(&vals, 4, 1)[0].value(), 5.0);

        pp.add("BAD", vec![1.0, 2.0, 3.0]);
        assert!(read_comp_type_sec_param(&pp, "BAD", 2, 2).is_err());
    }

    #[test]
    fn param_id_slots_default_to_independent() {
        let id = ParamId::new("PAR_RADIUS", 0).with_particle_type(1);
        assert_eq!(id.component, None);
        assert_eq!(id.particle_type, Some(1));
        assert_eq!(id.name, hash_string("PAR_RADIUS"));
    }
}
