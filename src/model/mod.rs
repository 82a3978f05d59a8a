//! Unit-operation models and their building blocks.

pub mod binding;
pub mod cell;
pub mod conv_disp;
pub mod grm;
pub mod indexer;
pub mod radial;
pub mod reaction;

pub use conv_disp::ConvectionDispersionOperator;
pub use grm::GeneralRateModel;
pub use indexer::{Discretization, Indexer};

/// Spatial position inside the column, used by externally-dependent binding
/// and reaction models. `z` is the normalized axial position in `[0, 1]`,
/// `r` the normalized radial position inside the particle.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnPosition {
    pub z: f64,
    pub r: f64,
}

/// Per-task scratch buffer handed to binding and reaction models.
///
/// Sized once from the maximum per-cell working set; models slice what they
/// declared via `workspace_size`.
#[derive(Debug, Default)]
pub struct Workspace {
    buf: Vec<f64>,
}

impl Workspace {
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0.0; size],
        }
    }

    pub fn buffer(&mut self, n: usize) -> &mut [f64] {
        if self.buf.len() < n {
            self.buf.resize(n, 0.0);
        }
        &mut self.buf[..n]
    }
}
