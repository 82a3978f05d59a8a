//! Matrix storage used by the unit operation: banded diagonal blocks and
//! coordinate-format off-diagonal coupling blocks.

pub mod band;
pub mod sparse;

pub use band::{BandMatrix, FactorizableBandMatrix, RowMut};
pub use sparse::SparseMatrix;
