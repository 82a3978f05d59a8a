//! Linear solvers for the block-structured Newton matrix.
//!
//! The banded diagonal blocks are factorized in place
//! ([`crate::matrix::FactorizableBandMatrix`]); the reduced flux system is
//! solved matrix-free by [`Gmres`]. The Schur-complement assembly itself
//! lives with the unit operation in [`crate::model::grm`].

pub mod gmres;

pub use gmres::{Gmres, GmresStats, Orthogonalization};
