//! Exact diagonalization of finite fermionic many-body Hamiltonians.
//!
//! Hamiltonians are polynomials in fermionic creation/annihilation operators
//! (see [`op`]) acting on a Fock space of up to 63 modes (see [`fock`]). The
//! space is partitioned into subspaces invariant under the Hamiltonian and
//! under every individual ladder operator, each block is diagonalized
//! independently, and thermal observables are evaluated in the resulting
//! eigenbasis (see [`diag`]).

use std::fmt;
use nalgebra as na;

pub mod fock;
pub mod op;
mod partition;
pub mod diag;
mod observables;

pub use fock::{ FockState, OpSet };
pub use op::{ Operator, c, c_dag, n };
pub use diag::{ BlockDiag, Eigensystem, Error, Subspace };

/// Marker for scalar types usable as Hamiltonian coefficients: `f64` for
/// real-symmetric problems and [`Complex64`][num_complex::Complex64]
/// otherwise.
pub trait Scalar:
    na::ComplexField<RealField = f64> + Copy + Send + Sync + fmt::Display
{ }

impl<T> Scalar for T
where T: na::ComplexField<RealField = f64> + Copy + Send + Sync + fmt::Display
{ }
