//! Thermal and spectral observables evaluated in the eigenbasis of a
//! [`BlockDiag`].
//!
//! All routines here reduce to one shared primitive: the eigenbasis matrix of
//! an arbitrary monomial restricted to a starting subspace, computed by
//! walking the monomial's factors right to left through the stored connection
//! maps and composing the stored block matrices. A factor with no connection
//! from the current subspace kills the whole monomial (a normal zero
//! contribution, not an error).
//!
//! The density matrix is strictly Boltzmann-diagonal: its blocks are diagonal
//! in the energy eigenbasis with entries exp(−βE)/Z and carry no off-diagonal
//! coherence.

use nalgebra as na;
use crate::{
    diag::{ BlockDiag, Error },
    op::{ Monomial, Operator },
    Scalar,
};

// absolute tolerance on the summed off-diagonal weight of a matrix claimed
// diagonal
const IS_DIAGONAL_EPS: f64 = 1e-11;

impl<T: Scalar> BlockDiag<T> {
    /// Partition function Z(β) = Σ exp(−βE) over all eigenstates.
    ///
    /// Energies are ground-state-shifted, so the ground state contributes
    /// exactly 1.
    pub fn partition_function(&self, beta: f64) -> f64 {
        self.eigensystems.iter()
            .flat_map(|es| es.eigenvalues.iter())
            .map(|e| (-beta * e).exp())
            .sum()
    }

    /// Equilibrium density matrix at inverse temperature `beta`, one diagonal
    /// block per subspace with entries exp(−βE)/Z.
    pub fn density_matrix(&self, beta: f64) -> Vec<na::DMatrix<T>> {
        let z = self.partition_function(beta);
        self.eigensystems.iter()
            .map(|es| {
                let d = es.eigenvalues.len();
                let weights: na::DVector<T>
                    = na::DVector::from_fn(d, |i, _| {
                        T::from_real((-beta * es.eigenvalues[i]).exp() / z)
                    });
                na::DMatrix::from_diagonal(&weights)
            })
            .collect()
    }

    // eigenbasis matrix of `mono` restricted to starting subspace `sp`,
    // walking factors right to left through the connection maps; `None` as
    // soon as any factor has no connection from the current subspace
    pub(crate) fn monomial_matrix(&self, mono: &Monomial, sp: usize)
        -> Option<(usize, na::DMatrix<T>)>
    {
        let d = self.subspaces[sp].dim();
        let mut b = sp;
        let mut acc: na::DMatrix<T> = na::DMatrix::identity(d, d);
        for op in mono.factors().iter().rev() {
            let (conn, mat) = if op.dag {
                (
                    self.creation_connection[op.index][b],
                    self.cdag_matrices[op.index][b].as_ref(),
                )
            } else {
                (
                    self.annihilation_connection[op.index][b],
                    self.c_matrices[op.index][b].as_ref(),
                )
            };
            let b2 = conn?;
            acc = mat? * acc;
            b = b2;
        }
        Some((b, acc))
    }

    /// Trace of `op` against a density matrix from
    /// [`density_matrix`][Self::density_matrix].
    ///
    /// Monomials mapping a subspace anywhere but back into itself fall out of
    /// the trace and are skipped. Block shapes disagreeing with the subspace
    /// structure are reported as [`Error::SizeMismatch`].
    pub fn trace_rho_op(&self, rho: &[na::DMatrix<T>], op: &Operator<T>)
        -> Result<T, Error>
    {
        if rho.len() != self.subspaces.len() {
            return Err(Error::SizeMismatch {
                expected: self.subspaces.len(),
                got: rho.len(),
            });
        }
        for (sub, block) in self.subspaces.iter().zip(rho.iter()) {
            if block.nrows() != sub.dim() || block.ncols() != sub.dim() {
                return Err(Error::SizeMismatch {
                    expected: sub.dim(),
                    got: block.nrows(),
                });
            }
        }
        let mut acc = T::zero();
        for (mono, &x) in op.terms() {
            for sp in 0..self.subspaces.len() {
                let (dest, m) = match self.monomial_matrix(mono, sp) {
                    Some(res) => res,
                    None => continue,
                };
                if dest != sp { continue; }
                acc += x * (m * &rho[sp]).trace();
            }
        }
        Ok(acc)
    }

    /// Act with `op` on a full-space vector expressed in the eigenbasis,
    /// returning the resulting full-space vector.
    pub fn act(&self, op: &Operator<T>, v: &na::DVector<T>)
        -> Result<na::DVector<T>, Error>
    {
        let full = self.full_dim();
        if v.len() != full {
            return Err(Error::SizeMismatch { expected: full, got: v.len() });
        }
        let mut out: na::DVector<T> = na::DVector::zeros(full);
        for (mono, &x) in op.terms() {
            for sp in 0..self.subspaces.len() {
                let (dest, m) = match self.monomial_matrix(mono, sp) {
                    Some(res) => res,
                    None => continue,
                };
                let src = self.subspace_range(sp);
                let dst = self.subspace_range(dest);
                let w = (m * v.rows(src.start, src.len())) * x;
                let mut seg = out.rows_mut(dst.start, dst.len());
                seg += w;
            }
        }
        Ok(out)
    }

    /// Per-subspace, per-eigenstate eigenvalues of a quantum-number
    /// operator, read off the diagonal of its eigenbasis matrix.
    ///
    /// `op` must commute with the Hamiltonian. Monomials escaping their
    /// subspace are skipped and off-diagonal weight is not inspected; use
    /// [`quantum_number_eigenvalues_checked`][Self::quantum_number_eigenvalues_checked]
    /// to verify the matrix really is diagonal.
    pub fn quantum_number_eigenvalues(&self, op: &Operator<T>)
        -> Result<Vec<Vec<f64>>, Error>
    {
        if !op.commutator(&self.h).is_zero() {
            return Err(Error::NotAQuantumNumber { index: 0 });
        }
        let mut values: Vec<Vec<f64>>
            = Vec::with_capacity(self.subspaces.len());
        for sp in 0..self.subspaces.len() {
            let d = self.subspaces[sp].dim();
            let mut vals = vec![0.0; d];
            for (mono, &x) in op.terms() {
                let (dest, m) = match self.monomial_matrix(mono, sp) {
                    Some(res) => res,
                    None => continue,
                };
                if dest != sp { continue; }
                for (i, v) in vals.iter_mut().enumerate() {
                    *v += (x * m[(i, i)]).real();
                }
            }
            values.push(vals);
        }
        Ok(values)
    }

    /// Like
    /// [`quantum_number_eigenvalues`][Self::quantum_number_eigenvalues], but
    /// built from the full eigenbasis matrix of `op`, verifying that the
    /// matrix really is diagonal subspace by subspace.
    ///
    /// A monomial escaping its subspace, or off-diagonal weight above
    /// tolerance, means `op` is not constant on the subspaces and is reported
    /// as [`Error::NotDiagonal`].
    pub fn quantum_number_eigenvalues_checked(&self, op: &Operator<T>)
        -> Result<Vec<Vec<f64>>, Error>
    {
        if !op.commutator(&self.h).is_zero() {
            return Err(Error::NotAQuantumNumber { index: 0 });
        }
        let mut values: Vec<Vec<f64>>
            = Vec::with_capacity(self.subspaces.len());
        for sp in 0..self.subspaces.len() {
            let d = self.subspaces[sp].dim();
            let mut acc: na::DMatrix<T> = na::DMatrix::zeros(d, d);
            for (mono, &x) in op.terms() {
                let (dest, m) = match self.monomial_matrix(mono, sp) {
                    Some(res) => res,
                    None => continue,
                };
                if dest != sp {
                    let weight: f64
                        = m.iter().map(|e| e.modulus()).sum::<f64>()
                        * x.modulus();
                    return Err(Error::NotDiagonal { weight });
                }
                acc += m * x;
            }
            let off: f64
                = acc.iter().map(|e| e.modulus()).sum::<f64>()
                - acc.diagonal().iter().map(|e| e.modulus()).sum::<f64>();
            if off > IS_DIAGONAL_EPS {
                return Err(Error::NotDiagonal { weight: off });
            }
            values.push(acc.diagonal().iter().map(|e| e.real()).collect());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod test {
    use nalgebra as na;
    use crate::fock::OpSet;
    use crate::op::{ c, c_dag, n };
    use super::*;

    const TOL: f64 = 1e-12;

    fn hubbard() -> BlockDiag<f64> {
        let ops = OpSet::new(["up", "dn"]);
        let h: Operator<f64> = 2.0 * (n(0) * n(1)) + 0.5 * (n(0) - n(1));
        BlockDiag::with_quantum_numbers(h, &ops, &[n(0), n(1)]).unwrap()
    }

    fn hubbard_anomalous() -> BlockDiag<f64> {
        let ops = OpSet::new(["up", "dn"]);
        let half: Operator<f64> = Operator::constant(0.5);
        let h = 2.0 * ((n(0) - half.clone()) * (n(1) - half))
            + 0.3 * (c_dag(0) * c(1) + c_dag(1) * c(0))
            + 0.1 * (c_dag(0) * c_dag(1) - c(0) * c(1));
        BlockDiag::new(h, &ops).unwrap()
    }

    #[test]
    fn partition_function_sums_boltzmann_weights() {
        let ad = hubbard();
        let beta = 2.5_f64;
        let expect: f64 = [0.0, 0.5, 1.0, 2.5].iter()
            .map(|e| (-beta * e).exp())
            .sum();
        assert!((ad.partition_function(beta) - expect).abs() < TOL);
    }

    #[test]
    fn density_matrix_has_unit_trace() {
        for ad in [hubbard(), hubbard_anomalous()] {
            for beta in [0.1, 1.0, 25.0] {
                let rho = ad.density_matrix(beta);
                let tr: f64 = rho.iter().map(na::DMatrix::trace).sum();
                assert!((tr - 1.0).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn thermal_occupation_of_hubbard_atom() {
        let ad = hubbard();
        let beta = 2.0;
        let rho = ad.density_matrix(beta);
        let avg = ad.trace_rho_op(&rho, &n(0)).unwrap();
        // n_up = 1 in the states at shifted energies 1.0 and 2.5
        let z = ad.partition_function(beta);
        let expect = ((-beta * 1.0_f64).exp() + (-beta * 2.5_f64).exp()) / z;
        assert!((avg - expect).abs() < TOL);
    }

    #[test]
    fn trace_rejects_mismatched_blocks() {
        let ad = hubbard();
        let rho = vec![na::DMatrix::<f64>::identity(2, 2); 4];
        assert!(matches!(
            ad.trace_rho_op(&rho, &n(0)),
            Err(Error::SizeMismatch { expected: 1, got: 2 }),
        ));
        let rho = ad.density_matrix(1.0);
        assert!(matches!(
            ad.trace_rho_op(&rho[..2], &n(0)),
            Err(Error::SizeMismatch { expected: 4, got: 2 }),
        ));
    }

    #[test]
    fn acting_on_the_vacuum() {
        let ad = hubbard();
        let created = ad.act(&c_dag(0), ad.vacuum_state()).unwrap();
        assert!((created.norm() - 1.0).abs() < 1e-10);
        // the image is an n_up = 1 eigenvector
        let counted = ad.act(&n(0), &created).unwrap();
        assert!((counted - &created).norm() < 1e-10);
        // annihilating the empty mode kills the state
        let killed = ad.act(&c(0), ad.vacuum_state()).unwrap();
        assert_eq!(killed.norm(), 0.0);
    }

    #[test]
    fn act_rejects_wrong_length() {
        let ad = hubbard();
        let v = na::DVector::<f64>::zeros(3);
        assert!(matches!(
            ad.act(&n(0), &v),
            Err(Error::SizeMismatch { expected: 4, got: 3 }),
        ));
    }

    #[test]
    fn quantum_number_values_match_partition() {
        let ad = hubbard();
        let vals = ad.quantum_number_eigenvalues(&n(0)).unwrap();
        let checked = ad.quantum_number_eigenvalues_checked(&n(0)).unwrap();
        vals.iter().flatten().zip(checked.iter().flatten())
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-10));
        let from_partition: Vec<f64>
            = ad.quantum_numbers().unwrap().iter().map(|qn| qn[0]).collect();
        vals.into_iter().flatten().zip(from_partition)
            .for_each(|(a, b)| assert!((a - b).abs() < 1e-10));
    }

    #[test]
    fn quantum_number_values_follow_energy_order() {
        // the dim-2 subspaces of this model diagonalize with their occupied
        // states lowest, so eigenstate order differs from Fock order
        let ops = OpSet::new(["a", "b"]);
        let h: Operator<f64> = -1.0 * n(0);
        let q: Operator<f64> = 2.0 * n(1) + n(0) * n(1);
        let ad = BlockDiag::with_quantum_numbers(h, &ops, &[q]).unwrap();
        assert_eq!(ad.n_subspaces(), 2);
        let pair: Operator<f64> = n(0) * n(1);
        let vals = ad.quantum_number_eigenvalues(&pair).unwrap();
        let checked = ad.quantum_number_eigenvalues_checked(&pair).unwrap();
        // the doubly occupied state is the second subspace's ground state
        let expect = [vec![0.0, 0.0], vec![1.0, 0.0]];
        for got in [&vals, &checked] {
            got.iter().flatten().zip(expect.iter().flatten())
                .for_each(|(a, b)| assert!((a - b).abs() < 1e-12));
        }
    }

    #[test]
    fn noncommuting_operator_is_rejected() {
        let ad = hubbard();
        let bad: Operator<f64> = c_dag(0) * c(1) + c_dag(1) * c(0);
        assert!(matches!(
            ad.quantum_number_eigenvalues(&bad),
            Err(Error::NotAQuantumNumber { index: 0 }),
        ));
        assert!(matches!(
            ad.quantum_number_eigenvalues_checked(&bad),
            Err(Error::NotAQuantumNumber { index: 0 }),
        ));
    }

    #[test]
    fn checked_variant_rejects_subspace_escape() {
        // hopping commutes with 2 n_up n_dn but hops between the dim-1
        // subspaces of the automatic partition
        let ops = OpSet::new(["up", "dn"]);
        let h: Operator<f64> = 2.0 * (n(0) * n(1));
        let ad = BlockDiag::new(h, &ops).unwrap();
        let hop: Operator<f64> = c_dag(0) * c(1) + c_dag(1) * c(0);
        assert!(matches!(
            ad.quantum_number_eigenvalues_checked(&hop),
            Err(Error::NotDiagonal { .. }),
        ));
    }
}
