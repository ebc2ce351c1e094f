//! Many-body operators as weighted sums of creation/annihilation monomials.
//!
//! An [`Operator`] is kept in a normal-ordered canonical form at all times:
//! within each [`Monomial`], every creation operator stands to the left of
//! every annihilation operator, creations are sorted by ascending mode index
//! and annihilations by descending mode index. Reordering a product into this
//! form applies the fermionic anticommutation relations
//!
//! > { c<sub>i</sub>, c<sub>j</sub> } = { c<sub>i</sub><sup>†</sup>,
//! > c<sub>j</sub><sup>†</sup> } = 0,&ensp;
//! > { c<sub>i</sub>, c<sub>j</sub><sup>†</sup> } = δ<sub>ij</sub>
//!
//! so equal operators in canonical position square to zero and each
//! transposition flips the sign of the coefficient. The canonical form makes
//! operator equality (and in particular the zero test used for commutator
//! checks) a plain term-by-term comparison.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt,
    ops::{ Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign },
};
use num_complex::Complex64 as C64;
use crate::{ fock::FockState, Scalar };

// coefficients with magnitude at or below this are dropped from a canonical
// form
const COEFF_EPS: f64 = 1e-10;

/// A single creation or annihilation operator acting on one mode.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LadderOp {
    /// Mode index (bit position in the fundamental operator set).
    pub index: usize,
    /// Creation operator if `true`, annihilation otherwise.
    pub dag: bool,
}

impl Ord for LadderOp {
    // normal-order position: creations to the left of annihilations,
    // creations by ascending index, annihilations by descending index
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.dag, other.dag) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => self.index.cmp(&other.index),
            (false, false) => other.index.cmp(&self.index),
        }
    }
}

impl PartialOrd for LadderOp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LadderOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dag {
            write!(f, "c†({})", self.index)
        } else {
            write!(f, "c({})", self.index)
        }
    }
}

/// An ordered product of ladder operators; one term of an [`Operator`].
///
/// The empty product is the identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Monomial(pub(crate) Vec<LadderOp>);

impl Monomial {
    /// The ladder-operator factors, leftmost first.
    pub fn factors(&self) -> &[LadderOp] { &self.0 }

    /// Number of factors.
    pub fn len(&self) -> usize { self.0.len() }

    /// Return `true` for the identity (empty) product.
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Act on a Fock state, applying the factors right to left.
    ///
    /// Returns the resulting state and accumulated ±1 sign, or `None` as soon
    /// as any factor annihilates the intermediate state.
    pub fn apply_to(&self, state: FockState) -> Option<(FockState, i8)> {
        let mut s = state;
        let mut sign: i8 = 1;
        for op in self.0.iter().rev() {
            let (next, sg) = s.apply(op.index, op.dag)?;
            s = next;
            sign *= sg;
        }
        Some((s, sign))
    }
}

impl fmt::Display for Monomial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() { return write!(f, "1"); }
        let n = self.0.len();
        for (k, op) in self.0.iter().enumerate() {
            op.fmt(f)?;
            if k < n - 1 { write!(f, " ")?; }
        }
        Ok(())
    }
}

/// A many-body operator: a finite sum of monomials with scalar weights, held
/// in normal-ordered canonical form.
#[derive(Clone, Debug, PartialEq)]
pub struct Operator<T> {
    terms: BTreeMap<Monomial, T>,
}

/// The annihilation operator for mode `k`.
pub fn c<T: Scalar>(k: usize) -> Operator<T> {
    Operator::from_monomial(
        T::one(), Monomial(vec![LadderOp { index: k, dag: false }]))
}

/// The creation operator for mode `k`.
pub fn c_dag<T: Scalar>(k: usize) -> Operator<T> {
    Operator::from_monomial(
        T::one(), Monomial(vec![LadderOp { index: k, dag: true }]))
}

/// The number operator c<sup>†</sup><sub>k</sub> c<sub>k</sub> for mode `k`.
pub fn n<T: Scalar>(k: usize) -> Operator<T> {
    Operator::from_monomial(
        T::one(),
        Monomial(vec![
            LadderOp { index: k, dag: true },
            LadderOp { index: k, dag: false },
        ]),
    )
}

impl<T: Scalar> Default for Operator<T> {
    fn default() -> Self { Self::zero() }
}

impl<T: Scalar> Operator<T> {
    /// The zero operator.
    pub fn zero() -> Self { Self { terms: BTreeMap::new() } }

    /// A constant multiple of the identity.
    pub fn constant(x: T) -> Self {
        Self::from_monomial(x, Monomial::default())
    }

    fn from_monomial(coeff: T, mono: Monomial) -> Self {
        let mut op = Self::zero();
        op.add_term(coeff, mono.0);
        op
    }

    // accumulate coeff * (product of ops) into the canonical form,
    // normal-ordering on the way in
    fn add_term(&mut self, coeff: T, ops: Vec<LadderOp>) {
        for (mono, x) in normal_order(coeff, ops) {
            let prune = {
                let entry
                    = self.terms.entry(mono.clone()).or_insert_with(T::zero);
                *entry += x;
                entry.abs() <= COEFF_EPS
            };
            if prune { self.terms.remove(&mono); }
        }
    }

    /// Return `true` if no term survives pruning at tolerance `1e-10`.
    pub fn is_zero(&self) -> bool { self.terms.is_empty() }

    /// Number of monomial terms.
    pub fn n_terms(&self) -> usize { self.terms.len() }

    /// Iterate over `(monomial, coefficient)` terms.
    pub fn terms(&self) -> impl Iterator<Item = (&Monomial, &T)> {
        self.terms.iter()
    }

    /// The Hermitian conjugate: factors reversed with daggers flipped and
    /// coefficients conjugated.
    pub fn dagger(&self) -> Self {
        let mut out = Self::zero();
        for (mono, &x) in self.terms.iter() {
            let ops: Vec<LadderOp>
                = mono.0.iter().rev()
                .map(|op| LadderOp { index: op.index, dag: !op.dag })
                .collect();
            out.add_term(x.conjugate(), ops);
        }
        out
    }

    /// The commutator `[self, other] = self * other - other * self`.
    pub fn commutator(&self, other: &Self) -> Self {
        self.clone() * other.clone() - other.clone() * self.clone()
    }

    /// Largest mode index appearing in any term, if any term has factors.
    pub fn max_index(&self) -> Option<usize> {
        self.terms.keys()
            .flat_map(|m| m.0.iter().map(|op| op.index))
            .max()
    }
}

// insertion sort into normal order; anticommuting swaps flip the sign, and a
// swap of c_k c†_k additionally spawns the contracted term, which is queued
// for re-ordering
fn normal_order<T: Scalar>(coeff: T, ops: Vec<LadderOp>) -> Vec<(Monomial, T)>
{
    let mut queue: Vec<(T, Vec<LadderOp>)> = vec![(coeff, ops)];
    let mut out: Vec<(Monomial, T)> = Vec::new();
    'queue: while let Some((mut coeff, mut ops)) = queue.pop() {
        let mut i = 1;
        while i < ops.len() {
            let mut j = i;
            while j > 0 && ops[j] < ops[j - 1] {
                if ops[j].index == ops[j - 1].index
                    && ops[j].dag != ops[j - 1].dag
                {
                    // c_k c†_k = 1 - c†_k c_k
                    let mut contracted = ops.clone();
                    contracted.drain(j - 1..=j);
                    queue.push((coeff, contracted));
                    ops.swap(j - 1, j);
                    queue.push((-coeff, ops));
                    continue 'queue;
                }
                ops.swap(j - 1, j);
                coeff = -coeff;
                j -= 1;
            }
            i += 1;
        }
        // equal operators are adjacent once sorted and square to zero
        if ops.windows(2).any(|w| w[0] == w[1]) { continue 'queue; }
        out.push((Monomial(ops), coeff));
    }
    out
}

impl<T: Scalar> Add for Operator<T> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl<T: Scalar> AddAssign for Operator<T> {
    fn add_assign(&mut self, rhs: Self) {
        for (mono, x) in rhs.terms {
            let entry = self.terms.entry(mono.clone()).or_insert_with(T::zero);
            *entry += x;
            if entry.abs() <= COEFF_EPS { self.terms.remove(&mono); }
        }
    }
}

impl<T: Scalar> Sub for Operator<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self { self + (-rhs) }
}

impl<T: Scalar> SubAssign for Operator<T> {
    fn sub_assign(&mut self, rhs: Self) { *self += -rhs; }
}

impl<T: Scalar> Neg for Operator<T> {
    type Output = Self;

    fn neg(mut self) -> Self {
        self.terms.values_mut().for_each(|x| { *x = -*x; });
        self
    }
}

impl<T: Scalar> Mul for Operator<T> {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = Self::zero();
        for (lm, &lx) in self.terms.iter() {
            for (rm, &rx) in rhs.terms.iter() {
                let ops: Vec<LadderOp>
                    = lm.0.iter().chain(rm.0.iter()).copied().collect();
                out.add_term(lx * rx, ops);
            }
        }
        out
    }
}

impl<T: Scalar> Mul<T> for Operator<T> {
    type Output = Self;

    fn mul(mut self, rhs: T) -> Self {
        self *= rhs;
        self
    }
}

impl<T: Scalar> MulAssign<T> for Operator<T> {
    fn mul_assign(&mut self, rhs: T) {
        if rhs.abs() <= COEFF_EPS {
            self.terms.clear();
        } else {
            self.terms.values_mut().for_each(|x| { *x *= rhs; });
        }
    }
}

impl<T: Scalar> Mul<Operator<T>> for f64 {
    type Output = Operator<T>;

    fn mul(self, rhs: Operator<T>) -> Operator<T> {
        rhs * T::from_real(self)
    }
}

impl Mul<Operator<C64>> for C64 {
    type Output = Operator<C64>;

    fn mul(self, rhs: Operator<C64>) -> Operator<C64> { rhs * self }
}

impl<T: Scalar> fmt::Display for Operator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() { return write!(f, "0"); }
        let n = self.terms.len();
        for (k, (mono, x)) in self.terms.iter().enumerate() {
            write!(f, "({}) {}", x, mono)?;
            if k < n - 1 { write!(f, " + ")?; }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn term_of(op: &Operator<f64>, factors: &[(usize, bool)]) -> Option<f64> {
        let mono = Monomial(
            factors.iter()
                .map(|&(index, dag)| LadderOp { index, dag })
                .collect()
        );
        op.terms().find(|(m, _)| **m == mono).map(|(_, &x)| x)
    }

    #[test]
    fn anticommutator_same_mode() {
        // c c† + c† c = 1
        let acomm: Operator<f64>
            = c(0) * c_dag(0) + c_dag(0) * c(0);
        assert_eq!(acomm.n_terms(), 1);
        assert_eq!(term_of(&acomm, &[]), Some(1.0));
    }

    #[test]
    fn anticommutator_cross_mode() {
        // { c_0, c†_1 } = 0
        let acomm: Operator<f64>
            = c(0) * c_dag(1) + c_dag(1) * c(0);
        assert!(acomm.is_zero());
    }

    #[test]
    fn nilpotency() {
        let sq: Operator<f64> = c_dag(2) * c_dag(2);
        assert!(sq.is_zero());
        let sq: Operator<f64> = c(1) * c(1);
        assert!(sq.is_zero());
    }

    #[test]
    fn number_op_idempotent() {
        let nn: Operator<f64> = n(0) * n(0);
        assert_eq!(nn, n(0));
    }

    #[test]
    fn number_ops_commute() {
        let comm = n::<f64>(0).commutator(&n(1));
        assert!(comm.is_zero());
    }

    #[test]
    fn hopping_does_not_commute_with_number() {
        let hop: Operator<f64> = c_dag(0) * c(1) + c_dag(1) * c(0);
        assert!(!n::<f64>(0).commutator(&hop).is_zero());
        // but it does commute with total particle number
        let ntot: Operator<f64> = n(0) + n(1);
        assert!(ntot.commutator(&hop).is_zero());
    }

    #[test]
    fn dagger_of_hopping() {
        let hop: Operator<f64> = c_dag(0) * c(1);
        assert_eq!(hop.dagger(), c_dag(1) * c(0));
        let herm = hop.clone() + hop.dagger();
        assert_eq!(herm.dagger(), herm);
    }

    #[test]
    fn dagger_conjugates_coefficients() {
        let t = C64::new(0.3, 0.4);
        let hop = t * (c_dag::<C64>(0) * c(1));
        let expect = t.conj() * (c_dag::<C64>(1) * c(0));
        assert_eq!(hop.dagger(), expect);
    }

    #[test]
    fn monomial_application() {
        use crate::fock::FockState;
        let op: Operator<f64> = c_dag(0) * c_dag(1);
        let (mono, _) = op.terms().next().unwrap();
        let (s, sign) = mono.apply_to(FockState::VACUUM).unwrap();
        assert_eq!(s, FockState(0b11));
        // c†_1 acts first (+1), then c†_0 passes nothing below it (+1)...
        // but normal ordering wrote the term as c†_0 c†_1
        assert_eq!(sign, 1);
        // short-circuit on double occupation
        assert!(mono.apply_to(FockState(0b10)).is_none());
    }

    #[test]
    fn scalar_pruning() {
        let op: Operator<f64> = 0.0 * n(0);
        assert!(op.is_zero());
        let op = n::<f64>(0) - n(0);
        assert!(op.is_zero());
    }
}
