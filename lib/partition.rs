//! Division of the Fock space into subspaces invariant under a Hamiltonian
//! and under every fundamental ladder operator.
//!
//! Two seeding modes feed a common completion pass:
//!
//! - **Automatic**: states *s* and *s′* are joined whenever some monomial of
//!   the Hamiltonian maps *s* to *s′* with non-zero amplitude; connected
//!   components of the resulting graph are the tentative subspaces. The scan
//!   over states is a parallel map; the unions are applied sequentially.
//! - **Quantum numbers**: states are grouped by the tuple of diagonal
//!   expectation values of a caller-supplied set of operators commuting with
//!   the Hamiltonian, with equality tested to floating tolerance.
//!
//! The completion pass then iterates to a fixed point: whenever a ladder
//! operator maps one tentative subspace into two, the two destination
//! subspaces are merged. The number of subspaces is non-increasing and
//! bounded below by 1, so the loop terminates; an explicit pass cap turns a
//! logic error into a diagnosable failure instead of a silent loop.
//!
//! Everything here takes and returns plain data (state lists, groups); the
//! assembled result type is built on top in [`diag`][crate::diag].

use std::cmp::Ordering;
use itertools::{ iproduct, Itertools };
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use crate::{ diag::Error, fock::FockState, op::Operator, Scalar };

// tolerance for equality of quantum-number tuples
const QN_EPS: f64 = 1e-10;

/// Disjoint-set forest over state list indices.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), rank: vec![0; n] }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]]; // path halving
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb { return false; }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => { self.parent[ra] = rb; }
            Ordering::Greater => { self.parent[rb] = ra; }
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
        true
    }
}

/// Enumerate all Fock states over `n_ops` modes whose particle number lies in
/// `n_min..=n_max`, in ascending bit-pattern order.
pub(crate) fn enumerate_states(n_ops: usize, n_min: u32, n_max: u32)
    -> Vec<FockState>
{
    (0..1_u64 << n_ops)
        .map(FockState)
        .filter(|s| (n_min..=n_max).contains(&s.particle_count()))
        .collect()
}

/// Diagonal expectation value of an operator on a pure Fock state: the sum of
/// the amplitudes of all monomials mapping the state back to itself.
pub(crate) fn diagonal_expectation<T: Scalar>(op: &Operator<T>, s: FockState)
    -> f64
{
    op.terms()
        .filter_map(|(mono, &x)| {
            mono.apply_to(s).and_then(|(s2, sign)| {
                (s2 == s).then(|| (x * T::from_real(f64::from(sign))).real())
            })
        })
        .sum()
}

/// Partition `states` into subspaces invariant under `h` and under every
/// ladder operator on the first `n_ops` modes.
///
/// With `qns = None` the seeding is automatic (Hamiltonian connectivity);
/// otherwise states are grouped by quantum-number tuples. Groups are returned
/// in order of their smallest member, members in ascending bit-pattern order.
pub(crate) fn partition<T: Scalar>(
    h: &Operator<T>,
    qns: Option<&[Operator<T>]>,
    states: &[FockState],
    n_ops: usize,
) -> Result<Vec<Vec<FockState>>, Error>
{
    let pos: FxHashMap<FockState, usize>
        = states.iter().enumerate().map(|(i, &s)| (s, i)).collect();
    let mut uf = UnionFind::new(states.len());
    match qns {
        None => seed_auto(h, states, &pos, &mut uf),
        Some(qns) => seed_qn(qns, states, &mut uf),
    }
    complete(&mut uf, states, &pos, n_ops)?;
    Ok(collect_groups(&mut uf, states))
}

// join states connected by any monomial of the Hamiltonian; the per-state
// scan is independent and runs as a parallel map, with the unions applied
// afterwards
fn seed_auto<T: Scalar>(
    h: &Operator<T>,
    states: &[FockState],
    pos: &FxHashMap<FockState, usize>,
    uf: &mut UnionFind,
) {
    let edges: Vec<Vec<usize>>
        = states.par_iter()
        .map(|&s| {
            h.terms()
                .filter_map(|(mono, _)| {
                    mono.apply_to(s).and_then(|(s2, _)| pos.get(&s2).copied())
                })
                .collect()
        })
        .collect();
    for (i, targets) in edges.iter().enumerate() {
        for &j in targets { uf.union(i, j); }
    }
}

// group states by their quantum-number tuples: sort lexicographically, then
// join each state to the representative of its running group while every
// component agrees to tolerance
fn seed_qn<T: Scalar>(
    qns: &[Operator<T>],
    states: &[FockState],
    uf: &mut UnionFind,
) {
    if states.is_empty() { return; }
    let tuples: Vec<Vec<f64>>
        = states.par_iter()
        .map(|&s| qns.iter().map(|q| diagonal_expectation(q, s)).collect())
        .collect();
    let order: Vec<usize>
        = (0..states.len())
        .sorted_by(|&a, &b| {
            tuples[a].iter().zip(tuples[b].iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        })
        .collect();
    let mut rep = order[0];
    for &i in order.iter().skip(1) {
        let same
            = tuples[rep].iter().zip(tuples[i].iter())
            .all(|(x, y)| (x - y).abs() <= QN_EPS);
        if same { uf.union(rep, i); } else { rep = i; }
    }
}

// fixed point: for every ladder operator and every group, all non-vanishing
// images must land in a single group; otherwise merge the destinations.
// images falling outside the state list (particle window) are skipped
fn complete(
    uf: &mut UnionFind,
    states: &[FockState],
    pos: &FxHashMap<FockState, usize>,
    n_ops: usize,
) -> Result<(), Error>
{
    // each productive pass removes at least one group
    let cap = states.len() + 1;
    let mut dest: FxHashMap<usize, usize> = FxHashMap::default();
    for _pass in 0..=cap {
        let mut changed = false;
        for (k, dag) in iproduct!(0..n_ops, [false, true]) {
            dest.clear();
            for (i, &s) in states.iter().enumerate() {
                let img = match s.apply(k, dag) {
                    Some((s2, _)) => s2,
                    None => continue,
                };
                let j = match pos.get(&img) {
                    Some(&j) => j,
                    None => continue,
                };
                let g = uf.find(i);
                let d = uf.find(j);
                match dest.get(&g).copied() {
                    None => { dest.insert(g, d); }
                    Some(prev) => {
                        let prev = uf.find(prev);
                        if prev != d {
                            uf.union(prev, d);
                            changed = true;
                        }
                        dest.insert(g, uf.find(d));
                    }
                }
            }
        }
        if !changed { return Ok(()); }
    }
    Err(Error::CompletionOverflow { passes: cap })
}

fn collect_groups(uf: &mut UnionFind, states: &[FockState])
    -> Vec<Vec<FockState>>
{
    let mut groups: Vec<Vec<FockState>> = Vec::new();
    let mut group_of: FxHashMap<usize, usize> = FxHashMap::default();
    for (i, &s) in states.iter().enumerate() {
        let root = uf.find(i);
        match group_of.get(&root) {
            Some(&g) => groups[g].push(s),
            None => {
                group_of.insert(root, groups.len());
                groups.push(vec![s]);
            }
        }
    }
    groups
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::op::{ c, c_dag, n };

    fn hubbard_anomalous() -> Operator<f64> {
        let half: Operator<f64> = Operator::constant(0.5);
        2.0 * ((n(0) - half.clone()) * (n(1) - half))
            + 0.3 * (c_dag(0) * c(1) + c_dag(1) * c(0))
            + 0.1 * (c_dag(0) * c_dag(1) - c(0) * c(1))
    }

    #[test]
    fn disjoint_union() {
        let states = enumerate_states(2, 0, u32::MAX);
        let groups = partition(&hubbard_anomalous(), None, &states, 2)
            .unwrap();
        let mut seen: Vec<FockState>
            = groups.iter().flatten().copied().collect();
        seen.sort();
        assert_eq!(seen, states);
    }

    #[test]
    fn anomalous_terms_pair_the_space() {
        let states = enumerate_states(2, 0, u32::MAX);
        let groups = partition(&hubbard_anomalous(), None, &states, 2)
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.len() == 2));
    }

    #[test]
    fn number_hamiltonian_fully_splits() {
        let h: Operator<f64> = 2.0 * (n(0) * n(1)) + 0.5 * (n(0) - n(1));
        let states = enumerate_states(2, 0, u32::MAX);
        let groups = partition(&h, None, &states, 2).unwrap();
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.len() == 1));
    }

    #[test]
    fn partition_sizes_are_reproducible() {
        let h = hubbard_anomalous();
        let states = enumerate_states(2, 0, u32::MAX);
        let a = partition(&h, None, &states, 2).unwrap();
        let b = partition(&h, None, &states, 2).unwrap();
        let sizes = |gs: &[Vec<FockState>]| {
            let mut v: Vec<usize> = gs.iter().map(Vec::len).collect();
            v.sort();
            v
        };
        assert_eq!(sizes(&a), sizes(&b));
    }

    #[test]
    fn particle_window_drops_states() {
        let states = enumerate_states(3, 1, 2);
        assert_eq!(states.len(), 6);
        assert!(states.iter()
            .all(|s| (1..=2).contains(&s.particle_count())));
    }

    #[test]
    fn completion_merges_split_destinations() {
        // q groups the empty state with the mode-0 state but separates the
        // mode-1 state from double occupation; the image of the pair under
        // c†_1 then straddles two groups, which the completion pass must
        // merge
        let q: Operator<f64> = 2.0 * n(1) + n(0) * n(1);
        let h: Operator<f64> = n(0);
        let states = enumerate_states(2, 0, u32::MAX);
        let groups = partition(&h, Some(&[q]), &states, 2).unwrap();
        let mut sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        sizes.sort();
        assert_eq!(sizes, vec![2, 2]);
    }

    #[test]
    fn diagonal_expectations() {
        let ntot: Operator<f64> = n(0) + n(1);
        assert_eq!(diagonal_expectation(&ntot, FockState(0b00)), 0.0);
        assert_eq!(diagonal_expectation(&ntot, FockState(0b01)), 1.0);
        assert_eq!(diagonal_expectation(&ntot, FockState(0b11)), 2.0);
        // off-diagonal terms contribute nothing
        let hop: Operator<f64> = c_dag(0) * c(1) + c_dag(1) * c(0);
        assert_eq!(diagonal_expectation(&hop, FockState(0b01)), 0.0);
    }
}
