//! Block-diagonalization of a fermionic many-body Hamiltonian over its
//! invariant subspaces.
//!
//! [`BlockDiag`] is the assembled, immutable result of a single construction
//! pass: partition the Fock space into invariant subspaces, build the dense
//! Hamiltonian block of each subspace, diagonalize every block, and
//! re-express the action of each fundamental creation/annihilation operator
//! in the new eigenbases. Afterwards the value is read-only; a
//! changed Hamiltonian requires full reconstruction.
//!
//! Conventions:
//!
//! - Eigenvalues are ascending within each subspace, with the global
//!   ground-state energy subtracted so the minimum over all subspaces is
//!   exactly 0.
//! - The unitary matrix `U` of a subspace has the eigenvectors as columns in
//!   the subspace's Fock basis, `H = U diag(E) U†`.
//! - Subspaces are sorted by their lowest eigenvalue, so the ground state
//!   lives in subspace 0.
//! - A fundamental operator maps each subspace into at most one other
//!   subspace; these connections and the eigenbasis matrices
//!   `U(B′)† M U(B)` are stored sparsely, with absent pairs meaning the zero
//!   matrix.
//!
//! Blocks are decoupled, so the per-subspace diagonalizations run on a rayon
//! worker pool.
//!
//! # Example
//! ```
//! use fermi_diag::{ BlockDiag, OpSet, n, Operator };
//!
//! // Hubbard atom in a magnetic field
//! let ops = OpSet::new(["up", "dn"]);
//! let h: Operator<f64>
//!     = 2.0 * (n(0) * n(1)) + 0.5 * (n(0) - n(1));
//! let ad = BlockDiag::with_quantum_numbers(h, &ops, &[n(0), n(1)]).unwrap();
//! assert_eq!(ad.n_subspaces(), 4);
//! assert_eq!(ad.eigenvalue(0, 0), 0.0); // ground state in subspace 0
//! ```

use std::{
    fmt,
    fs,
    io::{ self, Write },
    path::Path,
};
use nalgebra as na;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use thiserror::Error;
use crate::{
    fock::{ FockState, OpSet },
    op::Operator,
    partition,
    Scalar,
};

/// Errors arising from construction or from observable evaluation.
///
/// Structural dead-ends (an operator annihilating a whole subspace) are not
/// errors; they surface as [`None`] connections and zero contributions.
#[derive(Debug, Error)]
pub enum Error {
    /// A supplied operator does not commute with the Hamiltonian.
    #[error("operator {index} is not a quantum number (nonzero commutator with the Hamiltonian)")]
    NotAQuantumNumber {
        /// Position of the operator in the supplied list.
        index: usize,
    },
    /// A checked-diagonal construction found off-diagonal weight.
    #[error("operator matrix is not diagonal (off-diagonal weight {weight:.3e})")]
    NotDiagonal {
        /// Total absolute off-diagonal weight found.
        weight: f64,
    },
    /// The Hamiltonian is not Hermitian as an operator identity.
    #[error("hamiltonian is not hermitian")]
    NonHermitian,
    /// An operator acts on a mode outside the fundamental operator set.
    #[error("operator acts on mode {index} but the operator set has only {n_ops} modes")]
    ModeOutOfRange {
        /// Offending mode index.
        index: usize,
        /// Number of modes in the fundamental operator set.
        n_ops: usize,
    },
    /// More modes than fit in a 64-bit occupation pattern.
    #[error("{n_ops} modes exceed the 64-bit Fock state limit")]
    TooManyModes {
        /// Number of modes in the fundamental operator set.
        n_ops: usize,
    },
    /// No Fock state survives the particle-number window.
    #[error("no Fock states survive the particle-number window")]
    EmptySpace,
    /// Caller-supplied data disagrees with the subspace structure.
    #[error("size mismatch: expected {expected}, got {got}")]
    SizeMismatch {
        /// Size implied by the subspace structure.
        expected: usize,
        /// Size actually supplied.
        got: usize,
    },
    /// The subspace completion pass failed to reach a fixed point.
    #[error("subspace completion did not converge within {passes} passes")]
    CompletionOverflow {
        /// Number of passes attempted.
        passes: usize,
    },
}

/// An ordered list of Fock states closed under the Hamiltonian (and, jointly
/// with the other subspaces, under every fundamental operator).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subspace {
    pub(crate) fock_states: Vec<FockState>,
}

impl Subspace {
    /// Number of Fock states.
    pub fn dim(&self) -> usize { self.fock_states.len() }

    /// The member states, in the basis order used by the block matrices.
    pub fn fock_states(&self) -> &[FockState] { &self.fock_states }

    /// Return `true` if `s` is a member.
    pub fn contains(&self, s: FockState) -> bool {
        self.fock_states.binary_search(&s).is_ok()
    }
}

/// The eigensystem of one subspace's Hamiltonian block.
#[derive(Clone, Debug, PartialEq)]
pub struct Eigensystem<T: Scalar> {
    /// Eigenvalues in ascending order, shifted so the global ground-state
    /// energy is 0.
    pub eigenvalues: na::DVector<f64>,
    /// Unitary transformation from the Fock basis of the subspace to the
    /// eigenbasis; columns are eigenvectors.
    pub unitary: na::DMatrix<T>,
}

/// A Hamiltonian reduced to block-diagonal form and diagonalized, together
/// with the eigenbasis action of every fundamental operator.
///
/// See the [module docs][self] for conventions. Construct with
/// [`new`][Self::new] (automatic partition),
/// [`with_quantum_numbers`][Self::with_quantum_numbers], or
/// [`with_particle_window`][Self::with_particle_window].
#[derive(Clone, Debug)]
pub struct BlockDiag<T: Scalar> {
    pub(crate) h: Operator<T>,
    pub(crate) ops: OpSet,
    pub(crate) subspaces: Vec<Subspace>,
    pub(crate) state_index: FxHashMap<FockState, (usize, usize)>,
    pub(crate) eigensystems: Vec<Eigensystem<T>>,
    // [mode][subspace] -> destination subspace / eigenbasis matrix
    pub(crate) creation_connection: Vec<Vec<Option<usize>>>,
    pub(crate) annihilation_connection: Vec<Vec<Option<usize>>>,
    pub(crate) cdag_matrices: Vec<Vec<Option<na::DMatrix<T>>>>,
    pub(crate) c_matrices: Vec<Vec<Option<na::DMatrix<T>>>>,
    pub(crate) gs_energy: f64,
    pub(crate) vacuum_subspace: Option<usize>,
    pub(crate) vacuum: na::DVector<T>,
    pub(crate) quantum_numbers: Option<Vec<Vec<f64>>>,
    pub(crate) first_eigenstate: Vec<usize>,
}

impl<T: Scalar> BlockDiag<T> {
    /// Diagonalize `h` using the automatic partition: invariant subspaces are
    /// discovered from the Hamiltonian's connectivity graph and completed so
    /// every operator of `ops` maps one subspace to one subspace.
    pub fn new(h: Operator<T>, ops: &OpSet) -> Result<Self, Error> {
        Self::build(h, ops, None, 0, u32::MAX)
    }

    /// Like [`new`][Self::new], but restricted to Fock states whose particle
    /// number lies in `n_min..=n_max`; states outside the window are dropped
    /// from the model entirely.
    pub fn with_particle_window(
        h: Operator<T>,
        ops: &OpSet,
        n_min: u32,
        n_max: u32,
    ) -> Result<Self, Error>
    {
        Self::build(h, ops, None, n_min, n_max)
    }

    /// Diagonalize `h` using quantum-number operators to seed the partition.
    ///
    /// Every operator in `qns` must commute with `h`; a nonzero commutator is
    /// reported as [`Error::NotAQuantumNumber`]. The resulting quantum-number
    /// values per subspace are recorded and available through
    /// [`quantum_numbers`][Self::quantum_numbers].
    pub fn with_quantum_numbers(
        h: Operator<T>,
        ops: &OpSet,
        qns: &[Operator<T>],
    ) -> Result<Self, Error>
    {
        for (index, q) in qns.iter().enumerate() {
            if !q.commutator(&h).is_zero() {
                return Err(Error::NotAQuantumNumber { index });
            }
        }
        Self::build(h, ops, Some(qns), 0, u32::MAX)
    }

    fn build(
        h: Operator<T>,
        ops: &OpSet,
        qns: Option<&[Operator<T>]>,
        n_min: u32,
        n_max: u32,
    ) -> Result<Self, Error>
    {
        let n_ops = ops.len();
        if n_ops > 63 { return Err(Error::TooManyModes { n_ops }); }
        check_mode_range(&h, n_ops)?;
        if let Some(qns) = qns {
            for q in qns.iter() { check_mode_range(q, n_ops)?; }
        }
        if !(h.dagger() - h.clone()).is_zero() {
            return Err(Error::NonHermitian);
        }

        let states = partition::enumerate_states(n_ops, n_min, n_max);
        if states.is_empty() { return Err(Error::EmptySpace); }
        let groups = partition::partition(&h, qns, &states, n_ops)?;
        let subspaces: Vec<Subspace>
            = groups.into_iter()
            .map(|fock_states| Subspace { fock_states })
            .collect();
        let state_index = index_states(&subspaces);

        // per-subspace Hamiltonian blocks, diagonalized independently
        let blocks: Vec<na::DMatrix<T>>
            = subspaces.par_iter()
            .map(|sub| hamiltonian_block(&h, sub, &state_index))
            .collect();
        let mut eigensystems: Vec<Eigensystem<T>>
            = blocks.into_par_iter().map(diagonalize_block).collect();

        // shift all energies so the global ground state sits at 0
        let gs_energy
            = eigensystems.iter()
            .map(|es| es.eigenvalues[0])
            .fold(f64::INFINITY, f64::min);
        for es in eigensystems.iter_mut() {
            es.eigenvalues.add_scalar_mut(-gs_energy);
        }

        // sort subspaces by their lowest eigenvalue; ties keep discovery
        // order
        let mut pairs: Vec<(Subspace, Eigensystem<T>)>
            = subspaces.into_iter().zip(eigensystems).collect();
        pairs.sort_by(|l, r| l.1.eigenvalues[0].total_cmp(&r.1.eigenvalues[0]));
        let (subspaces, eigensystems): (Vec<Subspace>, Vec<Eigensystem<T>>)
            = pairs.into_iter().unzip();
        let state_index = index_states(&subspaces);

        let n_sub = subspaces.len();
        let mut first_eigenstate: Vec<usize> = Vec::with_capacity(n_sub);
        let mut acc = 0;
        for sub in subspaces.iter() {
            first_eigenstate.push(acc);
            acc += sub.dim();
        }
        let full_dim = acc;

        // connections and eigenbasis matrices for every ladder operator
        let mut creation_connection = vec![vec![None; n_sub]; n_ops];
        let mut annihilation_connection = vec![vec![None; n_sub]; n_ops];
        let mut cdag_matrices: Vec<Vec<Option<na::DMatrix<T>>>>
            = vec![vec![None; n_sub]; n_ops];
        let mut c_matrices: Vec<Vec<Option<na::DMatrix<T>>>>
            = vec![vec![None; n_sub]; n_ops];
        for k in 0..n_ops {
            for dag in [false, true] {
                for (b, sub) in subspaces.iter().enumerate() {
                    let mut dest: Option<usize> = None;
                    let mut entries: Vec<(usize, usize, i8)> = Vec::new();
                    for (j, &s) in sub.fock_states.iter().enumerate() {
                        let (s2, sign) = match s.apply(k, dag) {
                            Some(res) => res,
                            None => continue,
                        };
                        // images outside a particle window are dropped
                        let (b2, i) = match state_index.get(&s2) {
                            Some(&bi) => bi,
                            None => continue,
                        };
                        debug_assert!(dest.map_or(true, |d| d == b2));
                        dest = Some(b2);
                        entries.push((i, j, sign));
                    }
                    let b2 = match dest {
                        Some(b2) => b2,
                        None => continue,
                    };
                    let mut m: na::DMatrix<T>
                        = na::DMatrix::zeros(subspaces[b2].dim(), sub.dim());
                    for (i, j, sign) in entries {
                        m[(i, j)] = T::from_real(f64::from(sign));
                    }
                    let m_eig
                        = eigensystems[b2].unitary.adjoint()
                        * m
                        * &eigensystems[b].unitary;
                    if dag {
                        creation_connection[k][b] = Some(b2);
                        cdag_matrices[k][b] = Some(m_eig);
                    } else {
                        annihilation_connection[k][b] = Some(b2);
                        c_matrices[k][b] = Some(m_eig);
                    }
                }
            }
        }

        // eigenbasis coordinates of ∣0...0⟩, if it survives the window
        let mut vacuum: na::DVector<T> = na::DVector::zeros(full_dim);
        let mut vacuum_subspace: Option<usize> = None;
        if let Some(&(b, i0)) = state_index.get(&FockState::VACUUM) {
            vacuum_subspace = Some(b);
            let u = &eigensystems[b].unitary;
            for i in 0..subspaces[b].dim() {
                vacuum[first_eigenstate[b] + i] = u[(i0, i)].conjugate();
            }
        }

        let quantum_numbers = qns.map(|qns| {
            subspaces.iter()
                .map(|sub| {
                    qns.iter()
                        .map(|q| {
                            partition::diagonal_expectation(
                                q, sub.fock_states[0])
                        })
                        .collect()
                })
                .collect()
        });

        Ok(Self {
            h,
            ops: ops.clone(),
            subspaces,
            state_index,
            eigensystems,
            creation_connection,
            annihilation_connection,
            cdag_matrices,
            c_matrices,
            gs_energy,
            vacuum_subspace,
            vacuum,
            quantum_numbers,
            first_eigenstate,
        })
    }

    /// The Hamiltonian supplied at construction.
    pub fn hamiltonian(&self) -> &Operator<T> { &self.h }

    /// The fundamental operator set supplied at construction.
    pub fn op_set(&self) -> &OpSet { &self.ops }

    /// Number of invariant subspaces.
    pub fn n_subspaces(&self) -> usize { self.subspaces.len() }

    /// Dimension of the full (possibly particle-windowed) Fock space.
    pub fn full_dim(&self) -> usize {
        self.first_eigenstate.last().copied().unwrap_or(0)
            + self.subspaces.last().map_or(0, Subspace::dim)
    }

    /// Dimension of one subspace.
    pub fn subspace_dim(&self, sp: usize) -> usize {
        self.subspaces[sp].dim()
    }

    /// The invariant subspaces, in index order.
    pub fn subspaces(&self) -> &[Subspace] { &self.subspaces }

    /// The eigensystems, in subspace order.
    pub fn eigensystems(&self) -> &[Eigensystem<T>] { &self.eigensystems }

    /// The `i`-th eigenvalue of subspace `sp`, relative to the ground state.
    pub fn eigenvalue(&self, sp: usize, i: usize) -> f64 {
        self.eigensystems[sp].eigenvalues[i]
    }

    /// All energies, grouped by subspace.
    pub fn energies(&self) -> Vec<Vec<f64>> {
        self.eigensystems.iter()
            .map(|es| es.eigenvalues.iter().copied().collect())
            .collect()
    }

    /// The ground-state energy before the shift to zero.
    pub fn gs_energy(&self) -> f64 { self.gs_energy }

    /// Locate a Fock state, returning its subspace and index within it.
    pub fn subspace_of(&self, s: FockState) -> Option<(usize, usize)> {
        self.state_index.get(&s).copied()
    }

    /// Index of the subspace containing ∣0...0⟩, if any.
    pub fn vacuum_subspace(&self) -> Option<usize> { self.vacuum_subspace }

    /// The vacuum state as a full-space vector in the eigenbasis.
    ///
    /// All zero when a particle window excludes the vacuum.
    pub fn vacuum_state(&self) -> &na::DVector<T> { &self.vacuum }

    /// Index of the first eigenstate of subspace `sp` in full-space
    /// (flattened) numbering.
    pub fn flat_index(&self, sp: usize, i: usize) -> usize {
        self.first_eigenstate[sp] + i
    }

    /// Flattened index range covered by the eigenstates of subspace `sp`.
    pub fn subspace_range(&self, sp: usize) -> std::ops::Range<usize> {
        let lo = self.first_eigenstate[sp];
        lo..lo + self.subspaces[sp].dim()
    }

    /// Destination subspace of the annihilation operator for mode `k` acting
    /// on subspace `sp`, or `None` if the whole subspace annihilates.
    pub fn c_connection(&self, k: usize, sp: usize) -> Option<usize> {
        self.annihilation_connection[k][sp]
    }

    /// Destination subspace of the creation operator for mode `k` acting on
    /// subspace `sp`, or `None` if the whole subspace annihilates.
    pub fn cdag_connection(&self, k: usize, sp: usize) -> Option<usize> {
        self.creation_connection[k][sp]
    }

    /// Eigenbasis matrix of the annihilation operator for mode `k` from
    /// subspace `sp` to its destination.
    pub fn c_matrix(&self, k: usize, sp: usize) -> Option<&na::DMatrix<T>> {
        self.c_matrices[k][sp].as_ref()
    }

    /// Eigenbasis matrix of the creation operator for mode `k` from subspace
    /// `sp` to its destination.
    pub fn cdag_matrix(&self, k: usize, sp: usize) -> Option<&na::DMatrix<T>> {
        self.cdag_matrices[k][sp].as_ref()
    }

    /// Quantum-number values per subspace, one entry per operator supplied to
    /// [`with_quantum_numbers`][Self::with_quantum_numbers]; `None` for the
    /// automatic partition.
    pub fn quantum_numbers(&self) -> Option<&[Vec<f64>]> {
        self.quantum_numbers.as_deref()
    }

    /// Return an object encoding the subspace-to-subspace connection
    /// structure in the [dot language][dot-lang]: one node per subspace, one
    /// arrow per realized creation-operator connection.
    ///
    /// Rendering this object with the default formatter produces a full dot
    /// string.
    ///
    /// [dot-lang]: https://en.wikipedia.org/wiki/DOT_(graph_description_language)
    pub fn connections_to_graphviz(&self, name: &str) -> tabbycat::Graph {
        use tabbycat::*;
        use tabbycat::attributes::*;

        const FONT: &str = "DejaVu Sans";
        const FONTSIZE: f64 = 10.0; // pt
        const NODE_MARGIN: f64 = 0.025; // in
        const NODE_HEIGHT: f64 = 0.200; // in
        const NODE_COLOR: Color = Color::Rgb(115, 150, 250);

        let mut statements
            = StmtList::new()
            .add_attr(
                AttrType::Graph,
                AttrList::new().add_pair(rankdir(RankDir::LR)),
            )
            .add_attr(
                AttrType::Node,
                AttrList::new()
                    .add_pair(fontname(FONT))
                    .add_pair(fontsize(FONTSIZE))
                    .add_pair(margin(NODE_MARGIN))
                    ,
            );
        for (b, sub) in self.subspaces.iter().enumerate() {
            let attrs
                = AttrList::new()
                .add_pair(label(format!("{} (dim {})", b, sub.dim())))
                .add_pair(shape(Shape::Circle))
                .add_pair(height(NODE_HEIGHT))
                .add_pair(style(Style::Filled))
                .add_pair(fillcolor(NODE_COLOR));
            statements = statements.add_node(b.into(), None, Some(attrs));
        }
        let mut edges: Vec<(usize, usize)>
            = self.creation_connection.iter()
            .flat_map(|conns| {
                conns.iter().enumerate()
                    .filter_map(|(b, d)| d.map(|d| (b, d)))
            })
            .collect();
        edges.sort();
        edges.dedup();
        for (b, d) in edges {
            statements
                = statements.add_edge(
                    Edge::head_node(b.into(), None)
                        .arrow_to_node(d.into(), None)
                );
        }
        GraphBuilder::default()
            .graph_type(GraphType::DiGraph)
            .strict(false)
            .id(Identity::quoted(name))
            .stmts(statements)
            .build()
            .expect("error building graphviz")
    }

    /// Like [`connections_to_graphviz`][Self::connections_to_graphviz], but
    /// render directly to a string and write it to `path`.
    pub fn save_connections_graphviz<P>(&self, name: &str, path: P)
        -> Result<(), io::Error>
    where P: AsRef<Path>
    {
        let graphviz = self.connections_to_graphviz(name);
        fs::OpenOptions::new()
            .write(true)
            .append(false)
            .create(true)
            .truncate(true)
            .open(path)?
            .write_all(format!("{}", graphviz).as_bytes())?;
        Ok(())
    }
}

impl<T: Scalar> fmt::Display for BlockDiag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Full space dimension: {}", self.full_dim())?;
        writeln!(f, "Number of invariant subspaces: {}", self.n_subspaces())?;
        for (b, es) in self.eigensystems.iter().enumerate() {
            writeln!(
                f, "Subspace {}: dimension {}, lowest energy {}",
                b, es.eigenvalues.len(), es.eigenvalues[0],
            )?;
        }
        Ok(())
    }
}

fn check_mode_range<T: Scalar>(op: &Operator<T>, n_ops: usize)
    -> Result<(), Error>
{
    match op.max_index() {
        Some(index) if index >= n_ops
            => Err(Error::ModeOutOfRange { index, n_ops }),
        _ => Ok(()),
    }
}

fn index_states(subspaces: &[Subspace])
    -> FxHashMap<FockState, (usize, usize)>
{
    subspaces.iter().enumerate()
        .flat_map(|(b, sub)| {
            sub.fock_states.iter().enumerate().map(move |(i, &s)| (s, (b, i)))
        })
        .collect()
}

// dense matrix of the Hamiltonian restricted to one subspace; entry
// (dest index, source index) accumulates coefficient × fermionic sign
fn hamiltonian_block<T: Scalar>(
    h: &Operator<T>,
    sub: &Subspace,
    state_index: &FxHashMap<FockState, (usize, usize)>,
) -> na::DMatrix<T>
{
    let d = sub.dim();
    let mut m: na::DMatrix<T> = na::DMatrix::zeros(d, d);
    for (j, &s) in sub.fock_states.iter().enumerate() {
        for (mono, &x) in h.terms() {
            let (s2, sign) = match mono.apply_to(s) {
                Some(res) => res,
                None => continue,
            };
            // the partition keeps Hamiltonian images inside the subspace;
            // images truncated by a particle window are dropped
            if let Some(&(_, i)) = state_index.get(&s2) {
                m[(i, j)] += x * T::from_real(f64::from(sign));
            }
        }
    }
    m
}

// QR-type Hermitian eigendecomposition of one block, eigenvalues ascending
fn diagonalize_block<T: Scalar>(m: na::DMatrix<T>) -> Eigensystem<T> {
    let d = m.nrows();
    let eig = na::SymmetricEigen::new(m);
    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let eigenvalues
        = na::DVector::from_fn(d, |i, _| eig.eigenvalues[order[i]]);
    let unitary
        = na::DMatrix::from_fn(d, d, |r, c| eig.eigenvectors[(r, order[c])]);
    Eigensystem { eigenvalues, unitary }
}
