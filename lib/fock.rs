//! Occupation-number basis states for a finite set of fermionic modes.
//!
//! A [`FockState`] is a bit pattern over the modes of an [`OpSet`]: bit *k* is
//! set iff mode *k* is occupied. The bit order fixes the canonical
//! single-particle ordering, so the sign picked up when a creation or
//! annihilation operator is (anti)commuted into place is the parity of the
//! number of occupied modes below the acted-on bit. All later matrix elements
//! depend on reproducing this sign bit-for-bit.

use std::fmt;
use rustc_hash::FxHashMap;

/// A single occupation-number basis state over at most 64 fermionic modes.
///
/// Bit `k` of the wrapped integer is the occupation of mode `k`, where the
/// mode numbering is fixed by an [`OpSet`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FockState(pub u64);

impl FockState {
    /// The particle-free state ∣0...0⟩.
    pub const VACUUM: Self = Self(0);

    /// Return `true` if mode `k` is occupied.
    pub fn occupied(self, k: usize) -> bool { self.0 >> k & 1 != 0 }

    /// Total number of occupied modes.
    pub fn particle_count(self) -> u32 { self.0.count_ones() }

    // parity of the number of occupied modes strictly below bit k: +1 for
    // even, -1 for odd
    fn parity_below(self, k: usize) -> i8 {
        if (self.0 & ((1 << k) - 1)).count_ones() % 2 == 0 { 1 } else { -1 }
    }

    /// Act with the creation operator for mode `k`.
    ///
    /// Returns the resulting state and a ±1 fermionic sign, or `None` if the
    /// mode is already occupied.
    pub fn create(self, k: usize) -> Option<(Self, i8)> {
        if self.occupied(k) {
            None
        } else {
            Some((Self(self.0 | 1 << k), self.parity_below(k)))
        }
    }

    /// Act with the annihilation operator for mode `k`.
    ///
    /// Returns the resulting state and a ±1 fermionic sign, or `None` if the
    /// mode is unoccupied.
    pub fn annihilate(self, k: usize) -> Option<(Self, i8)> {
        if self.occupied(k) {
            Some((Self(self.0 & !(1 << k)), self.parity_below(k)))
        } else {
            None
        }
    }

    /// Act with a single ladder operator, creation if `dag` and annihilation
    /// otherwise.
    pub fn apply(self, k: usize, dag: bool) -> Option<(Self, i8)> {
        if dag { self.create(k) } else { self.annihilate(k) }
    }

    /// Render the occupation pattern over the first `n` modes, lowest mode
    /// first.
    pub fn occ_string(self, n: usize) -> String {
        (0..n).map(|k| if self.occupied(k) { '1' } else { '0' }).collect()
    }
}

impl fmt::Display for FockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "∣{:b}⟩", self.0)
    }
}

/// The fundamental operator set: a bijection between externally-named
/// single-particle modes (e.g. spin/orbital labels) and bit positions.
///
/// Immutable once construction of a diagonalization begins; the insertion
/// order of the labels fixes the canonical bit order used for fermionic
/// signs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpSet {
    labels: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl OpSet {
    /// Create a set from an ordered list of mode labels.
    ///
    /// Duplicate labels are ignored after their first occurrence.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut opset = Self::default();
        labels.into_iter().for_each(|l| { opset.insert(l); });
        opset
    }

    /// Append a label, returning its bit position.
    ///
    /// Returns the existing position if the label is already present.
    pub fn insert<S>(&mut self, label: S) -> usize
    where S: Into<String>
    {
        let label = label.into();
        if let Some(&k) = self.index.get(&label) { return k; }
        let k = self.labels.len();
        self.index.insert(label.clone(), k);
        self.labels.push(label);
        k
    }

    /// Bit position of a label, if present.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.index.get(label).copied()
    }

    /// Label at a bit position, if in bounds.
    pub fn label(&self, k: usize) -> Option<&str> {
        self.labels.get(k).map(String::as_str)
    }

    /// Number of modes.
    pub fn len(&self) -> usize { self.labels.len() }

    /// Return `true` if the set holds no modes.
    pub fn is_empty(&self) -> bool { self.labels.is_empty() }

    /// Iterate over `(bit position, label)` pairs in bit order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.labels.iter().enumerate().map(|(k, l)| (k, l.as_str()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn create_annihilate() {
        let vac = FockState::VACUUM;
        let (up, s) = vac.create(0).unwrap();
        assert_eq!(up, FockState(0b01));
        assert_eq!(s, 1);
        assert_eq!(up.create(0), None);
        let (back, s) = up.annihilate(0).unwrap();
        assert_eq!(back, vac);
        assert_eq!(s, 1);
        assert_eq!(vac.annihilate(0), None);
    }

    #[test]
    fn fermionic_sign() {
        // creating mode 1 on ∣01⟩ passes one occupied mode below it
        let (updn, s) = FockState(0b01).create(1).unwrap();
        assert_eq!(updn, FockState(0b11));
        assert_eq!(s, -1);
        // annihilating mode 1 on ∣11⟩ likewise
        let (_, s) = FockState(0b11).annihilate(1).unwrap();
        assert_eq!(s, -1);
        // mode 0 never passes anything
        let (_, s) = FockState(0b11).annihilate(0).unwrap();
        assert_eq!(s, 1);
        // three modes: parity counts all occupied bits below
        let (_, s) = FockState(0b011).create(2).unwrap();
        assert_eq!(s, 1);
        let (_, s) = FockState(0b010).create(2).unwrap();
        assert_eq!(s, -1);
    }

    #[test]
    fn opset_bijection() {
        let mut ops = OpSet::new(["up", "dn"]);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops.index_of("up"), Some(0));
        assert_eq!(ops.index_of("dn"), Some(1));
        assert_eq!(ops.label(1), Some("dn"));
        assert_eq!(ops.index_of("x"), None);
        assert_eq!(ops.insert("up"), 0);
        assert_eq!(ops.insert("x"), 2);
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn occ_string() {
        assert_eq!(FockState(0b101).occ_string(4), "1010");
    }
}
