// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Genome hashing and the run-wide census.
//!
//! A genome hash is FNV-1a (64-bit) folded over the organism's owned cells
//! in ascending flat order. Each cell contributes twelve little-endian
//! bytes: the `i64` offset of its flat index from the organism's initial
//! position, then the packed molecule `i32`. The algorithm is fixed so
//! other implementations of the capture schema produce identical values.
//!
//! Hash `0` is reserved: the census never registers it.

use std::collections::BTreeSet;

use crate::grid::{Grid, OwnerId};

/// FNV-1a 64-bit offset basis.
const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
/// FNV-1a 64-bit prime.
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[inline]
fn fold(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Computes the canonical genome hash of `owner`'s body.
///
/// `initial_flat` is the flat index of the organism's initial position;
/// offsets are taken relative to it so that translated copies of the same
/// body hash identically.
#[must_use]
pub fn genome_hash(grid: &Grid, owner: OwnerId, initial_flat: i32) -> u64 {
    let mut hash = FNV_OFFSET;
    for flat in grid.cells_owned_by(owner) {
        let rel = i64::from(flat) - i64::from(initial_flat);
        hash = fold(hash, &rel.to_le_bytes());
        hash = fold(hash, &grid.molecule_at(flat).raw().to_le_bytes());
    }
    hash
}

/// The cumulative set of every genome hash ever observed in a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenomeCensus {
    seen: BTreeSet<u64>,
}

impl GenomeCensus {
    /// Creates an empty census.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a census from a saved hash list; zeros are dropped.
    #[must_use]
    pub fn from_hashes(hashes: impl IntoIterator<Item = u64>) -> Self {
        Self {
            seen: hashes.into_iter().filter(|&h| h != 0).collect(),
        }
    }

    /// Registers a hash. The reserved hash `0` is ignored.
    pub fn observe(&mut self, hash: u64) {
        if hash != 0 {
            self.seen.insert(hash);
        }
    }

    /// Whether `hash` has ever been observed.
    #[must_use]
    pub fn contains(&self, hash: u64) -> bool {
        self.seen.contains(&hash)
    }

    /// Number of distinct genomes ever observed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` when nothing has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// All observed hashes, ascending.
    #[must_use]
    pub fn to_sorted_vec(&self) -> Vec<u64> {
        self.seen.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentProperties, LabelMatchPolicy};
    use crate::molecule::{Molecule, MoleculeKind};

    fn grid() -> Grid {
        let props = match EnvironmentProperties::new(vec![8, 8], true, LabelMatchPolicy::Exact) {
            Ok(p) => p,
            Err(e) => unreachable!("valid shape rejected: {e}"),
        };
        Grid::new(props)
    }

    #[test]
    fn empty_body_hashes_to_the_offset_basis() {
        let g = grid();
        assert_eq!(genome_hash(&g, 9, 0), FNV_OFFSET);
    }

    #[test]
    fn translated_bodies_hash_identically() {
        let mut g = grid();
        let m = Molecule::new(MoleculeKind::Structure, 7);
        g.set_by_index(10, m, 1);
        g.set_by_index(11, m, 1);
        g.set_by_index(30, m, 2);
        g.set_by_index(31, m, 2);
        assert_eq!(genome_hash(&g, 1, 10), genome_hash(&g, 2, 30));
    }

    #[test]
    fn hash_depends_on_molecule_content_and_layout() {
        let mut g = grid();
        g.set_by_index(10, Molecule::new(MoleculeKind::Structure, 7), 1);
        g.set_by_index(11, Molecule::new(MoleculeKind::Structure, 8), 1);
        let a = genome_hash(&g, 1, 10);

        g.set_by_index(11, Molecule::new(MoleculeKind::Structure, 9), 1);
        let b = genome_hash(&g, 1, 10);
        assert_ne!(a, b);

        // Same molecules, different relative layout.
        g.set_by_index(11, Molecule::EMPTY, crate::grid::UNOWNED);
        g.set_by_index(12, Molecule::new(MoleculeKind::Structure, 9), 1);
        let c = genome_hash(&g, 1, 10);
        assert_ne!(b, c);
    }

    #[test]
    fn census_is_monotone_and_ignores_zero() {
        let mut census = GenomeCensus::new();
        census.observe(0);
        assert!(census.is_empty());

        census.observe(5);
        census.observe(3);
        census.observe(5);
        assert_eq!(census.len(), 2);
        assert_eq!(census.to_sorted_vec(), vec![3, 5]);
        assert!(census.contains(3));

        let rebuilt = GenomeCensus::from_hashes([0, 3, 5]);
        assert_eq!(rebuilt, census);
    }
}
