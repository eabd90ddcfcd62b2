// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The shared environment: an n-dimensional grid of owned molecules with
//! change tracking.
//!
//! Cells are addressed by row-major flat index. Every write — molecule or
//! ownership — sets the cell's bit in a grid-wide change bitmap; the
//! capture encoder drains that bitmap once per sample and
//! [`Grid::reset_change_tracking`] is the only way to clear it. A per-owner
//! index set keeps `cells_owned_by` and ownership teardown amortized
//! O(cells touched).

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use crate::config::EnvironmentProperties;
use crate::molecule::Molecule;

/// Organism id used as cell owner; 0 means unowned.
pub type OwnerId = u64;

/// The unowned sentinel.
pub const UNOWNED: OwnerId = 0;

/// One cell: a packed molecule plus its owner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cell {
    /// The molecule stored in the cell.
    pub molecule: Molecule,
    /// The owning organism, or [`UNOWNED`].
    pub owner: OwnerId,
}

impl Cell {
    /// Returns `true` when the cell holds no molecule and no owner.
    #[must_use]
    pub fn is_vacant(self) -> bool {
        self.molecule.is_empty() && self.owner == UNOWNED
    }
}

/// Word-packed dirty bitmap over flat indices.
#[derive(Clone, Debug)]
struct ChangeBitmap {
    words: Vec<u64>,
}

impl ChangeBitmap {
    fn new(total: usize) -> Self {
        Self {
            words: vec![0; total.div_ceil(64)],
        }
    }

    #[inline]
    fn set(&mut self, flat: usize) {
        self.words[flat / 64] |= 1 << (flat % 64);
    }

    fn clear(&mut self) {
        self.words.fill(0);
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set bits in ascending flat order.
    fn indices(&self) -> Vec<i32> {
        let mut out = Vec::with_capacity(self.count());
        for (wi, &word) in self.words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros() as usize;
                out.push((wi * 64 + bit) as i32);
                w &= w - 1;
            }
        }
        out
    }
}

/// The simulation grid.
#[derive(Clone, Debug)]
pub struct Grid {
    props: EnvironmentProperties,
    molecules: Vec<i32>,
    owners: Vec<OwnerId>,
    changed: ChangeBitmap,
    owned: FxHashMap<OwnerId, BTreeSet<i32>>,
}

impl Grid {
    /// Creates an empty grid for the given environment. Validation lives
    /// in [`EnvironmentProperties::new`]; properties that exist are always
    /// buildable.
    #[must_use]
    pub fn new(props: EnvironmentProperties) -> Self {
        let total = props.total_cells() as usize;
        Self {
            props,
            molecules: vec![0; total],
            owners: vec![UNOWNED; total],
            changed: ChangeBitmap::new(total),
            owned: FxHashMap::default(),
        }
    }

    /// Environment geometry and policies.
    #[must_use]
    pub fn props(&self) -> &EnvironmentProperties {
        &self.props
    }

    /// Total cell count.
    #[must_use]
    pub fn total_cells(&self) -> i32 {
        self.props.total_cells()
    }

    /// Reads the cell at `flat`, or `None` out of range.
    #[must_use]
    pub fn cell(&self, flat: i32) -> Option<Cell> {
        let idx = usize::try_from(flat).ok()?;
        let raw = *self.molecules.get(idx)?;
        Some(Cell {
            molecule: Molecule::from_raw(raw),
            owner: self.owners[idx],
        })
    }

    /// Reads the cell at a coordinate.
    #[must_use]
    pub fn cell_at(&self, coord: &[i32]) -> Option<Cell> {
        self.cell(self.props.coord_to_flat(coord)?)
    }

    /// Reads the molecule at `flat`; out-of-range reads as empty.
    #[must_use]
    pub fn molecule_at(&self, flat: i32) -> Molecule {
        self.cell(flat).map_or(Molecule::EMPTY, |c| c.molecule)
    }

    /// Writes `molecule`/`owner` into the cell at `flat`.
    ///
    /// Sets the change bit and maintains the owner index. Returns `false`
    /// when `flat` is out of range (nothing written).
    pub fn set_by_index(&mut self, flat: i32, molecule: Molecule, owner: OwnerId) -> bool {
        let Ok(idx) = usize::try_from(flat) else {
            return false;
        };
        if idx >= self.molecules.len() {
            return false;
        }
        let previous_owner = self.owners[idx];
        if previous_owner != owner {
            if previous_owner != UNOWNED {
                if let Some(set) = self.owned.get_mut(&previous_owner) {
                    set.remove(&flat);
                }
            }
            if owner != UNOWNED {
                self.owned.entry(owner).or_default().insert(flat);
            }
        }
        self.molecules[idx] = molecule.raw();
        self.owners[idx] = owner;
        self.changed.set(idx);
        true
    }

    /// Writes a cell by coordinate.
    pub fn set_by_coord(&mut self, coord: &[i32], molecule: Molecule, owner: OwnerId) -> bool {
        self.props
            .coord_to_flat(coord)
            .is_some_and(|flat| self.set_by_index(flat, molecule, owner))
    }

    /// Drops every cell of `owner` back to unowned, keeping molecules.
    ///
    /// Each touched cell counts as a mutation: its change bit is set.
    pub fn clear_ownership_for(&mut self, owner: OwnerId) {
        let Some(cells) = self.owned.remove(&owner) else {
            return;
        };
        for flat in cells {
            let idx = flat as usize;
            self.owners[idx] = UNOWNED;
            self.changed.set(idx);
        }
    }

    /// Flat indices owned by `owner`, ascending.
    pub fn cells_owned_by(&self, owner: OwnerId) -> impl Iterator<Item = i32> + '_ {
        self.owned
            .get(&owner)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Number of cells owned by `owner`.
    #[must_use]
    pub fn owned_cell_count(&self, owner: OwnerId) -> usize {
        self.owned.get(&owner).map_or(0, BTreeSet::len)
    }

    /// Flat indices written since the last reset, ascending.
    #[must_use]
    pub fn changed_indices(&self) -> Vec<i32> {
        self.changed.indices()
    }

    /// Number of distinct cells written since the last reset.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.changed.count()
    }

    /// Ends the current change-tracking window.
    pub fn reset_change_tracking(&mut self) {
        self.changed.clear();
    }

    /// Occupied cells (`molecule != 0` or `owner != 0`) in ascending flat
    /// order, as `(flat, raw molecule, owner)` triples.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (i32, i32, OwnerId)> + '_ {
        self.molecules
            .iter()
            .zip(&self.owners)
            .enumerate()
            .filter(|(_, (&m, &o))| m != 0 || o != UNOWNED)
            .map(|(i, (&m, &o))| (i as i32, m, o))
    }

    /// Orthogonal neighbors of `flat`, in ascending axis order with the
    /// negative step first. Toroidal environments wrap; bounded ones drop
    /// neighbors outside the grid.
    #[must_use]
    pub fn neighbors(&self, flat: i32) -> Vec<i32> {
        let Some(coord) = self.flat_to_coord(flat) else {
            return Vec::new();
        };
        let dims = self.props.dimensions();
        let mut out = Vec::with_capacity(dims * 2);
        let mut delta = vec![0; dims];
        for axis in 0..dims {
            for step in [-1, 1] {
                delta[axis] = step;
                if let Some(neighbor) = self.props.step(&coord, &delta) {
                    if let Some(neighbor_flat) = self.props.coord_to_flat(&neighbor) {
                        out.push(neighbor_flat);
                    }
                }
                delta[axis] = 0;
            }
        }
        out
    }

    /// Converts a coordinate to its flat index.
    #[must_use]
    pub fn coord_to_flat(&self, coord: &[i32]) -> Option<i32> {
        self.props.coord_to_flat(coord)
    }

    /// Converts a flat index to its coordinate.
    #[must_use]
    pub fn flat_to_coord(&self, flat: i32) -> Option<Vec<i32>> {
        self.props.flat_to_coord(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LabelMatchPolicy;
    use crate::molecule::MoleculeKind;

    fn grid(shape: &[i32]) -> Grid {
        let props =
            match EnvironmentProperties::new(shape.to_vec(), true, LabelMatchPolicy::Exact) {
                Ok(p) => p,
                Err(e) => unreachable!("valid shape rejected: {e}"),
            };
        Grid::new(props)
    }

    #[test]
    fn change_tracking_lists_exactly_the_written_cells() {
        let mut g = grid(&[4, 4]);
        g.set_by_index(3, Molecule::new(MoleculeKind::Data, 1), UNOWNED);
        g.set_by_index(9, Molecule::new(MoleculeKind::Data, 2), UNOWNED);
        g.set_by_index(3, Molecule::new(MoleculeKind::Data, 3), UNOWNED);
        assert_eq!(g.changed_indices(), vec![3, 9]);

        g.reset_change_tracking();
        assert!(g.changed_indices().is_empty());

        g.set_by_index(0, Molecule::EMPTY, 7);
        assert_eq!(g.changed_indices(), vec![0]);
    }

    #[test]
    fn ownership_index_follows_writes_and_teardown() {
        let mut g = grid(&[4, 4]);
        g.set_by_index(5, Molecule::new(MoleculeKind::Structure, 0), 2);
        g.set_by_index(1, Molecule::new(MoleculeKind::Structure, 0), 2);
        g.set_by_index(8, Molecule::new(MoleculeKind::Structure, 0), 3);
        assert_eq!(g.cells_owned_by(2).collect::<Vec<_>>(), vec![1, 5]);

        // Re-owning a cell moves it between index sets.
        g.set_by_index(5, Molecule::new(MoleculeKind::Structure, 0), 3);
        assert_eq!(g.cells_owned_by(2).collect::<Vec<_>>(), vec![1]);
        assert_eq!(g.cells_owned_by(3).collect::<Vec<_>>(), vec![5, 8]);

        g.reset_change_tracking();
        g.clear_ownership_for(3);
        assert_eq!(g.owned_cell_count(3), 0);
        // Molecules survive, owners drop, change bits fire.
        assert_eq!(g.cell(5).map(|c| c.owner), Some(UNOWNED));
        assert!(!g.molecule_at(5).is_empty());
        assert_eq!(g.changed_indices(), vec![5, 8]);
    }

    #[test]
    fn occupied_cells_follow_the_combined_criterion() {
        let mut g = grid(&[2, 2]);
        g.set_by_index(0, Molecule::new(MoleculeKind::Data, 4), UNOWNED);
        g.set_by_index(2, Molecule::EMPTY, 9); // owned, empty molecule
        let occupied: Vec<_> = g.occupied_cells().collect();
        assert_eq!(occupied.len(), 2);
        assert_eq!(occupied[0].0, 0);
        assert_eq!(occupied[1], (2, 0, 9));
    }

    #[test]
    fn neighbor_traversal_respects_the_wrap_policy() {
        let wrapping = grid(&[3, 3]);
        let center = 4; // (1,1)
        assert_eq!(wrapping.neighbors(center).len(), 4);
        // Corner (0,0) wraps on both axes.
        assert_eq!(wrapping.neighbors(0), vec![6, 3, 2, 1]);

        let props =
            match EnvironmentProperties::new(vec![3, 3], false, LabelMatchPolicy::Exact) {
                Ok(p) => p,
                Err(e) => unreachable!("valid shape rejected: {e}"),
            };
        let bounded = Grid::new(props);
        // Corner (0,0) keeps only the in-grid neighbors.
        assert_eq!(bounded.neighbors(0), vec![3, 1]);
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut g = grid(&[2, 2]);
        assert!(!g.set_by_index(-1, Molecule::EMPTY, UNOWNED));
        assert!(!g.set_by_index(4, Molecule::EMPTY, UNOWNED));
        assert_eq!(g.changed_count(), 0);
    }
}
