// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Sparse cell columns: the columnar grid payload of snapshots and deltas.

use serde::{Deserialize, Serialize};

/// Three parallel columns describing a sparse set of grid cells.
///
/// Entries correspond by index: row `i` is the cell at row-major flat index
/// `flat_indices[i]`, carrying packed molecule `molecule_data[i]` and owner
/// `owner_ids[i]`. A row `(f, 0, 0)` signals removal of cell `f`; a row with
/// `molecule_data == 0` but a nonzero owner is a retained, owned empty cell.
///
/// Producers emit rows in ascending flat-index order. Consumers must not
/// assume ordering beyond what [`CellDataColumns::is_consistent`] checks;
/// the decoder re-derives occupancy from the combined zero criterion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellDataColumns {
    /// Row-major flat indices into the grid.
    pub flat_indices: Vec<i32>,
    /// Packed molecule integers, aligned with `flat_indices`.
    pub molecule_data: Vec<i32>,
    /// Owner organism ids (0 = unowned), aligned with `flat_indices`.
    pub owner_ids: Vec<i32>,
}

impl CellDataColumns {
    /// Creates empty columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates columns with capacity for `n` rows.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            flat_indices: Vec::with_capacity(n),
            molecule_data: Vec::with_capacity(n),
            owner_ids: Vec::with_capacity(n),
        }
    }

    /// Appends one `(flat, molecule, owner)` row.
    pub fn push(&mut self, flat: i32, molecule: i32, owner: i32) {
        self.flat_indices.push(flat);
        self.molecule_data.push(molecule);
        self.owner_ids.push(owner);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flat_indices.len()
    }

    /// Returns `true` when no rows are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flat_indices.is_empty()
    }

    /// Returns `true` when all three columns have equal length.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.flat_indices.len() == self.molecule_data.len()
            && self.flat_indices.len() == self.owner_ids.len()
    }

    /// Iterates `(flat, molecule, owner)` rows in storage order.
    pub fn rows(&self) -> impl Iterator<Item = (i32, i32, i32)> + '_ {
        self.flat_indices
            .iter()
            .zip(&self.molecule_data)
            .zip(&self.owner_ids)
            .map(|((&f, &m), &o)| (f, m, o))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_columns_aligned() {
        let mut cols = CellDataColumns::new();
        cols.push(3, 42, 1);
        cols.push(7, 0, 0);
        assert!(cols.is_consistent());
        assert_eq!(cols.len(), 2);
        let rows: Vec<_> = cols.rows().collect();
        assert_eq!(rows, vec![(3, 42, 1), (7, 0, 0)]);
    }

    #[test]
    fn ragged_columns_are_detected() {
        let cols = CellDataColumns {
            flat_indices: vec![1, 2],
            molecule_data: vec![5],
            owner_ids: vec![0, 0],
        };
        assert!(!cols.is_consistent());
    }
}
