// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dense mutable cell state used by both codec directions.
//!
//! The decoder replays snapshots and deltas into one of these; the encoder
//! keeps one as its snapshot baseline. Occupancy follows the combined
//! criterion `molecule != 0 || owner != 0` on both sides, which is what
//! makes a `(f, 0, 0)` delta row a removal and a `(f, 0, o≠0)` row a
//! retained owned-empty cell.

use evochora_schema::CellDataColumns;

/// Dense molecule/owner arrays plus an occupancy bitmap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableCellState {
    molecules: Vec<i32>,
    owners: Vec<i32>,
    occupied: Vec<u64>,
}

impl MutableCellState {
    /// Creates an all-empty state over `total_cells` cells.
    #[must_use]
    pub fn new(total_cells: usize) -> Self {
        Self {
            molecules: vec![0; total_cells],
            owners: vec![0; total_cells],
            occupied: vec![0; total_cells.div_ceil(64)],
        }
    }

    /// Number of cells tracked.
    #[must_use]
    pub fn total_cells(&self) -> usize {
        self.molecules.len()
    }

    /// Clears every cell.
    pub fn clear(&mut self) {
        self.molecules.fill(0);
        self.owners.fill(0);
        self.occupied.fill(0);
    }

    /// Writes one cell and recomputes its occupancy.
    ///
    /// Out-of-range indices are ignored silently, as the delta contract
    /// requires.
    pub fn set(&mut self, flat: i32, molecule: i32, owner: i32) {
        let Ok(idx) = usize::try_from(flat) else {
            return;
        };
        if idx >= self.molecules.len() {
            return;
        }
        self.molecules[idx] = molecule;
        self.owners[idx] = owner;
        if molecule != 0 || owner != 0 {
            self.occupied[idx / 64] |= 1 << (idx % 64);
        } else {
            self.occupied[idx / 64] &= !(1 << (idx % 64));
        }
    }

    /// Whether cell `idx` is occupied.
    #[must_use]
    pub fn is_occupied(&self, idx: usize) -> bool {
        idx < self.molecules.len() && (self.occupied[idx / 64] >> (idx % 64)) & 1 == 1
    }

    /// Reads one cell as `(molecule, owner)`; out of range reads as empty.
    #[must_use]
    pub fn get(&self, flat: i32) -> (i32, i32) {
        usize::try_from(flat)
            .ok()
            .filter(|&idx| idx < self.molecules.len())
            .map_or((0, 0), |idx| (self.molecules[idx], self.owners[idx]))
    }

    /// Replaces the whole state with a snapshot's columns.
    pub fn apply_snapshot(&mut self, columns: &CellDataColumns) {
        self.clear();
        self.apply_delta(columns);
    }

    /// Applies delta rows on top of the current state.
    pub fn apply_delta(&mut self, columns: &CellDataColumns) {
        for (flat, molecule, owner) in columns.rows() {
            self.set(flat, molecule, owner);
        }
    }

    /// Exports every occupied cell in ascending flat order.
    #[must_use]
    pub fn to_cell_columns(&self) -> CellDataColumns {
        let mut columns = CellDataColumns::new();
        for (word_index, &word) in self.occupied.iter().enumerate() {
            let mut bits = word;
            while bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                let idx = word_index * 64 + bit;
                columns.push(idx as i32, self.molecules[idx], self.owners[idx]);
                bits &= bits - 1;
            }
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_zero_rows_remove_cells() {
        let mut state = MutableCellState::new(16);
        state.set(3, 42, 1);
        assert!(state.is_occupied(3));
        state.set(3, 0, 0);
        assert!(!state.is_occupied(3));
        assert!(state.to_cell_columns().is_empty());
    }

    #[test]
    fn owned_empty_cells_stay_occupied() {
        let mut state = MutableCellState::new(16);
        state.set(5, 0, 9);
        assert!(state.is_occupied(5));
        let columns = state.to_cell_columns();
        assert_eq!(columns.flat_indices, vec![5]);
        assert_eq!(columns.molecule_data, vec![0]);
        assert_eq!(columns.owner_ids, vec![9]);
    }

    #[test]
    fn out_of_range_rows_are_ignored_silently() {
        let mut state = MutableCellState::new(4);
        let mut columns = CellDataColumns::new();
        columns.push(99, 1, 1);
        columns.push(-1, 1, 1);
        columns.push(2, 7, 0);
        state.apply_delta(&columns);
        let exported = state.to_cell_columns();
        assert_eq!(exported.flat_indices, vec![2]);
    }

    #[test]
    fn snapshot_replaces_prior_state_entirely() {
        let mut state = MutableCellState::new(8);
        state.set(1, 11, 0);
        state.set(2, 22, 0);

        let mut snapshot = CellDataColumns::new();
        snapshot.push(4, 44, 3);
        state.apply_snapshot(&snapshot);

        assert!(!state.is_occupied(1));
        assert!(!state.is_occupied(2));
        assert!(state.is_occupied(4));
        assert_eq!(state.get(4), (44, 3));
    }
}
