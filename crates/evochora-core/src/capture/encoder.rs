// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The delta encoder: turns per-tick engine state into hierarchical
//! snapshot+delta chunks.
//!
//! Sample roles inside a chunk of `A*S*C` samples:
//!
//! - sample 0 opens the chunk with a full snapshot and becomes the
//!   baseline;
//! - every `A`-th sample after it is an **accumulated** delta carrying
//!   every cell that currently differs from the baseline (multiples of
//!   `A*S` fall in this class too — with one snapshot per chunk, the
//!   would-be interior snapshots are exactly the full diff against the
//!   baseline, which keeps `decompress_tick` exact);
//! - everything else is an **incremental** delta carrying the grid's
//!   change bitmap since the previous sample.
//!
//! Every sample drains and resets the grid's change tracking. Cleared
//! cells are emitted as `(f, 0, 0)`; a cell whose molecule is 0 but whose
//! owner is not is retained, mirroring the decoder's occupancy criterion.

use thiserror::Error;

use evochora_schema::{CellDataColumns, DeltaKind, PluginState, TickData, TickDataChunk, TickDelta};

use crate::config::EncoderConfig;
use crate::grid::Grid;
use crate::organism::Organism;

use super::cell_state::MutableCellState;

use std::collections::BTreeSet;

/// Errors raised while capturing a sample.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// A cell owner id does not fit the wire format's signed 32-bit column.
    #[error("owner id {owner} at cell {flat} exceeds the wire format")]
    OwnerOverflow {
        /// Cell whose owner overflowed.
        flat: i32,
        /// The oversized owner id.
        owner: u64,
    },
    /// The grid's cell count changed between samples.
    #[error("grid has {got} cells, encoder was built for {expected}")]
    WrongGrid {
        /// Cell count the encoder was built for.
        expected: usize,
        /// Cell count observed.
        got: usize,
    },
}

/// Auxiliary engine state attached to every sample.
///
/// Assembled by the caller once per capture; both snapshots and deltas
/// carry the full set so any sample is a complete resume point.
#[derive(Clone, Debug, Default)]
pub struct SampleAux {
    /// Wall-clock capture time in milliseconds (caller-injected).
    pub capture_time_ms: u64,
    /// Serialized organism states, index order.
    pub organisms: Vec<evochora_schema::OrganismState>,
    /// Total organisms ever created.
    pub total_organisms_created: u64,
    /// Serialized RNG provider state.
    pub rng_state: Vec<u8>,
    /// Saved plugin states, registration order.
    pub plugin_states: Vec<PluginState>,
    /// Census hash list, ascending.
    pub all_genome_hashes_ever_seen: Vec<u64>,
}

impl SampleAux {
    /// Assembles the auxiliary state from live engine pieces.
    #[must_use]
    pub fn collect(
        capture_time_ms: u64,
        organisms: &[Organism],
        total_organisms_created: u64,
        rng_state: Vec<u8>,
        plugin_states: Vec<PluginState>,
        all_genome_hashes_ever_seen: Vec<u64>,
    ) -> Self {
        Self {
            capture_time_ms,
            organisms: organisms.iter().map(Organism::to_state).collect(),
            total_organisms_created,
            rng_state,
            plugin_states,
            all_genome_hashes_ever_seen,
        }
    }
}

struct ChunkBuilder {
    first_tick: u64,
    last_tick: u64,
    samples: u32,
    snapshot: TickData,
    deltas: Vec<TickDelta>,
}

/// The hierarchical snapshot+delta encoder.
pub struct DeltaEncoder {
    run_id: String,
    total_cells: usize,
    config: EncoderConfig,
    samples_since_start: u64,
    builder: Option<ChunkBuilder>,
    /// Cell state at the current chunk's snapshot.
    baseline: MutableCellState,
    /// Union of flat indices changed since the snapshot.
    since_snapshot: BTreeSet<i32>,
}

impl std::fmt::Debug for DeltaEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeltaEncoder")
            .field("run_id", &self.run_id)
            .field("samples_since_start", &self.samples_since_start)
            .field("open_chunk", &self.builder.is_some())
            .finish_non_exhaustive()
    }
}

impl DeltaEncoder {
    /// Creates an encoder for a grid of `total_cells` cells.
    #[must_use]
    pub fn new(run_id: impl Into<String>, total_cells: usize, config: EncoderConfig) -> Self {
        Self {
            run_id: run_id.into(),
            total_cells,
            config,
            samples_since_start: 0,
            builder: None,
            baseline: MutableCellState::new(total_cells),
            since_snapshot: BTreeSet::new(),
        }
    }

    /// The encoder's interval configuration.
    #[must_use]
    pub fn config(&self) -> EncoderConfig {
        self.config
    }

    /// Whether `tick` is one of this encoder's sampling ticks.
    #[must_use]
    pub fn is_sample_tick(&self, tick: u64) -> bool {
        self.config.is_sample_tick(tick)
    }

    /// Captures one sample; returns the sealed chunk when it fills.
    ///
    /// Always drains and resets the grid's change tracking.
    pub fn capture_tick(
        &mut self,
        tick: u64,
        grid: &mut Grid,
        aux: SampleAux,
    ) -> Result<Option<TickDataChunk>, CaptureError> {
        if grid.total_cells() as usize != self.total_cells {
            return Err(CaptureError::WrongGrid {
                expected: self.total_cells,
                got: grid.total_cells() as usize,
            });
        }

        let changed = grid.changed_indices();
        grid.reset_change_tracking();

        let position = self.samples_since_start % self.config.samples_per_chunk();
        if position == 0 {
            // Chunk-opening snapshot: full occupied dump, new baseline.
            let columns = dump_occupied(grid)?;
            self.baseline.apply_snapshot(&columns);
            self.since_snapshot.clear();
            self.builder = Some(ChunkBuilder {
                first_tick: tick,
                last_tick: tick,
                samples: 1,
                snapshot: tick_data(&self.run_id, tick, columns, aux),
                deltas: Vec::new(),
            });
        } else {
            self.since_snapshot.extend(changed.iter().copied());
            let accumulated =
                position % u64::from(self.config.accumulated_delta_interval) == 0;
            let (kind, columns) = if accumulated {
                (DeltaKind::Accumulated, self.diff_against_baseline(grid)?)
            } else {
                (DeltaKind::Incremental, current_values(grid, &changed)?)
            };
            let Some(builder) = self.builder.as_mut() else {
                unreachable!("BUG: delta sample without an open chunk")
            };
            builder.last_tick = tick;
            builder.samples += 1;
            builder.deltas.push(tick_delta(tick, kind, columns, aux));
        }

        self.samples_since_start += 1;
        if self.samples_since_start % self.config.samples_per_chunk() == 0 {
            Ok(self.builder.take().map(|b| seal(&self.run_id, b)))
        } else {
            Ok(None)
        }
    }

    /// Seals and returns whatever is built, regardless of fullness, and
    /// resets the encoder to a fresh start.
    pub fn flush_partial_chunk(&mut self) -> Option<TickDataChunk> {
        self.samples_since_start = 0;
        self.since_snapshot.clear();
        self.baseline.clear();
        self.builder.take().map(|b| seal(&self.run_id, b))
    }

    /// Cells currently differing from the snapshot baseline, ascending.
    fn diff_against_baseline(&self, grid: &Grid) -> Result<CellDataColumns, CaptureError> {
        let mut columns = CellDataColumns::new();
        for &flat in &self.since_snapshot {
            let (molecule, owner) = read_cell(grid, flat)?;
            if self.baseline.get(flat) != (molecule, owner) {
                columns.push(flat, molecule, owner);
            }
        }
        Ok(columns)
    }
}

fn seal(run_id: &str, builder: ChunkBuilder) -> TickDataChunk {
    TickDataChunk {
        run_id: run_id.to_string(),
        first_tick: builder.first_tick,
        last_tick: builder.last_tick,
        tick_count: builder.samples,
        snapshot: builder.snapshot,
        deltas: builder.deltas,
    }
}

fn tick_data(run_id: &str, tick: u64, columns: CellDataColumns, aux: SampleAux) -> TickData {
    TickData {
        run_id: run_id.to_string(),
        tick_number: tick,
        capture_time_ms: aux.capture_time_ms,
        cell_columns: columns,
        organisms: aux.organisms,
        total_organisms_created: aux.total_organisms_created,
        rng_state: aux.rng_state,
        plugin_states: aux.plugin_states,
        all_genome_hashes_ever_seen: aux.all_genome_hashes_ever_seen,
    }
}

fn tick_delta(tick: u64, kind: DeltaKind, columns: CellDataColumns, aux: SampleAux) -> TickDelta {
    TickDelta {
        tick_number: tick,
        capture_time_ms: aux.capture_time_ms,
        delta_kind: kind,
        changed_cells: columns,
        organisms: aux.organisms,
        total_organisms_created: aux.total_organisms_created,
        rng_state: aux.rng_state,
        plugin_states: aux.plugin_states,
        all_genome_hashes_ever_seen: aux.all_genome_hashes_ever_seen,
    }
}

fn read_cell(grid: &Grid, flat: i32) -> Result<(i32, i32), CaptureError> {
    let cell = grid.cell(flat).map_or_else(crate::grid::Cell::default, |c| c);
    let owner = i32::try_from(cell.owner)
        .map_err(|_| CaptureError::OwnerOverflow { flat, owner: cell.owner })?;
    Ok((cell.molecule.raw(), owner))
}

fn current_values(grid: &Grid, flats: &[i32]) -> Result<CellDataColumns, CaptureError> {
    let mut columns = CellDataColumns::with_capacity(flats.len());
    for &flat in flats {
        let (molecule, owner) = read_cell(grid, flat)?;
        columns.push(flat, molecule, owner);
    }
    Ok(columns)
}

fn dump_occupied(grid: &Grid) -> Result<CellDataColumns, CaptureError> {
    let mut columns = CellDataColumns::new();
    for (flat, molecule, owner) in grid.occupied_cells() {
        let owner = i32::try_from(owner)
            .map_err(|_| CaptureError::OwnerOverflow { flat, owner })?;
        columns.push(flat, molecule, owner);
    }
    Ok(columns)
}
