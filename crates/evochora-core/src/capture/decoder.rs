// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The chunk decoder: exact reconstruction of any captured tick.
//!
//! Reconstruction replays the chunk's snapshot and then deltas into a
//! [`MutableCellState`]. For a point query, the largest accumulated delta
//! at or below the requested tick short-circuits the replay: snapshot,
//! that accumulated delta, then only the incrementals after it.
//!
//! Decoders reuse internal dense state and are not safe under concurrent
//! calls on the same instance.

use thiserror::Error;

use evochora_schema::{DeltaKind, TickData, TickDataChunk, TickDelta};

use super::cell_state::MutableCellState;

/// Corruption detected while reading a chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// The requested tick lies outside the chunk.
    #[error("tick {tick} outside chunk range [{first}, {last}]")]
    TickOutOfRange {
        /// Requested tick.
        tick: u64,
        /// First tick of the chunk.
        first: u64,
        /// Last tick of the chunk.
        last: u64,
    },
    /// The requested tick is inside the range but not present.
    #[error("tick {0} is not captured in this chunk")]
    TickMissing(u64),
    /// A sample's cell columns had unequal lengths.
    #[error("ragged cell columns at tick {0}")]
    RaggedColumns(u64),
    /// Delta tick numbers were not strictly increasing.
    #[error("delta ticks not strictly increasing: {previous} then {next}")]
    NonMonotonicDeltas {
        /// Tick of the preceding sample.
        previous: u64,
        /// Offending tick.
        next: u64,
    },
}

/// Reconstructs tick states from chunks.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: MutableCellState,
}

impl ChunkDecoder {
    /// Creates a decoder for grids of `total_cells` cells.
    #[must_use]
    pub fn new(total_cells: usize) -> Self {
        Self {
            state: MutableCellState::new(total_cells),
        }
    }

    /// Reconstructs every sample of `chunk` in tick order.
    pub fn decompress_chunk(&mut self, chunk: &TickDataChunk) -> Result<Vec<TickData>, ChunkError> {
        validate(chunk)?;
        let mut out = Vec::with_capacity(chunk.deltas.len() + 1);
        self.state.apply_snapshot(&chunk.snapshot.cell_columns);
        out.push(self.emit_snapshot(chunk));
        for delta in &chunk.deltas {
            self.state.apply_delta(&delta.changed_cells);
            out.push(self.emit_delta(chunk, delta));
        }
        Ok(out)
    }

    /// Reconstructs the single sample at `tick`.
    pub fn decompress_tick(
        &mut self,
        chunk: &TickDataChunk,
        tick: u64,
    ) -> Result<TickData, ChunkError> {
        validate(chunk)?;
        if tick < chunk.first_tick || tick > chunk.last_tick {
            return Err(ChunkError::TickOutOfRange {
                tick,
                first: chunk.first_tick,
                last: chunk.last_tick,
            });
        }
        if tick == chunk.snapshot.tick_number {
            self.state.apply_snapshot(&chunk.snapshot.cell_columns);
            return Ok(self.emit_snapshot(chunk));
        }

        let target = chunk
            .deltas
            .iter()
            .position(|d| d.tick_number == tick)
            .ok_or(ChunkError::TickMissing(tick))?;

        // Largest accumulated delta at or below the target short-circuits
        // the incremental replay.
        let accumulated = chunk.deltas[..=target]
            .iter()
            .rposition(|d| d.delta_kind == DeltaKind::Accumulated);

        self.state.apply_snapshot(&chunk.snapshot.cell_columns);
        let replay_from = match accumulated {
            Some(acc) => {
                self.state.apply_delta(&chunk.deltas[acc].changed_cells);
                acc + 1
            }
            None => 0,
        };
        for delta in &chunk.deltas[replay_from..=target] {
            self.state.apply_delta(&delta.changed_cells);
        }
        Ok(self.emit_delta(chunk, &chunk.deltas[target]))
    }

    fn emit_snapshot(&self, chunk: &TickDataChunk) -> TickData {
        TickData {
            run_id: chunk.run_id.clone(),
            tick_number: chunk.snapshot.tick_number,
            capture_time_ms: chunk.snapshot.capture_time_ms,
            cell_columns: self.state.to_cell_columns(),
            organisms: chunk.snapshot.organisms.clone(),
            total_organisms_created: chunk.snapshot.total_organisms_created,
            rng_state: chunk.snapshot.rng_state.clone(),
            plugin_states: chunk.snapshot.plugin_states.clone(),
            all_genome_hashes_ever_seen: chunk.snapshot.all_genome_hashes_ever_seen.clone(),
        }
    }

    fn emit_delta(&self, chunk: &TickDataChunk, delta: &TickDelta) -> TickData {
        TickData {
            run_id: chunk.run_id.clone(),
            tick_number: delta.tick_number,
            capture_time_ms: delta.capture_time_ms,
            cell_columns: self.state.to_cell_columns(),
            organisms: delta.organisms.clone(),
            total_organisms_created: delta.total_organisms_created,
            rng_state: delta.rng_state.clone(),
            plugin_states: delta.plugin_states.clone(),
            all_genome_hashes_ever_seen: delta.all_genome_hashes_ever_seen.clone(),
        }
    }
}

fn validate(chunk: &TickDataChunk) -> Result<(), ChunkError> {
    if !chunk.snapshot.cell_columns.is_consistent() {
        return Err(ChunkError::RaggedColumns(chunk.snapshot.tick_number));
    }
    let mut previous = chunk.snapshot.tick_number;
    for delta in &chunk.deltas {
        if !delta.changed_cells.is_consistent() {
            return Err(ChunkError::RaggedColumns(delta.tick_number));
        }
        if delta.tick_number <= previous {
            return Err(ChunkError::NonMonotonicDeltas {
                previous,
                next: delta.tick_number,
            });
        }
        previous = delta.tick_number;
    }
    Ok(())
}
