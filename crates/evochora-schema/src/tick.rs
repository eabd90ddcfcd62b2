// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tick samples: chunks, snapshots and deltas.
//!
//! A [`TickDataChunk`] is a contiguous run of capture samples: exactly one
//! [`TickData`] snapshot followed by zero or more [`TickDelta`]s with
//! strictly increasing tick numbers. Every delta carries the same auxiliary
//! engine state as a snapshot (organisms, RNG, plugin blobs, census), so any
//! sample inside a chunk is a complete resume point once its cell state has
//! been reconstructed.

use serde::{Deserialize, Serialize};

use crate::cells::CellDataColumns;
use crate::organism::OrganismState;

/// Classification of a delta sample relative to its chunk's snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaKind {
    /// Cells changed since the immediately preceding sample.
    Incremental,
    /// Cells that differ from the chunk's snapshot baseline.
    Accumulated,
}

/// Opaque saved state of one plugin instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginState {
    /// Plugin class name, resolvable through the plugin registry on resume.
    pub plugin_class: String,
    /// Serialized plugin state.
    pub state_blob: Vec<u8>,
}

/// Full engine state at one capture tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickData {
    /// Run this sample belongs to.
    pub run_id: String,
    /// Tick number of the sample.
    pub tick_number: u64,
    /// Wall-clock capture time in milliseconds (injected by the caller so
    /// determinism tests can pin it).
    pub capture_time_ms: u64,
    /// All occupied cells as sparse columns.
    pub cell_columns: CellDataColumns,
    /// Every organism, dead ones included.
    pub organisms: Vec<OrganismState>,
    /// Total organisms ever created in this run.
    pub total_organisms_created: u64,
    /// Serialized RNG provider state.
    pub rng_state: Vec<u8>,
    /// Saved plugin states in registration order.
    pub plugin_states: Vec<PluginState>,
    /// Cumulative census: every nonzero genome hash ever observed, ascending.
    pub all_genome_hashes_ever_seen: Vec<u64>,
}

/// One delta sample inside a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickDelta {
    /// Tick number of the sample.
    pub tick_number: u64,
    /// Wall-clock capture time in milliseconds.
    pub capture_time_ms: u64,
    /// Whether the changed cells are incremental or accumulated.
    pub delta_kind: DeltaKind,
    /// Changed cells; `(f, 0, 0)` rows are removals.
    pub changed_cells: CellDataColumns,
    /// Every organism at this tick, dead ones included.
    pub organisms: Vec<OrganismState>,
    /// Total organisms ever created in this run.
    pub total_organisms_created: u64,
    /// Serialized RNG provider state.
    pub rng_state: Vec<u8>,
    /// Saved plugin states in registration order.
    pub plugin_states: Vec<PluginState>,
    /// Cumulative census at this tick, ascending.
    pub all_genome_hashes_ever_seen: Vec<u64>,
}

/// A sealed run of samples: one snapshot plus its deltas.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickDataChunk {
    /// Run this chunk belongs to.
    pub run_id: String,
    /// Tick of the snapshot (always the first sample).
    pub first_tick: u64,
    /// Tick of the last sample in the chunk.
    pub last_tick: u64,
    /// Number of samples in the chunk, snapshot included.
    pub tick_count: u32,
    /// The opening snapshot.
    pub snapshot: TickData,
    /// Delta samples in strictly increasing tick order.
    pub deltas: Vec<TickDelta>,
}

/// One batch file's payload: chunks totally ordered by `first_tick`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBatch {
    /// Chunks in ascending `first_tick` order.
    pub chunks: Vec<TickDataChunk>,
}
