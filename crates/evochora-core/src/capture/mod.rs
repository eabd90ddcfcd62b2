// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Delta-compressed capture: encoder, decoder and their shared cell state.
//!
//! The capture path is driven from outside the tick loop: every sampling
//! tick the caller hands the encoder the live grid and the auxiliary
//! engine state, and forwards any sealed chunk to the storage
//! collaborator. [`capture_from_engine`] wires the pieces together.

mod cell_state;
mod decoder;
mod encoder;

pub use cell_state::MutableCellState;
pub use decoder::{ChunkDecoder, ChunkError};
pub use encoder::{CaptureError, DeltaEncoder, SampleAux};

use evochora_schema::TickDataChunk;

use crate::engine::SimulationEngine;

/// Captures the engine's current state as one sample.
///
/// `capture_time_ms` is injected by the caller so that determinism tests
/// can pin it. Returns the sealed chunk when this sample filled one.
pub fn capture_from_engine(
    encoder: &mut DeltaEncoder,
    engine: &mut SimulationEngine,
    capture_time_ms: u64,
) -> Result<Option<TickDataChunk>, CaptureError> {
    let tick = engine.current_tick();
    let aux = SampleAux::collect(
        capture_time_ms,
        engine.organisms(),
        engine.total_organisms_created(),
        engine.rng_state(),
        engine.plugin_states(),
        engine.all_genomes_ever_seen(),
    );
    encoder.capture_tick(tick, engine.grid_mut(), aux)
}
