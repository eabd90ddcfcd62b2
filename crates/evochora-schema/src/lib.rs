// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! evochora-schema: wire-format types for simulation capture and resume.
//!
//! Every struct here mirrors one message of the language-neutral capture
//! schema: chunks, tick data, tick deltas, sparse cell columns, organism
//! state, plugin state, and run metadata. The byte representation is
//! canonical CBOR (see [`codec`]); identical values always encode to
//! identical bytes, which the capture determinism tests rely on.
//!
//! The engine crate reuses these types directly for its own in-memory
//! state where the shapes coincide (register slots, call frames), so the
//! capture path and the resume path cannot drift apart.

mod cells;
mod codec;
mod metadata;
mod organism;
mod tick;

pub use cells::CellDataColumns;
pub use codec::{
    decode_chunk, decode_chunk_batch, decode_metadata, encode_chunk, encode_chunk_batch,
    encode_metadata, CodecError,
};
pub use metadata::{EnvironmentMetadata, Placement, ProgramArtifact, SimulationMetadata, SourceSpan};
pub use organism::{CallFrame, OrganismState, RegisterValue};
pub use tick::{ChunkBatch, DeltaKind, PluginState, TickData, TickDataChunk, TickDelta};
