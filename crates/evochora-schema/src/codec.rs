// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical CBOR byte codec for schema messages.
//!
//! All persisted blobs go through these helpers. CBOR via `ciborium` is
//! deterministic for our types (struct fields encode in declaration order,
//! maps are `BTreeMap`s), so equal values produce equal bytes and the
//! capture determinism suite can compare encoded chunks directly.

use thiserror::Error;

use crate::metadata::SimulationMetadata;
use crate::tick::{ChunkBatch, TickDataChunk};

/// Errors produced while encoding or decoding schema messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A value failed to serialize.
    #[error("encode failed: {0}")]
    Encode(String),
    /// A byte blob failed to parse as the requested message.
    #[error("decode failed: {0}")]
    Decode(String),
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encodes a single chunk.
pub fn encode_chunk(chunk: &TickDataChunk) -> Result<Vec<u8>, CodecError> {
    encode(chunk)
}

/// Decodes a single chunk.
pub fn decode_chunk(bytes: &[u8]) -> Result<TickDataChunk, CodecError> {
    decode(bytes)
}

/// Encodes a batch of chunks.
pub fn encode_chunk_batch(batch: &ChunkBatch) -> Result<Vec<u8>, CodecError> {
    encode(batch)
}

/// Decodes a batch of chunks.
pub fn decode_chunk_batch(bytes: &[u8]) -> Result<ChunkBatch, CodecError> {
    decode(bytes)
}

/// Encodes run metadata.
pub fn encode_metadata(meta: &SimulationMetadata) -> Result<Vec<u8>, CodecError> {
    encode(meta)
}

/// Decodes run metadata.
pub fn decode_metadata(bytes: &[u8]) -> Result<SimulationMetadata, CodecError> {
    decode(bytes)
}
