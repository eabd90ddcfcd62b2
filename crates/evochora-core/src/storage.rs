// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The storage collaborator port.
//!
//! The core does not own transport, compression or retry; it consumes an
//! abstract [`ChunkStore`]. Per run, blobs live under `{run_id}/raw/`: a
//! single metadata blob plus batch files named
//! `batch_<firstTick>_<lastTick>.bin`, zero-padded so lexicographic path
//! order equals tick order. [`MemoryStore`] is the in-process
//! implementation used by tests and examples.

use std::collections::BTreeMap;

use thiserror::Error;

use evochora_schema::{
    decode_chunk_batch, decode_metadata, encode_chunk_batch, encode_metadata, ChunkBatch,
    CodecError, SimulationMetadata, TickDataChunk,
};

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// No blob exists at the given path.
    #[error("no blob at `{0}`")]
    NotFound(String),
    /// A blob failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Abstract storage capability the core consumes.
pub trait ChunkStore {
    /// Locates the metadata blob for `run_id`, if present.
    fn find_metadata_path(&self, run_id: &str) -> Option<String>;

    /// Reads and decodes run metadata.
    fn read_metadata(&self, path: &str) -> Result<SimulationMetadata, StorageError>;

    /// Returns the path of the last batch file under `prefix`, in
    /// `first_tick` order.
    fn find_last_batch_file(&self, prefix: &str) -> Option<String>;

    /// Reads and decodes one batch file's chunks.
    fn read_chunk_batch(&self, path: &str) -> Result<Vec<TickDataChunk>, StorageError>;

    /// Writes a batch of chunks covering `[first_tick, last_tick]` and
    /// returns its path.
    fn write_chunk_batch(
        &mut self,
        run_id: &str,
        chunks: &[TickDataChunk],
        first_tick: u64,
        last_tick: u64,
    ) -> Result<String, StorageError>;
}

/// Path of a run's metadata blob.
#[must_use]
pub fn metadata_path(run_id: &str) -> String {
    format!("{run_id}/raw/metadata.bin")
}

/// Prefix under which a run's raw blobs live.
#[must_use]
pub fn raw_prefix(run_id: &str) -> String {
    format!("{run_id}/raw/")
}

/// Path of a batch file. Tick numbers are zero-padded to 20 digits so the
/// lexicographic order of paths equals numeric tick order.
#[must_use]
pub fn batch_path(run_id: &str, first_tick: u64, last_tick: u64) -> String {
    format!("{run_id}/raw/batch_{first_tick:020}_{last_tick:020}.bin")
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a run's metadata blob.
    pub fn put_metadata(&mut self, meta: &SimulationMetadata) -> Result<String, StorageError> {
        let path = metadata_path(&meta.simulation_run_id);
        self.blobs.insert(path.clone(), encode_metadata(meta)?);
        Ok(path)
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store holds no blobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ChunkStore for MemoryStore {
    fn find_metadata_path(&self, run_id: &str) -> Option<String> {
        let path = metadata_path(run_id);
        self.blobs.contains_key(&path).then_some(path)
    }

    fn read_metadata(&self, path: &str) -> Result<SimulationMetadata, StorageError> {
        let bytes = self
            .blobs
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(decode_metadata(bytes)?)
    }

    fn find_last_batch_file(&self, prefix: &str) -> Option<String> {
        // BTreeMap iteration is lexicographic; the padded batch names make
        // that equal to first_tick order.
        self.blobs
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .filter(|(path, _)| {
                path[prefix.len()..].starts_with("batch_")
            })
            .map(|(path, _)| path.clone())
            .last()
    }

    fn read_chunk_batch(&self, path: &str) -> Result<Vec<TickDataChunk>, StorageError> {
        let bytes = self
            .blobs
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        Ok(decode_chunk_batch(bytes)?.chunks)
    }

    fn write_chunk_batch(
        &mut self,
        run_id: &str,
        chunks: &[TickDataChunk],
        first_tick: u64,
        last_tick: u64,
    ) -> Result<String, StorageError> {
        let path = batch_path(run_id, first_tick, last_tick);
        let batch = ChunkBatch {
            chunks: chunks.to_vec(),
        };
        self.blobs.insert(path.clone(), encode_chunk_batch(&batch)?);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(first: u64, last: u64) -> TickDataChunk {
        TickDataChunk {
            run_id: "r".into(),
            first_tick: first,
            last_tick: last,
            tick_count: 1,
            snapshot: evochora_schema::TickData {
                run_id: "r".into(),
                tick_number: first,
                ..evochora_schema::TickData::default()
            },
            deltas: Vec::new(),
        }
    }

    #[test]
    fn batch_paths_sort_numerically() {
        let mut store = MemoryStore::new();
        for (first, last) in [(0u64, 9u64), (10, 19), (100, 109), (20, 29)] {
            let written = store.write_chunk_batch("r", &[chunk(first, last)], first, last);
            assert!(written.is_ok());
        }
        assert_eq!(
            store.find_last_batch_file(&raw_prefix("r")),
            Some(batch_path("r", 100, 109))
        );
    }

    #[test]
    fn metadata_round_trips_through_the_store() {
        let mut store = MemoryStore::new();
        let meta = SimulationMetadata {
            simulation_run_id: "run-x".into(),
            initial_seed: 5,
            ..SimulationMetadata::default()
        };
        let path = match store.put_metadata(&meta) {
            Ok(p) => p,
            Err(e) => unreachable!("put_metadata failed: {e}"),
        };
        assert_eq!(store.find_metadata_path("run-x"), Some(path.clone()));
        assert_eq!(store.find_metadata_path("other"), None);
        match store.read_metadata(&path) {
            Ok(read) => assert_eq!(read, meta),
            Err(e) => unreachable!("read_metadata failed: {e}"),
        }
    }

    #[test]
    fn missing_blobs_surface_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_metadata("nope"),
            Err(StorageError::NotFound(_))
        ));
        assert_eq!(store.find_last_batch_file("r/raw/"), None);
    }
}
