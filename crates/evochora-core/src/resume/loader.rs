// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint location: finds the last complete chunk of a run.

use evochora_schema::{SimulationMetadata, TickData};

use crate::storage::{raw_prefix, ChunkStore};

use super::ResumeError;

/// The resume anchor: run metadata plus the last chunk's snapshot.
#[derive(Clone, Debug)]
pub struct ResumeCheckpoint {
    /// The run's metadata blob.
    pub metadata: SimulationMetadata,
    /// Snapshot of the last complete chunk.
    pub snapshot: TickData,
    /// First tick the resumed engine will execute.
    pub resume_from_tick: u64,
    /// Path of the batch file the checkpoint came from.
    pub batch_path: String,
}

/// Loads the latest checkpoint for `run_id`.
///
/// The checkpoint is always the **snapshot** of the last chunk in the last
/// batch file; interior ticks beyond it are discarded by design.
pub fn load_latest(store: &dyn ChunkStore, run_id: &str) -> Result<ResumeCheckpoint, ResumeError> {
    let metadata_path = store
        .find_metadata_path(run_id)
        .ok_or_else(|| ResumeError::MetadataNotFound(run_id.to_string()))?;
    let metadata = store.read_metadata(&metadata_path)?;
    if metadata.simulation_run_id != run_id {
        return Err(ResumeError::RunIdMismatch {
            expected: run_id.to_string(),
            found: metadata.simulation_run_id,
        });
    }

    let prefix = raw_prefix(run_id);
    let batch_path = store
        .find_last_batch_file(&prefix)
        .ok_or(ResumeError::NoBatchFile(prefix))?;
    let chunks = store.read_chunk_batch(&batch_path)?;
    let last = chunks
        .into_iter()
        .last()
        .ok_or_else(|| ResumeError::EmptyBatch(batch_path.clone()))?;

    let snapshot = last.snapshot;
    let resume_from_tick = snapshot.tick_number + 1;
    Ok(ResumeCheckpoint {
        metadata,
        snapshot,
        resume_from_tick,
        batch_path,
    })
}
