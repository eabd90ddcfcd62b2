// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Checkpoint loading and full engine restoration.
//!
//! Resume always restarts from the snapshot of the last chunk in the last
//! batch file — never an interior tick. Any samples captured beyond that
//! snapshot are discarded by design, which makes truncation and
//! superseded-file management unnecessary downstream.

mod loader;
mod restorer;

pub use loader::{load_latest, ResumeCheckpoint};
pub use restorer::{
    restore, ParallelismConfig, PluginSpec, ResolvedConfig, RestoredSimulation,
};

use thiserror::Error;

use crate::config::ConfigError;
use crate::plugin::PluginError;
use crate::program::ProgramError;
use crate::rng::RngError;
use crate::storage::StorageError;

/// Fatal resume failures. Each aborts the resume with a precise reason.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// No metadata blob exists for the run.
    #[error("metadata not found for run `{0}`")]
    MetadataNotFound(String),
    /// The metadata belongs to a different run.
    #[error("metadata run id `{found}` does not match requested `{expected}`")]
    RunIdMismatch {
        /// Run id the caller asked for.
        expected: String,
        /// Run id found in the metadata.
        found: String,
    },
    /// No batch file exists under the run's raw prefix.
    #[error("no batch files under `{0}`")]
    NoBatchFile(String),
    /// The last batch file decoded to zero chunks.
    #[error("batch file `{0}` contains no chunks")]
    EmptyBatch(String),
    /// The resolved configuration JSON failed to parse or was inconsistent.
    #[error("resolved config rejected: {0}")]
    BadResolvedConfig(String),
    /// A snapshot cell carried a negative owner id.
    #[error("snapshot cell {flat} has invalid owner {owner}")]
    BadSnapshotOwner {
        /// Offending cell.
        flat: i32,
        /// Offending owner column value.
        owner: i32,
    },
    /// A restored organism's geometry does not match the environment.
    #[error("organism {organism_id} has geometry inconsistent with the environment")]
    OrganismGeometry {
        /// Offending organism.
        organism_id: u64,
    },
    /// An organism references a program missing from the metadata.
    #[error("organism {organism_id} references unknown program `{program_id}`")]
    UnknownProgram {
        /// Offending organism.
        organism_id: u64,
        /// The missing program id.
        program_id: String,
    },
    /// A plugin class from the run configuration is not registered.
    #[error("plugin class `{0}` is not registered")]
    UnknownPluginClass(String),
    /// A plugin rejected its saved state blob.
    #[error("plugin `{class}` rejected its saved state: {source}")]
    PluginState {
        /// Plugin class.
        class: String,
        /// Underlying rejection.
        source: PluginError,
    },
    /// A plugin factory failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// Storage-level failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Configuration validation failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Program artifact validation failure.
    #[error(transparent)]
    Program(#[from] ProgramError),
    /// RNG state blob rejected.
    #[error(transparent)]
    Rng(#[from] RngError),
}
