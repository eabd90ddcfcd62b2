// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! evochora-core: deterministic artificial-life simulation kernel.
//!
//! Embodied virtual organisms execute a molecule-encoded instruction set on
//! a shared n-dimensional grid. The engine advances them in discrete ticks
//! through a Plan / Resolve / Execute scheduler with optional parallel
//! planning and wave-1 execution; a delta codec captures temporally
//! compressed, resumable history, and the resume machinery rebuilds an
//! engine bit-equivalent to an uninterrupted run.
//!
//! The deterministic path is integer-only: cells, energy, scheduling and
//! randomness never touch floating point.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

/// Delta-compressed capture: encoder, decoder, shared cell state.
pub mod capture;
/// Checkpoint loading and engine restoration.
pub mod resume;

mod config;
mod engine;
mod genome;
mod grid;
/// The instruction set: opcode table, planning and execution.
pub mod isa;
mod molecule;
mod organism;
mod plugin;
mod pool;
mod program;
mod resolver;
mod rng;
mod storage;
mod thermo;

// Re-exports for stable public API
/// Validated configuration: environment, encoder intervals, scaling.
pub use config::{
    ConfigError, EncoderConfig, EnvironmentProperties, LabelMatchPolicy, OrganismConfig,
    ScalingTable,
};
/// The tick scheduler and its control surface.
pub use engine::{EngineError, SimulationEngine, TickSummary};
/// Genome hashing and the run census.
pub use genome::{genome_hash, GenomeCensus};
/// The shared environment grid.
pub use grid::{Cell, Grid, OwnerId, UNOWNED};
/// Packed molecules.
pub use molecule::{Molecule, MoleculeKind, VALUE_MAX, VALUE_MIN};
/// Per-organism state and register banks.
pub use organism::{
    Organism, RegisterBank, DP_COUNT, DR_COUNT, FPR_COUNT, LR_COUNT, MAX_CALL_DEPTH,
    MAX_DATA_STACK, MAX_LOCATION_STACK, PR_COUNT,
};
/// The plugin SPI.
pub use plugin::{
    BirthHandler, DeathCtx, DeathHandler, InstructionInterceptor, InterceptionCtx,
    InterceptionScratch, PluginEntry, PluginError, PluginRegistry, PluginSet, SimulationPlugin,
    TickCtx, TickPlugin,
};
/// The deterministic worker pool.
pub use pool::{PoolError, WorkerPool};
/// Runtime program artifacts.
pub use program::{ProgramArtifact, ProgramError, SourceLocation};
/// Conflict resolution over environment-modifying instructions.
pub use resolver::resolve_conflicts;
/// The deterministic random provider.
pub use rng::{DeterministicRng, RngError};
/// The storage collaborator port and the in-memory backend.
pub use storage::{batch_path, metadata_path, raw_prefix, ChunkStore, MemoryStore, StorageError};
/// Thermodynamic policies.
pub use thermo::{
    DefaultPolicy, PolicyManager, ThermodynamicContext, ThermodynamicPolicy, Thermodynamics,
};
