// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine restoration from a checkpoint.
//!
//! Rebuilds a fully equivalent in-memory engine: environment and grid from
//! the resolved configuration and the snapshot's cell columns, the program
//! table from the metadata artifacts, every organism (dead ones included),
//! the RNG provider's exact state, the genome census, and each configured
//! plugin instance (constructed through the registry, then fed its saved
//! state blob). Continuation from the returned engine is bit-identical to
//! an uninterrupted run.

use serde::Deserialize;

use evochora_schema::TickData;

use crate::config::{EnvironmentProperties, OrganismConfig};
use crate::engine::SimulationEngine;
use crate::genome::GenomeCensus;
use crate::grid::Grid;
use crate::molecule::Molecule;
use crate::organism::Organism;
use crate::plugin::PluginRegistry;
use crate::program::ProgramArtifact;
use crate::rng::DeterministicRng;
use crate::thermo::PolicyManager;

use super::{loader::ResumeCheckpoint, ResumeError};

/// Plugin entry of the resolved configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct PluginSpec {
    /// Plugin class name, resolved through the registry.
    pub class: String,
    /// Free-form options passed to the factory.
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_capacity() -> usize {
    1
}

fn default_thresholds() -> Vec<u64> {
    vec![0]
}

fn default_max_threads() -> Vec<u32> {
    vec![0]
}

/// Parallelism section of the resolved configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct ParallelismConfig {
    /// Worker pool capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Scaling-table organism thresholds.
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<u64>,
    /// Scaling-table maximum thread counts (0 = all workers).
    #[serde(default = "default_max_threads")]
    pub max_threads: Vec<u32>,
}

impl Default for ParallelismConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            thresholds: default_thresholds(),
            max_threads: default_max_threads(),
        }
    }
}

/// The authoritative engine configuration, parsed from
/// `metadata.resolved_config_json`.
#[derive(Clone, Debug, Deserialize)]
pub struct ResolvedConfig {
    /// Environment geometry and policies.
    pub environment: EnvironmentProperties,
    /// Organism accounting knobs.
    #[serde(default)]
    pub organism: OrganismConfig,
    /// Plugins to instantiate, in registration order.
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
    /// Worker pool and scaling setup.
    #[serde(default)]
    pub parallelism: ParallelismConfig,
}

/// Handle returned by [`restore`].
pub struct RestoredSimulation {
    /// The rebuilt engine, positioned at the checkpoint tick.
    pub engine: SimulationEngine,
    /// Run id being continued.
    pub run_id: String,
    /// First tick the caller should execute.
    pub resume_from_tick: u64,
    /// Original run start time in milliseconds.
    pub start_time_ms: i64,
    /// Original run seed.
    pub seed: i64,
}

impl std::fmt::Debug for RestoredSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestoredSimulation")
            .field("run_id", &self.run_id)
            .field("resume_from_tick", &self.resume_from_tick)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

/// Rebuilds an engine equivalent to the checkpointed one.
pub fn restore(
    checkpoint: &ResumeCheckpoint,
    registry: &PluginRegistry,
    policy: PolicyManager,
) -> Result<RestoredSimulation, ResumeError> {
    let metadata = &checkpoint.metadata;
    let snapshot = &checkpoint.snapshot;

    let config: ResolvedConfig = serde_json::from_str(&metadata.resolved_config_json)
        .map_err(|e| ResumeError::BadResolvedConfig(e.to_string()))?;
    if config.environment.shape != metadata.environment.shape
        || config.environment.toroidal != metadata.environment.toroidal
    {
        return Err(ResumeError::BadResolvedConfig(
            "environment section disagrees with resolved config".to_string(),
        ));
    }

    // Deserialized properties bypass construction checks; re-validate.
    let props = EnvironmentProperties::new(
        config.environment.shape.clone(),
        config.environment.toroidal,
        config.environment.label_match,
    )?;
    let dimensions = props.dimensions();

    let grid = rebuild_grid(props, snapshot)?;
    let programs =
        ProgramArtifact::table_from_schema(&metadata.programs, dimensions)?;

    let mut rng = DeterministicRng::from_seed(metadata.initial_seed);
    if !snapshot.rng_state.is_empty() {
        rng.load_state(&snapshot.rng_state)?;
    }

    // Backwards compatibility: snapshots that predate census capture carry
    // no hash list; rebuild what is reconstructible from the living
    // organisms and nothing more (extinct genomes are lost, not invented).
    let census = if snapshot.all_genome_hashes_ever_seen.is_empty() {
        GenomeCensus::from_hashes(
            snapshot
                .organisms
                .iter()
                .filter(|o| !o.is_dead)
                .map(|o| o.genome_hash),
        )
    } else {
        GenomeCensus::from_hashes(snapshot.all_genome_hashes_ever_seen.iter().copied())
    };

    let mut engine = SimulationEngine::for_resume(
        grid,
        snapshot.tick_number,
        snapshot.total_organisms_created,
        census,
        policy,
        config.organism,
        config.parallelism.capacity,
    )?;
    engine.set_parallelism_scaling(
        config.parallelism.thresholds.clone(),
        config.parallelism.max_threads.clone(),
    )?;

    // Organisms, dead ones included: they are awaiting their final
    // serialization boundary.
    for state in &snapshot.organisms {
        if state.ip.len() != dimensions
            || state.dv.len() != dimensions
            || state.initial_position.len() != dimensions
            || state.dps.iter().any(|dp| dp.len() != dimensions)
        {
            return Err(ResumeError::OrganismGeometry {
                organism_id: state.organism_id,
            });
        }
        if let Some(program_id) = &state.program_id {
            if !programs.contains_key(program_id) {
                return Err(ResumeError::UnknownProgram {
                    organism_id: state.organism_id,
                    program_id: program_id.clone(),
                });
            }
        }
        engine.add_organism(Organism::from_state(state));
    }
    engine.set_program_artifacts(programs);

    instantiate_plugins(&mut engine, &config, snapshot, registry, &rng)?;
    engine.set_random_provider(rng);

    Ok(RestoredSimulation {
        engine,
        run_id: metadata.simulation_run_id.clone(),
        resume_from_tick: checkpoint.resume_from_tick,
        start_time_ms: metadata.start_time_ms,
        seed: metadata.initial_seed,
    })
}

fn rebuild_grid(
    props: EnvironmentProperties,
    snapshot: &TickData,
) -> Result<Grid, ResumeError> {
    let mut grid = Grid::new(props);
    for (flat, molecule, owner) in snapshot.cell_columns.rows() {
        let owner = u64::try_from(owner)
            .map_err(|_| ResumeError::BadSnapshotOwner { flat, owner })?;
        grid.set_by_index(flat, Molecule::from_raw(molecule), owner);
    }
    grid.reset_change_tracking();
    Ok(grid)
}

fn instantiate_plugins(
    engine: &mut SimulationEngine,
    config: &ResolvedConfig,
    snapshot: &TickData,
    registry: &PluginRegistry,
    rng: &DeterministicRng,
) -> Result<(), ResumeError> {
    // Saved blobs are matched to instances by class, in occurrence order,
    // so multiple instances of one class restore their own state.
    let mut blob_used = vec![false; snapshot.plugin_states.len()];

    for (index, spec) in config.plugins.iter().enumerate() {
        if !registry.contains(&spec.class) {
            return Err(ResumeError::UnknownPluginClass(spec.class.clone()));
        }
        let sub_rng = rng.derive_for(&spec.class, index as u64);
        let mut instance = registry.instantiate(&spec.class, sub_rng, &spec.options)?;
        if let Some(slot) = next_blob_for(&spec.class, snapshot, &blob_used) {
            blob_used[slot] = true;
            let blob = &snapshot.plugin_states[slot].state_blob;
            if !blob.is_empty() {
                instance
                    .load_state(blob)
                    .map_err(|source| ResumeError::PluginState {
                        class: spec.class.clone(),
                        source,
                    })?;
            }
        }
        engine.register_plugin(std::sync::Arc::from(instance));
    }
    Ok(())
}

fn next_blob_for(class: &str, snapshot: &TickData, used: &[bool]) -> Option<usize> {
    snapshot
        .plugin_states
        .iter()
        .enumerate()
        .position(|(i, state)| state.plugin_class == class && !used[i])
}
