// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The tick scheduler: Plan / Resolve / Execute with deterministic
//! parallelism.
//!
//! Per tick, in order:
//!
//! 1. reset the per-tick birth list;
//! 2. run tick plugins in registration order (failures contained);
//! 3. pick the active parallelism from the scaling table;
//! 4. plan every organism — on the parallel path the plan, the interceptor
//!    chain and wave-1 execution of parallel-safe instructions are fused on
//!    the worker that owns the organism's index slice; the sequential path
//!    runs the same body on the scheduler thread with its dedicated
//!    scratch;
//! 5. resolve conflicts over environment-modifying instructions and run
//!    wave 2 sequentially in organism order;
//! 6. sweep the instruction pointers past `NOP`/`LABEL`/empty-code runs;
//! 7. charge error penalties for failures execute did not charge;
//! 8. handle deaths (wave-1 deaths first, then the rest, both in stable
//!    organism-index order), then finalize births (handlers, genome hash,
//!    census) in push order;
//! 9. advance `current_tick`.
//!
//! Determinism: organism state is disjoint per organism, so wave-1 effects
//! commute; everything cross-organism (grid writes, RNG draws, ids, deaths,
//! births) is serialized on the scheduler thread in organism order. Equal
//! inputs therefore produce equal outputs for every parallelism level,
//! which `tests/determinism.rs` pins.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use evochora_schema::PluginState;

use crate::config::{ConfigError, OrganismConfig, ScalingTable};
use crate::genome::{genome_hash, GenomeCensus};
use crate::grid::{Grid, OwnerId};
use crate::isa::{
    execute_env, execute_failed, execute_local, instant_skip, plan, EnvExecCtx,
    PlannedInstruction,
};
use crate::organism::Organism;
use crate::plugin::{
    DeathCtx, InterceptionCtx, InterceptionScratch, PluginEntry, PluginSet, SimulationPlugin,
    TickCtx,
};
use crate::pool::{PoolError, WorkerPool};
use crate::program::ProgramArtifact;
use crate::resolver::resolve_conflicts;
use crate::rng::DeterministicRng;
use crate::thermo::PolicyManager;

/// Errors raised by the scheduler itself.
///
/// Organism-level instruction failures are not errors; they are penalized
/// state transitions. Anything surfacing here aborted the tick.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker pool rejected a dispatch.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// Invalid construction-time configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// An organism position fell outside the grid.
    #[error("position {position:?} is outside the grid")]
    InvalidPosition {
        /// The rejected position.
        position: Vec<i32>,
    },
}

/// Per-tick counters returned by [`SimulationEngine::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick these counters describe.
    pub tick: u64,
    /// Organisms that planned an instruction.
    pub planned: usize,
    /// Instructions executed in wave 1.
    pub wave1_executed: usize,
    /// Instructions executed in wave 2.
    pub wave2_executed: usize,
    /// Instructions that lost conflict resolution.
    pub conflicts_lost: usize,
    /// Organisms that died this tick.
    pub deaths: usize,
    /// Organisms born this tick.
    pub births: usize,
}

/// Which wave an organism's instruction ran in this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Wave {
    #[default]
    None,
    One,
    Two,
}

/// Per-organism bookkeeping for one tick.
#[derive(Debug, Default)]
struct OrgTickRecord {
    instr: Option<PlannedInstruction>,
    wave: Wave,
    charged: bool,
    penalty_due: bool,
    died_in_wave1: bool,
}

/// The simulation engine: grid, organisms, plugins and the tick loop.
pub struct SimulationEngine {
    grid: Grid,
    organisms: Vec<Organism>,
    current_tick: u64,
    next_organism_id: OwnerId,
    total_created: u64,
    census: GenomeCensus,
    rng: DeterministicRng,
    plugins: PluginSet,
    policy: PolicyManager,
    pool: WorkerPool,
    scaling: ScalingTable,
    organism_config: OrganismConfig,
    programs: BTreeMap<String, ProgramArtifact>,
    /// One scratch per pool worker plus a dedicated sequential-path slot.
    scratches: Vec<InterceptionScratch>,
}

impl std::fmt::Debug for SimulationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationEngine")
            .field("current_tick", &self.current_tick)
            .field("organisms", &self.organisms.len())
            .field("total_created", &self.total_created)
            .field("census", &self.census.len())
            .finish_non_exhaustive()
    }
}

impl SimulationEngine {
    /// Creates a fresh engine around `grid` with a pool of `parallelism`
    /// workers.
    pub fn new(
        grid: Grid,
        policy: PolicyManager,
        organism_config: OrganismConfig,
        parallelism: usize,
    ) -> Result<Self, ConfigError> {
        let pool = WorkerPool::new(parallelism)?;
        let scratches = (0..=parallelism)
            .map(|_| InterceptionScratch::default())
            .collect();
        Ok(Self {
            grid,
            organisms: Vec::new(),
            current_tick: 0,
            next_organism_id: 1,
            total_created: 0,
            census: GenomeCensus::new(),
            rng: DeterministicRng::from_seed(0),
            plugins: PluginSet::default(),
            policy,
            pool,
            scaling: ScalingTable::default(),
            organism_config,
            programs: BTreeMap::new(),
            scratches,
        })
    }

    /// Creates an engine continuing an interrupted run.
    ///
    /// `current_tick` is the checkpoint snapshot's tick; the next organism
    /// id continues after every id ever assigned.
    pub fn for_resume(
        grid: Grid,
        current_tick: u64,
        total_organisms_created: u64,
        census: GenomeCensus,
        policy: PolicyManager,
        organism_config: OrganismConfig,
        parallelism: usize,
    ) -> Result<Self, ConfigError> {
        let mut engine = Self::new(grid, policy, organism_config, parallelism)?;
        engine.current_tick = current_tick;
        engine.total_created = total_organisms_created;
        engine.next_organism_id = total_organisms_created + 1;
        engine.census = census;
        Ok(engine)
    }

    // ── control surface ─────────────────────────────────────────────

    /// Registers a plugin against every hook it implements.
    pub fn register_plugin(&mut self, plugin: Arc<dyn SimulationPlugin>) {
        self.plugins.register(plugin);
    }

    /// Replaces the program artifact table.
    pub fn set_program_artifacts(&mut self, programs: BTreeMap<String, ProgramArtifact>) {
        self.programs = programs;
    }

    /// Installed program artifacts.
    #[must_use]
    pub fn program_artifacts(&self) -> &BTreeMap<String, ProgramArtifact> {
        &self.programs
    }

    /// Replaces the random provider.
    pub fn set_random_provider(&mut self, rng: DeterministicRng) {
        self.rng = rng;
    }

    /// Replaces the parallelism scaling table.
    pub fn set_parallelism_scaling(
        &mut self,
        thresholds: Vec<u64>,
        max_threads: Vec<u32>,
    ) -> Result<(), ConfigError> {
        self.scaling = ScalingTable::new(thresholds, max_threads)?;
        Ok(())
    }

    /// Adds an already-built organism (the resume path).
    ///
    /// Keeps id assignment monotone past every restored id; does not count
    /// toward `total_organisms_created`.
    pub fn add_organism(&mut self, organism: Organism) {
        self.next_organism_id = self.next_organism_id.max(organism.id + 1);
        self.organisms.push(organism);
    }

    /// Creates a fresh organism at `position` and returns its id.
    ///
    /// The caller seeds the organism's body (typically by placing a program
    /// with the new id as owner) and may then call
    /// [`Self::finalize_seeded_organism`].
    pub fn add_new_organism(
        &mut self,
        program_id: Option<String>,
        position: Vec<i32>,
        energy: i64,
    ) -> Result<OwnerId, EngineError> {
        if self.grid.coord_to_flat(&position).is_none() {
            return Err(EngineError::InvalidPosition { position });
        }
        let id = self.next_organism_id;
        self.next_organism_id += 1;
        self.total_created += 1;
        let mut organism = Organism::new(id, self.current_tick, None, position, energy);
        organism.program_id = program_id;
        self.organisms.push(organism);
        Ok(id)
    }

    /// Hashes a seeded organism's placed body and registers it in the
    /// census. No-op for bodiless organisms.
    pub fn finalize_seeded_organism(&mut self, id: OwnerId) {
        if self.grid.owned_cell_count(id) == 0 {
            return;
        }
        let Some(organism) = self.organisms.iter_mut().find(|o| o.id == id) else {
            return;
        };
        let initial_flat = self
            .grid
            .props()
            .coord_to_flat(&organism.initial_position)
            .map_or(0, |f| f);
        let hash = genome_hash(&self.grid, id, initial_flat);
        organism.genome_hash = hash;
        self.census.observe(hash);
    }

    /// Removes dead organisms from the list.
    pub fn prune_dead_organisms(&mut self) {
        self.organisms.retain(|o| !o.is_dead);
    }

    /// Fences off the worker pool. Idempotent; never called mid-tick.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Current tick number.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    /// All organisms, dead ones included, in stable index order.
    #[must_use]
    pub fn organisms(&self) -> &[Organism] {
        &self.organisms
    }

    /// Looks an organism up by id.
    #[must_use]
    pub fn organism(&self, id: OwnerId) -> Option<&Organism> {
        self.organisms.iter().find(|o| o.id == id)
    }

    /// Total organisms ever created.
    #[must_use]
    pub fn total_organisms_created(&self) -> u64 {
        self.total_created
    }

    /// Number of distinct genomes ever observed.
    #[must_use]
    pub fn total_unique_genomes(&self) -> usize {
        self.census.len()
    }

    /// Every genome hash ever observed, ascending.
    #[must_use]
    pub fn all_genomes_ever_seen(&self) -> Vec<u64> {
        self.census.to_sorted_vec()
    }

    /// The grid.
    #[must_use]
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable grid access for seeding and the capture path.
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// Serialized RNG provider state.
    #[must_use]
    pub fn rng_state(&self) -> Vec<u8> {
        self.rng.save_state()
    }

    /// The engine RNG, for callers that need derived sub-streams.
    #[must_use]
    pub fn rng(&self) -> &DeterministicRng {
        &self.rng
    }

    /// Saved plugin states in registration order.
    #[must_use]
    pub fn plugin_states(&self) -> Vec<PluginState> {
        self.plugins.save_states()
    }

    // ── the tick loop ───────────────────────────────────────────────

    /// Advances the simulation by one tick.
    pub fn tick(&mut self) -> Result<TickSummary, EngineError> {
        let tick = self.current_tick;
        let mut births: Vec<Organism> = Vec::new();

        // Tick plugins, registration order, failures contained.
        for entry in self.plugins.tick_plugins() {
            if let Some(hook) = entry.plugin.as_tick_plugin() {
                let mut ctx = TickCtx {
                    tick,
                    grid: &mut self.grid,
                    organisms: &self.organisms,
                    rng: &mut self.rng,
                };
                if let Err(error) = hook.on_tick(&mut ctx) {
                    warn!(plugin = %entry.name, tick, %error, "tick plugin failed");
                }
            }
        }

        // Plan + wave 1.
        let total = self.organisms.len();
        let active = if total <= 1 {
            1
        } else {
            self.scaling
                .active_for(total, self.pool.capacity())
                .min(total)
        };
        let mut records = if active <= 1 {
            self.plan_sequential(tick)
        } else {
            self.plan_parallel(tick, active)?
        };

        // Resolve over wave-2 instructions, then execute them in organism
        // order on this thread.
        let wave2_indices: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.wave == Wave::Two)
            .map(|(i, _)| i)
            .collect();
        let mut wave2_instrs: Vec<PlannedInstruction> = wave2_indices
            .iter()
            .map(|&i| match records[i].instr.take() {
                Some(instr) => instr,
                None => unreachable!("BUG: wave-2 record without instruction"),
            })
            .collect();
        resolve_conflicts(&mut wave2_instrs);
        let conflicts_lost = wave2_instrs
            .iter()
            .filter(|i| i.conflict == crate::isa::ConflictStatus::Lost)
            .count();

        let mut wave2_executed = 0;
        for (instr, &idx) in wave2_instrs.iter_mut().zip(&wave2_indices) {
            if instr.conflict == crate::isa::ConflictStatus::Lost {
                continue;
            }
            let organism = &mut self.organisms[idx];
            if organism.is_dead {
                continue;
            }
            let report = if instr.failure.is_some() {
                records[idx].penalty_due = true;
                execute_failed(organism, instr)
            } else {
                let mut ctx = EnvExecCtx {
                    grid: &mut self.grid,
                    rng: &mut self.rng,
                    births: &mut births,
                    next_organism_id: &mut self.next_organism_id,
                    total_created: &mut self.total_created,
                    tick,
                };
                execute_env(organism, instr, &mut ctx)
            };
            records[idx].charged = report.charged;
            wave2_executed += 1;
            if report.charged && organism.energy <= 0 {
                organism.kill(tick);
            }
        }
        for (&idx, instr) in wave2_indices.iter().zip(wave2_instrs) {
            records[idx].instr = Some(instr);
        }

        // Instant-skip sweep: sequential, organism order, post-write grid.
        for (idx, record) in records.iter_mut().enumerate() {
            let Some(instr) = &record.instr else { continue };
            let organism = &mut self.organisms[idx];
            if organism.is_dead || !instr.executed_in_tick || instr.failure.is_some() {
                continue;
            }
            if let Err(failure) =
                instant_skip(organism, &self.grid, self.organism_config.max_instant_skip)
            {
                organism.fail(failure.to_string());
                record.penalty_due = true;
            }
        }

        // Error penalties for failures execute did not charge.
        for (idx, record) in records.iter().enumerate() {
            if !record.penalty_due {
                continue;
            }
            let organism = &mut self.organisms[idx];
            if organism.is_dead {
                continue;
            }
            organism.energy -= self.organism_config.error_penalty_cost;
            if organism.energy <= 0 {
                organism.kill(tick);
            }
        }

        // Deaths: wave-1 deaths first, then the rest, index order each.
        let mut death_order: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.died_in_wave1)
            .map(|(i, _)| i)
            .collect();
        for (idx, organism) in self.organisms.iter().enumerate() {
            if organism.is_dead
                && organism.death_tick == Some(tick)
                && !records.get(idx).is_some_and(|r| r.died_in_wave1)
            {
                death_order.push(idx);
            }
        }
        for &idx in &death_order {
            self.handle_death(idx, tick);
        }

        // Births: handlers, genome hash, census, append — in push order.
        let birth_handlers = self.plugins.birth_handlers();
        let births_count = births.len();
        for mut child in births {
            for entry in &birth_handlers {
                if let Some(handler) = entry.plugin.as_birth_handler() {
                    if let Err(error) = handler.on_birth(&mut child, &mut self.grid) {
                        warn!(
                            plugin = %entry.name,
                            organism_id = child.id,
                            tick,
                            %error,
                            "birth handler failed"
                        );
                    }
                }
            }
            let initial_flat = self
                .grid
                .props()
                .coord_to_flat(&child.initial_position)
                .map_or(0, |f| f);
            let hash = genome_hash(&self.grid, child.id, initial_flat);
            child.genome_hash = hash;
            self.census.observe(hash);
            self.organisms.push(child);
        }

        self.current_tick += 1;

        Ok(TickSummary {
            tick,
            planned: records.iter().filter(|r| r.instr.is_some()).count(),
            wave1_executed: records.iter().filter(|r| r.wave == Wave::One).count(),
            wave2_executed,
            conflicts_lost,
            deaths: death_order.len(),
            births: births_count,
        })
    }

    fn plan_sequential(&mut self, tick: u64) -> Vec<OrgTickRecord> {
        let total = self.organisms.len();
        let mut records: Vec<OrgTickRecord> = Vec::with_capacity(total);
        records.resize_with(total, OrgTickRecord::default);
        let interceptors = self.plugins.interceptors();
        let Some(scratch) = self.scratches.last_mut() else {
            unreachable!("BUG: scratch vector is pre-sized at construction")
        };
        plan_and_wave1_slice(
            &mut self.organisms,
            &mut records,
            &self.grid,
            &self.policy,
            &interceptors,
            scratch,
            tick,
        );
        records
    }

    fn plan_parallel(
        &mut self,
        tick: u64,
        active: usize,
    ) -> Result<Vec<OrgTickRecord>, EngineError> {
        let total = self.organisms.len();
        let ranges = WorkerPool::partition(total, active);
        let mut records: Vec<OrgTickRecord> = Vec::with_capacity(total);
        records.resize_with(total, OrgTickRecord::default);

        let interceptors = self.plugins.interceptors();
        let interceptors_ref: &[PluginEntry] = &interceptors;
        let grid = &self.grid;
        let policy = &self.policy;

        let organism_chunks = split_by_ranges(&mut self.organisms, &ranges);
        let record_chunks = split_by_ranges(&mut records, &ranges);
        let scratches = &mut self.scratches[..active];

        let mut jobs = Vec::with_capacity(active);
        for ((organism_slice, record_slice), scratch) in organism_chunks
            .into_iter()
            .zip(record_chunks)
            .zip(scratches.iter_mut())
        {
            jobs.push(move |_worker: usize| {
                plan_and_wave1_slice(
                    organism_slice,
                    record_slice,
                    grid,
                    policy,
                    interceptors_ref,
                    scratch,
                    tick,
                );
            });
        }
        self.pool.dispatch(jobs)?;
        Ok(records)
    }

    fn handle_death(&mut self, idx: usize, tick: u64) {
        let handlers = self.plugins.death_handlers();
        let organism = &self.organisms[idx];
        let cells: Vec<i32> = self.grid.cells_owned_by(organism.id).collect();
        for entry in &handlers {
            if let Some(handler) = entry.plugin.as_death_handler() {
                let mut ctx = DeathCtx::new(tick, organism, &cells, &mut self.grid);
                if let Err(error) = handler.on_death(&mut ctx) {
                    warn!(
                        plugin = %entry.name,
                        organism_id = organism.id,
                        tick,
                        %error,
                        "death handler failed"
                    );
                }
            }
        }
        self.grid.clear_ownership_for(organism.id);
    }
}

/// Splits `slice` along contiguous `ranges` starting at 0.
fn split_by_ranges<'a, T>(
    mut slice: &'a mut [T],
    ranges: &[std::ops::Range<usize>],
) -> Vec<&'a mut [T]> {
    let mut out = Vec::with_capacity(ranges.len());
    for range in ranges {
        let (head, tail) = slice.split_at_mut(range.len());
        out.push(head);
        slice = tail;
    }
    out
}

/// The fused per-slice worker body: plan, intercept, and execute wave-1
/// instructions for every organism in the slice.
///
/// Touches only the slice's organisms plus shared read-only state, so any
/// interleaving across slices is observationally serial.
#[allow(clippy::too_many_arguments)]
fn plan_and_wave1_slice(
    organisms: &mut [Organism],
    records: &mut [OrgTickRecord],
    grid: &Grid,
    policy: &PolicyManager,
    interceptors: &[PluginEntry],
    scratch: &mut InterceptionScratch,
    tick: u64,
) {
    for (organism, record) in organisms.iter_mut().zip(records.iter_mut()) {
        if organism.is_dead {
            continue;
        }
        organism.instruction_failed = false;
        let mut instr = plan(&*organism, grid, policy);

        for entry in interceptors {
            if let Some(interceptor) = entry.plugin.as_interceptor() {
                let mut ctx = InterceptionCtx {
                    tick,
                    organism: &*organism,
                    instruction: &mut instr,
                    scratch: &mut *scratch,
                };
                if let Err(error) = interceptor.intercept(&mut ctx) {
                    warn!(
                        plugin = %entry.name,
                        organism_id = organism.id,
                        tick,
                        %error,
                        "interceptor failed"
                    );
                }
            }
        }

        if instr.failure.is_some() {
            // Plan-time failure: the execute step runs now (uncharged) so
            // the failure lands deterministically; penalty follows later.
            let report = execute_failed(organism, &mut instr);
            record.wave = Wave::One;
            record.charged = report.charged;
            record.penalty_due = true;
            record.instr = Some(instr);
        } else if instr.opcode.is_parallel_execute_safe() {
            let report = execute_local(organism, &mut instr, grid);
            record.wave = Wave::One;
            record.charged = report.charged;
            if report.charged && organism.energy <= 0 {
                organism.kill(tick);
                record.died_in_wave1 = true;
            }
            record.instr = Some(instr);
        } else {
            record.wave = Wave::Two;
            record.instr = Some(instr);
        }
    }
}
