// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The plugin SPI: tick plugins, instruction interceptors, death handlers
//! and birth handlers.
//!
//! A single plugin instance may implement any subset of the four hooks.
//! [`SimulationPlugin`] is the common base: it carries the class name, the
//! save/restore contract, and `as_*` accessors that expose whichever hook
//! traits the instance implements — the engine registers the instance
//! against each hook it reports, in registration order.
//!
//! Hook failures are *contained*: the engine logs them at warn level with
//! plugin class, organism id and tick, and the tick continues. Only
//! `plan`/`execute` faults abort a tick, and those are engine bugs.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::grid::Grid;
use crate::isa::{Operand, PlannedInstruction};
use crate::organism::Organism;
use crate::rng::DeterministicRng;

use evochora_schema::PluginState;

/// Errors reported by plugin hooks and factories.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A hook failed; the tick continues.
    #[error("{0}")]
    Failed(String),
    /// A saved state blob was rejected by `load_state`.
    #[error("plugin state rejected: {0}")]
    State(String),
    /// The registry has no factory for a class name.
    #[error("unknown plugin class `{0}`")]
    UnknownClass(String),
}

/// Base contract every plugin instance fulfills.
pub trait SimulationPlugin: Send + Sync {
    /// Stable class name, resolvable through a [`PluginRegistry`] on resume.
    fn name(&self) -> &str;

    /// Serializes internal state for capture. Stateless plugins return
    /// empty bytes.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Restores internal state from a capture blob.
    fn load_state(&mut self, _state: &[u8]) -> Result<(), PluginError> {
        Ok(())
    }

    /// This instance's tick hook, when implemented.
    fn as_tick_plugin(&self) -> Option<&dyn TickPlugin> {
        None
    }

    /// This instance's interceptor hook, when implemented. Interceptors run
    /// on worker threads; implementations must be internally thread-safe.
    fn as_interceptor(&self) -> Option<&dyn InstructionInterceptor> {
        None
    }

    /// This instance's death hook, when implemented.
    fn as_death_handler(&self) -> Option<&dyn DeathHandler> {
        None
    }

    /// This instance's birth hook, when implemented.
    fn as_birth_handler(&self) -> Option<&dyn BirthHandler> {
        None
    }
}

/// Context handed to tick plugins at the start of each tick.
pub struct TickCtx<'a> {
    /// Current tick number.
    pub tick: u64,
    /// The grid, mutable: tick plugins may seed energy, erode cells, etc.
    pub grid: &'a mut Grid,
    /// All organisms, read-only.
    pub organisms: &'a [Organism],
    /// The engine RNG.
    pub rng: &'a mut DeterministicRng,
}

/// Runs sequentially at the start of every tick.
pub trait TickPlugin: Send + Sync {
    /// Called once per tick before planning.
    fn on_tick(&self, ctx: &mut TickCtx<'_>) -> Result<(), PluginError>;
}

/// Reusable per-thread scratch for interceptor calls.
///
/// One instance exists per pool worker plus a dedicated one for the
/// sequential path, indexed by worker index; no locking anywhere.
#[derive(Debug, Default)]
pub struct InterceptionScratch {
    /// Operand scratch buffer interceptors may use freely between calls.
    pub operand_buffer: Vec<Operand>,
    /// Count of instruction substitutions performed through this scratch.
    pub substitutions: u64,
}

/// Context for one interceptor call on one planned instruction.
pub struct InterceptionCtx<'a> {
    /// Current tick number.
    pub tick: u64,
    /// The planning organism, read-only.
    pub organism: &'a Organism,
    /// The planned instruction; replaceable and mutable in place.
    pub instruction: &'a mut PlannedInstruction,
    /// Per-thread scratch.
    pub scratch: &'a mut InterceptionScratch,
}

impl InterceptionCtx<'_> {
    /// Stable handle into the instruction's cached operand vector.
    ///
    /// Mutations are visible to later interceptors in the chain and to the
    /// execute step; the vector is never copied.
    pub fn operands(&mut self) -> &mut Vec<Operand> {
        &mut self.instruction.operands
    }

    /// Replaces the planned instruction wholesale.
    pub fn replace_instruction(&mut self, replacement: PlannedInstruction) {
        *self.instruction = replacement;
        self.scratch.substitutions += 1;
    }
}

/// Runs per organism per tick after operand resolution.
pub trait InstructionInterceptor: Send + Sync {
    /// Inspects or rewrites one planned instruction.
    fn intercept(&self, ctx: &mut InterceptionCtx<'_>) -> Result<(), PluginError>;
}

/// Restricted view a death handler gets of a dying organism's remains.
///
/// Exposes only the organism's owned cells, with read and molecule-write
/// access; ownership itself is cleared by the engine after all handlers.
pub struct DeathCtx<'a> {
    tick: u64,
    organism: &'a Organism,
    cells: &'a [i32],
    grid: &'a mut Grid,
}

impl<'a> DeathCtx<'a> {
    pub(crate) fn new(
        tick: u64,
        organism: &'a Organism,
        cells: &'a [i32],
        grid: &'a mut Grid,
    ) -> Self {
        Self {
            tick,
            organism,
            cells,
            grid,
        }
    }

    /// Tick the death is being handled at.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// The dying organism.
    #[must_use]
    pub fn organism(&self) -> &Organism {
        self.organism
    }

    /// Flat indices of the dying organism's owned cells, ascending.
    #[must_use]
    pub fn owned_cells(&self) -> &[i32] {
        self.cells
    }

    /// Reads the molecule at one owned cell; `None` outside the body.
    #[must_use]
    pub fn molecule(&self, flat: i32) -> Option<crate::molecule::Molecule> {
        if self.cells.binary_search(&flat).is_ok() {
            Some(self.grid.molecule_at(flat))
        } else {
            None
        }
    }

    /// Rewrites the molecule at one owned cell, keeping ownership.
    ///
    /// Returns `false` outside the body.
    pub fn set_molecule(&mut self, flat: i32, molecule: crate::molecule::Molecule) -> bool {
        if self.cells.binary_search(&flat).is_ok() {
            self.grid.set_by_index(flat, molecule, self.organism.id)
        } else {
            false
        }
    }
}

/// Runs once per death, after the organism died and before ownership is
/// cleared.
pub trait DeathHandler: Send + Sync {
    /// Processes one dying organism.
    fn on_death(&self, ctx: &mut DeathCtx<'_>) -> Result<(), PluginError>;
}

/// Runs once per newborn in the sequential birth-finalization phase, with
/// full grid access, before the genome hash is computed.
pub trait BirthHandler: Send + Sync {
    /// Finalizes one newborn.
    fn on_birth(&self, child: &mut Organism, grid: &mut Grid) -> Result<(), PluginError>;
}

/// A registered plugin instance.
#[derive(Clone)]
pub struct PluginEntry {
    /// Class name captured at registration.
    pub name: String,
    /// The shared instance.
    pub plugin: Arc<dyn SimulationPlugin>,
}

/// All registered plugins, indexed per hook in registration order.
#[derive(Clone, Default)]
pub struct PluginSet {
    entries: Vec<PluginEntry>,
    tick_order: Vec<usize>,
    interceptor_order: Vec<usize>,
    death_order: Vec<usize>,
    birth_order: Vec<usize>,
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("entries", &self.entries.len())
            .field("tick", &self.tick_order.len())
            .field("interceptors", &self.interceptor_order.len())
            .field("deaths", &self.death_order.len())
            .field("births", &self.birth_order.len())
            .finish()
    }
}

impl PluginSet {
    /// Registers an instance against every hook it implements.
    pub fn register(&mut self, plugin: Arc<dyn SimulationPlugin>) {
        let index = self.entries.len();
        if plugin.as_tick_plugin().is_some() {
            self.tick_order.push(index);
        }
        if plugin.as_interceptor().is_some() {
            self.interceptor_order.push(index);
        }
        if plugin.as_death_handler().is_some() {
            self.death_order.push(index);
        }
        if plugin.as_birth_handler().is_some() {
            self.birth_order.push(index);
        }
        self.entries.push(PluginEntry {
            name: plugin.name().to_string(),
            plugin,
        });
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no plugin is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tick-hook instances in registration order.
    #[must_use]
    pub fn tick_plugins(&self) -> Vec<PluginEntry> {
        self.tick_order.iter().map(|&i| self.entries[i].clone()).collect()
    }

    /// Interceptor instances in registration order (shared handles; the
    /// actual hook is re-borrowed per call on the worker).
    #[must_use]
    pub fn interceptors(&self) -> Vec<PluginEntry> {
        self.interceptor_order
            .iter()
            .map(|&i| self.entries[i].clone())
            .collect()
    }

    /// Death-hook instances in registration order.
    #[must_use]
    pub fn death_handlers(&self) -> Vec<PluginEntry> {
        self.death_order.iter().map(|&i| self.entries[i].clone()).collect()
    }

    /// Birth-hook instances in registration order.
    #[must_use]
    pub fn birth_handlers(&self) -> Vec<PluginEntry> {
        self.birth_order.iter().map(|&i| self.entries[i].clone()).collect()
    }

    /// Saves every instance's state, in registration order.
    #[must_use]
    pub fn save_states(&self) -> Vec<PluginState> {
        self.entries
            .iter()
            .map(|entry| PluginState {
                plugin_class: entry.name.clone(),
                state_blob: entry.plugin.save_state(),
            })
            .collect()
    }
}

/// Factory signature: `(rng, options) -> instance`.
pub type PluginFactory = Box<
    dyn Fn(DeterministicRng, &serde_json::Value) -> Result<Box<dyn SimulationPlugin>, PluginError>
        + Send
        + Sync,
>;

/// Maps plugin class names to constructors.
///
/// There is no dynamic loading: every class a run may reference is
/// registered here by the embedding binary before resume.
#[derive(Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory for `class`.
    pub fn register<F>(&mut self, class: impl Into<String>, factory: F)
    where
        F: Fn(DeterministicRng, &serde_json::Value) -> Result<Box<dyn SimulationPlugin>, PluginError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(class.into(), Box::new(factory));
    }

    /// Instantiates `class` with a derived RNG and its options.
    pub fn instantiate(
        &self,
        class: &str,
        rng: DeterministicRng,
        options: &serde_json::Value,
    ) -> Result<Box<dyn SimulationPlugin>, PluginError> {
        let factory = self
            .factories
            .get(class)
            .ok_or_else(|| PluginError::UnknownClass(class.to_string()))?;
        factory(rng, options)
    }

    /// Whether `class` is registered.
    #[must_use]
    pub fn contains(&self, class: &str) -> bool {
        self.factories.contains_key(class)
    }
}
