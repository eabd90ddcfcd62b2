// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use evochora_core::isa::{register_operand_value, Opcode};
use evochora_core::{
    EnvironmentProperties, Grid, LabelMatchPolicy, Molecule, MoleculeKind, Organism,
    OrganismConfig, OwnerId, PolicyManager, RegisterBank, SimulationEngine,
};

/// Builds validated environment properties.
pub fn props(shape: &[i32], toroidal: bool) -> EnvironmentProperties {
    EnvironmentProperties::new(shape.to_vec(), toroidal, LabelMatchPolicy::Exact).unwrap()
}

/// Builds an empty grid.
pub fn grid(shape: &[i32], toroidal: bool) -> Grid {
    Grid::new(props(shape, toroidal))
}

/// Builds an engine with default policy and organism accounting.
pub fn engine(shape: &[i32], toroidal: bool, parallelism: usize) -> SimulationEngine {
    SimulationEngine::new(
        grid(shape, toroidal),
        PolicyManager::default(),
        OrganismConfig::default(),
        parallelism,
    )
    .unwrap()
}

/// Packed opcode cell.
pub fn code(opcode: Opcode) -> i32 {
    Molecule::new(MoleculeKind::Code, opcode.code()).raw()
}

/// Packed data immediate cell.
pub fn data(value: i32) -> i32 {
    Molecule::new(MoleculeKind::Data, value).raw()
}

/// Packed energy cell.
pub fn energy(value: i32) -> i32 {
    Molecule::new(MoleculeKind::Energy, value).raw()
}

/// Packed register operand cell.
pub fn reg(bank: RegisterBank, index: usize) -> i32 {
    Molecule::new(MoleculeKind::Register, register_operand_value(bank, index)).raw()
}

/// Writes `cells` into consecutive positions along the last axis starting
/// at `start`, owned by `owner`. This matches a fresh organism's direction
/// vector, so the run forms its program.
pub fn write_row(grid: &mut Grid, owner: OwnerId, start: &[i32], cells: &[i32]) {
    let mut cursor = start.to_vec();
    let mut step = vec![0; start.len()];
    *step.last_mut().unwrap() = 1;
    for (i, &raw) in cells.iter().enumerate() {
        if i > 0 {
            cursor = grid.props().step(&cursor, &step).unwrap();
        }
        assert!(grid.set_by_coord(&cursor, Molecule::from_raw(raw), owner));
    }
}

/// Seeds one organism with a program row and returns its id.
pub fn spawn_with_program(
    engine: &mut SimulationEngine,
    position: &[i32],
    organism_energy: i64,
    cells: &[i32],
) -> OwnerId {
    let id = engine
        .add_new_organism(None, position.to_vec(), organism_energy)
        .unwrap();
    write_row(engine.grid_mut(), id, position, cells);
    engine.finalize_seeded_organism(id);
    id
}

/// Serialized comparison form of an engine's observable state.
#[derive(Debug, PartialEq, Eq)]
pub struct WorldFingerprint {
    pub tick: u64,
    pub cells: Vec<(i32, i32, u64)>,
    pub organisms: Vec<evochora_schema::OrganismState>,
    pub census: Vec<u64>,
    pub total_created: u64,
    pub rng_state: Vec<u8>,
}

/// Captures everything the determinism invariant compares.
pub fn fingerprint(engine: &SimulationEngine) -> WorldFingerprint {
    WorldFingerprint {
        tick: engine.current_tick(),
        cells: engine.grid().occupied_cells().collect(),
        organisms: engine.organisms().iter().map(Organism::to_state).collect(),
        census: engine.all_genomes_ever_seen(),
        total_created: engine.total_organisms_created(),
        rng_state: engine.rng_state(),
    }
}
