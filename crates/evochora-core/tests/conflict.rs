// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Conflict resolution end to end: two organisms claim the same cell, the
//! lower id wins, the loser does not execute.

mod common;

use common::{code, data, engine, spawn_with_program};
use evochora_core::isa::Opcode;
use evochora_core::SimulationEngine;

/// Seeds two organisms sharing one program row at `(2,2)`: both plan a
/// `POKE` whose active data pointer is their shared position, so both
/// claim cell `(2,2)`. Returns `(first_id, second_id)`.
fn seed_contenders(sim: &mut SimulationEngine, payload: i32) -> (u64, u64) {
    let first = spawn_with_program(
        sim,
        &[2, 2],
        100,
        &[code(Opcode::Poke), data(payload)],
    );
    // The second organism shares the same cells; its program row is
    // already in place, so only the organism itself is added.
    let second = sim.add_new_organism(None, vec![2, 2], 100).unwrap();
    (first, second)
}

#[test]
fn lower_id_wins_the_contested_cell() {
    let mut sim = engine(&[5, 5], true, 1);
    let (first, second) = seed_contenders(&mut sim, 77);

    let summary = sim.tick().unwrap();
    assert_eq!(summary.conflicts_lost, 1);
    assert_eq!(summary.wave2_executed, 1);

    let cell = sim.grid().cell_at(&[2, 2]).unwrap();
    assert_eq!(cell.molecule.raw(), 77, "the winner's write landed");
    assert_eq!(cell.owner, first, "the lower id owns the cell");

    // The loser did not execute: no energy was charged.
    assert_eq!(sim.organism(second).unwrap().energy, 100);
    assert!(sim.organism(first).unwrap().energy < 100);
}

#[test]
fn with_creation_order_reversed_the_other_organism_wins() {
    let mut sim = engine(&[5, 5], true, 1);
    // Same geometry, but now the organism created first (lower id) is the
    // one that was "second" before; ids decide, not positions.
    let winner = sim.add_new_organism(None, vec![2, 2], 100).unwrap();
    let loser = spawn_with_program(
        &mut sim,
        &[2, 2],
        100,
        &[code(Opcode::Poke), data(33)],
    );
    assert!(winner < loser);

    sim.tick().unwrap();
    let cell = sim.grid().cell_at(&[2, 2]).unwrap();
    assert_eq!(cell.owner, winner);
    assert_eq!(sim.organism(loser).unwrap().energy, 100);
}

#[test]
fn conflicts_resolve_identically_under_parallel_planning() {
    let run = |parallelism: usize| {
        let mut sim = engine(&[5, 5], true, parallelism);
        seed_contenders(&mut sim, 77);
        sim.tick().unwrap();
        common::fingerprint(&sim)
    };
    assert_eq!(run(1), run(4));
}
