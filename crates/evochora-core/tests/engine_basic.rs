// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Baseline scheduler behavior: the empty tick and a single organism's
//! plan/execute round trip with capture.

mod common;

use common::{code, engine, spawn_with_program};
use evochora_core::capture::{capture_from_engine, DeltaEncoder};
use evochora_core::isa::Opcode;
use evochora_core::{EncoderConfig, Molecule, MoleculeKind};

#[test]
fn empty_tick_advances_the_clock_and_nothing_else() {
    let mut sim = engine(&[1, 1], false, 1);
    assert_eq!(sim.current_tick(), 0);

    let summary = sim.tick().unwrap();
    assert_eq!(sim.current_tick(), 1);
    assert_eq!(summary.planned, 0);
    assert_eq!(summary.deaths, 0);
    assert_eq!(summary.births, 0);
    assert!(sim.organisms().is_empty());
}

#[test]
fn single_organism_executes_one_instruction_per_tick() {
    let mut sim = engine(&[10, 10], false, 1);
    let id = spawn_with_program(
        &mut sim,
        &[5, 5],
        100,
        &[
            code(Opcode::Nop),
            Molecule::new(MoleculeKind::Code, 42).raw(),
        ],
    );

    let mut encoder = DeltaEncoder::new("s2", 100, EncoderConfig::new(2, 2, 1, 1).unwrap());
    // The very first capture at tick 0 opens a chunk with a snapshot.
    let sealed = capture_from_engine(&mut encoder, &mut sim, 0).unwrap();
    assert!(sealed.is_none(), "chunk seals only after A*S*C samples");
    let partial = encoder.flush_partial_chunk().expect("snapshot was captured");
    assert_eq!(partial.snapshot.tick_number, 0);
    assert_eq!(partial.tick_count, 1);
    assert!(partial
        .snapshot
        .cell_columns
        .flat_indices
        .contains(&sim.grid().coord_to_flat(&[5, 5]).unwrap()));

    let summary = sim.tick().unwrap();
    assert_eq!(summary.planned, 1);
    assert_eq!(summary.wave1_executed, 1);

    let organism = sim.organism(id).unwrap();
    // NOP consumed one cell; the next cell holds CODE:42 which is not
    // skippable, so the IP sits exactly one step ahead.
    assert_eq!(organism.ip, vec![5, 6]);
    assert_eq!(organism.energy, 100 - Opcode::Nop.base_cost());
    assert!(!organism.is_dead);
    assert!(!organism.instruction_failed);
    assert_eq!(sim.organisms().len(), 1);
}

#[test]
fn unknown_opcode_costs_the_error_penalty_until_death() {
    let mut sim = engine(&[6, 6], true, 1);
    // CODE:42 is not an opcode: planning fails, execute runs and fails,
    // the penalty drains energy tick by tick.
    let id = spawn_with_program(
        &mut sim,
        &[0, 0],
        11,
        &[Molecule::new(MoleculeKind::Code, 42).raw()],
    );

    sim.tick().unwrap();
    let organism = sim.organism(id).unwrap();
    assert!(organism.instruction_failed);
    assert_eq!(organism.energy, 11 - 5);
    assert_eq!(organism.ip, vec![0, 0], "failed plans do not advance the ip");

    sim.tick().unwrap();
    assert_eq!(sim.organism(id).unwrap().energy, 1);
    let summary = sim.tick().unwrap();
    assert_eq!(summary.deaths, 1);
    let organism = sim.organism(id).unwrap();
    assert!(organism.is_dead);
    assert_eq!(organism.death_tick, Some(2));
    // Dead organisms stay listed until pruned.
    assert_eq!(sim.organisms().len(), 1);
    sim.prune_dead_organisms();
    assert!(sim.organisms().is_empty());
}
