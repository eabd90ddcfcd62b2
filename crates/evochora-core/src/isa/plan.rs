// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Instruction planning: decode and operand resolution.
//!
//! Planning reads the grid and the organism but never mutates either. All
//! grid-dependent inputs an instruction needs at execute time are resolved
//! here and cached on the instruction (notably `SCAN`'s sensed molecule),
//! so wave-1 execution stays organism-local.

use crate::grid::Grid;
use crate::molecule::MoleculeKind;
use crate::organism::{Organism, RegisterBank};
use crate::thermo::{PolicyManager, ThermodynamicContext};

use super::{
    ConflictStatus, InstructionFailure, Opcode, Operand, OperandSpec, PlannedInstruction,
};

/// Plans one instruction for `organism` at its current IP.
///
/// Never mutates the grid. A decoding or resolution problem is recorded as
/// the instruction's `failure`; the instruction stays executable so that
/// its execute step fails deterministically and the organism is penalized.
#[must_use]
pub fn plan(organism: &Organism, grid: &Grid, policy: &PolicyManager) -> PlannedInstruction {
    let ip = organism.ip.clone();

    let Some(cell) = grid.cell_at(&ip) else {
        return PlannedInstruction::failed(organism.id, ip, InstructionFailure::IpOutOfBounds);
    };
    let molecule = cell.molecule;
    if molecule.kind() != Some(MoleculeKind::Code) {
        return PlannedInstruction::failed(organism.id, ip, InstructionFailure::NotCode);
    }
    let Some(opcode) = Opcode::from_code(molecule.value()) else {
        return PlannedInstruction::failed(
            organism.id,
            ip,
            InstructionFailure::UnknownOpcode(molecule.value()),
        );
    };

    let mut instr = PlannedInstruction {
        organism_id: organism.id,
        opcode,
        operands: Vec::with_capacity(opcode.operand_spec().len() + 1),
        ip_after: ip.clone(),
        targets: Vec::new(),
        cost: crate::thermo::Thermodynamics::default(),
        failure: None,
        executed_in_tick: false,
        conflict: ConflictStatus::NotApplicable,
    };

    let props = grid.props();
    let mut cursor = ip;
    for (position, spec) in opcode.operand_spec().iter().enumerate() {
        match resolve_operand(&mut cursor, *spec, position, organism, grid) {
            Ok(operand) => instr.operands.push(operand),
            Err(failure) => {
                instr.failure = Some(failure);
                return instr;
            }
        }
    }

    // Advance past the consumed cells; on a bounded grid the program may
    // run against the edge, which is an uncharged failure.
    match props.step(&cursor, &organism.dv) {
        Some(next) => instr.ip_after = next,
        None => {
            instr.failure = Some(InstructionFailure::EdgeOfWorld);
            return instr;
        }
    }

    // SCAN senses the grid now so its execute step stays organism-local.
    if opcode == Opcode::Scan {
        let flat = props.coord_to_flat(organism.active_dp_coord());
        match flat {
            Some(flat) => instr
                .operands
                .push(Operand::Value(i64::from(grid.molecule_at(flat).raw()))),
            None => {
                instr.failure = Some(InstructionFailure::NoTarget);
                return instr;
            }
        }
    }

    if opcode.modifies_environment() {
        match props.coord_to_flat(organism.active_dp_coord()) {
            Some(flat) => instr.targets.push(flat),
            None => {
                // No valid target: stays executable, fails at execute.
                instr.failure = Some(InstructionFailure::NoTarget);
                return instr;
            }
        }
    }

    instr.cost = policy.assess(&ThermodynamicContext {
        opcode,
        operands: &instr.operands,
        organism,
        grid,
    });
    instr
}

fn resolve_operand(
    cursor: &mut Vec<i32>,
    spec: OperandSpec,
    position: usize,
    organism: &Organism,
    grid: &Grid,
) -> Result<Operand, InstructionFailure> {
    let props = grid.props();
    match spec {
        OperandSpec::Reg => {
            let molecule = read_cell(cursor, organism, grid)?;
            parse_register(molecule).ok_or(InstructionFailure::BadOperand(position))
        }
        OperandSpec::RegOrValue => {
            let molecule = read_cell(cursor, organism, grid)?;
            match molecule.kind() {
                Some(MoleculeKind::Register) => {
                    parse_register(molecule).ok_or(InstructionFailure::BadRegister)
                }
                Some(MoleculeKind::Data) => Ok(Operand::Value(i64::from(molecule.value()))),
                _ => Err(InstructionFailure::BadOperand(position)),
            }
        }
        OperandSpec::VectorImm => {
            let mut components = Vec::with_capacity(props.dimensions());
            for _ in 0..props.dimensions() {
                let molecule = read_cell(cursor, organism, grid)?;
                if molecule.kind() != Some(MoleculeKind::Data) {
                    return Err(InstructionFailure::BadOperand(position));
                }
                components.push(molecule.value());
            }
            Ok(Operand::Vector(components))
        }
    }
}

fn read_cell(
    cursor: &mut Vec<i32>,
    organism: &Organism,
    grid: &Grid,
) -> Result<crate::molecule::Molecule, InstructionFailure> {
    let props = grid.props();
    *cursor = props
        .step(cursor, &organism.dv)
        .ok_or(InstructionFailure::OperandOutOfBounds)?;
    grid.cell_at(cursor)
        .map(|c| c.molecule)
        .ok_or(InstructionFailure::OperandOutOfBounds)
}

fn parse_register(molecule: crate::molecule::Molecule) -> Option<Operand> {
    if molecule.kind() != Some(MoleculeKind::Register) {
        return None;
    }
    let value = molecule.value();
    let bank = RegisterBank::from_tag(value >> 8)?;
    let index = (value & 0xFF) as usize;
    if index >= bank.len() {
        return None;
    }
    Some(Operand::Register { bank, index })
}

/// Encodes a register reference as a `REGISTER` molecule value.
///
/// The inverse of operand resolution; program builders and tests use it to
/// lay down register operand cells.
#[must_use]
pub fn register_operand_value(bank: RegisterBank, index: usize) -> i32 {
    let tag = match bank {
        RegisterBank::Data => 0,
        RegisterBank::Proc => 1,
        RegisterBank::Formal => 2,
        RegisterBank::Location => 3,
    };
    (tag << 8) | (index as i32)
}
