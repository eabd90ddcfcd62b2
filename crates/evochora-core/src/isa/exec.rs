// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Instruction execution and the post-execute instant-skip.
//!
//! Two entry points mirror the two waves:
//!
//! - [`execute_local`] for parallel-safe opcodes. Mutates only the organism
//!   (plus race-free grid reads); runs on the planning worker in wave 1.
//! - [`execute_env`] for grid-writing and RNG-consuming opcodes. Runs
//!   sequentially in wave 2 with exclusive grid and RNG access.
//!
//! Both charge the thermodynamic cost cached at plan time before applying
//! effects. A failure detected here is a *charged* failure: the organism
//! keeps the bill, the IP still advances, and the engine does not add the
//! configured error penalty on top.

use evochora_schema::{CallFrame, RegisterValue};

use crate::config::{EnvironmentProperties, LabelMatchPolicy};
use crate::grid::{Grid, UNOWNED};
use crate::molecule::{Molecule, MoleculeKind};
use crate::organism::{Organism, MAX_CALL_DEPTH, MAX_DATA_STACK, MAX_LOCATION_STACK};
use crate::rng::DeterministicRng;

use super::{InstructionFailure, Opcode, Operand, PlannedInstruction, NOP_CODE};

/// What execute reported back to the scheduler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecReport {
    /// Whether the thermodynamic cost was charged.
    pub charged: bool,
}

/// Shared mutable state wave-2 execution threads effects through.
pub struct EnvExecCtx<'a> {
    /// The grid, written exclusively by wave 2.
    pub grid: &'a mut Grid,
    /// The engine RNG; draw order is part of the deterministic state.
    pub rng: &'a mut DeterministicRng,
    /// Newborns pushed by `FORK`, finalized after execution.
    pub births: &'a mut Vec<Organism>,
    /// Next organism id to assign.
    pub next_organism_id: &'a mut u64,
    /// Total organisms ever created.
    pub total_created: &'a mut u64,
    /// Current tick.
    pub tick: u64,
}

/// Runs the execute step of an instruction that already failed during
/// planning: uncharged, records the failure, leaves the IP alone.
pub fn execute_failed(organism: &mut Organism, instr: &mut PlannedInstruction) -> ExecReport {
    instr.executed_in_tick = true;
    if let Some(failure) = &instr.failure {
        organism.fail(failure.to_string());
    }
    ExecReport { charged: false }
}

/// Executes a parallel-safe instruction in wave 1.
pub fn execute_local(
    organism: &mut Organism,
    instr: &mut PlannedInstruction,
    grid: &Grid,
) -> ExecReport {
    debug_assert!(instr.opcode.is_parallel_execute_safe());
    instr.executed_in_tick = true;
    charge(organism, instr);

    let props = grid.props();
    let outcome = match instr.opcode {
        Opcode::Nop => Ok(IpUpdate::Advance),
        Opcode::Seti => exec_seti(organism, instr),
        Opcode::Setv => exec_setv(organism, instr),
        Opcode::Mov => exec_mov(organism, instr),
        Opcode::Add => exec_arith(organism, instr, false),
        Opcode::Sub => exec_arith(organism, instr, true),
        Opcode::Push => exec_push(organism, instr),
        Opcode::Pop => exec_pop(organism, instr),
        Opcode::Turn => exec_turn(organism, instr),
        Opcode::Seek => exec_seek(organism, instr, props),
        Opcode::Scan => exec_scan(organism, instr),
        Opcode::Jmpi => exec_jump(organism, instr, props, false),
        Opcode::Call => exec_jump(organism, instr, props, true),
        Opcode::Ret => exec_ret(organism),
        Opcode::Seekl => exec_seekl(organism, instr, grid),
        Opcode::Lpsh => exec_lpsh(organism),
        Opcode::Lpop => exec_lpop(organism),
        Opcode::Rand | Opcode::Poke | Opcode::Harvest | Opcode::Fork => {
            unreachable!("BUG: wave-2 opcode {} dispatched locally", instr.opcode.mnemonic())
        }
    };
    finish(organism, instr, outcome);
    ExecReport { charged: true }
}

/// Executes a wave-2 instruction with exclusive environment access.
pub fn execute_env(
    organism: &mut Organism,
    instr: &mut PlannedInstruction,
    ctx: &mut EnvExecCtx<'_>,
) -> ExecReport {
    instr.executed_in_tick = true;
    charge(organism, instr);

    let outcome = match instr.opcode {
        Opcode::Rand => exec_rand(organism, instr, ctx.rng),
        Opcode::Poke => exec_poke(organism, instr, ctx.grid),
        Opcode::Harvest => exec_harvest(organism, instr, ctx.grid),
        Opcode::Fork => exec_fork(organism, instr, ctx),
        _ => unreachable!(
            "BUG: wave-1 opcode {} dispatched to the environment wave",
            instr.opcode.mnemonic()
        ),
    };
    finish(organism, instr, outcome);
    ExecReport { charged: true }
}

/// Advances the IP past runs of `NOP`, `LABEL` and empty `CODE` cells.
///
/// Runs sequentially after the execute phase, once per organism whose
/// instruction executed cleanly, so both scheduler paths observe the same
/// post-write grid. Exceeding `max_steps` is an uncharged failure.
pub fn instant_skip(
    organism: &mut Organism,
    grid: &Grid,
    max_steps: u32,
) -> Result<(), InstructionFailure> {
    let props = grid.props();
    let mut steps = 0u32;
    loop {
        let Some(cell) = grid.cell_at(&organism.ip) else {
            return Err(InstructionFailure::IpOutOfBounds);
        };
        if !is_skippable(cell.molecule) {
            return Ok(());
        }
        if steps >= max_steps {
            return Err(InstructionFailure::SkipOverflow);
        }
        match props.step(&organism.ip, &organism.dv) {
            Some(next) => organism.ip = next,
            None => return Err(InstructionFailure::EdgeOfWorld),
        }
        steps += 1;
    }
}

fn is_skippable(molecule: Molecule) -> bool {
    match molecule.kind() {
        Some(MoleculeKind::Label) => true,
        Some(MoleculeKind::Code) => molecule.value() == 0 || molecule.value() == NOP_CODE,
        _ => false,
    }
}

// ── shared helpers ──────────────────────────────────────────────────

enum IpUpdate {
    /// Take the pre-computed `ip_after`.
    Advance,
    /// The instruction set the IP itself (jump, call, return).
    Jumped,
}

fn charge(organism: &mut Organism, instr: &PlannedInstruction) {
    organism.energy -= instr.cost.energy_cost;
    organism.entropy += instr.cost.entropy_delta;
}

fn finish(
    organism: &mut Organism,
    instr: &mut PlannedInstruction,
    outcome: Result<IpUpdate, InstructionFailure>,
) {
    match outcome {
        Ok(IpUpdate::Advance) => organism.ip = instr.ip_after.clone(),
        Ok(IpUpdate::Jumped) => {}
        Err(failure) => {
            organism.fail(failure.to_string());
            instr.failure = Some(failure);
            organism.ip = instr.ip_after.clone();
        }
    }
}

fn operand(instr: &PlannedInstruction, index: usize) -> Result<&Operand, InstructionFailure> {
    instr
        .operands
        .get(index)
        .ok_or(InstructionFailure::BadOperand(index))
}

fn read_scalar(organism: &Organism, op: &Operand) -> Result<i64, InstructionFailure> {
    match op {
        Operand::Value(v) => Ok(*v),
        Operand::Register { bank, index } => match organism.register(*bank, *index) {
            Some(RegisterValue::Scalar(v)) => Ok(*v),
            Some(RegisterValue::Vector(_)) => Err(InstructionFailure::TypeMismatch),
            None => Err(InstructionFailure::BadRegister),
        },
        Operand::Vector(_) => Err(InstructionFailure::TypeMismatch),
    }
}

fn read_slot(organism: &Organism, op: &Operand) -> Result<RegisterValue, InstructionFailure> {
    match op {
        Operand::Value(v) => Ok(RegisterValue::Scalar(*v)),
        Operand::Register { bank, index } => organism
            .register(*bank, *index)
            .cloned()
            .ok_or(InstructionFailure::BadRegister),
        Operand::Vector(v) => Ok(RegisterValue::Vector(v.clone())),
    }
}

fn read_vector(
    organism: &Organism,
    op: &Operand,
    dims: usize,
) -> Result<Vec<i32>, InstructionFailure> {
    let vector = match op {
        Operand::Vector(v) => v.clone(),
        Operand::Register { bank, index } => match organism.register(*bank, *index) {
            Some(RegisterValue::Vector(v)) => v.clone(),
            Some(RegisterValue::Scalar(_)) => return Err(InstructionFailure::TypeMismatch),
            None => return Err(InstructionFailure::BadRegister),
        },
        Operand::Value(_) => return Err(InstructionFailure::TypeMismatch),
    };
    if vector.len() == dims {
        Ok(vector)
    } else {
        Err(InstructionFailure::TypeMismatch)
    }
}

fn write_register(
    organism: &mut Organism,
    op: &Operand,
    value: RegisterValue,
) -> Result<(), InstructionFailure> {
    match op {
        Operand::Register { bank, index } => {
            if organism.set_register(*bank, *index, value) {
                Ok(())
            } else {
                Err(InstructionFailure::BadRegister)
            }
        }
        _ => Err(InstructionFailure::BadOperand(0)),
    }
}

// ── wave-1 opcodes ──────────────────────────────────────────────────

fn exec_seti(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    let value = read_scalar(organism, operand(instr, 1)?)?;
    write_register(organism, operand(instr, 0)?, RegisterValue::Scalar(value))?;
    Ok(IpUpdate::Advance)
}

fn exec_setv(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    let dims = organism.dimensions();
    let vector = read_vector(organism, operand(instr, 1)?, dims)?;
    write_register(organism, operand(instr, 0)?, RegisterValue::Vector(vector))?;
    Ok(IpUpdate::Advance)
}

fn exec_mov(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    let value = read_slot(organism, operand(instr, 1)?)?;
    write_register(organism, operand(instr, 0)?, value)?;
    Ok(IpUpdate::Advance)
}

fn exec_arith(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    subtract: bool,
) -> Result<IpUpdate, InstructionFailure> {
    let target = operand(instr, 0)?.clone();
    let rhs = read_scalar(organism, operand(instr, 1)?)?;
    let lhs = read_scalar(organism, &target)?;
    let result = if subtract {
        lhs.wrapping_sub(rhs)
    } else {
        lhs.wrapping_add(rhs)
    };
    write_register(organism, &target, RegisterValue::Scalar(result))?;
    Ok(IpUpdate::Advance)
}

fn exec_push(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    if organism.data_stack.len() >= MAX_DATA_STACK {
        return Err(InstructionFailure::StackOverflow);
    }
    let value = read_slot(organism, operand(instr, 0)?)?;
    organism.data_stack.push(value);
    Ok(IpUpdate::Advance)
}

fn exec_pop(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    let value = organism
        .data_stack
        .pop()
        .ok_or(InstructionFailure::StackUnderflow)?;
    write_register(organism, operand(instr, 0)?, value)?;
    Ok(IpUpdate::Advance)
}

fn exec_turn(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    let dims = organism.dimensions();
    let vector = read_vector(organism, operand(instr, 0)?, dims)?;
    let nonzero: Vec<_> = vector.iter().filter(|&&c| c != 0).collect();
    if nonzero.len() != 1 || nonzero[0].abs() != 1 {
        return Err(InstructionFailure::BadDirection);
    }
    organism.dv = vector;
    Ok(IpUpdate::Advance)
}

fn exec_seek(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    props: &EnvironmentProperties,
) -> Result<IpUpdate, InstructionFailure> {
    let dims = organism.dimensions();
    let delta = read_vector(organism, operand(instr, 0)?, dims)?;
    let active = organism.active_dp;
    let moved = props
        .step(&organism.dps[active], &delta)
        .ok_or(InstructionFailure::EdgeOfWorld)?;
    organism.dps[active] = moved;
    Ok(IpUpdate::Advance)
}

fn exec_scan(
    organism: &mut Organism,
    instr: &PlannedInstruction,
) -> Result<IpUpdate, InstructionFailure> {
    // Operand 1 is the molecule sensed at plan time.
    let sensed = read_scalar(organism, operand(instr, 1)?)?;
    write_register(organism, operand(instr, 0)?, RegisterValue::Scalar(sensed))?;
    Ok(IpUpdate::Advance)
}

fn exec_jump(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    props: &EnvironmentProperties,
    save_frame: bool,
) -> Result<IpUpdate, InstructionFailure> {
    let dims = organism.dimensions();
    let offset = read_vector(organism, operand(instr, 0)?, dims)?;
    let target = props
        .step(&organism.ip, &offset)
        .ok_or(InstructionFailure::JumpOutOfBounds)?;
    if save_frame {
        if organism.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(InstructionFailure::CallDepthExceeded);
        }
        organism.call_stack.push(CallFrame {
            return_ip: instr.ip_after.clone(),
            saved_prs: organism.prs.clone(),
            saved_fprs: organism.fprs.clone(),
            fpr_bindings: std::collections::BTreeMap::new(),
        });
    }
    organism.ip = target;
    Ok(IpUpdate::Jumped)
}

fn exec_ret(organism: &mut Organism) -> Result<IpUpdate, InstructionFailure> {
    let frame = organism
        .call_stack
        .pop()
        .ok_or(InstructionFailure::StackUnderflow)?;
    organism.prs = frame.saved_prs;
    organism.fprs = frame.saved_fprs;
    organism.ip = frame.return_ip;
    Ok(IpUpdate::Jumped)
}

fn exec_lpsh(organism: &mut Organism) -> Result<IpUpdate, InstructionFailure> {
    if organism.location_stack.len() >= MAX_LOCATION_STACK {
        return Err(InstructionFailure::StackOverflow);
    }
    let coordinate = organism.dps[organism.active_dp].clone();
    organism.location_stack.push(coordinate);
    Ok(IpUpdate::Advance)
}

fn exec_lpop(organism: &mut Organism) -> Result<IpUpdate, InstructionFailure> {
    let coordinate = organism
        .location_stack
        .pop()
        .ok_or(InstructionFailure::StackUnderflow)?;
    let active = organism.active_dp;
    organism.dps[active] = coordinate;
    Ok(IpUpdate::Advance)
}

fn exec_seekl(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    grid: &Grid,
) -> Result<IpUpdate, InstructionFailure> {
    let wanted = read_scalar(organism, operand(instr, 0)?)?;
    let props = grid.props();
    let policy = props.label_match;
    // One full wrap along any axis bounds the useful search distance.
    let horizon: i32 = props.shape.iter().sum();
    let active = organism.active_dp;
    let mut cursor = organism.dps[active].clone();
    for _ in 0..horizon {
        cursor = props
            .step(&cursor, &organism.dv)
            .ok_or(InstructionFailure::LabelNotFound)?;
        if let Some(cell) = grid.cell_at(&cursor) {
            let m = cell.molecule;
            if m.kind() == Some(MoleculeKind::Label) && i64::from(m.value()) == wanted {
                let marker_ok = match policy {
                    LabelMatchPolicy::Exact => m.marker() == 0,
                    LabelMatchPolicy::IgnoreMarker => true,
                };
                if marker_ok {
                    organism.dps[active] = cursor;
                    return Ok(IpUpdate::Advance);
                }
            }
        }
    }
    Err(InstructionFailure::LabelNotFound)
}

// ── wave-2 opcodes ──────────────────────────────────────────────────

fn exec_rand(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    rng: &mut DeterministicRng,
) -> Result<IpUpdate, InstructionFailure> {
    let bound = read_scalar(organism, operand(instr, 1)?)?;
    if bound <= 0 {
        return Err(InstructionFailure::RandBound);
    }
    let drawn = rng.uniform_below(bound as u64) as i64;
    write_register(organism, operand(instr, 0)?, RegisterValue::Scalar(drawn))?;
    Ok(IpUpdate::Advance)
}

fn exec_poke(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    grid: &mut Grid,
) -> Result<IpUpdate, InstructionFailure> {
    let &flat = instr.targets.first().ok_or(InstructionFailure::NoTarget)?;
    let raw = read_scalar(organism, operand(instr, 0)?)?;
    grid.set_by_index(flat, Molecule::from_raw(raw as i32), organism.id);
    Ok(IpUpdate::Advance)
}

fn exec_harvest(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    grid: &mut Grid,
) -> Result<IpUpdate, InstructionFailure> {
    let &flat = instr.targets.first().ok_or(InstructionFailure::NoTarget)?;
    let cell = grid.cell(flat).ok_or(InstructionFailure::NoTarget)?;
    if cell.molecule.kind() != Some(MoleculeKind::Energy) {
        return Err(InstructionFailure::NoEnergyAtTarget);
    }
    let gained = i64::from(cell.molecule.value());
    organism.energy += gained;
    grid.set_by_index(flat, Molecule::EMPTY, UNOWNED);
    write_register(organism, operand(instr, 0)?, RegisterValue::Scalar(gained))?;
    Ok(IpUpdate::Advance)
}

fn exec_fork(
    organism: &mut Organism,
    instr: &PlannedInstruction,
    ctx: &mut EnvExecCtx<'_>,
) -> Result<IpUpdate, InstructionFailure> {
    let &flat = instr.targets.first().ok_or(InstructionFailure::NoTarget)?;
    let endowment = read_scalar(organism, operand(instr, 0)?)?;
    if endowment <= 0 || organism.energy < endowment {
        return Err(InstructionFailure::InsufficientEnergy);
    }
    let position = ctx
        .grid
        .flat_to_coord(flat)
        .ok_or(InstructionFailure::NoTarget)?;

    organism.energy -= endowment;
    let child_id = *ctx.next_organism_id;
    *ctx.next_organism_id += 1;
    *ctx.total_created += 1;

    let mut child = Organism::new(child_id, ctx.tick, Some(organism.id), position, endowment);
    child.program_id = organism.program_id.clone();
    ctx.grid
        .set_by_index(flat, Molecule::new(MoleculeKind::Structure, 0), child_id);
    ctx.births.push(child);
    Ok(IpUpdate::Advance)
}
