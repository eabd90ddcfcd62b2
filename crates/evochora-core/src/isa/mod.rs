// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The instruction set: opcode table, operand model and planned
//! instructions.
//!
//! Instructions live in the grid as molecule runs: a `CODE` molecule whose
//! value selects the opcode, followed by one cell per operand along the
//! organism's direction vector. Planning ([`plan`]) decodes and resolves
//! that run into a [`PlannedInstruction`] without touching the grid;
//! execution ([`execute_local`] / [`execute_env`]) applies the cached
//! effects.
//!
//! Each opcode advertises whether its execute step is
//! parallel-execute-safe: `true` means execution touches only the
//! organism's own state (plus race-free grid reads before any write phase),
//! so it may run in wave 1 on the planning worker. Grid-writing and
//! RNG-consuming opcodes are wave 2.

mod exec;
mod plan;

pub use exec::{
    execute_env, execute_failed, execute_local, instant_skip, EnvExecCtx, ExecReport,
};
pub use plan::{plan, register_operand_value};

use thiserror::Error;

use crate::organism::RegisterBank;
use crate::thermo::Thermodynamics;

/// Opcode value of `NOP`, also recognized by the instant-skip sweep.
pub const NOP_CODE: i32 = 1;

/// Instruction families, used for thermodynamic policy overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpFamily {
    /// Flow control: `NOP`, `JMPI`, `CALL`, `RET`.
    Control,
    /// Register arithmetic and moves.
    Arithmetic,
    /// Data-stack operations.
    StackOps,
    /// Pointer steering: direction vector and data pointers.
    Pointer,
    /// Sensing: grid reads and randomness.
    Sense,
    /// Grid mutation.
    Environment,
    /// Offspring creation.
    Reproduction,
}

/// Shape of one encoded operand cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandSpec {
    /// A `REGISTER` molecule naming a register slot.
    Reg,
    /// Either a `REGISTER` molecule or a `DATA` immediate.
    RegOrValue,
    /// One `DATA` molecule per grid dimension, forming a vector.
    VectorImm,
}

/// The instruction set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Does nothing. Also instant-skipped when the IP passes over it.
    Nop,
    /// Loads a scalar into a register.
    Seti,
    /// Loads a vector immediate into a register.
    Setv,
    /// Copies one register slot to another, scalar or vector.
    Mov,
    /// Adds a scalar to a scalar register.
    Add,
    /// Subtracts a scalar from a scalar register.
    Sub,
    /// Pushes a register or immediate onto the data stack.
    Push,
    /// Pops the data stack into a register.
    Pop,
    /// Replaces the direction vector with a unit vector.
    Turn,
    /// Moves the active data pointer by a vector.
    Seek,
    /// Reads the molecule under the active data pointer into a register.
    Scan,
    /// Draws a uniform integer below a bound into a register.
    Rand,
    /// Jumps by a vector offset relative to the instruction.
    Jmpi,
    /// Calls: saves a frame and jumps by a vector offset.
    Call,
    /// Returns from the innermost call frame.
    Ret,
    /// Advances the active data pointer to the next matching label.
    Seekl,
    /// Pushes the active data pointer onto the location stack.
    Lpsh,
    /// Pops the location stack into the active data pointer.
    Lpop,
    /// Writes a molecule at the active data pointer cell.
    Poke,
    /// Absorbs an energy molecule at the active data pointer cell.
    Harvest,
    /// Spawns a child organism at the active data pointer cell.
    Fork,
}

impl Opcode {
    /// Decodes an opcode from a `CODE` molecule value.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Nop),
            2 => Some(Self::Seti),
            3 => Some(Self::Setv),
            4 => Some(Self::Mov),
            5 => Some(Self::Add),
            6 => Some(Self::Sub),
            7 => Some(Self::Push),
            8 => Some(Self::Pop),
            9 => Some(Self::Turn),
            10 => Some(Self::Seek),
            11 => Some(Self::Scan),
            12 => Some(Self::Rand),
            13 => Some(Self::Jmpi),
            14 => Some(Self::Call),
            15 => Some(Self::Ret),
            16 => Some(Self::Seekl),
            17 => Some(Self::Poke),
            18 => Some(Self::Harvest),
            19 => Some(Self::Fork),
            20 => Some(Self::Lpsh),
            21 => Some(Self::Lpop),
            _ => None,
        }
    }

    /// The molecule value encoding this opcode.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::Nop => 1,
            Self::Seti => 2,
            Self::Setv => 3,
            Self::Mov => 4,
            Self::Add => 5,
            Self::Sub => 6,
            Self::Push => 7,
            Self::Pop => 8,
            Self::Turn => 9,
            Self::Seek => 10,
            Self::Scan => 11,
            Self::Rand => 12,
            Self::Jmpi => 13,
            Self::Call => 14,
            Self::Ret => 15,
            Self::Seekl => 16,
            Self::Poke => 17,
            Self::Harvest => 18,
            Self::Fork => 19,
            Self::Lpsh => 20,
            Self::Lpop => 21,
        }
    }

    /// Instruction family.
    #[must_use]
    pub fn family(self) -> OpFamily {
        match self {
            Self::Nop | Self::Jmpi | Self::Call | Self::Ret => OpFamily::Control,
            Self::Seti | Self::Setv | Self::Mov | Self::Add | Self::Sub => OpFamily::Arithmetic,
            Self::Push | Self::Pop => OpFamily::StackOps,
            Self::Turn | Self::Seek | Self::Seekl | Self::Lpsh | Self::Lpop => OpFamily::Pointer,
            Self::Scan | Self::Rand => OpFamily::Sense,
            Self::Poke | Self::Harvest => OpFamily::Environment,
            Self::Fork => OpFamily::Reproduction,
        }
    }

    /// Baseline energy cost consulted by the default policy.
    #[must_use]
    pub fn base_cost(self) -> i64 {
        match self {
            Self::Nop | Self::Seti | Self::Mov | Self::Add | Self::Sub | Self::Push
            | Self::Pop | Self::Turn | Self::Jmpi | Self::Ret | Self::Lpsh | Self::Lpop => 1,
            Self::Setv | Self::Seek | Self::Scan | Self::Rand | Self::Call => 2,
            Self::Harvest => 3,
            Self::Seekl => 4,
            Self::Poke => 5,
            Self::Fork => 20,
        }
    }

    /// `true` when execute touches only organism-local state and race-free
    /// grid reads; such instructions may run in wave 1.
    #[must_use]
    pub fn is_parallel_execute_safe(self) -> bool {
        !matches!(self, Self::Rand | Self::Poke | Self::Harvest | Self::Fork)
    }

    /// `true` when execute writes grid cells.
    #[must_use]
    pub fn modifies_environment(self) -> bool {
        matches!(self, Self::Poke | Self::Harvest | Self::Fork)
    }

    /// Encoded operand cells following the opcode cell.
    #[must_use]
    pub fn operand_spec(self) -> &'static [OperandSpec] {
        use OperandSpec::{Reg, RegOrValue, VectorImm};
        match self {
            Self::Nop | Self::Ret | Self::Lpsh | Self::Lpop => &[],
            Self::Seti | Self::Add | Self::Sub | Self::Rand => &[Reg, RegOrValue],
            Self::Setv => &[Reg, VectorImm],
            Self::Mov => &[Reg, Reg],
            Self::Push | Self::Poke | Self::Fork | Self::Seekl => &[RegOrValue],
            Self::Pop | Self::Scan | Self::Harvest => &[Reg],
            Self::Turn | Self::Seek | Self::Jmpi | Self::Call => &[VectorImm],
        }
    }

    /// Assembly mnemonic.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Seti => "SETI",
            Self::Setv => "SETV",
            Self::Mov => "MOV",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Turn => "TURN",
            Self::Seek => "SEEK",
            Self::Scan => "SCAN",
            Self::Rand => "RAND",
            Self::Jmpi => "JMPI",
            Self::Call => "CALL",
            Self::Ret => "RET",
            Self::Seekl => "SEEKL",
            Self::Poke => "POKE",
            Self::Harvest => "HARVEST",
            Self::Fork => "FORK",
            Self::Lpsh => "LPSH",
            Self::Lpop => "LPOP",
        }
    }
}

/// A resolved operand cached on a planned instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// An immediate or plan-resolved scalar.
    Value(i64),
    /// A register reference (resolved to a slot, read or written at
    /// execute time; register contents are organism-local).
    Register {
        /// Register bank.
        bank: RegisterBank,
        /// Slot index within the bank.
        index: usize,
    },
    /// A vector immediate.
    Vector(Vec<i32>),
}

/// Ways an instruction can fail during plan or execute.
///
/// These are organism-level outcomes, not engine errors: the organism is
/// penalized per configuration and may die, the tick continues.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InstructionFailure {
    /// The instruction pointer left the grid.
    #[error("instruction pointer out of bounds")]
    IpOutOfBounds,
    /// The molecule under the IP is not executable code.
    #[error("molecule under ip is not code")]
    NotCode,
    /// The code value does not name an opcode.
    #[error("unknown opcode {0}")]
    UnknownOpcode(i32),
    /// An operand cell fell outside the grid.
    #[error("operand cell out of bounds")]
    OperandOutOfBounds,
    /// An operand cell held the wrong molecule kind.
    #[error("malformed operand at position {0}")]
    BadOperand(usize),
    /// A register reference named a nonexistent slot.
    #[error("register reference out of range")]
    BadRegister,
    /// A scalar was required but a vector was found, or vice versa.
    #[error("operand type mismatch")]
    TypeMismatch,
    /// `TURN` operand was not a unit vector.
    #[error("direction must be a unit vector")]
    BadDirection,
    /// A jump or call target left a bounded grid.
    #[error("jump target out of bounds")]
    JumpOutOfBounds,
    /// The IP or a data pointer ran against the edge of a bounded grid.
    #[error("edge of world")]
    EdgeOfWorld,
    /// The data stack is full.
    #[error("data stack overflow")]
    StackOverflow,
    /// The addressed stack is empty.
    #[error("stack underflow")]
    StackUnderflow,
    /// The call stack is full.
    #[error("call depth exceeded")]
    CallDepthExceeded,
    /// `SEEKL` found no matching label within its search horizon.
    #[error("label not found")]
    LabelNotFound,
    /// An environment instruction had no valid target cell.
    #[error("no valid target cell")]
    NoTarget,
    /// `HARVEST` target held no energy molecule.
    #[error("no energy at target")]
    NoEnergyAtTarget,
    /// `FORK` endowment exceeded available energy or was not positive.
    #[error("insufficient energy for fork")]
    InsufficientEnergy,
    /// `RAND` bound was not positive.
    #[error("random bound must be positive")]
    RandBound,
    /// The post-execute skip exceeded its configured horizon.
    #[error("instant-skip overflow")]
    SkipOverflow,
}

/// Conflict-resolution status of a planned instruction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictStatus {
    /// Not subject to conflict resolution.
    #[default]
    NotApplicable,
    /// Won every claimed coordinate.
    Won,
    /// Lost at least one claimed coordinate; must not execute.
    Lost,
}

/// One instruction planned for the current tick.
///
/// Created by [`plan`], consumed within the same tick, never retained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedInstruction {
    /// Organism that planned the instruction.
    pub organism_id: u64,
    /// Decoded opcode.
    pub opcode: Opcode,
    /// Resolved operands. Interceptors mutate this vector in place;
    /// execute reads it.
    pub operands: Vec<Operand>,
    /// IP position after the opcode and operand cells.
    pub ip_after: Vec<i32>,
    /// Flat coordinates this instruction claims for environment writes.
    pub targets: Vec<i32>,
    /// Thermodynamic assessment cached at plan time.
    pub cost: Thermodynamics,
    /// Failure detected so far, if any.
    pub failure: Option<InstructionFailure>,
    /// Whether the execute step ran this tick.
    pub executed_in_tick: bool,
    /// Conflict-resolution status.
    pub conflict: ConflictStatus,
}

impl PlannedInstruction {
    /// A placeholder instruction that failed before decoding.
    #[must_use]
    pub fn failed(organism_id: u64, ip: Vec<i32>, failure: InstructionFailure) -> Self {
        Self {
            organism_id,
            opcode: Opcode::Nop,
            operands: Vec::new(),
            ip_after: ip,
            targets: Vec::new(),
            cost: Thermodynamics::default(),
            failure: Some(failure),
            executed_in_tick: false,
            conflict: ConflictStatus::NotApplicable,
        }
    }

    /// `true` when the instruction writes grid cells.
    #[must_use]
    pub fn modifies_environment(&self) -> bool {
        self.opcode.modifies_environment() && self.failure.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_codes_round_trip() {
        for code in 1..=21 {
            let opcode = match Opcode::from_code(code) {
                Some(op) => op,
                None => unreachable!("code {code} should decode"),
            };
            assert_eq!(opcode.code(), code);
        }
        assert_eq!(Opcode::from_code(0), None);
        assert_eq!(Opcode::from_code(22), None);
        assert_eq!(Opcode::from_code(-1), None);
    }

    #[test]
    fn wave_classification_matches_side_effects() {
        for code in 1..=21 {
            let Some(op) = Opcode::from_code(code) else {
                unreachable!("code {code} should decode")
            };
            if op.modifies_environment() {
                assert!(
                    !op.is_parallel_execute_safe(),
                    "{} writes the grid but claims wave-1 safety",
                    op.mnemonic()
                );
            }
        }
        // RAND draws from the shared engine RNG: local state only, but the
        // draw order must be serialized, so it is not wave-1 safe.
        assert!(!Opcode::Rand.is_parallel_execute_safe());
        assert!(!Opcode::Rand.modifies_environment());
    }
}
