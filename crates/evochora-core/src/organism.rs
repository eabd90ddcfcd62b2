// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-organism state.
//!
//! An organism owns its entire mutable state: pointers, register files,
//! stacks, energy and liveness. During a tick, only the organism's own
//! planning thread touches this state (wave-1 execution is organism-local
//! by construction), so no field here needs interior mutability.
//!
//! The register and call-frame representations are the wire types from
//! `evochora-schema`, which makes [`Organism::to_state`] /
//! [`Organism::from_state`] a plain field copy in both directions.

use evochora_schema::{CallFrame, OrganismState, RegisterValue};

use crate::grid::OwnerId;

/// Number of data registers.
pub const DR_COUNT: usize = 8;
/// Number of procedure registers.
pub const PR_COUNT: usize = 4;
/// Number of formal-parameter registers.
pub const FPR_COUNT: usize = 4;
/// Number of location registers.
pub const LR_COUNT: usize = 4;
/// Number of data pointers.
pub const DP_COUNT: usize = 2;
/// Maximum depth of the data stack.
pub const MAX_DATA_STACK: usize = 64;
/// Maximum depth of the location stack.
pub const MAX_LOCATION_STACK: usize = 64;
/// Maximum call depth.
pub const MAX_CALL_DEPTH: usize = 32;

/// Register banks addressable by instruction operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegisterBank {
    /// General-purpose data registers.
    Data,
    /// Procedure registers, saved across calls.
    Proc,
    /// Formal-parameter registers, saved across calls.
    Formal,
    /// Location (vector) registers.
    Location,
}

impl RegisterBank {
    /// Decodes the 2-bit bank tag used in the operand encoding.
    #[must_use]
    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Data),
            1 => Some(Self::Proc),
            2 => Some(Self::Formal),
            3 => Some(Self::Location),
            _ => None,
        }
    }

    /// Number of registers in this bank.
    #[must_use]
    pub fn len(self) -> usize {
        match self {
            Self::Data => DR_COUNT,
            Self::Proc => PR_COUNT,
            Self::Formal => FPR_COUNT,
            Self::Location => LR_COUNT,
        }
    }
}

/// One embodied virtual organism.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Organism {
    /// Unique, monotonically assigned id. Doubles as the cell owner id.
    pub id: OwnerId,
    /// Tick the organism was created at.
    pub birth_tick: u64,
    /// Parent id, absent for seeded organisms.
    pub parent_id: Option<OwnerId>,
    /// Program artifact the organism was instantiated from.
    pub program_id: Option<String>,
    /// Instruction pointer; always normalized in-grid.
    pub ip: Vec<i32>,
    /// Direction vector the instruction pointer advances along.
    pub dv: Vec<i32>,
    /// Data pointers.
    pub dps: Vec<Vec<i32>>,
    /// Index of the active data pointer.
    pub active_dp: usize,
    /// Data registers.
    pub drs: Vec<RegisterValue>,
    /// Procedure registers.
    pub prs: Vec<RegisterValue>,
    /// Formal-parameter registers.
    pub fprs: Vec<RegisterValue>,
    /// Location registers.
    pub lrs: Vec<RegisterValue>,
    /// Data stack, bottom first.
    pub data_stack: Vec<RegisterValue>,
    /// Location stack, bottom first.
    pub location_stack: Vec<Vec<i32>>,
    /// Call stack, outermost frame first.
    pub call_stack: Vec<CallFrame>,
    /// Remaining energy; reaching zero or below kills.
    pub energy: i64,
    /// Accumulated entropy.
    pub entropy: i64,
    /// Free-form marker value.
    pub marker: i32,
    /// Canonical genome hash; 0 until assigned at birth finalization.
    pub genome_hash: u64,
    /// Position the organism was born at.
    pub initial_position: Vec<i32>,
    /// Liveness flag. Dead organisms are skipped during planning but kept
    /// until the next serialization boundary prunes them.
    pub is_dead: bool,
    /// Whether the most recent instruction reported failure.
    pub instruction_failed: bool,
    /// Tick of death, when dead.
    pub death_tick: Option<u64>,
    /// Reason for the most recent instruction failure.
    pub failure_reason: Option<String>,
}

impl Organism {
    /// Creates a fresh organism at `position` with default registers.
    ///
    /// The direction vector starts as the unit vector along the last axis
    /// (the fastest-varying axis in row-major flat order).
    #[must_use]
    pub fn new(
        id: OwnerId,
        birth_tick: u64,
        parent_id: Option<OwnerId>,
        position: Vec<i32>,
        energy: i64,
    ) -> Self {
        let dims = position.len();
        let mut dv = vec![0; dims];
        if let Some(last) = dv.last_mut() {
            *last = 1;
        }
        Self {
            id,
            birth_tick,
            parent_id,
            program_id: None,
            ip: position.clone(),
            dv,
            dps: vec![position.clone(); DP_COUNT],
            active_dp: 0,
            drs: vec![RegisterValue::default(); DR_COUNT],
            prs: vec![RegisterValue::default(); PR_COUNT],
            fprs: vec![RegisterValue::default(); FPR_COUNT],
            lrs: vec![RegisterValue::default(); LR_COUNT],
            data_stack: Vec::new(),
            location_stack: Vec::new(),
            call_stack: Vec::new(),
            energy,
            entropy: 0,
            marker: 0,
            genome_hash: 0,
            initial_position: position,
            is_dead: false,
            instruction_failed: false,
            death_tick: None,
            failure_reason: None,
        }
    }

    /// Number of grid dimensions this organism is embedded in.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.ip.len()
    }

    /// Coordinate of the active data pointer.
    #[must_use]
    pub fn active_dp_coord(&self) -> &[i32] {
        &self.dps[self.active_dp.min(self.dps.len() - 1)]
    }

    /// Reads a register slot.
    #[must_use]
    pub fn register(&self, bank: RegisterBank, index: usize) -> Option<&RegisterValue> {
        self.bank(bank).get(index)
    }

    /// Writes a register slot. Returns `false` when `index` is out of range.
    pub fn set_register(&mut self, bank: RegisterBank, index: usize, value: RegisterValue) -> bool {
        match self.bank_mut(bank).get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn bank(&self, bank: RegisterBank) -> &[RegisterValue] {
        match bank {
            RegisterBank::Data => &self.drs,
            RegisterBank::Proc => &self.prs,
            RegisterBank::Formal => &self.fprs,
            RegisterBank::Location => &self.lrs,
        }
    }

    fn bank_mut(&mut self, bank: RegisterBank) -> &mut Vec<RegisterValue> {
        match bank {
            RegisterBank::Data => &mut self.drs,
            RegisterBank::Proc => &mut self.prs,
            RegisterBank::Formal => &mut self.fprs,
            RegisterBank::Location => &mut self.lrs,
        }
    }

    /// Records an instruction failure.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.instruction_failed = true;
        self.failure_reason = Some(reason.into());
    }

    /// Marks the organism dead at `tick`.
    pub fn kill(&mut self, tick: u64) {
        if !self.is_dead {
            self.is_dead = true;
            self.death_tick = Some(tick);
        }
    }

    /// Serializes the organism losslessly.
    #[must_use]
    pub fn to_state(&self) -> OrganismState {
        OrganismState {
            organism_id: self.id,
            birth_tick: self.birth_tick,
            parent_id: self.parent_id,
            program_id: self.program_id.clone(),
            ip: self.ip.clone(),
            dv: self.dv.clone(),
            dps: self.dps.clone(),
            active_dp_index: self.active_dp as u32,
            drs: self.drs.clone(),
            prs: self.prs.clone(),
            fprs: self.fprs.clone(),
            lrs: self.lrs.clone(),
            data_stack: self.data_stack.clone(),
            location_stack: self.location_stack.clone(),
            call_stack: self.call_stack.clone(),
            energy: self.energy,
            entropy: self.entropy,
            marker: self.marker,
            genome_hash: self.genome_hash,
            initial_position: self.initial_position.clone(),
            is_dead: self.is_dead,
            instruction_failed: self.instruction_failed,
            death_tick: self.death_tick,
            failure_reason: self.failure_reason.clone(),
        }
    }

    /// Rebuilds an organism from its serialized state.
    #[must_use]
    pub fn from_state(state: &OrganismState) -> Self {
        Self {
            id: state.organism_id,
            birth_tick: state.birth_tick,
            parent_id: state.parent_id,
            program_id: state.program_id.clone(),
            ip: state.ip.clone(),
            dv: state.dv.clone(),
            dps: state.dps.clone(),
            active_dp: state.active_dp_index as usize,
            drs: state.drs.clone(),
            prs: state.prs.clone(),
            fprs: state.fprs.clone(),
            lrs: state.lrs.clone(),
            data_stack: state.data_stack.clone(),
            location_stack: state.location_stack.clone(),
            call_stack: state.call_stack.clone(),
            energy: state.energy,
            entropy: state.entropy,
            marker: state.marker,
            genome_hash: state.genome_hash,
            initial_position: state.initial_position.clone(),
            is_dead: state.is_dead,
            instruction_failed: state.instruction_failed,
            death_tick: state.death_tick,
            failure_reason: state.failure_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_organism_points_along_the_last_axis() {
        let org = Organism::new(1, 0, None, vec![3, 4], 100);
        assert_eq!(org.dv, vec![0, 1]);
        assert_eq!(org.ip, vec![3, 4]);
        assert_eq!(org.dps.len(), DP_COUNT);
        assert_eq!(org.drs.len(), DR_COUNT);
        assert!(!org.is_dead);
    }

    #[test]
    fn register_access_is_bounds_checked() {
        let mut org = Organism::new(1, 0, None, vec![0, 0], 10);
        assert!(org.set_register(RegisterBank::Data, 7, RegisterValue::Scalar(5)));
        assert!(!org.set_register(RegisterBank::Data, 8, RegisterValue::Scalar(5)));
        assert_eq!(
            org.register(RegisterBank::Data, 7),
            Some(&RegisterValue::Scalar(5))
        );
        assert_eq!(org.register(RegisterBank::Proc, 4), None);
    }

    #[test]
    fn kill_is_idempotent_and_keeps_the_first_death_tick() {
        let mut org = Organism::new(1, 0, None, vec![0, 0], 10);
        org.kill(5);
        org.kill(9);
        assert!(org.is_dead);
        assert_eq!(org.death_tick, Some(5));
    }

    #[test]
    fn state_round_trip_is_lossless() {
        let mut org = Organism::new(4, 2, Some(1), vec![1, 2], 77);
        org.program_id = Some("prog".into());
        org.data_stack.push(RegisterValue::Vector(vec![0, 1]));
        org.location_stack.push(vec![2, 2]);
        org.call_stack.push(CallFrame {
            return_ip: vec![1, 3],
            saved_prs: org.prs.clone(),
            saved_fprs: org.fprs.clone(),
            fpr_bindings: std::collections::BTreeMap::from([(0, 2)]),
        });
        org.fail("bad operand");
        org.kill(9);

        let state = org.to_state();
        let back = Organism::from_state(&state);
        assert_eq!(back, org);
        assert_eq!(back.to_state(), state);
    }
}
