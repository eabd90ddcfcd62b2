// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Conflict resolution over environment-modifying instructions.
//!
//! Every claimed coordinate is awarded to the claimant with the smallest
//! organism id. An instruction that loses any of its claims is marked
//! [`ConflictStatus::Lost`] and must not execute; an instruction that wins
//! all of them is [`ConflictStatus::Won`]. Instructions that claim nothing
//! (including environment instructions whose operand resolution produced no
//! valid targets) stay [`ConflictStatus::NotApplicable`] and remain
//! executable.

use rustc_hash::FxHashMap;

use crate::isa::{ConflictStatus, PlannedInstruction};

/// Resolves conflicts across the planned instructions of one tick.
///
/// Deterministic: the outcome depends only on the claims and the organism
/// ids, never on slice order.
pub fn resolve_conflicts(instructions: &mut [PlannedInstruction]) {
    let mut winners: FxHashMap<i32, u64> = FxHashMap::default();
    for instr in instructions.iter() {
        if !instr.modifies_environment() || instr.targets.is_empty() {
            continue;
        }
        for &flat in &instr.targets {
            winners
                .entry(flat)
                .and_modify(|best| {
                    if instr.organism_id < *best {
                        *best = instr.organism_id;
                    }
                })
                .or_insert(instr.organism_id);
        }
    }

    for instr in instructions.iter_mut() {
        if !instr.modifies_environment() || instr.targets.is_empty() {
            continue;
        }
        let lost = instr
            .targets
            .iter()
            .any(|flat| winners.get(flat) != Some(&instr.organism_id));
        instr.conflict = if lost {
            instr.executed_in_tick = false;
            ConflictStatus::Lost
        } else {
            ConflictStatus::Won
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Opcode, PlannedInstruction};
    use crate::thermo::Thermodynamics;

    fn claim(organism_id: u64, targets: Vec<i32>) -> PlannedInstruction {
        PlannedInstruction {
            organism_id,
            opcode: Opcode::Poke,
            operands: Vec::new(),
            ip_after: vec![0, 0],
            targets,
            cost: Thermodynamics::default(),
            failure: None,
            executed_in_tick: false,
            conflict: ConflictStatus::NotApplicable,
        }
    }

    #[test]
    fn lowest_id_wins_each_contested_coordinate() {
        let mut instrs = vec![claim(2, vec![7]), claim(1, vec![7]), claim(3, vec![9])];
        resolve_conflicts(&mut instrs);
        assert_eq!(instrs[0].conflict, ConflictStatus::Lost);
        assert!(!instrs[0].executed_in_tick);
        assert_eq!(instrs[1].conflict, ConflictStatus::Won);
        assert_eq!(instrs[2].conflict, ConflictStatus::Won);
    }

    #[test]
    fn losing_any_coordinate_loses_the_instruction() {
        // Organism 2 claims {5, 6}; organism 1 claims {6} and wins it.
        let mut instrs = vec![claim(2, vec![5, 6]), claim(1, vec![6])];
        resolve_conflicts(&mut instrs);
        assert_eq!(instrs[0].conflict, ConflictStatus::Lost);
        assert_eq!(instrs[1].conflict, ConflictStatus::Won);
    }

    #[test]
    fn resolution_is_order_independent() {
        let run = |order: Vec<PlannedInstruction>| {
            let mut instrs = order;
            resolve_conflicts(&mut instrs);
            let mut statuses: Vec<(u64, ConflictStatus)> = instrs
                .iter()
                .map(|i| (i.organism_id, i.conflict))
                .collect();
            statuses.sort_by_key(|&(id, _)| id);
            statuses
        };
        let forward = run(vec![claim(1, vec![3]), claim(2, vec![3]), claim(3, vec![4])]);
        let backward = run(vec![claim(3, vec![4]), claim(2, vec![3]), claim(1, vec![3])]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn instructions_without_targets_stay_executable() {
        let mut instrs = vec![claim(1, Vec::new())];
        resolve_conflicts(&mut instrs);
        assert_eq!(instrs[0].conflict, ConflictStatus::NotApplicable);
    }
}
