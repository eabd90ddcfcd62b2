// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Thermodynamic accounting: per-instruction energy cost and entropy delta.
//!
//! Policies are assessed during planning (the context is read-only) and the
//! cached result is charged by execute. A [`PolicyManager`] composes a
//! default policy with per-family and per-opcode overrides; the most
//! specific policy wins.

use rustc_hash::FxHashMap;

use crate::grid::Grid;
use crate::isa::{OpFamily, Opcode, Operand};
use crate::organism::Organism;

/// Signed energy/entropy result of assessing one instruction.
///
/// Positive `energy_cost` consumes energy; negative grants it. Positive
/// `entropy_delta` generates entropy; negative dissipates it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Thermodynamics {
    /// Energy charged to the organism.
    pub energy_cost: i64,
    /// Entropy added to the organism.
    pub entropy_delta: i64,
}

/// Read-only context a policy sees while assessing one instruction.
pub struct ThermodynamicContext<'a> {
    /// The decoded opcode.
    pub opcode: Opcode,
    /// Resolved operands, as cached on the planned instruction.
    pub operands: &'a [Operand],
    /// The organism about to execute.
    pub organism: &'a Organism,
    /// The grid, for neighborhood-sensitive costs.
    pub grid: &'a Grid,
}

/// A pluggable per-instruction cost calculator.
pub trait ThermodynamicPolicy: Send + Sync {
    /// Assesses the cost of executing the instruction in `ctx`.
    fn assess(&self, ctx: &ThermodynamicContext<'_>) -> Thermodynamics;
}

/// The built-in policy: each opcode's base cost, entropy by family.
///
/// Environment instructions additionally pay one unit per occupied
/// orthogonal neighbor of the target cell — working in crowded
/// neighborhoods is more expensive.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultPolicy;

impl ThermodynamicPolicy for DefaultPolicy {
    fn assess(&self, ctx: &ThermodynamicContext<'_>) -> Thermodynamics {
        let mut energy_cost = ctx.opcode.base_cost();
        if ctx.opcode.family() == OpFamily::Environment {
            if let Some(flat) = ctx.grid.coord_to_flat(ctx.organism.active_dp_coord()) {
                let crowding = ctx
                    .grid
                    .neighbors(flat)
                    .into_iter()
                    .filter(|&n| ctx.grid.cell(n).is_some_and(|c| !c.is_vacant()))
                    .count();
                energy_cost += crowding as i64;
            }
        }
        let entropy_delta = match ctx.opcode.family() {
            OpFamily::Reproduction => 4,
            OpFamily::Environment => 2,
            _ => 1,
        };
        Thermodynamics {
            energy_cost,
            entropy_delta,
        }
    }
}

/// Composes a default policy with family- and opcode-level overrides.
pub struct PolicyManager {
    default_policy: Box<dyn ThermodynamicPolicy>,
    family_overrides: FxHashMap<OpFamily, Box<dyn ThermodynamicPolicy>>,
    opcode_overrides: FxHashMap<Opcode, Box<dyn ThermodynamicPolicy>>,
}

impl std::fmt::Debug for PolicyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyManager")
            .field("family_overrides", &self.family_overrides.len())
            .field("opcode_overrides", &self.opcode_overrides.len())
            .finish_non_exhaustive()
    }
}

impl PolicyManager {
    /// Creates a manager around a default policy.
    #[must_use]
    pub fn new(default_policy: Box<dyn ThermodynamicPolicy>) -> Self {
        Self {
            default_policy,
            family_overrides: FxHashMap::default(),
            opcode_overrides: FxHashMap::default(),
        }
    }

    /// Installs an override for every opcode of `family`.
    pub fn override_family(&mut self, family: OpFamily, policy: Box<dyn ThermodynamicPolicy>) {
        self.family_overrides.insert(family, policy);
    }

    /// Installs an override for a single opcode.
    pub fn override_opcode(&mut self, opcode: Opcode, policy: Box<dyn ThermodynamicPolicy>) {
        self.opcode_overrides.insert(opcode, policy);
    }

    /// Assesses `ctx` with the most specific applicable policy.
    #[must_use]
    pub fn assess(&self, ctx: &ThermodynamicContext<'_>) -> Thermodynamics {
        if let Some(policy) = self.opcode_overrides.get(&ctx.opcode) {
            return policy.assess(ctx);
        }
        if let Some(policy) = self.family_overrides.get(&ctx.opcode.family()) {
            return policy.assess(ctx);
        }
        self.default_policy.assess(ctx)
    }
}

impl Default for PolicyManager {
    fn default() -> Self {
        Self::new(Box::new(DefaultPolicy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentProperties, LabelMatchPolicy};

    struct Flat(i64);
    impl ThermodynamicPolicy for Flat {
        fn assess(&self, _ctx: &ThermodynamicContext<'_>) -> Thermodynamics {
            Thermodynamics {
                energy_cost: self.0,
                entropy_delta: 0,
            }
        }
    }

    fn ctx_parts() -> (Grid, Organism) {
        let props = match EnvironmentProperties::new(vec![4, 4], true, LabelMatchPolicy::Exact) {
            Ok(p) => p,
            Err(e) => unreachable!("valid shape rejected: {e}"),
        };
        (Grid::new(props), Organism::new(1, 0, None, vec![0, 0], 100))
    }

    #[test]
    fn most_specific_policy_wins() {
        let (grid, org) = ctx_parts();
        let mut manager = PolicyManager::default();
        manager.override_family(OpFamily::Environment, Box::new(Flat(50)));
        manager.override_opcode(Opcode::Poke, Box::new(Flat(99)));

        let assess = |opcode| {
            manager.assess(&ThermodynamicContext {
                opcode,
                operands: &[],
                organism: &org,
                grid: &grid,
            })
        };

        assert_eq!(assess(Opcode::Poke).energy_cost, 99);
        assert_eq!(assess(Opcode::Harvest).energy_cost, 50);
        assert_eq!(assess(Opcode::Nop).energy_cost, Opcode::Nop.base_cost());
    }

    #[test]
    fn environment_instructions_pay_for_crowded_neighborhoods() {
        let (mut grid, org) = ctx_parts();
        let manager = PolicyManager::default();
        let assess = |grid: &Grid, org: &Organism| {
            manager.assess(&ThermodynamicContext {
                opcode: Opcode::Poke,
                operands: &[],
                organism: org,
                grid,
            })
        };

        let calm = assess(&grid, &org).energy_cost;
        assert_eq!(calm, Opcode::Poke.base_cost());

        // Occupy a neighbor of the target (the active data pointer).
        grid.set_by_coord(&[0, 1], crate::molecule::Molecule::new(
            crate::molecule::MoleculeKind::Structure,
            1,
        ), 0);
        assert_eq!(assess(&grid, &org).energy_cost, calm + 1);
    }

    #[test]
    fn default_policy_charges_more_entropy_for_reproduction() {
        let (grid, org) = ctx_parts();
        let manager = PolicyManager::default();
        let fork = manager.assess(&ThermodynamicContext {
            opcode: Opcode::Fork,
            operands: &[],
            organism: &org,
            grid: &grid,
        });
        let nop = manager.assess(&ThermodynamicContext {
            opcode: Opcode::Nop,
            operands: &[],
            organism: &org,
            grid: &grid,
        });
        assert!(fork.entropy_delta > nop.entropy_delta);
    }
}
