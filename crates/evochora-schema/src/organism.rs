// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serialized organism state.
//!
//! [`OrganismState`] is the lossless wire mirror of a live organism: the
//! engine's capture path writes it into every tick sample and the resume
//! path rebuilds organisms from it. The engine reuses [`RegisterValue`] and
//! [`CallFrame`] directly for its in-memory register files and call stack,
//! so conversion is field-by-field and cannot lose information.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One register slot: either a scalar integer or a coordinate vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterValue {
    /// Scalar integer payload.
    Scalar(i64),
    /// Coordinate vector payload, one component per grid dimension.
    Vector(Vec<i32>),
}

impl Default for RegisterValue {
    fn default() -> Self {
        Self::Scalar(0)
    }
}

/// A saved call frame on an organism's call stack.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Instruction pointer to restore on return.
    pub return_ip: Vec<i32>,
    /// Procedure registers saved at call time.
    pub saved_prs: Vec<RegisterValue>,
    /// Formal-parameter registers saved at call time.
    pub saved_fprs: Vec<RegisterValue>,
    /// Bindings from formal-parameter index to caller register index.
    pub fpr_bindings: BTreeMap<i32, i32>,
}

/// Complete serialized state of one organism at a capture boundary.
///
/// Dead organisms are captured too (they stay in the engine until the next
/// serialization boundary prunes them), so `is_dead`, `death_tick` and
/// `failure_reason` are part of the record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismState {
    /// Unique, monotonically assigned organism id.
    pub organism_id: u64,
    /// Tick at which the organism was created.
    pub birth_tick: u64,
    /// Parent organism id, absent for seeded organisms.
    pub parent_id: Option<u64>,
    /// Program artifact id the organism was instantiated from, if any.
    pub program_id: Option<String>,
    /// Instruction pointer (one component per grid dimension).
    pub ip: Vec<i32>,
    /// Direction vector the instruction pointer advances along.
    pub dv: Vec<i32>,
    /// Data pointers.
    pub dps: Vec<Vec<i32>>,
    /// Index of the active data pointer.
    pub active_dp_index: u32,
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
    /// Remaining energy.
    pub energy: i64,
    /// Accumulated entropy.
    pub entropy: i64,
    /// Free-form marker value.
    pub marker: i32,
    /// Canonical 64-bit genome hash (0 = not yet assigned).
    pub genome_hash: u64,
    /// Grid position the organism was born at.
    pub initial_position: Vec<i32>,
    /// Liveness flag.
    pub is_dead: bool,
    /// Whether the most recent instruction reported failure.
    pub instruction_failed: bool,
    /// Tick of death, when dead.
    pub death_tick: Option<u64>,
    /// Human-readable reason for the last instruction failure, if any.
    pub failure_reason: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn register_value_defaults_to_zero_scalar() {
        assert_eq!(RegisterValue::default(), RegisterValue::Scalar(0));
    }

    #[test]
    fn call_frame_round_trips_through_cbor() {
        let frame = CallFrame {
            return_ip: vec![4, 2],
            saved_prs: vec![RegisterValue::Scalar(-7)],
            saved_fprs: vec![RegisterValue::Vector(vec![1, 0])],
            fpr_bindings: BTreeMap::from([(0, 3)]),
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&frame, &mut buf).unwrap();
        let back: CallFrame = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, frame);
    }
}
