// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Packed molecule representation.
//!
//! A molecule is one packed `i32`:
//!
//! ```text
//! bit 31..28   type tag (4 bits)
//! bit 27..24   marker field (4 bits)
//! bit 23..0    value, two's-complement 24-bit
//! ```
//!
//! `CODE` is tag 0, so a `CODE` molecule with value 0 and no marker packs to
//! the integer `0` — the empty molecule. The capture codec leans on this:
//! `molecule_data == 0` in a cell column means exactly "no molecule here".

use serde::{Deserialize, Serialize};

/// Semantic type of a molecule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MoleculeKind {
    /// Executable code, or empty when the value is 0.
    Code = 0,
    /// Inert data.
    Data = 1,
    /// Harvestable energy.
    Energy = 2,
    /// Structural body matter.
    Structure = 3,
    /// A label marker in program flow.
    Label = 4,
    /// A reference to a label.
    LabelRef = 5,
    /// Register operand sentinel used by the instruction encoding.
    Register = 6,
}

impl MoleculeKind {
    /// Decodes a type tag, returning `None` for unassigned tags.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Code),
            1 => Some(Self::Data),
            2 => Some(Self::Energy),
            3 => Some(Self::Structure),
            4 => Some(Self::Label),
            5 => Some(Self::LabelRef),
            6 => Some(Self::Register),
            _ => None,
        }
    }

    /// Returns the 4-bit type tag.
    #[must_use]
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Smallest representable molecule value.
pub const VALUE_MIN: i32 = -(1 << 23);
/// Largest representable molecule value.
pub const VALUE_MAX: i32 = (1 << 23) - 1;

const VALUE_MASK: i32 = 0x00FF_FFFF;
const MARKER_SHIFT: u32 = 24;
const MARKER_MASK: i32 = 0x0F00_0000u32 as i32;
const TAG_SHIFT: u32 = 28;

/// A packed molecule.
#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Molecule(i32);

impl Molecule {
    /// The empty molecule: `CODE` with value 0 and no marker.
    pub const EMPTY: Self = Self(0);

    /// Packs a molecule from kind and value.
    ///
    /// The value is truncated to the 24-bit payload; callers keep values in
    /// `[VALUE_MIN, VALUE_MAX]` (debug builds assert it).
    #[must_use]
    pub fn new(kind: MoleculeKind, value: i32) -> Self {
        debug_assert!(
            (VALUE_MIN..=VALUE_MAX).contains(&value),
            "molecule value out of range: {value}"
        );
        Self((i32::from(kind.tag()) << TAG_SHIFT) | (value & VALUE_MASK))
    }

    /// Reinterprets a raw packed integer as a molecule.
    ///
    /// Unassigned type tags are preserved; [`Molecule::kind`] reports them
    /// as `None` so the VM can fail decoding deterministically.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    /// Returns the raw packed integer.
    #[must_use]
    pub fn raw(self) -> i32 {
        self.0
    }

    /// Returns the semantic kind, or `None` for an unassigned tag.
    #[must_use]
    pub fn kind(self) -> Option<MoleculeKind> {
        MoleculeKind::from_tag(((self.0 >> TAG_SHIFT) & 0x0F) as u8)
    }

    /// Returns the signed 24-bit value.
    #[must_use]
    pub fn value(self) -> i32 {
        (self.0 << 8) >> 8
    }

    /// Returns the 4-bit marker field.
    #[must_use]
    pub fn marker(self) -> u8 {
        ((self.0 & MARKER_MASK) >> MARKER_SHIFT) as u8
    }

    /// Returns a copy with the marker field replaced.
    #[must_use]
    pub fn with_marker(self, marker: u8) -> Self {
        debug_assert!(marker < 16, "marker field is 4 bits");
        Self((self.0 & !MARKER_MASK) | ((i32::from(marker) & 0x0F) << MARKER_SHIFT))
    }

    /// Returns `true` for the empty molecule.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when this molecule is `kind` with `value`.
    #[must_use]
    pub fn is(self, kind: MoleculeKind, value: i32) -> bool {
        self.kind() == Some(kind) && self.value() == value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_molecule_packs_to_zero() {
        assert_eq!(Molecule::new(MoleculeKind::Code, 0).raw(), 0);
        assert!(Molecule::EMPTY.is_empty());
        assert_eq!(Molecule::EMPTY.kind(), Some(MoleculeKind::Code));
    }

    #[test]
    fn value_sign_extends_from_24_bits() {
        let m = Molecule::new(MoleculeKind::Data, -5);
        assert_eq!(m.kind(), Some(MoleculeKind::Data));
        assert_eq!(m.value(), -5);

        let lo = Molecule::new(MoleculeKind::Energy, VALUE_MIN);
        assert_eq!(lo.value(), VALUE_MIN);
        let hi = Molecule::new(MoleculeKind::Energy, VALUE_MAX);
        assert_eq!(hi.value(), VALUE_MAX);
    }

    #[test]
    fn marker_field_round_trips_without_touching_value() {
        let m = Molecule::new(MoleculeKind::Label, 12).with_marker(9);
        assert_eq!(m.marker(), 9);
        assert_eq!(m.value(), 12);
        assert_eq!(m.kind(), Some(MoleculeKind::Label));
        assert_eq!(m.with_marker(0).marker(), 0);
    }

    #[test]
    fn unassigned_tag_decodes_to_no_kind() {
        let raw = 0x7000_0001;
        assert_eq!(Molecule::from_raw(raw).kind(), None);
    }

    #[test]
    fn kind_tags_are_stable() {
        for (kind, tag) in [
            (MoleculeKind::Code, 0),
            (MoleculeKind::Data, 1),
            (MoleculeKind::Energy, 2),
            (MoleculeKind::Structure, 3),
            (MoleculeKind::Label, 4),
            (MoleculeKind::LabelRef, 5),
            (MoleculeKind::Register, 6),
        ] {
            assert_eq!(kind.tag(), tag);
            assert_eq!(MoleculeKind::from_tag(tag), Some(kind));
        }
        assert_eq!(MoleculeKind::from_tag(7), None);
    }
}
