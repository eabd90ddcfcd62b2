// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Runtime program artifacts.
//!
//! The engine never invokes the assembly compiler; it consumes
//! [`ProgramArtifact`]s — validated runtime forms of the compiler output
//! persisted in run metadata. An artifact can place its body into the grid
//! for a fresh run and is looked up by id when organisms are restored.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::grid::{Grid, OwnerId};
use crate::molecule::Molecule;

/// Errors raised while validating or placing a program artifact.
#[derive(Debug, Error)]
pub enum ProgramError {
    /// An offset had the wrong number of components.
    #[error("program `{program_id}`: offset arity {got} does not match {expected} dimensions")]
    WrongArity {
        /// Offending program.
        program_id: String,
        /// Required dimensionality.
        expected: usize,
        /// Found dimensionality.
        got: usize,
    },
    /// A placement landed outside the grid.
    #[error("program `{program_id}`: placement at {offset:?} leaves the grid")]
    PlacementOutOfBounds {
        /// Offending program.
        program_id: String,
        /// Offset that failed to normalize.
        offset: Vec<i32>,
    },
    /// Two artifacts shared the same id.
    #[error("duplicate program id `{0}`")]
    DuplicateProgramId(String),
}

/// One source-map entry of a placed molecule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLocation {
    /// Offset from the program origin.
    pub offset: Vec<i32>,
    /// Source file.
    pub file: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// Validated runtime form of one compiled program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramArtifact {
    /// Stable id organisms reference.
    pub program_id: String,
    /// Human-readable name.
    pub name: String,
    /// Entry-point offset from the origin.
    pub entry_point: Vec<i32>,
    /// Placed molecules as `(offset, molecule)` pairs.
    pub placements: Vec<(Vec<i32>, Molecule)>,
    /// Label symbol table.
    pub labels: BTreeMap<String, Vec<i32>>,
    /// Source map.
    pub source_map: Vec<SourceLocation>,
}

impl ProgramArtifact {
    /// Validates a schema artifact into its runtime form.
    pub fn from_schema(
        artifact: &evochora_schema::ProgramArtifact,
        dimensions: usize,
    ) -> Result<Self, ProgramError> {
        let check_arity = |offset: &Vec<i32>| -> Result<(), ProgramError> {
            if offset.len() == dimensions {
                Ok(())
            } else {
                Err(ProgramError::WrongArity {
                    program_id: artifact.program_id.clone(),
                    expected: dimensions,
                    got: offset.len(),
                })
            }
        };

        check_arity(&artifact.entry_point)?;
        let mut placements = Vec::with_capacity(artifact.placements.len());
        for placement in &artifact.placements {
            check_arity(&placement.offset)?;
            placements.push((placement.offset.clone(), Molecule::from_raw(placement.molecule)));
        }
        let mut labels = BTreeMap::new();
        for (label, offset) in &artifact.labels {
            check_arity(offset)?;
            labels.insert(label.clone(), offset.clone());
        }
        let mut source_map = Vec::with_capacity(artifact.source_map.len());
        for span in &artifact.source_map {
            check_arity(&span.offset)?;
            source_map.push(SourceLocation {
                offset: span.offset.clone(),
                file: span.file.clone(),
                line: span.line,
                column: span.column,
            });
        }
        Ok(Self {
            program_id: artifact.program_id.clone(),
            name: artifact.name.clone(),
            entry_point: artifact.entry_point.clone(),
            placements,
            labels,
            source_map,
        })
    }

    /// Serializes back into the schema form.
    #[must_use]
    pub fn to_schema(&self) -> evochora_schema::ProgramArtifact {
        evochora_schema::ProgramArtifact {
            program_id: self.program_id.clone(),
            name: self.name.clone(),
            entry_point: self.entry_point.clone(),
            placements: self
                .placements
                .iter()
                .map(|(offset, molecule)| evochora_schema::Placement {
                    offset: offset.clone(),
                    molecule: molecule.raw(),
                })
                .collect(),
            labels: self.labels.clone(),
            source_map: self
                .source_map
                .iter()
                .map(|loc| evochora_schema::SourceSpan {
                    offset: loc.offset.clone(),
                    file: loc.file.clone(),
                    line: loc.line,
                    column: loc.column,
                })
                .collect(),
        }
    }

    /// Writes the program body into the grid at `origin`, owned by `owner`.
    pub fn place_at(
        &self,
        grid: &mut Grid,
        origin: &[i32],
        owner: OwnerId,
    ) -> Result<(), ProgramError> {
        for (offset, molecule) in &self.placements {
            let target = grid
                .props()
                .step(origin, offset)
                .ok_or_else(|| ProgramError::PlacementOutOfBounds {
                    program_id: self.program_id.clone(),
                    offset: offset.clone(),
                })?;
            grid.set_by_coord(&target, *molecule, owner);
        }
        Ok(())
    }

    /// Builds a validated program table from schema artifacts.
    pub fn table_from_schema(
        artifacts: &[evochora_schema::ProgramArtifact],
        dimensions: usize,
    ) -> Result<BTreeMap<String, Self>, ProgramError> {
        let mut table = BTreeMap::new();
        for artifact in artifacts {
            let runtime = Self::from_schema(artifact, dimensions)?;
            if table.insert(runtime.program_id.clone(), runtime).is_some() {
                return Err(ProgramError::DuplicateProgramId(artifact.program_id.clone()));
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvironmentProperties, LabelMatchPolicy};
    use crate::molecule::MoleculeKind;

    fn schema_artifact() -> evochora_schema::ProgramArtifact {
        evochora_schema::ProgramArtifact {
            program_id: "p1".into(),
            name: "seed".into(),
            entry_point: vec![0, 0],
            placements: vec![
                evochora_schema::Placement {
                    offset: vec![0, 0],
                    molecule: Molecule::new(MoleculeKind::Code, 1).raw(),
                },
                evochora_schema::Placement {
                    offset: vec![0, 1],
                    molecule: Molecule::new(MoleculeKind::Data, 42).raw(),
                },
            ],
            labels: BTreeMap::from([("start".to_string(), vec![0, 0])]),
            source_map: vec![evochora_schema::SourceSpan {
                offset: vec![0, 0],
                file: "seed.evo".into(),
                line: 1,
                column: 1,
            }],
        }
    }

    #[test]
    fn schema_round_trip_preserves_every_field() {
        let schema = schema_artifact();
        let runtime = match ProgramArtifact::from_schema(&schema, 2) {
            Ok(a) => a,
            Err(e) => unreachable!("valid artifact rejected: {e}"),
        };
        assert_eq!(runtime.to_schema(), schema);
    }

    #[test]
    fn arity_mismatches_are_rejected() {
        let schema = schema_artifact();
        assert!(matches!(
            ProgramArtifact::from_schema(&schema, 3),
            Err(ProgramError::WrongArity { .. })
        ));
    }

    #[test]
    fn placement_writes_the_body_under_the_owner() {
        let props = match EnvironmentProperties::new(vec![4, 4], false, LabelMatchPolicy::Exact) {
            Ok(p) => p,
            Err(e) => unreachable!("valid shape rejected: {e}"),
        };
        let mut grid = Grid::new(props);
        let runtime = match ProgramArtifact::from_schema(&schema_artifact(), 2) {
            Ok(a) => a,
            Err(e) => unreachable!("valid artifact rejected: {e}"),
        };
        assert!(runtime.place_at(&mut grid, &[1, 1], 7).is_ok());
        let cell = grid.cell_at(&[1, 2]);
        assert_eq!(cell.map(|c| c.owner), Some(7));
        assert_eq!(
            cell.map(|c| c.molecule.value()),
            Some(42)
        );

        // Out-of-bounds origin on a bounded grid fails placement.
        assert!(matches!(
            runtime.place_at(&mut grid, &[3, 3], 7),
            Err(ProgramError::PlacementOutOfBounds { .. })
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected_in_table_form() {
        let a = schema_artifact();
        let b = schema_artifact();
        assert!(matches!(
            ProgramArtifact::table_from_schema(&[a, b], 2),
            Err(ProgramError::DuplicateProgramId(_))
        ));
    }
}
