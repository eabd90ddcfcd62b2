// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Run metadata: the authoritative record written once per run.
//!
//! Metadata is the resume anchor: it carries the initial seed, the resolved
//! engine configuration (as the JSON string the pipeline resolved it to),
//! the compiled program artifacts, and the environment geometry. The engine
//! never invokes the compiler; on resume it rebuilds its program table from
//! the artifacts stored here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One molecule placed at an offset relative to a program's origin.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    /// Offset from the program origin, one component per grid dimension.
    pub offset: Vec<i32>,
    /// Packed molecule written at that offset.
    pub molecule: i32,
}

/// A source-map entry linking a placed molecule back to assembly source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpan {
    /// Offset from the program origin.
    pub offset: Vec<i32>,
    /// Source file the molecule was assembled from.
    pub file: String,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

/// Compiler output for one program, as persisted in run metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramArtifact {
    /// Stable artifact id organisms reference via `program_id`.
    pub program_id: String,
    /// Human-readable program name.
    pub name: String,
    /// Entry-point offset from the program origin.
    pub entry_point: Vec<i32>,
    /// Every placed molecule of the assembled program body.
    pub placements: Vec<Placement>,
    /// Label symbol table: label name to offset.
    pub labels: BTreeMap<String, Vec<i32>>,
    /// Source map for placed molecules.
    pub source_map: Vec<SourceSpan>,
}

/// Environment geometry subsection of the metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentMetadata {
    /// Grid shape, one extent per dimension.
    pub shape: Vec<i32>,
    /// Whether the grid wraps toroidally.
    pub toroidal: bool,
}

/// The per-run metadata blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Run id this metadata describes; loaders verify it matches the request.
    pub simulation_run_id: String,
    /// Seed the run's RNG provider was created from.
    pub initial_seed: i64,
    /// Wall-clock start time in milliseconds since the epoch.
    pub start_time_ms: i64,
    /// The fully resolved engine configuration as a JSON document.
    pub resolved_config_json: String,
    /// Compiled program artifacts available to organisms in this run.
    pub programs: Vec<ProgramArtifact>,
    /// Environment geometry.
    pub environment: EnvironmentMetadata,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_cbor() {
        let meta = SimulationMetadata {
            simulation_run_id: "run-7".into(),
            initial_seed: -42,
            start_time_ms: 1_700_000_000_000,
            resolved_config_json: r#"{"environment":{"shape":[8,8],"toroidal":true}}"#.into(),
            programs: vec![ProgramArtifact {
                program_id: "prog-1".into(),
                name: "seed".into(),
                entry_point: vec![0, 0],
                placements: vec![Placement {
                    offset: vec![0, 0],
                    molecule: 0x1000_0001,
                }],
                labels: BTreeMap::from([("start".to_string(), vec![0, 0])]),
                source_map: Vec::new(),
            }],
            environment: EnvironmentMetadata {
                shape: vec![8, 8],
                toroidal: true,
            },
        };
        let mut buf = Vec::new();
        ciborium::into_writer(&meta, &mut buf).unwrap();
        let back: SimulationMetadata = ciborium::from_reader(buf.as_slice()).unwrap();
        assert_eq!(back, meta);
    }
}
