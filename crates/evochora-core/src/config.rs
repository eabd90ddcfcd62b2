// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration: environment geometry, capture intervals,
//! parallelism scaling and organism accounting knobs.
//!
//! Everything here is validated at construction. A bad interval, a ragged
//! scaling table or an oversized shape is a [`ConfigError`] and fatal;
//! nothing in the engine re-checks these invariants on hot paths.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An interval that must be strictly positive was zero.
    #[error("interval `{name}` must be positive")]
    NonPositiveInterval {
        /// Name of the offending interval.
        name: &'static str,
    },
    /// The grid shape had no dimensions.
    #[error("grid shape must have at least one dimension")]
    EmptyShape,
    /// A shape extent was zero or negative.
    #[error("grid extent on axis {axis} must be positive, got {extent}")]
    NonPositiveExtent {
        /// Axis index.
        axis: usize,
        /// Offending extent.
        extent: i32,
    },
    /// The total cell count does not fit a signed 32-bit flat index.
    #[error("grid of {total} cells exceeds the signed 32-bit flat index space")]
    GridTooLarge {
        /// Total cell count that overflowed.
        total: u64,
    },
    /// Scaling threshold and thread arrays had different lengths.
    #[error("scaling table arrays differ in length: {thresholds} thresholds vs {threads} thread counts")]
    RaggedScalingTable {
        /// Number of thresholds supplied.
        thresholds: usize,
        /// Number of thread counts supplied.
        threads: usize,
    },
    /// Scaling thresholds were not strictly ascending.
    #[error("scaling thresholds must be strictly ascending")]
    UnsortedScalingThresholds,
    /// Worker pool capacity was zero.
    #[error("worker pool capacity must be at least 1")]
    ZeroCapacity,
    /// The error penalty cost was negative.
    #[error("error penalty cost must be non-negative, got {cost}")]
    NegativePenalty {
        /// Offending cost.
        cost: i64,
    },
}

/// Policy for matching `LABEL` molecules against `LABELREF` operands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelMatchPolicy {
    /// Value and marker field must both match.
    #[default]
    Exact,
    /// Only the value must match; the marker field is ignored.
    IgnoreMarker,
}

/// Geometry and matching rules of the simulation environment.
///
/// Coordinates are row-major: the last axis varies fastest in flat order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentProperties {
    /// Extent per axis.
    pub shape: Vec<i32>,
    /// Whether coordinates wrap around every axis.
    pub toroidal: bool,
    /// Label matching policy used by label-seeking instructions.
    #[serde(default)]
    pub label_match: LabelMatchPolicy,
}

impl EnvironmentProperties {
    /// Validates a shape and builds the properties.
    pub fn new(
        shape: Vec<i32>,
        toroidal: bool,
        label_match: LabelMatchPolicy,
    ) -> Result<Self, ConfigError> {
        if shape.is_empty() {
            return Err(ConfigError::EmptyShape);
        }
        let mut total: u64 = 1;
        for (axis, &extent) in shape.iter().enumerate() {
            if extent <= 0 {
                return Err(ConfigError::NonPositiveExtent { axis, extent });
            }
            total = total.saturating_mul(extent as u64);
        }
        if total > i32::MAX as u64 {
            return Err(ConfigError::GridTooLarge { total });
        }
        Ok(Self {
            shape,
            toroidal,
            label_match,
        })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.shape.len()
    }

    /// Total number of cells; guaranteed to fit `i32`.
    #[must_use]
    pub fn total_cells(&self) -> i32 {
        self.shape.iter().product()
    }

    /// Converts an in-bounds coordinate to its row-major flat index.
    ///
    /// Returns `None` when the coordinate has the wrong arity or any
    /// component is out of bounds.
    #[must_use]
    pub fn coord_to_flat(&self, coord: &[i32]) -> Option<i32> {
        if coord.len() != self.shape.len() {
            return None;
        }
        let mut flat: i64 = 0;
        for (&c, &extent) in coord.iter().zip(&self.shape) {
            if c < 0 || c >= extent {
                return None;
            }
            flat = flat * i64::from(extent) + i64::from(c);
        }
        Some(flat as i32)
    }

    /// Converts a flat index back to its coordinate.
    ///
    /// Returns `None` for indices outside `[0, total_cells)`.
    #[must_use]
    pub fn flat_to_coord(&self, flat: i32) -> Option<Vec<i32>> {
        if flat < 0 || flat >= self.total_cells() {
            return None;
        }
        let mut rest = flat;
        let mut coord = vec![0; self.shape.len()];
        for (slot, &extent) in coord.iter_mut().zip(&self.shape).rev() {
            *slot = rest % extent;
            rest /= extent;
        }
        Some(coord)
    }

    /// Normalizes a possibly out-of-range coordinate.
    ///
    /// Toroidal environments wrap every component; bounded environments
    /// return `None` when any component leaves the grid.
    #[must_use]
    pub fn normalize(&self, coord: &[i32]) -> Option<Vec<i32>> {
        if coord.len() != self.shape.len() {
            return None;
        }
        let mut out = Vec::with_capacity(coord.len());
        for (&c, &extent) in coord.iter().zip(&self.shape) {
            if self.toroidal {
                out.push(c.rem_euclid(extent));
            } else if c < 0 || c >= extent {
                return None;
            } else {
                out.push(c);
            }
        }
        Some(out)
    }

    /// Steps `coord` by `delta` and normalizes the result.
    #[must_use]
    pub fn step(&self, coord: &[i32], delta: &[i32]) -> Option<Vec<i32>> {
        if coord.len() != self.shape.len() || delta.len() != self.shape.len() {
            return None;
        }
        let moved: Vec<i32> = coord
            .iter()
            .zip(delta)
            .map(|(&c, &d)| c.wrapping_add(d))
            .collect();
        self.normalize(&moved)
    }
}

/// Capture intervals for the delta encoder.
///
/// `samples_per_chunk` samples seal a chunk; within a chunk, every
/// `accumulated_delta_interval`-th sample is an accumulated delta and the
/// rest are incremental. `sampling_interval` selects which ticks are
/// sampled at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Samples between accumulated deltas (`A`).
    pub accumulated_delta_interval: u32,
    /// Accumulated-delta groups per snapshot (`S`).
    pub snapshot_interval: u32,
    /// Snapshot groups per chunk (`C`).
    pub chunk_interval: u32,
    /// Ticks between samples.
    pub sampling_interval: u32,
}

impl EncoderConfig {
    /// Validates the four intervals.
    pub fn new(
        accumulated_delta_interval: u32,
        snapshot_interval: u32,
        chunk_interval: u32,
        sampling_interval: u32,
    ) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("accumulated_delta_interval", accumulated_delta_interval),
            ("snapshot_interval", snapshot_interval),
            ("chunk_interval", chunk_interval),
            ("sampling_interval", sampling_interval),
        ] {
            if value == 0 {
                return Err(ConfigError::NonPositiveInterval { name });
            }
        }
        Ok(Self {
            accumulated_delta_interval,
            snapshot_interval,
            chunk_interval,
            sampling_interval,
        })
    }

    /// Samples per snapshot group: `A * S`.
    #[must_use]
    pub fn samples_per_snapshot(self) -> u64 {
        u64::from(self.accumulated_delta_interval) * u64::from(self.snapshot_interval)
    }

    /// Samples per sealed chunk: `A * S * C`.
    #[must_use]
    pub fn samples_per_chunk(self) -> u64 {
        self.samples_per_snapshot() * u64::from(self.chunk_interval)
    }

    /// Returns `true` when `tick` is a sampling tick.
    #[must_use]
    pub fn is_sample_tick(self, tick: u64) -> bool {
        tick % u64::from(self.sampling_interval) == 0
    }
}

/// Per-organism accounting knobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismConfig {
    /// Energy charged for a failure that execute did not already charge.
    pub error_penalty_cost: i64,
    /// Upper bound on cells the post-execute skip may pass over.
    pub max_instant_skip: u32,
}

impl OrganismConfig {
    /// Validates the knobs.
    pub fn new(error_penalty_cost: i64, max_instant_skip: u32) -> Result<Self, ConfigError> {
        if error_penalty_cost < 0 {
            return Err(ConfigError::NegativePenalty {
                cost: error_penalty_cost,
            });
        }
        Ok(Self {
            error_penalty_cost,
            max_instant_skip,
        })
    }
}

impl Default for OrganismConfig {
    fn default() -> Self {
        Self {
            error_penalty_cost: 5,
            max_instant_skip: 64,
        }
    }
}

/// Maps organism-count thresholds to maximum active worker counts.
///
/// For a tick with `m` organisms the highest threshold `<= m` selects the
/// entry; an entry of `0` means "all pool workers". Below the lowest
/// threshold the tick runs sequentially.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingTable {
    thresholds: Vec<u64>,
    max_threads: Vec<u32>,
}

impl ScalingTable {
    /// Builds a table from parallel threshold/thread arrays.
    pub fn new(thresholds: Vec<u64>, max_threads: Vec<u32>) -> Result<Self, ConfigError> {
        if thresholds.len() != max_threads.len() {
            return Err(ConfigError::RaggedScalingTable {
                thresholds: thresholds.len(),
                threads: max_threads.len(),
            });
        }
        if thresholds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::UnsortedScalingThresholds);
        }
        Ok(Self {
            thresholds,
            max_threads,
        })
    }

    /// Active worker count for `organisms` on a pool of `capacity` workers.
    #[must_use]
    pub fn active_for(&self, organisms: usize, capacity: usize) -> usize {
        let m = organisms as u64;
        let mut chosen: Option<u32> = None;
        for (&threshold, &threads) in self.thresholds.iter().zip(&self.max_threads) {
            if threshold <= m {
                chosen = Some(threads);
            } else {
                break;
            }
        }
        match chosen {
            None => 1,
            Some(0) => capacity,
            Some(n) => (n as usize).min(capacity),
        }
    }
}

impl Default for ScalingTable {
    /// All workers at any population.
    fn default() -> Self {
        Self {
            thresholds: vec![0],
            max_threads: vec![0],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(shape: &[i32], toroidal: bool) -> EnvironmentProperties {
        match EnvironmentProperties::new(shape.to_vec(), toroidal, LabelMatchPolicy::Exact) {
            Ok(p) => p,
            Err(e) => unreachable!("valid shape rejected: {e}"),
        }
    }

    #[test]
    fn flat_index_bijection_holds_for_every_cell() {
        let p = props(&[3, 4, 5], false);
        for flat in 0..p.total_cells() {
            let coord = match p.flat_to_coord(flat) {
                Some(c) => c,
                None => unreachable!("in-range flat index rejected"),
            };
            assert_eq!(p.coord_to_flat(&coord), Some(flat));
        }
    }

    #[test]
    fn row_major_order_varies_last_axis_fastest() {
        let p = props(&[2, 3], false);
        assert_eq!(p.coord_to_flat(&[0, 0]), Some(0));
        assert_eq!(p.coord_to_flat(&[0, 1]), Some(1));
        assert_eq!(p.coord_to_flat(&[1, 0]), Some(3));
        assert_eq!(p.flat_to_coord(5), Some(vec![1, 2]));
    }

    #[test]
    fn toroidal_step_wraps_and_bounded_step_stops() {
        let wrap = props(&[4, 4], true);
        assert_eq!(wrap.step(&[3, 0], &[1, -1]), Some(vec![0, 3]));

        let flat = props(&[4, 4], false);
        assert_eq!(flat.step(&[3, 0], &[1, 0]), None);
        assert_eq!(flat.step(&[3, 0], &[0, 1]), Some(vec![3, 1]));
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let err = EnvironmentProperties::new(vec![1 << 16, 1 << 16], false, LabelMatchPolicy::Exact);
        assert!(matches!(err, Err(ConfigError::GridTooLarge { .. })));
    }

    #[test]
    fn encoder_config_rejects_zero_intervals() {
        assert!(EncoderConfig::new(1, 1, 0, 1).is_err());
        let cfg = match EncoderConfig::new(2, 3, 4, 1) {
            Ok(c) => c,
            Err(e) => unreachable!("valid config rejected: {e}"),
        };
        assert_eq!(cfg.samples_per_snapshot(), 6);
        assert_eq!(cfg.samples_per_chunk(), 24);
    }

    #[test]
    fn scaling_table_picks_highest_threshold_at_or_below() {
        let table = match ScalingTable::new(vec![4, 16, 64], vec![2, 4, 0]) {
            Ok(t) => t,
            Err(e) => unreachable!("valid table rejected: {e}"),
        };
        assert_eq!(table.active_for(1, 8), 1);
        assert_eq!(table.active_for(4, 8), 2);
        assert_eq!(table.active_for(20, 8), 4);
        assert_eq!(table.active_for(100, 8), 8);
    }

    #[test]
    fn scaling_table_rejects_ragged_and_unsorted_inputs() {
        assert!(matches!(
            ScalingTable::new(vec![1, 2], vec![1]),
            Err(ConfigError::RaggedScalingTable { .. })
        ));
        assert!(matches!(
            ScalingTable::new(vec![2, 2], vec![1, 1]),
            Err(ConfigError::UnsortedScalingThresholds)
        ));
    }
}
