//! Envelope result types and aggregation
//!
//! An envelope summarizes the spread of multiple historical runs: for each
//! selected column, parallel upper/lower bound sequences aligned on a shared
//! time axis. Two aggregation modes exist; both preserve axis alignment by
//! zero-filling positions where a column has no contributing row.

mod aggregator;

pub use aggregator::EnvelopeAggregator;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::data::TimeRange;

/// Aggregation mode for envelope computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Downsampled over a fixed number of time intervals
    Bucketed,
    /// Keyed by exact observed time values, no downsampling
    FullResolution,
}

/// How a series was reduced onto its time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// Grouped into evenly spaced time intervals
    TimeInterval,
    /// Every observed time value kept
    FullData,
}

/// Parameters for one envelope computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRequest {
    pub mode: AggregationMode,
    /// Interval count for bucketed mode; the engine default applies when
    /// absent. Ignored in full-resolution mode.
    pub resolution: Option<usize>,
}

impl EnvelopeRequest {
    /// Bucketed aggregation at the engine's default resolution
    pub fn bucketed() -> Self {
        Self {
            mode: AggregationMode::Bucketed,
            resolution: None,
        }
    }

    /// Bucketed aggregation at an explicit resolution
    pub fn bucketed_at(resolution: usize) -> Self {
        Self {
            mode: AggregationMode::Bucketed,
            resolution: Some(resolution),
        }
    }

    /// Full-resolution aggregation
    pub fn full_resolution() -> Self {
        Self {
            mode: AggregationMode::FullResolution,
            resolution: None,
        }
    }
}

/// Per-column upper/lower bound sequences, parallel to the result's time axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEnvelope {
    /// Maximum observed value per axis entry
    pub upper: Vec<f64>,
    /// Minimum observed value per axis entry
    pub lower: Vec<f64>,
}

/// Envelope across all historical datasets, aligned on a shared time axis.
///
/// For every column, `upper` and `lower` have exactly one entry per
/// `time_points` entry; positions with no contributing row for that column
/// hold `0.0` for both bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeResult {
    /// Shared time axis, ascending
    pub time_points: Vec<f64>,
    /// Bounds per column
    pub envelope_data: BTreeMap<String, ColumnEnvelope>,
    /// Number of datasets that contributed rows
    pub data_count: usize,
    /// How rows were reduced onto the axis
    pub sampling_method: SamplingMethod,
    /// Entries on the time axis
    pub sampling_points: usize,
    /// Total rows read across contributing datasets
    pub original_points: usize,
    /// Span of the time axis
    pub time_range: TimeRange,
}
