//! Comparison staging pipeline
//!
//! Candidate uploads are staged into a temporary store table with no catalog
//! entry, sampled against the historical envelope on a comparable time axis,
//! and either promoted to a permanent dataset or discarded. The staging id
//! doubles as the staged table name.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bucket::BucketLayout;
use crate::data::{Frame, TimeRange};
use crate::envelope::{EnvelopeResult, SamplingMethod};
use crate::store::STAGING_PREFIX;

/// A staged candidate dataset awaiting comparison, promotion or discard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedUpload {
    /// Staging id; also the staged table's name
    pub staging_id: String,
    /// Collection the candidate belongs to
    pub collection_id: u64,
    /// Rows persisted after cleaning
    pub row_count: usize,
    /// Data columns available for comparison
    pub columns: Vec<String>,
    /// Time span of the staged rows
    pub time_range: TimeRange,
}

/// Candidate series reduced onto a time axis comparable with the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledSeries {
    /// Time axis, ascending
    pub time_points: Vec<f64>,
    /// Per-column values, parallel to the axis
    pub data: BTreeMap<String, Vec<f64>>,
    /// How the candidate was reduced
    pub sampling_method: SamplingMethod,
    /// Axis entries after sampling
    pub sampling_points: usize,
    /// Rows before sampling
    pub original_points: usize,
    /// Span of the axis
    pub time_range: TimeRange,
}

/// Historical envelope plus the staged candidate, on comparable axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub envelope: EnvelopeResult,
    pub comparison: SampledSeries,
}

/// Registry of staged tables.
///
/// Claiming an entry for promotion removes it under the lock, which makes
/// promotion single-owner: a concurrent promote of the same staging id
/// observes a missing entry.
#[derive(Default)]
pub struct StagingRegistry {
    entries: Mutex<HashMap<String, StagedUpload>>,
    seq: AtomicU64,
}

impl StagingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh staging id under the staging namespace
    pub fn next_staging_id(&self, collection_id: u64) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{STAGING_PREFIX}{collection_id}_{seq}")
    }

    /// Record a staged upload
    pub fn insert(&self, upload: StagedUpload) {
        self.entries
            .lock()
            .insert(upload.staging_id.clone(), upload);
    }

    /// Look up a staged upload without claiming it
    pub fn get(&self, staging_id: &str) -> Option<StagedUpload> {
        self.entries.lock().get(staging_id).cloned()
    }

    /// Claim a staged upload for promotion, removing it from the registry
    pub fn claim(&self, staging_id: &str) -> Option<StagedUpload> {
        self.entries.lock().remove(staging_id)
    }

    /// Put a claimed upload back after a failed, retryable promotion
    pub fn restore(&self, upload: StagedUpload) {
        self.insert(upload);
    }

    /// Forget a staged upload; missing ids are ignored
    pub fn remove(&self, staging_id: &str) {
        self.entries.lock().remove(staging_id);
    }

    /// Number of staged uploads
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if nothing is staged
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Reduce a candidate frame with the shared bucket layout algorithm.
///
/// With `target` set and fewer rows than the target, or with `target`
/// absent, the rows pass through unsampled (`full_data`). Otherwise each
/// bucket reports the arithmetic mean per column, the bucket center is the
/// mean time, and a column with no finite value in a bucket reports `0.0`.
pub fn sample_series(frame: &Frame, columns: &[String], target: Option<usize>) -> SampledSeries {
    let original_points = frame.len();
    let sampled = target.filter(|&t| original_points > t);

    let Some(target) = sampled else {
        let data: BTreeMap<String, Vec<f64>> = columns
            .iter()
            .map(|c| (c.clone(), frame.column(c).unwrap_or_default().to_vec()))
            .collect();
        let time_range = frame
            .time_range()
            .unwrap_or(TimeRange { min: 0.0, max: 0.0 });
        return SampledSeries {
            time_points: frame.time.clone(),
            data,
            sampling_method: SamplingMethod::FullData,
            sampling_points: original_points,
            original_points,
            time_range,
        };
    };

    let Some(layout) = BucketLayout::build(&frame.time, target) else {
        return SampledSeries {
            time_points: Vec::new(),
            data: columns
                .iter()
                .map(|c| (c.clone(), Vec::new()))
                .collect(),
            sampling_method: SamplingMethod::TimeInterval,
            sampling_points: 0,
            original_points,
            time_range: TimeRange { min: 0.0, max: 0.0 },
        };
    };

    let buckets = layout.bucket_count();
    let mut time_sum = vec![0.0f64; buckets];
    let mut time_count = vec![0usize; buckets];
    // Per column: (sum, count) of finite values per bucket
    let mut sums: Vec<Vec<(f64, usize)>> = vec![vec![(0.0, 0); buckets]; columns.len()];
    let frame_columns: Vec<Option<&[f64]>> = columns.iter().map(|c| frame.column(c)).collect();

    for (row, &t) in frame.time.iter().enumerate() {
        if t.is_nan() {
            continue;
        }
        let bucket = layout.index_of(t);
        time_sum[bucket] += t;
        time_count[bucket] += 1;
        for (ci, values) in frame_columns.iter().enumerate() {
            let Some(values) = values else { continue };
            let v = values[row];
            if v.is_nan() {
                continue;
            }
            let (sum, count) = &mut sums[ci][bucket];
            *sum += v;
            *count += 1;
        }
    }

    let mut time_points = Vec::new();
    let mut data: BTreeMap<String, Vec<f64>> = columns
        .iter()
        .map(|c| (c.clone(), Vec::new()))
        .collect();
    for bucket in 0..buckets {
        if time_count[bucket] == 0 {
            continue;
        }
        time_points.push(time_sum[bucket] / time_count[bucket] as f64);
        for (ci, column) in columns.iter().enumerate() {
            let (sum, count) = sums[ci][bucket];
            let mean = if count > 0 { sum / count as f64 } else { 0.0 };
            if let Some(series) = data.get_mut(column) {
                series.push(mean);
            }
        }
    }

    SampledSeries {
        sampling_points: time_points.len(),
        time_points,
        data,
        sampling_method: SamplingMethod::TimeInterval,
        original_points,
        time_range: TimeRange {
            min: layout.time_min(),
            max: layout.time_max(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(staging_id: &str) -> StagedUpload {
        StagedUpload {
            staging_id: staging_id.to_string(),
            collection_id: 1,
            row_count: 10,
            columns: vec!["C1".to_string()],
            time_range: TimeRange { min: 0.0, max: 1.0 },
        }
    }

    #[test]
    fn test_staging_ids_are_namespaced_and_unique() {
        let registry = StagingRegistry::new();
        let a = registry.next_staging_id(7);
        let b = registry.next_staging_id(7);
        assert!(crate::store::is_staging_table(&a));
        assert_ne!(a, b);
    }

    #[test]
    fn test_claim_is_single_owner() {
        let registry = StagingRegistry::new();
        registry.insert(staged("staged_1_1"));

        assert!(registry.claim("staged_1_1").is_some());
        // Second claim observes the entry gone
        assert!(registry.claim("staged_1_1").is_none());

        // A failed promotion restores the entry for retry
        registry.restore(staged("staged_1_1"));
        assert!(registry.get("staged_1_1").is_some());
    }

    #[test]
    fn test_sample_passthrough_below_target() {
        let frame = Frame::from_columns(
            vec![0.0, 1.0, 2.0],
            vec![("C1", vec![1.0, 2.0, 3.0])],
        );
        let series = sample_series(&frame, &["C1".to_string()], Some(200));
        assert_eq!(series.sampling_method, SamplingMethod::FullData);
        assert_eq!(series.time_points, vec![0.0, 1.0, 2.0]);
        assert_eq!(series.data["C1"], vec![1.0, 2.0, 3.0]);
        assert_eq!(series.sampling_points, 3);
        assert_eq!(series.original_points, 3);
    }

    #[test]
    fn test_sample_reduces_to_bucket_means() {
        let time: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let values = vec![4.0; 1000];
        let frame = Frame::from_columns(time, vec![("C1", values)]);

        let series = sample_series(&frame, &["C1".to_string()], Some(100));
        assert_eq!(series.sampling_method, SamplingMethod::TimeInterval);
        assert_eq!(series.original_points, 1000);
        assert_eq!(series.sampling_points, 100);
        assert!(series.data["C1"].iter().all(|&v| v == 4.0));
        for pair in series.time_points.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_sample_no_target_passes_through() {
        let time: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let frame = Frame::from_columns(time, vec![("C1", vec![1.0; 1000])]);
        let series = sample_series(&frame, &["C1".to_string()], None);
        assert_eq!(series.sampling_method, SamplingMethod::FullData);
        assert_eq!(series.sampling_points, 1000);
    }
}
