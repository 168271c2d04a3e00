//! Envelope aggregation across historical datasets
//!
//! Rows are fetched per dataset on a bounded worker pool, then folded into
//! per-column upper/lower sequences by a single reducer. A dataset whose
//! backing table cannot be read is retried, then skipped; the computation
//! fails only when every contributing dataset fails.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use rayon::prelude::*;

use super::{AggregationMode, ColumnEnvelope, EnvelopeResult, SamplingMethod};
use crate::bucket::BucketLayout;
use crate::catalog::DatasetDescriptor;
use crate::data::{ColumnSchema, Frame, TimeRange};
use crate::store::ColumnStore;
use crate::{CorridorError, Result};

/// Running (max, min) per column per axis entry; `None` until the first
/// contributing value
type BoundsAcc = Option<(f64, f64)>;

/// Folds rows from N historical datasets into one envelope
pub struct EnvelopeAggregator<'a> {
    store: &'a dyn ColumnStore,
    pool: &'a rayon::ThreadPool,
    retries: u32,
}

impl<'a> EnvelopeAggregator<'a> {
    pub fn new(store: &'a dyn ColumnStore, pool: &'a rayon::ThreadPool, retries: u32) -> Self {
        Self {
            store,
            pool,
            retries,
        }
    }

    /// Compute the envelope for `columns` across `datasets`.
    pub fn aggregate(
        &self,
        datasets: &[DatasetDescriptor],
        schema: &ColumnSchema,
        columns: &[String],
        mode: AggregationMode,
        resolution: usize,
    ) -> Result<EnvelopeResult> {
        if datasets.is_empty() {
            return Err(CorridorError::NoHistoricalData);
        }

        let frames: Vec<Frame> = self
            .pool
            .install(|| {
                datasets
                    .par_iter()
                    .map(|dataset| self.fetch_one(dataset, schema, columns))
                    .collect::<Vec<Option<Frame>>>()
            })
            .into_iter()
            .flatten()
            .collect();

        let skipped = datasets.len() - frames.len();
        if frames.is_empty() {
            return Err(CorridorError::StoreUnavailable(format!(
                "all {} historical datasets failed to load",
                datasets.len()
            )));
        }
        if skipped > 0 {
            log::warn!(
                "envelope computed from {} of {} historical datasets",
                frames.len(),
                datasets.len()
            );
        }

        match mode {
            AggregationMode::Bucketed => self.bucketed(&frames, columns, resolution),
            AggregationMode::FullResolution => self.full_resolution(&frames, columns),
        }
    }

    /// Fetch one dataset's rows, retrying at single-dataset granularity.
    /// Returns `None` after the final attempt so the caller can skip it.
    fn fetch_one(
        &self,
        dataset: &DatasetDescriptor,
        schema: &ColumnSchema,
        columns: &[String],
    ) -> Option<Frame> {
        let attempts = self.retries + 1;
        for attempt in 1..=attempts {
            match self.store.query(
                &dataset.table_name,
                &schema.time_column,
                Some(columns),
                None,
                None,
            ) {
                Ok(frame) => return Some(frame),
                Err(err) => log::warn!(
                    "fetch of dataset {} (`{}`) failed, attempt {attempt}/{attempts}: {err}",
                    dataset.id,
                    dataset.table_name
                ),
            }
        }
        None
    }

    /// Bucketed mode: one layout over the combined time values of all
    /// datasets; per bucket, per column, max/min across all rows. Buckets
    /// with no rows at all are dropped; a column with no rows in an emitted
    /// bucket is zero-filled.
    fn bucketed(
        &self,
        frames: &[Frame],
        columns: &[String],
        resolution: usize,
    ) -> Result<EnvelopeResult> {
        let total_rows: usize = frames.iter().map(Frame::len).sum();
        let mut all_times = Vec::with_capacity(total_rows);
        for frame in frames {
            all_times.extend_from_slice(&frame.time);
        }
        let layout = BucketLayout::build(&all_times, resolution).ok_or_else(|| {
            CorridorError::Validation("historical datasets contain no rows".to_string())
        })?;

        let buckets = layout.bucket_count();
        let mut time_sum = vec![0.0f64; buckets];
        let mut time_count = vec![0usize; buckets];
        let mut bounds: Vec<Vec<BoundsAcc>> = vec![vec![None; buckets]; columns.len()];

        for frame in frames {
            let frame_columns: Vec<Option<&[f64]>> =
                columns.iter().map(|c| frame.column(c)).collect();
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
                    match &mut bounds[ci][bucket] {
                        Some((max, min)) => {
                            if v > *max {
                                *max = v;
                            }
                            if v < *min {
                                *min = v;
                            }
                        }
                        acc @ None => *acc = Some((v, v)),
                    }
                }
            }
        }

        let mut time_points = Vec::new();
        let mut envelope_data: BTreeMap<String, ColumnEnvelope> = columns
            .iter()
            .map(|c| {
                (
                    c.clone(),
                    ColumnEnvelope {
                        upper: Vec::new(),
                        lower: Vec::new(),
                    },
                )
            })
            .collect();

        for bucket in 0..buckets {
            if time_count[bucket] == 0 {
                continue;
            }
            time_points.push(time_sum[bucket] / time_count[bucket] as f64);
            for (ci, column) in columns.iter().enumerate() {
                let (upper, lower) = bounds[ci][bucket].unwrap_or((0.0, 0.0));
                if let Some(envelope) = envelope_data.get_mut(column) {
                    envelope.upper.push(upper);
                    envelope.lower.push(lower);
                }
            }
        }

        Ok(EnvelopeResult {
            sampling_points: time_points.len(),
            time_points,
            envelope_data,
            data_count: frames.len(),
            sampling_method: SamplingMethod::TimeInterval,
            original_points: total_rows,
            time_range: TimeRange {
                min: layout.time_min(),
                max: layout.time_max(),
            },
        })
    }

    /// Full-resolution mode: group by exact time value across datasets.
    /// Per-dataset partial reductions are merged by a single reducer; the
    /// axis carries one entry per distinct time value, ascending.
    fn full_resolution(&self, frames: &[Frame], columns: &[String]) -> Result<EnvelopeResult> {
        let partials: Vec<BTreeMap<OrderedFloat<f64>, Vec<BoundsAcc>>> = self
            .pool
            .install(|| {
                frames
                    .par_iter()
                    .map(|frame| reduce_exact(frame, columns))
                    .collect()
            });

        let mut merged: BTreeMap<OrderedFloat<f64>, Vec<BoundsAcc>> = BTreeMap::new();
        for partial in partials {
            for (t, partial_bounds) in partial {
                match merged.entry(t) {
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        slot.insert(partial_bounds);
                    }
                    std::collections::btree_map::Entry::Occupied(mut slot) => {
                        for (acc, incoming) in slot.get_mut().iter_mut().zip(partial_bounds) {
                            *acc = combine(*acc, incoming);
                        }
                    }
                }
            }
        }

        if merged.is_empty() {
            return Err(CorridorError::Validation(
                "historical datasets contain no rows".to_string(),
            ));
        }

        let total_rows: usize = frames.iter().map(Frame::len).sum();
        let time_points: Vec<f64> = merged.keys().map(|t| t.into_inner()).collect();
        let time_range = TimeRange {
            min: time_points[0],
            max: time_points[time_points.len() - 1],
        };

        let mut envelope_data: BTreeMap<String, ColumnEnvelope> = BTreeMap::new();
        for (ci, column) in columns.iter().enumerate() {
            let mut upper = Vec::with_capacity(time_points.len());
            let mut lower = Vec::with_capacity(time_points.len());
            for per_column in merged.values() {
                let (max, min) = per_column[ci].unwrap_or((0.0, 0.0));
                upper.push(max);
                lower.push(min);
            }
            envelope_data.insert(column.clone(), ColumnEnvelope { upper, lower });
        }

        Ok(EnvelopeResult {
            sampling_points: time_points.len(),
            time_points,
            envelope_data,
            data_count: frames.len(),
            sampling_method: SamplingMethod::FullData,
            original_points: total_rows,
            time_range,
        })
    }
}

/// Per-dataset partial reduction: (max, min) per column keyed by exact time
fn reduce_exact(
    frame: &Frame,
    columns: &[String],
) -> BTreeMap<OrderedFloat<f64>, Vec<BoundsAcc>> {
    let frame_columns: Vec<Option<&[f64]>> = columns.iter().map(|c| frame.column(c)).collect();
    let mut partial: BTreeMap<OrderedFloat<f64>, Vec<BoundsAcc>> = BTreeMap::new();
    for (row, &t) in frame.time.iter().enumerate() {
        if t.is_nan() {
            continue;
        }
        let per_column = partial
            .entry(OrderedFloat(t))
            .or_insert_with(|| vec![None; columns.len()]);
        for (ci, values) in frame_columns.iter().enumerate() {
            let Some(values) = values else { continue };
            let v = values[row];
            if v.is_nan() {
                continue;
            }
            per_column[ci] = combine(per_column[ci], Some((v, v)));
        }
    }
    partial
}

fn combine(a: BoundsAcc, b: BoundsAcc) -> BoundsAcc {
    match (a, b) {
        (Some((amax, amin)), Some((bmax, bmin))) => Some((amax.max(bmax), amin.min(bmin))),
        (Some(bounds), None) | (None, Some(bounds)) => Some(bounds),
        (None, None) => None,
    }
}
