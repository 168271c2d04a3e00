//! Engine facade
//!
//! Wires an injected column store, metadata catalog and result cache into
//! the operations exposed to callers: envelope computation, candidate
//! staging/comparison, promotion, discard and dataset management. One
//! computation runs per inbound call; per-dataset fetches are spread over a
//! bounded worker pool.


use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{fingerprint, ResultCache};
use crate::catalog::{DatasetStatus, MetadataCatalog, NewDataset};
use crate::compare::{sample_series, ComparisonResult, StagedUpload, StagingRegistry};
use crate::config::EngineConfig;
use crate::data::{normalize_columns, ColumnSchema, Frame, TimeRange};
use crate::envelope::{AggregationMode, EnvelopeAggregator, EnvelopeRequest, EnvelopeResult};
use crate::ingest;
use crate::store::{is_staging_table, ColumnStore};
use crate::{CorridorError, Result};

/// Dataset counts for one collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetStatistics {
    /// Active datasets
    pub total_datasets: usize,
    /// Active datasets marked historical
    pub historical_datasets: usize,
    /// Rows across all active datasets
    pub total_rows: u64,
}

/// The envelope computation and comparison engine
pub struct CorridorEngine {
    store: Arc<dyn ColumnStore>,
    catalog: Arc<dyn MetadataCatalog>,
    cache: Arc<dyn ResultCache>,
    config: EngineConfig,
    pool: rayon::ThreadPool,
    staging: StagingRegistry,
}

impl CorridorEngine {
    /// Create an engine over the given collaborators
    pub fn new(
        store: Arc<dyn ColumnStore>,
        catalog: Arc<dyn MetadataCatalog>,
        cache: Arc<dyn ResultCache>,
        config: EngineConfig,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.fetch_concurrency.max(1))
            .build()
            .map_err(|e| CorridorError::Initialization(e.to_string()))?;
        Ok(Self {
            store,
            catalog,
            cache,
            config,
            pool,
            staging: StagingRegistry::new(),
        })
    }

    /// Compute (or serve from cache) the envelope of all historical
    /// datasets of a collection for the selected columns.
    pub fn compute_envelope(
        &self,
        collection_id: u64,
        columns: &[String],
        request: &EnvelopeRequest,
    ) -> Result<EnvelopeResult> {
        let columns = normalize_columns(columns)?;
        let schema = self.catalog.get_column_schema(collection_id)?;
        for column in &columns {
            if !schema.data_columns.contains(column) {
                return Err(CorridorError::Validation(format!(
                    "unknown column `{column}`"
                )));
            }
        }

        let datasets = self.catalog.list_historical_datasets(collection_id)?;
        if datasets.is_empty() {
            return Err(CorridorError::NoHistoricalData);
        }
        let dataset_ids: Vec<u64> = datasets.iter().map(|d| d.id).collect();

        let resolution = request
            .resolution
            .unwrap_or(self.config.default_resolution);
        let fp = fingerprint(&columns, request.mode, resolution);
        if let Some(hit) = self.cache.get(collection_id, &fp, &dataset_ids) {
            log::info!("envelope for collection {collection_id} served from cache");
            return Ok(hit);
        }

        let aggregator =
            EnvelopeAggregator::new(self.store.as_ref(), &self.pool, self.config.fetch_retries);
        let result = aggregator.aggregate(
            &datasets,
            &schema,
            &columns,
            request.mode,
            resolution,
        )?;
        self.cache.put(
            collection_id,
            &fp,
            &dataset_ids,
            result.clone(),
            self.config.cache_ttl,
        );
        Ok(result)
    }

    /// Stage a candidate upload for comparison. The rows are validated and
    /// cleaned, then written to a staging-namespaced table; no catalog
    /// entry is created until promotion.
    pub fn stage_comparison_upload(
        &self,
        collection_id: u64,
        frame: &Frame,
    ) -> Result<StagedUpload> {
        let schema = self.catalog.get_column_schema(collection_id)?;
        ingest::validate_frame(frame, &schema)?;
        let clean = ingest::clean_frame(frame, &schema);
        if clean.is_empty() {
            return Err(CorridorError::Validation(
                "no usable rows after cleaning".to_string(),
            ));
        }

        let staging_id = self.staging.next_staging_id(collection_id);
        ingest::persist_frame(self.store.as_ref(), &staging_id, &schema, &clean)?;

        let upload = StagedUpload {
            staging_id: staging_id.clone(),
            collection_id,
            row_count: clean.len(),
            columns: schema.data_columns.clone(),
            time_range: clean
                .time_range()
                .unwrap_or(TimeRange { min: 0.0, max: 0.0 }),
        };
        self.staging.insert(upload.clone());
        log::info!(
            "staged {} rows for collection {collection_id} as `{staging_id}`",
            clean.len()
        );
        Ok(upload)
    }

    /// Compare a staged candidate against the historical envelope. The
    /// candidate is reduced with the same bucket layout algorithm and the
    /// same resolution, so both series share a comparable axis.
    pub fn compare_to_envelope(
        &self,
        staging_id: &str,
        columns: &[String],
        request: &EnvelopeRequest,
    ) -> Result<ComparisonResult> {
        let staged = self
            .staging
            .get(staging_id)
            .ok_or_else(|| CorridorError::NotFound(format!("staging id `{staging_id}`")))?;

        let envelope = self.compute_envelope(staged.collection_id, columns, request)?;

        let schema = self.catalog.get_column_schema(staged.collection_id)?;
        let columns = normalize_columns(columns)?;
        let frame = self.store.query(
            staging_id,
            &schema.time_column,
            Some(&columns),
            None,
            None,
        )?;
        let target = match request.mode {
            AggregationMode::Bucketed => Some(
                request
                    .resolution
                    .unwrap_or(self.config.default_resolution),
            ),
            AggregationMode::FullResolution => None,
        };
        let comparison = sample_series(&frame, &columns, target);

        Ok(ComparisonResult {
            envelope,
            comparison,
        })
    }

    /// Promote a staged candidate to a permanent dataset: rename the table
    /// out of the staging namespace, then register the catalog record.
    ///
    /// The staging entry is claimed up front, so concurrent promotions of
    /// the same id are excluded and a second call gets `NotFound`. When the
    /// catalog write fails the rename is compensated; a failed compensation
    /// surfaces as `PromotionInconsistency` for a reconciliation pass.
    pub fn promote_staged(&self, staging_id: &str, name: &str) -> Result<u64> {
        if !is_staging_table(staging_id) {
            return Err(CorridorError::Validation(format!(
                "`{staging_id}` is not a staging id"
            )));
        }
        let staged = self
            .staging
            .claim(staging_id)
            .ok_or_else(|| CorridorError::NotFound(format!("staging id `{staging_id}`")))?;

        // Verify the staged table is still readable before touching anything
        let row_count =
            match self.store.raw_query(&format!("SELECT count() FROM `{staging_id}`")) {
                Ok(rows) => rows
                    .first()
                    .and_then(|row| row.get("count"))
                    .copied()
                    .unwrap_or(staged.row_count as f64) as u64,
                Err(err) => {
                    self.staging.restore(staged);
                    return Err(err);
                }
            };

        let table_name = ingest::permanent_table_name(staged.collection_id, name);
        if let Err(err) = self.store.rename(staging_id, &table_name) {
            self.staging.restore(staged);
            return Err(err);
        }

        match self.catalog.register_dataset(NewDataset {
            collection_id: staged.collection_id,
            name: name.to_string(),
            table_name: table_name.clone(),
            row_count,
            historical: false,
        }) {
            Ok(dataset_id) => {
                log::info!(
                    "promoted `{staging_id}` to dataset {dataset_id} (`{table_name}`, {row_count} rows)"
                );
                Ok(dataset_id)
            }
            Err(err) => {
                // The rename is not yet durable without a catalog record;
                // move the table back so the staged upload stays retryable
                if let Err(undo) = self.store.rename(&table_name, staging_id) {
                    return Err(CorridorError::PromotionInconsistency(format!(
                        "catalog registration failed ({err}) and store rename-back \
                         failed ({undo}); table `{table_name}` has no catalog record"
                    )));
                }
                self.staging.restore(staged);
                Err(err)
            }
        }
    }

    /// Discard a staged candidate. Idempotent: unknown staging ids and
    /// already-dropped tables are not errors.
    pub fn discard_staged(&self, staging_id: &str) -> Result<()> {
        if !is_staging_table(staging_id) {
            return Err(CorridorError::Validation(format!(
                "`{staging_id}` is not a staging id"
            )));
        }
        self.staging.remove(staging_id);
        self.store.drop_table(staging_id)?;
        log::info!("discarded staged table `{staging_id}`");
        Ok(())
    }

    /// Ingest a parsed run as a permanent dataset
    pub fn ingest_dataset(&self, collection_id: u64, name: &str, frame: &Frame) -> Result<u64> {
        ingest::ingest_dataset(
            self.store.as_ref(),
            self.catalog.as_ref(),
            collection_id,
            name,
            frame,
        )
    }

    /// Read rows of a registered dataset
    pub fn fetch_dataset(
        &self,
        dataset_id: u64,
        columns: Option<&[String]>,
        time_range: Option<(f64, f64)>,
        limit: Option<usize>,
    ) -> Result<Frame> {
        let dataset = self.catalog.get_dataset(dataset_id)?;
        if dataset.status == DatasetStatus::Deleted {
            return Err(CorridorError::NotFound(format!(
                "dataset {dataset_id} is deleted"
            )));
        }
        let schema = self.catalog.get_column_schema(dataset.collection_id)?;
        self.store.query(
            &dataset.table_name,
            &schema.time_column,
            columns,
            time_range,
            limit,
        )
    }

    /// Flip a dataset's historical flag; cached envelopes keyed on the old
    /// historical set stop matching implicitly
    pub fn mark_historical(&self, dataset_id: u64, historical: bool) -> Result<()> {
        self.catalog.mark_historical(dataset_id, historical)
    }

    /// Logically delete a dataset; the backing store table is kept
    pub fn delete_dataset(&self, dataset_id: u64) -> Result<()> {
        self.catalog.mark_deleted(dataset_id)
    }

    /// Dataset counts for a collection
    pub fn dataset_statistics(&self, collection_id: u64) -> Result<DatasetStatistics> {
        // Resolve the collection first so unknown ids surface as NotFound
        self.catalog.get_column_schema(collection_id)?;
        let datasets = self.catalog.list_datasets(collection_id)?;
        let active: Vec<_> = datasets
            .iter()
            .filter(|d| d.status == DatasetStatus::Active)
            .collect();
        Ok(DatasetStatistics {
            total_datasets: active.len(),
            historical_datasets: active.iter().filter(|d| d.historical).count(),
            total_rows: active.iter().map(|d| d.row_count).sum(),
        })
    }

    /// Column configuration of a collection
    pub fn column_schema(&self, collection_id: u64) -> Result<ColumnSchema> {
        self.catalog.get_column_schema(collection_id)
    }
}
