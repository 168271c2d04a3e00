//! Corridor - envelope computation and comparison engine
//!
//! Ingests repeated time-series measurement runs ("datasets"), each a table
//! of one time column plus several numeric sensor columns, and computes an
//! envelope: the pointwise (or time-bucketed) maximum and minimum observed
//! across all runs marked historical, aligned on a common time axis. Newly
//! uploaded candidate runs are staged, sampled with the same bucketing and
//! compared against the cached envelope before being promoted or discarded.

pub mod bucket;
pub mod cache;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod data;
pub mod engine;
pub mod envelope;
pub mod ingest;
pub mod store;

// Re-export main types
pub use cache::{MemoryResultCache, ResultCache};
pub use catalog::{DatasetDescriptor, DatasetStatus, MemoryCatalog, MetadataCatalog, NewDataset};
pub use compare::{ComparisonResult, SampledSeries, StagedUpload};
pub use config::EngineConfig;
pub use data::{ColumnSchema, Frame, TimeRange};
pub use engine::{CorridorEngine, DatasetStatistics};
pub use envelope::{AggregationMode, ColumnEnvelope, EnvelopeRequest, EnvelopeResult, SamplingMethod};
pub use store::{ColumnStore, MemoryStore};

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum CorridorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("schema mismatch, missing columns: {}", .missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no datasets are marked historical")]
    NoHistoricalData,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableExists(String),

    #[error("promotion left inconsistent state: {0}")]
    PromotionInconsistency(String),

    #[error("ingest left inconsistent state: {0}")]
    IngestInconsistency(String),

    #[error("engine initialization failed: {0}")]
    Initialization(String),
}

pub type Result<T> = std::result::Result<T, CorridorError>;
