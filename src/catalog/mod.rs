//! Metadata catalog interface
//!
//! Durable registry of dataset descriptors and per-collection column
//! configuration. The engine consumes this interface but does not own the
//! catalog; production deployments back it with their relational store,
//! while [`MemoryCatalog`] serves embedded use and tests.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::ColumnSchema;
use crate::{CorridorError, Result};

/// Lifecycle status of a dataset; deletion is logical and does not drop the
/// backing store table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Active,
    Deleted,
}

/// Registered dataset: one ingested measurement run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub id: u64,
    /// Owning experiment collection
    pub collection_id: u64,
    /// Caller-supplied dataset name
    pub name: String,
    /// Backing store table
    pub table_name: String,
    pub row_count: u64,
    /// Whether the dataset contributes to the historical envelope
    pub historical: bool,
    pub status: DatasetStatus,
}

/// Descriptor fields supplied by the caller at registration
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub collection_id: u64,
    pub name: String,
    pub table_name: String,
    pub row_count: u64,
    pub historical: bool,
}

/// Catalog capability interface consumed by the engine
pub trait MetadataCatalog: Send + Sync {
    /// Active datasets of a collection that are marked historical
    fn list_historical_datasets(&self, collection_id: u64) -> Result<Vec<DatasetDescriptor>>;

    /// All datasets of a collection, any status
    fn list_datasets(&self, collection_id: u64) -> Result<Vec<DatasetDescriptor>>;

    /// Column configuration of a collection
    fn get_column_schema(&self, collection_id: u64) -> Result<ColumnSchema>;

    /// Register a dataset; returns the assigned id
    fn register_dataset(&self, dataset: NewDataset) -> Result<u64>;

    /// Compensation hook: remove a record written by a failed multi-step
    /// operation
    fn unregister_dataset(&self, dataset_id: u64) -> Result<()>;

    /// Fetch one dataset descriptor
    fn get_dataset(&self, dataset_id: u64) -> Result<DatasetDescriptor>;

    /// Flip the historical flag
    fn mark_historical(&self, dataset_id: u64, historical: bool) -> Result<()>;

    /// Logical deletion: the status flips, the store table is kept
    fn mark_deleted(&self, dataset_id: u64) -> Result<()>;
}

#[derive(Default)]
struct CatalogState {
    collections: HashMap<u64, ColumnSchema>,
    datasets: HashMap<u64, DatasetDescriptor>,
    next_id: u64,
}

/// In-memory [`MetadataCatalog`] implementation
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the column configuration for a collection
    pub fn define_collection(&self, collection_id: u64, schema: ColumnSchema) {
        self.state.write().collections.insert(collection_id, schema);
    }
}

impl MetadataCatalog for MemoryCatalog {
    fn list_historical_datasets(&self, collection_id: u64) -> Result<Vec<DatasetDescriptor>> {
        let mut datasets: Vec<DatasetDescriptor> = self
            .state
            .read()
            .datasets
            .values()
            .filter(|d| {
                d.collection_id == collection_id
                    && d.historical
                    && d.status == DatasetStatus::Active
            })
            .cloned()
            .collect();
        datasets.sort_by_key(|d| d.id);
        Ok(datasets)
    }

    fn list_datasets(&self, collection_id: u64) -> Result<Vec<DatasetDescriptor>> {
        let mut datasets: Vec<DatasetDescriptor> = self
            .state
            .read()
            .datasets
            .values()
            .filter(|d| d.collection_id == collection_id)
            .cloned()
            .collect();
        datasets.sort_by_key(|d| d.id);
        Ok(datasets)
    }

    fn get_column_schema(&self, collection_id: u64) -> Result<ColumnSchema> {
        self.state
            .read()
            .collections
            .get(&collection_id)
            .cloned()
            .ok_or_else(|| CorridorError::NotFound(format!("collection {collection_id}")))
    }

    fn register_dataset(&self, dataset: NewDataset) -> Result<u64> {
        let mut state = self.state.write();
        if !state.collections.contains_key(&dataset.collection_id) {
            return Err(CorridorError::NotFound(format!(
                "collection {}",
                dataset.collection_id
            )));
        }
        state.next_id += 1;
        let id = state.next_id;
        state.datasets.insert(
            id,
            DatasetDescriptor {
                id,
                collection_id: dataset.collection_id,
                name: dataset.name,
                table_name: dataset.table_name,
                row_count: dataset.row_count,
                historical: dataset.historical,
                status: DatasetStatus::Active,
            },
        );
        Ok(id)
    }

    fn unregister_dataset(&self, dataset_id: u64) -> Result<()> {
        self.state
            .write()
            .datasets
            .remove(&dataset_id)
            .map(|_| ())
            .ok_or_else(|| CorridorError::NotFound(format!("dataset {dataset_id}")))
    }

    fn get_dataset(&self, dataset_id: u64) -> Result<DatasetDescriptor> {
        self.state
            .read()
            .datasets
            .get(&dataset_id)
            .cloned()
            .ok_or_else(|| CorridorError::NotFound(format!("dataset {dataset_id}")))
    }

    fn mark_historical(&self, dataset_id: u64, historical: bool) -> Result<()> {
        let mut state = self.state.write();
        let dataset = state
            .datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| CorridorError::NotFound(format!("dataset {dataset_id}")))?;
        dataset.historical = historical;
        Ok(())
    }

    fn mark_deleted(&self, dataset_id: u64) -> Result<()> {
        let mut state = self.state.write();
        let dataset = state
            .datasets
            .get_mut(&dataset_id)
            .ok_or_else(|| CorridorError::NotFound(format!("dataset {dataset_id}")))?;
        dataset.status = DatasetStatus::Deleted;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_with_datasets() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.define_collection(1, ColumnSchema::new("t", &["C1", "C2"]));
        for name in ["run_a", "run_b", "run_c"] {
            catalog
                .register_dataset(NewDataset {
                    collection_id: 1,
                    name: name.to_string(),
                    table_name: format!("exp_1_{name}"),
                    row_count: 100,
                    historical: false,
                })
                .unwrap();
        }
        catalog
    }

    #[test]
    fn test_historical_listing_filters_flag_and_status() {
        let catalog = catalog_with_datasets();
        assert!(catalog.list_historical_datasets(1).unwrap().is_empty());

        catalog.mark_historical(1, true).unwrap();
        catalog.mark_historical(2, true).unwrap();
        let historical = catalog.list_historical_datasets(1).unwrap();
        assert_eq!(historical.len(), 2);
        assert_eq!(historical[0].id, 1);

        // Logically deleted datasets drop out of the listing
        catalog.mark_deleted(2).unwrap();
        assert_eq!(catalog.list_historical_datasets(1).unwrap().len(), 1);
        // ... but the descriptor is still retrievable
        let deleted = catalog.get_dataset(2).unwrap();
        assert_eq!(deleted.status, DatasetStatus::Deleted);
    }

    #[test]
    fn test_register_requires_collection() {
        let catalog = MemoryCatalog::new();
        let err = catalog
            .register_dataset(NewDataset {
                collection_id: 9,
                name: "run".to_string(),
                table_name: "exp_9_run".to_string(),
                row_count: 0,
                historical: false,
            })
            .unwrap_err();
        assert!(matches!(err, CorridorError::NotFound(_)));
    }

    #[test]
    fn test_unregister_removes_record() {
        let catalog = catalog_with_datasets();
        catalog.unregister_dataset(1).unwrap();
        assert!(catalog.get_dataset(1).is_err());
        assert!(catalog.unregister_dataset(1).is_err());
    }
}
