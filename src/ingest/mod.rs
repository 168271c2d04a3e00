//! Dataset ingestion
//!
//! Validation, cleaning and the two-phase persist used when an already
//! parsed run becomes a permanent dataset. File-format handling lives with
//! the caller; the engine receives a [`Frame`].
//!
//! Persisting spans two stores without a distributed transaction: the
//! catalog record is written first, then the columnar table. On a store
//! failure the catalog write is compensated; a failed compensation surfaces
//! as `IngestInconsistency` instead of being swallowed.

use crate::catalog::{MetadataCatalog, NewDataset};
use crate::data::{ColumnSchema, Frame};
use crate::store::{sanitize_table_name, ColumnStore};
use crate::{CorridorError, Result};

/// Deterministic permanent table name for a dataset
pub fn permanent_table_name(collection_id: u64, name: &str) -> String {
    sanitize_table_name(&format!("exp_{collection_id}_{name}"))
}

/// Validate a candidate frame against the collection schema.
///
/// Fails with `SchemaMismatch` listing every missing data column, or with
/// `Validation` for an empty or ragged frame.
pub fn validate_frame(frame: &Frame, schema: &ColumnSchema) -> Result<()> {
    frame.check_aligned()?;
    if frame.is_empty() {
        return Err(CorridorError::Validation(
            "upload contains no rows".to_string(),
        ));
    }
    let missing: Vec<String> = schema
        .data_columns
        .iter()
        .filter(|col| frame.column(col).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(CorridorError::SchemaMismatch { missing });
    }
    Ok(())
}

/// Restrict a frame to the schema's data columns, drop rows holding NaN in
/// the time column or any data column, and sort by time.
pub fn clean_frame(frame: &Frame, schema: &ColumnSchema) -> Frame {
    let mut clean = Frame {
        time: frame.time.clone(),
        columns: schema
            .data_columns
            .iter()
            .filter_map(|col| frame.columns.get(col).map(|v| (col.clone(), v.clone())))
            .collect(),
    };

    let keep: Vec<bool> = (0..clean.len())
        .map(|row| {
            !clean.time[row].is_nan() && clean.columns.values().all(|v| !v[row].is_nan())
        })
        .collect();
    clean.retain_rows(&keep);
    clean.sort_by_time();
    clean
}

/// Create the backing table and fill it; a failed insert drops the freshly
/// created table before the error propagates.
pub(crate) fn persist_frame(
    store: &dyn ColumnStore,
    table_name: &str,
    schema: &ColumnSchema,
    frame: &Frame,
) -> Result<()> {
    store.create_table(table_name, &schema.time_column, &schema.data_columns)?;
    if let Err(err) = store.insert(table_name, frame) {
        let _ = store.drop_table(table_name);
        return Err(err);
    }
    Ok(())
}

/// Ingest a parsed run as a permanent dataset of `collection_id`.
pub fn ingest_dataset(
    store: &dyn ColumnStore,
    catalog: &dyn MetadataCatalog,
    collection_id: u64,
    name: &str,
    frame: &Frame,
) -> Result<u64> {
    let schema = catalog.get_column_schema(collection_id)?;
    validate_frame(frame, &schema)?;
    let clean = clean_frame(frame, &schema);
    if clean.is_empty() {
        return Err(CorridorError::Validation(
            "no usable rows after cleaning".to_string(),
        ));
    }

    let table_name = permanent_table_name(collection_id, name);
    if store.exists(&table_name) {
        return Err(CorridorError::TableExists(table_name));
    }

    let dataset_id = catalog.register_dataset(NewDataset {
        collection_id,
        name: name.to_string(),
        table_name: table_name.clone(),
        row_count: clean.len() as u64,
        historical: false,
    })?;

    if let Err(err) = persist_frame(store, &table_name, &schema, &clean) {
        if let Err(undo) = catalog.unregister_dataset(dataset_id) {
            return Err(CorridorError::IngestInconsistency(format!(
                "store write failed ({err}) and catalog undo failed ({undo}); \
                 dataset {dataset_id} has no backing table"
            )));
        }
        return Err(err);
    }

    log::info!(
        "ingested dataset {dataset_id} ({} rows) into `{table_name}`",
        clean.len()
    );
    Ok(dataset_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::store::MemoryStore;

    fn schema() -> ColumnSchema {
        ColumnSchema::new("t", &["C1", "C2"])
    }

    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.define_collection(1, schema());
        catalog
    }

    #[test]
    fn test_validate_reports_all_missing_columns() {
        let frame = Frame::from_columns(vec![0.0], vec![("other", vec![1.0])]);
        let err = validate_frame(&frame, &schema()).unwrap_err();
        match err {
            CorridorError::SchemaMismatch { missing } => {
                assert_eq!(missing, vec!["C1".to_string(), "C2".to_string()]);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_clean_drops_nan_rows_and_sorts() {
        let frame = Frame::from_columns(
            vec![2.0, 0.0, 1.0, 3.0],
            vec![
                ("C1", vec![20.0, 0.0, f64::NAN, 30.0]),
                ("C2", vec![2.0, 0.0, 1.0, 3.0]),
                ("extra", vec![9.0, 9.0, 9.0, 9.0]),
            ],
        );
        let clean = clean_frame(&frame, &schema());
        // NaN row dropped, extra column stripped, time ascending
        assert_eq!(clean.time, vec![0.0, 2.0, 3.0]);
        assert_eq!(clean.column("C1"), Some(&[0.0, 20.0, 30.0][..]));
        assert!(clean.column("extra").is_none());
    }

    #[test]
    fn test_ingest_registers_and_persists() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let frame = Frame::from_columns(
            vec![0.0, 1.0],
            vec![("C1", vec![1.0, 2.0]), ("C2", vec![3.0, 4.0])],
        );

        let id = ingest_dataset(&store, &catalog, 1, "run a", &frame).unwrap();
        let descriptor = catalog.get_dataset(id).unwrap();
        assert_eq!(descriptor.row_count, 2);
        assert_eq!(descriptor.table_name, "exp_1_run_a");
        assert!(!descriptor.historical);
        assert!(store.exists("exp_1_run_a"));
    }

    #[test]
    fn test_ingest_rejects_duplicate_table() {
        let store = MemoryStore::new();
        let catalog = catalog();
        let frame = Frame::from_columns(
            vec![0.0],
            vec![("C1", vec![1.0]), ("C2", vec![2.0])],
        );
        ingest_dataset(&store, &catalog, 1, "run", &frame).unwrap();
        let err = ingest_dataset(&store, &catalog, 1, "run", &frame).unwrap_err();
        assert!(matches!(err, CorridorError::TableExists(_)));
    }

    #[test]
    fn test_ingest_validation_leaves_no_state() {
        let store = MemoryStore::new();
        let catalog = catalog();
        // C2 missing -> SchemaMismatch before anything is written
        let frame = Frame::from_columns(vec![0.0], vec![("C1", vec![1.0])]);
        let err = ingest_dataset(&store, &catalog, 1, "run", &frame).unwrap_err();
        assert!(matches!(err, CorridorError::SchemaMismatch { .. }));
        assert!(catalog.list_datasets(1).unwrap().is_empty());
        assert!(!store.exists("exp_1_run"));
    }
}
