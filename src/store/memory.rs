//! In-memory column store
//!
//! Thread-safe reference implementation of [`ColumnStore`]. Tables live
//! behind a single `RwLock`; queries materialize a sorted, projected copy of
//! the stored rows, which matches the time-ordered read contract of the
//! production backend closely enough for the engine and its tests.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::{sanitize_table_name, ColumnStore, RawRow};
use crate::data::Frame;
use crate::{CorridorError, Result};

static COUNT_QUERY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*select\s+count\(\s*\)\s+from\s+`?([A-Za-z0-9_]+)`?\s*$")
        .expect("static count pattern")
});

struct StoredTable {
    time_column: String,
    data_columns: Vec<String>,
    time: Vec<f64>,
    columns: AHashMap<String, Vec<f64>>,
}

/// In-memory [`ColumnStore`] implementation
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<AHashMap<String, StoredTable>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tables currently held
    pub fn table_count(&self) -> usize {
        self.tables.read().len()
    }
}

impl ColumnStore for MemoryStore {
    fn create_table(&self, name: &str, time_column: &str, data_columns: &[String]) -> Result<()> {
        let name = sanitize_table_name(name);
        let mut tables = self.tables.write();
        if tables.contains_key(&name) {
            return Err(CorridorError::TableExists(name));
        }
        let columns = data_columns
            .iter()
            .map(|c| (c.clone(), Vec::new()))
            .collect();
        tables.insert(
            name,
            StoredTable {
                time_column: time_column.to_string(),
                data_columns: data_columns.to_vec(),
                time: Vec::new(),
                columns,
            },
        );
        Ok(())
    }

    fn insert(&self, name: &str, frame: &Frame) -> Result<usize> {
        let name = sanitize_table_name(name);
        frame.check_aligned()?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&name)
            .ok_or_else(|| CorridorError::TableNotFound(name.clone()))?;
        for col in &table.data_columns {
            if frame.column(col).is_none() {
                return Err(CorridorError::Validation(format!(
                    "insert batch is missing column `{col}`"
                )));
            }
        }
        table.time.extend_from_slice(&frame.time);
        for col in &table.data_columns {
            let values = frame.column(col).unwrap_or_default();
            if let Some(stored) = table.columns.get_mut(col) {
                stored.extend_from_slice(values);
            }
        }
        Ok(frame.len())
    }

    fn query(
        &self,
        name: &str,
        time_column: &str,
        columns: Option<&[String]>,
        time_range: Option<(f64, f64)>,
        limit: Option<usize>,
    ) -> Result<Frame> {
        let name = sanitize_table_name(name);
        let tables = self.tables.read();
        let table = tables
            .get(&name)
            .ok_or_else(|| CorridorError::TableNotFound(name.clone()))?;
        if table.time_column != time_column {
            return Err(CorridorError::StoreUnavailable(format!(
                "table `{}` has no time column `{}`",
                name, time_column
            )));
        }

        let projected: Vec<&str> = match columns {
            Some(cols) => {
                for col in cols {
                    if !table.columns.contains_key(col.as_str()) {
                        return Err(CorridorError::StoreUnavailable(format!(
                            "table `{}` has no column `{}`",
                            name, col
                        )));
                    }
                }
                cols.iter().map(|c| c.as_str()).collect()
            }
            None => table.data_columns.iter().map(|c| c.as_str()).collect(),
        };

        let mut frame = Frame {
            time: table.time.clone(),
            columns: projected
                .iter()
                .map(|&c| (c.to_string(), table.columns[c].clone()))
                .collect(),
        };

        if let Some((start, end)) = time_range {
            let keep: Vec<bool> = frame
                .time
                .iter()
                .map(|&t| t >= start && t <= end)
                .collect();
            frame.retain_rows(&keep);
        }

        frame.sort_by_time();

        if let Some(limit) = limit {
            if frame.len() > limit {
                let keep: Vec<bool> = (0..frame.len()).map(|i| i < limit).collect();
                frame.retain_rows(&keep);
            }
        }

        Ok(frame)
    }

    fn exists(&self, name: &str) -> bool {
        self.tables.read().contains_key(&sanitize_table_name(name))
    }

    fn rename(&self, old: &str, new: &str) -> Result<()> {
        let old = sanitize_table_name(old);
        let new = sanitize_table_name(new);
        let mut tables = self.tables.write();
        if tables.contains_key(&new) {
            return Err(CorridorError::TableExists(new));
        }
        let table = tables
            .remove(&old)
            .ok_or(CorridorError::TableNotFound(old))?;
        tables.insert(new, table);
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        self.tables.write().remove(&sanitize_table_name(name));
        Ok(())
    }

    fn raw_query(&self, sql: &str) -> Result<Vec<RawRow>> {
        let captures = COUNT_QUERY.captures(sql).ok_or_else(|| {
            CorridorError::StoreUnavailable(format!("unsupported raw query: {sql}"))
        })?;
        let name = sanitize_table_name(&captures[1]);
        let tables = self.tables.read();
        let table = tables
            .get(&name)
            .ok_or(CorridorError::TableNotFound(name))?;
        let mut row = RawRow::new();
        row.insert("count".to_string(), table.time.len() as f64);
        Ok(vec![row])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create_table("runs", "t", &["C1".to_string(), "C2".to_string()])
            .unwrap();
        let frame = Frame::from_columns(
            vec![2.0, 0.0, 1.0],
            vec![("C1", vec![20.0, 0.0, 10.0]), ("C2", vec![2.0, 0.0, 1.0])],
        );
        store.insert("runs", &frame).unwrap();
        store
    }

    #[test]
    fn test_create_insert_query() {
        let store = sample_store();
        let frame = store.query("runs", "t", None, None, None).unwrap();
        assert_eq!(frame.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(frame.column("C1"), Some(&[0.0, 10.0, 20.0][..]));
    }

    #[test]
    fn test_query_projection_range_limit() {
        let store = sample_store();
        let cols = vec!["C2".to_string()];
        let frame = store
            .query("runs", "t", Some(&cols), Some((0.5, 2.0)), Some(1))
            .unwrap();
        assert_eq!(frame.time, vec![1.0]);
        assert_eq!(frame.column("C2"), Some(&[1.0][..]));
        assert!(frame.column("C1").is_none());
    }

    #[test]
    fn test_query_unknown_column() {
        let store = sample_store();
        let cols = vec!["C9".to_string()];
        let err = store.query("runs", "t", Some(&cols), None, None).unwrap_err();
        assert!(matches!(err, CorridorError::StoreUnavailable(_)));
    }

    #[test]
    fn test_rename_and_exists() {
        let store = sample_store();
        assert!(store.exists("runs"));
        store.rename("runs", "runs_v2").unwrap();
        assert!(!store.exists("runs"));
        assert!(store.exists("runs_v2"));

        let err = store.rename("runs", "other").unwrap_err();
        assert!(matches!(err, CorridorError::TableNotFound(_)));
    }

    #[test]
    fn test_drop_idempotent() {
        let store = sample_store();
        store.drop_table("runs").unwrap();
        assert!(!store.exists("runs"));
        // Second drop is not an error
        store.drop_table("runs").unwrap();
    }

    #[test]
    fn test_create_duplicate_rejected() {
        let store = sample_store();
        let err = store
            .create_table("runs", "t", &["C1".to_string()])
            .unwrap_err();
        assert!(matches!(err, CorridorError::TableExists(_)));
    }

    #[test]
    fn test_raw_count_query() {
        let store = sample_store();
        let rows = store.raw_query("SELECT count() FROM `runs`").unwrap();
        assert_eq!(rows[0]["count"], 3.0);

        let err = store.raw_query("SELECT * FROM runs").unwrap_err();
        assert!(matches!(err, CorridorError::StoreUnavailable(_)));
    }

    #[test]
    fn test_names_sanitized_on_every_operation() {
        let store = MemoryStore::new();
        store
            .create_table("run 2024/a", "t", &["C1".to_string()])
            .unwrap();
        assert!(store.exists("run_2024_a"));
        assert!(store.exists("run 2024/a"));
    }
}
