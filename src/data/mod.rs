//! Row-batch and schema types exchanged with the column store

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{CorridorError, Result};

/// Column configuration for one experiment collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Name of the time column
    pub time_column: String,
    /// Names of the numeric sensor columns
    pub data_columns: Vec<String>,
}

impl ColumnSchema {
    /// Create a new schema
    pub fn new(time_column: impl Into<String>, data_columns: &[&str]) -> Self {
        Self {
            time_column: time_column.into(),
            data_columns: data_columns.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Inclusive time range covered by a result or query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: f64,
    pub max: f64,
}

/// A batch of rows: one time column plus named numeric columns, all of
/// equal length
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Time value per row
    pub time: Vec<f64>,
    /// Data values per column, parallel to `time`
    pub columns: HashMap<String, Vec<f64>>,
}

impl Frame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame from a time column and named data columns
    pub fn from_columns(time: Vec<f64>, columns: Vec<(&str, Vec<f64>)>) -> Self {
        Self {
            time,
            columns: columns
                .into_iter()
                .map(|(name, values)| (name.to_string(), values))
                .collect(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// Check if the frame has no rows
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Get a data column by name
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Data column names, sorted for deterministic iteration
    pub fn column_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.columns.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Verify that every data column has exactly one value per row
    pub fn check_aligned(&self) -> Result<()> {
        for (name, values) in &self.columns {
            if values.len() != self.time.len() {
                return Err(CorridorError::Validation(format!(
                    "column `{}` has {} values for {} rows",
                    name,
                    values.len(),
                    self.time.len()
                )));
            }
        }
        Ok(())
    }

    /// Keep only the rows where `keep` is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let filter = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(keep)
                .filter_map(|(&v, &k)| k.then_some(v))
                .collect()
        };
        self.time = filter(&self.time);
        for values in self.columns.values_mut() {
            *values = filter(values);
        }
    }

    /// Reorder all rows by ascending time (stable)
    pub fn sort_by_time(&mut self) {
        let mut order: Vec<usize> = (0..self.time.len()).collect();
        order.sort_by(|&a, &b| {
            self.time[a]
                .partial_cmp(&self.time[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.time = order.iter().map(|&i| self.time[i]).collect();
        for values in self.columns.values_mut() {
            *values = order.iter().map(|&i| values[i]).collect();
        }
    }

    /// Time span of the rows, `None` for an empty frame
    pub fn time_range(&self) -> Option<TimeRange> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &t in &self.time {
            if t < min {
                min = t;
            }
            if t > max {
                max = t;
            }
        }
        min.is_finite().then_some(TimeRange { min, max })
    }
}

/// Dedup a requested column selection, preserving caller order.
///
/// An empty selection is rejected up front rather than producing an empty
/// envelope.
pub fn normalize_columns(columns: &[String]) -> Result<Vec<String>> {
    if columns.is_empty() {
        return Err(CorridorError::Validation(
            "empty column selection".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    Ok(columns
        .iter()
        .filter(|c| seen.insert(c.as_str()))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_alignment() {
        let frame = Frame::from_columns(vec![0.0, 1.0], vec![("C1", vec![1.0, 2.0])]);
        assert!(frame.check_aligned().is_ok());

        let ragged = Frame::from_columns(vec![0.0, 1.0], vec![("C1", vec![1.0])]);
        assert!(ragged.check_aligned().is_err());
    }

    #[test]
    fn test_frame_retain_and_sort() {
        let mut frame = Frame::from_columns(
            vec![2.0, 0.0, 1.0],
            vec![("C1", vec![20.0, 0.0, 10.0])],
        );

        frame.sort_by_time();
        assert_eq!(frame.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(frame.column("C1"), Some(&[0.0, 10.0, 20.0][..]));

        frame.retain_rows(&[true, false, true]);
        assert_eq!(frame.time, vec![0.0, 2.0]);
        assert_eq!(frame.column("C1"), Some(&[0.0, 20.0][..]));
    }

    #[test]
    fn test_frame_time_range() {
        let frame = Frame::from_columns(vec![3.0, 1.0, 2.0], vec![]);
        let range = frame.time_range().unwrap();
        assert_eq!(range.min, 1.0);
        assert_eq!(range.max, 3.0);

        assert!(Frame::new().time_range().is_none());
    }

    #[test]
    fn test_normalize_columns() {
        let cols = vec!["C2".to_string(), "C1".to_string(), "C2".to_string()];
        assert_eq!(normalize_columns(&cols).unwrap(), vec!["C2", "C1"]);
        assert!(normalize_columns(&[]).is_err());
    }
}
