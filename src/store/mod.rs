//! Column store adapter
//!
//! Capability interface over an append-only, time-ordered columnar store.
//! The engine consumes the [`ColumnStore`] trait only; production deployments
//! implement it against their columnar backend, while [`MemoryStore`] serves
//! as the embedded default and the test double.

mod memory;

pub use memory::MemoryStore;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::data::Frame;
use crate::Result;

/// Namespace prefix for staged candidate tables
pub const STAGING_PREFIX: &str = "staged_";

/// Maximum physical table name length
const MAX_TABLE_NAME_LEN: usize = 60;

static INVALID_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").expect("static charset pattern"));

/// Map a logical name onto the store's restricted identifier charset.
///
/// Deterministic and idempotent: the same logical name always yields the
/// same physical name, and sanitizing an already-sanitized name is a no-op.
pub fn sanitize_table_name(name: &str) -> String {
    let mut sanitized = INVALID_CHARS.replace_all(name, "_").into_owned();
    let starts_valid = sanitized
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_');
    if !starts_valid {
        sanitized.insert_str(0, "t_");
    }
    sanitized.truncate(MAX_TABLE_NAME_LEN);
    sanitized
}

/// Check whether a table name lives in the staging namespace
pub fn is_staging_table(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX)
}

/// A single row returned by a raw aggregation query
pub type RawRow = HashMap<String, f64>;

/// Capability interface over the columnar store.
///
/// Table names passed in are sanitized by the implementation before any
/// operation, so callers may hand over logical names.
pub trait ColumnStore: Send + Sync {
    /// Create a table with a time column and numeric data columns
    fn create_table(&self, name: &str, time_column: &str, data_columns: &[String]) -> Result<()>;

    /// Bulk-append rows; returns the number of rows written
    fn insert(&self, name: &str, frame: &Frame) -> Result<usize>;

    /// Read rows ordered by time, optionally projected to `columns`,
    /// restricted to an inclusive `time_range` and capped at `limit` rows
    fn query(
        &self,
        name: &str,
        time_column: &str,
        columns: Option<&[String]>,
        time_range: Option<(f64, f64)>,
        limit: Option<usize>,
    ) -> Result<Frame>;

    /// Check whether a table exists
    fn exists(&self, name: &str) -> bool;

    /// Rename a table; fails if the source is missing or the target exists
    fn rename(&self, old: &str, new: &str) -> Result<()>;

    /// Drop a table; dropping a non-existent table is not an error
    fn drop_table(&self, name: &str) -> Result<()>;

    /// Ad hoc aggregation pushdown (e.g. `SELECT count() FROM t`)
    fn raw_query(&self, sql: &str) -> Result<Vec<RawRow>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_restricted_charset() {
        assert_eq!(sanitize_table_name("run 2024-05/a"), "run_2024_05_a");
        assert_eq!(sanitize_table_name("exp_1_ok"), "exp_1_ok");
    }

    #[test]
    fn test_sanitize_leading_character() {
        assert_eq!(sanitize_table_name("1st_run"), "t_1st_run");
        assert_eq!(sanitize_table_name("_hidden"), "_hidden");
    }

    #[test]
    fn test_sanitize_idempotent() {
        let long = "x".repeat(80);
        let names = ["run 2024-05/a", "1st_run", "", long.as_str()];
        for name in names {
            let once = sanitize_table_name(name);
            assert_eq!(sanitize_table_name(&once), once, "not idempotent: {name}");
            assert!(once.len() <= MAX_TABLE_NAME_LEN);
        }
    }

    #[test]
    fn test_staging_namespace() {
        assert!(is_staging_table("staged_3_1"));
        assert!(!is_staging_table("exp_3_run1"));
    }
}
