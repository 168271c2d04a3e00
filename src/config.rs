//! Engine configuration

use std::time::Duration;

/// Tunables for envelope computation and staging
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default interval count for bucketed aggregation when a request does
    /// not specify a resolution
    pub default_resolution: usize,
    /// Time-to-live for cached envelope results
    pub cache_ttl: Duration,
    /// Worker threads used for per-dataset fetches
    pub fetch_concurrency: usize,
    /// Additional attempts per dataset fetch before the dataset is skipped
    pub fetch_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_resolution: 200,
            cache_ttl: Duration::from_secs(3600),
            fetch_concurrency: 4,
            fetch_retries: 2,
        }
    }
}
