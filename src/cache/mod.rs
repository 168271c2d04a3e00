//! Envelope result cache
//!
//! Content-addressed cache keyed by (collection, fingerprint). A hit
//! additionally requires the exact set of contributing dataset ids, so any
//! change to which datasets are marked historical invalidates prior entries
//! implicitly. Expiry is evaluated at read time; expired entries are
//! overwritten in place rather than evicted separately.

use std::time::{Duration, Instant};

use ahash::AHashMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::envelope::{AggregationMode, EnvelopeResult};

/// Deterministic fingerprint over the computation parameters: sorted column
/// names, aggregation mode and the sampling point count (or `"full"`).
pub fn fingerprint(columns: &[String], mode: AggregationMode, resolution: usize) -> String {
    #[derive(Serialize)]
    struct Material<'a> {
        columns: Vec<&'a str>,
        mode: &'static str,
        points: String,
    }

    let mut sorted: Vec<&str> = columns.iter().map(|c| c.as_str()).collect();
    sorted.sort_unstable();
    let (mode, points) = match mode {
        AggregationMode::Bucketed => ("bucketed", resolution.to_string()),
        AggregationMode::FullResolution => ("full_resolution", "full".to_string()),
    };
    let material = serde_json::to_string(&Material {
        columns: sorted,
        mode,
        points,
    })
    .unwrap_or_default();
    format!("{:016x}", seahash::hash(material.as_bytes()))
}

/// Cache of computed envelopes.
///
/// Entries are derived values, not sources of truth: a read-then-write race
/// between two computations of the same fingerprint is tolerated (last
/// writer wins).
pub trait ResultCache: Send + Sync {
    /// Look up a previously computed envelope. A hit requires the
    /// fingerprint and the exact dataset-id set (order-independent) to
    /// match, and the entry to be unexpired.
    fn get(
        &self,
        collection_id: u64,
        fingerprint: &str,
        dataset_ids: &[u64],
    ) -> Option<EnvelopeResult>;

    /// Store a computed envelope, superseding any entry under the same key
    fn put(
        &self,
        collection_id: u64,
        fingerprint: &str,
        dataset_ids: &[u64],
        result: EnvelopeResult,
        ttl: Duration,
    );
}

struct CacheSlot {
    dataset_ids: Vec<u64>,
    result: EnvelopeResult,
    created_at: Instant,
    expires_at: Instant,
}

/// In-memory [`ResultCache`] implementation
#[derive(Default)]
pub struct MemoryResultCache {
    slots: RwLock<AHashMap<(u64, String), CacheSlot>>,
}

impl MemoryResultCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held (expired ones included)
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

fn sorted_ids(dataset_ids: &[u64]) -> Vec<u64> {
    let mut ids = dataset_ids.to_vec();
    ids.sort_unstable();
    ids
}

impl ResultCache for MemoryResultCache {
    fn get(
        &self,
        collection_id: u64,
        fingerprint: &str,
        dataset_ids: &[u64],
    ) -> Option<EnvelopeResult> {
        let slots = self.slots.read();
        let slot = slots.get(&(collection_id, fingerprint.to_string()))?;
        if Instant::now() > slot.expires_at {
            return None;
        }
        if slot.dataset_ids != sorted_ids(dataset_ids) {
            return None;
        }
        log::debug!(
            "envelope cache hit for collection {collection_id} (age {:?})",
            slot.created_at.elapsed()
        );
        Some(slot.result.clone())
    }

    fn put(
        &self,
        collection_id: u64,
        fingerprint: &str,
        dataset_ids: &[u64],
        result: EnvelopeResult,
        ttl: Duration,
    ) {
        let now = Instant::now();
        self.slots.write().insert(
            (collection_id, fingerprint.to_string()),
            CacheSlot {
                dataset_ids: sorted_ids(dataset_ids),
                result,
                created_at: now,
                expires_at: now + ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TimeRange;
    use crate::envelope::SamplingMethod;
    use std::collections::BTreeMap;

    fn sample_result() -> EnvelopeResult {
        EnvelopeResult {
            time_points: vec![0.0, 1.0],
            envelope_data: BTreeMap::new(),
            data_count: 2,
            sampling_method: SamplingMethod::TimeInterval,
            sampling_points: 2,
            original_points: 10,
            time_range: TimeRange { min: 0.0, max: 1.0 },
        }
    }

    #[test]
    fn test_fingerprint_order_independent() {
        let a = fingerprint(
            &["C2".to_string(), "C1".to_string()],
            AggregationMode::Bucketed,
            200,
        );
        let b = fingerprint(
            &["C1".to_string(), "C2".to_string()],
            AggregationMode::Bucketed,
            200,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_varies_with_parameters() {
        let columns = vec!["C1".to_string()];
        let bucketed = fingerprint(&columns, AggregationMode::Bucketed, 200);
        let coarser = fingerprint(&columns, AggregationMode::Bucketed, 100);
        let full = fingerprint(&columns, AggregationMode::FullResolution, 200);
        assert_ne!(bucketed, coarser);
        assert_ne!(bucketed, full);
    }

    #[test]
    fn test_hit_requires_exact_dataset_set() {
        let cache = MemoryResultCache::new();
        let fp = "abc";
        cache.put(1, fp, &[3, 1, 2], sample_result(), Duration::from_secs(60));

        // Order-independent match
        assert!(cache.get(1, fp, &[1, 2, 3]).is_some());
        // A changed historical set misses
        assert!(cache.get(1, fp, &[1, 2, 3, 4]).is_none());
        assert!(cache.get(1, fp, &[1, 2]).is_none());
        // A different collection misses
        assert!(cache.get(2, fp, &[1, 2, 3]).is_none());
    }

    #[test]
    fn test_expiry_read_time_and_overwrite_in_place() {
        let cache = MemoryResultCache::new();
        let fp = "abc";
        cache.put(1, fp, &[1], sample_result(), Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(1, fp, &[1]).is_none());
        assert_eq!(cache.len(), 1);

        // Overwrite the expired slot in place
        cache.put(1, fp, &[1], sample_result(), Duration::from_secs(60));
        assert!(cache.get(1, fp, &[1]).is_some());
        assert_eq!(cache.len(), 1);
    }
}
