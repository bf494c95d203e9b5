//! Prometheus metrics for repositories, the transaction cache and schema changes.
//!
//! Metrics are registered lazily on first access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

// ===== Repository Metrics =====

/// Repository operations by entity type, operation and status
pub static REPOSITORY_OPERATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "entidb_repository_operations_total",
        "Total number of repository operations",
        &["entity_type", "operation", "status"]
    )
    .expect("Failed to register repository operations counter")
});

// ===== Cache Metrics =====

/// Transaction cache lookups by entity type and result (hit/miss)
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "entidb_tx_cache_lookups_total",
        "Total number of transaction cache lookups",
        &["entity_type", "result"]
    )
    .expect("Failed to register cache lookups counter")
});

// ===== Schema Metrics =====

/// Schema mutations by operation and status
pub static SCHEMA_MUTATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "entidb_schema_mutations_total",
        "Total number of schema mutations",
        &["operation", "status"]
    )
    .expect("Failed to register schema mutations counter")
});

/// Schema mutation latency histogram
pub static SCHEMA_MUTATION_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "entidb_schema_mutation_duration_seconds",
        "Schema mutation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("Failed to register schema mutation duration histogram")
});

/// Label for the outcome of an operation.
#[must_use]
pub fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "ok"
    } else {
        "error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let _ = &*REPOSITORY_OPERATIONS;
        let _ = &*CACHE_LOOKUPS;
        let _ = &*SCHEMA_MUTATIONS;
        let _ = &*SCHEMA_MUTATION_DURATION;
    }

    #[test]
    fn test_cache_metrics_increment() {
        CACHE_LOOKUPS.with_label_values(&["demo", "hit"]).inc();

        let metrics = prometheus::gather();
        let cache_metrics: Vec<_> = metrics
            .iter()
            .filter(|m| m.get_name() == "entidb_tx_cache_lookups_total")
            .collect();

        assert!(!cache_metrics.is_empty());
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status_label::<(), ()>(&Ok(())), "ok");
        assert_eq!(status_label::<(), ()>(&Err(())), "error");
    }
}
