//! Directory metrics collection.
//!
//! Provides standardized metrics for monitoring queries:
//! - Query counters by operation and outcome
//! - Latency histograms

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total directory queries by operation and outcome.
    pub const QUERIES_TOTAL: &str = "profiles_db_queries_total";

    /// Query latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "profiles_db_latency_seconds";
}

/// Record metrics for a completed query.
pub fn record_query(operation: &'static str, ok: bool, elapsed: Duration) {
    counter!(
        names::QUERIES_TOTAL,
        "operation" => operation,
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation
    )
    .record(elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::QUERIES_TOTAL.contains("queries"));
        assert!(names::LATENCY_SECONDS.contains("latency"));
    }
}
