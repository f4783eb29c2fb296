//! Metrics registry for Flotilla observability
//!
//! Provides OpenTelemetry metrics for:
//! - Reconciliation (duration, errors)
//! - Mesh object writes (ServiceEntry, DestinationRule, Sidecar)
//! - VIP allocation (retry counts)
//! - Fleet membership (registered clusters)

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Global meter for Flotilla metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("flotilla"));

// ============================================================================
// Reconciliation
// ============================================================================

/// Histogram of reconciliation duration
///
/// Labels:
/// - `identity`: workload identity
/// - `result`: success, error, skipped
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("flotilla_reconcile_duration_seconds")
        .with_description("Duration of identity reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of reconciliation errors
///
/// Labels:
/// - `identity`: workload identity
/// - `error_type`: transient, allocation, validation
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("flotilla_reconcile_errors_total")
        .with_description("Total number of reconciliation errors")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Mesh object writes
// ============================================================================

/// Counter of mesh object writes
///
/// Labels:
/// - `cluster`: target cluster
/// - `kind`: ServiceEntry, DestinationRule, Sidecar
/// - `op`: create, update, delete
pub static OBJECT_WRITES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("flotilla_object_writes_total")
        .with_description("Total number of mesh object writes")
        .with_unit("{writes}")
        .build()
});

/// Counter of failed mesh object writes
///
/// Labels:
/// - `cluster`: target cluster
/// - `kind`: ServiceEntry, DestinationRule, Sidecar
pub static OBJECT_WRITE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("flotilla_object_write_errors_total")
        .with_description("Total number of failed mesh object writes")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// VIP allocation
// ============================================================================

/// Counter of VIP allocation attempts that had to retry
pub static ADDRESS_RETRIES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("flotilla_address_allocation_retries_total")
        .with_description("Total VIP allocation attempts retried after a ConfigMap conflict")
        .with_unit("{retries}")
        .build()
});

// ============================================================================
// Fleet membership
// ============================================================================

/// Gauge of registered member clusters
pub static CLUSTERS_REGISTERED: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("flotilla_clusters_registered")
        .with_description("Number of member clusters currently registered")
        .with_unit("{clusters}")
        .build()
});

// ============================================================================
// Recording helpers
// ============================================================================

/// Times one reconciliation pass for an identity
pub struct ReconcileTimer {
    identity: String,
    start: std::time::Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        self.finish("success");
    }

    /// Record a pass skipped by warmup or read-only mode
    pub fn skipped(self) {
        self.finish("skipped");
    }

    /// Record error completion
    pub fn error(self, error_type: &str) {
        RECONCILE_ERRORS.add(
            1,
            &[
                opentelemetry::KeyValue::new("identity", self.identity.clone()),
                opentelemetry::KeyValue::new("error_type", error_type.to_string()),
            ],
        );
        self.finish("error");
    }

    fn finish(self, result: &'static str) {
        let duration = self.start.elapsed().as_secs_f64();
        RECONCILE_DURATION.record(
            duration,
            &[
                opentelemetry::KeyValue::new("identity", self.identity),
                opentelemetry::KeyValue::new("result", result),
            ],
        );
    }
}

/// Record a mesh object write
pub fn record_object_write(cluster: &str, kind: &str, op: &str) {
    OBJECT_WRITES.add(
        1,
        &[
            opentelemetry::KeyValue::new("cluster", cluster.to_string()),
            opentelemetry::KeyValue::new("kind", kind.to_string()),
            opentelemetry::KeyValue::new("op", op.to_string()),
        ],
    );
}

/// Record a failed mesh object write
pub fn record_object_write_error(cluster: &str, kind: &str) {
    OBJECT_WRITE_ERRORS.add(
        1,
        &[
            opentelemetry::KeyValue::new("cluster", cluster.to_string()),
            opentelemetry::KeyValue::new("kind", kind.to_string()),
        ],
    );
}

/// Record a VIP allocation retry
pub fn record_address_retry() {
    ADDRESS_RETRIES.add(1, &[]);
}

/// Update the registered-cluster gauge
pub fn set_clusters_registered(count: i64) {
    CLUSTERS_REGISTERED.record(count, &[]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconcile_timer_records_without_panicking() {
        let timer = ReconcileTimer::start("greeting");
        assert_eq!(timer.identity, "greeting");
        timer.success();

        ReconcileTimer::start("greeting").skipped();
        ReconcileTimer::start("greeting").error("allocation");
    }

    #[test]
    fn write_helpers_record_without_panicking() {
        record_object_write("cluster-1", "ServiceEntry", "update");
        record_object_write_error("cluster-1", "DestinationRule");
        record_address_retry();
        set_clusters_registered(3);
    }
}
