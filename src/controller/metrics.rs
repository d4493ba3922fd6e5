//! Metrics for controllers built on the substrate
//!
//! Metrics are reported through an injected [`MetricsRecorder`] rather than
//! process-wide statics. [`NoopRecorder`] is always available; the
//! Prometheus-backed recorder is compiled with the `metrics` feature.
//!
//! # Exported metrics (`PrometheusRecorder`)
//! - `dbcluster_reconcile_duration_seconds` (histogram): pass duration labeled by controller.
//! - `dbcluster_reconcile_total` (counter): passes labeled by controller and outcome.
//! - `dbcluster_child_operations_total` (counter): engine writes labeled by kind and operation.

use std::time::Duration;

/// Sink for controller and engine measurements
pub trait MetricsRecorder: Send + Sync {
    /// One reconcile pass finished. `outcome` is `"success"` or an error label.
    fn observe_reconcile(&self, controller: &str, duration: Duration, outcome: &str);

    /// The engine performed `operation` (create, update, schedule,
    /// recreate, delete, orphan) on a child of `kind`.
    fn child_operation(&self, kind: &str, operation: &str);
}

/// Recorder that drops everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn observe_reconcile(&self, _controller: &str, _duration: Duration, _outcome: &str) {}

    fn child_operation(&self, _kind: &str, _operation: &str) {}
}

#[cfg(feature = "metrics")]
pub use self::prometheus::PrometheusRecorder;

#[cfg(feature = "metrics")]
mod prometheus {
    use std::sync::atomic::AtomicU64;
    use std::time::Duration;

    use prometheus_client::encoding::text::encode;
    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;

    use super::MetricsRecorder;
    use crate::error::{Error, Result};

    /// Labels for operator reconcile metrics
    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    pub struct ReconcileLabels {
        /// Controller name, e.g. "shard"
        pub controller: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    pub struct OutcomeLabels {
        pub controller: String,
        /// "success" or an error kind such as "conflict" or "timeout"
        pub outcome: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    pub struct ChildLabels {
        pub kind: String,
        pub operation: String,
    }

    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    pub struct PrometheusRecorder {
        registry: Registry,
        reconcile_duration: Family<ReconcileLabels, Histogram, fn() -> Histogram>,
        reconcile_total: Family<OutcomeLabels, Counter<u64, AtomicU64>>,
        child_operations: Family<ChildLabels, Counter<u64, AtomicU64>>,
    }

    impl Default for PrometheusRecorder {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PrometheusRecorder {
        pub fn new() -> Self {
            let reconcile_duration =
                Family::<ReconcileLabels, Histogram, fn() -> Histogram>::new_with_constructor(
                    reconcile_histogram,
                );
            let reconcile_total = Family::default();
            let child_operations = Family::default();

            let mut registry = Registry::default();
            registry.register(
                "dbcluster_reconcile_duration_seconds",
                "Duration of reconcile passes in seconds",
                reconcile_duration.clone(),
            );
            registry.register(
                "dbcluster_reconcile",
                "Reconcile passes by outcome",
                reconcile_total.clone(),
            );
            registry.register(
                "dbcluster_child_operations",
                "Child object writes performed by the reconciliation engine",
                child_operations.clone(),
            );

            Self {
                registry,
                reconcile_duration,
                reconcile_total,
                child_operations,
            }
        }

        /// Render the registry in the Prometheus text exposition format
        pub fn encode(&self) -> Result<String> {
            let mut buffer = String::new();
            encode(&mut buffer, &self.registry)
                .map_err(|e| Error::ConfigError(format!("failed to encode metrics: {e}")))?;
            Ok(buffer)
        }
    }

    impl MetricsRecorder for PrometheusRecorder {
        fn observe_reconcile(&self, controller: &str, duration: Duration, outcome: &str) {
            self.reconcile_duration
                .get_or_create(&ReconcileLabels {
                    controller: controller.to_string(),
                })
                .observe(duration.as_secs_f64());
            self.reconcile_total
                .get_or_create(&OutcomeLabels {
                    controller: controller.to_string(),
                    outcome: outcome.to_string(),
                })
                .inc();
        }

        fn child_operation(&self, kind: &str, operation: &str) {
            self.child_operations
                .get_or_create(&ChildLabels {
                    kind: kind.to_string(),
                    operation: operation.to_string(),
                })
                .inc();
        }
    }

}
