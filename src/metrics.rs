use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pool_transitions_total", "Applied pool transitions, by operation.");
        describe_counter!(
            "pool_invalid_transitions_total",
            "Transitions rejected because the precondition did not hold."
        );
        describe_counter!("stats_recompute_total", "Source counter recomputations.");
        describe_counter!(
            "migration_reclassified_total",
            "Legacy rows reclassified, by target status."
        );
        describe_counter!(
            "migration_missing_log_total",
            "Legacy log links with no matching item (skipped)."
        );
        describe_counter!("migration_errors_total", "Per-item migration failures.");
        describe_gauge!("migration_last_run_ts", "Unix ts when startup migrations last ran.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and register series descriptions.
    pub fn init() -> Self {
        // Use default buckets to avoid API differences across crate versions.
        let builder = PrometheusBuilder::new();

        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");

        ensure_metrics_described();

        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
