use std::sync::Arc;

use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

/// Metrics collector for the admission gate.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // HTTP surface
    http_requests_total: CounterVec,
    http_request_duration: HistogramVec,

    // Admission outcomes
    admission_decisions: CounterVec,
    store_errors: CounterVec,

    // Authentication gate
    auth_failures: CounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(vec![
                0.001, 0.002, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )?;

        let admission_decisions = CounterVec::new(
            Opts::new(
                "admission_decisions_total",
                "Admission checks by outcome (allowed, throttled)",
            ),
            &["outcome"],
        )?;

        let store_errors = CounterVec::new(
            Opts::new(
                "admission_store_errors_total",
                "Counter store failures by policy applied (fail_closed, fail_open)",
            ),
            &["policy"],
        )?;

        let auth_failures = CounterVec::new(
            Opts::new(
                "auth_failures_total",
                "Rejected authentication attempts by kind",
            ),
            &["kind"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(admission_decisions.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(auth_failures.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            admission_decisions,
            store_errors,
            auth_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
    }

    pub fn record_http_duration(&self, method: &str, path: &str, seconds: f64) {
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(seconds);
    }

    pub fn record_allowed(&self) {
        self.admission_decisions.with_label_values(&["allowed"]).inc();
    }

    pub fn record_throttled(&self) {
        self.admission_decisions
            .with_label_values(&["throttled"])
            .inc();
    }

    pub fn record_store_error(&self, fail_open: bool) {
        let policy = if fail_open { "fail_open" } else { "fail_closed" };
        self.store_errors.with_label_values(&[policy]).inc();
    }

    pub fn record_auth_failure(&self, kind: &str) {
        self.auth_failures.with_label_values(&[kind]).inc();
    }
}
