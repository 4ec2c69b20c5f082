use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for the admission gate
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,

    // Admission metrics
    admission_decisions: IntCounterVec,
    admission_duration: Histogram,

    // Cache metrics
    cache_operations: IntCounterVec,
    cache_operation_duration: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let admission_decisions = IntCounterVec::new(
            Opts::new(
                "reviewer_admission_decisions_total",
                "Admission decisions by outcome",
            ),
            &["outcome"],
        )?;

        let admission_duration = Histogram::with_opts(HistogramOpts::new(
            "reviewer_admission_duration_seconds",
            "Duration of admission checks in seconds",
        ))?;

        let cache_operations = IntCounterVec::new(
            Opts::new(
                "reviewer_cache_operations_total",
                "Counter cache operations by type and result",
            ),
            &["operation", "result"],
        )?;

        let cache_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "reviewer_cache_operation_duration_seconds",
                "Duration of counter cache operations in seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(admission_decisions.clone()))?;
        registry.register(Box::new(admission_duration.clone()))?;
        registry.register(Box::new(cache_operations.clone()))?;
        registry.register(Box::new(cache_operation_duration.clone()))?;

        Ok(Self {
            registry,
            admission_decisions,
            admission_duration,
            cache_operations,
            cache_operation_duration,
        })
    }

    /// Get the Prometheus registry for this metrics instance
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    /// Record an admission decision (`admitted`, `bypassed`, `failed_open`, `rejected`)
    pub fn record_admission(&self, outcome: &str) {
        self.admission_decisions.with_label_values(&[outcome]).inc();
    }

    pub fn admission_count(&self, outcome: &str) -> u64 {
        self.admission_decisions.with_label_values(&[outcome]).get()
    }

    /// Create a timer for measuring admission duration
    pub fn start_admission_timer(&self) -> prometheus::HistogramTimer {
        self.admission_duration.start_timer()
    }

    /// Record a cache operation outcome
    pub fn record_cache_operation(&self, operation: &str, result: &str) {
        self.cache_operations.with_label_values(&[operation, result]).inc();
    }

    pub fn cache_operation_count(&self, operation: &str, result: &str) -> u64 {
        self.cache_operations.with_label_values(&[operation, result]).get()
    }

    /// Record cache operation duration
    pub fn record_cache_operation_duration(&self, operation: &str, duration_seconds: f64) {
        self.cache_operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.record_admission("admitted");
        metrics.record_admission("rejected");
        metrics.record_admission("rejected");
        metrics.record_cache_operation("increment", "ok");
        metrics.record_cache_operation_duration("increment", 0.002);

        let _timer = metrics.start_admission_timer();

        assert_eq!(metrics.admission_count("admitted"), 1);
        assert_eq!(metrics.admission_count("rejected"), 2);
        assert_eq!(metrics.cache_operation_count("increment", "ok"), 1);
    }

    #[test]
    fn test_metrics_gathering() {
        let metrics = Metrics::new().unwrap();
        metrics.record_admission("failed_open");

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "reviewer_admission_decisions_total"));

        let text = metrics.render().unwrap();
        assert!(text.contains("reviewer_admission_decisions_total{outcome=\"failed_open\"} 1"));
    }
}
