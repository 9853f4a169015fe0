use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the process-wide `Metrics`.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| async {
            info!("Initializing Metrics ...");
            Metrics::new()
        })
        .await
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub http_requests: IntCounterVec,
    pub http_retries: IntCounterVec,
    pub http_request_duration: HistogramVec,
    pub transport_failures: IntCounter,

    // Credential metrics
    pub token_refreshes: IntCounterVec,
    pub gate_wait: Histogram,

    // Batch metrics
    pub batch_calls: IntCounter,
    pub batch_items: IntCounter,
}

const VALID_DEFINITION: &str = "static metric definition is valid";

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("cloudstore".into()), None)
            .expect(VALID_DEFINITION);

        let metrics: Arc<Metrics> = Arc::new(Self {
            // Requests
            http_requests: IntCounterVec::new(Opts::new("http_requests_total", "Logical requests by method and final status"), &["method", "status"]).expect(VALID_DEFINITION),
            http_retries: IntCounterVec::new(Opts::new("http_retries_total", "Retried physical attempts by reason"), &["reason"]).expect(VALID_DEFINITION),
            http_request_duration: HistogramVec::new(HistogramOpts::new("http_request_duration_seconds", "Round trip including retries and redirects").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]), &["method"]).expect(VALID_DEFINITION),
            transport_failures: IntCounter::new("transport_failures_total", "Exchanges that failed below HTTP").expect(VALID_DEFINITION),

            // Credentials
            token_refreshes: IntCounterVec::new(Opts::new("token_refresh_total", "Token endpoint exchanges by grant and result"), &["grant", "result"]).expect(VALID_DEFINITION),
            gate_wait: Histogram::with_opts(HistogramOpts::new("gate_wait_seconds", "Time spent waiting for exclusive token use").buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0])).expect(VALID_DEFINITION),

            // Batch
            batch_calls: IntCounter::new("batch_calls_total", "Physical batch calls").expect(VALID_DEFINITION),
            batch_items: IntCounter::new("batch_items_total", "Logical requests sent inside batch calls").expect(VALID_DEFINITION),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        let _ = reg.register(Box::new(metrics.http_requests.clone()));
        let _ = reg.register(Box::new(metrics.http_retries.clone()));
        let _ = reg.register(Box::new(metrics.http_request_duration.clone()));
        let _ = reg.register(Box::new(metrics.transport_failures.clone()));
        let _ = reg.register(Box::new(metrics.token_refreshes.clone()));
        let _ = reg.register(Box::new(metrics.gate_wait.clone()));
        let _ = reg.register(Box::new(metrics.batch_calls.clone()));
        let _ = reg.register(Box::new(metrics.batch_items.clone()));

        metrics
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode_text(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
