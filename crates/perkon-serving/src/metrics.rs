//! Prometheus metrics for the serving plane

use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics collection for the serving plane
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub predictions_total: CounterVec,
    pub prediction_latency: HistogramVec,
    pub cache_requests_total: CounterVec,
    pub cache_entries: Gauge,
    pub batch_duration: HistogramVec,
    pub instances_active: GaugeVec,
    pub model_health_score: GaugeVec,
    pub alerts_total: CounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let predictions_total = CounterVec::new(
            Opts::new("perkon_predictions_total", "Predictions served by outcome"),
            &["model", "outcome"],
        )
        .expect("failed to create predictions_total counter");

        let prediction_latency = HistogramVec::new(
            HistogramOpts::new(
                "perkon_prediction_latency_seconds",
                "Single prediction latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["model"],
        )
        .expect("failed to create prediction_latency histogram");

        let cache_requests_total = CounterVec::new(
            Opts::new("perkon_cache_requests_total", "Cache lookups by result"),
            &["namespace", "result"],
        )
        .expect("failed to create cache_requests_total counter");

        let cache_entries = Gauge::new("perkon_cache_entries", "Live cache entries")
            .expect("failed to create cache_entries gauge");

        let batch_duration = HistogramVec::new(
            HistogramOpts::new("perkon_batch_duration_seconds", "Batch job duration")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["model"],
        )
        .expect("failed to create batch_duration histogram");

        let instances_active = GaugeVec::new(
            Opts::new("perkon_instances_active", "Active instances per model"),
            &["model"],
        )
        .expect("failed to create instances_active gauge");

        let model_health_score = GaugeVec::new(
            Opts::new("perkon_model_health_score", "Latest composite health score"),
            &["model"],
        )
        .expect("failed to create model_health_score gauge");

        let alerts_total = CounterVec::new(
            Opts::new("perkon_alerts_total", "Alerts raised"),
            &["kind", "severity"],
        )
        .expect("failed to create alerts_total counter");

        registry
            .register(Box::new(predictions_total.clone()))
            .expect("failed to register predictions_total");
        registry
            .register(Box::new(prediction_latency.clone()))
            .expect("failed to register prediction_latency");
        registry
            .register(Box::new(cache_requests_total.clone()))
            .expect("failed to register cache_requests_total");
        registry
            .register(Box::new(cache_entries.clone()))
            .expect("failed to register cache_entries");
        registry
            .register(Box::new(batch_duration.clone()))
            .expect("failed to register batch_duration");
        registry
            .register(Box::new(instances_active.clone()))
            .expect("failed to register instances_active");
        registry
            .register(Box::new(model_health_score.clone()))
            .expect("failed to register model_health_score");
        registry
            .register(Box::new(alerts_total.clone()))
            .expect("failed to register alerts_total");

        Self {
            registry: Arc::new(registry),
            predictions_total,
            prediction_latency,
            cache_requests_total,
            cache_entries,
            batch_duration,
            instances_active,
            model_health_score,
            alerts_total,
        }
    }

    /// Record one served prediction with its latency
    pub fn record_prediction(&self, model: &str, latency_secs: f64, success: bool) {
        let outcome = if success { "success" } else { "error" };
        self.predictions_total
            .with_label_values(&[model, outcome])
            .inc();
        self.prediction_latency
            .with_label_values(&[model])
            .observe(latency_secs);
    }

    /// Record a cache lookup result
    pub fn record_cache(&self, namespace: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.cache_requests_total
            .with_label_values(&[namespace, result])
            .inc();
    }

    pub fn set_cache_entries(&self, count: usize) {
        self.cache_entries.set(count as f64);
    }

    /// Record a completed batch job
    pub fn record_batch(&self, model: &str, duration_secs: f64) {
        self.batch_duration
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn set_active_instances(&self, model: &str, count: usize) {
        self.instances_active
            .with_label_values(&[model])
            .set(count as f64);
    }

    pub fn set_health_score(&self, model: &str, score: f64) {
        self.model_health_score
            .with_label_values(&[model])
            .set(score);
    }

    /// Record a raised alert
    pub fn record_alert(&self, kind: &str, severity: &str) {
        self.alerts_total.with_label_values(&[kind, severity]).inc();
    }

    /// Get Prometheus text output
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP server for the Prometheus metrics endpoint
pub struct MetricsServer {
    metrics: Metrics,
    addr: String,
}

impl MetricsServer {
    pub fn new(metrics: Metrics, addr: impl Into<String>) -> Self {
        Self {
            metrics,
            addr: addr.into(),
        }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("Metrics server listening on http://{}/metrics", self.addr);

        loop {
            let (mut socket, _addr) = listener.accept().await?;

            let metrics_output = self.metrics.gather();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics_output.len(),
                metrics_output
            );

            if let Err(e) = socket.write_all(response.as_bytes()).await {
                error!("Failed to write response: {}", e);
            }
        }
    }
}
