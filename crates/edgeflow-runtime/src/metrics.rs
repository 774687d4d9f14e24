//! Prometheus metrics for the pipeline

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics collection shared by stages, the publisher and the dispatcher.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub records_processed: CounterVec,
    pub records_dropped: CounterVec,
    pub processing_latency: HistogramVec,
    pub queue_depth: GaugeVec,
    pub published_total: CounterVec,
    pub publish_errors: CounterVec,
    pub dispatched_total: CounterVec,
    pub callback_errors: CounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let records_processed = CounterVec::new(
            Opts::new("edgeflow_records_processed", "Records processed by stage"),
            &["stage"],
        )
        .expect("failed to create records_processed counter");

        let records_dropped = CounterVec::new(
            Opts::new("edgeflow_records_dropped", "Records dropped by stage and reason"),
            &["stage", "reason"],
        )
        .expect("failed to create records_dropped counter");

        let processing_latency = HistogramVec::new(
            HistogramOpts::new(
                "edgeflow_processing_latency_seconds",
                "Per-record plugin processing latency",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
            &["stage"],
        )
        .expect("failed to create processing_latency histogram");

        let queue_depth = GaugeVec::new(
            Opts::new("edgeflow_queue_depth", "Stage input queue depth"),
            &["stage"],
        )
        .expect("failed to create queue_depth gauge");

        let published_total = CounterVec::new(
            Opts::new("edgeflow_published_total", "Records published per topic"),
            &["topic"],
        )
        .expect("failed to create published_total counter");

        let publish_errors = CounterVec::new(
            Opts::new("edgeflow_publish_errors_total", "Publish failures per topic and reason"),
            &["topic", "reason"],
        )
        .expect("failed to create publish_errors counter");

        let dispatched_total = CounterVec::new(
            Opts::new("edgeflow_dispatched_total", "Callback invocations per stream"),
            &["stream"],
        )
        .expect("failed to create dispatched_total counter");

        let callback_errors = CounterVec::new(
            Opts::new("edgeflow_callback_errors_total", "Failed callbacks per stream"),
            &["stream"],
        )
        .expect("failed to create callback_errors counter");

        registry
            .register(Box::new(records_processed.clone()))
            .expect("failed to register records_processed");
        registry
            .register(Box::new(records_dropped.clone()))
            .expect("failed to register records_dropped");
        registry
            .register(Box::new(processing_latency.clone()))
            .expect("failed to register processing_latency");
        registry
            .register(Box::new(queue_depth.clone()))
            .expect("failed to register queue_depth");
        registry
            .register(Box::new(published_total.clone()))
            .expect("failed to register published_total");
        registry
            .register(Box::new(publish_errors.clone()))
            .expect("failed to register publish_errors");
        registry
            .register(Box::new(dispatched_total.clone()))
            .expect("failed to register dispatched_total");
        registry
            .register(Box::new(callback_errors.clone()))
            .expect("failed to register callback_errors");

        Self {
            registry: Arc::new(registry),
            records_processed,
            records_dropped,
            processing_latency,
            queue_depth,
            published_total,
            publish_errors,
            dispatched_total,
            callback_errors,
        }
    }

    pub fn record_processed(&self, stage: &str, latency_secs: f64) {
        self.records_processed.with_label_values(&[stage]).inc();
        self.processing_latency
            .with_label_values(&[stage])
            .observe(latency_secs);
    }

    pub fn record_drop(&self, stage: &str, reason: &str) {
        self.records_dropped
            .with_label_values(&[stage, reason])
            .inc();
    }

    pub fn set_queue_depth(&self, stage: &str, depth: usize) {
        self.queue_depth
            .with_label_values(&[stage])
            .set(depth as f64);
    }

    pub fn record_published(&self, topic: &str) {
        self.published_total.with_label_values(&[topic]).inc();
    }

    pub fn record_publish_error(&self, topic: &str, reason: &str) {
        self.publish_errors
            .with_label_values(&[topic, reason])
            .inc();
    }

    pub fn record_dispatched(&self, stream: &str, callbacks: u64) {
        self.dispatched_total
            .with_label_values(&[stream])
            .inc_by(callbacks as f64);
    }

    pub fn record_callback_error(&self, stream: &str) {
        self.callback_errors.with_label_values(&[stream]).inc();
    }

    /// Prometheus text exposition output.
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

/// Minimal HTTP server exposing the `/metrics` endpoint.
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

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.addr).await?;
        info!("metrics server listening on http://{}/metrics", self.addr);

        loop {
            let (mut socket, _addr) = listener.accept().await?;

            let output = self.metrics.gather();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                output.len(),
                output
            );

            if let Err(e) = socket.write_all(response.as_bytes()).await {
                error!("failed to write metrics response: {}", e);
            }
        }
    }
}
