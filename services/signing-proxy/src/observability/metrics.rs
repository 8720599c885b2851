//! Proxy Metrics
//!
//! Prometheus metrics for request outcomes, credential exchanges, upstream
//! statuses and streaming.

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "signing_proxy";

/// Service metrics with a private registry.
pub struct ProxyMetrics {
    registry: Registry,
    /// Requests by outcome
    pub requests: CounterVec,
    /// Credential resolution latency by identity
    pub credential_exchange_seconds: HistogramVec,
    /// Upstream responses by status
    pub upstream_responses: CounterVec,
    /// Stream frames by kind
    pub stream_frames: CounterVec,
    /// Streams currently being relayed
    pub active_streams: Gauge,
}

impl ProxyMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests = CounterVec::new(
            Opts::new("requests_total", "Total proxied requests by outcome").namespace(NAMESPACE),
            &["outcome"],
        )?;
        registry.register(Box::new(requests.clone()))?;

        let credential_exchange_seconds = HistogramVec::new(
            HistogramOpts::new(
                "credential_exchange_seconds",
                "Credential resolution latency in seconds",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["identity"],
        )?;
        registry.register(Box::new(credential_exchange_seconds.clone()))?;

        let upstream_responses = CounterVec::new(
            Opts::new("upstream_responses_total", "Upstream responses by status").namespace(NAMESPACE),
            &["status"],
        )?;
        registry.register(Box::new(upstream_responses.clone()))?;

        let stream_frames = CounterVec::new(
            Opts::new("stream_frames_total", "Relayed stream frames by type").namespace(NAMESPACE),
            &["frame"],
        )?;
        registry.register(Box::new(stream_frames.clone()))?;

        let active_streams = Gauge::with_opts(
            Opts::new("active_streams", "Streams currently being relayed").namespace(NAMESPACE),
        )?;
        registry.register(Box::new(active_streams.clone()))?;

        Ok(Self {
            registry,
            requests,
            credential_exchange_seconds,
            upstream_responses,
            stream_frames,
            active_streams,
        })
    }

    /// Records a request outcome.
    pub fn record_outcome(&self, outcome: &str) {
        self.requests.with_label_values(&[outcome]).inc();
    }

    /// Records credential resolution latency.
    pub fn record_credential_exchange(&self, identity: &str, seconds: f64) {
        self.credential_exchange_seconds
            .with_label_values(&[identity])
            .observe(seconds);
    }

    /// Records an upstream status.
    pub fn record_upstream_status(&self, status: u16) {
        self.upstream_responses
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    /// Records relayed frames.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_frames(&self, frame: &str, count: u64) {
        self.stream_frames
            .with_label_values(&[frame])
            .inc_by(count as f64);
    }

    /// Renders all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
