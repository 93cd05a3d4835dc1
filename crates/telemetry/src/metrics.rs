use std::time::Duration;

use prometheus::{
    exponential_buckets, CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts,
    Registry, TextEncoder,
};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Process-wide metric set. Built once at startup and handed around as an
/// `Arc` so the handler and health tasks can be tested with their own
/// registries.
pub struct Metrics {
    registry: Registry,

    pub http_requests: CounterVec,          // method, status_code, backend
    pub http_request_duration: HistogramVec, // method, backend
    pub http_request_size: HistogramVec,    // method, backend
    pub http_response_size: HistogramVec,   // status_code, backend

    pub backend_requests: CounterVec,       // backend, status
    pub backend_response_time: HistogramVec, // backend
    pub backend_health: GaugeVec,           // backend
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "status_code", "backend"],
        )
        .expect("metric definition");

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "Duration of HTTP requests")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["method", "backend"],
        )
        .expect("metric definition");

        let http_request_size = HistogramVec::new(
            HistogramOpts::new("http_request_size_bytes", "Size of HTTP requests in bytes")
                .buckets(exponential_buckets(1024.0, 2.0, 10).expect("buckets")),
            &["method", "backend"],
        )
        .expect("metric definition");

        let http_response_size = HistogramVec::new(
            HistogramOpts::new(
                "http_response_size_bytes",
                "Size of HTTP responses in bytes",
            )
            .buckets(exponential_buckets(1024.0, 2.0, 15).expect("buckets")),
            &["status_code", "backend"],
        )
        .expect("metric definition");

        let backend_requests = CounterVec::new(
            Opts::new("backend_requests_total", "Total number of backend requests"),
            &["backend", "status"],
        )
        .expect("metric definition");

        let backend_response_time = HistogramVec::new(
            HistogramOpts::new("backend_response_time_seconds", "Backend response time")
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["backend"],
        )
        .expect("metric definition");

        let backend_health = GaugeVec::new(
            Opts::new(
                "backend_health_status",
                "Backend health status (1=healthy, 0=unhealthy)",
            ),
            &["backend"],
        )
        .expect("metric definition");

        for collector in [
            Box::new(http_requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(http_request_duration.clone()),
            Box::new(http_request_size.clone()),
            Box::new(http_response_size.clone()),
            Box::new(backend_requests.clone()),
            Box::new(backend_response_time.clone()),
            Box::new(backend_health.clone()),
        ] {
            registry.register(collector).expect("metric already registered");
        }

        Self {
            registry,
            http_requests,
            http_request_duration,
            http_request_size,
            http_response_size,
            backend_requests,
            backend_response_time,
            backend_health,
        }
    }

    pub fn record_http_request(
        &self,
        method: &str,
        status: u16,
        backend: &str,
        duration: Duration,
        request_size: u64,
    ) {
        let status = status.to_string();
        self.http_requests
            .with_label_values(&[method, &status, backend])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, backend])
            .observe(duration.as_secs_f64());
        self.http_request_size
            .with_label_values(&[method, backend])
            .observe(request_size as f64);
    }

    pub fn observe_response_size(&self, status: u16, backend: &str, size: u64) {
        self.http_response_size
            .with_label_values(&[&status.to_string(), backend])
            .observe(size as f64);
    }

    pub fn record_backend_request(&self, backend: &str, status: &str, response_time: Duration) {
        self.backend_requests
            .with_label_values(&[backend, status])
            .inc();
        self.backend_response_time
            .with_label_values(&[backend])
            .observe(response_time.as_secs_f64());
    }

    pub fn set_backend_health(&self, backend: &str, healthy: bool) {
        let value = if healthy { 1.0 } else { 0.0 };
        self.backend_health.with_label_values(&[backend]).set(value);
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn render(&self) -> Vec<u8> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .expect("text encoding");
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
