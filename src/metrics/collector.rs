// src/metrics/collector.rs
use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    pub fn gather(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("Failed to encode metrics")?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Inbound
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Upstream
    pub upstream_requests_total: IntCounterVec,
    pub upstream_request_duration_seconds: HistogramVec,

    // Registry
    pub registered_workers: IntGaugeVec,
    pub admin_operations_total: IntCounterVec,
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let requests_total = IntCounterVec::new(
            Opts::new("lb_requests_total", "Total number of requests"),
            &["method", "status_code"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["method"],
        )?;
        registry.register(Box::new(request_duration_seconds.clone()))?;

        let upstream_requests_total = IntCounterVec::new(
            Opts::new(
                "lb_upstream_requests_total",
                "Requests forwarded to workers",
            ),
            &["host", "outcome"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "lb_upstream_request_duration_seconds",
                "Worker round-trip duration in seconds",
            ),
            &["host"],
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        let registered_workers = IntGaugeVec::new(
            Opts::new("lb_registered_workers", "Workers registered per host"),
            &["host"],
        )?;
        registry.register(Box::new(registered_workers.clone()))?;

        let admin_operations_total = IntCounterVec::new(
            Opts::new(
                "lb_admin_operations_total",
                "Worker registration and removal calls",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(admin_operations_total.clone()))?;

        Ok(Self {
            requests_total,
            request_duration_seconds,
            upstream_requests_total,
            upstream_request_duration_seconds,
            registered_workers,
            admin_operations_total,
        })
    }

    pub fn record_request(&self, method: &str, status_code: u16, duration: Duration) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, status.as_str()])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method])
            .observe(duration.as_secs_f64());
    }

    pub fn record_upstream(&self, host: &str, outcome: &str, duration: Duration) {
        self.upstream_requests_total
            .with_label_values(&[host, outcome])
            .inc();

        self.upstream_request_duration_seconds
            .with_label_values(&[host])
            .observe(duration.as_secs_f64());
    }

    pub fn set_registered_workers(&self, host: &str, count: usize) {
        self.registered_workers
            .with_label_values(&[host])
            .set(count as i64);
    }

    pub fn record_admin_operation(&self, operation: &str, outcome: &str) {
        self.admin_operations_total
            .with_label_values(&[operation, outcome])
            .inc();
    }
}
