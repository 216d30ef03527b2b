//! Prometheus metrics for the HA control plane
//!
//! Exposes metrics via HTTP endpoint for Prometheus scraping.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::OnceLock;

use crate::coverage::CoverageSet;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    pub registry: Registry,

    // Detection
    /// Probe outcomes by cluster type
    pub probes_total: IntCounterVec,
    pub probe_duration_seconds: HistogramVec,
    /// Reports written to the status store
    pub reports_written_total: IntCounterVec,
    /// Healthy reports held back by the report policy
    pub reports_suppressed: IntCounter,
    pub escalations_total: IntCounterVec,

    // Arbitration
    /// Terminal double-check decisions
    pub switch_decisions_total: IntCounterVec,

    // Local resources
    pub limiter_rejected_total: IntCounterVec,
    pub store_errors_total: IntCounterVec,

    // Coverage
    pub coverage_need_instances: IntGauge,
    pub coverage_detected_instances: IntGauge,
    pub coverage_uncovered_instances: IntGauge,
    pub coverage_uncovered_cities: IntGauge,
    pub slow_components_total: IntCounterVec,

    /// Alerts emitted by event name
    pub alerts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let probes_total = IntCounterVec::new(
            Opts::new("dbha_probes_total", "Total number of probes by outcome"),
            &["cluster_type", "outcome"],
        )
        .unwrap();

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new("dbha_probe_duration_seconds", "Probe latency in seconds")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["cluster_type"],
        )
        .unwrap();

        let reports_written_total = IntCounterVec::new(
            Opts::new(
                "dbha_reports_written_total",
                "Total number of detection reports written",
            ),
            &["outcome"],
        )
        .unwrap();

        let reports_suppressed = IntCounter::new(
            "dbha_reports_suppressed_total",
            "Total number of healthy reports suppressed by the report policy",
        )
        .unwrap();

        let escalations_total = IntCounterVec::new(
            Opts::new(
                "dbha_escalations_total",
                "Total number of instances escalated to switch candidates",
            ),
            &["cluster_type"],
        )
        .unwrap();

        let switch_decisions_total = IntCounterVec::new(
            Opts::new(
                "dbha_switch_decisions_total",
                "Total number of terminal double-check decisions",
            ),
            &["decision"],
        )
        .unwrap();

        let limiter_rejected_total = IntCounterVec::new(
            Opts::new(
                "dbha_limiter_rejected_total",
                "Total number of limiter acquires that gave up",
            ),
            &["resource"],
        )
        .unwrap();

        let store_errors_total = IntCounterVec::new(
            Opts::new("dbha_store_errors_total", "Total number of failed store calls"),
            &["op"],
        )
        .unwrap();

        let coverage_need_instances = IntGauge::new(
            "dbha_coverage_need_instances",
            "Instances that must be detected",
        )
        .unwrap();

        let coverage_detected_instances = IntGauge::new(
            "dbha_coverage_detected_instances",
            "Instances with a fresh detection record",
        )
        .unwrap();

        let coverage_uncovered_instances = IntGauge::new(
            "dbha_coverage_uncovered_instances",
            "Instances without a fresh detection record",
        )
        .unwrap();

        let coverage_uncovered_cities = IntGauge::new(
            "dbha_coverage_uncovered_cities",
            "Localities without a live agent",
        )
        .unwrap();

        let slow_components_total = IntCounterVec::new(
            Opts::new(
                "dbha_slow_components_total",
                "Total number of component liveness violations",
            ),
            &["kind"],
        )
        .unwrap();

        let alerts_total = IntCounterVec::new(
            Opts::new("dbha_alerts_total", "Total number of alerts sent"),
            &["name"],
        )
        .unwrap();

        registry.register(Box::new(probes_total.clone())).unwrap();
        registry
            .register(Box::new(probe_duration_seconds.clone()))
            .unwrap();
        registry
            .register(Box::new(reports_written_total.clone()))
            .unwrap();
        registry
            .register(Box::new(reports_suppressed.clone()))
            .unwrap();
        registry
            .register(Box::new(escalations_total.clone()))
            .unwrap();
        registry
            .register(Box::new(switch_decisions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(limiter_rejected_total.clone()))
            .unwrap();
        registry
            .register(Box::new(store_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(coverage_need_instances.clone()))
            .unwrap();
        registry
            .register(Box::new(coverage_detected_instances.clone()))
            .unwrap();
        registry
            .register(Box::new(coverage_uncovered_instances.clone()))
            .unwrap();
        registry
            .register(Box::new(coverage_uncovered_cities.clone()))
            .unwrap();
        registry
            .register(Box::new(slow_components_total.clone()))
            .unwrap();
        registry.register(Box::new(alerts_total.clone())).unwrap();

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            reports_written_total,
            reports_suppressed,
            escalations_total,
            switch_decisions_total,
            limiter_rejected_total,
            store_errors_total,
            coverage_need_instances,
            coverage_detected_instances,
            coverage_uncovered_instances,
            coverage_uncovered_cities,
            slow_components_total,
            alerts_total,
        }
    }

    pub fn record_probe(&self, cluster_type: &str, outcome: &str, duration_secs: f64) {
        self.probes_total
            .with_label_values(&[cluster_type, outcome])
            .inc();
        self.probe_duration_seconds
            .with_label_values(&[cluster_type])
            .observe(duration_secs);
    }

    pub fn record_report_written(&self, outcome: &str) {
        self.reports_written_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_report_suppressed(&self) {
        self.reports_suppressed.inc();
    }

    pub fn record_escalation(&self, cluster_type: &str) {
        self.escalations_total.with_label_values(&[cluster_type]).inc();
    }

    pub fn record_switch_decision(&self, decision: &str) {
        self.switch_decisions_total
            .with_label_values(&[decision])
            .inc();
    }

    pub fn record_limiter_rejected(&self, resource: &str) {
        self.limiter_rejected_total
            .with_label_values(&[resource])
            .inc();
    }

    pub fn record_store_error(&self, op: &str) {
        self.store_errors_total.with_label_values(&[op]).inc();
    }

    pub fn record_slow_component(&self, kind: &str) {
        self.slow_components_total.with_label_values(&[kind]).inc();
    }

    pub fn record_alert(&self, name: &str) {
        self.alerts_total.with_label_values(&[name]).inc();
    }

    /// Publish the latest reconciliation result
    pub fn set_coverage(&self, coverage: &CoverageSet) {
        self.coverage_need_instances
            .set(coverage.need_instances.len() as i64);
        self.coverage_detected_instances
            .set(coverage.detected_instances.len() as i64);
        self.coverage_uncovered_instances
            .set(coverage.uncovered_instances.len() as i64);
        self.coverage_uncovered_cities
            .set(coverage.uncovered_cities.len() as i64);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(body.into()));
        *response.status_mut() = status;
        response
    }

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let mut response = respond(StatusCode::OK, metrics().gather());
                response.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(
                        "text/plain; version=0.0.4; charset=utf-8",
                    ),
                );
                response
            }
            "/health" => respond(StatusCode::OK, "OK"),
            _ => respond(StatusCode::NOT_FOUND, "Not Found"),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Metrics server listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!(error = %e, "Metrics server connection error");
            }
        });
    }
}
