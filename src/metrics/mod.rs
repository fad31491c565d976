//! Prometheus metrics for the vigil liveness service
//!
//! Exposes metrics and a small operator surface via an HTTP endpoint.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Vigil metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Store metrics
    /// Store commands by kind and outcome
    pub store_commands_total: IntCounterVec,
    /// Commands per pipelined round-trip
    pub store_batch_size: HistogramVec,
    /// 1 while the prober considers the store dead
    pub store_dead: IntGaugeVec,
    /// Failed liveness probes
    pub store_probe_failures_total: IntCounterVec,
    /// Write operations slower than the slow-op threshold
    pub store_slow_ops_total: IntCounterVec,

    // Health checker metrics
    /// Heartbeat reports by backend
    pub reports_total: IntCounterVec,
    /// Check verdicts by backend and verdict
    pub check_verdicts_total: IntCounterVec,
    /// Check calls that failed
    pub check_errors_total: IntCounterVec,
    /// Last suspend time in unix seconds
    pub suspend_time_seconds: IntGaugeVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        // Store metrics
        let store_commands_total = IntCounterVec::new(
            Opts::new(
                "vigil_store_commands_total",
                "Total number of store commands by kind and outcome",
            ),
            &["kind", "outcome"], // get/set/delete/sadd/srem, ok/error
        )
        .unwrap();

        let store_batch_size = HistogramVec::new(
            HistogramOpts::new(
                "vigil_store_batch_size",
                "Number of commands per pipelined round-trip",
            )
            .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0]),
            &["addr"],
        )
        .unwrap();

        let store_dead = IntGaugeVec::new(
            Opts::new("vigil_store_dead", "Whether the remote store is considered dead"),
            &["addr"],
        )
        .unwrap();

        let store_probe_failures_total = IntCounterVec::new(
            Opts::new(
                "vigil_store_probe_failures_total",
                "Total number of failed store liveness probes",
            ),
            &["addr"],
        )
        .unwrap();

        let store_slow_ops_total = IntCounterVec::new(
            Opts::new(
                "vigil_store_slow_ops_total",
                "Total number of slow store write operations",
            ),
            &["kind"],
        )
        .unwrap();

        // Health checker metrics
        let reports_total = IntCounterVec::new(
            Opts::new("vigil_reports_total", "Total number of heartbeat reports"),
            &["backend"],
        )
        .unwrap();

        let check_verdicts_total = IntCounterVec::new(
            Opts::new(
                "vigil_check_verdicts_total",
                "Total number of check verdicts by result",
            ),
            &["backend", "verdict"], // healthy, unhealthy, unchanged
        )
        .unwrap();

        let check_errors_total = IntCounterVec::new(
            Opts::new("vigil_check_errors_total", "Total number of failed checks"),
            &["backend"],
        )
        .unwrap();

        let suspend_time_seconds = IntGaugeVec::new(
            Opts::new(
                "vigil_suspend_time_seconds",
                "Unix time of the last checker suspend",
            ),
            &["backend"],
        )
        .unwrap();

        // Register all metrics
        registry
            .register(Box::new(store_commands_total.clone()))
            .unwrap();
        registry
            .register(Box::new(store_batch_size.clone()))
            .unwrap();
        registry.register(Box::new(store_dead.clone())).unwrap();
        registry
            .register(Box::new(store_probe_failures_total.clone()))
            .unwrap();
        registry
            .register(Box::new(store_slow_ops_total.clone()))
            .unwrap();
        registry.register(Box::new(reports_total.clone())).unwrap();
        registry
            .register(Box::new(check_verdicts_total.clone()))
            .unwrap();
        registry
            .register(Box::new(check_errors_total.clone()))
            .unwrap();
        registry
            .register(Box::new(suspend_time_seconds.clone()))
            .unwrap();

        Self {
            registry,
            store_commands_total,
            store_batch_size,
            store_dead,
            store_probe_failures_total,
            store_slow_ops_total,
            reports_total,
            check_verdicts_total,
            check_errors_total,
            suspend_time_seconds,
        }
    }

    /// Record a completed store command
    pub fn record_store_command(&self, kind: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.store_commands_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    /// Record the size of a flushed pipeline
    pub fn observe_batch_size(&self, addr: &str, size: usize) {
        self.store_batch_size
            .with_label_values(&[addr])
            .observe(size as f64);
    }

    /// Record failed probes from one round
    pub fn record_probe_failures(&self, addr: &str, failures: u64) {
        self.store_probe_failures_total
            .with_label_values(&[addr])
            .inc_by(failures);
    }

    /// Update store dead/alive state
    pub fn set_store_dead(&self, addr: &str, dead: bool) {
        self.store_dead
            .with_label_values(&[addr])
            .set(i64::from(dead));
    }

    pub fn record_slow_op(&self, kind: &str) {
        self.store_slow_ops_total.with_label_values(&[kind]).inc();
    }

    /// Record a heartbeat report
    pub fn record_report(&self, backend: &str) {
        self.reports_total.with_label_values(&[backend]).inc();
    }

    /// Record a check verdict
    pub fn record_check_verdict(&self, backend: &str, verdict: &str) {
        self.check_verdicts_total
            .with_label_values(&[backend, verdict])
            .inc();
    }

    pub fn record_check_error(&self, backend: &str) {
        self.check_errors_total.with_label_values(&[backend]).inc();
    }

    /// Update the suspend time gauge
    pub fn set_suspend_time(&self, backend: &str, suspend_time_sec: i64) {
        self.suspend_time_seconds
            .with_label_values(&[backend])
            .set(suspend_time_sec);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the admin HTTP server
///
/// Serves `/metrics`, `/health` and the checker endpoints until `shutdown`
/// is cancelled.
pub async fn start_admin_server(
    addr: &str,
    checker: std::sync::Arc<dyn crate::health::HealthChecker>,
    shutdown: tokio_util::sync::CancellationToken,
) -> anyhow::Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Method, Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::fmt::Write as _;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tracing::{error, info};

    use crate::health::HealthChecker;

    fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
        let mut resp = Response::new(Full::new(Bytes::from(body)));
        *resp.status_mut() = status;
        resp
    }

    fn checker_status(checker: &dyn HealthChecker) -> String {
        let mut body = String::new();
        let _ = writeln!(body, "backend={}", checker.name());
        let _ = writeln!(body, "suspend_time_sec={}", checker.suspend_time_sec());
        if let Some(liveness) = checker.store_liveness() {
            let _ = writeln!(body, "store_dead={}", liveness.is_dead());
            let _ = writeln!(body, "store_recover_time_sec={}", liveness.recover_time_sec());
        }
        body
    }

    async fn handle_request(
        req: Request<hyper::body::Incoming>,
        checker: Arc<dyn HealthChecker>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let resp = match (req.method(), req.uri().path()) {
            (&Method::GET, "/metrics") => {
                let mut resp = text(StatusCode::OK, metrics().gather());
                resp.headers_mut().insert(
                    hyper::header::CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static(
                        "text/plain; version=0.0.4; charset=utf-8",
                    ),
                );
                resp
            }
            (&Method::GET, "/health") => text(StatusCode::OK, "OK".to_string()),
            (&Method::GET, "/checker/status") => {
                text(StatusCode::OK, checker_status(checker.as_ref()))
            }
            (&Method::POST, "/checker/suspend") => {
                checker.suspend();
                info!(
                    backend = checker.name(),
                    suspend_time_sec = checker.suspend_time_sec(),
                    "Checker suspended by operator"
                );
                text(
                    StatusCode::OK,
                    format!("suspend_time_sec={}\n", checker.suspend_time_sec()),
                )
            }
            _ => text(StatusCode::NOT_FOUND, "Not Found".to_string()),
        };
        Ok(resp)
    }

    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Admin server listening");

    loop {
        let (stream, _) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Admin server stopped");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        let io = TokioIo::new(stream);
        let checker = checker.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req| handle_request(req, checker.clone()));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(error = %e, "Admin server connection error");
            }
        });
    }
}
