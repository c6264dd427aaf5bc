use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all service metrics
const PREFIX: &str = "adx";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Match pipeline metrics
    pub static ref MATCH_ATTEMPTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_match_attempts_total"), "Match attempts by outcome"),
        &["cause"]
    ).expect("Failed to create match_attempts_total metric");

    pub static ref MATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_match_duration_seconds"),
            "Duration of a whole match attempt, cleanup included"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 25.0, 30.0]),
        &["cause"]
    ).expect("Failed to create match_duration_seconds metric");

    pub static ref CONVERSION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_conversion_duration_seconds"),
            "ffmpeg conversion duration in seconds"
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]),
        &["status"]
    ).expect("Failed to create conversion_duration_seconds metric");

    pub static ref STAGING_CLEANUP_FAILURES_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_staging_cleanup_failures_total"),
        "Staged files that could not be deleted"
    ).expect("Failed to create staging_cleanup_failures_total metric");

    pub static ref UPLOAD_BYTES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_upload_bytes_total"), "Bytes written to the staging area"),
        &["kind"]
    ).expect("Failed to create upload_bytes_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(MATCH_ATTEMPTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CONVERSION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(STAGING_CLEANUP_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLOAD_BYTES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Collapse request paths into a bounded label set.
pub fn categorize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/upload" => "/upload",
        "/match" => "/match",
        "/clear_files" => "/clear_files",
        _ => "other",
    }
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    let path = categorize_endpoint(path);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Record the end of a match attempt
pub fn record_match_outcome(cause: &str, duration: Duration) {
    MATCH_ATTEMPTS_TOTAL.with_label_values(&[cause]).inc();
    MATCH_DURATION_SECONDS
        .with_label_values(&[cause])
        .observe(duration.as_secs_f64());
}

pub fn record_conversion(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    CONVERSION_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration.as_secs_f64());
}

pub fn record_cleanup_failures(count: usize) {
    STAGING_CLEANUP_FAILURES_TOTAL.inc_by(count as f64);
}

pub fn record_upload(kind: &str, bytes: usize) {
    UPLOAD_BYTES_TOTAL
        .with_label_values(&[kind])
        .inc_by(bytes as f64);
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
