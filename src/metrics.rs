/// Metrics and telemetry for Clipforge
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Publish attempts by mode and outcome
/// - Token refreshes and generation callbacks
/// - Background job execution
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Publishing Metrics ==========

    /// Publish attempts by mode and outcome
    pub static ref PUBLISH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tiktok_publish_total",
        "Total number of TikTok publish attempts",
        &["mode", "outcome"]
    )
    .unwrap();

    /// Token refreshes by outcome
    pub static ref TOKEN_REFRESH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tiktok_token_refresh_total",
        "Total number of TikTok token refresh attempts",
        &["outcome"]
    )
    .unwrap();

    /// Accounts linked through OAuth
    pub static ref ACCOUNTS_LINKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "tiktok_accounts_linked_total",
        "Total number of completed OAuth links",
        &["outcome"]
    )
    .unwrap();

    // ========== Generation Metrics ==========

    /// Generation callbacks by derived status
    pub static ref GENERATION_CALLBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_callbacks_total",
        "Total number of generation callbacks received",
        &["status"]
    )
    .unwrap();

    /// Generation runs enqueued by outcome
    pub static ref GENERATION_RUNS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "generation_runs_enqueued_total",
        "Total number of generation runs enqueued",
        &["outcome"]
    )
    .unwrap();

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "background_job_duration_seconds",
        "Background job execution time in seconds",
        &["job_type"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Active background jobs
    pub static ref BACKGROUND_JOBS_ACTIVE: IntGauge = register_int_gauge!(
        "background_jobs_active",
        "Number of background jobs currently running"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a publish attempt
pub fn record_publish(mode: &str, outcome: &str) {
    PUBLISH_TOTAL.with_label_values(&[mode, outcome]).inc();
}

/// Record a token refresh attempt
pub fn record_token_refresh(outcome: &str) {
    TOKEN_REFRESH_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a completed OAuth link
pub fn record_account_link(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    ACCOUNTS_LINKED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a generation callback
pub fn record_generation_callback(status: &str) {
    GENERATION_CALLBACKS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a generation enqueue
pub fn record_generation_enqueue(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    GENERATION_RUNS_ENQUEUED_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str, duration: f64) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_type])
        .observe(duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/health", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_publish_and_refresh() {
        record_publish("direct", "success");
        record_token_refresh("refreshed");
        let metrics = render_metrics();
        assert!(metrics.contains("tiktok_publish_total"));
        assert!(metrics.contains("tiktok_token_refresh_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("asset_cleanup", "success", 1.5);
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
        assert!(metrics.contains("background_job_duration_seconds"));
    }

    #[test]
    fn test_record_generation_callback() {
        record_generation_callback("completed");
        assert!(render_metrics().contains("generation_callbacks_total"));
    }
}
