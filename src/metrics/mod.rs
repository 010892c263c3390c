//! Metrics module
//!
//! Prometheus metrics in the default registry. A one-shot CLI has nothing to
//! scrape, so the text exposition is written to a file at exit for the
//! node-exporter textfile collector.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, register_histogram_vec, Counter,
    CounterVec, Encoder, Histogram, HistogramVec, TextEncoder,
};
use std::io;
use std::path::Path;

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "throttle_uploadr_uploads_total",
        "Total number of uploads",
        &["bucket", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "throttle_uploadr_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "throttle_uploadr_upload_duration_seconds",
        "Upload duration in seconds",
        &["bucket"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0]
    ).unwrap();

    // Throttling
    pub static ref THROTTLE_WAIT: Histogram = register_histogram!(
        "throttle_uploadr_throttle_wait_seconds",
        "Time spent waiting on the rate limiter per upload",
        vec![0.0, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "throttle_uploadr_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(bucket: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
pub fn record_upload_failure(bucket: &str) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "failure"]).inc();
}

/// Record upload duration
pub fn record_upload_duration(bucket: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[bucket])
        .observe(duration_secs);
}

pub fn record_throttle_wait(wait_secs: f64) {
    THROTTLE_WAIT.observe(wait_secs);
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Render the default registry in the text exposition format
pub fn render() -> io::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(buffer)
}

/// Write the exposition to `path`.
///
/// The file is written next to its destination and renamed into place so a
/// collector never reads a partial file.
pub fn write_textfile(path: &Path) -> io::Result<()> {
    let buffer = render()?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "metrics path has no file name"))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    std::fs::write(&tmp, buffer)?;
    std::fs::rename(&tmp, path)
}
