//! Prometheus metrics for the billing pipeline.
//!
//! Provides metrics for:
//! - Charge outcomes, points charged and charge latency
//! - Anomalous charges
//! - Auto-derived catalog records

use std::path::Path;
#[cfg(feature = "prometheus")]
use std::sync::OnceLock;

#[cfg(feature = "prometheus")]
use metrics::{counter, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Global Prometheus handle for rendering.
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics system with the given configuration.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &seconds_from_ms(&config.latency_buckets_ms),
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("billing_points_charged".to_string()),
            &config.points_buckets,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?;

    let handle = builder.install_recorder().map_err(MetricsError::Install)?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Setup("Metrics already initialized".to_string()))?;

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(_config: &MetricsConfig) -> Result<(), MetricsError> {
    Ok(())
}

/// Convert millisecond buckets to seconds.
#[cfg(feature = "prometheus")]
fn seconds_from_ms(ms_buckets: &[f64]) -> Vec<f64> {
    ms_buckets.iter().map(|ms| ms / 1000.0).collect()
}

/// Get the Prometheus handle for rendering metrics.
#[cfg(feature = "prometheus")]
pub fn get_prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render the current metrics in Prometheus text format, if initialized.
pub fn render() -> Option<String> {
    #[cfg(feature = "prometheus")]
    {
        get_prometheus_handle().map(|h| h.render())
    }
    #[cfg(not(feature = "prometheus"))]
    {
        None
    }
}

/// Write the current exposition to `path` in the Prometheus text format, for
/// a node exporter textfile collector to pick up.
///
/// Returns `Ok(false)` and leaves `path` untouched when no recorder is
/// installed.
pub fn write_textfile(path: &Path) -> Result<bool, MetricsError> {
    match render() {
        Some(exposition) => {
            write_exposition(path, &exposition)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// The collector may read at any time, so the file is replaced by rename.
fn write_exposition(path: &Path, exposition: &str) -> std::io::Result<()> {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    std::fs::write(&staging, exposition)?;
    std::fs::rename(&staging, path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record the outcome of one charge attempt.
///
/// `outcome` is "completed" or a failure kind such as "insufficient_balance".
pub fn record_charge(model: &str, outcome: &str, points: i64, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "billing_charges_total",
            "model" => model.to_string(),
            "outcome" => outcome.to_string()
        )
        .increment(1);

        histogram!("billing_charge_duration_seconds", "outcome" => outcome.to_string())
            .record(duration_secs);

        if points > 0 {
            histogram!("billing_points_charged", "model" => model.to_string())
                .record(points as f64);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (model, outcome, points, duration_secs);
    }
}

/// Record a charge above the anomaly threshold.
pub fn record_charge_anomaly(model: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("billing_charge_anomalies_total", "model" => model.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = model;
    }
}

/// Record an auto-derived price record.
///
/// `result` is "created", "existing" or "error".
pub fn record_auto_derived_price(result: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!("pricing_auto_derived_total", "result" => result.to_string()).increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = result;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[error("Failed to write metrics file: {0}")]
    Write(#[from] std::io::Error),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exposition_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.prom");
        std::fs::write(&path, "stale").unwrap();

        write_exposition(&path, "billing_charges_total 3\n").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "billing_charges_total 3\n"
        );
        assert!(!dir.path().join("tollgate.prom.tmp").exists());
    }

    #[test]
    fn test_textfile_skipped_without_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.prom");

        assert!(!write_textfile(&path).unwrap());
        assert!(!path.exists());
    }
}
