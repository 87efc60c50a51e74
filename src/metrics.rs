use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("aggregator_samples_total", "Raw samples accepted into a window.");
        describe_counter!(
            "aggregator_flush_total",
            "Hourly aggregates produced, by status."
        );
        describe_counter!(
            "aggregator_duplicate_skips_total",
            "Flushes skipped because the hour was already stored."
        );
        describe_counter!(
            "aggregator_store_errors_total",
            "Duplicate-check or insert failures and timeouts."
        );
        describe_counter!(
            "aggregator_interpolated_samples_total",
            "Synthetic samples inserted by gap filling."
        );
        describe_counter!("aggregator_monitor_ticks_total", "Timeout monitor wake-ups.");
        describe_gauge!(
            "aggregator_window_samples",
            "Samples currently buffered per source."
        );
    });
}

/// Install the Prometheus recorder with its own HTTP listener.
/// Must be called from within a Tokio runtime.
pub fn install_prometheus(listen: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .context("prometheus: install recorder")?;
    ensure_metrics_described();
    tracing::info!(%listen, "prometheus exporter listening");
    Ok(())
}
