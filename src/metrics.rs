use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once, from the binary.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("eas_feed_fetch_total", "Feed batch requests issued.");
        describe_counter!(
            "eas_feed_fetch_errors_total",
            "Feed batch requests that failed (cycle skipped)."
        );
        describe_counter!(
            "eas_feed_rejected_records_total",
            "Feed records skipped for missing required fields."
        );
        describe_counter!(
            "eas_alerts_duplicate_total",
            "Alerts dropped as already delivered or repeated in a batch."
        );
        describe_counter!("eas_alerts_delivered_total", "Alerts delivered with audio (or none needed).");
        describe_counter!(
            "eas_alerts_delivered_without_audio_total",
            "Alerts delivered as text after an audio failure."
        );
        describe_counter!(
            "eas_alerts_delivery_failed_total",
            "Alerts whose notice could not be sent after retries."
        );
        describe_counter!(
            "eas_store_write_errors_total",
            "Dedup journal appends that failed after a successful send."
        );
        describe_counter!(
            "eas_status_dropped_total",
            "Status reports dropped because the queue was full."
        );
        describe_gauge!("eas_store_identities", "Identities in the dedup store.");
        describe_gauge!("eas_poll_last_run_ts", "Unix ts when the last poll cycle finished.");
        describe_histogram!("eas_poll_cycle_ms", "Poll cycle duration in milliseconds.");
        describe_histogram!("eas_feed_fetch_ms", "Feed batch fetch + parse time in milliseconds.");
    });
}
