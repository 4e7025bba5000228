// src/poller.rs
//! The poll loop: fetch → filter → deliver → record → sleep.
//!
//! Exactly one cycle runs at a time. Shutdown and manual fetch requests are
//! only observed while `Sleeping`, so a delivery in flight always completes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::{self, Instant};

use crate::delivery::{Delivered, DeliveryPipeline};
use crate::feed::AlertFeed;
use crate::identity::identity;
use crate::metrics::ensure_metrics_described;
use crate::status::{StatusEvent, StatusReporter};
use crate::store::DedupStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Fetching,
    Filtering,
    Delivering,
    Sleeping,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetch_failed: bool,
    pub fetched: usize,
    /// Already in the store, or repeated within this batch.
    pub duplicates: usize,
    pub delivered: usize,
    pub delivered_without_audio: usize,
    pub failed: usize,
    /// Sent but not remembered; may be re-sent after a restart.
    pub record_failures: usize,
}

impl CycleReport {
    pub fn posted(&self) -> usize {
        self.delivered + self.delivered_without_audio
    }
}

pub struct Poller {
    feed: Arc<dyn AlertFeed>,
    store: Arc<DedupStore>,
    pipeline: DeliveryPipeline,
    reporter: StatusReporter,
    interval: Duration,
    post_delay: Duration,
    state: watch::Sender<PollState>,
    trigger: Arc<Notify>,
}

impl Poller {
    pub fn new(
        feed: Arc<dyn AlertFeed>,
        store: Arc<DedupStore>,
        pipeline: DeliveryPipeline,
        reporter: StatusReporter,
        interval: Duration,
    ) -> Self {
        ensure_metrics_described();
        let (state, _) = watch::channel(PollState::Idle);
        Self {
            feed,
            store,
            pipeline,
            reporter,
            interval,
            post_delay: Duration::from_secs(1),
            state,
            trigger: Arc::new(Notify::new()),
        }
    }

    /// Pause between two deliveries of the same cycle.
    pub fn with_post_delay(mut self, d: Duration) -> Self {
        self.post_delay = d;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    /// Wakes the loop early from `Sleeping` (a stored permit if it is busy).
    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    fn set_state(&self, s: PollState) {
        self.state.send_replace(s);
    }

    /// One full cycle, ending in `Sleeping`.
    pub async fn run_cycle(&self) -> CycleReport {
        let t0 = Instant::now();
        let mut report = CycleReport::default();

        self.set_state(PollState::Fetching);
        let alerts = match self.feed.fetch_active().await {
            Ok(alerts) => alerts,
            Err(e) => {
                tracing::warn!(target: "poller", error = %e, "fetch failed, skipping cycle");
                self.reporter.report(StatusEvent::FetchFailed {
                    reason: e.to_string(),
                });
                report.fetch_failed = true;
                self.set_state(PollState::Sleeping);
                return report;
            }
        };
        report.fetched = alerts.len();

        self.set_state(PollState::Filtering);
        let mut seen = HashSet::with_capacity(alerts.len());
        let mut fresh = Vec::new();
        for alert in alerts {
            let id = identity(&alert);
            if !seen.insert(id.clone()) || self.store.contains(&id).await {
                report.duplicates += 1;
                continue;
            }
            fresh.push((id, alert));
        }
        counter!("eas_alerts_duplicate_total").increment(report.duplicates as u64);
        if !fresh.is_empty() {
            tracing::info!(target: "poller", new = fresh.len(), fetched = report.fetched, "new alerts to deliver");
        }

        self.set_state(PollState::Delivering);
        for (i, (id, alert)) in fresh.iter().enumerate() {
            if i > 0 && !self.post_delay.is_zero() {
                time::sleep(self.post_delay).await;
            }
            match self.pipeline.deliver(alert).await {
                Ok(outcome) => {
                    match outcome {
                        Delivered::Full => report.delivered += 1,
                        Delivered::WithoutAudio { .. } => report.delivered_without_audio += 1,
                    }
                    if let Err(e) = self.store.record(id).await {
                        report.record_failures += 1;
                        tracing::error!(
                            target: "poller",
                            id = id.short(),
                            error = %e,
                            "alert sent but not recorded; it may be re-sent after restart"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: "poller",
                        id = id.short(),
                        error = %e,
                        "delivery failed; alert stays eligible for the next cycle"
                    );
                }
            }
        }

        histogram!("eas_poll_cycle_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("eas_poll_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::debug!(target: "poller", ?report, "cycle finished");

        self.set_state(PollState::Sleeping);
        report
    }

    /// Loop until `shutdown` turns true (or its sender is dropped).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            target: "poller",
            interval_secs = self.interval.as_secs(),
            "poll loop started"
        );
        loop {
            self.run_cycle().await;
            if !self.sleep(&mut shutdown).await {
                break;
            }
        }
        self.set_state(PollState::Idle);
        tracing::info!(target: "poller", "poll loop stopped");
    }

    /// Returns false when shutdown was requested.
    async fn sleep(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return false;
        }
        let deadline = Instant::now() + self.interval;
        loop {
            tokio::select! {
                _ = time::sleep_until(deadline) => return true,
                _ = self.trigger.notified() => {
                    tracing::info!(target: "poller", "manual fetch requested");
                    return true;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return false;
                    }
                }
            }
        }
    }
}
