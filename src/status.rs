// src/status.rs
//! Status reporter: observational outcome events. Logged, counted, and (when a
//! log channel is configured) posted by a background worker. Never blocks or
//! fails its caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::identity::AlertId;
use crate::notify::{Channel, ChannelId};

const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Delivered {
        event_type: String,
        id: AlertId,
    },
    DeliveredWithoutAudio {
        event_type: String,
        id: AlertId,
        reason: String,
    },
    FetchFailed {
        reason: String,
    },
    DeliveryFailed {
        event_type: String,
        id: AlertId,
        reason: String,
    },
}

impl StatusEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StatusEvent::Delivered { .. } => "delivered",
            StatusEvent::DeliveredWithoutAudio { .. } => "delivered-without-audio",
            StatusEvent::FetchFailed { .. } => "fetch-failed",
            StatusEvent::DeliveryFailed { .. } => "delivery-failed",
        }
    }

    /// One-line message for the log channel.
    pub fn to_line(&self) -> String {
        match self {
            StatusEvent::Delivered { event_type, id } => {
                format!("✅ Posted: `{event_type}` (ID: `{}`)", id.short())
            }
            StatusEvent::DeliveredWithoutAudio {
                event_type,
                id,
                reason,
            } => format!(
                "⚠️ Posted without audio: `{event_type}` (ID: `{}`): {reason}",
                id.short()
            ),
            StatusEvent::FetchFailed { reason } => format!("❌ Feed fetch failed: {reason}"),
            StatusEvent::DeliveryFailed {
                event_type,
                id,
                reason,
            } => format!(
                "❌ Failed to post `{event_type}` (ID: `{}`), will retry next cycle: {reason}",
                id.short()
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    delivered_without_audio: AtomicU64,
    fetch_failed: AtomicU64,
    delivery_failed: AtomicU64,
    dropped: AtomicU64,
}

/// Session totals since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub delivered: u64,
    pub delivered_without_audio: u64,
    pub fetch_failed: u64,
    pub delivery_failed: u64,
    pub dropped_reports: u64,
}

impl StatusSnapshot {
    /// Alerts that reached the channel, with or without audio.
    pub fn posted(&self) -> u64 {
        self.delivered + self.delivered_without_audio
    }
}

#[derive(Clone)]
pub struct StatusReporter {
    counters: Arc<Counters>,
    tx: Option<mpsc::Sender<StatusEvent>>,
}

impl StatusReporter {
    /// Log + count only.
    pub fn disabled() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            tx: None,
        }
    }

    /// Also post every event to `log_channel` from a background task.
    pub fn spawn(channel: Arc<dyn Channel>, log_channel: ChannelId) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<StatusEvent>(QUEUE_CAPACITY);
        let worker = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                if let Err(e) = channel.send_text(log_channel, &ev.to_line()).await {
                    tracing::warn!(
                        target: "status",
                        channel = %log_channel,
                        kind = ev.kind(),
                        error = %e,
                        "status post failed"
                    );
                }
            }
        });
        let reporter = Self {
            counters: Arc::new(Counters::default()),
            tx: Some(tx),
        };
        (reporter, worker)
    }

    pub fn report(&self, event: StatusEvent) {
        let c = &self.counters;
        match &event {
            StatusEvent::Delivered { event_type, id } => {
                c.delivered.fetch_add(1, Ordering::Relaxed);
                counter!("eas_alerts_delivered_total").increment(1);
                tracing::info!(target: "status", %event_type, id = id.short(), "alert delivered");
            }
            StatusEvent::DeliveredWithoutAudio {
                event_type,
                id,
                reason,
            } => {
                c.delivered_without_audio.fetch_add(1, Ordering::Relaxed);
                counter!("eas_alerts_delivered_without_audio_total").increment(1);
                tracing::warn!(target: "status", %event_type, id = id.short(), %reason, "alert delivered without audio");
            }
            StatusEvent::FetchFailed { reason } => {
                c.fetch_failed.fetch_add(1, Ordering::Relaxed);
                counter!("eas_feed_fetch_errors_total").increment(1);
                tracing::warn!(target: "status", %reason, "feed fetch failed");
            }
            StatusEvent::DeliveryFailed {
                event_type,
                id,
                reason,
            } => {
                c.delivery_failed.fetch_add(1, Ordering::Relaxed);
                counter!("eas_alerts_delivery_failed_total").increment(1);
                tracing::error!(target: "status", %event_type, id = id.short(), %reason, "alert delivery failed");
            }
        }

        if let Some(tx) = &self.tx {
            if tx.try_send(event).is_err() {
                c.dropped.fetch_add(1, Ordering::Relaxed);
                counter!("eas_status_dropped_total").increment(1);
                tracing::warn!(target: "status", "status queue full or closed, dropping report");
            }
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let c = &self.counters;
        StatusSnapshot {
            delivered: c.delivered.load(Ordering::Relaxed),
            delivered_without_audio: c.delivered_without_audio.load(Ordering::Relaxed),
            fetch_failed: c.fetch_failed.load(Ordering::Relaxed),
            delivery_failed: c.delivery_failed.load(Ordering::Relaxed),
            dropped_reports: c.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Wait up to `within` for `worker` to post what is still queued. Every
/// reporter clone must be dropped first or the worker never finishes.
/// Returns false when lines were abandoned.
pub async fn drain(worker: JoinHandle<()>, within: Duration) -> bool {
    match tokio::time::timeout(within, worker).await {
        Ok(_) => true,
        Err(_) => {
            tracing::warn!(
                target: "status",
                within_ms = within.as_millis() as u64,
                "status queue not drained, dropping remaining lines"
            );
            false
        }
    }
}
