// src/delivery.rs
//! Delivery pipeline: alert → notice (+ audio) → downstream channel, with
//! bounded retry. Outcomes are reported to the status reporter.

use std::sync::Arc;

use crate::alert::{parse_feed_time, Alert};
use crate::feed::AlertFeed;
use crate::identity::identity;
use crate::notify::{Channel, ChannelError, ChannelId, FieldValue, Notice, NoticeField};
use crate::retry::{retry, RetryPolicy};
use crate::status::{StatusEvent, StatusReporter};

pub const MAX_DESCRIPTION_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    /// Notice sent, plus audio when the alert had any.
    Full,
    /// Notice sent; audio missing for `reason` (download or upload failed).
    WithoutAudio { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery of {event_type} failed: {source}")]
pub struct DeliveryFailed {
    pub event_type: String,
    #[source]
    pub source: ChannelError,
}

/// Render an alert into the notice posted downstream.
pub fn format_notice(alert: &Alert) -> Notice {
    let description = if alert.message.chars().count() > MAX_DESCRIPTION_CHARS {
        let mut s: String = alert.message.chars().take(MAX_DESCRIPTION_CHARS).collect();
        s.push_str("...");
        s
    } else {
        alert.message.clone()
    };

    let time_value = |raw: Option<&str>| match raw {
        None => FieldValue::Text("N/A".into()),
        Some(r) => parse_feed_time(r)
            .map(FieldValue::Time)
            .unwrap_or_else(|| FieldValue::Text(r.to_string())),
    };
    let field = |name: &str, value: FieldValue| NoticeField {
        name: name.to_string(),
        value,
    };

    Notice {
        title: format!("📢 Alert: {} 📢", alert.event_type),
        description,
        fields: vec![
            field("Originator", FieldValue::Text(alert.originator.clone())),
            field(
                "Severity",
                FieldValue::Text(alert.severity.clone().unwrap_or_else(|| "N/A".into())),
            ),
            field("Start Time", time_value(Some(alert.effective.as_str()))),
            field("End Time", time_value(alert.expires.as_deref())),
        ],
        footer: format!(
            "ID: {} | Alert: {}",
            alert.feed_id.as_deref().unwrap_or("N/A"),
            alert.event_type
        ),
    }
}

pub struct DeliveryPipeline {
    feed: Arc<dyn AlertFeed>,
    channel: Arc<dyn Channel>,
    target: ChannelId,
    retry: RetryPolicy,
    reporter: StatusReporter,
}

impl DeliveryPipeline {
    pub fn new(
        feed: Arc<dyn AlertFeed>,
        channel: Arc<dyn Channel>,
        target: ChannelId,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            feed,
            channel,
            target,
            retry: RetryPolicy::default(),
            reporter,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Send one alert. Audio problems degrade to `WithoutAudio`; only a failed
    /// notice is a `DeliveryFailed`.
    pub async fn deliver(&self, alert: &Alert) -> Result<Delivered, DeliveryFailed> {
        let id = identity(alert);
        let notice = format_notice(alert);
        tracing::debug!(target: "delivery", id = id.short(), notice = %notice.to_text(), "sending notice");

        let (clip, mut missing_audio) = match self.feed.fetch_audio(alert).await {
            Ok(clip) => (clip, None),
            Err(e) => (None, Some(e.to_string())),
        };

        let ch = self.channel.as_ref();
        let target = self.target;
        let notice_ref = &notice;
        let sent = retry(&self.retry, "send_message", move || {
            ch.send_message(target, notice_ref)
        })
        .await;

        if let Err(source) = sent {
            self.reporter.report(StatusEvent::DeliveryFailed {
                event_type: alert.event_type.clone(),
                id,
                reason: source.to_string(),
            });
            return Err(DeliveryFailed {
                event_type: alert.event_type.clone(),
                source,
            });
        }

        if let Some(clip) = clip.as_ref() {
            let bytes = clip.bytes.as_slice();
            let filename = clip.filename.as_str();
            let uploaded = retry(&self.retry, "send_file", move || {
                ch.send_file(target, bytes, filename)
            })
            .await;
            if let Err(e) = uploaded {
                missing_audio = Some(format!("audio upload failed: {e}"));
            }
        }

        let outcome = match missing_audio {
            None => {
                self.reporter.report(StatusEvent::Delivered {
                    event_type: alert.event_type.clone(),
                    id,
                });
                Delivered::Full
            }
            Some(reason) => {
                self.reporter.report(StatusEvent::DeliveredWithoutAudio {
                    event_type: alert.event_type.clone(),
                    id,
                    reason: reason.clone(),
                });
                Delivered::WithoutAudio { reason }
            }
        };
        Ok(outcome)
    }
}
