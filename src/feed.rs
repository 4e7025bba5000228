// src/feed.rs
//! Feed client: the active-alert batch and per-alert audio downloads.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::{header, Client};
use serde_json::Value;

use crate::alert::{Alert, RawAlert};
use crate::retry::{retry, RetryPolicy, Transient};

pub const DEFAULT_FEED_URL: &str = "https://alerts.globaleas.org/api/v1/alerts/active";
pub const DEFAULT_AUDIO_FILENAME: &str = "alert_audio.mp3";

const API_TIMEOUT: Duration = Duration::from_secs(30);
const AUDIO_TIMEOUT: Duration = Duration::from_secs(45);
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Transport(String),
    #[error("feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feed body malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("audio reference is not an http(s) URL: {0}")]
    InvalidReference(String),
    #[error("audio download failed: {0}")]
    Transport(String),
    #[error("audio download returned HTTP {0}")]
    Status(u16),
    #[error("audio download returned an empty body")]
    Empty,
}

impl Transient for AudioError {
    fn is_transient(&self) -> bool {
        match self {
            AudioError::Transport(_) => true,
            AudioError::Status(s) => *s == 429 || *s >= 500,
            AudioError::InvalidReference(_) | AudioError::Empty => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub filename: String,
}

#[async_trait]
pub trait AlertFeed: Send + Sync {
    /// Current batch of active alerts, in feed order.
    async fn fetch_active(&self) -> Result<Vec<Alert>, FetchError>;

    /// Audio for `alert`; `Ok(None)` when it carries no reference.
    async fn fetch_audio(&self, alert: &Alert) -> Result<Option<AudioClip>, AudioError>;
}

/// Parse a feed body into alerts. The body must be a JSON array; records
/// missing a required field are skipped.
pub fn parse_batch(body: &str) -> Result<Vec<Alert>, FetchError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(FetchError::Malformed(format!(
            "expected a JSON array, got: {}",
            truncate(body, ERROR_BODY_LIMIT)
        )));
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let parsed = serde_json::from_value::<RawAlert>(item)
            .map_err(|e| e.to_string())
            .and_then(|raw| Alert::try_from(raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(alert) => out.push(alert),
            Err(reason) => {
                tracing::warn!(target: "feed", idx, %reason, "skipping feed record");
                counter!("eas_feed_rejected_records_total").increment(1);
            }
        }
    }
    Ok(out)
}

/// File name for an audio URL: last path segment when it has an extension.
pub fn audio_filename(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .filter(|name| name.contains('.'))
        .unwrap_or_else(|| DEFAULT_AUDIO_FILENAME.to_string())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// GlobalEAS HTTP client.
#[derive(Clone)]
pub struct HttpFeed {
    url: String,
    client: Client,
    api_timeout: Duration,
    audio_timeout: Duration,
    audio_retry: RetryPolicy,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: Client::new(),
            api_timeout: API_TIMEOUT,
            audio_timeout: AUDIO_TIMEOUT,
            audio_retry: RetryPolicy::default(),
        }
    }

    pub fn with_timeouts(mut self, api: Duration, audio: Duration) -> Self {
        self.api_timeout = api;
        self.audio_timeout = audio;
        self
    }

    pub fn with_audio_retry(mut self, policy: RetryPolicy) -> Self {
        self.audio_retry = policy;
        self
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, AudioError> {
        let rsp = self
            .client
            .get(url)
            .timeout(self.audio_timeout)
            .send()
            .await
            .map_err(|e| AudioError::Transport(e.to_string()))?;
        let status = rsp.status();
        if !status.is_success() {
            return Err(AudioError::Status(status.as_u16()));
        }
        let bytes = rsp
            .bytes()
            .await
            .map_err(|e| AudioError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(AudioError::Empty);
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl AlertFeed for HttpFeed {
    async fn fetch_active(&self) -> Result<Vec<Alert>, FetchError> {
        let t0 = Instant::now();
        counter!("eas_feed_fetch_total").increment(1);

        let rsp = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "application/json")
            .timeout(self.api_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = rsp.status();
        let body = rsp
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LIMIT),
            });
        }

        let alerts = parse_batch(&body)?;
        histogram!("eas_feed_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        tracing::info!(target: "feed", count = alerts.len(), "fetched active alerts");
        Ok(alerts)
    }

    async fn fetch_audio(&self, alert: &Alert) -> Result<Option<AudioClip>, AudioError> {
        let Some(url) = alert.audio_url.as_deref() else {
            return Ok(None);
        };
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AudioError::InvalidReference(url.to_string()));
        }

        let this = self;
        let bytes = retry(&self.audio_retry, "audio", move || this.download(url)).await?;
        tracing::info!(target: "feed", bytes = bytes.len(), %url, "downloaded alert audio");
        Ok(Some(AudioClip {
            bytes,
            filename: audio_filename(url),
        }))
    }
}
