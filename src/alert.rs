// src/alert.rs
//! Alert records as consumed from the GlobalEAS `alerts/active` feed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One active alert. Immutable once fetched; identity is derived in `identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub event_type: String,
    pub message: String,
    pub originator: String,
    pub effective: String,
    pub expires: Option<String>,
    pub severity: Option<String>,
    pub audio_url: Option<String>,
    pub feed_id: Option<String>,
    pub feed_hash: Option<String>,
    /// Incidental per-fetch stamp. Carried for diagnostics, never hashed.
    pub last_updated: Option<String>,
}

impl Alert {
    /// Minimal constructor with the four stable fields; the rest default to `None`.
    pub fn new(
        event_type: impl Into<String>,
        message: impl Into<String>,
        originator: impl Into<String>,
        effective: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            message: message.into(),
            originator: originator.into(),
            effective: effective.into(),
            expires: None,
            severity: None,
            audio_url: None,
            feed_id: None,
            feed_hash: None,
            last_updated: None,
        }
    }

    pub fn with_audio(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_expires(mut self, ts: impl Into<String>) -> Self {
        self.expires = Some(ts.into());
        self
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        parse_feed_time(&self.effective)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires.as_deref().and_then(parse_feed_time)
    }
}

/// Parse the feed's ISO-8601 timestamps (`Z` or explicit offset).
pub fn parse_feed_time(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Wire shape of one feed record. Everything optional so a single bad record
/// never fails the whole batch; required fields are checked in `TryFrom`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAlert {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub translation: Option<String>,
    pub originator: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub severity: Option<String>,
    pub audio_url: Option<String>,
    pub id: Option<Value>,
    pub hash: Option<String>,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("alert record missing required field `{0}`")]
pub struct MissingField(pub &'static str);

fn required(v: Option<String>, name: &'static str) -> Result<String, MissingField> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(MissingField(name)),
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl TryFrom<RawAlert> for Alert {
    type Error = MissingField;

    fn try_from(raw: RawAlert) -> Result<Self, Self::Error> {
        let feed_id = raw.id.and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => non_blank(Some(s)),
            other => Some(other.to_string()),
        });
        Ok(Alert {
            event_type: required(raw.event_type, "type")?,
            message: required(raw.translation, "translation")?,
            originator: required(raw.originator, "originator")?,
            effective: required(raw.start_time, "startTime")?,
            expires: non_blank(raw.end_time),
            severity: non_blank(raw.severity),
            audio_url: non_blank(raw.audio_url),
            feed_id,
            feed_hash: non_blank(raw.hash),
            last_updated: non_blank(raw.last_updated),
        })
    }
}
