// src/notify/mod.rs
//! Downstream channel capability: formatted notices, file uploads, status lines.

pub mod discord;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::retry::Transient;

/// Discord channel snowflake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Time(DateTime<Utc>),
}

impl FieldValue {
    fn plain(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Time(t) => t.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeField {
    pub name: String,
    pub value: FieldValue,
}

/// Human-readable alert notice, independent of the channel's rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub fields: Vec<NoticeField>,
    pub footer: String,
}

impl Notice {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Plain-text rendering for text-only channels and logs.
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n{}\n", self.title, self.description);
        for f in &self.fields {
            out.push_str(&format!("{}: {}\n", f.name, f.value.plain()));
        }
        out.push_str(&self.footer);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// Rate limiting, 5xx, timeouts, connection failures.
    #[error("transient channel error: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },
    /// Bad credential, missing permission, unknown channel, rejected payload.
    #[error("permanent channel error: {reason}")]
    Permanent { reason: String },
}

impl ChannelError {
    pub fn transient(reason: impl Into<String>) -> Self {
        ChannelError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        ChannelError::Permanent {
            reason: reason.into(),
        }
    }
}

impl Transient for ChannelError {
    fn is_transient(&self) -> bool {
        matches!(self, ChannelError::Transient { .. })
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ChannelError::Transient { retry_after, .. } => *retry_after,
            ChannelError::Permanent { .. } => None,
        }
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send_message(&self, channel: ChannelId, notice: &Notice) -> Result<(), ChannelError>;

    async fn send_file(
        &self,
        channel: ChannelId,
        bytes: &[u8],
        filename: &str,
    ) -> Result<(), ChannelError>;

    /// One-line plain message (status reporting).
    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), ChannelError>;
}
