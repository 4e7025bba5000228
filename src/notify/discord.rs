use super::{Channel, ChannelError, ChannelId, FieldValue, Notice};
use crate::config::Secret;
use async_trait::async_trait;
use reqwest::{header, multipart, Client, Response, StatusCode};
use serde::Serialize;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Discord "gold".
const EMBED_COLOR: u32 = 0xF1C40F;

/// Discord bot client speaking the REST `channels/{id}/messages` endpoint.
#[derive(Clone)]
pub struct DiscordChannel {
    api_base: String,
    token: Secret,
    client: Client,
    timeout: Duration,
}

impl std::fmt::Debug for DiscordChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordChannel")
            .field("api_base", &self.api_base)
            .field("token", &self.token)
            .finish()
    }
}

impl DiscordChannel {
    pub fn new(token: Secret) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token,
            client: Client::new(),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn messages_url(&self, channel: ChannelId) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel)
    }

    fn post(&self, channel: ChannelId) -> reqwest::RequestBuilder {
        self.client
            .post(self.messages_url(channel))
            .timeout(self.timeout)
            .header(header::AUTHORIZATION, format!("Bot {}", self.token.expose()))
    }

    async fn finish(&self, res: reqwest::Result<Response>) -> Result<(), ChannelError> {
        let rsp = match res {
            Ok(rsp) => rsp,
            Err(e) if e.is_builder() => {
                return Err(ChannelError::permanent(format!("Discord request invalid: {e}")))
            }
            Err(e) => return Err(ChannelError::transient(format!("Discord request failed: {e}"))),
        };
        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        let retry_after = rsp
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64);
        let body: String = rsp.text().await.unwrap_or_default().chars().take(300).collect();
        Err(classify(status, retry_after, &body))
    }
}

/// 429 and 5xx are worth another try; everything else is final.
pub fn classify(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ChannelError {
    let reason = format!("Discord HTTP {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ChannelError::Transient {
            reason,
            retry_after,
        }
    } else {
        ChannelError::Permanent { reason }
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    async fn send_message(&self, channel: ChannelId, notice: &Notice) -> Result<(), ChannelError> {
        let payload = DiscordMessagePayload::embed(notice);
        let res = self.post(channel).json(&payload).send().await;
        self.finish(res).await
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        bytes: &[u8],
        filename: &str,
    ) -> Result<(), ChannelError> {
        let part = multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string());
        let form = multipart::Form::new().part("files[0]", part);
        let res = self.post(channel).multipart(form).send().await;
        self.finish(res).await
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), ChannelError> {
        let payload = DiscordMessagePayload {
            content: Some(text.to_string()),
            embeds: Vec::new(),
        };
        let res = self.post(channel).json(&payload).send().await;
        self.finish(res).await
    }
}

#[derive(Serialize)]
struct DiscordEmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize)]
struct DiscordEmbedFooter {
    text: String,
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<DiscordEmbedField>,
    footer: DiscordEmbedFooter,
    timestamp: String,
}

#[derive(Serialize)]
struct DiscordMessagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<DiscordEmbed>,
}

fn render_value(v: &FieldValue) -> String {
    match v {
        // Rendered in each reader's local time zone.
        FieldValue::Time(t) => format!("<t:{}:F>", t.timestamp()),
        FieldValue::Text(s) => s.clone(),
    }
}

impl DiscordMessagePayload {
    fn embed(notice: &Notice) -> Self {
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: notice.title.clone(),
                description: notice.description.clone(),
                color: EMBED_COLOR,
                fields: notice
                    .fields
                    .iter()
                    .map(|f| DiscordEmbedField {
                        name: f.name.clone(),
                        value: render_value(&f.value),
                        inline: true,
                    })
                    .collect(),
                footer: DiscordEmbedFooter {
                    text: notice.footer.clone(),
                },
                timestamp: chrono::Utc::now().to_rfc3339(),
            }],
        }
    }
}
