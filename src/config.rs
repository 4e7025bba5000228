// src/config.rs
//! Runtime configuration from environment variables (`.env` honored via dotenvy).

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::feed::DEFAULT_FEED_URL;
use crate::notify::discord::DEFAULT_API_BASE;
use crate::notify::ChannelId;

pub const ENV_BOT_TOKEN: &str = "DISCORD_BOT_TOKEN";
pub const ENV_ALERT_CHANNEL: &str = "EAS_ALERT_CHANNEL_ID";
pub const ENV_LOG_CHANNEL: &str = "EAS_LOG_CHANNEL_ID";
pub const ENV_CHECK_INTERVAL: &str = "CHECK_INTERVAL_SECONDS";
pub const ENV_FEED_URL: &str = "EAS_FEED_URL";
pub const ENV_STORE_PATH: &str = "EAS_STORE_PATH";
pub const ENV_POST_DELAY_MS: &str = "EAS_POST_DELAY_MS";
pub const ENV_HTTP_ADDR: &str = "EAS_HTTP_ADDR";
pub const ENV_API_BASE: &str = "DISCORD_API_BASE";

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 120;
pub const MIN_CHECK_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_STORE_PATH: &str = "posted_globaleas_alerts.txt";
pub const DEFAULT_POST_DELAY_MS: u64 = 1_000;

/// Credential that never prints its value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("{var} is invalid ({value:?}): {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: Secret,
    pub alert_channel: ChannelId,
    pub log_channel: Option<ChannelId>,
    pub check_interval: Duration,
    pub feed_url: String,
    pub store_path: PathBuf,
    pub post_delay: Duration,
    pub http_addr: Option<SocketAddr>,
    pub discord_api_base: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token = get(ENV_BOT_TOKEN)
            .map(Secret::new)
            .ok_or(ConfigError::Missing(ENV_BOT_TOKEN))?;
        let alert_channel = get(ENV_ALERT_CHANNEL)
            .ok_or(ConfigError::Missing(ENV_ALERT_CHANNEL))
            .and_then(|v| parse_channel(ENV_ALERT_CHANNEL, v))?;
        let log_channel = get(ENV_LOG_CHANNEL)
            .map(|v| parse_channel(ENV_LOG_CHANNEL, v))
            .transpose()?;

        let check_interval = Duration::from_secs(parse_interval(get(ENV_CHECK_INTERVAL)));

        let post_delay_ms = match get(ENV_POST_DELAY_MS) {
            None => DEFAULT_POST_DELAY_MS,
            Some(v) => v.parse::<u64>().map_err(|e| ConfigError::Invalid {
                var: ENV_POST_DELAY_MS,
                value: v.clone(),
                reason: e.to_string(),
            })?,
        };

        let http_addr = get(ENV_HTTP_ADDR)
            .map(|v| {
                v.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
                    var: ENV_HTTP_ADDR,
                    value: v.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            token,
            alert_channel,
            log_channel,
            check_interval,
            feed_url: get(ENV_FEED_URL).unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            store_path: get(ENV_STORE_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            post_delay: Duration::from_millis(post_delay_ms),
            http_addr,
            discord_api_base: get(ENV_API_BASE)
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
        })
    }
}

fn parse_channel(var: &'static str, v: String) -> Result<ChannelId, ConfigError> {
    match v.parse::<u64>() {
        Ok(id) if id > 0 => Ok(ChannelId(id)),
        _ => Err(ConfigError::Invalid {
            var,
            value: v,
            reason: "expected a numeric channel id".into(),
        }),
    }
}

/// Unset ⇒ default; unparsable ⇒ default with a warning; too small ⇒ minimum.
fn parse_interval(raw: Option<String>) -> u64 {
    let Some(raw) = raw else {
        return DEFAULT_CHECK_INTERVAL_SECS;
    };
    match raw.parse::<u64>() {
        Ok(secs) if secs < MIN_CHECK_INTERVAL_SECS => {
            tracing::warn!(
                target: "config",
                requested = secs,
                min = MIN_CHECK_INTERVAL_SECS,
                "check interval below minimum, clamping"
            );
            MIN_CHECK_INTERVAL_SECS
        }
        Ok(secs) => secs,
        Err(_) => {
            tracing::warn!(
                target: "config",
                value = %raw,
                default = DEFAULT_CHECK_INTERVAL_SECS,
                "check interval is not an integer, using default"
            );
            DEFAULT_CHECK_INTERVAL_SECS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    const BASE: [(&str, &str); 2] = [(ENV_BOT_TOKEN, "tok-123"), (ENV_ALERT_CHANNEL, "1122334455")];

    #[test]
    fn defaults_apply() {
        let c = cfg(&BASE).unwrap();
        assert_eq!(c.alert_channel, ChannelId(1122334455));
        assert_eq!(c.log_channel, None);
        assert_eq!(c.check_interval, Duration::from_secs(120));
        assert_eq!(c.feed_url, DEFAULT_FEED_URL);
        assert_eq!(c.store_path, PathBuf::from(DEFAULT_STORE_PATH));
        assert_eq!(c.post_delay, Duration::from_secs(1));
        assert!(c.http_addr.is_none());
    }

    #[test]
    fn required_values_are_enforced() {
        assert_eq!(
            cfg(&[(ENV_ALERT_CHANNEL, "1")]).unwrap_err(),
            ConfigError::Missing(ENV_BOT_TOKEN)
        );
        assert_eq!(
            cfg(&[(ENV_BOT_TOKEN, "t"), (ENV_ALERT_CHANNEL, "  ")]).unwrap_err(),
            ConfigError::Missing(ENV_ALERT_CHANNEL)
        );
        assert!(matches!(
            cfg(&[(ENV_BOT_TOKEN, "t"), (ENV_ALERT_CHANNEL, "#alerts")]),
            Err(ConfigError::Invalid { var: ENV_ALERT_CHANNEL, .. })
        ));
    }

    #[test]
    fn interval_is_clamped_or_defaulted() {
        let mut pairs = BASE.to_vec();
        pairs.push((ENV_CHECK_INTERVAL, "5"));
        assert_eq!(cfg(&pairs).unwrap().check_interval, Duration::from_secs(30));

        pairs.pop();
        pairs.push((ENV_CHECK_INTERVAL, "two minutes"));
        assert_eq!(cfg(&pairs).unwrap().check_interval, Duration::from_secs(120));

        pairs.pop();
        pairs.push((ENV_CHECK_INTERVAL, "300"));
        assert_eq!(cfg(&pairs).unwrap().check_interval, Duration::from_secs(300));
    }

    #[test]
    fn token_never_prints() {
        let c = cfg(&BASE).unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("tok-123"), "{dbg}");
        assert_eq!(c.token.to_string(), "***");
        assert_eq!(c.token.expose(), "tok-123");
    }
}
