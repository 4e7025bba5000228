// src/identity.rs
//! Stable alert identities: SHA-256 over the normalized stable fields.

use std::fmt;

use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::alert::{parse_feed_time, Alert};

/// ASCII unit separator between hashed fields.
const FIELD_SEP: u8 = 0x1f;

/// 64-char lowercase hex SHA-256 digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a 64-character hex digest: {0:?}")]
pub struct InvalidAlertId(pub String);

impl AlertId {
    pub fn parse(s: &str) -> Result<Self, InvalidAlertId> {
        let t = s.trim();
        if t.len() == 64 && t.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(t.to_ascii_lowercase()))
        } else {
            Err(InvalidAlertId(t.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a free-text field: decode entities, NFC, collapse whitespace, trim.
pub fn normalize_field(s: &str) -> String {
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));

    let decoded = html_escape::decode_html_entities(s);
    let nfc: String = decoded.nfc().collect();
    re_ws.replace_all(&nfc, " ").trim().to_string()
}

/// Event and originator codes: case differences are noise.
fn normalize_code(s: &str) -> String {
    normalize_field(s).to_uppercase()
}

/// Same instant, same string, whatever offset notation the feed used.
fn normalize_time(s: &str) -> String {
    match parse_feed_time(s) {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
        None => normalize_field(s),
    }
}

/// Identity of an alert. Pure; ignores expiry, severity, audio and fetch stamps.
pub fn identity(alert: &Alert) -> AlertId {
    let mut hasher = Sha256::new();
    for (i, part) in [
        normalize_code(&alert.event_type),
        normalize_field(&alert.message),
        normalize_code(&alert.originator),
        normalize_time(&alert.effective),
    ]
    .iter()
    .enumerate()
    {
        if i > 0 {
            hasher.update([FIELD_SEP]);
        }
        hasher.update(part.as_bytes());
    }
    AlertId(hex::encode(hasher.finalize()))
}
