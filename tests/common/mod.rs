// tests/common/mod.rs
// Scripted feed and recording channel shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use eas_relay::feed::{AlertFeed, AudioClip, AudioError, FetchError};
use eas_relay::notify::{Channel, ChannelError, ChannelId, Notice};
use eas_relay::retry::RetryPolicy;
use eas_relay::store::{DedupStore, MemoryJournal};
use eas_relay::{Alert, DeliveryPipeline, Poller, StatusReporter};

pub const ALERT_CHANNEL: ChannelId = ChannelId(1001);

pub fn tornado() -> Alert {
    Alert::new(
        "TornadoWarning",
        "Seek shelter",
        "NWS",
        "2025-04-01T18:00:00Z",
    )
    .with_audio("a1")
}

pub fn flood() -> Alert {
    Alert::new("FlashFloodWarning", "Move to higher ground", "NWS", "2025-04-01T18:05:00Z")
}

/// Each `fetch_active` pops the next scripted batch; once exhausted the last
/// one repeats.
#[derive(Default)]
pub struct ScriptedFeed {
    batches: Mutex<VecDeque<Result<Vec<Alert>, FetchError>>>,
    last: Mutex<Option<Result<Vec<Alert>, FetchError>>>,
    audio: Mutex<Option<Result<Vec<u8>, AudioError>>>,
    fetches: Mutex<usize>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self {
            audio: Mutex::new(Some(Ok(b"ID3fake".to_vec()))),
            ..Default::default()
        }
    }

    pub fn push(&self, batch: Result<Vec<Alert>, FetchError>) -> &Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    pub fn set_audio(&self, r: Result<Vec<u8>, AudioError>) {
        *self.audio.lock().unwrap() = Some(r);
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

#[async_trait]
impl AlertFeed for ScriptedFeed {
    async fn fetch_active(&self) -> Result<Vec<Alert>, FetchError> {
        *self.fetches.lock().unwrap() += 1;
        let next = self.batches.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(b) => {
                *last = Some(b.clone());
                b
            }
            None => last.clone().unwrap_or_else(|| Ok(Vec::new())),
        }
    }

    async fn fetch_audio(&self, alert: &Alert) -> Result<Option<AudioClip>, AudioError> {
        if alert.audio_url.is_none() {
            return Ok(None);
        }
        let scripted = self.audio.lock().unwrap().clone();
        match scripted {
            Some(Ok(bytes)) => Ok(Some(AudioClip {
                bytes,
                filename: "a1.mp3".into(),
            })),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Message { channel: ChannelId, title: String },
    File { channel: ChannelId, filename: String, len: usize },
    Text { channel: ChannelId, text: String },
}

/// Records every successful call; failures are injected per operation.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Sent>>,
    message_failures: Mutex<VecDeque<ChannelError>>,
    file_failures: Mutex<VecDeque<ChannelError>>,
    message_attempts: Mutex<usize>,
    gate: Mutex<Option<Gate>>,
}

/// Pauses one notice send: `entered` fires when it starts, `release` lets it
/// complete.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` notice sends with `err`.
    pub fn fail_messages(&self, n: usize, err: ChannelError) {
        let mut q = self.message_failures.lock().unwrap();
        for _ in 0..n {
            q.push_back(err.clone());
        }
    }

    pub fn fail_files(&self, n: usize, err: ChannelError) {
        let mut q = self.file_failures.lock().unwrap();
        for _ in 0..n {
            q.push_back(err.clone());
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Message { title, .. } => Some(title),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::File { .. }))
            .count()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Hold the next notice send until the returned gate is released.
    pub fn hold_next_message(&self) -> Gate {
        let gate = Gate::default();
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn message_attempts(&self) -> usize {
        *self.message_attempts.lock().unwrap()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send_message(&self, channel: ChannelId, notice: &Notice) -> Result<(), ChannelError> {
        *self.message_attempts.lock().unwrap() += 1;
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(e) = self.message_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(Sent::Message {
            channel,
            title: notice.title.clone(),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        channel: ChannelId,
        bytes: &[u8],
        filename: &str,
    ) -> Result<(), ChannelError> {
        if let Some(e) = self.file_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        self.sent.lock().unwrap().push(Sent::File {
            channel,
            filename: filename.to_string(),
            len: bytes.len(),
        });
        Ok(())
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(Sent::Text {
            channel,
            text: text.to_string(),
        });
        Ok(())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default()
        .with_attempts(3)
        .with_initial_delay(Duration::from_millis(1))
}

/// Poller over a memory journal with no pacing between posts.
pub struct Rig {
    pub feed: Arc<ScriptedFeed>,
    pub channel: Arc<RecordingChannel>,
    pub journal: MemoryJournal,
    pub store: Arc<DedupStore>,
    pub reporter: StatusReporter,
    pub poller: Poller,
}

impl Rig {
    pub async fn new(feed: Arc<ScriptedFeed>, channel: Arc<RecordingChannel>) -> Self {
        Self::with_journal(feed, channel, MemoryJournal::new()).await
    }

    /// A fresh process over an existing journal.
    pub async fn with_journal(
        feed: Arc<ScriptedFeed>,
        channel: Arc<RecordingChannel>,
        journal: MemoryJournal,
    ) -> Self {
        let store = Arc::new(
            DedupStore::open(journal.clone())
                .await
                .expect("open memory store"),
        );
        let reporter = StatusReporter::disabled();
        let pipeline = DeliveryPipeline::new(
            feed.clone(),
            channel.clone(),
            ALERT_CHANNEL,
            reporter.clone(),
        )
        .with_retry(fast_retry());
        let poller = Poller::new(
            feed.clone(),
            store.clone(),
            pipeline,
            reporter.clone(),
            Duration::from_secs(120),
        )
        .with_post_delay(Duration::ZERO);
        Self {
            feed,
            channel,
            journal,
            store,
            reporter,
            poller,
        }
    }
}
