// src/store.rs
//! Durable dedup store: an append-only journal of delivered alert identities
//! plus an in-memory index rebuilt on open.

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::identity::AlertId;

/// Backing medium for the store. One digest per line, UTF-8.
#[async_trait]
pub trait Journal: Send {
    /// All lines previously appended. A missing medium is an empty journal.
    async fn load(&mut self) -> io::Result<Vec<String>>;
    /// Append one line; returns only once the line is durable.
    async fn append(&mut self, line: &str) -> io::Result<()>;
}

/// Newline-delimited file journal.
pub struct FileJournal {
    path: PathBuf,
    file: Option<File>,
    // Last line on disk is unterminated (torn write); start the next append on a fresh line.
    needs_newline: bool,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            needs_newline: false,
        }
    }

    async fn handle(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            self.file = Some(f);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("journal handle unavailable"))
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn load(&mut self) -> io::Result<Vec<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => {
                self.needs_newline = !content.is_empty() && !content.ends_with('\n');
                Ok(content.lines().map(str::to_string).collect())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn append(&mut self, line: &str) -> io::Result<()> {
        let mut buf = String::with_capacity(line.len() + 2);
        if self.needs_newline {
            buf.push('\n');
        }
        buf.push_str(line);
        buf.push('\n');

        let res = async {
            let f = self.handle().await?;
            f.write_all(buf.as_bytes()).await?;
            f.flush().await?;
            f.sync_data().await
        }
        .await;

        match res {
            Ok(()) => {
                self.needs_newline = false;
                Ok(())
            }
            Err(e) => {
                // Reopen next time; whatever was half-written gets its own line.
                self.file = None;
                self.needs_newline = true;
                Err(e)
            }
        }
    }
}

/// In-memory journal shared between store instances, for restart simulations.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    lines: Arc<StdMutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("journal mutex poisoned").clone()
    }

    /// Make subsequent appends fail as if the disk were full.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn load(&mut self) -> io::Result<Vec<String>> {
        Ok(self.lines())
    }

    async fn append(&mut self, line: &str) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::other("no space left on device"));
        }
        self.lines
            .lock()
            .expect("journal mutex poisoned")
            .push(line.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Appended,
    AlreadyPresent,
}

/// The alert went out but could not be remembered; it may be re-sent after a restart.
#[derive(Debug, thiserror::Error)]
#[error("failed to persist alert identity {id}: {source}")]
pub struct StoreWriteError {
    pub id: AlertId,
    #[source]
    pub source: io::Error,
}

struct Inner {
    index: HashSet<AlertId>,
    journal: Box<dyn Journal>,
}

/// Set of delivered identities. Membership check and append for one id run
/// under the same lock.
pub struct DedupStore {
    inner: Mutex<Inner>,
}

impl DedupStore {
    /// Load every identity from `journal`. Malformed lines are skipped.
    pub async fn open<J: Journal + 'static>(mut journal: J) -> io::Result<Self> {
        let lines = journal.load().await?;
        let mut index = HashSet::with_capacity(lines.len());
        let mut skipped = 0usize;
        for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            match AlertId::parse(line) {
                Ok(id) => {
                    index.insert(id);
                }
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(target: "store", skipped, "ignored malformed lines in dedup journal");
        }
        tracing::info!(target: "store", loaded = index.len(), "dedup store opened");
        gauge!("eas_store_identities").set(index.len() as f64);

        Ok(Self {
            inner: Mutex::new(Inner {
                index,
                journal: Box::new(journal),
            }),
        })
    }

    pub async fn open_file(path: impl Into<PathBuf>) -> io::Result<Self> {
        Self::open(FileJournal::new(path)).await
    }

    pub async fn contains(&self, id: &AlertId) -> bool {
        self.inner.lock().await.index.contains(id)
    }

    /// Append `id` durably, then add it to the index. Idempotent.
    pub async fn record(&self, id: &AlertId) -> Result<Recorded, StoreWriteError> {
        let mut inner = self.inner.lock().await;
        if inner.index.contains(id) {
            return Ok(Recorded::AlreadyPresent);
        }
        if let Err(source) = inner.journal.append(id.as_str()).await {
            counter!("eas_store_write_errors_total").increment(1);
            return Err(StoreWriteError {
                id: id.clone(),
                source,
            });
        }
        inner.index.insert(id.clone());
        gauge!("eas_store_identities").set(inner.index.len() as f64);
        Ok(Recorded::Appended)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
