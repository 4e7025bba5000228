// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod alert;
pub mod api;
pub mod config;
pub mod delivery;
pub mod feed;
pub mod identity;
pub mod metrics;
pub mod notify;
pub mod poller;
pub mod retry;
pub mod status;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::alert::Alert;
pub use crate::api::router;
pub use crate::config::{Config, ConfigError};
pub use crate::delivery::{Delivered, DeliveryFailed, DeliveryPipeline};
pub use crate::feed::{AlertFeed, AudioClip, AudioError, FetchError, HttpFeed};
pub use crate::identity::{identity, AlertId};
pub use crate::notify::{Channel, ChannelError, ChannelId, Notice};
pub use crate::poller::{CycleReport, PollState, Poller};
pub use crate::status::{StatusEvent, StatusReporter};
pub use crate::store::{DedupStore, StoreWriteError};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::notify::discord::DiscordChannel;

/// Time allowed after the poll loop stops for the admin server and the status
/// queue to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Compact logs by default; `LOG_FORMAT=json` for structured output.
/// Filter via `RUST_LOG`, default `eas_relay=info,warn`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("eas_relay=info,poller=info,feed=info,status=info,store=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

/// Wire every component from `cfg` and run until `shutdown` flips to true.
pub async fn run(cfg: Config, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let metrics = metrics::Metrics::init()?;

    let store = Arc::new(
        DedupStore::open_file(&cfg.store_path)
            .await
            .with_context(|| format!("opening dedup store {}", cfg.store_path.display()))?,
    );

    let feed: Arc<dyn AlertFeed> = Arc::new(HttpFeed::new(cfg.feed_url.clone()));
    let channel: Arc<dyn Channel> = Arc::new(
        DiscordChannel::new(cfg.token.clone()).with_api_base(cfg.discord_api_base.clone()),
    );

    let (reporter, status_worker) = match cfg.log_channel {
        Some(log_channel) => {
            let (reporter, worker) = StatusReporter::spawn(channel.clone(), log_channel);
            (reporter, Some(worker))
        }
        None => (StatusReporter::disabled(), None),
    };

    let pipeline =
        DeliveryPipeline::new(feed.clone(), channel.clone(), cfg.alert_channel, reporter.clone());
    let poller = Poller::new(
        feed.clone(),
        store.clone(),
        pipeline,
        reporter.clone(),
        cfg.check_interval,
    )
    .with_post_delay(cfg.post_delay);

    info!(
        feed = %cfg.feed_url,
        alert_channel = %cfg.alert_channel,
        log_channel = ?cfg.log_channel.map(|c| c.0),
        interval_secs = cfg.check_interval.as_secs(),
        store = %cfg.store_path.display(),
        known_alerts = store.len().await,
        "eas-relay starting"
    );

    let mut admin = None;
    if let Some(addr) = cfg.http_addr {
        let state = api::AppState::new(&poller, feed.clone(), store.clone(), reporter.clone())
            .with_metrics(metrics);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding admin HTTP on {addr}"))?;
        info!(%addr, "admin HTTP listening");
        let mut stop = shutdown.clone();
        admin = Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
                while !*stop.borrow() {
                    if stop.changed().await.is_err() {
                        break;
                    }
                }
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "admin HTTP server stopped");
            }
        }));
    }

    poller.run(shutdown).await;

    // The worker exits once every reporter clone is gone.
    drop(poller);
    drop(reporter);
    if let Some(admin) = admin {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, admin).await;
    }
    if let Some(worker) = status_worker {
        status::drain(worker, SHUTDOWN_GRACE).await;
    }
    Ok(())
}
