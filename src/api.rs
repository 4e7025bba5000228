use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::sync::{watch, Notify};

use crate::feed::AlertFeed;
use crate::identity::identity;
use crate::metrics::Metrics;
use crate::poller::{PollState, Poller};
use crate::status::{StatusReporter, StatusSnapshot};
use crate::store::DedupStore;

/// Alerts listed by `GET /alerts`.
pub const MAX_ALERTS_TO_SHOW: usize = 10;

#[derive(Clone)]
pub struct AppState {
    feed: Arc<dyn AlertFeed>,
    store: Arc<DedupStore>,
    reporter: StatusReporter,
    poll_state: watch::Receiver<PollState>,
    trigger: Arc<Notify>,
    interval: Duration,
    started: Instant,
    metrics: Option<Metrics>,
}

impl AppState {
    pub fn new(
        poller: &Poller,
        feed: Arc<dyn AlertFeed>,
        store: Arc<DedupStore>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            feed,
            store,
            reporter,
            poll_state: poller.state_watch(),
            trigger: poller.trigger(),
            interval: poller.interval(),
            started: Instant::now(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .route("/alerts", get(active_alerts))
        .route("/fetch", post(fetch_now))
        .route("/metrics", get(metrics))
        .with_state(state)
}

#[derive(serde::Serialize)]
struct StatusOut {
    uptime_secs: u64,
    uptime: String,
    interval_secs: u64,
    poller: PollState,
    known_alerts: usize,
    session: StatusSnapshot,
    alerts_posted_session: u64,
}

fn format_uptime(secs: u64) -> String {
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else {
        format!("{hours}h {minutes}m {seconds}s")
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let uptime_secs = state.started.elapsed().as_secs();
    let session = state.reporter.snapshot();
    let poller = *state.poll_state.borrow();
    let known_alerts = state.store.len().await;
    Json(StatusOut {
        uptime_secs,
        uptime: format_uptime(uptime_secs),
        interval_secs: state.interval.as_secs(),
        poller,
        known_alerts,
        session,
        alerts_posted_session: session.posted(),
    })
}

#[derive(serde::Serialize)]
struct AlertSummary {
    event_type: String,
    severity: String,
    originator: String,
    id: String,
    delivered: bool,
}

#[derive(serde::Serialize)]
struct AlertsOut {
    total: usize,
    shown: usize,
    alerts: Vec<AlertSummary>,
}

async fn active_alerts(State(state): State<AppState>) -> impl IntoResponse {
    let alerts = match state.feed.fetch_active().await {
        Ok(a) => a,
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "GET /alerts: feed fetch failed");
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let mut shown = Vec::with_capacity(alerts.len().min(MAX_ALERTS_TO_SHOW));
    for a in alerts.iter().take(MAX_ALERTS_TO_SHOW) {
        let id = identity(a);
        shown.push(AlertSummary {
            event_type: a.event_type.clone(),
            severity: a.severity.clone().unwrap_or_else(|| "N/A".into()),
            originator: a.originator.clone(),
            delivered: state.store.contains(&id).await,
            id: id.to_string(),
        });
    }
    Json(AlertsOut {
        total: alerts.len(),
        shown: shown.len(),
        alerts: shown,
    })
    .into_response()
}

async fn fetch_now(State(state): State<AppState>) -> impl IntoResponse {
    tracing::info!(target: "api", "POST /fetch: waking poller");
    state.trigger.notify_one();
    (StatusCode::ACCEPTED, "fetch scheduled")
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(m) => (StatusCode::OK, m.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
