//! eas-relay binary entrypoint.
//! Loads configuration, then polls the GlobalEAS feed and relays new alerts
//! to Discord until Ctrl-C / SIGTERM.

use eas_relay::Config;
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    eas_relay::init_tracing();

    let cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration, not starting");
            eprintln!("CRITICAL: {e}");
            std::process::exit(1);
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown requested; finishing current cycle");
        let _ = stop_tx.send(true);
    });

    if let Err(e) = eas_relay::run(cfg, stop_rx).await {
        tracing::error!(error = ?e, "eas-relay failed to start");
        eprintln!("CRITICAL: {e:#}");
        std::process::exit(1);
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
