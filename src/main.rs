use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc, time::MissedTickBehavior};
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    disk_store::DiskStore,
    notifier::{LogNotifier, Notifier, NotifierWorker, TelegramNotifier},
    upload_tracker::UploadTracker,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting upload-tracker on {} (staging dir {}, retention {}h)",
        cfg.addr(),
        cfg.staging_dir,
        cfg.retention_hours
    );

    // --- Ensure staging directory exists ---
    if !Path::new(&cfg.staging_dir).exists() {
        fs::create_dir_all(&cfg.staging_dir)?;
        tracing::info!("Created staging directory at {}", cfg.staging_dir);
    }

    // --- Notifier: worker task behind a bounded queue ---
    let (notify_tx, notify_rx) = mpsc::channel(cfg.notify_queue_capacity);
    let notifier: Arc<dyn Notifier> = match (
        cfg.telegram_bot_token.clone(),
        cfg.telegram_chat_id.clone(),
    ) {
        (Some(token), Some(chat_id)) => {
            tracing::info!("Delivering upload notifications to Telegram chat {}", chat_id);
            Arc::new(TelegramNotifier::new(token, chat_id))
        }
        _ => {
            tracing::info!("Telegram credentials not configured; logging notifications instead");
            Arc::new(LogNotifier)
        }
    };
    tokio::spawn(NotifierWorker::new(notify_rx, notifier).run());

    // --- Core tracker + retention sweep ---
    let tracker = UploadTracker::new(notify_tx.clone());
    let sweep_tracker = tracker.clone();
    let retention = chrono::Duration::hours(cfg.retention_hours);
    let mut sweep_interval =
        tokio::time::interval(std::time::Duration::from_secs(cfg.sweep_interval_secs));
    // One sweep at a time; a long sweep delays the next tick instead of
    // stacking a second one.
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        // the first tick fires immediately; nothing to purge yet
        sweep_interval.tick().await;
        loop {
            sweep_interval.tick().await;
            sweep_tracker.cleanup_old_uploads(retention).await;
        }
    });

    // --- Shared state + router ---
    let app_state = AppState {
        tracker,
        store: DiskStore::new(cfg.staging_dir.clone()),
        notify_tx,
    };
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
