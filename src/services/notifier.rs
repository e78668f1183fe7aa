//! src/services/notifier.rs
//!
//! Delivery of upload progress snapshots to an external chat channel.
//!
//! The tracker never talks to a notifier directly: it enqueues snapshots
//! on a bounded channel and [`NotifierWorker`] drains that channel from its
//! own task, so a slow or failing chat API can never stall the upload
//! request path. Failures are logged and swallowed per delivery; there is
//! no retry and no ordering guarantee, and consumers treat the latest
//! arriving snapshot as authoritative.

use crate::models::upload::UploadRecord;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info};

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}

/// Capability consumed by the worker: deliver one progress snapshot.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, record: &UploadRecord) -> Result<(), NotifyError>;
}

/// Drains the notification channel and hands each snapshot to the
/// configured [`Notifier`]. One failed delivery never affects the next.
pub struct NotifierWorker {
    receiver: mpsc::Receiver<UploadRecord>,
    notifier: Arc<dyn Notifier>,
}

impl NotifierWorker {
    pub fn new(receiver: mpsc::Receiver<UploadRecord>, notifier: Arc<dyn Notifier>) -> Self {
        Self { receiver, notifier }
    }

    /// Run until every sender half of the channel is dropped.
    pub async fn run(mut self) {
        info!("notifier worker started");
        while let Some(record) = self.receiver.recv().await {
            if let Err(err) = self.notifier.deliver(&record).await {
                error!("failed to deliver notification for {}: {}", record.id, err);
            }
        }
        info!("notifier worker stopped: channel closed");
    }
}

/// Notifier that only logs. Used when Telegram credentials are not
/// configured, and as the default in tests.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, record: &UploadRecord) -> Result<(), NotifyError> {
        info!(
            "upload {}: {} offset={}/{} complete={}",
            record.id,
            record.display_name(),
            record.offset,
            record.size,
            record.is_complete
        );
        Ok(())
    }
}

/// Telegram Bot API notifier.
///
/// The first snapshot for an upload id sends a new chat message; the
/// returned message id is remembered so later snapshots edit that message
/// in place, turning a progress message into a done (or failed) message.
/// The id registry lives for the process lifetime, like the tracker state.
pub struct TelegramNotifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
    messages: Mutex<HashMap<String, i64>>,
}

#[derive(Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
    result: Option<TelegramMessage>,
}

#[derive(Deserialize)]
struct TelegramMessage {
    message_id: i64,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
            messages: Mutex::new(HashMap::new()),
        }
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<i64, NotifyError> {
        let url = format!("{}/bot{}/{}", TELEGRAM_API, self.bot_token, method);
        let response: TelegramResponse =
            self.http.post(&url).json(&body).send().await?.json().await?;
        if !response.ok {
            return Err(NotifyError::Api(
                response.description.unwrap_or_else(|| "unknown".into()),
            ));
        }
        response
            .result
            .map(|message| message.message_id)
            .ok_or_else(|| NotifyError::Api("response carried no message".into()))
    }

    async fn send_message(&self, text: &str) -> Result<i64, NotifyError> {
        self.call(
            "sendMessage",
            json!({ "chat_id": self.chat_id, "text": text }),
        )
        .await
    }

    async fn edit_message(&self, message_id: i64, text: &str) -> Result<(), NotifyError> {
        self.call(
            "editMessageText",
            json!({ "chat_id": self.chat_id, "message_id": message_id, "text": text }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, record: &UploadRecord) -> Result<(), NotifyError> {
        let text = format_progress_message(record);
        let known = self.messages.lock().await.get(&record.id).copied();
        match known {
            Some(message_id) => self.edit_message(message_id, &text).await,
            None => {
                let message_id = self.send_message(&text).await?;
                self.messages
                    .lock()
                    .await
                    .insert(record.id.clone(), message_id);
                Ok(())
            }
        }
    }
}

/// Render one snapshot as chat message text.
///
/// Shows a percentage only when the total size is known (a size of 0 means
/// the producer could not declare one). An `error` metadata entry turns the
/// message into a failure report.
pub fn format_progress_message(record: &UploadRecord) -> String {
    let mut lines = Vec::new();

    if let Some(reason) = record.metadata.get("error") {
        lines.push(format!("Upload failed: {}", record.display_name()));
        lines.push(format!("reason: {}", reason));
    } else if record.is_complete {
        lines.push(format!(
            "Upload complete: {} ({})",
            record.display_name(),
            format_bytes(record.size)
        ));
    } else {
        lines.push(format!("Uploading {}", record.display_name()));
        if record.size > 0 {
            lines.push(format!(
                "{}% ({} of {})",
                percent_done(record),
                format_bytes(record.offset),
                format_bytes(record.size)
            ));
        } else {
            lines.push(format!("{} transferred", format_bytes(record.offset)));
        }
        if let Some(speed) = record.upload_speed {
            if speed > 0.0 {
                lines.push(format!("{}/s", format_bytes(speed as i64)));
            }
        }
    }

    if let Some(client) = record.metadata.get("clientName") {
        lines.push(format!("client: {}", client));
    }
    if let Some(project) = record.metadata.get("projectName") {
        lines.push(format!("project: {}", project));
    }

    lines.join("\n")
}

/// Whole-number percentage, capped at 100 for display even when a late
/// event pushes the offset past the declared size.
fn percent_done(record: &UploadRecord) -> i64 {
    if record.size <= 0 {
        return 0;
    }
    ((record.offset * 100) / record.size).clamp(0, 100)
}

/// Humanize a byte count with binary units and one decimal.
pub fn format_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes.max(0));
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for candidate in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{:.1} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingNotifier {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn deliver(&self, _record: &UploadRecord) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::Api("simulated outage".into()))
        }
    }

    fn record(id: &str, size: i64, offset: i64) -> UploadRecord {
        let now = Utc::now();
        UploadRecord {
            id: id.to_string(),
            size,
            offset,
            metadata: HashMap::new(),
            created_at: now,
            last_updated: now,
            is_complete: false,
            completed_at: None,
            upload_speed: None,
        }
    }

    #[tokio::test]
    async fn worker_keeps_draining_when_every_delivery_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(8);
        let worker = NotifierWorker::new(
            rx,
            Arc::new(FailingNotifier {
                calls: calls.clone(),
            }),
        );
        let handle = tokio::spawn(worker.run());

        for offset in [0, 50, 100] {
            tx.send(record("a", 100, offset)).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn progress_message_shows_percent_and_rate() {
        let mut snapshot = record("a", 2048, 1024);
        snapshot
            .metadata
            .insert("filename".into(), "trailer.mp4".into());
        snapshot.upload_speed = Some(512.0);

        let text = format_progress_message(&snapshot);
        assert!(text.contains("Uploading trailer.mp4"));
        assert!(text.contains("50% (1.0 KiB of 2.0 KiB)"));
        assert!(text.contains("512 B/s"));
    }

    #[test]
    fn unknown_size_omits_percentage() {
        let text = format_progress_message(&record("a", 0, 4096));
        assert!(text.contains("4.0 KiB transferred"));
        assert!(!text.contains('%'));
    }

    #[test]
    fn overshooting_offset_caps_at_one_hundred_percent() {
        let text = format_progress_message(&record("a", 100, 150));
        assert!(text.contains("100%"));
    }

    #[test]
    fn error_metadata_turns_message_into_failure_report() {
        let mut snapshot = record("a", 100, 40);
        snapshot.metadata.insert("error".into(), "disk full".into());
        snapshot
            .metadata
            .insert("clientName".into(), "studio-7".into());

        let text = format_progress_message(&snapshot);
        assert!(text.starts_with("Upload failed"));
        assert!(text.contains("reason: disk full"));
        assert!(text.contains("client: studio-7"));
    }

    #[test]
    fn completed_message_reports_total_size() {
        let mut snapshot = record("a", 3 * 1024 * 1024, 3 * 1024 * 1024);
        snapshot.is_complete = true;
        let text = format_progress_message(&snapshot);
        assert!(text.contains("Upload complete"));
        assert!(text.contains("3.0 MiB"));
    }

    #[test]
    fn byte_formatting_boundaries() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
