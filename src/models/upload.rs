//! Represents one upload attempt from first observation to terminal state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Latest known state of a single upload attempt.
///
/// A record is uniquely keyed by `id`. Ids are minted per ingress path
/// (tus hook ID, `xhr-<uuid>`, `s3-<fileId>`, `s3-companion-<key>`) and are
/// not globally unique across process restarts; nothing here is persisted.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadRecord {
    /// Upload identifier, unique per attempt.
    pub id: String,

    /// Total expected bytes. 0 is the "unknown size" sentinel.
    pub size: i64,

    /// Bytes transferred so far. Late or out-of-order events may push this
    /// past `size`; that is accepted, not corrected.
    pub offset: i64,

    /// Open pass-through mapping (filename, MIME type, client name,
    /// project name, storage tag, upload token, optional `error`).
    /// The tracker never validates or defaults these.
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Timestamp of the first observation for this id.
    pub created_at: DateTime<Utc>,

    /// Timestamp of the most recent observation.
    pub last_updated: DateTime<Utc>,

    /// Whether a completion signal has been recorded.
    pub is_complete: bool,

    /// Set once, on the transition to complete.
    pub completed_at: Option<DateTime<Utc>>,

    /// Derived transfer rate in bytes/second. Present only once two
    /// observations with different offsets exist for the same id. An
    /// offset regression yields a negative value.
    pub upload_speed: Option<f64>,
}

impl UploadRecord {
    /// Filename for display, falling back to the upload id.
    pub fn display_name(&self) -> &str {
        self.metadata
            .get("filename")
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

/// Input shape accepted by `UploadTracker::track_upload`.
///
/// `id`, `size`, and `offset` are required; everything else is optional and
/// merged against any stored record for the same id.
#[derive(Deserialize, Clone, Debug)]
pub struct UploadEvent {
    pub id: String,
    pub size: i64,
    pub offset: i64,

    /// Replaces the stored metadata when present; inherited when absent.
    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,

    /// Used only when no record exists yet for this id.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Defaults to false unless explicitly provided.
    #[serde(default)]
    pub is_complete: bool,
}

impl UploadEvent {
    /// Convenience constructor for the common id/size/offset case.
    pub fn new(id: impl Into<String>, size: i64, offset: i64) -> Self {
        Self {
            id: id.into(),
            size,
            offset,
            metadata: None,
            created_at: None,
            is_complete: false,
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Progress reported by the browser itself, for uploads whose chunk-level
/// progress the server cannot observe (e.g. direct-to-cloud transfers).
///
/// This path feeds the notifier directly and does not enter the tracker's
/// stored state.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientProgressReport {
    pub upload_id: String,
    pub bytes_uploaded: i64,
    pub bytes_total: i64,
    pub filename: Option<String>,
    pub client_name: Option<String>,
    pub project_name: Option<String>,
}
