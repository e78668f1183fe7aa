//! HTTP handlers for the non-tus ingress paths and for reading tracker
//! state. Each ingress path mints its own id namespace: `xhr-<uuid>` for
//! direct multipart uploads, `s3-<fileId>` / `s3-companion-<key>` for
//! storage callbacks. The client-reported progress endpoint is
//! notification-only telemetry and does not enter the tracker map.

use crate::{
    errors::AppError,
    models::upload::{ClientProgressReport, UploadEvent, UploadRecord},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
};
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io};
use tracing::{info, warn};
use uuid::Uuid;

/// Response for a landed direct upload.
#[derive(Serialize, Debug)]
pub struct DirectUploadResponse {
    pub id: String,
    pub filename: String,
    pub size_bytes: i64,
    pub etag: String,
}

/// Completion callback body posted by the S3-direct / Companion relay.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct S3CallbackRequest {
    pub file_id: Option<String>,
    pub key: Option<String>,
    pub size: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// POST `/uploads` — direct multipart upload.
///
/// Tracks a 0% snapshot before the body is consumed, streams the file
/// field into the staging store, then records the final size and
/// completes. A mid-stream failure still leaves an error-tagged terminal
/// record behind before the error response goes out.
pub async fn direct_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<DirectUploadResponse>, AppError> {
    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("reading multipart body: {}", err)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let id = format!("xhr-{}", Uuid::new_v4());
        let filename = field.file_name().unwrap_or(&id).to_string();
        let mut metadata = HashMap::from([
            ("filename".to_string(), filename.clone()),
            ("storage".to_string(), "staging".to_string()),
        ]);
        if let Some(mime) = field.content_type() {
            metadata.insert("mimeType".to_string(), mime.to_string());
        }

        state
            .tracker
            .track_upload(
                UploadEvent::new(id.clone(), declared_size, 0)
                    .with_metadata(metadata.clone()),
            )
            .await;

        let stream = field
            .map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));
        match state.store.write_stream(&id, stream).await {
            Ok(staged) => {
                info!(
                    "staged direct upload {} ({} bytes) at {}",
                    id,
                    staged.size_bytes,
                    staged.path.display()
                );
                metadata.insert("etag".to_string(), staged.etag.clone());
                state
                    .tracker
                    .track_upload(
                        UploadEvent::new(id.clone(), staged.size_bytes, staged.size_bytes)
                            .with_metadata(metadata),
                    )
                    .await;
                state.tracker.complete_upload(&id).await;

                return Ok(Json(DirectUploadResponse {
                    id,
                    filename,
                    size_bytes: staged.size_bytes,
                    etag: staged.etag,
                }));
            }
            Err(err) => {
                metadata.insert("error".to_string(), err.to_string());
                state
                    .tracker
                    .track_upload(
                        UploadEvent::new(id.clone(), declared_size, 0).with_metadata(metadata),
                    )
                    .await;
                state.tracker.complete_upload(&id).await;
                return Err(AppError::internal(format!("staging upload {}: {}", id, err)));
            }
        }
    }

    Err(AppError::bad_request("multipart body carried no file field"))
}

/// POST `/uploads/s3/callback` — completion callback from the S3-direct or
/// Companion relay. These arrive as a single already-complete snapshot
/// rather than incremental progress.
pub async fn s3_callback(
    State(state): State<AppState>,
    Json(callback): Json<S3CallbackRequest>,
) -> Result<Json<UploadRecord>, AppError> {
    let id = match (&callback.file_id, &callback.key) {
        (Some(file_id), _) => format!("s3-{}", file_id),
        (None, Some(key)) => format!("s3-companion-{}", key),
        (None, None) => {
            return Err(AppError::bad_request(
                "callback must carry a fileId or a key",
            ));
        }
    };

    let mut metadata = callback.metadata;
    metadata
        .entry("storage".to_string())
        .or_insert_with(|| "s3".to_string());

    let tracked = state
        .tracker
        .track_upload(
            UploadEvent::new(id.clone(), callback.size, callback.size).with_metadata(metadata),
        )
        .await;
    let record = state
        .tracker
        .complete_upload(&id)
        .await
        .unwrap_or(tracked);

    Ok(Json(record))
}

/// POST `/uploads/progress` — progress reported by the browser itself,
/// used when the server cannot observe chunk-level progress (pure
/// direct-to-cloud transfers). Feeds the notifier only; such uploads do
/// not appear in the active or full listings.
pub async fn client_progress(
    State(state): State<AppState>,
    Json(report): Json<ClientProgressReport>,
) -> (StatusCode, Json<serde_json::Value>) {
    let now = Utc::now();
    let mut metadata = HashMap::new();
    if let Some(filename) = report.filename {
        metadata.insert("filename".to_string(), filename);
    }
    if let Some(client) = report.client_name {
        metadata.insert("clientName".to_string(), client);
    }
    if let Some(project) = report.project_name {
        metadata.insert("projectName".to_string(), project);
    }

    let record = UploadRecord {
        id: report.upload_id,
        size: report.bytes_total,
        offset: report.bytes_uploaded,
        metadata,
        created_at: now,
        last_updated: now,
        is_complete: false,
        completed_at: None,
        upload_speed: None,
    };

    if let Err(err) = state.notify_tx.try_send(record) {
        warn!("dropping client-reported progress notification: {}", err);
    }

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}

/// GET `/uploads` — every record still held.
pub async fn list_uploads(State(state): State<AppState>) -> Json<Vec<UploadRecord>> {
    Json(state.tracker.get_all_uploads().await)
}

/// GET `/uploads/active` — records without a completion signal.
pub async fn list_active_uploads(State(state): State<AppState>) -> Json<Vec<UploadRecord>> {
    Json(state.tracker.get_active_uploads().await)
}

/// GET `/uploads/{id}`.
pub async fn get_upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadRecord>, AppError> {
    state
        .tracker
        .get_upload(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no upload tracked for `{}`", id)))
}
