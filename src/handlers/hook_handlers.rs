//! Webhook receiver for the tus upload server.
//!
//! tusd posts one JSON envelope per lifecycle event. Create and receive
//! events feed the tracker with the reported offset; a finish event is an
//! id-only completion signal; a terminate event records an error-tagged
//! terminal snapshot so the retention sweep can reclaim it. Known and
//! unknown hook types alike are acknowledged with 200, since the tus
//! server aborts an upload on any non-2xx hook response.

use crate::{
    models::{
        hook::{self, HookRequest, HookResponse},
        upload::UploadEvent,
    },
    state::AppState,
};
use axum::{Json, extract::State};
use tracing::debug;

pub async fn tus_hook(
    State(state): State<AppState>,
    Json(hook): Json<HookRequest>,
) -> Json<HookResponse> {
    let upload = hook.event.upload;
    debug!(
        "tus hook {}: id={} offset={}",
        hook.hook_type, upload.id, upload.offset
    );

    match hook.hook_type.as_str() {
        // Nothing to record yet; the upload id is only minted afterwards.
        hook::PRE_CREATE => {}
        hook::POST_CREATE | hook::POST_RECEIVE => {
            let event = UploadEvent::new(upload.id, upload.size.unwrap_or(0), upload.offset)
                .with_metadata(upload.metadata);
            state.tracker.track_upload(event).await;
        }
        hook::POST_FINISH => {
            state.tracker.complete_upload(&upload.id).await;
        }
        hook::POST_TERMINATE => {
            let mut metadata = upload.metadata;
            metadata.insert("error".into(), "upload terminated".into());
            let event = UploadEvent::new(
                upload.id.clone(),
                upload.size.unwrap_or(0),
                upload.offset,
            )
            .with_metadata(metadata);
            state.tracker.track_upload(event).await;
            state.tracker.complete_upload(&upload.id).await;
        }
        other => debug!("ignoring unhandled tus hook type {}", other),
    }

    Json(HookResponse::default())
}
