//! Defines routes for all upload tracking and ingress operations.
//!
//! ## Structure
//! - **Ingress endpoints**
//!   - `POST /hooks/tus`           — tus server webhook (create/receive/finish/terminate)
//!   - `POST /uploads`             — direct multipart upload into the staging store
//!   - `POST /uploads/s3/callback` — S3-direct / Companion completion callback
//!   - `POST /uploads/progress`    — browser-reported progress (notification only)
//!
//! - **Query endpoints**
//!   - `GET /uploads`        — every tracked record
//!   - `GET /uploads/active` — records without a completion signal
//!   - `GET /uploads/{id}`   — one record by id
//!
//! The static `/uploads/active` route is registered alongside the dynamic
//! `/uploads/{id}` route; axum matches the static segment first.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        hook_handlers::tus_hook,
        upload_handlers::{
            client_progress, direct_upload, get_upload, list_active_uploads, list_uploads,
            s3_callback,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for the whole service.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // ingress endpoints
        .route("/hooks/tus", post(tus_hook))
        .route("/uploads", post(direct_upload).get(list_uploads))
        .route("/uploads/s3/callback", post(s3_callback))
        .route("/uploads/progress", post(client_progress))
        // query endpoints
        .route("/uploads/active", get(list_active_uploads))
        .route("/uploads/{id}", get(get_upload))
}
