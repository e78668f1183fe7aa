//! Shared application state handed to every handler.
//!
//! Built once at startup; all fields are cheap clones over shared
//! interiors. The raw notification sender exists only for the
//! client-reported progress path, which feeds the notifier without
//! entering the tracker's stored state.

use crate::models::upload::UploadRecord;
use crate::services::{disk_store::DiskStore, upload_tracker::UploadTracker};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub tracker: UploadTracker,
    pub store: DiskStore,
    pub notify_tx: mpsc::Sender<UploadRecord>,
}
