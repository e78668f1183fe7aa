//! Service layer: the upload tracker, notification delivery, and the
//! staging store for directly-received payloads.

pub mod disk_store;
pub mod notifier;
pub mod upload_tracker;
