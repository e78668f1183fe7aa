//! src/services/upload_tracker.rs
//!
//! UploadTracker — the in-memory registry mapping an upload id to its
//! latest known progress. Events arrive from several independent ingress
//! paths (tus hooks, direct multipart uploads, S3 callbacks) and are
//! merged last-write-wins per id. Every state change enqueues a snapshot
//! for the notifier task; delivery is best-effort and never blocks the
//! caller. Nothing here is persisted; a restart forgets all records.

use crate::models::upload::{UploadEvent, UploadRecord};
use chrono::{DateTime, Duration, Utc};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Cheap cloneable handle over the shared upload map. One instance is
/// created at startup and injected into every handler; tests build their
/// own instance with a private channel.
#[derive(Clone)]
pub struct UploadTracker {
    uploads: Arc<RwLock<HashMap<String, UploadRecord>>>,
    notify_tx: mpsc::Sender<UploadRecord>,
}

impl UploadTracker {
    /// Create a tracker that enqueues snapshots on `notify_tx`.
    pub fn new(notify_tx: mpsc::Sender<UploadRecord>) -> Self {
        Self {
            uploads: Arc::new(RwLock::new(HashMap::new())),
            notify_tx,
        }
    }

    /// Record a progress event, creating the record on first sight of the
    /// id and replacing it in place otherwise.
    ///
    /// Cannot fail from the caller's perspective; returns the merged
    /// record. One notification is enqueued per call, unconditionally.
    pub async fn track_upload(&self, event: UploadEvent) -> UploadRecord {
        self.track_upload_at(event, Utc::now()).await
    }

    /// Clock-explicit variant of [`track_upload`](Self::track_upload).
    pub async fn track_upload_at(&self, event: UploadEvent, now: DateTime<Utc>) -> UploadRecord {
        let mut uploads = self.uploads.write().await;
        let existing = uploads.get(&event.id);

        // Speed needs two observations with different offsets. A regression
        // produces a negative rate; that is reported as-is.
        let upload_speed = match existing {
            Some(prev) if prev.offset != event.offset => {
                let elapsed_secs =
                    (now - prev.last_updated).num_milliseconds() as f64 / 1000.0;
                if elapsed_secs > 0.0 {
                    Some((event.offset - prev.offset) as f64 / elapsed_secs)
                } else {
                    prev.upload_speed
                }
            }
            Some(prev) => prev.upload_speed,
            None => None,
        };

        let created_at = existing
            .map(|prev| prev.created_at)
            .or(event.created_at)
            .unwrap_or(now);
        let completed_at = existing.and_then(|prev| prev.completed_at);
        let metadata = match event.metadata {
            Some(metadata) => metadata,
            None => existing.map(|prev| prev.metadata.clone()).unwrap_or_default(),
        };

        let record = UploadRecord {
            id: event.id,
            size: event.size,
            offset: event.offset,
            metadata,
            created_at,
            last_updated: now,
            is_complete: event.is_complete,
            completed_at,
            upload_speed,
        };

        debug!(
            "tracked upload {}: offset={}/{} complete={}",
            record.id, record.offset, record.size, record.is_complete
        );
        uploads.insert(record.id.clone(), record.clone());
        drop(uploads);

        self.notify(&record);
        record
    }

    /// Mark an upload as finished and enqueue the terminal snapshot.
    ///
    /// Unknown ids are tolerated (hook ordering races across ingress paths
    /// can deliver a finish before a create): a warning is logged and no
    /// record is created. Calling twice re-sends the terminal notification
    /// but `completed_at` keeps its first value.
    pub async fn complete_upload(&self, id: &str) -> Option<UploadRecord> {
        self.complete_upload_at(id, Utc::now()).await
    }

    /// Clock-explicit variant of [`complete_upload`](Self::complete_upload).
    pub async fn complete_upload_at(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<UploadRecord> {
        let mut uploads = self.uploads.write().await;
        let Some(record) = uploads.get_mut(id) else {
            warn!("completion signal for unknown upload {}, ignoring", id);
            return None;
        };

        record.offset = record.size;
        record.last_updated = now;
        record.is_complete = true;
        if record.completed_at.is_none() {
            record.completed_at = Some(now);
        }

        let record = record.clone();
        drop(uploads);

        debug!("completed upload {} ({} bytes)", record.id, record.size);
        self.notify(&record);
        Some(record)
    }

    /// Latest snapshot for one id, if any.
    pub async fn get_upload(&self, id: &str) -> Option<UploadRecord> {
        self.uploads.read().await.get(id).cloned()
    }

    /// Snapshots of all uploads that have not recorded a completion.
    /// Ordering is unspecified.
    pub async fn get_active_uploads(&self) -> Vec<UploadRecord> {
        self.uploads
            .read()
            .await
            .values()
            .filter(|record| !record.is_complete)
            .cloned()
            .collect()
    }

    /// Snapshots of every record still held. Ordering is unspecified.
    pub async fn get_all_uploads(&self) -> Vec<UploadRecord> {
        self.uploads.read().await.values().cloned().collect()
    }

    /// Purge completed records whose last activity is older than `max_age`.
    ///
    /// Active records are never purged regardless of age; a stuck upload
    /// stays visible until completed or the process restarts. Returns the
    /// number of purged records. Intended to run from a periodic task in
    /// `main`, one sweep at a time.
    pub async fn cleanup_old_uploads(&self, max_age: Duration) -> usize {
        self.cleanup_old_uploads_at(max_age, Utc::now()).await
    }

    /// Clock-explicit variant of [`cleanup_old_uploads`](Self::cleanup_old_uploads).
    pub async fn cleanup_old_uploads_at(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let mut uploads = self.uploads.write().await;
        let before = uploads.len();
        uploads.retain(|_, record| {
            !(record.is_complete && now - record.last_updated > max_age)
        });
        let purged = before - uploads.len();
        if purged > 0 {
            info!("purged {} finished uploads older than {}", purged, max_age);
        }
        purged
    }

    /// Best-effort enqueue toward the notifier task. A full or closed
    /// queue drops the snapshot with a warning; the tracking call itself
    /// has already succeeded.
    fn notify(&self, record: &UploadRecord) {
        if let Err(err) = self.notify_tx.try_send(record.clone()) {
            warn!("dropping progress notification for {}: {}", record.id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (UploadTracker, mpsc::Receiver<UploadRecord>) {
        let (tx, rx) = mpsc::channel(32);
        (UploadTracker::new(tx), rx)
    }

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn first_track_creates_record_without_speed() {
        let (tracker, _rx) = tracker();

        tracker.track_upload(UploadEvent::new("a", 100, 0)).await;

        let record = tracker.get_upload("a").await.unwrap();
        assert_eq!(record.size, 100);
        assert_eq!(record.offset, 0);
        assert!(!record.is_complete);
        assert!(record.completed_at.is_none());
        assert!(record.upload_speed.is_none());
        assert_eq!(record.created_at, record.last_updated);
    }

    #[tokio::test]
    async fn speed_derived_from_successive_offsets() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("a", 10_000, 0), t0)
            .await;
        let record = tracker
            .track_upload_at(
                UploadEvent::new("a", 10_000, 1000),
                t0 + Duration::milliseconds(1000),
            )
            .await;

        let speed = record.upload_speed.unwrap();
        assert!((speed - 1000.0).abs() < 1e-6, "speed was {}", speed);
    }

    #[tokio::test]
    async fn unchanged_offset_carries_previous_speed() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("a", 10_000, 0), t0)
            .await;
        tracker
            .track_upload_at(
                UploadEvent::new("a", 10_000, 500),
                t0 + Duration::milliseconds(500),
            )
            .await;
        let record = tracker
            .track_upload_at(
                UploadEvent::new("a", 10_000, 500),
                t0 + Duration::milliseconds(900),
            )
            .await;

        assert!((record.upload_speed.unwrap() - 1000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn offset_regression_yields_negative_speed() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("a", 10_000, 2000), t0)
            .await;
        let record = tracker
            .track_upload_at(
                UploadEvent::new("a", 10_000, 1000),
                t0 + Duration::milliseconds(1000),
            )
            .await;

        assert!((record.upload_speed.unwrap() + 1000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("a", 100, 40), t0)
            .await;
        let t1 = t0 + Duration::seconds(1);
        tracker.complete_upload_at("a", t1).await.unwrap();
        tracker
            .complete_upload_at("a", t1 + Duration::seconds(5))
            .await
            .unwrap();

        let record = tracker.get_upload("a").await.unwrap();
        assert_eq!(record.offset, record.size);
        assert!(record.is_complete);
        assert_eq!(record.completed_at, Some(t1));
        assert_eq!(tracker.get_all_uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn completing_unknown_id_creates_nothing() {
        let (tracker, _rx) = tracker();

        assert!(tracker.complete_upload("ghost").await.is_none());
        assert!(tracker.get_upload("ghost").await.is_none());
        assert!(tracker.get_all_uploads().await.is_empty());
    }

    #[tokio::test]
    async fn active_listing_excludes_completed() {
        let (tracker, _rx) = tracker();

        for id in ["a", "b", "c"] {
            tracker.track_upload(UploadEvent::new(id, 100, 10)).await;
        }
        tracker.complete_upload("b").await.unwrap();

        let active = tracker.get_active_uploads().await;
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|record| record.id != "b"));
        assert_eq!(tracker.get_all_uploads().await.len(), 3);
    }

    #[tokio::test]
    async fn sweep_purges_only_old_completed_records() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("done", 100, 100), t0)
            .await;
        tracker.complete_upload_at("done", t0).await.unwrap();
        tracker
            .track_upload_at(UploadEvent::new("stuck", 100, 10), t0)
            .await;

        let purged = tracker
            .cleanup_old_uploads_at(Duration::hours(24), t0 + Duration::hours(25))
            .await;

        assert_eq!(purged, 1);
        assert!(tracker.get_upload("done").await.is_none());
        assert!(tracker.get_upload("stuck").await.is_some());
    }

    #[tokio::test]
    async fn fresh_completed_records_survive_the_sweep() {
        let (tracker, _rx) = tracker();
        let t0 = Utc::now();

        tracker
            .track_upload_at(UploadEvent::new("done", 100, 100), t0)
            .await;
        tracker.complete_upload_at("done", t0).await.unwrap();

        let purged = tracker
            .cleanup_old_uploads_at(Duration::hours(24), t0 + Duration::hours(1))
            .await;

        assert_eq!(purged, 0);
        assert!(tracker.get_upload("done").await.is_some());
    }

    #[tokio::test]
    async fn tracking_survives_a_closed_notifier_queue() {
        let (tracker, rx) = tracker();
        drop(rx);

        tracker.track_upload(UploadEvent::new("a", 100, 50)).await;
        let record = tracker.complete_upload("a").await.unwrap();

        assert!(record.is_complete);
        assert_eq!(tracker.get_all_uploads().await.len(), 1);
    }

    #[tokio::test]
    async fn every_call_enqueues_one_notification() {
        let (tracker, mut rx) = tracker();

        tracker.track_upload(UploadEvent::new("a", 100, 0)).await;
        tracker.track_upload(UploadEvent::new("a", 100, 60)).await;
        tracker.complete_upload("a").await.unwrap();

        let mut seen = Vec::new();
        while let Ok(record) = rx.try_recv() {
            seen.push(record);
        }
        assert_eq!(seen.len(), 3);
        assert!(seen[2].is_complete);
    }

    #[tokio::test]
    async fn metadata_is_inherited_when_event_omits_it() {
        let (tracker, _rx) = tracker();

        tracker
            .track_upload(
                UploadEvent::new("a", 100, 0)
                    .with_metadata(meta(&[("filename", "movie.mp4")])),
            )
            .await;
        let record = tracker.track_upload(UploadEvent::new("a", 100, 50)).await;

        assert_eq!(record.metadata.get("filename").unwrap(), "movie.mp4");
        assert_eq!(record.display_name(), "movie.mp4");
    }

    #[tokio::test]
    async fn late_progress_event_overrides_completion() {
        // A progress event arriving after the finish signal reactivates
        // the record; producers are expected not to do this.
        let (tracker, _rx) = tracker();

        tracker.track_upload(UploadEvent::new("a", 100, 100)).await;
        tracker.complete_upload("a").await.unwrap();
        let record = tracker.track_upload(UploadEvent::new("a", 100, 80)).await;

        assert!(!record.is_complete);
        assert!(record.completed_at.is_some());
        assert_eq!(tracker.get_active_uploads().await.len(), 1);
    }
}
