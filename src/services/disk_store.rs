//! src/services/disk_store.rs
//!
//! DiskStore — staging area for upload payloads received directly over
//! multipart requests. Payloads are streamed to a temporary file, checksummed
//! while streaming, and atomically renamed into place beneath
//! `base_path/{shard}/{shard}/{name}`. Later pipeline stages (transcoding,
//! off-host replication) pick staged files up from here; this service only
//! lands them durably.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid staging name")]
    InvalidName,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a completed staging write.
#[derive(Debug)]
pub struct StagedFile {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub etag: String,
}

#[derive(Clone)]
pub struct DiskStore {
    base_path: PathBuf,
}

impl DiskStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Names are minted by this service (`xhr-<uuid>`), so this only guards
    /// against a caller accidentally passing through client input.
    fn ensure_name_safe(&self, name: &str) -> StoreResult<()> {
        if name.is_empty() || name.len() > 256 {
            return Err(StoreError::InvalidName);
        }
        if name.contains('/') || name.contains("..") {
            return Err(StoreError::InvalidName);
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StoreError::InvalidName);
        }
        Ok(())
    }

    /// Two-level shard beneath the staging root so one directory never
    /// accumulates every staged payload.
    fn staged_path(&self, name: &str) -> PathBuf {
        let digest = md5::compute(name);
        let mut path = self.base_path.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(name);
        path
    }

    /// Stream a payload into the staging area.
    ///
    /// Writes chunks to a temporary sibling, computing size and MD5 etag as
    /// they pass, fsyncs, then renames into the final location. The
    /// temporary file is removed on any failure so aborted uploads leave
    /// nothing behind.
    pub async fn write_stream<S>(&self, name: &str, stream: S) -> StoreResult<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.ensure_name_safe(name)?;
        let file_path = self.staged_path(name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "staging path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }

        Ok(StagedFile {
            path: file_path,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn scratch_store() -> DiskStore {
        let dir = std::env::temp_dir().join(format!("upload-tracker-test-{}", Uuid::new_v4()));
        DiskStore::new(dir)
    }

    #[tokio::test]
    async fn write_stream_lands_payload_with_checksum() {
        let store = scratch_store();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);

        let staged = store.write_stream("xhr-test", chunks).await.unwrap();

        assert_eq!(staged.size_bytes, 11);
        assert_eq!(staged.etag, format!("{:x}", md5::compute(b"hello world")));
        let on_disk = fs::read(&staged.path).await.unwrap();
        assert_eq!(on_disk, b"hello world");
        let _ = fs::remove_dir_all(store.base_path()).await;
    }

    #[tokio::test]
    async fn failing_stream_leaves_no_temp_file() {
        let store = scratch_store();
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::Other, "connection reset")),
        ]);

        let result = store.write_stream("xhr-broken", chunks).await;
        assert!(result.is_err());

        if let Some(parent) = store.staged_path("xhr-broken").parent() {
            if let Ok(mut entries) = fs::read_dir(parent).await {
                while let Ok(Some(entry)) = entries.next_entry().await {
                    panic!("unexpected leftover file {:?}", entry.path());
                }
            }
        }
        let _ = fs::remove_dir_all(store.base_path()).await;
    }

    #[tokio::test]
    async fn path_traversal_names_are_rejected() {
        let store = scratch_store();
        let chunks = stream::iter(vec![Ok(Bytes::from_static(b"x"))]);
        assert!(matches!(
            store.write_stream("../escape", chunks).await,
            Err(StoreError::InvalidName)
        ));
    }
}
