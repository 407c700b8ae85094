//! Chunked blob uploads
//!
//! An upload receives content in ordered chunks and commits it as a blob once
//! the client supplies the expected digest. Each chunk is stored as its own
//! object, keyed by the offset it starts at, so no object is ever rewritten
//! while an upload is in progress.

use std::sync::{Arc, OnceLock};

use bytes::{Bytes, BytesMut};
use camino::Utf8Path;
use storage::StorageBucket;

use crate::blob::{Blob, BlobSource, Layers};
use crate::digest::{Digest, Digester};
use crate::error::{RegistryError, RegistryResult};
use crate::layout::Layout;
use crate::reference::RepoName;

/// Lifecycle of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Not yet started.
    Created,
    /// Accepting chunks.
    Active,
    /// Committed as a blob.
    Completed,
    /// Abandoned by the client.
    Deleted,
}

/// An upload session of one repository.
///
/// Clones share the terminal state observed through this handle; other
/// handles to the same uuid only see what is in storage.
#[derive(Debug, Clone)]
pub struct Upload {
    name: RepoName,
    uuid: String,
    bucket: StorageBucket,
    layout: Layout,
    closed: Arc<OnceLock<UploadState>>,
}

impl Upload {
    /// A handle to upload `uuid` of repository `name`.
    pub fn new(name: RepoName, uuid: impl Into<String>, bucket: StorageBucket, layout: Layout) -> Self {
        Self {
            name,
            uuid: uuid.into(),
            bucket,
            layout,
            closed: Arc::new(OnceLock::new()),
        }
    }

    /// The upload id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The repository receiving the upload.
    pub fn name(&self) -> &RepoName {
        &self.name
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> RegistryResult<UploadState> {
        if let Some(state) = self.closed.get() {
            return Ok(*state);
        }
        let started = self
            .bucket
            .exists(&self.layout.upload_started(&self.name, &self.uuid))
            .await?;
        Ok(if started {
            UploadState::Active
        } else {
            UploadState::Created
        })
    }

    /// Start accepting chunks.
    ///
    /// Starting an active upload leaves it untouched.
    #[tracing::instrument(skip(self), fields(name = %self.name, uuid = %self.uuid))]
    pub async fn start(&self) -> RegistryResult<()> {
        match self.state().await? {
            UploadState::Created => {
                let marker = self.layout.upload_started(&self.name, &self.uuid);
                let now = chrono::Utc::now().to_rfc3339();
                self.bucket.write(&marker, now.as_bytes()).await?;
                tracing::debug!("upload started");
                Ok(())
            }
            UploadState::Active => Ok(()),
            UploadState::Completed | UploadState::Deleted => {
                Err(RegistryError::UploadNotFound(self.uuid.clone()))
            }
        }
    }

    async fn ensure_active(&self) -> RegistryResult<()> {
        match self.state().await? {
            UploadState::Active => Ok(()),
            _ => Err(RegistryError::UploadNotFound(self.uuid.clone())),
        }
    }

    /// Chunk keys in offset order.
    async fn chunks(&self) -> RegistryResult<Vec<String>> {
        let root = self.layout.upload_chunks(&self.name, &self.uuid);
        Ok(self.bucket.list(Some(root.as_path())).await?)
    }

    async fn recorded_offset(&self) -> RegistryResult<u64> {
        let chunks = self.chunks().await?;
        let Some(last) = chunks.last() else {
            return Ok(0);
        };
        let last = Utf8Path::new(last);
        let start: u64 = last
            .file_name()
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| RegistryError::BlobUploadInvalid(format!("corrupt chunk key {last}")))?;
        let metadata = self.bucket.metadata(last).await?;
        Ok(start + metadata.size)
    }

    /// Total number of bytes received.
    #[tracing::instrument(skip(self), fields(name = %self.name, uuid = %self.uuid))]
    pub async fn offset(&self) -> RegistryResult<u64> {
        self.ensure_active().await?;
        self.recorded_offset().await
    }

    /// Append a chunk, returning the new offset.
    ///
    /// Concurrent appends to one upload must be serialized by the caller.
    #[tracing::instrument(skip(self, chunk), fields(name = %self.name, uuid = %self.uuid, size = chunk.len()))]
    pub async fn append(&self, chunk: Bytes) -> RegistryResult<u64> {
        self.ensure_active().await?;
        let offset = self.recorded_offset().await?;
        if chunk.is_empty() {
            return Ok(offset);
        }

        let key = self.layout.upload_chunk(&self.name, &self.uuid, offset);
        self.bucket.write(&key, &chunk).await?;
        tracing::trace!(offset, "chunk stored");
        Ok(offset + chunk.len() as u64)
    }

    /// Commit the received content as a blob in `layers`.
    ///
    /// On a digest mismatch the upload stays active with its content.
    pub async fn put_to(&self, layers: &dyn Layers, expected: &Digest) -> RegistryResult<Blob> {
        self.put_with_last(layers, expected, Bytes::new()).await
    }

    /// Commit the received content followed by a final chunk `last`.
    ///
    /// `last` is never stored on its own: on a digest mismatch the upload is
    /// left exactly as it was before the call.
    #[tracing::instrument(skip(self, layers, last), fields(name = %self.name, uuid = %self.uuid, %expected, last = last.len()))]
    pub async fn put_with_last(
        &self,
        layers: &dyn Layers,
        expected: &Digest,
        last: Bytes,
    ) -> RegistryResult<Blob> {
        self.ensure_active().await?;

        let mut digester = Digester::with_algorithm(expected.algorithm());
        let mut content = BytesMut::new();
        for key in self.chunks().await? {
            let chunk = self.bucket.read(Utf8Path::new(&key)).await?;
            digester.update(&chunk);
            content.extend_from_slice(&chunk);
        }
        digester.update(&last);
        content.extend_from_slice(&last);

        let actual = digester.finish();
        if &actual != expected {
            return Err(RegistryError::DigestMismatch {
                expected: expected.clone(),
                actual,
            });
        }

        let blob = layers
            .put(BlobSource::checked(content.freeze(), expected.clone()))
            .await?;
        self.close(UploadState::Completed).await?;
        tracing::debug!(size = blob.size(), "upload completed");
        Ok(blob)
    }

    /// Abandon the upload and remove everything it received.
    #[tracing::instrument(skip(self), fields(name = %self.name, uuid = %self.uuid))]
    pub async fn delete(&self) -> RegistryResult<()> {
        self.ensure_active().await?;
        self.close(UploadState::Deleted).await
    }

    async fn close(&self, state: UploadState) -> RegistryResult<()> {
        for key in self.chunks().await? {
            self.bucket.delete(Utf8Path::new(&key)).await?;
        }
        self.bucket
            .delete(&self.layout.upload_started(&self.name, &self.uuid))
            .await?;
        let _ = self.closed.set(state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobStore;
    use storage::{MemoryStorage, Storage};

    fn upload() -> (BlobStore, Upload) {
        let storage: Storage = MemoryStorage::with_buckets(&["test"]).into();
        let bucket = storage.bucket("test");
        let blobs = BlobStore::new(bucket.clone(), Layout::default());
        let upload = Upload::new(
            RepoName::new("test").unwrap(),
            "a4a0d8c6-8e0c-4d2a-9a6e-0b5a8a4d0c11",
            bucket,
            Layout::default(),
        );
        (blobs, upload)
    }

    #[tokio::test]
    async fn offsets_accumulate() {
        let (_, upload) = upload();
        assert_eq!(upload.state().await.unwrap(), UploadState::Created);
        upload.start().await.unwrap();
        assert_eq!(upload.state().await.unwrap(), UploadState::Active);

        assert_eq!(upload.append(Bytes::from_static(b"hello ")).await.unwrap(), 6);
        assert_eq!(upload.append(Bytes::new()).await.unwrap(), 6);
        assert_eq!(upload.append(Bytes::from_static(b"world")).await.unwrap(), 11);
        assert_eq!(upload.offset().await.unwrap(), 11);
    }

    #[tokio::test]
    async fn append_requires_start() {
        let (_, upload) = upload();
        let error = upload.append(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(error, RegistryError::UploadNotFound(_)));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (_, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"data")).await.unwrap();
        upload.start().await.unwrap();
        assert_eq!(upload.offset().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn put_to_commits_blob() {
        let (blobs, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"hello ")).await.unwrap();
        upload.append(Bytes::from_static(b"world")).await.unwrap();

        let digest = Digest::sha256(b"hello world");
        let blob = upload.put_to(&blobs, &digest).await.unwrap();
        assert_eq!(blob.digest(), &digest);
        assert_eq!(blob.size(), 11);
        assert_eq!(upload.state().await.unwrap(), UploadState::Completed);

        let stored = blobs.get(&digest).await.unwrap().unwrap();
        assert_eq!(&stored.content().await.unwrap()[..], b"hello world");

        let error = upload.append(Bytes::from_static(b"more")).await.unwrap_err();
        assert!(matches!(error, RegistryError::UploadNotFound(_)));
    }

    #[tokio::test]
    async fn mismatch_keeps_upload_active() {
        let (blobs, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"content")).await.unwrap();

        let wrong = Digest::sha256(b"other");
        let error = upload.put_to(&blobs, &wrong).await.unwrap_err();
        assert!(matches!(error, RegistryError::DigestMismatch { .. }));
        assert_eq!(upload.state().await.unwrap(), UploadState::Active);
        assert_eq!(upload.offset().await.unwrap(), 7);

        let right = Digest::sha256(b"content");
        upload.put_to(&blobs, &right).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_final_chunk_is_not_kept() {
        let (blobs, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"hello ")).await.unwrap();

        let wrong = Digest::sha256(b"other");
        let error = upload
            .put_with_last(&blobs, &wrong, Bytes::from_static(b"world"))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::DigestMismatch { .. }));
        assert_eq!(upload.offset().await.unwrap(), 6);

        let right = Digest::sha256(b"hello world");
        let blob = upload
            .put_with_last(&blobs, &right, Bytes::from_static(b"world"))
            .await
            .unwrap();
        assert_eq!(blob.size(), 11);
        assert_eq!(upload.state().await.unwrap(), UploadState::Completed);
    }

    #[tokio::test]
    async fn sha512_uploads_commit() {
        let (blobs, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"layer")).await.unwrap();

        let digest = Digest::compute(crate::digest::Algorithm::Sha512, b"layer");
        let blob = upload.put_to(&blobs, &digest).await.unwrap();
        assert_eq!(blob.digest(), &digest);
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let (_, upload) = upload();
        upload.start().await.unwrap();
        upload.append(Bytes::from_static(b"content")).await.unwrap();
        upload.delete().await.unwrap();
        assert_eq!(upload.state().await.unwrap(), UploadState::Deleted);
        assert!(upload.chunks().await.unwrap().is_empty());
    }
}
