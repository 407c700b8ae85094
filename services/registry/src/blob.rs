//! Content addressed blob storage

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use storage::StorageBucket;
use url::Url;

use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::Layout;
use crate::proxy::Remote;

/// Where the content of a [`Blob`] comes from.
#[derive(Debug, Clone)]
enum Location {
    Stored {
        bucket: StorageBucket,
        key: Utf8PathBuf,
    },
    Remote {
        remote: Remote,
        url: Url,
    },
    Loaded(Bytes),
}

/// An immutable stored blob.
///
/// The content is usually not held in memory; [`Blob::content`] reads it
/// from the backend on every call.
#[derive(Debug, Clone)]
pub struct Blob {
    digest: Digest,
    size: u64,
    location: Location,
}

impl Blob {
    /// A blob served by a remote registry at `url`.
    pub(crate) fn remote(digest: Digest, size: u64, remote: Remote, url: Url) -> Self {
        Self {
            digest,
            size,
            location: Location::Remote { remote, url },
        }
    }

    /// A blob whose content is already in memory.
    pub(crate) fn loaded(digest: Digest, content: Bytes) -> Self {
        Self {
            digest,
            size: content.len() as u64,
            location: Location::Loaded(content),
        }
    }

    /// The blob digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The blob size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the blob content.
    #[tracing::instrument(skip(self), fields(digest = %self.digest))]
    pub async fn content(&self) -> RegistryResult<Bytes> {
        let content = match &self.location {
            Location::Stored { bucket, key } => bucket.read_optional(key).await?,
            Location::Remote { remote, url } => remote.bytes(url.clone()).await?,
            Location::Loaded(content) => Some(content.clone()),
        };
        content.ok_or_else(|| RegistryError::BlobUnknown(self.digest.clone()))
    }
}

/// Content to be stored as a blob.
#[derive(Debug, Clone)]
pub enum BlobSource {
    /// Content which must hash to `digest`, or the put fails.
    Checked {
        /// The content.
        content: Bytes,
        /// The expected digest.
        digest: Digest,
    },

    /// Content which is stored under whatever digest it hashes to.
    ///
    /// Only for content which was already verified.
    Trusted {
        /// The content.
        content: Bytes,
    },
}

impl BlobSource {
    /// Content which must hash to `digest`.
    pub fn checked(content: impl Into<Bytes>, digest: Digest) -> Self {
        BlobSource::Checked {
            content: content.into(),
            digest,
        }
    }

    /// Content stored under its own digest.
    pub fn trusted(content: impl Into<Bytes>) -> Self {
        BlobSource::Trusted {
            content: content.into(),
        }
    }

    /// Hash the content, failing on a mismatch for checked sources.
    pub fn verify(self) -> RegistryResult<(Digest, Bytes)> {
        match self {
            BlobSource::Checked { content, digest } => {
                let actual = Digest::compute(digest.algorithm(), &content);
                if actual != digest {
                    return Err(RegistryError::DigestMismatch {
                        expected: digest,
                        actual,
                    });
                }
                Ok((actual, content))
            }
            BlobSource::Trusted { content } => Ok((Digest::sha256(&content), content)),
        }
    }
}

/// Blob storage for a repository.
#[async_trait]
pub trait Layers: fmt::Debug + Send + Sync {
    /// Store a blob.
    async fn put(&self, source: BlobSource) -> RegistryResult<Blob>;

    /// Look up a blob by digest.
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>>;
}

/// Storage backed blobs, shared by every repository in a registry.
#[derive(Debug, Clone)]
pub struct BlobStore {
    bucket: StorageBucket,
    layout: Layout,
}

impl BlobStore {
    /// Create a blob store over `bucket`.
    pub fn new(bucket: StorageBucket, layout: Layout) -> Self {
        Self { bucket, layout }
    }

    fn blob(&self, digest: Digest, size: u64) -> Blob {
        let key = self.layout.blob(&digest);
        Blob {
            digest,
            size,
            location: Location::Stored {
                bucket: self.bucket.clone(),
                key,
            },
        }
    }
}

#[async_trait]
impl Layers for BlobStore {
    #[tracing::instrument(skip_all)]
    async fn put(&self, source: BlobSource) -> RegistryResult<Blob> {
        let (digest, content) = source.verify()?;
        let key = self.layout.blob(&digest);

        if self.bucket.exists(&key).await? {
            tracing::trace!(%digest, "blob already present");
        } else {
            tracing::debug!(%digest, size = content.len(), "storing blob");
            self.bucket.write(&key, &content).await?;
        }

        Ok(self.blob(digest, content.len() as u64))
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let key = self.layout.blob(digest);
        match self.bucket.metadata(&key).await {
            Ok(metadata) => Ok(Some(self.blob(digest.clone(), metadata.size))),
            Err(error) if error.is_not_found() => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Algorithm;
    use storage::{MemoryStorage, Storage};

    static_assertions::assert_obj_safe!(Layers);

    fn blobs() -> BlobStore {
        let storage: Storage = MemoryStorage::with_buckets(&["test"]).into();
        BlobStore::new(storage.bucket("test"), Layout::default())
    }

    #[tokio::test]
    async fn checked_round_trip() {
        let blobs = blobs();
        let data = b"test data";
        let digest = Digest::sha256(data);

        let blob = blobs
            .put(BlobSource::checked(&data[..], digest.clone()))
            .await
            .unwrap();
        assert_eq!(blob.digest(), &digest);
        assert_eq!(blob.size(), data.len() as u64);

        let found = blobs.get(&digest).await.unwrap().expect("blob is stored");
        assert_eq!(found.size(), data.len() as u64);
        assert_eq!(&found.content().await.unwrap()[..], data);
    }

    #[tokio::test]
    async fn mismatch_creates_nothing() {
        let blobs = blobs();
        let data = b"test data";
        let wrong = Digest::sha256(b"other data");

        let err = blobs
            .put(BlobSource::checked(&data[..], wrong.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DigestMismatch { .. }));

        assert!(blobs.get(&wrong).await.unwrap().is_none());
        assert!(blobs.get(&Digest::sha256(data)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trusted_uses_content_digest() {
        let blobs = blobs();
        let blob = blobs.put(BlobSource::trusted(&b"config"[..])).await.unwrap();
        assert_eq!(blob.digest(), &Digest::sha256(b"config"));
    }

    #[tokio::test]
    async fn checked_sha512() {
        let blobs = blobs();
        let digest = Digest::compute(Algorithm::Sha512, b"layer");
        let blob = blobs
            .put(BlobSource::checked(&b"layer"[..], digest.clone()))
            .await
            .unwrap();
        assert_eq!(blob.digest(), &digest);
        assert!(blobs.get(&digest).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_blob_is_absent() {
        let blobs = blobs();
        assert!(blobs.get(&Digest::sha256(b"nope")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let blobs = blobs();
        let first = blobs.put(BlobSource::trusted(&b"same"[..])).await.unwrap();
        let second = blobs.put(BlobSource::trusted(&b"same"[..])).await.unwrap();
        assert_eq!(first.digest(), second.digest());
        assert_eq!(second.content().await.unwrap(), Bytes::from_static(b"same"));
    }
}
