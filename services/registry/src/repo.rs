//! Registries and their repositories

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use camino::Utf8Path;
use storage::{Storage, StorageBucket};

use crate::blob::{BlobStore, Layers};
use crate::error::RegistryResult;
use crate::layout::Layout;
use crate::listing::{Catalog, Page};
use crate::manifest::{Manifests, StorageManifests};
use crate::reference::RepoName;
use crate::upload::{Upload, UploadState};

/// A collection of repositories.
#[async_trait]
pub trait Registry: fmt::Debug + Send + Sync {
    /// The repository called `name`. Repositories exist implicitly.
    fn repo(&self, name: &RepoName) -> Arc<dyn Repo>;

    /// Up to `limit` repository names after `from`, ascending.
    async fn catalog(&self, from: Option<&RepoName>, limit: usize) -> RegistryResult<Catalog>;
}

/// One repository: its blobs, manifests and uploads.
#[async_trait]
pub trait Repo: fmt::Debug + Send + Sync {
    /// The repository name.
    fn name(&self) -> &RepoName;

    /// Blob storage.
    fn layers(&self) -> Arc<dyn Layers>;

    /// Manifest storage.
    fn manifests(&self) -> Arc<dyn Manifests>;

    /// Begin a new upload with a fresh uuid.
    async fn start_upload(&self) -> RegistryResult<Upload>;

    /// An active upload, if `uuid` names one.
    async fn upload(&self, uuid: &str) -> RegistryResult<Option<Upload>>;
}

/// A registry persisted in a storage bucket.
#[derive(Debug, Clone)]
pub struct StorageRegistry {
    bucket: StorageBucket,
    layout: Layout,
    blobs: BlobStore,
}

impl StorageRegistry {
    /// A registry in `bucket` of `storage`, using the default layout.
    pub fn new(storage: &Storage, bucket: impl Into<String>) -> Self {
        Self::with_layout(storage.bucket(bucket), Layout::default())
    }

    /// A registry in `bucket` using `layout`.
    pub fn with_layout(bucket: StorageBucket, layout: Layout) -> Self {
        let blobs = BlobStore::new(bucket.clone(), layout.clone());
        Self {
            bucket,
            layout,
            blobs,
        }
    }
}

#[async_trait]
impl Registry for StorageRegistry {
    fn repo(&self, name: &RepoName) -> Arc<dyn Repo> {
        Arc::new(StorageRepo {
            name: name.clone(),
            bucket: self.bucket.clone(),
            layout: self.layout.clone(),
            blobs: self.blobs.clone(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn catalog(&self, from: Option<&RepoName>, limit: usize) -> RegistryResult<Catalog> {
        let keys = self.bucket.list(Some(self.layout.repositories().as_path())).await?;
        let names: BTreeSet<RepoName> = keys
            .iter()
            .filter_map(|key| self.layout.repository_of(Utf8Path::new(key)))
            .collect();
        Ok(Page::select(names, from, limit).into())
    }
}

/// A repository of a [`StorageRegistry`].
#[derive(Debug, Clone)]
pub struct StorageRepo {
    name: RepoName,
    bucket: StorageBucket,
    layout: Layout,
    blobs: BlobStore,
}

#[async_trait]
impl Repo for StorageRepo {
    fn name(&self) -> &RepoName {
        &self.name
    }

    fn layers(&self) -> Arc<dyn Layers> {
        Arc::new(self.blobs.clone())
    }

    fn manifests(&self) -> Arc<dyn Manifests> {
        Arc::new(StorageManifests::new(
            self.name.clone(),
            self.bucket.clone(),
            self.layout.clone(),
            self.blobs.clone(),
        ))
    }

    #[tracing::instrument(skip(self), fields(name = %self.name))]
    async fn start_upload(&self) -> RegistryResult<Upload> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let upload = Upload::new(
            self.name.clone(),
            uuid,
            self.bucket.clone(),
            self.layout.clone(),
        );
        upload.start().await?;
        Ok(upload)
    }

    #[tracing::instrument(skip(self), fields(name = %self.name))]
    async fn upload(&self, uuid: &str) -> RegistryResult<Option<Upload>> {
        if uuid::Uuid::parse_str(uuid).is_err() {
            return Ok(None);
        }
        let upload = Upload::new(
            self.name.clone(),
            uuid,
            self.bucket.clone(),
            self.layout.clone(),
        );
        match upload.state().await? {
            UploadState::Active => Ok(Some(upload)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobSource;
    use crate::manifest::tests::manifest_json;
    use storage::MemoryStorage;

    static_assertions::assert_obj_safe!(Registry, Repo);

    fn registry() -> StorageRegistry {
        let storage: Storage = MemoryStorage::with_buckets(&["registry"]).into();
        StorageRegistry::new(&storage, "registry")
    }

    fn name(value: &str) -> RepoName {
        RepoName::new(value).unwrap()
    }

    async fn push(registry: &StorageRegistry, repo: &str, tag: &str) {
        let repo = registry.repo(&name(repo));
        let config = repo
            .layers()
            .put(BlobSource::trusted(repo.name().to_string().into_bytes()))
            .await
            .unwrap();
        repo.manifests()
            .put(&tag.parse().unwrap(), manifest_json(config.digest()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn catalog_lists_repositories_with_manifests() {
        let registry = registry();
        push(&registry, "library/alpine", "latest").await;
        push(&registry, "busybox", "1").await;
        push(&registry, "busybox", "2").await;

        let catalog = registry.catalog(None, 10).await.unwrap();
        assert_eq!(
            catalog.repositories(),
            [name("busybox"), name("library/alpine")]
        );
        assert!(catalog.next().is_none());

        let first = registry.catalog(None, 1).await.unwrap();
        assert_eq!(first.repositories(), [name("busybox")]);
        assert_eq!(first.next(), Some(&name("busybox")));
    }

    #[tokio::test]
    async fn blobs_are_shared_between_repositories() {
        let registry = registry();
        let blob = registry
            .repo(&name("one"))
            .layers()
            .put(BlobSource::trusted(&b"shared"[..]))
            .await
            .unwrap();
        let found = registry
            .repo(&name("two"))
            .layers()
            .get(blob.digest())
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn uploads_are_found_by_uuid() {
        let registry = registry();
        let repo = registry.repo(&name("test"));
        let upload = repo.start_upload().await.unwrap();

        let found = repo.upload(upload.uuid()).await.unwrap().unwrap();
        assert_eq!(found.uuid(), upload.uuid());

        assert!(repo.upload("not-a-uuid").await.unwrap().is_none());
        let unknown = uuid::Uuid::new_v4().to_string();
        assert!(repo.upload(&unknown).await.unwrap().is_none());

        upload.delete().await.unwrap();
        assert!(repo.upload(upload.uuid()).await.unwrap().is_none());
    }
}
