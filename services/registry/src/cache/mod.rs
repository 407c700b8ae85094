//! Cache-aside composition of two registries
//!
//! Reads go to the origin first. When the origin has the object it is
//! returned immediately and copied into the cache in the background; when the
//! origin fails or does not have it, the cache answers instead. Listings merge
//! both sides.
//!
//! The composition is read-through only: writes and uploads are rejected.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument as _;

use crate::blob::Layers;
use crate::error::{RegistryError, RegistryResult};
use crate::listing::{Catalog, joined};
use crate::manifest::Manifests;
use crate::reference::RepoName;
use crate::repo::{Registry, Repo};
use crate::upload::Upload;

mod layers;
mod manifests;

pub use self::layers::CacheLayers;
pub use self::manifests::CacheManifests;

/// Run a copy into the cache without waiting for it.
///
/// Failures are logged and dropped.
fn replicate<F>(what: &'static str, copy: F)
where
    F: Future<Output = RegistryResult<()>> + Send + 'static,
{
    tokio::spawn(
        async move {
            match copy.await {
                Ok(()) => tracing::debug!("copied {what} into cache"),
                Err(error) => tracing::error!(%error, "failed to copy {what} into cache"),
            }
        }
        .in_current_span(),
    );
}

/// A registry fronting `origin` with `cache`.
#[derive(Debug, Clone)]
pub struct CacheRegistry {
    origin: Arc<dyn Registry>,
    cache: Arc<dyn Registry>,
}

impl CacheRegistry {
    /// Compose `origin` and `cache`.
    pub fn new(origin: Arc<dyn Registry>, cache: Arc<dyn Registry>) -> Self {
        Self { origin, cache }
    }
}

#[async_trait]
impl Registry for CacheRegistry {
    fn repo(&self, name: &RepoName) -> Arc<dyn Repo> {
        Arc::new(CacheRepo {
            name: name.clone(),
            origin: self.origin.repo(name),
            cache: self.cache.repo(name),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn catalog(&self, from: Option<&RepoName>, limit: usize) -> RegistryResult<Catalog> {
        let origin = async { self.origin.catalog(from, limit).await.map(Catalog::into_page) };
        let cache = async { self.cache.catalog(from, limit).await.map(Catalog::into_page) };
        Ok(joined(origin, cache, limit).await.into())
    }
}

/// A repository of a [`CacheRegistry`].
#[derive(Debug, Clone)]
pub struct CacheRepo {
    name: RepoName,
    origin: Arc<dyn Repo>,
    cache: Arc<dyn Repo>,
}

#[async_trait]
impl Repo for CacheRepo {
    fn name(&self) -> &RepoName {
        &self.name
    }

    fn layers(&self) -> Arc<dyn Layers> {
        Arc::new(CacheLayers::new(self.origin.layers(), self.cache.layers()))
    }

    fn manifests(&self) -> Arc<dyn Manifests> {
        Arc::new(CacheManifests::new(
            self.name.clone(),
            self.origin.clone(),
            self.cache.clone(),
        ))
    }

    async fn start_upload(&self) -> RegistryResult<Upload> {
        Err(RegistryError::UnsupportedOperation("upload to a cached repository"))
    }

    async fn upload(&self, _uuid: &str) -> RegistryResult<Option<Upload>> {
        Err(RegistryError::UnsupportedOperation("upload to a cached repository"))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use storage::{MemoryStorage, Storage};

    use super::*;
    use crate::blob::BlobSource;
    use crate::digest::Digest;
    use crate::listing::Tags;
    use crate::manifest::tests::manifest_json;
    use crate::manifest::Manifest;
    use crate::reference::{ManifestRef, Tag};
    use crate::repo::StorageRegistry;

    /// A registry whose every operation fails.
    #[derive(Debug)]
    pub(crate) struct Broken;

    #[async_trait]
    impl Registry for Broken {
        fn repo(&self, name: &RepoName) -> Arc<dyn Repo> {
            Arc::new(BrokenRepo(name.clone()))
        }

        async fn catalog(&self, _: Option<&RepoName>, _: usize) -> RegistryResult<Catalog> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }
    }

    #[derive(Debug)]
    struct BrokenRepo(RepoName);

    #[async_trait]
    impl Repo for BrokenRepo {
        fn name(&self) -> &RepoName {
            &self.0
        }

        fn layers(&self) -> Arc<dyn Layers> {
            Arc::new(Broken)
        }

        fn manifests(&self) -> Arc<dyn Manifests> {
            Arc::new(Broken)
        }

        async fn start_upload(&self) -> RegistryResult<Upload> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }

        async fn upload(&self, _: &str) -> RegistryResult<Option<Upload>> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }
    }

    #[async_trait]
    impl Layers for Broken {
        async fn put(&self, _: BlobSource) -> RegistryResult<crate::blob::Blob> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }

        async fn get(&self, _: &Digest) -> RegistryResult<Option<crate::blob::Blob>> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }
    }

    #[async_trait]
    impl Manifests for Broken {
        async fn put(&self, _: &ManifestRef, _: Bytes) -> RegistryResult<Manifest> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }

        async fn get(&self, _: &ManifestRef) -> RegistryResult<Option<Manifest>> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }

        async fn tags(&self, _: Option<&Tag>, _: usize) -> RegistryResult<Tags> {
            Err(RegistryError::UnsupportedOperation("broken"))
        }
    }

    pub(crate) fn storage_registry() -> Arc<StorageRegistry> {
        let storage: Storage = MemoryStorage::with_buckets(&["registry"]).into();
        Arc::new(StorageRegistry::new(&storage, "registry"))
    }

    pub(crate) fn name(value: &str) -> RepoName {
        RepoName::new(value).unwrap()
    }

    /// Push a manifest with a config blob unique to `tag`.
    pub(crate) async fn push(registry: &dyn Registry, repo: &str, tag: &str) -> Manifest {
        let repo = registry.repo(&name(repo));
        let config = repo
            .layers()
            .put(BlobSource::trusted(Bytes::from(format!("config {tag}"))))
            .await
            .unwrap();
        repo.manifests()
            .put(&tag.parse().unwrap(), manifest_json(config.digest()))
            .await
            .unwrap()
    }

    /// Poll until `check` passes, or give up after a second.
    pub(crate) async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn catalog_merges_both_sides() {
        let origin = storage_registry();
        let cache = storage_registry();
        push(origin.as_ref(), "a", "1").await;
        push(origin.as_ref(), "b", "1").await;
        push(origin.as_ref(), "c", "1").await;
        push(cache.as_ref(), "b", "1").await;
        push(cache.as_ref(), "d", "1").await;

        let registry = CacheRegistry::new(origin, cache);
        let catalog = registry.catalog(None, 10).await.unwrap();
        assert_eq!(
            catalog.repositories(),
            [name("a"), name("b"), name("c"), name("d")]
        );
        assert!(catalog.next().is_none());

        let first = registry.catalog(None, 3).await.unwrap();
        assert_eq!(first.repositories(), [name("a"), name("b"), name("c")]);
        let rest = registry.catalog(first.next(), 3).await.unwrap();
        assert_eq!(rest.repositories(), [name("d")]);
        assert!(rest.next().is_none());
    }

    #[tokio::test]
    async fn catalog_survives_broken_origin() {
        let cache = storage_registry();
        push(cache.as_ref(), "cached", "1").await;

        let registry = CacheRegistry::new(Arc::new(Broken), cache);
        let catalog = registry.catalog(None, 10).await.unwrap();
        assert_eq!(catalog.repositories(), [name("cached")]);
    }

    #[tokio::test]
    async fn uploads_are_unsupported() {
        let registry = CacheRegistry::new(storage_registry(), storage_registry());
        let repo = registry.repo(&name("test"));
        assert!(matches!(
            repo.start_upload().await,
            Err(RegistryError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            repo.upload("anything").await,
            Err(RegistryError::UnsupportedOperation(_))
        ));
    }
}
