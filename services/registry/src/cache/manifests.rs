use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::try_join_all;

use crate::blob::{BlobSource, Layers};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::listing::{Tags, joined};
use crate::manifest::{Manifest, Manifests};
use crate::reference::{ManifestRef, RepoName, Tag};
use crate::repo::Repo;

/// Manifests of a cached repository.
#[derive(Debug, Clone)]
pub struct CacheManifests {
    name: RepoName,
    origin: Arc<dyn Repo>,
    cache: Arc<dyn Repo>,
}

impl CacheManifests {
    /// Manifests of `name`, read from `origin` and copied into `cache`.
    pub fn new(name: RepoName, origin: Arc<dyn Repo>, cache: Arc<dyn Repo>) -> Self {
        Self {
            name,
            origin,
            cache,
        }
    }

    /// Copy `manifest` and the blobs it needs from origin into the cache.
    async fn copy(
        origin: Arc<dyn Repo>,
        cache: Arc<dyn Repo>,
        reference: ManifestRef,
        manifest: Manifest,
    ) -> RegistryResult<()> {
        let from = origin.layers();
        let to = cache.layers();

        let digests: Vec<Digest> = manifest.blobs().cloned().collect();
        try_join_all(
            digests
                .into_iter()
                .map(|digest| copy_blob(from.clone(), to.clone(), digest)),
        )
        .await?;

        cache
            .manifests()
            .put(&reference, manifest.content().clone())
            .await?;
        Ok(())
    }
}

async fn copy_blob(from: Arc<dyn Layers>, to: Arc<dyn Layers>, digest: Digest) -> RegistryResult<()> {
    if to.get(&digest).await?.is_some() {
        tracing::trace!(%digest, "blob already cached");
        return Ok(());
    }
    let blob = from
        .get(&digest)
        .await?
        .ok_or_else(|| RegistryError::BlobUnknown(digest.clone()))?;
    let content = blob.content().await?;
    to.put(BlobSource::checked(content, digest)).await?;
    Ok(())
}

#[async_trait]
impl Manifests for CacheManifests {
    async fn put(&self, _reference: &ManifestRef, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::UnsupportedOperation("push to a cached repository"))
    }

    #[tracing::instrument(skip(self), fields(name = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        match self.origin.manifests().get(reference).await {
            Err(error) => {
                tracing::warn!(%error, "origin failed, reading manifest from cache");
                self.cache.manifests().get(reference).await
            }
            Ok(Some(manifest)) => {
                super::replicate(
                    "manifest",
                    Self::copy(
                        self.origin.clone(),
                        self.cache.clone(),
                        reference.clone(),
                        manifest.clone(),
                    ),
                );
                Ok(Some(manifest))
            }
            Ok(None) => match self.cache.manifests().get(reference).await {
                Ok(found) => Ok(found),
                Err(error) => {
                    tracing::warn!(%error, "cache lookup failed");
                    Ok(None)
                }
            },
        }
    }

    #[tracing::instrument(skip(self), fields(name = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: usize) -> RegistryResult<Tags> {
        let origin = async {
            let manifests = self.origin.manifests();
            manifests.tags(from, limit).await.map(Tags::into_page)
        };
        let cache = async {
            let manifests = self.cache.manifests();
            manifests.tags(from, limit).await.map(Tags::into_page)
        };
        let page = joined(origin, cache, limit).await;
        Ok(Tags::new(self.name.clone(), page))
    }
}
