use std::sync::Arc;

use async_trait::async_trait;

use crate::blob::{Blob, BlobSource, Layers};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};

/// Blobs of a cached repository.
#[derive(Debug, Clone)]
pub struct CacheLayers {
    origin: Arc<dyn Layers>,
    cache: Arc<dyn Layers>,
}

impl CacheLayers {
    /// Blobs read from `origin` and copied into `cache`.
    pub fn new(origin: Arc<dyn Layers>, cache: Arc<dyn Layers>) -> Self {
        Self { origin, cache }
    }
}

#[async_trait]
impl Layers for CacheLayers {
    async fn put(&self, _source: BlobSource) -> RegistryResult<Blob> {
        Err(RegistryError::UnsupportedOperation("push to a cached repository"))
    }

    #[tracing::instrument(skip(self), fields(%digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        match self.origin.get(digest).await {
            Err(error) => {
                tracing::warn!(%error, "origin failed, reading blob from cache");
                self.cache.get(digest).await
            }
            Ok(Some(blob)) => {
                let cache = self.cache.clone();
                let copied = blob.clone();
                super::replicate("blob", async move {
                    let content = copied.content().await?;
                    cache
                        .put(BlobSource::checked(content, copied.digest().clone()))
                        .await?;
                    Ok(())
                });
                Ok(Some(blob))
            }
            Ok(None) => match self.cache.get(digest).await {
                Ok(found) => Ok(found),
                Err(error) => {
                    tracing::warn!(%error, "cache lookup failed");
                    Ok(None)
                }
            },
        }
    }
}
