//! API server builder and router

use std::sync::Arc;

use axum::Router;

use crate::cache::CacheRegistry;
use crate::repo::{Registry, StorageRegistry};

const DEFAULT_BUCKET: &str = "registry";

/// Registry builder for configuring and creating the registry service
///
/// The registry is either given directly with [`RegistryBuilder::registry`],
/// or assembled from a storage backend and bucket. Adding a cache fronts it
/// with a [`CacheRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Option<Arc<dyn Registry>>,
    storage: Option<storage::Storage>,
    bucket: Option<String>,
    cache: Option<Arc<dyn Registry>>,
}

/// The builder has neither a registry nor a storage backend.
#[derive(Debug, thiserror::Error)]
#[error("registry builder needs a registry or a storage backend")]
pub struct MissingBackend;

impl RegistryBuilder {
    /// Create a new registry builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve an existing registry, instead of one built from storage
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the bucket name for storage
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    /// Front the registry with a cache kept in `bucket` of `storage`
    pub fn cache(mut self, storage: &storage::Storage, bucket: impl Into<String>) -> Self {
        self.cache = Some(Arc::new(StorageRegistry::new(storage, bucket)));
        self
    }

    /// Assemble the configured registry
    pub fn into_registry(self) -> Result<Arc<dyn Registry>, MissingBackend> {
        let origin: Arc<dyn Registry> = match (self.registry, self.storage) {
            (Some(registry), _) => registry,
            (None, Some(storage)) => {
                let bucket = self.bucket.as_deref().unwrap_or(DEFAULT_BUCKET);
                Arc::new(StorageRegistry::new(&storage, bucket))
            }
            (None, None) => return Err(MissingBackend),
        };

        Ok(match self.cache {
            Some(cache) => Arc::new(CacheRegistry::new(origin, cache)),
            None => origin,
        })
    }

    /// Build the registry service
    ///
    /// Returns a Router that can be served with any tower-compatible server
    pub fn build(self) -> Result<Router, MissingBackend> {
        Ok(crate::http::router(self.into_registry()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let storage = storage::MemoryStorage::with_buckets(&["test"]);
        let _registry = RegistryBuilder::new()
            .storage(storage.into())
            .bucket("test")
            .build()
            .unwrap();
    }

    #[test]
    fn builder_needs_a_backend() {
        assert!(RegistryBuilder::new().build().is_err());
    }

    #[test]
    fn cache_wraps_origin() {
        let storage: storage::Storage = storage::MemoryStorage::new().into();
        let registry = RegistryBuilder::new()
            .storage(storage.clone())
            .cache(&storage, "cache")
            .into_registry()
            .unwrap();
        assert!(format!("{registry:?}").starts_with("CacheRegistry"));
    }
}
