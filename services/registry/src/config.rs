//! Server configuration

use std::net::SocketAddr;

use std::sync::Arc;

use serde::Deserialize;
use storage::{StorageConfig, StorageError};
use url::Url;

use crate::api::RegistryBuilder;
use crate::error::RegistryError;
use crate::proxy::ProxyRegistry;

/// Errors preparing a registry from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A storage backend could not be set up
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The remote registry client could not be set up
    #[error(transparent)]
    Remote(#[from] RegistryError),

    /// Both a remote and a `cache` section are configured
    #[error("a remote registry is cached in `storage`; remove the `cache` section")]
    CacheWithRemote,
}

/// A remote registry to serve through a local cache.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the remote registry.
    pub url: Url,
}

/// Cache in front of the configured storage.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Where cached objects are kept.
    pub storage: StorageConfig,
    /// Bucket for cached objects.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

/// Registry server configuration.
///
/// ```toml
/// listen = "0.0.0.0:5000"
/// bucket = "registry"
///
/// [storage]
/// local = { path = "/var/lib/registry" }
///
/// [cache]
/// bucket = "cache"
/// storage = { memory = { bucket = "cache" } }
/// ```
///
/// With a `[remote]` section the registry is a read-only mirror: reads go to
/// the remote and are cached in `storage`.
///
/// ```toml
/// [remote]
/// url = "https://registry-1.docker.io/"
///
/// [storage]
/// memory = { bucket = "registry" }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Address to serve on.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Bucket holding the registry.
    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Storage backend.
    pub storage: StorageConfig,

    /// Optional cache.
    #[serde(default)]
    pub cache: Option<CacheConfig>,

    /// Optional remote origin, cached in `storage`.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_bucket() -> String {
    "registry".into()
}

impl RegistryConfig {
    /// Connect to the configured storage and prepare a builder.
    pub async fn builder(self) -> Result<RegistryBuilder, ConfigError> {
        let storage = self.storage.build().await?;

        if let Some(remote) = self.remote {
            if self.cache.is_some() {
                return Err(ConfigError::CacheWithRemote);
            }
            tracing::info!(url = %remote.url, "mirroring remote registry");
            let origin = ProxyRegistry::new(remote.url)?;
            return Ok(RegistryBuilder::new()
                .registry(Arc::new(origin))
                .cache(&storage, self.bucket));
        }

        let mut builder = RegistryBuilder::new().storage(storage).bucket(self.bucket);
        if let Some(cache) = self.cache {
            let storage = cache.storage.build().await?;
            builder = builder.cache(&storage, cache.bucket);
        }
        Ok(builder)
    }
}
