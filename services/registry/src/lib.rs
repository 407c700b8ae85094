//! # Container Registry
//!
//! A content addressed registry for blobs and image manifests, served over
//! the [Docker Registry HTTP API v2](https://distribution.github.io/distribution/spec/api/).
//!
//! ## Features
//!
//! - Blob storage with digest verification
//! - Chunked, resumable blob uploads
//! - Manifest storage by tag or digest, with paginated tag listings
//! - A cache-aside composition which reads from an origin registry and
//!   replicates hits into a cache in the background
//! - A read-only proxy of a remote registry, usable as the cache origin
//! - Pluggable storage backend via the `storage` crate
//! - Builder pattern for configuration
//!
//! ## Example
//!
//! ```no_run
//! use registry::RegistryBuilder;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = MemoryStorage::with_buckets(&["registry"]);
//! let registry = RegistryBuilder::new()
//!     .storage(storage.into())
//!     .bucket("registry")
//!     .build()?;
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod blob;
mod cache;
mod config;
mod digest;
mod error;
mod http;
mod layout;
mod listing;
mod manifest;
mod proxy;
mod reference;
mod repo;
mod upload;

pub use api::{MissingBackend, RegistryBuilder};
pub use blob::{Blob, BlobSource, BlobStore, Layers};
pub use cache::{CacheLayers, CacheManifests, CacheRegistry, CacheRepo};
pub use config::{CacheConfig, ConfigError, RegistryConfig, RemoteConfig};
pub use digest::{Algorithm, Digest, Digester};
pub use error::{ErrorResponse, RegistryError, RegistryResult};
pub use layout::Layout;
pub use listing::{Catalog, Page, Tags};
pub use manifest::{ANY_MEDIA_TYPE, Layer, Manifest, Manifests, StorageManifests};
pub use proxy::{ProxyLayers, ProxyManifests, ProxyRegistry, ProxyRepo};
pub use reference::{ManifestRef, RepoName, Tag};
pub use repo::{Registry, Repo, StorageRegistry, StorageRepo};
pub use upload::{Upload, UploadState};
