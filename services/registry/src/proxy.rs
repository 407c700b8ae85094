//! A remote registry, read over the HTTP API v2
//!
//! The proxy is read-only: it looks up manifests, blobs and listings on the
//! remote registry and rejects every write. It is meant as the origin of a
//! [`CacheRegistry`](crate::CacheRegistry).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::blob::{Blob, BlobSource, Layers};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::listing::{Catalog, Page, Tags};
use crate::manifest::{Manifest, Manifests};
use crate::reference::{ManifestRef, RepoName, Tag};
use crate::repo::{Registry, Repo};
use crate::upload::Upload;

/// Manifest types requested from the remote registry, image manifests first.
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, */*;q=0.1";

/// HTTP access to a remote registry.
#[derive(Debug, Clone)]
pub(crate) struct Remote {
    client: reqwest::Client,
    base: Url,
}

impl Remote {
    fn url(&self, path: &str) -> RegistryResult<Url> {
        Ok(self.base.join(path)?)
    }

    /// Send a request, treating 404 as absence.
    async fn send(
        &self,
        method: Method,
        url: Url,
        accept: Option<&str>,
    ) -> RegistryResult<Option<reqwest::Response>> {
        let mut request = self.client.request(method, url.clone());
        if let Some(accept) = accept {
            request = request.header(header::ACCEPT, accept);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => Err(RegistryError::RemoteStatus {
                status,
                url: url.to_string(),
            }),
        }
    }

    /// The body at `url`, if there is one.
    pub(crate) async fn bytes(&self, url: Url) -> RegistryResult<Option<Bytes>> {
        match self.send(Method::GET, url, None).await? {
            Some(response) => Ok(Some(response.bytes().await?)),
            None => Ok(None),
        }
    }

    /// Fetch one page of a listing at `path`.
    ///
    /// The remote is trusted for neither order nor page size, so the page is
    /// selected again locally. A `Link` header marks more entries.
    async fn page<T, B, F>(
        &self,
        path: &str,
        from: Option<&T>,
        limit: usize,
        entries: F,
    ) -> RegistryResult<Page<T>>
    where
        T: Ord + Clone + std::fmt::Display,
        B: for<'de> Deserialize<'de>,
        F: FnOnce(B) -> Vec<T>,
    {
        let mut url = self.url(path)?;
        {
            let mut query = url.query_pairs_mut();
            if limit != usize::MAX {
                query.append_pair("n", &limit.to_string());
            }
            if let Some(from) = from {
                query.append_pair("last", &from.to_string());
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let Some(response) = self.send(Method::GET, url, None).await? else {
            return Ok(Page::default());
        };
        let more = response
            .headers()
            .get_all(header::LINK)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("rel=\"next\""));
        let body = response.bytes().await?;
        let body: B = serde_json::from_slice(&body).map_err(|error| {
            RegistryError::Corrupt(format!("remote listing at {path}: {error}"))
        })?;

        let mut page = Page::select(entries(body), from, limit);
        if more && page.next.is_none() {
            page.next = page.items.last().cloned();
        }
        Ok(page)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogBody {
    #[serde(default)]
    repositories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TagsBody {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// A registry served by a remote host.
#[derive(Debug, Clone)]
pub struct ProxyRegistry {
    remote: Remote,
}

impl ProxyRegistry {
    /// A registry at `base`, e.g. `https://registry-1.docker.io/`.
    pub fn new(mut base: Url) -> RegistryResult<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!("registry/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            remote: Remote { client, base },
        })
    }

    /// The remote base URL.
    pub fn base(&self) -> &Url {
        &self.remote.base
    }
}

#[async_trait]
impl Registry for ProxyRegistry {
    fn repo(&self, name: &RepoName) -> Arc<dyn Repo> {
        Arc::new(ProxyRepo {
            name: name.clone(),
            remote: self.remote.clone(),
        })
    }

    #[tracing::instrument(skip(self), fields(remote = %self.remote.base))]
    async fn catalog(&self, from: Option<&RepoName>, limit: usize) -> RegistryResult<Catalog> {
        let page = self
            .remote
            .page("v2/_catalog", from, limit, |body: CatalogBody| {
                body.repositories
                    .into_iter()
                    .filter_map(|name| RepoName::new(name).ok())
                    .collect()
            })
            .await?;
        Ok(page.into())
    }
}

/// A repository of a [`ProxyRegistry`].
#[derive(Debug, Clone)]
pub struct ProxyRepo {
    name: RepoName,
    remote: Remote,
}

#[async_trait]
impl Repo for ProxyRepo {
    fn name(&self) -> &RepoName {
        &self.name
    }

    fn layers(&self) -> Arc<dyn Layers> {
        Arc::new(ProxyLayers {
            name: self.name.clone(),
            remote: self.remote.clone(),
        })
    }

    fn manifests(&self) -> Arc<dyn Manifests> {
        Arc::new(ProxyManifests {
            name: self.name.clone(),
            remote: self.remote.clone(),
        })
    }

    async fn start_upload(&self) -> RegistryResult<Upload> {
        Err(RegistryError::UnsupportedOperation("upload to a remote repository"))
    }

    async fn upload(&self, _uuid: &str) -> RegistryResult<Option<Upload>> {
        Err(RegistryError::UnsupportedOperation("upload to a remote repository"))
    }
}

/// Blobs of a [`ProxyRepo`].
#[derive(Debug, Clone)]
pub struct ProxyLayers {
    name: RepoName,
    remote: Remote,
}

fn content_length(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[async_trait]
impl Layers for ProxyLayers {
    async fn put(&self, _source: BlobSource) -> RegistryResult<Blob> {
        Err(RegistryError::UnsupportedOperation("push to a remote repository"))
    }

    #[tracing::instrument(skip(self), fields(name = %self.name, %digest))]
    async fn get(&self, digest: &Digest) -> RegistryResult<Option<Blob>> {
        let url = self
            .remote
            .url(&format!("v2/{}/blobs/{digest}", self.name))?;
        let Some(response) = self.remote.send(Method::HEAD, url.clone(), None).await? else {
            return Ok(None);
        };

        if let Some(size) = content_length(response.headers()) {
            return Ok(Some(Blob::remote(
                digest.clone(),
                size,
                self.remote.clone(),
                url,
            )));
        }

        tracing::debug!("remote did not report a size, fetching blob");
        Ok(self
            .remote
            .bytes(url)
            .await?
            .map(|content| Blob::loaded(digest.clone(), content)))
    }
}

/// Manifests of a [`ProxyRepo`].
#[derive(Debug, Clone)]
pub struct ProxyManifests {
    name: RepoName,
    remote: Remote,
}

#[async_trait]
impl Manifests for ProxyManifests {
    async fn put(&self, _reference: &ManifestRef, _content: Bytes) -> RegistryResult<Manifest> {
        Err(RegistryError::UnsupportedOperation("push to a remote repository"))
    }

    #[tracing::instrument(skip(self), fields(name = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        let url = self
            .remote
            .url(&format!("v2/{}/manifests/{reference}", self.name))?;
        let Some(response) = self
            .remote
            .send(Method::GET, url, Some(MANIFEST_ACCEPT))
            .await?
        else {
            return Ok(None);
        };

        let manifest = Manifest::parse(response.bytes().await?)?;
        if let Some(expected) = reference.digest() {
            if expected != manifest.digest() {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.clone(),
                    actual: manifest.digest().clone(),
                });
            }
        }
        Ok(Some(manifest))
    }

    #[tracing::instrument(skip(self), fields(name = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: usize) -> RegistryResult<Tags> {
        let path = format!("v2/{}/tags/list", self.name);
        let page = self
            .remote
            .page(&path, from, limit, |body: TagsBody| {
                body.tags
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|tag| Tag::new(tag).ok())
                    .collect()
            })
            .await?;
        Ok(Tags::new(self.name.clone(), page))
    }
}
