//! Image manifests and their storage

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8Path;
use serde::Deserialize;
use storage::StorageBucket;
use url::Url;

use crate::blob::{BlobSource, BlobStore, Layers};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::Layout;
use crate::listing::{Page, Tags};
use crate::reference::{ManifestRef, RepoName, Tag};

/// Media type accepting anything.
pub const ANY_MEDIA_TYPE: &str = "*/*";

/// A content unit referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Layer {
    digest: Digest,
    #[serde(default)]
    urls: Vec<Url>,
}

impl Layer {
    /// The layer digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Locations the layer may be fetched from instead of the registry.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    /// Whether the layer content lives outside the registry.
    pub fn is_foreign(&self) -> bool {
        !self.urls.is_empty()
    }
}

/// A parsed image manifest.
///
/// The raw bytes are the source of truth; the parsed fields are derived from
/// them and the digest is computed over them.
#[derive(Clone)]
pub struct Manifest {
    digest: Digest,
    content: Bytes,
    media_type: String,
    config: Digest,
    layers: Vec<Layer>,
}

impl fmt::Debug for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manifest")
            .field("digest", &self.digest)
            .field("media_type", &self.media_type)
            .field("size", &self.content.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    media_type: Option<String>,
    config: Option<RawConfig>,
    layers: Option<Vec<Layer>>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    digest: Option<Digest>,
}

fn required<T>(value: Option<T>, field: &str) -> RegistryResult<T> {
    value.ok_or_else(|| RegistryError::InvalidManifest(format!("Required field `{field}` is absent")))
}

impl Manifest {
    /// Parse manifest content.
    pub fn parse(content: Bytes) -> RegistryResult<Self> {
        let raw: RawManifest = serde_json::from_slice(&content)
            .map_err(|error| RegistryError::InvalidManifest(error.to_string()))?;

        let media_type = required(raw.media_type, "mediaType")?;
        let config = required(required(raw.config, "config")?.digest, "config.digest")?;
        let layers = required(raw.layers, "layers")?;

        Ok(Self {
            digest: Digest::sha256(&content),
            content,
            media_type,
            config,
            layers,
        })
    }

    /// Digest of the raw content.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// The raw content.
    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Size of the raw content in bytes.
    pub fn size(&self) -> usize {
        self.content.len()
    }

    /// The manifest's media type.
    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    /// Digest of the config blob.
    pub fn config(&self) -> &Digest {
        &self.config
    }

    /// Layers, in order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Blobs which must be present in the registry for this manifest.
    pub fn blobs(&self) -> impl Iterator<Item = &Digest> {
        std::iter::once(&self.config).chain(
            self.layers
                .iter()
                .filter(|layer| !layer.is_foreign())
                .map(Layer::digest),
        )
    }

    /// Convert to one of the accepted media types.
    ///
    /// No conversions are implemented: the manifest is returned as-is when
    /// its own type or `*/*` is accepted.
    pub fn convert<S: AsRef<str>>(self, accepted: &[S]) -> RegistryResult<Self> {
        let acceptable = accepted
            .iter()
            .map(AsRef::as_ref)
            .any(|media_type| media_type == ANY_MEDIA_TYPE || media_type == self.media_type);

        if acceptable {
            Ok(self)
        } else {
            Err(RegistryError::UnsupportedMediaType {
                media_type: self.media_type,
                accepted: accepted.iter().map(|s| s.as_ref().to_owned()).collect(),
            })
        }
    }
}

/// Manifest storage for a repository.
#[async_trait]
pub trait Manifests: fmt::Debug + Send + Sync {
    /// Store a manifest under `reference`.
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest>;

    /// Look up a manifest.
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>>;

    /// Up to `limit` tags after `from`, ascending.
    async fn tags(&self, from: Option<&Tag>, limit: usize) -> RegistryResult<Tags>;
}

/// Storage backed manifests of one repository.
///
/// Content is kept in the shared blob store. Link files map each reference
/// to the digest of its content.
#[derive(Debug, Clone)]
pub struct StorageManifests {
    name: RepoName,
    bucket: StorageBucket,
    layout: Layout,
    blobs: BlobStore,
}

impl StorageManifests {
    /// Manifests of repository `name`.
    pub fn new(name: RepoName, bucket: StorageBucket, layout: Layout, blobs: BlobStore) -> Self {
        Self {
            name,
            bucket,
            layout,
            blobs,
        }
    }

    async fn link(&self, reference: &ManifestRef, digest: &Digest) -> RegistryResult<()> {
        let key = self.layout.manifest(&self.name, reference);
        tracing::trace!(%key, %digest, "linking manifest");
        self.bucket.write(&key, digest.to_string().as_bytes()).await?;
        Ok(())
    }

    async fn resolve(&self, reference: &ManifestRef) -> RegistryResult<Option<Digest>> {
        let key = self.layout.manifest(&self.name, reference);
        let Some(link) = self.bucket.read_optional(&key).await? else {
            return Ok(None);
        };
        let link = String::from_utf8_lossy(&link);
        match link.trim().parse() {
            Ok(digest) => Ok(Some(digest)),
            Err(_) => {
                tracing::error!(%key, "manifest link is corrupt");
                Err(RegistryError::Corrupt(format!("manifest link {key}")))
            }
        }
    }
}

#[async_trait]
impl Manifests for StorageManifests {
    #[tracing::instrument(skip(self, content), fields(name = %self.name, %reference))]
    async fn put(&self, reference: &ManifestRef, content: Bytes) -> RegistryResult<Manifest> {
        let manifest = Manifest::parse(content)?;

        if let Some(expected) = reference.digest() {
            if expected != manifest.digest() {
                return Err(RegistryError::DigestMismatch {
                    expected: expected.clone(),
                    actual: manifest.digest().clone(),
                });
            }
        }

        for digest in manifest.blobs() {
            if self.blobs.get(digest).await?.is_none() {
                return Err(RegistryError::InvalidManifest(format!(
                    "Blob does not exist: {digest}"
                )));
            }
        }

        self.blobs
            .put(BlobSource::trusted(manifest.content().clone()))
            .await?;

        let digest = manifest.digest().clone();
        self.link(&ManifestRef::Digest(digest.clone()), &digest)
            .await?;
        if let ManifestRef::Tag(_) = reference {
            self.link(reference, &digest).await?;
        }

        tracing::debug!(%digest, "stored manifest");
        Ok(manifest)
    }

    #[tracing::instrument(skip(self), fields(name = %self.name, %reference))]
    async fn get(&self, reference: &ManifestRef) -> RegistryResult<Option<Manifest>> {
        let Some(digest) = self.resolve(reference).await? else {
            return Ok(None);
        };

        let Some(blob) = self.blobs.get(&digest).await? else {
            tracing::warn!(%digest, "manifest link points at a missing blob");
            return Ok(None);
        };

        Manifest::parse(blob.content().await?).map(Some)
    }

    #[tracing::instrument(skip(self), fields(name = %self.name))]
    async fn tags(&self, from: Option<&Tag>, limit: usize) -> RegistryResult<Tags> {
        let root = self.layout.tags(&self.name);
        let keys = self.bucket.list(Some(root.as_path())).await?;

        let tags = keys
            .iter()
            .filter_map(|key| self.layout.tag_of(&self.name, Utf8Path::new(key)))
            .filter_map(|tag| Tag::new(tag).ok());

        Ok(Tags::new(self.name.clone(), Page::select(tags, from, limit)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use storage::{MemoryStorage, Storage};

    static_assertions::assert_obj_safe!(Manifests);

    /// Manifest content referencing `config` and no layers.
    pub(crate) fn manifest_json(config: &Digest) -> Bytes {
        Bytes::from(format!(
            r#"{{"config":{{"digest":"{config}"}},"layers":[],"mediaType":"my-type"}}"#
        ))
    }

    fn store() -> (BlobStore, StorageManifests) {
        let storage: Storage = MemoryStorage::with_buckets(&["test"]).into();
        let bucket = storage.bucket("test");
        let blobs = BlobStore::new(bucket.clone(), Layout::default());
        let manifests = StorageManifests::new(
            RepoName::new("my-alpine").unwrap(),
            bucket,
            Layout::default(),
            blobs.clone(),
        );
        (blobs, manifests)
    }

    #[test]
    fn missing_fields_are_named() {
        for (content, field) in [
            (r#"{"config":{"digest":"x"}}"#, ""),
            (r#"{"layers":[],"config":{}}"#, "mediaType"),
            (r#"{"mediaType":"t","layers":[]}"#, "config"),
            (r#"{"mediaType":"t","config":{},"layers":[]}"#, "config.digest"),
            (
                r#"{"mediaType":"t","config":{"digest":"sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"}}"#,
                "layers",
            ),
        ] {
            let error = Manifest::parse(Bytes::from(content)).unwrap_err();
            let RegistryError::InvalidManifest(message) = error else {
                panic!("unexpected error for {content}");
            };
            assert!(message.contains(field), "{message} should name {field}");
        }
    }

    #[test]
    fn foreign_layers_are_not_required() {
        let config = Digest::sha256(b"config");
        let local = Digest::sha256(b"local");
        let foreign = Digest::sha256(b"foreign");
        let content = format!(
            r#"{{"mediaType":"t","config":{{"digest":"{config}"}},"layers":[
                {{"digest":"{local}"}},
                {{"digest":"{foreign}","urls":["https://example.com/layer"]}}
            ]}}"#
        );
        let manifest = Manifest::parse(Bytes::from(content)).unwrap();
        assert_eq!(manifest.layers().len(), 2);
        assert_eq!(manifest.blobs().collect::<Vec<_>>(), [&config, &local]);
    }

    #[test]
    fn convert_accepts_own_type_or_any() {
        let manifest = Manifest::parse(manifest_json(&Digest::sha256(b""))).unwrap();
        assert!(manifest.clone().convert(&["*/*"]).is_ok());
        assert!(manifest.clone().convert(&["other", "my-type"]).is_ok());
        assert!(matches!(
            manifest.convert(&["other"]),
            Err(RegistryError::UnsupportedMediaType { .. })
        ));
    }

    #[tokio::test]
    async fn put_then_get_by_tag_and_digest() {
        let (blobs, manifests) = store();
        let config = blobs
            .put(BlobSource::trusted(&b"config"[..]))
            .await
            .unwrap();
        let content = manifest_json(config.digest());

        let tag: ManifestRef = "1".parse().unwrap();
        let manifest = manifests.put(&tag, content.clone()).await.unwrap();
        assert_eq!(manifest.digest(), &Digest::sha256(&content));

        let by_tag = manifests.get(&tag).await.unwrap().unwrap();
        assert_eq!(by_tag.content(), &content);

        let by_digest = manifests
            .get(&ManifestRef::Digest(manifest.digest().clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_digest.content(), &content);
        assert_eq!(by_digest.media_type(), "my-type");
    }

    #[tokio::test]
    async fn missing_blob_is_invalid() {
        let (_, manifests) = store();
        let content = manifest_json(&Digest::sha256(b"absent"));
        let error = manifests
            .put(&"1".parse().unwrap(), content)
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::InvalidManifest(_)));
    }

    #[tokio::test]
    async fn digest_reference_must_match() {
        let (blobs, manifests) = store();
        let config = blobs.put(BlobSource::trusted(&b"c"[..])).await.unwrap();
        let reference = ManifestRef::Digest(Digest::sha256(b"something else"));
        let error = manifests
            .put(&reference, manifest_json(config.digest()))
            .await
            .unwrap_err();
        assert!(matches!(error, RegistryError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn unknown_reference_is_absent() {
        let (_, manifests) = store();
        assert!(manifests.get(&"nope".parse().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_link_is_a_server_error() {
        let storage: Storage = MemoryStorage::with_buckets(&["test"]).into();
        let bucket = storage.bucket("test");
        let name = RepoName::new("my-alpine").unwrap();
        let layout = Layout::default();
        let blobs = BlobStore::new(bucket.clone(), layout.clone());
        let manifests = StorageManifests::new(name.clone(), bucket.clone(), layout.clone(), blobs);

        let tag: ManifestRef = "broken".parse().unwrap();
        bucket
            .write(&layout.manifest(&name, &tag), b"not a digest")
            .await
            .unwrap();

        let error = manifests.get(&tag).await.unwrap_err();
        assert!(matches!(error, RegistryError::Corrupt(_)));
        assert_eq!(error.status_code(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn tags_are_paged() {
        let (blobs, manifests) = store();
        let config = blobs.put(BlobSource::trusted(&b"c"[..])).await.unwrap();
        for tag in ["v3", "v1", "latest", "v2"] {
            manifests
                .put(&tag.parse().unwrap(), manifest_json(config.digest()))
                .await
                .unwrap();
        }

        let first = manifests.tags(None, 2).await.unwrap();
        let names: Vec<&str> = first.tags().iter().map(Tag::as_str).collect();
        assert_eq!(names, ["latest", "v1"]);

        let rest = manifests.tags(first.next(), 10).await.unwrap();
        let names: Vec<&str> = rest.tags().iter().map(Tag::as_str).collect();
        assert_eq!(names, ["v2", "v3"]);
        assert!(rest.next().is_none());
    }
}
