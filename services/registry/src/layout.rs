//! Storage key layout
//!
//! ```text
//! docker/registry/v2
//! ├── blobs
//! │   └── <algorithm>/<first two hex chars>/<hex>/data
//! └── repositories
//!     └── <name>
//!         ├── _manifests
//!         │   ├── tags/<tag>/current/link
//!         │   └── revisions/<algorithm>/<hex>/link
//!         └── _uploads
//!             └── <uuid>
//!                 ├── started
//!                 └── chunks/<offset>
//! ```
//!
//! Link files contain the digest string of the manifest they point to.

use camino::{Utf8Path, Utf8PathBuf};

use crate::digest::Digest;
use crate::reference::{ManifestRef, RepoName};

const ROOT: &str = "docker/registry/v2";

/// Maps registry objects to storage keys.
#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from(ROOT),
        }
    }
}

impl Layout {
    /// A layout rooted somewhere other than the default.
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Key of a blob's content.
    pub fn blob(&self, digest: &Digest) -> Utf8PathBuf {
        let hex = digest.hex();
        self.root.join(format!(
            "blobs/{}/{}/{}/data",
            digest.algorithm(),
            &hex[..2],
            hex
        ))
    }

    /// Root of all repositories, enumerated for the catalog.
    pub fn repositories(&self) -> Utf8PathBuf {
        self.root.join("repositories")
    }

    /// Root of one repository's manifest links.
    pub fn manifests(&self, name: &RepoName) -> Utf8PathBuf {
        self.repositories().join(name.as_str()).join("_manifests")
    }

    /// Key of a manifest link.
    pub fn manifest(&self, name: &RepoName, reference: &ManifestRef) -> Utf8PathBuf {
        self.manifests(name).join(reference.link())
    }

    /// Root of one repository's tags.
    pub fn tags(&self, name: &RepoName) -> Utf8PathBuf {
        self.manifests(name).join("tags")
    }

    /// Root of an upload's storage area.
    pub fn upload(&self, name: &RepoName, uuid: &str) -> Utf8PathBuf {
        self.repositories()
            .join(name.as_str())
            .join("_uploads")
            .join(uuid)
    }

    /// Marker written when an upload starts.
    pub fn upload_started(&self, name: &RepoName, uuid: &str) -> Utf8PathBuf {
        self.upload(name, uuid).join("started")
    }

    /// Directory holding an upload's chunks.
    pub fn upload_chunks(&self, name: &RepoName, uuid: &str) -> Utf8PathBuf {
        self.upload(name, uuid).join("chunks")
    }

    /// Key of the chunk starting at `offset`.
    ///
    /// Offsets are zero padded so keys sort in offset order.
    pub fn upload_chunk(&self, name: &RepoName, uuid: &str, offset: u64) -> Utf8PathBuf {
        self.upload_chunks(name, uuid).join(format!("{offset:020}"))
    }

    /// Repository name for a key below [`Layout::repositories`].
    ///
    /// The name is every component up to the first one starting with `_`.
    pub fn repository_of(&self, key: &Utf8Path) -> Option<RepoName> {
        let relative = key.strip_prefix(self.repositories()).ok()?;
        let components: Vec<&str> = relative
            .components()
            .map(|c| c.as_str())
            .take_while(|c| !c.starts_with('_'))
            .collect();
        if components.is_empty() {
            return None;
        }
        RepoName::new(components.join("/")).ok()
    }

    /// Tag name for a key below [`Layout::tags`].
    pub fn tag_of(&self, name: &RepoName, key: &Utf8Path) -> Option<String> {
        let relative = key.strip_prefix(self.tags(name)).ok()?;
        let mut components = relative.components();
        let tag = components.next()?.as_str();
        (components.as_path() == Utf8Path::new("current/link")).then(|| tag.to_owned())
    }
}
