//! Repository names, tags and manifest references

use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::digest::Digest;
use crate::error::RegistryError;

const TAG_MAX_LEN: usize = 128;
const NAME_MAX_LEN: usize = 255;

/// A validated tag, `[A-Za-z0-9_][A-Za-z0-9._-]{0,127}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Validate a tag.
    pub fn new(value: impl Into<String>) -> Result<Self, RegistryError> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(RegistryError::InvalidTag(value))
        }
    }

    /// Whether `value` is a valid tag.
    pub fn is_valid(value: &str) -> bool {
        let mut bytes = value.bytes();
        let Some(first) = bytes.next() else {
            return false;
        };
        value.len() <= TAG_MAX_LEN
            && (first.is_ascii_alphanumeric() || first == b'_')
            && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'))
    }

    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated repository name.
///
/// One or more `/` separated components, each matching
/// `[a-z0-9]+([._-][a-z0-9]+)*`, at most 255 characters in total.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RepoName(String);

impl RepoName {
    /// Validate a repository name.
    pub fn new(value: impl Into<String>) -> Result<Self, RegistryError> {
        let value = value.into();
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(RegistryError::InvalidRepoName(value))
        }
    }

    /// Whether `value` is a valid repository name.
    pub fn is_valid(value: &str) -> bool {
        !value.is_empty() && value.len() <= NAME_MAX_LEN && value.split('/').all(valid_component)
    }

    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) if alnum(first) && alnum(last) => {}
        _ => return false,
    }
    // Separators may not repeat, and must sit between alphanumerics.
    bytes.windows(2).all(|pair| alnum(&pair[0]) || alnum(&pair[1]))
        && bytes
            .iter()
            .all(|b| alnum(b) || matches!(b, b'.' | b'_' | b'-'))
}

impl FromStr for RepoName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to a manifest, either by tag or by digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestRef {
    /// A mutable tag.
    Tag(Tag),
    /// An immutable digest.
    Digest(Digest),
}

impl ManifestRef {
    /// The storage key of this reference's link, relative to the
    /// repository's manifests directory.
    ///
    /// Callers should treat the key as opaque.
    pub fn link(&self) -> Utf8PathBuf {
        match self {
            ManifestRef::Tag(tag) => Utf8PathBuf::from(format!("tags/{tag}/current/link")),
            ManifestRef::Digest(digest) => Utf8PathBuf::from(format!(
                "revisions/{}/{}/link",
                digest.algorithm(),
                digest.hex()
            )),
        }
    }

    /// The tag, if this references a tag.
    pub fn tag(&self) -> Option<&Tag> {
        match self {
            ManifestRef::Tag(tag) => Some(tag),
            ManifestRef::Digest(_) => None,
        }
    }

    /// The digest, if this references a digest.
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            ManifestRef::Tag(_) => None,
            ManifestRef::Digest(digest) => Some(digest),
        }
    }
}

impl FromStr for ManifestRef {
    type Err = RegistryError;

    /// Digests take precedence over tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(digest) = s.parse::<Digest>() {
            Ok(ManifestRef::Digest(digest))
        } else if Tag::is_valid(s) {
            Ok(ManifestRef::Tag(Tag(s.to_owned())))
        } else {
            Err(RegistryError::UnsupportedReference(s.to_owned()))
        }
    }
}

impl From<Tag> for ManifestRef {
    fn from(tag: Tag) -> Self {
        ManifestRef::Tag(tag)
    }
}

impl From<Digest> for ManifestRef {
    fn from(digest: Digest) -> Self {
        ManifestRef::Digest(digest)
    }
}

impl fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestRef::Tag(tag) => tag.fmt(f),
            ManifestRef::Digest(digest) => digest.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_string_resolves_via_digest_path() {
        let hex = "a".repeat(64);
        let reference: ManifestRef = format!("sha256:{hex}").parse().unwrap();
        assert!(reference.digest().is_some());
        assert_eq!(
            reference.link().as_str(),
            format!("revisions/sha256/{hex}/link")
        );
    }

    #[test]
    fn tag_string_resolves_via_tag_path() {
        let reference: ManifestRef = "latest".parse().unwrap();
        assert_eq!(reference.tag().map(Tag::as_str), Some("latest"));
        assert_eq!(reference.link().as_str(), "tags/latest/current/link");
    }

    #[test]
    fn neither_is_unsupported() {
        let long = "t".repeat(129);
        for value in ["", ".hidden", "sha256:xyz/../x", long.as_str()] {
            assert!(
                matches!(
                    value.parse::<ManifestRef>(),
                    Err(RegistryError::UnsupportedReference(_))
                ),
                "{value:?}"
            );
        }
    }

    #[test]
    fn short_digest_falls_back_to_invalid() {
        // "sha256:abc" is neither a full digest nor a valid tag (':' not allowed).
        assert!("sha256:abc".parse::<ManifestRef>().is_err());
    }

    #[test]
    fn tags() {
        assert!(Tag::is_valid("v1.0"));
        assert!(Tag::is_valid("_under"));
        assert!(Tag::is_valid("1"));
        assert!(!Tag::is_valid("-dash"));
        assert!(!Tag::is_valid("with space"));
        assert!(Tag::new("a".repeat(128)).is_ok());
    }

    #[test]
    fn repo_names() {
        for valid in ["alpine", "library/alpine", "my-repo", "a.b_c", "x/y/z"] {
            assert!(RepoName::is_valid(valid), "{valid}");
        }
        for invalid in ["", "Alpine", "/alpine", "alpine/", "a//b", "a-", "-a", "a.-b", ".."] {
            assert!(!RepoName::is_valid(invalid), "{invalid}");
        }
    }
}
