//! Manifest and tag endpoints

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use bytes::Bytes;

use super::{AppState, DOCKER_CONTENT_DIGEST, ListQuery, with_next_link};
use crate::error::{RegistryError, RegistryResult};
use crate::manifest::{ANY_MEDIA_TYPE, Manifest};
use crate::reference::{ManifestRef, RepoName, Tag};

/// Router for manifest operations
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v2/{name}/manifests/{reference}",
            get(get_manifest)
                .head(head_manifest)
                .put(put_manifest)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/v2/{name}/tags/list", get(list_tags))
}

/// Media types listed in `Accept` headers, without parameters.
///
/// No header accepts anything.
fn accepted(headers: &HeaderMap) -> Vec<String> {
    let types: Vec<String> = headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|item| item.split_once(';').map_or(item, |(media_type, _)| media_type))
        .map(str::trim)
        .filter(|media_type| !media_type.is_empty())
        .map(str::to_owned)
        .collect();

    if types.is_empty() {
        vec![ANY_MEDIA_TYPE.to_owned()]
    } else {
        types
    }
}

async fn find_manifest(
    registry: &AppState,
    name: &str,
    reference: &str,
    headers: &HeaderMap,
) -> RegistryResult<Manifest> {
    let name = RepoName::new(name)?;
    let reference: ManifestRef = reference.parse()?;

    let manifest = registry
        .repo(&name)
        .manifests()
        .get(&reference)
        .await?
        .ok_or_else(|| RegistryError::ManifestUnknown(reference.to_string()))?;

    manifest.convert(&accepted(headers))
}

fn manifest_headers(manifest: &Manifest) -> [(header::HeaderName, String); 3] {
    [
        (header::CONTENT_TYPE, manifest.media_type().to_owned()),
        (DOCKER_CONTENT_DIGEST, manifest.digest().to_string()),
        (header::CONTENT_LENGTH, manifest.size().to_string()),
    ]
}

/// Get a manifest
async fn get_manifest(
    State(registry): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let manifest = find_manifest(&registry, &name, &reference, &headers).await?;

    Ok((
        StatusCode::OK,
        manifest_headers(&manifest),
        manifest.content().clone(),
    )
        .into_response())
}

/// Check if a manifest exists
async fn head_manifest(
    State(registry): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
    headers: HeaderMap,
) -> RegistryResult<Response> {
    let manifest = find_manifest(&registry, &name, &reference, &headers).await?;

    Ok((StatusCode::OK, manifest_headers(&manifest)).into_response())
}

/// Put a manifest
async fn put_manifest(
    State(registry): State<AppState>,
    Path((name, reference)): Path<(String, String)>,
    body: Bytes,
) -> RegistryResult<Response> {
    let repo = RepoName::new(name)?;
    let reference: ManifestRef = reference.parse()?;

    let manifest = registry.repo(&repo).manifests().put(&reference, body).await?;

    let location = format!("/v2/{repo}/manifests/{reference}");

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, location),
            (header::CONTENT_LENGTH, "0".to_string()),
            (DOCKER_CONTENT_DIGEST, manifest.digest().to_string()),
        ],
    )
        .into_response())
}

/// List tags for a repository
async fn list_tags(
    State(registry): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ListQuery>,
) -> RegistryResult<Response> {
    let name = RepoName::new(name)?;
    let last = query.last().map(Tag::new).transpose()?;
    let limit = query.limit();

    let tags = registry
        .repo(&name)
        .manifests()
        .tags(last.as_ref(), limit)
        .await?;

    let next = tags.next().map(|tag| tag.to_string());
    Ok(with_next_link(
        Json(tags),
        &format!("/v2/{name}/tags/list"),
        limit,
        next.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn accept_without_header_is_anything() {
        assert_eq!(accepted(&HeaderMap::new()), ["*/*"]);
    }

    #[test]
    fn accept_drops_parameters() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::ACCEPT,
            HeaderValue::from_static(
                "application/vnd.oci.image.manifest.v1+json;q=0.5, application/json",
            ),
        );
        headers.append(
            header::ACCEPT,
            HeaderValue::from_static("application/vnd.docker.distribution.manifest.v2+json"),
        );
        assert_eq!(
            accepted(&headers),
            [
                "application/vnd.oci.image.manifest.v1+json",
                "application/json",
                "application/vnd.docker.distribution.manifest.v2+json",
            ]
        );
    }
}
