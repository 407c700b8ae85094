//! Blob endpoints

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use super::{AppState, DOCKER_CONTENT_DIGEST};
use crate::blob::Blob;
use crate::digest::Digest;
use crate::error::{ErrorResponse, RegistryError, RegistryResult};
use crate::reference::RepoName;

/// Router for blob operations
pub(super) fn router() -> Router<AppState> {
    Router::new().route("/v2/{name}/blobs/{digest}", get(get_blob).head(head_blob))
}

/// A malformed digest is reported as an unknown blob.
async fn find_blob(
    registry: &AppState,
    name: String,
    digest: &str,
) -> RegistryResult<Result<Blob, ErrorResponse>> {
    let name = RepoName::new(name)?;
    let Ok(digest) = digest.parse::<Digest>() else {
        return Ok(Err(
            ErrorResponse::BLOB_UNKNOWN.with_detail(format!("invalid digest: {digest}"))
        ));
    };

    registry
        .repo(&name)
        .layers()
        .get(&digest)
        .await?
        .map(Ok)
        .ok_or(RegistryError::BlobUnknown(digest))
}

fn blob_headers(blob: &Blob) -> [(header::HeaderName, String); 3] {
    [
        (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
        (DOCKER_CONTENT_DIGEST, blob.digest().to_string()),
        (header::CONTENT_LENGTH, blob.size().to_string()),
    ]
}

/// Get a blob
async fn get_blob(
    State(registry): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let blob = match find_blob(&registry, name, &digest).await? {
        Ok(blob) => blob,
        Err(response) => return Ok(response.into_response()),
    };
    let content = blob.content().await?;

    Ok((StatusCode::OK, blob_headers(&blob), content).into_response())
}

/// Check if a blob exists
async fn head_blob(
    State(registry): State<AppState>,
    Path((name, digest)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let blob = match find_blob(&registry, name, &digest).await? {
        Ok(blob) => blob,
        Err(response) => return Ok(response.into_response()),
    };

    Ok((StatusCode::OK, blob_headers(&blob)).into_response())
}
