//! Blob upload endpoints

use axum::Router;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use serde::Deserialize;

use super::{AppState, DOCKER_CONTENT_DIGEST, DOCKER_UPLOAD_UUID, range};
use crate::digest::Digest;
use crate::error::{RegistryError, RegistryResult};
use crate::reference::RepoName;
use crate::repo::Repo;
use crate::upload::Upload;

/// Router for upload sessions
///
/// Chunks are as large as the layers being pushed, so request bodies are not
/// limited.
pub(super) fn router() -> Router<AppState> {
    Router::new()
        .route("/v2/{name}/blobs/uploads/", post(start_upload))
        .route(
            "/v2/{name}/blobs/uploads/{uuid}",
            get(upload_status)
                .patch(append_chunk)
                .put(complete_upload)
                .delete(cancel_upload),
        )
        .layer(DefaultBodyLimit::disable())
}

#[derive(Debug, Deserialize)]
struct CompleteQuery {
    digest: Option<String>,
}

fn location(name: &RepoName, uuid: &str) -> String {
    format!("/v2/{name}/blobs/uploads/{uuid}")
}

/// Response describing an upload in progress.
fn progress(status: StatusCode, name: &RepoName, upload: &Upload, offset: u64) -> Response {
    (
        status,
        [
            (header::LOCATION, location(name, upload.uuid())),
            (header::RANGE, range(offset)),
            (DOCKER_UPLOAD_UUID, upload.uuid().to_owned()),
            (header::CONTENT_LENGTH, "0".to_owned()),
        ],
    )
        .into_response()
}

async fn find_upload(
    registry: &AppState,
    name: String,
    uuid: &str,
) -> RegistryResult<(RepoName, std::sync::Arc<dyn Repo>, Upload)> {
    let name = RepoName::new(name)?;
    let repo = registry.repo(&name);
    let upload = repo
        .upload(uuid)
        .await?
        .ok_or_else(|| RegistryError::UploadNotFound(uuid.to_owned()))?;
    Ok((name, repo, upload))
}

/// Start a blob upload session
async fn start_upload(
    State(registry): State<AppState>,
    Path(name): Path<String>,
) -> RegistryResult<Response> {
    let name = RepoName::new(name)?;
    let upload = registry.repo(&name).start_upload().await?;
    Ok(progress(StatusCode::ACCEPTED, &name, &upload, 0))
}

/// Append a chunk to an upload
async fn append_chunk(
    State(registry): State<AppState>,
    Path((name, uuid)): Path<(String, String)>,
    body: Bytes,
) -> RegistryResult<Response> {
    let (name, _, upload) = find_upload(&registry, name, &uuid).await?;
    let offset = upload.append(body).await?;
    Ok(progress(StatusCode::NO_CONTENT, &name, &upload, offset))
}

/// Report the progress of an upload
async fn upload_status(
    State(registry): State<AppState>,
    Path((name, uuid)): Path<(String, String)>,
) -> RegistryResult<Response> {
    let (name, _, upload) = find_upload(&registry, name, &uuid).await?;
    let offset = upload.offset().await?;
    Ok(progress(StatusCode::NO_CONTENT, &name, &upload, offset))
}

/// Complete a blob upload, with an optional final chunk
async fn complete_upload(
    State(registry): State<AppState>,
    Path((name, uuid)): Path<(String, String)>,
    Query(query): Query<CompleteQuery>,
    body: Bytes,
) -> RegistryResult<Response> {
    let digest: Digest = query
        .digest
        .ok_or_else(|| RegistryError::BlobUploadInvalid("missing digest".to_string()))?
        .parse()?;

    let (name, repo, upload) = find_upload(&registry, name, &uuid).await?;
    let layers = repo.layers();
    let blob = upload
        .put_with_last(layers.as_ref(), &digest, body)
        .await?;

    Ok((
        StatusCode::CREATED,
        [
            (header::LOCATION, format!("/v2/{name}/blobs/{}", blob.digest())),
            (header::CONTENT_LENGTH, "0".to_string()),
            (DOCKER_CONTENT_DIGEST, blob.digest().to_string()),
        ],
    )
        .into_response())
}

/// Cancel a blob upload
async fn cancel_upload(
    State(registry): State<AppState>,
    Path((name, uuid)): Path<(String, String)>,
) -> RegistryResult<StatusCode> {
    let (_, _, upload) = find_upload(&registry, name, &uuid).await?;
    upload.delete().await?;
    Ok(StatusCode::NO_CONTENT)
}
