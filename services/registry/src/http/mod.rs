//! Docker Registry HTTP API v2 endpoints

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::RegistryResult;
use crate::reference::RepoName;
use crate::repo::Registry;

mod blobs;
mod manifests;
mod uploads;

/// Shared state of every handler.
pub(crate) type AppState = Arc<dyn Registry>;

pub(crate) const DOCKER_CONTENT_DIGEST: HeaderName =
    HeaderName::from_static("docker-content-digest");
pub(crate) const DOCKER_UPLOAD_UUID: HeaderName = HeaderName::from_static("docker-upload-uuid");

/// Router over `registry`.
pub(crate) fn router(registry: AppState) -> Router {
    Router::new()
        .route("/v2/", get(api_version_check))
        .route("/v2/_catalog", get(catalog))
        .merge(manifests::router())
        .merge(blobs::router())
        .merge(uploads::router())
        .with_state(registry)
}

/// API version check endpoint
///
/// Returns 200 OK to indicate the registry is available
async fn api_version_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({})))
}

/// Pagination parameters of listing endpoints.
#[derive(Debug, Default, Deserialize, Serialize)]
pub(crate) struct ListQuery {
    /// Page size. Absent means everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<usize>,
    /// Last entry of the previous page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last: Option<String>,
}

impl ListQuery {
    pub(crate) fn limit(&self) -> usize {
        self.n.unwrap_or(usize::MAX)
    }

    pub(crate) fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}

/// Attach a `Link` header pointing at the next page, if there is one.
pub(crate) fn with_next_link<T: IntoResponse>(
    body: T,
    path: &str,
    limit: usize,
    next: Option<&str>,
) -> Response {
    let mut response = body.into_response();
    let Some(next) = next else {
        return response;
    };

    let query = ListQuery {
        n: Some(limit),
        last: Some(next.to_owned()),
    };
    match serde_urlencoded::to_string(&query)
        .ok()
        .and_then(|query| HeaderValue::try_from(format!("<{path}?{query}>; rel=\"next\"")).ok())
    {
        Some(link) => {
            response.headers_mut().insert(header::LINK, link);
        }
        None => tracing::warn!(%next, "unable to build pagination link"),
    }
    response
}

/// `Range` header value for `offset` received bytes.
pub(crate) fn range(offset: u64) -> String {
    format!("0-{}", offset.saturating_sub(1))
}

async fn catalog(
    State(registry): State<AppState>,
    Query(query): Query<ListQuery>,
) -> RegistryResult<Response> {
    let last = query.last().map(RepoName::new).transpose()?;
    let limit = query.limit();
    let catalog = registry.catalog(last.as_ref(), limit).await?;

    let next = catalog.next().map(|name| name.to_string());
    Ok(with_next_link(
        Json(catalog),
        "/v2/_catalog",
        limit,
        next.as_deref(),
    ))
}
