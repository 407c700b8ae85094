//! Error types for the registry

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::digest::Digest;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Error types for registry operations
///
/// Absence is not an error: lookups return `Ok(None)`. The `*Unknown`
/// variants exist for the HTTP layer to report a miss.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Digest string is not `<algorithm>:<hex>`
    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    /// Tag string is not a valid tag
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Repository name is not valid
    #[error("invalid repository name: {0}")]
    InvalidRepoName(String),

    /// Manifest reference is neither a digest nor a tag
    #[error("unsupported reference: `{0}`")]
    UnsupportedReference(String),

    /// Manifest content is missing a required field or references missing blobs
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Content negotiation failed
    #[error("cannot convert from '{media_type}' to any of {accepted:?}")]
    UnsupportedMediaType {
        /// The manifest's own media type
        media_type: String,
        /// The media types the client accepts
        accepted: Vec<String>,
    },

    /// Content does not hash to the expected digest
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest
        expected: Digest,
        /// Actual digest
        actual: Digest,
    },

    /// Blob is not known to the registry
    #[error("blob unknown: {0}")]
    BlobUnknown(Digest),

    /// Manifest is not known to the registry
    #[error("manifest unknown: {0}")]
    ManifestUnknown(String),

    /// Upload does not exist, or is no longer active
    #[error("upload not found: {0}")]
    UploadNotFound(String),

    /// The upload request is malformed
    #[error("blob upload invalid: {0}")]
    BlobUploadInvalid(String),

    /// Operation is not supported by this registry composition
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// Stored registry data is unreadable
    #[error("corrupt registry data: {0}")]
    Corrupt(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// The remote registry could not be reached or answered with an error
    #[error("remote registry error: {0}")]
    Remote(#[from] reqwest::Error),

    /// A remote registry URL could not be built
    #[error("invalid remote registry url: {0}")]
    RemoteUrl(#[from] url::ParseError),

    /// The remote registry answered with an unexpected status
    #[error("remote registry returned {status} for {url}")]
    RemoteStatus {
        /// Status of the remote response
        status: StatusCode,
        /// The requested URL
        url: String,
    },
}

impl RegistryError {
    /// The protocol error response for this error.
    pub fn response(&self) -> ErrorResponse {
        let base = match self {
            RegistryError::InvalidDigest(_) | RegistryError::DigestMismatch { .. } => {
                ErrorResponse::DIGEST_INVALID
            }
            RegistryError::InvalidTag(_) | RegistryError::UnsupportedReference(_) => {
                ErrorResponse::TAG_INVALID
            }
            RegistryError::InvalidRepoName(_) => ErrorResponse::NAME_INVALID,
            RegistryError::InvalidManifest(_) => ErrorResponse::MANIFEST_INVALID,
            RegistryError::UnsupportedMediaType { .. } => {
                ErrorResponse::MANIFEST_UNKNOWN.with_status(StatusCode::NOT_ACCEPTABLE)
            }
            RegistryError::BlobUnknown(_) => {
                ErrorResponse::BLOB_UNKNOWN.with_status(StatusCode::NOT_FOUND)
            }
            RegistryError::ManifestUnknown(_) => ErrorResponse::MANIFEST_UNKNOWN,
            RegistryError::UploadNotFound(_) => ErrorResponse::BLOB_UPLOAD_UNKNOWN,
            RegistryError::BlobUploadInvalid(_) => ErrorResponse::BLOB_UPLOAD_INVALID,
            RegistryError::UnsupportedOperation(_) => ErrorResponse::UNSUPPORTED,
            RegistryError::Corrupt(_) | RegistryError::Storage(_) | RegistryError::RemoteUrl(_) => {
                ErrorResponse::UNKNOWN
            }
            RegistryError::Remote(_) | RegistryError::RemoteStatus { .. } => {
                ErrorResponse::UNKNOWN.with_status(StatusCode::BAD_GATEWAY)
            }
        };
        base.with_detail(self.to_string())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        self.response().status
    }

    /// Get the error code for registry error responses
    pub fn error_code(&self) -> &'static str {
        self.response().code
    }
}

/// A protocol error response.
///
/// Serialized as `{"errors": {"code": .., "message": .., "detail": ..}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Protocol error code
    pub code: &'static str,
    /// Human readable message for the code
    pub message: &'static str,
    /// Request specific detail
    pub detail: String,
}

impl ErrorResponse {
    /// A blob is not known to the registry.
    pub const BLOB_UNKNOWN: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "BLOB_UNKNOWN",
        "blob unknown to registry",
    );

    /// Manifest is malformed or references unknown blobs.
    pub const MANIFEST_INVALID: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "MANIFEST_INVALID",
        "manifest invalid",
    );

    /// Manifest is not known to the registry.
    pub const MANIFEST_UNKNOWN: ErrorResponse = ErrorResponse::new(
        StatusCode::NOT_FOUND,
        "MANIFEST_UNKNOWN",
        "manifest unknown",
    );

    /// Digest is malformed or does not match the content.
    pub const DIGEST_INVALID: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "DIGEST_INVALID",
        "provided digest did not match uploaded content",
    );

    /// Repository name is invalid.
    pub const NAME_INVALID: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "NAME_INVALID",
        "invalid repository name",
    );

    /// Tag or reference is invalid.
    pub const TAG_INVALID: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "TAG_INVALID",
        "manifest tag did not match URI",
    );

    /// Upload session is unknown.
    pub const BLOB_UPLOAD_UNKNOWN: ErrorResponse = ErrorResponse::new(
        StatusCode::NOT_FOUND,
        "BLOB_UPLOAD_UNKNOWN",
        "blob upload unknown to registry",
    );

    /// Upload request is invalid.
    pub const BLOB_UPLOAD_INVALID: ErrorResponse = ErrorResponse::new(
        StatusCode::BAD_REQUEST,
        "BLOB_UPLOAD_INVALID",
        "blob upload invalid",
    );

    /// Operation is not supported.
    pub const UNSUPPORTED: ErrorResponse = ErrorResponse::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "UNSUPPORTED",
        "the operation is unsupported",
    );

    /// Unexpected server side failure.
    pub const UNKNOWN: ErrorResponse = ErrorResponse::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "UNKNOWN",
        "unknown error",
    );

    /// A response with an empty detail.
    pub const fn new(status: StatusCode, code: &'static str, message: &'static str) -> Self {
        Self {
            status,
            code,
            message,
            detail: String::new(),
        }
    }

    /// Replace the detail.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Replace the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorBody<'e> {
    errors: ErrorDetail<'e>,
}

#[derive(Debug, serde::Serialize)]
struct ErrorDetail<'e> {
    code: &'static str,
    message: &'static str,
    detail: &'e str,
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            errors: ErrorDetail {
                code: self.code,
                message: self.message,
                detail: &self.detail,
            },
        };

        (self.status, axum::Json(body)).into_response()
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        match &self {
            RegistryError::Storage(error) => {
                tracing::error!(%error, "storage failure");
            }
            RegistryError::Corrupt(_)
            | RegistryError::Remote(_)
            | RegistryError::RemoteUrl(_)
            | RegistryError::RemoteStatus { .. } => {
                tracing::error!(error = %self, "request failed");
            }
            other => {
                tracing::debug!(error = %other, "request failed");
            }
        }
        self.response().into_response()
    }
}
