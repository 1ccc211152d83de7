use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::utils::format_size;

/// every way a request against the upload root can fail
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// the resolved path escapes the upload root.
    /// never carries the resolved path so it can't leak to clients
    #[error("path is outside the upload directory")]
    PathViolation,

    #[error("invalid action: {0} (expected new, overwrite or resume)")]
    InvalidAction(String),

    #[error("invalid form field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("file too large: declared {} exceeds the limit of {}", format_size(*.declared), format_size(*.max))]
    SizeLimitExceeded { declared: u64, max: u64 },

    #[error("cannot resume {0}: no upload in progress and no partial file on disk")]
    CannotResume(String),

    #[error("no upload in progress for {0}, start again from chunk 0")]
    SessionNotFound(String),

    #[error("chunk out of order: expected {expected}, received {received}")]
    ChunkOutOfOrder { expected: u64, received: u64 },

    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("not a regular file: {0}")]
    NotAFile(String),

    #[error("preview unavailable: {0}")]
    PreviewRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::PathViolation => StatusCode::FORBIDDEN,
            Self::InvalidAction(_)
            | Self::InvalidField { .. }
            | Self::CannotResume(_)
            | Self::SessionNotFound(_)
            | Self::NotADirectory(_)
            | Self::NotAFile(_) => StatusCode::BAD_REQUEST,
            Self::SizeLimitExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ChunkOutOfOrder { .. } => StatusCode::CONFLICT,
            Self::DirectoryNotFound(_) | Self::FileNotFound(_) => StatusCode::NOT_FOUND,
            Self::PreviewRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn invalid_field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        // lets the client resync without parsing the message
        if let Self::ChunkOutOfOrder { expected, received } = &self {
            body["expected_chunk"] = (*expected).into();
            body["received_chunk"] = (*received).into();
        }
        (status, Json(body)).into_response()
    }
}
