use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ragdoc_core::RagError;
use serde_json::json;
use tracing::{error, warn};

/// A [`RagError`] rendered as an HTTP response.
///
/// Dependency failures are logged in full and answered with an opaque message.
#[derive(Debug)]
pub struct ApiError(pub RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            RagError::EmptyQuery | RagError::ConfigError(_) => StatusCode::BAD_REQUEST,
            RagError::NoDocumentsFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        } else {
            warn!(error = %self.0, "request rejected");
        }
        (status, Json(json!({ "error": self.0.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(ApiError(RagError::EmptyQuery).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError(RagError::NoDocumentsFound { path: PathBuf::from("data") }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let index_down = RagError::IndexUnavailable { backend: "local".into(), message: "io".into() };
        assert_eq!(ApiError(index_down).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
