use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// A core error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub easel_core::Error);

impl From<easel_core::Error> for ApiError {
    fn from(err: easel_core::Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use easel_core::Error;
        match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotReady { .. } | Error::State(_) | Error::Load(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::ResourceExhausted(_) | Error::Inference(_) | Error::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = ?self.0, %status, "request failed");
        } else {
            warn!(error = %self.0, %status, "request rejected");
        }

        let mut body = json!({ "error": self.0.to_string() });
        if let Some(details) = self.0.details() {
            body["details"] = json!(details);
        }
        (status, Json(body)).into_response()
    }
}
