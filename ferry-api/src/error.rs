use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ferry_core::CoreError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Core(CoreError),
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Core(err) => match err {
                CoreError::InvalidRequest(_) | CoreError::MissingData(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Conflict { .. } | CoreError::InvalidState(_) => StatusCode::CONFLICT,
                CoreError::Expired(_) => StatusCode::GONE,
                CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::External(_) => StatusCode::BAD_GATEWAY,
                CoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            AppError::BadRequest(msg) => json!({ "error": msg }),
            AppError::Core(CoreError::Conflict {
                class_id,
                available,
                requested,
            }) => json!({
                "error": "insufficient capacity",
                "class_id": class_id,
                "available": available,
                "requested": requested,
            }),
            AppError::Core(err) if status.is_server_error() => {
                tracing::error!(error = %err, "request failed");
                let msg = match status {
                    StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable, retry later",
                    StatusCode::BAD_GATEWAY => "Payment gateway unavailable",
                    _ => "Internal Server Error",
                };
                json!({ "error": msg })
            }
            AppError::Core(err) => json!({ "error": err.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}
