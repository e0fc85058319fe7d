use application::RealtimeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "AuthenticationError", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RealtimeError> for ApiError {
    fn from(error: RealtimeError) -> Self {
        let status = match &error {
            RealtimeError::Authentication(_) | RealtimeError::NotAuthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            RealtimeError::NotAMember(_) | RealtimeError::NotMessageOwner(_) => {
                StatusCode::FORBIDDEN
            }
            RealtimeError::MessageNotFound(_) => StatusCode::NOT_FOUND,
            RealtimeError::DuplicateConnection(_) => StatusCode::CONFLICT,
            RealtimeError::EmptyMessage
            | RealtimeError::MessageTooLong { .. }
            | RealtimeError::InvalidEvent(_) => StatusCode::BAD_REQUEST,
            RealtimeError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
