//! HTTP mapping of [`DeployerError`]

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use openapi_server::models::ErrorResponse;
use tracing::error;

use crate::errors::DeployerError;

impl DeployerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DeployerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DeployerError::NotFound(_) => StatusCode::NOT_FOUND,
            DeployerError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DeployerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
