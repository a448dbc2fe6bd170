//! HTTP boundary: every failure kind maps to one status and JSON body here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use crate::config::ConfigError;
use crate::extract::ExtractionError;
use crate::models::{ErrorResponse, FailureResponse};

const PROCESSING_PREFIX: &str = "processing failed";

#[derive(Debug)]
pub enum AppError {
    MethodNotAllowed,
    MissingPayload,
    Misconfigured(ConfigError),
    /// Anything that went wrong after the guards passed.
    Processing(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::MissingPayload => StatusCode::BAD_REQUEST,
            AppError::Misconfigured(_) | AppError::Processing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ExtractionError> for AppError {
    fn from(e: ExtractionError) -> Self {
        AppError::Processing(e.to_string())
    }
}

impl From<ConfigError> for AppError {
    fn from(e: ConfigError) -> Self {
        AppError::Misconfigured(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            AppError::MethodNotAllowed => guard(status, "only POST requests are supported"),
            AppError::MissingPayload => guard(status, "no image data received"),
            // The variable name stays in the logs, not in the response.
            AppError::Misconfigured(e) => {
                error!(error = %e, "server misconfigured");
                guard(status, "server configuration error")
            }
            AppError::Processing(msg) => (
                status,
                Json(FailureResponse::new(format!("{}: {}", PROCESSING_PREFIX, msg))),
            )
                .into_response(),
        }
    }
}

fn guard(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}
