use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::{AppError, ErrorReport};
use crate::cache::CacheError;
use crate::domain::error::DomainError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNKNOWN_KEY: &str = "unknown_key";
    pub const INVALID_SESSION: &str = "invalid_session";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorMessage,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorMessage {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// JSON error response. The full error chain travels in an [`ErrorReport`]
/// extension so the logging layer can record it.
#[derive(Debug)]
pub struct ApiError {
    source: &'static str,
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    report: Option<ErrorReport>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            source: "infra::http",
            status,
            code,
            message,
            hint,
            report: None,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn from_app(source: &'static str, err: AppError) -> Self {
        let status = err.status_code();
        let code = match &err {
            AppError::Domain(DomainError::UnknownKey { .. })
            | AppError::Cache(CacheError::Domain(DomainError::UnknownKey { .. })) => {
                codes::UNKNOWN_KEY
            }
            AppError::Domain(DomainError::InvalidSessionId { .. })
            | AppError::Cache(CacheError::Domain(DomainError::InvalidSessionId { .. })) => {
                codes::INVALID_SESSION
            }
            _ if status == StatusCode::BAD_REQUEST => codes::BAD_REQUEST,
            _ if status == StatusCode::SERVICE_UNAVAILABLE => codes::UNAVAILABLE,
            _ => codes::INTERNAL,
        };
        // Client errors are safe to echo; server errors stay in the log.
        let hint = status.is_client_error().then(|| err.to_string());
        Self {
            source,
            status,
            code,
            message: err.presentation_message(),
            hint,
            report: Some(ErrorReport::from_error(source, status, &err)),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::from_app("infra::http", err)
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self::from(AppError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let report = self.report.unwrap_or_else(|| {
            let detail = self
                .hint
                .clone()
                .unwrap_or_else(|| self.message.to_string());
            ErrorReport::from_message(self.source, self.status, format!("{}: {detail}", self.code))
        });
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        report.attach(&mut response);
        response
    }
}
