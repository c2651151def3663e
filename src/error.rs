use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::store::StoreError;
use crate::validation::FieldErrors;

/// Failure body: `{"status":"error","messages":{...}}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub messages: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum ApiError {
    Validation(FieldErrors),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("Unable to log you in. Please check your credentials.".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("Session expired or invalid token".into())
    }

    pub fn admin_required() -> Self {
        ApiError::Forbidden("Admin access required".into())
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.add(field, message);
        ApiError::Validation(errors)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn to_error_response(&self) -> ErrorResponse {
        let messages = match self {
            ApiError::Validation(errors) => errors.to_map(),
            ApiError::Internal(_) => single("An internal error occurred"),
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg) => single(msg),
        };
        ErrorResponse {
            status: "error",
            messages,
        }
    }
}

fn single(msg: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("error".to_string(), msg.to_string())])
}

impl From<FieldErrors> for ApiError {
    fn from(errors: FieldErrors) -> Self {
        ApiError::Validation(errors)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ApiError::NotFound(not_found_message(what)),
            StoreError::Validation(errors) => ApiError::Validation(errors),
            StoreError::Conflict(msg) => ApiError::Conflict(msg),
            StoreError::Database(e) => ApiError::Internal(format!("db error: {e}")),
            StoreError::Corrupt(msg) => ApiError::Internal(format!("corrupt row: {msg}")),
        }
    }
}

pub fn not_found_message(what: &str) -> String {
    let mut chars = what.chars();
    match chars.next() {
        Some(first) => format!("{}{} not found", first.to_uppercase(), chars.as_str()),
        None => "Not found".to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            // detail stays in the log, the client gets a generic message
            tracing::error!(error = %detail, "request failed");
        }
        (self.status_code(), Json(self.to_error_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_keep_field_keys() {
        let mut errors = FieldErrors::new();
        errors.add("phone", "Phone number is required");
        let body = ApiError::Validation(errors).to_error_response();
        assert_eq!(body.status, "error");
        assert_eq!(body.messages.get("phone").map(String::as_str), Some("Phone number is required"));
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let err = ApiError::Internal("db error: connection refused".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = err.to_error_response();
        assert_eq!(body.messages["error"], "An internal error occurred");
    }

    #[test]
    fn test_store_error_mapping() {
        let err: ApiError = StoreError::NotFound("enquiry").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.to_error_response().messages["error"], "Enquiry not found");

        let err: ApiError = StoreError::Conflict("taken".into()).into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }
}
