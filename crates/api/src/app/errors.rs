use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use keygate_auth::{AuthzError, TokenError};
use keygate_core::{ErrorCategory, FieldErrors};
use keygate_identity::IdentityError;

pub const INTERNAL_MESSAGE: &str = "internal error, try again";
pub const FORBIDDEN_MESSAGE: &str = "forbidden";

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error(fields: &FieldErrors) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({
            "error": "validation",
            "message": fields.to_string(),
            "fields": fields,
        })),
    )
        .into_response()
}

pub fn unauthenticated() -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
}

pub fn forbidden() -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", FORBIDDEN_MESSAGE)
}

/// Status and wire code for a category. Persistence never leaks detail.
fn status_for(category: ErrorCategory) -> (StatusCode, &'static str) {
    match category {
        ErrorCategory::Validation => (StatusCode::BAD_REQUEST, "validation"),
        ErrorCategory::NotFound => (StatusCode::NOT_FOUND, "not_found"),
        ErrorCategory::Conflict => (StatusCode::CONFLICT, "conflict"),
        ErrorCategory::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
        ErrorCategory::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        ErrorCategory::Persistence => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

fn category_error(category: ErrorCategory, message: String) -> axum::response::Response {
    let (status, code) = status_for(category);
    match category {
        ErrorCategory::Persistence => {
            tracing::error!(error = %message, "request failed on infrastructure fault");
            json_error(status, code, INTERNAL_MESSAGE)
        }
        ErrorCategory::Forbidden => {
            tracing::debug!(reason = %message, "request forbidden");
            forbidden()
        }
        _ => json_error(status, code, message),
    }
}

pub fn identity_error(err: IdentityError) -> axum::response::Response {
    match err {
        IdentityError::Validation(fields) => validation_error(&fields),
        other => category_error(other.category(), other.to_string()),
    }
}

pub fn token_error(err: TokenError) -> axum::response::Response {
    category_error(err.category(), err.to_string())
}

pub fn authz_error(err: AuthzError) -> axum::response::Response {
    category_error(err.category(), err.to_string())
}
