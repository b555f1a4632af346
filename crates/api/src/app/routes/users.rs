use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, rejection::{JsonRejection, PathRejection}},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;

use keygate_auth::{Role, authorize_owner_or};
use keygate_core::UserId;
use keygate_identity::NewIdentity;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ClaimsContext;
use crate::middleware::basic_credentials;

fn bad_body(rejection: JsonRejection) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", rejection.body_text())
}

fn parse_user_id(raw: &str) -> Result<UserId, axum::response::Response> {
    raw.parse::<UserId>()
        .map_err(|fields| errors::validation_error(&fields))
}

/// Public registration. Granting `admin` needs an admin token.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    ctx: Option<Extension<ClaimsContext>>,
    body: Result<Json<dto::RegisterRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_body(e),
    };

    let caller_is_admin = ctx.is_some_and(|Extension(ctx)| ctx.has_role(&Role::ADMIN));
    if body.roles.contains(&Role::ADMIN) && !caller_is_admin {
        tracing::debug!("admin role requested without an admin token");
        return errors::forbidden();
    }

    match services.identity.register(NewIdentity::from(body), Utc::now()).await {
        Ok(identity) => (StatusCode::CREATED, Json(dto::UserResponse::from(&identity))).into_response(),
        Err(e) => errors::identity_error(e),
    }
}

pub async fn confirm(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ConfirmRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_body(e),
    };

    match services.identity.confirm(&body.email, body.code, Utc::now()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error(e),
    }
}

async fn issue_token(services: &AppServices, email: &str, password: &str) -> axum::response::Response {
    let claims = match services.identity.authenticate(email, password, Utc::now()).await {
        Ok(c) => c,
        Err(e) => return errors::identity_error(e),
    };

    match services.tokens.issue(&claims) {
        Ok(token) => (StatusCode::OK, Json(dto::TokenResponse { token })).into_response(),
        Err(e) => errors::token_error(e),
    }
}

/// Token for HTTP Basic credentials.
pub async fn token_basic(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let Some((email, password)) = basic_credentials(&headers) else {
        return errors::json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            "basic credentials required",
        );
    };
    issue_token(&services, &email, &password).await
}

pub async fn token_json(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::TokenRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_body(e),
    };
    issue_token(&services, &body.email, &body.password).await
}

/// Profile of the token's subject.
pub async fn me(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ClaimsContext>,
) -> axum::response::Response {
    let id = match parse_user_id(ctx.subject()) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.identity.query_by_id(id).await {
        Ok(identity) => (StatusCode::OK, Json(dto::UserResponse::from(&identity))).into_response(),
        Err(e) => errors::identity_error(e),
    }
}

pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<ClaimsContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    if let Err(e) = authorize_owner_or(ctx.claims(), &id.to_string(), &Role::ADMIN) {
        return errors::authz_error(e);
    }

    match services.identity.query_by_id(id).await {
        Ok(identity) => (StatusCode::OK, Json(dto::UserResponse::from(&identity))).into_response(),
        Err(e) => errors::identity_error(e),
    }
}

pub async fn update_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateUserRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return bad_body(e),
    };

    match services.identity.update(id, body.into(), Utc::now()).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error(e),
    }
}

pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.identity.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::identity_error(e),
    }
}

/// Send the pending confirmation code again through the configured relay.
pub async fn resend_code(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match parse_user_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.identity.resend_code(id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => errors::identity_error(e),
    }
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    paging: Result<Path<(u32, u32)>, PathRejection>,
) -> axum::response::Response {
    let Path((page, rows)) = match paging {
        Ok(p) => p,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "validation", e.body_text());
        }
    };

    match services.identity.query(page, rows).await {
        Ok(identities) => {
            let items = identities.iter().map(dto::UserResponse::from).collect();
            (StatusCode::OK, Json(dto::UserListResponse { items, page, rows })).into_response()
        }
        Err(e) => errors::identity_error(e),
    }
}
