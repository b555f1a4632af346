use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;

use keygate_auth::{Role, TokenService, authorize as authorize_role};

use crate::app::errors;
use crate::context::ClaimsContext;

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenService>,
}

/// Role a route requires; state for [`authorize`].
#[derive(Debug, Clone)]
pub struct RequiredRole(pub Role);

/// Require a valid bearer token and attach its claims to the request.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = bearer_token(req.headers())?.ok_or_else(errors::unauthenticated)?;

    let claims = state
        .tokens
        .verify(token, Utc::now())
        .map_err(errors::token_error)?;

    req.extensions_mut().insert(ClaimsContext::new(claims));
    Ok(next.run(req).await)
}

/// Like [`authenticate`], but a request without credentials passes through
/// with no context. A bad token is still rejected.
pub async fn optional_authenticate(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    if let Some(token) = bearer_token(req.headers())? {
        let claims = state
            .tokens
            .verify(token, Utc::now())
            .map_err(errors::token_error)?;
        req.extensions_mut().insert(ClaimsContext::new(claims));
    }
    Ok(next.run(req).await)
}

/// Require the route's role among the authenticated claims.
///
/// Must run after [`authenticate`]; a missing context is treated as
/// unauthenticated.
pub async fn authorize(
    State(RequiredRole(role)): State<RequiredRole>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let ctx = req
        .extensions()
        .get::<ClaimsContext>()
        .ok_or_else(errors::unauthenticated)?;

    authorize_role(ctx.claims(), &role).map_err(errors::authz_error)?;

    Ok(next.run(req).await)
}

/// `Ok(None)` when no `Authorization` header is present; `Err` when one is
/// present but is not a usable bearer token.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, Response> {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header.to_str().map_err(|_| errors::unauthenticated())?;

    let token = strip_scheme(header, "Bearer")
        .ok_or_else(errors::unauthenticated)?
        .trim();
    if token.is_empty() {
        return Err(errors::unauthenticated());
    }

    Ok(Some(token))
}

/// Value after `<scheme> `; the scheme name is matched case-insensitively.
fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (name, rest) = header.split_once(' ')?;
    name.eq_ignore_ascii_case(scheme).then_some(rest)
}

/// Decode `Authorization: Basic base64(email:password)`.
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = strip_scheme(header, "Basic")?.trim();
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (email, password) = decoded.split_once(':')?;
    Some((email.to_string(), password.to_string()))
}
