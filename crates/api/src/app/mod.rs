//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: key store, credential store and identity core wiring
//! - `routes/`: HTTP routes + handlers
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Extension, Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;

use keygate_auth::Role;

use crate::middleware::{self, AuthState, RequiredRole};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: AppServices) -> Router {
    let auth_state = AuthState {
        tokens: services.tokens.clone(),
    };
    let require_admin =
        axum::middleware::from_fn_with_state(RequiredRole(Role::ADMIN), middleware::authorize);

    let public = Router::new()
        .route(
            "/v1/users",
            post(routes::users::register).route_layer(axum::middleware::from_fn_with_state(
                auth_state.clone(),
                middleware::optional_authenticate,
            )),
        )
        .route("/v1/users/confirm", put(routes::users::confirm))
        .route(
            "/v1/users/token",
            get(routes::users::token_basic).post(routes::users::token_json),
        );

    // In `/:id/:rows` the first parameter is the page number; the router
    // allows one parameter name per position.
    let protected = Router::new()
        .route("/v1/users/me", get(routes::users::me))
        .route(
            "/v1/users/:id",
            get(routes::users::get_user).merge(
                put(routes::users::update_user)
                    .delete(routes::users::delete_user)
                    .route_layer(require_admin.clone()),
            ),
        )
        .route(
            "/v1/users/:id/confirmation",
            post(routes::users::resend_code).route_layer(require_admin.clone()),
        )
        .route(
            "/v1/users/:id/:rows",
            get(routes::users::list_users).route_layer(require_admin),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::authenticate,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(public)
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(Arc::new(services))))
}
