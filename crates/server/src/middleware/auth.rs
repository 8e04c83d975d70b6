//! Bearer-JWT middleware for the RPC entrypoint.
//!
//! Every request through the authenticated group must carry
//! `Authorization: Bearer <jwt>` signed with the configured secret. A
//! missing or invalid token answers 401 with a JSON-RPC error body rather
//! than a bare status, so JSON-RPC clients always get a parseable payload.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use fulcrum_core::auth::verify_token;
use fulcrum_core::proxy::requests::unauthenticated;

use crate::router::AppState;

pub async fn require_jwt(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if verify_token(token, &state.jwt_secret, &state.jwt_alg).is_ok() => {
            next.run(request).await
        }
        _ => unauthorized(),
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::to_vec(&unauthenticated()).unwrap_or_default(),
    )
        .into_response()
}
